//! Watch-pool maintenance suggestions derived from successive score runs.

use std::collections::BTreeMap;

use common::FactorScore;
use serde::{Deserialize, Serialize};

use crate::engine::NEUTRAL_SCORE;
use crate::factors::{round2, FactorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PoolAction {
    Add,
    Remove,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyFactorChange {
    pub factor: FactorKind,
    pub current: f64,
    pub previous: f64,
    pub change: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolSuggestion {
    pub stock_code: String,
    pub action: PoolAction,
    pub reason: String,
    pub score: f64,
    pub score_change: f64,
    pub key_factors: Vec<KeyFactorChange>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolAdvisor {
    pub entry_threshold: f64,
    pub exit_threshold: f64,
    pub max_pool_size: usize,
    /// Minimum score rise for an entry suggestion.
    pub min_rise: f64,
    /// Score drop that triggers an exit regardless of the exit threshold.
    pub max_drop: f64,
    /// Sub-score change that makes a factor worth reporting.
    pub key_factor_change: f64,
}

impl Default for PoolAdvisor {
    fn default() -> Self {
        Self {
            entry_threshold: 90.0,
            exit_threshold: 80.0,
            max_pool_size: 20,
            min_rise: 5.0,
            max_drop: 10.0,
            key_factor_change: 5.0,
        }
    }
}

impl PoolAdvisor {
    /// Compare the latest scores with the previous run and propose additions
    /// and removals, largest absolute score change first.
    pub fn suggest(
        &self,
        current: &BTreeMap<String, FactorScore>,
        previous: &BTreeMap<String, FactorScore>,
        pool: &[String],
    ) -> Vec<PoolSuggestion> {
        let mut suggestions = Vec::new();
        let mut pool_size = pool.len();

        for (code, score) in current {
            if pool.contains(code) {
                continue;
            }
            let prev = previous.get(code);
            let prev_total = prev.map_or(0.0, |p| p.total);
            let change = score.total - prev_total;
            if score.total >= self.entry_threshold
                && change >= self.min_rise
                && pool_size < self.max_pool_size
            {
                pool_size += 1;
                suggestions.push(PoolSuggestion {
                    stock_code: code.clone(),
                    action: PoolAction::Add,
                    reason: add_reason(score, change),
                    score: score.total,
                    score_change: round2(change),
                    key_factors: self.key_factors(score, prev),
                });
            }
        }

        for code in pool {
            let Some(score) = current.get(code) else {
                continue;
            };
            let prev = previous.get(code);
            let change = score.total - prev.map_or(score.total, |p| p.total);
            if score.total <= self.exit_threshold || change <= -self.max_drop {
                suggestions.push(PoolSuggestion {
                    stock_code: code.clone(),
                    action: PoolAction::Remove,
                    reason: remove_reason(score, change),
                    score: score.total,
                    score_change: round2(change),
                    key_factors: self.key_factors(score, prev),
                });
            }
        }

        suggestions.sort_by(|a, b| b.score_change.abs().total_cmp(&a.score_change.abs()));
        suggestions
    }

    /// Up to three factors whose sub-score moved by at least
    /// `key_factor_change`, largest move first.
    fn key_factors(&self, current: &FactorScore, previous: Option<&FactorScore>) -> Vec<KeyFactorChange> {
        let mut changes: Vec<KeyFactorChange> = FactorKind::ALL
            .iter()
            .filter_map(|&factor| {
                let now = sub_score(current, factor);
                let before = previous.map_or(0.0, |p| sub_score(p, factor));
                let change = now - before;
                (change.abs() >= self.key_factor_change).then(|| KeyFactorChange {
                    factor,
                    current: now,
                    previous: before,
                    change: round2(change),
                })
            })
            .collect();
        changes.sort_by(|a, b| b.change.abs().total_cmp(&a.change.abs()));
        changes.truncate(3);
        changes
    }
}

fn sub_score(score: &FactorScore, factor: FactorKind) -> f64 {
    match factor {
        FactorKind::Momentum => score.momentum,
        FactorKind::Sentiment => score.sentiment,
        FactorKind::Value => score.value,
        FactorKind::Quality => score.quality,
    }
    .unwrap_or(NEUTRAL_SCORE)
}

fn add_reason(score: &FactorScore, change: f64) -> String {
    let strengths: Vec<&str> = FactorKind::ALL
        .iter()
        .filter(|&&f| sub_score(score, f) >= 70.0)
        .map(|&f| match f {
            FactorKind::Momentum => "strong momentum",
            FactorKind::Sentiment => "positive sentiment",
            FactorKind::Value => "attractive valuation",
            FactorKind::Quality => "solid fundamentals",
        })
        .take(2)
        .collect();
    let head = if score.total >= 95.0 {
        format!("composite score {:.2}, outstanding", score.total)
    } else {
        format!("composite score {:.2}, up {change:.1}", score.total)
    };
    join_reason(head, &strengths)
}

fn remove_reason(score: &FactorScore, change: f64) -> String {
    let weaknesses: Vec<&str> = FactorKind::ALL
        .iter()
        .filter(|&&f| sub_score(score, f) <= 30.0)
        .map(|&f| match f {
            FactorKind::Momentum => "momentum fading",
            FactorKind::Sentiment => "sentiment deteriorating",
            FactorKind::Value => "valuation stretched",
            FactorKind::Quality => "fundamental risk",
        })
        .take(2)
        .collect();
    let head = if score.total <= 70.0 {
        format!("composite score {:.2}, underperforming", score.total)
    } else {
        format!("composite score down {:.1} to {:.2}", -change, score.total)
    };
    join_reason(head, &weaknesses)
}

fn join_reason(head: String, details: &[&str]) -> String {
    if details.is_empty() {
        head
    } else {
        format!("{head}; {}", details.join(", "))
    }
}

/// One-line reading of a sub-score: high at 70 and above, low below 40.
pub fn explain_factor(factor: &str, score: f64) -> &'static str {
    let factor = factor.trim_end_matches("_score");
    let band = if score >= 70.0 {
        0
    } else if score >= 40.0 {
        1
    } else {
        2
    };
    let texts: [&'static str; 3] = match factor {
        "momentum" => [
            "Strong momentum: price trend is up and short-term performance is good",
            "Steady momentum: price action is relatively stable",
            "Weak momentum: price trend is down and short-term performance is poor",
        ],
        "sentiment" => [
            "Positive sentiment: clear inflows and favourable news",
            "Neutral sentiment: money flows are balanced",
            "Negative sentiment: outflow pressure and unfavourable news",
        ],
        "value" => [
            "Clear valuation advantage with a good margin of safety",
            "Valuation in line with the sector average",
            "Valuation is stretched and may carry bubble risk",
        ],
        "quality" => [
            "Excellent fundamentals: healthy balance sheet and strong profitability",
            "Good fundamentals: financial position is fairly stable",
            "Average fundamentals: watch for financial risk",
        ],
        _ => ["Performing well", "Performing averagely", "Needs attention"],
    };
    texts[band]
}
