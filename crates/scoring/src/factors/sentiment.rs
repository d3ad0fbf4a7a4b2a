use common::{NewsItem, SentimentLabel};

use super::{blend, FactorCalculator, FactorInputs, FactorKind};

/// Money flow magnitude that saturates the flow component.
const MONEY_FLOW_SCALE: f64 = 1_000_000_000.0;

/// News tone, net money flow and trading activity.
#[derive(Debug, Clone, Default)]
pub struct SentimentFactor;

impl SentimentFactor {
    fn news_component(news: Option<&[NewsItem]>) -> Option<f64> {
        let scores: Vec<f64> = news?
            .iter()
            .filter_map(|item| {
                item.sentiment_score
                    .filter(|s| s.is_finite())
                    .or_else(|| item.sentiment_label.map(label_score))
            })
            .collect();
        if scores.is_empty() {
            return None;
        }
        let avg = scores.iter().sum::<f64>() / scores.len() as f64;
        Some(avg.clamp(0.0, 1.0))
    }

    fn money_flow_component(flow: Option<f64>) -> Option<f64> {
        let flow = flow.filter(|f| f.is_finite())?;
        let normalised = (flow / MONEY_FLOW_SCALE).clamp(-1.0, 1.0);
        Some(0.5 + normalised / 2.0)
    }

    fn turnover_component(rate: Option<f64>) -> Option<f64> {
        let rate = rate?;
        Some(if (2.0..=8.0).contains(&rate) {
            0.8
        } else if (0.5..2.0).contains(&rate) {
            0.6
        } else if rate > 8.0 && rate <= 15.0 {
            0.7
        } else {
            0.4
        })
    }
}

fn label_score(label: SentimentLabel) -> f64 {
    match label {
        SentimentLabel::Positive => 0.8,
        SentimentLabel::Neutral => 0.5,
        SentimentLabel::Negative => 0.2,
    }
}

impl FactorCalculator for SentimentFactor {
    fn kind(&self) -> FactorKind {
        FactorKind::Sentiment
    }

    fn calculate(&self, inputs: &FactorInputs<'_>) -> Option<f64> {
        blend(&[
            (Self::news_component(inputs.news), 0.40),
            (Self::money_flow_component(inputs.snapshot.money_flow), 0.35),
            (Self::turnover_component(inputs.snapshot.turnover_rate), 0.25),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::MarketSnapshot;

    fn item(score: Option<f64>, label: Option<SentimentLabel>) -> NewsItem {
        NewsItem {
            title: None,
            sentiment_label: label,
            sentiment_score: score,
        }
    }

    #[test]
    fn explicit_scores_take_precedence_over_labels() {
        let news = [
            item(Some(1.0), Some(SentimentLabel::Negative)),
            item(None, Some(SentimentLabel::Positive)),
        ];
        let c = SentimentFactor::news_component(Some(&news)).unwrap();
        assert!((c - 0.9).abs() < 1e-12);
    }

    #[test]
    fn strong_inflow_and_good_news_score_high() {
        let snapshot = MarketSnapshot {
            money_flow: Some(2e9),
            turnover_rate: Some(4.0),
            ..Default::default()
        };
        let news = [item(Some(0.9), None)];
        let score = SentimentFactor
            .calculate(&FactorInputs { snapshot: &snapshot, news: Some(&news) })
            .unwrap();
        // (0.9 * 0.4 + 1.0 * 0.35 + 0.8 * 0.25) * 100
        assert!((score - 91.0).abs() < 1e-9);
    }

    #[test]
    fn empty_news_without_market_inputs_is_uncomputable() {
        let snapshot = MarketSnapshot::default();
        let inputs = FactorInputs { snapshot: &snapshot, news: Some(&[]) };
        assert_eq!(SentimentFactor.calculate(&inputs), None);
    }
}
