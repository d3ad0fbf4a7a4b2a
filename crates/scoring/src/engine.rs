use std::collections::BTreeMap;

use chrono::NaiveDate;
use common::{FactorScore, FactorWeights, MarketSnapshot, NewsItem, Result};
use tracing::debug;

use crate::factors::{
    round2, FactorCalculator, FactorInputs, FactorKind, MomentumFactor, QualityFactor,
    SentimentFactor, ValueFactor,
};

/// Neutral sub-score substituted for an uncomputable factor.
pub const NEUTRAL_SCORE: f64 = 50.0;

/// Combines the four factor calculators into one bounded composite score.
///
/// Scoring is pure: the same snapshot, news and date always produce the same
/// `FactorScore`, and nothing here can fail once the engine is built.
pub struct ScoringEngine {
    weights: FactorWeights,
    momentum: Box<dyn FactorCalculator>,
    sentiment: Box<dyn FactorCalculator>,
    value: Box<dyn FactorCalculator>,
    quality: Box<dyn FactorCalculator>,
}

impl std::fmt::Debug for ScoringEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScoringEngine")
            .field("weights", &self.weights)
            .finish_non_exhaustive()
    }
}

impl Default for ScoringEngine {
    fn default() -> Self {
        Self::from_parts(FactorWeights::default())
    }
}

impl ScoringEngine {
    /// Build with the default calculators. Weights must be non-negative and
    /// sum to 1.
    pub fn new(weights: FactorWeights) -> Result<Self> {
        weights.validate()?;
        Ok(Self::from_parts(weights))
    }

    fn from_parts(weights: FactorWeights) -> Self {
        Self {
            weights,
            momentum: Box::new(MomentumFactor::default()),
            sentiment: Box::new(SentimentFactor),
            value: Box::new(ValueFactor),
            quality: Box::new(QualityFactor),
        }
    }

    /// Replace the calculator for the factor it reports via `kind()`.
    pub fn with_calculator(mut self, calculator: Box<dyn FactorCalculator>) -> Self {
        match calculator.kind() {
            FactorKind::Momentum => self.momentum = calculator,
            FactorKind::Sentiment => self.sentiment = calculator,
            FactorKind::Value => self.value = calculator,
            FactorKind::Quality => self.quality = calculator,
        }
        self
    }

    pub fn weights(&self) -> FactorWeights {
        self.weights
    }

    pub fn compute_composite_score(
        &self,
        code: &str,
        snapshot: &MarketSnapshot,
        news: Option<&[NewsItem]>,
        as_of: NaiveDate,
    ) -> FactorScore {
        let inputs = FactorInputs { snapshot, news };
        let sub = |calc: &dyn FactorCalculator| {
            calc.calculate(&inputs)
                .filter(|s| s.is_finite())
                .map(|s| round2(s.clamp(0.0, 100.0)))
        };

        let momentum = sub(self.momentum.as_ref());
        let sentiment = sub(self.sentiment.as_ref());
        let value = sub(self.value.as_ref());
        let quality = sub(self.quality.as_ref());

        let total = composite_total(&self.weights, [momentum, sentiment, value, quality]);
        debug!(code, total, ?momentum, ?sentiment, ?value, ?quality, "Scored instrument");

        FactorScore {
            code: code.to_string(),
            date: as_of,
            momentum,
            sentiment,
            value,
            quality,
            total,
            weights: self.weights,
            inputs: snapshot.clone(),
            news_count: news.map_or(0, <[NewsItem]>::len),
        }
    }

    /// Score many instruments at once. News is optional per instrument.
    pub fn batch_scores(
        &self,
        snapshots: &BTreeMap<String, MarketSnapshot>,
        news: &BTreeMap<String, Vec<NewsItem>>,
        as_of: NaiveDate,
    ) -> BTreeMap<String, FactorScore> {
        snapshots
            .iter()
            .map(|(code, snapshot)| {
                let items = news.get(code).map(Vec::as_slice);
                (
                    code.clone(),
                    self.compute_composite_score(code, snapshot, items, as_of),
                )
            })
            .collect()
    }
}

/// Weighted total with missing sub-scores counted as [`NEUTRAL_SCORE`],
/// clamped to [0, 100] and rounded to two decimals.
pub fn composite_total(weights: &FactorWeights, subs: [Option<f64>; 4]) -> f64 {
    let w = [weights.momentum, weights.sentiment, weights.value, weights.quality];
    let total: f64 = subs
        .iter()
        .zip(w)
        .map(|(s, w)| s.unwrap_or(NEUTRAL_SCORE) * w)
        .sum();
    round2(total.clamp(0.0, 100.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::Fundamentals;

    fn as_of() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 3).unwrap()
    }

    struct Fixed(FactorKind, Option<f64>);

    impl FactorCalculator for Fixed {
        fn kind(&self) -> FactorKind {
            self.0
        }

        fn calculate(&self, _: &FactorInputs<'_>) -> Option<f64> {
            self.1
        }
    }

    #[test]
    fn empty_snapshot_scores_neutral() {
        let score = ScoringEngine::default().compute_composite_score(
            "000001",
            &MarketSnapshot::default(),
            None,
            as_of(),
        );
        assert_eq!(score.total, 50.0);
        assert!(score.momentum.is_none() && score.quality.is_none());
        assert_eq!(score.date, as_of());
    }

    #[test]
    fn total_is_the_weighted_sum_of_sub_scores() {
        let engine = ScoringEngine::default()
            .with_calculator(Box::new(Fixed(FactorKind::Momentum, Some(80.0))))
            .with_calculator(Box::new(Fixed(FactorKind::Sentiment, Some(60.0))))
            .with_calculator(Box::new(Fixed(FactorKind::Value, Some(40.0))))
            .with_calculator(Box::new(Fixed(FactorKind::Quality, None)));
        let score =
            engine.compute_composite_score("600519", &MarketSnapshot::default(), None, as_of());
        // 80*0.30 + 60*0.25 + 40*0.25 + 50*0.20
        assert_eq!(score.total, 59.0);
    }

    #[test]
    fn out_of_range_calculator_output_is_clamped() {
        let engine = ScoringEngine::default()
            .with_calculator(Box::new(Fixed(FactorKind::Momentum, Some(250.0))))
            .with_calculator(Box::new(Fixed(FactorKind::Value, Some(f64::NAN))));
        let score =
            engine.compute_composite_score("600519", &MarketSnapshot::default(), None, as_of());
        assert_eq!(score.momentum, Some(100.0));
        assert_eq!(score.value, None);
        assert!((0.0..=100.0).contains(&score.total));
    }

    #[test]
    fn invalid_weights_are_rejected() {
        let weights = FactorWeights {
            momentum: 0.9,
            ..FactorWeights::default()
        };
        assert!(ScoringEngine::new(weights).is_err());
    }

    #[test]
    fn batch_scores_every_snapshot() {
        let mut snapshots = BTreeMap::new();
        snapshots.insert("000001".to_string(), MarketSnapshot::default());
        snapshots.insert(
            "600036".to_string(),
            MarketSnapshot {
                fundamentals: Fundamentals {
                    debt_ratio: Some(30.0),
                    ..Default::default()
                },
                ..Default::default()
            },
        );
        let scores = ScoringEngine::default().batch_scores(&snapshots, &BTreeMap::new(), as_of());
        assert_eq!(scores.len(), 2);
        assert!(scores["600036"].quality.is_some());
    }
}
