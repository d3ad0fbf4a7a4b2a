//! Factor calculators.
//!
//! Each calculator turns whatever inputs it finds in a [`FactorInputs`] into a
//! 0-100 sub-score. A calculator returns `None` only when none of its inputs
//! are present; individual missing components are scored neutral.

mod momentum;
mod quality;
mod sentiment;
mod value;

pub use momentum::MomentumFactor;
pub use quality::QualityFactor;
pub use sentiment::SentimentFactor;
pub use value::ValueFactor;

use common::{MarketSnapshot, NewsItem};
use serde::{Deserialize, Serialize};

/// Neutral component value on the 0-1 scale.
pub const NEUTRAL: f64 = 0.5;

#[derive(Debug, Clone, Copy)]
pub struct FactorInputs<'a> {
    pub snapshot: &'a MarketSnapshot,
    pub news: Option<&'a [NewsItem]>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FactorKind {
    Momentum,
    Sentiment,
    Value,
    Quality,
}

impl FactorKind {
    pub const ALL: [FactorKind; 4] = [
        FactorKind::Momentum,
        FactorKind::Sentiment,
        FactorKind::Value,
        FactorKind::Quality,
    ];

    pub fn name(self) -> &'static str {
        match self {
            FactorKind::Momentum => "momentum",
            FactorKind::Sentiment => "sentiment",
            FactorKind::Value => "value",
            FactorKind::Quality => "quality",
        }
    }
}

pub trait FactorCalculator: Send + Sync {
    fn kind(&self) -> FactorKind;

    fn name(&self) -> &'static str {
        self.kind().name()
    }

    /// Sub-score in [0, 100], or `None` when no input was usable.
    fn calculate(&self, inputs: &FactorInputs<'_>) -> Option<f64>;
}

/// Weighted blend of 0-1 components, scaled to 0-100.
/// Absent components count as [`NEUTRAL`]; all absent yields `None`.
pub(crate) fn blend(components: &[(Option<f64>, f64)]) -> Option<f64> {
    if components.iter().all(|(c, _)| c.is_none()) {
        return None;
    }
    let score: f64 = components
        .iter()
        .map(|(c, w)| c.unwrap_or(NEUTRAL) * w)
        .sum();
    Some((score * 100.0).clamp(0.0, 100.0))
}

pub(crate) fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
