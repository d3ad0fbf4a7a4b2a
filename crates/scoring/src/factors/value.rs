use common::Fundamentals;

use super::{blend, FactorCalculator, FactorInputs, FactorKind};

/// Cheapness relative to history: PE and PB percentiles, price-to-sales and
/// dividend yield.
#[derive(Debug, Clone, Default)]
pub struct ValueFactor;

/// Lower percentile is cheaper. Ratios outside `(0, cap)` score low.
fn percentile_component(ratio: Option<f64>, percentile: Option<f64>, cap: f64) -> Option<f64> {
    let (ratio, percentile) = (ratio?, percentile?);
    if ratio > 0.0 && ratio < cap {
        Some((1.0 - percentile).clamp(0.0, 1.0))
    } else {
        Some(0.3)
    }
}

fn ps_component(ps: Option<f64>) -> Option<f64> {
    let ps = ps?;
    Some(if ps < 1.0 {
        1.0
    } else if ps < 3.0 {
        0.8
    } else if ps < 5.0 {
        0.6
    } else if ps < 10.0 {
        0.4
    } else {
        0.2
    })
}

fn dividend_component(dy: Option<f64>) -> Option<f64> {
    let dy = dy?;
    Some(if dy > 0.05 {
        1.0
    } else if dy > 0.03 {
        0.8
    } else if dy > 0.02 {
        0.6
    } else if dy > 0.01 {
        0.4
    } else {
        0.2
    })
}

impl ValueFactor {
    fn score(f: &Fundamentals) -> Option<f64> {
        blend(&[
            (percentile_component(f.pe_ratio, f.pe_percentile, 50.0), 0.30),
            (percentile_component(f.pb_ratio, f.pb_percentile, 10.0), 0.25),
            (ps_component(f.ps_ratio), 0.25),
            (dividend_component(f.dividend_yield), 0.20),
        ])
    }
}

impl FactorCalculator for ValueFactor {
    fn kind(&self) -> FactorKind {
        FactorKind::Value
    }

    fn calculate(&self, inputs: &FactorInputs<'_>) -> Option<f64> {
        Self::score(&inputs.snapshot.fundamentals)
    }
}
