use common::Fundamentals;

use super::{blend, FactorCalculator, FactorInputs, FactorKind};
use crate::indicators::mean_std;

/// Minimum yearly observations before stability metrics are used.
const MIN_HISTORY_YEARS: usize = 3;

/// Balance-sheet and earnings quality: ROE stability, leverage and profit
/// consistency.
#[derive(Debug, Clone, Default)]
pub struct QualityFactor;

fn roe_component(f: &Fundamentals) -> Option<f64> {
    if f.roe_history.len() >= MIN_HISTORY_YEARS {
        let (avg, std) = mean_std(&f.roe_history)?;
        let stability = (1.0 - std / 10.0).max(0.0);
        let level = (avg / 15.0).clamp(0.0, 1.0);
        return Some(stability * 0.6 + level * 0.4);
    }
    let roe = f.current_roe?;
    Some(if roe > 15.0 {
        0.8
    } else if roe > 10.0 {
        0.6
    } else if roe > 5.0 {
        0.4
    } else if roe > 0.0 {
        0.2
    } else {
        0.1
    })
}

/// Moderate leverage is preferred over both extremes.
fn debt_component(debt: Option<f64>) -> Option<f64> {
    let d = debt?;
    Some(if (20.0..=40.0).contains(&d) {
        1.0
    } else if (10.0..20.0).contains(&d) {
        0.9
    } else if d > 40.0 && d <= 60.0 {
        0.8
    } else if (5.0..10.0).contains(&d) {
        0.7
    } else if d > 60.0 && d <= 80.0 {
        0.5
    } else if d > 80.0 {
        0.2
    } else {
        0.5
    })
}

fn profit_component(f: &Fundamentals) -> Option<f64> {
    if f.profit_history.len() >= MIN_HISTORY_YEARS {
        let growth_years = f.profit_history.windows(2).filter(|w| w[1] > w[0]).count();
        return Some(growth_years as f64 / (f.profit_history.len() - 1) as f64);
    }
    let g = f.profit_growth?;
    Some(if g > 0.2 {
        0.9
    } else if g > 0.1 {
        0.8
    } else if g > 0.0 {
        0.6
    } else if g > -0.1 {
        0.4
    } else {
        0.2
    })
}

impl FactorCalculator for QualityFactor {
    fn kind(&self) -> FactorKind {
        FactorKind::Quality
    }

    fn calculate(&self, inputs: &FactorInputs<'_>) -> Option<f64> {
        let f = &inputs.snapshot.fundamentals;
        blend(&[
            (roe_component(f), 0.35),
            (debt_component(f.debt_ratio), 0.30),
            (profit_component(f), 0.35),
        ])
    }
}
