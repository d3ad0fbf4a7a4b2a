use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Duration, SubsecRound, Utc};

/// Wall clock that never repeats or goes backwards within one engine.
///
/// Readings are truncated to microseconds, the precision the store keeps, so
/// ordering survives a round trip through persistence.
#[derive(Debug)]
pub struct MonotonicClock {
    last: Mutex<Option<DateTime<Utc>>>,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self { last: Mutex::new(None) }
    }
}

impl MonotonicClock {
    pub fn next(&self) -> DateTime<Utc> {
        let now = Utc::now().trunc_subsecs(6);
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        let next = match *last {
            Some(prev) if now <= prev => prev + Duration::microseconds(1),
            _ => now,
        };
        *last = Some(next);
        next
    }
}
