//! Backoff - Sleep schedule between polls

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::duration::serde_duration;

/// Exponential growth of the poll interval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Backoff {
    /// Factor applied to the previous interval (>= 1.0)
    pub multiplier: f64,
    /// Upper bound for the grown interval
    #[serde(with = "serde_duration")]
    pub max_interval: Duration,
}

impl Backoff {
    pub fn new(multiplier: f64, max_interval: Duration) -> Self {
        Self {
            multiplier,
            max_interval,
        }
    }
}

/// Infinite iterator over the sleeps of one polling session
///
/// The first item is the base interval. With a backoff each following item is
/// the previous one multiplied and capped at `max_interval`. The floor is
/// applied last.
#[derive(Debug, Clone)]
pub struct IntervalSchedule {
    current: Duration,
    backoff: Option<Backoff>,
    floor: Duration,
    started: bool,
}

impl IntervalSchedule {
    pub fn new(base: Duration, backoff: Option<Backoff>, floor: Duration) -> Self {
        Self {
            current: base,
            backoff,
            floor,
            started: false,
        }
    }
}

impl Iterator for IntervalSchedule {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.started {
            if let Some(backoff) = &self.backoff {
                let grown = self.current.as_secs_f64() * backoff.multiplier;
                self.current = if grown >= backoff.max_interval.as_secs_f64() {
                    backoff.max_interval
                } else {
                    Duration::from_secs_f64(grown)
                };
            }
        } else {
            self.started = true;
        }

        Some(self.current.max(self.floor))
    }
}
