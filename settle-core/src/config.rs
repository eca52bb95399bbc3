//! Config - Description of one polling session

use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backoff::{Backoff, IntervalSchedule};
use crate::duration::serde_duration;

/// Default total time budget
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20 * 60);

/// Default wait between polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// What a "not found" answer from the probe means for this session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotFoundPolicy {
    /// Propagate the probe error (no silent suppression)
    #[default]
    Error,
    /// Absence is the goal, e.g. waiting for a deletion
    Succeed,
    /// Absence is an unrecoverable failure
    Fail,
    /// Treat as pending for up to N consecutive probes, then fail
    Tolerate(u32),
}

/// How states outside both the pending and target sets are handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownStatePolicy {
    /// Keep polling as if the state were pending
    #[default]
    Pending,
    /// Stop with an unexpected-state error
    Error,
}

/// Errors reported by [`PollConfig::validate`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("at least one target state is required")]
    NoTargetStates,

    #[error("state {state:?} is both {first} and {second}")]
    OverlappingStates {
        state: String,
        first: &'static str,
        second: &'static str,
    },

    #[error("timeout must be greater than zero")]
    ZeroTimeout,

    #[error("poll interval must be greater than zero")]
    ZeroPollInterval,

    #[error("continuous success count must be at least 1")]
    ZeroSuccessCount,

    #[error("backoff multiplier must be a finite number >= 1.0, got {0}")]
    InvalidBackoffMultiplier(String),

    #[error("backoff max interval must not be shorter than the poll interval")]
    BackoffMaxBelowInterval,
}

/// Immutable description of one polling session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PollConfig {
    /// States meaning "still in progress"
    pub pending: BTreeSet<String>,
    /// States meaning success
    pub target: BTreeSet<String>,
    /// States meaning unrecoverable failure
    pub failure: BTreeSet<String>,
    /// Total time budget
    #[serde(with = "serde_duration")]
    pub timeout: Duration,
    /// Wait before the first poll
    #[serde(with = "serde_duration")]
    pub initial_delay: Duration,
    /// Wait between polls
    #[serde(with = "serde_duration")]
    pub poll_interval: Duration,
    /// Floor applied to every wait after backoff
    #[serde(with = "serde_duration")]
    pub min_poll_interval: Duration,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backoff: Option<Backoff>,
    /// Consecutive target observations required before success
    pub continuous_success_count: u32,
    pub not_found: NotFoundPolicy,
    pub unknown_states: UnknownStatePolicy,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            pending: BTreeSet::new(),
            target: BTreeSet::new(),
            failure: BTreeSet::new(),
            timeout: DEFAULT_TIMEOUT,
            initial_delay: Duration::ZERO,
            poll_interval: DEFAULT_POLL_INTERVAL,
            min_poll_interval: Duration::ZERO,
            backoff: None,
            continuous_success_count: 1,
            not_found: NotFoundPolicy::Error,
            unknown_states: UnknownStatePolicy::Pending,
        }
    }
}

fn to_set<I, S>(states: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    states.into_iter().map(Into::into).collect()
}

impl PollConfig {
    pub fn new<I, S>(target: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            target: to_set(target),
            ..Self::default()
        }
    }

    pub fn with_pending<I, S>(mut self, pending: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.pending = to_set(pending);
        self
    }

    pub fn with_failure<I, S>(mut self, failure: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.failure = to_set(failure);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_min_poll_interval(mut self, interval: Duration) -> Self {
        self.min_poll_interval = interval;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = Some(backoff);
        self
    }

    pub fn with_continuous_success_count(mut self, count: u32) -> Self {
        self.continuous_success_count = count;
        self
    }

    pub fn with_not_found(mut self, policy: NotFoundPolicy) -> Self {
        self.not_found = policy;
        self
    }

    pub fn with_unknown_states(mut self, policy: UnknownStatePolicy) -> Self {
        self.unknown_states = policy;
        self
    }

    pub fn is_pending(&self, state: &str) -> bool {
        self.pending.contains(state)
    }

    pub fn is_target(&self, state: &str) -> bool {
        self.target.contains(state)
    }

    pub fn is_failure(&self, state: &str) -> bool {
        self.failure.contains(state)
    }

    /// Sleep schedule between polls for a fresh session
    pub fn intervals(&self) -> IntervalSchedule {
        IntervalSchedule::new(
            self.poll_interval,
            self.backoff.clone(),
            self.min_poll_interval,
        )
    }

    /// Check the invariants every session relies on
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.target.is_empty() {
            return Err(ConfigError::NoTargetStates);
        }

        let pairs: [(&BTreeSet<String>, &'static str, &BTreeSet<String>, &'static str); 3] = [
            (&self.target, "target", &self.pending, "pending"),
            (&self.target, "target", &self.failure, "failure"),
            (&self.pending, "pending", &self.failure, "failure"),
        ];
        for (left, first, right, second) in pairs {
            if let Some(state) = left.intersection(right).next() {
                return Err(ConfigError::OverlappingStates {
                    state: state.clone(),
                    first,
                    second,
                });
            }
        }

        if self.timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::ZeroPollInterval);
        }
        if self.continuous_success_count == 0 {
            return Err(ConfigError::ZeroSuccessCount);
        }

        if let Some(backoff) = &self.backoff {
            if !backoff.multiplier.is_finite() || backoff.multiplier < 1.0 {
                return Err(ConfigError::InvalidBackoffMultiplier(
                    backoff.multiplier.to_string(),
                ));
            }
            if backoff.max_interval < self.poll_interval {
                return Err(ConfigError::BackoffMaxBelowInterval);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provisioning() -> PollConfig {
        PollConfig::new(["active"])
            .with_pending(["provisioning"])
            .with_timeout(Duration::from_secs(30))
            .with_poll_interval(Duration::from_secs(10))
    }

    #[test]
    fn defaults() {
        let config = PollConfig::new(["ready"]);
        assert_eq!(config.timeout, DEFAULT_TIMEOUT);
        assert_eq!(config.poll_interval, DEFAULT_POLL_INTERVAL);
        assert_eq!(config.continuous_success_count, 1);
        assert_eq!(config.not_found, NotFoundPolicy::Error);
        assert_eq!(config.unknown_states, UnknownStatePolicy::Pending);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn classify_states() {
        let config = provisioning().with_failure(["failed"]);
        assert!(config.is_pending("provisioning"));
        assert!(config.is_target("active"));
        assert!(config.is_failure("failed"));
        assert!(!config.is_target("Active"));
    }

    #[test]
    fn validate_requires_target() {
        let config = PollConfig::default();
        assert_eq!(config.validate(), Err(ConfigError::NoTargetStates));
    }

    #[test]
    fn validate_rejects_overlaps() {
        let config = provisioning().with_pending(["provisioning", "active"]);
        assert_eq!(
            config.validate(),
            Err(ConfigError::OverlappingStates {
                state: "active".to_string(),
                first: "target",
                second: "pending",
            })
        );

        let config = provisioning().with_failure(["provisioning"]);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::OverlappingStates { first: "pending", .. })
        ));
    }

    #[test]
    fn validate_rejects_zero_durations_and_count() {
        assert_eq!(
            provisioning().with_timeout(Duration::ZERO).validate(),
            Err(ConfigError::ZeroTimeout)
        );
        assert_eq!(
            provisioning().with_poll_interval(Duration::ZERO).validate(),
            Err(ConfigError::ZeroPollInterval)
        );
        assert_eq!(
            provisioning().with_continuous_success_count(0).validate(),
            Err(ConfigError::ZeroSuccessCount)
        );
    }

    #[test]
    fn validate_backoff() {
        let config = provisioning().with_backoff(Backoff::new(0.5, Duration::from_secs(60)));
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidBackoffMultiplier(_))
        ));

        let config = provisioning().with_backoff(Backoff::new(f64::NAN, Duration::from_secs(60)));
        assert!(config.validate().is_err());

        let config = provisioning().with_backoff(Backoff::new(2.0, Duration::from_secs(1)));
        assert_eq!(config.validate(), Err(ConfigError::BackoffMaxBelowInterval));

        let config = provisioning().with_backoff(Backoff::new(2.0, Duration::from_secs(60)));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn deserialize_partial_json() {
        let json = r#"{
            "pending": ["Deploy requested", "Deploy in progress"],
            "target": ["Ready"],
            "timeout": "90m",
            "initial_delay": "10s",
            "min_poll_interval": "5s",
            "continuous_success_count": 5,
            "not_found": {"tolerate": 3},
            "backoff": {"multiplier": 2.0, "max_interval": "1m"}
        }"#;

        let config: PollConfig = serde_json::from_str(json).unwrap();
        assert!(config.is_pending("Deploy in progress"));
        assert_eq!(config.timeout, Duration::from_secs(90 * 60));
        assert_eq!(config.poll_interval, DEFAULT_POLL_INTERVAL);
        assert_eq!(config.continuous_success_count, 5);
        assert_eq!(config.not_found, NotFoundPolicy::Tolerate(3));
        assert_eq!(
            config.backoff,
            Some(Backoff::new(2.0, Duration::from_secs(60)))
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn deserialize_rejects_unknown_fields() {
        let json = r#"{"target": ["active"], "retries": 3}"#;
        assert!(serde_json::from_str::<PollConfig>(json).is_err());
    }

    #[test]
    fn serialize_roundtrips_policies() {
        let config = provisioning()
            .with_not_found(NotFoundPolicy::Succeed)
            .with_unknown_states(UnknownStatePolicy::Error);
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["not_found"], "succeed");
        assert_eq!(json["unknown_states"], "error");
        assert_eq!(json["timeout"], "30s");

        let back: PollConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn sub_millisecond_durations_survive_serialization() {
        let config = PollConfig::new(["active"])
            .with_poll_interval(Duration::from_micros(500))
            .with_timeout(Duration::from_micros(1_500));
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["poll_interval"], "500us");
        assert_eq!(json["timeout"], "1ms500us");

        let back: PollConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back, config);
        assert!(back.validate().is_ok());
    }
}
