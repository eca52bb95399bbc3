//! Poller - Drive a refresh function until the resource converges
//!
//! One call to [`Poller::wait`] is one polling session:
//!
//! 1. sleep `initial_delay`
//! 2. probe, classify the observed state, stop on success / failure
//! 3. stop with a timeout once the budget is spent
//! 4. sleep the next interval and go back to 2
//!
//! Both sleeps, and the probe in flight, are raced against an optional
//! cancellation token. The poller keeps no state between sessions.

use std::fmt;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::{ConfigError, NotFoundPolicy, PollConfig, UnknownStatePolicy};
use crate::duration::format_duration;
use crate::refresh::{Refresh, RefreshError, Snapshot};

/// Successful end of a polling session
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome<T> {
    /// Last snapshot that satisfied the target condition.
    /// `None` when absence of the resource was the goal.
    pub snapshot: Option<Snapshot<T>>,
    /// Number of probes performed
    pub polls: u32,
    /// Time from the start of the session to convergence
    pub elapsed: Duration,
}

impl<T> Outcome<T> {
    pub fn state(&self) -> Option<&str> {
        self.snapshot.as_ref().map(|s| s.state.as_str())
    }

    pub fn object(&self) -> Option<&T> {
        self.snapshot.as_ref().map(|s| &s.object)
    }

    pub fn into_object(self) -> Option<T> {
        self.snapshot.map(Snapshot::into_object)
    }

    /// True when the session succeeded because the resource is gone
    pub fn is_absent(&self) -> bool {
        self.snapshot.is_none()
    }
}

/// Fieldless classification of [`PollError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollErrorKind {
    Refresh,
    Failed,
    UnexpectedState,
    NotFound,
    Timeout,
    Cancelled,
}

/// Terminal failure of a polling session
///
/// Variants carrying a state also carry the last observed object so callers
/// can report what the resource looked like when polling stopped.
#[derive(Debug)]
pub enum PollError<T> {
    /// The probe itself failed and the error was not absorbed by the
    /// session's not-found policy
    Refresh(RefreshError),

    /// An explicit failure state was observed
    Failed { state: String, object: T },

    /// Strict sessions only: a state that is neither pending nor target
    UnexpectedState {
        state: String,
        object: T,
        expected: Vec<String>,
    },

    /// The resource was absent and the not-found policy does not allow it
    NotFound { checks: u32 },

    /// The time budget ran out before a target state was reached
    Timeout {
        last_state: Option<String>,
        last_object: Option<T>,
        expected: Vec<String>,
        timeout: Duration,
    },

    /// The session's cancellation token fired
    Cancelled {
        last_state: Option<String>,
        last_object: Option<T>,
    },
}

impl<T> PollError<T> {
    pub fn kind(&self) -> PollErrorKind {
        match self {
            Self::Refresh(_) => PollErrorKind::Refresh,
            Self::Failed { .. } => PollErrorKind::Failed,
            Self::UnexpectedState { .. } => PollErrorKind::UnexpectedState,
            Self::NotFound { .. } => PollErrorKind::NotFound,
            Self::Timeout { .. } => PollErrorKind::Timeout,
            Self::Cancelled { .. } => PollErrorKind::Cancelled,
        }
    }

    /// Last state observed before the session stopped, if any
    pub fn last_state(&self) -> Option<&str> {
        match self {
            Self::Failed { state, .. } | Self::UnexpectedState { state, .. } => Some(state),
            Self::Timeout { last_state, .. } | Self::Cancelled { last_state, .. } => {
                last_state.as_deref()
            }
            Self::Refresh(_) | Self::NotFound { .. } => None,
        }
    }

    pub fn last_object(&self) -> Option<&T> {
        match self {
            Self::Failed { object, .. } | Self::UnexpectedState { object, .. } => Some(object),
            Self::Timeout { last_object, .. } | Self::Cancelled { last_object, .. } => {
                last_object.as_ref()
            }
            Self::Refresh(_) | Self::NotFound { .. } => None,
        }
    }

    /// Last object observed before the session stopped, if any
    pub fn into_last_object(self) -> Option<T> {
        match self {
            Self::Failed { object, .. } | Self::UnexpectedState { object, .. } => Some(object),
            Self::Timeout { last_object, .. } | Self::Cancelled { last_object, .. } => last_object,
            Self::Refresh(_) | Self::NotFound { .. } => None,
        }
    }
}

impl<T> fmt::Display for PollError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Refresh(e) => write!(f, "refresh failed: {}", e),
            Self::Failed { state, .. } => write!(f, "resource reached failure state {:?}", state),
            Self::UnexpectedState {
                state, expected, ..
            } => write!(
                f,
                "unexpected state {:?}, wanted one of {:?}",
                state, expected
            ),
            Self::NotFound { checks } => {
                write!(f, "resource not found after {} consecutive checks", checks)
            }
            Self::Timeout {
                last_state,
                expected,
                timeout,
                ..
            } => {
                write!(
                    f,
                    "timeout after {} waiting for state to become {:?}",
                    format_duration(*timeout),
                    expected
                )?;
                match last_state {
                    Some(state) => write!(f, " (last state: {:?})", state),
                    None => write!(f, " (no state observed)"),
                }
            }
            Self::Cancelled { last_state, .. } => match last_state {
                Some(state) => write!(f, "polling cancelled (last state: {:?})", state),
                None => write!(f, "polling cancelled"),
            },
        }
    }
}

impl<T: fmt::Debug> std::error::Error for PollError<T> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Refresh(e) => Some(e),
            _ => None,
        }
    }
}

pub type PollResult<T> = Result<Outcome<T>, PollError<T>>;

const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Bookkeeping for one session; dropped when `wait` returns
struct Session<T> {
    started: Instant,
    deadline: Instant,
    polls: u32,
    successes: u32,
    not_found_checks: u32,
    last: Option<Snapshot<T>>,
}

impl<T> Session<T> {
    fn new(timeout: Duration) -> Self {
        let started = Instant::now();
        Self {
            started,
            // Budgets beyond what Instant can represent never expire
            deadline: started
                .checked_add(timeout)
                .unwrap_or_else(|| started + FAR_FUTURE),
            polls: 0,
            successes: 0,
            not_found_checks: 0,
            last: None,
        }
    }

    fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    fn cancelled(self) -> PollError<T> {
        let (last_state, last_object) = split_last(self.last);
        PollError::Cancelled {
            last_state,
            last_object,
        }
    }
}

fn split_last<T>(last: Option<Snapshot<T>>) -> (Option<String>, Option<T>) {
    match last {
        Some(s) => (Some(s.state), Some(s.object)),
        None => (None, None),
    }
}

/// What one probe means for the session
enum Step<T> {
    Continue,
    Done(PollResult<T>),
}

/// Convergence poller bound to one validated configuration
///
/// A `Poller` can be shared between tasks; every call to [`Poller::wait`] is
/// an independent session.
#[derive(Debug, Clone)]
pub struct Poller {
    config: PollConfig,
    cancel: Option<CancellationToken>,
}

impl Poller {
    /// Validate `config` and build a poller for it
    pub fn new(config: PollConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            cancel: None,
        })
    }

    /// Stop sessions early when `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn config(&self) -> &PollConfig {
        &self.config
    }

    /// Run one polling session against `refresh`
    pub async fn wait<R>(&self, mut refresh: R) -> PollResult<R::Object>
    where
        R: Refresh,
    {
        let config = &self.config;
        let mut session = Session::new(config.timeout);
        let mut intervals = config.intervals();
        let expected: Vec<String> = config.target.iter().cloned().collect();

        debug!(
            "Waiting for {:?} (timeout {}, delay {})",
            expected,
            format_duration(config.timeout),
            format_duration(config.initial_delay)
        );

        if !config.initial_delay.is_zero() && !self.sleep(config.initial_delay).await {
            return Err(session.cancelled());
        }

        loop {
            if self.is_cancelled() {
                return Err(session.cancelled());
            }
            let probe = match &self.cancel {
                Some(token) => tokio::select! {
                    biased;
                    _ = token.cancelled() => return Err(session.cancelled()),
                    result = refresh.refresh() => result,
                },
                None => refresh.refresh().await,
            };
            session.polls += 1;

            if let Step::Done(result) = self.observe(&mut session, probe, &expected) {
                return result;
            }

            if session.elapsed() >= config.timeout {
                info!(
                    "Timed out after {} polls waiting for {:?}",
                    session.polls, expected
                );
                let (last_state, last_object) = split_last(session.last);
                return Err(PollError::Timeout {
                    last_state,
                    last_object,
                    expected,
                    timeout: config.timeout,
                });
            }

            let interval = intervals
                .next()
                .unwrap_or(config.poll_interval)
                .min(session.remaining());
            if !self.sleep(interval).await {
                return Err(session.cancelled());
            }
        }
    }

    /// Classify one probe result
    fn observe<T>(
        &self,
        session: &mut Session<T>,
        probe: Result<Snapshot<T>, RefreshError>,
        expected: &[String],
    ) -> Step<T> {
        let config = &self.config;

        let snapshot = match probe {
            Ok(snapshot) => snapshot,
            Err(RefreshError::NotFound(message)) => {
                session.successes = 0;
                session.not_found_checks += 1;
                return self.not_found(session, message);
            }
            Err(e) => {
                debug!("Probe {} failed: {}", session.polls, e);
                return Step::Done(Err(PollError::Refresh(e)));
            }
        };
        session.not_found_checks = 0;

        let state = snapshot.state.clone();
        let changed = session.last.as_ref().map(|s| s.state.as_str()) != Some(state.as_str());
        debug!(
            "Poll {}: state {:?} after {}",
            session.polls,
            state,
            format_duration(session.elapsed())
        );
        if changed {
            info!("State is now {:?}", state);
        }

        if config.is_failure(&state) {
            return Step::Done(Err(PollError::Failed {
                state,
                object: snapshot.object,
            }));
        }

        if config.is_target(&state) {
            session.successes += 1;
            if session.successes >= config.continuous_success_count {
                info!(
                    "Reached {:?} after {} polls in {}",
                    state,
                    session.polls,
                    format_duration(session.elapsed())
                );
                return Step::Done(Ok(Outcome {
                    snapshot: Some(snapshot),
                    polls: session.polls,
                    elapsed: session.elapsed(),
                }));
            }
        } else {
            session.successes = 0;
            if !config.is_pending(&state) && config.unknown_states == UnknownStatePolicy::Error {
                return Step::Done(Err(PollError::UnexpectedState {
                    state,
                    object: snapshot.object,
                    expected: expected.to_vec(),
                }));
            }
        }

        session.last = Some(snapshot);
        Step::Continue
    }

    fn not_found<T>(&self, session: &Session<T>, message: String) -> Step<T> {
        let checks = session.not_found_checks;
        match self.config.not_found {
            NotFoundPolicy::Error => {
                Step::Done(Err(PollError::Refresh(RefreshError::NotFound(message))))
            }
            NotFoundPolicy::Succeed => {
                info!(
                    "Resource is gone after {} polls in {}",
                    session.polls,
                    format_duration(session.elapsed())
                );
                Step::Done(Ok(Outcome {
                    snapshot: None,
                    polls: session.polls,
                    elapsed: session.elapsed(),
                }))
            }
            NotFoundPolicy::Fail => Step::Done(Err(PollError::NotFound { checks })),
            NotFoundPolicy::Tolerate(limit) => {
                if checks > limit {
                    Step::Done(Err(PollError::NotFound { checks }))
                } else {
                    warn!("Resource not found ({}/{}): {}", checks, limit, message);
                    Step::Continue
                }
            }
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled)
    }

    /// Cancellable sleep; false when cancelled
    async fn sleep(&self, duration: Duration) -> bool {
        match &self.cancel {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => false,
                _ = tokio::time::sleep(duration) => true,
            },
            None => {
                tokio::time::sleep(duration).await;
                true
            }
        }
    }
}

/// Validate `config` and run a single session
pub async fn wait<R>(config: PollConfig, refresh: R) -> Result<PollResult<R::Object>, ConfigError>
where
    R: Refresh,
{
    let poller = Poller::new(config)?;
    Ok(poller.wait(refresh).await)
}
