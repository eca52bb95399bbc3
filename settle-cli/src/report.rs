//! Report - Summary of one `settle wait` session

use chrono::{DateTime, Utc};
use colored::Colorize;
use serde::Serialize;
use settle_core::duration::format_duration;
use settle_core::poller::{PollErrorKind, PollResult};
use settle_core::resource::ResourceId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Converged,
    /// Failure state, unexpected state or disallowed not-found
    Failed,
    Timeout,
    Cancelled,
    /// The probe could not be run or its output could not be read
    Error,
}

impl Status {
    pub fn exit_code(self) -> i32 {
        match self {
            Status::Converged => 0,
            Status::Error => 1,
            Status::Failed => 2,
            Status::Timeout => 3,
            Status::Cancelled => 130,
        }
    }

    fn from_kind(kind: PollErrorKind) -> Self {
        match kind {
            PollErrorKind::Refresh => Status::Error,
            PollErrorKind::Failed | PollErrorKind::UnexpectedState | PollErrorKind::NotFound => {
                Status::Failed
            }
            PollErrorKind::Timeout => Status::Timeout,
            PollErrorKind::Cancelled => Status::Cancelled,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<ResourceId>,
    /// Last observed state; `None` when nothing was observed or absence was the goal
    pub state: Option<String>,
    /// Raw probe output behind `state`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    pub polls: u32,
    pub elapsed_ms: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Report {
    /// `polls` comes from the caller because failed sessions do not carry a count
    pub fn new(
        result: &PollResult<String>,
        resource: Option<ResourceId>,
        polls: u32,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    ) -> Self {
        let (status, state, output, message) = match result {
            Ok(outcome) => (
                Status::Converged,
                outcome.state().map(str::to_string),
                outcome.object().cloned(),
                outcome
                    .is_absent()
                    .then(|| "resource is gone".to_string()),
            ),
            Err(e) => (
                Status::from_kind(e.kind()),
                e.last_state().map(str::to_string),
                e.last_object().cloned(),
                Some(e.to_string()),
            ),
        };

        let message = match (&resource, message) {
            (Some(id), Some(message)) => Some(format!("[{}] {}", id, message)),
            (_, message) => message,
        };

        let elapsed_ms = (finished_at - started_at).num_milliseconds().max(0) as u64;

        Self {
            status,
            resource,
            state,
            output,
            polls,
            elapsed_ms,
            started_at,
            finished_at,
            message,
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.status.exit_code()
    }

    pub fn to_json(&self) -> Result<String, String> {
        serde_json::to_string_pretty(self).map_err(|e| format!("Failed to serialize report: {}", e))
    }

    /// Human-readable summary for the terminal
    pub fn render_text(&self) -> String {
        let headline = match self.status {
            Status::Converged => "✓ Converged".green().bold(),
            Status::Failed => "✗ Failed".red().bold(),
            Status::Timeout => "⏱ Timed out".yellow().bold(),
            Status::Cancelled => "⊘ Cancelled".yellow().bold(),
            Status::Error => "✗ Error".red().bold(),
        };

        let mut line = headline.to_string();
        if let Some(resource) = &self.resource {
            line.push_str(&format!(" {}", resource.to_string().cyan().bold()));
        }
        if let Some(state) = &self.state {
            line.push_str(&format!(" state={}", state.bold()));
        }

        let elapsed = format_duration(std::time::Duration::from_millis(self.elapsed_ms));
        let noun = if self.polls == 1 { "poll" } else { "polls" };
        line.push_str(&format!(" ({} {}, {})", self.polls, noun, elapsed));

        if self.status != Status::Converged
            && let Some(message) = &self.message
        {
            line.push_str(&format!("\n  {}", message));
        }
        line
    }
}
