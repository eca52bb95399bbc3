//! Settle Core
//!
//! Convergence poller for asynchronous cloud operations: repeatedly probe a
//! remote resource until its state reaches a target, hits a failure state, or
//! the time budget runs out.
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use settle_core::config::PollConfig;
//! use settle_core::poller::Poller;
//! use settle_core::refresh::{refresh_fn, Snapshot};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = PollConfig::new(["active"])
//!     .with_pending(["provisioning"])
//!     .with_failure(["failed"])
//!     .with_timeout(Duration::from_secs(30 * 60))
//!     .with_poll_interval(Duration::from_secs(10));
//!
//! let poller = Poller::new(config)?;
//! let outcome = poller
//!     .wait(refresh_fn(|| async { Ok(Snapshot::new((), "active")) }))
//!     .await?;
//! println!("converged after {} polls", outcome.polls);
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod config;
pub mod duration;
pub mod locks;
pub mod poller;
pub mod profile;
pub mod refresh;
pub mod resource;

// Re-export main types for convenience
pub use config::{ConfigError, NotFoundPolicy, PollConfig, UnknownStatePolicy};
pub use locks::{ResourceGuard, ResourceLocks};
pub use poller::{Outcome, PollError, PollErrorKind, PollResult, Poller};
pub use refresh::{Refresh, RefreshError, Snapshot, refresh_fn};
pub use resource::ResourceId;
