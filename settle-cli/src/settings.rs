//! Settings - Build a poll config and a status source from CLI flags
//!
//! Layers, later wins: built-in profile, JSON config file, flags.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Args, ValueEnum};
use serde_json::Value as JsonValue;
use settle_core::backoff::Backoff;
use settle_core::config::{NotFoundPolicy, PollConfig, UnknownStatePolicy};
use settle_core::duration::parse_duration;
use settle_core::profile::find_profile;
use settle_core::refresh::Refresh;
use settle_core::resource::ResourceId;

use crate::source::{CommandSource, FileSource, StateExtractor};

/// Upper bound for `--backoff` when `--max-interval` is not given
const DEFAULT_MAX_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Args)]
pub struct WaitArgs {
    /// Start from a built-in profile (see `settle profiles`)
    #[arg(long)]
    pub profile: Option<String>,

    /// JSON poll config file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// State meaning "still in progress" (repeatable)
    #[arg(long = "pending", value_name = "STATE")]
    pub pending: Vec<String>,

    /// State meaning success (repeatable)
    #[arg(long = "target", value_name = "STATE")]
    pub target: Vec<String>,

    /// State meaning unrecoverable failure (repeatable)
    #[arg(long = "failure", value_name = "STATE")]
    pub failure: Vec<String>,

    /// Total time budget (e.g. 30m)
    #[arg(long, value_parser = parse_duration)]
    pub timeout: Option<Duration>,

    /// Wait before the first poll
    #[arg(long, value_parser = parse_duration)]
    pub delay: Option<Duration>,

    /// Wait between polls
    #[arg(long, value_parser = parse_duration)]
    pub interval: Option<Duration>,

    /// Floor for the wait between polls
    #[arg(long, value_parser = parse_duration)]
    pub min_interval: Option<Duration>,

    /// Multiply the wait by this factor after every poll
    #[arg(long, value_name = "MULTIPLIER")]
    pub backoff: Option<f64>,

    /// Cap for the grown wait
    #[arg(long, value_parser = parse_duration, requires = "backoff")]
    pub max_interval: Option<Duration>,

    /// Consecutive target observations required
    #[arg(long)]
    pub successes: Option<u32>,

    /// Meaning of "not found": error, succeed, fail or tolerate:N
    #[arg(long, value_parser = parse_not_found)]
    pub not_found: Option<NotFoundPolicy>,

    /// Stop on states that are neither pending nor target
    #[arg(long)]
    pub strict: bool,

    /// Resource being waited on, as TYPE.NAME (used in messages)
    #[arg(long)]
    pub resource: Option<ResourceId>,

    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub output: OutputFormat,

    /// Status file to poll
    #[arg(long, conflicts_with = "command", required_unless_present = "command")]
    pub file: Option<PathBuf>,

    /// Shell command to poll
    #[arg(long)]
    pub command: Option<String>,

    /// Regex selecting the state from the output (group 1 or whole match)
    #[arg(long)]
    pub extract: Option<String>,

    /// Per-probe limit for --command
    #[arg(long, value_parser = parse_duration, default_value = "30s")]
    pub probe_timeout: Duration,

    /// Exit code of --command that means "not found"
    #[arg(long, requires = "command")]
    pub not_found_exit_code: Option<i32>,
}

/// Parse `error`, `succeed`, `fail` or `tolerate:N`
pub fn parse_not_found(s: &str) -> Result<NotFoundPolicy, String> {
    match s {
        "error" => Ok(NotFoundPolicy::Error),
        "succeed" => Ok(NotFoundPolicy::Succeed),
        "fail" => Ok(NotFoundPolicy::Fail),
        other => match other.strip_prefix("tolerate:") {
            Some(n) => n
                .parse()
                .map(NotFoundPolicy::Tolerate)
                .map_err(|_| format!("invalid tolerate count {:?}", n)),
            None => Err(format!(
                "unknown policy {:?} (expected error, succeed, fail or tolerate:N)",
                other
            )),
        },
    }
}

/// Read a JSON config file as a raw object
fn read_config_object(path: &Path) -> Result<serde_json::Map<String, JsonValue>, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
    match serde_json::from_str(&content) {
        Ok(JsonValue::Object(map)) => Ok(map),
        Ok(_) => Err(format!("{}: expected a JSON object", path.display())),
        Err(e) => Err(format!("Failed to parse {}: {}", path.display(), e)),
    }
}

/// Load and validate a standalone config file
pub fn load_config_file(path: &Path) -> Result<PollConfig, String> {
    let object = read_config_object(path)?;
    let config: PollConfig = serde_json::from_value(JsonValue::Object(object))
        .map_err(|e| format!("Invalid config {}: {}", path.display(), e))?;
    config
        .validate()
        .map_err(|e| format!("Invalid config {}: {}", path.display(), e))?;
    Ok(config)
}

/// Merge profile, config file and flags into one validated config
pub fn build_config(args: &WaitArgs) -> Result<PollConfig, String> {
    let mut config = match &args.profile {
        Some(name) => {
            find_profile(name)
                .ok_or_else(|| format!("Unknown profile {:?} (see `settle profiles`)", name))?
                .config
        }
        None => PollConfig::default(),
    };

    if let Some(path) = &args.config {
        // Keys present in the file replace the profile's values
        let mut merged = match serde_json::to_value(&config) {
            Ok(JsonValue::Object(map)) => map,
            _ => return Err("Failed to serialize base config".to_string()),
        };
        merged.extend(read_config_object(path)?);
        config = serde_json::from_value(JsonValue::Object(merged))
            .map_err(|e| format!("Invalid config {}: {}", path.display(), e))?;
    }

    if !args.pending.is_empty() {
        config.pending = args.pending.iter().cloned().collect();
    }
    if !args.target.is_empty() {
        config.target = args.target.iter().cloned().collect();
    }
    if !args.failure.is_empty() {
        config.failure = args.failure.iter().cloned().collect();
    }
    if let Some(timeout) = args.timeout {
        config.timeout = timeout;
    }
    if let Some(delay) = args.delay {
        config.initial_delay = delay;
    }
    if let Some(interval) = args.interval {
        config.poll_interval = interval;
    }
    if let Some(min_interval) = args.min_interval {
        config.min_poll_interval = min_interval;
    }
    if let Some(multiplier) = args.backoff {
        let max_interval = args
            .max_interval
            .unwrap_or_else(|| DEFAULT_MAX_INTERVAL.max(config.poll_interval));
        config.backoff = Some(Backoff::new(multiplier, max_interval));
    }
    if let Some(successes) = args.successes {
        config.continuous_success_count = successes;
    }
    if let Some(policy) = args.not_found {
        config.not_found = policy;
    }
    if args.strict {
        config.unknown_states = UnknownStatePolicy::Error;
    }

    config.validate().map_err(|e| e.to_string())?;
    Ok(config)
}

/// The status source selected by --file or --command
pub fn build_source(args: &WaitArgs) -> Result<Box<dyn Refresh<Object = String>>, String> {
    let extractor = StateExtractor::new(args.extract.as_deref())?;

    match (&args.file, &args.command) {
        (Some(path), None) => Ok(Box::new(FileSource::new(path, extractor))),
        (None, Some(command)) => Ok(Box::new(
            CommandSource::new(command, extractor)
                .with_probe_timeout(args.probe_timeout)
                .with_not_found_exit_code(args.not_found_exit_code),
        )),
        _ => Err("Exactly one of --file or --command is required".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use tempfile::tempdir;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        wait: WaitArgs,
    }

    fn parse(args: &[&str]) -> WaitArgs {
        let argv = std::iter::once("settle").chain(args.iter().copied());
        TestCli::try_parse_from(argv).unwrap().wait
    }

    #[test]
    fn flags_only() {
        let args = parse(&[
            "--file", "status", "--pending", "provisioning", "--target", "active",
            "--failure", "failed", "--timeout", "30s", "--interval", "10s",
        ]);
        let config = build_config(&args).unwrap();
        assert!(config.is_pending("provisioning"));
        assert!(config.is_target("active"));
        assert!(config.is_failure("failed"));
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.poll_interval, Duration::from_secs(10));
    }

    #[test]
    fn missing_target_is_rejected() {
        let args = parse(&["--file", "status", "--pending", "provisioning"]);
        let err = build_config(&args).unwrap_err();
        assert_eq!(err, "at least one target state is required");
    }

    #[test]
    fn profile_then_flags() {
        let args = parse(&[
            "--file", "status", "--profile", "cluster-available", "--timeout", "2h",
            "--successes", "3", "--strict",
        ]);
        let config = build_config(&args).unwrap();
        assert!(config.is_target("normal"));
        assert!(config.is_pending("provisioning"));
        assert_eq!(config.timeout, Duration::from_secs(7200));
        assert_eq!(config.continuous_success_count, 3);
        assert_eq!(config.unknown_states, UnknownStatePolicy::Error);
    }

    #[test]
    fn unknown_profile() {
        let args = parse(&["--file", "status", "--profile", "nope"]);
        assert!(build_config(&args).unwrap_err().contains("Unknown profile"));
    }

    #[test]
    fn config_file_overrides_profile_fields_it_names() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("poll.json");
        std::fs::write(&path, r#"{"timeout": "5m", "failure": ["error"]}"#).unwrap();

        let path_arg = path.to_str().unwrap();
        let args = parse(&[
            "--file", "status", "--profile", "volume-attached", "--config", path_arg,
        ]);
        let config = build_config(&args).unwrap();
        assert_eq!(config.timeout, Duration::from_secs(300));
        assert!(config.is_failure("error"));
        assert!(!config.is_failure("failed"));
        assert!(config.is_target("attached"));
    }

    #[test]
    fn backoff_defaults_max_interval() {
        let args = parse(&["--file", "s", "--target", "ok", "--backoff", "2"]);
        let config = build_config(&args).unwrap();
        assert_eq!(
            config.backoff,
            Some(Backoff::new(2.0, DEFAULT_MAX_INTERVAL))
        );

        let args = parse(&[
            "--file", "s", "--target", "ok", "--backoff", "1.5", "--max-interval", "20s",
        ]);
        let config = build_config(&args).unwrap();
        assert_eq!(
            config.backoff,
            Some(Backoff::new(1.5, Duration::from_secs(20)))
        );
    }

    #[test]
    fn not_found_policies() {
        assert_eq!(parse_not_found("error"), Ok(NotFoundPolicy::Error));
        assert_eq!(parse_not_found("succeed"), Ok(NotFoundPolicy::Succeed));
        assert_eq!(parse_not_found("fail"), Ok(NotFoundPolicy::Fail));
        assert_eq!(parse_not_found("tolerate:20"), Ok(NotFoundPolicy::Tolerate(20)));
        assert!(parse_not_found("tolerate:x").is_err());
        assert!(parse_not_found("ignore").is_err());

        let args = parse(&["--file", "s", "--target", "deleted", "--not-found", "succeed"]);
        assert_eq!(build_config(&args).unwrap().not_found, NotFoundPolicy::Succeed);
    }

    #[test]
    fn source_flags_are_exclusive_and_required() {
        let argv = ["settle", "--target", "ok"];
        assert!(TestCli::try_parse_from(argv).is_err());

        let argv = ["settle", "--target", "ok", "--file", "a", "--command", "true"];
        assert!(TestCli::try_parse_from(argv).is_err());

        let argv = ["settle", "--target", "ok", "--file", "a", "--not-found-exit-code", "3"];
        assert!(TestCli::try_parse_from(argv).is_err());
    }

    #[test]
    fn bad_duration_flag() {
        let argv = ["settle", "--file", "a", "--target", "ok", "--timeout", "soon"];
        assert!(TestCli::try_parse_from(argv).is_err());
    }

    #[test]
    fn load_config_file_validates() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, r#"{"target": ["a"], "pending": ["a"]}"#).unwrap();
        let err = load_config_file(&path).unwrap_err();
        assert!(err.contains("both target and pending"));

        let path = dir.path().join("list.json");
        std::fs::write(&path, "[1, 2]").unwrap();
        assert!(load_config_file(&path).unwrap_err().contains("expected a JSON object"));

        let path = dir.path().join("good.json");
        std::fs::write(&path, r#"{"target": ["active"], "poll_interval": 2}"#).unwrap();
        let config = load_config_file(&path).unwrap();
        assert_eq!(config.poll_interval, Duration::from_secs(2));
    }

    #[test]
    fn build_source_picks_file() {
        let args = parse(&["--file", "status", "--target", "ok"]);
        assert!(build_source(&args).is_ok());

        let args = parse(&["--command", "true", "--target", "ok", "--extract", "("]);
        assert!(build_source(&args).is_err());
    }
}
