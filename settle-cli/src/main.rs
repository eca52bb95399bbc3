mod report;
mod settings;
mod source;

use std::path::{Path, PathBuf};

use chrono::Utc;
use clap::{ArgAction, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use colored::Colorize;
use log::info;
use tokio_util::sync::CancellationToken;

use settle_core::duration::format_duration;
use settle_core::poller::Poller;
use settle_core::profile::builtin_profiles;

use report::Report;
use settings::{OutputFormat, WaitArgs, build_config, build_source, load_config_file};
use source::CountingSource;

#[derive(Parser)]
#[command(name = "settle")]
#[command(about = "Wait for a remote resource to reach a target state", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll a status file or command until it reports a target state
    Wait(Box<WaitArgs>),
    /// List built-in polling profiles
    Profiles {
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        output: OutputFormat,
    },
    /// Validate a JSON poll config file
    Check {
        /// Path to the config file
        file: PathBuf,
    },
    /// Print shell completions
    Completions {
        shell: Shell,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Commands::Wait(args) => run_wait(&args).await,
        Commands::Profiles { output } => run_profiles(output).map(|_| 0),
        Commands::Check { file } => run_check(&file).map(|_| 0),
        Commands::Completions { shell } => {
            run_completions(shell);
            Ok(0)
        }
    };

    match result {
        Ok(0) => {}
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e);
            std::process::exit(1);
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_millis()
        .target(env_logger::Target::Stderr)
        .init();
}

/// Returns the process exit code for the session outcome
async fn run_wait(args: &WaitArgs) -> Result<i32, String> {
    let config = build_config(args)?;
    let mut source = CountingSource::new(build_source(args)?);

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, stopping");
            on_signal.cancel();
        }
    });

    let poller = Poller::new(config)
        .map_err(|e| e.to_string())?
        .with_cancellation(cancel);

    let started_at = Utc::now();
    let result = poller.wait(&mut source).await;
    let finished_at = Utc::now();

    let report = Report::new(
        &result,
        args.resource.clone(),
        source.polls(),
        started_at,
        finished_at,
    );

    match args.output {
        OutputFormat::Json => println!("{}", report.to_json()?),
        OutputFormat::Text => println!("{}", report.render_text()),
    }

    Ok(report.exit_code())
}

fn run_profiles(output: OutputFormat) -> Result<(), String> {
    let profiles = builtin_profiles();

    if output == OutputFormat::Json {
        let json = serde_json::to_string_pretty(&profiles)
            .map_err(|e| format!("Failed to serialize profiles: {}", e))?;
        println!("{}", json);
        return Ok(());
    }

    for profile in &profiles {
        let config = &profile.config;
        println!("{}", profile.name.cyan().bold());
        println!("  {}", profile.description);
        println!(
            "  target: {}  pending: {}  failure: {}",
            join(&config.target).green(),
            join(&config.pending).yellow(),
            join(&config.failure).red()
        );
        println!(
            "  timeout: {}  interval: {}  successes: {}",
            format_duration(config.timeout),
            format_duration(config.poll_interval),
            config.continuous_success_count
        );
    }
    Ok(())
}

fn join<'a>(states: impl IntoIterator<Item = &'a String>) -> String {
    let states: Vec<&str> = states.into_iter().map(String::as_str).collect();
    if states.is_empty() {
        "-".to_string()
    } else {
        states.join(", ")
    }
}

fn run_check(file: &Path) -> Result<(), String> {
    let config = load_config_file(file)?;
    println!(
        "{} {} (target: {})",
        "✓".green(),
        file.display(),
        join(&config.target)
    );
    Ok(())
}

fn run_completions(shell: Shell) {
    let mut command = Cli::command();
    let name = command.get_name().to_string();
    clap_complete::generate(shell, &mut command, name, &mut std::io::stdout());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_wait_with_global_verbose() {
        let cli = Cli::try_parse_from([
            "settle", "wait", "--file", "status", "--target", "ready", "-vv",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Wait(args) => assert_eq!(args.target, vec!["ready".to_string()]),
            _ => panic!("expected wait"),
        }
    }

    #[test]
    fn join_states() {
        let states = ["a".to_string(), "b".to_string()];
        assert_eq!(join(&states), "a, b");
        assert_eq!(join(&[] as &[String]), "-");
    }
}
