//! hopshell CLI
//!
//! Runs shell commands on a host reached through a chain of SSH hops

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use hopshell_exec::{BatchFailure, ChainExecutor, CommandResult};
use tracing_subscriber::EnvFilter;

mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "hopshell", version)]
#[command(about = "Run commands through a chain of SSH hops", long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run commands on the last hop
    #[command(name = "run")]
    Run {
        /// Per-hop and per-command timeout in seconds
        #[arg(short, long, value_parser = clap::value_parser!(u64).range(1..))]
        timeout: Option<u64>,

        /// Print results as JSON
        #[arg(long)]
        json: bool,

        /// Commands to run, defaults to the configured list
        commands: Vec<String>,
    },
    /// List the configured hops
    #[command(name = "hops")]
    Hops,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    color_eyre::install()?;

    let cli = Cli::parse();

    // Logs go to stderr so stdout stays clean for results
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = Config::locate(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            timeout,
            json,
            commands,
        } => {
            let commands = if commands.is_empty() {
                config.commands.clone()
            } else {
                commands
            };
            let timeout = timeout.map_or_else(|| config.timeout(), Duration::from_secs);

            let executor = ChainExecutor::ssh().with_timeout(timeout);
            let outcome = executor.run(&config.hop, &commands).await;

            if json {
                print_json(&outcome)?;
            } else {
                print_text(&outcome);
            }

            Ok(ExitCode::from(exit_status(&outcome)))
        }
        Commands::Hops => {
            for (index, hop) in config.hop.iter().enumerate() {
                println!("{index}: {hop}");
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn print_text(outcome: &std::result::Result<Vec<CommandResult>, BatchFailure>) {
    let results = match outcome {
        Ok(results) => results,
        Err(failure) => &failure.completed,
    };

    for result in results {
        println!("$ {}", result.command);
        print!("{}", result.stdout);
        if !result.stderr.is_empty() {
            eprint!("{}", result.stderr);
        }
        if !result.success() {
            println!("[exit {}]", result.exit_code);
        }
    }

    if let Err(failure) = outcome {
        eprintln!("error: {}", failure.error);
    }
}

fn print_json(outcome: &std::result::Result<Vec<CommandResult>, BatchFailure>) -> Result<()> {
    let value = match outcome {
        Ok(results) => serde_json::json!({ "results": results }),
        Err(failure) => serde_json::json!({
            "results": failure.completed,
            "error": failure.error,
        }),
    };
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

/// 1 on a classified failure, otherwise the last non-zero command exit code
fn exit_status(outcome: &std::result::Result<Vec<CommandResult>, BatchFailure>) -> u8 {
    match outcome {
        Err(_) => 1,
        Ok(results) => results
            .iter()
            .rev()
            .find(|r| !r.success())
            .map_or(0, |r| u8::try_from(r.exit_code).unwrap_or(1)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(command: &str, exit_code: i32) -> CommandResult {
        CommandResult {
            command: command.to_string(),
            stdout: String::new(),
            stderr: String::new(),
            exit_code,
        }
    }

    #[test]
    fn test_cli_parses_run() {
        let cli = Cli::parse_from(["hopshell", "run", "--timeout", "5", "uptime", "df -h"]);

        match cli.command {
            Commands::Run {
                timeout, commands, ..
            } => {
                assert_eq!(timeout, Some(5));
                assert_eq!(commands, vec!["uptime", "df -h"]);
            }
            Commands::Hops => panic!("expected run"),
        }
    }

    #[test]
    fn test_cli_rejects_zero_timeout() {
        let result = Cli::try_parse_from(["hopshell", "run", "--timeout", "0", "uptime"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_exit_code_uses_last_failure() {
        let outcome = Ok(vec![result("a", 0), result("b", 3), result("c", 0)]);
        assert_eq!(exit_status(&outcome), 3);

        let outcome = Ok(vec![result("a", 0)]);
        assert_eq!(exit_status(&outcome), 0);
    }

    #[test]
    fn test_exit_code_on_failure() {
        let outcome = Err(BatchFailure::from(hopshell_exec::SshError::validation(
            "at least one hop is required",
        )));
        assert_eq!(exit_status(&outcome), 1);
    }
}
