// debugwire harness - scripted debuggee/driver sessions
//
// Runs the instrumented demo programs behind an agent, drives them over the
// wire, and exits 0 when every scenario passes

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use debugwire::WireConfig;
use std::path::{Path, PathBuf};
use std::process::{ExitCode, Stdio};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{error, info, warn};

mod catalog;
mod debuggee;
mod scenarios;

use catalog::Scenario;

#[derive(Parser)]
#[command(name = "debugwire-harness", version, about = "Scripted debuggee/driver sessions")]
struct Cli {
    /// JSON config file; missing keys keep their defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a demo program behind an agent and wait for one driver
    Debuggee {
        #[arg(long, default_value = "127.0.0.1:0")]
        listen: String,
        #[arg(long, value_enum)]
        program: Scenario,
    },
    /// Drive a running debuggee through a scenario
    Drive {
        #[arg(long)]
        connect: String,
        #[arg(long, value_enum)]
        scenario: Scenario,
    },
    /// Launch a debuggee child process per scenario and drive it
    Run {
        /// Run a single scenario instead of all of them
        #[arg(long, value_enum)]
        scenario: Option<Scenario>,
    },
    /// Describe the available scenarios
    List {
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Tracing to stderr only - stdout carries the debuggee's address line
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debugwire=info,debugwire_harness=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    let passed = match cli.command {
        Commands::Debuggee { listen, program } => {
            debuggee::serve(&listen, program, config).await?;
            true
        }
        Commands::Drive { connect, scenario } => {
            scenarios::run_scenario(&connect, scenario, config).await?
        }
        Commands::Run { scenario } => {
            let selected = match scenario {
                Some(scenario) => vec![scenario],
                None => Scenario::ALL.to_vec(),
            };
            run_all(&selected, cli.config.as_deref(), config).await?
        }
        Commands::List { json } => {
            list(json)?;
            true
        }
    };

    Ok(if passed { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

fn load_config(path: Option<&Path>) -> Result<WireConfig> {
    let config = match path {
        Some(path) => WireConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => WireConfig::default(),
    }
    .with_env_overrides();

    config.validate()?;
    Ok(config)
}

fn list(json: bool) -> Result<()> {
    let scenarios = catalog::get_scenarios();
    if json {
        println!("{}", serde_json::to_string_pretty(&scenarios)?);
        return Ok(());
    }
    for scenario in scenarios {
        println!("{:<16} {}", scenario.name, scenario.description);
        for check in scenario.checks {
            println!("{:<16}   - {}", "", check);
        }
    }
    Ok(())
}

async fn run_all(selected: &[Scenario], config_path: Option<&Path>, config: WireConfig) -> Result<bool> {
    let mut failed = Vec::new();
    for scenario in selected {
        match run_one(*scenario, config_path, &config).await {
            Ok(true) => info!("PASSED {}", scenario),
            Ok(false) => failed.push(scenario.to_string()),
            Err(e) => {
                error!("Scenario {} could not run: {:#}", scenario, e);
                failed.push(scenario.to_string());
            }
        }
    }

    if failed.is_empty() {
        info!("All {} scenario(s) passed", selected.len());
        Ok(true)
    } else {
        error!("FAILED: {}", failed.join(", "));
        Ok(false)
    }
}

/// Spawn this binary as the debuggee, drive it, and check how it exited
async fn run_one(scenario: Scenario, config_path: Option<&Path>, config: &WireConfig) -> Result<bool> {
    let exe = std::env::current_exe().context("Cannot locate harness binary")?;
    let mut command = Command::new(exe);
    if let Some(path) = config_path {
        command.arg("--config").arg(path);
    }
    command
        .arg("debuggee")
        .arg("--program")
        .arg(scenario.name())
        .stdout(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command.spawn().context("Failed to spawn debuggee")?;
    let stdout = child.stdout.take().context("Debuggee stdout not captured")?;
    let mut lines = BufReader::new(stdout).lines();

    let announce = tokio::time::timeout(config.wait_time(), lines.next_line())
        .await
        .context("Timed out waiting for the debuggee address")??
        .context("Debuggee exited before announcing its address")?;
    let addr = parse_listening(&announce)
        .with_context(|| format!("Unexpected debuggee output: {}", announce))?;

    let passed = scenarios::run_scenario(addr, scenario, config.clone()).await?;

    let status = match tokio::time::timeout(config.wait_time(), child.wait()).await {
        Ok(status) => status?,
        Err(_) => {
            warn!("Debuggee for {} did not exit; killing it", scenario);
            child.kill().await?;
            return Ok(false);
        }
    };
    if !status.success() {
        warn!("Debuggee for {} exited with {}", scenario, status);
    }

    Ok(passed && status.success())
}

fn parse_listening(line: &str) -> Option<&str> {
    line.strip_prefix(debuggee::LISTENING_PREFIX)
        .map(str::trim)
        .filter(|addr| !addr.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_listening() {
        assert_eq!(parse_listening("listening on 127.0.0.1:4555"), Some("127.0.0.1:4555"));
        assert_eq!(parse_listening("listening on "), None);
        assert_eq!(parse_listening("hello"), None);
    }

    #[test]
    fn test_load_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"poll_interval_ms": 5, "resume_timeout_ms": 2000}}"#).unwrap();

        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config.poll_interval_ms, 5);
        assert_eq!(config.resume_timeout_ms, 2000);
        assert_eq!(config.poll_attempts, WireConfig::default().poll_attempts);
    }

    #[test]
    fn test_load_config_rejects_bad_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(load_config(Some(file.path())).is_err());

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"poll_attempts": 0}}"#).unwrap();
        assert!(load_config(Some(file.path())).is_err());
    }

    #[test]
    fn test_cli_parses_subcommands() {
        let cli = Cli::try_parse_from([
            "debugwire-harness",
            "debuggee",
            "--program",
            "usage-threshold",
        ])
        .unwrap();
        match cli.command {
            Commands::Debuggee { listen, program } => {
                assert_eq!(listen, "127.0.0.1:0");
                assert_eq!(program, Scenario::UsageThreshold);
            }
            _ => panic!("expected debuggee"),
        }

        let cli = Cli::try_parse_from(["debugwire-harness", "run", "--config", "c.json"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("c.json")));
        assert!(matches!(cli.command, Commands::Run { scenario: None }));
    }
}
