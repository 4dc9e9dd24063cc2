//! Auto-battler pilot.
//!
//! Runs the perception → decision → execution loop over recorded captures
//! (`pilot replay`) with a dry-run input sink, and manages the TOML config
//! (`pilot init`, `pilot check`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::warn;

use pilot::core::rules::RuleEngine;
use pilot::cycle::Pilot;
use pilot::exit_codes;
use pilot::io::capture::ReplaySource;
use pilot::io::config::{ExternalConfig, PilotConfig, ProviderKind, load_config, write_config};
use pilot::io::cycle_log::CycleLog;
use pilot::io::input::LogSink;
use pilot::io::provider::{CommandProvider, HttpProvider, ReasoningProvider};
use pilot::logging;
use pilot::looping::{CancelToken, LoopConfig, cancel_on_interrupt, run_loop};

const DEFAULT_CONFIG: &str = "pilot.toml";

#[derive(Parser)]
#[command(name = "pilot", version, about = "Auto-battler perception and decision loop")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default config file if missing.
    Init {
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
        #[arg(long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,
    },
    /// Validate the config and print the active rule order.
    Check {
        #[arg(long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,
    },
    /// Run the control loop over a recorded capture fixture (dry-run input).
    ///
    /// Ctrl-C stops after the current cycle and still prints the summary.
    Replay {
        /// JSON fixture of recorded captures.
        #[arg(long)]
        fixture: PathBuf,
        #[arg(long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,
        /// Stop after this many cycles (overrides the config).
        #[arg(long)]
        max_cycles: Option<u64>,
        /// Sleep between cycles in milliseconds (overrides the config).
        #[arg(long)]
        interval_ms: Option<u64>,
        /// Append one JSON line per cycle here (overrides the config).
        #[arg(long)]
        cycle_log: Option<PathBuf>,
    },
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Init { force, config } => cmd_init(&config, force),
        Command::Check { config } => cmd_check(&config),
        Command::Replay {
            fixture,
            config,
            max_cycles,
            interval_ms,
            cycle_log,
        } => cmd_replay(&ReplayArgs {
            fixture,
            config,
            max_cycles,
            interval_ms,
            cycle_log,
        }),
    }
}

fn cmd_init(path: &Path, force: bool) -> Result<i32> {
    if path.exists() && !force {
        println!("{} already exists (use --force to overwrite)", path.display());
        return Ok(exit_codes::OK);
    }
    write_config(path, &PilotConfig::default())
        .with_context(|| format!("write {}", path.display()))?;
    println!("wrote {}", path.display());
    Ok(exit_codes::OK)
}

fn cmd_check(path: &Path) -> Result<i32> {
    let config = load_config(path)?;
    let rules = RuleEngine::new(config.economy.clone(), &config.disabled_rules);
    println!("config ok: {}", path.display());
    println!("rules: {}", rules.rule_names().join(" > "));
    println!(
        "external: {:?} (budget {}, timeout {}ms, retries {})",
        config.external.provider,
        config.external.session_budget,
        config.external.timeout_ms,
        config.external.max_retries
    );
    println!("heroes: {}", config.heroes.len());
    Ok(exit_codes::OK)
}

struct ReplayArgs {
    fixture: PathBuf,
    config: PathBuf,
    max_cycles: Option<u64>,
    interval_ms: Option<u64>,
    cycle_log: Option<PathBuf>,
}

fn cmd_replay(args: &ReplayArgs) -> Result<i32> {
    let config = load_config(&args.config)?;
    let mut source = ReplaySource::from_path(&args.fixture)?;
    let provider = build_provider(&config.external)?;
    let log_path = args
        .cycle_log
        .clone()
        .or_else(|| config.log.cycle_log.clone());
    let mut cycle_log = log_path.as_deref().map(CycleLog::create).transpose()?;

    let loop_config = LoopConfig {
        interval: args
            .interval_ms
            .map_or_else(|| config.cycle.interval(), Duration::from_millis),
        max_cycles: args.max_cycles.or(config.cycle.max_cycles),
        max_runtime: config.safety.max_runtime_secs.map(Duration::from_secs),
    };
    let cancel = CancelToken::new();
    if let Err(err) = cancel_on_interrupt(&cancel) {
        warn!(err = %format!("{err:#}"), "Ctrl-C will end the process without a summary");
    }
    let mut pilot = Pilot::new(config, provider, LogSink::new());
    let outcome = run_loop(
        &mut pilot,
        &mut source,
        &loop_config,
        &cancel,
        |report| {
            if let Some(log) = cycle_log.as_mut()
                && let Err(err) = log.append(report)
            {
                warn!(err = %format!("{err:#}"), "cycle log write failed");
            }
        },
    );

    let summary = serde_json::json!({
        "stop": outcome.stop.as_str(),
        "cycles": outcome.cycles,
        "stats": outcome.stats,
    });
    println!(
        "{}",
        serde_json::to_string_pretty(&summary).context("serialize summary")?
    );
    if pilot.ledger().is_exhausted() && pilot.ledger().budget() > 0 {
        return Ok(exit_codes::BUDGET_EXHAUSTED);
    }
    Ok(exit_codes::OK)
}

fn build_provider(config: &ExternalConfig) -> Result<Option<Box<dyn ReasoningProvider>>> {
    let provider: Box<dyn ReasoningProvider> = match config.provider {
        ProviderKind::None => return Ok(None),
        ProviderKind::Command => Box::new(CommandProvider::new(config.command.clone())),
        ProviderKind::Http => Box::new(HttpProvider::from_config(&config.http)?),
    };
    if config.session_budget == 0 {
        bail!("external.session_budget is 0 but a provider is configured");
    }
    Ok(Some(provider))
}
