//! fairsim CLI - FAIR cyber risk quantification for scenario files

#![deny(warnings)]

// Global invariants enforced:
// - Report output goes to stdout; progress and logs go to stderr
// - Identical scenario, config and seed yield byte-for-byte identical output

use anyhow::Context;
use clap::{Parser, Subcommand};
use fairsim_core::config::{self, ResolvedConfig};
use fairsim_core::{load_scenario, render_json, render_text, RiskAssessment};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "fairsim")]
#[command(about = "FAIR / FAIR-CAM cyber risk quantification by Monte Carlo simulation")]
#[command(version = env!("FAIRSIM_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Quantify inherent and residual risk for a scenario file
    Calculate {
        /// Path to scenario JSON file
        scenario: PathBuf,

        /// Monte Carlo trials per run (overrides config file)
        #[arg(long)]
        iterations: Option<usize>,

        /// RNG seed for reproducible results (overrides config file)
        #[arg(long)]
        seed: Option<u64>,

        /// Output format
        #[arg(long, default_value = "text")]
        format: OutputFormat,

        /// Path to config file (default: auto-discover)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Include per-trial detail in JSON output
        #[arg(long)]
        trials: bool,

        /// Hide the progress bar
        #[arg(long)]
        no_progress: bool,
    },
    /// Validate or inspect a configuration file
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Validate a config file without running a calculation
    Validate {
        /// Path to config file (default: auto-discover from current directory)
        #[arg(long)]
        path: Option<PathBuf>,
    },
    /// Show the resolved configuration (merged defaults + config file)
    Show {
        /// Path to config file (default: auto-discover from current directory)
        #[arg(long)]
        path: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("FAIRSIM_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Calculate {
            scenario,
            iterations,
            seed,
            format,
            config: config_path,
            trials,
            no_progress,
        } => {
            let working_dir = std::env::current_dir()?;
            let mut resolved = config::load_and_resolve(&working_dir, config_path.as_deref())
                .context("failed to load configuration")?;

            if let Some(config_path) = &resolved.config_path {
                eprintln!("Using config: {}", config_path.display());
            }

            // CLI flags override config file values
            if let Some(n) = iterations {
                if n == 0 {
                    anyhow::bail!("--iterations must be at least 1");
                }
                resolved.simulation.iterations = n;
            }
            if seed.is_some() {
                resolved.simulation.seed = seed;
            }
            if trials {
                resolved.simulation.keep_trials = true;
            }

            tracing::debug!(
                iterations = resolved.simulation.iterations,
                seed = ?resolved.simulation.seed,
                cache = resolved.cache_enabled,
                "resolved simulation settings"
            );

            let scenario = load_scenario(&scenario)?;
            let assessment = run_with_progress(&scenario, &resolved, !no_progress)?;

            match format {
                OutputFormat::Text => print!("{}", render_text(&assessment)),
                OutputFormat::Json => println!("{}", render_json(&assessment)),
            }
        }
        Commands::Config { action } => match action {
            ConfigAction::Validate { path } => {
                let working_dir = std::env::current_dir()?;
                match config::load_and_resolve(&working_dir, path.as_deref()) {
                    Ok(config) => {
                        if let Some(ref p) = config.config_path {
                            println!("Config valid: {}", p.display());
                        } else {
                            println!("No config file found. Using defaults.");
                        }
                    }
                    Err(e) => {
                        eprintln!("Config validation failed: {:#}", e);
                        std::process::exit(1);
                    }
                }
            }
            ConfigAction::Show { path } => {
                let working_dir = std::env::current_dir()?;
                let resolved = config::load_and_resolve(&working_dir, path.as_deref())
                    .context("failed to load configuration")?;
                print_config(&resolved);
            }
        },
    }

    Ok(())
}

fn run_with_progress(
    scenario: &fairsim_core::Scenario,
    resolved: &ResolvedConfig,
    show_progress: bool,
) -> anyhow::Result<RiskAssessment> {
    let engine = resolved.engine();
    let mut options = resolved.risk_options();

    // inherent and residual runs report into one bar
    let total = resolved.simulation.iterations.max(1) * 2;
    let bar = if show_progress {
        let bar = ProgressBar::new(total as u64);
        bar.set_style(
            ProgressStyle::with_template("{spinner} {msg} [{bar:40}] {pos}/{len} trials")
                .context("invalid progress template")?
                .progress_chars("=> "),
        );
        bar.set_message("simulating");
        bar
    } else {
        ProgressBar::hidden()
    };

    let shown = AtomicUsize::new(0);
    let report = |done: usize| {
        // batches finish out of order; never move the bar backwards
        if shown.fetch_max(done, Ordering::Relaxed) < done {
            bar.set_position(done as u64);
        }
    };
    options.progress = Some(&report);

    let result = scenario
        .assess(&engine, &options)
        .context("risk calculation failed");
    bar.finish_and_clear();
    result
}

fn print_config(resolved: &ResolvedConfig) {
    let sim = &resolved.simulation;

    println!("Configuration:");
    if let Some(ref p) = resolved.config_path {
        println!("  Source: {}", p.display());
    } else {
        println!("  Source: defaults (no config file found)");
    }
    println!();
    println!("Simulation:");
    println!("  iterations: {}", sim.iterations);
    println!(
        "  seed: {}",
        sim.seed
            .map(|v| v.to_string())
            .unwrap_or_else(|| "random".to_string())
    );
    println!("  batch_size: {}", sim.batch_size);
    println!("  keep_trials: {}", sim.keep_trials);
    println!();
    println!("Loss model:");
    println!("  hours_per_event: {}", sim.hours_per_event);
    println!(
        "  asset_loss_factors: {} / {} / {}",
        sim.asset_loss_factors.low, sim.asset_loss_factors.mid, sim.asset_loss_factors.high
    );
    println!("  asset_value_cap: {}", sim.asset_value_cap);
    println!("  tef_periods_per_year: {}", sim.tef_periods_per_year);
    println!();
    println!("Reliability:");
    match resolved.variance {
        Some(v) => {
            println!("  var_freq: {}", v.var_freq);
            println!("  var_duration: {}", v.var_duration);
        }
        None => println!("  none"),
    }
    println!();
    println!("Cache:");
    println!("  enabled: {}", resolved.cache_enabled);
    println!("  max_entries: {}", resolved.cache_max_entries);
}
