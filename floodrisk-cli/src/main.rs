//! floodrisk CLI - per-period flood-risk scoring of sub-district units

// Global invariants enforced:
// - Deterministic output ordering
// - Identical input yields byte-for-byte identical output
// - Logs and progress go to stderr; stdout carries only the report

use anyhow::Context;
use clap::{ArgAction, Parser, Subcommand};
use floodrisk_core::config::{self, ResolvedConfig};
use floodrisk_core::report::{render_explain, render_failures, render_quality_json, render_quality_text};
use floodrisk_core::{io, pipeline, render_json, render_text};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

const PROGRESS_TEMPLATE: &str = "{spinner} {msg} {pos}/{len} periods ({percent}%) - {eta}";

#[derive(Parser)]
#[command(name = "floodrisk")]
#[command(about = "Flood-risk scoring of sub-district units per reporting period")]
#[command(version = env!("FLOODRISK_VERSION"))]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace); RUST_LOG takes precedence
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Score an input table and rank objects within each period
    Score {
        /// Input CSV with one row per (object_id, timeperiod)
        input: PathBuf,

        /// CSV mapping object_id to district
        #[arg(long)]
        districts: Option<PathBuf>,

        /// Path to config file (default: auto-discover)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Directory for the output CSV tables
        #[arg(long)]
        out_dir: Option<PathBuf>,

        /// Output format (default: csv with --out-dir, text otherwise)
        #[arg(long)]
        format: Option<OutputFormat>,

        /// Show only top N objects per period (overrides config file)
        #[arg(long)]
        top: Option<usize>,

        /// Exit successfully even if some periods failed to score
        #[arg(long)]
        allow_partial: bool,

        /// Show class distributions and their checks
        #[arg(long)]
        explain: bool,
    },
    /// Check an input table for data problems without scoring it
    Check {
        /// Input CSV with one row per (object_id, timeperiod)
        input: PathBuf,

        /// Path to config file (default: auto-discover)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Flag periods with fewer members than this (overrides config file)
        #[arg(long)]
        min_members: Option<usize>,

        /// Output format
        #[arg(long, default_value = "text")]
        format: CheckFormat,
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
    /// Validate a config file without scoring
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

#[derive(Clone, Copy, PartialEq, clap::ValueEnum)]
enum OutputFormat {
    Text,
    Json,
    Csv,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum CheckFormat {
    Text,
    Json,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("floodrisk={level},floodrisk_core={level}")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(config_path: Option<&Path>) -> anyhow::Result<ResolvedConfig> {
    let project_root = std::env::current_dir()?;
    let resolved = config::load_and_resolve(&project_root, config_path)
        .context("failed to load configuration")?;
    if let Some(path) = &resolved.config_path {
        tracing::info!("using config: {}", path.display());
    }
    Ok(resolved)
}

fn progress_bar(periods: usize) -> ProgressBar {
    if !std::io::stderr().is_terminal() {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(periods as u64);
    if let Ok(style) = ProgressStyle::with_template(PROGRESS_TEMPLATE) {
        bar.set_style(style);
    }
    bar.set_message("Scoring");
    bar
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Score {
            input,
            districts,
            config: config_path,
            out_dir,
            format,
            top,
            allow_partial,
            explain,
        } => {
            if !input.exists() {
                anyhow::bail!("Input does not exist: {}", input.display());
            }
            let format = match (format, &out_dir) {
                (Some(f), _) => f,
                (None, Some(_)) => OutputFormat::Csv,
                (None, None) => OutputFormat::Text,
            };
            if format == OutputFormat::Csv && out_dir.is_none() {
                anyhow::bail!("--format csv requires --out-dir");
            }

            let resolved = load_config(config_path.as_deref())?;
            let effective_top = top.or(resolved.top_n);

            let dataset = io::load_dataset(&input)?;
            let lookup = districts
                .as_deref()
                .map(io::load_district_lookup)
                .transpose()?;

            let bar = progress_bar(dataset.cohorts().len());
            let output = pipeline::run(&dataset, lookup.as_ref(), &resolved, &|| bar.inc(1))
                .with_context(|| format!("failed to score {}", input.display()))?;
            bar.finish_and_clear();

            if let Some(dir) = &out_dir {
                let written = io::write_outputs(dir, &output, &resolved)?;
                for path in &written {
                    tracing::info!("wrote {}", path.display());
                }
                if format == OutputFormat::Csv {
                    for path in &written {
                        println!("{}", path.display());
                    }
                }
            }

            match format {
                OutputFormat::Text => print!("{}", render_text(&output, effective_top)),
                OutputFormat::Json => println!("{}", render_json(&output)),
                OutputFormat::Csv => {}
            }

            if explain {
                eprint!("{}", render_explain(&output.distributions));
            }

            if output.has_failures() && !allow_partial {
                eprint!("{}", render_failures(&output.failures));
                eprintln!("Scoring incomplete; rerun with --allow-partial to accept partial output");
                std::process::exit(1);
            }
        }
        Commands::Check {
            input,
            config: config_path,
            min_members,
            format,
        } => {
            if !input.exists() {
                anyhow::bail!("Input does not exist: {}", input.display());
            }
            let mut resolved = load_config(config_path.as_deref())?;
            if let Some(n) = min_members {
                resolved.check_min_members = n;
            }
            let report = floodrisk_core::check_file(&input, &resolved)?;
            match format {
                CheckFormat::Text => print!("{}", render_quality_text(&report)),
                CheckFormat::Json => println!("{}", render_quality_json(&report)),
            }
            if !report.is_clean() {
                std::process::exit(1);
            }
        }
        Commands::Config { action } => match action {
            ConfigAction::Validate { path } => {
                let project_root = std::env::current_dir()?;
                match config::load_and_resolve(&project_root, path.as_deref()) {
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
                let project_root = std::env::current_dir()?;
                let resolved = config::load_and_resolve(&project_root, path.as_deref())
                    .context("failed to load configuration")?;
                print!("{}", render_config(&resolved));
            }
        },
    }

    Ok(())
}

fn list(items: &[String]) -> String {
    if items.is_empty() {
        "none".to_string()
    } else {
        items.join(", ")
    }
}

fn render_config(resolved: &ResolvedConfig) -> String {
    let mut text = String::from("Configuration:\n");
    match &resolved.config_path {
        Some(p) => text.push_str(&format!("  Source: {}\n", p.display())),
        None => text.push_str("  Source: defaults (no config file found)\n"),
    }

    text.push_str("\nFactors:\n");
    for spec in &resolved.factors {
        text.push_str(&format!("  {}:\n", spec.factor));
        text.push_str(&format!("    inputs: {}\n", list(&spec.inputs)));
        text.push_str(&format!("    combine: {}\n", spec.combine.as_str()));
        text.push_str(&format!(
            "    binning: {}\n",
            spec.classifier.binning.as_str()
        ));
        text.push_str(&format!("    cumulative: {}\n", spec.cumulative));
        text.push_str(&format!("    emit float: {}\n", spec.emit_float));
    }

    text.push_str("\nTOPSIS:\n");
    for ((spec, weight), criterion) in resolved
        .factors
        .iter()
        .zip(resolved.topsis.weights())
        .zip(resolved.topsis.criteria())
    {
        text.push_str(&format!(
            "  {}: weight {:.4}, {}\n",
            spec.factor,
            weight,
            criterion.as_str()
        ));
    }

    text.push_str("\nCohorts:\n");
    text.push_str(&format!(
        "  degenerate columns: {}\n",
        resolved.degenerate.as_str()
    ));
    text.push_str(&format!("  min cohort size: {}\n", resolved.min_cohort_size));
    text.push_str(&format!(
        "  financial year start month: {}\n",
        resolved.fy_start_month
    ));
    text.push_str(&format!(
        "  cumulative vars: {}\n",
        list(&resolved.cumulative_vars)
    ));

    text.push_str("\nDistricts:\n");
    text.push_str(&format!(
        "  rebin scope: {}\n",
        resolved.rollup.rebin_scope.as_str()
    ));
    for indicator in &resolved.rollup.indicators {
        let rule = resolved
            .rollup
            .rules
            .get(indicator)
            .map(|r| r.as_str())
            .unwrap_or("none");
        let decimals = resolved
            .rounding
            .get(indicator)
            .map(|d| format!(", {} decimals", d))
            .unwrap_or_default();
        text.push_str(&format!("  {}: {}{}\n", indicator, rule, decimals));
    }

    text.push_str("\nFilters:\n");
    text.push_str(&format!(
        "  top: {}\n",
        resolved
            .top_n
            .map(|v| v.to_string())
            .unwrap_or_else(|| "none".to_string())
    ));
    text.push_str(&format!(
        "  check min members: {}\n",
        resolved.check_min_members
    ));
    text
}
