//! # dynamate
//!
//! Command-line entry point: loads settings and credentials, then runs the planning
//! and execution agents for one structure.

#![deny(unsafe_code)]

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use dynamate_engine::{Pipeline, PlanningRequest};
use dynamate_llm::{OpenRouterConfig, OpenRouterProvider, ReliableConfig, ReliableProvider};
use dynamate_settings::loader::validate;
use dynamate_settings::{load_settings, DynamateSettings};
use dynamate_telemetry::{init_telemetry, TelemetryConfig};
use dynamate_tools::Toolbox;
use secrecy::SecretString;
use tracing::{error, info, warn, Level};

/// Set up and run a molecular dynamics simulation with an LLM driving the tools.
#[derive(Parser, Debug)]
#[command(name = "dynamate", version, about)]
struct Cli {
    /// PDB identifier of the structure to simulate.
    #[arg(long)]
    pdb_id: String,

    /// Model name (an `openrouter/` prefix is accepted).
    #[arg(long)]
    model: Option<String>,

    /// Three-character residue name of the ligand, if any.
    #[arg(long)]
    ligand: Option<String>,

    /// Simulation temperature in kelvin. Skips asking the model.
    #[arg(long = "temp")]
    temperature_k: Option<f64>,

    /// Production length in nanoseconds. Skips asking the model.
    #[arg(long = "duration")]
    duration_ns: Option<f64>,

    /// Send system prompts with the user role.
    #[arg(long)]
    no_system_messages: bool,

    /// Settings file (defaults to `DYNAMATE_SETTINGS` or `./dynamate.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Directory holding the per-run sandboxes.
    #[arg(long)]
    sandbox_root: Option<PathBuf>,

    /// Stdout log level; `RUST_LOG` wins when set.
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    fn apply(&self, settings: &mut DynamateSettings) {
        if let Some(model) = &self.model {
            settings.model.name.clone_from(model);
        }
        if self.no_system_messages {
            settings.model.supports_system_messages = false;
        }
        if let Some(root) = &self.sandbox_root {
            settings.paths.sandbox_root.clone_from(root);
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
    }

    fn request(&self) -> PlanningRequest {
        PlanningRequest {
            pdb_id: self.pdb_id.trim().to_uppercase(),
            ligand: self.ligand.clone(),
            temperature_k: self.temperature_k,
            duration_ns: self.duration_ns,
        }
    }
}

fn telemetry_config(settings: &DynamateSettings) -> TelemetryConfig {
    let logging = &settings.logging;
    TelemetryConfig {
        log_level: logging.level.clone(),
        json: logging.json,
        log_file: (!logging.file_name.is_empty()).then(|| settings.paths.agent_logs.join(&logging.file_name)),
        file_level: TelemetryConfig::parse_level(&logging.file_level, Level::DEBUG),
    }
}

/// Read the API key from the environment, or ask for it and remember it in `env_file`.
fn api_key(var: &str, env_file: &Path) -> Result<SecretString> {
    if let Some(key) = std::env::var(var).ok().filter(|k| !k.trim().is_empty()) {
        return Ok(SecretString::from(key));
    }
    print!("{var} is not set. Enter your API key: ");
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    let key = line.trim().to_string();
    if key.is_empty() {
        bail!("no API key provided");
    }
    remember_key(env_file, var, &key)?;
    Ok(SecretString::from(key))
}

fn remember_key(env_file: &Path, var: &str, key: &str) -> Result<()> {
    let existing = match std::fs::read_to_string(env_file) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e).with_context(|| format!("Failed to read {}", env_file.display())),
    };
    // Keep the new entry off the last line when the file lacks a trailing newline
    let separator = if existing.is_empty() || existing.ends_with('\n') { "" } else { "\n" };

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(env_file)
        .with_context(|| format!("Failed to open {}", env_file.display()))?;
    writeln!(file, "{separator}{var}={key}").with_context(|| format!("Failed to write {}", env_file.display()))?;
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let mut settings = load_settings(cli.settings.as_deref()).context("Failed to load settings")?;
    cli.apply(&mut settings);
    validate(&settings).context("Invalid settings")?;

    let _telemetry = init_telemetry(telemetry_config(&settings));

    match dotenvy::from_path(&settings.paths.env_file) {
        Ok(()) => info!(path = %settings.paths.env_file.display(), "loaded environment file"),
        Err(e) if e.not_found() => {}
        Err(e) => warn!(error = %e, "could not read environment file"),
    }
    let key = api_key(&settings.model.api_key_env, &settings.paths.env_file)?;

    let model = &settings.model;
    let mut gateway = OpenRouterConfig::new(key, model.name.clone());
    gateway.base_url.clone_from(&model.base_url);
    gateway.request_timeout = Duration::from_secs(model.request_timeout_secs);
    gateway.connect_timeout = Duration::from_secs(model.connect_timeout_secs);
    let retry = &settings.retry;
    let provider = ReliableProvider::new(
        OpenRouterProvider::new(gateway).context("Failed to build model client")?,
        ReliableConfig {
            max_retries: retry.max_retries,
            base_delay: Duration::from_millis(retry.base_delay_ms),
            max_delay: Duration::from_millis(retry.max_delay_ms),
            jitter_factor: retry.jitter_factor,
        },
    );
    let toolbox = Toolbox::new(&settings.tools, &settings.paths).context("Failed to build toolbox")?;

    info!(model = %settings.model.name, pdb_id = %cli.pdb_id, "starting dynamate");
    let pipeline = Pipeline::new(settings, Arc::new(provider), Arc::new(toolbox));
    let outcome = pipeline.run(cli.request()).await?;

    let report = &outcome.report;
    println!("Sandbox: {}", outcome.sandbox.display());
    println!(
        "Tools: {} of {} calls succeeded over {} turns",
        report.succeeded(),
        report.attempted(),
        report.turns
    );
    if !report.analysis_written {
        println!("Warning: no analysis.txt was written");
    }
    println!("Total cost: ${:.4}", outcome.total_cost_usd);
    println!("\n{}", report.final_message);
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %format!("{e:#}"), "run failed");
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
