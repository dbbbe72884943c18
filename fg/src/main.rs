//! Fairgate - priority and fairness admission control
//!
//! CLI entry point for checking configurations, classifying requests and
//! simulating load against the admission gate.

use std::fs;
use std::path::PathBuf;

use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use tracing::{debug, info};

use fairgate::cli::{ClassifyArgs, Cli, Command, OutputFormat};
use fairgate::config::Config;
use fairgate::events::create_event_bus;
use fairgate::gate::{AdmissionGate, ApplyReport, HEADER_FLOW_SCHEMA_UID, HEADER_PRIORITY_LEVEL_UID};
use fairgate::loadgen;

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    // Note: Can't log params here since logging isn't initialized yet
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("fairgate")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Determine log level with priority: CLI --log-level > config file > default (INFO)
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    let log_file = fs::File::create(log_dir.join("fairgate.log")).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load log level from config file early (before full config load)
    let config_log_level = Config::load_log_level(cli.config.as_ref());

    // Setup logging with priority: CLI > config > INFO default
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    info!(
        server_concurrency_limit = config.flow_control.server_concurrency_limit,
        "Fairgate loaded config"
    );

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Check { format } => cmd_check(&config, format),
        Command::Classify(args) => cmd_classify(&config, &args),
        Command::Simulate {
            duration_secs,
            service_ms,
        } => cmd_simulate(config, duration_secs, service_ms).await,
        Command::Metrics => cmd_metrics(&config),
    }
}

/// Build a gate from the configuration and apply it
fn build_gate(config: &Config) -> Result<(AdmissionGate, ApplyReport)> {
    debug!("build_gate: called");
    let gate = AdmissionGate::new(create_event_bus()).context("Failed to create admission gate")?;
    let report = gate
        .apply(&config.flow_control())
        .context("Failed to apply flow control configuration")?;
    Ok((gate, report))
}

/// Validate the configuration and show what it produces
fn cmd_check(config: &Config, format: OutputFormat) -> Result<()> {
    debug!(?format, "cmd_check: called");
    let (gate, report) = build_gate(config)?;
    let registry = gate.registry_snapshot();
    let classifier = gate.classifier_snapshot();

    match format {
        OutputFormat::Json => {
            let levels: Vec<_> = registry
                .entries()
                .map(|entry| {
                    serde_json::json!({
                        "name": entry.level.name,
                        "uid": entry.uid,
                        "exempt": entry.level.is_exempt(),
                        "shares": entry.level.shares(),
                        "concurrency-limit": entry.concurrency_limit,
                        "queuing": entry.level.queuing_config(),
                    })
                })
                .collect();
            let schemas: Vec<_> = classifier
                .schemas()
                .iter()
                .map(|entry| {
                    serde_json::json!({
                        "name": entry.schema.name,
                        "uid": entry.uid,
                        "matching-precedence": entry.schema.matching_precedence,
                        "priority-level": entry.priority_level.name,
                        "distinguisher": entry.schema.distinguisher,
                    })
                })
                .collect();
            let json = serde_json::json!({
                "version": report.version,
                "server-concurrency-limit": registry.server_concurrency_limit,
                "total-shares": registry.total_shares,
                "priority-levels": levels,
                "flow-schemas": schemas,
                "rejected": report.rejected,
            });
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        OutputFormat::Text => {
            println!(
                "{} (server concurrency limit {}, {} shares)",
                "Priority levels".bold(),
                registry.server_concurrency_limit,
                registry.total_shares
            );
            for entry in registry.entries() {
                let limit = match entry.concurrency_limit {
                    Some(limit) => format!("limit {}", limit),
                    None => "exempt".to_string(),
                };
                let queuing = match entry.level.queuing_config() {
                    Some(q) => format!(
                        "queues {} x {}, hand {}",
                        q.queues, q.queue_length_limit, q.hand_size
                    ),
                    None if entry.level.is_exempt() => String::new(),
                    None => "reject".to_string(),
                };
                println!(
                    "  {:<24} shares {:>4}  {:<12} {}",
                    entry.level.name.cyan(),
                    entry.level.shares(),
                    limit,
                    queuing.dimmed()
                );
            }

            println!();
            println!("{}", "Flow schemas (by precedence)".bold());
            for entry in classifier.schemas() {
                println!(
                    "  {:>5}  {:<32} -> {:<24} {}",
                    entry.schema.matching_precedence,
                    entry.schema.name.cyan(),
                    entry.priority_level.name,
                    entry.schema.distinguisher.to_string().dimmed()
                );
            }

            if !report.is_clean() {
                println!();
                println!("{}", "Rejected objects".bold());
                for rejected in &report.rejected {
                    println!("  {} {}: {}", "✗".red(), rejected.object.yellow(), rejected.message);
                }
            } else {
                println!();
                println!("{} Configuration is valid", "✓".green());
            }
        }
    }

    if !report.is_clean() {
        return Err(eyre::eyre!("{} configuration object(s) rejected", report.rejected.len()));
    }
    Ok(())
}

/// Show where one request is classified
fn cmd_classify(config: &Config, args: &ClassifyArgs) -> Result<()> {
    debug!(user = %args.user, "cmd_classify: called");
    let (gate, _) = build_gate(config)?;
    let digest = args.digest();
    let classification = gate.classify(&digest).context("Failed to classify request")?;

    println!("{:<16} {}", "flow schema:", classification.flow_schema.name.cyan());
    println!("{:<16} {}", "priority level:", classification.priority_level.name.cyan());
    match gate.concurrency_limit(&classification.priority_level.name) {
        Some(limit) => println!("{:<16} {}", "limit:", limit),
        None => println!("{:<16} {}", "limit:", "exempt".green()),
    }
    println!("{:<16} {}", "distinguisher:", classification.distinguisher);
    println!("{:<16} {}", "flow:", classification.flow);
    println!("{}: {}", HEADER_FLOW_SCHEMA_UID, classification.flow_schema.uid);
    println!("{}: {}", HEADER_PRIORITY_LEVEL_UID, classification.priority_level.uid);
    Ok(())
}

/// Run the configured simulation clients
async fn cmd_simulate(mut config: Config, duration_secs: Option<u64>, service_ms: Option<u64>) -> Result<()> {
    debug!(?duration_secs, ?service_ms, "cmd_simulate: called");
    if let Some(duration_secs) = duration_secs {
        config.simulation.duration_secs = duration_secs;
    }
    if let Some(service_ms) = service_ms {
        config.simulation.service_ms = service_ms;
    }
    if config.simulation.clients.is_empty() {
        println!("No simulation clients configured (add simulation.clients to the config file)");
        return Ok(());
    }

    let (gate, _) = build_gate(&config)?;
    println!(
        "Simulating {} client(s) for {}s, {}ms per request...",
        config.simulation.clients.len(),
        config.simulation.duration_secs,
        config.simulation.service_ms
    );
    let report = loadgen::run(&gate, &config.simulation)
        .await
        .context("Simulation failed")?;

    println!();
    println!(
        "{:<20} {:>9} {:>10} {:>9} {:>9}",
        "client".bold(),
        "offered".bold(),
        "completed".bold(),
        "rejected".bold(),
        "fraction".bold()
    );
    for client in &report.clients {
        let fraction = format!("{:.3}", client.fraction());
        println!(
            "{:<20} {:>9} {:>10} {:>9} {:>9}",
            client.user, client.offered, client.completed, client.rejected, fraction
        );
    }
    Ok(())
}

/// Print the Prometheus exposition of a freshly configured gate
fn cmd_metrics(config: &Config) -> Result<()> {
    debug!("cmd_metrics: called");
    let (gate, _) = build_gate(config)?;
    let text = gate.metrics().render().context("Failed to render metrics")?;
    print!("{}", text);
    Ok(())
}
