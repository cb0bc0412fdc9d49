// ============================================================================
// AUDIT NOZZLE - COMMAND LINE ENTRY POINT
// ============================================================================

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result as AnyhowResult};
use clap::{Parser, Subcommand};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use audit_nozzle::engine::ReportOptions;
use audit_nozzle::logging::init_logging;
use audit_nozzle::{server, AuditConfig, AuditEngine, CollectorKind, ENGINE_FULL_NAME, ENGINE_VERSION};

// ----------------------------------------------------------------------------
// CLI Argument Parser
// ----------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "auditnozzle",
    author = "Platform Telemetry Team",
    version,
    about = "Time-boxed audits of a platform telemetry firehose",
    long_about = "Audit Nozzle subscribes to a telemetry firehose for a bounded window and \
                  reports log volume per application, tag usage, counter integrity, \
                  metric emission intervals, envelope latency and log sizes."
)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "audit-nozzle.toml", env = "AUDITNOZZLE_CONFIG")]
    pub config: PathBuf,

    /// Log level override
    #[arg(short, long, env = "AUDITNOZZLE_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Serve the HTTP control surface (default)
    Serve,

    /// Run one window against the configured source and print its report
    Scan {
        /// logs, tags, metrics, latency or loghist
        collector: CollectorKind,

        /// Window length, e.g. 30s or 10m (default: scan.default_runtime)
        #[arg(short, long)]
        runtime: Option<humantime::Duration>,

        /// Log report: include application ids
        #[arg(long)]
        show_ids: bool,

        /// Tag report: split by job
        #[arg(long)]
        show_jobs: bool,

        /// Metric report: one row per index instead of consolidating
        #[arg(long)]
        per_index: bool,

        /// Metric report: also cross-reference the documentation manifest
        #[arg(long)]
        docs: bool,
    },

    /// Validate configuration file
    Validate {
        /// Show full parsed configuration
        #[arg(short, long)]
        verbose: bool,
    },

    /// Generate default configuration file
    GenerateConfig {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show version and build info
    Version,
}

// ----------------------------------------------------------------------------
// Handlers
// ----------------------------------------------------------------------------

fn load_config(path: &Path) -> AnyhowResult<AuditConfig> {
    if path.exists() {
        AuditConfig::load(Some(path)).with_context(|| format!("Failed to load config from {}", path.display()))
    } else {
        let config = AuditConfig::load(None).context("Failed to load config from the environment")?;
        warn!("Config file not found at {}, using defaults", path.display());
        Ok(config)
    }
}

fn handle_validate(config_path: &Path, verbose: bool) -> AnyhowResult<()> {
    println!("Validating configuration file: {}", config_path.display());

    match AuditConfig::load(Some(config_path)) {
        Ok(config) => {
            println!("✅ Configuration is valid!");
            if verbose {
                println!("\n📋 Parsed configuration:");
                println!("{}", "=".repeat(60));
                match toml::to_string_pretty(&config) {
                    Ok(s) => println!("{s}"),
                    Err(e) => println!("Failed to serialize: {e}"),
                }
            }
            println!("\n📊 Configuration Summary:");
            println!("  • Listen address: {}:{}", config.server.host, config.server.port);
            println!("  • Default runtime: {}", humantime::format_duration(config.scan.default_runtime));
            println!("  • Event source: {}", config.source.path.display());
            println!(
                "  • Name lookups: queue {} ({:?})",
                config.name_lookup.queue_capacity, config.name_lookup.policy
            );
            println!("  • Resolver: {:?}", config.resolver.kind);
            println!("  • Manifest: {}", config.manifest.path.display());
            Ok(())
        }
        Err(e) => {
            println!("❌ Configuration validation failed!");
            println!("Error: {e}");
            Err(e.into())
        }
    }
}

fn handle_generate_config(output: Option<&Path>) -> AnyhowResult<()> {
    let config_str = AuditConfig::generate_default_config();
    match output {
        Some(path) => {
            fs::write(path, &config_str).with_context(|| format!("Failed to write {}", path.display()))?;
            println!("✅ Default configuration written to: {}", path.display());
        }
        None => println!("{config_str}"),
    }
    Ok(())
}

fn handle_version() {
    println!("🔭 {ENGINE_FULL_NAME} v{ENGINE_VERSION}");
    println!();
    println!("Build Information:");
    println!("  • Target: {}", std::env::consts::ARCH);
    println!("  • OS: {}", std::env::consts::OS);
    println!();
    println!("Collectors:");
    for kind in CollectorKind::ALL {
        println!("  • {:<10} {}", kind.slug(), kind.display_name());
    }
}

async fn shutdown_signal() -> std::io::Result<()> {
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM"),
        _ = sigint.recv() => info!("Received SIGINT"),
    }
    Ok(())
}

async fn handle_serve(config: AuditConfig) -> AnyhowResult<()> {
    let engine = Arc::new(AuditEngine::from_config(config)?);
    let shutdown = CancellationToken::new();

    let trigger = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = shutdown_signal().await {
            warn!(error = %e, "Failed to install signal handlers");
            return;
        }
        trigger.cancel();
    });

    server::serve(engine.clone(), shutdown).await?;
    engine.shutdown().await;
    Ok(())
}

async fn handle_scan(
    config: AuditConfig,
    kind: CollectorKind,
    runtime: Option<humantime::Duration>,
    options: ReportOptions,
    docs: bool,
) -> AnyhowResult<()> {
    let engine = AuditEngine::from_config(config)?;
    let runtime = runtime.map(Into::into).unwrap_or_else(|| engine.default_runtime());

    println!("{}", engine.start_scan(kind, runtime).await?);
    if let Some(cancel) = engine.scan_cancellation(kind) {
        tokio::spawn(async move {
            if shutdown_signal().await.is_ok() {
                cancel.cancel();
            }
        });
    }
    if let Some(outcome) = engine.wait_scan(kind).await? {
        info!(events = outcome.events, end = ?outcome.end, "Window finished");
    }

    print!("{}", engine.report(kind, options));
    if docs && kind == CollectorKind::Metrics {
        print!("{}", engine.report_manifest().await?);
    }
    engine.shutdown().await;
    Ok(())
}

// ----------------------------------------------------------------------------
// Main Entry Point
// ----------------------------------------------------------------------------

#[tokio::main]
async fn main() -> AnyhowResult<()> {
    let cli = Cli::parse();

    match &cli.command {
        Some(Commands::Version) => {
            handle_version();
            return Ok(());
        }
        Some(Commands::GenerateConfig { output }) => return handle_generate_config(output.as_deref()),
        Some(Commands::Validate { verbose }) => return handle_validate(&cli.config, *verbose),
        _ => {}
    }

    let config = load_config(&cli.config)?;

    let mut logging_config = config.logging.clone();
    if let Some(level) = &cli.log_level {
        logging_config.level = level.clone();
    }
    if cli.debug {
        logging_config.level = "debug".into();
    }
    let _log_guard = init_logging(&logging_config)?;

    info!("🔭 {} v{}", ENGINE_FULL_NAME, ENGINE_VERSION);

    match cli.command {
        Some(Commands::Scan {
            collector,
            runtime,
            show_ids,
            show_jobs,
            per_index,
            docs,
        }) => {
            let options = ReportOptions {
                show_ids,
                show_jobs,
                consolidated: !per_index,
            };
            handle_scan(config, collector, runtime, options, docs).await
        }
        _ => handle_serve(config).await,
    }
}
