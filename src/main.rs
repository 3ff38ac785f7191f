use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;

use lifecycle_engine::{
    stop_handler, EngineConfig, EngineOrchestrator, LoggingHandler, RunSnapshot, ShutdownReason,
};

#[derive(Parser, Debug)]
#[command(name = "lifecycle-engine")]
#[command(about = "Component lifecycle and task sequencing engine demo runner")]
#[command(version)]
#[command(long_about = "Starts a demo endpoint and its sessions through serial and parallel \
task sequences, waits for SIGINT or SIGTERM, shuts everything down and prints the final \
component states as JSON.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "lifecycle.toml", help = "Path to TOML configuration file")]
    config: String,

    /// Enable debug logging (most verbose)
    #[arg(short, long, help = "Enable debug level logging")]
    debug: bool,

    /// Enable verbose logging (info level)
    #[arg(short, long, help = "Enable verbose info level logging")]
    verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(short, long, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration file and exit without starting the engine")]
    validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    /// Dry run mode - register components but don't start them
    #[arg(long, help = "Register the demo components, print their state and exit")]
    dry_run: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,

    /// Also write logs to a daily rolling file in this directory
    #[arg(long, value_name = "DIR", help = "Directory for rolling log files")]
    log_dir: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        print_default_config()?;
        return Ok(());
    }

    let guard = init_logging(&args)?;

    info!("Starting lifecycle engine v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let config = match EngineConfig::load_from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {}", e);
        if args.validate_config {
            eprintln!("✗ Configuration validation failed: {}", e);
            std::process::exit(1);
        }
        return Err(e.into());
    }

    if args.validate_config {
        println!("✓ Configuration is valid");
        return Ok(());
    }

    let mut orchestrator = EngineOrchestrator::new(config).map_err(|e| {
        error!("Failed to create orchestrator: {}", e);
        e
    })?;

    let handler_token = CancellationToken::new();
    let handler = orchestrator
        .event_bus()
        .spawn_handler(LoggingHandler::new("lifecycle"), handler_token.clone());

    orchestrator.initialize();

    if args.dry_run {
        info!("Dry run mode - components registered but not started");
        print_snapshot(&orchestrator.snapshot(0))?;
        return Ok(());
    }

    let exit_code = match orchestrator.start().await {
        Ok(()) => orchestrator.run().await.map_err(|e| {
            error!("Engine error during execution: {}", e);
            e
        })?,
        Err(e) => {
            error!("Failed to start engine: {}", e);
            orchestrator
                .shutdown(&ShutdownReason::Error(e.to_string()))
                .await
        }
    };

    print_snapshot(&orchestrator.snapshot(exit_code))?;

    if let Err(e) = stop_handler(&handler_token, handler).await {
        error!("Lifecycle event logging stopped abnormally: {}", e);
    }

    info!("Lifecycle engine exited with code: {}", exit_code);
    drop(guard);
    std::process::exit(exit_code);
}

fn init_logging(args: &Args) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else if args.quiet {
        "error"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("lifecycle_engine={}", log_level)));

    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_names(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        Some("compact") => fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_names(false)
            .boxed(),
        Some("pretty") | None => fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_names(args.debug)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer()
                .with_target(true)
                .with_thread_names(args.debug)
                .boxed()
        }
    };

    let (file_layer, guard) = match &args.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "lifecycle-engine.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .json()
                .with_writer(writer)
                .with_ansi(false)
                .with_thread_names(true)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(file_layer)
        .with(env_filter)
        .init();

    Ok(guard)
}

fn print_snapshot(snapshot: &RunSnapshot) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(snapshot)?);
    Ok(())
}

/// Print default configuration in TOML format
fn print_default_config() -> Result<()> {
    println!("# Lifecycle engine configuration file");
    println!("# Every key can be overridden with LIFECYCLE_<SECTION>__<KEY> environment variables");
    println!("# demo.fail_session = <index> makes that session's startup fail");
    println!();
    println!("{}", EngineConfig::default().to_toml()?);
    Ok(())
}
