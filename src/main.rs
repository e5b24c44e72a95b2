use anyhow::Result;
use clap::{Parser, Subcommand};
use ondemand::{ControllerConfig, OndemandOrchestrator};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;

#[derive(Parser, Debug)]
#[command(name = "ondemand")]
#[command(about = "Launches a game server on demand and stops it when nobody is playing")]
#[command(version)]
#[command(long_about = "An on-demand lifecycle controller. Demand signals (an HTTP call, a DNS \
lookup in a query log) scale the server's service to one task; a watchdog polls the server \
over RCON and scales it back to zero after a period of inactivity. Operators are notified \
at every transition.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "ondemand.toml", help = "Path to TOML configuration file")]
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
    #[arg(long, help = "Validate configuration file and exit without touching any backend")]
    validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the controller: recovery pass, demand sources and watchdog supervisor (default)
    Serve,
    /// Send one demand signal and wait for the launch to settle
    Launch,
    /// Watch the current cycle until it shuts down
    Watch,
    /// Normalize stale transitional state left by a crashed process
    Recover,
    /// Print the persisted state record as JSON
    Status,
    /// Shut the workload down now, skipping idle evaluation
    Stop {
        #[arg(long, default_value = "operator request")]
        reason: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Handle special modes that don't require full initialization
    if args.print_config {
        print_default_config();
        return Ok(());
    }

    let config = match ControllerConfig::load_from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration from {}: {}", args.config, e);
            return Err(e.into());
        }
    };

    let log_guard = init_logging(&args, &config)?;

    info!("Starting ondemand v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {}", e);
        eprintln!("✗ Configuration validation failed: {}", e);
        std::process::exit(1);
    }

    if args.validate_config {
        info!("Configuration validation successful");
        println!("✓ Configuration is valid");
        return Ok(());
    }

    let mut orchestrator = OndemandOrchestrator::new(config).await.map_err(|e| {
        error!("Failed to create orchestrator: {}", e);
        e
    })?;

    let exit_code = match args.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(&mut orchestrator).await?,
        Command::Launch => launch(&orchestrator).await?,
        Command::Watch => watch(&orchestrator).await?,
        Command::Recover => {
            let outcome = orchestrator.recover().await?;
            println!("{:?}", outcome);
            0
        }
        Command::Status => {
            let record = orchestrator.launcher().status().await?;
            println!("{}", serde_json::to_string_pretty(&record)?);
            0
        }
        Command::Stop { reason } => {
            let report = orchestrator.watchdog().force_stop(&reason).await?;
            println!(
                "Stopped (confirmed: {}, last running count: {:?})",
                report.confirmed, report.last_seen
            );
            flush(&orchestrator).await;
            if report.confirmed {
                0
            } else {
                1
            }
        }
    };

    info!("ondemand exited with code: {}", exit_code);

    // process::exit skips destructors; flush the file writer first
    drop(log_guard);
    std::process::exit(exit_code);
}

async fn serve(orchestrator: &mut OndemandOrchestrator) -> Result<i32> {
    orchestrator.initialize().await.map_err(|e| {
        error!("Failed to initialize controller: {}", e);
        e
    })?;

    orchestrator.start().await.map_err(|e| {
        error!("Failed to start controller: {}", e);
        e
    })?;

    let exit_code = orchestrator.run().await.map_err(|e| {
        error!("Controller error during execution: {}", e);
        e
    })?;
    Ok(exit_code)
}

async fn launch(orchestrator: &OndemandOrchestrator) -> Result<i32> {
    let launcher = orchestrator.launcher();
    let outcome = launcher.ensure_running(launcher.signal("cli")).await?;
    println!("{}", serde_json::to_string(&outcome)?);
    flush(orchestrator).await;
    Ok(if outcome.is_success() { 0 } else { 1 })
}

async fn watch(orchestrator: &OndemandOrchestrator) -> Result<i32> {
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received SIGINT signal (Ctrl+C), stopping watch");
            on_signal.cancel();
        }
    });

    let outcome = orchestrator.watchdog().run(cancel).await?;
    println!("{:?}", outcome);
    flush(orchestrator).await;
    Ok(0)
}

async fn flush(orchestrator: &OndemandOrchestrator) {
    if !orchestrator
        .dispatcher()
        .flush_within(std::time::Duration::from_secs(15))
        .await
    {
        error!("Some notifications were still in flight at exit");
    }
}

fn init_logging(args: &Args, config: &ControllerConfig) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    // Determine log level based on flags
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
        .unwrap_or_else(|_| EnvFilter::new(format!("ondemand={}", log_level)));

    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        Some("compact") => fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .boxed(),
        Some("pretty") | None => fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_ids(args.debug)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer()
                .with_target(true)
                .with_thread_ids(args.debug)
                .with_file(args.debug)
                .with_line_number(args.debug)
                .boxed()
        }
    };

    // Daily rolling JSON file next to stdout output
    let (file_layer, guard) = match &config.logging.directory {
        Some(directory) => {
            let appender = tracing_appender::rolling::daily(directory, "ondemand.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(writer)
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

/// Print default configuration in TOML format
fn print_default_config() {
    println!("# ondemand configuration file");
    println!("# This is the default configuration with all available options");
    println!("# Every key can be overridden from the environment, e.g.");
    println!("# ONDEMAND_LIFECYCLE__IDLE_TIMEOUT_MINUTES=30");
    println!();

    let default_config = r#"[lifecycle]
# Minutes after launch during which the server is never stopped for idleness
startup_grace_minutes = 10
# Minutes with zero players before the server is stopped
idle_timeout_minutes = 20
# Seconds between activity probes
poll_interval_seconds = 60
# Probe failures in a row before the server counts as idle
max_consecutive_probe_failures = 5
# Seconds between running-count checks while scaling
cluster_poll_interval_seconds = 10
# Seconds to wait for the task count to reach zero on shutdown
shutdown_deadline_seconds = 300
# Extra seconds before a Starting/Stopping record is treated as abandoned
recovery_margin_seconds = 120

[cluster]
# "aws" (ECS service) or "command"
backend = "aws"
name = "palworld"
service = "palworld-server"
region = "us-east-1"
# Command backend only; {count} is replaced with 0 or 1
# scale_command = "kubectl scale deployment/palworld --replicas={count}"
# count_command = "kubectl get deployment/palworld -o jsonpath={.status.readyReplicas}"
command_timeout_seconds = 30

[probe]
# RCON endpoint of the running server
host = "127.0.0.1"
port = 25575
password = ""
command = "ShowPlayers"
timeout_seconds = 5

[state]
# "file" or "dynamodb"
backend = "file"
path = "./ondemand-state.json"
table = "ondemand-state"
key = "palworld"

[notify]
display_name = "Palworld server"
# Timezone for timestamps in messages
timezone = "UTC"
# Also write every lifecycle event to the log
log_events = true
# sns_topic_arn = "arn:aws:sns:us-east-1:123456789012:palworld"
# slack_webhook_url = "https://hooks.slack.com/services/..."
# webhook_url = "https://example.com/hooks/palworld"
max_retries = 3
retry_base_delay_ms = 500
request_timeout_seconds = 10

# [notify.twilio]
# account_sid = "AC..."
# auth_token = "..."
# from = "+15550001111"
# to = "+15552223333"

[demand]
# Unauthenticated POST /launch endpoint
http_enabled = true
http_address = "0.0.0.0:8080"
# Follow a DNS query log and launch on lookups of hostname
# query_log_path = "/var/log/dns/queries.log"
# hostname = "palworld.example.com"
query_log_poll_millis = 1000

[logging]
# Daily rolling log files in this directory (stdout only when unset)
# directory = "/var/log/ondemand"
"#;

    println!("{}", default_config);
}
