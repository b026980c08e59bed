//! Relay MCP gateway server.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use relay::{
    auth::AccessPolicy,
    config::Config,
    create_app_with_config,
    metering::{start_units, LogMeter, UsageMeter, START_EVENT},
    shutdown::{
        forced_exit_deadline, shutdown_signal, DrainOutcome, ShutdownCoordinator, ShutdownState,
    },
    state::AppState,
};

/// Relay - session-multiplexed MCP over SSE gateway
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port to listen on
    #[arg(short, long, env = "RELAY_PORT")]
    port: Option<u16>,

    /// Base URL clients use to reach this server
    #[arg(long, env = "RELAY_PUBLIC_URL")]
    public_url: Option<String>,

    /// Append every outbound message to this JSONL file
    #[arg(long, env = "RELAY_AUDIT_PATH")]
    audit_path: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = Config::from_figment(args.port, args.public_url, args.audit_path)?;

    // Keep the guard alive so buffered file logs are flushed on exit
    let _log_guard = init_logging(&config)?;

    info!("Starting Relay MCP gateway...");
    info!("Configuration loaded: {:?}", config);

    let meter: Arc<dyn UsageMeter> = Arc::new(LogMeter);
    if let Err(e) = meter
        .charge(START_EVENT, start_units(config.memory_mbytes))
        .await
    {
        warn!("Failed to charge {}: {:#}", START_EVENT, e);
    }

    let state = AppState::from_config(&config);
    let policy = AccessPolicy::new(config.allowed_user_ids.clone(), config.user_id.clone());
    let coordinator = Arc::new(ShutdownCoordinator::new(
        state.registry().clone(),
        meter,
        config.shutdown_grace,
    ));

    let app = create_app_with_config(state, policy).await;

    // Bind to 0.0.0.0 to be accessible from all interfaces (Docker, network, etc.)
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Server listening on {}", addr);
    info!("Connect to {}/sse", config.public_url);
    info!(
        "Client configuration: {}",
        client_config(&config.public_url)
    );

    // Stop accepting connections as soon as draining starts
    let mut draining = coordinator.subscribe();
    let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
        let _ = draining
            .wait_for(|state| *state != ShutdownState::Running)
            .await;
    });

    let drain = coordinator.clone();
    let exit_on_stdin_close = config.exit_on_stdin_close;
    tokio::spawn(async move {
        shutdown_signal(exit_on_stdin_close).await;
        match drain.drain().await {
            DrainOutcome::Clean { closed } => info!("Closed {} session(s)", closed),
            DrainOutcome::TimedOut => warn!("Some sessions did not close in time"),
            DrainOutcome::AlreadyDraining => {}
        }
    });

    tokio::select! {
        result = serve => {
            result?;
            info!("Server stopped");
        }
        _ = forced_exit_deadline(coordinator.subscribe(), coordinator.grace()) => {
            error!(
                "Shutdown did not complete within {}s, exiting",
                coordinator.grace().as_secs()
            );
            std::process::exit(0);
        }
    }

    Ok(())
}

/// Initialize logging - use RUST_LOG env var, then the configured level, then info.
///
/// When a log file is configured, logs are written there in addition to stdout.
fn init_logging(
    config: &Config,
) -> anyhow::Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(config.log_level.as_deref().unwrap_or("info"))
    });
    let stdout = fmt::layer().with_target(false).compact();

    match config.log_file {
        Some(ref path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| std::path::Path::new("."));
            let file_name = path
                .file_name()
                .ok_or_else(|| anyhow::anyhow!("Invalid log file path: {}", path.display()))?;
            let appender = tracing_appender::rolling::never(dir, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(stdout)
                .with(fmt::layer().with_ansi(false).with_writer(writer))
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::registry().with(filter).with(stdout).init();
            Ok(None)
        }
    }
}

/// MCP client configuration snippet pointing at this server.
fn client_config(public_url: &str) -> serde_json::Value {
    serde_json::json!({
        "mcpServers": {
            "relay": {
                "url": format!("{}/sse", public_url)
            }
        }
    })
}
