use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use turnstile::clock::{Clock, SystemClock};
use turnstile::config::{LogFormat, LoggingConfig, TurnstileConfig};
use turnstile::http::{AdmissionGate, AppState, HttpServer};
use turnstile::ratelimit::{AdmissionController, StoreFallback, WindowAccountant};
use turnstile::store::{self, StoreBackend};

/// Distributed fixed-window admission control for HTTP services.
#[derive(Debug, Parser)]
#[command(name = "turnstile", version, about)]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Behaviour when the counter store is unreachable
    #[arg(long, value_enum)]
    store_fallback: Option<FallbackArg>,

    /// Counter store implementation
    #[arg(long, value_enum)]
    store_backend: Option<BackendArg>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FallbackArg {
    FailOpen,
    FailClosed,
}

impl From<FallbackArg> for StoreFallback {
    fn from(arg: FallbackArg) -> Self {
        match arg {
            FallbackArg::FailOpen => StoreFallback::FailOpen,
            FallbackArg::FailClosed => StoreFallback::FailClosed,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum BackendArg {
    Redis,
    Memory,
}

impl From<BackendArg> for StoreBackend {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Redis => StoreBackend::Redis,
            BackendArg::Memory => StoreBackend::Memory,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = TurnstileConfig::load(cli.config.as_deref())?;
    if let Some(listen) = cli.listen {
        config.server.listen_addr = listen;
    }
    if let Some(fallback) = cli.store_fallback {
        config.admission.store_fallback = Some(fallback.into());
    }
    if let Some(backend) = cli.store_backend {
        config.store.backend = backend.into();
    }

    init_tracing(&config.logging);

    info!("Starting Turnstile admission service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    // Policy problems abort startup before any traffic is accepted.
    config.validate()?;
    let policy = config.policy()?;
    let fallback = config.store_fallback()?;
    info!(
        listen_addr = %config.server.listen_addr,
        window_ms = policy.window().as_millis() as u64,
        max_requests = policy.max_requests(),
        key_prefix = policy.key_prefix(),
        trust_proxy = config.admission.trust_proxy,
        store_fallback = %fallback,
        "Configuration loaded"
    );

    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    let counter_store = store::connect(&config.store, clock.clone()).await?;
    info!(backend = counter_store.name(), "Counter store initialized");

    let accountant =
        WindowAccountant::new(counter_store.clone(), clock).with_timeout(config.store.timeout());
    let controller = AdmissionController::new(policy, fallback, accountant);
    let state = AppState {
        gate: Arc::new(AdmissionGate::new(controller, config.admission.trust_proxy)),
        store: counter_store,
    };

    HttpServer::new(config.server.listen_addr, state)
        .serve_with_shutdown(shutdown_signal())
        .await?;

    info!("Turnstile admission service stopped");
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
