//! Happy Server
//!
//! Hosts persistent terminal sessions and serves them over WebSocket.

use anyhow::{Context, Result};
use clap::Parser;
use happy_server::config::ServerArgs;
use happy_server::{router, AppState};
use happy_session::{PtyBackend, SessionRegistry};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let args = ServerArgs::parse();

    let _guard = match init_logging(&args) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("[FATAL] Failed to initialize logging: {:#}", e);
            std::process::exit(1);
        }
    };

    info!("Starting Happy Server v{}", env!("CARGO_PKG_VERSION"));
    info!("PID: {}", std::process::id());

    if let Err(e) = run_server(args).await {
        error!("Server failed: {:#}", e);
        std::process::exit(1);
    }
}

/// Stderr logging, or a plain file under `--log-dir`
fn init_logging(args: &ServerArgs) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(args.log_filter()));

    let Some(log_dir) = &args.log_dir else {
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
        return Ok(None);
    };

    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory {:?}", log_dir))?;
    let file_appender = tracing_appender::rolling::never(log_dir, "server.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(Some(guard))
}

async fn run_server(args: ServerArgs) -> Result<()> {
    let store = args.state_store()?;
    let config = args.registry_config();
    info!(
        "Config: bind={}, state={:?}, command={}, grace={:?}",
        args.bind,
        store.path(),
        config.command.program,
        config.grace_period
    );

    let registry = SessionRegistry::new(Arc::new(PtyBackend::new()), store, config);
    registry.init().await;

    let shutdown = CancellationToken::new();

    // Periodic snapshot flush
    let flush_task = {
        let registry = registry.clone();
        let shutdown = shutdown.clone();
        let period = args.flush_interval();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => registry.flush().await,
                }
            }
        })
    };

    let app = router(AppState::new(registry.clone()));
    let listener = tokio::net::TcpListener::bind(args.bind)
        .await
        .with_context(|| format!("Failed to bind to {}", args.bind))?;
    info!("Server listening on {}", args.bind);

    let signal_task = {
        let registry = registry.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            wait_for_signal().await;
            info!("Shutdown signal received, saving sessions");
            let stopped = registry.shutdown().await;
            info!("Stopped {} sessions", stopped);
            shutdown.cancel();
        })
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .await
        .context("Server error")?;

    // Served until the socket failed rather than a signal
    if !shutdown.is_cancelled() {
        registry.shutdown().await;
        shutdown.cancel();
    }
    signal_task.abort();
    let _ = flush_task.await;

    info!("Happy Server stopped");
    Ok(())
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
