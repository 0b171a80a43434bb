//! wa-check - WhatsApp number registration check API

use clap::Parser;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wa_check::{
    config::{Args, LogFormat},
    credentials::{CredentialStore, FileCredentialStore, MemoryCredentialStore},
    protocol::BridgeClient,
    server::{self, AppState},
    session::SessionManager,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    init_tracing(&args);

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  wa-check - WhatsApp registration API");
    info!(
        "  v{} ({})",
        env!("CARGO_PKG_VERSION"),
        option_env!("GIT_COMMIT_SHORT").unwrap_or("unknown")
    );
    info!("======================================");
    info!("Listen: {}", args.listen());
    info!("Bridge: {}", args.bridge_url);
    if args.ephemeral_session {
        info!("Session: in memory (pairing is lost on restart)");
    } else {
        info!("Session: {}", args.session_dir.display());
    }
    info!(
        "Lookup: {} attempt(s), {}ms backoff",
        args.lookup_max_attempts, args.lookup_backoff_ms
    );
    info!("======================================");

    let store: Arc<dyn CredentialStore> = if args.ephemeral_session {
        warn!("Ephemeral session enabled - the device must be paired again after restart");
        Arc::new(MemoryCredentialStore::new())
    } else {
        let store = FileCredentialStore::new(&args.session_dir);
        store.ensure_dir().await?;
        Arc::new(store)
    };

    let client = Arc::new(BridgeClient::new(
        args.bridge_url.clone(),
        args.bridge_options(),
    ));
    let (manager, session) = SessionManager::new(client, store, args.session_config());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let state = Arc::new(AppState::new(args, session));
    let mut server_task = tokio::spawn(server::run(state, shutdown_rx.clone()));
    let manager_task = manager.spawn(shutdown_rx);

    let early_exit = tokio::select! {
        _ = shutdown_signal() => {
            info!("Shutdown signal received");
            None
        }
        result = &mut server_task => Some(result),
    };

    let _ = shutdown_tx.send(true);

    let server_result = match early_exit {
        Some(result) => result,
        None => server_task.await,
    };

    if let Err(e) = manager_task.await {
        error!("Session manager task failed: {}", e);
    }

    server_result??;
    info!("wa-check stopped");
    Ok(())
}

fn init_tracing(args: &Args) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("wa_check={},info", args.log_level).into());
    let registry = tracing_subscriber::registry().with(filter);

    match args.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

/// Resolves on Ctrl-C, or SIGTERM on unix
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
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
