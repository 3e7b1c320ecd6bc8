// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use swb_backend::imports::{ArchiveImporter, SkillImporter, run_import_worker};
use swb_backend::{AppState, BackendSettings, Database, build_app, tasks};
use swb_store::MemoryStore;
use tokio::sync::Notify;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "swb-backend", version, about = "Switchboard backend service")]
struct Args {
    /// Bind address, overriding BACKEND_HOST/BACKEND_PORT.
    #[arg(long)]
    bind: Option<String>,

    /// Enable debug logging.
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.debug {
        EnvFilter::new("swb=debug,swb_backend=debug,info")
    } else {
        let default_level =
            std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let settings = BackendSettings::from_env();
    let bind = args
        .bind
        .unwrap_or_else(|| format!("{}:{}", settings.host, settings.port));

    let db = Arc::new(Database::new());
    let store = Arc::new(MemoryStore::new());
    let state = AppState::new(db.clone(), store.clone(), settings.clone());

    let sweep = tasks::spawn_recovery_sweep(
        db.clone(),
        Duration::from_secs(settings.lease_sweep_interval_seconds.max(1)),
    );

    let importer: Arc<dyn SkillImporter> = Arc::new(ArchiveImporter::new(store));
    let import_shutdown = Arc::new(Notify::new());
    let import_worker = tokio::spawn(run_import_worker(
        db.clone(),
        state.fanout.clone(),
        importer,
        state.import_wakeup.clone(),
        import_shutdown.clone(),
    ));

    let app = build_app(state);
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("bind {bind}"))?;
    info!(bind = %bind, "swb-backend listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("serve")?;

    import_shutdown.notify_waiters();
    let _ = import_worker.await;
    sweep.abort();
    Ok(())
}
