// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use swb_manager::pull::{register_pull_jobs, spawn_scheduled_task_feeder};
use swb_manager::{ManagerSettings, ManagerState, build_app};
use swb_pool::StaticProvisioner;
use swb_store::MemoryStore;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "swb-manager", version, about = "Switchboard executor manager")]
struct Args {
    /// Bind address, overriding MANAGER_HOST/MANAGER_PORT.
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
        EnvFilter::new("swb=debug,swb_manager=debug,info")
    } else {
        let default_level =
            std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let settings = ManagerSettings::from_env();
    let bind = args
        .bind
        .unwrap_or_else(|| format!("{}:{}", settings.host, settings.port));

    std::fs::create_dir_all(&settings.workspace_root).with_context(|| {
        format!("create workspace root {}", settings.workspace_root.display())
    })?;

    let store = Arc::new(MemoryStore::new());
    let provisioner = Arc::new(StaticProvisioner::new(settings.executor_url.clone()));
    let state = ManagerState::new(settings.clone(), store, provisioner);

    let mut jobs = Vec::new();
    if settings.task_pull_enabled {
        jobs.extend(register_pull_jobs(&state.pull));
        info!(job_count = jobs.len(), "pull jobs registered");
    }
    if settings.scheduled_tasks_enabled {
        jobs.push(spawn_scheduled_task_feeder(
            state.pull.clone(),
            state.backend.clone(),
            settings.scheduled_tasks_dispatch_interval_seconds,
            settings.scheduled_tasks_dispatch_batch_size,
        ));
    }
    // Retry container deletes that failed inline.
    {
        let pool = state.pool.clone();
        jobs.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(60));
            loop {
                ticker.tick().await;
                pool.run_delete_sweep().await;
            }
        }));
    }
    if settings.workspace_cleanup_enabled {
        let layout = state.layout.clone();
        jobs.push(tokio::spawn(async move {
            let retention = Duration::from_secs(7 * 24 * 3600);
            let mut ticker = tokio::time::interval(Duration::from_secs(3600));
            loop {
                ticker.tick().await;
                let layout = layout.clone();
                let _ = tokio::task::spawn_blocking(move || {
                    swb_manager::workspace_local::cleanup_idle(&layout, retention)
                })
                .await;
            }
        }));
    }

    let pull = state.pull.clone();
    let app = build_app(state);
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("bind {bind}"))?;
    info!(bind = %bind, worker_id = %pull.worker_id(), "swb-manager listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("serve")?;

    pull.shutdown().await;
    for job in jobs {
        job.abort();
    }
    Ok(())
}
