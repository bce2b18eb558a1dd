//! Entry point: parse the CLI, build the shared node-graph
//! handles, apply any static backend overlay, start the optional
//! diagnostics HTTP endpoint and background clone GC, then mount and wait
//! for a shutdown signal.
//!
//! Tracing/Sentry/dotenv setup follows the ambient stack this crate's
//! dependencies carry (no `tracing_tree`, no GitHub/VM-manager wiring).

mod backend;
mod cache;
mod config;
mod diagnostics;
mod error;
mod format;
mod fs;
mod mount;
mod projector;
mod state;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use dotenvy::dotenv;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::{Cli, StaticConfig};
use crate::fs::filesystem::WATCHDOG_DEADLINE;
use crate::fs::shared::FsShared;
use crate::state::{StateStore, DEFAULT_BACKEND_NAME};

fn init_tracing(sentry_dsn_env: Option<&str>) -> Option<sentry::ClientInitGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("shelleyfs=info,fuser=warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(sentry::integrations::tracing::layer().event_filter(|metadata| match *metadata.level() {
            tracing::Level::ERROR => sentry::integrations::tracing::EventFilter::Event,
            tracing::Level::WARN | tracing::Level::INFO => sentry::integrations::tracing::EventFilter::Breadcrumb,
            _ => sentry::integrations::tracing::EventFilter::Ignore,
        }))
        .init();

    let dsn = sentry_dsn_env.and_then(|var| std::env::var(var).ok()).filter(|v| !v.is_empty())?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            send_default_pii: false,
            traces_sample_rate: 0.0,
            ..Default::default()
        },
    )))
}

/// Apply any `[[backend]]` entries from `--config`, then `--backend-url`, on
/// top of the loaded state: CLI flags win over file values where both are
/// given, and the overlay only *predeclares* backends, never
/// clobbering conversation history already tracked under a name (tolerating
/// `Exists` from a prior run).
fn apply_overlay(state: &StateStore, cli: &Cli) -> Result<()> {
    if let Some(config_path) = &cli.config {
        let overlay = StaticConfig::load(config_path)?;
        for entry in &overlay.backend {
            if entry.name == DEFAULT_BACKEND_NAME {
                state.set_backend_url(DEFAULT_BACKEND_NAME, &entry.url).context("setting default backend url from config")?;
            } else {
                match state.add_backend(&entry.name, &entry.url) {
                    Ok(()) | Err(error::FsError::Exists(_)) => {}
                    Err(e) => return Err(e.into()),
                }
            }
            if entry.is_default {
                state.set_default_backend(&entry.name).context("setting default backend from config")?;
            }
        }
    }

    if let Some(url) = &cli.backend_url {
        state.set_backend_url(DEFAULT_BACKEND_NAME, url).context("setting default backend url")?;
    }

    Ok(())
}

/// Periodically drop uncommitted conversation clones past `timeout`.
async fn run_clone_gc(shared: Arc<FsShared>, timeout: Duration) {
    let chrono_timeout = chrono::Duration::from_std(timeout).unwrap_or_else(|_| chrono::Duration::hours(1));
    let mut ticker = tokio::time::interval(Duration::from_secs(60).min(timeout.max(Duration::from_secs(1))));
    loop {
        ticker.tick().await;
        match shared.state.gc_uncommitted(chrono_timeout) {
            Ok(0) => {}
            Ok(n) => tracing::info!(removed = n, "garbage collected uncommitted conversation clones"),
            Err(e) => tracing::warn!(error = %e, "clone gc failed"),
        }
    }
}

/// Periodically log any in-flight operation approaching the watchdog
/// deadline.
async fn run_watchdog(shared: Arc<FsShared>) {
    let mut ticker = tokio::time::interval(Duration::from_secs(5));
    loop {
        ticker.tick().await;
        shared.diagnostics.warn_near_deadline(WATCHDOG_DEADLINE, crate::fs::filesystem::WATCHDOG_MARGIN);
    }
}

async fn run_diagnostics_server(shared: Arc<FsShared>, addr: String) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(&addr).await.with_context(|| format!("binding diagnostics endpoint at {addr}"))?;
    tracing::info!(%addr, "diagnostics endpoint listening");
    let app = diagnostics::router(shared.diagnostics.clone());
    axum::serve(listener, app).await.context("diagnostics server failed")
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let cli = Cli::parse();
    let _sentry_guard = init_tracing(cli.sentry_dsn_env.as_deref());

    let state = StateStore::load(cli.state_file_path()).context("loading state store")?;
    apply_overlay(&state, &cli)?;

    let shared = FsShared::new(state, cli.cache_ttl(), cli.clone_timeout(), cli.diagnostics_addr.is_some(), cli.mountpoint.clone());

    if let Some(addr) = cli.diagnostics_addr.clone() {
        let shared = shared.clone();
        tokio::spawn(async move {
            if let Err(e) = run_diagnostics_server(shared, addr).await {
                tracing::error!(error = %e, "diagnostics server exited");
            }
        });
    }

    tokio::spawn(run_clone_gc(shared.clone(), cli.clone_timeout()));
    tokio::spawn(run_watchdog(shared.clone()));

    let session = mount::mount(shared.clone(), tokio::runtime::Handle::current())?;
    tracing::info!(mountpoint = %cli.mountpoint.display(), "shelleyfs mounted");

    tokio::signal::ctrl_c().await.context("waiting for shutdown signal")?;
    tracing::info!("shutting down, unmounting");
    drop(session);

    Ok(())
}
