//! Application entry point for the `wsn-monitor` service.
//!
//! This binary orchestrates the full startup sequence for the live monitor,
//! including:
//! - Loading configuration from environment variables or `.env`
//! - Initializing structured logging/tracing
//! - Logging in to the WSN backend
//! - Loading the initial alert, node, threshold and topology snapshots
//! - Starting the push channel and the reconciler's push pump
//! - Periodically refetching the current alert page
//! - Binding the Axum HTTP server for the local read API
//!
//! # Environment Variables
//! - `API_URL` (**required**) – backend base URL
//! - `MONITOR_USERNAME` / `MONITOR_PASSWORD` (**required**) – credentials
//! - `MONITOR_LOG_LEVEL` (optional) – log verbosity (default: `debug`)
//! - `MONITOR_SPAN_EVENTS` (optional) – span event mode for tracing
//!
//! See `config.rs` for the remaining tunables.
use std::{env, net::SocketAddr, sync::Arc};

use anyhow::Result;
use dotenvy::dotenv;
use is_terminal::IsTerminal;
use tokio::sync::{mpsc, watch};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

use wsn_monitor::{
    config, routes, AlertFilter, HttpDataService, PushChannel, Reconciler, SessionState,
};

// ---

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    init_tracing();
    dotenv().ok();

    let cfg = config::load_from_env()?;
    cfg.log_config();

    let service = Arc::new(HttpDataService::new(cfg.api_url.as_str(), cfg.request_timeout)?);
    service
        .login(&cfg.username, &cfg.password)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to log in to '{}': {}", cfg.api_url, e))?;

    let reconciler = Arc::new(Reconciler::new(Arc::clone(&service), cfg.policy.clone()));

    // Initial snapshots. Failures are logged by the reconciler and the views
    // start out in their failed/empty state.
    let alerts = reconciler.load_alerts(AlertFilter::pending(), 0, cfg.page_size);
    let nodes = reconciler.load_nodes(0, cfg.page_size);
    let thresholds = reconciler.load_thresholds(0, cfg.page_size);
    let (_, _, _, topology) = tokio::join!(alerts, nodes, thresholds, reconciler.load_topology());
    if let Err(e) = topology {
        tracing::warn!("Initial topology fetch failed: {}", e);
    }

    // Push channel -> reconciler
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (events_tx, events_rx) = mpsc::channel(1024);

    let channel = PushChannel::new(
        cfg.push_url.clone(),
        cfg.push_reconnect_delay,
        cfg.push_keepalive,
    );
    tokio::spawn(channel.run(Arc::clone(&service), events_tx, shutdown_rx.clone()));

    let pump = Arc::clone(&reconciler);
    tokio::spawn(async move { pump.run_push_loop(events_rx).await });

    tokio::spawn(refetch_loop(
        Arc::clone(&reconciler),
        cfg.refetch_interval,
        shutdown_rx,
    ));

    // Session expiry stops the background tasks; the read API stays up and
    // reports the expired session.
    let mut revisions = reconciler.subscribe();
    let expiry_shutdown = shutdown_tx.clone();
    tokio::spawn(async move {
        while revisions.changed().await.is_ok() {
            let session = revisions.borrow().session;
            if session != SessionState::Active {
                tracing::error!("Session {:?}, stopping live updates", session);
                let _ = expiry_shutdown.send(true);
                break;
            }
        }
    });

    // Build app from routes gateway (EMBP)
    let app = routes::router(Arc::clone(&reconciler), cfg.page_size);

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.listen_port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
        })
        .await?;

    tracing::info!("Shutting down");
    let _ = shutdown_tx.send(true);
    service.logout().await;
    reconciler.teardown().await;

    Ok(())
}

// ---

/// Re-issue the current alert request on a fixed interval so optimistic
/// patches get reconciled against the server's truth.
async fn refetch_loop(
    reconciler: Arc<Reconciler<Arc<HttpDataService>>>,
    interval: std::time::Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    // ---
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Some(outcome) = reconciler.refetch_alerts().await {
                    if let Some(e) = outcome.error() {
                        tracing::debug!("Alert refetch failed: {}", e);
                    }
                }
            }
            _ = shutdown.changed() => break,
        }
    }
}

/// Initialize the global tracing subscriber for structured logging.
///
/// This function configures the [`tracing_subscriber`] with:
/// - Log target, file, and line number output enabled
/// - Color output controlled by TTY detection and `FORCE_COLOR` env var:
///   - `FORCE_COLOR=1|true|yes`: force colors on
///   - `FORCE_COLOR=0|false|no`: force colors off
///   - unset or other values: auto-detect TTY
/// - Span event emission mode controlled by the `MONITOR_SPAN_EVENTS` env var:
///   - `"full"`       : emit ENTER, EXIT, and CLOSE events with timing
///   - `"enter_exit"` : emit ENTER and EXIT only
///   - unset or other values: emit CLOSE events only (default)
/// - Log level controlled by the `MONITOR_LOG_LEVEL` env var
///
/// This should be called once at application startup before any logging
/// or tracing macros are invoked.
fn init_tracing() {
    // ---
    let span_events = match env::var("MONITOR_SPAN_EVENTS").as_deref() {
        Ok("full") => FmtSpan::FULL,
        Ok("enter_exit") => FmtSpan::ENTER | FmtSpan::EXIT,
        _ => FmtSpan::CLOSE,
    };

    // Determine if we should use colors
    let use_color = match env::var("FORCE_COLOR").as_deref() {
        Ok("1") | Ok("true") | Ok("yes") => true,
        Ok("0") | Ok("false") | Ok("no") => false,
        _ => std::io::stdout().is_terminal(),
    };

    // Use RUST_LOG if available, otherwise fall back to MONITOR_LOG_LEVEL
    let env_filter = if env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match env::var("MONITOR_LOG_LEVEL").ok().as_deref() {
            Some("trace") => "trace",
            Some("debug") => "debug",
            Some("info") => "info",
            Some("warn") => "warn",
            Some("error") => "error",
            _ => "debug",
        };
        EnvFilter::new(format!("{level},hyper=warn,reqwest=warn,tungstenite=warn"))
    };

    tracing_subscriber::fmt()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(span_events)
        .with_env_filter(env_filter)
        .with_ansi(use_color)
        .compact()
        .init();
}
