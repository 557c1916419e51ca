//! SunDesk sync layer: subscriber directory, relational mirror and ticket
//! writes behind the support console.

pub mod cache;
pub mod db;
pub mod error;
pub mod gateway;
pub mod mail;
mod migrations;
pub mod mirror;
pub mod resolver;
pub mod server;
pub mod state;
pub mod tabular;
pub mod types;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use state::AppState;

/// Install the global tracing subscriber. `log` records from the lower
/// layers are bridged into it. `SUNDESK_LOG_FORMAT=json` switches to JSON lines.
pub fn init_tracing() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    let json = std::env::var("SUNDESK_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let _ = if json {
        registry.with(tracing_subscriber::fmt::layer().json()).try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };
}

/// Start the background mirror poller, warm the subscriber cache, and serve
/// the trigger endpoint until `shutdown` resolves.
pub async fn run<F>(state: Arc<AppState>, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let poller_state = state.clone();
    tokio::spawn(async move {
        mirror::poller::run_mirror_poller(poller_state).await;
    });

    let cache_state = state.clone();
    tokio::spawn(async move {
        let entry = cache_state.subscribers.ensure_loaded().await;
        match &entry.error {
            Some(e) => log::warn!("Subscriber cache warm-up failed: {}", e),
            None => log::info!(
                "Subscriber cache warmed ({} subscribers, manual entry: {})",
                entry.subscribers.len(),
                entry.manual_entry
            ),
        }
    });

    let bind_addr = state.config.read().mirror.bind_addr.clone();
    let addr: SocketAddr = bind_addr
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid mirror.bindAddr {bind_addr}: {e}"))?;

    let router = server::build_router(state.trigger_state());
    let listener = tokio::net::TcpListener::bind(addr).await?;
    log::info!("Trigger endpoint listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
