use std::sync::Arc;

use sundesk_lib::state::{load_config, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    sundesk_lib::init_tracing();

    let config = load_config().map_err(|e| anyhow::anyhow!("Failed to load SunDesk config: {e}"))?;
    let state = AppState::initialize(config)
        .map_err(|e| anyhow::anyhow!("Failed to initialize services: {e}"))?;

    sundesk_lib::run(Arc::new(state), async {
        let _ = tokio::signal::ctrl_c().await;
        log::info!("Shutdown requested");
    })
    .await
}
