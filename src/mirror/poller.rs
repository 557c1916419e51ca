//! Background mirror poller.
//!
//! Runs the tabular → relational mirror every `pollIntervalMinutes`, or
//! immediately when `AppState::request_mirror_run` wakes it.

use std::sync::Arc;
use std::time::Duration;

use crate::state::AppState;

const STARTUP_DELAY: Duration = Duration::from_secs(10);
const DISABLED_RECHECK: Duration = Duration::from_secs(300);

pub async fn run_mirror_poller(state: Arc<AppState>) {
    // A wake during the startup delay runs the mirror right away.
    tokio::select! {
        _ = tokio::time::sleep(STARTUP_DELAY) => {},
        _ = state.mirror_wake.notified() => {
            log::info!("Mirror poller: woken during startup delay");
            run_once(&state).await;
        },
    }

    loop {
        let (enabled, poll_interval) = {
            let config = state.config.read();
            (config.mirror.enabled, config.mirror.poll_interval_minutes.max(1))
        };

        if !enabled {
            tokio::select! {
                _ = tokio::time::sleep(DISABLED_RECHECK) => {},
                _ = state.mirror_wake.notified() => {
                    log::info!("Mirror poller: woken by manual request (periodic runs disabled)");
                    run_once(&state).await;
                },
            }
            continue;
        }

        run_once(&state).await;

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(poll_interval as u64 * 60)) => {},
            _ = state.mirror_wake.notified() => {
                log::info!("Mirror poller: woken by manual request");
            },
        }
    }
}

async fn run_once(state: &AppState) {
    match state.run_mirror().await {
        Ok(stats) => {
            if let Some(partial) = stats.partial_failure() {
                log::warn!("Mirror poller: run completed with failures: {}", partial);
            }
        }
        Err(e) if e.is_configuration_missing() => {
            log::debug!("Mirror poller: tabular store not configured, skipping");
        }
        Err(e) => log::warn!("Mirror poller: run failed: {}", e),
    }
}
