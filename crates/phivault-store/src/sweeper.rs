//! Background expiry sweeper.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::vault::Vault;

/// Sweep expired entries every `period` until `cancel` fires.
///
/// On cancellation the vault is emptied when `store.clear_on_shutdown` is set.
pub fn spawn_sweeper(vault: Vault, period: Duration, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    if vault.config().store.clear_on_shutdown {
                        let cleared = vault.clear_all(None);
                        tracing::info!(cleared, "sweeper stopped, vault cleared");
                    } else {
                        tracing::info!("sweeper stopped");
                    }
                    break;
                }
                _ = ticker.tick() => {
                    let swept = vault.sweep_expired();
                    if swept > 0 {
                        tracing::debug!(swept, "periodic sweep");
                    }
                }
            }
        }
    })
}
