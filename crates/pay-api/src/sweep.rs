//! Background expiry of pending payments the gateway never captured.

use crate::state::AppState;
use tracing::{error, info};

/// Periodically fail pending payments older than `PENDING_TTL_HOURS`.
///
/// Returns `None` (and spawns nothing) when no TTL is configured.
pub fn spawn_pending_sweep(state: AppState) -> Option<tokio::task::JoinHandle<()>> {
    let max_age = state.config.pending_ttl()?;
    let every = std::time::Duration::from_secs(state.config.sweep_interval_secs);

    info!(
        ttl_hours = max_age.num_hours(),
        interval_secs = every.as_secs(),
        "Pending payment sweep enabled"
    );

    Some(tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            if let Err(err) = state.workflow.expire_stale_pending(max_age).await {
                error!(error = %err, "pending payment sweep failed");
            }
        }
    }))
}
