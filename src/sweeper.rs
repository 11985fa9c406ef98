// =============================================================================
// Expiry Sweeper — periodic eviction of stale signals
// =============================================================================
//
// A producer that stops refreshing a key is presumed gone; its entry is
// evicted once `now - last_update` exceeds the configured timeout, and viewers
// are told via a fresh broadcast. Runs for the process lifetime.
//
// One sweep at a time: each tick performs a single synchronous pass under the
// registry lock, and `MissedTickBehavior::Delay` keeps a long pass from being
// followed by a burst of catch-up ticks.
// =============================================================================

use std::sync::Arc;

use chrono::Utc;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::info;

use crate::app_state::AppState;

/// One sweep pass: expire everything older than the configured timeout as of
/// `now_ms`, broadcasting only when something was actually evicted. Returns
/// the number of evicted entries.
pub fn sweep_once(state: &AppState, now_ms: i64) -> usize {
    let timeout_ms = state.runtime_config.read().signal_timeout_ms as i64;
    let removed = state.registry.expire_older_than(timeout_ms, now_ms);

    if !removed.is_empty() {
        info!(
            removed = removed.len(),
            remaining = state.registry.count(),
            "expired stale signals"
        );
        state.broadcast_signals();
    }
    removed.len()
}

/// Recurring sweep loop. The timeout is re-read from config on every tick so
/// it stays adjustable without a restart.
pub async fn run_sweeper(state: Arc<AppState>) {
    let sweep_interval_ms = state.runtime_config.read().sweep_interval_ms;
    info!(
        sweep_interval_ms,
        signal_timeout_ms = state.runtime_config.read().signal_timeout_ms,
        "expiry sweeper started"
    );

    let mut ticker = interval(Duration::from_millis(sweep_interval_ms));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        sweep_once(&state, Utc::now().timestamp_millis());
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime_config::RuntimeConfig;
    use crate::types::Timeframe;

    #[test]
    fn sweep_evicts_only_stale_entries_and_broadcasts_once() {
        let state = AppState::new(RuntimeConfig::default());
        let timeout = state.runtime_config.read().signal_timeout_ms as i64;

        state
            .registry
            .upsert("STALE", Timeframe::H1, Some("BUY"), None, None, 0.0, 0.0);
        let stale = state.registry.get("STALE", Timeframe::H1).unwrap();

        // Ensure the fresh entry's last_update lands measurably later.
        std::thread::sleep(std::time::Duration::from_millis(10));
        state
            .registry
            .upsert("FRESH", Timeframe::H1, Some("SELL"), None, None, 0.0, 0.0);
        let fresh = state.registry.get("FRESH", Timeframe::H1).unwrap();
        assert!(fresh.last_update > stale.last_update);

        let (_id, mut rx) = state.fanout.register();

        // A `now` that puts STALE just past the limit and FRESH inside it.
        let now = stale.last_update + timeout + 1;
        assert!(now - fresh.last_update <= timeout);

        let evicted = sweep_once(&state, now);
        assert_eq!(evicted, 1);
        assert!(state.registry.get("STALE", Timeframe::H1).is_none());
        assert!(state.registry.get("FRESH", Timeframe::H1).is_some());

        // Exactly one broadcast, carrying the post-eviction state.
        let msg = rx.try_recv().unwrap();
        let json = match msg {
            axum::extract::ws::Message::Text(json) => json,
            other => panic!("expected text frame, got {other:?}"),
        };
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["count"], 1);
        assert_eq!(value["indicators"][0]["symbol"], "FRESH");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn sweep_with_nothing_stale_stays_silent() {
        let state = AppState::new(RuntimeConfig::default());
        state
            .registry
            .upsert("EURUSD", Timeframe::H1, Some("BUY"), None, None, 0.0, 0.0);
        let (_id, mut rx) = state.fanout.register();

        let evicted = sweep_once(&state, Utc::now().timestamp_millis());
        assert_eq!(evicted, 0);
        assert_eq!(state.registry.count(), 1);
        assert!(rx.try_recv().is_err());
    }
}
