// =============================================================================
// Central Application State — Signal Relay
// =============================================================================
//
// The explicitly owned aggregate shared across all async tasks via
// `Arc<AppState>`: runtime configuration, the signal registry (sole source of
// truth), and the viewer fanout. Also home of the wire snapshot types and the
// builder that turns the registry's current state into the message every
// broadcast path sends.
//
// The wire row is a separate type from the registry entry so that
// `last_update` can never leak to viewers.
// =============================================================================

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;

use crate::fanout::{ViewerFanout, ViewerId};
use crate::registry::{SignalEntry, SignalRegistry};
use crate::runtime_config::RuntimeConfig;
use crate::types::Timeframe;

// =============================================================================
// Wire snapshot types
// =============================================================================

/// One row of the transmitted signal table.
#[derive(Debug, Clone, Serialize)]
pub struct IndicatorRow {
    pub symbol: String,
    pub timeframe: Timeframe,
    #[serde(rename = "type")]
    pub trade_type: String,
    #[serde(rename = "H4")]
    pub h4_trend: String,
    #[serde(rename = "D1")]
    pub d1_trend: String,
    #[serde(rename = "validSince")]
    pub valid_since: String,
    pub min_lot: f64,
    pub min_margin: f64,
}

impl From<SignalEntry> for IndicatorRow {
    fn from(entry: SignalEntry) -> Self {
        Self {
            symbol: entry.symbol,
            timeframe: entry.timeframe,
            trade_type: entry.trade_type,
            h4_trend: entry.h4_trend,
            d1_trend: entry.d1_trend,
            valid_since: entry.valid_since.to_rfc3339(),
            min_lot: entry.min_lot,
            min_margin: entry.min_margin,
        }
    }
}

/// Full-state snapshot message pushed to viewers. Always a complete dump —
/// a missed broadcast is superseded by the next one, so no retry machinery
/// exists anywhere.
#[derive(Debug, Clone, Serialize)]
pub struct SignalsUpdate {
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    pub indicators: Vec<IndicatorRow>,
    pub count: usize,
    pub timestamp: String,
}

// =============================================================================
// AppState
// =============================================================================

/// Shared state for the whole relay.
pub struct AppState {
    pub runtime_config: Arc<RwLock<RuntimeConfig>>,
    pub registry: SignalRegistry,
    pub fanout: ViewerFanout,
    /// Instant the relay started. Used for uptime reporting.
    pub start_time: Instant,
}

impl AppState {
    /// Construct state from the given runtime configuration. The returned
    /// value is typically wrapped in `Arc` immediately.
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            runtime_config: Arc::new(RwLock::new(config)),
            registry: SignalRegistry::new(),
            fanout: ViewerFanout::new(),
            start_time: Instant::now(),
        }
    }

    /// Build the wire message from the registry's current snapshot.
    pub fn signals_update(&self) -> SignalsUpdate {
        let entries = self.registry.snapshot();
        SignalsUpdate {
            msg_type: "signals_update",
            count: entries.len(),
            indicators: entries.into_iter().map(IndicatorRow::from).collect(),
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    /// Push the current snapshot to every connected viewer.
    pub fn broadcast_signals(&self) {
        let update = self.signals_update();
        self.fanout.broadcast(&update);
    }

    /// Push the current snapshot to one viewer (connect-time hello and
    /// `get_signals` refresh replies).
    pub fn send_snapshot_to(&self, viewer: ViewerId) -> bool {
        let update = self.signals_update();
        self.fanout.send_to(viewer, &update)
    }
}

// =============================================================================
// Tests
// =============================================================================
