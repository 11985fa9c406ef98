// =============================================================================
// Signal Registry — latest known state per (symbol, timeframe)
// =============================================================================
//
// Life-cycle of an entry:
//   created on the first signal event for a new key
//     -> overwritten in place on every later event for the same key
//     -> destroyed by an explicit remove event or by the expiry sweep
//
// `valid_since` is set once at creation and never touched again; it answers
// "how long has this key been continuously valid", not "when last refreshed".
// `last_update` exists only for expiry comparison and is never transmitted.
//
// Thread-safety: the map lives behind a single `parking_lot::RwLock`, so all
// mutations serialize and `snapshot` observes a consistent point-in-time view.
// =============================================================================

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::info;

use crate::types::Timeframe;

// ---------------------------------------------------------------------------
// Key & entry model
// ---------------------------------------------------------------------------

/// Identity of a signal: one instrument at one interval.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SignalKey {
    pub symbol: String,
    pub timeframe: Timeframe,
}

impl SignalKey {
    pub fn new(symbol: impl Into<String>, timeframe: Timeframe) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe,
        }
    }
}

impl std::fmt::Display for SignalKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}|{}", self.symbol, self.timeframe)
    }
}

/// Latest known state for one key.
#[derive(Debug, Clone)]
pub struct SignalEntry {
    pub symbol: String,
    pub timeframe: Timeframe,
    /// Directional label, upper-cased. Derived when the producer omits it.
    pub trade_type: String,
    /// H4 trend description; "-" when the producer sent none.
    pub h4_trend: String,
    /// D1 trend description; "-" when the producer sent none.
    pub d1_trend: String,
    pub min_lot: f64,
    pub min_margin: f64,
    /// Set once at creation; immutable across upserts to the same key.
    pub valid_since: DateTime<Utc>,
    /// Epoch milliseconds of the last create/update. Expiry comparison only.
    pub last_update: i64,
}

impl SignalEntry {
    pub fn key(&self) -> SignalKey {
        SignalKey::new(self.symbol.clone(), self.timeframe)
    }
}

/// Whether an upsert created a fresh entry or refreshed an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
}

/// Placeholder value used for trend fields the producer left blank.
const UNKNOWN_TREND: &str = "-";

/// Normalize the producer's trade type, deriving a default when absent.
///
/// Absent means: missing, empty, blank after trimming, or the literal "-".
/// The fallback keys off the symbol only: "crash" instruments default to BUY,
/// everything else to SELL.
fn normalize_trade_type(symbol: &str, raw: Option<&str>) -> String {
    match raw.map(str::trim) {
        Some(t) if !t.is_empty() && t != UNKNOWN_TREND => t.to_uppercase(),
        _ => {
            if symbol.to_lowercase().contains("crash") {
                "BUY".to_string()
            } else {
                "SELL".to_string()
            }
        }
    }
}

fn normalize_trend(raw: Option<&str>) -> String {
    match raw.map(str::trim) {
        Some(t) if !t.is_empty() => t.to_string(),
        _ => UNKNOWN_TREND.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Thread-safe owner of all active signals. The single source of truth —
/// callers must never cache a separate copy of its contents.
pub struct SignalRegistry {
    entries: RwLock<HashMap<SignalKey, SignalEntry>>,
}

impl SignalRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    // -------------------------------------------------------------------------
    // Mutations
    // -------------------------------------------------------------------------

    /// Insert or refresh the entry for `(symbol, timeframe)`.
    ///
    /// On first sight of the key a new entry is created with
    /// `valid_since = now`. On refresh every mutable field is overwritten and
    /// `last_update` advances; `valid_since` is left untouched.
    pub fn upsert(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        trade_type: Option<&str>,
        h4_trend: Option<&str>,
        d1_trend: Option<&str>,
        min_lot: f64,
        min_margin: f64,
    ) -> UpsertOutcome {
        let key = SignalKey::new(symbol, timeframe);
        let trade_type = normalize_trade_type(symbol, trade_type);
        let h4_trend = normalize_trend(h4_trend);
        let d1_trend = normalize_trend(d1_trend);
        let now_ms = Utc::now().timestamp_millis();

        let mut entries = self.entries.write();
        match entries.get_mut(&key) {
            Some(existing) => {
                existing.trade_type = trade_type;
                existing.h4_trend = h4_trend;
                existing.d1_trend = d1_trend;
                existing.min_lot = min_lot;
                existing.min_margin = min_margin;
                existing.last_update = existing.last_update.max(now_ms);
                info!(key = %key, trade_type = %existing.trade_type, "signal updated");
                UpsertOutcome::Updated
            }
            None => {
                info!(key = %key, trade_type = %trade_type, "new signal");
                entries.insert(
                    key.clone(),
                    SignalEntry {
                        symbol: symbol.to_string(),
                        timeframe,
                        trade_type,
                        h4_trend,
                        d1_trend,
                        min_lot,
                        min_margin,
                        valid_since: Utc::now(),
                        last_update: now_ms,
                    },
                );
                UpsertOutcome::Created
            }
        }
    }

    /// Delete the entry for `(symbol, timeframe)` if present.
    ///
    /// Returns whether a deletion occurred; removing an absent key is a no-op,
    /// not an error.
    pub fn remove(&self, symbol: &str, timeframe: Timeframe) -> bool {
        let key = SignalKey::new(symbol, timeframe);
        let removed = self.entries.write().remove(&key).is_some();
        if removed {
            info!(key = %key, "signal removed");
        }
        removed
    }

    /// Remove every entry with `now_ms - last_update > timeout_ms` and return
    /// the removed keys so the caller can decide whether to broadcast.
    pub fn expire_older_than(&self, timeout_ms: i64, now_ms: i64) -> Vec<SignalKey> {
        let mut removed = Vec::new();
        let mut entries = self.entries.write();
        entries.retain(|key, entry| {
            if now_ms - entry.last_update > timeout_ms {
                removed.push(key.clone());
                false
            } else {
                true
            }
        });
        drop(entries);

        for key in &removed {
            info!(key = %key, "signal expired");
        }
        removed
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// All current entries, sorted by symbol ascending with ties broken by
    /// timeframe. Every transmitted view uses this ordering.
    pub fn snapshot(&self) -> Vec<SignalEntry> {
        let mut entries: Vec<SignalEntry> = self.entries.read().values().cloned().collect();
        entries.sort_by(|a, b| {
            a.symbol
                .cmp(&b.symbol)
                .then(a.timeframe.cmp(&b.timeframe))
        });
        entries
    }

    /// Number of active signals.
    pub fn count(&self) -> usize {
        self.entries.read().len()
    }

    /// Active signal counts grouped by timeframe, for the summary display.
    pub fn counts_by_timeframe(&self) -> BTreeMap<Timeframe, usize> {
        let entries = self.entries.read();
        let mut counts = BTreeMap::new();
        for entry in entries.values() {
            *counts.entry(entry.timeframe).or_insert(0) += 1;
        }
        counts
    }

    /// Look up a single entry by key (clone-out).
    pub fn get(&self, symbol: &str, timeframe: Timeframe) -> Option<SignalEntry> {
        let key = SignalKey::new(symbol, timeframe);
        self.entries.read().get(&key).cloned()
    }
}

impl Default for SignalRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SignalRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalRegistry")
            .field("entries", &self.entries.read().len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
