// =============================================================================
// HTTP Endpoints — Axum 0.7
// =============================================================================
//
// `POST /` is the producer ingestion endpoint: an MT5 expert advisor (or any
// producer) submits signal / remove_signal events as JSON, distinguished by
// the `type` field. Malformed payloads and unknown event kinds are rejected
// with a 400 and never reach the registry.
//
// `GET /` serves the bundled dashboard page; everything else under `static/`
// is served as-is. `GET /ws` upgrades to the viewer WebSocket.
//
// CORS is configured permissively for development; tighten `allowed_origins`
// in production.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Json, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::{
    cors::{Any, CorsLayer},
    services::{ServeDir, ServeFile},
};
use tracing::warn;

use crate::app_state::AppState;
use crate::types::Timeframe;

// =============================================================================
// Router construction
// =============================================================================

/// Build the full router with CORS middleware, static assets, and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // ── Producers ───────────────────────────────────────────────
        .route(
            "/",
            post(ingest).get_service(ServeFile::new("static/index.html")),
        )
        // ── Viewers ─────────────────────────────────────────────────
        .route("/ws", get(crate::api::ws::ws_handler))
        // ── Operational ─────────────────────────────────────────────
        .route("/api/v1/health", get(health))
        .route("/api/v1/stats", get(stats))
        // ── Static assets ───────────────────────────────────────────
        .fallback_service(ServeDir::new("static"))
        // ── Middleware & State ──────────────────────────────────────
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// Producer events
// =============================================================================

/// Events a producer may submit, dispatched on the `type` field.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProducerEvent {
    Signal {
        symbol: String,
        timeframe: Timeframe,
        #[serde(default)]
        trade_type: Option<String>,
        #[serde(default)]
        h4_trend: Option<String>,
        #[serde(default)]
        d1_trend: Option<String>,
        #[serde(default)]
        min_lot: Option<f64>,
        #[serde(default)]
        min_margin: Option<f64>,
    },
    RemoveSignal {
        symbol: String,
        timeframe: Timeframe,
    },
}

#[derive(Debug, Serialize)]
struct IngestResponse {
    success: bool,
    message: &'static str,
}

fn bad_request(message: String) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({ "error": message })),
    )
}

/// Producer ingestion handler.
///
/// The `Result` extractor turns unparsable JSON and unknown event kinds into
/// our own 400 body instead of axum's plain-text rejection.
async fn ingest(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ProducerEvent>, JsonRejection>,
) -> Result<Json<IngestResponse>, (StatusCode, Json<serde_json::Value>)> {
    let Json(event) = payload.map_err(|rejection| {
        warn!(error = %rejection.body_text(), "producer event rejected");
        bad_request(rejection.body_text())
    })?;

    match event {
        ProducerEvent::Signal {
            symbol,
            timeframe,
            trade_type,
            h4_trend,
            d1_trend,
            min_lot,
            min_margin,
        } => {
            let symbol = symbol.trim().to_string();
            if symbol.is_empty() {
                return Err(bad_request("symbol must not be empty".to_string()));
            }

            state.registry.upsert(
                &symbol,
                timeframe,
                trade_type.as_deref(),
                h4_trend.as_deref(),
                d1_trend.as_deref(),
                min_lot.unwrap_or(0.0),
                min_margin.unwrap_or(0.0),
            );
            state.broadcast_signals();

            Ok(Json(IngestResponse {
                success: true,
                message: "Signal received",
            }))
        }

        ProducerEvent::RemoveSignal { symbol, timeframe } => {
            let symbol = symbol.trim().to_string();
            if symbol.is_empty() {
                return Err(bad_request("symbol must not be empty".to_string()));
            }

            // No broadcast on a no-op removal: viewers already hold this state.
            if state.registry.remove(&symbol, timeframe) {
                state.broadcast_signals();
            }

            Ok(Json(IngestResponse {
                success: true,
                message: "Signal removed",
            }))
        }
    }
}

// =============================================================================
// Health
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    signals: usize,
    viewers: usize,
    server_time: i64,
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        signals: state.registry.count(),
        viewers: state.fanout.viewer_count(),
        server_time: chrono::Utc::now().timestamp_millis(),
    })
}

// =============================================================================
// Stats (summary display data)
// =============================================================================

async fn stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let by_timeframe = state.registry.counts_by_timeframe();
    Json(serde_json::json!({
        "count": state.registry.count(),
        "by_timeframe": by_timeframe,
        "viewers": state.fanout.viewer_count(),
        "uptime_secs": state.start_time.elapsed().as_secs(),
    }))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_event_deserialises_with_optional_fields_missing() {
        let json = r#"{ "type": "signal", "symbol": "XAUUSD", "timeframe": "H1" }"#;
        let event: ProducerEvent = serde_json::from_str(json).unwrap();
        match event {
            ProducerEvent::Signal {
                symbol,
                timeframe,
                trade_type,
                min_lot,
                ..
            } => {
                assert_eq!(symbol, "XAUUSD");
                assert_eq!(timeframe, Timeframe::H1);
                assert!(trade_type.is_none());
                assert!(min_lot.is_none());
            }
            other => panic!("expected signal event, got {other:?}"),
        }
    }

    #[test]
    fn full_signal_event_deserialises() {
        let json = r#"{
            "type": "signal",
            "symbol": "XAUUSD",
            "timeframe": "H1",
            "trade_type": "BUY",
            "h4_trend": "up",
            "d1_trend": "down",
            "min_lot": 0.1,
            "min_margin": 50
        }"#;
        let event: ProducerEvent = serde_json::from_str(json).unwrap();
        match event {
            ProducerEvent::Signal {
                trade_type,
                h4_trend,
                d1_trend,
                min_lot,
                min_margin,
                ..
            } => {
                assert_eq!(trade_type.as_deref(), Some("BUY"));
                assert_eq!(h4_trend.as_deref(), Some("up"));
                assert_eq!(d1_trend.as_deref(), Some("down"));
                assert_eq!(min_lot, Some(0.1));
                assert_eq!(min_margin, Some(50.0));
            }
            other => panic!("expected signal event, got {other:?}"),
        }
    }

    #[test]
    fn remove_event_deserialises() {
        let json = r#"{ "type": "remove_signal", "symbol": "EURUSD", "timeframe": "M30" }"#;
        let event: ProducerEvent = serde_json::from_str(json).unwrap();
        assert!(matches!(
            event,
            ProducerEvent::RemoveSignal { timeframe: Timeframe::M30, .. }
        ));
    }

    #[test]
    fn unknown_event_kind_is_rejected() {
        let json = r#"{ "type": "resync_all", "symbol": "EURUSD" }"#;
        let err = serde_json::from_str::<ProducerEvent>(json).unwrap_err();
        assert!(err.to_string().contains("unknown variant"));
    }

    #[test]
    fn unknown_timeframe_is_rejected() {
        let json = r#"{ "type": "signal", "symbol": "EURUSD", "timeframe": "H2" }"#;
        assert!(serde_json::from_str::<ProducerEvent>(json).is_err());
    }

    #[test]
    fn missing_required_fields_are_rejected() {
        let json = r#"{ "type": "signal", "timeframe": "H1" }"#;
        assert!(serde_json::from_str::<ProducerEvent>(json).is_err());
        let json = r#"{ "type": "remove_signal", "symbol": "EURUSD" }"#;
        assert!(serde_json::from_str::<ProducerEvent>(json).is_err());
    }

    fn recv_update(rx: &mut tokio::sync::mpsc::UnboundedReceiver<axum::extract::ws::Message>) -> serde_json::Value {
        match rx.try_recv().unwrap() {
            axum::extract::ws::Message::Text(json) => serde_json::from_str(&json).unwrap(),
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn signal_then_removal_round_trips_to_viewers() {
        let state = Arc::new(AppState::new(crate::runtime_config::RuntimeConfig::default()));
        let (_id, mut rx) = state.fanout.register();

        let event: ProducerEvent = serde_json::from_str(
            r#"{ "type": "signal", "symbol": "XAUUSD", "timeframe": "H1",
                 "trade_type": "BUY", "h4_trend": "up", "d1_trend": "down",
                 "min_lot": 0.1, "min_margin": 50 }"#,
        )
        .unwrap();
        let resp = ingest(State(state.clone()), Ok(Json(event))).await.unwrap();
        assert!(resp.0.success);

        let update = recv_update(&mut rx);
        assert_eq!(update["count"], 1);
        let row = &update["indicators"][0];
        assert_eq!(row["symbol"], "XAUUSD");
        assert_eq!(row["timeframe"], "H1");
        assert_eq!(row["type"], "BUY");
        assert_eq!(row["H4"], "up");
        assert_eq!(row["D1"], "down");
        assert_eq!(row["min_lot"], 0.1);
        assert_eq!(row["min_margin"], 50.0);

        // Removing the key drops the count to zero for every viewer.
        let event: ProducerEvent = serde_json::from_str(
            r#"{ "type": "remove_signal", "symbol": "XAUUSD", "timeframe": "H1" }"#,
        )
        .unwrap();
        ingest(State(state.clone()), Ok(Json(event))).await.unwrap();

        let update = recv_update(&mut rx);
        assert_eq!(update["count"], 0);
        assert!(update["indicators"].as_array().unwrap().is_empty());

        // Removing it again is a no-op and triggers no broadcast.
        let event: ProducerEvent = serde_json::from_str(
            r#"{ "type": "remove_signal", "symbol": "XAUUSD", "timeframe": "H1" }"#,
        )
        .unwrap();
        let resp = ingest(State(state), Ok(Json(event))).await.unwrap();
        assert!(resp.0.success);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn blank_symbol_is_rejected_before_the_registry() {
        let state = Arc::new(AppState::new(crate::runtime_config::RuntimeConfig::default()));
        let event: ProducerEvent = serde_json::from_str(
            r#"{ "type": "signal", "symbol": "   ", "timeframe": "H1" }"#,
        )
        .unwrap();
        let err = ingest(State(state.clone()), Ok(Json(event))).await.unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
        assert_eq!(state.registry.count(), 0);
    }
}
