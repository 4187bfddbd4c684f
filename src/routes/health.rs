use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(root))
        .route("/live", get(live))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    database: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    database_latency_ms: Option<u64>,
    ai_configured: bool,
    timestamp: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LivenessResponse {
    status: &'static str,
    uptime: u64,
    version: &'static str,
    timestamp: String,
}

async fn root(State(state): State<AppState>) -> Response {
    let ping = state.db_proxy().ping().await;
    let (database, latency) = match ping {
        Ok(elapsed) => ("connected", Some(elapsed.as_millis() as u64)),
        Err(err) => {
            tracing::warn!(error = %err, "database health check failed");
            ("disconnected", None)
        }
    };
    let ok = latency.is_some();

    let response = HealthResponse {
        status: if ok { "ok" } else { "degraded" },
        database,
        database_latency_ms: latency,
        ai_configured: state.config().ai.api_key().is_some(),
        timestamp: now_iso(),
    };
    let status_code = if ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status_code, Json(response)).into_response()
}

async fn live(State(state): State<AppState>) -> Json<LivenessResponse> {
    Json(LivenessResponse {
        status: "healthy",
        uptime: state.uptime_seconds(),
        version: env!("CARGO_PKG_VERSION"),
        timestamp: now_iso(),
    })
}

fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
