use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use serde_json::Value;
use tracing::error;

use epistat_storage::TotalsRecord;

use crate::state::AppState;

/// `last_update` layout, without zone: timestamps are stored in UTC.
const LAST_UPDATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// ── Banner & Health ───────────────────────────────────────────────

pub async fn banner() -> &'static str {
    "epistat read API"
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ── Latest aggregate ──────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct GeneralResponse {
    pub confirmed: i64,
    pub recovered: i64,
    pub suspected: i64,
    pub deaths: i64,
    pub monitored: i64,
    pub last_update: String,
}

impl From<TotalsRecord> for GeneralResponse {
    fn from(row: TotalsRecord) -> Self {
        Self {
            confirmed: row.confirmed_cases,
            recovered: row.recovered_cases,
            suspected: row.suspected_cases,
            deaths: row.deaths,
            monitored: row.monitored_cases,
            last_update: row.updated.format(LAST_UPDATE_FORMAT).to_string(),
        }
    }
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Most recent aggregate row, or `{}` before the first ingestion.
pub async fn general(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Value>, (StatusCode, Json<ErrorResponse>)> {
    let latest = state.store.latest_totals().await.map_err(|e| {
        error!(error = %e, "failed to read latest totals");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                error: "failed to read latest totals".to_string(),
            }),
        )
    })?;

    let body = match latest {
        Some(row) => serde_json::to_value(GeneralResponse::from(row)).map_err(|e| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse { error: e.to_string() }),
            )
        })?,
        None => Value::Object(serde_json::Map::new()),
    };
    Ok(Json(body))
}
