// GET/PUT handlers: version, counters, interfaces, status, latest sample, interval

use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::AppState;
use crate::capture::{CaptureState, CaptureStats};
use crate::models::ClassificationCounters;
use crate::resolver::ResolverStatsSnapshot;
use crate::version::{NAME, VERSION};

/// GET /version: returns service name and version (from Cargo.toml at build time).
pub(super) async fn version_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "name": NAME,
        "version": VERSION,
    }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CountersResponse {
    /// Traffic since the last sample, per interface. Reading does not reset it.
    current: BTreeMap<String, ClassificationCounters>,
    lifetime: BTreeMap<String, ClassificationCounters>,
    lifetime_totals: ClassificationCounters,
}

/// GET /api/counters: read-only view of the counter store.
pub(super) async fn counters_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(CountersResponse {
        current: state.store.peek(),
        lifetime: state.store.lifetime(),
        lifetime_totals: state.store.lifetime_totals(),
    })
}

/// GET /api/interfaces: adapters as currently enumerated by the OS.
pub(super) async fn interfaces_handler(State(state): State<AppState>) -> Response {
    match state.interface_repo.list_interfaces().await {
        Ok(list) => Json(list).into_response(),
        Err(e) => {
            tracing::warn!(error = %e, operation = "list_interfaces", "interface listing failed");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    capture_state: Option<CaptureState>,
    capture_stats: Option<CaptureStats>,
    capture_error: Option<String>,
    resolver: Option<ResolverStatsSnapshot>,
    interval_secs: u32,
}

/// GET /api/status: capture and resolver health.
pub(super) async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    let capture = state.capture.as_deref();
    Json(StatusResponse {
        capture_state: capture.map(|c| c.state()),
        capture_stats: capture.map(|c| c.stats()),
        capture_error: capture.and_then(|c| c.last_error()),
        resolver: state.resolver_stats.as_ref().map(|s| s.snapshot()),
        interval_secs: state.interval.get(),
    })
}

/// GET /api/samples/latest: last emitted sample, 404 before the first tick.
pub(super) async fn latest_sample_handler(State(state): State<AppState>) -> Response {
    let latest = state.latest.borrow().clone();
    match latest {
        Some(sample) => Json(sample).into_response(),
        None => (StatusCode::NOT_FOUND, "no sample yet").into_response(),
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct IntervalBody {
    interval_secs: i64,
}

/// GET /api/interval
pub(super) async fn get_interval_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(IntervalBody {
        interval_secs: state.interval.get() as i64,
    })
}

/// PUT /api/interval: takes effect from the next cycle; invalid values are
/// rejected with 400 and the current interval is kept.
pub(super) async fn set_interval_handler(
    State(state): State<AppState>,
    Json(body): Json<IntervalBody>,
) -> Response {
    match state.interval.set(body.interval_secs) {
        Ok(secs) => {
            tracing::info!(interval_secs = secs, "scheduler interval updated");
            Json(IntervalBody {
                interval_secs: secs as i64,
            })
            .into_response()
        }
        Err(e) => {
            tracing::warn!(error = %e, "rejected interval update");
            (StatusCode::BAD_REQUEST, e.to_string()).into_response()
        }
    }
}
