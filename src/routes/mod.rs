// HTTP + WebSocket routes

mod http;
mod ws;

use axum::{
    Router,
    routing::{get, put},
};
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use tokio::sync::{broadcast, watch};
use tower_http::cors::{Any, CorsLayer};

use crate::capture::PacketCaptureEngine;
use crate::config::IntervalConfig;
use crate::counter_store::InterfaceCounterStore;
use crate::interface_repo::InterfaceRepo;
use crate::models::Sample;
use crate::resolver::ResolverStats;

/// Shared handles the routes read from. Nothing here is written by a route
/// except the runtime interval.
#[derive(Clone)]
pub struct AppState {
    pub samples_tx: broadcast::Sender<Sample>,
    pub latest: watch::Receiver<Option<Sample>>,
    pub store: Arc<InterfaceCounterStore>,
    pub interval: Arc<IntervalConfig>,
    pub interface_repo: Arc<InterfaceRepo>,
    pub capture: Option<Arc<PacketCaptureEngine>>,
    pub resolver_stats: Option<Arc<ResolverStats>>,
    pub ws_sample_connections: Arc<AtomicUsize>,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(|| async { "netmon: link quality and ad traffic monitor" })) // GET /
        .route("/version", get(http::version_handler)) // GET /version
        .route("/api/counters", get(http::counters_handler)) // GET /api/counters
        .route("/api/interfaces", get(http::interfaces_handler)) // GET /api/interfaces
        .route("/api/status", get(http::status_handler)) // GET /api/status
        .route("/api/samples/latest", get(http::latest_sample_handler)) // GET /api/samples/latest
        .route(
            "/api/interval",
            put(http::set_interval_handler).get(http::get_interval_handler),
        ) // GET, PUT /api/interval
        .route("/ws/samples", get(ws::ws_samples)) // WS /ws/samples
        .layer(CorsLayer::new().allow_origin(Any))
        .with_state(state)
}
