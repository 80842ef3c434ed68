//! HTTP and WebSocket surface of the room service.
//!
//! - `GET /ws` - signaling channel (JSON text frames)
//! - `POST /api/v1/rooms` - create a room
//! - `GET /api/v1/rooms/:code` - room metadata and live member count
//! - `/health`, `/ready` - probes
//! - `/metrics` - Prometheus scrape endpoint (when a recorder is installed)

pub mod rooms_api;
pub mod ws;

use crate::actors::RoomRegistryHandle;
use crate::observability::{health_router, HealthState};
use crate::relay::{ConnectionDirectory, SignalRelay};
use crate::rooms::RoomService;
use crate::store::CallStore;
use crate::tracker::SessionTracker;
use axum::{
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Timeout for plain HTTP requests. Upgraded sockets are not subject to it.
const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Live room membership.
    pub registry: RoomRegistryHandle,

    /// Live signaling channels by connection id.
    pub directory: Arc<ConnectionDirectory>,

    pub relay: SignalRelay,

    pub tracker: SessionTracker,

    pub rooms: RoomService,
}

impl AppState {
    /// Wire the service components around one store and registry.
    #[must_use]
    pub fn new(
        store: Arc<dyn CallStore>,
        registry: RoomRegistryHandle,
        room_code_max_attempts: u32,
    ) -> Self {
        let directory = ConnectionDirectory::new();
        let relay = SignalRelay::new(Arc::clone(&directory));
        let tracker = SessionTracker::new(Arc::clone(&store));
        let rooms = RoomService::new(
            store,
            tracker.clone(),
            registry.clone(),
            room_code_max_attempts,
        );

        Self {
            registry,
            directory,
            relay,
            tracker,
            rooms,
        }
    }
}

/// Build the application router.
///
/// Layer order (bottom-to-top execution):
/// 1. `TimeoutLayer` on the REST routes only
/// 2. `TraceLayer` for request logging on everything
pub fn build_router(
    state: Arc<AppState>,
    health_state: Arc<HealthState>,
    metrics_handle: Option<PrometheusHandle>,
) -> Router {
    let api_routes = Router::new()
        .route("/api/v1/rooms", post(rooms_api::create_room))
        .route("/api/v1/rooms/:code", get(rooms_api::get_room))
        .layer(TimeoutLayer::new(HTTP_REQUEST_TIMEOUT))
        .with_state(Arc::clone(&state));

    let ws_routes = Router::new()
        .route("/ws", get(ws::ws_handler))
        .with_state(state);

    let mut router = api_routes
        .merge(ws_routes)
        .merge(health_router(health_state));

    if let Some(handle) = metrics_handle {
        router = router.route(
            "/metrics",
            get(move || {
                let handle = handle.clone();
                async move { handle.render() }
            }),
        );
    }

    router.layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_state_is_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<AppState>();
    }
}
