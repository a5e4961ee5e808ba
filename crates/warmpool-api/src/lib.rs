//! warmpool-api: REST control API for the warmpool controller.
//!
//! A thin adapter over [`warmpool_controller::State`]: handlers read
//! snapshots and edit the registry, and ask the reconcile loop to run
//! through a shared [`Notify`]. No reconciliation happens in a handler.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/v1/runtimes` | List runtime summaries |
//! | POST | `/api/v1/runtimes` | Register a runtime |
//! | GET | `/api/v1/runtimes/{runtime}` | Summary and pool listing |
//! | PUT | `/api/v1/runtimes/{runtime}` | Replace a runtime definition |
//! | DELETE | `/api/v1/runtimes/{runtime}` | Deregister a runtime |
//! | GET | `/api/v1/runtimes/{runtime}/services/{id}` | Observed instance state |
//! | GET | `/api/v1/runtimes/{runtime}/routes` | Assignment key → uri |
//! | POST | `/api/v1/reconcile` | Request a reconcile cycle |

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tokio::sync::Notify;
use warmpool_controller::State;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub state: Arc<State>,
    /// Wakes the reconcile loop ahead of its interval.
    pub nudge: Arc<Notify>,
}

/// Build the API router.
pub fn build_router(state: Arc<State>, nudge: Arc<Notify>) -> Router {
    let api_state = ApiState { state, nudge };

    let api_routes = Router::new()
        .route(
            "/runtimes",
            get(handlers::list_runtimes).post(handlers::create_runtime),
        )
        .route(
            "/runtimes/{runtime}",
            get(handlers::get_runtime)
                .put(handlers::update_runtime)
                .delete(handlers::delete_runtime),
        )
        .route(
            "/runtimes/{runtime}/services/{id}",
            get(handlers::get_instance),
        )
        .route("/runtimes/{runtime}/routes", get(handlers::get_routes))
        .route("/reconcile", post(handlers::reconcile))
        .with_state(api_state);

    Router::new().nest("/api/v1", api_routes)
}
