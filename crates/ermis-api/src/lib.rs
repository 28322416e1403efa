//! ermis-api — REST API for Ermis.
//!
//! Thin axum layer over the [`Orchestrator`]. Requests are authenticated
//! upstream; the username arrives in the `X-Forwarded-User` header and is
//! turned into a [`Principal`](ermis_core::Principal) using the `[auth]`
//! grants of the configuration.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/v1/alias` | Condensed aliases (optionally `?alias_name=`) |
//! | POST | `/api/v1/alias` | Create an alias |
//! | DELETE | `/api/v1/alias?alias_name=` | Delete an alias |
//! | GET | `/api/v1/alias/raw` | Aliases with full child objects |
//! | GET | `/api/v1/alias/{id}` | One condensed alias, by id or name |
//! | PATCH | `/api/v1/alias/{id}` | Modify an alias |
//! | POST | `/api/v1/lbclient` | Node status report |
//! | GET | `/api/v1/check_name?hostname=` | Hostname availability |

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use ermis_saga::Orchestrator;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<Orchestrator>,
}

/// Build the complete API router.
pub fn build_router(orchestrator: Arc<Orchestrator>) -> Router {
    let api_state = ApiState { orchestrator };

    let api_routes = Router::new()
        .route(
            "/alias",
            get(handlers::list_aliases)
                .post(handlers::create_alias)
                .delete(handlers::delete_alias),
        )
        .route("/alias/raw", get(handlers::list_aliases_raw))
        .route("/alias/{id}", get(handlers::get_alias).patch(handlers::modify_alias))
        .route("/lbclient", post(handlers::report_status))
        .route("/check_name", get(handlers::check_name))
        .with_state(api_state);

    Router::new().nest("/api/v1", api_routes)
}
