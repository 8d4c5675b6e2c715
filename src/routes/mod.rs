pub mod health;

use axum::{routing::get, Router};
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

use crate::common::AppState;

/// The administrative surface this crate keeps (spec §1/§2 C8): a liveness
/// route exercising the ambient HTTP stack (CORS, compression, request
/// tracing) the way `river-db::routes::build_router` wires its much larger
/// router. The full JSON admin API is an external collaborator and out of
/// scope.
#[must_use]
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health::healthz))
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
