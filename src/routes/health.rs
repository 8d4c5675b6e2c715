use axum::extract::State;
use axum::http::StatusCode;
use sea_orm::ConnectionTrait;

use crate::common::AppState;

/// Returns 200 OK when a trivial query against the pool succeeds, 503
/// otherwise. Suitable for Kubernetes liveness/readiness probes.
pub async fn healthz(State(state): State<AppState>) -> StatusCode {
    match state.db.execute_unprepared("SELECT 1").await {
        Ok(_) => StatusCode::OK,
        Err(e) => {
            tracing::error!(error = %e, "healthz: database ping failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}
