mod handlers;

pub use handlers::{
    batch_validate, health_check, AppState, BatchValidateRequest, BatchValidateResponse,
};

use axum::{
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;

/// 构建路由
pub fn router(state: AppState) -> Router {
    let audit_routes = Router::new()
        .route("/api/validate/batch", post(batch_validate))
        .with_state(state);

    Router::new()
        .route("/health", get(health_check))
        .merge(audit_routes)
        .layer(ServiceBuilder::new())
}
