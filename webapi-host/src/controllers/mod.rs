pub mod values;

use axum::{routing::get, Router};

/// Conventional route table for every controller action.
pub fn routes() -> Router {
    Router::new()
        .route("/api/values", get(values::list))
        .route("/api/values/:id", get(values::get))
        .route("/api/identity", get(values::identity))
}
