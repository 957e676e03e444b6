use std::sync::Arc;

use axum::{routing::get, Router};

use consultation_cell::router::consultation_routes;
use consultation_cell::AppContext;

pub fn create_router(state: Arc<AppContext>) -> Router {
    Router::new()
        .route("/", get(|| async { "Clinic Consultation API is running!" }))
        .merge(consultation_routes(state))
}
