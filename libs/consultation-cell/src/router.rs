// libs/consultation-cell/src/router.rs
use std::sync::Arc;

use axum::{
    routing::{get, patch, post},
    Router,
};

use crate::handlers;
use crate::AppContext;

pub fn consultation_routes(state: Arc<AppContext>) -> Router {
    Router::new()
        // Appointment lifecycle
        .route("/appointments", post(handlers::book_appointment))
        .route("/appointments/{appointment_id}", get(handlers::get_appointment))
        .route("/appointments/{appointment_id}/decision", post(handlers::decide_appointment))
        .route("/appointments/{appointment_id}/reschedule", patch(handlers::reschedule_appointment))
        .route("/appointments/{appointment_id}/meeting-link", post(handlers::set_meeting_link))
        .route("/appointments/{appointment_id}/presence", post(handlers::record_presence))
        .route("/appointments/{appointment_id}/diagnosis", post(handlers::submit_diagnosis))
        // Payment gateway callback
        .route("/payments/webhook", post(handlers::payment_webhook))
        // Maintenance
        .route("/sweeps/run", post(handlers::run_sweep))
        .with_state(state)
}
