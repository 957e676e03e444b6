// libs/consultation-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};
use serde_json::{json, Value};
use tracing::warn;
use uuid::Uuid;

use shared_models::error::AppError;

use crate::models::{
    BookAppointmentRequest, ConsultationError, DecisionRequest, DiagnosisRequest,
    MeetingLinkRequest, PaymentWebhookRequest, PresenceRequest, RescheduleRequest,
};
use crate::services::booking::ConsultationService;
use crate::services::sweeper::TimeoutSweeper;
use crate::AppContext;

fn map_error(e: ConsultationError) -> AppError {
    match e {
        ConsultationError::NotFound => AppError::NotFound("Appointment not found".to_string()),
        ConsultationError::DoctorNotFound => AppError::NotFound("Doctor not found".to_string()),
        ConsultationError::PatientNotFound => AppError::NotFound("Patient not found".to_string()),
        ConsultationError::TransactionNotFound => {
            AppError::NotFound("Transaction not found".to_string())
        }
        ConsultationError::InvalidSchedule(msg) => AppError::BadRequest(msg),
        ConsultationError::ValidationError(msg) => AppError::ValidationError(msg),
        ConsultationError::DuplicateActiveAppointment | ConsultationError::SlotTaken => {
            AppError::Conflict(e.to_string())
        }
        ConsultationError::TransactionExists => AppError::Conflict(e.to_string()),
        ConsultationError::InvalidStatusTransition(_) => AppError::InvalidState(e.to_string()),
        ConsultationError::Unauthorized => AppError::Unauthorized(e.to_string()),
        ConsultationError::MaxRescheduleExceeded => AppError::InvalidState(e.to_string()),
        ConsultationError::GatewayError(msg) => AppError::ExternalService(msg),
    }
}

// ==============================================================================
// APPOINTMENT LIFECYCLE HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn book_appointment(
    State(state): State<Arc<AppContext>>,
    Json(request): Json<BookAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let service = ConsultationService::new(&state);
    let appointment = service.book_appointment(request).await.map_err(map_error)?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
        "message": "Appointment requested, waiting for doctor approval"
    })))
}

#[axum::debug_handler]
pub async fn get_appointment(
    State(state): State<Arc<AppContext>>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let service = ConsultationService::new(&state);
    let appointment = service.get_appointment(appointment_id).await.map_err(map_error)?;
    let transaction = state.store.transaction_for_appointment(appointment_id).await;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
        "transaction": transaction
    })))
}

#[axum::debug_handler]
pub async fn decide_appointment(
    State(state): State<Arc<AppContext>>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<DecisionRequest>,
) -> Result<Json<Value>, AppError> {
    let service = ConsultationService::new(&state);
    let appointment = service.decide(appointment_id, request).await.map_err(map_error)?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment
    })))
}

#[axum::debug_handler]
pub async fn reschedule_appointment(
    State(state): State<Arc<AppContext>>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<RescheduleRequest>,
) -> Result<Json<Value>, AppError> {
    let service = ConsultationService::new(&state);
    let appointment = service
        .reschedule(appointment_id, request)
        .await
        .map_err(map_error)?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
        "message": "Appointment rescheduled, waiting for doctor approval"
    })))
}

#[axum::debug_handler]
pub async fn set_meeting_link(
    State(state): State<Arc<AppContext>>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<MeetingLinkRequest>,
) -> Result<Json<Value>, AppError> {
    let service = ConsultationService::new(&state);
    let appointment = service
        .set_meeting_link(appointment_id, request)
        .await
        .map_err(map_error)?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment
    })))
}

#[axum::debug_handler]
pub async fn record_presence(
    State(state): State<Arc<AppContext>>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<PresenceRequest>,
) -> Result<Json<Value>, AppError> {
    let service = ConsultationService::new(&state);
    let appointment = service
        .record_presence(appointment_id, request)
        .await
        .map_err(map_error)?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment
    })))
}

#[axum::debug_handler]
pub async fn submit_diagnosis(
    State(state): State<Arc<AppContext>>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<DiagnosisRequest>,
) -> Result<Json<Value>, AppError> {
    let service = ConsultationService::new(&state);
    let appointment = service
        .submit_diagnosis(appointment_id, request)
        .await
        .map_err(map_error)?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
        "message": "Consultation completed"
    })))
}

// ==============================================================================
// PAYMENT + MAINTENANCE HANDLERS
// ==============================================================================

/// Gateway webhooks are always acknowledged with 200; `applied` tells whether
/// the delivery changed anything. Payloads missing the expected fields are
/// acknowledged too, so the gateway never enters a redelivery loop.
#[axum::debug_handler]
pub async fn payment_webhook(
    State(state): State<Arc<AppContext>>,
    Json(payload): Json<Value>,
) -> Json<Value> {
    let applied = match serde_json::from_value::<PaymentWebhookRequest>(payload) {
        Ok(request) => {
            ConsultationService::new(&state)
                .apply_payment_webhook(&request.order_id, &request.transaction_status)
                .await
                .applied
        }
        Err(e) => {
            warn!("Webhook payload not understood, acknowledged without applying: {}", e);
            false
        }
    };

    Json(json!({
        "success": true,
        "applied": applied
    }))
}

/// Manual sweep trigger, also used by the background loop's interval tick.
#[axum::debug_handler]
pub async fn run_sweep(State(state): State<Arc<AppContext>>) -> Json<Value> {
    let sweeper = TimeoutSweeper::new(&state);
    let summary = sweeper.run_sweep().await;

    Json(json!({
        "success": true,
        "summary": summary
    }))
}
