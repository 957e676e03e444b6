// libs/consultation-cell/src/services/booking.rs
use std::sync::Arc;

use chrono::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::clock::ClinicClock;
use crate::directory::Directory;
use crate::models::{
    Appointment, AppointmentStatus, BookAppointmentRequest, ConsultationError, DecisionAction,
    DecisionRequest, DiagnosisRequest, MeetingLinkRequest, PresenceRequest, RescheduleRequest,
    WebhookOutcome,
};
use crate::services::conflict::SlotConflictChecker;
use crate::services::lifecycle::LifecycleService;
use crate::services::notify::{NotificationKind, Notifier};
use crate::services::payment::PaymentOrchestrator;
use crate::services::presence::PresenceTracker;
use crate::store::ClinicStore;
use crate::AppContext;

/// The appointment lifecycle surface exposed to controllers: booking, doctor
/// decisions, reschedules, meeting links, presence, and diagnosis. Each
/// operation re-reads current state inside one store unit of work, so
/// concurrent doctor/patient/sweeper activity cannot act on stale snapshots.
pub struct ConsultationService {
    store: Arc<ClinicStore>,
    directory: Arc<dyn Directory>,
    notifier: Arc<dyn Notifier>,
    clock: ClinicClock,
    payments: PaymentOrchestrator,
    presence: PresenceTracker,
    conflicts: SlotConflictChecker,
    lifecycle: LifecycleService,
    max_reschedules: u32,
    link_expiry_hours: i64,
}

impl ConsultationService {
    pub fn new(ctx: &AppContext) -> Self {
        let clock = ctx.clinic_clock();
        Self {
            store: Arc::clone(&ctx.store),
            directory: Arc::clone(&ctx.directory),
            notifier: Arc::clone(&ctx.notifier),
            payments: PaymentOrchestrator::new(
                Arc::clone(&ctx.store),
                Arc::clone(&ctx.gateway),
                clock.clone(),
                ctx.config.admin_fee_percent,
            ),
            presence: PresenceTracker::new(Arc::clone(&ctx.store), clock.clone()),
            clock,
            conflicts: SlotConflictChecker::new(),
            lifecycle: LifecycleService::new(),
            max_reschedules: ctx.config.max_reschedules,
            link_expiry_hours: ctx.config.meeting_link_expiry_hours,
        }
    }

    /// Books a consultation slot. Slot validation and the insert run in the
    /// same unit of work, so two concurrent bookings for the same slot cannot
    /// both pass the conflict check.
    pub async fn book_appointment(
        &self,
        request: BookAppointmentRequest,
    ) -> Result<Appointment, ConsultationError> {
        let schedule = self.clock.parse_schedule(&request.schedule)?;
        let now = self.clock.now();
        if schedule <= now {
            return Err(ConsultationError::InvalidSchedule(
                "schedule must be in the future".to_string(),
            ));
        }

        // Identity and pricing are read-only collaborator lookups.
        self.directory.doctor(request.doctor_id).await?;
        self.directory.patient(request.patient_id).await?;

        let appointment = self
            .store
            .with_state(|state| {
                self.conflicts
                    .check_slot(state, request.doctor_id, request.patient_id, schedule, None)?;
                let appointment =
                    Appointment::new(request.doctor_id, request.patient_id, schedule, now);
                state.insert_appointment(appointment.clone());
                Ok(appointment)
            })
            .await?;

        info!(
            "Appointment {} booked for doctor {} at {}",
            appointment.id,
            appointment.doctor_id,
            self.clock.to_local(schedule)
        );
        self.dispatch(NotificationKind::AppointmentRequested, &appointment, None)
            .await;

        Ok(appointment)
    }

    /// Doctor approves or rejects a pending appointment. Approval commits the
    /// status change together with the transaction record, then asks the
    /// gateway for a payment link; a gateway failure is surfaced in the logs
    /// for retry and never rolls back the committed approval.
    pub async fn decide(
        &self,
        appointment_id: Uuid,
        request: DecisionRequest,
    ) -> Result<Appointment, ConsultationError> {
        match request.action {
            DecisionAction::Approve => self.approve(appointment_id, request.doctor_id).await,
            DecisionAction::Reject => {
                self.reject(appointment_id, request.doctor_id, request.reason).await
            }
        }
    }

    async fn approve(
        &self,
        appointment_id: Uuid,
        doctor_id: Uuid,
    ) -> Result<Appointment, ConsultationError> {
        let snapshot = self.store.appointment(appointment_id).await?;
        if snapshot.doctor_id != doctor_id {
            return Err(ConsultationError::Unauthorized);
        }

        let doctor = self.directory.doctor(snapshot.doctor_id).await?;
        let patient = self.directory.patient(snapshot.patient_id).await?;

        let now = self.clock.now();
        let max_reschedules = self.max_reschedules;
        let (appointment, txn) = self
            .store
            .with_state(|state| {
                let current = state.appointment(appointment_id)?;
                if current.doctor_id != doctor_id {
                    return Err(ConsultationError::Unauthorized);
                }
                // Decisions act on Pending only; the table's same-status
                // shortcut must not let a repeat slip through.
                if current.status != AppointmentStatus::Pending {
                    return Err(ConsultationError::InvalidStatusTransition(current.status));
                }
                if current.reschedule_count > max_reschedules {
                    return Err(ConsultationError::MaxRescheduleExceeded);
                }
                self.lifecycle.validate_status_transition(
                    current.status,
                    AppointmentStatus::AwaitingPayment,
                )?;

                let txn = self.payments.create_transaction(state, appointment_id, doctor.price)?;

                let appointment = state.appointment_mut(appointment_id)?;
                appointment.status = AppointmentStatus::AwaitingPayment;
                appointment.updated_at = now;
                Ok((appointment.clone(), txn))
            })
            .await?;

        match self.payments.request_payment_link(&txn, &doctor, &patient).await {
            Ok(link) => {
                self.dispatch(NotificationKind::PaymentLinkReady, &appointment, Some(&link))
                    .await;
            }
            Err(e) => {
                // The approval is already committed; the missing link is
                // resolved out of band.
                error!(
                    "Payment link creation failed for appointment {}: {}",
                    appointment_id, e
                );
            }
        }

        info!("Appointment {} approved, awaiting payment", appointment_id);
        Ok(appointment)
    }

    async fn reject(
        &self,
        appointment_id: Uuid,
        doctor_id: Uuid,
        reason: Option<String>,
    ) -> Result<Appointment, ConsultationError> {
        let now = self.clock.now();
        let appointment = self
            .store
            .with_state(|state| {
                let current = state.appointment(appointment_id)?;
                if current.doctor_id != doctor_id {
                    return Err(ConsultationError::Unauthorized);
                }
                // A second reject must not overwrite the recorded reason or
                // re-fire the notification.
                if current.status != AppointmentStatus::Pending {
                    return Err(ConsultationError::InvalidStatusTransition(current.status));
                }
                self.lifecycle
                    .validate_status_transition(current.status, AppointmentStatus::Rejected)?;

                let appointment = state.appointment_mut(appointment_id)?;
                appointment.status = AppointmentStatus::Rejected;
                appointment.rejection_reason = reason.clone();
                appointment.updated_at = now;
                Ok(appointment.clone())
            })
            .await?;

        info!("Appointment {} rejected", appointment_id);
        let reason_text = appointment
            .rejection_reason
            .clone()
            .unwrap_or_else(|| "rejected by doctor".to_string());
        self.dispatch(
            NotificationKind::AppointmentCancelled,
            &appointment,
            Some(&reason_text),
        )
        .await;

        Ok(appointment)
    }

    /// Patient moves a rejected appointment back to pending with a new slot.
    /// Capped at the configured maximum; exceeding it is a hard failure.
    pub async fn reschedule(
        &self,
        appointment_id: Uuid,
        request: RescheduleRequest,
    ) -> Result<Appointment, ConsultationError> {
        let new_schedule = self.clock.parse_schedule(&request.new_schedule)?;
        let now = self.clock.now();
        if new_schedule <= now {
            return Err(ConsultationError::InvalidSchedule(
                "schedule must be in the future".to_string(),
            ));
        }

        let max_reschedules = self.max_reschedules;
        let appointment = self
            .store
            .with_state(|state| {
                let current = state.appointment(appointment_id)?;
                if current.patient_id != request.patient_id {
                    return Err(ConsultationError::Unauthorized);
                }
                // Only a rejected appointment can be moved. The same-status
                // shortcut in the table would otherwise accept Pending →
                // Pending and let the patient shift the slot (and burn an
                // attempt) before the doctor has decided.
                if current.status != AppointmentStatus::Rejected {
                    return Err(ConsultationError::InvalidStatusTransition(current.status));
                }
                self.lifecycle
                    .validate_status_transition(current.status, AppointmentStatus::Pending)?;
                if current.reschedule_count >= max_reschedules {
                    return Err(ConsultationError::MaxRescheduleExceeded);
                }
                self.conflicts.check_slot(
                    state,
                    current.doctor_id,
                    current.patient_id,
                    new_schedule,
                    Some(appointment_id),
                )?;

                let appointment = state.appointment_mut(appointment_id)?;
                appointment.schedule = new_schedule;
                appointment.status = AppointmentStatus::Pending;
                appointment.reschedule_count += 1;
                appointment.rejection_reason = None;
                appointment.updated_at = now;
                Ok(appointment.clone())
            })
            .await?;

        info!(
            "Appointment {} rescheduled to {} (attempt {})",
            appointment_id,
            self.clock.to_local(new_schedule),
            appointment.reschedule_count
        );
        self.dispatch(NotificationKind::RescheduleRequested, &appointment, None)
            .await;

        Ok(appointment)
    }

    /// Doctor hands over the meeting link for a paid appointment; the link
    /// expiry window starts now.
    pub async fn set_meeting_link(
        &self,
        appointment_id: Uuid,
        request: MeetingLinkRequest,
    ) -> Result<Appointment, ConsultationError> {
        let url = request.url.trim();
        if url.is_empty() || !url.starts_with("http") {
            return Err(ConsultationError::ValidationError(
                "meeting link must be a valid URL".to_string(),
            ));
        }

        let now = self.clock.now();
        let expires_at = now + Duration::hours(self.link_expiry_hours);
        let appointment = self
            .store
            .with_state(|state| {
                let current = state.appointment(appointment_id)?;
                if current.doctor_id != request.doctor_id {
                    return Err(ConsultationError::Unauthorized);
                }
                if current.status != AppointmentStatus::Paid {
                    return Err(ConsultationError::InvalidStatusTransition(current.status));
                }

                let appointment = state.appointment_mut(appointment_id)?;
                appointment.meeting_link = Some(url.to_string());
                appointment.link_sent_at = Some(now);
                appointment.meeting_link_expires_at = Some(expires_at);
                appointment.status = AppointmentStatus::AwaitingJoin;
                appointment.updated_at = now;
                Ok(appointment.clone())
            })
            .await?;

        info!("Meeting link set for appointment {}", appointment_id);
        self.dispatch(NotificationKind::MeetingLinkReady, &appointment, Some(url))
            .await;

        Ok(appointment)
    }

    pub async fn record_presence(
        &self,
        appointment_id: Uuid,
        request: PresenceRequest,
    ) -> Result<Appointment, ConsultationError> {
        self.presence
            .record_presence(appointment_id, request.actor_id, request.role)
            .await
    }

    /// Doctor closes the consultation. Both diagnosis and note are required;
    /// nothing is written when either is missing.
    pub async fn submit_diagnosis(
        &self,
        appointment_id: Uuid,
        request: DiagnosisRequest,
    ) -> Result<Appointment, ConsultationError> {
        let diagnosis = request.diagnosis.trim();
        let note = request.note.trim();
        if diagnosis.is_empty() || note.is_empty() {
            return Err(ConsultationError::ValidationError(
                "diagnosis and note are both required".to_string(),
            ));
        }

        let now = self.clock.now();
        let appointment = self
            .store
            .with_state(|state| {
                let current = state.appointment(appointment_id)?;
                if current.doctor_id != request.doctor_id {
                    return Err(ConsultationError::Unauthorized);
                }
                if !PresenceTracker::can_submit_diagnosis(current) {
                    return Err(ConsultationError::InvalidStatusTransition(current.status));
                }
                self.lifecycle
                    .validate_status_transition(current.status, AppointmentStatus::Completed)?;

                let appointment = state.appointment_mut(appointment_id)?;
                appointment.diagnosis = Some(diagnosis.to_string());
                appointment.note = Some(note.to_string());
                appointment.status = AppointmentStatus::Completed;
                appointment.completed_at = Some(now);
                appointment.updated_at = now;
                Ok(appointment.clone())
            })
            .await?;

        info!("Appointment {} completed", appointment_id);
        self.dispatch(NotificationKind::AppointmentCompleted, &appointment, None)
            .await;

        Ok(appointment)
    }

    pub async fn get_appointment(&self, appointment_id: Uuid) -> Result<Appointment, ConsultationError> {
        self.store.appointment(appointment_id).await
    }

    /// Pass-through for the webhook endpoint; always yields an outcome.
    pub async fn apply_payment_webhook(&self, order_id: &str, raw_status: &str) -> WebhookOutcome {
        self.payments.apply_webhook(order_id, raw_status).await
    }

    async fn dispatch(&self, kind: NotificationKind, appointment: &Appointment, extra: Option<&str>) {
        if let Err(e) = self.notifier.notify(kind, appointment, extra).await {
            warn!(
                "Notification {} for appointment {} failed: {}",
                kind, appointment.id, e
            );
        }
    }
}
