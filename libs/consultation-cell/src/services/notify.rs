// libs/consultation-cell/src/services/notify.rs
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::info;

use crate::models::{Appointment, ConsultationError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    AppointmentRequested,
    PaymentLinkReady,
    MeetingLinkReady,
    MeetingLinkReminder,
    RefundIssued,
    AppointmentCancelled,
    DiagnosisReminder,
    AppointmentCompleted,
    RescheduleRequested,
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            NotificationKind::AppointmentRequested => "appointment_requested",
            NotificationKind::PaymentLinkReady => "payment_link_ready",
            NotificationKind::MeetingLinkReady => "meeting_link_ready",
            NotificationKind::MeetingLinkReminder => "meeting_link_reminder",
            NotificationKind::RefundIssued => "refund_issued",
            NotificationKind::AppointmentCancelled => "appointment_cancelled",
            NotificationKind::DiagnosisReminder => "diagnosis_reminder",
            NotificationKind::AppointmentCompleted => "appointment_completed",
            NotificationKind::RescheduleRequested => "reschedule_requested",
        };
        write!(f, "{}", label)
    }
}

/// Fire-and-forget email dispatch. Delivery failures are logged at the call
/// site and never fail the enclosing state transition.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        kind: NotificationKind,
        appointment: &Appointment,
        extra: Option<&str>,
    ) -> Result<(), ConsultationError>;
}

/// Production stand-in until the mailer cell is wired up: logs each dispatch.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(
        &self,
        kind: NotificationKind,
        appointment: &Appointment,
        extra: Option<&str>,
    ) -> Result<(), ConsultationError> {
        info!(
            "Notification {} for appointment {} (doctor {}, patient {}){}",
            kind,
            appointment.id,
            appointment.doctor_id,
            appointment.patient_id,
            extra.map(|e| format!(": {}", e)).unwrap_or_default()
        );
        Ok(())
    }
}
