// libs/consultation-cell/src/models.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ==============================================================================
// CORE CONSULTATION MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    pub doctor_id: Uuid,
    pub patient_id: Uuid,
    /// Scheduled slot, normalized to UTC at the boundary. All comparisons
    /// happen on this instant; clinic-local rendering is display-only.
    pub schedule: DateTime<Utc>,
    pub status: AppointmentStatus,
    pub reschedule_count: u32,
    pub rejection_reason: Option<String>,
    pub meeting_link: Option<String>,
    pub link_sent_at: Option<DateTime<Utc>>,
    pub meeting_link_expires_at: Option<DateTime<Utc>>,
    pub link_reminder_sent: bool,
    pub diagnosis_reminder_sent: bool,
    pub is_doctor_present: bool,
    pub is_patient_present: bool,
    pub doctor_join_time: Option<DateTime<Utc>>,
    pub patient_join_time: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub diagnosis: Option<String>,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    pub fn new(doctor_id: Uuid, patient_id: Uuid, schedule: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            doctor_id,
            patient_id,
            schedule,
            status: AppointmentStatus::Pending,
            reschedule_count: 0,
            rejection_reason: None,
            meeting_link: None,
            link_sent_at: None,
            meeting_link_expires_at: None,
            link_reminder_sent: false,
            diagnosis_reminder_sent: false,
            is_doctor_present: false,
            is_patient_present: false,
            doctor_join_time: None,
            patient_join_time: None,
            started_at: None,
            completed_at: None,
            diagnosis: None,
            note: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn both_parties_present(&self) -> bool {
        self.is_doctor_present && self.is_patient_present
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Pending,
    /// Legacy label from the original platform: approval moves an appointment
    /// straight to AwaitingPayment, so nothing ever rests here. Accepted on
    /// input for wire compatibility.
    Approved,
    AwaitingPayment,
    Paid,
    AwaitingJoin,
    InProgress,
    Completed,
    Cancelled,
    Rejected,
    /// Legacy label: a patient reschedule moves Rejected straight back to
    /// Pending. Accepted on input only.
    Rescheduled,
}

impl AppointmentStatus {
    /// Active statuses occupy a (doctor, patient) pair and a schedule slot.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::Pending
                | AppointmentStatus::Approved
                | AppointmentStatus::AwaitingPayment
                | AppointmentStatus::Paid
                | AppointmentStatus::AwaitingJoin
                | AppointmentStatus::InProgress
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AppointmentStatus::Completed | AppointmentStatus::Cancelled)
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentStatus::Pending => write!(f, "pending"),
            AppointmentStatus::Approved => write!(f, "approved"),
            AppointmentStatus::AwaitingPayment => write!(f, "awaiting_payment"),
            AppointmentStatus::Paid => write!(f, "paid"),
            AppointmentStatus::AwaitingJoin => write!(f, "awaiting_join"),
            AppointmentStatus::InProgress => write!(f, "in_progress"),
            AppointmentStatus::Completed => write!(f, "completed"),
            AppointmentStatus::Cancelled => write!(f, "cancelled"),
            AppointmentStatus::Rejected => write!(f, "rejected"),
            AppointmentStatus::Rescheduled => write!(f, "rescheduled"),
        }
    }
}

// ==============================================================================
// PAYMENT MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub appointment_id: Uuid,
    /// Gross amount in minor currency units (rupiah has no subunit in use).
    pub amount: i64,
    pub admin_fee: i64,
    pub doctor_fee: i64,
    pub status: PaymentStatus,
    /// Gateway order reference. Set once at creation, never rewritten;
    /// inbound webhooks correlate on this value.
    pub midtrans_order_id: String,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    /// Fee split is computed exactly once here; later doctor price changes
    /// never touch an existing transaction.
    pub fn for_appointment(
        appointment_id: Uuid,
        doctor_price: i64,
        admin_fee_percent: u32,
        now: DateTime<Utc>,
    ) -> Self {
        let admin_fee = doctor_price * admin_fee_percent as i64 / 100;
        Self {
            id: Uuid::new_v4(),
            appointment_id,
            amount: doctor_price,
            admin_fee,
            doctor_fee: doctor_price - admin_fee,
            status: PaymentStatus::Pending,
            midtrans_order_id: format!("ORDER-{}", appointment_id),
            paid_at: None,
            created_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Settlement,
    Capture,
    Deny,
    Cancel,
    Expire,
    Failure,
    Refund,
    PartialRefund,
    Chargeback,
    PartialChargeback,
}

impl PaymentStatus {
    /// Maps the gateway's raw status vocabulary. Unknown values are not
    /// applied; the webhook is still acknowledged.
    pub fn from_gateway(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(PaymentStatus::Pending),
            "settlement" => Some(PaymentStatus::Settlement),
            "capture" => Some(PaymentStatus::Capture),
            "deny" => Some(PaymentStatus::Deny),
            "cancel" => Some(PaymentStatus::Cancel),
            "expire" => Some(PaymentStatus::Expire),
            "failure" => Some(PaymentStatus::Failure),
            "refund" => Some(PaymentStatus::Refund),
            "partial_refund" => Some(PaymentStatus::PartialRefund),
            "chargeback" => Some(PaymentStatus::Chargeback),
            "partial_chargeback" => Some(PaymentStatus::PartialChargeback),
            _ => None,
        }
    }

    /// Monotonic rank used to reject stale or duplicate webhook deliveries:
    /// an update only applies when its rank exceeds the stored one.
    pub fn priority(&self) -> u8 {
        match self {
            PaymentStatus::Pending => 0,
            PaymentStatus::Deny
            | PaymentStatus::Cancel
            | PaymentStatus::Expire
            | PaymentStatus::Failure => 1,
            PaymentStatus::Settlement | PaymentStatus::Capture => 2,
            PaymentStatus::Refund | PaymentStatus::PartialRefund => 3,
            PaymentStatus::Chargeback | PaymentStatus::PartialChargeback => 4,
        }
    }

    pub fn is_paid(&self) -> bool {
        matches!(self, PaymentStatus::Settlement | PaymentStatus::Capture)
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaymentStatus::Pending => write!(f, "pending"),
            PaymentStatus::Settlement => write!(f, "settlement"),
            PaymentStatus::Capture => write!(f, "capture"),
            PaymentStatus::Deny => write!(f, "deny"),
            PaymentStatus::Cancel => write!(f, "cancel"),
            PaymentStatus::Expire => write!(f, "expire"),
            PaymentStatus::Failure => write!(f, "failure"),
            PaymentStatus::Refund => write!(f, "refund"),
            PaymentStatus::PartialRefund => write!(f, "partial_refund"),
            PaymentStatus::Chargeback => write!(f, "chargeback"),
            PaymentStatus::PartialChargeback => write!(f, "partial_chargeback"),
        }
    }
}

// ==============================================================================
// DIRECTORY MODELS (read-only collaborator data)
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoctorProfile {
    pub id: Uuid,
    pub full_name: String,
    pub email: String,
    /// Consultation price; the basis for the transaction fee split.
    pub price: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatientProfile {
    pub id: Uuid,
    pub full_name: String,
    pub email: String,
}

// ==============================================================================
// REQUEST/RESPONSE MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookAppointmentRequest {
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    /// ISO-8601 with explicit offset, e.g. "2024-01-10T08:00:00+07:00".
    pub schedule: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DecisionAction {
    Approve,
    Reject,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRequest {
    pub doctor_id: Uuid,
    pub action: DecisionAction,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RescheduleRequest {
    pub patient_id: Uuid,
    pub new_schedule: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeetingLinkRequest {
    pub doctor_id: Uuid,
    pub url: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    Doctor,
    Patient,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceRequest {
    pub actor_id: Uuid,
    pub role: ActorRole,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosisRequest {
    pub doctor_id: Uuid,
    pub diagnosis: String,
    pub note: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentWebhookRequest {
    pub order_id: String,
    pub transaction_status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookOutcome {
    pub applied: bool,
}

/// Counters returned by one sweeper run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SweepSummary {
    pub cancelled_pending: u32,
    pub cancelled_unpaid: u32,
    pub cancelled_abandoned: u32,
    pub cancelled_unlinked: u32,
    pub link_reminders: u32,
    pub diagnosis_reminders: u32,
    pub refunds_requested: u32,
    pub failures: u32,
}

impl SweepSummary {
    pub fn total_cancelled(&self) -> u32 {
        self.cancelled_pending
            + self.cancelled_unpaid
            + self.cancelled_abandoned
            + self.cancelled_unlinked
    }
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
pub enum ConsultationError {
    #[error("Appointment not found")]
    NotFound,

    #[error("Doctor not found")]
    DoctorNotFound,

    #[error("Patient not found")]
    PatientNotFound,

    #[error("Transaction not found")]
    TransactionNotFound,

    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Patient already has an active appointment with this doctor")]
    DuplicateActiveAppointment,

    #[error("Doctor already has an appointment at the requested time")]
    SlotTaken,

    #[error("Transaction already exists for this appointment")]
    TransactionExists,

    #[error("Action not allowed in current status: {0}")]
    InvalidStatusTransition(AppointmentStatus),

    #[error("Actor does not match the appointment's assigned doctor or patient")]
    Unauthorized,

    #[error("Maximum reschedule count reached")]
    MaxRescheduleExceeded,

    #[error("Payment gateway error: {0}")]
    GatewayError(String),
}
