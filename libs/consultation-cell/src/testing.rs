// libs/consultation-cell/src/testing.rs
//! Deterministic doubles for the clock, notifier, and payment gateway, plus a
//! pre-seeded context for lifecycle tests.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use shared_config::ClinicConfig;

use crate::clock::Clock;
use crate::directory::{Directory, InMemoryDirectory};
use crate::models::{Appointment, ConsultationError, DoctorProfile, PatientProfile};
use crate::services::midtrans::PaymentGateway;
use crate::services::notify::{NotificationKind, Notifier};
use crate::AppContext;

/// Clock pinned to an instant, advanced explicitly by the test.
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(now) }
    }

    pub fn at_rfc3339(raw: &str) -> Self {
        let parsed = DateTime::parse_from_rfc3339(raw)
            .expect("fixed clock instant must be valid RFC 3339")
            .with_timezone(&Utc);
        Self::at(parsed)
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().expect("clock lock poisoned") = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().expect("clock lock poisoned");
        *now += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("clock lock poisoned")
    }
}

/// Captures every notification the system tries to send.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(NotificationKind, Uuid, Option<String>)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<(NotificationKind, Uuid, Option<String>)> {
        self.sent.lock().expect("notifier lock poisoned").clone()
    }

    pub fn count_of(&self, kind: NotificationKind) -> usize {
        self.sent()
            .iter()
            .filter(|(sent_kind, _, _)| *sent_kind == kind)
            .count()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(
        &self,
        kind: NotificationKind,
        appointment: &Appointment,
        extra: Option<&str>,
    ) -> Result<(), ConsultationError> {
        self.sent
            .lock()
            .expect("notifier lock poisoned")
            .push((kind, appointment.id, extra.map(str::to_string)));
        Ok(())
    }
}

/// Gateway double: records calls and fails on demand.
#[derive(Default)]
pub struct FakeGateway {
    fail_orders: Mutex<bool>,
    fail_refunds: Mutex<bool>,
    orders: Mutex<Vec<String>>,
    refunds: Mutex<Vec<(String, i64)>>,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_orders(&self, fail: bool) {
        *self.fail_orders.lock().expect("gateway lock poisoned") = fail;
    }

    pub fn fail_refunds(&self, fail: bool) {
        *self.fail_refunds.lock().expect("gateway lock poisoned") = fail;
    }

    pub fn orders(&self) -> Vec<String> {
        self.orders.lock().expect("gateway lock poisoned").clone()
    }

    pub fn refunds(&self) -> Vec<(String, i64)> {
        self.refunds.lock().expect("gateway lock poisoned").clone()
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_order(
        &self,
        order_ref: &str,
        _gross_amount: i64,
        _item_desc: &str,
        _customer_name: &str,
        _customer_email: &str,
    ) -> Result<String, ConsultationError> {
        if *self.fail_orders.lock().expect("gateway lock poisoned") {
            return Err(ConsultationError::GatewayError("gateway down".to_string()));
        }
        self.orders
            .lock()
            .expect("gateway lock poisoned")
            .push(order_ref.to_string());
        Ok(format!("https://pay.example.test/{}", order_ref))
    }

    async fn refund(
        &self,
        order_ref: &str,
        amount: i64,
        _reason: &str,
    ) -> Result<(), ConsultationError> {
        if *self.fail_refunds.lock().expect("gateway lock poisoned") {
            return Err(ConsultationError::GatewayError("gateway down".to_string()));
        }
        self.refunds
            .lock()
            .expect("gateway lock poisoned")
            .push((order_ref.to_string(), amount));
        Ok(())
    }
}

/// Fully wired context with deterministic doubles and one seeded doctor and
/// patient.
pub struct TestContext {
    pub ctx: Arc<AppContext>,
    pub clock: Arc<FixedClock>,
    pub notifier: Arc<RecordingNotifier>,
    pub gateway: Arc<FakeGateway>,
    pub directory: Arc<InMemoryDirectory>,
    pub doctor: DoctorProfile,
    pub patient: PatientProfile,
}

impl TestContext {
    /// Clock starts at 2024-01-09T08:00:00+07:00 clinic time; the canonical
    /// test slot is one day later.
    pub fn new() -> Self {
        Self::at("2024-01-09T08:00:00+07:00")
    }

    pub fn at(now: &str) -> Self {
        let clock = Arc::new(FixedClock::at_rfc3339(now));
        let notifier = Arc::new(RecordingNotifier::new());
        let gateway = Arc::new(FakeGateway::new());
        let directory = Arc::new(InMemoryDirectory::new());

        let doctor = DoctorProfile {
            id: Uuid::new_v4(),
            full_name: "Dr. Ratna".to_string(),
            email: "ratna@clinic.test".to_string(),
            price: 100_000,
        };
        let patient = PatientProfile {
            id: Uuid::new_v4(),
            full_name: "Budi".to_string(),
            email: "budi@mail.test".to_string(),
        };
        directory.upsert_doctor(doctor.clone());
        directory.upsert_patient(patient.clone());

        let ctx = Arc::new(AppContext::new(
            ClinicConfig::default(),
            Arc::clone(&directory) as Arc<dyn Directory>,
            Arc::clone(&gateway) as Arc<dyn PaymentGateway>,
            Arc::clone(&notifier) as Arc<dyn Notifier>,
            Arc::clone(&clock) as Arc<dyn Clock>,
        ));

        Self {
            ctx,
            clock,
            notifier,
            gateway,
            directory,
            doctor,
            patient,
        }
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}
