// libs/consultation-cell/src/services/payment.rs
use std::sync::Arc;

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::clock::ClinicClock;
use crate::models::{
    Appointment, AppointmentStatus, ConsultationError, DoctorProfile, PatientProfile,
    PaymentStatus, Transaction, WebhookOutcome,
};
use crate::services::lifecycle::LifecycleService;
use crate::services::midtrans::PaymentGateway;
use crate::store::{ClinicStore, StoreState};

/// Creates payment requests at approval time, applies gateway webhooks
/// idempotently, and triggers best-effort refunds.
pub struct PaymentOrchestrator {
    store: Arc<ClinicStore>,
    gateway: Arc<dyn PaymentGateway>,
    clock: ClinicClock,
    lifecycle: LifecycleService,
    admin_fee_percent: u32,
}

impl PaymentOrchestrator {
    pub fn new(
        store: Arc<ClinicStore>,
        gateway: Arc<dyn PaymentGateway>,
        clock: ClinicClock,
        admin_fee_percent: u32,
    ) -> Self {
        Self {
            store,
            gateway,
            clock,
            lifecycle: LifecycleService::new(),
            admin_fee_percent,
        }
    }

    /// Builds and records the transaction for an approved appointment. Runs
    /// inside the approval's unit of work so the status transition and the
    /// transaction record commit together. The fee split is fixed here and
    /// never recomputed.
    pub fn create_transaction(
        &self,
        state: &mut StoreState,
        appointment_id: Uuid,
        doctor_price: i64,
    ) -> Result<Transaction, ConsultationError> {
        let txn = Transaction::for_appointment(
            appointment_id,
            doctor_price,
            self.admin_fee_percent,
            self.clock.now(),
        );
        state.insert_transaction(txn.clone())?;
        info!(
            "Transaction {} created for appointment {} (amount {}, admin fee {}, doctor fee {})",
            txn.id, appointment_id, txn.amount, txn.admin_fee, txn.doctor_fee
        );
        Ok(txn)
    }

    /// Asks the gateway for a payment link. Called after the approval has
    /// committed; a failure here surfaces as a GatewayError for out-of-band
    /// retry and never rolls the approval back.
    pub async fn request_payment_link(
        &self,
        txn: &Transaction,
        doctor: &DoctorProfile,
        patient: &PatientProfile,
    ) -> Result<String, ConsultationError> {
        self.gateway
            .create_order(
                &txn.midtrans_order_id,
                txn.amount,
                &format!("Consultation with {}", doctor.full_name),
                &patient.full_name,
                &patient.email,
            )
            .await
    }

    /// Applies an inbound gateway webhook. Always produces an outcome, never
    /// an error: the webhook endpoint must acknowledge success to the gateway
    /// regardless of what happened internally. Stale and duplicate deliveries
    /// are rejected by the monotonic status-priority check.
    pub async fn apply_webhook(&self, order_id: &str, raw_status: &str) -> WebhookOutcome {
        let Some(new_status) = PaymentStatus::from_gateway(raw_status) else {
            warn!("Webhook with unknown status '{}' for order {}, not applied", raw_status, order_id);
            return WebhookOutcome { applied: false };
        };

        let now = self.clock.now();
        let order = order_id.to_string();
        let result = self
            .store
            .with_state(|state| {
                let Some(txn) = state.transaction_by_order_ref(&order) else {
                    warn!("Webhook for unknown order {}, not applied", order);
                    return Ok(false);
                };

                if new_status.priority() <= txn.status.priority() {
                    debug!(
                        "Webhook {} for order {} does not outrank stored status {}, no-op",
                        new_status, order, txn.status
                    );
                    return Ok(false);
                }

                let appointment_id = txn.appointment_id;

                // Guard the appointment transition before touching anything so
                // the unit stays all-or-nothing.
                if new_status.is_paid() {
                    let appointment = state.appointment(appointment_id)?;
                    self.lifecycle
                        .validate_status_transition(appointment.status, AppointmentStatus::Paid)?;
                }

                let txn = state
                    .transaction_by_order_ref_mut(&order)
                    .ok_or(ConsultationError::TransactionNotFound)?;
                txn.status = new_status;
                if new_status.is_paid() {
                    txn.paid_at = Some(now);
                    let appointment = state.appointment_mut(appointment_id)?;
                    if appointment.status != AppointmentStatus::Paid {
                        appointment.status = AppointmentStatus::Paid;
                        appointment.updated_at = now;
                    }
                }

                info!("Webhook {} applied to order {}", new_status, order);
                Ok(true)
            })
            .await;

        match result {
            Ok(applied) => WebhookOutcome { applied },
            Err(e) => {
                error!("Webhook for order {} failed to apply: {}", order_id, e);
                WebhookOutcome { applied: false }
            }
        }
    }

    /// Marks the appointment's transaction refunded and fires the gateway
    /// refund call. The gateway call is best-effort reconciliation; its
    /// failure is logged and never blocks the cancellation that triggered it.
    /// Returns the marked transaction, or None when there is nothing to
    /// refund.
    pub async fn refund(
        &self,
        appointment: &Appointment,
        reason: &str,
    ) -> Result<Option<Transaction>, ConsultationError> {
        let appointment_id = appointment.id;
        let marked = self
            .store
            .with_state(|state| {
                let Some(txn) = state.transaction_for_appointment_mut(appointment_id) else {
                    return Ok(None);
                };
                if txn.status.priority() >= PaymentStatus::Refund.priority() {
                    // Already refunded or charged back; overlapping sweeps land here.
                    return Ok(None);
                }
                txn.status = PaymentStatus::Refund;
                Ok(Some(txn.clone()))
            })
            .await?;

        if let Some(txn) = &marked {
            if let Err(e) = self
                .gateway
                .refund(&txn.midtrans_order_id, txn.amount, reason)
                .await
            {
                warn!(
                    "Refund call for order {} failed: {} (requires out-of-band reconciliation)",
                    txn.midtrans_order_id, e
                );
            }
        }

        Ok(marked)
    }

    /// Marks an unpaid transaction expired. Runs inside the sweeper's unit of
    /// work for the appointment cancellation.
    pub fn expire_transaction(&self, state: &mut StoreState, appointment_id: Uuid) -> bool {
        match state.transaction_for_appointment_mut(appointment_id) {
            Some(txn) if PaymentStatus::Expire.priority() > txn.status.priority() => {
                txn.status = PaymentStatus::Expire;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::testing::TestContext;

    fn orchestrator(tc: &TestContext) -> PaymentOrchestrator {
        PaymentOrchestrator::new(
            Arc::clone(&tc.ctx.store),
            Arc::clone(&tc.ctx.gateway),
            tc.ctx.clinic_clock(),
            tc.ctx.config.admin_fee_percent,
        )
    }

    /// Appointment in AwaitingPayment with its pending transaction, as left
    /// behind by an approval.
    async fn seed_awaiting_payment(tc: &TestContext) -> (Appointment, Transaction) {
        let now = tc.ctx.clinic_clock().now();
        let mut appointment =
            Appointment::new(tc.doctor.id, tc.patient.id, now + chrono::Duration::days(1), now);
        appointment.status = AppointmentStatus::AwaitingPayment;
        let txn = Transaction::for_appointment(appointment.id, tc.doctor.price, 10, now);

        let seeded = (appointment.clone(), txn.clone());
        tc.ctx
            .store
            .with_state(move |state| {
                state.insert_appointment(appointment);
                state.insert_transaction(txn)
            })
            .await
            .unwrap();
        seeded
    }

    #[tokio::test]
    async fn settlement_marks_the_transaction_and_appointment_paid() {
        let tc = TestContext::new();
        let payments = orchestrator(&tc);
        let (appointment, txn) = seed_awaiting_payment(&tc).await;

        let outcome = payments.apply_webhook(&txn.midtrans_order_id, "settlement").await;
        assert!(outcome.applied);

        let stored = tc.ctx.store.transaction_for_appointment(appointment.id).await.unwrap();
        assert_eq!(stored.status, PaymentStatus::Settlement);
        assert!(stored.paid_at.is_some());
        let appointment = tc.ctx.store.appointment(appointment.id).await.unwrap();
        assert_eq!(appointment.status, AppointmentStatus::Paid);
    }

    #[tokio::test]
    async fn duplicate_settlement_delivery_is_a_no_op() {
        let tc = TestContext::new();
        let payments = orchestrator(&tc);
        let (_, txn) = seed_awaiting_payment(&tc).await;

        assert!(payments.apply_webhook(&txn.midtrans_order_id, "settlement").await.applied);
        assert!(!payments.apply_webhook(&txn.midtrans_order_id, "settlement").await.applied);
    }

    #[tokio::test]
    async fn stale_pending_after_settlement_is_ignored() {
        let tc = TestContext::new();
        let payments = orchestrator(&tc);
        let (appointment, txn) = seed_awaiting_payment(&tc).await;

        assert!(payments.apply_webhook(&txn.midtrans_order_id, "settlement").await.applied);
        assert!(!payments.apply_webhook(&txn.midtrans_order_id, "pending").await.applied);

        let stored = tc.ctx.store.transaction_for_appointment(appointment.id).await.unwrap();
        assert_eq!(stored.status, PaymentStatus::Settlement);
    }

    #[tokio::test]
    async fn unknown_orders_and_statuses_are_acknowledged_but_not_applied() {
        let tc = TestContext::new();
        let payments = orchestrator(&tc);
        let (_, txn) = seed_awaiting_payment(&tc).await;

        assert!(!payments.apply_webhook("ORDER-unknown", "settlement").await.applied);
        assert!(!payments.apply_webhook(&txn.midtrans_order_id, "mystery_status").await.applied);
    }

    #[tokio::test]
    async fn refund_marks_the_transaction_and_calls_the_gateway() {
        let tc = TestContext::new();
        let payments = orchestrator(&tc);
        let (appointment, txn) = seed_awaiting_payment(&tc).await;
        payments.apply_webhook(&txn.midtrans_order_id, "settlement").await;

        let marked = payments.refund(&appointment, "nobody joined").await.unwrap();
        assert!(marked.is_some());

        let stored = tc.ctx.store.transaction_for_appointment(appointment.id).await.unwrap();
        assert_eq!(stored.status, PaymentStatus::Refund);
        assert_eq!(tc.gateway.refunds(), vec![(txn.midtrans_order_id.clone(), 100_000)]);

        // Second refund attempt finds nothing left to do.
        let again = payments.refund(&appointment, "nobody joined").await.unwrap();
        assert!(again.is_none());
    }

    #[tokio::test]
    async fn refund_is_recorded_even_when_the_gateway_is_down() {
        let tc = TestContext::new();
        tc.gateway.fail_refunds(true);
        let payments = orchestrator(&tc);
        let (appointment, txn) = seed_awaiting_payment(&tc).await;
        payments.apply_webhook(&txn.midtrans_order_id, "settlement").await;

        let marked = payments.refund(&appointment, "nobody joined").await.unwrap();
        assert!(marked.is_some());
        let stored = tc.ctx.store.transaction_for_appointment(appointment.id).await.unwrap();
        assert_eq!(stored.status, PaymentStatus::Refund);
    }
}
