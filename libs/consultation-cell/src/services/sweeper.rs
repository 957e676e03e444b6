// libs/consultation-cell/src/services/sweeper.rs
use std::sync::Arc;

use chrono::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::ClinicClock;
use crate::models::{Appointment, AppointmentStatus, ConsultationError, SweepSummary};
use crate::services::lifecycle::LifecycleService;
use crate::services::notify::{NotificationKind, Notifier};
use crate::services::payment::PaymentOrchestrator;
use crate::store::ClinicStore;

/// Hours after the consultation started before a missing diagnosis is nudged.
const DIAGNOSIS_REMINDER_HOURS: i64 = 2;

/// Periodic reconciler for appointments the humans forgot about: unanswered
/// bookings, unpaid approvals, paid appointments without a meeting link,
/// no-shows, and consultations left open without a diagnosis.
///
/// Each candidate is re-checked against current state inside its own unit of
/// work before anything is written, so a sweep racing a webhook or a join
/// event simply skips the item. One failing item never aborts the run.
pub struct TimeoutSweeper {
    store: Arc<ClinicStore>,
    notifier: Arc<dyn Notifier>,
    clock: ClinicClock,
    payments: PaymentOrchestrator,
    lifecycle: LifecycleService,
    grace_minutes: i64,
    link_reminder_window_hours: i64,
}

impl TimeoutSweeper {
    pub fn new(ctx: &crate::AppContext) -> Self {
        let clock = ctx.clinic_clock();
        Self {
            store: Arc::clone(&ctx.store),
            notifier: Arc::clone(&ctx.notifier),
            payments: PaymentOrchestrator::new(
                Arc::clone(&ctx.store),
                Arc::clone(&ctx.gateway),
                clock.clone(),
                ctx.config.admin_fee_percent,
            ),
            clock,
            lifecycle: LifecycleService::new(),
            grace_minutes: ctx.config.no_show_grace_minutes,
            link_reminder_window_hours: ctx.config.link_reminder_window_hours,
        }
    }

    /// Runs one full sweep over all non-terminal appointments and reports what
    /// it did.
    pub async fn run_sweep(&self) -> SweepSummary {
        let now = self.clock.now();
        let mut summary = SweepSummary::default();

        // Snapshot candidates first; every write below re-validates against
        // current state.
        let candidates: Vec<Appointment> = match self
            .store
            .with_state(|state| {
                Ok(state
                    .appointments()
                    .filter(|a| !a.status.is_terminal())
                    .cloned()
                    .collect())
            })
            .await
        {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!("Sweep could not snapshot appointments: {}", e);
                summary.failures += 1;
                return summary;
            }
        };

        for candidate in candidates {
            if let Err(e) = self.sweep_one(&candidate, now, &mut summary).await {
                warn!("Sweep failed for appointment {}: {}", candidate.id, e);
                summary.failures += 1;
            }
        }

        if summary.total_cancelled() > 0
            || summary.link_reminders > 0
            || summary.diagnosis_reminders > 0
        {
            info!(
                "Sweep done: {} cancelled ({} pending, {} unpaid, {} abandoned, {} unlinked), {} refunds, {} link reminders, {} diagnosis reminders, {} failures",
                summary.total_cancelled(),
                summary.cancelled_pending,
                summary.cancelled_unpaid,
                summary.cancelled_abandoned,
                summary.cancelled_unlinked,
                summary.refunds_requested,
                summary.link_reminders,
                summary.diagnosis_reminders,
                summary.failures
            );
        } else {
            debug!("Sweep done: nothing to reconcile");
        }

        summary
    }

    async fn sweep_one(
        &self,
        candidate: &Appointment,
        now: chrono::DateTime<chrono::Utc>,
        summary: &mut SweepSummary,
    ) -> Result<(), ConsultationError> {
        match candidate.status {
            AppointmentStatus::Pending if now > candidate.schedule => {
                let reason = "doctor did not respond in time";
                if let Some(cancelled) = self
                    .cancel_if_still(candidate.id, AppointmentStatus::Pending, false, false)
                    .await?
                {
                    summary.cancelled_pending += 1;
                    self.notify_cancelled(&cancelled, reason).await;
                }
            }
            AppointmentStatus::AwaitingPayment if now > candidate.schedule => {
                let reason = "payment was not completed before the scheduled time";
                if let Some(cancelled) = self
                    .cancel_if_still(candidate.id, AppointmentStatus::AwaitingPayment, true, false)
                    .await?
                {
                    summary.cancelled_unpaid += 1;
                    self.notify_cancelled(&cancelled, reason).await;
                }
            }
            AppointmentStatus::AwaitingJoin => {
                let deadline = candidate.schedule + Duration::minutes(self.grace_minutes);
                if now > deadline && !candidate.is_doctor_present && !candidate.is_patient_present {
                    let reason = "nobody joined the consultation";
                    if let Some(cancelled) = self
                        .cancel_if_still(candidate.id, AppointmentStatus::AwaitingJoin, false, true)
                        .await?
                    {
                        summary.cancelled_abandoned += 1;
                        self.refund_cancelled(&cancelled, reason, summary).await?;
                        self.notify_cancelled(&cancelled, reason).await;
                    }
                }
            }
            AppointmentStatus::Paid if candidate.meeting_link.is_none() => {
                if now > candidate.schedule {
                    let reason = "doctor never provided a meeting link";
                    if let Some(cancelled) = self
                        .cancel_if_still(candidate.id, AppointmentStatus::Paid, false, false)
                        .await?
                    {
                        summary.cancelled_unlinked += 1;
                        self.refund_cancelled(&cancelled, reason, summary).await?;
                        self.notify_cancelled(&cancelled, reason).await;
                    }
                } else if !candidate.link_reminder_sent
                    && candidate.schedule - now <= Duration::hours(self.link_reminder_window_hours)
                {
                    if let Some(reminded) = self
                        .mark_reminder(candidate.id, AppointmentStatus::Paid, ReminderFlag::Link)
                        .await?
                    {
                        summary.link_reminders += 1;
                        self.dispatch(NotificationKind::MeetingLinkReminder, &reminded, None)
                            .await;
                    }
                }
            }
            AppointmentStatus::InProgress if !candidate.diagnosis_reminder_sent => {
                let overdue = candidate
                    .started_at
                    .is_some_and(|started| now - started > Duration::hours(DIAGNOSIS_REMINDER_HOURS));
                if overdue {
                    if let Some(reminded) = self
                        .mark_reminder(
                            candidate.id,
                            AppointmentStatus::InProgress,
                            ReminderFlag::Diagnosis,
                        )
                        .await?
                    {
                        summary.diagnosis_reminders += 1;
                        self.dispatch(NotificationKind::DiagnosisReminder, &reminded, None)
                            .await;
                    }
                }
            }
            _ => {}
        }

        Ok(())
    }

    /// Cancels the appointment only if it is still in the status the snapshot
    /// saw. Returns None when a concurrent actor moved it first. With
    /// `unattended_only` a join recorded since the snapshot also aborts the
    /// cancellation.
    async fn cancel_if_still(
        &self,
        appointment_id: Uuid,
        expected: AppointmentStatus,
        expire_transaction: bool,
        unattended_only: bool,
    ) -> Result<Option<Appointment>, ConsultationError> {
        let now = self.clock.now();
        self.store
            .with_state(|state| {
                let current = state.appointment(appointment_id)?;
                if current.status != expected {
                    debug!(
                        "Appointment {} moved from {} to {} since the snapshot, skipping",
                        appointment_id, expected, current.status
                    );
                    return Ok(None);
                }
                if unattended_only && (current.is_doctor_present || current.is_patient_present) {
                    return Ok(None);
                }
                self.lifecycle
                    .validate_status_transition(current.status, AppointmentStatus::Cancelled)?;

                if expire_transaction {
                    self.payments.expire_transaction(state, appointment_id);
                }

                let appointment = state.appointment_mut(appointment_id)?;
                appointment.status = AppointmentStatus::Cancelled;
                appointment.updated_at = now;
                Ok(Some(appointment.clone()))
            })
            .await
    }

    async fn mark_reminder(
        &self,
        appointment_id: Uuid,
        expected: AppointmentStatus,
        flag: ReminderFlag,
    ) -> Result<Option<Appointment>, ConsultationError> {
        let now = self.clock.now();
        self.store
            .with_state(|state| {
                let appointment = state.appointment_mut(appointment_id)?;
                if appointment.status != expected {
                    return Ok(None);
                }
                let sent = match flag {
                    ReminderFlag::Link => &mut appointment.link_reminder_sent,
                    ReminderFlag::Diagnosis => &mut appointment.diagnosis_reminder_sent,
                };
                if *sent {
                    return Ok(None);
                }
                *sent = true;
                appointment.updated_at = now;
                Ok(Some(appointment.clone()))
            })
            .await
    }

    async fn refund_cancelled(
        &self,
        appointment: &Appointment,
        reason: &str,
        summary: &mut SweepSummary,
    ) -> Result<(), ConsultationError> {
        if let Some(txn) = self.payments.refund(appointment, reason).await? {
            summary.refunds_requested += 1;
            self.dispatch(
                NotificationKind::RefundIssued,
                appointment,
                Some(&txn.midtrans_order_id),
            )
            .await;
        }
        Ok(())
    }

    async fn notify_cancelled(&self, appointment: &Appointment, reason: &str) {
        info!("Appointment {} cancelled by sweep: {}", appointment.id, reason);
        self.dispatch(NotificationKind::AppointmentCancelled, appointment, Some(reason))
            .await;
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

enum ReminderFlag {
    Link,
    Diagnosis,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};

    use crate::models::{
        ActorRole, BookAppointmentRequest, DecisionAction, DecisionRequest, MeetingLinkRequest,
        PaymentStatus, PresenceRequest,
    };
    use crate::services::booking::ConsultationService;
    use crate::testing::TestContext;

    const SLOT: &str = "2024-01-10T08:00:00+07:00";

    fn ts(raw: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(raw).unwrap().with_timezone(&Utc)
    }

    async fn book(tc: &TestContext) -> Appointment {
        ConsultationService::new(&tc.ctx)
            .book_appointment(BookAppointmentRequest {
                patient_id: tc.patient.id,
                doctor_id: tc.doctor.id,
                schedule: SLOT.to_string(),
            })
            .await
            .unwrap()
    }

    async fn approve(tc: &TestContext, id: Uuid) {
        ConsultationService::new(&tc.ctx)
            .decide(
                id,
                DecisionRequest {
                    doctor_id: tc.doctor.id,
                    action: DecisionAction::Approve,
                    reason: None,
                },
            )
            .await
            .unwrap();
    }

    async fn settle(tc: &TestContext, id: Uuid) {
        let outcome = ConsultationService::new(&tc.ctx)
            .apply_payment_webhook(&format!("ORDER-{}", id), "settlement")
            .await;
        assert!(outcome.applied);
    }

    async fn send_link(tc: &TestContext, id: Uuid) {
        ConsultationService::new(&tc.ctx)
            .set_meeting_link(
                id,
                MeetingLinkRequest {
                    doctor_id: tc.doctor.id,
                    url: "https://meet.example.test/room".to_string(),
                },
            )
            .await
            .unwrap();
    }

    async fn join(tc: &TestContext, id: Uuid, actor_id: Uuid, role: ActorRole) {
        ConsultationService::new(&tc.ctx)
            .record_presence(id, PresenceRequest { actor_id, role })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn unanswered_booking_is_cancelled_one_minute_past_its_slot() {
        let tc = TestContext::new();
        let appointment = book(&tc).await;

        tc.clock.set(ts("2024-01-10T08:01:00+07:00"));
        let summary = TimeoutSweeper::new(&tc.ctx).run_sweep().await;

        assert_eq!(summary.cancelled_pending, 1);
        assert_eq!(summary.failures, 0);
        let current = tc.ctx.store.appointment(appointment.id).await.unwrap();
        assert_eq!(current.status, AppointmentStatus::Cancelled);

        let cancelled_notices: Vec<_> = tc
            .notifier
            .sent()
            .into_iter()
            .filter(|(kind, _, _)| *kind == NotificationKind::AppointmentCancelled)
            .collect();
        assert_eq!(cancelled_notices.len(), 1);
        assert_eq!(
            cancelled_notices[0].2.as_deref(),
            Some("doctor did not respond in time")
        );
    }

    #[tokio::test]
    async fn pending_before_its_slot_is_left_alone() {
        let tc = TestContext::new();
        let appointment = book(&tc).await;

        let summary = TimeoutSweeper::new(&tc.ctx).run_sweep().await;

        assert_eq!(summary.total_cancelled(), 0);
        let current = tc.ctx.store.appointment(appointment.id).await.unwrap();
        assert_eq!(current.status, AppointmentStatus::Pending);
    }

    #[tokio::test]
    async fn unpaid_appointment_is_cancelled_and_its_transaction_expired() {
        let tc = TestContext::new();
        let appointment = book(&tc).await;
        approve(&tc, appointment.id).await;

        tc.clock.set(ts("2024-01-10T08:01:00+07:00"));
        let summary = TimeoutSweeper::new(&tc.ctx).run_sweep().await;

        assert_eq!(summary.cancelled_unpaid, 1);
        assert_eq!(summary.refunds_requested, 0);
        let current = tc.ctx.store.appointment(appointment.id).await.unwrap();
        assert_eq!(current.status, AppointmentStatus::Cancelled);
        let txn = tc.ctx.store.transaction_for_appointment(appointment.id).await.unwrap();
        assert_eq!(txn.status, PaymentStatus::Expire);
    }

    #[tokio::test]
    async fn paid_appointment_without_a_link_is_cancelled_and_refunded() {
        let tc = TestContext::new();
        let appointment = book(&tc).await;
        approve(&tc, appointment.id).await;
        settle(&tc, appointment.id).await;

        tc.clock.set(ts("2024-01-10T08:01:00+07:00"));
        let summary = TimeoutSweeper::new(&tc.ctx).run_sweep().await;

        assert_eq!(summary.cancelled_unlinked, 1);
        assert_eq!(summary.refunds_requested, 1);
        let txn = tc.ctx.store.transaction_for_appointment(appointment.id).await.unwrap();
        assert_eq!(txn.status, PaymentStatus::Refund);
        assert_eq!(tc.gateway.refunds().len(), 1);
        assert_eq!(tc.notifier.count_of(NotificationKind::RefundIssued), 1);
    }

    #[tokio::test]
    async fn link_reminder_fires_once_inside_the_final_day() {
        let tc = TestContext::at("2024-01-08T08:00:00+07:00");
        let appointment = book(&tc).await;
        approve(&tc, appointment.id).await;
        settle(&tc, appointment.id).await;

        // Two days out: too early to nag.
        let sweeper = TimeoutSweeper::new(&tc.ctx);
        assert_eq!(sweeper.run_sweep().await.link_reminders, 0);

        tc.clock.set(ts("2024-01-09T10:00:00+07:00"));
        assert_eq!(sweeper.run_sweep().await.link_reminders, 1);
        assert_eq!(sweeper.run_sweep().await.link_reminders, 0);
        assert_eq!(tc.notifier.count_of(NotificationKind::MeetingLinkReminder), 1);

        let current = tc.ctx.store.appointment(appointment.id).await.unwrap();
        assert!(current.link_reminder_sent);
        assert_eq!(current.status, AppointmentStatus::Paid);
    }

    #[tokio::test]
    async fn abandoned_consultation_is_cancelled_after_the_grace_period() {
        let tc = TestContext::new();
        let appointment = book(&tc).await;
        approve(&tc, appointment.id).await;
        settle(&tc, appointment.id).await;
        send_link(&tc, appointment.id).await;

        // One minute inside the grace period nothing happens.
        tc.clock.set(ts("2024-01-10T08:14:00+07:00"));
        let sweeper = TimeoutSweeper::new(&tc.ctx);
        assert_eq!(sweeper.run_sweep().await.cancelled_abandoned, 0);

        tc.clock.set(ts("2024-01-10T08:16:00+07:00"));
        let summary = sweeper.run_sweep().await;
        assert_eq!(summary.cancelled_abandoned, 1);
        assert_eq!(summary.refunds_requested, 1);
        let current = tc.ctx.store.appointment(appointment.id).await.unwrap();
        assert_eq!(current.status, AppointmentStatus::Cancelled);
    }

    #[tokio::test]
    async fn a_single_present_party_blocks_the_no_show_cancellation() {
        let tc = TestContext::new();
        let appointment = book(&tc).await;
        approve(&tc, appointment.id).await;
        settle(&tc, appointment.id).await;
        send_link(&tc, appointment.id).await;
        join(&tc, appointment.id, tc.patient.id, ActorRole::Patient).await;

        tc.clock.set(ts("2024-01-10T08:30:00+07:00"));
        let summary = TimeoutSweeper::new(&tc.ctx).run_sweep().await;

        assert_eq!(summary.cancelled_abandoned, 0);
        let current = tc.ctx.store.appointment(appointment.id).await.unwrap();
        assert_eq!(current.status, AppointmentStatus::AwaitingJoin);
    }

    #[tokio::test]
    async fn long_running_consultation_gets_one_diagnosis_reminder() {
        let tc = TestContext::new();
        let appointment = book(&tc).await;
        approve(&tc, appointment.id).await;
        settle(&tc, appointment.id).await;
        send_link(&tc, appointment.id).await;

        tc.clock.set(ts("2024-01-10T08:00:00+07:00"));
        join(&tc, appointment.id, tc.doctor.id, ActorRole::Doctor).await;
        join(&tc, appointment.id, tc.patient.id, ActorRole::Patient).await;

        tc.clock.set(ts("2024-01-10T10:01:00+07:00"));
        let sweeper = TimeoutSweeper::new(&tc.ctx);
        assert_eq!(sweeper.run_sweep().await.diagnosis_reminders, 1);
        assert_eq!(sweeper.run_sweep().await.diagnosis_reminders, 0);
        assert_eq!(tc.notifier.count_of(NotificationKind::DiagnosisReminder), 1);

        let current = tc.ctx.store.appointment(appointment.id).await.unwrap();
        assert_eq!(current.status, AppointmentStatus::InProgress);
    }
}
