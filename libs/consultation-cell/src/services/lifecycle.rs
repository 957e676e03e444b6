// libs/consultation-cell/src/services/lifecycle.rs
use tracing::{debug, warn};

use crate::models::{AppointmentStatus, ConsultationError};

/// The authoritative transition table for appointment status. Every mutation
/// of `Appointment::status` anywhere in the cell goes through
/// `validate_status_transition`; callers cannot skip states.
pub struct LifecycleService;

impl LifecycleService {
    pub fn new() -> Self {
        Self
    }

    /// Validate that a status transition is allowed. Re-applying the current
    /// status is accepted as a no-op so webhook redeliveries and overlapping
    /// sweeps stay safe. Request entry points that act from exactly one
    /// source status (decide, reschedule) pin that status themselves before
    /// consulting the table.
    pub fn validate_status_transition(
        &self,
        current_status: AppointmentStatus,
        new_status: AppointmentStatus,
    ) -> Result<(), ConsultationError> {
        debug!("Validating status transition {} -> {}", current_status, new_status);

        if current_status == new_status {
            return Ok(());
        }

        if !self.valid_transitions(current_status).contains(&new_status) {
            warn!("Invalid status transition attempted: {} -> {}", current_status, new_status);
            return Err(ConsultationError::InvalidStatusTransition(current_status));
        }

        Ok(())
    }

    /// All valid next statuses for a given current status.
    pub fn valid_transitions(&self, current_status: AppointmentStatus) -> Vec<AppointmentStatus> {
        match current_status {
            AppointmentStatus::Pending => vec![
                AppointmentStatus::AwaitingPayment, // doctor approves
                AppointmentStatus::Rejected,        // doctor rejects
                AppointmentStatus::Cancelled,       // sweeper: slot passed unanswered
            ],
            // Legacy resting label; behaves as awaiting payment.
            AppointmentStatus::Approved => vec![
                AppointmentStatus::AwaitingPayment,
                AppointmentStatus::Paid,
                AppointmentStatus::Cancelled,
            ],
            AppointmentStatus::AwaitingPayment => vec![
                AppointmentStatus::Paid,      // settlement/capture webhook
                AppointmentStatus::Cancelled, // sweeper: slot passed unpaid
            ],
            AppointmentStatus::Paid => vec![
                AppointmentStatus::AwaitingJoin, // doctor sets meeting link
                AppointmentStatus::Cancelled,    // sweeper: no link before slot
            ],
            AppointmentStatus::AwaitingJoin => vec![
                AppointmentStatus::InProgress, // both parties present
                AppointmentStatus::Cancelled,  // sweeper: nobody joined
            ],
            AppointmentStatus::InProgress => vec![
                AppointmentStatus::Completed, // diagnosis submitted
            ],
            AppointmentStatus::Rejected => vec![
                AppointmentStatus::Pending, // patient reschedules
            ],
            // Legacy resting label; a reschedule lands in Pending.
            AppointmentStatus::Rescheduled => vec![AppointmentStatus::Pending],
            // Terminal states.
            AppointmentStatus::Completed => vec![],
            AppointmentStatus::Cancelled => vec![],
        }
    }
}

impl Default for LifecycleService {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use AppointmentStatus::*;

    #[test]
    fn approval_skips_a_separate_approved_state() {
        let lifecycle = LifecycleService::new();
        assert!(lifecycle.validate_status_transition(Pending, AwaitingPayment).is_ok());
        assert!(!lifecycle.valid_transitions(Pending).contains(&Approved));
    }

    #[test]
    fn states_cannot_be_skipped() {
        let lifecycle = LifecycleService::new();
        for (from, to) in [
            (Pending, Paid),
            (Pending, InProgress),
            (AwaitingPayment, AwaitingJoin),
            (Paid, InProgress),
            (AwaitingJoin, Completed),
            (Rejected, AwaitingPayment),
        ] {
            let err = lifecycle.validate_status_transition(from, to).unwrap_err();
            assert!(matches!(err, ConsultationError::InvalidStatusTransition(_)), "{} -> {}", from, to);
        }
    }

    #[test]
    fn terminal_states_have_no_exits() {
        let lifecycle = LifecycleService::new();
        assert!(lifecycle.valid_transitions(Completed).is_empty());
        assert!(lifecycle.valid_transitions(Cancelled).is_empty());
    }

    #[test]
    fn rejected_can_return_to_pending_for_reschedule() {
        let lifecycle = LifecycleService::new();
        assert!(lifecycle.validate_status_transition(Rejected, Pending).is_ok());
        assert!(lifecycle.validate_status_transition(Rejected, Cancelled).is_err());
    }

    #[test]
    fn reapplying_the_same_status_is_a_no_op() {
        let lifecycle = LifecycleService::new();
        assert!(lifecycle.validate_status_transition(Paid, Paid).is_ok());
        assert!(lifecycle.validate_status_transition(Cancelled, Cancelled).is_ok());
    }
}
