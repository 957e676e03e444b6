// libs/consultation-cell/src/services/conflict.rs
use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::ConsultationError;
use crate::store::StoreState;

/// Slot conflict checks for a booking candidate. These run against locked
/// store state, inside the same unit of work that inserts the appointment, so
/// two concurrent bookings can never both pass.
pub struct SlotConflictChecker;

impl SlotConflictChecker {
    pub fn new() -> Self {
        Self
    }

    /// Checks, in order: no active appointment for the (doctor, patient)
    /// pair, then no active appointment occupying the exact normalized
    /// instant for the doctor. `exclude` skips the appointment being
    /// rescheduled.
    pub fn check_slot(
        &self,
        state: &StoreState,
        doctor_id: Uuid,
        patient_id: Uuid,
        schedule: DateTime<Utc>,
        exclude: Option<Uuid>,
    ) -> Result<(), ConsultationError> {
        debug!("Checking slot for doctor {} at {}", doctor_id, schedule);

        let relevant = state
            .appointments()
            .filter(|apt| apt.doctor_id == doctor_id && apt.status.is_active())
            .filter(|apt| Some(apt.id) != exclude);

        for apt in relevant {
            if apt.patient_id == patient_id {
                warn!(
                    "Patient {} already has active appointment {} with doctor {}",
                    patient_id, apt.id, doctor_id
                );
                return Err(ConsultationError::DuplicateActiveAppointment);
            }
            if apt.schedule == schedule {
                warn!("Slot {} already taken for doctor {}", schedule, doctor_id);
                return Err(ConsultationError::SlotTaken);
            }
        }

        Ok(())
    }
}

impl Default for SlotConflictChecker {
    fn default() -> Self {
        Self::new()
    }
}
