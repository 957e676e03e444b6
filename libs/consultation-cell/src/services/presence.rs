// libs/consultation-cell/src/services/presence.rs
use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use crate::clock::ClinicClock;
use crate::models::{ActorRole, Appointment, AppointmentStatus, ConsultationError};
use crate::services::lifecycle::LifecycleService;
use crate::store::ClinicStore;

/// Records join events from both parties and promotes the appointment to
/// in-progress once everyone is in the room.
pub struct PresenceTracker {
    store: Arc<ClinicStore>,
    clock: ClinicClock,
    lifecycle: LifecycleService,
}

impl PresenceTracker {
    pub fn new(store: Arc<ClinicStore>, clock: ClinicClock) -> Self {
        Self {
            store,
            clock,
            lifecycle: LifecycleService::new(),
        }
    }

    /// Sets the presence flag for the given actor. Repeated joins are
    /// no-ops; an actor id that does not match the appointment's assigned
    /// doctor or patient is rejected outright. When both flags are set the
    /// appointment atomically moves to InProgress with started_at stamped.
    pub async fn record_presence(
        &self,
        appointment_id: Uuid,
        actor_id: Uuid,
        role: ActorRole,
    ) -> Result<Appointment, ConsultationError> {
        let now = self.clock.now();

        self.store
            .with_state(|state| {
                let appointment = state.appointment_mut(appointment_id)?;

                if appointment.status != AppointmentStatus::AwaitingJoin {
                    return Err(ConsultationError::InvalidStatusTransition(appointment.status));
                }

                match role {
                    ActorRole::Doctor => {
                        if appointment.doctor_id != actor_id {
                            return Err(ConsultationError::Unauthorized);
                        }
                        if !appointment.is_doctor_present {
                            appointment.is_doctor_present = true;
                            appointment.doctor_join_time = Some(now);
                            appointment.updated_at = now;
                        }
                    }
                    ActorRole::Patient => {
                        if appointment.patient_id != actor_id {
                            return Err(ConsultationError::Unauthorized);
                        }
                        if !appointment.is_patient_present {
                            appointment.is_patient_present = true;
                            appointment.patient_join_time = Some(now);
                            appointment.updated_at = now;
                        }
                    }
                }

                if appointment.both_parties_present() {
                    self.lifecycle.validate_status_transition(
                        appointment.status,
                        AppointmentStatus::InProgress,
                    )?;
                    appointment.status = AppointmentStatus::InProgress;
                    appointment.started_at = Some(now);
                    appointment.updated_at = now;
                    info!("Appointment {} is now in progress", appointment_id);
                }

                Ok(appointment.clone())
            })
            .await
    }

    /// Guard used before a diagnosis submission is accepted: the
    /// consultation must actually be running.
    pub fn can_submit_diagnosis(appointment: &Appointment) -> bool {
        appointment.status == AppointmentStatus::InProgress && appointment.started_at.is_some()
    }
}
