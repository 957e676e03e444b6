// libs/consultation-cell/src/directory.rs
use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{ConsultationError, DoctorProfile, PatientProfile};

/// Read-only identity and pricing lookups, served by the user/doctor platform.
/// The core only ever reads through this seam.
#[async_trait]
pub trait Directory: Send + Sync {
    async fn doctor(&self, id: Uuid) -> Result<DoctorProfile, ConsultationError>;
    async fn patient(&self, id: Uuid) -> Result<PatientProfile, ConsultationError>;
}

/// Directory backed by in-process maps. The API binary seeds it at boot; tests
/// seed it per case. Doctor price updates here never touch existing
/// transactions, whose fee split is fixed at creation.
#[derive(Default)]
pub struct InMemoryDirectory {
    doctors: RwLock<HashMap<Uuid, DoctorProfile>>,
    patients: RwLock<HashMap<Uuid, PatientProfile>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert_doctor(&self, doctor: DoctorProfile) {
        self.doctors
            .write()
            .expect("directory lock poisoned")
            .insert(doctor.id, doctor);
    }

    pub fn upsert_patient(&self, patient: PatientProfile) {
        self.patients
            .write()
            .expect("directory lock poisoned")
            .insert(patient.id, patient);
    }
}

#[async_trait]
impl Directory for InMemoryDirectory {
    async fn doctor(&self, id: Uuid) -> Result<DoctorProfile, ConsultationError> {
        self.doctors
            .read()
            .expect("directory lock poisoned")
            .get(&id)
            .cloned()
            .ok_or(ConsultationError::DoctorNotFound)
    }

    async fn patient(&self, id: Uuid) -> Result<PatientProfile, ConsultationError> {
        self.patients
            .read()
            .expect("directory lock poisoned")
            .get(&id)
            .cloned()
            .ok_or(ConsultationError::PatientNotFound)
    }
}
