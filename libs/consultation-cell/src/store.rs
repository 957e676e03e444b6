// libs/consultation-cell/src/store.rs
use std::collections::HashMap;

use tokio::sync::Mutex;
use uuid::Uuid;

use crate::models::{Appointment, ConsultationError, Transaction};

/// All appointment and transaction state, only ever touched while the store
/// lock is held.
#[derive(Default)]
pub struct StoreState {
    appointments: HashMap<Uuid, Appointment>,
    transactions: HashMap<Uuid, Transaction>,
    txn_by_appointment: HashMap<Uuid, Uuid>,
    txn_by_order_ref: HashMap<String, Uuid>,
}

impl StoreState {
    pub fn appointment(&self, id: Uuid) -> Result<&Appointment, ConsultationError> {
        self.appointments.get(&id).ok_or(ConsultationError::NotFound)
    }

    pub fn appointment_mut(&mut self, id: Uuid) -> Result<&mut Appointment, ConsultationError> {
        self.appointments.get_mut(&id).ok_or(ConsultationError::NotFound)
    }

    pub fn appointments(&self) -> impl Iterator<Item = &Appointment> {
        self.appointments.values()
    }

    pub fn insert_appointment(&mut self, appointment: Appointment) {
        self.appointments.insert(appointment.id, appointment);
    }

    /// A transaction is created at most once per appointment; the 1:1 link is
    /// never replaced.
    pub fn insert_transaction(&mut self, txn: Transaction) -> Result<(), ConsultationError> {
        if self.txn_by_appointment.contains_key(&txn.appointment_id) {
            return Err(ConsultationError::TransactionExists);
        }
        self.txn_by_appointment.insert(txn.appointment_id, txn.id);
        self.txn_by_order_ref.insert(txn.midtrans_order_id.clone(), txn.id);
        self.transactions.insert(txn.id, txn);
        Ok(())
    }

    pub fn transaction_for_appointment(&self, appointment_id: Uuid) -> Option<&Transaction> {
        self.txn_by_appointment
            .get(&appointment_id)
            .and_then(|id| self.transactions.get(id))
    }

    pub fn transaction_for_appointment_mut(&mut self, appointment_id: Uuid) -> Option<&mut Transaction> {
        let id = *self.txn_by_appointment.get(&appointment_id)?;
        self.transactions.get_mut(&id)
    }

    pub fn transaction_by_order_ref(&self, order_ref: &str) -> Option<&Transaction> {
        self.txn_by_order_ref
            .get(order_ref)
            .and_then(|id| self.transactions.get(id))
    }

    pub fn transaction_by_order_ref_mut(&mut self, order_ref: &str) -> Option<&mut Transaction> {
        let id = *self.txn_by_order_ref.get(order_ref)?;
        self.transactions.get_mut(&id)
    }
}

/// In-process store for the consultation core. A single async mutex over the
/// whole state makes each `with_state` closure a serializable unit: conflict
/// check + insert, transition + transaction creation, and webhook application
/// each commit as one piece or not at all.
#[derive(Default)]
pub struct ClinicStore {
    state: Mutex<StoreState>,
}

impl ClinicStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs one atomic read-then-write unit against current state. Callers
    /// must not cache appointment state across units.
    pub async fn with_state<T>(
        &self,
        f: impl FnOnce(&mut StoreState) -> Result<T, ConsultationError>,
    ) -> Result<T, ConsultationError> {
        let mut state = self.state.lock().await;
        f(&mut state)
    }

    pub async fn appointment(&self, id: Uuid) -> Result<Appointment, ConsultationError> {
        let state = self.state.lock().await;
        state.appointment(id).cloned()
    }

    pub async fn transaction_for_appointment(&self, appointment_id: Uuid) -> Option<Transaction> {
        let state = self.state.lock().await;
        state.transaction_for_appointment(appointment_id).cloned()
    }
}
