//! Advisory result-lock tracking.
//!
//! The REST record is the authority on whether a patient's result may be
//! edited. This map only mirrors the `result_is_locked` flag carried by the
//! most recent envelope for each patient and must not gate writes.

use dashmap::DashMap;

use labfeed_protocols::{EventEnvelope, PatientId};

/// Last-seen lock flag per patient.
#[derive(Debug, Default)]
pub struct LockCoordinator {
    states: DashMap<PatientId, bool>,
}

impl LockCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the envelope's flag for its patient. Last write wins; an
    /// envelope without the flag resets the patient to unknown.
    pub fn observe(&self, envelope: &EventEnvelope) {
        let patient = envelope.patient_id();
        match envelope.result_is_locked() {
            Some(locked) => {
                self.states.insert(patient, locked);
            }
            None => {
                self.states.remove(&patient);
            }
        }
    }

    /// Advisory lock state; `None` when no envelope has said.
    pub fn is_locked(&self, patient: PatientId) -> Option<bool> {
        self.states.get(&patient).map(|state| *state)
    }

    pub fn forget(&self, patient: PatientId) {
        self.states.remove(&patient);
    }

    pub fn clear(&self) {
        self.states.clear();
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}
