use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::narsese::ActionToken;

/// Step applied per up/down command when nothing else is configured.
pub const DEFAULT_AUGMENT: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PredictionState {
    pub predicted: f64,
    pub augment: f64,
}

impl Default for PredictionState {
    fn default() -> Self {
        Self {
            predicted: 0.0,
            augment: DEFAULT_AUGMENT,
        }
    }
}

impl PredictionState {
    pub fn apply(&mut self, token: ActionToken) {
        match token {
            ActionToken::Up => self.predicted += self.augment,
            ActionToken::Down => self.predicted -= self.augment,
            ActionToken::Hold => {}
        }
    }
}

/// The agent's running prediction, shared by the environment loop (reader)
/// and the command listener (writer). Every access goes through one lock.
#[derive(Debug, Clone, Default)]
pub struct SharedPredictionState {
    inner: Arc<Mutex<PredictionState>>,
}

impl SharedPredictionState {
    pub fn new(predicted: f64, augment: f64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(PredictionState { predicted, augment })),
        }
    }

    // Each mutation is a single assignment, so a poisoned guard still holds a
    // consistent value.
    fn lock(&self) -> MutexGuard<'_, PredictionState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn snapshot(&self) -> PredictionState {
        *self.lock()
    }

    /// Returns the state after the command was applied.
    pub fn apply_command(&self, token: ActionToken) -> PredictionState {
        let mut state = self.lock();
        state.apply(token);
        *state
    }

    pub fn set_augment(&self, augment: f64) {
        self.lock().augment = augment;
    }

    pub fn set_predicted(&self, predicted: f64) {
        self.lock().predicted = predicted;
    }
}
