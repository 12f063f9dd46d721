//! Lifecycle state of the depth model.
//!
use std::sync::{Mutex, PoisonError};

use serde::Serialize;

/// Where the depth model is in its lifecycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ModelState {
    #[default]
    Pending,
    /// Download progress in percent.
    Downloading { progress: f32 },
    Loading,
    Ready,
    Failed { reason: String },
}

/// Shared, thread-safe model state.
#[derive(Debug, Default)]
pub struct ModelStatus {
    state: Mutex<ModelState>,
}

impl ModelStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, state: ModelState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    pub fn get(&self) -> ModelState {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.get(), ModelState::Ready)
    }
}
