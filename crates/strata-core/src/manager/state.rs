//! Engine lifecycle state.

use std::fmt;

use parking_lot::RwLock;
use tracing::info;

use crate::error::{Error, Result};

/// Lifecycle states, in the order the engine moves through them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum State {
    /// Constructed, storage not opened.
    Created,
    /// Storage opened.
    Started,
    /// Schema built and tables synchronized.
    SchemaStorageInitialized,
    /// Catalog and seed records written.
    SchemaRecordsInitialized,
    /// Ready.
    Initialized,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            State::Created => "CREATED",
            State::Started => "STARTED",
            State::SchemaStorageInitialized => "SCHEMA_STORAGE_INITIALIZED",
            State::SchemaRecordsInitialized => "SCHEMA_RECORDS_INITIALIZED",
            State::Initialized => "INITIALIZED",
        };
        f.write_str(name)
    }
}

/// Holds the current state.
#[derive(Debug)]
pub struct StateManager {
    state: RwLock<State>,
}

impl StateManager {
    /// Start in [`State::Created`].
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::Created),
        }
    }

    /// Current state.
    pub fn current(&self) -> State {
        *self.state.read()
    }

    /// Move to `next`.
    pub fn transition(&self, next: State) {
        let mut state = self.state.write();
        info!(from = %*state, to = %next, "state transition");
        *state = next;
    }

    /// Fail unless the engine reached `required`.
    pub fn require(&self, required: State) -> Result<()> {
        let actual = self.current();
        if actual < required {
            return Err(Error::InvalidState { required, actual });
        }
        Ok(())
    }
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new()
    }
}
