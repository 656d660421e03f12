use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use common::Reading;

use crate::error::SensorError;

/// Everything the device knows about itself. Only ever handed out by value.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Snapshot {
    /// Bluetooth hardware address, empty until bring-up resolves it
    pub identity: String,
    pub reading: Reading,
    /// The last acquisition failure. Stays set until a read succeeds.
    pub error: Option<SensorError>,
}

impl Snapshot {
    pub fn has_identity(&self) -> bool {
        !self.identity.is_empty()
    }
}

/// The single record shared by the sensor loop, the Bluetooth handlers and the
/// reporter. The lock only ever guards a copy in or out, never I/O.
#[derive(Clone, Debug, Default)]
pub struct DeviceState {
    inner: Arc<Mutex<Snapshot>>,
}

impl DeviceState {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Snapshot> {
        // A panicking writer can only have left a whole field assignment
        // behind, so the data is still usable.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Consistent copy of every field, taken under one lock acquisition.
    pub fn read(&self) -> Snapshot {
        self.lock().clone()
    }

    /// Apply `mutator` atomically and return the resulting snapshot.
    pub fn write<F>(&self, mutator: F) -> Snapshot
    where
        F: FnOnce(&mut Snapshot),
    {
        let mut state = self.lock();
        mutator(&mut state);
        state.clone()
    }

    /// Store a successful reading and clear any previous error.
    pub fn record_reading(&self, reading: Reading) -> Snapshot {
        self.write(|state| {
            state.reading = reading;
            state.error = None;
        })
    }

    /// Store an acquisition failure. The previous reading is left in place.
    pub fn record_error(&self, error: SensorError) -> Snapshot {
        self.write(|state| state.error = Some(error))
    }

    /// Set the device identity. Returns `false` if it was already resolved,
    /// in which case the existing identity is kept.
    pub fn set_identity(&self, identity: impl Into<String>) -> bool {
        let identity = identity.into();
        let mut state = self.lock();
        if state.has_identity() {
            return false;
        }
        state.identity = identity;
        true
    }
}
