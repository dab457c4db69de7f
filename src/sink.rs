//! Delivery of finished profiles.
//!
//! A profiler either hands its profiles to a caller-supplied callback, once,
//! after the whole run, or appends each profile to a [`PendingProfiles`]
//! store as soon as it is finished. The store is drained by a single
//! designated aggregator.

use crate::profile::Profile;
use parking_lot::Mutex;
use std::sync::{Arc, OnceLock};

/// Callback receiving every profile of one run, in burst order.
///
/// Invoked on the sampling thread, exactly once per profiler.
pub type CompletedCallback = Box<dyn FnOnce(Vec<Profile>) + Send + 'static>;

/// Thread-safe accumulation of profiles awaiting a harvester.
///
/// The lock is only held for the container operation itself.
#[derive(Debug, Default)]
pub struct PendingProfiles {
    profiles: Mutex<Vec<Profile>>,
}

static GLOBAL_STORE: OnceLock<Arc<PendingProfiles>> = OnceLock::new();

impl PendingProfiles {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide store used by profilers without a custom callback
    pub fn global() -> Arc<PendingProfiles> {
        GLOBAL_STORE
            .get_or_init(|| Arc::new(PendingProfiles::new()))
            .clone()
    }

    pub fn append(&self, profile: Profile) {
        self.profiles.lock().push(profile);
    }

    /// Remove and return everything stored so far.
    ///
    /// Concurrent drains never see the same profile twice: each takes the
    /// whole container under the lock.
    pub fn drain(&self) -> Vec<Profile> {
        std::mem::take(&mut *self.profiles.lock())
    }

    pub fn len(&self) -> usize {
        self.profiles.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.lock().is_empty()
    }
}

/// Where a scheduler publishes its profiles.
pub enum ProfileSink {
    /// Batch everything and invoke the callback when the run ends
    Custom {
        callback: CompletedCallback,
        batch: Vec<Profile>,
    },
    /// Append each profile to the store as soon as it is finished
    Pending(Arc<PendingProfiles>),
}

impl ProfileSink {
    pub fn custom(callback: CompletedCallback) -> Self {
        ProfileSink::Custom {
            callback,
            batch: Vec::new(),
        }
    }

    pub fn pending(store: Arc<PendingProfiles>) -> Self {
        ProfileSink::Pending(store)
    }

    /// Publish one finished profile
    pub fn publish(&mut self, profile: Profile) {
        match self {
            ProfileSink::Custom { batch, .. } => batch.push(profile),
            ProfileSink::Pending(store) => store.append(profile),
        }
    }

    /// End of the run: hand the batch to the custom callback, if any
    pub fn complete(self) {
        if let ProfileSink::Custom { callback, batch } = self {
            callback(batch);
        }
    }
}

impl std::fmt::Debug for ProfileSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProfileSink::Custom { batch, .. } => f
                .debug_struct("Custom")
                .field("batched", &batch.len())
                .finish(),
            ProfileSink::Pending(store) => f.debug_tuple("Pending").field(store).finish(),
        }
    }
}
