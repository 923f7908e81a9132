//! Named slots standing in for the globals a page exposes to gtag.
//!
//! A data layer and a gtag function are looked up by name, the same way a page addresses
//! `window[dataLayerName]` and `window[gtagName]`. Pass a [`GtagEnvironment`] explicitly to keep
//! contexts isolated, or use [`GtagEnvironment::shared`] for the process-wide one.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, LazyLock, Mutex, MutexGuard, PoisonError};

use crate::analytics::data_layer::DataLayer;
use crate::analytics::gtag::Gtag;

#[derive(Default)]
struct EnvironmentSlots {
    data_layers: BTreeMap<String, DataLayer>,
    gtags: BTreeMap<String, Gtag>,
}

#[derive(Clone, Default)]
pub struct GtagEnvironment {
    slots: Arc<Mutex<EnvironmentSlots>>,
}

impl fmt::Debug for GtagEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slots = self.lock();
        f.debug_struct("GtagEnvironment")
            .field("data_layers", &slots.data_layers.keys().collect::<Vec<_>>())
            .field("gtags", &slots.gtags.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl GtagEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Self {
        static INSTANCE: LazyLock<GtagEnvironment> = LazyLock::new(GtagEnvironment::new);
        INSTANCE.clone()
    }

    /// Returns the queue stored under `name`, creating an empty one first if needed.
    pub fn get_or_create_data_layer(&self, name: &str) -> DataLayer {
        self.lock()
            .data_layers
            .entry(name.to_string())
            .or_default()
            .clone()
    }

    pub fn data_layer(&self, name: &str) -> Option<DataLayer> {
        self.lock().data_layers.get(name).cloned()
    }

    pub fn gtag(&self, name: &str) -> Option<Gtag> {
        self.lock().gtags.get(name).cloned()
    }

    /// Stores `gtag` under `name`, replacing the current occupant.
    pub fn install_gtag(&self, name: &str, gtag: Gtag) {
        self.lock().gtags.insert(name.to_string(), gtag);
    }

    /// Forgets every slot. Handles obtained earlier keep working but are no longer reachable by
    /// name.
    #[cfg(test)]
    pub(crate) fn reset(&self) {
        *self.lock() = EnvironmentSlots::default();
    }

    fn lock(&self) -> MutexGuard<'_, EnvironmentSlots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
