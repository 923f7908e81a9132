use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::analytics::command::GtagCall;

/// Shared, append-only queue of gtag commands.
///
/// Every clone refers to the same storage. Entries are only ever appended; the delivery side
/// reads them through [`DataLayer::entries`] and friends.
#[derive(Clone, Debug, Default)]
pub struct DataLayer {
    entries: Arc<Mutex<Vec<GtagCall>>>,
}

impl DataLayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, call: GtagCall) {
        self.lock().push(call);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn get(&self, index: usize) -> Option<GtagCall> {
        self.lock().get(index).cloned()
    }

    pub fn last(&self) -> Option<GtagCall> {
        self.lock().last().cloned()
    }

    /// Returns a copy of the queue contents in append order.
    pub fn entries(&self) -> Vec<GtagCall> {
        self.lock().clone()
    }

    /// Whether both handles point at the same queue.
    pub fn same_queue(&self, other: &DataLayer) -> bool {
        Arc::ptr_eq(&self.entries, &other.entries)
    }

    fn lock(&self) -> MutexGuard<'_, Vec<GtagCall>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map};

    #[test]
    fn clones_share_storage() {
        let layer = DataLayer::new();
        let other = layer.clone();
        assert!(layer.is_empty());

        other.push(GtagCall::set(Map::new()));
        layer.push(GtagCall::from_arguments(vec![json!("js"), json!("now")]));

        assert_eq!(layer.len(), 2);
        assert_eq!(layer.get(0), Some(GtagCall::set(Map::new())));
        assert_eq!(other.last(), layer.get(1));
        assert!(layer.same_queue(&other));
        assert!(!layer.same_queue(&DataLayer::new()));
    }
}
