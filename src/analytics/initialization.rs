//! Per-destination initialization futures and the registry the gateway consults.
//!
//! An [`InitializationFuture`] is created once per destination by whoever resolves the
//! destination's identity. It moves from pending to settled exactly once and can be awaited by
//! any number of clones. The gateway never awaits a future it was not handed at construction: it
//! works from an [`InitializationSnapshot`] taken when it was created.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use futures::channel::oneshot;
use futures::future::{self, join_all, BoxFuture, FutureExt, Shared};

use crate::analytics::error::{already_exists, AnalyticsResult};

/// Completion token marking that a destination's identity has been resolved.
///
/// Success and failure are not distinguished: the only observable transition is pending to
/// settled, and it never reverts.
#[derive(Clone)]
pub struct InitializationFuture {
    settled: Arc<AtomicBool>,
    signal: Shared<BoxFuture<'static, ()>>,
}

impl InitializationFuture {
    /// A future that is already settled.
    pub fn settled() -> Self {
        Self {
            settled: Arc::new(AtomicBool::new(true)),
            signal: future::ready(()).boxed().shared(),
        }
    }

    /// Adapts an arbitrary future. It counts as pending until it has been driven to completion
    /// by one of its waiters.
    pub fn from_future<F>(future: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let settled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&settled);
        let signal = async move {
            future.await;
            flag.store(true, Ordering::SeqCst);
        }
        .boxed()
        .shared();
        Self { settled, signal }
    }

    pub fn is_settled(&self) -> bool {
        self.settled.load(Ordering::SeqCst)
    }

    pub fn is_pending(&self) -> bool {
        !self.is_settled()
    }

    /// Whether both handles observe the same initialization.
    #[cfg(test)]
    pub(crate) fn same_future(&self, other: &InitializationFuture) -> bool {
        Arc::ptr_eq(&self.settled, &other.settled)
    }
}

impl Future for InitializationFuture {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        self.signal.poll_unpin(cx)
    }
}

impl fmt::Debug for InitializationFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InitializationFuture")
            .field("settled", &self.is_settled())
            .finish()
    }
}

/// Settling half of an [`InitializationFuture`]. Dropping it settles the future as well, so an
/// identity fetch that bails out early can never leave dependent commands waiting forever.
#[derive(Debug)]
pub struct InitializationResolver {
    settled: Arc<AtomicBool>,
    sender: Option<oneshot::Sender<()>>,
}

impl InitializationResolver {
    pub fn settle(mut self) {
        self.finish();
    }

    fn finish(&mut self) {
        if let Some(sender) = self.sender.take() {
            self.settled.store(true, Ordering::SeqCst);
            // Waiters treat a cancelled channel as settled too, so a closed receiver is fine.
            let _ = sender.send(());
        }
    }
}

impl Drop for InitializationResolver {
    fn drop(&mut self) {
        self.finish();
    }
}

/// Creates a pending initialization future together with the handle that settles it.
pub fn initialization_channel() -> (InitializationResolver, InitializationFuture) {
    let (sender, receiver) = oneshot::channel::<()>();
    let settled = Arc::new(AtomicBool::new(false));
    let future = InitializationFuture {
        settled: Arc::clone(&settled),
        signal: receiver.map(|_| ()).boxed().shared(),
    };
    let resolver = InitializationResolver {
        settled,
        sender: Some(sender),
    };
    (resolver, future)
}

/// Append-only mapping from measurement ID to its initialization future.
#[derive(Clone, Debug, Default)]
pub struct InitializationRegistry {
    entries: Arc<Mutex<BTreeMap<String, InitializationFuture>>>,
}

impl InitializationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new pending initialization and hands back its resolver.
    pub fn register(&self, measurement_id: &str) -> AnalyticsResult<InitializationResolver> {
        let (resolver, future) = initialization_channel();
        self.insert(measurement_id, future)?;
        Ok(resolver)
    }

    pub fn insert(&self, measurement_id: &str, future: InitializationFuture) -> AnalyticsResult<()> {
        let mut entries = self.lock();
        if entries.contains_key(measurement_id) {
            return Err(already_exists(measurement_id));
        }
        entries.insert(measurement_id.to_string(), future);
        Ok(())
    }

    pub fn get(&self, measurement_id: &str) -> Option<InitializationFuture> {
        self.lock().get(measurement_id).cloned()
    }

    pub fn contains(&self, measurement_id: &str) -> bool {
        self.lock().contains_key(measurement_id)
    }

    pub fn pending_ids(&self) -> Vec<String> {
        self.lock()
            .iter()
            .filter(|(_, future)| future.is_pending())
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Freezes the current set of registrations. Later registrations are not visible through the
    /// returned snapshot, while settlement of the captured futures is.
    pub fn snapshot(&self) -> InitializationSnapshot {
        InitializationSnapshot {
            entries: Arc::new(self.lock().clone()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, InitializationFuture>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Read-only view of the registry held by one gateway for its whole lifetime.
#[derive(Clone, Debug, Default)]
pub struct InitializationSnapshot {
    entries: Arc<BTreeMap<String, InitializationFuture>>,
}

impl InitializationSnapshot {
    pub fn get(&self, measurement_id: &str) -> Option<&InitializationFuture> {
        self.entries.get(measurement_id)
    }

    pub fn contains(&self, measurement_id: &str) -> bool {
        self.entries.contains_key(measurement_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn pending_ids(&self) -> Vec<String> {
        self.pending().ids().map(str::to_string).collect()
    }

    /// Number of futures in the snapshot that have settled. Never decreases.
    pub fn settled_count(&self) -> usize {
        self.entries
            .values()
            .filter(|future| future.is_settled())
            .count()
    }

    /// Every future in the snapshot that has not settled yet.
    pub fn pending(&self) -> WaitSet {
        let members = self
            .entries
            .iter()
            .filter(|(_, future)| future.is_pending())
            .map(|(id, future)| (id.clone(), future.clone()))
            .collect();
        WaitSet { members }
    }

    /// The future registered for `measurement_id` when it is still pending, otherwise nothing.
    pub fn pending_for(&self, measurement_id: &str) -> WaitSet {
        let members = self
            .entries
            .get_key_value(measurement_id)
            .filter(|(_, future)| future.is_pending())
            .map(|(id, future)| (id.clone(), future.clone()))
            .into_iter()
            .collect();
        WaitSet { members }
    }
}

impl FromIterator<(String, InitializationFuture)> for InitializationSnapshot {
    fn from_iter<T: IntoIterator<Item = (String, InitializationFuture)>>(iter: T) -> Self {
        Self {
            entries: Arc::new(iter.into_iter().collect()),
        }
    }
}

/// Initialization futures a single command has to wait for, fixed when it is classified.
#[derive(Clone, Debug, Default)]
pub struct WaitSet {
    members: Vec<(String, InitializationFuture)>,
}

impl WaitSet {
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> + '_ {
        self.members.iter().map(|(id, _)| id.as_str())
    }

    /// True once every member has settled, in whatever order.
    pub fn is_settled(&self) -> bool {
        self.members.iter().all(|(_, future)| future.is_settled())
    }

    pub async fn wait(self) {
        join_all(self.members.into_iter().map(|(_, future)| future)).await;
    }
}
