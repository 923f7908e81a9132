//! Initialization-aware gtag gateway.
//!
//! The gateway is what callers reach under the configured gtag name. Every command is classified
//! synchronously against the initialization snapshot the gateway was created with:
//!
//! * `set` and unrecognised commands are forwarded immediately.
//! * `config` waits for the initialization of the destination it names, if that destination is
//!   known and still pending.
//! * `event` targeted at exactly one known destination waits for that destination only. Any other
//!   targeting (none, a group alias, a list) waits for every pending initialization.
//!
//! Commands with nothing to wait for are forwarded before [`GtagGateway::dispatch`] returns.
//! Deferred commands are released in call order as soon as their wait set has settled, so a
//! command that only depends on a ready destination can overtake one that is still waiting on a
//! slow destination, while commands released together keep their relative order.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;

use crate::analytics::command::{GtagCall, GtagCommandKind, GtagParams, SendTo};
use crate::analytics::config::GtagSettings;
use crate::analytics::data_layer::DataLayer;
use crate::analytics::environment::GtagEnvironment;
use crate::analytics::error::AnalyticsResult;
use crate::analytics::initialization::{InitializationSnapshot, WaitSet};
use crate::platform::runtime::spawn_detached;

type GtagFn = dyn Fn(GtagCall) + Send + Sync + 'static;

/// A callable gtag function. Fire-and-forget: nothing is returned and nothing is reported back.
#[derive(Clone)]
pub struct Gtag {
    function: Arc<GtagFn>,
}

impl Gtag {
    pub fn new<F>(function: F) -> Self
    where
        F: Fn(GtagCall) + Send + Sync + 'static,
    {
        Self {
            function: Arc::new(function),
        }
    }

    /// The plain gtag snippet: appends every command to `data_layer`.
    pub fn pushing_to(data_layer: DataLayer) -> Self {
        Self::new(move |call| data_layer.push(call))
    }

    pub fn call(&self, call: GtagCall) {
        (self.function)(call);
    }

    /// Accepts a raw positional argument list, e.g. `["event", "purchase", {...}]`.
    pub fn call_arguments(&self, arguments: Vec<Value>) {
        self.call(GtagCall::from_arguments(arguments));
    }

    pub fn config(&self, target_id: &str, params: GtagParams) {
        self.call(GtagCall::config(target_id, params));
    }

    pub fn event(&self, name: &str, params: GtagParams) {
        self.call(GtagCall::event(name, params));
    }

    pub fn set(&self, params: GtagParams) {
        self.call(GtagCall::set(params));
    }

    #[cfg(test)]
    pub(crate) fn same_function(&self, other: &Gtag) -> bool {
        Arc::ptr_eq(&self.function, &other.function)
    }
}

impl fmt::Debug for Gtag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gtag")
            .field("function", &Arc::as_ptr(&self.function))
            .finish()
    }
}

/// Terminal action for a released command, chosen once when the gateway is created.
#[derive(Clone, Debug)]
pub enum Forwarder {
    /// No gtag function existed: commands go straight onto the data layer.
    QueueAppender(DataLayer),
    /// A gtag function was already installed: commands are handed to it unchanged.
    DelegateInvoker(Gtag),
}

impl Forwarder {
    fn forward(&self, call: GtagCall) {
        match self {
            Forwarder::QueueAppender(data_layer) => data_layer.push(call),
            Forwarder::DelegateInvoker(gtag) => gtag.call(call),
        }
    }

    /// The same terminal action as an ungated gtag function.
    pub fn as_gtag(&self) -> Gtag {
        match self {
            Forwarder::QueueAppender(data_layer) => Gtag::pushing_to(data_layer.clone()),
            Forwarder::DelegateInvoker(gtag) => gtag.clone(),
        }
    }
}

struct DeferredCall {
    sequence: u64,
    wait_set: WaitSet,
    call: GtagCall,
}

#[derive(Default)]
struct DeferredQueue {
    calls: VecDeque<DeferredCall>,
    // Settled initializations as of the last scan; a wait set can only become settled after
    // this number grows.
    settled_seen: usize,
}

impl DeferredQueue {
    /// Removes every call whose wait set has settled, keeping call order on both sides.
    fn take_settled(&mut self, initializations: &InitializationSnapshot) -> Vec<GtagCall> {
        if self.calls.is_empty() {
            return Vec::new();
        }
        let settled = initializations.settled_count();
        if settled == self.settled_seen {
            return Vec::new();
        }
        self.settled_seen = settled;

        let (ready, waiting): (VecDeque<_>, VecDeque<_>) = self
            .calls
            .drain(..)
            .partition(|entry| entry.wait_set.is_settled());
        self.calls = waiting;
        ready
            .into_iter()
            .map(|entry| {
                log::debug!("releasing gtag command #{}", entry.sequence);
                entry.call
            })
            .collect()
    }
}

#[derive(Clone)]
pub struct GtagGateway {
    inner: Arc<GatewayInner>,
}

struct GatewayInner {
    initializations: InitializationSnapshot,
    forwarder: Forwarder,
    deferred: Mutex<DeferredQueue>,
    next_sequence: AtomicU64,
}

impl fmt::Debug for GtagGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GtagGateway")
            .field("initializations", &self.inner.initializations)
            .field("forwarder", &self.inner.forwarder)
            .field("deferred", &self.deferred_len())
            .finish()
    }
}

impl GtagGateway {
    pub fn new(initializations: InitializationSnapshot, forwarder: Forwarder) -> Self {
        Self {
            inner: Arc::new(GatewayInner {
                initializations,
                forwarder,
                deferred: Mutex::new(DeferredQueue::default()),
                next_sequence: AtomicU64::new(0),
            }),
        }
    }

    pub fn forwarder(&self) -> &Forwarder {
        &self.inner.forwarder
    }

    pub fn initializations(&self) -> &InitializationSnapshot {
        &self.inner.initializations
    }

    /// Number of commands still waiting for their initializations.
    pub fn deferred_len(&self) -> usize {
        self.inner.lock_deferred().calls.len()
    }

    /// Computes the initializations `call` has to wait for, as of now.
    pub fn wait_set_for(&self, call: &GtagCall) -> WaitSet {
        let initializations = &self.inner.initializations;
        match call.kind() {
            GtagCommandKind::Update | GtagCommandKind::Other => WaitSet::default(),
            GtagCommandKind::Identity => match call.config_target() {
                Some(target_id) => initializations.pending_for(target_id),
                // A config without a usable destination may concern any of them.
                None => initializations.pending(),
            },
            GtagCommandKind::Report => match call.send_to() {
                SendTo::Single(target) if initializations.contains(&target) => {
                    initializations.pending_for(&target)
                }
                // No target, a group alias or a list: any destination may be addressed.
                SendTo::Unspecified | SendTo::Single(_) | SendTo::Many(_) => {
                    initializations.pending()
                }
            },
        }
    }

    pub fn dispatch(&self, call: GtagCall) {
        let (released, waiting) = {
            let mut deferred = self.inner.lock_deferred();
            // Anything already releasable goes first so it keeps its place ahead of `call`.
            let mut released = deferred.take_settled(&self.inner.initializations);
            let wait_set = self.wait_set_for(&call);
            if wait_set.is_empty() {
                released.push(call);
                (released, None)
            } else {
                let sequence = self.inner.next_sequence.fetch_add(1, Ordering::SeqCst);
                log::debug!(
                    "deferring gtag command #{sequence} ({:?}) until {:?} initialize",
                    call.kind(),
                    wait_set.ids().collect::<Vec<_>>()
                );
                deferred.calls.push_back(DeferredCall {
                    sequence,
                    wait_set: wait_set.clone(),
                    call,
                });
                (released, Some(wait_set))
            }
        };

        self.forward_all(released);

        if let Some(wait_set) = waiting {
            let gateway = self.clone();
            spawn_detached(async move {
                wait_set.wait().await;
                gateway.release_settled();
            });
        }
    }

    /// Forwards every deferred command whose wait set has settled, in call order.
    pub fn release_settled(&self) {
        let released = self
            .inner
            .lock_deferred()
            .take_settled(&self.inner.initializations);
        self.forward_all(released);
    }

    /// The gateway as a gtag function.
    pub fn as_gtag(&self) -> Gtag {
        let gateway = self.clone();
        Gtag::new(move |call| gateway.dispatch(call))
    }

    // Runs outside the deferred lock: a delegate is free to call back into any gateway.
    fn forward_all(&self, calls: Vec<GtagCall>) {
        for call in calls {
            self.inner.forwarder.forward(call);
        }
    }
}

impl GatewayInner {
    fn lock_deferred(&self) -> MutexGuard<'_, DeferredQueue> {
        self.deferred.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handles produced by [`wrap_or_create_gtag`].
#[derive(Clone, Debug)]
pub struct GtagInstallation {
    /// Ungated terminal action; identity registration goes through here so it is never held
    /// behind its own initialization.
    pub core: Gtag,
    /// The gated function now installed under the configured gtag name.
    pub wrapped: Gtag,
    pub gateway: GtagGateway,
}

/// Installs a gated gtag function under `settings.gtag_name`.
///
/// An existing function under that name is wrapped and keeps receiving every command; otherwise
/// commands are appended to the data layer named `settings.data_layer_name`, which is created if
/// missing.
pub fn wrap_or_create_gtag(
    environment: &GtagEnvironment,
    initializations: InitializationSnapshot,
    settings: &GtagSettings,
) -> AnalyticsResult<GtagInstallation> {
    settings.validate()?;

    let forwarder = match environment.gtag(&settings.gtag_name) {
        Some(existing) => {
            log::debug!("wrapping existing gtag function `{}`", settings.gtag_name);
            Forwarder::DelegateInvoker(existing)
        }
        None => {
            log::debug!(
                "creating gtag function `{}` over data layer `{}`",
                settings.gtag_name,
                settings.data_layer_name
            );
            Forwarder::QueueAppender(environment.get_or_create_data_layer(&settings.data_layer_name))
        }
    };

    let gateway = GtagGateway::new(initializations, forwarder);
    let core = gateway.forwarder().as_gtag();
    let wrapped = gateway.as_gtag();
    environment.install_gtag(&settings.gtag_name, wrapped.clone());

    Ok(GtagInstallation {
        core,
        wrapped,
        gateway,
    })
}
