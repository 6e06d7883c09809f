//! DispatchEngine: delivers published envelopes to destinations according to
//! user rules.
//!
//! # Architecture
//!
//! ```text
//! controllers (any thread)
//!   └─ EventPublisher::publish ──► unbounded MPSC queue
//!                                      │
//!                       "theater-dispatch" worker thread
//!                  (current-thread Tokio runtime, kept across restarts)
//!                                      │
//!                 for every enabled rule matching the envelope,
//!                 in declaration order:
//!                   Destination::route_action (bounded by a timeout)
//!                                      │
//!                                      ▼
//!                         StatusEvent stream (one line per outcome)
//! ```
//!
//! All matching rules fire, not only the first; that is what lets one event
//! drive several independent destinations.  Destination calls run one after
//! the other so status lines come out in rule order.
//!
//! The runtime is built on the first `start` and lives as long as the engine,
//! so I/O resources a destination opened from the worker (a cached device
//! connection, say) stay usable after a stop and a later start.
//!
//! The rule list and the registry are held as immutable `Arc` snapshots behind
//! reader-writer locks.  Editors replace a snapshot (copy-on-write); the worker
//! takes one snapshot per envelope and never sees a half-edited list.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use theater_core::{Envelope, Rule};
use thiserror::Error;
use tokio::runtime::Runtime;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::application::registry::{Controllers, Registry};
use crate::application::rule_store::RuleStore;
use crate::application::rule_store::RuleStoreError;

/// Default upper bound for a single destination call.
pub const DEFAULT_ACTION_TIMEOUT: Duration = Duration::from_secs(5);

/// Error type for engine lifecycle operations.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to spawn dispatch worker: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("failed to build dispatch runtime: {0}")]
    Runtime(#[source] std::io::Error),
}

/// Tunables for the dispatch engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upper bound for one `route_action` call; a slower call is abandoned
    /// and reported as a failure.
    pub action_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            action_timeout: DEFAULT_ACTION_TIMEOUT,
        }
    }
}

/// Status line surfaced to the UI for every dispatch outcome and rule-file
/// problem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent {
    /// A destination accepted an action and returned `message`.
    ActionSucceeded {
        destination: String,
        action: String,
        message: String,
    },
    /// A destination call failed, timed out or panicked.
    ActionFailed {
        destination: String,
        action: String,
        message: String,
    },
    /// A matching rule names a destination that is not registered.
    StaleRule { rule: String, destination: String },
    /// The rule file could not be loaded or saved, or a record was skipped.
    RuleFile(String),
}

impl fmt::Display for StatusEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusEvent::ActionSucceeded { message, .. } => f.write_str(message),
            StatusEvent::ActionFailed {
                destination,
                action,
                message,
            } => write!(f, "{destination}.{action} failed: {message}"),
            StatusEvent::StaleRule { rule, destination } => {
                write!(f, "skipped rule {rule}: no destination named {destination:?}")
            }
            StatusEvent::RuleFile(message) => write!(f, "rule file: {message}"),
        }
    }
}

/// Cloneable handle through which controllers hand envelopes to the engine.
///
/// `publish` never blocks and may be called from any thread.
#[derive(Clone)]
pub struct EventPublisher {
    tx: mpsc::UnboundedSender<Envelope>,
}

impl EventPublisher {
    /// Enqueues `envelope` and wakes the worker.
    ///
    /// If the engine has been dropped the envelope is discarded.
    pub fn publish(&self, envelope: Envelope) {
        debug!("publish {envelope}");
        if self.tx.send(envelope).is_err() {
            debug!("dispatch engine gone; envelope discarded");
        }
    }
}

#[cfg(test)]
impl EventPublisher {
    /// A publisher not attached to any engine; envelopes land in the returned
    /// receiver.
    pub(crate) fn detached() -> (Self, mpsc::UnboundedReceiver<Envelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

/// State shared between the engine handle and its worker thread.
struct Shared {
    config: EngineConfig,
    rules: RwLock<Arc<Vec<Rule>>>,
    registry: RwLock<Arc<Registry>>,
    /// Held by the running worker for its whole lifetime, so a new worker
    /// waits for the previous one to let go.
    queue: tokio::sync::Mutex<mpsc::UnboundedReceiver<Envelope>>,
    status_tx: mpsc::UnboundedSender<StatusEvent>,
}

impl Shared {
    fn rules(&self) -> Arc<Vec<Rule>> {
        Arc::clone(&self.rules.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn report(&self, event: StatusEvent) {
        match &event {
            StatusEvent::ActionSucceeded { .. } => info!("{event}"),
            _ => warn!("{event}"),
        }
        // The UI may not be listening; logging above is enough then.
        let _ = self.status_tx.send(event);
    }
}

struct Worker {
    handle: JoinHandle<()>,
    stop_tx: watch::Sender<bool>,
}

/// The dispatch engine.
///
/// Owns the ingress queue, the single background worker, the ordered rule
/// list and the registry snapshot.
pub struct DispatchEngine {
    shared: Arc<Shared>,
    tx: mpsc::UnboundedSender<Envelope>,
    worker: Mutex<Option<Worker>>,
    runtime: Mutex<Option<Arc<Runtime>>>,
}

impl DispatchEngine {
    /// Creates a stopped engine and returns it together with the status
    /// receiver.
    pub fn new(config: EngineConfig) -> (Self, mpsc::UnboundedReceiver<StatusEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            config,
            rules: RwLock::new(Arc::new(Vec::new())),
            registry: RwLock::new(Arc::new(Registry::default())),
            queue: tokio::sync::Mutex::new(rx),
            status_tx,
        });
        let engine = Self {
            shared,
            tx,
            worker: Mutex::new(None),
            runtime: Mutex::new(None),
        };
        (engine, status_rx)
    }

    /// Returns a handle controllers use to publish envelopes.
    pub fn publisher(&self) -> EventPublisher {
        EventPublisher {
            tx: self.tx.clone(),
        }
    }

    /// Enqueues `envelope`; see [`EventPublisher::publish`].
    pub fn publish(&self, envelope: Envelope) {
        self.publisher().publish(envelope);
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────────

    /// Starts the background worker.  Calling it while running is a no-op.
    ///
    /// Envelopes published while the engine was stopped are dispatched once
    /// it starts.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Runtime`] if the worker runtime cannot be built
    /// and [`EngineError::Spawn`] if the OS refuses to create the thread.
    pub fn start(&self) -> Result<(), EngineError> {
        let mut slot = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(worker) = slot.as_ref() {
            if !worker.handle.is_finished() {
                debug!("dispatch engine already running");
                return Ok(());
            }
        }
        if let Some(finished) = slot.take() {
            let _ = finished.handle.join();
        }

        let runtime = self.runtime()?;
        let (stop_tx, stop_rx) = watch::channel(false);
        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("theater-dispatch".to_string())
            .spawn(move || runtime.block_on(run_worker(shared, stop_rx)))
            .map_err(EngineError::Spawn)?;

        *slot = Some(Worker { handle, stop_tx });
        info!("dispatch engine started");
        Ok(())
    }

    /// The worker runtime, built on first use.
    fn runtime(&self) -> Result<Arc<Runtime>, EngineError> {
        let mut slot = self.runtime.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(runtime) = slot.as_ref() {
            return Ok(Arc::clone(runtime));
        }
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map(Arc::new)
            .map_err(EngineError::Runtime)?;
        *slot = Some(Arc::clone(&runtime));
        Ok(runtime)
    }

    /// Stops the background worker cooperatively.
    ///
    /// A destination call in progress is abandoned and reported as failed,
    /// then the worker exits; this call waits for that unless it is made from
    /// the worker itself, e.g. by a destination.  Safe to call from any thread
    /// and more than once.
    pub fn stop(&self) {
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(worker) = worker else {
            return;
        };

        worker.stop_tx.send_replace(true);
        if worker.handle.thread().id() == thread::current().id() {
            debug!("stop requested from the dispatch worker; not joining");
            return;
        }
        if worker.handle.join().is_err() {
            error!("dispatch worker panicked");
        }
        info!("dispatch engine stopped");
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|w| !w.handle.is_finished())
    }

    // ── Registry ──────────────────────────────────────────────────────────────

    /// (Re)builds the source/destination registry from `controllers`.
    ///
    /// Idempotent: binding the same controllers again yields the same table.
    pub fn bind_registry(&self, controllers: &Controllers) {
        let registry = Registry::build(controllers);
        info!(
            "registry bound: {} source(s), {} destination(s)",
            registry.source_count(),
            registry.destination_count()
        );
        *self
            .shared
            .registry
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Arc::new(registry);
    }

    /// Current registry snapshot.
    pub fn registry(&self) -> Arc<Registry> {
        self.shared.registry()
    }

    // ── Rules ─────────────────────────────────────────────────────────────────

    /// Current ordered rule snapshot.
    pub fn rules(&self) -> Arc<Vec<Rule>> {
        self.shared.rules()
    }

    /// Replaces the whole rule list.
    pub fn set_rules(&self, rules: Vec<Rule>) {
        *self
            .shared
            .rules
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Arc::new(rules);
    }

    /// Applies `edit` to a copy of the rule list and swaps the copy in.
    ///
    /// The worker keeps using the previous snapshot until its current envelope
    /// is done.
    pub fn update_rules<R>(&self, edit: impl FnOnce(&mut Vec<Rule>) -> R) -> R {
        let mut guard = self
            .shared
            .rules
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let mut next = guard.as_ref().clone();
        let result = edit(&mut next);
        *guard = Arc::new(next);
        result
    }

    pub fn add_rule(&self, rule: Rule) {
        self.update_rules(|rules| rules.push(rule));
    }

    /// Enables or disables the rule at `index`; returns `false` if out of range.
    pub fn set_enabled(&self, index: usize, enabled: bool) -> bool {
        self.update_rules(|rules| match rules.get_mut(index) {
            Some(rule) => {
                rule.enabled = enabled;
                true
            }
            None => false,
        })
    }

    /// Removes the rule at `index`.  The engine itself never prunes rules.
    pub fn remove_rule(&self, index: usize) -> Option<Rule> {
        self.update_rules(|rules| (index < rules.len()).then(|| rules.remove(index)))
    }

    /// Loads the rule list from `store` and makes it current.
    ///
    /// A store that cannot be read yields an empty rule set; the failure and
    /// any per-record issues are reported as [`StatusEvent::RuleFile`].
    pub fn load_rules(&self, store: &dyn RuleStore) -> Arc<Vec<Rule>> {
        let rules = match store.load() {
            Ok(loaded) => {
                for issue in loaded.issues {
                    self.shared.report(StatusEvent::RuleFile(issue));
                }
                info!("loaded {} rule(s)", loaded.rules.len());
                loaded.rules
            }
            Err(e) => {
                self.shared.report(StatusEvent::RuleFile(e.to_string()));
                Vec::new()
            }
        };
        self.set_rules(rules);
        self.rules()
    }

    /// Saves the current rule list to `store` and returns how many rules
    /// were written.
    ///
    /// Incomplete rules are skipped by the store; failures are reported and
    /// returned.
    ///
    /// # Errors
    ///
    /// Propagates the store's [`RuleStoreError`].
    pub fn save_rules(&self, store: &dyn RuleStore) -> Result<usize, RuleStoreError> {
        let rules = self.rules();
        match store.save(&rules) {
            Ok(written) => {
                if written < rules.len() {
                    self.shared.report(StatusEvent::RuleFile(format!(
                        "{} incomplete rule(s) not saved",
                        rules.len() - written
                    )));
                }
                info!("saved {written} rule(s)");
                Ok(written)
            }
            Err(e) => {
                self.shared.report(StatusEvent::RuleFile(e.to_string()));
                Err(e)
            }
        }
    }
}

impl Drop for DispatchEngine {
    fn drop(&mut self) {
        // Signal only; the worker exits on its own once it sees the flag.
        if let Some(worker) = self
            .worker
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            worker.stop_tx.send_replace(true);
        }
        // A running worker holds its own reference and drops the runtime on
        // its thread.  Dropping it here could be inside an async context,
        // where only a background shutdown is allowed.
        let runtime = self
            .runtime
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(runtime) = runtime.and_then(|rt| Arc::try_unwrap(rt).ok()) {
            runtime.shutdown_background();
        }
    }
}

// ── Worker ────────────────────────────────────────────────────────────────────

async fn run_worker(shared: Arc<Shared>, mut stop_rx: watch::Receiver<bool>) {
    let mut queue = tokio::select! {
        biased;
        _ = stop_rx.wait_for(|stop| *stop) => return,
        queue = shared.queue.lock() => queue,
    };
    debug!("dispatch worker running");

    loop {
        if *stop_rx.borrow() {
            break;
        }
        let envelope = tokio::select! {
            biased;
            _ = stop_rx.changed() => break,
            next = queue.recv() => match next {
                Some(envelope) => envelope,
                None => break,
            },
        };
        dispatch(&shared, &envelope, &mut stop_rx).await;
    }

    debug!("dispatch worker exiting");
}

/// Evaluates every rule against one envelope.
async fn dispatch(shared: &Shared, envelope: &Envelope, stop_rx: &mut watch::Receiver<bool>) {
    let rules = shared.rules();
    let registry = shared.registry();
    debug!("dispatching {envelope} against {} rule(s)", rules.len());

    for rule in rules.iter() {
        if *stop_rx.borrow() {
            debug!("stop requested; abandoning remaining rules for {envelope}");
            return;
        }
        if !rule.matches(envelope) {
            continue;
        }
        let Some(destination) = registry.destination(&rule.action_destination) else {
            shared.report(StatusEvent::StaleRule {
                rule: rule.to_string(),
                destination: rule.action_destination.clone(),
            });
            continue;
        };
        let Some(args) = rule.action_args.clone() else {
            shared.report(StatusEvent::ActionFailed {
                destination: rule.action_destination.clone(),
                action: rule.action_name.clone(),
                message: "rule has no arguments".to_string(),
            });
            continue;
        };

        // The call runs as its own task so a panic or a timeout is contained.
        // A destination that blocks its thread instead of awaiting still
        // stalls this loop.
        let destination = Arc::clone(destination);
        let action = rule.action_name.clone();
        let mut call = tokio::spawn(async move { destination.route_action(&action, &args).await });

        // A call that has already finished wins over a stop request.
        let finished = tokio::select! {
            biased;
            finished = tokio::time::timeout(shared.config.action_timeout, &mut call) => Some(finished),
            _ = stop_rx.wait_for(|stop| *stop) => None,
        };
        let outcome = match finished {
            Some(Ok(Ok(result))) => result,
            Some(Ok(Err(join_error))) => Err(format!("destination panicked: {join_error}")),
            Some(Err(_)) => {
                call.abort();
                Err(format!(
                    "timed out after {} ms",
                    shared.config.action_timeout.as_millis()
                ))
            }
            None => {
                call.abort();
                Err("abandoned: dispatch engine stopping".to_string())
            }
        };

        let event = match outcome {
            Ok(message) => StatusEvent::ActionSucceeded {
                destination: rule.action_destination.clone(),
                action: rule.action_name.clone(),
                message,
            },
            Err(message) => StatusEvent::ActionFailed {
                destination: rule.action_destination.clone(),
                action: rule.action_name.clone(),
                message,
            },
        };
        shared.report(event);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
