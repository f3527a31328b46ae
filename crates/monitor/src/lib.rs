//! Vigil monitor: delivers change events to handlers registered per kind.
//!
//! Two variants share the [`Monitor`] trait:
//! - [`SyncMonitor`] runs handlers inline on the thread that scheduled the event.
//! - [`AsyncMonitor`] queues events (FIFO) and runs handlers from the loop driven by [`Monitor::run`].

#![forbid(unsafe_code)]

use std::sync::Arc;

use arc_swap::ArcSwap;
use metrics::counter;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vigil_core::{ConfigEvent, GroupVersionKind, Schemas};

/// Callback invoked with each event of the kind it was registered for.
pub type Handler = Arc<dyn Fn(&ConfigEvent) + Send + Sync>;

#[async_trait::async_trait]
pub trait Monitor: Send + Sync {
    fn append_event_handler(&self, gvk: GroupVersionKind, handler: Handler);

    fn schedule_process_event(&self, event: ConfigEvent);

    /// Drive delivery until `stop` fires.
    async fn run(&self, stop: CancellationToken);
}

/// How scheduled events reach handlers. Fixed for a monitor's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchMode {
    Sync,
    #[default]
    Async,
}

impl DispatchMode {
    pub fn build(self, schemas: &Schemas) -> Arc<dyn Monitor> {
        match self {
            DispatchMode::Sync => Arc::new(SyncMonitor::new(schemas)) as Arc<dyn Monitor>,
            DispatchMode::Async => Arc::new(AsyncMonitor::new(schemas)),
        }
    }
}

/// Copy-on-write kind -> handlers table. Dispatch works on a snapshot, so handlers
/// may register further handlers without deadlocking.
struct HandlerTable {
    table: ArcSwap<FxHashMap<GroupVersionKind, Vec<Handler>>>,
}

impl HandlerTable {
    fn seeded(schemas: &Schemas) -> Self {
        let table: FxHashMap<_, _> = schemas.kinds().map(|gvk| (gvk.clone(), Vec::new())).collect();
        Self { table: ArcSwap::from_pointee(table) }
    }

    fn append(&self, gvk: GroupVersionKind, handler: Handler) {
        self.table.rcu(|current| {
            let mut next = FxHashMap::clone(current);
            next.entry(gvk.clone()).or_default().push(Arc::clone(&handler));
            next
        });
        debug!(gvk = %gvk, "monitor: handler registered");
    }

    fn dispatch(&self, event: &ConfigEvent) {
        let table = self.table.load_full();
        match table.get(event.gvk()) {
            Some(handlers) => {
                for handler in handlers {
                    handler(event);
                }
                counter!("monitor_events_dispatched", 1u64);
            }
            None => {
                warn!(gvk = %event.gvk(), "monitor: kind does not exist in config store; event dropped");
                counter!("monitor_events_dropped", 1u64);
            }
        }
    }
}

/// Delivers every event before `schedule_process_event` returns.
pub struct SyncMonitor {
    handlers: HandlerTable,
}

impl SyncMonitor {
    pub fn new(schemas: &Schemas) -> Self { Self { handlers: HandlerTable::seeded(schemas) } }
}

#[async_trait::async_trait]
impl Monitor for SyncMonitor {
    fn append_event_handler(&self, gvk: GroupVersionKind, handler: Handler) {
        self.handlers.append(gvk, handler);
    }

    fn schedule_process_event(&self, event: ConfigEvent) {
        counter!("monitor_events_scheduled", 1u64);
        self.handlers.dispatch(&event);
    }

    async fn run(&self, stop: CancellationToken) {
        // Delivery already happened inline; only wait out the lifecycle.
        stop.cancelled().await;
        info!("sync monitor stopped");
    }
}

/// Queues events on an unbounded channel; [`Monitor::run`] drains it in FIFO order.
pub struct AsyncMonitor {
    handlers: HandlerTable,
    tx: mpsc::UnboundedSender<ConfigEvent>,
    /// Parked while no run loop owns it. Undelivered events survive a stop.
    rx: Mutex<Option<mpsc::UnboundedReceiver<ConfigEvent>>>,
}

impl AsyncMonitor {
    pub fn new(schemas: &Schemas) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { handlers: HandlerTable::seeded(schemas), tx, rx: Mutex::new(Some(rx)) }
    }
}

#[async_trait::async_trait]
impl Monitor for AsyncMonitor {
    fn append_event_handler(&self, gvk: GroupVersionKind, handler: Handler) {
        self.handlers.append(gvk, handler);
    }

    fn schedule_process_event(&self, event: ConfigEvent) {
        counter!("monitor_events_scheduled", 1u64);
        // The receiver lives as long as self, so this only fails during teardown.
        if self.tx.send(event).is_err() {
            warn!("async monitor: queue closed; event dropped");
            counter!("monitor_events_dropped", 1u64);
        }
    }

    async fn run(&self, stop: CancellationToken) {
        let taken = self.rx.lock().take();
        let Some(mut rx) = taken else {
            warn!("async monitor: dispatch loop already running; waiting for stop");
            stop.cancelled().await;
            return;
        };
        info!("async monitor: dispatch loop started");
        let mut delivered = 0u64;
        loop {
            tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                maybe = rx.recv() => match maybe {
                    Some(event) => {
                        self.handlers.dispatch(&event);
                        delivered += 1;
                    }
                    None => break,
                },
            }
        }
        *self.rx.lock() = Some(rx);
        info!(delivered, "async monitor: dispatch loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use vigil_core::{Config, ConfigMeta, Schema};

    fn foo() -> GroupVersionKind { GroupVersionKind::new("", "v1", "Foo") }

    fn event(gvk: GroupVersionKind) -> ConfigEvent {
        ConfigEvent::added(Config::new(ConfigMeta::new(gvk, "a", "default"), serde_json::Value::Null))
    }

    #[test]
    fn unknown_kind_is_dropped_not_delivered() {
        let table = HandlerTable::seeded(&Schemas::new().add(Schema::namespaced(foo())));
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        table.append(foo(), Arc::new(move |_: &ConfigEvent| { h.fetch_add(1, Ordering::SeqCst); }));
        table.dispatch(&event(GroupVersionKind::new("", "v1", "Other")));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        table.dispatch(&event(foo()));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn handler_may_register_handlers_during_dispatch() {
        let table = Arc::new(HandlerTable::seeded(&Schemas::new().add(Schema::namespaced(foo()))));
        let inner_hits = Arc::new(AtomicUsize::new(0));
        let t = Arc::clone(&table);
        let ih = Arc::clone(&inner_hits);
        table.append(foo(), Arc::new(move |_: &ConfigEvent| {
            let ih = Arc::clone(&ih);
            t.append(foo(), Arc::new(move |_: &ConfigEvent| { ih.fetch_add(1, Ordering::SeqCst); }));
        }));
        table.dispatch(&event(foo()));
        // Registered mid-dispatch: not retroactive.
        assert_eq!(inner_hits.load(Ordering::SeqCst), 0);
        table.dispatch(&event(foo()));
        assert_eq!(inner_hits.load(Ordering::SeqCst), 1);
    }
}
