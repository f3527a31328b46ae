//! Vigil controller: a [`ConfigStore`] wrapper that turns every successful mutation
//! into a [`ConfigEvent`] for the handlers registered on its [`Monitor`].
//!
//! Contract:
//! - An event is scheduled only after the store reports success; a failed call schedules nothing.
//! - Store errors are returned as-is. The controller only synthesizes its own errors for
//!   `delete` of an object it cannot see and for unsupported patch types.
//! - Events carry the caller's objects as passed; the store's new revision is only returned.
//! - Reads honour the optional [`NamespaceFilter`]; the pre-read done by updates does not.

#![forbid(unsafe_code)]

use std::sync::{Arc, OnceLock};

use metrics::counter;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vigil_core::{
    Config, ConfigEvent, ConfigStore, GroupVersionKind, PatchFn, PatchType, Revision, Schemas, StoreError, StoreResult,
};

mod filter;
mod settings;

pub use filter::{NamespaceFilter, NamespaceSet};
pub use settings::{Settings, ENV_NAMESPACES, ENV_SYNC_DISPATCH};
pub use vigil_monitor::{DispatchMode, Handler, Monitor};

/// Readiness callback supplied by whoever feeds the store.
pub type HasSyncedFn = Box<dyn Fn() -> bool + Send + Sync>;

pub struct Controller {
    store: Arc<dyn ConfigStore>,
    monitor: Arc<dyn Monitor>,
    has_synced: OnceLock<HasSyncedFn>,
    namespace_filter: Option<Arc<dyn NamespaceFilter>>,
}

impl Controller {
    /// Queued dispatch: handlers run from [`Controller::run`].
    pub fn new(store: Arc<dyn ConfigStore>) -> Self { Self::with_mode(store, DispatchMode::Async) }

    /// Inline dispatch: handlers run before each mutation returns.
    pub fn new_sync(store: Arc<dyn ConfigStore>) -> Self { Self::with_mode(store, DispatchMode::Sync) }

    pub fn with_mode(store: Arc<dyn ConfigStore>, mode: DispatchMode) -> Self {
        let monitor = mode.build(&store.schemas());
        Self::with_monitor(store, monitor)
    }

    pub fn with_monitor(store: Arc<dyn ConfigStore>, monitor: Arc<dyn Monitor>) -> Self {
        Self { store, monitor, has_synced: OnceLock::new(), namespace_filter: None }
    }

    pub fn from_settings(store: Arc<dyn ConfigStore>, settings: &Settings) -> Self {
        let controller = Self::with_mode(store, settings.dispatch_mode());
        match settings.namespace_filter() {
            Some(set) => controller.with_namespace_filter(set),
            None => controller,
        }
    }

    /// Install the read filter. Construction-time only: it consumes the controller.
    pub fn with_namespace_filter(mut self, filter: impl NamespaceFilter + 'static) -> Self {
        self.namespace_filter = Some(Arc::new(filter));
        self
    }

    /// Only the first registration takes effect.
    pub fn register_has_synced_handler(&self, cb: impl Fn() -> bool + Send + Sync + 'static) {
        if self.has_synced.set(Box::new(cb)).is_err() {
            warn!("controller: has-synced handler already registered; ignoring");
        }
    }

    pub fn register_event_handler(&self, gvk: GroupVersionKind, handler: Handler) {
        self.monitor.append_event_handler(gvk, handler);
    }

    /// True unless a registered readiness callback says otherwise. Never touches the store.
    pub fn has_synced(&self) -> bool {
        self.has_synced.get().map_or(true, |cb| cb())
    }

    /// Drive event delivery until `stop` fires. Run it on a lifecycle task, not a request path.
    pub async fn run(&self, stop: CancellationToken) {
        info!("controller: run");
        self.monitor.run(stop).await;
        info!("controller: stopped");
    }

    fn namespace_visible(&self, namespace: &str) -> bool {
        self.namespace_filter.as_ref().map_or(true, |f| f.allows_namespace(namespace))
    }

    fn schedule(&self, event: ConfigEvent) {
        debug!(
            gvk = %event.gvk(),
            ns = %event.new.meta.namespace,
            name = %event.new.meta.name,
            event = %event.kind,
            "controller: schedule event"
        );
        counter!("controller_events_total", 1u64, "event" => event.kind.as_str());
        self.monitor.schedule_process_event(event);
    }
}

impl ConfigStore for Controller {
    fn schemas(&self) -> Schemas { self.store.schemas() }

    fn get(&self, gvk: &GroupVersionKind, name: &str, namespace: &str) -> Option<Config> {
        if !self.namespace_visible(namespace) {
            return None;
        }
        self.store.get(gvk, name, namespace)
    }

    fn list(&self, gvk: &GroupVersionKind, namespace: Option<&str>) -> Vec<Config> {
        let configs = self.store.list(gvk, namespace);
        match &self.namespace_filter {
            Some(filter) => configs.into_iter().filter(|c| filter.allows(c)).collect(),
            None => configs,
        }
    }

    fn create(&self, config: &Config) -> StoreResult<Revision> {
        let rev = self.store.create(config)?;
        self.schedule(ConfigEvent::added(config.clone()));
        Ok(rev)
    }

    fn update(&self, config: &Config) -> StoreResult<Revision> {
        let old = self.store.get(config.gvk(), &config.meta.name, &config.meta.namespace);
        let rev = self.store.update(config)?;
        self.schedule(ConfigEvent::updated(old, config.clone()));
        Ok(rev)
    }

    fn update_status(&self, config: &Config) -> StoreResult<Revision> {
        let old = self.store.get(config.gvk(), &config.meta.name, &config.meta.namespace);
        let rev = self.store.update_status(config)?;
        self.schedule(ConfigEvent::updated(old, config.clone()));
        Ok(rev)
    }

    /// `config` is the caller's original; `patch_fn` yields the patched copy and its strategy.
    fn patch(&self, config: &Config, patch_fn: &PatchFn) -> StoreResult<Revision> {
        let (patched, typ) = patch_fn(config.clone());
        match typ {
            PatchType::MergePatch | PatchType::JsonPatch => {}
            other => return Err(StoreError::UnsupportedPatchType(other)),
        }
        let rev = self.store.patch(&patched, patch_fn)?;
        self.schedule(ConfigEvent::updated(Some(config.clone()), patched));
        Ok(rev)
    }

    fn delete(
        &self,
        gvk: &GroupVersionKind,
        name: &str,
        namespace: &str,
        resource_version: Option<&str>,
    ) -> StoreResult<()> {
        let Some(current) = self.get(gvk, name, namespace) else {
            return Err(StoreError::not_found(gvk, namespace, name));
        };
        self.store.delete(gvk, name, namespace, resource_version)?;
        self.schedule(ConfigEvent::deleted(current));
        Ok(())
    }
}
