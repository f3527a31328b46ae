//! Vigil core types: configuration objects, change events and the backing store contract.

#![forbid(unsafe_code)]

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

mod error;
mod schema;

pub use error::{StoreError, StoreResult};
pub use schema::{Schema, Schemas};

/// Opaque revision token assigned by the backing store on every successful write.
pub type Revision = String;

/// Group/Version/Kind triple identifying a configuration type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupVersionKind {
    #[serde(default)]
    pub group: String,
    pub version: String,
    pub kind: String,
}

impl GroupVersionKind {
    pub fn new(group: impl Into<String>, version: impl Into<String>, kind: impl Into<String>) -> Self {
        Self { group: group.into(), version: version.into(), kind: kind.into() }
    }

    /// Render as `v1/Kind` for the core group, `group/v1/Kind` otherwise.
    pub fn key(&self) -> String {
        if self.group.is_empty() {
            format!("{}/{}", self.version, self.kind)
        } else {
            format!("{}/{}/{}", self.group, self.version, self.kind)
        }
    }

    /// Inverse of [`GroupVersionKind::key`].
    pub fn parse(key: &str) -> StoreResult<Self> {
        let parts: Vec<&str> = key.split('/').collect();
        match parts.as_slice() {
            [version, kind] if !version.is_empty() && !kind.is_empty() => Ok(Self::new("", *version, *kind)),
            [group, version, kind] if !version.is_empty() && !kind.is_empty() => Ok(Self::new(*group, *version, *kind)),
            _ => Err(StoreError::Validation(format!("invalid gvk key: {} (expect v1/Kind or group/v1/Kind)", key))),
        }
    }
}

impl fmt::Display for GroupVersionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// Object metadata. `namespace` is empty for cluster-scoped kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigMeta {
    pub gvk: GroupVersionKind,
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<Revision>,
    /// Seconds since epoch; 0 until the store admits the object.
    #[serde(default)]
    pub creation_timestamp: i64,
    #[serde(default, skip_serializing_if = "SmallVec::is_empty")]
    pub labels: SmallVec<[(String, String); 8]>,
    #[serde(default, skip_serializing_if = "SmallVec::is_empty")]
    pub annotations: SmallVec<[(String, String); 4]>,
}

impl ConfigMeta {
    pub fn new(gvk: GroupVersionKind, name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            gvk,
            name: name.into(),
            namespace: namespace.into(),
            uid: None,
            resource_version: None,
            creation_timestamp: 0,
            labels: SmallVec::new(),
            annotations: SmallVec::new(),
        }
    }
}

/// A configuration object: metadata plus opaque spec and status payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub meta: ConfigMeta,
    #[serde(default)]
    pub spec: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<serde_json::Value>,
}

impl Config {
    pub fn new(meta: ConfigMeta, spec: serde_json::Value) -> Self {
        Self { meta, spec, status: None }
    }

    pub fn gvk(&self) -> &GroupVersionKind { &self.meta.gvk }

    /// Store key within a kind: `(namespace, name)`.
    pub fn key(&self) -> (String, String) {
        (self.meta.namespace.clone(), self.meta.name.clone())
    }

    pub fn with_status(mut self, status: serde_json::Value) -> Self {
        self.status = Some(status);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    Add,
    Update,
    Delete,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Add => "add",
            EventKind::Update => "update",
            EventKind::Delete => "delete",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Record of one successful mutation.
///
/// - `Add`: `old` is `None`, `new` is the created object.
/// - `Update`: `old` is the object read just before the write, `new` the written object.
/// - `Delete`: `old` is `None`, `new` is the last object seen before deletion.
///
/// `old` on updates is a best-effort snapshot taken by a separate read before the
/// write. A concurrent writer may land in between, so consumers must not treat it
/// as the exact previously committed state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigEvent {
    pub old: Option<Config>,
    pub new: Config,
    pub kind: EventKind,
}

impl ConfigEvent {
    pub fn added(new: Config) -> Self { Self { old: None, new, kind: EventKind::Add } }
    pub fn updated(old: Option<Config>, new: Config) -> Self { Self { old, new, kind: EventKind::Update } }
    pub fn deleted(last: Config) -> Self { Self { old: None, new: last, kind: EventKind::Delete } }

    pub fn gvk(&self) -> &GroupVersionKind { &self.new.meta.gvk }
}

/// Patch strategies a patch function may report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PatchType {
    JsonPatch,
    MergePatch,
    StrategicMergePatch,
    ApplyPatch,
}

impl PatchType {
    pub fn media_type(&self) -> &'static str {
        match self {
            PatchType::JsonPatch => "application/json-patch+json",
            PatchType::MergePatch => "application/merge-patch+json",
            PatchType::StrategicMergePatch => "application/strategic-merge-patch+json",
            PatchType::ApplyPatch => "application/apply-patch+yaml",
        }
    }
}

impl fmt::Display for PatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.media_type())
    }
}

/// Transform producing a patched copy of an object plus the patch strategy it used.
/// Stores may re-apply it against their own current revision.
pub type PatchFn = Arc<dyn Fn(Config) -> (Config, PatchType) + Send + Sync>;

/// Backing store contract. Implementations own their concurrency.
pub trait ConfigStore: Send + Sync {
    fn schemas(&self) -> Schemas;

    fn get(&self, gvk: &GroupVersionKind, name: &str, namespace: &str) -> Option<Config>;

    /// `namespace == None` lists across all namespaces.
    fn list(&self, gvk: &GroupVersionKind, namespace: Option<&str>) -> Vec<Config>;

    fn create(&self, config: &Config) -> StoreResult<Revision>;

    fn update(&self, config: &Config) -> StoreResult<Revision>;

    fn update_status(&self, config: &Config) -> StoreResult<Revision>;

    fn patch(&self, config: &Config, patch_fn: &PatchFn) -> StoreResult<Revision>;

    fn delete(
        &self,
        gvk: &GroupVersionKind,
        name: &str,
        namespace: &str,
        resource_version: Option<&str>,
    ) -> StoreResult<()>;
}

pub mod prelude {
    pub use super::{
        Config, ConfigEvent, ConfigMeta, ConfigStore, EventKind, GroupVersionKind, PatchFn, PatchType, Revision,
        Schema, Schemas, StoreError, StoreResult,
    };
}
