//! Vigil store: in-RAM backing store with revision tokens and optimistic concurrency.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use metrics::counter;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::debug;
use vigil_core::{
    Config, ConfigStore, GroupVersionKind, PatchFn, Revision, Schema, Schemas, StoreError, StoreResult,
};

/// Objects of a single kind keyed by `(namespace, name)`, so listings come out sorted.
type KindTable = BTreeMap<(String, String), Config>;

/// Reference [`ConfigStore`] keeping every object in memory.
///
/// Revisions are decimal counters shared by all kinds and strictly increase with each write.
pub struct MemoryStore {
    schemas: Schemas,
    data: RwLock<FxHashMap<GroupVersionKind, KindTable>>,
    revision: AtomicU64,
}

impl MemoryStore {
    pub fn new(schemas: Schemas) -> Self {
        let data = schemas.kinds().map(|gvk| (gvk.clone(), KindTable::new())).collect();
        Self { schemas, data: RwLock::new(data), revision: AtomicU64::new(0) }
    }

    fn schema_for(&self, gvk: &GroupVersionKind) -> StoreResult<&Schema> {
        self.schemas.find(gvk).ok_or_else(|| StoreError::UnknownKind(gvk.clone()))
    }

    fn next_revision(&self) -> Revision {
        (self.revision.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    /// Cluster-scoped kinds ignore whatever namespace the caller passed.
    fn table_key(schema: &Schema, namespace: &str, name: &str) -> (String, String) {
        let ns = if schema.namespaced { namespace.to_string() } else { String::new() };
        (ns, name.to_string())
    }

    /// Shared path for writes against an existing object.
    fn write_existing<F>(&self, config: &Config, op: &'static str, check_rv: bool, apply: F) -> StoreResult<Revision>
    where
        F: FnOnce(&Config) -> StoreResult<Config>,
    {
        let gvk = config.gvk();
        let schema = self.schema_for(gvk)?;
        let key = Self::table_key(schema, &config.meta.namespace, &config.meta.name);
        let mut data = self.data.write();
        let current = data
            .get_mut(gvk)
            .and_then(|t| t.get_mut(&key))
            .ok_or_else(|| StoreError::not_found(gvk, &key.0, &key.1))?;
        if check_rv {
            check_revision(current, config.meta.resource_version.as_deref())?;
        }
        let mut next = apply(&*current)?;
        let rev = self.next_revision();
        next.meta.resource_version = Some(rev.clone());
        *current = next;
        debug!(op, gvk = %gvk, ns = %key.0, name = %key.1, rev = %rev, "store: write");
        counter!("store_writes_total", 1u64, "op" => op);
        Ok(rev)
    }
}

fn check_revision(current: &Config, expected: Option<&str>) -> StoreResult<()> {
    match expected {
        Some(expected) if !expected.is_empty() => {
            let actual = current.meta.resource_version.as_deref().unwrap_or("");
            if expected != actual {
                return Err(StoreError::Conflict { expected: expected.to_string(), actual: actual.to_string() });
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

impl ConfigStore for MemoryStore {
    fn schemas(&self) -> Schemas { self.schemas.clone() }

    fn get(&self, gvk: &GroupVersionKind, name: &str, namespace: &str) -> Option<Config> {
        let schema = self.schemas.find(gvk)?;
        let key = Self::table_key(schema, namespace, name);
        self.data.read().get(gvk).and_then(|t| t.get(&key)).cloned()
    }

    fn list(&self, gvk: &GroupVersionKind, namespace: Option<&str>) -> Vec<Config> {
        let Some(schema) = self.schemas.find(gvk) else { return Vec::new() };
        let data = self.data.read();
        let Some(table) = data.get(gvk) else { return Vec::new() };
        match namespace {
            Some(ns) if schema.namespaced && !ns.is_empty() => {
                table.iter().filter(|((n, _), _)| n == ns).map(|(_, c)| c.clone()).collect()
            }
            _ => table.values().cloned().collect(),
        }
    }

    fn create(&self, config: &Config) -> StoreResult<Revision> {
        let gvk = config.gvk();
        let schema = self.schema_for(gvk)?;
        if config.meta.name.is_empty() {
            return Err(StoreError::Validation(format!("{}: metadata.name is required", gvk)));
        }
        let mut obj = config.clone();
        if !schema.namespaced {
            obj.meta.namespace.clear();
        }
        let key = obj.key();
        let mut data = self.data.write();
        let table = data.entry(gvk.clone()).or_default();
        if table.contains_key(&key) {
            return Err(StoreError::AlreadyExists { gvk: gvk.clone(), namespace: key.0, name: key.1 });
        }
        if obj.meta.uid.is_none() {
            obj.meta.uid = Some(uuid::Uuid::new_v4().to_string());
        }
        if obj.meta.creation_timestamp == 0 {
            obj.meta.creation_timestamp = chrono::Utc::now().timestamp();
        }
        let rev = self.next_revision();
        obj.meta.resource_version = Some(rev.clone());
        debug!(gvk = %gvk, ns = %key.0, name = %key.1, rev = %rev, "store: create");
        table.insert(key, obj);
        counter!("store_writes_total", 1u64, "op" => "create");
        Ok(rev)
    }

    fn update(&self, config: &Config) -> StoreResult<Revision> {
        self.write_existing(config, "update", true, |current| {
            let mut next = current.clone();
            next.spec = config.spec.clone();
            next.status = config.status.clone();
            next.meta.labels = config.meta.labels.clone();
            next.meta.annotations = config.meta.annotations.clone();
            Ok(next)
        })
    }

    fn update_status(&self, config: &Config) -> StoreResult<Revision> {
        self.write_existing(config, "update_status", true, |current| {
            let mut next = current.clone();
            next.status = config.status.clone();
            Ok(next)
        })
    }

    fn patch(&self, config: &Config, patch_fn: &PatchFn) -> StoreResult<Revision> {
        self.write_existing(config, "patch", false, |current| {
            let (mut patched, _) = patch_fn(current.clone());
            if patched.meta.gvk != current.meta.gvk
                || patched.meta.name != current.meta.name
                || patched.meta.namespace != current.meta.namespace
            {
                return Err(StoreError::Validation("patch must not change kind, name or namespace".into()));
            }
            patched.meta.uid = current.meta.uid.clone();
            patched.meta.creation_timestamp = current.meta.creation_timestamp;
            Ok(patched)
        })
    }

    fn delete(
        &self,
        gvk: &GroupVersionKind,
        name: &str,
        namespace: &str,
        resource_version: Option<&str>,
    ) -> StoreResult<()> {
        let schema = self.schema_for(gvk)?;
        let key = Self::table_key(schema, namespace, name);
        let mut data = self.data.write();
        let table = data.get_mut(gvk).ok_or_else(|| StoreError::not_found(gvk, &key.0, &key.1))?;
        let current = table.get(&key).ok_or_else(|| StoreError::not_found(gvk, &key.0, &key.1))?;
        check_revision(current, resource_version)?;
        table.remove(&key);
        debug!(gvk = %gvk, ns = %key.0, name = %key.1, "store: delete");
        counter!("store_writes_total", 1u64, "op" => "delete");
        Ok(())
    }
}
