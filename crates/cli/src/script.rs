//! Replay scripts: a schema list plus an ordered list of operations.
//!
//! ```yaml
//! schemas:
//!   - gvk: { version: v1, kind: Foo }
//! ops:
//!   - op: create
//!     object:
//!       meta: { gvk: { version: v1, kind: Foo }, name: a, namespace: default }
//!       spec: { replicas: 1 }
//!   - op: patch
//!     kind: v1/Foo
//!     name: a
//!     namespace: default
//!     body: { replicas: 3 }
//!   - op: delete
//!     kind: v1/Foo
//!     name: a
//!     namespace: default
//! ```
//!
//! Patch bodies target `spec`: merge patches (RFC 7386) are objects, JSON patches
//! (RFC 6902) are arrays of operations.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use tracing::warn;
use vigil_core::{Config, PatchFn, PatchType, Schema, Schemas};

#[derive(Debug, Clone, Deserialize)]
pub struct Script {
    pub schemas: Vec<Schema>,
    #[serde(default)]
    pub ops: Vec<Op>,
}

impl Script {
    pub fn parse(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).context("parsing replay script")
    }

    pub fn schemas(&self) -> Schemas { self.schemas.iter().cloned().collect() }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Op {
    Create { object: Config },
    Update { object: Config },
    UpdateStatus { object: Config },
    Patch {
        kind: String,
        name: String,
        #[serde(default)]
        namespace: String,
        #[serde(default = "default_patch_type")]
        patch_type: PatchType,
        body: Json,
    },
    Delete {
        kind: String,
        name: String,
        #[serde(default)]
        namespace: String,
        #[serde(default)]
        resource_version: Option<String>,
    },
    Get {
        kind: String,
        name: String,
        #[serde(default)]
        namespace: String,
    },
    List {
        kind: String,
        #[serde(default)]
        namespace: Option<String>,
    },
}

fn default_patch_type() -> PatchType { PatchType::MergePatch }

impl Op {
    pub fn name(&self) -> &'static str {
        match self {
            Op::Create { .. } => "create",
            Op::Update { .. } => "update",
            Op::UpdateStatus { .. } => "update_status",
            Op::Patch { .. } => "patch",
            Op::Delete { .. } => "delete",
            Op::Get { .. } => "get",
            Op::List { .. } => "list",
        }
    }

    pub fn is_mutation(&self) -> bool { !matches!(self, Op::Get { .. } | Op::List { .. }) }
}

/// Build a patch function applying `body` to an object's spec and reporting `typ`.
///
/// The body is parsed and applied to `original` up front, so a body that does not
/// fit the object fails here instead of reaching the store. Strategic-merge and apply
/// bodies are not interpreted: the object comes back unchanged with the declared type.
pub fn patch_fn(typ: PatchType, body: Json, original: &Config) -> Result<PatchFn> {
    let body = match typ {
        PatchType::JsonPatch => {
            let ops: json_patch::Patch =
                serde_json::from_value(body).context("json-patch body must be an array of operations")?;
            let mut trial = original.spec.clone();
            json_patch::patch(&mut trial, &ops.0)
                .with_context(|| format!("json-patch does not apply to {}/{}", original.meta.namespace, original.meta.name))?;
            PatchBody::Json(ops)
        }
        PatchType::MergePatch => PatchBody::Merge(body),
        _ => PatchBody::Opaque,
    };
    Ok(Arc::new(move |mut cfg: Config| {
        match &body {
            PatchBody::Json(ops) => {
                // json_patch leaves the document untouched when an operation fails.
                if let Err(e) = json_patch::patch(&mut cfg.spec, &ops.0) {
                    warn!(error = %e, ns = %cfg.meta.namespace, name = %cfg.meta.name, "json-patch failed against current object");
                }
            }
            PatchBody::Merge(doc) => json_patch::merge(&mut cfg.spec, doc),
            PatchBody::Opaque => {}
        }
        (cfg, typ)
    }))
}

enum PatchBody {
    Json(json_patch::Patch),
    Merge(Json),
    Opaque,
}
