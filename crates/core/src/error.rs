use crate::{GroupVersionKind, PatchType};

/// Errors surfaced by stores and passed through the controller unchanged.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("config {gvk}/{namespace}/{name} does not exist")]
    NotFound { gvk: GroupVersionKind, namespace: String, name: String },
    #[error("config {gvk}/{namespace}/{name} already exists")]
    AlreadyExists { gvk: GroupVersionKind, namespace: String, name: String },
    #[error("conflict: expected revision {expected}, found {actual}")]
    Conflict { expected: String, actual: String },
    #[error("unknown kind {0}")]
    UnknownKind(GroupVersionKind),
    #[error("validation: {0}")]
    Validation(String),
    #[error("unsupported patch type: {0}")]
    UnsupportedPatchType(PatchType),
}

impl StoreError {
    pub fn not_found(gvk: &GroupVersionKind, namespace: &str, name: &str) -> Self {
        StoreError::NotFound { gvk: gvk.clone(), namespace: namespace.to_string(), name: name.to_string() }
    }

    pub fn is_not_found(&self) -> bool { matches!(self, StoreError::NotFound { .. }) }
}

pub type StoreResult<T> = Result<T, StoreError>;
