//! Registered configuration kinds.

use serde::{Deserialize, Serialize};

use crate::GroupVersionKind;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub gvk: GroupVersionKind,
    #[serde(default = "default_namespaced")]
    pub namespaced: bool,
}

fn default_namespaced() -> bool { true }

impl Schema {
    pub fn namespaced(gvk: GroupVersionKind) -> Self { Self { gvk, namespaced: true } }
    pub fn cluster_scoped(gvk: GroupVersionKind) -> Self { Self { gvk, namespaced: false } }
}

/// Set of supported kinds, kept in registration order without duplicates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Schemas(Vec<Schema>);

impl Schemas {
    pub fn new() -> Self { Self::default() }

    /// Add a schema; a later registration of the same kind replaces the earlier one.
    pub fn add(mut self, schema: Schema) -> Self {
        match self.0.iter_mut().find(|s| s.gvk == schema.gvk) {
            Some(existing) => *existing = schema,
            None => self.0.push(schema),
        }
        self
    }

    pub fn find(&self, gvk: &GroupVersionKind) -> Option<&Schema> {
        self.0.iter().find(|s| &s.gvk == gvk)
    }

    pub fn contains(&self, gvk: &GroupVersionKind) -> bool { self.find(gvk).is_some() }

    pub fn kinds(&self) -> impl Iterator<Item = &GroupVersionKind> { self.0.iter().map(|s| &s.gvk) }

    pub fn iter(&self) -> impl Iterator<Item = &Schema> { self.0.iter() }

    pub fn len(&self) -> usize { self.0.len() }

    pub fn is_empty(&self) -> bool { self.0.is_empty() }
}

impl FromIterator<Schema> for Schemas {
    fn from_iter<I: IntoIterator<Item = Schema>>(iter: I) -> Self {
        iter.into_iter().fold(Schemas::new(), Schemas::add)
    }
}
