//! Read-side visibility filters.

use rustc_hash::FxHashSet;
use vigil_core::Config;

/// Decides which namespaces (and objects) reads may see.
pub trait NamespaceFilter: Send + Sync {
    fn allows_namespace(&self, namespace: &str) -> bool;

    /// Object-level check used when filtering listings.
    fn allows(&self, config: &Config) -> bool {
        self.allows_namespace(&config.meta.namespace)
    }
}

impl<F> NamespaceFilter for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn allows_namespace(&self, namespace: &str) -> bool { self(namespace) }
}

/// Allow-list of namespaces. Cluster-scoped objects (empty namespace) always pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamespaceSet {
    allowed: FxHashSet<String>,
}

impl NamespaceSet {
    pub fn new<I, S>(namespaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { allowed: namespaces.into_iter().map(Into::into).collect() }
    }

    pub fn len(&self) -> usize { self.allowed.len() }

    pub fn is_empty(&self) -> bool { self.allowed.is_empty() }
}

impl NamespaceFilter for NamespaceSet {
    fn allows_namespace(&self, namespace: &str) -> bool {
        namespace.is_empty() || self.allowed.contains(namespace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_allows_listed_and_cluster_scoped() {
        let set = NamespaceSet::new(["ns-a", "ns-c"]);
        assert!(set.allows_namespace("ns-a"));
        assert!(!set.allows_namespace("ns-b"));
        assert!(set.allows_namespace(""));
    }

    #[test]
    fn closures_are_filters() {
        let f = |ns: &str| ns != "ns-b";
        assert!(f.allows_namespace("default"));
        assert!(!NamespaceFilter::allows_namespace(&f, "ns-b"));
    }
}
