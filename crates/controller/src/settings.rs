//! Environment-driven controller settings.
//!
//! - `VIGIL_SYNC_DISPATCH`: deliver events inline (`true`) or through the queue (default).
//! - `VIGIL_NAMESPACES`: comma-separated allow-list; unset means no read filtering.

use tracing::warn;
use vigil_monitor::DispatchMode;

use crate::NamespaceSet;

pub const ENV_SYNC_DISPATCH: &str = "VIGIL_SYNC_DISPATCH";
pub const ENV_NAMESPACES: &str = "VIGIL_NAMESPACES";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    pub sync_dispatch: bool,
    pub namespaces: Option<Vec<String>>,
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (tests pass a map instead of the process env).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let sync_dispatch = match lookup(ENV_SYNC_DISPATCH) {
            Some(raw) => parse_bool(&raw).unwrap_or_else(|| {
                warn!(value = %raw, "invalid {}; expected true/false", ENV_SYNC_DISPATCH);
                false
            }),
            None => false,
        };
        let namespaces = lookup(ENV_NAMESPACES).map(|raw| {
            raw.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect()
        });
        Self { sync_dispatch, namespaces }
    }

    /// Layer command-line choices over the env: `sync` only forces inline delivery,
    /// an explicit namespace list replaces the env one.
    pub fn with_overrides(mut self, sync: bool, namespaces: Option<Vec<String>>) -> Self {
        self.sync_dispatch |= sync;
        if namespaces.is_some() {
            self.namespaces = namespaces;
        }
        self
    }

    pub fn dispatch_mode(&self) -> DispatchMode {
        if self.sync_dispatch { DispatchMode::Sync } else { DispatchMode::Async }
    }

    pub fn namespace_filter(&self) -> Option<NamespaceSet> {
        self.namespaces.as_ref().map(|ns| NamespaceSet::new(ns.iter().cloned()))
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_are_async_and_unfiltered() {
        let s = Settings::from_lookup(lookup(&[]));
        assert_eq!(s, Settings::default());
        assert_eq!(s.dispatch_mode(), DispatchMode::Async);
        assert!(s.namespace_filter().is_none());
    }

    #[test]
    fn parses_mode_and_namespaces() {
        let s = Settings::from_lookup(lookup(&[(ENV_SYNC_DISPATCH, "Yes"), (ENV_NAMESPACES, " ns-a, ,ns-b ")]));
        assert_eq!(s.dispatch_mode(), DispatchMode::Sync);
        assert_eq!(s.namespaces, Some(vec!["ns-a".to_string(), "ns-b".to_string()]));
        assert_eq!(s.namespace_filter().map(|f| f.len()), Some(2));
    }

    #[test]
    fn garbage_bool_falls_back_to_async() {
        let s = Settings::from_lookup(lookup(&[(ENV_SYNC_DISPATCH, "maybe")]));
        assert!(!s.sync_dispatch);
    }

    #[test]
    fn flags_override_env() {
        let env = Settings::from_lookup(lookup(&[(ENV_SYNC_DISPATCH, "off"), (ENV_NAMESPACES, "ns-a")]));
        let s = env.clone().with_overrides(true, Some(vec!["ns-b".to_string()]));
        assert!(s.sync_dispatch);
        assert_eq!(s.namespaces, Some(vec!["ns-b".to_string()]));

        let kept = env.with_overrides(false, None);
        assert!(!kept.sync_dispatch);
        assert_eq!(kept.namespaces, Some(vec!["ns-a".to_string()]));

        let on = Settings::from_lookup(lookup(&[(ENV_SYNC_DISPATCH, "1")])).with_overrides(false, None);
        assert!(on.sync_dispatch);
    }
}
