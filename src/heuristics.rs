use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::cfg::DEFAULT_GRAPH_CACHE_CAPACITY;
use crate::ir::MethodId;

/// Name-based classification of a method.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum AccessorKind {
    Getter,
    Setter,
    Unknown,
}

/// Tunable policies of the analysis. Every field has a default so a config file may
/// override only what it needs.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct HeuristicsConfig {
    pub(crate) getter_prefixes: Vec<String>,
    pub(crate) setter_prefixes: Vec<String>,
    /// Methods that only read their receiver, matched by exact name.
    pub(crate) observer_methods: Vec<String>,
    /// Lower-case name prefixes of methods that mutate their receiver.
    pub(crate) mutator_prefixes: Vec<String>,
    /// Skip pairs whose definition is a setter and whose use is the matching getter.
    pub(crate) exclude_trivial_accessor_pairs: bool,
    /// Record calls with unknown side effects on a loaded field as def-or-use sites.
    pub(crate) tag_unsure_calls: bool,
    /// Treat calls into unrelated types as possibly mutating the last loaded field.
    pub(crate) infer_call_effects: bool,
    pub(crate) graph_cache_capacity: usize,
}

impl Default for HeuristicsConfig {
    fn default() -> Self {
        Self {
            getter_prefixes: strings(&["get", "is", "has"]),
            setter_prefixes: strings(&["set"]),
            observer_methods: strings(&[
                "size", "length", "isEmpty", "contains", "containsKey", "equals", "hashCode",
                "toString", "compareTo", "iterator", "stream",
            ]),
            mutator_prefixes: strings(&[
                "add", "put", "remove", "clear", "push", "pop", "insert", "offer", "poll",
            ]),
            exclude_trivial_accessor_pairs: true,
            tag_unsure_calls: true,
            infer_call_effects: true,
            graph_cache_capacity: DEFAULT_GRAPH_CACHE_CAPACITY,
        }
    }
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

impl HeuristicsConfig {
    pub(crate) fn load(path: &Path) -> Result<Self> {
        let data =
            fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
        serde_json::from_str(&data).with_context(|| format!("failed to parse {}", path.display()))
    }

    /// Classify a method by name convention. Mutator prefixes win over getter prefixes.
    pub(crate) fn classify_accessor(&self, method_name: &str) -> AccessorKind {
        let lower = method_name.to_ascii_lowercase();
        if self
            .mutator_prefixes
            .iter()
            .any(|prefix| lower.starts_with(prefix.as_str()))
        {
            return AccessorKind::Setter;
        }
        if self.observer_methods.iter().any(|name| name == method_name) {
            return AccessorKind::Getter;
        }
        self.accessor_property(method_name)
            .map(|(kind, _)| kind)
            .unwrap_or(AccessorKind::Unknown)
    }

    /// Split a conventional accessor name into its kind and property name.
    pub(crate) fn accessor_property<'a>(
        &self,
        method_name: &'a str,
    ) -> Option<(AccessorKind, &'a str)> {
        let matching = |prefixes: &[String]| {
            prefixes
                .iter()
                .find_map(|prefix| property_after_prefix(method_name, prefix))
        };
        if let Some(property) = matching(self.setter_prefixes.as_slice()) {
            return Some((AccessorKind::Setter, property));
        }
        matching(self.getter_prefixes.as_slice()).map(|property| (AccessorKind::Getter, property))
    }

    /// True for a setter definition paired with the getter of the same property.
    pub(crate) fn is_trivial_accessor_pair(
        &self,
        def_method: &MethodId,
        use_method: &MethodId,
    ) -> bool {
        if !self.exclude_trivial_accessor_pairs || def_method.owner != use_method.owner {
            return false;
        }
        match (
            self.accessor_property(&def_method.name),
            self.accessor_property(&use_method.name),
        ) {
            (Some((AccessorKind::Setter, set)), Some((AccessorKind::Getter, get))) => set == get,
            _ => false,
        }
    }
}

fn property_after_prefix<'a>(method_name: &'a str, prefix: &str) -> Option<&'a str> {
    let rest = method_name.strip_prefix(prefix)?;
    let rest = rest.strip_prefix('_').unwrap_or(rest);
    let first = rest.chars().next()?;
    if first.is_uppercase() || prefix.ends_with('_') {
        Some(rest)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_accessor_conventions() {
        let config = HeuristicsConfig::default();
        assert_eq!(AccessorKind::Getter, config.classify_accessor("getName"));
        assert_eq!(AccessorKind::Getter, config.classify_accessor("isEmpty"));
        assert_eq!(AccessorKind::Getter, config.classify_accessor("get_Count"));
        assert_eq!(AccessorKind::Getter, config.classify_accessor("size"));
        assert_eq!(AccessorKind::Setter, config.classify_accessor("setName"));
        assert_eq!(AccessorKind::Setter, config.classify_accessor("removeAll"));
        assert_eq!(AccessorKind::Setter, config.classify_accessor("Clear"));
        assert_eq!(AccessorKind::Unknown, config.classify_accessor("issue"));
        assert_eq!(AccessorKind::Unknown, config.classify_accessor("process"));
    }

    #[test]
    fn trivial_pairs_need_matching_property_and_owner() {
        let config = HeuristicsConfig::default();
        let setter = MethodId::new("com/example/Account", "setBalance", "(I)V");
        let getter = MethodId::new("com/example/Account", "getBalance", "()I");
        let other_getter = MethodId::new("com/example/Account", "getOwner", "()I");
        let foreign_getter = MethodId::new("com/example/Ledger", "getBalance", "()I");

        assert!(config.is_trivial_accessor_pair(&setter, &getter));
        assert!(!config.is_trivial_accessor_pair(&getter, &setter));
        assert!(!config.is_trivial_accessor_pair(&setter, &other_getter));
        assert!(!config.is_trivial_accessor_pair(&setter, &foreign_getter));
    }

    #[test]
    fn trivial_pair_exclusion_can_be_disabled() {
        let config = HeuristicsConfig {
            exclude_trivial_accessor_pairs: false,
            ..HeuristicsConfig::default()
        };
        let setter = MethodId::new("com/example/Account", "setBalance", "(I)V");
        let getter = MethodId::new("com/example/Account", "getBalance", "()I");
        assert!(!config.is_trivial_accessor_pair(&setter, &getter));
    }

    #[test]
    fn partial_config_file_keeps_defaults() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("heuristics.json");
        fs::write(&path, r#"{ "tag_unsure_calls": false, "graph_cache_capacity": 8 }"#)
            .expect("write config");

        let config = HeuristicsConfig::load(&path).expect("load config");

        assert!(!config.tag_unsure_calls);
        assert_eq!(8, config.graph_cache_capacity);
        assert!(config.exclude_trivial_accessor_pairs);
        assert_eq!(strings(&["set"]), config.setter_prefixes);
    }

    #[test]
    fn unknown_config_keys_are_rejected() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("heuristics.json");
        fs::write(&path, r#"{ "getter_prefix": ["get"] }"#).expect("write config");

        assert!(HeuristicsConfig::load(&path).is_err());
    }
}
