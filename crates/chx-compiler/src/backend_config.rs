//! Named backend configurations: which simplifier passes each target allows.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

use crate::passes::SimplifierPass;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    name: &'static str,
    simplifiers: BTreeSet<&'static str>,
}

impl BackendConfig {
    /// Looks up a built-in configuration; unknown names yield `None`.
    pub fn from_name(name: &str) -> Option<&'static BackendConfig> {
        table().get(name)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn simplifiers(&self) -> &BTreeSet<&'static str> {
        &self.simplifiers
    }

    pub fn has_simplifier(&self, name: &str) -> bool {
        self.simplifiers.contains(name)
    }
}

/// Names of every built-in backend configuration, sorted.
pub fn list_backend_configs() -> Vec<&'static str> {
    table().keys().copied().collect()
}

fn table() -> &'static BTreeMap<&'static str, BackendConfig> {
    static TABLE: OnceLock<BTreeMap<&'static str, BackendConfig>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut table = BTreeMap::new();
        let mut insert = |name: &'static str, simplifiers: &[&'static str]| {
            table.insert(
                name,
                BackendConfig {
                    name,
                    simplifiers: simplifiers.iter().copied().collect(),
                },
            );
        };
        insert("chxvm", SimplifierPass::ALL_NAMES);
        insert("chxvm_test", &["ReplaceLess", "ReplaceIdentity", "ReplaceSum"]);
        table
    })
}
