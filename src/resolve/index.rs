//! Repository-wide index of local crates

use crate::graph::{CompilationUnit, UnitKind};
use crate::label::Label;
use std::collections::BTreeMap;

/// Linkable local units by `(proc_macro, crate_name)`
#[derive(Debug, Clone, Default)]
pub struct LocalIndex {
    entries: BTreeMap<(bool, String), Vec<Label>>,
}

impl LocalIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_units<'a>(units: impl IntoIterator<Item = &'a CompilationUnit>) -> Self {
        let mut index = LocalIndex::new();
        for unit in units {
            index.insert(unit);
        }
        index
    }

    /// Record `unit` if other crates can depend on it
    pub fn insert(&mut self, unit: &CompilationUnit) {
        if !unit.kind.is_linkable() {
            return;
        }
        let labels = self
            .entries
            .entry((unit.kind == UnitKind::ProcMacro, unit.crate_name.clone()))
            .or_default();
        let label = unit.label();
        if !labels.contains(&label) {
            labels.push(label);
            labels.sort();
        }
    }

    /// Units importable as `name`, other than `exclude`
    pub fn lookup(&self, proc_macro: bool, name: &str, exclude: &Label) -> Vec<&Label> {
        self.entries
            .get(&(proc_macro, name.to_string()))
            .map(|labels| labels.iter().filter(|l| *l != exclude).collect())
            .unwrap_or_default()
    }

    /// Whether `package` holds a library importable as `crate_name`
    pub fn has_library(&self, package: &str, crate_name: &str) -> bool {
        [false, true].iter().any(|&proc_macro| {
            self.entries
                .get(&(proc_macro, crate_name.to_string()))
                .is_some_and(|labels| labels.iter().any(|l| l.repo.is_empty() && l.pkg == package))
        })
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
