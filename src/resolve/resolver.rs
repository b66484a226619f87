//! Reference resolution
//!
//! Each external name a unit uses is resolved against, in order: the
//! built-in names, the configured overrides, the local index, the crate
//! registry and the provided table. The ordinary namespace is searched in
//! full before the proc-macro namespace.

use super::builtins::{default_provided, is_builtin};
use super::index::LocalIndex;
use crate::cfg::{condition_for, is_test_only, CfgContext, Condition, ConditionalDeps, Predicate};
use crate::config::{ScopeConfig, SelfReferencePolicy};
use crate::error::{Diagnostics, Error, Result};
use crate::graph::{CompilationUnit, UnitKind};
use crate::label::Label;
use crate::registry::lockfile::sanitize_crate_name;
use crate::registry::{CrateRegistry, UsageLog};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Where a resolved target came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    Override,
    Local,
    Lockfile { package: String },
    Provided,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Part of the toolchain; no dependency needed
    Builtin,
    Target {
        label: Label,
        proc_macro: bool,
        source: Source,
    },
    /// Several local units share the name
    Ambiguous(Vec<Label>),
    Unresolved,
}

/// Dependencies of one unit
#[derive(Debug, Default, Serialize)]
pub struct ResolvedDeps {
    pub deps: ConditionalDeps,
    pub proc_macro_deps: ConditionalDeps,
    /// Dependency label to the name the unit imports it as
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub aliases: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Diagnostics::is_empty")]
    pub diagnostics: Diagnostics,
}

pub struct Resolver<'a> {
    scope: &'a ScopeConfig,
    index: &'a LocalIndex,
    registry: Option<&'a CrateRegistry>,
    provided: BTreeMap<String, Label>,
}

impl<'a> Resolver<'a> {
    pub fn new(
        scope: &'a ScopeConfig,
        index: &'a LocalIndex,
        registry: Option<&'a CrateRegistry>,
    ) -> Self {
        let mut provided = default_provided();
        provided.extend(scope.provided.iter().map(|(k, v)| (k.clone(), v.clone())));
        Resolver {
            scope,
            index,
            registry,
            provided,
        }
    }

    /// Resolve one name used by `unit`. Only configuration problems (such
    /// as an undeterminable multiversion request) are errors.
    pub fn resolve_reference(
        &self,
        unit: &CompilationUnit,
        name: &str,
        usage: &mut UsageLog,
    ) -> Result<Resolution> {
        if is_builtin(name) {
            return Ok(Resolution::Builtin);
        }

        for proc_macro in [false, true] {
            if let Some(resolution) = self.resolve_in(unit, name, proc_macro, usage)? {
                return Ok(match resolution {
                    Resolution::Target {
                        label,
                        proc_macro,
                        source,
                    } => Resolution::Target {
                        label,
                        // configured placement beats the namespace it was found in
                        proc_macro: self
                            .scope
                            .proc_macro_overrides
                            .get(name)
                            .copied()
                            .unwrap_or(proc_macro),
                        source,
                    },
                    other => other,
                });
            }
        }
        Ok(Resolution::Unresolved)
    }

    fn resolve_in(
        &self,
        unit: &CompilationUnit,
        name: &str,
        proc_macro: bool,
        usage: &mut UsageLog,
    ) -> Result<Option<Resolution>> {
        let target = |label: Label, source: Source| {
            Some(Resolution::Target {
                label,
                proc_macro,
                source,
            })
        };

        let overrides = if proc_macro {
            &self.scope.resolve_proc_macro
        } else {
            &self.scope.resolve
        };
        if let Some(label) = overrides.get(name) {
            return Ok(target(label.clone(), Source::Override));
        }

        match self.index.lookup(proc_macro, name, &unit.label()).as_slice() {
            [] => {}
            [only] => return Ok(target((*only).clone(), Source::Local)),
            many => {
                return Ok(Some(Resolution::Ambiguous(
                    many.iter().map(|l| (*l).clone()).collect(),
                )))
            }
        }

        if let Some(registry) = self.registry {
            // `json = { package = "serde_json" }` is imported as json
            let key = unit
                .renamed_dependencies
                .get(name)
                .map(|package| sanitize_crate_name(package))
                .unwrap_or_else(|| name.to_string());
            if let Some(package) = registry.lookup(proc_macro, &key) {
                let vendored = registry.vendored_target(package, Some(unit.requester()))?;
                let label = self.scope.vendored_label(&vendored)?;
                registry.mark_used(usage, package);
                return Ok(target(
                    label,
                    Source::Lockfile {
                        package: package.to_string(),
                    },
                ));
            }
        }

        let provided = if proc_macro {
            &self.scope.provided_proc_macro
        } else {
            &self.provided
        };
        if let Some(label) = provided.get(name) {
            return Ok(target(label.clone(), Source::Provided));
        }

        Ok(None)
    }

    /// Whether a reference to the unit's own crate name is dropped
    fn drops_self_reference(&self, unit: &CompilationUnit, name: &str) -> bool {
        if unit.is_paired_test() || name != unit.crate_name {
            return false;
        }
        match self.scope.self_reference {
            SelfReferencePolicy::AlwaysDrop => true,
            SelfReferencePolicy::KeepForBinaries => {
                !(unit.kind == UnitKind::Binary
                    && self.index.has_library(&unit.package, &unit.crate_name))
            }
        }
    }

    /// References a unit pulls in, with the OR of their predicates across
    /// files, each conjoined with the file's own condition. Test scope is
    /// judged on the conjoined predicate, so everything in a
    /// `#[cfg(test)] mod tests;` file counts as test-only.
    fn collect_references(&self, unit: &CompilationUnit) -> BTreeMap<String, Predicate> {
        let mut merged: BTreeMap<String, Predicate> = BTreeMap::new();
        for file in &unit.files {
            for reference in &file.summary.references {
                let predicate = file.condition.clone().and(reference.predicate.clone());
                let wanted = if unit.is_paired_test() {
                    is_test_only(&predicate)
                } else {
                    unit.is_test() || !is_test_only(&predicate)
                };
                if !wanted {
                    continue;
                }
                let entry = merged
                    .entry(reference.name.clone())
                    .or_insert(Predicate::False);
                *entry = std::mem::take(entry).or(predicate);
            }
        }
        merged
    }

    /// Resolve every reference of `unit` into its dependency lists
    pub fn resolve_unit(&self, unit: &CompilationUnit, usage: &mut UsageLog) -> Result<ResolvedDeps> {
        let mut resolved = ResolvedDeps::default();
        let unit_label = unit.label();
        let ctx = CfgContext {
            is_test: unit.is_test(),
            features: &unit.crate_features,
            mapping: &self.scope.cfg_mapping,
            strict: self.scope.strict,
        };

        let aliases: BTreeMap<&str, &str> = unit
            .files
            .iter()
            .flat_map(|f| f.summary.aliases.iter())
            .map(|(krate, alias)| (krate.as_str(), alias.as_str()))
            .collect();

        for (name, predicate) in self.collect_references(unit) {
            if self.drops_self_reference(unit, &name) {
                debug!(unit = %unit_label, name = %name, "dropping self-reference");
                continue;
            }

            // a reference that can never apply is not resolved at all
            let condition = match condition_for(&predicate, &ctx) {
                Ok(Some(condition)) => condition,
                Ok(None) => continue,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(unit = %unit_label, name = %name, error = %e, "dropping dependency");
                    resolved.diagnostics.push(e);
                    continue;
                }
            };

            match self.resolve_reference(unit, &name, usage)? {
                Resolution::Builtin => {}
                Resolution::Target {
                    label,
                    proc_macro,
                    source,
                } => {
                    let dep = label.relative_to("", &unit.package);
                    if unit.renamed_dependencies.contains_key(&name) {
                        resolved.aliases.insert(dep.clone(), name.clone());
                    } else if let Some(alias) = aliases.get(name.as_str()) {
                        resolved.aliases.insert(dep.clone(), alias.to_string());
                    }
                    debug!(unit = %unit_label, name = %name, dep = %dep, source = ?source, "resolved");
                    let list = if proc_macro {
                        &mut resolved.proc_macro_deps
                    } else {
                        &mut resolved.deps
                    };
                    list.require(dep, condition)?;
                }
                Resolution::Ambiguous(labels) => {
                    let candidates: Vec<String> = labels.iter().map(Label::to_string).collect();
                    warn!(
                        unit = %unit_label,
                        name = %name,
                        candidates = %candidates.join(", "),
                        "multiple matches found"
                    );
                    resolved.diagnostics.push(Error::Ambiguous {
                        unit: unit_label.to_string(),
                        name,
                        candidates,
                    });
                }
                Resolution::Unresolved => {
                    warn!(unit = %unit_label, name = %name, "no match");
                    resolved.diagnostics.push(Error::Unresolved {
                        unit: unit_label.to_string(),
                        name,
                    });
                }
            }
        }

        if let Some(tested) = &unit.tested_unit {
            let tested = Label::new("", unit.package.clone(), tested.clone());
            resolved
                .deps
                .require(tested.relative_to("", &unit.package), Condition::Always)?;
        }
        if unit.kind != UnitKind::BuildScript {
            if let Some(script) = &unit.build_script {
                let script = Label::new("", unit.package.clone(), script.clone());
                resolved
                    .deps
                    .require(script.relative_to("", &unit.package), Condition::Always)?;
            }
        }

        Ok(resolved)
    }
}
