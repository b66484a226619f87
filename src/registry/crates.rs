//! The crate registry
//!
//! Indexes vendored packages by `(proc_macro, crate_name)`, knows which
//! packages are requested at several versions across workspace members, and
//! turns a package into the target name it is vendored under.

use super::lockfile::{sanitize_crate_name, LockfileRecord};
use crate::config::LockfileSource;
use crate::error::{Error, Result};
use once_cell::sync::Lazy;
use std::collections::{BTreeMap, BTreeSet};

/// Packages whose proc-macro status Cargo.lock inference gets wrong
static KNOWN_PROC_MACRO_FLAGS: Lazy<BTreeMap<&'static str, bool>> = Lazy::new(|| {
    [
        ("syn", false),
        ("quote", false),
        ("synstructure", false),
        ("darling_core", false),
        ("proc_macro_error", false),
        ("prettyplease", false),
    ]
    .into_iter()
    .collect()
});

/// Vendored packages of one lockfile
#[derive(Debug, Clone)]
pub struct CrateRegistry {
    source: LockfileSource,
    entries: BTreeMap<(bool, String), String>,
    /// Workspace member to the versions of its direct dependencies
    requests: BTreeMap<String, BTreeMap<String, String>>,
    multiversion: BTreeSet<String>,
    packages: BTreeSet<String>,
}

impl CrateRegistry {
    /// Build from lockfile records. `overrides` (crate name to proc-macro
    /// flag) beat both the fixed table and the lockfile's inference.
    pub fn build(
        source: LockfileSource,
        records: &[LockfileRecord],
        overrides: &BTreeMap<String, bool>,
    ) -> Self {
        let mut registry = CrateRegistry {
            source,
            entries: BTreeMap::new(),
            requests: BTreeMap::new(),
            multiversion: BTreeSet::new(),
            packages: BTreeSet::new(),
        };
        let mut requested: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();

        for record in records {
            if record.workspace_member {
                for (package, version) in &record.dependencies {
                    requested
                        .entry(package.as_str())
                        .or_default()
                        .insert(version.as_str());
                }
                registry
                    .requests
                    .insert(record.package.clone(), record.dependencies.clone());
                continue;
            }

            let proc_macro = overrides
                .get(&record.crate_name)
                .or_else(|| KNOWN_PROC_MACRO_FLAGS.get(record.crate_name.as_str()))
                .copied()
                .unwrap_or(record.proc_macro);
            registry
                .entries
                .insert((proc_macro, record.crate_name.clone()), record.package.clone());
            registry.packages.insert(record.package.clone());
        }

        registry.multiversion = requested
            .into_iter()
            .filter(|(_, versions)| versions.len() > 1)
            .map(|(package, _)| package.to_string())
            .collect();
        registry
    }

    /// Lockfile the registry was read from
    pub fn source(&self) -> &LockfileSource {
        &self.source
    }

    /// Record that `package` of this lockfile was resolved to
    pub fn mark_used(&self, log: &mut UsageLog, package: &str) {
        log.mark(&self.source, package);
    }

    /// Package imported as `crate_name` in the given namespace
    pub fn lookup(&self, proc_macro: bool, crate_name: &str) -> Option<&str> {
        self.entries
            .get(&(proc_macro, crate_name.to_string()))
            .map(String::as_str)
    }

    pub fn is_multiversion(&self, package: &str) -> bool {
        self.multiversion.contains(package)
    }

    /// Target name `package` is vendored under for `requester`, the
    /// workspace member asking. Multiversion packages are qualified with the
    /// version the requester asked for; not knowing the requester, or a
    /// requester that never asked for the package, is a configuration error.
    pub fn vendored_target(&self, package: &str, requester: Option<&str>) -> Result<String> {
        if !self.is_multiversion(package) {
            return Ok(package.to_string());
        }
        let requester = requester.ok_or_else(|| {
            Error::Config(format!(
                "`{}` is requested at several versions and the requesting crate is unknown",
                package
            ))
        })?;
        let version = self
            .member_requests(requester)
            .and_then(|deps| deps.get(package))
            .ok_or_else(|| {
                Error::Config(format!(
                    "`{}` is requested at several versions but `{}` requests none of them",
                    package, requester
                ))
            })?;
        Ok(format!("{}-{}", package, version))
    }

    /// Direct dependencies of a member, matched by package or crate name
    fn member_requests(&self, member: &str) -> Option<&BTreeMap<String, String>> {
        self.requests.get(member).or_else(|| {
            let wanted = sanitize_crate_name(member);
            self.requests
                .iter()
                .find(|(name, _)| sanitize_crate_name(name) == wanted)
                .map(|(_, deps)| deps)
        })
    }

    pub fn is_member(&self, name: &str) -> bool {
        self.member_requests(name).is_some()
    }

    pub fn packages(&self) -> impl Iterator<Item = &str> {
        self.packages.iter().map(String::as_str)
    }

    /// Packages of this lockfile never used and not allow-listed, sorted
    pub fn unused(&self, log: &UsageLog, allowed: &BTreeSet<String>) -> Vec<String> {
        self.packages
            .iter()
            .filter(|p| !log.contains(&self.source, p) && !allowed.contains(*p))
            .cloned()
            .collect()
    }
}

/// Packages resolved through a registry, per lockfile. Built per
/// directory and merged at the end.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UsageLog {
    used: BTreeMap<LockfileSource, BTreeSet<String>>,
}

impl UsageLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark(&mut self, source: &LockfileSource, package: &str) {
        if !self.contains(source, package) {
            self.used
                .entry(source.clone())
                .or_default()
                .insert(package.to_string());
        }
    }

    pub fn merge(&mut self, other: UsageLog) {
        for (source, packages) in other.used {
            self.used.entry(source).or_default().extend(packages);
        }
    }

    pub fn contains(&self, source: &LockfileSource, package: &str) -> bool {
        self.used.get(source).is_some_and(|p| p.contains(package))
    }

    pub fn is_empty(&self) -> bool {
        self.used.values().all(BTreeSet::is_empty)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&LockfileSource, &str)> {
        self.used
            .iter()
            .flat_map(|(source, packages)| packages.iter().map(move |p| (source, p.as_str())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;

    fn cargo_lock(path: &str) -> LockfileSource {
        LockfileSource::Cargo(PathBuf::from(path))
    }

    fn member(name: &str, deps: &[(&str, &str)]) -> LockfileRecord {
        LockfileRecord {
            package: name.to_string(),
            crate_name: sanitize_crate_name(name),
            version: "0.1.0".to_string(),
            proc_macro: false,
            workspace_member: true,
            dependencies: deps
                .iter()
                .map(|(p, v)| (p.to_string(), v.to_string()))
                .collect(),
        }
    }

    fn vendored(package: &str, version: &str, proc_macro: bool) -> LockfileRecord {
        LockfileRecord {
            package: package.to_string(),
            crate_name: sanitize_crate_name(package),
            version: version.to_string(),
            proc_macro,
            workspace_member: false,
            dependencies: BTreeMap::new(),
        }
    }

    fn fixture(overrides: &[(&str, bool)]) -> CrateRegistry {
        let records = vec![
            member("first", &[("p", "1.0"), ("syn", "2.0")]),
            member("second-app", &[("p", "2.0")]),
            vendored("p", "1.0", false),
            vendored("p", "2.0", false),
            vendored("syn", "2.0", true),
            vendored("my-derive", "0.1", true),
        ];
        let overrides = overrides
            .iter()
            .map(|(k, v)| (k.to_string(), *v))
            .collect();
        CrateRegistry::build(cargo_lock("Cargo.lock"), &records, &overrides)
    }

    #[test]
    fn test_multiversion_uses_requester_version() {
        let registry = fixture(&[]);
        assert!(registry.is_multiversion("p"));
        assert_eq!(registry.vendored_target("p", Some("first")).unwrap(), "p-1.0");
        assert_eq!(registry.vendored_target("p", Some("second_app")).unwrap(), "p-2.0");
        assert_eq!(registry.vendored_target("syn", None).unwrap(), "syn");
    }

    #[test]
    fn test_multiversion_without_requester_is_fatal() {
        let registry = fixture(&[]);
        let err = registry.vendored_target("p", None).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.is_fatal());
        assert!(matches!(
            registry.vendored_target("p", Some("stranger")),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_proc_macro_flags() {
        let registry = fixture(&[]);
        // fixed table corrects the inference
        assert_eq!(registry.lookup(false, "syn"), Some("syn"));
        assert_eq!(registry.lookup(true, "syn"), None);
        assert_eq!(registry.lookup(true, "my_derive"), Some("my-derive"));

        let registry = fixture(&[("syn", true), ("my_derive", false)]);
        assert_eq!(registry.lookup(true, "syn"), Some("syn"));
        assert_eq!(registry.lookup(false, "my_derive"), Some("my-derive"));
    }

    #[test]
    fn test_unused() {
        let registry = fixture(&[]);
        let mut log = UsageLog::new();
        registry.mark_used(&mut log, "p");
        let mut other = UsageLog::new();
        registry.mark_used(&mut other, "syn");
        log.merge(other);

        let allowed: BTreeSet<String> = BTreeSet::new();
        assert_eq!(registry.unused(&log, &allowed), vec!["my-derive"]);

        let allowed: BTreeSet<String> = ["my-derive".to_string()].into_iter().collect();
        assert!(registry.unused(&log, &allowed).is_empty());
    }

    #[test]
    fn test_usage_is_per_lockfile() {
        let records = vec![member("app", &[("p", "1.0")]), vendored("p", "1.0", false)];
        let first = CrateRegistry::build(cargo_lock("a/Cargo.lock"), &records, &BTreeMap::new());
        let second = CrateRegistry::build(cargo_lock("b/Cargo.lock"), &records, &BTreeMap::new());

        let mut log = UsageLog::new();
        first.mark_used(&mut log, "p");
        assert!(first.unused(&log, &BTreeSet::new()).is_empty());
        assert_eq!(second.unused(&log, &BTreeSet::new()), vec!["p"]);
        assert_eq!(log.iter().collect::<Vec<_>>(), vec![(first.source(), "p")]);
    }
}
