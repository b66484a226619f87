//! Lockfile reading
//!
//! Both `Cargo.lock` and the cargo-bazel (crate_universe) JSON lockfile are
//! reduced to [`LockfileRecord`]s: one per workspace member, carrying the
//! versions it requests, and one per package some member depends on
//! directly.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::debug;

/// Synthetic package cargo-bazel emits to hold the direct dependencies of
/// a Bazel-only workspace
pub const DIRECT_DEPS_PACKAGE: &str = "direct-cargo-bazel-deps";

/// Packages whose presence among a package's dependencies marks it as a
/// procedural macro
const PROC_MACRO_SUPPORT: [&str; 2] = ["proc-macro2", "proc-macro"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockfileRecord {
    pub package: String,
    /// Name the package is imported under
    pub crate_name: String,
    pub version: String,
    pub proc_macro: bool,
    pub workspace_member: bool,
    /// Direct dependency package to requested version; members only
    pub dependencies: BTreeMap<String, String>,
}

/// Import name of a package
pub fn sanitize_crate_name(package: &str) -> String {
    package.replace('-', "_")
}

pub fn read_cargo_lockfile(path: &Path) -> Result<Vec<LockfileRecord>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
    parse_cargo_lockfile(&content)
        .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
}

pub fn read_bazel_lockfile(path: &Path) -> Result<Vec<LockfileRecord>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
    parse_bazel_lockfile(&content)
        .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
}

#[derive(Debug, Deserialize)]
struct RawCargoLock {
    #[serde(default)]
    package: Vec<RawCargoPackage>,
}

#[derive(Debug, Deserialize)]
struct RawCargoPackage {
    name: String,
    version: String,
    source: Option<String>,
    #[serde(default)]
    dependencies: Vec<String>,
}

impl RawCargoPackage {
    fn is_member(&self) -> bool {
        self.source.is_none() || self.name == DIRECT_DEPS_PACKAGE
    }
}

/// Parse `Cargo.lock`. Source-less packages are workspace members; a
/// package is taken for a proc-macro when it depends on `proc-macro2`.
pub fn parse_cargo_lockfile(content: &str) -> Result<Vec<LockfileRecord>> {
    let raw: RawCargoLock = toml::from_str(content)?;

    let mut versions: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for pkg in &raw.package {
        versions.entry(&pkg.name).or_default().push(&pkg.version);
    }

    let mut records = Vec::new();
    let mut direct: BTreeSet<(String, String)> = BTreeSet::new();

    for pkg in raw.package.iter().filter(|p| p.is_member()) {
        let mut dependencies = BTreeMap::new();
        for dep in &pkg.dependencies {
            let (name, version) = parse_dependency_entry(dep);
            let version = match version {
                Some(v) => v.to_string(),
                // unambiguous entries omit the version
                None => match versions.get(name).map(Vec::as_slice) {
                    Some([only]) => only.to_string(),
                    _ => {
                        return Err(Error::Config(format!(
                            "dependency `{}` of `{}` has no unique version",
                            name, pkg.name
                        )))
                    }
                },
            };
            direct.insert((name.to_string(), version.clone()));
            dependencies.insert(name.to_string(), version);
        }
        records.push(LockfileRecord {
            package: pkg.name.clone(),
            crate_name: sanitize_crate_name(&pkg.name),
            version: pkg.version.clone(),
            proc_macro: false,
            workspace_member: true,
            dependencies,
        });
    }

    for pkg in raw.package.iter().filter(|p| !p.is_member()) {
        if !direct.contains(&(pkg.name.clone(), pkg.version.clone())) {
            continue;
        }
        let proc_macro = pkg
            .dependencies
            .iter()
            .any(|d| PROC_MACRO_SUPPORT.contains(&parse_dependency_entry(d).0));
        records.push(LockfileRecord {
            package: pkg.name.clone(),
            crate_name: sanitize_crate_name(&pkg.name),
            version: pkg.version.clone(),
            proc_macro,
            workspace_member: false,
            dependencies: BTreeMap::new(),
        });
    }

    debug!(records = records.len(), "read Cargo.lock");
    Ok(records)
}

/// `name`, `name version` or `name version (source)`
fn parse_dependency_entry(entry: &str) -> (&str, Option<&str>) {
    let mut parts = entry.split_whitespace();
    let name = parts.next().unwrap_or("");
    (name, parts.next())
}

#[derive(Debug, Deserialize)]
struct RawBazelLock {
    #[serde(default)]
    crates: BTreeMap<String, RawBazelCrate>,
    #[serde(default)]
    workspace_members: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct RawBazelCrate {
    name: String,
    version: String,
    #[serde(default)]
    library_target_name: Option<String>,
    #[serde(default)]
    common_attrs: RawCommonAttrs,
}

#[derive(Debug, Default, Deserialize)]
struct RawCommonAttrs {
    #[serde(default)]
    deps: RawSelectList,
    #[serde(default)]
    proc_macro_deps: RawSelectList,
}

#[derive(Debug, Default, Deserialize)]
struct RawSelectList {
    #[serde(default)]
    common: Vec<RawBazelDep>,
    #[serde(default)]
    selects: BTreeMap<String, Vec<RawBazelDep>>,
}

impl RawSelectList {
    fn all(&self) -> impl Iterator<Item = &RawBazelDep> {
        self.common.iter().chain(self.selects.values().flatten())
    }
}

#[derive(Debug, Deserialize)]
struct RawBazelDep {
    id: String,
}

/// Parse the cargo-bazel JSON lockfile. Proc-macro status comes from the
/// attribute a member lists the dependency under.
pub fn parse_bazel_lockfile(content: &str) -> Result<Vec<LockfileRecord>> {
    let raw: RawBazelLock = serde_json::from_str(content)?;

    let mut records = Vec::new();
    let mut direct: BTreeMap<String, bool> = BTreeMap::new();

    for member_id in raw.workspace_members.keys() {
        let member = raw.crates.get(member_id).ok_or_else(|| {
            Error::Config(format!("workspace member `{}` missing from crates", member_id))
        })?;

        let mut dependencies = BTreeMap::new();
        let attrs = &member.common_attrs;
        let listed = attrs
            .deps
            .all()
            .map(|d| (d, false))
            .chain(attrs.proc_macro_deps.all().map(|d| (d, true)));
        for (dep, proc_macro) in listed {
            let krate = raw.crates.get(&dep.id).ok_or_else(|| {
                Error::Config(format!("dependency `{}` missing from crates", dep.id))
            })?;
            if krate.library_target_name.is_none() {
                continue;
            }
            dependencies.insert(krate.name.clone(), krate.version.clone());
            *direct.entry(dep.id.clone()).or_default() |= proc_macro;
        }

        records.push(LockfileRecord {
            package: member.name.clone(),
            crate_name: sanitize_crate_name(&member.name),
            version: member.version.clone(),
            proc_macro: false,
            workspace_member: true,
            dependencies,
        });
    }

    for (id, proc_macro) in direct {
        let Some(krate) = raw.crates.get(&id) else {
            continue;
        };
        let crate_name = krate
            .library_target_name
            .clone()
            .unwrap_or_else(|| sanitize_crate_name(&krate.name));
        records.push(LockfileRecord {
            package: krate.name.clone(),
            crate_name,
            version: krate.version.clone(),
            proc_macro,
            workspace_member: false,
            dependencies: BTreeMap::new(),
        });
    }

    debug!(records = records.len(), "read cargo-bazel lockfile");
    Ok(records)
}
