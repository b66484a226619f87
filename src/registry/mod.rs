//! Vendored crates
//!
//! [`lockfile`] reads `Cargo.lock` or a cargo-bazel lockfile into records;
//! [`crates`] indexes them for resolution and tracks which were used.

pub mod crates;
pub mod lockfile;

pub use crates::{CrateRegistry, UsageLog};
pub use lockfile::{
    parse_bazel_lockfile, parse_cargo_lockfile, read_bazel_lockfile, read_cargo_lockfile,
    LockfileRecord,
};

use crate::config::LockfileSource;
use crate::error::Result;
use std::collections::BTreeMap;
use tracing::info;

/// Read the lockfile behind `source` and index it
pub fn load_registry(
    source: &LockfileSource,
    overrides: &BTreeMap<String, bool>,
) -> Result<CrateRegistry> {
    let records = match source {
        LockfileSource::Bazel(path) => read_bazel_lockfile(path)?,
        LockfileSource::Cargo(path) => read_cargo_lockfile(path)?,
    };
    let registry = CrateRegistry::build(source.clone(), &records, overrides);
    info!(
        path = %source.path().display(),
        packages = registry.packages().count(),
        "loaded lockfile"
    );
    Ok(registry)
}
