//! cratedeps configuration
//!
//! Handles loading and merging of the repository-level `cratedeps.yaml`
//! and the optional per-directory `cratedeps.yaml` files that extend it.
//! Each directory sees an immutable [`ScopeConfig`], produced by extending
//! its parent's scope; scopes never leak into sibling directories.

use crate::error::{Error, Result};
use crate::label::Label;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// Name of the configuration file, both at the root and per directory
pub const CONFIG_FILE: &str = "cratedeps.yaml";

/// How a unit treats a reference to its own crate name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SelfReferencePolicy {
    /// Drop self-references except in binaries, so `main.rs` can use the
    /// same-named library next to it
    #[default]
    KeepForBinaries,
    /// Always drop self-references
    AlwaysDrop,
}

/// Repository-level configuration (`cratedeps.yaml` at the root)
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RootConfig {
    /// Schema version for migrations
    #[serde(default = "default_version")]
    pub version: u32,

    /// Name of the main repository, used when printing labels
    #[serde(default)]
    pub repo_name: String,

    /// cargo-bazel (crate_universe) JSON lockfile, relative to the root
    #[serde(default)]
    pub lockfile: Option<String>,

    /// Cargo.lock, relative to the root
    #[serde(default)]
    pub cargo_lockfile: Option<String>,

    /// Prefix prepended to vendored package names to form labels
    #[serde(default = "default_crates_prefix")]
    pub crates_prefix: String,

    /// cfg atom (`unix`, `target_os=linux`) to config_setting label
    #[serde(default)]
    pub cfg_mapping: BTreeMap<String, String>,

    /// Crate name to proc-macro flag; beats lockfile inference
    #[serde(default)]
    pub proc_macro_overrides: BTreeMap<String, bool>,

    /// Explicit label for a crate name (ordinary namespace)
    #[serde(default)]
    pub resolve: BTreeMap<String, String>,

    /// Explicit label for a crate name (proc-macro namespace)
    #[serde(default)]
    pub resolve_proc_macro: BTreeMap<String, String>,

    /// Additional toolchain-provided crates (ordinary namespace)
    #[serde(default)]
    pub provided: BTreeMap<String, String>,

    /// Additional toolchain-provided crates (proc-macro namespace)
    #[serde(default)]
    pub provided_proc_macro: BTreeMap<String, String>,

    /// Packages that may stay unused without being reported
    #[serde(default)]
    pub allowed_unused: Vec<String>,

    #[serde(default)]
    pub self_reference: SelfReferencePolicy,

    /// Escalate warnings to errors
    #[serde(default)]
    pub strict: bool,

    /// Directory names skipped during the repository walk
    #[serde(default = "default_exclude")]
    pub exclude: Vec<String>,
}

fn default_version() -> u32 {
    1
}

fn default_crates_prefix() -> String {
    "@crates//:".to_string()
}

fn default_exclude() -> Vec<String> {
    vec!["target".to_string()]
}

impl Default for RootConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            repo_name: String::new(),
            lockfile: None,
            cargo_lockfile: None,
            crates_prefix: default_crates_prefix(),
            cfg_mapping: BTreeMap::new(),
            proc_macro_overrides: BTreeMap::new(),
            resolve: BTreeMap::new(),
            resolve_proc_macro: BTreeMap::new(),
            provided: BTreeMap::new(),
            provided_proc_macro: BTreeMap::new(),
            allowed_unused: Vec::new(),
            self_reference: SelfReferencePolicy::default(),
            strict: false,
            exclude: default_exclude(),
        }
    }
}

/// Per-directory overlay; every field extends or replaces the parent scope
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct LocalConfig {
    /// Switch to a different cargo-bazel lockfile below this directory
    pub lockfile: Option<String>,
    /// Switch to a different Cargo.lock below this directory
    pub cargo_lockfile: Option<String>,
    pub crates_prefix: Option<String>,
    #[serde(default)]
    pub cfg_mapping: BTreeMap<String, String>,
    #[serde(default)]
    pub proc_macro_overrides: BTreeMap<String, bool>,
    #[serde(default)]
    pub resolve: BTreeMap<String, String>,
    #[serde(default)]
    pub resolve_proc_macro: BTreeMap<String, String>,
    pub self_reference: Option<SelfReferencePolicy>,
}

/// Where vendored crates come from
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LockfileSource {
    /// cargo-bazel JSON lockfile
    Bazel(PathBuf),
    /// Cargo.lock
    Cargo(PathBuf),
}

impl LockfileSource {
    pub fn path(&self) -> &Path {
        match self {
            LockfileSource::Bazel(p) | LockfileSource::Cargo(p) => p,
        }
    }
}

/// Immutable configuration seen by one directory
#[derive(Debug, Clone)]
pub struct ScopeConfig {
    pub repo_name: String,
    pub lockfile: Option<LockfileSource>,
    pub crates_prefix: String,
    pub cfg_mapping: BTreeMap<String, String>,
    pub proc_macro_overrides: BTreeMap<String, bool>,
    pub resolve: BTreeMap<String, Label>,
    pub resolve_proc_macro: BTreeMap<String, Label>,
    pub provided: BTreeMap<String, Label>,
    pub provided_proc_macro: BTreeMap<String, Label>,
    pub allowed_unused: BTreeSet<String>,
    pub self_reference: SelfReferencePolicy,
    pub strict: bool,
    pub exclude: BTreeSet<String>,
}

impl RootConfig {
    /// Load `cratedeps.yaml` from a directory
    pub fn load_from_dir(dir: &Path) -> Result<Option<Self>> {
        let config_file = dir.join(CONFIG_FILE);
        if !config_file.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&config_file).map_err(Error::Io)?;
        let root = Self::from_yaml(&content)
            .map_err(|e| Error::Config(format!("{}: {}", config_file.display(), e)))?;
        Ok(Some(root))
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let root: RootConfig = serde_norway::from_str(content)?;

        if root.version != 1 {
            return Err(Error::Config(format!(
                "unsupported {} version: {}",
                CONFIG_FILE, root.version
            )));
        }

        Ok(root)
    }

    /// Build the scope for the repository root at `repo_root`
    pub fn into_scope(self, repo_root: &Path) -> Result<ScopeConfig> {
        let lockfile = match (&self.lockfile, &self.cargo_lockfile) {
            (Some(_), Some(_)) => {
                return Err(Error::Config(
                    "only one of `lockfile` and `cargo_lockfile` may be set".to_string(),
                ))
            }
            (Some(p), None) => Some(LockfileSource::Bazel(repo_root.join(p))),
            (None, Some(p)) => Some(LockfileSource::Cargo(repo_root.join(p))),
            (None, None) => None,
        };

        Ok(ScopeConfig {
            repo_name: self.repo_name,
            lockfile,
            crates_prefix: self.crates_prefix,
            cfg_mapping: self.cfg_mapping,
            proc_macro_overrides: self.proc_macro_overrides,
            resolve: parse_label_table(&self.resolve, "resolve")?,
            resolve_proc_macro: parse_label_table(&self.resolve_proc_macro, "resolve_proc_macro")?,
            provided: parse_label_table(&self.provided, "provided")?,
            provided_proc_macro: parse_label_table(
                &self.provided_proc_macro,
                "provided_proc_macro",
            )?,
            allowed_unused: self.allowed_unused.into_iter().collect(),
            self_reference: self.self_reference,
            strict: self.strict,
            exclude: self.exclude.into_iter().collect(),
        })
    }
}

fn parse_label_table(table: &BTreeMap<String, String>, what: &str) -> Result<BTreeMap<String, Label>> {
    table
        .iter()
        .map(|(name, label)| {
            Label::parse(label)
                .map(|l| (name.clone(), l))
                .map_err(|e| Error::Config(format!("bad `{what}` entry for {name}: {e}")))
        })
        .collect()
}

impl LocalConfig {
    /// Load `cratedeps.yaml` from a non-root directory
    pub fn load_from_dir(dir: &Path) -> Result<Option<Self>> {
        let config_file = dir.join(CONFIG_FILE);
        if !config_file.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&config_file).map_err(Error::Io)?;
        let config: LocalConfig = serde_norway::from_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", config_file.display(), e)))?;

        Ok(Some(config))
    }
}

impl ScopeConfig {
    /// Scope with every default and no lockfile
    pub fn empty() -> Self {
        ScopeConfig {
            repo_name: String::new(),
            lockfile: None,
            crates_prefix: default_crates_prefix(),
            cfg_mapping: BTreeMap::new(),
            proc_macro_overrides: BTreeMap::new(),
            resolve: BTreeMap::new(),
            resolve_proc_macro: BTreeMap::new(),
            provided: BTreeMap::new(),
            provided_proc_macro: BTreeMap::new(),
            allowed_unused: BTreeSet::new(),
            self_reference: SelfReferencePolicy::default(),
            strict: false,
            exclude: default_exclude().into_iter().collect(),
        }
    }

    /// Produce the scope for a child directory `dir` carrying `local`
    pub fn extend(&self, local: &LocalConfig, dir: &Path) -> Result<ScopeConfig> {
        let mut scope = self.clone();

        match (&local.lockfile, &local.cargo_lockfile) {
            (Some(_), Some(_)) => {
                return Err(Error::Config(format!(
                    "{}: only one of `lockfile` and `cargo_lockfile` may be set",
                    dir.join(CONFIG_FILE).display()
                )))
            }
            (Some(p), None) => scope.lockfile = Some(LockfileSource::Bazel(dir.join(p))),
            (None, Some(p)) => scope.lockfile = Some(LockfileSource::Cargo(dir.join(p))),
            (None, None) => {}
        }

        if let Some(prefix) = &local.crates_prefix {
            scope.crates_prefix = prefix.clone();
        }
        scope
            .cfg_mapping
            .extend(local.cfg_mapping.iter().map(|(k, v)| (k.clone(), v.clone())));
        scope.proc_macro_overrides.extend(
            local
                .proc_macro_overrides
                .iter()
                .map(|(k, v)| (k.clone(), *v)),
        );
        scope
            .resolve
            .extend(parse_label_table(&local.resolve, "resolve")?);
        scope
            .resolve_proc_macro
            .extend(parse_label_table(&local.resolve_proc_macro, "resolve_proc_macro")?);
        if let Some(policy) = local.self_reference {
            scope.self_reference = policy;
        }

        Ok(scope)
    }

    /// Label for a vendored package
    pub fn vendored_label(&self, package: &str) -> Result<Label> {
        let text = format!("{}{}", self.crates_prefix, package);
        Label::parse(&text).map_err(|e| Error::Config(format!("bad crates_prefix: {e}")))
    }
}
