//! Cargo.toml reading
//!
//! Summarizes a manifest into the targets it declares, applying Cargo's
//! target auto-discovery (`src/lib.rs`, `src/main.rs`, `src/bin/*.rs`,
//! `tests/*.rs`, `benches/*.rs`, `examples/*.rs`, `build.rs`) for anything
//! not listed explicitly.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// One declared target, path relative to the manifest directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetDecl {
    pub name: String,
    pub path: String,
}

impl TargetDecl {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        TargetDecl {
            name: name.into(),
            path: path.into(),
        }
    }
}

/// What a manifest declares
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestSummary {
    pub package: String,
    #[serde(default)]
    pub lib: Option<TargetDecl>,
    #[serde(default)]
    pub proc_macro: bool,
    #[serde(default)]
    pub bins: Vec<TargetDecl>,
    #[serde(default)]
    pub tests: Vec<TargetDecl>,
    #[serde(default)]
    pub benches: Vec<TargetDecl>,
    #[serde(default)]
    pub examples: Vec<TargetDecl>,
    /// Generator script, relative to the manifest directory
    #[serde(default)]
    pub build_script: Option<String>,
    /// Features enabled by `default`, transitively
    #[serde(default)]
    pub default_features: Vec<String>,
    /// Dependency key to package name, for `foo = { package = "bar" }`
    /// renames
    #[serde(default)]
    pub renamed_dependencies: BTreeMap<String, String>,
}

impl ManifestSummary {
    /// External crate name of the package
    pub fn crate_name(&self) -> String {
        self.package.replace('-', "_")
    }

    /// Every declared source root
    pub fn roots(&self) -> impl Iterator<Item = &TargetDecl> {
        self.lib
            .iter()
            .chain(&self.bins)
            .chain(&self.tests)
            .chain(&self.benches)
            .chain(&self.examples)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RawManifest {
    package: Option<RawPackage>,
    lib: Option<RawTarget>,
    #[serde(default)]
    bin: Vec<RawTarget>,
    #[serde(default)]
    test: Vec<RawTarget>,
    #[serde(default)]
    bench: Vec<RawTarget>,
    #[serde(default)]
    example: Vec<RawTarget>,
    #[serde(default)]
    dependencies: BTreeMap<String, RawDependency>,
    #[serde(default)]
    dev_dependencies: BTreeMap<String, RawDependency>,
    #[serde(default)]
    features: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RawPackage {
    name: String,
    #[serde(default)]
    build: Option<RawBuild>,
    #[serde(default = "default_true")]
    autobins: bool,
    #[serde(default = "default_true")]
    autotests: bool,
    #[serde(default = "default_true")]
    autobenches: bool,
    #[serde(default = "default_true")]
    autoexamples: bool,
}

/// `build = "gen.rs"` or `build = false`
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawBuild {
    Path(String),
    Enabled(bool),
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RawTarget {
    name: Option<String>,
    path: Option<String>,
    #[serde(default)]
    proc_macro: bool,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawDependency {
    #[allow(dead_code)]
    Version(String),
    Table(RawDependencyTable),
}

#[derive(Debug, Deserialize)]
struct RawDependencyTable {
    package: Option<String>,
}

fn default_true() -> bool {
    true
}

/// Read and summarize the manifest at `path`
pub fn read_manifest(path: &Path) -> Result<ManifestSummary> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::parse(path, format!("cannot read manifest: {}", e)))?;
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    parse_manifest(&content, &|rel| dir.join(rel).is_file(), &|rel| {
        list_rust_files(&dir.join(rel))
    })
    .map_err(|e| match e {
        Error::Toml(inner) => Error::parse(path, inner),
        other => other,
    })
}

/// Parse manifest text; `exists` and `list` answer file-system questions
/// relative to the manifest directory
pub fn parse_manifest(
    content: &str,
    exists: &dyn Fn(&str) -> bool,
    list: &dyn Fn(&str) -> Vec<String>,
) -> Result<ManifestSummary> {
    let raw: RawManifest = toml::from_str(content)?;
    let package = raw
        .package
        .ok_or_else(|| Error::Other("manifest has no [package] table".to_string()))?;
    let crate_name = package.name.replace('-', "_");

    let proc_macro = raw.lib.as_ref().is_some_and(|lib| lib.proc_macro);
    let lib = match &raw.lib {
        Some(lib) => Some(TargetDecl::new(
            lib.name.clone().unwrap_or_else(|| crate_name.clone()),
            lib.path.clone().unwrap_or_else(|| "src/lib.rs".to_string()),
        )),
        None if exists("src/lib.rs") => Some(TargetDecl::new(&crate_name, "src/lib.rs")),
        None => None,
    };

    let mut bins = explicit_targets(&raw.bin, "src/bin");
    if package.autobins {
        if exists("src/main.rs") && !bins.iter().any(|b| b.path == "src/main.rs") {
            bins.push(TargetDecl::new(&package.name, "src/main.rs"));
        }
        discover(&mut bins, "src/bin", list);
    }

    let mut tests = explicit_targets(&raw.test, "tests");
    if package.autotests {
        discover(&mut tests, "tests", list);
    }
    let mut benches = explicit_targets(&raw.bench, "benches");
    if package.autobenches {
        discover(&mut benches, "benches", list);
    }
    let mut examples = explicit_targets(&raw.example, "examples");
    if package.autoexamples {
        discover(&mut examples, "examples", list);
    }

    let build_script = match package.build {
        Some(RawBuild::Path(p)) => Some(p),
        Some(RawBuild::Enabled(false)) => None,
        Some(RawBuild::Enabled(true)) | None => {
            exists("build.rs").then(|| "build.rs".to_string())
        }
    };

    let renamed_dependencies = raw
        .dependencies
        .iter()
        .chain(&raw.dev_dependencies)
        .filter_map(|(key, dep)| match dep {
            RawDependency::Table(RawDependencyTable {
                package: Some(pkg),
            }) if pkg != key => Some((key.replace('-', "_"), pkg.clone())),
            _ => None,
        })
        .collect();

    Ok(ManifestSummary {
        package: package.name,
        lib,
        proc_macro,
        bins,
        tests,
        benches,
        examples,
        build_script,
        default_features: default_features(&raw.features),
        renamed_dependencies,
    })
}

fn explicit_targets(raw: &[RawTarget], dir: &str) -> Vec<TargetDecl> {
    raw.iter()
        .filter_map(|t| match (&t.name, &t.path) {
            (Some(name), Some(path)) => Some(TargetDecl::new(name, path)),
            (Some(name), None) => Some(TargetDecl::new(name, format!("{}/{}.rs", dir, name))),
            (None, Some(path)) => Path::new(path)
                .file_stem()
                .map(|stem| TargetDecl::new(stem.to_string_lossy(), path)),
            (None, None) => None,
        })
        .collect()
}

fn discover(targets: &mut Vec<TargetDecl>, dir: &str, list: &dyn Fn(&str) -> Vec<String>) {
    for file in list(dir) {
        let path = format!("{}/{}", dir, file);
        if targets.iter().any(|t| t.path == path) {
            continue;
        }
        if let Some(stem) = file.strip_suffix(".rs") {
            targets.push(TargetDecl::new(stem, path));
        }
    }
}

fn list_rust_files(dir: &Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<String> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_file())
        .filter_map(|e| e.file_name().into_string().ok())
        .filter(|name| name.ends_with(".rs"))
        .collect();
    files.sort();
    files
}

/// Expand `default` through the feature table
fn default_features(features: &BTreeMap<String, Vec<String>>) -> Vec<String> {
    let mut enabled: Vec<String> = Vec::new();
    let mut pending: Vec<String> = features.get("default").cloned().unwrap_or_default();
    while let Some(feature) = pending.pop() {
        // `dep:x` and `x/feat` enable dependency features, not our own
        if feature.starts_with("dep:") || feature.contains('/') || enabled.contains(&feature) {
            continue;
        }
        if let Some(implied) = features.get(&feature) {
            pending.extend(implied.iter().cloned());
        }
        enabled.push(feature);
    }
    enabled.sort();
    enabled
}
