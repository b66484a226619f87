//! Compilation-unit inference for one directory
//!
//! With a `Cargo.toml` carrying a `[package]`, units follow the declared
//! (or auto-discovered) targets. Otherwise the directory is read the Bazel
//! way: `lib.rs` and `main.rs` root the primary crate, and every remaining
//! top-level `.rs` file that no crate owns becomes a unit of its own, its
//! kind taken from the analyzer's hints.

use super::modules::ModuleGraph;
use super::normalize_path;
use super::ownership::is_claimed;
use crate::analyze::{Analyzer, ManifestSummary, SourceSummary};
use crate::cfg::Predicate;
use crate::error::{Diagnostics, Result};
use crate::label::Label;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Target name given to a directory's build script unit
pub const BUILD_SCRIPT_NAME: &str = "build_script";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    Library,
    Binary,
    Test,
    ProcMacro,
    BuildScript,
}

impl UnitKind {
    /// Kinds other units can depend on by crate name
    pub fn is_linkable(self) -> bool {
        matches!(self, UnitKind::Library | UnitKind::ProcMacro)
    }

    pub fn rule_name(self) -> &'static str {
        match self {
            UnitKind::Library => "rust_library",
            UnitKind::Binary => "rust_binary",
            UnitKind::Test => "rust_test",
            UnitKind::ProcMacro => "rust_proc_macro",
            UnitKind::BuildScript => "cargo_build_script",
        }
    }
}

impl fmt::Display for UnitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.rule_name())
    }
}

/// One source file of a unit
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnitFile {
    /// Path relative to the unit's directory
    pub path: String,
    #[serde(skip)]
    pub summary: SourceSummary,
    /// Condition under which the file is compiled in
    #[serde(skip)]
    pub condition: Predicate,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompilationUnit {
    pub name: String,
    pub kind: UnitKind,
    /// Name other crates refer to this one by
    pub crate_name: String,
    /// Bazel package, relative to the repository root
    pub package: String,
    #[serde(skip)]
    pub directory: PathBuf,
    /// Crate root, relative to `directory`
    pub root: String,
    /// Sources in discovery order; empty for paired tests, which compile
    /// the tested unit's sources
    pub srcs: Vec<String>,
    #[serde(skip)]
    pub files: Vec<UnitFile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tested_unit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_script: Option<String>,
    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    pub crate_features: BTreeSet<String>,
    /// Dependency key to package for manifest renames
    #[serde(skip)]
    pub renamed_dependencies: BTreeMap<String, String>,
    /// Cargo package the unit was declared by
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest_package: Option<String>,
}

impl CompilationUnit {
    pub fn label(&self) -> Label {
        Label::new("", self.package.clone(), self.name.clone())
    }

    pub fn is_test(&self) -> bool {
        self.kind == UnitKind::Test
    }

    /// A test generated next to the unit it validates
    pub fn is_paired_test(&self) -> bool {
        self.tested_unit.is_some()
    }

    /// Workspace member this unit requests vendored versions as
    pub fn requester(&self) -> &str {
        self.manifest_package.as_deref().unwrap_or(&self.crate_name)
    }

    pub fn has_tests(&self) -> bool {
        self.files.iter().any(|f| f.summary.hints.has_test)
    }
}

/// Infer every unit rooted in `dir`. Units whose root cannot be read are
/// skipped and reported in `diagnostics`.
pub fn infer_units<A: Analyzer + ?Sized>(
    dir: &Path,
    repo_root: &Path,
    analyzer: &mut A,
    diagnostics: &mut Diagnostics,
) -> Result<Vec<CompilationUnit>> {
    let dir = normalize_path(dir);
    let repo_root = normalize_path(repo_root);
    let mut builder = UnitBuilder {
        dir: &dir,
        package: package_of(&dir, &repo_root),
        units: Vec::new(),
        names: HashSet::new(),
        owned: HashSet::new(),
        diagnostics,
    };

    if let Some(manifest) = package_manifest(&dir, analyzer)? {
        builder.from_manifest(&manifest, analyzer)?;
    } else {
        builder.from_directory(&repo_root, analyzer)?;
    }
    builder.add_paired_tests();

    Ok(builder.units)
}

/// Whether `dir` lies inside the package of a manifest in a strict ancestor,
/// in which case that package's units already cover its files
pub fn inside_manifest_package<A: Analyzer + ?Sized>(
    dir: &Path,
    repo_root: &Path,
    analyzer: &mut A,
) -> Result<bool> {
    let dir = normalize_path(dir);
    let repo_root = normalize_path(repo_root);
    let mut ancestor = dir.parent();
    while let Some(candidate) = ancestor {
        if !candidate.starts_with(&repo_root) {
            break;
        }
        if package_manifest(candidate, analyzer)?.is_some() {
            return Ok(true);
        }
        ancestor = candidate.parent();
    }
    Ok(false)
}

fn package_manifest<A: Analyzer + ?Sized>(
    dir: &Path,
    analyzer: &mut A,
) -> Result<Option<ManifestSummary>> {
    let path = dir.join("Cargo.toml");
    if !path.is_file() {
        return Ok(None);
    }
    match analyzer.analyze_manifest(&path) {
        Ok(summary) => Ok(Some(summary)),
        Err(e) if e.is_fatal() => Err(e),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "not a package manifest");
            Ok(None)
        }
    }
}

fn package_of(dir: &Path, repo_root: &Path) -> String {
    dir.strip_prefix(repo_root)
        .map(|rel| {
            rel.components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/")
        })
        .unwrap_or_default()
}

struct UnitBuilder<'a> {
    dir: &'a Path,
    package: String,
    units: Vec<CompilationUnit>,
    names: HashSet<String>,
    /// Files already given to a unit; each file has exactly one owner
    owned: HashSet<PathBuf>,
    diagnostics: &'a mut Diagnostics,
}

impl UnitBuilder<'_> {
    fn from_manifest<A: Analyzer + ?Sized>(
        &mut self,
        manifest: &ManifestSummary,
        analyzer: &mut A,
    ) -> Result<()> {
        let features: BTreeSet<String> = manifest.default_features.iter().cloned().collect();
        let build_script = match &manifest.build_script {
            Some(path) => self.add(BUILD_SCRIPT_NAME, UnitKind::BuildScript, path, analyzer)?,
            None => None,
        };
        if let Some(i) = build_script {
            self.units[i].manifest_package = Some(manifest.package.clone());
            self.units[i].crate_features = features.clone();
        }

        let mut declared: Vec<(UnitKind, &str, &str)> = Vec::new();
        if let Some(lib) = &manifest.lib {
            let kind = if manifest.proc_macro {
                UnitKind::ProcMacro
            } else {
                UnitKind::Library
            };
            declared.push((kind, lib.name.as_str(), lib.path.as_str()));
        }
        for bin in manifest.bins.iter().chain(&manifest.examples) {
            declared.push((UnitKind::Binary, bin.name.as_str(), bin.path.as_str()));
        }
        for test in manifest.tests.iter().chain(&manifest.benches) {
            declared.push((UnitKind::Test, test.name.as_str(), test.path.as_str()));
        }

        for (kind, name, path) in declared {
            let Some(index) = self.add(name, kind, path, analyzer)? else {
                continue;
            };
            let unit = &mut self.units[index];
            unit.crate_name = name.replace('-', "_");
            unit.crate_features = features.clone();
            unit.renamed_dependencies = manifest.renamed_dependencies.clone();
            unit.manifest_package = Some(manifest.package.clone());
            unit.build_script = build_script.map(|_| BUILD_SCRIPT_NAME.to_string());
        }
        Ok(())
    }

    fn from_directory<A: Analyzer + ?Sized>(
        &mut self,
        repo_root: &Path,
        analyzer: &mut A,
    ) -> Result<()> {
        let dir_name = self
            .dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| "root".to_string());

        let build_script = if self.dir.join("build.rs").is_file() {
            self.add(BUILD_SCRIPT_NAME, UnitKind::BuildScript, "build.rs", analyzer)?
        } else {
            None
        };

        let lib = if self.dir.join("lib.rs").is_file() {
            let index = self.add(&dir_name, UnitKind::Library, "lib.rs", analyzer)?;
            if let Some(i) = index {
                if self.units[i].files[0].summary.hints.has_proc_macro {
                    self.units[i].kind = UnitKind::ProcMacro;
                }
            }
            index
        } else {
            None
        };

        if self.dir.join("main.rs").is_file() {
            let name = if lib.is_some() {
                format!("{}_bin", dir_name)
            } else {
                dir_name.clone()
            };
            if let Some(i) = self.add(&name, UnitKind::Binary, "main.rs", analyzer)? {
                // main.rs refers to its library by the directory name
                self.units[i].crate_name = dir_name.replace('-', "_");
            }
        }

        let mut claimed: HashSet<String> = self
            .units
            .iter()
            .flat_map(|u| u.srcs.iter().cloned())
            .collect();

        // standalone candidates, each with the graph it would root
        let mut candidates: Vec<(String, ModuleGraph)> = Vec::new();
        for file in self.rust_files()? {
            if claimed.contains(&file)
                || matches!(file.as_str(), "lib.rs" | "main.rs" | "mod.rs" | "build.rs")
            {
                continue;
            }
            let path = self.dir.join(&file);
            if is_claimed(self.dir, &path, repo_root, analyzer)? {
                continue;
            }
            match ModuleGraph::discover(&path, analyzer) {
                Ok(mut graph) => {
                    graph.drain_diagnostics(&mut *self.diagnostics);
                    candidates.push((file, graph));
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unit with unreadable root");
                    self.diagnostics.push(e);
                }
            }
        }

        let dir = self.dir;
        let owners = |file: &str| -> Vec<&str> {
            let path = dir.join(file);
            candidates
                .iter()
                .filter(|(other, graph)| other != file && graph.paths().skip(1).any(|p| p == path))
                .map(|(other, _)| other.as_str())
                .collect()
        };
        let mut standalone = Vec::new();
        for (file, _) in &candidates {
            // mutual claims survive here; the first in sorted order takes
            // the shared files below and the other loses its root
            let owned = owners(file).into_iter().any(|owner| {
                !owners(owner).contains(&file.as_str())
            });
            if !owned {
                standalone.push(file.clone());
            }
        }

        for (file, graph) in candidates {
            if !standalone.contains(&file) || self.owned.contains(&dir.join(&file)) {
                claimed.insert(file);
                continue;
            }
            let hints = graph.root().summary.hints;
            let kind = if hints.has_main {
                UnitKind::Binary
            } else if hints.has_proc_macro {
                UnitKind::ProcMacro
            } else if hints.has_test {
                UnitKind::Test
            } else {
                UnitKind::Library
            };
            let stem = file.trim_end_matches(".rs").to_string();
            self.push_graph(&stem, kind, &file, graph);
        }

        if build_script.is_some() {
            for unit in &mut self.units {
                if unit.kind != UnitKind::BuildScript {
                    unit.build_script = Some(BUILD_SCRIPT_NAME.to_string());
                }
            }
        }
        Ok(())
    }

    /// Discover and record a unit; `None` when its root is missing or
    /// unreadable
    fn add<A: Analyzer + ?Sized>(
        &mut self,
        name: &str,
        kind: UnitKind,
        root: &str,
        analyzer: &mut A,
    ) -> Result<Option<usize>> {
        let path = self.dir.join(root);
        if !path.is_file() {
            warn!(unit = %name, path = %path.display(), "declared root does not exist");
            return Ok(None);
        }
        match ModuleGraph::discover(&path, analyzer) {
            Ok(mut graph) => {
                graph.drain_diagnostics(&mut *self.diagnostics);
                Ok(self.push_graph(name, kind, root, graph))
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                warn!(unit = %name, error = %e, "skipping unit with unreadable root");
                self.diagnostics.push(e);
                Ok(None)
            }
        }
    }

    /// Record a unit over the files of `graph` no earlier unit owns.
    /// `None` when the root itself is already owned.
    fn push_graph(
        &mut self,
        name: &str,
        kind: UnitKind,
        root: &str,
        graph: ModuleGraph,
    ) -> Option<usize> {
        if self.owned.contains(&graph.root().path) {
            debug!(unit = %name, root = %root, "root belongs to an earlier unit");
            return None;
        }
        let name = self.unique_name(name, kind);
        let files: Vec<UnitFile> = graph
            .files()
            .iter()
            .filter(|f| {
                let first = self.owned.insert(f.path.clone());
                if !first {
                    debug!(unit = %name, path = %f.path.display(), "file belongs to an earlier unit");
                }
                first
            })
            .map(|f| UnitFile {
                path: relative(self.dir, &f.path),
                summary: f.summary.clone(),
                condition: f.condition.clone(),
            })
            .collect();
        debug!(unit = %name, kind = %kind, files = files.len(), "inferred unit");

        self.units.push(CompilationUnit {
            crate_name: name.replace('-', "_"),
            kind,
            package: self.package.clone(),
            directory: self.dir.to_path_buf(),
            root: root.to_string(),
            srcs: files.iter().map(|f| f.path.clone()).collect(),
            files,
            tested_unit: None,
            build_script: None,
            crate_features: BTreeSet::new(),
            renamed_dependencies: BTreeMap::new(),
            manifest_package: None,
            name,
        });
        Some(self.units.len() - 1)
    }

    /// A test target beside every library or binary that has inline tests
    fn add_paired_tests(&mut self) {
        let tested: Vec<usize> = (0..self.units.len())
            .filter(|&i| {
                let unit = &self.units[i];
                matches!(
                    unit.kind,
                    UnitKind::Library | UnitKind::ProcMacro | UnitKind::Binary
                ) && unit.has_tests()
            })
            .collect();

        for i in tested {
            let base = self.units[i].clone();
            let name = self.unique_name(&format!("{}_test", base.name), UnitKind::Test);
            self.units.push(CompilationUnit {
                name,
                kind: UnitKind::Test,
                srcs: Vec::new(),
                tested_unit: Some(base.name.clone()),
                ..base
            });
        }
    }

    fn unique_name(&mut self, base: &str, kind: UnitKind) -> String {
        let mut name = base.to_string();
        if self.names.contains(&name) {
            let suffix = match kind {
                UnitKind::Library => "lib",
                UnitKind::Binary => "bin",
                UnitKind::Test => "test",
                UnitKind::ProcMacro => "macro",
                UnitKind::BuildScript => "build",
            };
            name = format!("{}_{}", base, suffix);
            let mut n = 2;
            while self.names.contains(&name) {
                name = format!("{}_{}{}", base, suffix, n);
                n += 1;
            }
        }
        self.names.insert(name.clone());
        name
    }

    fn rust_files(&self) -> Result<Vec<String>> {
        let mut files: Vec<String> = std::fs::read_dir(self.dir)?
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_file())
            .filter_map(|e| e.file_name().into_string().ok())
            .filter(|name| name.ends_with(".rs"))
            .collect();
        files.sort();
        Ok(files)
    }
}

fn relative(dir: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(dir).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}
