//! Module graph discovery
//!
//! Starting from one crate root, follow out-of-line `mod` declarations to
//! every file of the compilation unit. A crate root or `mod.rs` file
//! addresses its children next to itself (`name.rs`, then `name/mod.rs`);
//! any other file `stem.rs` addresses them under `stem/`.

use super::normalize_path;
use crate::analyze::{Analyzer, SourceSummary, SubmoduleDecl};
use crate::cfg::Predicate;
use crate::error::{Diagnostics, Error, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// One file of a compilation unit
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleFile {
    pub path: PathBuf,
    pub summary: SourceSummary,
    /// Conjunction of the cfg predicates on the `mod` chain leading here
    pub condition: Predicate,
    pub is_module_root: bool,
}

/// Files reachable from one root, root first, then depth-first in
/// declaration order
#[derive(Debug)]
pub struct ModuleGraph {
    files: Vec<ModuleFile>,
    diagnostics: Vec<Error>,
}

struct Pending {
    path: PathBuf,
    is_module_root: bool,
    condition: Predicate,
}

impl ModuleGraph {
    /// Discover the unit rooted at `root`. Fails only if the root itself
    /// cannot be analyzed; missing or unparseable submodules are recorded
    /// as diagnostics and their subtrees dropped.
    pub fn discover<A: Analyzer + ?Sized>(root: &Path, analyzer: &mut A) -> Result<ModuleGraph> {
        let root = normalize_path(root);
        let mut files = Vec::new();
        let mut diagnostics = Vec::new();
        let mut visited: HashSet<PathBuf> = HashSet::new();

        let mut stack = vec![Pending {
            path: root.clone(),
            is_module_root: true,
            condition: Predicate::True,
        }];

        while let Some(next) = stack.pop() {
            if !visited.insert(next.path.clone()) {
                // cycles and repeated declarations are inert
                continue;
            }

            let summary = match analyzer.analyze_source(&next.path) {
                Ok(summary) => summary,
                Err(e) if next.path == root => return Err(e),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(path = %next.path.display(), error = %e, "skipping unparseable module");
                    diagnostics.push(e);
                    continue;
                }
            };

            let mut children = Vec::new();
            for decl in &summary.submodules {
                match resolve_submodule(&next.path, next.is_module_root, decl) {
                    Some((path, is_module_root)) => children.push(Pending {
                        path,
                        is_module_root,
                        condition: next.condition.clone().and(decl.predicate.clone()),
                    }),
                    None => {
                        warn!(
                            path = %next.path.display(),
                            name = %decl.name,
                            "cannot find module file, skipping"
                        );
                        diagnostics.push(Error::MissingModule {
                            parent: next.path.clone(),
                            name: decl.name.clone(),
                        });
                    }
                }
            }
            // reversed so the first declaration is walked first
            stack.extend(children.into_iter().rev());

            debug!(path = %next.path.display(), "module file");
            files.push(ModuleFile {
                path: next.path,
                summary,
                condition: next.condition,
                is_module_root: next.is_module_root,
            });
        }

        Ok(ModuleGraph { files, diagnostics })
    }

    pub fn root(&self) -> &ModuleFile {
        &self.files[0]
    }

    pub fn files(&self) -> &[ModuleFile] {
        &self.files
    }

    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.files.iter().map(|f| f.path.as_path())
    }

    pub fn contains(&self, path: &Path) -> bool {
        let path = normalize_path(path);
        self.files.iter().any(|f| f.path == path)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn diagnostics(&self) -> &[Error] {
        &self.diagnostics
    }

    /// Move the collected diagnostics into `out`
    pub fn drain_diagnostics(&mut self, out: &mut Diagnostics) {
        for e in self.diagnostics.drain(..) {
            out.push(e);
        }
    }
}

/// Candidate files for `decl` declared in `file`, in probe order, each
/// with whether it is a module root for its own children
pub fn submodule_candidates(
    file: &Path,
    is_module_root: bool,
    decl: &SubmoduleDecl,
) -> Vec<(PathBuf, bool)> {
    let dir = file.parent().unwrap_or_else(|| Path::new(""));
    let base = if is_module_root {
        dir.to_path_buf()
    } else {
        let stem = file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        dir.join(stem)
    };

    if let Some(explicit) = &decl.path {
        // relative to the declaring file's directory; the target addresses
        // its children like a mod.rs
        return vec![(normalize_path(&dir.join(explicit)), true)];
    }

    vec![
        (normalize_path(&base.join(format!("{}.rs", decl.name))), false),
        (normalize_path(&base.join(&decl.name).join("mod.rs")), true),
    ]
}

/// First candidate that exists on disk
pub fn resolve_submodule(
    file: &Path,
    is_module_root: bool,
    decl: &SubmoduleDecl,
) -> Option<(PathBuf, bool)> {
    submodule_candidates(file, is_module_root, decl)
        .into_iter()
        .find(|(path, _)| path.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::SynAnalyzer;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &Path, rel: &str, content: &str) {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn rel_paths(graph: &ModuleGraph, base: &Path) -> Vec<String> {
        graph
            .paths()
            .map(|p| p.strip_prefix(base).unwrap().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_candidates_for_root_and_non_root() {
        let decl = SubmoduleDecl::new("child");
        assert_eq!(
            submodule_candidates(Path::new("/r/src/lib.rs"), true, &decl),
            vec![
                (PathBuf::from("/r/src/child.rs"), false),
                (PathBuf::from("/r/src/child/mod.rs"), true)
            ]
        );
        assert_eq!(
            submodule_candidates(Path::new("/r/src/parent.rs"), false, &decl),
            vec![
                (PathBuf::from("/r/src/parent/child.rs"), false),
                (PathBuf::from("/r/src/parent/child/mod.rs"), true)
            ]
        );
    }

    #[test]
    fn test_both_conventions() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path();
        write(dir, "lib.rs", "mod a;\nmod b;\n");
        write(dir, "a.rs", "mod inner;\n");
        write(dir, "a/inner.rs", "");
        write(dir, "b/mod.rs", "mod deep;\n");
        write(dir, "b/deep.rs", "");

        let graph = ModuleGraph::discover(&dir.join("lib.rs"), &mut SynAnalyzer::new()).unwrap();
        assert_eq!(
            rel_paths(&graph, dir),
            vec!["lib.rs", "a.rs", "a/inner.rs", "b/mod.rs", "b/deep.rs"]
        );
        assert!(graph.files()[3].is_module_root);
        assert!(!graph.files()[1].is_module_root);
        assert!(graph.diagnostics().is_empty());
    }

    #[test]
    fn test_missing_module_is_soft() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path();
        write(dir, "lib.rs", "mod gone;\nmod here;\n");
        write(dir, "here.rs", "");

        let graph = ModuleGraph::discover(&dir.join("lib.rs"), &mut SynAnalyzer::new()).unwrap();
        assert_eq!(rel_paths(&graph, dir), vec!["lib.rs", "here.rs"]);
        assert!(matches!(
            graph.diagnostics(),
            [Error::MissingModule { name, .. }] if name == "gone"
        ));
    }

    #[test]
    fn test_cycle_is_inert() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path();
        write(dir, "lib.rs", "#[path = \"lib.rs\"]\nmod again;\nmod a;\n");
        write(dir, "a.rs", "");

        let graph = ModuleGraph::discover(&dir.join("lib.rs"), &mut SynAnalyzer::new()).unwrap();
        assert_eq!(rel_paths(&graph, dir), vec!["lib.rs", "a.rs"]);
    }

    #[test]
    fn test_condition_is_inherited() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path();
        write(dir, "lib.rs", "#[cfg(test)]\nmod tests;\n");
        write(dir, "tests.rs", "#[cfg(unix)]\nmod unix_only;\n");
        write(dir, "tests/unix_only.rs", "");

        let graph = ModuleGraph::discover(&dir.join("lib.rs"), &mut SynAnalyzer::new()).unwrap();
        assert_eq!(
            graph.files()[2].condition,
            Predicate::all([Predicate::flag("test"), Predicate::flag("unix")])
        );
    }

    #[test]
    fn test_root_failure_is_error() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path();
        write(dir, "lib.rs", "fn (");
        assert!(ModuleGraph::discover(&dir.join("lib.rs"), &mut SynAnalyzer::new()).is_err());
    }

    #[test]
    fn test_broken_child_drops_subtree() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path();
        write(dir, "lib.rs", "mod broken;\nmod fine;\n");
        write(dir, "broken.rs", "mod nested;\nfn (");
        write(dir, "broken/nested.rs", "");
        write(dir, "fine.rs", "");

        let graph = ModuleGraph::discover(&dir.join("lib.rs"), &mut SynAnalyzer::new()).unwrap();
        assert_eq!(rel_paths(&graph, dir), vec!["lib.rs", "fine.rs"]);
        assert!(matches!(graph.diagnostics(), [Error::Parse { .. }]));
    }
}
