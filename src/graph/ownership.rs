//! Cross-directory ownership
//!
//! A file in `a/b/` may belong to a crate rooted in `a/` through
//! `mod b;` in `a/lib.rs` and `mod x;` in `a/b.rs` (or `a/b/mod.rs`). Such a
//! file must not become a standalone unit of its own directory. The check
//! finds the nearest ancestor holding a crate root and re-walks the `mod`
//! chain down to the file.

use super::modules::{resolve_submodule, ModuleGraph};
use super::normalize_path;
use crate::analyze::Analyzer;
use crate::error::Result;
use std::path::{Path, PathBuf};
use tracing::debug;

const ROOT_FILES: [&str; 2] = ["lib.rs", "main.rs"];

/// Whether `file` (inside `dir`) is reachable from a crate root in the
/// nearest ancestor of `dir` that has one, at or below `repo_root`
pub fn is_claimed<A: Analyzer + ?Sized>(
    dir: &Path,
    file: &Path,
    repo_root: &Path,
    analyzer: &mut A,
) -> Result<bool> {
    let dir = normalize_path(dir);
    let file = normalize_path(file);
    let repo_root = normalize_path(repo_root);

    let mut ancestor = dir.parent();
    while let Some(candidate) = ancestor {
        if !candidate.starts_with(&repo_root) {
            break;
        }
        let roots = crate_roots(candidate, analyzer)?;
        if !roots.is_empty() {
            let hops = hops_to(candidate, &dir, &file);
            for root in &roots {
                if walk_hops(root, &hops, &file, analyzer)?
                    || reached_by_path_attribute(root, &file, analyzer)?
                {
                    debug!(
                        path = %file.display(),
                        root = %root.display(),
                        "file is owned by an ancestor crate"
                    );
                    return Ok(true);
                }
            }
            // only the nearest ancestor with roots can claim
            return Ok(false);
        }
        if candidate == repo_root {
            break;
        }
        ancestor = candidate.parent();
    }
    Ok(false)
}

/// Crate roots located in `dir`: `lib.rs`, `main.rs`, and any target a
/// manifest in `dir` or its parent declares inside `dir`
fn crate_roots<A: Analyzer + ?Sized>(dir: &Path, analyzer: &mut A) -> Result<Vec<PathBuf>> {
    let mut roots: Vec<PathBuf> = ROOT_FILES
        .iter()
        .map(|name| dir.join(name))
        .filter(|p| p.is_file())
        .collect();

    let manifest_dirs = std::iter::once(dir).chain(dir.parent());
    for manifest_dir in manifest_dirs {
        let manifest = manifest_dir.join("Cargo.toml");
        if !manifest.is_file() {
            continue;
        }
        let summary = match analyzer.analyze_manifest(&manifest) {
            Ok(summary) => summary,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                // virtual workspace manifests have no targets
                debug!(path = %manifest.display(), error = %e, "ignoring manifest");
                continue;
            }
        };
        for target in summary.roots() {
            let root = normalize_path(&manifest_dir.join(&target.path));
            if root.parent() == Some(dir) && root.is_file() && !roots.contains(&root) {
                roots.push(root);
            }
        }
    }
    Ok(roots)
}

/// Module names from `ancestor` down to `file`: one per directory below
/// the ancestor, then the file stem (a `mod.rs` is addressed by its
/// directory alone)
fn hops_to(ancestor: &Path, dir: &Path, file: &Path) -> Vec<String> {
    let mut hops: Vec<String> = dir
        .strip_prefix(ancestor)
        .map(|rel| {
            rel.components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();
    match file.file_stem().map(|s| s.to_string_lossy().into_owned()) {
        Some(stem) if stem != "mod" => hops.push(stem),
        _ => {}
    }
    hops
}

fn walk_hops<A: Analyzer + ?Sized>(
    root: &Path,
    hops: &[String],
    file: &Path,
    analyzer: &mut A,
) -> Result<bool> {
    let mut current = root.to_path_buf();
    let mut is_module_root = true;

    for hop in hops {
        let summary = match analyzer.analyze_source(&current) {
            Ok(summary) => summary,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                debug!(path = %current.display(), error = %e, "ownership chain broken");
                return Ok(false);
            }
        };
        let Some(decl) = summary.submodule(hop) else {
            return Ok(false);
        };
        match resolve_submodule(&current, is_module_root, decl) {
            Some((next, next_is_root)) => {
                current = next;
                is_module_root = next_is_root;
            }
            None => return Ok(false),
        }
    }

    Ok(current == file)
}

/// `#[path]` declarations can place a module anywhere, so hop names say
/// nothing about them; fall back to discovering the whole graph
fn reached_by_path_attribute<A: Analyzer + ?Sized>(
    root: &Path,
    file: &Path,
    analyzer: &mut A,
) -> Result<bool> {
    let graph = match ModuleGraph::discover(root, analyzer) {
        Ok(graph) => graph,
        Err(e) if e.is_fatal() => return Err(e),
        Err(_) => return Ok(false),
    };
    let uses_path = graph
        .files()
        .iter()
        .any(|f| f.summary.submodules.iter().any(|m| m.path.is_some()));
    Ok(uses_path && graph.contains(file))
}
