//! Unit inference and resolution driven by a scripted analyzer

use cratedeps::analyze::{Hints, SubmoduleDecl};
use cratedeps::*;
use pretty_assertions::assert_eq;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Answers from a table; files only need to exist on disk
#[derive(Default)]
struct ScriptedAnalyzer {
    sources: HashMap<PathBuf, SourceSummary>,
    calls: usize,
}

impl ScriptedAnalyzer {
    fn script(&mut self, repo: &Path, rel: &str, summary: SourceSummary) {
        let path = repo.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "").unwrap();
        self.sources.insert(path, summary);
    }
}

impl Analyzer for ScriptedAnalyzer {
    fn analyze_source(&mut self, path: &Path) -> Result<SourceSummary> {
        self.calls += 1;
        self.sources
            .get(path)
            .cloned()
            .ok_or_else(|| Error::parse(path, "not scripted"))
    }

    fn analyze_manifest(&mut self, path: &Path) -> Result<ManifestSummary> {
        Err(Error::parse(path, "no manifests here"))
    }
}

fn uses(names: &[&str]) -> SourceSummary {
    SourceSummary {
        references: names.iter().map(|n| Reference::always(*n)).collect(),
        ..Default::default()
    }
}

fn with_submodules(mut summary: SourceSummary, decls: Vec<SubmoduleDecl>) -> SourceSummary {
    summary.submodules = decls;
    summary
}

#[test]
fn test_path_submodule_is_module_root() {
    let tmp = TempDir::new().unwrap();
    let repo = tmp.path();
    let mut analyzer = ScriptedAnalyzer::default();

    let mut b = SubmoduleDecl::new("b");
    b.path = Some("b/root.rs".to_string());
    analyzer.script(
        repo,
        "lib.rs",
        with_submodules(uses(&[]), vec![SubmoduleDecl::new("a"), b]),
    );
    analyzer.script(repo, "a.rs", uses(&["serde"]));
    analyzer.script(
        repo,
        "b/root.rs",
        with_submodules(uses(&[]), vec![SubmoduleDecl::new("c")]),
    );
    // a module root addresses `c` beside itself, not under `b/root/`
    analyzer.script(repo, "b/c.rs", uses(&[]));

    let graph = ModuleGraph::discover(&repo.join("lib.rs"), &mut analyzer).unwrap();
    assert_eq!(graph.len(), 4);
    assert!(graph.contains(&repo.join("b/c.rs")));
    assert!(graph.diagnostics().is_empty());
}

#[test]
fn test_units_and_resolution_with_fake() {
    let tmp = TempDir::new().unwrap();
    let repo = tmp.path();
    let mut analyzer = ScriptedAnalyzer::default();

    analyzer.script(repo, "engine/lib.rs", uses(&["std"]));
    analyzer.script(
        repo,
        "app/main.rs",
        SourceSummary {
            references: vec![Reference::always("engine"), Reference::always("runfiles")],
            hints: Hints {
                has_main: true,
                ..Default::default()
            },
            ..Default::default()
        },
    );

    let mut diagnostics = Diagnostics::new();
    let mut units = infer_units(&repo.join("engine"), repo, &mut analyzer, &mut diagnostics).unwrap();
    units.extend(infer_units(&repo.join("app"), repo, &mut analyzer, &mut diagnostics).unwrap());
    assert!(diagnostics.is_empty());
    assert_eq!(units.len(), 2);

    let scope = ScopeConfig::empty();
    let index = LocalIndex::from_units(&units);
    let resolver = Resolver::new(&scope, &index, None);
    let mut usage = UsageLog::new();

    let app = units.iter().find(|u| u.kind == UnitKind::Binary).unwrap();
    let resolved = resolver.resolve_unit(app, &mut usage).unwrap();
    assert_eq!(
        resolved.deps.render(),
        r#"["//engine", "@rules_rust//tools/runfiles"]"#
    );
    assert!(resolved.diagnostics.is_empty());

    let engine = units.iter().find(|u| u.kind == UnitKind::Library).unwrap();
    assert!(resolver.resolve_unit(engine, &mut usage).unwrap().deps.is_empty());
}

#[test]
fn test_caching_analyzer_avoids_repeat_reads() {
    let tmp = TempDir::new().unwrap();
    let repo = tmp.path();
    let mut scripted = ScriptedAnalyzer::default();
    scripted.script(repo, "a/lib.rs", with_submodules(uses(&[]), vec![SubmoduleDecl::new("b")]));
    scripted.script(repo, "a/b/mod.rs", with_submodules(uses(&[]), vec![SubmoduleDecl::new("x")]));
    scripted.script(repo, "a/b/x.rs", uses(&[]));
    scripted.script(repo, "a/b/y.rs", uses(&[]));

    let mut analyzer = CachingAnalyzer::new(scripted);
    let mut diagnostics = Diagnostics::new();
    let units = infer_units(&repo.join("a/b"), repo, &mut analyzer, &mut diagnostics).unwrap();
    let names: Vec<&str> = units.iter().map(|u| u.name.as_str()).collect();
    assert_eq!(names, vec!["y"]);

    // lib.rs, mod.rs, x.rs and y.rs, each once despite repeated ownership walks
    assert_eq!(analyzer.into_inner().calls, 4);
}
