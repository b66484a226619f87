//! End-to-end generation over temporary repositories

use cratedeps::*;
use pretty_assertions::assert_eq;
use rstest::rstest;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

fn write(dir: &Path, rel: &str, content: &str) {
    let path = dir.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn run(repo: &Path) -> Result<(Vec<UnitPlan>, GenerateOutcome)> {
    let factory = || -> Result<SynAnalyzer> { Ok(SynAnalyzer::new()) };
    let mut sink = CollectingSink::default();
    let outcome = generate(repo, &GenerateOptions::default(), &factory, &mut sink)?;
    Ok((sink.plans, outcome))
}

fn plan<'a>(plans: &'a [UnitPlan], package: &str, kind: UnitKind) -> &'a UnitPlan {
    plans
        .iter()
        .find(|p| p.directory == package && p.unit.kind == kind)
        .unwrap_or_else(|| panic!("no {} unit in {}", kind, package))
}

const MULTIVERSION_LOCK: &str = r#"
version = 3

[[package]]
name = "app1"
version = "0.1.0"
dependencies = ["p 1.0.0"]

[[package]]
name = "app2"
version = "0.1.0"
dependencies = ["p 2.0.0"]

[[package]]
name = "p"
version = "1.0.0"
source = "registry+https://github.com/rust-lang/crates.io-index"

[[package]]
name = "p"
version = "2.0.0"
source = "registry+https://github.com/rust-lang/crates.io-index"
"#;

fn multiversion_repo() -> TempDir {
    let tmp = TempDir::new().unwrap();
    let repo = tmp.path();
    write(repo, "cratedeps.yaml", "cargo_lockfile: Cargo.lock\n");
    write(repo, "Cargo.lock", MULTIVERSION_LOCK);
    for app in ["app1", "app2"] {
        write(
            repo,
            &format!("{}/Cargo.toml", app),
            &format!("[package]\nname = \"{}\"\nversion = \"0.1.0\"\n", app),
        );
        write(repo, &format!("{}/src/lib.rs", app), "use p::Thing;\n");
    }
    tmp
}

#[test]
fn test_unit_spans_path_submodule() {
    let tmp = TempDir::new().unwrap();
    let repo = tmp.path();
    write(repo, "pkg/lib.rs", "mod a;\n#[path = \"b/root.rs\"]\nmod b;\n");
    write(repo, "pkg/a.rs", "");
    write(repo, "pkg/b/root.rs", "mod c;\n");
    write(repo, "pkg/b/c.rs", "");

    let (plans, _) = run(repo).unwrap();
    let lib = plan(&plans, "pkg", UnitKind::Library);
    assert_eq!(lib.unit.srcs, vec!["lib.rs", "a.rs", "b/root.rs", "b/c.rs"]);
    // pkg/b is covered by pkg's crate and yields nothing itself
    assert!(plans.iter().all(|p| p.directory != "pkg/b"));
}

#[test]
fn test_self_reference_is_dropped() {
    let tmp = TempDir::new().unwrap();
    let repo = tmp.path();
    write(repo, "foo/lib.rs", "use foo::Bar;\npub struct Bar;\n");

    let (plans, _) = run(repo).unwrap();
    let lib = plan(&plans, "foo", UnitKind::Library);
    assert!(lib.resolved.deps.is_empty());
    assert!(lib.resolved.diagnostics.is_empty());
}

#[test]
fn test_multiversion_follows_requester() {
    let tmp = multiversion_repo();
    let (plans, outcome) = run(tmp.path()).unwrap();

    let app1 = plan(&plans, "app1", UnitKind::Library);
    assert_eq!(app1.resolved.deps.render(), r#"["@crates//:p-1.0.0"]"#);
    let app2 = plan(&plans, "app2", UnitKind::Library);
    assert_eq!(app2.resolved.deps.render(), r#"["@crates//:p-2.0.0"]"#);
    assert!(outcome.unused.is_empty());
}

#[test]
fn test_multiversion_without_requester_is_fatal() {
    let tmp = multiversion_repo();
    write(tmp.path(), "tool/lib.rs", "use p::Thing;\n");

    let err = run(tmp.path()).unwrap_err();
    assert!(matches!(err, Error::Config(_)), "got {:?}", err);
    assert!(err.is_fatal());
}

#[test]
fn test_feature_gated_reference_is_absent() {
    let tmp = TempDir::new().unwrap();
    let repo = tmp.path();
    write(
        repo,
        "cratedeps.yaml",
        "resolve:\n  extra: //third_party:extra\n  base: //third_party:base\n",
    );
    write(
        repo,
        "feat/lib.rs",
        "#[cfg(feature = \"extra\")]\nuse extra::Thing;\nuse base::Other;\n",
    );

    let (plans, _) = run(repo).unwrap();
    let lib = plan(&plans, "feat", UnitKind::Library);
    assert_eq!(lib.resolved.deps.render(), r#"["//third_party:base"]"#);
    assert!(!lib.resolved.deps.render().contains("select"));
}

#[test]
fn test_default_feature_enables_reference() {
    let tmp = TempDir::new().unwrap();
    let repo = tmp.path();
    write(repo, "cratedeps.yaml", "resolve:\n  extra: //third_party:extra\n");
    write(
        repo,
        "feat/Cargo.toml",
        "[package]\nname = \"feat\"\nversion = \"0.1.0\"\n\n[features]\ndefault = [\"extra\"]\nextra = []\n",
    );
    write(repo, "feat/src/lib.rs", "#[cfg(feature = \"extra\")]\nuse extra::Thing;\n");

    let (plans, _) = run(repo).unwrap();
    let lib = plan(&plans, "feat", UnitKind::Library);
    assert_eq!(lib.resolved.deps.render(), r#"["//third_party:extra"]"#);
}

#[test]
fn test_ancestor_claimed_file_is_not_standalone() {
    let tmp = TempDir::new().unwrap();
    let repo = tmp.path();
    write(repo, "a/lib.rs", "mod b;\n");
    write(repo, "a/b.rs", "mod x;\n");
    write(repo, "a/b/x.rs", "");
    write(repo, "a/b/tool.rs", "fn main() {}\n");

    let (plans, _) = run(repo).unwrap();
    let in_b: Vec<&str> = plans
        .iter()
        .filter(|p| p.directory == "a/b")
        .map(|p| p.unit.name.as_str())
        .collect();
    assert_eq!(in_b, vec!["tool"]);
    let lib = plan(&plans, "a", UnitKind::Library);
    assert!(lib.unit.srcs.contains(&"b/x.rs".to_string()));
}

#[test]
fn test_override_beats_lockfile() {
    let tmp = multiversion_repo();
    write(
        tmp.path(),
        "app1/cratedeps.yaml",
        "resolve:\n  p: //forks/p\n",
    );

    let (plans, outcome) = run(tmp.path()).unwrap();
    let app1 = plan(&plans, "app1", UnitKind::Library);
    assert_eq!(app1.resolved.deps.render(), r#"["//forks/p"]"#);
    // the override never touches the lockfile, so only app2 marks `p`
    assert!(outcome.unused.is_empty());
}

#[rstest]
#[case("", r#"["@crates//:p-1.0.0"]"#)]
#[case("crates_prefix: '@vendor//:'\n", r#"["@vendor//:p-1.0.0"]"#)]
fn test_crates_prefix(#[case] extra: &str, #[case] expected: &str) {
    let tmp = multiversion_repo();
    write(
        tmp.path(),
        "cratedeps.yaml",
        &format!("cargo_lockfile: Cargo.lock\n{}", extra),
    );
    let (plans, _) = run(tmp.path()).unwrap();
    assert_eq!(plan(&plans, "app1", UnitKind::Library).resolved.deps.render(), expected);
}

#[test]
fn test_strict_escalates_unresolved() {
    let tmp = TempDir::new().unwrap();
    let repo = tmp.path();
    write(repo, "lonely/lib.rs", "use nowhere::Thing;\n");

    let (plans, _) = run(repo).unwrap();
    assert_eq!(plan(&plans, "lonely", UnitKind::Library).resolved.diagnostics.len(), 1);

    let factory = || -> Result<SynAnalyzer> { Ok(SynAnalyzer::new()) };
    let options = GenerateOptions { strict: true };
    let err = generate(repo, &options, &factory, &mut DiscardSink).unwrap_err();
    assert!(matches!(err, Error::Strict { count: 1, .. }), "got {:?}", err);
}

#[test]
fn test_generation_is_repeatable() {
    let tmp = multiversion_repo();
    write(tmp.path(), "shared/lib.rs", "use app1::Thing;\n#[cfg(unix)]\nuse libc_like::X;\n");

    let render = |plans: &[UnitPlan]| -> Vec<(String, String)> {
        plans
            .iter()
            .map(|p| (p.unit.label().to_string(), p.resolved.deps.render()))
            .collect()
    };
    let (first, _) = run(tmp.path()).unwrap();
    let (second, _) = run(tmp.path()).unwrap();
    assert_eq!(render(&first), render(&second));
}

#[test]
fn test_one_analyzer_per_worker() {
    let tmp = TempDir::new().unwrap();
    let repo = tmp.path();
    for i in 0..300 {
        write(repo, &format!("d{:03}/lib.rs", i), "pub fn f() {}\n");
    }

    let started = AtomicUsize::new(0);
    let factory = || -> Result<SynAnalyzer> {
        started.fetch_add(1, Ordering::SeqCst);
        Ok(SynAnalyzer::new())
    };
    let threads = rayon::ThreadPoolBuilder::new().num_threads(1).build().unwrap();
    let outcome = threads
        .install(|| generate(repo, &GenerateOptions::default(), &factory, &mut DiscardSink))
        .unwrap();
    assert_eq!(outcome.units, 300);
    assert_eq!(started.load(Ordering::SeqCst), 1);
}

#[rstest]
#[case::shared_module(
    &[("lib.rs", "mod util;\n"), ("main.rs", "mod util;\nfn main() {}\n"), ("helper.rs", "mod util;\n"), ("util.rs", "")]
)]
#[case::mutual_path_modules(
    &[("a.rs", "#[path = \"b.rs\"]\nmod b;\n"), ("b.rs", "#[path = \"a.rs\"]\nmod a;\n"), ("c.rs", "fn main() {}\n")]
)]
#[case::standalone_sharing_with_lib(
    &[("lib.rs", "mod common;\n"), ("tool.rs", "mod common;\nfn main() {}\n"), ("check.rs", "mod common;\n#[test]\nfn t() {}\n"), ("common.rs", "")]
)]
#[case::main_only(
    &[("main.rs", "mod cli;\nfn main() {}\n"), ("cli.rs", ""), ("extra.rs", "mod cli;\n")]
)]
fn test_each_source_has_one_unit(#[case] files: &[(&str, &str)]) {
    let tmp = TempDir::new().unwrap();
    let repo = tmp.path();
    for (name, content) in files {
        write(repo, &format!("mixed/{}", name), content);
    }

    let (plans, _) = run(repo).unwrap();
    let mut seen = std::collections::HashMap::new();
    for plan in plans.iter().filter(|p| p.directory == "mixed") {
        for src in &plan.unit.srcs {
            if let Some(other) = seen.insert(src.clone(), plan.unit.name.clone()) {
                panic!("{} is in both {} and {}", src, other, plan.unit.name);
            }
        }
    }
    // every file on disk lands somewhere
    let mut covered: Vec<&str> = seen.keys().map(String::as_str).collect();
    covered.sort();
    let mut expected: Vec<&str> = files.iter().map(|(name, _)| *name).collect();
    expected.sort();
    assert_eq!(covered, expected);
}

#[test]
fn test_usage_is_tracked_per_lockfile() {
    let tmp = TempDir::new().unwrap();
    let repo = tmp.path();
    let lock = |member: &str| {
        format!(
            "version = 3\n\n[[package]]\nname = \"{}\"\nversion = \"0.1.0\"\ndependencies = [\"p 1.0.0\"]\n\n[[package]]\nname = \"p\"\nversion = \"1.0.0\"\nsource = \"registry+https://github.com/rust-lang/crates.io-index\"\n",
            member
        )
    };
    for side in ["one", "two"] {
        write(repo, &format!("{}/cratedeps.yaml", side), "cargo_lockfile: Cargo.lock\n");
        write(repo, &format!("{}/Cargo.lock", side), &lock(side));
    }
    write(repo, "one/lib.rs", "use p::Thing;\n");
    write(repo, "two/lib.rs", "pub fn idle() {}\n");

    let (plans, outcome) = run(repo).unwrap();
    assert_eq!(plan(&plans, "one", UnitKind::Library).resolved.deps.render(), r#"["@crates//:p"]"#);
    // `one` using its own `p` says nothing about the copy in two/Cargo.lock
    assert_eq!(outcome.unused, vec!["p"]);
}
