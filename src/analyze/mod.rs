//! Source and manifest analysis
//!
//! An [`Analyzer`] turns one file into a summary: the external names a Rust
//! source file refers to (each with the cfg predicate it is used under), its
//! out-of-line `mod` declarations and a few structural hints. Manifests are
//! summarized into the targets they declare.
//!
//! [`SynAnalyzer`] does this in process; [`ProcessAnalyzer`] talks to a
//! child running `cratedeps analyzer-serve`.

pub mod manifest;
pub mod protocol;
pub mod syn_visitor;

pub use manifest::{ManifestSummary, TargetDecl};
pub use protocol::{ProcessAnalyzer, MAX_FRAME_SIZE};
pub use syn_visitor::SynAnalyzer;

use crate::cfg::{is_test_only, Predicate};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

/// An external name used by a source file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub name: String,
    /// Condition under which the name is used
    #[serde(default)]
    pub predicate: Predicate,
}

impl Reference {
    pub fn new(name: impl Into<String>, predicate: Predicate) -> Self {
        Reference {
            name: name.into(),
            predicate,
        }
    }

    pub fn always(name: impl Into<String>) -> Self {
        Self::new(name, Predicate::True)
    }
}

/// A top-level `mod name;` whose body lives in another file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmoduleDecl {
    pub name: String,
    #[serde(default)]
    pub predicate: Predicate,
    /// `#[path = "..."]` override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl SubmoduleDecl {
    pub fn new(name: impl Into<String>) -> Self {
        SubmoduleDecl {
            name: name.into(),
            predicate: Predicate::True,
            path: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hints {
    /// `fn main` at file scope
    pub has_main: bool,
    /// `#[proc_macro]`, `#[proc_macro_attribute]` or `#[proc_macro_derive]`
    pub has_proc_macro: bool,
    /// Any `#[test]`-like function
    pub has_test: bool,
}

/// What one source file tells us
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSummary {
    #[serde(default)]
    pub references: Vec<Reference>,
    #[serde(default)]
    pub submodules: Vec<SubmoduleDecl>,
    /// Crate name to the local name it is imported as
    #[serde(default)]
    pub aliases: BTreeMap<String, String>,
    #[serde(default)]
    pub hints: Hints,
}

impl SourceSummary {
    /// References that apply outside of `cfg(test)`
    pub fn always_references(&self) -> impl Iterator<Item = &Reference> {
        self.references.iter().filter(|r| !is_test_only(&r.predicate))
    }

    /// References that only apply under `cfg(test)`
    pub fn test_references(&self) -> impl Iterator<Item = &Reference> {
        self.references.iter().filter(|r| is_test_only(&r.predicate))
    }

    pub fn reference(&self, name: &str) -> Option<&Reference> {
        self.references.iter().find(|r| r.name == name)
    }

    pub fn submodule(&self, name: &str) -> Option<&SubmoduleDecl> {
        self.submodules.iter().find(|m| m.name == name)
    }
}

/// Produces file summaries. Calls block until the answer is available.
pub trait Analyzer {
    fn analyze_source(&mut self, path: &Path) -> Result<SourceSummary>;

    fn analyze_manifest(&mut self, path: &Path) -> Result<ManifestSummary>;
}

impl<A: Analyzer + ?Sized> Analyzer for Box<A> {
    fn analyze_source(&mut self, path: &Path) -> Result<SourceSummary> {
        (**self).analyze_source(path)
    }

    fn analyze_manifest(&mut self, path: &Path) -> Result<ManifestSummary> {
        (**self).analyze_manifest(path)
    }
}

/// Creates one analyzer per worker thread
pub trait AnalyzerFactory: Sync {
    type Analyzer: Analyzer;

    fn create(&self) -> Result<Self::Analyzer>;
}

impl<F, A> AnalyzerFactory for F
where
    F: Fn() -> Result<A> + Sync,
    A: Analyzer,
{
    type Analyzer = A;

    fn create(&self) -> Result<A> {
        self()
    }
}

/// Memoizes summaries; ownership checks re-read the same ancestors for
/// every directory below them
pub struct CachingAnalyzer<A> {
    inner: A,
    sources: HashMap<PathBuf, SourceSummary>,
    manifests: HashMap<PathBuf, ManifestSummary>,
}

impl<A: Analyzer> CachingAnalyzer<A> {
    pub fn new(inner: A) -> Self {
        CachingAnalyzer {
            inner,
            sources: HashMap::new(),
            manifests: HashMap::new(),
        }
    }

    pub fn into_inner(self) -> A {
        self.inner
    }
}

impl<A: Analyzer> Analyzer for CachingAnalyzer<A> {
    fn analyze_source(&mut self, path: &Path) -> Result<SourceSummary> {
        if let Some(summary) = self.sources.get(path) {
            return Ok(summary.clone());
        }
        let summary = self.inner.analyze_source(path)?;
        self.sources.insert(path.to_path_buf(), summary.clone());
        Ok(summary)
    }

    fn analyze_manifest(&mut self, path: &Path) -> Result<ManifestSummary> {
        if let Some(summary) = self.manifests.get(path) {
            return Ok(summary.clone());
        }
        let summary = self.inner.analyze_manifest(path)?;
        self.manifests.insert(path.to_path_buf(), summary.clone());
        Ok(summary)
    }
}

/// One long-lived caching analyzer per worker of the current rayon pool,
/// created on first use. A slot stays locked for the whole call, so `f`
/// must not itself wait on other pool jobs.
pub struct AnalyzerPool<'f, F: AnalyzerFactory> {
    factory: &'f F,
    slots: Vec<Mutex<Option<CachingAnalyzer<F::Analyzer>>>>,
}

impl<'f, F: AnalyzerFactory> AnalyzerPool<'f, F> {
    pub fn new(factory: &'f F) -> Self {
        // the last slot serves callers outside the pool
        let slots = (0..=rayon::current_num_threads())
            .map(|_| Mutex::new(None))
            .collect();
        AnalyzerPool { factory, slots }
    }

    /// Run `f` with the calling thread's analyzer
    pub fn with<R>(
        &self,
        f: impl FnOnce(&mut CachingAnalyzer<F::Analyzer>) -> Result<R>,
    ) -> Result<R> {
        let outside = self.slots.len() - 1;
        let index = rayon::current_thread_index().map_or(outside, |i| i.min(outside));
        let mut slot = self.slots[index]
            .lock()
            .map_err(|_| Error::Transport("analyzer slot poisoned".into()))?;
        let analyzer = match slot.take() {
            Some(analyzer) => analyzer,
            None => {
                debug!(slot = index, "starting analyzer");
                let inner = self
                    .factory
                    .create()
                    .map_err(|e| Error::Transport(format!("cannot start analyzer: {}", e)))?;
                CachingAnalyzer::new(inner)
            }
        };
        f(slot.insert(analyzer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rayon::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_reference_split() {
        let summary = SourceSummary {
            references: vec![
                Reference::always("serde"),
                Reference::new("proptest", Predicate::flag("test")),
                Reference::new(
                    "libc",
                    Predicate::any([Predicate::flag("test"), Predicate::flag("unix")]),
                ),
            ],
            ..Default::default()
        };
        let always: Vec<&str> = summary.always_references().map(|r| r.name.as_str()).collect();
        let test: Vec<&str> = summary.test_references().map(|r| r.name.as_str()).collect();
        assert_eq!(always, vec!["serde", "libc"]);
        assert_eq!(test, vec!["proptest"]);
    }

    struct Counting {
        calls: usize,
    }

    impl Analyzer for Counting {
        fn analyze_source(&mut self, _path: &Path) -> Result<SourceSummary> {
            self.calls += 1;
            Ok(SourceSummary::default())
        }

        fn analyze_manifest(&mut self, _path: &Path) -> Result<ManifestSummary> {
            self.calls += 1;
            Ok(ManifestSummary::default())
        }
    }

    #[test]
    fn test_caching_analyzer_reads_once() {
        let mut analyzer = CachingAnalyzer::new(Counting { calls: 0 });
        analyzer.analyze_source(Path::new("a.rs")).unwrap();
        analyzer.analyze_source(Path::new("a.rs")).unwrap();
        analyzer.analyze_manifest(Path::new("Cargo.toml")).unwrap();
        analyzer.analyze_manifest(Path::new("Cargo.toml")).unwrap();
        analyzer.analyze_source(Path::new("b.rs")).unwrap();
        assert_eq!(analyzer.into_inner().calls, 3);
    }

    #[test]
    fn test_summary_json_defaults() {
        let summary: SourceSummary =
            serde_json::from_str(r#"{"references": [{"name": "a"}]}"#).unwrap();
        assert_eq!(summary.references, vec![Reference::always("a")]);
        assert!(summary.submodules.is_empty());
        assert_eq!(summary.hints, Hints::default());
    }

    #[test]
    fn test_pool_starts_one_analyzer_per_thread() {
        let started = AtomicUsize::new(0);
        let factory = || -> Result<Counting> {
            started.fetch_add(1, Ordering::SeqCst);
            Ok(Counting { calls: 0 })
        };
        let threads = rayon::ThreadPoolBuilder::new().num_threads(1).build().unwrap();
        let reads: usize = threads.install(|| {
            let pool = AnalyzerPool::new(&factory);
            (0..300)
                .into_par_iter()
                .map(|i| {
                    pool.with(|a| {
                        a.analyze_source(Path::new(&format!("f{}.rs", i % 10)))?;
                        Ok(1)
                    })
                })
                .sum::<Result<usize>>()
                .unwrap()
        });
        assert_eq!(reads, 300);
        assert_eq!(started.load(Ordering::SeqCst), 1);
    }
}
