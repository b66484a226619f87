//! Repository-wide generation
//!
//! Walks the repository, infers the units of every directory, indexes them,
//! and resolves each unit's dependencies. Directories are processed in
//! parallel. Each worker thread keeps one analyzer for the whole run;
//! usage logs are kept per directory and merged once all directories are
//! done. Plans are handed to a [`PlanSink`] in directory order.

use crate::analyze::{AnalyzerFactory, AnalyzerPool};
use crate::config::{LocalConfig, LockfileSource, RootConfig, ScopeConfig};
use crate::error::{Diagnostics, Error, Result};
use crate::graph::units::inside_manifest_package;
use crate::graph::{infer_units, CompilationUnit};
use crate::registry::{load_registry, CrateRegistry, UsageLog};
use crate::resolve::{LocalIndex, ResolvedDeps, Resolver};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Everything computed for one unit
#[derive(Debug, Serialize)]
pub struct UnitPlan {
    /// Bazel package of the unit
    pub directory: String,
    pub unit: CompilationUnit,
    pub resolved: ResolvedDeps,
}

/// Consumer of unit plans, such as a BUILD file writer
pub trait PlanSink {
    fn accept(&mut self, plan: UnitPlan) -> Result<()>;
}

/// Keeps every plan
#[derive(Debug, Default)]
pub struct CollectingSink {
    pub plans: Vec<UnitPlan>,
}

impl PlanSink for CollectingSink {
    fn accept(&mut self, plan: UnitPlan) -> Result<()> {
        self.plans.push(plan);
        Ok(())
    }
}

/// Drops every plan
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardSink;

impl PlanSink for DiscardSink {
    fn accept(&mut self, _plan: UnitPlan) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    /// Force strict mode regardless of configuration
    pub strict: bool,
}

/// Run-level results not tied to a single unit
#[derive(Debug, Default, Serialize)]
pub struct GenerateOutcome {
    pub directories: usize,
    pub units: usize,
    /// Lockfile packages nothing used, sorted
    pub unused: Vec<String>,
    /// Problems found while inferring units
    pub diagnostics: Diagnostics,
}

struct DirectoryJob {
    dir: PathBuf,
    scope: ScopeConfig,
}

/// Generate plans for every unit under `repo_root`
pub fn generate<F, S>(
    repo_root: &Path,
    options: &GenerateOptions,
    factory: &F,
    sink: &mut S,
) -> Result<GenerateOutcome>
where
    F: AnalyzerFactory,
    F::Analyzer: Send,
    S: PlanSink + ?Sized,
{
    let mut root_scope = RootConfig::load_from_dir(repo_root)?
        .unwrap_or_default()
        .into_scope(repo_root)?;
    root_scope.strict |= options.strict;

    let jobs = collect_directories(repo_root, &root_scope)?;
    info!(root = %repo_root.display(), directories = jobs.len(), "scanning repository");

    // units of every directory, before anything can be resolved
    let analyzers = AnalyzerPool::new(factory);
    let inferred: Vec<(Vec<CompilationUnit>, Diagnostics)> = jobs
        .par_iter()
        .map(|job| {
            analyzers.with(|analyzer| -> Result<(Vec<CompilationUnit>, Diagnostics)> {
                let mut diagnostics = Diagnostics::new();
                if inside_manifest_package(&job.dir, repo_root, analyzer)? {
                    debug!(path = %job.dir.display(), "covered by an enclosing package");
                    return Ok((Vec::new(), diagnostics));
                }
                let units = infer_units(&job.dir, repo_root, analyzer, &mut diagnostics)?;
                diagnostics.escalate(job.scope.strict)?;
                Ok((units, diagnostics))
            })
        })
        .collect::<Result<_>>()?;

    let index = LocalIndex::from_units(inferred.iter().flat_map(|(units, _)| units));
    debug!(crates = index.len(), "indexed local crates");

    let registries = load_registries(&jobs, &inferred)?;

    let resolved: Vec<(Vec<UnitPlan>, UsageLog)> = jobs
        .par_iter()
        .zip(&inferred)
        .map(|(job, (units, _))| -> Result<(Vec<UnitPlan>, UsageLog)> {
            let registry = job.scope.lockfile.as_ref().and_then(|l| registries.get(l));
            let resolver = Resolver::new(&job.scope, &index, registry);
            let mut usage = UsageLog::new();
            let mut plans = Vec::with_capacity(units.len());
            for unit in units {
                let resolved = resolver.resolve_unit(unit, &mut usage)?;
                resolved.diagnostics.escalate(job.scope.strict)?;
                plans.push(UnitPlan {
                    directory: unit.package.clone(),
                    unit: unit.clone(),
                    resolved,
                });
            }
            Ok((plans, usage))
        })
        .collect::<Result<_>>()?;

    let mut outcome = GenerateOutcome {
        directories: jobs.len(),
        ..Default::default()
    };
    for (_, diagnostics) in inferred {
        outcome.diagnostics.extend(diagnostics);
    }

    let mut usage = UsageLog::new();
    for (plans, log) in resolved {
        usage.merge(log);
        for plan in plans {
            outcome.units += 1;
            sink.accept(plan)?;
        }
    }

    let unused: BTreeSet<String> = registries
        .values()
        .flat_map(|r| r.unused(&usage, &root_scope.allowed_unused))
        .collect();
    outcome.unused = unused.into_iter().collect();
    if !outcome.unused.is_empty() {
        warn!(count = outcome.unused.len(), "lockfile packages are never used");
    }

    info!(units = outcome.units, "generation complete");
    Ok(outcome)
}

/// Every directory to process, each with its scope. Directories named in
/// `exclude` and hidden directories are skipped with their subtrees.
fn collect_directories(repo_root: &Path, root_scope: &ScopeConfig) -> Result<Vec<DirectoryJob>> {
    let mut scopes: HashMap<PathBuf, ScopeConfig> = HashMap::new();
    let mut jobs = Vec::new();

    let walker = WalkDir::new(repo_root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            if e.depth() == 0 {
                return true;
            }
            let name = e.file_name().to_string_lossy();
            !(e.file_type().is_dir()
                && (name.starts_with('.') || root_scope.exclude.contains(&*name)))
        });

    for entry in walker {
        let entry = entry.map_err(|e| Error::Other(format!("walk failed: {}", e)))?;
        if !entry.file_type().is_dir() {
            continue;
        }
        let dir = entry.path().to_path_buf();

        let scope = if entry.depth() == 0 {
            root_scope.clone()
        } else {
            let parent = dir
                .parent()
                .and_then(|p| scopes.get(p))
                .unwrap_or(root_scope);
            match LocalConfig::load_from_dir(&dir)? {
                Some(local) => parent.extend(&local, &dir)?,
                None => parent.clone(),
            }
        };

        scopes.insert(dir.clone(), scope.clone());
        jobs.push(DirectoryJob { dir, scope });
    }
    Ok(jobs)
}

/// One registry per lockfile in use, read with the overrides of the first
/// directory naming it
fn load_registries(
    jobs: &[DirectoryJob],
    inferred: &[(Vec<CompilationUnit>, Diagnostics)],
) -> Result<BTreeMap<LockfileSource, CrateRegistry>> {
    let mut registries = BTreeMap::new();
    for (job, (units, _)) in jobs.iter().zip(inferred) {
        let Some(source) = &job.scope.lockfile else {
            continue;
        };
        if units.is_empty() || registries.contains_key(source) {
            continue;
        }
        let registry = load_registry(source, &job.scope.proc_macro_overrides)?;
        registries.insert(source.clone(), registry);
    }
    Ok(registries)
}

/// Output encodings for plan reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReportFormat {
    #[default]
    Json,
    Yaml,
}

/// Serializable view of a plan with rendered dependency expressions
#[derive(Debug, Serialize)]
pub struct PlanReport<'a> {
    #[serde(flatten)]
    pub unit: &'a CompilationUnit,
    pub deps: String,
    pub proc_macro_deps: String,
    #[serde(skip_serializing_if = "no_aliases")]
    pub aliases: &'a BTreeMap<String, String>,
    #[serde(skip_serializing_if = "no_diagnostics")]
    pub diagnostics: &'a Diagnostics,
}

fn no_aliases(aliases: &&BTreeMap<String, String>) -> bool {
    aliases.is_empty()
}

fn no_diagnostics(diagnostics: &&Diagnostics) -> bool {
    diagnostics.is_empty()
}

impl<'a> From<&'a UnitPlan> for PlanReport<'a> {
    fn from(plan: &'a UnitPlan) -> Self {
        PlanReport {
            unit: &plan.unit,
            deps: plan.resolved.deps.render(),
            proc_macro_deps: plan.resolved.proc_macro_deps.render(),
            aliases: &plan.resolved.aliases,
            diagnostics: &plan.resolved.diagnostics,
        }
    }
}

#[derive(Debug, Serialize)]
struct Report<'a> {
    plans: Vec<PlanReport<'a>>,
    #[serde(flatten)]
    outcome: &'a GenerateOutcome,
}

/// Write plans and the run outcome to `out`
pub fn write_report<W: Write>(
    out: &mut W,
    format: ReportFormat,
    plans: &[UnitPlan],
    outcome: &GenerateOutcome,
) -> Result<()> {
    let report = Report {
        plans: plans.iter().map(PlanReport::from).collect(),
        outcome,
    };
    match format {
        ReportFormat::Json => {
            serde_json::to_writer_pretty(&mut *out, &report)?;
            writeln!(out)?;
        }
        ReportFormat::Yaml => serde_norway::to_writer(&mut *out, &report)?,
    }
    Ok(())
}
