// Production-quality lints
#![warn(
    clippy::todo,
    clippy::unimplemented,
    clippy::dbg_macro,
    clippy::print_stdout,
    clippy::print_stderr
)]
// Deny truly dangerous patterns
#![deny(clippy::mem_forget)]
// Allow common patterns in library code
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

//! # cratedeps
//!
//! Bazel dependency generation for Rust code.
//!
//! ## Core Concept
//!
//! Every directory of a repository is turned into compilation units (a
//! library, binaries, tests, proc-macros, a build script). For each unit the
//! module graph is discovered from its root file, every external name the
//! unit's files refer to is collected together with the `#[cfg(...)]`
//! condition it is used under, and each name is resolved to a Bazel label:
//! a local unit, a crate vendored through a lockfile, a configured override
//! or a provided target. The result is a dependency set whose entries carry
//! `select()` conditions.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use cratedeps::{generate, CollectingSink, GenerateOptions, SynAnalyzer};
//!
//! let factory = || Ok(SynAnalyzer::new());
//! let mut sink = CollectingSink::default();
//! let outcome = generate(repo_root, &GenerateOptions::default(), &factory, &mut sink)?;
//!
//! for plan in &sink.plans {
//!     println!("{}: deps = {}", plan.unit.label(), plan.resolved.deps.render());
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                                                             │
//! │  cratedeps.yaml ──► ScopeConfig (extended per directory)    │
//! │                                                             │
//! │  directory ──► infer_units ──► CompilationUnit              │
//! │                   │                                         │
//! │                   └──► ModuleGraph (via Analyzer)           │
//! │                                                             │
//! │  lockfile ──► CrateRegistry                                 │
//! │                                                             │
//! │  unit + LocalIndex + registry ──► Resolver ──► ResolvedDeps │
//! │                                                             │
//! │  Predicate ──► Cover (DNF) ──► Condition ──► select()       │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod analyze;
pub mod cfg;
pub mod config;
pub mod error;
pub mod generate;
pub mod graph;
pub mod label;
pub mod registry;
pub mod resolve;

// Re-exports
pub use analyze::{
    Analyzer, AnalyzerFactory, AnalyzerPool, CachingAnalyzer, ManifestSummary, ProcessAnalyzer,
    Reference, SourceSummary, SynAnalyzer,
};
pub use cfg::{CfgContext, Condition, ConditionalDeps, Predicate};
pub use config::{LocalConfig, LockfileSource, RootConfig, ScopeConfig, SelfReferencePolicy};
pub use error::{Diagnostics, Error, Result};
pub use generate::{
    generate, write_report, CollectingSink, DiscardSink, GenerateOptions, GenerateOutcome,
    PlanSink, ReportFormat, UnitPlan,
};
pub use graph::{infer_units, CompilationUnit, ModuleGraph, UnitKind};
pub use label::Label;
pub use registry::{load_registry, CrateRegistry, UsageLog};
pub use resolve::{LocalIndex, Resolution, ResolvedDeps, Resolver};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
