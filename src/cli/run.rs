//! Repository-wide commands

use super::{print_value, Format};
use cratedeps::*;
use std::path::{Path, PathBuf};

/// Analyzer selection shared by repository commands
#[derive(Debug, Clone, Default)]
pub struct AnalyzerChoice {
    /// Run analysis in child processes of this executable
    pub program: Option<PathBuf>,
}

pub fn cmd_generate(
    root: &Path,
    format: Format,
    strict: bool,
    analyzer: &AnalyzerChoice,
) -> Result<()> {
    let options = GenerateOptions { strict };
    let mut sink = CollectingSink::default();
    let outcome = run(root, &options, analyzer, &mut sink)?;

    let mut stdout = std::io::stdout().lock();
    write_report(&mut stdout, format.into(), &sink.plans, &outcome)
}

pub fn cmd_unused(root: &Path, format: Format, analyzer: &AnalyzerChoice) -> Result<()> {
    let outcome = run(root, &GenerateOptions::default(), analyzer, &mut DiscardSink)?;
    print_value(&outcome.unused, format)
}

fn run<S: PlanSink>(
    root: &Path,
    options: &GenerateOptions,
    analyzer: &AnalyzerChoice,
    sink: &mut S,
) -> Result<GenerateOutcome> {
    match &analyzer.program {
        Some(program) => {
            let factory = || ProcessAnalyzer::spawn(program, &["analyzer-serve".to_string()]);
            generate(root, options, &factory, sink)
        }
        None => {
            let factory = || -> Result<SynAnalyzer> { Ok(SynAnalyzer::new()) };
            generate(root, options, &factory, sink)
        }
    }
}
