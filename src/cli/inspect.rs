//! Single-input commands

use super::{print_value, Format};
use cratedeps::analyze::protocol;
use cratedeps::*;
use std::path::Path;

/// Print what one source file or manifest refers to
pub fn cmd_imports(file: &Path, format: Format) -> Result<()> {
    let mut analyzer = SynAnalyzer::new();
    if file.file_name().is_some_and(|n| n == "Cargo.toml") {
        let summary = analyzer.analyze_manifest(file)?;
        print_value(&summary, format)
    } else {
        let summary = analyzer.analyze_source(file)?;
        print_value(&summary, format)
    }
}

/// Overlay a fresh dependency expression on an existing one
pub fn cmd_merge(existing: Option<&str>, fresh: &str) -> Result<()> {
    let fresh = ConditionalDeps::parse(fresh)?;
    let merged = ConditionalDeps::merge_into(existing, &fresh)?;
    println!("{}", merged);
    Ok(())
}

pub fn cmd_schema(name: &str) -> Result<()> {
    let schema = match name {
        "root" => schemars::schema_for!(RootConfig),
        "local" => schemars::schema_for!(LocalConfig),
        other => {
            return Err(format!("Unknown schema: {}. Use 'root' or 'local'.", other).into());
        }
    };
    println!("{}", serde_json::to_string_pretty(&schema)?);
    Ok(())
}

/// Answer analyzer requests on stdin/stdout until stdin closes
pub fn cmd_analyzer_serve() -> Result<()> {
    let mut stdin = std::io::stdin().lock();
    let mut stdout = std::io::stdout().lock();
    protocol::serve(&mut stdin, &mut stdout, &mut SynAnalyzer::new())
}
