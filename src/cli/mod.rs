//! CLI command implementations
//!
//! - `run`: repository commands (generate, unused)
//! - `inspect`: single-input commands (imports, merge, schema, analyzer-serve)

pub mod inspect;
pub mod run;

pub use inspect::{cmd_analyzer_serve, cmd_imports, cmd_merge, cmd_schema};
pub use run::{cmd_generate, cmd_unused};

use clap::ValueEnum;
use cratedeps::ReportFormat;

/// Output format flag
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum Format {
    #[default]
    Json,
    Yaml,
}

impl From<Format> for ReportFormat {
    fn from(format: Format) -> Self {
        match format {
            Format::Json => ReportFormat::Json,
            Format::Yaml => ReportFormat::Yaml,
        }
    }
}

/// Print `value` to stdout in `format`
pub fn print_value<T: serde::Serialize>(value: &T, format: Format) -> cratedeps::Result<()> {
    let text = match format {
        Format::Json => serde_json::to_string_pretty(value)?,
        Format::Yaml => serde_norway::to_string(value)?,
    };
    println!("{}", text.trim_end());
    Ok(())
}
