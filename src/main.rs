//! cratedeps CLI
//!
//! Commands:
//!   generate        - Resolve dependencies for every unit in a repository
//!   imports         - Show what one file refers to
//!   unused          - List lockfile packages nothing uses
//!   merge           - Overlay a fresh dependency expression on an existing one
//!   schema          - Print the configuration JSON schema
//!   analyzer-serve  - Run the analyzer protocol on stdin/stdout

mod cli;

use clap::{Parser, Subcommand};
use cli::run::AnalyzerChoice;
use cli::Format;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "cratedeps", version, about = "Bazel dependency generation for Rust")]
struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Resolve dependencies for every unit under ROOT
    Generate {
        #[arg(default_value = ".")]
        root: PathBuf,
        #[arg(long, value_enum, default_value_t)]
        format: Format,
        /// Fail on any diagnostic
        #[arg(long)]
        strict: bool,
        /// Analyze in child processes of this program (`<program> analyzer-serve`)
        #[arg(long)]
        analyzer: Option<PathBuf>,
    },
    /// Show the references, submodules and hints of one file
    Imports {
        file: PathBuf,
        #[arg(long, value_enum, default_value_t)]
        format: Format,
    },
    /// List lockfile packages that no unit uses
    Unused {
        #[arg(default_value = ".")]
        root: PathBuf,
        #[arg(long, value_enum, default_value_t)]
        format: Format,
        #[arg(long)]
        analyzer: Option<PathBuf>,
    },
    /// Overlay a fresh dependency expression on an existing one
    Merge {
        #[arg(long)]
        existing: Option<String>,
        #[arg(long)]
        fresh: String,
    },
    /// Print the JSON schema of `root` or `local` configuration
    Schema {
        #[arg(default_value = "root")]
        name: String,
    },
    /// Serve analyzer requests on stdin/stdout
    AnalyzerServe,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "cratedeps=debug" } else { "cratedeps=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    let args = Cli::parse();
    init_logging(args.verbose);

    let result = match args.command {
        Command::Generate {
            root,
            format,
            strict,
            analyzer,
        } => cli::cmd_generate(&root, format, strict, &AnalyzerChoice { program: analyzer }),
        Command::Imports { file, format } => cli::cmd_imports(&file, format),
        Command::Unused {
            root,
            format,
            analyzer,
        } => cli::cmd_unused(&root, format, &AnalyzerChoice { program: analyzer }),
        Command::Merge { existing, fresh } => cli::cmd_merge(existing.as_deref(), &fresh),
        Command::Schema { name } => cli::cmd_schema(&name),
        Command::AnalyzerServe => cli::cmd_analyzer_serve(),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::from(1)
        }
    }
}
