//! Error types for cratedeps

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// cratedeps errors
#[derive(Error, Debug)]
pub enum Error {
    /// A source or manifest file could not be parsed
    #[error("{}: parse error: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    /// The analyzer channel returned an oversized or malformed frame
    #[error("analyzer transport error: {0}")]
    Transport(String),

    #[error("{unit}: multiple matches found for {name}: [{}]", candidates.join(", "))]
    Ambiguous {
        unit: String,
        name: String,
        candidates: Vec<String>,
    },

    #[error("{unit}: no match for {name}")]
    Unresolved { unit: String, name: String },

    #[error("{}: cannot find module file for `{name}`", parent.display())]
    MissingModule { parent: PathBuf, name: String },

    /// Inputs cannot produce a trustworthy graph
    #[error("configuration error: {0}")]
    Config(String),

    #[error("bad label: {0}")]
    Label(String),

    #[error("duplicate dependency: {0}")]
    DuplicateDependency(String),

    #[error("dependency expression error at offset {offset}: {message}")]
    ExprSyntax { offset: usize, message: String },

    /// A cfg shape that cannot be expressed as a select() key
    #[error("unsupported condition: {0}")]
    UnsupportedCondition(String),

    /// Warning-class diagnostics escalated by strict mode
    #[error("strict mode: {count} diagnostic(s), first: {first}")]
    Strict { count: usize, first: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_norway::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn parse(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        Error::Parse {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// Configuration and label errors abort the run regardless of strictness
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Config(_) | Error::Label(_) | Error::Strict { .. }
        )
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}

/// Warning-class errors collected during a run
#[derive(Debug, Default)]
pub struct Diagnostics {
    entries: Vec<Error>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, error: Error) {
        self.entries.push(error);
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.entries.extend(other.entries);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Error> {
        self.entries.iter()
    }

    /// Messages, for reports
    pub fn messages(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.to_string()).collect()
    }

    /// Under strict mode any collected diagnostic fails the run
    pub fn escalate(&self, strict: bool) -> Result<()> {
        match self.entries.first() {
            Some(first) if strict => Err(Error::Strict {
                count: self.entries.len(),
                first: first.to_string(),
            }),
            _ => Ok(()),
        }
    }
}

impl serde::Serialize for Diagnostics {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_seq(self.entries.iter().map(|e| e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ambiguous_message_lists_candidates() {
        let err = Error::Ambiguous {
            unit: "//app:app".into(),
            name: "util".into(),
            candidates: vec!["//a:util".into(), "//b:util".into()],
        };
        assert_eq!(
            err.to_string(),
            "//app:app: multiple matches found for util: [//a:util, //b:util]"
        );
    }

    #[test]
    fn test_escalate_only_when_strict() {
        let mut diags = Diagnostics::new();
        assert!(diags.escalate(true).is_ok());
        diags.push(Error::MissingModule {
            parent: PathBuf::from("src/lib.rs"),
            name: "gone".into(),
        });
        assert!(diags.escalate(false).is_ok());
        let err = diags.escalate(true).unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("cannot find module file for `gone`"));
    }

    #[test]
    fn test_fatal_classification() {
        assert!(Error::Config("x".into()).is_fatal());
        assert!(Error::Label("x".into()).is_fatal());
        assert!(!Error::Unresolved {
            unit: "u".into(),
            name: "n".into()
        }
        .is_fatal());
    }
}
