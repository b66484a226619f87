//! Bazel labels
//!
//! Parsing, printing and relativizing `@repo//pkg:name` labels, plus the
//! canonical ordering used when dependency lists are rendered.

use crate::error::{Error, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

static LABEL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:@@?(?P<repo>[A-Za-z0-9_.~+-]*))?(?P<abs>//)?(?P<pkg>[A-Za-z0-9_./+=,@~ -]*?)(?::(?P<name>[^:]+))?$")
        .expect("label regex")
});

/// A fully qualified Bazel label
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Label {
    /// External repository, empty for the main repository
    pub repo: String,
    pub pkg: String,
    pub name: String,
}

impl Label {
    pub fn new(repo: impl Into<String>, pkg: impl Into<String>, name: impl Into<String>) -> Self {
        Label {
            repo: repo.into(),
            pkg: pkg.into(),
            name: name.into(),
        }
    }

    /// Parse an absolute label (`//a/b:c`, `//a/b`, `@r//:c`, `@r`)
    pub fn parse(s: &str) -> Result<Self> {
        Self::parse_in(s, "", "")
    }

    /// Parse a label that may be relative (`:c`) to `pkg` in `repo`
    pub fn parse_in(s: &str, repo: &str, pkg: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::Label("empty label".into()));
        }
        let caps = LABEL_RE
            .captures(s)
            .ok_or_else(|| Error::Label(format!("invalid label syntax: {s:?}")))?;

        let has_repo = s.starts_with('@');
        let absolute = caps.name("abs").is_some();
        let label_pkg = caps.name("pkg").map_or("", |m| m.as_str());
        let label_name = caps.name("name").map(|m| m.as_str());

        if label_pkg.starts_with('/') || label_pkg.ends_with('/') || label_pkg.contains("//") {
            return Err(Error::Label(format!("invalid package in label: {s:?}")));
        }

        let repo_name = if has_repo {
            caps.name("repo").map_or("", |m| m.as_str()).to_string()
        } else {
            repo.to_string()
        };

        if has_repo && !absolute {
            // `@repo` is shorthand for `@repo//:repo`
            if !label_pkg.is_empty() || label_name.is_some() {
                return Err(Error::Label(format!("invalid label syntax: {s:?}")));
            }
            return Ok(Label::new(repo_name.clone(), "", repo_name));
        }

        if !absolute {
            // relative forms: `:name` or `name`
            if !label_pkg.is_empty() && label_name.is_some() {
                return Err(Error::Label(format!("invalid label syntax: {s:?}")));
            }
            let name = label_name.unwrap_or(label_pkg);
            if name.is_empty() {
                return Err(Error::Label(format!("label has no target name: {s:?}")));
            }
            return Ok(Label::new(repo_name, pkg, name));
        }

        let name = match label_name {
            Some(n) => n.to_string(),
            None => label_pkg
                .rsplit('/')
                .next()
                .filter(|n| !n.is_empty())
                .ok_or_else(|| Error::Label(format!("label has no target name: {s:?}")))?
                .to_string(),
        };

        Ok(Label::new(repo_name, label_pkg, name))
    }

    /// Print this label as seen from `pkg` in `repo`, using the shortest form
    pub fn relative_to(&self, repo: &str, pkg: &str) -> String {
        if self.repo == repo && self.pkg == pkg {
            return format!(":{}", self.name);
        }
        let mut out = String::new();
        if self.repo != repo && !self.repo.is_empty() {
            out.push('@');
            out.push_str(&self.repo);
        }
        out.push_str("//");
        out.push_str(&self.pkg);
        let last = self.pkg.rsplit('/').next().unwrap_or("");
        if last != self.name || self.pkg.is_empty() {
            out.push(':');
            out.push_str(&self.name);
        }
        out
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.repo.is_empty() {
            write!(f, "@{}", self.repo)?;
        }
        write!(f, "//{}:{}", self.pkg, self.name)
    }
}

fn category(dep: &str) -> u8 {
    if dep.starts_with(':') {
        0
    } else if dep.starts_with("//") {
        1
    } else if dep.starts_with('@') {
        2
    } else {
        3
    }
}

/// Canonical ordering of label strings in dependency lists: package-local
/// labels, then main-repository labels, then external ones.
pub fn compare_deps(a: &str, b: &str) -> Ordering {
    category(a)
        .cmp(&category(b))
        .then_with(|| a.split(':').cmp(b.split(':')))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_forms() {
        assert_eq!(
            Label::parse("//a/b:c").unwrap(),
            Label::new("", "a/b", "c")
        );
        assert_eq!(Label::parse("//a/b").unwrap(), Label::new("", "a/b", "b"));
        assert_eq!(
            Label::parse("@crates//:serde").unwrap(),
            Label::new("crates", "", "serde")
        );
        assert_eq!(
            Label::parse("@rules_rust//tools/runfiles").unwrap(),
            Label::new("rules_rust", "tools/runfiles", "runfiles")
        );
        assert_eq!(
            Label::parse_in(":lib", "", "pkg").unwrap(),
            Label::new("", "pkg", "lib")
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(Label::parse("").is_err());
        assert!(Label::parse("//a//b:c").is_err());
        assert!(Label::parse("//a:b:c").is_err());
        assert!(Label::parse("//:").is_err());
    }

    #[test]
    fn test_relative_to() {
        let l = Label::new("", "a/b", "b");
        assert_eq!(l.relative_to("", "a/b"), ":b");
        assert_eq!(l.relative_to("", "x"), "//a/b");
        let ext = Label::new("crates", "", "serde");
        assert_eq!(ext.relative_to("", "x"), "@crates//:serde");
        let named = Label::new("", "a", "util");
        assert_eq!(named.relative_to("", ""), "//a:util");
    }

    #[test]
    fn test_canonical_order() {
        let mut deps = vec!["@crates//:serde", "//z:z", ":local", "//a:a", "@crates//:anyhow"];
        deps.sort_by(|a, b| compare_deps(a, b));
        assert_eq!(
            deps,
            vec![":local", "//a:a", "//z:z", "@crates//:anyhow", "@crates//:serde"]
        );
    }
}
