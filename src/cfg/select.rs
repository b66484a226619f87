//! Conditional dependency lists and their `select()` rendering
//!
//! A [`ConditionalDeps`] maps each dependency label to the single condition
//! under which it is needed. It renders to a deterministic build expression
//! and parses the same grammar back, so a previously written (and possibly
//! hand-edited) attribute can be merged with freshly computed dependencies:
//!
//! ```text
//! ["//a", "@crates//:serde"] + select({
//!     "@platforms//os:linux": ["@crates//:libc"],
//!     "//conditions:default": [],
//! }) + selects.with_or({
//!     ("//cfg:x", "//cfg:y"): [":helper"],
//!     "//conditions:default": [],
//! })
//! ```
//!
//! A non-empty default branch means "none of the sibling keys match" and
//! is kept as [`Condition::Otherwise`], so hand-written fallbacks survive a
//! merge with the same meaning.

use crate::error::{Error, Result};
use crate::label::compare_deps;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Key of the fallback branch of a `select()`
pub const DEFAULT_CONDITION: &str = "//conditions:default";

/// Condition under which one dependency applies
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    Always,
    /// One config_setting label
    Setting(String),
    /// Any of several config_setting labels (sorted, deduplicated)
    AnyOf(Vec<String>),
    /// The default branch of a select over these settings: none of them
    /// holds (sorted, deduplicated, never empty)
    Otherwise(Vec<String>),
}

impl Condition {
    pub fn any_of(settings: impl IntoIterator<Item = String>) -> Condition {
        let mut settings = sorted(settings);
        match settings.len() {
            0 => Condition::Always,
            1 => Condition::Setting(settings.remove(0)),
            _ => Condition::AnyOf(settings),
        }
    }

    /// Holds when none of `settings` does; with no settings that is always
    pub fn otherwise(settings: impl IntoIterator<Item = String>) -> Condition {
        let settings = sorted(settings);
        if settings.is_empty() {
            Condition::Always
        } else {
            Condition::Otherwise(settings)
        }
    }

    /// Condition holding when either holds, or `None` when no single
    /// select branch expresses the union
    pub fn or(self, other: Condition) -> Option<Condition> {
        match (self, other) {
            (Condition::Always, _) | (_, Condition::Always) => Some(Condition::Always),
            (Condition::Otherwise(a), Condition::Otherwise(b)) => {
                (a == b).then_some(Condition::Otherwise(a))
            }
            (Condition::Otherwise(none), positive) | (positive, Condition::Otherwise(none)) => {
                // none(S) or any(T) is everything once T covers S
                let covered = positive.into_settings();
                none.iter()
                    .all(|s| covered.contains(s))
                    .then_some(Condition::Always)
            }
            (a, b) => Some(Condition::any_of(
                a.into_settings().into_iter().chain(b.into_settings()),
            )),
        }
    }

    /// Settings named by the condition's select key
    fn into_settings(self) -> Vec<String> {
        match self {
            Condition::Always => Vec::new(),
            Condition::Setting(s) => vec![s],
            Condition::AnyOf(settings) | Condition::Otherwise(settings) => settings,
        }
    }
}

fn sorted(settings: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut settings: Vec<String> = settings.into_iter().collect();
    settings.sort_by(|a, b| compare_deps(a, b));
    settings.dedup();
    settings
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::Always | Condition::Otherwise(_) => write!(f, "{}", quote(DEFAULT_CONDITION)),
            Condition::Setting(s) => write!(f, "{}", quote(s)),
            Condition::AnyOf(settings) => write!(f, "{}", tuple_key(settings)),
        }
    }
}

/// Dependency label to the condition it is required under
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionalDeps {
    deps: BTreeMap<String, Condition>,
}

impl ConditionalDeps {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.deps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deps.is_empty()
    }

    pub fn get(&self, dep: &str) -> Option<&Condition> {
        self.deps.get(dep)
    }

    pub fn contains(&self, dep: &str) -> bool {
        self.deps.contains_key(dep)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Condition)> {
        self.deps.iter()
    }

    /// Set the condition for `dep`, replacing any earlier one
    pub fn insert(&mut self, dep: impl Into<String>, condition: Condition) {
        self.deps.insert(dep.into(), condition);
    }

    /// Require `dep` under `condition` in addition to any condition it
    /// already has. Fails when the two conditions have no common select
    /// form, leaving the entry unchanged.
    pub fn require(&mut self, dep: impl Into<String>, condition: Condition) -> Result<()> {
        let dep = dep.into();
        let combined = match self.deps.get(&dep) {
            Some(existing) => match existing.clone().or(condition.clone()) {
                Some(combined) => combined,
                None => {
                    return Err(Error::DuplicateDependency(format!(
                        "{} required under {} and {}, which no single select expresses",
                        dep,
                        existing.describe(),
                        condition.describe()
                    )))
                }
            },
            None => condition,
        };
        self.deps.insert(dep, combined);
        Ok(())
    }

    /// Add a dependency that must not already be present
    fn insert_unique(&mut self, dep: String, condition: Condition, offset: usize) -> Result<()> {
        if let Some(existing) = self.deps.get(&dep) {
            return Err(Error::DuplicateDependency(format!(
                "{} listed under both {} and {} (offset {})",
                dep, existing, condition, offset
            )));
        }
        self.deps.insert(dep, condition);
        Ok(())
    }

    /// Union where entries of `newer` supersede entries of `self`
    pub fn overlay(&self, newer: &ConditionalDeps) -> ConditionalDeps {
        let mut merged = self.clone();
        for (dep, cond) in &newer.deps {
            merged.deps.insert(dep.clone(), cond.clone());
        }
        merged
    }

    /// Union that refuses to place a target under two conditions
    pub fn disjoint_union(&self, other: &ConditionalDeps) -> Result<ConditionalDeps> {
        let mut merged = self.clone();
        for (dep, cond) in &other.deps {
            if merged.deps.get(dep).is_some_and(|c| c != cond) {
                return Err(Error::DuplicateDependency(format!(
                    "{} required under both {} and {}",
                    dep, merged.deps[dep], cond
                )));
            }
            merged.deps.insert(dep.clone(), cond.clone());
        }
        Ok(merged)
    }

    /// Render as a build expression. Output is a pure function of the map.
    pub fn render(&self) -> String {
        let mut always: Vec<&str> = Vec::new();
        let mut grouped: BTreeMap<&Condition, Vec<&str>> = BTreeMap::new();
        for (dep, cond) in &self.deps {
            match cond {
                Condition::Always => always.push(dep),
                other => grouped.entry(other).or_default().push(dep),
            }
        }
        always.sort_by(|a, b| compare_deps(a, b));

        let mut parts = Vec::new();
        if !always.is_empty() || grouped.is_empty() {
            parts.push(render_list(&always));
        }
        for (cond, mut deps) in grouped {
            deps.sort_by(|a, b| compare_deps(a, b));
            let part = match cond {
                Condition::Otherwise(settings) => {
                    let (func, key) = match settings.as_slice() {
                        [one] => ("select", quote(one)),
                        _ => ("selects.with_or", tuple_key(settings)),
                    };
                    format!(
                        "{}({{{}: [], {}: {}}})",
                        func,
                        key,
                        quote(DEFAULT_CONDITION),
                        render_list(&deps)
                    )
                }
                other => {
                    let func = match other {
                        Condition::AnyOf(_) => "selects.with_or",
                        _ => "select",
                    };
                    format!(
                        "{}({{{}: {}, {}: []}})",
                        func,
                        other,
                        render_list(&deps),
                        quote(DEFAULT_CONDITION)
                    )
                }
            };
            parts.push(part);
        }
        parts.join(" + ")
    }

    /// Parse an expression produced by [`render`](Self::render) or written
    /// by hand in the same grammar
    pub fn parse(text: &str) -> Result<ConditionalDeps> {
        let mut parser = ExprParser::new(text)?;
        let deps = parser.expr()?;
        parser.expect_end()?;
        Ok(deps)
    }

    /// Merge freshly computed dependencies into an existing expression,
    /// keeping existing entries the fresh set does not mention
    pub fn merge_into(existing: Option<&str>, fresh: &ConditionalDeps) -> Result<String> {
        let base = match existing {
            Some(text) if !text.trim().is_empty() => ConditionalDeps::parse(text)?,
            _ => ConditionalDeps::new(),
        };
        Ok(base.overlay(fresh).render())
    }
}

impl FromIterator<(String, Condition)> for ConditionalDeps {
    fn from_iter<T: IntoIterator<Item = (String, Condition)>>(iter: T) -> Self {
        ConditionalDeps {
            deps: iter.into_iter().collect(),
        }
    }
}

fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

fn tuple_key(settings: &[String]) -> String {
    let quoted: Vec<String> = settings.iter().map(|s| quote(s)).collect();
    format!("({})", quoted.join(", "))
}

impl Condition {
    /// Human-readable form for error messages
    fn describe(&self) -> String {
        match self {
            Condition::Otherwise(settings) => format!("none of {}", tuple_key(settings)),
            other => other.to_string(),
        }
    }
}

fn render_list(items: &[&str]) -> String {
    let quoted: Vec<String> = items.iter().map(|s| quote(s)).collect();
    format!("[{}]", quoted.join(", "))
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Str(String),
    Ident(String),
    Punct(char),
}

/// Recursive-descent parser over the dependency expression grammar:
///
/// ```text
/// expr  := term ('+' term)*
/// term  := list | call
/// list  := '[' (STRING ','?)* ']'
/// call  := IDENT ('.' IDENT)? '(' '{' (key ':' list ','?)* '}' ')'
/// key   := STRING | '(' (STRING ','?)+ ')'
/// ```
struct ExprParser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
    end: usize,
}

impl ExprParser {
    fn new(text: &str) -> Result<Self> {
        Ok(ExprParser {
            tokens: tokenize(text)?,
            pos: 0,
            end: text.len(),
        })
    }

    fn offset(&self) -> usize {
        self.tokens.get(self.pos).map_or(self.end, |(o, _)| *o)
    }

    fn error<T>(&self, message: impl Into<String>) -> Result<T> {
        Self::error_at(self.offset(), message)
    }

    fn error_at<T>(offset: usize, message: impl Into<String>) -> Result<T> {
        Err(Error::ExprSyntax {
            offset,
            message: message.into(),
        })
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).map(|(_, t)| t.clone());
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(&Token::Punct(c)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, c: char) -> Result<()> {
        if self.eat(c) {
            Ok(())
        } else {
            self.error(format!("expected `{}`", c))
        }
    }

    fn expect_end(&self) -> Result<()> {
        if self.pos < self.tokens.len() {
            return self.error("unexpected trailing input");
        }
        Ok(())
    }

    fn string(&mut self) -> Result<String> {
        match self.peek() {
            Some(Token::Str(s)) => {
                let s = s.clone();
                self.pos += 1;
                Ok(s)
            }
            _ => self.error("expected string"),
        }
    }

    fn expr(&mut self) -> Result<ConditionalDeps> {
        let mut deps = ConditionalDeps::new();
        loop {
            let offset = self.offset();
            let term = self.term()?;
            // separate terms may repeat a target; its conditions add up
            for (dep, cond) in term.deps {
                deps.require(dep, cond).map_err(|e| match e {
                    Error::DuplicateDependency(message) => {
                        Error::DuplicateDependency(format!("{} (offset {})", message, offset))
                    }
                    other => other,
                })?;
            }
            if !self.eat('+') {
                return Ok(deps);
            }
        }
    }

    fn term(&mut self) -> Result<ConditionalDeps> {
        match self.peek() {
            Some(Token::Punct('[')) => {
                let offset = self.offset();
                let mut deps = ConditionalDeps::new();
                for dep in self.list()? {
                    deps.insert_unique(dep, Condition::Always, offset)?;
                }
                Ok(deps)
            }
            Some(Token::Ident(_)) => self.call(),
            _ => self.error("expected list or select()"),
        }
    }

    fn list(&mut self) -> Result<Vec<String>> {
        self.expect('[')?;
        let mut items = Vec::new();
        while !self.eat(']') {
            items.push(self.string()?);
            if !self.eat(',') {
                self.expect(']')?;
                break;
            }
        }
        Ok(items)
    }

    fn call(&mut self) -> Result<ConditionalDeps> {
        let start = self.offset();
        let mut name = match self.next() {
            Some(Token::Ident(name)) => name,
            _ => return self.error("expected function name"),
        };
        if self.eat('.') {
            match self.next() {
                Some(Token::Ident(attr)) => {
                    name.push('.');
                    name.push_str(&attr);
                }
                _ => return self.error("expected attribute name"),
            }
        }
        let with_or = match name.as_str() {
            "select" => false,
            "selects.with_or" => true,
            other => return Self::error_at(start, format!("unsupported function `{}`", other)),
        };

        self.expect('(')?;
        self.expect('{')?;
        // `None` marks the default branch, resolved once all keys are known
        let mut branches: Vec<(usize, Option<Condition>, Vec<String>)> = Vec::new();
        while !self.eat('}') {
            let offset = self.offset();
            let condition = self.key(with_or)?;
            self.expect(':')?;
            branches.push((offset, condition, self.list()?));
            if !self.eat(',') {
                self.expect('}')?;
                break;
            }
        }
        self.eat(',');
        self.expect(')')?;

        let siblings: Vec<String> = branches
            .iter()
            .filter_map(|(_, cond, _)| cond.clone())
            .flat_map(Condition::into_settings)
            .collect();
        let mut deps = ConditionalDeps::new();
        for (offset, condition, list) in branches {
            let condition = condition.unwrap_or_else(|| Condition::otherwise(siblings.clone()));
            for dep in list {
                // one select() is a partition: a target may sit under one key only
                deps.insert_unique(dep, condition.clone(), offset)?;
            }
        }
        Ok(deps)
    }

    /// A branch key; `None` for the default branch
    fn key(&mut self, with_or: bool) -> Result<Option<Condition>> {
        if self.eat('(') {
            if !with_or {
                return self.error("tuple keys are only valid in selects.with_or");
            }
            let mut settings = Vec::new();
            while !self.eat(')') {
                settings.push(self.string()?);
                if !self.eat(',') {
                    self.expect(')')?;
                    break;
                }
            }
            if settings.is_empty() {
                return self.error("empty condition tuple");
            }
            return Ok(Some(Condition::any_of(settings)));
        }
        let key = self.string()?;
        Ok((key != DEFAULT_CONDITION).then_some(Condition::Setting(key)))
    }
}

fn tokenize(text: &str) -> Result<Vec<(usize, Token)>> {
    let mut tokens = Vec::new();
    let mut chars = text.char_indices().peekable();

    while let Some(&(offset, c)) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '#' => {
                // comments run to end of line
                while let Some((_, c)) = chars.next() {
                    if c == '\n' {
                        break;
                    }
                }
            }
            '"' | '\'' => {
                let quote_char = c;
                chars.next();
                let mut value = String::new();
                let mut closed = false;
                while let Some((_, c)) = chars.next() {
                    match c {
                        '\\' => match chars.next() {
                            Some((_, escaped)) => value.push(escaped),
                            None => break,
                        },
                        c if c == quote_char => {
                            closed = true;
                            break;
                        }
                        c => value.push(c),
                    }
                }
                if !closed {
                    return Err(Error::ExprSyntax {
                        offset,
                        message: "unterminated string".into(),
                    });
                }
                tokens.push((offset, Token::Str(value)));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut ident = String::new();
                while let Some(&(_, c)) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        ident.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push((offset, Token::Ident(ident)));
            }
            '[' | ']' | '{' | '}' | '(' | ')' | ',' | ':' | '+' | '.' => {
                chars.next();
                tokens.push((offset, Token::Punct(c)));
            }
            other => {
                return Err(Error::ExprSyntax {
                    offset,
                    message: format!("unexpected character `{}`", other),
                })
            }
        }
    }

    Ok(tokens)
}
