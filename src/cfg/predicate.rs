//! Conditional-compilation predicates
//!
//! A [`Predicate`] is the boolean tree behind a `#[cfg(...)]` attribute:
//! bare flags (`unix`, `test`), key/value pairs (`feature = "std"`,
//! `target_os = "linux"`), `not`, `all` and `any`, plus the constant forms
//! produced by partial evaluation.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Atomic cfg condition
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Atom {
    /// `#[cfg(unix)]`
    Flag(String),
    /// `#[cfg(target_os = "linux")]`
    KeyValue { key: String, value: String },
}

impl Atom {
    pub fn flag(name: impl Into<String>) -> Self {
        Atom::Flag(name.into())
    }

    pub fn key_value(key: impl Into<String>, value: impl Into<String>) -> Self {
        Atom::KeyValue {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Lookup key in the cfg mapping table: `unix` or `target_os=linux`
    pub fn mapping_key(&self) -> String {
        match self {
            Atom::Flag(name) => name.clone(),
            Atom::KeyValue { key, value } => format!("{}={}", key, value),
        }
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Atom::Flag(name) => write!(f, "{}", name),
            Atom::KeyValue { key, value } => write!(f, "{} = {:?}", key, value),
        }
    }
}

/// Boolean expression over cfg atoms
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    True,
    False,
    Atom(Atom),
    Not(Box<Predicate>),
    All(Vec<Predicate>),
    Any(Vec<Predicate>),
}

impl Default for Predicate {
    fn default() -> Self {
        Predicate::True
    }
}

impl Predicate {
    pub fn atom(atom: Atom) -> Self {
        Predicate::Atom(atom)
    }

    pub fn flag(name: impl Into<String>) -> Self {
        Predicate::Atom(Atom::flag(name))
    }

    pub fn key_value(key: impl Into<String>, value: impl Into<String>) -> Self {
        Predicate::Atom(Atom::key_value(key, value))
    }

    /// Conjunction with constant folding and flattening
    pub fn all(parts: impl IntoIterator<Item = Predicate>) -> Self {
        let mut out = Vec::new();
        for part in parts {
            match part {
                Predicate::True => {}
                Predicate::False => return Predicate::False,
                Predicate::All(inner) => out.extend(inner),
                other => {
                    if !out.contains(&other) {
                        out.push(other)
                    }
                }
            }
        }
        match out.len() {
            0 => Predicate::True,
            1 => out.pop().unwrap_or(Predicate::True),
            _ => Predicate::All(out),
        }
    }

    /// Disjunction with constant folding and flattening
    pub fn any(parts: impl IntoIterator<Item = Predicate>) -> Self {
        let mut out = Vec::new();
        for part in parts {
            match part {
                Predicate::False => {}
                Predicate::True => return Predicate::True,
                Predicate::Any(inner) => out.extend(inner),
                other => {
                    if !out.contains(&other) {
                        out.push(other)
                    }
                }
            }
        }
        match out.len() {
            0 => Predicate::False,
            1 => out.pop().unwrap_or(Predicate::False),
            _ => Predicate::Any(out),
        }
    }

    pub fn negate(self) -> Self {
        match self {
            Predicate::True => Predicate::False,
            Predicate::False => Predicate::True,
            Predicate::Not(inner) => *inner,
            other => Predicate::Not(Box::new(other)),
        }
    }

    pub fn and(self, other: Predicate) -> Self {
        Predicate::all([self, other])
    }

    pub fn or(self, other: Predicate) -> Self {
        Predicate::any([self, other])
    }

    pub fn is_true(&self) -> bool {
        matches!(self, Predicate::True)
    }

    /// Replace every atom by the predicate `f` returns for it, folding
    /// constants on the way back up
    pub fn substitute<F>(&self, f: &mut F) -> Result<Predicate>
    where
        F: FnMut(&Atom) -> Result<Predicate>,
    {
        Ok(match self {
            Predicate::True => Predicate::True,
            Predicate::False => Predicate::False,
            Predicate::Atom(atom) => f(atom)?,
            Predicate::Not(inner) => inner.substitute(f)?.negate(),
            Predicate::All(parts) => Predicate::all(
                parts
                    .iter()
                    .map(|p| p.substitute(f))
                    .collect::<Result<Vec<_>>>()?,
            ),
            Predicate::Any(parts) => Predicate::any(
                parts
                    .iter()
                    .map(|p| p.substitute(f))
                    .collect::<Result<Vec<_>>>()?,
            ),
        })
    }

    /// Evaluate under a total assignment
    pub fn eval(&self, value: &impl Fn(&Atom) -> bool) -> bool {
        match self {
            Predicate::True => true,
            Predicate::False => false,
            Predicate::Atom(atom) => value(atom),
            Predicate::Not(inner) => !inner.eval(value),
            Predicate::All(parts) => parts.iter().all(|p| p.eval(value)),
            Predicate::Any(parts) => parts.iter().any(|p| p.eval(value)),
        }
    }

    /// Push negations down to the atoms (negation normal form)
    pub fn to_nnf(&self) -> Predicate {
        self.nnf(false)
    }

    fn nnf(&self, negated: bool) -> Predicate {
        match (self, negated) {
            (Predicate::True, false) | (Predicate::False, true) => Predicate::True,
            (Predicate::True, true) | (Predicate::False, false) => Predicate::False,
            (Predicate::Atom(_), false) => self.clone(),
            (Predicate::Atom(_), true) => Predicate::Not(Box::new(self.clone())),
            (Predicate::Not(inner), _) => inner.nnf(!negated),
            (Predicate::All(parts), false) | (Predicate::Any(parts), true) => {
                Predicate::all(parts.iter().map(|p| p.nnf(negated)))
            }
            (Predicate::Any(parts), false) | (Predicate::All(parts), true) => {
                Predicate::any(parts.iter().map(|p| p.nnf(negated)))
            }
        }
    }

    /// Every atom mentioned, in first-seen order
    pub fn atoms(&self) -> Vec<&Atom> {
        let mut out = Vec::new();
        self.collect_atoms(&mut out);
        out
    }

    fn collect_atoms<'a>(&'a self, out: &mut Vec<&'a Atom>) {
        match self {
            Predicate::Atom(atom) => {
                if !out.contains(&atom) {
                    out.push(atom)
                }
            }
            Predicate::Not(inner) => inner.collect_atoms(out),
            Predicate::All(parts) | Predicate::Any(parts) => {
                for p in parts {
                    p.collect_atoms(out)
                }
            }
            Predicate::True | Predicate::False => {}
        }
    }

    /// Build a predicate from the inside of a `#[cfg(...)]` attribute
    pub fn from_meta(meta: &syn::Meta) -> syn::Result<Predicate> {
        Ok(match meta {
            syn::Meta::Path(path) => Predicate::flag(path.require_ident()?.to_string()),
            syn::Meta::NameValue(syn::MetaNameValue { path, value, .. }) => {
                let key = path.require_ident()?.to_string();
                match value {
                    syn::Expr::Lit(syn::ExprLit {
                        lit: syn::Lit::Str(s),
                        ..
                    }) => Predicate::key_value(key, s.value()),
                    _ => {
                        return Err(syn::Error::new_spanned(
                            value,
                            "key-value cfg expects a string value",
                        ))
                    }
                }
            }
            syn::Meta::List(list) => {
                let nested = list.parse_args_with(
                    syn::punctuated::Punctuated::<syn::Meta, syn::Token![,]>::parse_terminated,
                )?;
                let parts = nested
                    .iter()
                    .map(Predicate::from_meta)
                    .collect::<syn::Result<Vec<_>>>()?;

                if list.path.is_ident("all") {
                    Predicate::all(parts)
                } else if list.path.is_ident("any") {
                    Predicate::any(parts)
                } else if list.path.is_ident("not") {
                    if parts.len() != 1 {
                        return Err(syn::Error::new_spanned(
                            list,
                            "`not` cfg expects exactly one predicate",
                        ));
                    }
                    parts
                        .into_iter()
                        .next()
                        .unwrap_or(Predicate::True)
                        .negate()
                } else {
                    return Err(syn::Error::new_spanned(list, "unexpected cfg predicate"));
                }
            }
        })
    }

    /// Parse cfg syntax: `all(unix, not(feature = "std"))`
    pub fn parse(text: &str) -> Result<Predicate> {
        let meta: syn::Meta = syn::parse_str(text).map_err(|e| Error::ExprSyntax {
            offset: 0,
            message: format!("bad cfg `{}`: {}", text, e),
        })?;
        Predicate::from_meta(&meta).map_err(|e| Error::ExprSyntax {
            offset: 0,
            message: format!("bad cfg `{}`: {}", text, e),
        })
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn join(f: &mut fmt::Formatter<'_>, name: &str, parts: &[Predicate]) -> fmt::Result {
            write!(f, "{}(", name)?;
            for (i, p) in parts.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", p)?;
            }
            write!(f, ")")
        }

        match self {
            // cfg has no literal constants; these are the canonical spellings
            Predicate::True => write!(f, "all()"),
            Predicate::False => write!(f, "any()"),
            Predicate::Atom(atom) => write!(f, "{}", atom),
            Predicate::Not(inner) => write!(f, "not({})", inner),
            Predicate::All(parts) => join(f, "all", parts),
            Predicate::Any(parts) => join(f, "any", parts),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_nested() {
        let p = Predicate::parse(r#"all(test, not(target_os = "windows"))"#).unwrap();
        assert_eq!(
            p,
            Predicate::All(vec![
                Predicate::flag("test"),
                Predicate::key_value("target_os", "windows").negate(),
            ])
        );
        assert_eq!(p.to_string(), r#"all(test, not(target_os = "windows"))"#);
    }

    #[test]
    fn test_parse_rejects_unknown_list() {
        assert!(Predicate::parse("some(x)").is_err());
        assert!(Predicate::parse("not(a, b)").is_err());
        assert!(Predicate::parse("feature = 3").is_err());
    }

    #[test]
    fn test_constant_folding() {
        assert_eq!(
            Predicate::all([Predicate::True, Predicate::flag("a")]),
            Predicate::flag("a")
        );
        assert_eq!(
            Predicate::any([Predicate::False, Predicate::True]),
            Predicate::True
        );
        assert_eq!(Predicate::all(Vec::new()), Predicate::True);
        assert_eq!(Predicate::any(Vec::new()), Predicate::False);
    }

    #[test]
    fn test_substitute_folds() {
        let p = Predicate::parse("all(test, unix)").unwrap();
        let out = p
            .substitute(&mut |a: &Atom| {
                Ok(if a == &Atom::flag("test") {
                    Predicate::False
                } else {
                    Predicate::Atom(a.clone())
                })
            })
            .unwrap();
        assert_eq!(out, Predicate::False);
    }

    #[test]
    fn test_nnf_pushes_negation() {
        let p = Predicate::parse("not(any(a, not(b)))").unwrap();
        assert_eq!(
            p.to_nnf(),
            Predicate::All(vec![Predicate::flag("a").negate(), Predicate::flag("b")])
        );
    }

    #[test]
    fn test_mapping_key() {
        assert_eq!(Atom::key_value("target_os", "linux").mapping_key(), "target_os=linux");
        assert_eq!(Atom::flag("unix").mapping_key(), "unix");
    }
}
