//! Mapping cfg predicates onto build conditions
//!
//! `test` and `feature = "..."` atoms are evaluated away for the consuming
//! target; every other atom is looked up in the cfg mapping table. The
//! result is minimized in DNF and projected onto a [`Condition`].

use super::cover::{Cover, Variables};
use super::predicate::{Atom, Predicate};
use super::select::Condition;
use crate::error::{Error, Result};
use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

/// Facts about the target consuming a dependency
#[derive(Debug, Clone, Copy)]
pub struct CfgContext<'a> {
    /// The consuming target only builds under `cfg(test)`
    pub is_test: bool,
    /// Enabled crate features
    pub features: &'a BTreeSet<String>,
    /// cfg atom to config_setting label
    pub mapping: &'a BTreeMap<String, String>,
    pub strict: bool,
}

/// Substitute `test`, features and mapped atoms. Unmapped atoms become
/// `true` (over-including a dependency beats dropping it).
pub fn normalize(pred: &Predicate, ctx: &CfgContext<'_>) -> Result<Predicate> {
    pred.substitute(&mut |atom: &Atom| match atom {
        Atom::Flag(name) if name == "test" => Ok(constant(ctx.is_test)),
        Atom::KeyValue { key, value } if key == "feature" => {
            Ok(constant(ctx.features.contains(value)))
        }
        other => {
            let key = other.mapping_key();
            match ctx.mapping.get(&key) {
                Some(label) => Ok(Predicate::flag(label.clone())),
                None if ctx.strict => Err(Error::UnsupportedCondition(format!(
                    "no cfg_mapping entry for `{}`",
                    key
                ))),
                None => {
                    warn!(cfg = %key, "could not find cfg mapping, assuming true");
                    Ok(Predicate::True)
                }
            }
        }
    })
}

fn constant(value: bool) -> Predicate {
    if value {
        Predicate::True
    } else {
        Predicate::False
    }
}

/// Minimized DNF of an already normalized predicate
pub fn minimize(pred: &Predicate) -> (Cover, Variables) {
    let mut vars = Variables::new();
    let mut cover = Cover::from_predicate(pred, &mut vars);
    cover.minimize();
    (cover, vars)
}

/// Project a minimized cover onto a select() key; `None` means the
/// dependency never applies
pub fn project(cover: &Cover, vars: &Variables) -> std::result::Result<Option<Condition>, String> {
    if cover.is_empty() {
        return Ok(None);
    }
    if cover.cubes().iter().any(|c| c.is_tautology()) {
        return Ok(Some(Condition::Always));
    }

    let mut settings = Vec::new();
    for cube in cover.cubes() {
        let literals: Vec<(usize, bool)> = cube.literals().collect();
        match literals.as_slice() {
            [(var, true)] => settings.push(vars.name(*var).to_string()),
            _ => return Err(describe(cover, vars)),
        }
    }
    Ok(Some(Condition::any_of(settings)))
}

fn describe(cover: &Cover, vars: &Variables) -> String {
    let terms: Vec<String> = cover
        .cubes()
        .iter()
        .map(|cube| {
            let lits: Vec<String> = cube
                .literals()
                .map(|(var, positive)| {
                    if positive {
                        vars.name(var).to_string()
                    } else {
                        format!("!{}", vars.name(var))
                    }
                })
                .collect();
            lits.join(" && ")
        })
        .collect();
    terms.join(" || ")
}

/// Full pipeline: normalize, minimize, project
pub fn condition_for(pred: &Predicate, ctx: &CfgContext<'_>) -> Result<Option<Condition>> {
    let normalized = normalize(pred, ctx)?;
    let (cover, vars) = minimize(&normalized);
    match project(&cover, &vars) {
        Ok(condition) => Ok(condition),
        Err(shape) if ctx.strict => Err(Error::UnsupportedCondition(shape)),
        Err(shape) => {
            warn!(condition = %shape, "condition cannot be expressed as a select() key, including unconditionally");
            Ok(Some(Condition::Always))
        }
    }
}

/// True when `pred` can only hold under `cfg(test)`
pub fn is_test_only(pred: &Predicate) -> bool {
    let without_test = pred
        .substitute(&mut |atom: &Atom| {
            Ok(match atom {
                Atom::Flag(name) if name == "test" => Predicate::False,
                other => Predicate::Atom(other.clone()),
            })
        })
        .unwrap_or(Predicate::True);
    let (cover, _) = minimize(&without_test);
    cover.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn mapping() -> BTreeMap<String, String> {
        [
            ("unix", "@platforms//os:unix"),
            ("windows", "@platforms//os:windows"),
            ("target_os=linux", "@platforms//os:linux"),
            ("target_os=macos", "@platforms//os:macos"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    fn run(cfg: &str, is_test: bool, features: &[&str]) -> Result<Option<Condition>> {
        let features: BTreeSet<String> = features.iter().map(|f| f.to_string()).collect();
        let mapping = mapping();
        let ctx = CfgContext {
            is_test,
            features: &features,
            mapping: &mapping,
            strict: false,
        };
        condition_for(&Predicate::parse(cfg).unwrap(), &ctx)
    }

    #[rstest]
    #[case("test", false, &[], None)]
    #[case("test", true, &[], Some(Condition::Always))]
    #[case(r#"feature = "serde""#, false, &[], None)]
    #[case(r#"feature = "serde""#, false, &["serde"], Some(Condition::Always))]
    #[case("unix", false, &[], Some(Condition::Setting("@platforms//os:unix".into())))]
    #[case(r#"all(test, target_os = "linux")"#, true, &[], Some(Condition::Setting("@platforms//os:linux".into())))]
    #[case(r#"all(test, target_os = "linux")"#, false, &[], None)]
    #[case("any(unix, not(unix))", false, &[], Some(Condition::Always))]
    #[case("some_unknown_flag", false, &[], Some(Condition::Always))]
    fn test_condition_for(
        #[case] cfg: &str,
        #[case] is_test: bool,
        #[case] features: &[&str],
        #[case] expected: Option<Condition>,
    ) {
        assert_eq!(run(cfg, is_test, features).unwrap(), expected);
    }

    #[test]
    fn test_disjunction_projects_to_any_of() {
        let cond = run(r#"any(windows, target_os = "macos")"#, false, &[]).unwrap();
        assert_eq!(
            cond,
            Some(Condition::AnyOf(vec![
                "@platforms//os:macos".into(),
                "@platforms//os:windows".into()
            ]))
        );
    }

    #[test]
    fn test_negation_over_includes() {
        assert_eq!(run("not(unix)", false, &[]).unwrap(), Some(Condition::Always));
    }

    #[test]
    fn test_strict_rejects_unmapped_and_unsupported() {
        let features = BTreeSet::new();
        let mapping = mapping();
        let ctx = CfgContext {
            is_test: false,
            features: &features,
            mapping: &mapping,
            strict: true,
        };
        assert!(condition_for(&Predicate::parse("mystery").unwrap(), &ctx).is_err());
        assert!(condition_for(&Predicate::parse("all(unix, windows)").unwrap(), &ctx).is_err());
    }

    #[test]
    fn test_is_test_only() {
        assert!(is_test_only(&Predicate::flag("test")));
        assert!(is_test_only(&Predicate::parse("all(test, unix)").unwrap()));
        assert!(!is_test_only(&Predicate::parse("any(test, unix)").unwrap()));
        assert!(!is_test_only(&Predicate::True));
    }
}
