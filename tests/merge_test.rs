//! Property-based tests for dependency expression merging
//!
//! Uses proptest to generate dependency sets and check that rendering is
//! stable and merging is idempotent.

use cratedeps::{Condition, ConditionalDeps};
use pretty_assertions::assert_eq;
use proptest::prelude::*;

fn any_label() -> impl Strategy<Value = String> {
    prop_oneof![
        "[a-z]{1,6}".prop_map(|name| format!("@crates//:{}", name)),
        "[a-z]{1,6}".prop_map(|name| format!("//{}", name)),
        "[a-z]{1,6}".prop_map(|name| format!(":{}", name)),
    ]
}

fn any_setting() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("@platforms//os:linux".to_string()),
        Just("@platforms//os:windows".to_string()),
        Just("@platforms//os:macos".to_string()),
        Just("//cfg:fast".to_string()),
    ]
}

fn any_condition() -> impl Strategy<Value = Condition> {
    prop_oneof![
        Just(Condition::Always),
        any_setting().prop_map(Condition::Setting),
        prop::collection::vec(any_setting(), 2..4).prop_map(Condition::any_of),
        prop::collection::vec(any_setting(), 1..4).prop_map(Condition::otherwise),
    ]
}

fn quoted(labels: &[String]) -> String {
    let items: Vec<String> = labels.iter().map(|l| format!("{:?}", l)).collect();
    format!("[{}]", items.join(", "))
}

fn any_deps() -> impl Strategy<Value = ConditionalDeps> {
    prop::collection::btree_map(any_label(), any_condition(), 0..8)
        .prop_map(|map| map.into_iter().collect())
}

proptest! {
    #[test]
    fn test_render_parses_back(deps in any_deps()) {
        let text = deps.render();
        let parsed = ConditionalDeps::parse(&text).unwrap();
        prop_assert_eq!(parsed.render(), text);
    }

    #[test]
    fn test_merge_is_idempotent(existing in any_deps(), fresh in any_deps()) {
        let once = ConditionalDeps::merge_into(Some(&existing.render()), &fresh).unwrap();
        let twice = ConditionalDeps::merge_into(Some(&once), &fresh).unwrap();
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn test_fresh_entries_win(existing in any_deps(), fresh in any_deps()) {
        let merged = ConditionalDeps::merge_into(Some(&existing.render()), &fresh).unwrap();
        let merged = ConditionalDeps::parse(&merged).unwrap();
        for (dep, cond) in fresh.iter() {
            prop_assert_eq!(merged.get(dep), Some(cond));
        }
        for (dep, cond) in existing.iter() {
            if !fresh.contains(dep) {
                prop_assert_eq!(merged.get(dep), Some(cond));
            }
        }
    }

    #[test]
    fn test_hand_written_default_branch_survives(
        setting in any_setting(),
        selected in prop::collection::btree_set(any_label(), 0..4),
        fallback in prop::collection::btree_set(any_label(), 1..4),
    ) {
        let selected: Vec<String> = selected.into_iter().filter(|l| !fallback.contains(l)).collect();
        let fallback: Vec<String> = fallback.into_iter().collect();
        let text = format!(
            "select({{{:?}: {}, \"//conditions:default\": {}}})",
            setting,
            quoted(&selected),
            quoted(&fallback)
        );
        let merged = ConditionalDeps::merge_into(Some(&text), &ConditionalDeps::new()).unwrap();
        let merged = ConditionalDeps::parse(&merged).unwrap();
        for dep in &fallback {
            prop_assert_eq!(merged.get(dep), Some(&Condition::Otherwise(vec![setting.clone()])));
        }
        for dep in &selected {
            prop_assert_eq!(merged.get(dep), Some(&Condition::Setting(setting.clone())));
        }
    }
}

#[test]
fn test_merge_into_empty_existing() {
    let fresh: ConditionalDeps = [("@crates//:serde".to_string(), Condition::Always)]
        .into_iter()
        .collect();
    assert_eq!(
        ConditionalDeps::merge_into(None, &fresh).unwrap(),
        r#"["@crates//:serde"]"#
    );
    assert_eq!(
        ConditionalDeps::merge_into(Some("  "), &fresh).unwrap(),
        r#"["@crates//:serde"]"#
    );
}

#[test]
fn test_merge_keeps_hand_written_select() {
    let existing = r#"["//keep"] + select({"@platforms//os:linux": ["@crates//:libc"], "//conditions:default": []})"#;
    let fresh: ConditionalDeps = [("//new".to_string(), Condition::Always)]
        .into_iter()
        .collect();
    let merged = ConditionalDeps::merge_into(Some(existing), &fresh).unwrap();
    assert_eq!(
        merged,
        r#"["//keep", "//new"] + select({"@platforms//os:linux": ["@crates//:libc"], "//conditions:default": []})"#
    );
}
