//! Names that never need a dependency, and toolchain-provided crates

use crate::label::Label;
use once_cell::sync::Lazy;
use std::collections::{BTreeMap, BTreeSet};

static BUILTINS: Lazy<BTreeSet<&'static str>> = Lazy::new(|| {
    [
        // standard library
        "std",
        "core",
        "alloc",
        "proc_macro",
        "test",
        // primitive types
        "bool",
        "char",
        "str",
        "f32",
        "f64",
        "i8",
        "i16",
        "i32",
        "i64",
        "i128",
        "isize",
        "u8",
        "u16",
        "u32",
        "u64",
        "u128",
        "usize",
        // in-source directives
        "cratedeps",
    ]
    .into_iter()
    .collect()
});

pub fn is_builtin(name: &str) -> bool {
    BUILTINS.contains(name)
}

/// Provided crates of the ordinary namespace, before configuration
pub fn default_provided() -> BTreeMap<String, Label> {
    [(
        "runfiles".to_string(),
        Label::new("rules_rust", "tools/runfiles", "runfiles"),
    )]
    .into_iter()
    .collect()
}
