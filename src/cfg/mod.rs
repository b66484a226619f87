//! Conditional-compilation algebra
//!
//! Turns `#[cfg(...)]` predicates into `select()` keys: parse into a
//! [`Predicate`], evaluate away `test` and features for the consuming
//! target, map the remaining atoms to config_setting labels, minimize in
//! DNF and project onto a [`Condition`]. [`ConditionalDeps`] then renders
//! and merges whole dependency attributes.

pub mod cover;
pub mod cube;
pub mod normalize;
pub mod predicate;
pub mod select;

pub use cover::{Cover, Variables};
pub use cube::{Cube, CubeValue};
pub use normalize::{condition_for, is_test_only, minimize, normalize, project, CfgContext};
pub use predicate::{Atom, Predicate};
pub use select::{Condition, ConditionalDeps, DEFAULT_CONDITION};
