//! Turning referenced names into dependency labels

pub mod builtins;
pub mod index;
pub mod resolver;

pub use builtins::is_builtin;
pub use index::LocalIndex;
pub use resolver::{Resolution, ResolvedDeps, Resolver, Source};
