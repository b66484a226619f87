//! Source-file graphs
//!
//! [`modules`] follows `mod` declarations from one crate root,
//! [`ownership`] decides whether an ancestor crate already owns a file and
//! [`units`] infers the compilation units of a directory.

pub mod modules;
pub mod ownership;
pub mod units;

pub use modules::{ModuleFile, ModuleGraph};
pub use ownership::is_claimed;
pub use units::{infer_units, CompilationUnit, UnitFile, UnitKind};

use std::path::{Component, Path, PathBuf};

/// Lexically resolve `.` and `..` components; the file system is not
/// consulted, so symlinks are not followed
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let popped = matches!(
                    out.components().next_back(),
                    Some(Component::Normal(_))
                ) && out.pop();
                if !popped && !out.has_root() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
