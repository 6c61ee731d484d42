/* src/path.rs */

use std::path::{Component, Path, PathBuf};

/// Resolves a config-supplied path to an absolute one.
///
/// A leading `~/` refers to `home_dir`; anything still relative is taken
/// relative to `base_dir`. No filesystem access happens here, so the result
/// may point at nothing.
pub fn resolve_relative_path(path: &Path, base_dir: &Path, home_dir: &Path) -> PathBuf {
    let expanded = match path.to_str() {
        Some(raw) if raw.starts_with("~/") => PathBuf::from(
            shellexpand::tilde_with_context(raw, || home_dir.to_str()).into_owned(),
        ),
        _ => path.to_path_buf(),
    };
    normalize(&base_dir.join(expanded))
}

/// Lexically folds `.` and `..` components.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(component);
                }
            }
            other => out.push(other),
        }
    }
    out
}
