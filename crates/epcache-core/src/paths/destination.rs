//! Task destination directories relative to the configured base.

use std::path::{Component, Path, PathBuf};

/// Keeps only the normal components of `p` (drops root, `.` and `..`).
fn normal_components(p: &Path) -> PathBuf {
    p.components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s),
            _ => None,
        })
        .collect()
}

/// Resolves a task's destination against the base download path.
///
/// - empty → the base itself
/// - absolute and inside the base → unchanged
/// - absolute outside the base → re-rooted under the base
/// - relative → joined onto the base
///
/// `..` components never escape the base.
pub fn resolve_destination(base: &Path, task_path: &Path) -> PathBuf {
    if task_path.as_os_str().is_empty() {
        return base.to_path_buf();
    }
    let escapes = task_path
        .components()
        .any(|c| matches!(c, Component::ParentDir));
    if task_path.is_absolute() && task_path.starts_with(base) && !escapes {
        return task_path.to_path_buf();
    }
    base.join(normal_components(task_path))
}

/// Path of `file` relative to `base`, for cache records. Falls back to the
/// file's own path when it is not under `base`.
pub fn relative_to_base(base: &Path, file: &Path) -> PathBuf {
    file.strip_prefix(base)
        .map(Path::to_path_buf)
        .unwrap_or_else(|_| file.to_path_buf())
}
