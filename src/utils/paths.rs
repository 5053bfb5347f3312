//! Path helpers shared by reference resolution and the CLI.

use directories::BaseDirs;
use std::path::{Path, PathBuf};

/// Expand a leading `~` to the home directory. Other paths are returned as-is.
pub fn expand_tilde(path: &str) -> PathBuf {
    let home = || BaseDirs::new().map(|dirs| dirs.home_dir().to_path_buf());
    if path == "~" {
        if let Some(home) = home() {
            return home;
        }
    } else if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = home() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Get a user-friendly display string for a path
/// Converts absolute paths under the home directory to use ~ notation
pub fn path_display<P: AsRef<Path>>(path: P) -> String {
    let path = path.as_ref();
    if let Some(dirs) = BaseDirs::new() {
        if let Ok(relative) = path.strip_prefix(dirs.home_dir()) {
            return format!("~/{}", relative.display());
        }
    }
    path.display().to_string()
}

/// Every ancestor of `dir` from the root down to `dir` itself.
pub fn ancestors_top_down(dir: &Path) -> Vec<PathBuf> {
    let mut acc: Vec<PathBuf> = dir.ancestors().map(Path::to_path_buf).collect();
    acc.reverse();
    acc
}
