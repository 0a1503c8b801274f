use std::path::{Path, PathBuf};

/// System-wide directory searched for configuration files
pub const CONFIG_DIR: &str = "/etc/rax-autoscaler";

/// Locate a file: the given path if readable, else the same file name in
/// [`CONFIG_DIR`].
pub fn check_file(name: impl AsRef<Path>) -> Option<PathBuf> {
    check_file_in(name, Path::new(CONFIG_DIR))
}

pub fn check_file_in(name: impl AsRef<Path>, fallback_dir: &Path) -> Option<PathBuf> {
    let name = name.as_ref();
    if is_readable(name) {
        return Some(name.to_path_buf());
    }

    let fallback = fallback_dir.join(name.file_name()?);
    is_readable(&fallback).then_some(fallback)
}

fn is_readable(path: &Path) -> bool {
    path.is_file() && std::fs::File::open(path).is_ok()
}
