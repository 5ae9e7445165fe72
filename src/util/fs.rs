//! Filesystem utilities.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Remove a directory and all its contents, if it exists.
pub fn remove_dir_all_if_exists(path: &Path) -> Result<()> {
    if path.exists() {
        fs::remove_dir_all(path)
            .with_context(|| format!("failed to remove directory: {}", path.display()))?;
    }
    Ok(())
}

/// Ensure a directory exists, creating it if necessary.
pub fn ensure_dir(path: &Path) -> Result<()> {
    if !path.exists() {
        fs::create_dir_all(path)
            .with_context(|| format!("failed to create directory: {}", path.display()))?;
    }
    Ok(())
}

/// Read a file to string, with nice error messages.
pub fn read_to_string(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("failed to read file: {}", path.display()))
}

/// Write a string to a file, creating parent directories if needed.
pub fn write_string(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    fs::write(path, contents).with_context(|| format!("failed to write file: {}", path.display()))
}

/// Write a file only when its contents differ from what is on disk.
///
/// Returns `true` if the file was written. Leaves mtimes alone for
/// unchanged output so file watchers downstream stay quiet.
pub fn write_if_changed(path: &Path, contents: &str) -> Result<bool> {
    if let Ok(existing) = fs::read_to_string(path) {
        if existing == contents {
            return Ok(false);
        }
    }
    write_string(path, contents)?;
    Ok(true)
}

/// Write a file atomically via a sibling temp file and rename.
pub fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    use std::io::Write;

    let parent = path.parent().unwrap_or(Path::new("."));
    ensure_dir(parent)?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent)
        .with_context(|| format!("failed to create temp file in {}", parent.display()))?;
    tmp.write_all(contents.as_bytes())
        .with_context(|| format!("failed to write temp file for {}", path.display()))?;
    tmp.persist(path)
        .with_context(|| format!("failed to persist {}", path.display()))?;
    Ok(())
}

/// Canonicalize a path, but don't fail if it doesn't exist yet.
/// Returns the path as-is if canonicalization fails.
pub fn normalize_path(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

/// Get the relative path from `base` to `path`.
pub fn relative_path(base: &Path, path: &Path) -> PathBuf {
    pathdiff::diff_paths(path, base).unwrap_or_else(|| path.to_path_buf())
}

/// Render a path with forward slashes regardless of platform.
pub fn slash_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_if_changed() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("out/wrangler.toml");

        assert!(write_if_changed(&path, "name = \"a\"\n").unwrap());
        assert!(!write_if_changed(&path, "name = \"a\"\n").unwrap());
        assert!(write_if_changed(&path, "name = \"b\"\n").unwrap());
        assert_eq!(fs::read_to_string(&path).unwrap(), "name = \"b\"\n");
    }

    #[test]
    fn test_write_atomic_replaces_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("runtime.lock");

        write_atomic(&path, "first").unwrap();
        write_atomic(&path, "second").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "second");
    }

    #[test]
    fn test_slash_path() {
        let path = Path::new("blocks").join("charts").join("revenue.tsx");
        assert_eq!(slash_path(&path), "blocks/charts/revenue.tsx");
    }

    #[test]
    fn test_relative_path() {
        let base = Path::new("/work/.hands/build");
        let target = Path::new("/work/blocks/chart.tsx");
        assert_eq!(
            relative_path(base, target),
            PathBuf::from("../../blocks/chart.tsx")
        );
    }
}
