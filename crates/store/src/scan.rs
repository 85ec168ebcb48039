//! Recursive directory scanning.
//!
//! Relative paths use `/` as separator (even on Windows) so they can be
//! used directly as object keys.

use std::path::{Path, PathBuf};

/// A regular file found under a scanned root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedFile {
    pub path: PathBuf,
    /// Path relative to the scan root, `/`-separated.
    pub relative_path: String,
    pub size: u64,
}

/// Scans `root` recursively and returns every regular file, sorted by
/// relative path.
pub fn scan_files(root: &Path) -> std::io::Result<Vec<ScannedFile>> {
    let mut files = Vec::new();
    walk_dir(root, root, &mut files)?;
    files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(files)
}

fn walk_dir(root: &Path, current: &Path, files: &mut Vec<ScannedFile>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(current)? {
        let entry = entry?;
        let path = entry.path();
        let metadata = entry.metadata()?;

        if metadata.is_dir() {
            walk_dir(root, &path, files)?;
        } else if metadata.is_file() {
            let rel_path = path.strip_prefix(root).map_err(std::io::Error::other)?;
            files.push(ScannedFile {
                relative_path: rel_path.to_string_lossy().replace('\\', "/"),
                size: metadata.len(),
                path,
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn scan_walks_nested_dirs_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("frames").join("hi")).unwrap();
        fs::write(root.join("scene.blend"), b"BLEND").unwrap();
        fs::write(root.join("frames").join("0001.exr"), b"EXR1").unwrap();
        fs::write(root.join("frames").join("hi").join("0001.exr"), b"EXR-HI").unwrap();

        let files = scan_files(root).unwrap();
        let rel: Vec<&str> = files.iter().map(|f| f.relative_path.as_str()).collect();
        assert_eq!(rel, ["frames/0001.exr", "frames/hi/0001.exr", "scene.blend"]);
        assert_eq!(files[1].size, 6);
        assert_eq!(files[2].path, root.join("scene.blend"));
    }

    #[test]
    fn scan_empty_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(scan_files(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn scan_missing_dir_errors() {
        assert!(scan_files(Path::new("/nonexistent/mcbridge-scan")).is_err());
    }
}
