use std::path::{Path, PathBuf};

use tracing::warn;
use walkdir::{DirEntry, WalkDir};

use crate::error::{Error, Result};

/// Extensions (lowercase, no dot) recognised as media files.
pub const MEDIA_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "webp", "tiff", "tif"];

pub fn is_media_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| MEDIA_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Checks that `root` is an existing directory and returns its canonical form.
pub fn resolve_root(root: &Path) -> Result<PathBuf> {
    let canonical = root.canonicalize().map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => Error::RootNotFound(root.to_path_buf()),
        _ => Error::io(root, e),
    })?;
    if !canonical.is_dir() {
        return Err(Error::NotADirectory(root.to_path_buf()));
    }
    Ok(canonical)
}

/// Lists regular files under `root` accepted by `keep`, sorted by path.
/// Hidden directories below the root are not descended into; hidden files
/// are kept, so `.x.jpg` and its sidecar behave like any other pair.
/// Unreadable entries below the
/// root are logged and skipped; failing to read the root itself is an error.
pub fn scan_files<F>(root: &Path, recursive: bool, keep: F) -> Result<Vec<PathBuf>>
where
    F: Fn(&Path) -> bool,
{
    let mut walker = WalkDir::new(root).follow_links(false);
    if !recursive {
        walker = walker.max_depth(1);
    }

    let mut files = Vec::new();
    for entry in walker
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden_dir(e))
    {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.depth() == 0 => return Err(Error::Walk(e)),
            Err(e) => {
                warn!("Skipping unreadable entry: {}", e);
                continue;
            }
        };
        if entry.file_type().is_file() && keep(entry.path()) {
            files.push(entry.into_path());
        }
    }

    files.sort();
    Ok(files)
}

pub fn scan_media(root: &Path, recursive: bool) -> Result<Vec<PathBuf>> {
    scan_files(root, recursive, is_media_file)
}

fn is_hidden_dir(entry: &DirEntry) -> bool {
    entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .map(|s| s.starts_with('.'))
            .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_media_extension_check() {
        assert!(is_media_file(Path::new("/a/b.JPG")));
        assert!(is_media_file(Path::new("x.webp")));
        assert!(!is_media_file(Path::new("x.jpg.xmp")));
        assert!(!is_media_file(Path::new("README")));
    }

    #[test]
    fn test_scan_respects_recursion_and_hidden() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("nested")).unwrap();
        fs::create_dir_all(root.join(".cache")).unwrap();
        for name in ["b.png", "a.jpg", "notes.txt", ".hidden.jpg", "nested/c.jpeg", ".cache/d.jpg"] {
            fs::write(root.join(name), b"x").unwrap();
        }

        let flat = scan_media(root, false)?;
        assert_eq!(
            flat,
            vec![root.join(".hidden.jpg"), root.join("a.jpg"), root.join("b.png")]
        );

        let deep = scan_media(root, true)?;
        assert_eq!(
            deep,
            vec![
                root.join(".hidden.jpg"),
                root.join("a.jpg"),
                root.join("b.png"),
                root.join("nested/c.jpeg"),
            ]
        );
        Ok(())
    }

    #[test]
    fn test_resolve_root_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(matches!(resolve_root(&missing), Err(Error::RootNotFound(_))));

        let file = dir.path().join("file.jpg");
        fs::write(&file, b"x").unwrap();
        assert!(matches!(resolve_root(&file), Err(Error::NotADirectory(_))));
    }
}
