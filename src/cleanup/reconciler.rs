use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{info, warn};

use crate::error::Result;
use crate::ingest::scanner::{resolve_root, scan_files};
use crate::sidecar::SidecarCodec;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub dry_run: bool,
    /// Deleted sidecars, or the ones that would be deleted on a dry run.
    pub deleted: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
    /// Bytes freed (or freeable) by the deleted sidecars.
    pub bytes: u64,
}

/// Sidecars under `root` whose media file does not exist, sorted by path.
/// Works on the filesystem alone; the index is not consulted.
pub fn find_orphans<C: SidecarCodec>(codec: &C, root: &Path, recursive: bool) -> Result<Vec<PathBuf>> {
    let root = resolve_root(root)?;
    let sidecars = scan_files(&root, recursive, |p| codec.is_sidecar(p))?;

    let orphans: Vec<PathBuf> = sidecars
        .into_iter()
        .filter(|sidecar| is_orphan(codec, sidecar))
        .collect();

    info!("Found {} orphaned sidecar(s) under {:?}", orphans.len(), root);
    Ok(orphans)
}

/// A sidecar is orphaned only when its media file is known to be absent.
/// If existence cannot be determined the sidecar is kept.
fn is_orphan<C: SidecarCodec>(codec: &C, sidecar: &Path) -> bool {
    let Some(media) = codec.media_path(sidecar) else {
        return false;
    };
    match media.try_exists() {
        Ok(exists) => !exists,
        Err(e) => {
            warn!("Keeping {:?}: cannot check {:?}: {}", sidecar, media, e);
            false
        }
    }
}

/// Deletes `orphans` unless `dry_run`. A failed deletion is recorded and the
/// batch continues.
pub fn apply(orphans: &[PathBuf], dry_run: bool) -> CleanupReport {
    let mut report = CleanupReport {
        dry_run,
        ..Default::default()
    };

    for sidecar in orphans {
        let size = fs::metadata(sidecar).map(|m| m.len()).unwrap_or(0);
        if dry_run {
            info!("Would delete {:?}", sidecar);
        } else if let Err(e) = fs::remove_file(sidecar) {
            warn!("Failed to delete {:?}: {}", sidecar, e);
            report.failed.push((sidecar.clone(), e.to_string()));
            continue;
        } else {
            info!("Deleted {:?}", sidecar);
        }
        report.bytes += size;
        report.deleted.push(sidecar.clone());
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::MetadataRecord;
    use crate::sidecar::XmpCodec;

    #[test]
    fn test_orphans_found_and_removed() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let kept = root.join("kept.jpg");
        fs::write(&kept, b"img").unwrap();
        XmpCodec.write(&kept, &MetadataRecord::new())?;
        let orphan = XmpCodec.write(&root.join("orphan.jpg"), &MetadataRecord::new())?;

        let found = find_orphans(&XmpCodec, &root, false)?;
        assert_eq!(found, vec![orphan.clone()]);

        let preview = apply(&found, true);
        assert!(preview.dry_run);
        assert_eq!(preview.deleted, vec![orphan.clone()]);
        assert!(preview.bytes > 0);
        assert!(orphan.exists());

        let report = apply(&found, false);
        assert_eq!(report.deleted, vec![orphan.clone()]);
        assert!(report.failed.is_empty());
        assert!(!orphan.exists());
        assert!(XmpCodec.sidecar_path(&kept).exists());
        Ok(())
    }

    #[test]
    fn test_recursion_controls_scope() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        fs::create_dir_all(root.join("old")).unwrap();
        let nested = XmpCodec.write(&root.join("old").join("gone.png"), &MetadataRecord::new())?;

        assert!(find_orphans(&XmpCodec, &root, false)?.is_empty());
        assert_eq!(find_orphans(&XmpCodec, &root, true)?, vec![nested]);
        Ok(())
    }

    #[test]
    fn test_hidden_orphans_are_found() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let hidden = XmpCodec.write(&root.join(".x.jpg"), &MetadataRecord::new())?;

        assert_eq!(find_orphans(&XmpCodec, &root, false)?, vec![hidden]);
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_unverifiable_media_keeps_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let plain = dir.path().join("plain.txt");
        fs::write(&plain, b"x").unwrap();

        // The media path runs through a regular file, so the existence check errors.
        assert!(!is_orphan(&XmpCodec, &plain.join("a.jpg.xmp")));
        assert!(is_orphan(&XmpCodec, &dir.path().join("gone.jpg.xmp")));
        assert!(!is_orphan(&XmpCodec, &plain));
    }

    #[test]
    fn test_failed_deletions_are_collected() {
        let dir = tempfile::tempdir().unwrap();
        let vanished = dir.path().join("vanished.jpg.xmp");
        let present = dir.path().join("present.jpg.xmp");
        fs::write(&present, b"<x/>").unwrap();

        let report = apply(&[vanished.clone(), present.clone()], false);
        assert_eq!(report.deleted, vec![present]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, vanished);
    }
}
