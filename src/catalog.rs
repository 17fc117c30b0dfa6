//! The entry points a front end uses: build, query, stats and cleanup on
//! the consumer side, and sidecar writes on the producer side.
//!
//! A [`Catalog`] owns one open [`IndexStore`] and one codec. Open it, pass it
//! around, and [`close`](Catalog::close) it when done.

use std::path::{Path, PathBuf};

use indicatif::ProgressBar;
use rand::Rng;
use tracing::{debug, info};

use crate::cleanup::{self, CleanupReport};
use crate::database::{Filters, IndexEntry, IndexStats, IndexStore, Sampling};
use crate::error::{Error, Result};
use crate::ingest::{BuildMode, BuildReport, IndexBuilder};
use crate::metadata::MetadataRecord;
use crate::sidecar::{ReadOutcome, SidecarCodec, XmpCodec};

pub struct Catalog<C: SidecarCodec = XmpCodec> {
    store: IndexStore,
    codec: C,
}

impl Catalog<XmpCodec> {
    /// Opens (or creates) the index at `db_path` with XMP sidecars.
    pub fn open(db_path: &Path) -> Result<Self> {
        Ok(Self::with_codec(IndexStore::open(db_path)?, XmpCodec))
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::with_codec(IndexStore::open_in_memory()?, XmpCodec))
    }
}

impl<C: SidecarCodec> Catalog<C> {
    pub fn with_codec(store: IndexStore, codec: C) -> Self {
        Self { store, codec }
    }

    pub fn store(&self) -> &IndexStore {
        &self.store
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }

    /// True when the index file was unreadable at open and was set aside.
    /// A rebuild restores it from the sidecars.
    pub fn needs_rebuild(&self) -> bool {
        self.store.recovered_from_corruption()
    }

    pub fn close(self) -> Result<()> {
        self.store.close()
    }

    pub fn build(&mut self, root: &Path, recursive: bool, mode: BuildMode) -> Result<BuildReport> {
        IndexBuilder::new(&mut self.store, &self.codec)
            .recursive(recursive)
            .run(root, mode)
    }

    pub fn build_with_progress(
        &mut self,
        root: &Path,
        recursive: bool,
        mode: BuildMode,
        progress: ProgressBar,
    ) -> Result<BuildReport> {
        IndexBuilder::new(&mut self.store, &self.codec)
            .recursive(recursive)
            .with_progress(progress)
            .run(root, mode)
    }

    pub fn query<R: Rng + ?Sized>(
        &self,
        filters: &Filters,
        sampling: Sampling,
        rng: &mut R,
    ) -> Result<Vec<IndexEntry>> {
        self.store.query(filters, sampling, rng)
    }

    pub fn stats(&self) -> Result<IndexStats> {
        self.store.stats()
    }

    /// Finds sidecars under `root` without a media file and deletes them
    /// unless `dry_run`. The index is left alone; prune takes care of it.
    pub fn cleanup(&self, root: &Path, recursive: bool, dry_run: bool) -> Result<CleanupReport> {
        let orphans = cleanup::find_orphans(&self.codec, root, recursive)?;
        let report = cleanup::apply(&orphans, dry_run);
        info!(
            "Cleanup: {} sidecar(s) {}, {} failed, {} bytes",
            report.deleted.len(),
            if dry_run { "to delete" } else { "deleted" },
            report.failed.len(),
            report.bytes
        );
        Ok(report)
    }

    /// Reads the sidecar of `media`, extra properties included.
    pub fn read_metadata(&self, media: &Path) -> Result<ReadOutcome> {
        self.codec.read(media)
    }

    /// Persists metadata for `media` through its sidecar.
    ///
    /// With `merge`, `record` is applied as a patch over the current sidecar
    /// (see [`MetadataRecord::merge_from`]); a malformed sidecar is reported
    /// rather than overwritten. Without `merge` the sidecar is replaced.
    /// The index picks the change up on the next incremental build.
    pub fn put_metadata(&self, media: &Path, record: &MetadataRecord, merge: bool) -> Result<PathBuf> {
        ensure_media(media)?;

        let merged;
        let to_write = if merge {
            let mut current = self.current_record(media)?;
            current.merge_from(record);
            merged = current;
            &merged
        } else {
            record
        };

        let path = self.codec.write(media, to_write)?;
        debug!("Stored metadata for {:?} (merge: {})", media, merge);
        Ok(path)
    }

    /// Sets width and height (and with them the recommended screen) without
    /// touching any other field.
    pub fn update_dimensions(&self, media: &Path, width: u32, height: u32) -> Result<MetadataRecord> {
        ensure_media(media)?;

        let mut record = self.current_record(media)?;
        record.set_dimensions(width, height)?;
        self.codec.write(media, &record)?;
        debug!(
            "Dimensions of {:?} set to {}x{} ({:?})",
            media,
            width,
            height,
            record.recommended_screen()
        );
        Ok(record)
    }

    fn current_record(&self, media: &Path) -> Result<MetadataRecord> {
        match self.codec.read(media)? {
            ReadOutcome::Found(doc) => Ok(doc.record),
            ReadOutcome::Absent => Ok(MetadataRecord::new()),
            ReadOutcome::Malformed(reason) => Err(Error::MalformedSidecar {
                path: self.codec.sidecar_path(media),
                reason,
            }),
        }
    }
}

fn ensure_media(media: &Path) -> Result<()> {
    if media.is_file() {
        Ok(())
    } else {
        Err(Error::MediaNotFound(media.to_path_buf()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn image(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, b"img").unwrap();
        path
    }

    #[test]
    fn test_put_metadata_requires_media() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::open_in_memory().unwrap();

        let err = catalog
            .put_metadata(&dir.path().join("missing.jpg"), &MetadataRecord::new(), false)
            .unwrap_err();
        assert!(matches!(err, Error::MediaNotFound(_)));
        assert!(!dir.path().join("missing.jpg.xmp").exists());
    }

    #[test]
    fn test_put_metadata_merge_keeps_other_fields() {
        let dir = tempfile::tempdir().unwrap();
        let media = image(dir.path(), "a.jpg");
        let catalog = Catalog::open_in_memory().unwrap();

        let mut first = MetadataRecord::new()
            .with_tags(["calm", "lake"])
            .with_dimensions(1920, 1080)
            .unwrap();
        first.mood = Some("calm".into());
        catalog.put_metadata(&media, &first, false).unwrap();

        let mut patch = MetadataRecord::new();
        patch.style = Some("photograph".into());
        catalog.put_metadata(&media, &patch, true).unwrap();

        let stored = catalog.read_metadata(&media).unwrap().into_record().unwrap();
        assert_eq!(stored.mood.as_deref(), Some("calm"));
        assert_eq!(stored.style.as_deref(), Some("photograph"));
        assert!(stored.has_tag("lake"));
        assert_eq!(stored.recommended_screen(), Some("1080p"));

        catalog.put_metadata(&media, &patch, false).unwrap();
        let replaced = catalog.read_metadata(&media).unwrap().into_record().unwrap();
        assert_eq!(replaced, patch);
    }

    #[test]
    fn test_merge_refuses_malformed_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let media = image(dir.path(), "a.jpg");
        fs::write(dir.path().join("a.jpg.xmp"), b"<not xml").unwrap();
        let catalog = Catalog::open_in_memory().unwrap();

        let err = catalog
            .put_metadata(&media, &MetadataRecord::new(), true)
            .unwrap_err();
        assert!(matches!(err, Error::MalformedSidecar { .. }));
        assert_eq!(fs::read(dir.path().join("a.jpg.xmp")).unwrap(), b"<not xml");
    }

    #[test]
    fn test_update_dimensions_only_touches_size() {
        let dir = tempfile::tempdir().unwrap();
        let media = image(dir.path(), "wide.png");
        let catalog = Catalog::open_in_memory().unwrap();

        let mut record = MetadataRecord::new().with_tags(["city"]);
        record.description = Some("Night skyline".into());
        catalog.put_metadata(&media, &record, false).unwrap();

        let updated = catalog.update_dimensions(&media, 5120, 2160).unwrap();
        assert_eq!(updated.recommended_screen(), Some("Ultrawide 4K"));

        let stored = catalog.read_metadata(&media).unwrap().into_record().unwrap();
        assert_eq!(stored.description.as_deref(), Some("Night skyline"));
        assert!(stored.has_tag("city"));
        assert_eq!(stored.dimensions(), Some((5120, 2160)));

        assert!(matches!(
            catalog.update_dimensions(&media, 0, 2160),
            Err(Error::InvalidDimensions { .. })
        ));
    }

    #[test]
    fn test_update_dimensions_without_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let media = image(dir.path(), "fresh.jpg");
        let catalog = Catalog::open_in_memory().unwrap();

        let record = catalog.update_dimensions(&media, 1000, 1000).unwrap();
        assert_eq!(record.dimensions(), Some((1000, 1000)));
        assert_eq!(record.recommended_screen(), None);
        assert!(dir.path().join("fresh.jpg.xmp").exists());
    }

    #[test]
    fn test_written_metadata_reaches_index_after_build() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let media = image(&root, "a.jpg");
        let mut catalog = Catalog::open_in_memory().unwrap();

        catalog
            .put_metadata(&media, &MetadataRecord::new().with_tags(["forest"]), false)
            .unwrap();
        assert!(catalog.store().is_empty().unwrap());

        let report = catalog.build(&root, true, BuildMode::Incremental).unwrap();
        assert_eq!(report.added, 1);

        let hits = catalog
            .query(
                &Filters::new().with_tag("Forest"),
                Sampling::All,
                &mut rand::thread_rng(),
            )
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].path, media);
    }
}
