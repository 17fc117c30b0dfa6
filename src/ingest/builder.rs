use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use indicatif::ProgressBar;
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::database::{IndexEntry, IndexStore};
use crate::error::{Error, Result};
use crate::ingest::hasher;
use crate::ingest::scanner::{resolve_root, scan_media};
use crate::sidecar::{ReadOutcome, SidecarCodec};

const DEFAULT_BATCH_SIZE: usize = 256;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildMode {
    /// Re-read sidecars whose signature changed, add new ones.
    #[default]
    Incremental,
    /// Drop every entry under the root, then index from scratch.
    Rebuild,
    /// Remove entries whose media file is gone. Nothing is re-read.
    Prune,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BuildReport {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
    pub unchanged: usize,
    pub skipped_malformed: usize,
    /// Sidecars that exist but could not be read.
    pub failed: usize,
    /// Media files whose path is not UTF-8 and so cannot be keyed.
    pub skipped_non_utf8: usize,
}

impl fmt::Display for BuildReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "added {}, updated {}, removed {}, unchanged {}, malformed {}, failed {}, non-UTF-8 {}",
            self.added,
            self.updated,
            self.removed,
            self.unchanged,
            self.skipped_malformed,
            self.failed,
            self.skipped_non_utf8
        )
    }
}

/// Result of looking at one media file's sidecar.
enum Scan {
    NoSidecar,
    Unchanged,
    Changed(IndexEntry),
    Malformed(String),
    Failed(Error),
}

/// Synchronises the index with the sidecars under a directory.
///
/// Sidecars are read and hashed on the rayon pool; all writes to the store
/// happen on the calling thread in batched transactions, in path order, so
/// an interrupted build leaves a prefix of the walk behind.
pub struct IndexBuilder<'a, C: SidecarCodec> {
    store: &'a mut IndexStore,
    codec: &'a C,
    recursive: bool,
    batch_size: usize,
    progress: Option<ProgressBar>,
}

impl<'a, C: SidecarCodec> IndexBuilder<'a, C> {
    pub fn new(store: &'a mut IndexStore, codec: &'a C) -> Self {
        Self {
            store,
            codec,
            recursive: true,
            batch_size: DEFAULT_BATCH_SIZE,
            progress: None,
        }
    }

    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Runs one build. A missing or non-directory root fails before the
    /// store is touched.
    pub fn run(&mut self, root: &Path, mode: BuildMode) -> Result<BuildReport> {
        let root = resolve_root(root)?;
        info!("Index {:?} of {:?} (recursive: {})", mode, root, self.recursive);

        let report = match mode {
            BuildMode::Incremental => self.sync(&root, false)?,
            BuildMode::Rebuild => self.sync(&root, true)?,
            BuildMode::Prune => self.prune(&root)?,
        };

        if let Some(pb) = &self.progress {
            pb.finish_and_clear();
        }
        info!("Index {:?} of {:?} finished: {}", mode, root, report);
        Ok(report)
    }

    /// Incremental sync, or with `rebuild` a clear-and-reindex of `root`.
    /// Either way the report compares against the entries present before
    /// the run, so repeating a run without changes adds nothing.
    fn sync(&mut self, root: &Path, rebuild: bool) -> Result<BuildReport> {
        let mut report = BuildReport::default();
        let (media, non_utf8): (Vec<PathBuf>, Vec<PathBuf>) = scan_media(root, self.recursive)?
            .into_iter()
            .partition(|p| p.to_str().is_some());
        for path in &non_utf8 {
            warn!("Skipping {:?}: path is not valid UTF-8", path);
        }
        report.skipped_non_utf8 = non_utf8.len();

        let previous = self.store.signatures_under(root)?;
        if rebuild {
            self.store.clear_under(root)?;
        }
        if let Some(pb) = &self.progress {
            pb.set_length(media.len() as u64);
        }

        let codec = self.codec;
        let skip_unchanged = if rebuild { None } else { Some(&previous) };
        let scans: Vec<(PathBuf, Scan)> = media
            .into_par_iter()
            .map(|path| {
                let known = skip_unchanged.and_then(|known| known.get(&path));
                let scan = inspect(codec, &path, known);
                (path, scan)
            })
            .collect();

        let mut pending: Vec<IndexEntry> = Vec::with_capacity(self.batch_size);
        let mut reindexed: HashSet<PathBuf> = HashSet::new();

        for (path, scan) in scans {
            match scan {
                Scan::NoSidecar => debug!("No sidecar for {:?}", path),
                Scan::Unchanged => report.unchanged += 1,
                Scan::Changed(entry) => {
                    match previous.get(&path) {
                        None => {
                            debug!("Adding {:?}", path);
                            report.added += 1;
                        }
                        Some(sig) if *sig == entry.signature => report.unchanged += 1,
                        Some(_) => {
                            debug!("Updating {:?}", path);
                            report.updated += 1;
                        }
                    }
                    if rebuild {
                        reindexed.insert(path.clone());
                    }
                    pending.push(entry);
                    if pending.len() >= self.batch_size {
                        self.store.upsert_batch(&pending)?;
                        pending.clear();
                    }
                }
                Scan::Malformed(reason) => {
                    warn!("Skipping malformed sidecar for {:?}: {}", path, reason);
                    report.skipped_malformed += 1;
                }
                Scan::Failed(e) => {
                    warn!("Could not read sidecar for {:?}: {}", path, e);
                    report.failed += 1;
                }
            }
            if let Some(pb) = &self.progress {
                pb.inc(1);
            }
        }

        self.store.upsert_batch(&pending)?;

        if rebuild {
            report.removed = previous
                .keys()
                .filter(|p| !reindexed.contains(*p))
                .count();
        }
        Ok(report)
    }

    fn prune(&mut self, root: &Path) -> Result<BuildReport> {
        let recursive = self.recursive;
        let in_scope: Vec<PathBuf> = self
            .store
            .paths_under(root)?
            .into_iter()
            .filter(|p| recursive || p.parent() == Some(root))
            .collect();
        if let Some(pb) = &self.progress {
            pb.set_length(in_scope.len() as u64);
        }

        let mut gone = Vec::new();
        for path in &in_scope {
            match path.try_exists() {
                Ok(true) => {}
                Ok(false) => {
                    debug!("Pruning {:?}", path);
                    gone.push(path.clone());
                }
                // Unknown is not gone.
                Err(e) => warn!("Cannot check {:?}, keeping it: {}", path, e),
            }
            if let Some(pb) = &self.progress {
                pb.inc(1);
            }
        }

        let removed = self.store.remove_batch(&gone)?;
        Ok(BuildReport {
            removed,
            unchanged: in_scope.len() - gone.len(),
            ..Default::default()
        })
    }
}

fn inspect<C: SidecarCodec>(codec: &C, media: &Path, known: Option<&String>) -> Scan {
    let sidecar = codec.sidecar_path(media);
    let bytes = match fs::read(&sidecar) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Scan::NoSidecar,
        Err(e) => return Scan::Failed(Error::io(sidecar, e)),
    };

    let signature = hasher::signature(&bytes);
    if known == Some(&signature) {
        return Scan::Unchanged;
    }

    match codec.decode_outcome(&bytes) {
        ReadOutcome::Found(doc) => Scan::Changed(IndexEntry {
            path: media.to_path_buf(),
            record: doc.record,
            signature,
        }),
        ReadOutcome::Malformed(reason) => Scan::Malformed(reason),
        ReadOutcome::Absent => Scan::NoSidecar,
    }
}

/// Convenience for one-off builds with default settings.
pub fn build<C: SidecarCodec>(
    store: &mut IndexStore,
    codec: &C,
    root: &Path,
    recursive: bool,
    mode: BuildMode,
) -> Result<BuildReport> {
    IndexBuilder::new(store, codec).recursive(recursive).run(root, mode)
}
