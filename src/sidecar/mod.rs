//! Sidecar files: one metadata document stored next to each media file.
//!
//! The sidecar is the source of truth for metadata. The on-disk format sits
//! behind [`SidecarCodec`], so the builder and query code only ever see
//! [`MetadataRecord`] values.

pub mod xmp;

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::error::{Error, Result};
use crate::metadata::MetadataRecord;

pub use xmp::XmpCodec;

/// A decoded sidecar: the indexed fields plus anything else the file
/// carried, keyed by qualified name. `extra` is for display only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SidecarDocument {
    pub record: MetadataRecord,
    pub extra: BTreeMap<String, String>,
}

/// Why a sidecar could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct DecodeError(pub String);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// No sidecar next to the media file.
    Absent,
    /// A sidecar exists but does not decode.
    Malformed(String),
    Found(SidecarDocument),
}

impl ReadOutcome {
    pub fn into_record(self) -> Option<MetadataRecord> {
        match self {
            ReadOutcome::Found(doc) => Some(doc.record),
            _ => None,
        }
    }
}

pub trait SidecarCodec: Send + Sync {
    /// File suffix appended to the media file name, without the dot.
    fn suffix(&self) -> &str;

    fn decode(&self, bytes: &[u8]) -> std::result::Result<SidecarDocument, DecodeError>;

    fn encode(&self, record: &MetadataRecord) -> io::Result<Vec<u8>>;

    /// `photo.jpg` -> `photo.jpg.xmp`
    fn sidecar_path(&self, media: &Path) -> PathBuf {
        let mut name = OsString::from(media.as_os_str());
        name.push(".");
        name.push(self.suffix());
        PathBuf::from(name)
    }

    /// Inverse of [`sidecar_path`](Self::sidecar_path). `None` when `sidecar`
    /// does not carry the suffix.
    fn media_path(&self, sidecar: &Path) -> Option<PathBuf> {
        let name = sidecar.file_name()?.to_str()?;
        let stem = name.strip_suffix(self.suffix())?.strip_suffix('.')?;
        if stem.is_empty() {
            return None;
        }
        Some(sidecar.with_file_name(stem))
    }

    fn is_sidecar(&self, path: &Path) -> bool {
        self.media_path(path).is_some()
    }

    fn decode_outcome(&self, bytes: &[u8]) -> ReadOutcome {
        match self.decode(bytes) {
            Ok(doc) => ReadOutcome::Found(doc),
            Err(DecodeError(reason)) => ReadOutcome::Malformed(reason),
        }
    }

    /// Reads the sidecar belonging to `media`. I/O failures other than a
    /// missing file are errors; a file that fails to decode is
    /// [`ReadOutcome::Malformed`].
    fn read(&self, media: &Path) -> Result<ReadOutcome> {
        let path = self.sidecar_path(media);
        match fs::read(&path) {
            Ok(bytes) => Ok(self.decode_outcome(&bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(ReadOutcome::Absent),
            Err(e) => Err(Error::io(path, e)),
        }
    }

    /// Replaces the sidecar of `media` atomically and returns its path.
    fn write(&self, media: &Path, record: &MetadataRecord) -> Result<PathBuf> {
        let path = self.sidecar_path(media);
        let bytes = self.encode(record).map_err(|e| Error::io(&path, e))?;
        write_atomic(&path, &bytes)?;
        debug!("Wrote sidecar {:?}", path);
        Ok(path)
    }
}

/// Writes to a hidden temp file in the target directory, syncs it, then
/// renames it over `path`. Readers see the old file or the new one.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let file_name = path
        .file_name()
        .ok_or_else(|| Error::io(path, io::Error::new(io::ErrorKind::InvalidInput, "no file name")))?;
    let mut tmp_name = OsString::from(".");
    tmp_name.push(file_name);
    tmp_name.push(format!(".tmp-{}", std::process::id()));
    let tmp_path = path.with_file_name(tmp_name);

    let result = (|| -> io::Result<()> {
        let mut file = File::create(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp_path, path)
    })();

    if let Err(e) = result {
        let _ = fs::remove_file(&tmp_path);
        return Err(Error::io(path, e));
    }
    Ok(())
}
