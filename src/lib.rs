//! Sidecar-backed metadata index for image collections.
//!
//! Every media file may carry an XMP sidecar (`photo.jpg.xmp`) that holds its
//! description, tags and classification. The sidecars are authoritative; the
//! SQLite index is a disposable projection of them used for filtering and
//! random picks.

pub mod catalog;
pub mod cleanup;
pub mod database;
pub mod error;
pub mod ingest;
pub mod metadata;
pub mod sidecar;
pub mod utils;

pub use catalog::Catalog;
pub use cleanup::CleanupReport;
pub use database::{Filters, IndexEntry, IndexStats, IndexStore, Sampling};
pub use error::{Error, Result};
pub use ingest::{BuildMode, BuildReport};
pub use metadata::{recommend, MetadataRecord};
pub use sidecar::{ReadOutcome, SidecarCodec, SidecarDocument, XmpCodec};
