pub mod reconciler;

pub use reconciler::{apply, find_orphans, CleanupReport};
