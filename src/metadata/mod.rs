pub mod record;
pub mod screen;

pub use record::{normalize_tag, MetadataRecord};
pub use screen::recommend;
