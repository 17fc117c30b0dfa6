pub mod query;
pub mod repo;
pub mod schema;
pub mod stats;

pub use query::{Filters, Sampling};
pub use repo::{IndexEntry, IndexStore};
pub use stats::{CategoryCount, IndexStats};
