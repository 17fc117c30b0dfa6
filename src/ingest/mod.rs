pub mod builder;
pub mod hasher;
pub mod scanner;

pub use builder::{build, BuildMode, BuildReport, IndexBuilder};
