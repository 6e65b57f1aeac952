pub mod cache;
pub mod compaction;
pub mod config;
pub mod course;
pub mod error;
pub mod generator;
pub mod pregenerate;
pub mod progress;
pub mod tutor;
pub mod utils;

pub use error::{Error, GenerationError, Result};
pub use tutor::{NextUnit, Tutor, UnitSource};
