pub mod logger;

pub use logger::{RunLogger, RunRecord};
