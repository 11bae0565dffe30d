pub mod config;
pub mod error;
pub mod storage;

pub use config::ExtractorConfig;
pub use error::{ExtractError, RecognitionError};
pub use storage::{unique_subdir, ArtifactStore, Area};
