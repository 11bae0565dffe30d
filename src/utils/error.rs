use crate::models::{FieldLabel, Language};
use thiserror::Error;

/// Request-level failures. Anything that reaches the caller as an `Err` is fatal for the request.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Missing input image: {0}")]
    MissingInput(String),

    #[error("Image processing error: {0}")]
    ImageProcessingError(String),

    #[error("Image preprocessing failed: {cause}, fallback failed: {fallback}")]
    PreprocessingError { cause: String, fallback: String },

    #[error("Missing required detection: {0}")]
    MissingDetection(FieldLabel),

    #[error("Missing required crop: {0}")]
    MissingCrop(FieldLabel),

    #[error("Detection error: {0}")]
    DetectionError(String),

    #[error("Recognizer unavailable: {0}")]
    RecognizerUnavailable(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Pipeline cancelled before {0}")]
    Cancelled(&'static str),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Field-level recognition failures. These never leave the dispatcher.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RecognitionError {
    #[error("Recognizer for '{language}' unavailable: {message}")]
    Unavailable { language: Language, message: String },

    /// The engine could not obtain pixel data for the image (corrupt or incompatible file).
    #[error("No image data: {0}")]
    NoImageData(String),

    #[error("Recognition failed: {0}")]
    Failed(String),
}
