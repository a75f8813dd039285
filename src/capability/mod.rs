//! External collaborator capabilities.
//!
//! The engine consumes several opaque analysis services (text extraction,
//! text/image classification, LLM generation) but implements none of them.
//! Each is a trait with an HTTP client implementation; tests substitute
//! in-process mocks.

mod classifier;
mod extractor;
mod generation;
mod image;

use thiserror::Error;

pub use classifier::{TextClassification, TextClassifier, TextClassifierClient};
pub use extractor::{DocumentExtractor, DocumentStructure, ExtractorClient, TextBlock};
pub use generation::{GenerationClient, GenerationConfig, Generator};
pub use image::{ImageAnalyzer, ImageAnalyzerClient};

/// Errors from collaborator services.
#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Service error: {0}")]
    Service(String),

    #[error("Response parse error: {0}")]
    Parse(String),

    #[error("Service is disabled")]
    Disabled,
}
