// Public module exports for the po-validate binary and embedding workflows
pub mod annotate;
pub mod config;
pub mod error;
pub mod extraction;
pub mod logging;
pub mod matching;
pub mod models;
pub mod pdf;
pub mod pipeline;
pub mod report;

pub use annotate::{AnnotatedPdf, Outcome};
pub use config::ValidatorConfig;
pub use error::{ValidatorError, ValidatorResult};
pub use models::{PoExtraction, PoLineItem, ValidationResult, ValidationStatus, WorkItem};
pub use pipeline::PoValidator;
