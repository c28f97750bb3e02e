use thiserror::Error;

/// Main error type for the PO validator
#[derive(Error, Debug)]
pub enum ValidatorError {
    #[error("PDF processing failed: {message}")]
    PdfProcessing {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("File I/O error: {path}")]
    FileIO {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Vision model request failed: {message}")]
    VisionModel {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("PDF markup failed: {message}")]
    Markup {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Report output failed: {message}")]
    Report { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("General error: {0}")]
    General(#[from] anyhow::Error),
}

impl ValidatorError {
    /// Create a PDF processing error with context
    pub fn pdf_processing(message: impl Into<String>) -> Self {
        Self::PdfProcessing {
            message: message.into(),
            source: None,
        }
    }

    /// Create a PDF processing error with source
    pub fn pdf_processing_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::PdfProcessing {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a file I/O error
    pub fn file_io(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::FileIO {
            path: path.into(),
            source,
        }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn vision(message: impl Into<String>) -> Self {
        Self::VisionModel {
            message: message.into(),
            source: None,
        }
    }

    pub fn vision_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::VisionModel {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn markup(message: impl Into<String>) -> Self {
        Self::Markup {
            message: message.into(),
            source: None,
        }
    }

    pub fn markup_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Markup {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn report(message: impl Into<String>) -> Self {
        Self::Report {
            message: message.into(),
        }
    }

    /// Check if error is recoverable (the pipeline can carry on without the failed step)
    pub fn is_recoverable(&self) -> bool {
        match self {
            ValidatorError::VisionModel { .. } => true,
            ValidatorError::PdfProcessing { .. } => true,
            ValidatorError::Markup { .. } => true,
            ValidatorError::Report { .. } => true,
            ValidatorError::Configuration { .. } => false,
            ValidatorError::FileIO { .. } => false,
            _ => true,
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            ValidatorError::PdfProcessing { .. } => {
                "📄 Couldn't read this PDF. It might be encrypted or corrupted.".to_string()
            }
            ValidatorError::FileIO { path, .. } => {
                format!("📁 File access error for {}. Check permissions and disk space.", path)
            }
            ValidatorError::Configuration { message } => {
                format!("⚙️  Configuration problem: {}", message)
            }
            ValidatorError::VisionModel { .. } => {
                "🔭 Vision fallback unavailable. Using heuristic extraction only.".to_string()
            }
            ValidatorError::Markup { .. } => {
                "🖍️  Validation finished but the annotated PDF could not be written.".to_string()
            }
            _ => "❌ Something went wrong. Check the logs for details.".to_string(),
        }
    }
}

/// Result type alias for convenience
pub type ValidatorResult<T> = Result<T, ValidatorError>;

/// Wrap a PDF library failure as a processing error with context
pub trait ErrorContext<T> {
    fn with_context(self, context: &str) -> ValidatorResult<T>;
}

impl<T, E> ErrorContext<T> for Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn with_context(self, context: &str) -> ValidatorResult<T> {
        self.map_err(|e| ValidatorError::pdf_processing_with_source(context, e))
    }
}
