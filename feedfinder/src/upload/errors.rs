//! Error types for upload validation

use thiserror::Error;

use super::validator::ALLOWED_EXTENSIONS;

/// Result type for upload validation
pub type FileValidationResult<T> = Result<T, FileValidationError>;

/// Why an upload was refused
#[derive(Debug, Error)]
pub enum FileValidationError {
    /// Filename empty, too long, or containing path or shell metacharacters
    #[error("Invalid filename: {0}")]
    InvalidFilename(String),

    /// Extension missing or not an accepted media type
    #[error("Invalid file extension. Allowed: {}", allowed_list())]
    InvalidExtension,

    /// Declared content type unknown or disagreeing with the extension
    #[error(
        "MIME type mismatch. File extension suggests {extension}, but Content-Type is invalid or doesn't match"
    )]
    MimeMismatch { extension: String },

    /// Not enough leading bytes to identify the format
    #[error("File is too small or corrupted")]
    TooSmall,

    /// Content is a known format, but not the one the name claims
    #[error("File signature mismatch. Expected {expected}, but detected {detected}")]
    SignatureMismatch { expected: String, detected: String },

    /// Content matches no known format
    #[error(
        "File signature verification failed. File content does not match the declared file type ({expected})"
    )]
    UnknownSignature { expected: String },

    /// Reading the upload failed
    #[error("Error reading file: {0}")]
    Io(#[from] std::io::Error),
}

impl FileValidationError {
    /// Stable code for API responses
    pub fn code(&self) -> &'static str {
        "FILE_VALIDATION_FAILED"
    }

    /// Machine-readable sub-reason
    pub fn reason(&self) -> &'static str {
        match self {
            FileValidationError::InvalidFilename(_) => "invalid_filename",
            FileValidationError::InvalidExtension => "invalid_extension",
            FileValidationError::MimeMismatch { .. } => "mime_mismatch",
            FileValidationError::TooSmall => "too_small",
            FileValidationError::SignatureMismatch { .. } => "signature_mismatch",
            FileValidationError::UnknownSignature { .. } => "unknown_signature",
            FileValidationError::Io(_) => "io",
        }
    }
}

fn allowed_list() -> String {
    let mut allowed = ALLOWED_EXTENSIONS.to_vec();
    allowed.sort_unstable();
    allowed.join(", ")
}
