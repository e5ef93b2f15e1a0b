//! Upload validation.
//!
//! An upload is accepted only when its filename, declared content type and
//! leading bytes all agree on one of the supported media formats (PNG, JPEG,
//! GIF, MP4, QuickTime, WebM). Nothing here touches the filesystem; callers
//! store the file under a name of their choosing with the confirmed
//! extension.

pub mod errors;
pub mod validator;

pub use errors::{FileValidationError, FileValidationResult};
pub use validator::{
    ALLOWED_EXTENSIONS, ALLOWED_MIME_TYPES, DetectedFormat, HEADER_LEN, ValidatedFile,
    detect_signature, file_extension, mime_for_extension, sanitize_filename, storage_name,
    validate_bytes, validate_upload, verify_mime_type,
};
