//! Extension, MIME type and magic-byte checks for uploaded media.

use std::io::{Read, Seek, SeekFrom};

use uuid::Uuid;

use super::errors::{FileValidationError, FileValidationResult};

/// Extensions accepted for upload
pub const ALLOWED_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "mp4", "mov", "webm"];

/// Accepted MIME types and the extensions each may carry
pub const ALLOWED_MIME_TYPES: &[(&str, &[&str])] = &[
    ("image/png", &["png"]),
    ("image/jpeg", &["jpg", "jpeg"]),
    ("image/gif", &["gif"]),
    ("video/mp4", &["mp4"]),
    ("video/quicktime", &["mov"]),
    ("video/webm", &["webm"]),
];

/// Leading bytes inspected by [`validate_upload`]
pub const HEADER_LEN: usize = 20;

const MAX_FILENAME_LEN: usize = 255;
const MIN_HEADER_LEN: usize = 4;
const DANGEROUS_PATTERNS: &[&str] = &["..", "/", "\\", ":", "*", "?", "\"", "<", ">", "|"];
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "webm"];

const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n";
const JPEG_MAGIC: &[u8] = b"\xFF\xD8\xFF";
const GIF_MAGIC: &[u8] = b"GIF8";
const WEBM_MAGIC: &[u8] = b"\x1A\x45\xDF\xA3";
const FTYP: &[u8] = b"ftyp";
const MP4_BRANDS: &[&[u8]] = &[b"isom", b"iso2", b"mp41", b"mp42", b"avc1", b"M4V "];

/// An upload that passed every check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedFile {
    /// Confirmed extension; use this, not the client's name, when storing
    pub extension: String,
    pub mime_type: String,
    pub sanitized_name: String,
}

/// Container format recognised from leading bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectedFormat {
    Png,
    Jpeg,
    Gif,
    WebM,
    Mp4,
    QuickTime,
    /// `ftyp` box with a brand that doesn't settle mp4 vs mov
    IsoMedia,
}

impl DetectedFormat {
    /// Extensions this format may legitimately carry
    pub fn extensions(&self) -> &'static [&'static str] {
        match self {
            DetectedFormat::Png => &["png"],
            DetectedFormat::Jpeg => &["jpg", "jpeg"],
            DetectedFormat::Gif => &["gif"],
            DetectedFormat::WebM => &["webm"],
            DetectedFormat::Mp4 => &["mp4"],
            DetectedFormat::QuickTime => &["mov"],
            DetectedFormat::IsoMedia => &["mp4", "mov"],
        }
    }

    pub fn covers(&self, extension: &str) -> bool {
        self.extensions().contains(&extension)
    }

    /// Preferred extension when reporting what was found
    pub fn primary_extension(&self) -> &'static str {
        self.extensions()[0]
    }
}

/// Reduce a client-supplied filename to a safe base name.
///
/// # Errors
///
/// * `FileValidationError::InvalidFilename` - empty, traversal attempt, too
///   long, or containing a reserved character
pub fn sanitize_filename(filename: &str) -> FileValidationResult<String> {
    if filename.is_empty() {
        return Err(FileValidationError::InvalidFilename(
            "Filename cannot be empty".to_string(),
        ));
    }

    if filename.split(['/', '\\']).any(|part| part == "..") {
        return Err(FileValidationError::InvalidFilename(
            "Filename contains a path traversal".to_string(),
        ));
    }

    let base = filename.rsplit(['/', '\\']).next().unwrap_or_default();

    let cleaned: String = base
        .chars()
        .filter(|&c| c != '\0')
        .filter(|&c| c as u32 >= 32 || matches!(c, ' ' | '-' | '_' | '.'))
        .collect();

    if cleaned.is_empty() {
        return Err(FileValidationError::InvalidFilename(
            "Filename cannot be empty".to_string(),
        ));
    }

    if cleaned.chars().count() > MAX_FILENAME_LEN {
        return Err(FileValidationError::InvalidFilename(
            "Filename too long".to_string(),
        ));
    }

    if let Some(pattern) = DANGEROUS_PATTERNS.iter().find(|p| cleaned.contains(**p)) {
        return Err(FileValidationError::InvalidFilename(format!(
            "Filename contains invalid characters: {pattern}"
        )));
    }

    Ok(cleaned)
}

/// Lower-cased extension after the last dot, if it is an accepted one
pub fn file_extension(filename: &str) -> Option<String> {
    let (_, ext) = filename.rsplit_once('.')?;
    let ext = ext.trim().to_ascii_lowercase();

    if !ext.is_empty()
        && ext.chars().all(|c| c.is_ascii_alphanumeric())
        && ALLOWED_EXTENSIONS.contains(&ext.as_str())
    {
        Some(ext)
    } else {
        None
    }
}

/// MIME type implied by an accepted extension
pub fn mime_for_extension(extension: &str) -> Option<&'static str> {
    ALLOWED_MIME_TYPES
        .iter()
        .find(|(_, exts)| exts.contains(&extension))
        .map(|(mime, _)| *mime)
}

/// Check a declared content type against the filename's extension.
///
/// Parameters such as `; charset=` are ignored. With no declared type, the
/// type implied by the extension is used.
///
/// # Returns
///
/// * `Some(mime)` - normalised MIME type agreeing with the extension
pub fn verify_mime_type(content_type: Option<&str>, filename: &str) -> Option<String> {
    let ext = file_extension(filename)?;

    let mime = match content_type.map(str::trim).filter(|c| !c.is_empty()) {
        Some(declared) => declared
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase(),
        None => mime_for_extension(&ext)?.to_string(),
    };

    ALLOWED_MIME_TYPES
        .iter()
        .any(|(allowed, exts)| *allowed == mime && exts.contains(&ext.as_str()))
        .then_some(mime)
}

/// Identify a container format from its leading bytes
pub fn detect_signature(header: &[u8]) -> Option<DetectedFormat> {
    if header.starts_with(PNG_MAGIC) {
        return Some(DetectedFormat::Png);
    }
    if header.starts_with(JPEG_MAGIC) {
        return Some(DetectedFormat::Jpeg);
    }
    if header.starts_with(GIF_MAGIC) {
        return Some(DetectedFormat::Gif);
    }
    if header.starts_with(WEBM_MAGIC) {
        return Some(DetectedFormat::WebM);
    }

    if header.get(4..8) == Some(FTYP) {
        let brand = header.get(8..12).unwrap_or_default();
        if brand.starts_with(b"qt") {
            return Some(DetectedFormat::QuickTime);
        }
        if MP4_BRANDS.contains(&brand) || brand.starts_with(b"M4V") {
            return Some(DetectedFormat::Mp4);
        }
        return Some(DetectedFormat::IsoMedia);
    }

    None
}

/// Name, extension and MIME type that passed the checks made before any
/// content is looked at
struct ClaimedFile {
    sanitized_name: String,
    extension: String,
    mime_type: String,
}

fn check_claims(
    filename: &str,
    content_type: Option<&str>,
) -> FileValidationResult<ClaimedFile> {
    let sanitized_name = sanitize_filename(filename)?;

    let extension = file_extension(&sanitized_name).ok_or(FileValidationError::InvalidExtension)?;

    let mime_type = verify_mime_type(content_type, &sanitized_name).ok_or_else(|| {
        FileValidationError::MimeMismatch {
            extension: extension.clone(),
        }
    })?;

    Ok(ClaimedFile {
        sanitized_name,
        extension,
        mime_type,
    })
}

fn check_content(claimed: ClaimedFile, content: &[u8]) -> FileValidationResult<ValidatedFile> {
    let ClaimedFile {
        sanitized_name,
        extension,
        mime_type,
    } = claimed;

    let header = &content[..content.len().min(HEADER_LEN)];
    let min_len = if VIDEO_EXTENSIONS.contains(&extension.as_str()) {
        HEADER_LEN
    } else {
        MIN_HEADER_LEN
    };
    if header.len() < min_len {
        return Err(FileValidationError::TooSmall);
    }

    match detect_signature(header) {
        Some(format) if format.covers(&extension) => Ok(ValidatedFile {
            extension,
            mime_type,
            sanitized_name,
        }),
        Some(format) => Err(FileValidationError::SignatureMismatch {
            expected: extension,
            detected: format.primary_extension().to_string(),
        }),
        None => Err(FileValidationError::UnknownSignature {
            expected: extension,
        }),
    }
}

/// Validate an upload held in memory.
///
/// Only the first [`HEADER_LEN`] bytes of `content` are inspected.
///
/// # Errors
///
/// Fails on the first check that does not pass, in order: filename,
/// extension, MIME type, size, signature.
pub fn validate_bytes(
    filename: &str,
    content_type: Option<&str>,
    content: &[u8],
) -> FileValidationResult<ValidatedFile> {
    check_content(check_claims(filename, content_type)?, content)
}

/// Validate an upload from a seekable stream.
///
/// The name and MIME checks run before the stream is touched. The header is
/// then read from the start of the stream, which is left at the position it
/// had on entry.
pub fn validate_upload<R: Read + Seek>(
    filename: &str,
    content_type: Option<&str>,
    reader: &mut R,
) -> FileValidationResult<ValidatedFile> {
    let claimed = check_claims(filename, content_type)?;

    let position = reader.stream_position()?;
    reader.seek(SeekFrom::Start(0))?;

    let mut header = Vec::with_capacity(HEADER_LEN);
    let read = reader.by_ref().take(HEADER_LEN as u64).read_to_end(&mut header);

    reader.seek(SeekFrom::Start(position))?;
    read?;

    check_content(claimed, &header)
}

/// Fresh storage name for a validated upload: a random UUID plus the
/// confirmed extension
pub fn storage_name(file: &ValidatedFile) -> String {
    format!("{}.{}", Uuid::new_v4(), file.extension)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn png() -> Vec<u8> {
        let mut bytes = PNG_MAGIC.to_vec();
        bytes.extend_from_slice(&[0u8; 24]);
        bytes
    }

    fn ftyp(brand: &[u8; 4]) -> Vec<u8> {
        let mut bytes = vec![0, 0, 0, 0x20];
        bytes.extend_from_slice(FTYP);
        bytes.extend_from_slice(brand);
        bytes.extend_from_slice(&[0u8; 12]);
        bytes
    }

    #[test]
    fn test_png_validates() {
        let file = validate_bytes("x.png", Some("image/png"), &png()).unwrap();
        assert_eq!(file.extension, "png");
        assert_eq!(file.mime_type, "image/png");
        assert_eq!(file.sanitized_name, "x.png");
    }

    #[test]
    fn test_png_named_jpg_is_signature_mismatch() {
        let err = validate_bytes("x.jpg", None, &png()).unwrap_err();
        assert_eq!(err.reason(), "signature_mismatch");
        assert!(matches!(
            err,
            FileValidationError::SignatureMismatch { ref expected, ref detected }
                if expected == "jpg" && detected == "png"
        ));
    }

    #[test]
    fn test_traversal_rejected_at_sanitation() {
        let err = validate_bytes("../../etc/passwd", None, &png()).unwrap_err();
        assert_eq!(err.reason(), "invalid_filename");
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize_filename("photos/cat.png").unwrap(), "cat.png");
        assert_eq!(sanitize_filename("C:\\Users\\me\\cat.png").unwrap(), "cat.png");
        assert_eq!(sanitize_filename("ca\0t.png").unwrap(), "cat.png");
        assert_eq!(sanitize_filename("ca\x07t.png").unwrap(), "cat.png");
        assert_eq!(sanitize_filename("my cat-1_a.png").unwrap(), "my cat-1_a.png");

        assert!(sanitize_filename("").is_err());
        assert!(sanitize_filename("dir/").is_err());
        assert!(sanitize_filename("a..png").is_err());
        assert!(sanitize_filename("what?.png").is_err());
        assert!(sanitize_filename("pipe|.png").is_err());
        assert!(sanitize_filename(&format!("{}.png", "a".repeat(252))).is_err());
        assert!(sanitize_filename(&format!("{}.png", "a".repeat(251))).is_ok());
    }

    #[test]
    fn test_extension() {
        assert_eq!(file_extension("a.PNG").as_deref(), Some("png"));
        assert_eq!(file_extension("archive.tar.gif").as_deref(), Some("gif"));
        assert_eq!(file_extension("noext"), None);
        assert_eq!(file_extension("script.exe"), None);
        assert_eq!(file_extension("trailing."), None);
    }

    #[test]
    fn test_mime() {
        assert_eq!(
            verify_mime_type(Some("IMAGE/JPEG; charset=binary"), "a.jpeg").as_deref(),
            Some("image/jpeg")
        );
        assert_eq!(
            verify_mime_type(None, "a.mov").as_deref(),
            Some("video/quicktime")
        );
        assert_eq!(verify_mime_type(Some("image/png"), "a.jpg"), None);
        assert_eq!(verify_mime_type(Some("text/html"), "a.png"), None);

        let err = validate_bytes("x.png", Some("image/gif"), &png()).unwrap_err();
        assert_eq!(err.reason(), "mime_mismatch");
    }

    #[test]
    fn test_too_small() {
        assert_eq!(
            validate_bytes("x.png", None, &PNG_MAGIC[..3]).unwrap_err().reason(),
            "too_small"
        );
        // Video candidates need the full header
        assert_eq!(
            validate_bytes("x.mp4", None, &ftyp(b"isom")[..12]).unwrap_err().reason(),
            "too_small"
        );
    }

    #[test]
    fn test_unknown_signature() {
        let err = validate_bytes("x.gif", None, b"not really an image").unwrap_err();
        assert_eq!(err.reason(), "unknown_signature");
    }

    #[test]
    fn test_iso_brands() {
        assert!(validate_bytes("v.mp4", None, &ftyp(b"isom")).is_ok());
        assert!(validate_bytes("v.mp4", None, &ftyp(b"mp42")).is_ok());
        assert!(validate_bytes("v.mov", None, &ftyp(b"qt  ")).is_ok());

        let err = validate_bytes("v.mov", None, &ftyp(b"mp42")).unwrap_err();
        assert_eq!(err.reason(), "signature_mismatch");
        let err = validate_bytes("v.mp4", None, &ftyp(b"qt  ")).unwrap_err();
        assert_eq!(err.reason(), "signature_mismatch");

        // Unrecognised brand is accepted for either container
        assert!(validate_bytes("v.mp4", None, &ftyp(b"dash")).is_ok());
        assert!(validate_bytes("v.mov", None, &ftyp(b"dash")).is_ok());
        assert_eq!(
            detect_signature(&ftyp(b"dash")).map(|f| f.primary_extension()),
            Some("mp4")
        );
    }

    #[test]
    fn test_webm_and_gif() {
        let mut webm = WEBM_MAGIC.to_vec();
        webm.extend_from_slice(&[0u8; 16]);
        assert!(validate_bytes("clip.webm", Some("video/webm"), &webm).is_ok());
        assert!(validate_bytes("anim.gif", None, b"GIF89a\x01\x00").is_ok());
    }

    #[test]
    fn test_stream_position_restored() {
        let mut cursor = Cursor::new(png());
        cursor.set_position(5);

        let file = validate_upload("x.png", Some("image/png"), &mut cursor).unwrap();
        assert_eq!(file.extension, "png");
        assert_eq!(cursor.position(), 5);
    }

    /// Reader whose every operation fails
    struct BrokenStream;

    impl Read for BrokenStream {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Err(std::io::Error::other("disk gone"))
        }
    }

    impl Seek for BrokenStream {
        fn seek(&mut self, _pos: SeekFrom) -> std::io::Result<u64> {
            Err(std::io::Error::other("disk gone"))
        }
    }

    #[test]
    fn test_name_checks_run_before_stream_is_read() {
        let err = validate_upload("../../etc/passwd", None, &mut BrokenStream).unwrap_err();
        assert_eq!(err.reason(), "invalid_filename");

        let err = validate_upload("notes.txt", None, &mut BrokenStream).unwrap_err();
        assert_eq!(err.reason(), "invalid_extension");

        let err = validate_upload("a.png", Some("video/mp4"), &mut BrokenStream).unwrap_err();
        assert_eq!(err.reason(), "mime_mismatch");

        let err = validate_upload("a.png", Some("image/png"), &mut BrokenStream).unwrap_err();
        assert_eq!(err.reason(), "io");
    }

    #[test]
    fn test_storage_name_uses_confirmed_extension() {
        let file = validate_bytes("Holiday.JPG", None, b"\xFF\xD8\xFF\xE0rest").unwrap();
        let name = storage_name(&file);
        assert!(name.ends_with(".jpg"));
        assert_eq!(name.len(), 36 + 4);
        assert_ne!(name, storage_name(&file));
    }
}
