//! Multipart file intake: filename, extension and size checks.

use std::path::Path;

use axum::extract::multipart::Field;
use muse_settings::{UploadSettings, normalize_extension};

use crate::error::ApiError;

/// One validated upload held in memory.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    /// Client supplied filename.
    pub filename: String,
    /// Lowercased extension with a leading dot, e.g. `".mp3"`.
    pub extension: String,
    /// Raw file contents.
    pub bytes: Vec<u8>,
}

/// Why a file field could not be taken.
#[derive(Debug)]
pub enum UploadError {
    /// The file failed validation; the rest of the request is still readable.
    Rejected(ApiError),
    /// The multipart stream itself broke; the request must be abandoned.
    Stream(ApiError),
}

impl UploadError {
    /// The underlying API error.
    pub fn into_api_error(self) -> ApiError {
        match self {
            Self::Rejected(e) | Self::Stream(e) => e,
        }
    }
}

/// Lowercased extension of `filename`, empty if it has none.
pub fn extension_of(filename: &str) -> String {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(normalize_extension)
        .unwrap_or_default()
}

/// 400 for a missing field or empty filename.
pub fn no_file() -> ApiError {
    ApiError::bad_request("No file provided")
}

/// 400 for an extension outside the allow-list.
pub fn unsupported_type(extension: &str, upload: &UploadSettings) -> ApiError {
    ApiError::bad_request(format!(
        "File type {extension} not supported. Allowed: [{}]",
        upload.allowed_extensions.join(", ")
    ))
}

/// 413 for a file over `max_file_size`.
pub fn too_large(upload: &UploadSettings) -> ApiError {
    ApiError::payload_too_large(format!(
        "File too large. Max size: {}MB",
        upload.max_file_size_mb()
    ))
}

/// Check the filename and extension of a field before reading its body.
pub fn check_name(filename: Option<&str>, upload: &UploadSettings) -> Result<(String, String), ApiError> {
    let filename = match filename {
        Some(name) if !name.trim().is_empty() => name.to_string(),
        _ => return Err(no_file()),
    };
    let extension = extension_of(&filename);
    if !upload.is_allowed(&extension) {
        return Err(unsupported_type(&extension, upload));
    }
    Ok((filename, extension))
}

/// Validate and read one file field.
///
/// The body is read chunk by chunk and rejected as soon as it passes
/// `max_file_size`; the remainder of the field is skipped by the caller's
/// next `next_field` call.
pub async fn read_file(mut field: Field<'_>, upload: &UploadSettings) -> Result<UploadedFile, UploadError> {
    let (filename, extension) =
        check_name(field.file_name(), upload).map_err(UploadError::Rejected)?;

    let limit = usize::try_from(upload.max_file_size).unwrap_or(usize::MAX);
    let mut bytes = Vec::new();
    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| UploadError::Stream(ApiError::from_multipart(&e)))?
    {
        if bytes.len() + chunk.len() > limit {
            return Err(UploadError::Rejected(too_large(upload)));
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(UploadedFile {
        filename,
        extension,
        bytes,
    })
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;

    use super::*;

    fn upload() -> UploadSettings {
        UploadSettings::default()
    }

    #[test]
    fn extension_is_lowercased() {
        assert_eq!(extension_of("Song.MP3"), ".mp3");
        assert_eq!(extension_of("a.b.flac"), ".flac");
        assert_eq!(extension_of("README"), "");
    }

    #[test]
    fn missing_or_blank_name_is_no_file() {
        for name in [None, Some(""), Some("   ")] {
            let err = check_name(name, &upload()).unwrap_err();
            assert_eq!(err.status, StatusCode::BAD_REQUEST);
            assert_eq!(err.message, "No file provided");
        }
    }

    #[test]
    fn unsupported_extension_lists_allowed() {
        let err = check_name(Some("notes.txt"), &upload()).unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert!(err.message.starts_with("File type .txt not supported. Allowed: ["));
        assert!(err.message.contains(".wav"));
    }

    #[test]
    fn allowed_extension_case_insensitive() {
        let (name, ext) = check_name(Some("Track.WAV"), &upload()).unwrap();
        assert_eq!(name, "Track.WAV");
        assert_eq!(ext, ".wav");
    }

    #[test]
    fn too_large_reports_megabytes() {
        let mut settings = upload();
        settings.max_file_size = 50 * 1024 * 1024;
        let err = too_large(&settings);
        assert_eq!(err.status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(err.message, "File too large. Max size: 50MB");
    }
}
