//! Settings error types.
//!
//! File errors carry the path that failed; validation errors carry the
//! dotted key of the offending setting (`upload.max_file_size`).

use std::path::PathBuf;

use thiserror::Error;

/// Why a settings file or value was rejected.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file exists but could not be read.
    #[error("cannot read settings file {}: {source}", path.display())]
    Read {
        /// File that was being read.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// The settings file is not JSON.
    #[error("settings file {} is not valid JSON: {source}", path.display())]
    Parse {
        /// File that was being parsed.
        path: PathBuf,
        /// Parser failure with line and column.
        #[source]
        source: serde_json::Error,
    },

    /// The merged JSON does not fit the settings schema (wrong type for a key).
    #[error("settings do not match the expected shape: {0}")]
    Schema(#[from] serde_json::Error),

    /// A setting is out of range.
    #[error("invalid setting `{key}`: {reason}")]
    Invalid {
        /// Dotted path of the setting.
        key: &'static str,
        /// What is wrong with it.
        reason: String,
    },

    /// A device name other than `auto`, `cpu` or `cuda`.
    #[error("unknown device `{0}` (expected auto, cpu or cuda)")]
    UnknownDevice(String),
}

impl SettingsError {
    /// Shorthand for [`SettingsError::Invalid`].
    pub fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }

    /// Dotted key of the rejected setting, when the error is about one.
    pub fn key(&self) -> Option<&'static str> {
        match self {
            Self::Invalid { key, .. } => Some(key),
            Self::UnknownDevice(_) => Some("model.device"),
            _ => None,
        }
    }
}

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;
