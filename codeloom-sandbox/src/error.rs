use std::path::PathBuf;

use camino::Utf8PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SandboxError {
    /// The adapter's factory returned something that is not a usable
    /// extension. The message carries the exact contract violation.
    #[error("{message}")]
    InvalidExtension { message: String },

    /// A queued file would land outside the output root.
    #[error("{message}")]
    Containment { message: String },

    /// The extension callback returned an error or panicked.
    #[error("adapter extension `{name}` failed: {message}")]
    ExtensionFailed { name: String, message: String },

    #[error("sandbox io failure at {path}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("non-utf8 path in sandbox: {path:?}")]
    NonUtf8Path { path: PathBuf },
}

impl SandboxError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidExtension {
            message: message.into(),
        }
    }

    pub(crate) fn io(path: impl Into<Utf8PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
