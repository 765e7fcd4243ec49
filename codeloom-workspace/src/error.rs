use camino::Utf8PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error("workspace I/O failed for {path}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no open transaction labelled `{label}`")]
    UnknownTransaction { label: String },

    #[error("invalid glob pattern `{pattern}`")]
    Pattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    #[error("failed to serialize JSON for {path}: {message}")]
    Serialize { path: Utf8PathBuf, message: String },

    #[error("non-UTF-8 path under workspace root: {path:?}")]
    NonUtf8Path { path: std::path::PathBuf },
}

impl WorkspaceError {
    pub(crate) fn io(path: Utf8PathBuf, source: std::io::Error) -> Self {
        Self::Io { path, source }
    }
}
