use camino::Utf8PathBuf;
use codeloom_workspace::WorkspaceError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PatchError {
    /// The plan document is structurally invalid. Nothing in a malformed
    /// plan is interpreted, not even well-formed leading instructions.
    #[error("invalid patch plan at {path}: {message}")]
    Plan { path: Utf8PathBuf, message: String },

    #[error("patch plan not found at {path}")]
    MissingPlan { path: Utf8PathBuf },

    #[error(transparent)]
    Workspace(#[from] WorkspaceError),
}
