use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

/// Result of a workspace transaction commit, rollback, or dry-run: the
/// workspace-relative paths that were (or would have been) touched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileManifest {
    #[serde(default)]
    pub writes: Vec<Utf8PathBuf>,

    #[serde(default)]
    pub deletes: Vec<Utf8PathBuf>,
}

impl FileManifest {
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty() && self.deletes.is_empty()
    }
}

/// One file queued by a sandboxed extension: where it will land if the
/// batch commits, and where its bytes sit in the private staging area.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingExtensionFile {
    /// Absolute destination under the output root.
    pub target: Utf8PathBuf,
    /// Absolute path inside the staging directory.
    pub staged: Utf8PathBuf,
}
