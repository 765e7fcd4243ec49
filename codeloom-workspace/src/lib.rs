//! Transactional filesystem workspace.
//!
//! Responsibilities:
//! - Byte-level read/write/exists/glob rooted at a single directory.
//! - Named transactions that buffer writes and deletes until commit.
//! - Dry-run execution that reports a manifest without touching the tree.
//! - A line-region three-way merge primitive (no merge policy of its own).
//!
//! The workspace is single-threaded by design; every phase of a run awaits
//! one task at a time, so transaction buffers never race.

mod error;
mod merge;

pub use error::WorkspaceError;
pub use merge::{Merged, three_way_merge};

use camino::{Utf8Path, Utf8PathBuf};
use codeloom_types::FileManifest;
use fs_err as fs;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::io::Write as _;
use tracing::debug;

#[derive(Debug, Clone)]
enum TxOp {
    Write { path: Utf8PathBuf, bytes: Vec<u8> },
    Delete { path: Utf8PathBuf },
}

impl TxOp {
    fn path(&self) -> &Utf8Path {
        match self {
            TxOp::Write { path, .. } | TxOp::Delete { path } => path,
        }
    }
}

/// A rooted workspace. All paths passed to its methods are relative to the
/// root; buffers are keyed by transaction label.
#[derive(Debug)]
pub struct Workspace {
    root: Utf8PathBuf,
    transactions: RefCell<BTreeMap<String, Vec<TxOp>>>,
}

impl Workspace {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            root: root.into(),
            transactions: RefCell::new(BTreeMap::new()),
        }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    fn abs(&self, rel: &Utf8Path) -> Utf8PathBuf {
        if rel.is_absolute() {
            rel.to_path_buf()
        } else {
            self.root.join(rel)
        }
    }

    /// Read a file's bytes; `Ok(None)` when the file does not exist.
    pub fn read(&self, file: impl AsRef<Utf8Path>) -> Result<Option<Vec<u8>>, WorkspaceError> {
        let abs = self.abs(file.as_ref());
        match fs::read(&abs) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(WorkspaceError::io(abs, err)),
        }
    }

    /// Read a file as UTF-8 text; `Ok(None)` when the file does not exist.
    pub fn read_text(&self, file: impl AsRef<Utf8Path>) -> Result<Option<String>, WorkspaceError> {
        let abs = self.abs(file.as_ref());
        match fs::read_to_string(&abs) {
            Ok(text) => Ok(Some(text)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(WorkspaceError::io(abs, err)),
        }
    }

    /// Write bytes to the live tree, creating parent directories. The write
    /// lands via a temp file in the same directory plus an atomic rename.
    pub fn write(
        &self,
        file: impl AsRef<Utf8Path>,
        bytes: impl AsRef<[u8]>,
    ) -> Result<(), WorkspaceError> {
        let abs = self.abs(file.as_ref());
        write_atomic(&abs, bytes.as_ref())
    }

    /// Serialize `value` as JSON and write it to the live tree.
    pub fn write_json<T: serde::Serialize>(
        &self,
        file: impl AsRef<Utf8Path>,
        value: &T,
        pretty: bool,
    ) -> Result<(), WorkspaceError> {
        let file = file.as_ref();
        let json = if pretty {
            serde_json::to_vec_pretty(value)
        } else {
            serde_json::to_vec(value)
        }
        .map_err(|err| WorkspaceError::Serialize {
            path: file.to_path_buf(),
            message: err.to_string(),
        })?;
        self.write(file, json)
    }

    pub fn exists(&self, target: impl AsRef<Utf8Path>) -> bool {
        self.abs(target.as_ref()).as_std_path().exists()
    }

    /// Remove a file from the live tree; missing targets are a no-op.
    pub fn remove(&self, file: impl AsRef<Utf8Path>) -> Result<(), WorkspaceError> {
        let abs = self.abs(file.as_ref());
        match fs::remove_file(&abs) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(WorkspaceError::io(abs, err)),
        }
    }

    /// Glob relative to the root, returning root-relative matches sorted
    /// lexically for deterministic output.
    pub fn glob(&self, pattern: &str) -> Result<Vec<Utf8PathBuf>, WorkspaceError> {
        let anchored = self.root.join(pattern);
        let paths = glob::glob(anchored.as_str()).map_err(|source| WorkspaceError::Pattern {
            pattern: pattern.to_string(),
            source,
        })?;

        let mut out = Vec::new();
        for entry in paths {
            let path = entry.map_err(|err| WorkspaceError::io(self.root.clone(), err.into_error()))?;
            let utf8 = Utf8PathBuf::from_path_buf(path)
                .map_err(|path| WorkspaceError::NonUtf8Path { path })?;
            let rel = utf8
                .strip_prefix(&self.root)
                .map(Utf8Path::to_path_buf)
                .unwrap_or(utf8);
            out.push(rel);
        }
        out.sort();
        Ok(out)
    }

    /// Three-way merge helper; see [`merge::three_way_merge`]. The workspace
    /// carries no opinion about what the caller does with a conflict.
    pub fn three_way_merge(&self, base: &str, ours: &str, theirs: &str) -> Merged {
        merge::three_way_merge(base, ours, theirs)
    }

    /// Open (or reset) the named transaction buffer.
    pub fn begin(&self, label: impl Into<String>) {
        let label = label.into();
        debug!(label = label.as_str(), "workspace transaction opened");
        self.transactions.borrow_mut().insert(label, Vec::new());
    }

    /// Buffer a write into the named transaction. Re-staging a path replaces
    /// the earlier buffered op in place, keeping its position in the buffer.
    pub fn stage_write(
        &self,
        label: &str,
        file: impl AsRef<Utf8Path>,
        bytes: impl Into<Vec<u8>>,
    ) -> Result<(), WorkspaceError> {
        let op = TxOp::Write {
            path: file.as_ref().to_path_buf(),
            bytes: bytes.into(),
        };
        self.stage(label, op)
    }

    /// Buffer a delete into the named transaction.
    pub fn stage_delete(
        &self,
        label: &str,
        file: impl AsRef<Utf8Path>,
    ) -> Result<(), WorkspaceError> {
        let op = TxOp::Delete {
            path: file.as_ref().to_path_buf(),
        };
        self.stage(label, op)
    }

    fn stage(&self, label: &str, op: TxOp) -> Result<(), WorkspaceError> {
        let mut transactions = self.transactions.borrow_mut();
        let buffer = transactions
            .get_mut(label)
            .ok_or_else(|| WorkspaceError::UnknownTransaction {
                label: label.to_string(),
            })?;
        stage_op(buffer, op);
        Ok(())
    }

    /// Flush the named buffer to the live tree in buffer order and return
    /// the manifest of touched paths.
    ///
    /// Each file write is individually atomic (temp + rename), but a failure
    /// partway through surfaces immediately and does not roll back files
    /// already flushed.
    pub fn commit(&self, label: &str) -> Result<FileManifest, WorkspaceError> {
        let buffer = self.transactions.borrow_mut().remove(label).ok_or_else(|| {
            WorkspaceError::UnknownTransaction {
                label: label.to_string(),
            }
        })?;

        for op in &buffer {
            match op {
                TxOp::Write { path, bytes } => write_atomic(&self.abs(path), bytes)?,
                TxOp::Delete { path } => self.remove(path)?,
            }
        }

        let manifest = manifest_for(&buffer);
        debug!(
            label,
            writes = manifest.writes.len(),
            deletes = manifest.deletes.len(),
            "workspace transaction committed"
        );
        Ok(manifest)
    }

    /// Discard the named buffer unconditionally. Safe to call at any time,
    /// including for labels that were never opened.
    pub fn rollback(&self, label: &str) {
        if self.transactions.borrow_mut().remove(label).is_some() {
            debug!(label, "workspace transaction rolled back");
        }
    }

    /// Run `f` against an ephemeral transaction and report what it would
    /// have touched, without ever writing to the live tree.
    pub fn dry_run<R>(
        &self,
        f: impl FnOnce(&mut DryRunScope) -> anyhow::Result<R>,
    ) -> anyhow::Result<(R, FileManifest)> {
        let mut scope = DryRunScope { ops: Vec::new() };
        let result = f(&mut scope)?;
        Ok((result, manifest_for(&scope.ops)))
    }
}

/// Staging surface handed to [`Workspace::dry_run`] closures.
#[derive(Debug, Default)]
pub struct DryRunScope {
    ops: Vec<TxOp>,
}

impl DryRunScope {
    pub fn stage_write(&mut self, file: impl AsRef<Utf8Path>, bytes: impl Into<Vec<u8>>) {
        stage_op(
            &mut self.ops,
            TxOp::Write {
                path: file.as_ref().to_path_buf(),
                bytes: bytes.into(),
            },
        );
    }

    pub fn stage_delete(&mut self, file: impl AsRef<Utf8Path>) {
        stage_op(
            &mut self.ops,
            TxOp::Delete {
                path: file.as_ref().to_path_buf(),
            },
        );
    }
}

// One buffered op per path; the latest staged op wins its slot.
fn stage_op(buffer: &mut Vec<TxOp>, op: TxOp) {
    if let Some(existing) = buffer.iter_mut().find(|e| e.path() == op.path()) {
        *existing = op;
    } else {
        buffer.push(op);
    }
}

fn manifest_for(ops: &[TxOp]) -> FileManifest {
    let mut manifest = FileManifest::default();
    for op in ops {
        match op {
            TxOp::Write { path, .. } => manifest.writes.push(path.clone()),
            TxOp::Delete { path } => manifest.deletes.push(path.clone()),
        }
    }
    manifest
}

fn write_atomic(abs: &Utf8Path, bytes: &[u8]) -> Result<(), WorkspaceError> {
    let parent = abs
        .parent()
        .ok_or_else(|| WorkspaceError::io(abs.to_path_buf(), rootless_path_error()))?;
    fs::create_dir_all(parent).map_err(|err| WorkspaceError::io(parent.to_path_buf(), err))?;

    let mut temp = tempfile::NamedTempFile::new_in(parent)
        .map_err(|err| WorkspaceError::io(abs.to_path_buf(), err))?;
    temp.write_all(bytes)
        .map_err(|err| WorkspaceError::io(abs.to_path_buf(), err))?;
    temp.persist(abs)
        .map_err(|err| WorkspaceError::io(abs.to_path_buf(), err.error))?;
    Ok(())
}

fn rootless_path_error() -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidInput, "path has no parent directory")
}
