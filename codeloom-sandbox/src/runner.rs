//! Sequential adapter-extension runner.
//!
//! Extensions are third-party callbacks an adapter hands the core. Each one
//! receives a private clone of the document graph and a scope that buffers
//! file writes into a per-extension staging directory. Nothing reaches the
//! live output tree until [`ExtensionRun::commit`], which re-validates every
//! pending file against the canonical output root and writes all of them or
//! none.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use codeloom_types::PendingExtensionFile;
use fs_err as fs;
use tempfile::TempDir;

use crate::doc::{clone_node, Node};
use crate::error::SandboxError;

pub type ApplyFn = Box<dyn Fn(&mut ExtensionScope) -> anyhow::Result<()>>;

/// What an adapter factory hands back for one extension. `apply` is optional
/// here so the factory boundary can be validated rather than trusted.
pub struct ExtensionHandle {
    pub name: String,
    pub apply: Option<ApplyFn>,
}

/// The surface an extension callback works against.
pub struct ExtensionScope {
    artifact: Node,
    replacement: Option<Node>,
    staging_dir: Utf8PathBuf,
    output_root: Utf8PathBuf,
    pending: Vec<PendingExtensionFile>,
}

impl ExtensionScope {
    /// The extension's private copy of the document graph. Mutating it is
    /// allowed and feeds into the next extension's input.
    pub fn artifact(&self) -> &Node {
        &self.artifact
    }

    /// Replaces the whole artifact for downstream extensions.
    pub fn update_artifact(&mut self, artifact: Node) {
        self.replacement = Some(artifact);
    }

    /// Buffers one output file. `relative` is resolved under the output
    /// root at commit time; absolute paths and parent traversal are rejected
    /// here, before any symlink resolution.
    pub fn queue_file(
        &mut self,
        relative: impl AsRef<Utf8Path>,
        contents: &[u8],
    ) -> Result<(), SandboxError> {
        let relative = relative.as_ref();
        let escapes = relative.is_absolute()
            || relative
                .components()
                .any(|part| matches!(part, Utf8Component::ParentDir));
        if escapes {
            return Err(SandboxError::Containment {
                message: format!(
                    "Adapter extensions must write inside {}. Received: {relative}",
                    self.output_root
                ),
            });
        }

        let staged = self.staging_dir.join(relative);
        if let Some(parent) = staged.parent() {
            fs::create_dir_all(parent).map_err(|err| SandboxError::io(parent, err))?;
        }
        fs::write(&staged, contents).map_err(|err| SandboxError::io(&staged, err))?;
        self.pending.push(PendingExtensionFile {
            target: self.output_root.join(relative),
            staged,
        });
        Ok(())
    }
}

/// Outcome of running the extension chain. Pending files sit in staging
/// until the caller decides.
#[derive(Debug)]
pub struct ExtensionRun {
    artifact: Node,
    pending: Vec<PendingExtensionFile>,
    staging: TempDir,
    output_root: Utf8PathBuf,
}

/// Runs every extension in order over a clone of `artifact`.
///
/// All handles are validated before the first callback executes: a missing
/// handle, a blank name, or a missing callback aborts the batch with the
/// factory-contract message. A callback error or panic is normalized into
/// [`SandboxError::ExtensionFailed`] and the staging tree is discarded.
pub fn run_adapter_extensions(
    extensions: Vec<Option<ExtensionHandle>>,
    artifact: &Node,
    output_root: &Utf8Path,
) -> Result<ExtensionRun, SandboxError> {
    let mut callbacks: Vec<(String, ApplyFn)> = Vec::with_capacity(extensions.len());
    for extension in extensions {
        let Some(handle) = extension else {
            return Err(SandboxError::invalid(
                "Invalid adapter extension returned from factory.",
            ));
        };
        if handle.name.trim().is_empty() {
            return Err(SandboxError::invalid(
                "Invalid adapter extension returned from factory. \
                 Extensions must declare a non-empty name.",
            ));
        }
        let Some(apply) = handle.apply else {
            return Err(SandboxError::invalid(
                "Invalid adapter extension returned from factory. \
                 Extensions must define an apply() function.",
            ));
        };
        callbacks.push((handle.name, apply));
    }

    let staging = TempDir::new().map_err(|err| SandboxError::io(".", err))?;
    let staging_root = utf8_path(staging.path())?;

    let mut current = Rc::clone(artifact);
    let mut pending = Vec::new();
    for (index, (name, apply)) in callbacks.iter().enumerate() {
        let files_dir = staging_root.join(format!("extension-{index}")).join("files");
        fs::create_dir_all(&files_dir).map_err(|err| SandboxError::io(&files_dir, err))?;

        let mut scope = ExtensionScope {
            artifact: clone_node(&current),
            replacement: None,
            staging_dir: files_dir,
            output_root: output_root.to_owned(),
            pending: Vec::new(),
        };
        tracing::debug!(extension = %name, "running adapter extension");
        let outcome = catch_unwind(AssertUnwindSafe(|| apply(&mut scope)));
        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(format!("{err:#}")),
            Err(payload) => Some(panic_message(payload)),
        };
        if let Some(message) = failure {
            tracing::error!(extension = %name, %message, "adapter extension failed");
            if let Err(err) = staging.close() {
                tracing::warn!(error = %err, "failed to remove staging directory");
            }
            return Err(SandboxError::ExtensionFailed {
                name: name.clone(),
                message,
            });
        }
        pending.append(&mut scope.pending);
        current = scope.replacement.take().unwrap_or(scope.artifact);
    }

    Ok(ExtensionRun {
        artifact: current,
        pending,
        staging,
        output_root: output_root.to_owned(),
    })
}

impl ExtensionRun {
    /// The final document graph after every extension ran.
    pub fn artifact(&self) -> &Node {
        &self.artifact
    }

    pub fn pending(&self) -> &[PendingExtensionFile] {
        &self.pending
    }

    /// Validates every pending file against the canonical output root, then
    /// copies all of them into the live tree. A single violation aborts the
    /// whole batch before anything is written.
    pub fn commit(self) -> Result<Vec<Utf8PathBuf>, SandboxError> {
        fs::create_dir_all(&self.output_root)
            .map_err(|err| SandboxError::io(&self.output_root, err))?;
        let canonical_root = canonicalize_utf8(&self.output_root)?;

        let mut resolved_targets = Vec::with_capacity(self.pending.len());
        for file in &self.pending {
            let resolved = resolve_real(&file.target)?;
            let contained = resolved.starts_with(&canonical_root) && resolved != canonical_root;
            if !contained {
                return Err(SandboxError::Containment {
                    message: format!(
                        "Adapter extensions must not escape {canonical_root}. \
                         Received: {resolved}"
                    ),
                });
            }
            resolved_targets.push(resolved);
        }

        let mut written = Vec::with_capacity(self.pending.len());
        for (file, resolved) in self.pending.iter().zip(&resolved_targets) {
            if let Some(parent) = resolved.parent() {
                fs::create_dir_all(parent).map_err(|err| SandboxError::io(parent, err))?;
            }
            fs::copy(&file.staged, resolved).map_err(|err| SandboxError::io(resolved, err))?;
            written.push(file.target.clone());
        }
        tracing::info!(files = written.len(), root = %canonical_root, "extension output committed");

        if let Err(err) = self.staging.close() {
            tracing::warn!(error = %err, "failed to remove staging directory");
        }
        Ok(written)
    }

    /// Discards every pending file without touching the live tree.
    pub fn rollback(self) {
        if let Err(err) = self.staging.close() {
            tracing::warn!(error = %err, "failed to remove staging directory");
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "extension raised a non-string panic value".to_string()
    }
}

/// Resolves the real path a write would land at: the deepest existing
/// ancestor is canonicalized (following symlinks), then the not-yet-existing
/// remainder is appended.
fn resolve_real(path: &Utf8Path) -> Result<Utf8PathBuf, SandboxError> {
    let mut base = path.to_owned();
    let mut tail: Vec<String> = Vec::new();
    loop {
        match fs::canonicalize(base.as_std_path()) {
            Ok(real) => {
                let mut resolved = utf8_path(&real)?;
                for part in tail.iter().rev() {
                    resolved.push(part);
                }
                return Ok(resolved);
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                match (base.file_name(), base.parent()) {
                    (Some(name), Some(parent)) => {
                        tail.push(name.to_string());
                        base = parent.to_owned();
                    }
                    _ => return Err(SandboxError::io(path, err)),
                }
            }
            Err(err) => return Err(SandboxError::io(path, err)),
        }
    }
}

fn canonicalize_utf8(path: &Utf8Path) -> Result<Utf8PathBuf, SandboxError> {
    let real = fs::canonicalize(path.as_std_path()).map_err(|err| SandboxError::io(path, err))?;
    utf8_path(&real)
}

fn utf8_path(path: &std::path::Path) -> Result<Utf8PathBuf, SandboxError> {
    Utf8PathBuf::from_path_buf(path.to_path_buf())
        .map_err(|raw| SandboxError::NonUtf8Path { path: raw })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc::{from_json, node, to_json, Value};
    use pretty_assertions::assert_eq;

    fn handle(name: &str, apply: ApplyFn) -> Option<ExtensionHandle> {
        Some(ExtensionHandle {
            name: name.to_string(),
            apply: Some(apply),
        })
    }

    fn root() -> (TempDir, Utf8PathBuf) {
        let dir = TempDir::new().expect("tempdir");
        let out = Utf8PathBuf::from_path_buf(dir.path().join("out")).expect("utf8 tempdir");
        (dir, out)
    }

    #[test]
    fn missing_handle_fails_with_factory_message() {
        let (_dir, out) = root();
        let artifact = from_json(&serde_json::json!({}));
        let err = run_adapter_extensions(vec![None], &artifact, &out).expect_err("invalid");
        assert_eq!(
            err.to_string(),
            "Invalid adapter extension returned from factory."
        );
    }

    #[test]
    fn blank_name_fails_with_factory_message() {
        let (_dir, out) = root();
        let artifact = from_json(&serde_json::json!({}));
        let err = run_adapter_extensions(
            vec![handle("  ", Box::new(|_| Ok(())))],
            &artifact,
            &out,
        )
        .expect_err("invalid");
        assert!(err.to_string().contains("non-empty name"), "{err}");
    }

    #[test]
    fn missing_apply_fails_with_factory_message() {
        let (_dir, out) = root();
        let artifact = from_json(&serde_json::json!({}));
        let err = run_adapter_extensions(
            vec![Some(ExtensionHandle {
                name: "good-name".into(),
                apply: None,
            })],
            &artifact,
            &out,
        )
        .expect_err("invalid");
        assert!(err.to_string().contains("define an apply() function."), "{err}");
    }

    #[test]
    fn validation_runs_before_any_extension_executes() {
        let (dir, out) = root();
        let artifact = from_json(&serde_json::json!({}));
        let marker = Utf8PathBuf::from_path_buf(dir.path().join("ran")).expect("utf8");
        let witness = marker.clone();
        let err = run_adapter_extensions(
            vec![
                handle(
                    "eager",
                    Box::new(move |_| {
                        fs::write(&witness, b"ran")?;
                        Ok(())
                    }),
                ),
                None,
            ],
            &artifact,
            &out,
        )
        .expect_err("invalid batch");
        assert!(matches!(err, SandboxError::InvalidExtension { .. }));
        assert!(!marker.as_std_path().exists(), "first extension must not run");
    }

    #[test]
    fn replaced_artifact_feeds_the_next_extension() {
        let (_dir, out) = root();
        let artifact = from_json(&serde_json::json!({ "version": 1.0 }));
        let run = run_adapter_extensions(
            vec![
                handle(
                    "bump",
                    Box::new(|scope| {
                        scope.update_artifact(from_json(&serde_json::json!({ "version": 2.0 })));
                        Ok(())
                    }),
                ),
                handle(
                    "tag",
                    Box::new(|scope| {
                        let doc = scope.artifact();
                        if let Value::Map(entries) = &mut *doc.borrow_mut() {
                            entries.insert("tagged".into(), node(Value::Bool(true)));
                        }
                        Ok(())
                    }),
                ),
            ],
            &artifact,
            &out,
        )
        .expect("chain runs");
        assert_eq!(
            to_json(run.artifact()),
            serde_json::json!({ "version": 2.0, "tagged": true })
        );
        // The caller's graph is untouched.
        assert_eq!(to_json(&artifact), serde_json::json!({ "version": 1.0 }));
        run.rollback();
    }

    #[test]
    fn queue_file_rejects_traversal_and_absolute_paths() {
        let (_dir, out) = root();
        let artifact = from_json(&serde_json::json!({}));
        let err = run_adapter_extensions(
            vec![handle(
                "sneaky",
                Box::new(|scope| {
                    scope.queue_file("../outside.txt", b"nope")?;
                    Ok(())
                }),
            )],
            &artifact,
            &out,
        )
        .expect_err("traversal rejected");
        assert!(err.to_string().contains("must write inside"), "{err}");

        let err = run_adapter_extensions(
            vec![handle(
                "sneaky-abs",
                Box::new(|scope| {
                    scope.queue_file("/etc/owned.txt", b"nope")?;
                    Ok(())
                }),
            )],
            &artifact,
            &out,
        )
        .expect_err("absolute rejected");
        assert!(err.to_string().contains("must write inside"), "{err}");
    }

    #[test]
    fn bare_string_panic_is_normalized() {
        let (_dir, out) = root();
        let artifact = from_json(&serde_json::json!({}));
        let err = run_adapter_extensions(
            vec![handle("fragile", Box::new(|_| panic!("template missing")))],
            &artifact,
            &out,
        )
        .expect_err("panic surfaces as error");
        match err {
            SandboxError::ExtensionFailed { name, message } => {
                assert_eq!(name, "fragile");
                assert!(message.contains("template missing"), "{message}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn callback_error_is_attributed_to_the_extension() {
        let (_dir, out) = root();
        let artifact = from_json(&serde_json::json!({}));
        let err = run_adapter_extensions(
            vec![handle("flaky", Box::new(|_| anyhow::bail!("schema drift")))],
            &artifact,
            &out,
        )
        .expect_err("error surfaces");
        let rendered = err.to_string();
        assert!(rendered.contains("flaky"), "{rendered}");
        assert!(rendered.contains("schema drift"), "{rendered}");
    }
}
