//! The draft/artifact split that separates the two pipeline phases.
//!
//! Fragment stages accumulate state on an [`ArtifactDraft`]; finalizing
//! produces the immutable [`Artifact`] that builder stages read.

use std::collections::BTreeMap;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;

use crate::error::PipelineError;

/// Identity of the generation run an artifact belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactMeta {
    pub namespace: String,
    pub origin: String,
    pub source_path: Utf8PathBuf,
}

/// Where generated files land, plus named sub-paths stages agree on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LayoutDescriptor {
    pub output_dir: Utf8PathBuf,
    pub paths: BTreeMap<String, Utf8PathBuf>,
}

impl LayoutDescriptor {
    pub fn resolve(&self, name: &str) -> Option<&Utf8Path> {
        self.paths.get(name).map(Utf8PathBuf::as_path)
    }
}

/// Mutable accumulator threaded through fragment stages.
#[derive(Debug, Default)]
pub struct ArtifactDraft {
    meta: Option<ArtifactMeta>,
    policies: Option<BTreeMap<String, String>>,
    layout: Option<LayoutDescriptor>,
    /// Free-form fragment payloads keyed by fragment name.
    pub fragments: BTreeMap<String, serde_json::Value>,
}

/// Partial update a fragment stage applies to the draft. Unset fields leave
/// the draft untouched.
#[derive(Debug, Default)]
pub struct DraftPatch {
    pub meta: Option<ArtifactMeta>,
    pub policies: Option<BTreeMap<String, String>>,
    pub layout: Option<LayoutDescriptor>,
}

impl ArtifactDraft {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn meta(&self) -> Option<&ArtifactMeta> {
        self.meta.as_ref()
    }

    pub fn policies(&self) -> Option<&BTreeMap<String, String>> {
        self.policies.as_ref()
    }

    pub fn layout(&self) -> Option<&LayoutDescriptor> {
        self.layout.as_ref()
    }

    pub fn assign(&mut self, patch: DraftPatch) {
        if let Some(meta) = patch.meta {
            self.meta = Some(meta);
        }
        if let Some(policies) = patch.policies {
            self.policies = Some(policies);
        }
        if let Some(layout) = patch.layout {
            self.layout = Some(layout);
        }
    }

    pub fn set_fragment(&mut self, name: impl Into<String>, payload: serde_json::Value) {
        self.fragments.insert(name.into(), payload);
    }

    /// Seals the draft. Every required field must have been assigned by some
    /// fragment stage; the error names the first one that was not.
    pub fn finalize(self) -> Result<Artifact, PipelineError> {
        let meta = self
            .meta
            .ok_or_else(|| missing_field("metadata"))?;
        let policies = self
            .policies
            .ok_or_else(|| missing_field("policies"))?;
        let layout = self
            .layout
            .ok_or_else(|| missing_field("layout"))?;
        Ok(Artifact {
            meta,
            policies,
            layout,
            fragments: self.fragments,
        })
    }
}

fn missing_field(field: &str) -> PipelineError {
    PipelineError::validation(format!(
        "artifact draft finalized without required field `{field}`"
    ))
}

/// Immutable product of the fragment phase; builder stages only read it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Artifact {
    pub meta: ArtifactMeta,
    pub policies: BTreeMap<String, String>,
    pub layout: LayoutDescriptor,
    pub fragments: BTreeMap<String, serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn meta() -> ArtifactMeta {
        ArtifactMeta {
            namespace: "acme".into(),
            origin: "acme.loom.json".into(),
            source_path: "fixtures/acme.loom.json".into(),
        }
    }

    #[test]
    fn finalize_requires_each_field_by_name() {
        let draft = ArtifactDraft::new();
        let err = draft.finalize().expect_err("empty draft");
        assert!(err.to_string().contains("`metadata`"), "{err}");

        let mut draft = ArtifactDraft::new();
        draft.assign(DraftPatch {
            meta: Some(meta()),
            ..DraftPatch::default()
        });
        let err = draft.finalize().expect_err("no policies");
        assert!(err.to_string().contains("`policies`"), "{err}");

        let mut draft = ArtifactDraft::new();
        draft.assign(DraftPatch {
            meta: Some(meta()),
            policies: Some(BTreeMap::new()),
            ..DraftPatch::default()
        });
        let err = draft.finalize().expect_err("no layout");
        assert!(err.to_string().contains("`layout`"), "{err}");
    }

    #[test]
    fn assign_is_partial() {
        let mut draft = ArtifactDraft::new();
        draft.assign(DraftPatch {
            meta: Some(meta()),
            ..DraftPatch::default()
        });
        draft.assign(DraftPatch {
            layout: Some(LayoutDescriptor {
                output_dir: "generated".into(),
                paths: BTreeMap::new(),
            }),
            ..DraftPatch::default()
        });
        assert_eq!(draft.meta().map(|m| m.namespace.as_str()), Some("acme"));
        assert_eq!(
            draft.layout().map(|l| l.output_dir.as_str()),
            Some("generated")
        );
    }

    #[test]
    fn finalize_carries_fragments_through() {
        let mut draft = ArtifactDraft::new();
        draft.assign(DraftPatch {
            meta: Some(meta()),
            policies: Some(BTreeMap::new()),
            layout: Some(LayoutDescriptor::default()),
        });
        draft.set_fragment("routes", serde_json::json!(["/health"]));
        let artifact = draft.finalize().expect("complete draft");
        assert_eq!(
            artifact.fragments.get("routes"),
            Some(&serde_json::json!(["/health"]))
        );
    }
}
