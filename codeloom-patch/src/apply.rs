//! Plan execution: per-instruction three-way application against the live
//! tree, with base-snapshot refresh and a persisted manifest.

use codeloom_types::patch::{
    skip_reasons, PatchInstruction, PatchManifest, PatchPlan, PatchRecord, PatchStatus, PlanRef,
};
use codeloom_types::schema;
use codeloom_workspace::Workspace;
use sha2::{Digest, Sha256};

use crate::error::PatchError;
use crate::{BASE_DIR, MANIFEST_PATH, PLAN_PATH};

/// Loads `plan.json` strictly. Structural problems are fatal before any
/// instruction is looked at.
pub fn load_plan(workspace: &Workspace) -> Result<(PatchPlan, PlanRef), PatchError> {
    let Some(bytes) = workspace.read(PLAN_PATH)? else {
        return Err(PatchError::MissingPlan {
            path: PLAN_PATH.into(),
        });
    };
    let plan: PatchPlan = serde_json::from_slice(&bytes).map_err(|err| PatchError::Plan {
        path: PLAN_PATH.into(),
        message: err.to_string(),
    })?;
    if plan.schema != schema::PATCH_PLAN_V1 {
        return Err(PatchError::Plan {
            path: PLAN_PATH.into(),
            message: format!("unsupported schema `{}`", plan.schema),
        });
    }
    let digest = Sha256::digest(&bytes);
    let plan_ref = PlanRef {
        path: PLAN_PATH.into(),
        sha256: Some(hex::encode(digest)),
    };
    Ok((plan, plan_ref))
}

/// Applies the staged plan to the workspace and persists the manifest.
///
/// Individual merge conflicts are recorded, never fatal: conflict markers
/// land in the target file and the run continues with the next instruction.
/// The base snapshot for a file is refreshed to the incoming content on
/// every clean application, so a rerun of the same plan degrades to no-ops.
pub fn apply_patch_plan(workspace: &Workspace) -> Result<PatchManifest, PatchError> {
    let (plan, plan_ref) = load_plan(workspace)?;
    let mut manifest = PatchManifest::new(plan_ref);

    for instruction in &plan.instructions {
        let record = match instruction {
            PatchInstruction::Write {
                file,
                base,
                incoming,
                description,
            } => apply_write(workspace, file, base, incoming, description.clone())?,
            PatchInstruction::Delete { file, description } => {
                apply_delete(workspace, file, description.clone())?
            }
        };
        manifest.record(record);
    }

    workspace.write_json(MANIFEST_PATH, &manifest, true)?;
    tracing::info!(
        applied = manifest.summary.applied,
        conflicts = manifest.summary.conflicts,
        skipped = manifest.summary.skipped,
        "patch plan applied"
    );
    Ok(manifest)
}

fn apply_write(
    workspace: &Workspace,
    file: &camino::Utf8Path,
    base: &camino::Utf8Path,
    incoming: &camino::Utf8Path,
    description: Option<String>,
) -> Result<PatchRecord, PatchError> {
    let Some(incoming_text) = workspace.read_text(incoming)? else {
        tracing::warn!(file = %file, incoming = %incoming, "incoming content missing");
        return Ok(skipped(file, skip_reasons::MISSING_INCOMING, description));
    };

    let live = workspace.read_text(file)?;
    if live.as_deref() == Some(incoming_text.as_str()) {
        return Ok(skipped(file, skip_reasons::NO_OP, description));
    }

    let base_text = workspace.read_text(base)?;
    let fast_forward = match &live {
        None => true,
        Some(live) => base_text.as_deref() == Some(live.as_str()),
    };
    if fast_forward {
        workspace.write(file, incoming_text.as_bytes())?;
        workspace.write(base, incoming_text.as_bytes())?;
        return Ok(applied(file, description));
    }

    // Live has local edits: reconcile them with the incoming content.
    let live = live.unwrap_or_default();
    let ancestor = base_text.unwrap_or_default();
    let merged = workspace.three_way_merge(&ancestor, &live, &incoming_text);
    workspace.write(file, merged.content.as_bytes())?;
    if merged.conflict {
        tracing::warn!(file = %file, "merge conflict, markers written");
        return Ok(PatchRecord {
            file: file.to_owned(),
            status: PatchStatus::Conflict,
            reason: None,
            description,
        });
    }
    workspace.write(base, incoming_text.as_bytes())?;
    Ok(applied(file, description))
}

fn apply_delete(
    workspace: &Workspace,
    file: &camino::Utf8Path,
    description: Option<String>,
) -> Result<PatchRecord, PatchError> {
    if !workspace.exists(file) {
        return Ok(skipped(file, skip_reasons::EMPTY_TARGET, description));
    }
    workspace.remove(file)?;
    Ok(applied(file, description))
}

fn applied(file: &camino::Utf8Path, description: Option<String>) -> PatchRecord {
    PatchRecord {
        file: file.to_owned(),
        status: PatchStatus::Applied,
        reason: None,
        description,
    }
}

fn skipped(file: &camino::Utf8Path, reason: &str, description: Option<String>) -> PatchRecord {
    PatchRecord {
        file: file.to_owned(),
        status: PatchStatus::Skipped,
        reason: Some(reason.to_string()),
        description,
    }
}

/// Conventional base-snapshot location for a target file.
pub fn base_path_for(file: &camino::Utf8Path) -> camino::Utf8PathBuf {
    camino::Utf8PathBuf::from(BASE_DIR).join(file)
}
