//! Builder-stage adapter so a pipeline run can apply a staged plan.

use codeloom_pipeline::{Artifact, BuilderNext, BuilderStage, OutputSink, RunContext, RunPhase};
use codeloom_types::StageDescriptor;
use codeloom_workspace::Workspace;

use crate::apply::apply_patch_plan;
use crate::error::PatchError;

/// Runs patch application during the builder phase of an `apply` run.
///
/// The patcher works through its workspace rather than the output sink: its
/// effect is reconciling the live tree with previously generated content,
/// not emitting new files. An absent plan is not an error; the stage logs
/// and passes through, since a generate-only run never stages one.
pub struct PatcherStage {
    workspace: Workspace,
}

impl PatcherStage {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }

    /// Runs late so every content-producing builder has gone first.
    pub fn descriptor() -> StageDescriptor {
        StageDescriptor::builder("patcher").with_priority(-100)
    }
}

impl BuilderStage for PatcherStage {
    fn apply(
        &self,
        ctx: &RunContext,
        _artifact: &Artifact,
        output: &mut OutputSink,
        next: BuilderNext<'_>,
    ) -> anyhow::Result<()> {
        if ctx.phase() != RunPhase::Apply {
            return next.proceed(output);
        }
        match apply_patch_plan(&self.workspace) {
            Ok(manifest) => {
                tracing::debug!(records = manifest.records.len(), "patcher stage done");
            }
            Err(PatchError::MissingPlan { path }) => {
                tracing::debug!(%path, "no staged plan, patcher skipped");
            }
            Err(err) => return Err(err.into()),
        }
        next.proceed(output)
    }
}
