//! The patcher as a builder stage inside a pipeline run.

use std::collections::BTreeMap;
use std::sync::Arc;

use camino::Utf8PathBuf;
use codeloom_patch::{base_path_for, PatcherStage, PLAN_PATH};
use codeloom_pipeline::{
    ArtifactDraft, ArtifactMeta, DraftPatch, FragmentNext, FragmentStage, LayoutDescriptor,
    Pipeline, PipelineRunOptions, RunContext, RunPhase,
};
use codeloom_types::patch::{PatchInstruction, PatchPlan};
use codeloom_workspace::Workspace;
use pretty_assertions::assert_eq;
use tempfile::TempDir;

struct SeedStage;

impl FragmentStage for SeedStage {
    fn apply(
        &self,
        ctx: &RunContext,
        mut draft: ArtifactDraft,
        next: FragmentNext<'_>,
    ) -> anyhow::Result<ArtifactDraft> {
        draft.assign(DraftPatch {
            meta: Some(ArtifactMeta {
                namespace: ctx.namespace().to_string(),
                origin: ctx.origin().to_string(),
                source_path: ctx.source_path().clone(),
            }),
            policies: Some(BTreeMap::new()),
            layout: Some(LayoutDescriptor::default()),
        });
        next.proceed(draft)
    }
}

fn options(phase: RunPhase) -> PipelineRunOptions {
    PipelineRunOptions {
        phase,
        config: serde_json::json!({}),
        namespace: "acme".into(),
        origin: "acme.loom.json".into(),
        source_path: "fixtures/acme.loom.json".into(),
    }
}

fn pipeline_with_patcher(root: Utf8PathBuf) -> Pipeline {
    let mut pipeline = Pipeline::new();
    pipeline
        .use_fragment(
            codeloom_types::StageDescriptor::fragment("seed"),
            Arc::new(SeedStage),
        )
        .expect("register seed");
    pipeline
        .use_builder(
            PatcherStage::descriptor(),
            Arc::new(PatcherStage::new(Workspace::new(root))),
        )
        .expect("register patcher");
    pipeline
}

#[test]
fn apply_run_executes_the_staged_plan() {
    let dir = TempDir::new().expect("tempdir");
    let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf8 tempdir");
    let ws = Workspace::new(root.clone());
    ws.write("generated/hello.php", b"<?php hello();\n").expect("seed");
    ws.write_json(
        PLAN_PATH,
        &PatchPlan::new(vec![PatchInstruction::Write {
            file: "src/hello.php".into(),
            base: base_path_for("src/hello.php".as_ref()),
            incoming: "generated/hello.php".into(),
            description: None,
        }]),
        true,
    )
    .expect("stage plan");

    let mut pipeline = pipeline_with_patcher(root);
    pipeline.run(&options(RunPhase::Apply)).expect("run");

    assert_eq!(
        ws.read_text("src/hello.php").expect("read").as_deref(),
        Some("<?php hello();\n")
    );
}

#[test]
fn generate_run_leaves_the_plan_untouched() {
    let dir = TempDir::new().expect("tempdir");
    let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf8 tempdir");
    let ws = Workspace::new(root.clone());
    ws.write("generated/hello.php", b"<?php hello();\n").expect("seed");
    ws.write_json(
        PLAN_PATH,
        &PatchPlan::new(vec![PatchInstruction::Write {
            file: "src/hello.php".into(),
            base: base_path_for("src/hello.php".as_ref()),
            incoming: "generated/hello.php".into(),
            description: None,
        }]),
        true,
    )
    .expect("stage plan");

    let mut pipeline = pipeline_with_patcher(root);
    pipeline.run(&options(RunPhase::Generate)).expect("run");

    assert!(!ws.exists("src/hello.php"), "generate runs never patch");
}

#[test]
fn missing_plan_is_not_fatal_for_the_stage() {
    let dir = TempDir::new().expect("tempdir");
    let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf8 tempdir");

    let mut pipeline = pipeline_with_patcher(root);
    pipeline.run(&options(RunPhase::Apply)).expect("run succeeds without a plan");
}
