//! Two-phase pipeline executor.
//!
//! A run first threads an [`ArtifactDraft`] through the fragment stages in
//! resolved order, finalizes it into an [`Artifact`], then hands the
//! immutable artifact to the builder stages together with an [`OutputSink`]
//! that only queues writes. Stages chain middleware-style: each receives a
//! consuming continuation and decides whether the rest of its phase runs.

use std::cell::RefCell;
use std::sync::Arc;

use camino::Utf8PathBuf;
use codeloom_types::{Diagnostic, ExecutionStep, StageDescriptor, StageKind};
use serde::Serialize;

use crate::artifact::{Artifact, ArtifactDraft};
use crate::error::PipelineError;
use crate::registry::{Registered, StageRegistry};

/// Which half of the generate/apply lifecycle this run serves. Stages that
/// only matter in one phase consult it and pass the draft through untouched
/// in the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunPhase {
    Generate,
    Apply,
}

/// Inputs for a single pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineRunOptions {
    pub phase: RunPhase,
    /// Adapter-specific configuration, opaque to the executor.
    pub config: serde_json::Value,
    pub namespace: String,
    pub origin: String,
    pub source_path: Utf8PathBuf,
}

/// Per-run state shared with every stage invocation.
pub struct RunContext {
    phase: RunPhase,
    config: serde_json::Value,
    namespace: String,
    origin: String,
    source_path: Utf8PathBuf,
    steps: RefCell<Vec<ExecutionStep>>,
}

impl RunContext {
    fn new(options: &PipelineRunOptions) -> Self {
        Self {
            phase: options.phase,
            config: options.config.clone(),
            namespace: options.namespace.clone(),
            origin: options.origin.clone(),
            source_path: options.source_path.clone(),
            steps: RefCell::new(Vec::new()),
        }
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    pub fn config(&self) -> &serde_json::Value {
        &self.config
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn source_path(&self) -> &Utf8PathBuf {
        &self.source_path
    }

    fn record_step(&self, id: &str, descriptor: &StageDescriptor) {
        let mut steps = self.steps.borrow_mut();
        let index = steps.len();
        steps.push(ExecutionStep {
            id: id.to_string(),
            index,
            key: descriptor.key.clone(),
            kind: descriptor.kind,
            priority: descriptor.priority,
            depends_on: descriptor.depends_on.clone(),
        });
    }
}

/// A single write a builder stage asks for. Nothing touches the filesystem
/// until a caller drains the sink and commits through a workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedWrite {
    pub file: Utf8PathBuf,
    pub contents: Vec<u8>,
}

/// Queue-only output surface handed to builder stages.
#[derive(Debug, Default)]
pub struct OutputSink {
    actions: Vec<QueuedWrite>,
}

impl OutputSink {
    pub fn queue_write(&mut self, file: impl Into<Utf8PathBuf>, contents: impl Into<Vec<u8>>) {
        self.actions.push(QueuedWrite {
            file: file.into(),
            contents: contents.into(),
        });
    }

    pub fn actions(&self) -> &[QueuedWrite] {
        &self.actions
    }

    pub fn into_actions(self) -> Vec<QueuedWrite> {
        self.actions
    }
}

/// A fragment-phase stage. Returning without calling `next.proceed`
/// short-circuits the remaining fragment stages.
pub trait FragmentStage {
    fn apply(
        &self,
        ctx: &RunContext,
        draft: ArtifactDraft,
        next: FragmentNext<'_>,
    ) -> anyhow::Result<ArtifactDraft>;
}

/// A builder-phase stage. Same continuation contract as [`FragmentStage`],
/// over the sealed artifact and the queue-only sink.
pub trait BuilderStage {
    fn apply(
        &self,
        ctx: &RunContext,
        artifact: &Artifact,
        output: &mut OutputSink,
        next: BuilderNext<'_>,
    ) -> anyhow::Result<()>;
}

/// Continuation into the rest of the fragment phase. Consuming `proceed`
/// makes a second delegation impossible by construction.
pub struct FragmentNext<'a> {
    ordered: &'a [&'a Registered<dyn FragmentStage>],
    index: usize,
    ctx: &'a RunContext,
}

impl FragmentNext<'_> {
    pub fn proceed(self, draft: ArtifactDraft) -> anyhow::Result<ArtifactDraft> {
        run_fragment_at(self.ordered, self.index, self.ctx, draft)
    }
}

/// Continuation into the rest of the builder phase.
pub struct BuilderNext<'a> {
    ordered: &'a [&'a Registered<dyn BuilderStage>],
    index: usize,
    ctx: &'a RunContext,
    artifact: &'a Artifact,
}

impl BuilderNext<'_> {
    pub fn proceed(self, output: &mut OutputSink) -> anyhow::Result<()> {
        run_builder_at(self.ordered, self.index, self.ctx, self.artifact, output)
    }
}

fn run_fragment_at(
    ordered: &[&Registered<dyn FragmentStage>],
    index: usize,
    ctx: &RunContext,
    draft: ArtifactDraft,
) -> anyhow::Result<ArtifactDraft> {
    let Some(entry) = ordered.get(index) else {
        return Ok(draft);
    };
    ctx.record_step(&entry.id, &entry.descriptor);
    tracing::debug!(stage = %entry.id, "fragment stage");
    let next = FragmentNext {
        ordered,
        index: index + 1,
        ctx,
    };
    entry
        .stage
        .apply(ctx, draft, next)
        .map_err(|err| anyhow::Error::new(wrap_stage_error(&entry.descriptor.key, err)))
}

fn run_builder_at(
    ordered: &[&Registered<dyn BuilderStage>],
    index: usize,
    ctx: &RunContext,
    artifact: &Artifact,
    output: &mut OutputSink,
) -> anyhow::Result<()> {
    let Some(entry) = ordered.get(index) else {
        return Ok(());
    };
    ctx.record_step(&entry.id, &entry.descriptor);
    tracing::debug!(stage = %entry.id, "builder stage");
    let next = BuilderNext {
        ordered,
        index: index + 1,
        ctx,
        artifact,
    };
    entry
        .stage
        .apply(ctx, artifact, output, next)
        .map_err(|err| anyhow::Error::new(wrap_stage_error(&entry.descriptor.key, err)))
}

/// Attributes a stage failure to its key, unless the error already carries a
/// pipeline attribution from deeper in the chain.
fn wrap_stage_error(key: &str, err: anyhow::Error) -> PipelineError {
    match err.downcast::<PipelineError>() {
        Ok(inner) => inner,
        Err(err) => {
            tracing::error!(stage = key, error = %err, "stage failed");
            PipelineError::Stage {
                key: key.to_string(),
                source: err,
            }
        }
    }
}

/// Everything a completed run produced.
#[derive(Debug)]
pub struct PipelineRunResult {
    pub artifact: Artifact,
    pub output: OutputSink,
    /// Snapshot of registry diagnostics at the end of the run.
    pub diagnostics: Vec<Diagnostic>,
    /// Invocation audit log, in execution order across both phases.
    pub steps: Vec<ExecutionStep>,
}

/// The two-registry pipeline. Register stages, then `run`.
pub struct Pipeline {
    fragments: StageRegistry<dyn FragmentStage>,
    builders: StageRegistry<dyn BuilderStage>,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Pipeline {
    pub fn new() -> Self {
        Self {
            fragments: StageRegistry::new(StageKind::Fragment),
            builders: StageRegistry::new(StageKind::Builder),
        }
    }

    pub fn use_fragment(
        &mut self,
        descriptor: StageDescriptor,
        stage: Arc<dyn FragmentStage>,
    ) -> Result<(), PipelineError> {
        self.fragments.register(descriptor, stage)
    }

    pub fn use_builder(
        &mut self,
        descriptor: StageDescriptor,
        stage: Arc<dyn BuilderStage>,
    ) -> Result<(), PipelineError> {
        self.builders.register(descriptor, stage)
    }

    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        let mut all = self.fragments.diagnostics().to_vec();
        all.extend_from_slice(self.builders.diagnostics());
        all
    }

    /// Executes one full run. Both phase orders are resolved up front, so an
    /// unresolvable builder graph aborts before any fragment stage runs.
    pub fn run(&mut self, options: &PipelineRunOptions) -> Result<PipelineRunResult, PipelineError> {
        let fragment_order = self.fragments.resolve_order()?;
        let builder_order = self.builders.resolve_order()?;
        tracing::info!(
            namespace = %options.namespace,
            phase = ?options.phase,
            fragments = fragment_order.len(),
            builders = builder_order.len(),
            "pipeline run"
        );

        let ctx = RunContext::new(options);

        let ordered_fragments: Vec<&Registered<dyn FragmentStage>> = fragment_order
            .iter()
            .map(|&i| &self.fragments.entries()[i])
            .collect();
        let draft = run_fragment_at(&ordered_fragments, 0, &ctx, ArtifactDraft::new())
            .map_err(flatten_run_error)?;
        let artifact = draft.finalize()?;

        let ordered_builders: Vec<&Registered<dyn BuilderStage>> = builder_order
            .iter()
            .map(|&i| &self.builders.entries()[i])
            .collect();
        let mut output = OutputSink::default();
        run_builder_at(&ordered_builders, 0, &ctx, &artifact, &mut output)
            .map_err(flatten_run_error)?;

        Ok(PipelineRunResult {
            artifact,
            output,
            diagnostics: self.diagnostics(),
            steps: ctx.steps.into_inner(),
        })
    }
}

fn flatten_run_error(err: anyhow::Error) -> PipelineError {
    match err.downcast::<PipelineError>() {
        Ok(inner) => inner,
        Err(err) => PipelineError::Stage {
            key: "run".to_string(),
            source: err,
        },
    }
}
