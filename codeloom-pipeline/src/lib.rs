//! Deterministic two-phase stage pipeline for codeloom generation runs.
//!
//! Adapters register fragment stages (which accumulate an [`ArtifactDraft`])
//! and builder stages (which read the sealed [`Artifact`] and queue file
//! writes). Execution order is resolved per phase from declared dependencies
//! and priorities, with diagnostics collected for every conflict, missing
//! dependency, and stranded helper before the run aborts.

pub mod artifact;
pub mod error;
pub mod executor;
pub mod registry;

pub use artifact::{Artifact, ArtifactDraft, ArtifactMeta, DraftPatch, LayoutDescriptor};
pub use error::PipelineError;
pub use executor::{
    BuilderNext, BuilderStage, FragmentNext, FragmentStage, OutputSink, Pipeline,
    PipelineRunOptions, PipelineRunResult, QueuedWrite, RunContext, RunPhase,
};
pub use registry::{Registered, StageRegistry};
