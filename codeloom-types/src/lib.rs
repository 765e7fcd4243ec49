//! Shared schema types for codeloom artifacts.
//!
//! Everything here is plain data: stage descriptors and diagnostics for the
//! pipeline, file manifests for the transactional workspace, and the patch
//! plan/manifest wire formats. No I/O lives in this crate.

pub mod manifest;
pub mod patch;
pub mod schema;
pub mod stage;

pub use manifest::{FileManifest, PendingExtensionFile};
pub use patch::{
    PatchInstruction, PatchManifest, PatchPlan, PatchRecord, PatchStatus, PatchSummary, PlanRef,
};
pub use stage::{ConflictMode, Diagnostic, DiagnosticKind, ExecutionStep, StageDescriptor, StageKind};
