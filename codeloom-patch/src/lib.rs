//! Three-way patch application for staged codeloom plans.
//!
//! A generate run stages a `plan.json` under the reserved working directory;
//! this crate executes it against the live tree, reconciling user edits with
//! incoming generated content per file, and persists a `manifest.json` with
//! one record per instruction plus aggregate counts.

pub mod apply;
pub mod error;
pub mod stage;

pub use apply::{apply_patch_plan, base_path_for, load_plan};
pub use error::PatchError;
pub use stage::PatcherStage;

/// Reserved working directory at the workspace root.
pub const RESERVED_DIR: &str = ".codeloom";

/// Staged plan location, relative to the workspace root.
pub const PLAN_PATH: &str = ".codeloom/apply/plan.json";

/// Manifest location written after every apply run.
pub const MANIFEST_PATH: &str = ".codeloom/apply/manifest.json";

/// Root of the per-file base snapshots used as merge ancestors.
pub const BASE_DIR: &str = ".codeloom/apply/base";
