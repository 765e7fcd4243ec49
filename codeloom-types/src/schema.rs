//! Schema identifiers carried in persisted documents.

pub const PATCH_PLAN_V1: &str = "codeloom.patch.plan.v1";
pub const PATCH_MANIFEST_V1: &str = "codeloom.patch.manifest.v1";
