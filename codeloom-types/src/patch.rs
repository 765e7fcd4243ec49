use camino::Utf8PathBuf;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reason tokens recorded on skipped patch records.
pub mod skip_reasons {
    pub const MISSING_INCOMING: &str = "missing-incoming";
    pub const NO_OP: &str = "no-op";
    pub const EMPTY_TARGET: &str = "empty-target";
}

/// Persisted plan document read from `<reserved>/apply/plan.json`.
///
/// Parsing is strict: a document that does not match this shape is a fatal
/// error at load time, never partially interpreted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchPlan {
    pub schema: String,

    #[serde(default)]
    pub instructions: Vec<PatchInstruction>,
}

impl PatchPlan {
    pub fn new(instructions: Vec<PatchInstruction>) -> Self {
        Self {
            schema: crate::schema::PATCH_PLAN_V1.to_string(),
            instructions,
        }
    }
}

/// One plan entry: write (with base and incoming snapshots) or delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum PatchInstruction {
    Write {
        /// Target, relative to the workspace root.
        file: Utf8PathBuf,
        /// Base snapshot path (the ancestor of the three-way merge).
        base: Utf8PathBuf,
        /// Freshly generated content path.
        incoming: Utf8PathBuf,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    Delete {
        file: Utf8PathBuf,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
}

impl PatchInstruction {
    pub fn file(&self) -> &Utf8PathBuf {
        match self {
            PatchInstruction::Write { file, .. } | PatchInstruction::Delete { file, .. } => file,
        }
    }

    pub fn description(&self) -> Option<&str> {
        match self {
            PatchInstruction::Write { description, .. }
            | PatchInstruction::Delete { description, .. } => description.as_deref(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PatchStatus {
    Applied,
    Conflict,
    Skipped,
}

/// Outcome of one instruction after execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchRecord {
    pub file: Utf8PathBuf,
    pub status: PatchStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchSummary {
    pub applied: u64,
    pub conflicts: u64,
    pub skipped: u64,
}

/// Reference back to the plan a manifest was produced from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanRef {
    pub path: Utf8PathBuf,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

/// Persisted result of a patch run; the artifact downstream tooling
/// asserts against, written to `<reserved>/apply/manifest.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchManifest {
    pub schema: String,
    pub generated_at: DateTime<Utc>,
    pub plan_ref: PlanRef,
    pub summary: PatchSummary,

    #[serde(default)]
    pub records: Vec<PatchRecord>,
}

impl PatchManifest {
    pub fn new(plan_ref: PlanRef) -> Self {
        Self {
            schema: crate::schema::PATCH_MANIFEST_V1.to_string(),
            generated_at: Utc::now(),
            plan_ref,
            summary: PatchSummary::default(),
            records: Vec::new(),
        }
    }

    /// Append a record and bump the matching aggregate count.
    pub fn record(&mut self, record: PatchRecord) {
        match record.status {
            PatchStatus::Applied => self.summary.applied += 1,
            PatchStatus::Conflict => self.summary.conflicts += 1,
            PatchStatus::Skipped => self.summary.skipped += 1,
        }
        self.records.push(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn instruction_action_tag_round_trips() {
        let json = r#"{
            "action": "write",
            "file": "src/Controller.php",
            "base": ".codeloom/apply/base/src/Controller.php",
            "incoming": ".codeloom/generated/src/Controller.php"
        }"#;
        let parsed: PatchInstruction = serde_json::from_str(json).expect("parse write");
        assert_eq!(parsed.file().as_str(), "src/Controller.php");

        let out = serde_json::to_value(&parsed).expect("serialize");
        assert_eq!(out["action"], "write");
    }

    #[test]
    fn delete_instruction_needs_no_snapshots() {
        let json = r#"{"action": "delete", "file": "src/old.php"}"#;
        let parsed: PatchInstruction = serde_json::from_str(json).expect("parse delete");
        assert!(matches!(parsed, PatchInstruction::Delete { .. }));
    }

    #[test]
    fn write_instruction_without_incoming_is_rejected() {
        let json = r#"{"action": "write", "file": "a.txt", "base": "b.txt"}"#;
        assert!(serde_json::from_str::<PatchInstruction>(json).is_err());
    }

    #[test]
    fn manifest_record_updates_summary() {
        let mut manifest = PatchManifest::new(PlanRef {
            path: Utf8PathBuf::from(".codeloom/apply/plan.json"),
            sha256: None,
        });

        manifest.record(PatchRecord {
            file: "a.txt".into(),
            status: PatchStatus::Applied,
            reason: None,
            description: None,
        });
        manifest.record(PatchRecord {
            file: "b.txt".into(),
            status: PatchStatus::Skipped,
            reason: Some(skip_reasons::NO_OP.to_string()),
            description: None,
        });

        assert_eq!(manifest.summary.applied, 1);
        assert_eq!(manifest.summary.skipped, 1);
        assert_eq!(manifest.summary.conflicts, 0);
        assert_eq!(manifest.records.len(), 2);
    }
}
