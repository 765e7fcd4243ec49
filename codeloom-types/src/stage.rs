use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Which half of the run a stage belongs to. Fragment stages build the
/// intermediate draft; builder stages consume the finished artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StageKind {
    Fragment,
    Builder,
}

impl StageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StageKind::Fragment => "fragment",
            StageKind::Builder => "builder",
        }
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a stage relates to other registrations of the same key.
/// At most one `Override` registration may claim a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictMode {
    Extend,
    Override,
    Merge,
}

/// Immutable description of a registered stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageDescriptor {
    pub key: String,
    pub kind: StageKind,

    #[serde(default = "default_mode")]
    pub mode: ConflictMode,

    #[serde(default)]
    pub priority: i32,

    #[serde(default)]
    pub depends_on: BTreeSet<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
}

fn default_mode() -> ConflictMode {
    ConflictMode::Extend
}

impl StageDescriptor {
    pub fn fragment(key: impl Into<String>) -> Self {
        Self::new(key, StageKind::Fragment)
    }

    pub fn builder(key: impl Into<String>) -> Self {
        Self::new(key, StageKind::Builder)
    }

    pub fn new(key: impl Into<String>, kind: StageKind) -> Self {
        Self {
            key: key.into(),
            kind,
            mode: ConflictMode::Extend,
            priority: 0,
            depends_on: BTreeSet::new(),
            origin: None,
        }
    }

    pub fn with_mode(mut self, mode: ConflictMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_depends_on<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiagnosticKind {
    Conflict,
    MissingDependency,
    UnusedHelper,
}

/// A registration or resolution finding. Diagnostics are collected for
/// reporting even when the same condition also aborts the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub key: String,
    pub message: String,
}

/// Audit record of one actual stage invocation, appended in invocation
/// order regardless of the stage's outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionStep {
    pub id: String,
    pub index: usize,
    pub key: String,
    pub kind: StageKind,
    pub priority: i32,

    #[serde(default)]
    pub depends_on: BTreeSet<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn descriptor_builders_set_fields() {
        let desc = StageDescriptor::fragment("ir.meta")
            .with_mode(ConflictMode::Override)
            .with_priority(5)
            .with_depends_on(["ir.config"])
            .with_origin("core");

        assert_eq!(desc.kind, StageKind::Fragment);
        assert_eq!(desc.mode, ConflictMode::Override);
        assert_eq!(desc.priority, 5);
        assert!(desc.depends_on.contains("ir.config"));
        assert_eq!(desc.origin.as_deref(), Some("core"));
    }

    #[test]
    fn stage_kind_serializes_kebab_case() {
        let json = serde_json::to_string(&StageKind::Fragment).expect("serialize");
        assert_eq!(json, "\"fragment\"");
    }

    #[test]
    fn descriptor_defaults_apply_on_deserialize() {
        let desc: StageDescriptor =
            serde_json::from_str(r#"{"key":"b.x","kind":"builder"}"#).expect("parse");
        assert_eq!(desc.mode, ConflictMode::Extend);
        assert_eq!(desc.priority, 0);
        assert!(desc.depends_on.is_empty());
    }
}
