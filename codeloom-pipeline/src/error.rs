use thiserror::Error;

/// Errors surfaced by stage registration, ordering, and pipeline execution.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A stage or draft violated a structural requirement.
    #[error("{message}")]
    Validation { message: String },

    /// The registered stage set cannot be ordered. Collected diagnostics on
    /// the registry describe every offending edge.
    #[error("{message}")]
    DependencyGraph { message: String },

    /// A stage body returned an error. The offending stage is identified by
    /// its registered key.
    #[error("stage `{key}` failed")]
    Stage {
        key: String,
        #[source]
        source: anyhow::Error,
    },
}

impl PipelineError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub(crate) fn graph(message: impl Into<String>) -> Self {
        Self::DependencyGraph {
            message: message.into(),
        }
    }
}
