//! Sandboxed runner for adapter extensions.
//!
//! Third-party extension callbacks get a private clone of the document graph
//! and a staging directory; their file output is containment-checked against
//! the real output root and committed all-or-nothing.

pub mod doc;
pub mod error;
pub mod runner;

pub use doc::{clone_node, from_json, node, to_json, Node, Value};
pub use error::SandboxError;
pub use runner::{run_adapter_extensions, ApplyFn, ExtensionHandle, ExtensionRun, ExtensionScope};
