//! Keyed stage registry with deterministic dependency ordering.
//!
//! Registries are per phase: the pipeline holds one for fragment stages and
//! one for builder stages. Ordering runs Kahn's algorithm with a sorted ready
//! set (priority descending, then key, then registration index), so the
//! produced order depends only on the registered set and never on the call
//! order that built it.

use std::collections::BTreeSet;
use std::sync::Arc;

use codeloom_types::{ConflictMode, Diagnostic, DiagnosticKind, StageDescriptor, StageKind};

use crate::error::PipelineError;

/// A stage accepted into a registry, with its synthesized identity.
pub struct Registered<S: ?Sized> {
    pub descriptor: StageDescriptor,
    pub stage: Arc<S>,
    /// Stable id of the form `kind:key#index`.
    pub id: String,
    /// Zero-based registration index, the final ordering tie-break.
    pub index: usize,
}

pub struct StageRegistry<S: ?Sized> {
    kind: StageKind,
    entries: Vec<Registered<S>>,
    diagnostics: Vec<Diagnostic>,
}

impl<S: ?Sized> StageRegistry<S> {
    pub fn new(kind: StageKind) -> Self {
        Self {
            kind,
            entries: Vec::new(),
            diagnostics: Vec::new(),
        }
    }

    pub fn entries(&self) -> &[Registered<S>] {
        &self.entries
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Registers a stage under its descriptor.
    ///
    /// Rejects descriptors whose kind does not match the registry, and a
    /// second `Override` registration for a key that already carries one. An
    /// accepted `Override` supersedes every earlier entry with the same key.
    pub fn register(
        &mut self,
        descriptor: StageDescriptor,
        stage: Arc<S>,
    ) -> Result<(), PipelineError> {
        if descriptor.kind != self.kind {
            return Err(PipelineError::validation(format!(
                "stage `{}` is declared as a {} stage but was registered with the {} registry",
                descriptor.key, descriptor.kind, self.kind
            )));
        }

        if descriptor.mode == ConflictMode::Override {
            let clash = self
                .entries
                .iter()
                .any(|e| e.descriptor.key == descriptor.key && e.descriptor.mode == ConflictMode::Override);
            if clash {
                let message = format!(
                    "multiple override registrations for {} stage `{}`",
                    self.kind, descriptor.key
                );
                tracing::error!(key = %descriptor.key, kind = %self.kind, "override conflict");
                self.diagnostics.push(Diagnostic {
                    kind: DiagnosticKind::Conflict,
                    key: descriptor.key.clone(),
                    message: message.clone(),
                });
                return Err(PipelineError::graph(message));
            }
            // The override wins over any extend/merge entries already present.
            self.entries.retain(|e| e.descriptor.key != descriptor.key);
        }

        let index = self.entries.len();
        let id = format!("{}:{}#{index}", self.kind, descriptor.key);
        self.entries.push(Registered {
            descriptor,
            stage,
            id,
            index,
        });
        Ok(())
    }

    /// Resolves the execution order for the registered set.
    ///
    /// Unresolvable `depends_on` keys produce one `missing-dependency`
    /// diagnostic per (stage, dependency) pair, plus an `unused-helper`
    /// diagnostic for each stage that directly depends on a broken one; if
    /// any were found the resolver fails after collecting them all. A cycle
    /// among resolvable stages is a distinct fatal error.
    pub fn resolve_order(&mut self) -> Result<Vec<usize>, PipelineError> {
        let known: BTreeSet<&str> = self
            .entries
            .iter()
            .map(|e| e.descriptor.key.as_str())
            .collect();

        let mut broken: BTreeSet<&str> = BTreeSet::new();
        let mut fresh: Vec<Diagnostic> = Vec::new();
        for entry in &self.entries {
            for dep in &entry.descriptor.depends_on {
                if !known.contains(dep.as_str()) {
                    fresh.push(Diagnostic {
                        kind: DiagnosticKind::MissingDependency,
                        key: entry.descriptor.key.clone(),
                        message: format!(
                            "stage `{}` depends on unknown {} stage `{dep}`",
                            entry.descriptor.key, self.kind
                        ),
                    });
                    broken.insert(entry.descriptor.key.as_str());
                }
            }
        }
        for entry in &self.entries {
            if broken.contains(entry.descriptor.key.as_str()) {
                continue;
            }
            for dep in &entry.descriptor.depends_on {
                if broken.contains(dep.as_str()) {
                    fresh.push(Diagnostic {
                        kind: DiagnosticKind::UnusedHelper,
                        key: entry.descriptor.key.clone(),
                        message: format!(
                            "stage `{}` cannot run because its dependency `{dep}` is unresolved",
                            entry.descriptor.key
                        ),
                    });
                }
            }
        }
        if !fresh.is_empty() {
            let count = fresh.len();
            for diagnostic in &fresh {
                tracing::error!(
                    key = %diagnostic.key,
                    kind = %self.kind,
                    "{}", diagnostic.message
                );
            }
            self.diagnostics.extend(fresh);
            return Err(PipelineError::graph(format!(
                "cannot order {} stages: {count} unresolved dependency diagnostic(s)",
                self.kind
            )));
        }

        // Kahn's algorithm. Edges run dependency -> dependant; a key shared
        // by several entries makes each of them a prerequisite.
        let n = self.entries.len();
        let mut indegree = vec![0usize; n];
        let mut dependants: Vec<Vec<usize>> = vec![Vec::new(); n];
        for (i, entry) in self.entries.iter().enumerate() {
            for dep in &entry.descriptor.depends_on {
                for (j, candidate) in self.entries.iter().enumerate() {
                    if candidate.descriptor.key == *dep {
                        dependants[j].push(i);
                        indegree[i] += 1;
                    }
                }
            }
        }

        let mut ready: Vec<usize> = (0..n).filter(|&i| indegree[i] == 0).collect();
        let mut order = Vec::with_capacity(n);
        while !ready.is_empty() {
            ready.sort_by(|&a, &b| self.compare_entries(a, b));
            let next = ready.remove(0);
            order.push(next);
            for &dependant in &dependants[next] {
                indegree[dependant] -= 1;
                if indegree[dependant] == 0 {
                    ready.push(dependant);
                }
            }
        }

        if order.len() < n {
            let stuck: Vec<&str> = (0..n)
                .filter(|i| !order.contains(i))
                .map(|i| self.entries[i].descriptor.key.as_str())
                .collect();
            tracing::error!(kind = %self.kind, stages = ?stuck, "dependency cycle");
            return Err(PipelineError::graph(format!(
                "dependency cycle among {} stages: {}",
                self.kind,
                stuck.join(", ")
            )));
        }
        Ok(order)
    }

    fn compare_entries(&self, a: usize, b: usize) -> std::cmp::Ordering {
        let left = &self.entries[a].descriptor;
        let right = &self.entries[b].descriptor;
        right
            .priority
            .cmp(&left.priority)
            .then_with(|| left.key.cmp(&right.key))
            .then_with(|| self.entries[a].index.cmp(&self.entries[b].index))
    }
}
