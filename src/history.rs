use std::collections::HashMap;

use crate::store::{MeasurementId, Project, ProjectId};

/// Which pass produced a snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CorrectionKind {
    BlankScale,
    Drift,
    SlopeAdjust,
}

/// Final-concentration values of the measurements a pass is about to touch,
/// captured immediately before the write-back.
///
/// Only touched measurements are recorded, as `(id, old value)` pairs, so
/// memory is bounded by the size of the pass rather than the project.
#[derive(Clone, Debug)]
pub struct CorrectionSnapshot {
    pub kind: CorrectionKind,
    entries: Vec<(MeasurementId, Option<f64>)>,
}

impl CorrectionSnapshot {
    #[must_use]
    pub fn capture(
        kind: CorrectionKind,
        project: &Project,
        touched: impl IntoIterator<Item = MeasurementId>,
    ) -> Self {
        let entries = touched
            .into_iter()
            .filter_map(|id| {
                project
                    .measurement(id)
                    .map(|m| (id, m.final_concentration))
            })
            .collect();
        Self { kind, entries }
    }

    fn restore(&self, project: &mut Project) {
        for &(id, old) in &self.entries {
            if let Some(measurement) = project.measurement_mut(id) {
                measurement.final_concentration = old;
            }
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Per-project LIFO undo stacks, shared by all correction passes.
///
/// History lives in process memory only; corrections are exploratory until a
/// caller exports, so nothing here survives a restart.
#[derive(Debug, Default)]
pub struct CorrectionHistory {
    stacks: HashMap<ProjectId, Vec<CorrectionSnapshot>>,
}

impl CorrectionHistory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, project: ProjectId, snapshot: CorrectionSnapshot) {
        self.stacks.entry(project).or_default().push(snapshot);
    }

    /// Pop the most recent snapshot and restore it into `project`.
    ///
    /// Returns the kind of the undone pass, or `None` when the history is
    /// empty (undo on empty history is a no-op, not an error).
    pub fn undo(&mut self, id: ProjectId, project: &mut Project) -> Option<CorrectionKind> {
        let snapshot = self.stacks.get_mut(&id)?.pop()?;
        snapshot.restore(project);
        Some(snapshot.kind)
    }

    #[must_use]
    pub fn depth(&self, project: ProjectId) -> usize {
        self.stacks.get(&project).map_or(0, Vec::len)
    }
}
