use tracing::warn;

use crate::blank_scale::{self, BlankScaleSummary};
use crate::calibration;
use crate::cancel::CancelToken;
use crate::config::Config;
use crate::drift::{self, DriftOutcome, DriftSegment, PiecewiseOutcome, SlopeAction, SlopePreview};
use crate::history::{CorrectionHistory, CorrectionKind};
use crate::reference::ReferenceProvider;
use crate::search::{self, SearchOutcome};
use crate::store::{CalibrationCurve, ElementSymbol, Project, ProjectId, ProjectStore};
use crate::Result;

/// Facade over the whole correction pipeline: the project store, the
/// certified-value provider, the undo history, and the numeric
/// configuration.
///
/// All operations are project-scoped and synchronous. Callers running
/// correction and undo calls from several threads must serialise them per
/// project; the undo stack and the measurement graph are mutated
/// non-atomically relative to each other.
pub struct Pipeline<P> {
    store: ProjectStore,
    reference: P,
    history: CorrectionHistory,
    config: Config,
}

impl<P: ReferenceProvider> Pipeline<P> {
    pub fn new(reference: P) -> Self {
        Self::with_config(reference, Config::default())
    }

    pub fn with_config(reference: P, config: Config) -> Self {
        Self {
            store: ProjectStore::new(),
            reference,
            history: CorrectionHistory::new(),
            config,
        }
    }

    pub fn create_project(&mut self, name: &str) -> ProjectId {
        self.store.create_project(name)
    }

    /// # Errors
    /// Fails when the project does not exist.
    pub fn project(&self, id: ProjectId) -> Result<&Project> {
        self.store.project(id)
    }

    /// # Errors
    /// Fails when the project does not exist.
    pub fn project_mut(&mut self, id: ProjectId) -> Result<&mut Project> {
        self.store.project_mut(id)
    }

    /// Fit a calibration curve from the project's standards and make it the
    /// element's active curve.
    ///
    /// # Errors
    /// Fails when the project does not exist.
    pub fn fit_and_save_curve(
        &mut self,
        id: ProjectId,
        element: &ElementSymbol,
    ) -> Result<CalibrationCurve> {
        let project = self.store.project_mut(id)?;
        Ok(calibration::fit_and_save_curve(project, element, &self.reference))
    }

    /// Invert an intensity through a curve using the configured slope
    /// epsilon.
    #[must_use]
    pub fn evaluate_concentration(&self, intensity: f64, curve: &CalibrationCurve) -> f64 {
        calibration::evaluate_concentration(intensity, curve, self.config.slope_epsilon)
    }

    /// Run every measurement of `element` through its active curve.
    ///
    /// # Errors
    /// Fails when the project does not exist or the element has no active
    /// curve.
    pub fn apply_curve(&mut self, id: ProjectId, element: &ElementSymbol) -> Result<usize> {
        let project = self.store.project_mut(id)?;
        calibration::apply_curve(project, element, self.config.slope_epsilon)
    }

    /// # Errors
    /// See [`blank_scale::apply_blank_scale`].
    pub fn apply_blank_scale(
        &mut self,
        id: ProjectId,
        token: &CancelToken,
    ) -> Result<BlankScaleSummary> {
        let project = self.store.project_mut(id)?;
        blank_scale::apply_blank_scale(project, id, &mut self.history, &self.reference, token)
    }

    /// # Errors
    /// Fails when the project does not exist.
    pub fn apply_manual_blank_scale(
        &mut self,
        id: ProjectId,
        element: &ElementSymbol,
        blank: f64,
        scale: f64,
    ) -> Result<usize> {
        let project = self.store.project_mut(id)?;
        Ok(blank_scale::apply_manual_blank_scale(
            project,
            id,
            &mut self.history,
            element,
            blank,
            scale,
        ))
    }

    /// # Errors
    /// See [`drift::apply_drift_correction`].
    pub fn apply_drift_correction(
        &mut self,
        id: ProjectId,
        token: &CancelToken,
    ) -> Result<DriftOutcome> {
        let project = self.store.project_mut(id)?;
        drift::apply_drift_correction(project, id, &mut self.history, &self.config, token)
    }

    /// # Errors
    /// Fails when the project does not exist.
    pub fn drift_segments(&self, id: ProjectId) -> Result<Vec<DriftSegment>> {
        Ok(drift::drift_segments(self.store.project(id)?))
    }

    /// # Errors
    /// See [`drift::apply_drift_piecewise`].
    pub fn apply_drift_piecewise(
        &mut self,
        id: ProjectId,
        element: &ElementSymbol,
        token: &CancelToken,
    ) -> Result<PiecewiseOutcome> {
        let project = self.store.project_mut(id)?;
        drift::apply_drift_piecewise(project, id, &mut self.history, element, token)
    }

    /// Build a slope-adjustment preview without touching the project.
    ///
    /// # Errors
    /// See [`drift::optimize_slope`].
    pub fn optimize_slope(
        &self,
        id: ProjectId,
        element: &ElementSymbol,
        action: SlopeAction,
    ) -> Result<SlopePreview> {
        let project = self.store.project(id)?;
        drift::optimize_slope(project, element, action, &self.config)
    }

    /// Commit a previously built slope preview.
    ///
    /// # Errors
    /// Fails when the project does not exist.
    pub fn apply_slope_preview(&mut self, id: ProjectId, preview: &SlopePreview) -> Result<usize> {
        let project = self.store.project_mut(id)?;
        Ok(drift::apply_slope_preview(project, id, &mut self.history, preview))
    }

    /// # Errors
    /// See [`search::search_blank_scale`].
    pub fn search_blank_scale(
        &self,
        id: ProjectId,
        token: &CancelToken,
    ) -> Result<SearchOutcome> {
        let project = self.store.project(id)?;
        search::search_blank_scale(project, &self.reference, &self.config.search, token)
    }

    /// Undo the most recent correction pass, whatever it was.
    ///
    /// Returns the kind of the undone pass, `None` when the history is
    /// empty.
    ///
    /// # Errors
    /// Fails when the project does not exist.
    pub fn undo_last(&mut self, id: ProjectId) -> Result<Option<CorrectionKind>> {
        let project = self.store.project_mut(id)?;
        Ok(self.history.undo(id, project))
    }

    /// Undo the most recent pass, expecting it to be a blank/scale pass.
    ///
    /// History is strictly last-in-first-out, so this always pops the top
    /// snapshot; a mismatch between the expectation and what was actually
    /// undone is logged and returned.
    ///
    /// # Errors
    /// Fails when the project does not exist.
    pub fn undo_blank_scale(&mut self, id: ProjectId) -> Result<Option<CorrectionKind>> {
        self.undo_expecting(id, CorrectionKind::BlankScale)
    }

    /// Undo the most recent pass, expecting it to be a drift pass.
    ///
    /// # Errors
    /// Fails when the project does not exist.
    pub fn undo_drift_correction(&mut self, id: ProjectId) -> Result<Option<CorrectionKind>> {
        self.undo_expecting(id, CorrectionKind::Drift)
    }

    fn undo_expecting(
        &mut self,
        id: ProjectId,
        expected: CorrectionKind,
    ) -> Result<Option<CorrectionKind>> {
        let undone = self.undo_last(id)?;
        if let Some(kind) = undone {
            if kind != expected {
                warn!(?kind, ?expected, "undid a different pass than requested");
            }
        }
        Ok(undone)
    }

    #[must_use]
    pub fn history_depth(&self, id: ProjectId) -> usize {
        self.history.depth(id)
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn reference(&self) -> &P {
        &self.reference
    }
}
