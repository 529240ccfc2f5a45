use std::collections::HashMap;

use chrono::{DateTime, Utc};
use itertools::Itertools;
use ndarray::Array1;
use tracing::{info, warn};

use crate::cancel::CancelToken;
use crate::config::Config;
use crate::history::{CorrectionHistory, CorrectionKind, CorrectionSnapshot};
use crate::regression::{linear_fit, mean};
use crate::store::{
    ElementSymbol, Measurement, MeasurementId, Project, ProjectId, SampleId, SampleKind,
};
use crate::{CorrectionError, Result};

/// Per-element diagnostics of a drift pass: the fitted time regression and
/// the factor applied to every corrected sample.
#[derive(Clone, Debug)]
pub struct ElementDrift {
    pub element: ElementSymbol,
    pub slope: f64,
    pub intercept: f64,
    pub r_squared: f64,
    /// Desired steady-state level: mean of the reference readings.
    pub reference_value: f64,
    /// Minutes since the first reference sample, one entry per reference.
    pub timeline: Vec<f64>,
    pub measured: Vec<f64>,
    pub factors: Vec<(SampleId, f64)>,
    /// Samples whose expected value was too close to zero to divide by;
    /// they kept factor 1.0.
    pub degenerate: usize,
}

#[derive(Clone, Debug, Default)]
pub struct DriftOutcome {
    pub elements: Vec<ElementDrift>,
    /// Elements with fewer than two time-distinct reference readings.
    pub skipped: Vec<ElementSymbol>,
    /// Set when reference samples carried no timestamps and positions in run
    /// order were spaced by a fixed synthetic step instead.
    pub synthetic_timeline: bool,
    pub updated: usize,
}

/// Correct instrument drift over the duration of a run.
///
/// Fits `measured = slope * minutes + intercept` through the periodic
/// reference readings of each active element, then multiplies every
/// non-reference sample's value by `referenceValue / expected(t)` so the run
/// is pulled back to the references' mean level. Elements without two
/// time-distinct reference readings are skipped and reported, not fatal.
///
/// Writes are staged and committed after the element loop, behind one undo
/// snapshot, so cancellation leaves the project untouched.
///
/// # Errors
/// Fails when the project has fewer than two periodic reference samples, or
/// when `token` is cancelled.
pub fn apply_drift_correction(
    project: &mut Project,
    project_id: ProjectId,
    history: &mut CorrectionHistory,
    config: &Config,
    token: &CancelToken,
) -> Result<DriftOutcome> {
    let timeline = Timeline::build(project, config)?;
    if timeline.synthetic {
        warn!("reference samples carry no timestamps; using synthetic run-order timeline");
    }

    let elements: Vec<ElementSymbol> =
        project.active_elements().map(|e| e.symbol.clone()).collect();

    let mut outcome = DriftOutcome {
        synthetic_timeline: timeline.synthetic,
        ..DriftOutcome::default()
    };
    let mut staged: Vec<(MeasurementId, f64)> = Vec::new();

    for element in elements {
        token.checkpoint()?;

        let Some(drift) = fit_element(project, &element, &timeline) else {
            warn!(element = %element, "drift skipped element: fewer than two time-distinct references");
            outcome.skipped.push(element);
            continue;
        };

        let mut drift = drift;
        for sample in project.samples_ordered() {
            if sample.kind == SampleKind::PeriodicReference {
                continue;
            }
            let Some(minutes) = timeline.minutes(sample.id) else {
                continue;
            };
            let Some(measurement) = project.measurement_for(sample.id, &element) else {
                continue;
            };
            let Some(value) = current_value(measurement) else {
                continue;
            };

            let expected = drift.slope * minutes + drift.intercept;
            let factor = if expected.abs() < config.slope_epsilon {
                drift.degenerate += 1;
                1.0
            } else {
                drift.reference_value / expected
            };
            drift.factors.push((sample.id, factor));
            staged.push((measurement.id, (value * factor).max(0.0)));
        }

        outcome.elements.push(drift);
    }

    commit(project, project_id, history, &staged);
    outcome.updated = staged.len();
    info!(
        elements = outcome.elements.len(),
        skipped = outcome.skipped.len(),
        measurements = outcome.updated,
        "drift correction applied"
    );
    Ok(outcome)
}

/// Minutes-since-first-reference per sample.
struct Timeline {
    minutes: HashMap<SampleId, f64>,
    synthetic: bool,
}

impl Timeline {
    fn build(project: &Project, config: &Config) -> Result<Self> {
        let references: Vec<_> = project
            .samples_of_kind(SampleKind::PeriodicReference)
            .collect();
        if references.len() < 2 {
            return Err(CorrectionError::InsufficientData(
                "drift correction needs at least two periodic reference samples".to_owned(),
            ));
        }

        // Real timestamps win: the run-order grid is a last resort for fully
        // untimed runs. References missing a timestamp in a timed run simply
        // get no minutes and drop out of the per-element fits.
        let synthetic = references.iter().all(|s| s.run_at.is_none());
        let mut minutes = HashMap::new();

        if synthetic {
            for (position, sample) in project.samples_ordered().enumerate() {
                #[allow(clippy::cast_precision_loss)]
                let index = position as f64;
                minutes.insert(sample.id, index * config.synthetic_step_minutes);
            }
        } else {
            let origin: DateTime<Utc> = references
                .iter()
                .filter_map(|s| s.run_at)
                .min()
                .ok_or_else(|| {
                    CorrectionError::InsufficientData("no timestamped reference samples".to_owned())
                })?;
            for sample in project.samples_ordered() {
                if let Some(run_at) = sample.run_at {
                    let elapsed = (run_at - origin).num_seconds();
                    #[allow(clippy::cast_precision_loss)]
                    minutes.insert(sample.id, elapsed as f64 / 60.0);
                }
            }
        }

        Ok(Self { minutes, synthetic })
    }

    fn minutes(&self, sample: SampleId) -> Option<f64> {
        self.minutes.get(&sample).copied()
    }
}

fn current_value(measurement: &Measurement) -> Option<f64> {
    measurement.final_concentration.or(measurement.concentration)
}

fn fit_element(
    project: &Project,
    element: &ElementSymbol,
    timeline: &Timeline,
) -> Option<ElementDrift> {
    let mut times = Vec::new();
    let mut values = Vec::new();
    for sample in project.samples_of_kind(SampleKind::PeriodicReference) {
        let Some(minutes) = timeline.minutes(sample.id) else {
            continue;
        };
        let Some(value) = project
            .measurement_for(sample.id, element)
            .and_then(current_value)
        else {
            continue;
        };
        times.push(minutes);
        values.push(value);
    }

    let x = Array1::from(times.clone());
    let y = Array1::from(values.clone());
    let fit = linear_fit(x.view(), y.view())?;
    let reference_value = mean(&values)?;

    Some(ElementDrift {
        element: element.clone(),
        slope: fit.slope,
        intercept: fit.intercept,
        r_squared: fit.r_squared,
        reference_value,
        timeline: times,
        measured: values,
        factors: Vec::new(),
        degenerate: 0,
    })
}

fn commit(
    project: &mut Project,
    project_id: ProjectId,
    history: &mut CorrectionHistory,
    staged: &[(MeasurementId, f64)],
) {
    // An empty pass gets no snapshot; undo should reach the previous pass.
    if staged.is_empty() {
        return;
    }
    let snapshot = CorrectionSnapshot::capture(
        CorrectionKind::Drift,
        project,
        staged.iter().map(|&(id, _)| id),
    );
    history.push(project_id, snapshot);
    for &(id, value) in staged {
        if let Some(measurement) = project.measurement_mut(id) {
            measurement.final_concentration = Some(value);
        }
    }
}

/// A run-order span between two consecutive periodic reference samples.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DriftSegment {
    pub index: usize,
    /// Run-order position of the opening reference.
    pub start: usize,
    /// Run-order position of the closing reference.
    pub end: usize,
    /// `None` for the degenerate whole-run segment produced when fewer than
    /// two references exist.
    pub bounds: Option<(SampleId, SampleId)>,
}

/// Split the run into spans between consecutive periodic reference samples.
///
/// With fewer than two references the whole run is returned as one unbounded
/// segment.
#[must_use]
pub fn drift_segments(project: &Project) -> Vec<DriftSegment> {
    let positions: Vec<(usize, SampleId)> = project
        .samples_ordered()
        .enumerate()
        .filter(|(_, s)| s.kind == SampleKind::PeriodicReference)
        .map(|(i, s)| (i, s.id))
        .collect();

    if positions.len() < 2 {
        let len = project.samples_ordered().count();
        return vec![DriftSegment {
            index: 0,
            start: 0,
            end: len.saturating_sub(1),
            bounds: None,
        }];
    }

    positions
        .iter()
        .tuple_windows()
        .enumerate()
        .map(|(index, (&(start, start_id), &(end, end_id)))| DriftSegment {
            index,
            start,
            end,
            bounds: Some((start_id, end_id)),
        })
        .collect()
}

/// Per-segment diagnostics of a piecewise pass for one element.
#[derive(Clone, Debug)]
pub struct SegmentRatio {
    pub segment: usize,
    /// Target ratio at the closing reference: opening reading over closing
    /// reading. Multiplying the closing reference by this ratio restores the
    /// opening level.
    pub ratio: f64,
}

#[derive(Clone, Debug, Default)]
pub struct PiecewiseOutcome {
    pub ratios: Vec<SegmentRatio>,
    pub updated: usize,
}

/// Piecewise drift correction for one element.
///
/// For each segment the correction ramps linearly from factor 1 at the
/// opening reference to `opening / closing` at the closing reference, so each
/// reference is pulled back to the level of the one before it. Samples
/// outside any segment are left alone.
///
/// # Errors
/// Fails when the project has fewer than two periodic reference samples or
/// when `token` is cancelled.
pub fn apply_drift_piecewise(
    project: &mut Project,
    project_id: ProjectId,
    history: &mut CorrectionHistory,
    element: &ElementSymbol,
    token: &CancelToken,
) -> Result<PiecewiseOutcome> {
    let segments = drift_segments(project);
    if segments.iter().all(|s| s.bounds.is_none()) {
        return Err(CorrectionError::InsufficientData(
            "piecewise drift needs at least two periodic reference samples".to_owned(),
        ));
    }

    let order: Vec<SampleId> = project.samples_ordered().map(|s| s.id).collect();
    let mut outcome = PiecewiseOutcome::default();
    let mut staged: Vec<(MeasurementId, f64)> = Vec::new();
    let mut written: std::collections::HashSet<SampleId> = std::collections::HashSet::new();

    for segment in &segments {
        token.checkpoint()?;
        let Some((start_id, end_id)) = segment.bounds else {
            continue;
        };

        let start_value = project
            .measurement_for(start_id, element)
            .and_then(current_value);
        let end_value = project
            .measurement_for(end_id, element)
            .and_then(current_value);
        let ratio = match (start_value, end_value) {
            (Some(start), Some(end)) if end != 0.0 => start / end,
            _ => 1.0,
        };
        outcome.ratios.push(SegmentRatio {
            segment: segment.index,
            ratio,
        });

        let span = segment.end - segment.start;
        for position in segment.start..=segment.end {
            let sample_id = order[position];
            // Shared boundary references belong to the earlier segment.
            if !written.insert(sample_id) {
                continue;
            }
            let Some(measurement) = project.measurement_for(sample_id, element) else {
                continue;
            };
            let Some(value) = current_value(measurement) else {
                continue;
            };

            #[allow(clippy::cast_precision_loss)]
            let progress = if span == 0 {
                1.0
            } else {
                (position - segment.start) as f64 / span as f64
            };
            let effective = 1.0 + (ratio - 1.0) * progress;
            staged.push((measurement.id, (value * effective).max(0.0)));
        }
    }

    commit(project, project_id, history, &staged);
    outcome.updated = staged.len();
    info!(
        element = %element,
        segments = outcome.ratios.len(),
        measurements = outcome.updated,
        "piecewise drift correction applied"
    );
    Ok(outcome)
}

/// What-if adjustment of the fitted drift line.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SlopeAction {
    /// Flatten the line entirely; every sample is driven to the run mean.
    ZeroSlope,
    /// Steepen the slope by ten percent of its magnitude.
    RotateUp,
    /// Flatten the slope by ten percent of its magnitude.
    RotateDown,
    SetCustom(f64),
}

#[derive(Clone, Debug)]
pub struct SlopePreviewEntry {
    pub sample: SampleId,
    pub measurement: MeasurementId,
    pub current: f64,
    pub corrected: f64,
    pub factor: f64,
}

/// Preview of a slope adjustment. Nothing is written until the preview is
/// handed to [`apply_slope_preview`].
#[derive(Clone, Debug)]
pub struct SlopePreview {
    pub element: ElementSymbol,
    pub original_slope: f64,
    pub original_intercept: f64,
    pub new_slope: f64,
    pub new_intercept: f64,
    pub entries: Vec<SlopePreviewEntry>,
}

/// Refit the element's run-order trend line, pivot it to the slope `action`
/// asks for around the data's centroid, and derive the per-sample factors
/// that would move every reading onto the pivoted line.
///
/// # Errors
/// Fails when fewer than two samples carry a value for the element.
pub fn optimize_slope(
    project: &Project,
    element: &ElementSymbol,
    action: SlopeAction,
    config: &Config,
) -> Result<SlopePreview> {
    let mut positions = Vec::new();
    let mut values = Vec::new();
    let mut targets = Vec::new();
    for (position, sample) in project.samples_ordered().enumerate() {
        let Some(measurement) = project.measurement_for(sample.id, element) else {
            continue;
        };
        let Some(value) = current_value(measurement) else {
            continue;
        };
        #[allow(clippy::cast_precision_loss)]
        positions.push(position as f64);
        values.push(value);
        targets.push((sample.id, measurement.id, position, value));
    }

    let x = Array1::from(positions);
    let y = Array1::from(values);
    let fit = linear_fit(x.view(), y.view()).ok_or_else(|| {
        CorrectionError::InsufficientData(format!(
            "slope optimization for {element} needs two position-distinct readings"
        ))
    })?;

    let new_slope = match action {
        SlopeAction::ZeroSlope => 0.0,
        SlopeAction::RotateUp => fit.slope + fit.slope.abs() * 0.1,
        SlopeAction::RotateDown => fit.slope - fit.slope.abs() * 0.1,
        SlopeAction::SetCustom(target) => target,
    };

    // Pivot around the centroid so the run's overall level is preserved.
    #[allow(clippy::cast_precision_loss)]
    let center_x = x.sum() / x.len() as f64;
    #[allow(clippy::cast_precision_loss)]
    let center_y = y.sum() / y.len() as f64;
    let new_intercept = center_y - new_slope * center_x;

    let entries = targets
        .into_iter()
        .map(|(sample, measurement, position, value)| {
            #[allow(clippy::cast_precision_loss)]
            let pos = position as f64;
            let original_fitted = fit.slope * pos + fit.intercept;
            let new_fitted = new_slope * pos + new_intercept;
            let factor = if original_fitted.abs() < config.slope_epsilon {
                1.0
            } else {
                new_fitted / original_fitted
            };
            SlopePreviewEntry {
                sample,
                measurement,
                current: value,
                corrected: (value * factor).max(0.0),
                factor,
            }
        })
        .collect();

    Ok(SlopePreview {
        element: element.clone(),
        original_slope: fit.slope,
        original_intercept: fit.intercept,
        new_slope,
        new_intercept,
        entries,
    })
}

/// Commit a previously computed slope preview behind an undo snapshot.
pub fn apply_slope_preview(
    project: &mut Project,
    project_id: ProjectId,
    history: &mut CorrectionHistory,
    preview: &SlopePreview,
) -> usize {
    let snapshot = CorrectionSnapshot::capture(
        CorrectionKind::SlopeAdjust,
        project,
        preview.entries.iter().map(|e| e.measurement),
    );
    history.push(project_id, snapshot);
    for entry in &preview.entries {
        if let Some(measurement) = project.measurement_mut(entry.measurement) {
            measurement.final_concentration = Some(entry.corrected);
        }
    }
    info!(
        element = %preview.element,
        new_slope = preview.new_slope,
        updated = preview.entries.len(),
        "slope adjustment committed"
    );
    preview.entries.len()
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use crate::cancel::CancelToken;
    use crate::config::Config;
    use crate::history::CorrectionHistory;
    use crate::store::{ElementSymbol, ProjectId, ProjectStore, SampleKind};

    use super::{
        apply_drift_correction, apply_drift_piecewise, apply_slope_preview, drift_segments,
        optimize_slope, SlopeAction,
    };

    fn timed_project() -> (ProjectStore, ProjectId, ElementSymbol) {
        let mut store = ProjectStore::new();
        let id = store.create_project("drift");
        let fe = ElementSymbol::from("Fe");
        let project = store.project_mut(id).unwrap();
        project.add_element("Fe", "iron", 26);

        let start = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();
        for (minutes, value) in [(0, 10.0), (30, 12.0), (60, 14.0)] {
            let rm = project.add_sample(
                "RM 1",
                SampleKind::PeriodicReference,
                Some(start + Duration::minutes(minutes)),
            );
            let m = project.add_measurement(rm, &fe, 0.0).unwrap();
            project.measurement_mut(m).unwrap().concentration = Some(value);
        }

        (store, id, fe)
    }

    #[test]
    fn rising_references_pull_a_late_sample_down() {
        let (mut store, id, fe) = timed_project();
        let project = store.project_mut(id).unwrap();

        let start = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();
        let soil = project.add_sample(
            "soil 1",
            SampleKind::Unknown,
            Some(start + Duration::minutes(90)),
        );
        let m = project.add_measurement(soil, &fe, 0.0).unwrap();
        project.measurement_mut(m).unwrap().concentration = Some(15.0);

        let mut history = CorrectionHistory::new();
        let outcome = apply_drift_correction(
            project,
            id,
            &mut history,
            &Config::default(),
            &CancelToken::new(),
        )
        .unwrap();

        assert!(!outcome.synthetic_timeline);
        assert_eq!(outcome.elements.len(), 1);
        let drift = &outcome.elements[0];
        approx::assert_relative_eq!(drift.slope, 2.0 / 30.0, max_relative = 1e-9);
        approx::assert_relative_eq!(drift.intercept, 10.0, max_relative = 1e-9);
        approx::assert_relative_eq!(drift.r_squared, 1.0, epsilon = 1e-9);
        approx::assert_relative_eq!(drift.reference_value, 12.0);

        // expected(90) = 16, factor = 12/16 = 0.75, 15 * 0.75 = 11.25
        approx::assert_relative_eq!(
            project.measurement(m).unwrap().final_concentration.unwrap(),
            11.25,
            max_relative = 1e-9
        );
        assert_eq!(history.depth(id), 1);
    }

    #[test]
    fn missing_timestamps_fall_back_to_a_synthetic_timeline() {
        let mut store = ProjectStore::new();
        let id = store.create_project("untimed");
        let fe = ElementSymbol::from("Fe");
        let project = store.project_mut(id).unwrap();
        project.add_element("Fe", "iron", 26);

        for value in [10.0, 12.0, 14.0] {
            let rm = project.add_sample("RM 1", SampleKind::PeriodicReference, None);
            let m = project.add_measurement(rm, &fe, 0.0).unwrap();
            project.measurement_mut(m).unwrap().concentration = Some(value);
        }
        let soil = project.add_sample("soil 1", SampleKind::Unknown, None);
        let m = project.add_measurement(soil, &fe, 0.0).unwrap();
        project.measurement_mut(m).unwrap().concentration = Some(15.0);

        let mut history = CorrectionHistory::new();
        let outcome = apply_drift_correction(
            project,
            id,
            &mut history,
            &Config::default(),
            &CancelToken::new(),
        )
        .unwrap();

        // Run-order positions spaced 30 minutes apart reproduce scenario A.
        assert!(outcome.synthetic_timeline);
        approx::assert_relative_eq!(
            project.measurement(m).unwrap().final_concentration.unwrap(),
            11.25,
            max_relative = 1e-9
        );
    }

    #[test]
    fn partially_timed_references_keep_the_real_timeline() {
        let mut store = ProjectStore::new();
        let id = store.create_project("mixed");
        let fe = ElementSymbol::from("Fe");
        let project = store.project_mut(id).unwrap();
        project.add_element("Fe", "iron", 26);

        let start = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();
        for (run_at, value) in [
            (Some(start), 10.0),
            (None, 99.0),
            (Some(start + Duration::minutes(60)), 14.0),
        ] {
            let rm = project.add_sample("RM 1", SampleKind::PeriodicReference, run_at);
            let m = project.add_measurement(rm, &fe, 0.0).unwrap();
            project.measurement_mut(m).unwrap().concentration = Some(value);
        }
        let soil = project.add_sample(
            "soil 1",
            SampleKind::Unknown,
            Some(start + Duration::minutes(90)),
        );
        let m = project.add_measurement(soil, &fe, 0.0).unwrap();
        project.measurement_mut(m).unwrap().concentration = Some(15.0);

        let mut history = CorrectionHistory::new();
        let outcome = apply_drift_correction(
            project,
            id,
            &mut history,
            &Config::default(),
            &CancelToken::new(),
        )
        .unwrap();

        // The untimed reference drops out of the fit; the two timestamped
        // ones define the line through (0, 10) and (60, 14).
        assert!(!outcome.synthetic_timeline);
        let drift = &outcome.elements[0];
        assert_eq!(drift.timeline.len(), 2);
        approx::assert_relative_eq!(drift.reference_value, 12.0);
        approx::assert_relative_eq!(
            project.measurement(m).unwrap().final_concentration.unwrap(),
            11.25,
            max_relative = 1e-9
        );
    }

    #[test]
    fn element_without_two_references_is_skipped() {
        let (mut store, id, _fe) = timed_project();
        let project = store.project_mut(id).unwrap();
        project.add_element("Cu", "copper", 29);

        let mut history = CorrectionHistory::new();
        let outcome = apply_drift_correction(
            project,
            id,
            &mut history,
            &Config::default(),
            &CancelToken::new(),
        )
        .unwrap();

        assert_eq!(outcome.elements.len(), 1);
        assert_eq!(outcome.skipped, vec![ElementSymbol::from("Cu")]);
    }

    #[test]
    fn one_reference_fails_the_whole_pass() {
        let mut store = ProjectStore::new();
        let id = store.create_project("short");
        let fe = ElementSymbol::from("Fe");
        let project = store.project_mut(id).unwrap();
        project.add_element("Fe", "iron", 26);
        let rm = project.add_sample("RM 1", SampleKind::PeriodicReference, None);
        project.add_measurement(rm, &fe, 0.0).unwrap();

        let mut history = CorrectionHistory::new();
        let result = apply_drift_correction(
            project,
            id,
            &mut history,
            &Config::default(),
            &CancelToken::new(),
        );
        assert!(result.is_err());
        assert_eq!(history.depth(id), 0);
    }

    #[test]
    fn segments_span_consecutive_references() {
        let mut store = ProjectStore::new();
        let id = store.create_project("segments");
        let project = store.project_mut(id).unwrap();

        let rm1 = project.add_sample("RM 1", SampleKind::PeriodicReference, None);
        project.add_sample("soil 1", SampleKind::Unknown, None);
        project.add_sample("soil 2", SampleKind::Unknown, None);
        let rm2 = project.add_sample("RM 1", SampleKind::PeriodicReference, None);
        project.add_sample("soil 3", SampleKind::Unknown, None);
        let rm3 = project.add_sample("RM 1", SampleKind::PeriodicReference, None);

        let segments = drift_segments(project);
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].bounds, Some((rm1, rm2)));
        assert_eq!((segments[0].start, segments[0].end), (0, 3));
        assert_eq!(segments[1].bounds, Some((rm2, rm3)));
        assert_eq!((segments[1].start, segments[1].end), (3, 5));
    }

    #[test]
    fn too_few_references_give_one_unbounded_segment() {
        let mut store = ProjectStore::new();
        let id = store.create_project("flat");
        let project = store.project_mut(id).unwrap();
        project.add_sample("soil 1", SampleKind::Unknown, None);
        project.add_sample("soil 2", SampleKind::Unknown, None);

        let segments = drift_segments(project);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].bounds, None);
        assert_eq!((segments[0].start, segments[0].end), (0, 1));
    }

    #[test]
    fn piecewise_correction_restores_the_closing_reference() {
        let mut store = ProjectStore::new();
        let id = store.create_project("piecewise");
        let fe = ElementSymbol::from("Fe");
        let project = store.project_mut(id).unwrap();
        project.add_element("Fe", "iron", 26);

        // Opening reference 10, mid sample 11, closing reference 12.5.
        let mut ids = Vec::new();
        for (label, kind, value) in [
            ("RM 1", SampleKind::PeriodicReference, 10.0),
            ("soil 1", SampleKind::Unknown, 11.0),
            ("RM 1", SampleKind::PeriodicReference, 12.5),
        ] {
            let sample = project.add_sample(label, kind, None);
            let m = project.add_measurement(sample, &fe, 0.0).unwrap();
            project.measurement_mut(m).unwrap().concentration = Some(value);
            ids.push(m);
        }

        let mut history = CorrectionHistory::new();
        let outcome =
            apply_drift_piecewise(project, id, &mut history, &fe, &CancelToken::new()).unwrap();

        assert_eq!(outcome.ratios.len(), 1);
        approx::assert_relative_eq!(outcome.ratios[0].ratio, 0.8);

        let value_at = |m| project.measurement(m).unwrap().final_concentration.unwrap();
        // Opening reference keeps its level, the closing one is pulled back
        // to it, the midpoint gets half the ramp.
        approx::assert_relative_eq!(value_at(ids[0]), 10.0);
        approx::assert_relative_eq!(value_at(ids[1]), 11.0 * 0.9);
        approx::assert_relative_eq!(value_at(ids[2]), 10.0);
        assert_eq!(history.depth(id), 1);
    }

    #[test]
    fn zero_slope_preview_drives_readings_to_the_run_mean() {
        let mut store = ProjectStore::new();
        let id = store.create_project("slope");
        let fe = ElementSymbol::from("Fe");
        let project = store.project_mut(id).unwrap();
        project.add_element("Fe", "iron", 26);

        for value in [10.0, 12.0, 14.0] {
            let sample = project.add_sample("soil", SampleKind::Unknown, None);
            let m = project.add_measurement(sample, &fe, 0.0).unwrap();
            project.measurement_mut(m).unwrap().concentration = Some(value);
        }

        let preview =
            optimize_slope(project, &fe, SlopeAction::ZeroSlope, &Config::default()).unwrap();

        approx::assert_relative_eq!(preview.original_slope, 2.0, max_relative = 1e-9);
        approx::assert_relative_eq!(preview.new_slope, 0.0);
        approx::assert_relative_eq!(preview.new_intercept, 12.0, max_relative = 1e-9);
        // The line is exact here, so every corrected reading lands on the mean.
        for entry in &preview.entries {
            approx::assert_relative_eq!(entry.corrected, 12.0, max_relative = 1e-9);
        }

        // Nothing is written until the preview is applied.
        assert!(project
            .measurements()
            .all(|m| m.final_concentration.is_none()));

        let mut history = CorrectionHistory::new();
        let updated = apply_slope_preview(project, id, &mut history, &preview);
        assert_eq!(updated, 3);
        for measurement in project.measurements() {
            approx::assert_relative_eq!(
                measurement.final_concentration.unwrap(),
                12.0,
                max_relative = 1e-9
            );
        }
        assert_eq!(history.depth(id), 1);
    }

    #[test]
    fn rotations_pivot_around_the_centroid() {
        let mut store = ProjectStore::new();
        let id = store.create_project("rotate");
        let fe = ElementSymbol::from("Fe");
        let project = store.project_mut(id).unwrap();
        project.add_element("Fe", "iron", 26);

        for value in [10.0, 12.0, 14.0] {
            let sample = project.add_sample("soil", SampleKind::Unknown, None);
            let m = project.add_measurement(sample, &fe, 0.0).unwrap();
            project.measurement_mut(m).unwrap().concentration = Some(value);
        }

        let up = optimize_slope(project, &fe, SlopeAction::RotateUp, &Config::default()).unwrap();
        approx::assert_relative_eq!(up.new_slope, 2.2, max_relative = 1e-9);

        let down =
            optimize_slope(project, &fe, SlopeAction::RotateDown, &Config::default()).unwrap();
        approx::assert_relative_eq!(down.new_slope, 1.8, max_relative = 1e-9);

        // Centroid (1, 12) stays on both pivoted lines.
        approx::assert_relative_eq!(up.new_slope + up.new_intercept, 12.0, max_relative = 1e-9);
        approx::assert_relative_eq!(
            down.new_slope + down.new_intercept,
            12.0,
            max_relative = 1e-9
        );
    }

    #[test]
    fn slope_preview_needs_two_readings() {
        let mut store = ProjectStore::new();
        let id = store.create_project("sparse");
        let fe = ElementSymbol::from("Fe");
        let project = store.project_mut(id).unwrap();
        project.add_element("Fe", "iron", 26);
        let sample = project.add_sample("soil", SampleKind::Unknown, None);
        let m = project.add_measurement(sample, &fe, 0.0).unwrap();
        project.measurement_mut(m).unwrap().concentration = Some(10.0);

        assert!(optimize_slope(project, &fe, SlopeAction::ZeroSlope, &Config::default()).is_err());
    }
}
