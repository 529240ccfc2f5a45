use tracing::{info, warn};

use crate::cancel::CancelToken;
use crate::history::{CorrectionHistory, CorrectionKind, CorrectionSnapshot};
use crate::reference::ReferenceProvider;
use crate::regression::mean;
use crate::store::{ElementSymbol, MeasurementId, Project, ProjectId, SampleKind};
use crate::{CorrectionError, Result};

/// Per-element diagnostics of a blank/scale pass.
#[derive(Clone, Debug)]
pub struct ElementBlankScale {
    pub element: ElementSymbol,
    pub blank_average: f64,
    /// Set when no Blank sample carried this element and the blank average
    /// defaulted to zero.
    pub blank_defaulted: bool,
    pub measured_average: f64,
    /// Certificate level the scale was derived against: the mean certified
    /// concentration across the contributing reference samples.
    pub certified_value: f64,
    pub scale_factor: f64,
    /// `measuredAverage / certified * 100`. Recorded for audit, never used to
    /// gate the correction.
    pub recovery_percent: f64,
    pub updated: usize,
}

/// Outcome of a blank/scale pass over all active elements.
#[derive(Clone, Debug, Default)]
pub struct BlankScaleSummary {
    pub elements: Vec<ElementBlankScale>,
    /// Elements that could not produce a scale factor, with the reason.
    pub skipped: Vec<(ElementSymbol, String)>,
}

/// Derive a per-element blank average and scale factor from the project's
/// Blank and certified-reference samples, then rewrite the final
/// concentration of every other sample as `max(0, (concentration - blank) *
/// scale)`.
///
/// Writes are staged while the element loop runs and committed in one batch
/// after it finishes, so a cancellation mid-pass leaves the project
/// untouched. A snapshot of every touched measurement is pushed onto the
/// undo history immediately before the commit.
///
/// # Errors
/// Fails when the project has no certified-reference samples at all, or when
/// `token` is cancelled. Elements that individually lack usable data are
/// skipped and reported in the summary, not errors.
pub fn apply_blank_scale<P: ReferenceProvider>(
    project: &mut Project,
    project_id: ProjectId,
    history: &mut CorrectionHistory,
    reference: &P,
    token: &CancelToken,
) -> Result<BlankScaleSummary> {
    if project.samples_of_kind(SampleKind::CertifiedReference).next().is_none() {
        return Err(CorrectionError::InsufficientData(
            "no certified-reference samples in project".to_owned(),
        ));
    }

    let elements: Vec<ElementSymbol> =
        project.active_elements().map(|e| e.symbol.clone()).collect();

    let mut summary = BlankScaleSummary::default();
    let mut staged: Vec<(MeasurementId, f64)> = Vec::new();

    for element in elements {
        token.checkpoint()?;

        match derive_element_correction(project, &element, reference) {
            Ok(derived) => {
                let writes = stage_writes(project, &element, derived.blank_average, derived.scale_factor);
                summary.elements.push(ElementBlankScale {
                    updated: writes.len(),
                    ..derived
                });
                staged.extend(writes);
            }
            Err(reason) => {
                warn!(element = %element, reason, "blank/scale skipped element");
                summary.skipped.push((element, reason));
            }
        }
    }

    commit(project, project_id, history, CorrectionKind::BlankScale, &staged);
    info!(
        elements = summary.elements.len(),
        skipped = summary.skipped.len(),
        measurements = staged.len(),
        "blank/scale correction applied"
    );
    Ok(summary)
}

/// Apply an operator-chosen blank and scale pair to one element, bypassing
/// the derivation step. Shares the write path and undo discipline of
/// [`apply_blank_scale`].
pub fn apply_manual_blank_scale(
    project: &mut Project,
    project_id: ProjectId,
    history: &mut CorrectionHistory,
    element: &ElementSymbol,
    blank: f64,
    scale: f64,
) -> usize {
    let staged = stage_writes(project, element, blank, scale);
    commit(project, project_id, history, CorrectionKind::BlankScale, &staged);
    info!(element = %element, blank, scale, updated = staged.len(), "manual blank/scale applied");
    staged.len()
}

fn derive_element_correction<P: ReferenceProvider>(
    project: &Project,
    element: &ElementSymbol,
    reference: &P,
) -> std::result::Result<ElementBlankScale, String> {
    let blanks: Vec<f64> = project
        .samples_of_kind(SampleKind::Blank)
        .filter_map(|s| project.measurement_for(s.id, element))
        .filter_map(|m| m.concentration)
        .collect();
    let blank_average = mean(&blanks).unwrap_or(0.0);

    // Blank-subtracted reference readings, paired with their certificates.
    // A reading contributes only when it stays positive after subtraction.
    let mut nets = Vec::new();
    let mut certified_values = Vec::new();
    for sample in project.samples_of_kind(SampleKind::CertifiedReference) {
        let Some(certified) = reference.certified(&sample.label, &element.0) else {
            continue;
        };
        let Some(concentration) = project
            .measurement_for(sample.id, element)
            .and_then(|m| m.concentration)
        else {
            continue;
        };
        let net = concentration - blank_average;
        if net > 0.0 {
            nets.push(net);
            certified_values.push(certified);
        }
    }

    let Some(measured_average) = mean(&nets) else {
        return Err("no certified-reference reading survives blank subtraction".to_owned());
    };
    let Some(certified) = mean(&certified_values) else {
        return Err("no certificate resolves for this element".to_owned());
    };
    if certified == 0.0 {
        return Err("certified value is zero".to_owned());
    }

    Ok(ElementBlankScale {
        element: element.clone(),
        blank_average,
        blank_defaulted: blanks.is_empty(),
        measured_average,
        certified_value: certified,
        scale_factor: certified / measured_average,
        recovery_percent: measured_average / certified * 100.0,
        updated: 0,
    })
}

/// Compute the writes of one element's correction without mutating anything.
fn stage_writes(
    project: &Project,
    element: &ElementSymbol,
    blank: f64,
    scale: f64,
) -> Vec<(MeasurementId, f64)> {
    project
        .samples_ordered()
        .filter(|s| s.kind.receives_blank_scale())
        .filter_map(|s| project.measurement_for(s.id, element))
        .filter_map(|m| {
            m.concentration
                .map(|c| (m.id, ((c - blank) * scale).max(0.0)))
        })
        .collect()
}

fn commit(
    project: &mut Project,
    project_id: ProjectId,
    history: &mut CorrectionHistory,
    kind: CorrectionKind,
    staged: &[(MeasurementId, f64)],
) {
    // An empty pass gets no snapshot; undo should reach the previous pass.
    if staged.is_empty() {
        return;
    }
    let snapshot = CorrectionSnapshot::capture(kind, project, staged.iter().map(|&(id, _)| id));
    history.push(project_id, snapshot);
    for &(id, value) in staged {
        if let Some(measurement) = project.measurement_mut(id) {
            measurement.final_concentration = Some(value);
        }
    }
}
