use ndarray::Array1;
use tracing::{info, warn};

use crate::reference::ReferenceProvider;
use crate::regression::linear_fit;
use crate::store::{CalibrationCurve, CurvePoint, ElementSymbol, Project, SampleKind};
use crate::{CorrectionError, Result};

/// Fit a calibration curve for `element` from the project's standard samples
/// and install it as the element's active curve.
///
/// Standards contribute a point when their label resolves to a certified
/// concentration and their measured intensity is positive. With fewer than
/// two distinct concentrations no line is determined; the identity curve
/// (slope 1, intercept 0) is persisted instead and marked low confidence so a
/// later calibration pass still has an invertible curve to work with.
pub fn fit_and_save_curve<P: ReferenceProvider>(
    project: &mut Project,
    element: &ElementSymbol,
    reference: &P,
) -> CalibrationCurve {
    let points = fit_points(project, element, reference);

    let curve = if has_distinct_concentrations(&points) {
        let x = Array1::from_iter(points.iter().map(|p| p.concentration));
        let y = Array1::from_iter(points.iter().map(|p| p.intensity));

        match linear_fit(x.view(), y.view()) {
            Some(fit) => CalibrationCurve {
                element: element.clone(),
                slope: fit.slope,
                intercept: fit.intercept,
                r_squared: fit.r_squared,
                points,
                low_confidence: false,
                active: true,
            },
            None => identity_curve(element, points),
        }
    } else {
        identity_curve(element, points)
    };

    if curve.low_confidence {
        warn!(
            element = %element,
            points = curve.points.len(),
            "too few distinct standards; persisting identity curve"
        );
    } else {
        info!(
            element = %element,
            slope = curve.slope,
            r_squared = curve.r_squared,
            "calibration curve fitted"
        );
    }

    project.activate_curve(curve).clone()
}

fn identity_curve(element: &ElementSymbol, points: Vec<CurvePoint>) -> CalibrationCurve {
    CalibrationCurve {
        element: element.clone(),
        slope: 1.0,
        intercept: 0.0,
        r_squared: 0.0,
        points,
        low_confidence: true,
        active: true,
    }
}

fn fit_points<P: ReferenceProvider>(
    project: &Project,
    element: &ElementSymbol,
    reference: &P,
) -> Vec<CurvePoint> {
    project
        .samples_of_kind(SampleKind::Standard)
        .filter_map(|sample| {
            let certified = reference.certified(&sample.label, &element.0)?;
            let measurement = project.measurement_for(sample.id, element)?;
            (measurement.raw_intensity > 0.0).then_some(CurvePoint {
                concentration: certified,
                intensity: measurement.raw_intensity,
            })
        })
        .collect()
}

fn has_distinct_concentrations(points: &[CurvePoint]) -> bool {
    let Some(first) = points.first() else {
        return false;
    };
    points
        .iter()
        .any(|p| (p.concentration - first.concentration).abs() > 1e-12)
}

/// Invert an intensity through a curve, returning a concentration.
///
/// Slopes below `slope_epsilon` in magnitude are non-invertible and map every
/// intensity to zero. Negative concentrations are floored at zero.
#[must_use]
pub fn evaluate_concentration(
    intensity: f64,
    curve: &CalibrationCurve,
    slope_epsilon: f64,
) -> f64 {
    if curve.slope.abs() < slope_epsilon {
        return 0.0;
    }
    ((intensity - curve.intercept) / curve.slope).max(0.0)
}

/// Run every measurement of `element` through the element's active curve,
/// writing the resulting concentrations. Returns the number of measurements
/// updated.
///
/// # Errors
/// Fails when the element has no active curve.
pub fn apply_curve(
    project: &mut Project,
    element: &ElementSymbol,
    slope_epsilon: f64,
) -> Result<usize> {
    let curve = project
        .active_curve(element)
        .ok_or_else(|| {
            CorrectionError::InsufficientData(format!("no active curve for {element}"))
        })?
        .clone();

    let mut updated = 0;
    for measurement in project.measurements_mut() {
        if measurement.element == curve.element {
            measurement.concentration = Some(evaluate_concentration(
                measurement.raw_intensity,
                &curve,
                slope_epsilon,
            ));
            updated += 1;
        }
    }
    Ok(updated)
}
