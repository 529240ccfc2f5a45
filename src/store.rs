use std::collections::{BTreeMap, HashMap};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{CorrectionError, Result};

macro_rules! id_newtype {
    ($name:ident, $prefix:literal) => {
        #[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub u32);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "-{}"), self.0)
            }
        }
    };
}

id_newtype!(ProjectId, "proj");
id_newtype!(SampleId, "samp");
id_newtype!(MeasurementId, "meas");

/// Element symbol used as the map key throughout the pipeline.
#[derive(Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Debug, Serialize, Deserialize)]
pub struct ElementSymbol(pub String);

impl fmt::Display for ElementSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ElementSymbol {
    fn from(symbol: &str) -> Self {
        Self(symbol.to_owned())
    }
}

/// Static reference dimension for an element. Only `active` elements
/// participate in correction passes.
#[derive(Clone, Debug)]
pub struct Element {
    pub symbol: ElementSymbol,
    pub name: String,
    pub atomic_number: u32,
    pub active: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleKind {
    Standard,
    Blank,
    CertifiedReference,
    PeriodicReference,
    Unknown,
}

impl SampleKind {
    /// Import-time classification from a sample label.
    ///
    /// This reproduces the label-substring heuristic used by instrument
    /// export files (BLK/CRM/RM/STD). It runs once when a sample enters the
    /// store; all runtime logic dispatches on the resulting tag, never on the
    /// label text.
    #[must_use]
    pub fn infer(label: &str) -> Self {
        let upper = label.trim().to_uppercase();
        if upper.contains("BLK") || upper.contains("BLANK") {
            Self::Blank
        } else if upper.contains("CRM") {
            Self::CertifiedReference
        } else if upper.contains("RM") {
            Self::PeriodicReference
        } else if upper.contains("STD") || upper.contains("STANDARD") {
            Self::Standard
        } else {
            Self::Unknown
        }
    }

    /// Samples that receive (rather than define) the blank/scale correction.
    #[must_use]
    pub(crate) fn receives_blank_scale(self) -> bool {
        !matches!(self, Self::Blank | Self::CertifiedReference)
    }
}

#[derive(Clone, Debug)]
pub struct Sample {
    pub id: SampleId,
    pub label: String,
    pub kind: SampleKind,
    pub run_at: Option<DateTime<Utc>>,
    pub dilution_factor: f64,
    pub weight: f64,
    pub volume: f64,
}

#[derive(Clone, Debug)]
pub struct Measurement {
    pub id: MeasurementId,
    pub sample: SampleId,
    pub element: ElementSymbol,
    pub raw_intensity: f64,
    /// Set by the calibration engine.
    pub concentration: Option<f64>,
    /// Set by the blank/scale and drift correctors.
    pub final_concentration: Option<f64>,
}

#[derive(Clone, Copy, Debug)]
pub struct CurvePoint {
    pub concentration: f64,
    pub intensity: f64,
}

/// Fitted intensity = slope * concentration + intercept relationship.
///
/// At most one curve per (project, element) is active; activating a new curve
/// deactivates all prior ones for that element.
#[derive(Clone, Debug)]
pub struct CalibrationCurve {
    pub element: ElementSymbol,
    pub slope: f64,
    pub intercept: f64,
    pub r_squared: f64,
    pub points: Vec<CurvePoint>,
    /// Set when fewer than two distinct-concentration standards were
    /// available and the identity curve was persisted instead of a fit.
    pub low_confidence: bool,
    pub active: bool,
}

/// One project's sample/measurement graph, stored as flat tables keyed by id
/// so correctors read and write by identifier and snapshots are value copies.
#[derive(Clone, Debug, Default)]
pub struct Project {
    pub name: String,
    elements: Vec<Element>,
    samples: BTreeMap<SampleId, Sample>,
    /// Run order; also the x axis for index-based fits.
    order: Vec<SampleId>,
    measurements: BTreeMap<MeasurementId, Measurement>,
    by_sample_element: HashMap<(SampleId, ElementSymbol), MeasurementId>,
    curves: Vec<CalibrationCurve>,
    next_sample: u32,
    next_measurement: u32,
}

impl Project {
    pub fn add_element(&mut self, symbol: &str, name: &str, atomic_number: u32) {
        self.elements.push(Element {
            symbol: ElementSymbol::from(symbol),
            name: name.to_owned(),
            atomic_number,
            active: true,
        });
    }

    pub fn set_element_active(&mut self, symbol: &ElementSymbol, active: bool) {
        for element in &mut self.elements {
            if &element.symbol == symbol {
                element.active = active;
            }
        }
    }

    pub fn active_elements(&self) -> impl Iterator<Item = &Element> {
        self.elements.iter().filter(|e| e.active)
    }

    pub fn add_sample(
        &mut self,
        label: &str,
        kind: SampleKind,
        run_at: Option<DateTime<Utc>>,
    ) -> SampleId {
        let id = SampleId(self.next_sample);
        self.next_sample += 1;
        self.samples.insert(
            id,
            Sample {
                id,
                label: label.to_owned(),
                kind,
                run_at,
                dilution_factor: 1.0,
                weight: 1.0,
                volume: 10.0,
            },
        );
        self.order.push(id);
        id
    }

    /// Add a sample classifying it from its label (import path).
    pub fn add_sample_inferred(&mut self, label: &str, run_at: Option<DateTime<Utc>>) -> SampleId {
        self.add_sample(label, SampleKind::infer(label), run_at)
    }

    pub fn add_measurement(
        &mut self,
        sample: SampleId,
        element: &ElementSymbol,
        raw_intensity: f64,
    ) -> Result<MeasurementId> {
        if !self.samples.contains_key(&sample) {
            return Err(CorrectionError::SampleNotFound(sample));
        }
        let id = MeasurementId(self.next_measurement);
        self.next_measurement += 1;
        self.measurements.insert(
            id,
            Measurement {
                id,
                sample,
                element: element.clone(),
                raw_intensity,
                concentration: None,
                final_concentration: None,
            },
        );
        self.by_sample_element.insert((sample, element.clone()), id);
        Ok(id)
    }

    #[must_use]
    pub fn sample(&self, id: SampleId) -> Option<&Sample> {
        self.samples.get(&id)
    }

    pub fn sample_mut(&mut self, id: SampleId) -> Option<&mut Sample> {
        self.samples.get_mut(&id)
    }

    /// Samples in run order.
    pub fn samples_ordered(&self) -> impl Iterator<Item = &Sample> {
        self.order.iter().filter_map(|id| self.samples.get(id))
    }

    pub fn samples_of_kind(&self, kind: SampleKind) -> impl Iterator<Item = &Sample> {
        self.samples_ordered().filter(move |s| s.kind == kind)
    }

    #[must_use]
    pub fn measurement(&self, id: MeasurementId) -> Option<&Measurement> {
        self.measurements.get(&id)
    }

    pub fn measurement_mut(&mut self, id: MeasurementId) -> Option<&mut Measurement> {
        self.measurements.get_mut(&id)
    }

    #[must_use]
    pub fn measurement_for(&self, sample: SampleId, element: &ElementSymbol) -> Option<&Measurement> {
        self.by_sample_element
            .get(&(sample, element.clone()))
            .and_then(|id| self.measurements.get(id))
    }

    pub fn measurements(&self) -> impl Iterator<Item = &Measurement> {
        self.measurements.values()
    }

    pub(crate) fn measurements_mut(&mut self) -> impl Iterator<Item = &mut Measurement> {
        self.measurements.values_mut()
    }

    /// Install `curve` as the active curve for its element, deactivating
    /// every previously active curve for the same element.
    pub fn activate_curve(&mut self, mut curve: CalibrationCurve) -> &CalibrationCurve {
        for existing in &mut self.curves {
            if existing.element == curve.element {
                existing.active = false;
            }
        }
        curve.active = true;
        self.curves.push(curve);
        self.curves.last().expect("curve just pushed")
    }

    #[must_use]
    pub fn active_curve(&self, element: &ElementSymbol) -> Option<&CalibrationCurve> {
        self.curves
            .iter()
            .find(|c| c.active && &c.element == element)
    }

    pub fn curves(&self) -> impl Iterator<Item = &CalibrationCurve> {
        self.curves.iter()
    }
}

/// All projects known to the pipeline, keyed by id.
#[derive(Debug, Default)]
pub struct ProjectStore {
    projects: HashMap<ProjectId, Project>,
    next: u32,
}

impl ProjectStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_project(&mut self, name: &str) -> ProjectId {
        let id = ProjectId(self.next);
        self.next += 1;
        self.projects.insert(
            id,
            Project {
                name: name.to_owned(),
                ..Project::default()
            },
        );
        id
    }

    pub fn project(&self, id: ProjectId) -> Result<&Project> {
        self.projects
            .get(&id)
            .ok_or(CorrectionError::ProjectNotFound(id))
    }

    pub fn project_mut(&mut self, id: ProjectId) -> Result<&mut Project> {
        self.projects
            .get_mut(&id)
            .ok_or(CorrectionError::ProjectNotFound(id))
    }
}

#[cfg(test)]
mod tests {
    use super::{ElementSymbol, ProjectStore, SampleKind};

    #[test]
    fn label_heuristic_classifies_known_prefixes() {
        assert_eq!(SampleKind::infer(" BLK-01 "), SampleKind::Blank);
        assert_eq!(SampleKind::infer("OREAS CRM 25a"), SampleKind::CertifiedReference);
        assert_eq!(SampleKind::infer("rm2 check"), SampleKind::PeriodicReference);
        assert_eq!(SampleKind::infer("STD 5ppm"), SampleKind::Standard);
        assert_eq!(SampleKind::infer("soil 117"), SampleKind::Unknown);
    }

    #[test]
    fn activating_a_curve_deactivates_previous_ones() {
        let mut store = ProjectStore::new();
        let id = store.create_project("demo");
        let project = store.project_mut(id).unwrap();

        let element = ElementSymbol::from("Fe");
        for slope in [1.0, 2.0, 3.0] {
            project.activate_curve(super::CalibrationCurve {
                element: element.clone(),
                slope,
                intercept: 0.0,
                r_squared: 1.0,
                points: vec![],
                low_confidence: false,
                active: true,
            });
        }

        let active: Vec<_> = project
            .curves()
            .filter(|c| c.active && c.element == element)
            .collect();
        assert_eq!(active.len(), 1);
        approx::assert_relative_eq!(active[0].slope, 3.0);
    }

    #[test]
    fn missing_project_lookup_fails() {
        let store = ProjectStore::new();
        assert!(store.project(super::ProjectId(7)).is_err());
    }
}
