//! Correction pipeline for elemental assay runs.
//!
//! Raw instrument intensities become certified concentrations in three
//! passes: a per-element calibration curve fitted from standards, a
//! blank/scale bias correction derived from certified reference materials,
//! and a time-drift correction derived from periodically interspersed
//! reference samples. Every mutating pass pushes an undo snapshot first, so
//! corrections stay exploratory until a caller exports.

#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod blank_scale;
pub mod calibration;
pub mod cancel;
pub mod config;
pub mod drift;
mod error;
pub mod history;
pub mod pipeline;
pub mod reference;
pub mod regression;
pub mod search;
pub mod store;

pub use cancel::CancelToken;
pub use config::{Config, SearchConfig};
pub use error::{CorrectionError, Result};
pub use history::{CorrectionHistory, CorrectionKind, CorrectionSnapshot};
pub use pipeline::Pipeline;
pub use reference::{CertifiedTable, ReferenceProvider};
pub use store::{
    CalibrationCurve, CurvePoint, Element, ElementSymbol, Measurement, MeasurementId, Project,
    ProjectId, ProjectStore, Sample, SampleId, SampleKind,
};
