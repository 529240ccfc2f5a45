use serde::{Deserialize, Serialize};

/// Numeric tunables for the correction pipeline.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Slopes below this magnitude are treated as non-invertible.
    pub slope_epsilon: f64,
    /// Step used when periodic-reference samples carry no timestamp and a
    /// synthetic timeline has to be assigned. The value has no physical
    /// justification; runs that hit this path are flagged in the drift
    /// diagnostics.
    pub synthetic_step_minutes: f64,
    pub search: SearchConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            slope_epsilon: 1e-10,
            synthetic_step_minutes: 30.0,
            search: SearchConfig::default(),
        }
    }
}

impl Config {
    /// Parse a configuration from a TOML document.
    ///
    /// # Errors
    /// Returns an error if the document is not valid TOML or does not match
    /// the configuration shape.
    pub fn from_toml_str(raw: &str) -> crate::Result<Self> {
        Ok(toml::from_str(raw)?)
    }
}

/// Parameters of the differential-evolution blank/scale search.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct SearchConfig {
    pub population_size: usize,
    pub max_iterations: usize,
    /// Mutation factor F.
    pub mutation: f64,
    /// Crossover probability CR.
    pub crossover: f64,
    pub blank_bounds: (f64, f64),
    pub scale_bounds: (f64, f64),
    /// A corrected reference value passes when its relative difference from
    /// the certified value, in percent, falls inside this window.
    pub min_diff_percent: f64,
    pub max_diff_percent: f64,
    /// Fixed RNG seed for reproducible searches. `None` seeds from entropy.
    pub seed: Option<u64>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            population_size: 30,
            max_iterations: 100,
            mutation: 0.8,
            crossover: 0.9,
            blank_bounds: (-100.0, 100.0),
            scale_bounds: (0.5, 2.0),
            min_diff_percent: -10.0,
            max_diff_percent: 10.0,
            seed: None,
        }
    }
}
