use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// Ordered list of layer ids a seed draws one measurement from each.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SeedStrategy(pub Vec<u32>);

impl SeedStrategy {
    pub fn layers(&self) -> &[u32] {
        &self.0
    }
}

impl From<Vec<u32>> for SeedStrategy {
    fn from(layers: Vec<u32>) -> Self {
        Self(layers)
    }
}

/// Two seeds closer than these tolerances in every parameter are duplicates.
///
/// `d0`, `z0`, `phi` and `theta` are absolute; `qop` is relative to the
/// accepted seed's `q/p`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DedupTolerance {
    pub d0: f64,
    pub z0: f64,
    pub phi: f64,
    pub theta: f64,
    pub qop_relative: f64,
}

impl Default for DedupTolerance {
    fn default() -> Self {
        Self {
            d0: 0.01,
            z0: 0.01,
            phi: 1e-4,
            theta: 1e-4,
            qop_relative: 1e-3,
        }
    }
}

/// Seed construction and quality-gate parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SeedOptions {
    /// Minimum momentum (GeV).
    pub pmin: f64,
    /// Maximum momentum (GeV).
    pub pmax: f64,
    /// Maximum |d0| (mm).
    pub d0max: f64,
    /// Optional minimum |d0| (mm).
    pub d0min: Option<f64>,
    /// Maximum |z0| (mm).
    pub z0max: f64,
    /// Reference point of the seed perigee parameters.
    pub perigee_location: Vector3<f64>,
    /// Field along `z` (T).
    pub b_field: f64,
    /// Upper bound on measurement combinations tried per strategy.
    pub max_combinations: usize,
    /// Global position uncertainty assigned to every measurement in the fit (mm).
    pub position_sigma: f64,
    /// Scale applied to the propagated seed covariance.
    pub covariance_inflation: f64,
    pub dedup: DedupTolerance,
}

impl Default for SeedOptions {
    fn default() -> Self {
        Self {
            pmin: 0.05,
            pmax: 8.0,
            d0max: 20.0,
            d0min: None,
            z0max: 60.0,
            perigee_location: Vector3::new(-700.0, 0.0, 0.0),
            b_field: 1.5,
            max_combinations: 10_000,
            position_sigma: 0.05,
            covariance_inflation: 10.0,
            dedup: DedupTolerance::default(),
        }
    }
}
