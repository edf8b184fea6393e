//! Event data records shared by every reconstruction stage.

use nalgebra::{Matrix2, Matrix5, Vector2, Vector3, Vector5};
use serde::{Deserialize, Serialize};

/// Perigee parameter vector `[d0, z0, phi, theta, q/p]`.
pub type BoundVector = Vector5<f64>;
/// Covariance of a [`BoundVector`].
pub type BoundMatrix = Matrix5<f64>;

/// Positions of the perigee parameters inside a [`BoundVector`].
pub mod bound {
    pub const D0: usize = 0;
    pub const Z0: usize = 1;
    pub const PHI: usize = 2;
    pub const THETA: usize = 3;
    pub const QOP: usize = 4;
}

/// Simulated energy deposit of one particle in one sensor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawHit {
    /// Sensor identifier, also used as the layer id for surface lookup.
    pub sensor_id: u32,
    /// Identifier of the particle that produced the deposit.
    pub track_id: i32,
    /// Particle species code.
    pub pdg_id: i32,
    /// Global position (mm).
    pub position: Vector3<f64>,
    /// Momentum at the deposit (GeV).
    pub momentum: Vector3<f64>,
    /// Deposited energy (MeV).
    pub edep: f64,
    /// Total particle energy (GeV).
    pub energy: f64,
    /// Time of the deposit (ns).
    pub time: f64,
    /// Path length inside the sensor (mm).
    pub path_length: f64,
}

/// A hit after same-sensor, same-particle deposits were combined.
pub type MergedHit = RawHit;

/// Calibrated position measurement on a sensor surface.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Measurement {
    /// Position in the surface frame `(u, v)`.
    pub local: Vector2<f64>,
    pub global: Vector3<f64>,
    pub layer_id: u32,
    /// Diagonal local covariance `diag(σu², σv²)`.
    pub covariance: Matrix2<f64>,
    pub time: f64,
}

impl Measurement {
    /// Number of measured coordinates: strips only constrain `u`.
    pub fn dimension(&self) -> usize {
        if self.covariance[(1, 1)] > 0.0 {
            2
        } else {
            1
        }
    }

    pub fn is_strip(&self) -> bool {
        self.dimension() == 1
    }
}

/// Helical track estimate built from a handful of measurements.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Seed {
    pub params: BoundVector,
    /// Reference point the perigee parameters are expressed at.
    pub perigee: Vector3<f64>,
    pub covariance: BoundMatrix,
    /// Indices into the measurement collection the seed was fitted to.
    pub measurements: Vec<usize>,
    /// Index of the strategy that produced the seed.
    pub strategy: usize,
    /// Least-squares chi-square of the seed fit.
    pub chi2: f64,
}

impl Seed {
    pub fn momentum(&self) -> f64 {
        momentum_from_qop(self.params[bound::QOP])
    }

    pub fn charge(&self) -> f64 {
        charge_from_qop(self.params[bound::QOP])
    }
}

/// Finalized track record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    /// Reference point of the perigee parameters.
    pub perigee: Vector3<f64>,
    pub params: BoundVector,
    pub covariance: BoundMatrix,
    /// Global momentum at the perigee (GeV).
    pub momentum: Vector3<f64>,
    /// Global position of the point of closest approach (mm).
    pub position: Vector3<f64>,
    pub chi2: f64,
    pub ndf: i32,
    pub n_hits: usize,
    pub n_shared_hits: usize,
}

impl Track {
    pub fn charge(&self) -> f64 {
        charge_from_qop(self.params[bound::QOP])
    }

    pub fn p(&self) -> f64 {
        momentum_from_qop(self.params[bound::QOP])
    }
}

pub(crate) fn charge_from_qop(qop: f64) -> f64 {
    if qop < 0.0 {
        -1.0
    } else {
        1.0
    }
}

pub(crate) fn momentum_from_qop(qop: f64) -> f64 {
    if qop == 0.0 {
        f64::INFINITY
    } else {
        1.0 / qop.abs()
    }
}
