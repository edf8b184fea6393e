//! Interfaces between the track finder and a trajectory fitting engine.
//!
//! Modules
//! - `extensions`: default calibrator, gain-matrix updater and smoother,
//!   chi-square measurement selector.
//! - `engine`: [`ReferenceEngine`], a Kalman filter on perigee parameters
//!   that follows an analytic helix through the sensor planes.
//! - `refit`: forward/reverse Kalman refit and a Gaussian-sum refit.
//!
//! Key ideas
//! - Every filter state is expressed as perigee parameters at the start
//!   reference point, so transport between surfaces is the identity and
//!   only the measurement projection is linearised.
//! - The four substitutable strategies travel together in
//!   [`FitterExtensions`].

pub mod engine;
pub mod extensions;
pub mod refit;

pub use engine::ReferenceEngine;
pub use extensions::{
    CalibrationMode, ChiSquareSelector, DefaultCalibrator, GainMatrixSmoother, GainMatrixUpdater,
};
pub use refit::{GaussianSumRefitter, KalmanRefitter};

use crate::error::EngineError;
use crate::geometry::{Surface, SurfaceId};
use crate::helix::transport_perigee_with_covariance;
use crate::types::{bound, charge_from_qop, BoundMatrix, BoundVector};
use nalgebra::{DMatrix, DVector, Vector3};
use serde::{Deserialize, Serialize};

/// Perigee parameters at a reference point, with optional covariance.
#[derive(Clone, Debug, PartialEq)]
pub struct BoundParameters {
    pub reference: Vector3<f64>,
    pub params: BoundVector,
    pub covariance: Option<BoundMatrix>,
}

impl BoundParameters {
    pub fn charge(&self) -> f64 {
        charge_from_qop(self.params[bound::QOP])
    }

    /// Point of closest approach to the reference.
    pub fn position(&self) -> Vector3<f64> {
        let d0 = self.params[bound::D0];
        let (sin_phi, cos_phi) = self.params[bound::PHI].sin_cos();
        self.reference + Vector3::new(-d0 * sin_phi, d0 * cos_phi, self.params[bound::Z0])
    }

    pub fn momentum(&self) -> Vector3<f64> {
        let p = crate::types::momentum_from_qop(self.params[bound::QOP]);
        let (sin_theta, cos_theta) = self.params[bound::THETA].sin_cos();
        let (sin_phi, cos_phi) = self.params[bound::PHI].sin_cos();
        Vector3::new(sin_theta * cos_phi, sin_theta * sin_phi, cos_theta) * p
    }

    /// The same trajectory expressed at another reference point.
    pub fn transported(&self, reference: &Vector3<f64>, bz: f64) -> Self {
        let covariance = self.covariance.unwrap_or_else(BoundMatrix::zeros);
        let (params, moved) = transport_perigee_with_covariance(
            &self.params,
            &covariance,
            &self.reference,
            reference,
            bz,
        );
        Self {
            reference: *reference,
            params,
            covariance: self.covariance.map(|_| moved),
        }
    }
}

/// Measurement lookup by surface, provided per event.
pub trait MeasurementSource {
    fn measurements_on(&self, surface: SurfaceId) -> &[usize];
}

/// A measurement index together with the surface it belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceLink {
    pub surface: SurfaceId,
    pub index: usize,
}

/// Calibrated measurement ready for the filter.
#[derive(Clone, Debug, PartialEq)]
pub struct Observation {
    pub index: usize,
    pub surface: SurfaceId,
    pub values: DVector<f64>,
    pub covariance: DMatrix<f64>,
}

impl Observation {
    pub fn dim(&self) -> usize {
        self.values.len()
    }
}

/// Filter estimate: parameters and covariance.
#[derive(Clone, Debug, PartialEq)]
pub struct FilterState {
    pub params: BoundVector,
    pub covariance: BoundMatrix,
}

/// Predicted local position and its derivative with respect to the state.
#[derive(Clone, Debug, PartialEq)]
pub struct Linearization {
    pub predicted: DVector<f64>,
    /// `dim × 5` projection.
    pub projection: DMatrix<f64>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct UpdateResult {
    pub state: FilterState,
    pub chi2: f64,
}

/// One measurement candidate on a surface with its predicted chi-square.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Candidate {
    pub index: usize,
    pub chi2: f64,
}

/// Selector decision over the candidates of one surface.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Selection {
    /// Positions into the candidate slice, best first.
    Accepted(Vec<usize>),
    /// Best candidate, kept on the trajectory but not used in the fit.
    Outlier(usize),
    None,
}

pub trait Calibrator {
    fn calibrate(&self, index: usize, surface: &Surface) -> Option<Observation>;
}

pub trait Updater {
    fn update(
        &self,
        state: &FilterState,
        linearization: &Linearization,
        observation: &Observation,
    ) -> Result<UpdateResult, EngineError>;
}

pub trait Smoother {
    fn smooth(&self, states: &mut [TrackState]) -> Result<(), EngineError>;
}

pub trait MeasurementSelector {
    fn select(&self, candidates: &[Candidate]) -> Selection;
}

/// The four strategies a fitting engine is parameterised with.
#[derive(Clone, Copy)]
pub struct FitterExtensions<'a> {
    pub calibrator: &'a dyn Calibrator,
    pub updater: &'a dyn Updater,
    pub smoother: &'a dyn Smoother,
    pub selector: &'a dyn MeasurementSelector,
}

/// Limits for following a trajectory through the detector.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PropagationOptions {
    /// Iteration limit per surface crossing.
    pub max_steps: usize,
    /// Maximum 3D path from the start parameters (mm); `None` is unbounded.
    pub path_limit: Option<f64>,
    /// Field along `z` (T).
    pub b_field: f64,
}

impl Default for PropagationOptions {
    fn default() -> Self {
        Self {
            max_steps: 100,
            path_limit: None,
            b_field: 1.5,
        }
    }
}

/// Reference point the final parameters are reported at.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ExtrapolationTarget {
    Fixed(Vector3<f64>),
    /// The reference point of each start parameter set.
    StartReference,
}

impl ExtrapolationTarget {
    pub fn resolve(&self, start: &BoundParameters) -> Vector3<f64> {
        match self {
            ExtrapolationTarget::Fixed(point) => *point,
            ExtrapolationTarget::StartReference => start.reference,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct FindingOptions {
    pub propagation: PropagationOptions,
    pub target: ExtrapolationTarget,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum TrackStateKind {
    Measurement,
    Outlier,
    Hole,
}

/// Trajectory state on one surface.
#[derive(Clone, Debug, PartialEq)]
pub struct TrackState {
    pub surface: SurfaceId,
    pub kind: TrackStateKind,
    /// Transverse path from the start parameters (mm).
    pub path: f64,
    pub measurement: Option<usize>,
    /// Dimension of the attached measurement, zero for holes.
    pub dim: usize,
    pub predicted: FilterState,
    pub filtered: FilterState,
    pub smoothed: Option<FilterState>,
    pub chi2: f64,
}

impl TrackState {
    pub fn is_measurement(&self) -> bool {
        self.kind == TrackStateKind::Measurement
    }
}

/// Counts describing a found trajectory.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrajectorySummary {
    pub n_states: usize,
    pub n_measurements: usize,
    pub n_outliers: usize,
    pub n_holes: usize,
    pub n_shared_hits: usize,
    pub chi2_sum: f64,
    pub ndf: i32,
}

impl TrajectorySummary {
    pub fn from_states(states: &[TrackState], n_shared_hits: usize) -> Self {
        let mut summary = Self {
            n_states: states.len(),
            n_shared_hits,
            ..Default::default()
        };
        for state in states {
            match state.kind {
                TrackStateKind::Measurement => {
                    summary.n_measurements += 1;
                    summary.chi2_sum += state.chi2;
                    summary.ndf += state.dim as i32;
                }
                TrackStateKind::Outlier => summary.n_outliers += 1,
                TrackStateKind::Hole => summary.n_holes += 1,
            }
        }
        summary
    }

    /// Every state is exactly one of measurement, outlier or hole.
    pub fn is_consistent(&self) -> bool {
        self.n_states == self.n_measurements + self.n_outliers + self.n_holes
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct FindingResult {
    /// Final parameters at the requested target.
    pub fitted: BoundParameters,
    pub summary: TrajectorySummary,
    pub states: Vec<TrackState>,
}

impl FindingResult {
    /// Measurements used in the fit, in trajectory order.
    pub fn source_links(&self) -> Vec<SourceLink> {
        self.states
            .iter()
            .filter(|s| s.is_measurement())
            .filter_map(|s| {
                s.measurement.map(|index| SourceLink {
                    surface: s.surface,
                    index,
                })
            })
            .collect()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RefitResult {
    pub fitted: BoundParameters,
    pub chi2: f64,
    pub ndf: i32,
    pub n_measurements: usize,
}

/// Combinatorial track finding over all start parameters of an event.
pub trait TrackFindingEngine {
    /// One result per start parameter set, in the same order.
    fn find_tracks(
        &self,
        starts: &[BoundParameters],
        source: &dyn MeasurementSource,
        extensions: &FitterExtensions<'_>,
        options: &FindingOptions,
    ) -> Vec<Result<FindingResult, EngineError>>;
}

/// Refit of an already found measurement subset.
pub trait TrackRefitter {
    fn name(&self) -> &'static str;

    fn refit(
        &self,
        start: &BoundParameters,
        links: &[SourceLink],
        extensions: &FitterExtensions<'_>,
        options: &FindingOptions,
    ) -> Result<RefitResult, EngineError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn state(kind: TrackStateKind, dim: usize, chi2: f64) -> TrackState {
        let filter = FilterState {
            params: BoundVector::zeros(),
            covariance: BoundMatrix::identity(),
        };
        TrackState {
            surface: SurfaceId::new(1, 1, 1),
            kind,
            path: 0.0,
            measurement: None,
            dim,
            predicted: filter.clone(),
            filtered: filter,
            smoothed: None,
            chi2,
        }
    }

    #[test]
    fn summary_counts_states() {
        let states = vec![
            state(TrackStateKind::Measurement, 2, 1.0),
            state(TrackStateKind::Hole, 0, 0.0),
            state(TrackStateKind::Measurement, 1, 0.5),
            state(TrackStateKind::Outlier, 2, 30.0),
            state(TrackStateKind::Measurement, 2, 0.25),
        ];
        let summary = TrajectorySummary::from_states(&states, 1);
        assert_eq!(summary.n_states, 5);
        assert_eq!(summary.n_measurements, 3);
        assert_eq!(summary.n_holes, 1);
        assert_eq!(summary.n_outliers, 1);
        assert_eq!(summary.ndf, 5);
        assert_abs_diff_eq!(summary.chi2_sum, 1.75, epsilon = 1e-12);
        assert!(summary.is_consistent());
    }

    #[test]
    fn perigee_position_and_momentum() {
        let parameters = BoundParameters {
            reference: Vector3::new(-700.0, 0.0, 0.0),
            params: BoundVector::new(2.0, 3.0, 0.0, std::f64::consts::FRAC_PI_2, -0.5),
            covariance: None,
        };
        let position = parameters.position();
        assert_abs_diff_eq!(position.x, -700.0, epsilon = 1e-12);
        assert_abs_diff_eq!(position.y, 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(position.z, 3.0, epsilon = 1e-12);
        let momentum = parameters.momentum();
        assert_abs_diff_eq!(momentum.x, 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(momentum.z, 0.0, epsilon = 1e-12);
        assert_eq!(parameters.charge(), -1.0);
    }
}
