use crate::fitting::{CalibrationMode, PropagationOptions};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// Track candidate selection and engine configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FinderOptions {
    /// Minimum number of measurements on an accepted trajectory.
    pub min_hits: usize,
    /// Run the engine only when the event holds exactly one seed.
    pub single_track: bool,
    /// Report final parameters at `extrapolation_location`.
    pub use_extrapolation_target: bool,
    pub extrapolation_location: Vector3<f64>,
    /// Report final parameters at each seed's own perigee reference.
    pub use_seed_perigee: bool,
    /// Reverse-direction Kalman refit of accepted tracks.
    pub enable_refit_a: bool,
    /// Gaussian-sum refit of accepted tracks.
    pub enable_refit_b: bool,
    /// Feed only the `u` coordinate to the filter. When off, strip
    /// measurements (`sigma_v == 0`) are still filtered as 1D, so the default
    /// strip telescope sees the same observations either way.
    pub use_1d_measurements: bool,
    /// Chi-square cut of the measurement selector; `None` accepts everything.
    pub max_chi2: Option<f64>,
    pub max_measurements_per_surface: usize,
    pub propagation: PropagationOptions,
}

impl Default for FinderOptions {
    fn default() -> Self {
        Self {
            min_hits: 7,
            single_track: true,
            use_extrapolation_target: true,
            extrapolation_location: Vector3::zeros(),
            use_seed_perigee: false,
            enable_refit_a: false,
            enable_refit_b: false,
            use_1d_measurements: false,
            max_chi2: None,
            max_measurements_per_surface: 1,
            propagation: PropagationOptions::default(),
        }
    }
}

impl FinderOptions {
    pub fn calibration_mode(&self) -> CalibrationMode {
        if self.use_1d_measurements {
            CalibrationMode::Strip
        } else {
            CalibrationMode::Auto
        }
    }
}
