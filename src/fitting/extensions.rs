use super::{
    Calibrator, Candidate, FilterState, Linearization, MeasurementSelector, Observation, Selection,
    Smoother, TrackState, UpdateResult, Updater,
};
use crate::error::EngineError;
use crate::geometry::Surface;
use crate::helix::wrap_angle;
use crate::types::{bound, BoundMatrix, BoundVector, Measurement};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// How many local coordinates the calibrator hands to the filter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CalibrationMode {
    /// Follow the measurement: strips give 1D, pixels 2D.
    #[default]
    Auto,
    /// Always only the `u` coordinate.
    Strip,
}

pub struct DefaultCalibrator<'a> {
    measurements: &'a [Measurement],
    mode: CalibrationMode,
}

impl<'a> DefaultCalibrator<'a> {
    pub fn new(measurements: &'a [Measurement], mode: CalibrationMode) -> Self {
        Self { measurements, mode }
    }
}

impl Calibrator for DefaultCalibrator<'_> {
    fn calibrate(&self, index: usize, surface: &Surface) -> Option<Observation> {
        let measurement = self.measurements.get(index)?;
        if measurement.layer_id != surface.layer_id {
            return None;
        }
        let dim = match self.mode {
            CalibrationMode::Auto => measurement.dimension(),
            CalibrationMode::Strip => 1,
        };
        Some(Observation {
            index,
            surface: surface.id,
            values: DVector::from_fn(dim, |r, _| measurement.local[r]),
            covariance: DMatrix::from_fn(dim, dim, |r, c| measurement.covariance[(r, c)]),
        })
    }
}

/// Residual, its covariance and the inverse of that covariance.
fn residual_terms(
    state: &FilterState,
    linearization: &Linearization,
    observation: &Observation,
) -> Result<(DVector<f64>, DMatrix<f64>, DMatrix<f64>), EngineError> {
    let p = DMatrix::from_column_slice(5, 5, state.covariance.as_slice());
    let h = &linearization.projection;
    let residual = &observation.values - &linearization.predicted;
    let s = h * &p * h.transpose() + &observation.covariance;
    let s_inv = s
        .clone()
        .try_inverse()
        .ok_or(EngineError::Singular("residual covariance"))?;
    Ok((residual, s, s_inv))
}

/// Chi-square of `observation` against the prediction, before any update.
pub(crate) fn predicted_chi2(
    state: &FilterState,
    linearization: &Linearization,
    observation: &Observation,
) -> Result<f64, EngineError> {
    let (residual, _, s_inv) = residual_terms(state, linearization, observation)?;
    Ok((residual.transpose() * s_inv * &residual)[(0, 0)])
}

/// Kalman update in gain-matrix form with a Joseph covariance update.
#[derive(Clone, Copy, Debug, Default)]
pub struct GainMatrixUpdater;

impl Updater for GainMatrixUpdater {
    fn update(
        &self,
        state: &FilterState,
        linearization: &Linearization,
        observation: &Observation,
    ) -> Result<UpdateResult, EngineError> {
        let (residual, _, s_inv) = residual_terms(state, linearization, observation)?;
        let p = DMatrix::from_column_slice(5, 5, state.covariance.as_slice());
        let h = &linearization.projection;
        let gain = &p * h.transpose() * &s_inv;

        let delta = &gain * &residual;
        let mut params = state.params + BoundVector::from_iterator(delta.iter().copied());
        params[bound::PHI] = wrap_angle(params[bound::PHI]);

        let i_kh = DMatrix::<f64>::identity(5, 5) - &gain * h;
        let updated =
            &i_kh * &p * i_kh.transpose() + &gain * &observation.covariance * gain.transpose();
        let covariance = BoundMatrix::from_iterator(updated.iter().copied());
        let covariance = (covariance + covariance.transpose()) * 0.5;

        let chi2 = (residual.transpose() * &s_inv * &residual)[(0, 0)];
        Ok(UpdateResult {
            state: FilterState { params, covariance },
            chi2,
        })
    }
}

/// Rauch-Tung-Striebel smoother for states sharing one parameterisation.
#[derive(Clone, Copy, Debug, Default)]
pub struct GainMatrixSmoother;

impl Smoother for GainMatrixSmoother {
    fn smooth(&self, states: &mut [TrackState]) -> Result<(), EngineError> {
        let Some(last) = states.last_mut() else {
            return Ok(());
        };
        last.smoothed = Some(last.filtered.clone());
        for k in (0..states.len() - 1).rev() {
            let (head, tail) = states.split_at_mut(k + 1);
            let current = &mut head[k];
            let next = &tail[0];
            let Some(next_smoothed) = next.smoothed.as_ref() else {
                return Err(EngineError::Singular("smoother state"));
            };
            let predicted_inv = next
                .predicted
                .covariance
                .try_inverse()
                .ok_or(EngineError::Singular("predicted covariance"))?;
            let gain = current.filtered.covariance * predicted_inv;
            let mut diff = next_smoothed.params - next.predicted.params;
            diff[bound::PHI] = wrap_angle(diff[bound::PHI]);
            let mut params = current.filtered.params + gain * diff;
            params[bound::PHI] = wrap_angle(params[bound::PHI]);
            let covariance = current.filtered.covariance
                + gain * (next_smoothed.covariance - next.predicted.covariance) * gain.transpose();
            current.smoothed = Some(FilterState {
                params,
                covariance: (covariance + covariance.transpose()) * 0.5,
            });
        }
        Ok(())
    }
}

/// Keeps the best candidates below `max_chi2`; otherwise flags the best one
/// as an outlier.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ChiSquareSelector {
    pub max_chi2: f64,
    pub max_per_surface: usize,
}

impl Default for ChiSquareSelector {
    fn default() -> Self {
        Self {
            max_chi2: f64::INFINITY,
            max_per_surface: 1,
        }
    }
}

impl MeasurementSelector for ChiSquareSelector {
    fn select(&self, candidates: &[Candidate]) -> Selection {
        if candidates.is_empty() {
            return Selection::None;
        }
        let mut order: Vec<usize> = (0..candidates.len()).collect();
        order.sort_by(|&a, &b| candidates[a].chi2.total_cmp(&candidates[b].chi2));
        let accepted: Vec<usize> = order
            .iter()
            .copied()
            .filter(|&i| candidates[i].chi2 <= self.max_chi2)
            .take(self.max_per_surface.max(1))
            .collect();
        if accepted.is_empty() {
            Selection::Outlier(order[0])
        } else {
            Selection::Accepted(accepted)
        }
    }
}
