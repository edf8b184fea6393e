use super::engine::{filter_links, final_parameters, start_state};
use super::{
    BoundParameters, FilterState, FindingOptions, FitterExtensions, RefitResult, SourceLink,
    TrackRefitter, TrackState,
};
use crate::error::EngineError;
use crate::geometry::GeometryProvider;
use crate::helix::wrap_angle;
use crate::types::{bound, BoundMatrix, BoundVector};
use log::debug;

/// Kalman refit over an already selected measurement set.
pub struct KalmanRefitter<'g, G: GeometryProvider + ?Sized> {
    geometry: &'g G,
    /// Process measurements from the outermost inwards.
    pub reverse: bool,
    /// Scale applied to the start covariance to loosen the prior.
    pub covariance_inflation: f64,
}

impl<'g, G: GeometryProvider + ?Sized> KalmanRefitter<'g, G> {
    pub fn new(geometry: &'g G, reverse: bool) -> Self {
        Self {
            geometry,
            reverse,
            covariance_inflation: 100.0,
        }
    }
}

impl<G: GeometryProvider + ?Sized> TrackRefitter for KalmanRefitter<'_, G> {
    fn name(&self) -> &'static str {
        if self.reverse {
            "kalman-reverse"
        } else {
            "kalman"
        }
    }

    fn refit(
        &self,
        start: &BoundParameters,
        links: &[SourceLink],
        extensions: &FitterExtensions<'_>,
        options: &FindingOptions,
    ) -> Result<RefitResult, EngineError> {
        let mut initial = start_state(start)?;
        initial.covariance *= self.covariance_inflation;
        let mut ordered = links.to_vec();
        if self.reverse {
            ordered.reverse();
        }
        let states = filter_links(
            self.geometry,
            initial,
            &start.reference,
            &ordered,
            extensions,
            &options.propagation,
        )?;
        Ok(summarize(start, &states, options))
    }
}

/// Gaussian-sum refit: a small bank of Kalman filters that differ in the
/// starting momentum, merged by their chi-square likelihood.
pub struct GaussianSumRefitter<'g, G: GeometryProvider + ?Sized> {
    geometry: &'g G,
    pub max_components: usize,
    /// Relative spread of the component momenta around the start value.
    pub momentum_spread: f64,
    pub covariance_inflation: f64,
}

impl<'g, G: GeometryProvider + ?Sized> GaussianSumRefitter<'g, G> {
    pub fn new(geometry: &'g G, max_components: usize) -> Self {
        Self {
            geometry,
            max_components,
            momentum_spread: 0.1,
            covariance_inflation: 100.0,
        }
    }

    fn component_offsets(&self) -> Vec<f64> {
        let n = self.max_components.max(1);
        if n == 1 {
            return vec![0.0];
        }
        (0..n)
            .map(|k| -1.0 + 2.0 * k as f64 / (n - 1) as f64)
            .collect()
    }
}

impl<G: GeometryProvider + ?Sized> TrackRefitter for GaussianSumRefitter<'_, G> {
    fn name(&self) -> &'static str {
        "gaussian-sum"
    }

    fn refit(
        &self,
        start: &BoundParameters,
        links: &[SourceLink],
        extensions: &FitterExtensions<'_>,
        options: &FindingOptions,
    ) -> Result<RefitResult, EngineError> {
        let base = start_state(start)?;
        let mut components: Vec<(f64, Vec<TrackState>)> = Vec::new();
        let mut last_error = None;
        for offset in self.component_offsets() {
            let mut initial = base.clone();
            initial.params[bound::QOP] *= 1.0 + self.momentum_spread * offset;
            initial.covariance *= self.covariance_inflation;
            match filter_links(
                self.geometry,
                initial,
                &start.reference,
                links,
                extensions,
                &options.propagation,
            ) {
                Ok(states) => {
                    let chi2: f64 = states.iter().map(|s| s.chi2).sum();
                    components.push((chi2, states));
                }
                Err(err) => {
                    debug!("GaussianSumRefitter::refit component {offset:+.2} failed: {err}");
                    last_error = Some(err);
                }
            }
        }
        if components.is_empty() {
            return Err(last_error.unwrap_or(EngineError::NoMeasurements));
        }

        let best_chi2 = components
            .iter()
            .map(|(chi2, _)| *chi2)
            .fold(f64::INFINITY, f64::min);
        let weights: Vec<f64> = components
            .iter()
            .map(|(chi2, _)| (-0.5 * (chi2 - best_chi2)).exp())
            .collect();
        let total: f64 = weights.iter().sum();

        let finals: Vec<FilterState> = components
            .iter()
            .filter_map(|(_, states)| states.last().map(|s| s.filtered.clone()))
            .collect();
        let anchor = finals[0].params;
        let mut mean = BoundVector::zeros();
        for (w, state) in weights.iter().zip(&finals) {
            mean += relative_to(&state.params, &anchor) * (w / total);
        }
        mean += anchor;
        mean[bound::PHI] = wrap_angle(mean[bound::PHI]);

        let mut covariance = BoundMatrix::zeros();
        for (w, state) in weights.iter().zip(&finals) {
            let spread = relative_to(&state.params, &mean);
            covariance += (state.covariance + spread * spread.transpose()) * (w / total);
        }

        let merged = FilterState {
            params: mean,
            covariance,
        };
        let chi2: f64 = weights
            .iter()
            .zip(&components)
            .map(|(w, (chi2, _))| chi2 * w / total)
            .sum();
        let ndf: i32 = components[0].1.iter().map(|s| s.dim as i32).sum();
        let fitted = final_parameters(
            start,
            &[merged_state(&components[0].1[0], merged)],
            options,
        );
        debug!(
            "GaussianSumRefitter::refit merged {} components chi2={chi2:.3}",
            components.len()
        );
        Ok(RefitResult {
            fitted,
            chi2,
            ndf,
            n_measurements: links.len(),
        })
    }
}

fn relative_to(params: &BoundVector, anchor: &BoundVector) -> BoundVector {
    let mut diff = params - anchor;
    diff[bound::PHI] = wrap_angle(diff[bound::PHI]);
    diff
}

fn merged_state(template: &TrackState, merged: FilterState) -> TrackState {
    TrackState {
        smoothed: Some(merged.clone()),
        filtered: merged,
        ..template.clone()
    }
}

fn summarize(start: &BoundParameters, states: &[TrackState], options: &FindingOptions) -> RefitResult {
    RefitResult {
        fitted: final_parameters(start, states, options),
        chi2: states.iter().map(|s| s.chi2).sum(),
        ndf: states.iter().map(|s| s.dim as i32).sum(),
        n_measurements: states.len(),
    }
}
