//! Reference combinatorial finder: helix navigation plus an extended Kalman
//! filter.
//!
//! Starting from perigee parameters the engine intersects the current helix
//! with every surface, orders the crossings by path and walks them once. On
//! each surface the calibrated measurements are scored by their predicted
//! chi-square, the selector decides which ones enter the fit, and surfaces
//! inside their bounds without a measurement become holes. No material or
//! energy loss is modelled.

use super::extensions::predicted_chi2;
use super::{
    BoundParameters, Candidate, FilterState, FindingOptions, FindingResult, FitterExtensions,
    Linearization, MeasurementSource, Observation, PropagationOptions, Selection, SourceLink,
    TrackFindingEngine, TrackState, TrackStateKind, TrajectorySummary,
};
use crate::error::EngineError;
use crate::geometry::{GeometryProvider, Surface};
use crate::helix::{perigee_steps, Helix};
use crate::types::{bound, BoundMatrix, BoundVector};
use log::{debug, warn};
use nalgebra::{DMatrix, DVector, Vector2, Vector3};
use std::collections::HashSet;
use std::f64::consts::PI;

pub struct ReferenceEngine<'g, G: GeometryProvider + ?Sized> {
    geometry: &'g G,
}

impl<'g, G: GeometryProvider + ?Sized> ReferenceEngine<'g, G> {
    pub fn new(geometry: &'g G) -> Self {
        Self { geometry }
    }

    pub fn geometry(&self) -> &'g G {
        self.geometry
    }

    /// Surfaces crossed by the start helix, ordered by path.
    fn route(
        &self,
        state: &FilterState,
        reference: &Vector3<f64>,
        propagation: &PropagationOptions,
    ) -> Vec<&'g Surface> {
        let helix = Helix::from_perigee(&state.params, reference, propagation.b_field);
        let mut crossings: Vec<(f64, &'g Surface)> = self
            .geometry
            .surfaces()
            .iter()
            .filter_map(|surface| {
                helix
                    .intersect_plane(
                        &surface.center,
                        &surface.normal(),
                        propagation.max_steps,
                        propagation.path_limit,
                    )
                    .map(|path| (path, surface))
            })
            .collect();
        crossings.sort_by(|a, b| a.0.total_cmp(&b.0));
        crossings.into_iter().map(|(_, surface)| surface).collect()
    }

    fn follow(
        &self,
        start: &BoundParameters,
        source: &dyn MeasurementSource,
        extensions: &FitterExtensions<'_>,
        options: &FindingOptions,
    ) -> Result<Vec<TrackState>, EngineError> {
        let propagation = &options.propagation;
        let reference = start.reference;
        let mut state = start_state(start)?;
        let route = self.route(&state, &reference, propagation);
        if route.is_empty() {
            return Err(EngineError::NoReachableSurface);
        }

        let mut states: Vec<TrackState> = Vec::new();
        'surfaces: for surface in route {
            let observations: Vec<Observation> = source
                .measurements_on(surface.id)
                .iter()
                .filter_map(|&idx| extensions.calibrator.calibrate(idx, surface))
                .collect();

            if observations.is_empty() {
                if states.iter().any(TrackState::is_measurement) {
                    if let Some(hole) = hole_state(&state, &reference, surface, propagation) {
                        states.push(hole);
                    }
                }
                continue;
            }

            let mut candidates = Vec::with_capacity(observations.len());
            let mut path = 0.0;
            for obs in &observations {
                let (linearization, s) =
                    match linearize(&state, &reference, surface, obs.dim(), propagation) {
                        Ok(lin) => lin,
                        Err(err) => {
                            debug!("ReferenceEngine::follow skipping surface {}: {err}", surface.id);
                            continue 'surfaces;
                        }
                    };
                path = s;
                candidates.push(Candidate {
                    index: obs.index,
                    chi2: predicted_chi2(&state, &linearization, obs)?,
                });
            }

            match extensions.selector.select(&candidates) {
                Selection::Accepted(picks) => {
                    for pick in picks {
                        let obs = &observations[pick];
                        let (linearization, s) =
                            linearize(&state, &reference, surface, obs.dim(), propagation)?;
                        let update = extensions.updater.update(&state, &linearization, obs)?;
                        states.push(TrackState {
                            surface: surface.id,
                            kind: TrackStateKind::Measurement,
                            path: s,
                            measurement: Some(obs.index),
                            dim: obs.dim(),
                            predicted: state.clone(),
                            filtered: update.state.clone(),
                            smoothed: None,
                            chi2: update.chi2,
                        });
                        state = update.state;
                    }
                }
                Selection::Outlier(pick) => states.push(TrackState {
                    surface: surface.id,
                    kind: TrackStateKind::Outlier,
                    path,
                    measurement: Some(observations[pick].index),
                    dim: observations[pick].dim(),
                    predicted: state.clone(),
                    filtered: state.clone(),
                    smoothed: None,
                    chi2: candidates[pick].chi2,
                }),
                Selection::None => {}
            }
        }

        while states
            .last()
            .is_some_and(|s| s.kind == TrackStateKind::Hole)
        {
            states.pop();
        }
        if !states.iter().any(TrackState::is_measurement) {
            return Err(EngineError::NoMeasurements);
        }
        Ok(states)
    }
}

impl<G: GeometryProvider + ?Sized> TrackFindingEngine for ReferenceEngine<'_, G> {
    fn find_tracks(
        &self,
        starts: &[BoundParameters],
        source: &dyn MeasurementSource,
        extensions: &FitterExtensions<'_>,
        options: &FindingOptions,
    ) -> Vec<Result<FindingResult, EngineError>> {
        let mut used: HashSet<usize> = HashSet::new();
        let mut results = Vec::with_capacity(starts.len());
        for (i, start) in starts.iter().enumerate() {
            let result = self
                .follow(start, source, extensions, options)
                .and_then(|mut states| {
                    extensions.smoother.smooth(&mut states)?;
                    Ok(states)
                })
                .map(|states| {
                    let indices: Vec<usize> = states
                        .iter()
                        .filter(|s| s.is_measurement())
                        .filter_map(|s| s.measurement)
                        .collect();
                    let shared = indices.iter().filter(|idx| used.contains(idx)).count();
                    used.extend(indices);
                    let fitted = final_parameters(start, &states, options);
                    FindingResult {
                        fitted,
                        summary: TrajectorySummary::from_states(&states, shared),
                        states,
                    }
                });
            match &result {
                Ok(found) => debug!(
                    "ReferenceEngine::find_tracks start {i}: states={} measurements={} chi2={:.3}",
                    found.summary.n_states, found.summary.n_measurements, found.summary.chi2_sum
                ),
                Err(err) => warn!("ReferenceEngine::find_tracks start {i} failed: {err}"),
            }
            results.push(result);
        }
        results
    }
}

/// Filter state for start parameters, with a broad prior when the start
/// carries no covariance.
pub(crate) fn start_state(start: &BoundParameters) -> Result<FilterState, EngineError> {
    let params = start.params;
    if !params.iter().all(|v| v.is_finite()) {
        return Err(EngineError::InvalidStart("non-finite parameters".into()));
    }
    let theta = params[bound::THETA];
    if !(theta > 0.0 && theta < PI) {
        return Err(EngineError::InvalidStart(format!(
            "theta {theta:.4} outside (0, π)"
        )));
    }
    let covariance = start
        .covariance
        .unwrap_or_else(|| default_start_covariance(&params));
    Ok(FilterState { params, covariance })
}

fn default_start_covariance(params: &BoundVector) -> BoundMatrix {
    let qop = params[bound::QOP];
    BoundMatrix::from_diagonal(&BoundVector::new(
        1.0,
        1.0,
        1e-3,
        1e-3,
        (0.1 * qop).powi(2) + 1e-8,
    ))
}

/// Local position of the helix crossing on `surface` and its transverse path.
fn local_crossing(
    params: &BoundVector,
    reference: &Vector3<f64>,
    surface: &Surface,
    propagation: &PropagationOptions,
) -> Option<(Vector2<f64>, f64)> {
    let helix = Helix::from_perigee(params, reference, propagation.b_field);
    let s = helix.intersect_plane(
        &surface.center,
        &surface.normal(),
        propagation.max_steps,
        propagation.path_limit,
    )?;
    Some((surface.to_local3(&helix.position_at(s)).xy(), s))
}

/// Predicted local measurement and its numerical projection matrix.
pub(crate) fn linearize(
    state: &FilterState,
    reference: &Vector3<f64>,
    surface: &Surface,
    dim: usize,
    propagation: &PropagationOptions,
) -> Result<(Linearization, f64), EngineError> {
    let lost = || EngineError::LostSurface(surface.layer_id);
    let (predicted, path) =
        local_crossing(&state.params, reference, surface, propagation).ok_or_else(lost)?;
    let steps = perigee_steps(&state.params);
    let mut projection = DMatrix::zeros(dim, 5);
    for j in 0..5 {
        let mut plus = state.params;
        plus[j] += steps[j];
        let mut minus = state.params;
        minus[j] -= steps[j];
        let (local_plus, _) =
            local_crossing(&plus, reference, surface, propagation).ok_or_else(lost)?;
        let (local_minus, _) =
            local_crossing(&minus, reference, surface, propagation).ok_or_else(lost)?;
        let derivative = (local_plus - local_minus) / (2.0 * steps[j]);
        for r in 0..dim {
            projection[(r, j)] = derivative[r];
        }
    }
    Ok((
        Linearization {
            predicted: DVector::from_fn(dim, |r, _| predicted[r]),
            projection,
        },
        path,
    ))
}

fn hole_state(
    state: &FilterState,
    reference: &Vector3<f64>,
    surface: &Surface,
    propagation: &PropagationOptions,
) -> Option<TrackState> {
    let (local, path) = local_crossing(&state.params, reference, surface, propagation)?;
    if !surface.contains(&local, 0.0) {
        return None;
    }
    Some(TrackState {
        surface: surface.id,
        kind: TrackStateKind::Hole,
        path,
        measurement: None,
        dim: 0,
        predicted: state.clone(),
        filtered: state.clone(),
        smoothed: None,
        chi2: 0.0,
    })
}

/// Runs the filter over known measurements in the given order.
pub(crate) fn filter_links<G: GeometryProvider + ?Sized>(
    geometry: &G,
    initial: FilterState,
    reference: &Vector3<f64>,
    links: &[SourceLink],
    extensions: &FitterExtensions<'_>,
    propagation: &PropagationOptions,
) -> Result<Vec<TrackState>, EngineError> {
    let mut state = initial;
    let mut states = Vec::with_capacity(links.len());
    for link in links {
        let surface = geometry
            .surface(link.surface)
            .ok_or(EngineError::LostSurface(link.surface.layer()))?;
        let obs = extensions
            .calibrator
            .calibrate(link.index, surface)
            .ok_or(EngineError::NoMeasurements)?;
        let (linearization, path) = linearize(&state, reference, surface, obs.dim(), propagation)?;
        let update = extensions.updater.update(&state, &linearization, &obs)?;
        states.push(TrackState {
            surface: surface.id,
            kind: TrackStateKind::Measurement,
            path,
            measurement: Some(link.index),
            dim: obs.dim(),
            predicted: state.clone(),
            filtered: update.state.clone(),
            smoothed: None,
            chi2: update.chi2,
        });
        state = update.state;
    }
    if states.is_empty() {
        return Err(EngineError::NoMeasurements);
    }
    Ok(states)
}

/// Best estimate of a filtered trajectory, reported at the requested target.
pub(crate) fn final_parameters(
    start: &BoundParameters,
    states: &[TrackState],
    options: &FindingOptions,
) -> BoundParameters {
    let best = states
        .first()
        .and_then(|s| s.smoothed.clone())
        .or_else(|| {
            states
                .iter()
                .rev()
                .find(|s| s.is_measurement())
                .map(|s| s.filtered.clone())
        })
        .unwrap_or(FilterState {
            params: start.params,
            covariance: start.covariance.unwrap_or_else(BoundMatrix::identity),
        });
    let at_start = BoundParameters {
        reference: start.reference,
        params: best.params,
        covariance: Some(best.covariance),
    };
    at_start.transported(&options.target.resolve(start), options.propagation.b_field)
}
