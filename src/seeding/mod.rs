//! Seed construction from measurement combinations.
//!
//! Overview
//! - Measurements are grouped by layer. Each strategy names the layers a
//!   seed takes one measurement from; every combination is fitted with a
//!   parabola in the bending plane and a line in the non-bending plane.
//! - The fitted model is converted to helix perigee parameters with a
//!   propagated covariance, then screened by momentum and impact-parameter
//!   gates and by duplicate removal.
//!
//! With the `parallel` feature the per-combination fits run on rayon; gates
//! and duplicate removal stay sequential so the output does not depend on
//! scheduling.

mod fit;
pub mod options;

pub use options::{DedupTolerance, SeedOptions, SeedStrategy};

use crate::helix::wrap_angle;
use crate::types::{bound, momentum_from_qop, BoundVector, Measurement, Seed};
use fit::{fit_seed, SeedFit};
use log::{debug, warn};
use nalgebra::Vector3;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedStats {
    pub strategies: usize,
    /// Strategies skipped because one of their layers had no measurement.
    pub missing: usize,
    /// Strategies whose combinations were cut at `max_combinations`.
    pub truncated: usize,
    pub invalid_strategies: usize,
    pub combinations: usize,
    pub fit_failed: usize,
    pub fail_pmin: usize,
    pub fail_pmax: usize,
    pub fail_d0max: usize,
    pub fail_d0min: usize,
    pub fail_z0max: usize,
    pub duplicates: usize,
    pub accepted: usize,
}

#[derive(Clone, Debug, Default)]
pub struct SeedOutput {
    pub seeds: Vec<Seed>,
    pub stats: SeedStats,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum GateFailure {
    PMin,
    PMax,
    D0Max,
    D0Min,
    Z0Max,
}

impl GateFailure {
    fn record(self, stats: &mut SeedStats) {
        match self {
            GateFailure::PMin => stats.fail_pmin += 1,
            GateFailure::PMax => stats.fail_pmax += 1,
            GateFailure::D0Max => stats.fail_d0max += 1,
            GateFailure::D0Min => stats.fail_d0min += 1,
            GateFailure::Z0Max => stats.fail_z0max += 1,
        }
    }
}

pub struct SeedBuilder {
    options: SeedOptions,
}

impl SeedBuilder {
    pub fn new(options: SeedOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &SeedOptions {
        &self.options
    }

    /// Builds seeds for every strategy.
    ///
    /// `origin` fixes the expansion point of the fit along the depth axis;
    /// the seed parameters are expressed at `perigee_location`. An empty
    /// `strategies` list uses the innermost, middle and outermost populated
    /// layers.
    pub fn find_seeds(
        &self,
        measurements: &[Measurement],
        origin: &Vector3<f64>,
        strategies: &[SeedStrategy],
    ) -> SeedOutput {
        let mut by_layer: BTreeMap<u32, Vec<usize>> = BTreeMap::new();
        for (idx, m) in measurements.iter().enumerate() {
            by_layer.entry(m.layer_id).or_default().push(idx);
        }

        let mut out = SeedOutput::default();
        let resolved: Vec<SeedStrategy> = if strategies.is_empty() {
            match auto_strategy(measurements, &by_layer) {
                Some(strategy) => vec![strategy],
                None => {
                    debug!(
                        "SeedBuilder::find_seeds only {} populated layers, no automatic strategy",
                        by_layer.len()
                    );
                    out.stats.strategies = 1;
                    out.stats.missing = 1;
                    return out;
                }
            }
        } else {
            strategies.to_vec()
        };

        for (strategy_idx, strategy) in resolved.iter().enumerate() {
            out.stats.strategies += 1;
            if strategy.layers().len() < 3 {
                warn!(
                    "SeedBuilder::find_seeds strategy {strategy_idx} has fewer than 3 layers, skipping"
                );
                out.stats.invalid_strategies += 1;
                continue;
            }
            let layers: Option<Vec<&[usize]>> = strategy
                .layers()
                .iter()
                .map(|layer| by_layer.get(layer).map(Vec::as_slice))
                .collect();
            let Some(layers) = layers else {
                debug!("SeedBuilder::find_seeds strategy {strategy_idx} has an empty layer");
                out.stats.missing += 1;
                continue;
            };

            let (combos, truncated) = combinations(&layers, self.options.max_combinations);
            if truncated {
                warn!(
                    "SeedBuilder::find_seeds strategy {strategy_idx} truncated at {} combinations",
                    self.options.max_combinations
                );
                out.stats.truncated += 1;
            }
            out.stats.combinations += combos.len();

            let fits = self.fit_all(measurements, &combos, origin.x);
            for (combo, fit) in combos.into_iter().zip(fits) {
                let Some(fit) = fit else {
                    out.stats.fit_failed += 1;
                    continue;
                };
                if let Some(failure) = self.quality_gate(&fit.params) {
                    failure.record(&mut out.stats);
                    continue;
                }
                if out
                    .seeds
                    .iter()
                    .any(|seed| self.is_duplicate(&seed.params, &fit.params))
                {
                    out.stats.duplicates += 1;
                    continue;
                }
                out.seeds.push(Seed {
                    params: fit.params,
                    perigee: self.options.perigee_location,
                    covariance: fit.covariance,
                    measurements: combo,
                    strategy: strategy_idx,
                    chi2: fit.chi2,
                });
            }
        }
        out.stats.accepted = out.seeds.len();
        debug!(
            "SeedBuilder::find_seeds combinations={} accepted={} duplicates={} missing={}",
            out.stats.combinations, out.stats.accepted, out.stats.duplicates, out.stats.missing
        );
        out
    }

    fn fit_combination(
        &self,
        measurements: &[Measurement],
        combo: &[usize],
        x_origin: f64,
    ) -> Option<SeedFit> {
        let points: Vec<Vector3<f64>> = combo.iter().map(|&i| measurements[i].global).collect();
        fit_seed(
            &points,
            x_origin,
            &self.options.perigee_location,
            self.options.b_field,
            self.options.position_sigma,
            self.options.covariance_inflation,
        )
    }

    #[cfg(feature = "parallel")]
    fn fit_all(
        &self,
        measurements: &[Measurement],
        combos: &[Vec<usize>],
        x_origin: f64,
    ) -> Vec<Option<SeedFit>> {
        use rayon::prelude::*;
        combos
            .par_iter()
            .map(|combo| self.fit_combination(measurements, combo, x_origin))
            .collect()
    }

    #[cfg(not(feature = "parallel"))]
    fn fit_all(
        &self,
        measurements: &[Measurement],
        combos: &[Vec<usize>],
        x_origin: f64,
    ) -> Vec<Option<SeedFit>> {
        combos
            .iter()
            .map(|combo| self.fit_combination(measurements, combo, x_origin))
            .collect()
    }

    fn quality_gate(&self, params: &BoundVector) -> Option<GateFailure> {
        let opts = &self.options;
        let p = momentum_from_qop(params[bound::QOP]);
        let d0 = params[bound::D0].abs();
        if p < opts.pmin {
            return Some(GateFailure::PMin);
        }
        if p > opts.pmax {
            return Some(GateFailure::PMax);
        }
        if d0 > opts.d0max {
            return Some(GateFailure::D0Max);
        }
        if matches!(opts.d0min, Some(min) if d0 < min) {
            return Some(GateFailure::D0Min);
        }
        if params[bound::Z0].abs() > opts.z0max {
            return Some(GateFailure::Z0Max);
        }
        None
    }

    fn is_duplicate(&self, accepted: &BoundVector, candidate: &BoundVector) -> bool {
        let tol = &self.options.dedup;
        let qop = accepted[bound::QOP];
        (accepted[bound::D0] - candidate[bound::D0]).abs() <= tol.d0
            && (accepted[bound::Z0] - candidate[bound::Z0]).abs() <= tol.z0
            && wrap_angle(accepted[bound::PHI] - candidate[bound::PHI]).abs() <= tol.phi
            && (accepted[bound::THETA] - candidate[bound::THETA]).abs() <= tol.theta
            && (qop - candidate[bound::QOP]).abs() <= tol.qop_relative * qop.abs()
    }
}

/// Innermost, middle and outermost populated layer by mean depth.
fn auto_strategy(
    measurements: &[Measurement],
    by_layer: &BTreeMap<u32, Vec<usize>>,
) -> Option<SeedStrategy> {
    if by_layer.len() < 3 {
        return None;
    }
    let mut layers: Vec<(f64, u32)> = by_layer
        .iter()
        .map(|(&layer, indices)| {
            let depth = indices.iter().map(|&i| measurements[i].global.x).sum::<f64>()
                / indices.len() as f64;
            (depth, layer)
        })
        .collect();
    layers.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
    let last = layers.len() - 1;
    Some(SeedStrategy(vec![
        layers[0].1,
        layers[layers.len() / 2].1,
        layers[last].1,
    ]))
}

/// Cartesian product of one index per layer, at most `limit` entries.
fn combinations(layers: &[&[usize]], limit: usize) -> (Vec<Vec<usize>>, bool) {
    let mut out = Vec::new();
    if layers.iter().any(|l| l.is_empty()) {
        return (out, false);
    }
    let mut cursor = vec![0usize; layers.len()];
    loop {
        if out.len() >= limit {
            return (out, true);
        }
        out.push(cursor.iter().zip(layers).map(|(&i, l)| l[i]).collect());
        let mut k = layers.len();
        loop {
            if k == 0 {
                return (out, false);
            }
            k -= 1;
            cursor[k] += 1;
            if cursor[k] < layers[k].len() {
                break;
            }
            cursor[k] = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helix::K_GEV_PER_T_MM;
    use approx::assert_abs_diff_eq;
    use nalgebra::{Matrix2, Vector2};

    fn measurement(layer_id: u32, global: Vector3<f64>) -> Measurement {
        Measurement {
            local: Vector2::new(global.y, global.z),
            global,
            layer_id,
            covariance: Matrix2::new(1e-4, 0.0, 0.0, 1e-4),
            time: 0.0,
        }
    }

    /// Points on `y = c·x²` in the bending plane.
    fn parabola(c: f64, depths: &[f64]) -> Vec<Measurement> {
        depths
            .iter()
            .enumerate()
            .map(|(i, &x)| measurement(i as u32 + 1, Vector3::new(x, c * x * x, 0.0)))
            .collect()
    }

    fn builder_at_origin() -> SeedBuilder {
        SeedBuilder::new(SeedOptions {
            perigee_location: Vector3::zeros(),
            ..Default::default()
        })
    }

    #[test]
    fn low_momentum_fails_pmin_only() {
        // p = K·B / κ with κ = 2c
        let kappa = K_GEV_PER_T_MM * 1.5 / 0.03;
        let measurements = parabola(0.5 * kappa, &[1.0, 2.0, 3.0]);
        let out = builder_at_origin().find_seeds(&measurements, &Vector3::zeros(), &[]);
        assert!(out.seeds.is_empty());
        assert_eq!(
            out.stats,
            SeedStats {
                strategies: 1,
                combinations: 1,
                fail_pmin: 1,
                ..Default::default()
            }
        );
    }

    #[test]
    fn accepted_seed_carries_its_measurements() {
        let kappa = K_GEV_PER_T_MM * 1.5 / 2.0;
        let measurements = parabola(0.5 * kappa, &[100.0, 200.0, 300.0]);
        let out = builder_at_origin().find_seeds(&measurements, &Vector3::zeros(), &[]);
        assert_eq!(out.seeds.len(), 1);
        let seed = &out.seeds[0];
        assert_eq!(seed.measurements, vec![0, 1, 2]);
        assert_eq!(seed.perigee, Vector3::zeros());
        assert_abs_diff_eq!(seed.momentum(), 2.0, epsilon = 1e-4);
        assert_eq!(seed.charge(), -1.0);
        assert_abs_diff_eq!(seed.params[bound::D0], 0.0, epsilon = 1e-6);
    }

    #[test]
    fn repeated_measurements_are_counted_as_duplicates() {
        let kappa = K_GEV_PER_T_MM * 1.5 / 2.0;
        let mut measurements = parabola(0.5 * kappa, &[100.0, 200.0, 300.0]);
        measurements.push(measurements[1].clone());
        let out = builder_at_origin().find_seeds(&measurements, &Vector3::zeros(), &[]);
        assert_eq!(out.seeds.len(), 1);
        assert_eq!(out.stats.combinations, 2);
        assert_eq!(out.stats.duplicates, 1);
    }

    #[test]
    fn strategy_with_empty_layer_counts_missing() {
        let measurements = parabola(1e-4, &[100.0, 200.0, 300.0]);
        let strategies = vec![SeedStrategy(vec![1, 2, 9]), SeedStrategy(vec![1, 2])];
        let out = builder_at_origin().find_seeds(&measurements, &Vector3::zeros(), &strategies);
        assert_eq!(out.stats.missing, 1);
        assert_eq!(out.stats.invalid_strategies, 1);
        assert!(out.seeds.is_empty());
    }

    #[test]
    fn too_few_layers_for_automatic_strategy() {
        let measurements = parabola(1e-4, &[100.0, 200.0]);
        let out = builder_at_origin().find_seeds(&measurements, &Vector3::zeros(), &[]);
        assert_eq!(out.stats.missing, 1);
        assert!(out.seeds.is_empty());
    }

    #[test]
    fn impact_parameter_gates_apply_in_order() {
        let kappa = K_GEV_PER_T_MM * 1.5 / 2.0;
        let mut measurements = parabola(0.5 * kappa, &[100.0, 200.0, 300.0]);
        for m in &mut measurements {
            m.global.y += 30.0;
        }
        let out = builder_at_origin().find_seeds(&measurements, &Vector3::zeros(), &[]);
        assert_eq!(out.stats.fail_d0max, 1);

        let builder = SeedBuilder::new(SeedOptions {
            perigee_location: Vector3::zeros(),
            d0min: Some(0.5),
            ..Default::default()
        });
        let on_axis = parabola(0.5 * kappa, &[100.0, 200.0, 300.0]);
        let out = builder.find_seeds(&on_axis, &Vector3::zeros(), &[]);
        assert_eq!(out.stats.fail_d0min, 1);
        assert_eq!(out.stats.fail_d0max, 0);
    }

    #[test]
    fn displaced_z0_fails_z0max_only() {
        let kappa = K_GEV_PER_T_MM * 1.5 / 2.0;
        let mut measurements = parabola(0.5 * kappa, &[100.0, 200.0, 300.0]);
        for m in &mut measurements {
            m.global.z = 80.0;
        }
        let out = builder_at_origin().find_seeds(&measurements, &Vector3::zeros(), &[]);
        assert!(out.seeds.is_empty());
        assert_eq!(
            out.stats,
            SeedStats {
                strategies: 1,
                combinations: 1,
                fail_z0max: 1,
                ..Default::default()
            }
        );

        let relaxed = SeedBuilder::new(SeedOptions {
            perigee_location: Vector3::zeros(),
            z0max: 100.0,
            ..Default::default()
        });
        let out = relaxed.find_seeds(&measurements, &Vector3::zeros(), &[]);
        assert_eq!(out.seeds.len(), 1);
        assert_abs_diff_eq!(out.seeds[0].params[bound::Z0], 80.0, epsilon = 1e-3);
    }

    #[test]
    fn combinations_enumerate_cartesian_product() {
        let a = [0usize, 1];
        let b = [2usize];
        let c = [3usize, 4, 5];
        let (all, truncated) = combinations(&[&a[..], &b[..], &c[..]], 100);
        assert_eq!(all.len(), 6);
        assert!(!truncated);
        assert_eq!(all[0], vec![0, 2, 3]);
        assert_eq!(all[5], vec![1, 2, 5]);
        let (cut, truncated) = combinations(&[&a[..], &b[..], &c[..]], 4);
        assert_eq!(cut.len(), 4);
        assert!(truncated);
    }

    #[test]
    fn automatic_strategy_picks_inner_middle_outer() {
        let measurements = parabola(1e-5, &[400.0, 100.0, 300.0, 200.0, 500.0]);
        let mut by_layer = BTreeMap::new();
        for (i, m) in measurements.iter().enumerate() {
            by_layer.entry(m.layer_id).or_insert_with(Vec::new).push(i);
        }
        let strategy = auto_strategy(&measurements, &by_layer).unwrap();
        // layers by depth: 2 (100), 4 (200), 3 (300), 1 (400), 5 (500)
        assert_eq!(strategy.layers(), &[2, 3, 5]);
    }
}
