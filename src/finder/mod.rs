//! Track candidate finding: drives a fitting engine per seed and turns its
//! trajectories into finalized tracks.
//!
//! Every seed runs through `Started → Exploring → {Accepted | Rejected |
//! EngineFailed}`; the path taken is kept in a [`CandidateRecord`]. Failures
//! stay local to their candidate, so an event always yields a (possibly
//! empty) track list.

pub mod options;

pub use options::FinderOptions;

use crate::error::EngineError;
use crate::fitting::{
    BoundParameters, ChiSquareSelector, DefaultCalibrator, ExtrapolationTarget,
    FindingOptions, FindingResult, FitterExtensions, GainMatrixSmoother, GainMatrixUpdater,
    MeasurementSource, RefitResult, SourceLink, TrackFindingEngine, TrackRefitter,
    TrajectorySummary,
};
use crate::types::{BoundMatrix, Measurement, Seed, Track};
use log::{debug, warn};
use nalgebra::Vector3;
use serde::Serialize;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CandidateState {
    Started,
    Exploring,
    Accepted,
    Rejected,
    EngineFailed,
}

impl CandidateState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CandidateState::Accepted | CandidateState::Rejected | CandidateState::EngineFailed
        )
    }

    fn can_advance_to(self, next: CandidateState) -> bool {
        match self {
            CandidateState::Started => next == CandidateState::Exploring,
            CandidateState::Exploring => next.is_terminal(),
            _ => false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefitRecord {
    pub algorithm: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chi2: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ndf: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub momentum: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl RefitRecord {
    fn success(algorithm: &str, result: &RefitResult) -> Self {
        Self {
            algorithm: algorithm.to_string(),
            ok: true,
            chi2: Some(result.chi2),
            ndf: Some(result.ndf),
            momentum: Some(result.fitted.momentum().norm()),
            message: None,
        }
    }

    fn failure(algorithm: &str, message: String) -> Self {
        Self {
            algorithm: algorithm.to_string(),
            ok: false,
            chi2: None,
            ndf: None,
            momentum: None,
            message: Some(message),
        }
    }
}

/// Lifecycle of one seed through the finder.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateRecord {
    pub seed_index: usize,
    pub state: CandidateState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<TrajectorySummary>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub refits: Vec<RefitRecord>,
}

impl CandidateRecord {
    fn new(seed_index: usize) -> Self {
        Self {
            seed_index,
            state: CandidateState::Started,
            reason: None,
            summary: None,
            refits: Vec::new(),
        }
    }

    fn advance(&mut self, next: CandidateState, reason: Option<String>) {
        debug_assert!(
            self.state.can_advance_to(next),
            "illegal candidate transition {:?} -> {next:?}",
            self.state
        );
        debug!(
            "TrackCandidateFinder seed {} {:?} -> {next:?}",
            self.seed_index, self.state
        );
        self.state = next;
        self.reason = reason;
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinderStats {
    pub seeds: usize,
    /// Events skipped because single-track mode saw a seed count other than one.
    pub topology_skips: usize,
    pub engine_calls: usize,
    pub engine_failures: usize,
    pub inconsistent_summaries: usize,
    pub rejected_min_hits: usize,
    pub accepted: usize,
    pub refits: usize,
    pub refit_failures: usize,
}

#[derive(Clone, Debug, Default)]
pub struct FinderOutput {
    pub tracks: Vec<Track>,
    pub stats: FinderStats,
    pub candidates: Vec<CandidateRecord>,
}

/// Optional refit algorithms applied to accepted tracks.
#[derive(Clone, Copy, Default)]
pub struct Refitters<'a> {
    /// Reverse-direction Kalman refit.
    pub a: Option<&'a dyn TrackRefitter>,
    /// Gaussian-sum refit.
    pub b: Option<&'a dyn TrackRefitter>,
}

pub struct TrackCandidateFinder {
    options: FinderOptions,
}

impl TrackCandidateFinder {
    pub fn new(options: FinderOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &FinderOptions {
        &self.options
    }

    /// Where final parameters are reported: the explicit location, else each
    /// seed's perigee, else the global origin.
    pub fn target(&self) -> ExtrapolationTarget {
        if self.options.use_extrapolation_target {
            ExtrapolationTarget::Fixed(self.options.extrapolation_location)
        } else if self.options.use_seed_perigee {
            ExtrapolationTarget::StartReference
        } else {
            ExtrapolationTarget::Fixed(Vector3::zeros())
        }
    }

    pub fn find_tracks<E>(
        &self,
        seeds: &[Seed],
        measurements: &[Measurement],
        source: &dyn MeasurementSource,
        engine: &E,
        refitters: Refitters<'_>,
    ) -> FinderOutput
    where
        E: TrackFindingEngine + ?Sized,
    {
        let mut out = FinderOutput {
            stats: FinderStats {
                seeds: seeds.len(),
                ..Default::default()
            },
            ..Default::default()
        };
        if self.options.single_track && seeds.len() != 1 {
            debug!(
                "TrackCandidateFinder::find_tracks single-track mode with {} seeds, skipping",
                seeds.len()
            );
            out.stats.topology_skips += 1;
            return out;
        }
        if seeds.is_empty() {
            return out;
        }

        let starts: Vec<BoundParameters> = seeds.iter().map(seed_to_start).collect();
        let calibrator = DefaultCalibrator::new(measurements, self.options.calibration_mode());
        let selector = ChiSquareSelector {
            max_chi2: self.options.max_chi2.unwrap_or(f64::INFINITY),
            max_per_surface: self.options.max_measurements_per_surface,
        };
        let extensions = FitterExtensions {
            calibrator: &calibrator,
            updater: &GainMatrixUpdater,
            smoother: &GainMatrixSmoother,
            selector: &selector,
        };
        let options = FindingOptions {
            propagation: self.options.propagation.clone(),
            target: self.target(),
        };

        let mut records: Vec<CandidateRecord> =
            (0..seeds.len()).map(CandidateRecord::new).collect();
        for record in &mut records {
            record.advance(CandidateState::Exploring, None);
        }
        out.stats.engine_calls += 1;
        let mut results = engine.find_tracks(&starts, source, &extensions, &options);
        if results.len() != starts.len() {
            warn!(
                "TrackCandidateFinder::find_tracks engine returned {} results for {} starts",
                results.len(),
                starts.len()
            );
            results.resize_with(starts.len(), || Err(EngineError::MissingResult));
        }

        for (record, result) in records.iter_mut().zip(results) {
            let found = match result {
                Ok(found) => found,
                Err(err) => {
                    out.stats.engine_failures += 1;
                    record.advance(CandidateState::EngineFailed, Some(err.to_string()));
                    continue;
                }
            };
            let summary = &found.summary;
            if !summary.is_consistent() {
                warn!(
                    "TrackCandidateFinder::find_tracks seed {}: {} states but {} measurements + {} outliers + {} holes",
                    record.seed_index,
                    summary.n_states,
                    summary.n_measurements,
                    summary.n_outliers,
                    summary.n_holes
                );
                out.stats.inconsistent_summaries += 1;
            }
            record.summary = Some(summary.clone());
            if summary.n_measurements < self.options.min_hits {
                out.stats.rejected_min_hits += 1;
                let reason = format!(
                    "{} measurements below minimum {}",
                    summary.n_measurements, self.options.min_hits
                );
                record.advance(CandidateState::Rejected, Some(reason));
                continue;
            }

            out.tracks.push(build_track(&found));
            let start = &starts[record.seed_index];
            record.refits = self.run_refits(&found, start, &extensions, &options, refitters);
            out.stats.refits += record.refits.len();
            out.stats.refit_failures += record.refits.iter().filter(|r| !r.ok).count();
            record.advance(CandidateState::Accepted, None);
        }
        out.stats.accepted = out.tracks.len();
        out.candidates = records;
        debug!(
            "TrackCandidateFinder::find_tracks seeds={} accepted={} engine_failures={} rejected_min_hits={}",
            out.stats.seeds, out.stats.accepted, out.stats.engine_failures, out.stats.rejected_min_hits
        );
        out
    }

    /// Refits start from the accepted parameters moved back to the seed
    /// reference, upstream of every measurement.
    fn run_refits(
        &self,
        found: &FindingResult,
        seed_start: &BoundParameters,
        extensions: &FitterExtensions<'_>,
        options: &FindingOptions,
        refitters: Refitters<'_>,
    ) -> Vec<RefitRecord> {
        let enabled = [
            (self.options.enable_refit_a, refitters.a),
            (self.options.enable_refit_b, refitters.b),
        ];
        if !enabled.iter().any(|(on, refitter)| *on && refitter.is_some()) {
            return Vec::new();
        }
        let start = found
            .fitted
            .transported(&seed_start.reference, options.propagation.b_field);
        let links = found.source_links();
        enabled
            .into_iter()
            .filter(|(on, _)| *on)
            .filter_map(|(_, refitter)| refitter)
            .map(|refitter| run_refit(refitter, &start, &links, extensions, options))
            .collect()
    }
}

fn seed_to_start(seed: &Seed) -> BoundParameters {
    BoundParameters {
        reference: seed.perigee,
        params: seed.params,
        covariance: Some(seed.covariance),
    }
}

fn build_track(found: &FindingResult) -> Track {
    let fitted = &found.fitted;
    let summary = &found.summary;
    Track {
        perigee: fitted.reference,
        params: fitted.params,
        covariance: fitted.covariance.unwrap_or_else(BoundMatrix::identity),
        momentum: fitted.momentum(),
        position: fitted.position(),
        chi2: summary.chi2_sum,
        ndf: summary.ndf,
        n_hits: summary.n_measurements,
        n_shared_hits: summary.n_shared_hits,
    }
}

fn run_refit(
    refitter: &dyn TrackRefitter,
    start: &BoundParameters,
    links: &[SourceLink],
    extensions: &FitterExtensions<'_>,
    options: &FindingOptions,
) -> RefitRecord {
    let name = refitter.name();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        refitter.refit(start, links, extensions, options)
    }));
    match outcome {
        Ok(Ok(result)) => {
            debug!(
                "TrackCandidateFinder {name} refit chi2={:.3} ndf={} p={:.4}",
                result.chi2,
                result.ndf,
                result.fitted.momentum().norm()
            );
            RefitRecord::success(name, &result)
        }
        Ok(Err(err)) => {
            warn!("TrackCandidateFinder {name} refit failed: {err}");
            RefitRecord::failure(name, err.to_string())
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            warn!("TrackCandidateFinder {name} refit aborted: {message}");
            RefitRecord::failure(name, format!("aborted: {message}"))
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        text.to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic".to_string()
    }
}
