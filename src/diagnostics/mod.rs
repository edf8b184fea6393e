//! Serializable reports produced by the tracking pipeline.
//!
//! [`EventReport`] describes one processed event: counters of every stage,
//! the lifecycle of each seed in the finder and the stage timings.
//! [`RunSummary`] aggregates event reports over a run.

pub mod timing;

pub use timing::{StageTiming, TimingBreakdown};

use crate::finder::{CandidateRecord, FinderStats};
use crate::hits::{DigitizationStats, MergeStats};
use crate::seeding::SeedStats;
use crate::surface_index::IndexStats;
use serde::Serialize;

/// Report of one processed event.
#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventReport {
    pub event: u64,
    pub raw_hits: usize,
    /// Present when hit merging is enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merge: Option<MergeStats>,
    pub digitization: DigitizationStats,
    pub index: IndexStats,
    pub seeding: SeedStats,
    pub finding: FinderStats,
    pub candidates: Vec<CandidateRecord>,
    pub timings: TimingBreakdown,
}

impl EventReport {
    pub fn n_tracks(&self) -> usize {
        self.finding.accepted
    }
}

/// Run-level counters and mean stage timings.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub events: usize,
    pub raw_hits: usize,
    pub merge_failures: usize,
    pub measurements: usize,
    pub seeds: usize,
    pub tracks: usize,
    pub topology_skips: usize,
    pub engine_failures: usize,
    pub refit_failures: usize,
    pub mean_total_ms: f64,
    /// Mean time per stage, in first-seen stage order.
    pub mean_stage_ms: Vec<StageTiming>,
}

/// Folds event reports into a [`RunSummary`].
#[derive(Clone, Debug, Default)]
pub struct RunAccumulator {
    summary: RunSummary,
    total_ms: f64,
    stage_ms: Vec<StageTiming>,
}

impl RunAccumulator {
    pub fn record(&mut self, report: &EventReport) {
        let s = &mut self.summary;
        s.events += 1;
        s.raw_hits += report.raw_hits;
        s.merge_failures += report.merge.as_ref().map_or(0, |m| m.failed);
        s.measurements += report.digitization.emitted;
        s.seeds += report.seeding.accepted;
        s.tracks += report.finding.accepted;
        s.topology_skips += report.finding.topology_skips;
        s.engine_failures += report.finding.engine_failures;
        s.refit_failures += report.finding.refit_failures;

        self.total_ms += report.timings.total_ms;
        for stage in &report.timings.stages {
            match self.stage_ms.iter_mut().find(|t| t.label == stage.label) {
                Some(total) => total.elapsed_ms += stage.elapsed_ms,
                None => self.stage_ms.push(stage.clone()),
            }
        }
    }

    pub fn summary(&self) -> RunSummary {
        let mut summary = self.summary.clone();
        if summary.events > 0 {
            let n = summary.events as f64;
            summary.mean_total_ms = self.total_ms / n;
            summary.mean_stage_ms = self
                .stage_ms
                .iter()
                .map(|t| StageTiming::new(t.label.clone(), t.elapsed_ms / n))
                .collect();
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn report(tracks: usize, digitization_ms: f64) -> EventReport {
        let mut timings = TimingBreakdown::with_total(digitization_ms + 1.0);
        timings.push("digitization", digitization_ms);
        timings.push("finding", 1.0);
        EventReport {
            raw_hits: 5,
            finding: FinderStats {
                accepted: tracks,
                ..Default::default()
            },
            timings,
            ..Default::default()
        }
    }

    #[test]
    fn run_summary_averages_stage_times() {
        let mut acc = RunAccumulator::default();
        assert_eq!(acc.summary(), RunSummary::default());
        acc.record(&report(1, 2.0));
        acc.record(&report(0, 4.0));
        let summary = acc.summary();
        assert_eq!(summary.events, 2);
        assert_eq!(summary.raw_hits, 10);
        assert_eq!(summary.tracks, 1);
        assert_abs_diff_eq!(summary.mean_total_ms, 4.0, epsilon = 1e-12);
        assert_eq!(summary.mean_stage_ms[0].label, "digitization");
        assert_abs_diff_eq!(summary.mean_stage_ms[0].elapsed_ms, 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(summary.mean_stage_ms[1].elapsed_ms, 1.0, epsilon = 1e-12);
    }
}
