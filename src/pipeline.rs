//! Event loop: merging, digitization, seeding and track finding over the
//! named collections of an [`Event`].

use crate::config::RecoConfig;
use crate::diagnostics::timing::elapsed_ms;
use crate::diagnostics::{EventReport, RunAccumulator, RunSummary, TimingBreakdown};
use crate::error::{ConfigError, EventError};
use crate::event::Event;
use crate::finder::{Refitters, TrackCandidateFinder};
use crate::fitting::TrackFindingEngine;
use crate::geometry::GeometryProvider;
use crate::hits::{merge_hits, Digitizer};
use crate::seeding::SeedBuilder;
use crate::surface_index::SurfaceIndex;
use crate::types::{Measurement, RawHit, Seed, Track};
use log::{debug, info};
use nalgebra::Vector3;
use std::time::Instant;

/// Runs the reconstruction chain event by event.
///
/// Reads raw hits from `inputHitCollectionName` and adds the measurement,
/// seed and track collections under their configured names. The digitizer
/// and its random generator live as long as the pipeline.
pub struct TrackingPipeline<'a> {
    config: RecoConfig,
    geometry: &'a dyn GeometryProvider,
    engine: &'a dyn TrackFindingEngine,
    refitters: Refitters<'a>,
    digitizer: Digitizer,
    seed_builder: SeedBuilder,
    finder: TrackCandidateFinder,
    accumulator: RunAccumulator,
}

impl<'a> TrackingPipeline<'a> {
    pub fn new(
        config: RecoConfig,
        geometry: &'a dyn GeometryProvider,
        engine: &'a dyn TrackFindingEngine,
        refitters: Refitters<'a>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            digitizer: Digitizer::new(config.digitizer_options()),
            seed_builder: SeedBuilder::new(config.seed_options()),
            finder: TrackCandidateFinder::new(config.finder_options()),
            accumulator: RunAccumulator::default(),
            config,
            geometry,
            engine,
            refitters,
        })
    }

    pub fn config(&self) -> &RecoConfig {
        &self.config
    }

    /// Processes one event; only event-store errors abort it.
    pub fn process(&mut self, event: &mut Event) -> Result<EventReport, EventError> {
        let start = Instant::now();
        for name in [
            &self.config.output_collection_name,
            &self.config.seed_collection_name,
            &self.config.track_collection_name,
        ] {
            if event.contains(name) {
                return Err(EventError::DuplicateCollection(name.clone()));
            }
        }

        let mut timings = TimingBreakdown::default();
        let raw: &[RawHit] = event.get_collection(&self.config.input_hit_collection_name)?;
        let raw_hits = raw.len();
        let (merge, hits) = if self.config.merge_hits {
            let outcome = timings.time("merging", || merge_hits(raw));
            (Some(outcome.stats), outcome.hits)
        } else {
            (None, raw.to_vec())
        };

        let geometry = self.geometry;
        let digitizer = &mut self.digitizer;
        let digitized = timings.time("digitization", || digitizer.digitize(&hits, geometry));
        let measurements: Vec<Measurement> = digitized.measurements;

        let index = timings.time("indexing", || SurfaceIndex::build(&measurements, geometry));

        let seeding = timings.time("seeding", || {
            self.seed_builder
                .find_seeds(&measurements, &Vector3::zeros(), &self.config.strategies)
        });

        let finding = timings.time("finding", || {
            self.finder.find_tracks(
                &seeding.seeds,
                &measurements,
                &index,
                self.engine,
                self.refitters,
            )
        });
        timings.total_ms = elapsed_ms(start);

        let report = EventReport {
            event: event.number,
            raw_hits,
            merge,
            digitization: digitized.stats,
            index: index.stats(),
            seeding: seeding.stats,
            finding: finding.stats,
            candidates: finding.candidates,
            timings,
        };
        debug!(
            "TrackingPipeline::process event {} hits={} measurements={} seeds={} tracks={}",
            event.number,
            raw_hits,
            measurements.len(),
            seeding.seeds.len(),
            finding.tracks.len()
        );

        event.add::<Measurement>(&self.config.output_collection_name, measurements)?;
        event.add::<Seed>(&self.config.seed_collection_name, seeding.seeds)?;
        event.add::<Track>(&self.config.track_collection_name, finding.tracks)?;
        self.accumulator.record(&report);
        Ok(report)
    }

    /// Run-level summary over every processed event.
    pub fn finish(&self) -> RunSummary {
        let summary = self.accumulator.summary();
        info!(
            "TrackingPipeline::finish events={} seeds={} tracks={} mean_total_ms={:.3}",
            summary.events, summary.seeds, summary.tracks, summary.mean_total_ms
        );
        for stage in &summary.mean_stage_ms {
            info!(
                "TrackingPipeline::finish   {:<12} {:.3} ms/event",
                stage.label, stage.elapsed_ms
            );
        }
        summary
    }
}
