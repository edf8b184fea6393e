mod common;

use approx::assert_relative_eq;
use common::synthetic_event::{electron, electron_at, event_with_hits, telescope};
use nalgebra::{Matrix5, Vector3};
use track_reco::error::EngineError;
use track_reco::fitting::{
    BoundParameters, FilterState, FindingOptions, FindingResult, FitterExtensions,
    MeasurementSource, ReferenceEngine, TrackFindingEngine, TrackState, TrackStateKind,
    TrajectorySummary,
};
use track_reco::geometry::{GeometryProvider, TelescopeGeometry};
use track_reco::synthetic::ParticleGun;
use track_reco::{RecoConfig, Refitters, Track, TrackingPipeline};

fn config(min_hits: usize) -> RecoConfig {
    RecoConfig {
        min_hits,
        do_smearing: false,
        ..Default::default()
    }
}

/// Engine that accepts every measurement of the event on its own surface.
struct TakeEverything<'g>(&'g TelescopeGeometry);

impl TrackFindingEngine for TakeEverything<'_> {
    fn find_tracks(
        &self,
        starts: &[BoundParameters],
        source: &dyn MeasurementSource,
        _extensions: &FitterExtensions<'_>,
        options: &FindingOptions,
    ) -> Vec<Result<FindingResult, EngineError>> {
        starts
            .iter()
            .map(|start| {
                let filter = FilterState {
                    params: start.params,
                    covariance: start.covariance.unwrap_or_else(Matrix5::identity),
                };
                let states: Vec<TrackState> = self
                    .0
                    .surfaces()
                    .iter()
                    .flat_map(|surface| {
                        source
                            .measurements_on(surface.id)
                            .iter()
                            .map(|&index| TrackState {
                                surface: surface.id,
                                kind: TrackStateKind::Measurement,
                                path: surface.center.x,
                                measurement: Some(index),
                                dim: 1,
                                predicted: filter.clone(),
                                filtered: filter.clone(),
                                smoothed: None,
                                chi2: 0.0,
                            })
                            .collect::<Vec<_>>()
                    })
                    .collect();
                Ok(FindingResult {
                    fitted: BoundParameters {
                        reference: options.target.resolve(start),
                        params: start.params,
                        covariance: None,
                    },
                    summary: TrajectorySummary::from_states(&states, 0),
                    states,
                })
            })
            .collect()
    }
}

#[test]
fn three_hits_make_exactly_one_track() {
    let _ = env_logger::builder().is_test(true).try_init();
    let geometry = telescope(3, 0.0);
    let engine = ReferenceEngine::new(&geometry);
    let mut pipeline =
        TrackingPipeline::new(config(3), &geometry, &engine, Refitters::default()).unwrap();

    let mut event = event_with_hits(1, electron().hits(&geometry));
    let report = pipeline.process(&mut event).unwrap();
    let tracks: &[Track] = event.get_collection("Tracks").unwrap();

    assert_eq!(report.seeding.accepted, 1);
    assert_eq!(tracks.len(), 1, "report: {report:?}");
    let track = &tracks[0];
    assert_eq!(track.n_hits, 3);
    assert_eq!(track.n_shared_hits, 0);
    assert_eq!(track.charge(), -1.0);
    assert_relative_eq!(track.p(), 2.0, max_relative = 0.02);
    assert_eq!(track.perigee, Vector3::zeros());
}

#[test]
fn three_hits_through_a_scripted_engine() {
    let geometry = telescope(3, 0.0);
    let engine = TakeEverything(&geometry);
    let mut pipeline =
        TrackingPipeline::new(config(3), &geometry, &engine, Refitters::default()).unwrap();

    let mut event = event_with_hits(1, electron().hits(&geometry));
    pipeline.process(&mut event).unwrap();
    let tracks: &[Track] = event.get_collection("Tracks").unwrap();

    assert_eq!(tracks.len(), 1);
    assert_eq!(tracks[0].n_hits, 3);
    assert_eq!(tracks[0].ndf, 3);
    assert_eq!(tracks[0].covariance, Matrix5::identity());
}

#[test]
fn unreachable_hit_count_yields_no_track() {
    let geometry = telescope(3, 0.0);
    let engine = ReferenceEngine::new(&geometry);
    let mut pipeline =
        TrackingPipeline::new(config(7), &geometry, &engine, Refitters::default()).unwrap();

    let mut event = event_with_hits(1, electron().hits(&geometry));
    let report = pipeline.process(&mut event).unwrap();

    assert_eq!(report.finding.rejected_min_hits, 1);
    assert!(event.get_collection::<Track>("Tracks").unwrap().is_empty());
}

#[test]
fn split_deposits_reconstruct_on_a_stereo_telescope() {
    let geometry = telescope(7, 0.02);
    let engine = ReferenceEngine::new(&geometry);
    let mut pipeline = TrackingPipeline::new(
        RecoConfig {
            sigma_v: 0.05,
            ..Default::default()
        },
        &geometry,
        &engine,
        Refitters::default(),
    )
    .unwrap();

    let gun = ParticleGun {
        deposits_per_sensor: 3,
        ..electron()
    };
    let mut event = event_with_hits(5, gun.hits(&geometry));
    let report = pipeline.process(&mut event).unwrap();

    let merge = report.merge.as_ref().unwrap();
    assert_eq!(merge.input, 21);
    assert_eq!(merge.emitted, 7);
    let tracks: &[Track] = event.get_collection("Tracks").unwrap();
    assert_eq!(tracks.len(), 1);
    assert_eq!(tracks[0].n_hits, 7);
    assert_eq!(tracks[0].ndf, 14);
    assert_relative_eq!(tracks[0].p(), 2.0, max_relative = 0.05);
}

#[test]
fn two_particles_follow_the_single_track_switch() {
    let geometry = telescope(7, 0.0);
    let engine = ReferenceEngine::new(&geometry);
    let mut hits = electron_at(-0.095, 1).hits(&geometry);
    hits.extend(electron_at(-0.105, 2).hits(&geometry));
    assert_eq!(hits.len(), 14);

    let mut single =
        TrackingPipeline::new(config(7), &geometry, &engine, Refitters::default()).unwrap();
    let mut event = event_with_hits(1, hits.clone());
    let report = single.process(&mut event).unwrap();
    assert!(report.seeding.accepted >= 2);
    assert_eq!(report.finding.topology_skips, 1);
    assert!(event.get_collection::<Track>("Tracks").unwrap().is_empty());

    let mut multi = TrackingPipeline::new(
        RecoConfig {
            single_track: false,
            ..config(7)
        },
        &geometry,
        &engine,
        Refitters::default(),
    )
    .unwrap();
    let mut event = event_with_hits(2, hits);
    multi.process(&mut event).unwrap();
    let tracks: &[Track] = event.get_collection("Tracks").unwrap();
    assert!(tracks.len() >= 2, "found {} tracks", tracks.len());
}
