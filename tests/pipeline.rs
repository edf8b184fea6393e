mod common;

use common::synthetic_event::{electron, event_with_hits, telescope};
use track_reco::error::{ConfigError, EventError};
use track_reco::event::Event;
use track_reco::finder::CandidateState;
use track_reco::fitting::{GaussianSumRefitter, KalmanRefitter, ReferenceEngine};
use track_reco::{Measurement, RecoConfig, Refitters, Seed, Track, TrackingPipeline};

#[test]
fn missing_and_occupied_collections_are_event_errors() {
    let geometry = telescope(3, 0.0);
    let engine = ReferenceEngine::new(&geometry);
    let mut pipeline =
        TrackingPipeline::new(RecoConfig::default(), &geometry, &engine, Refitters::default())
            .unwrap();

    let mut empty = Event::new(0);
    assert_eq!(
        pipeline.process(&mut empty).unwrap_err(),
        EventError::MissingCollection("TaggerSimHits".into())
    );

    let mut occupied = event_with_hits(1, electron().hits(&geometry));
    occupied.add::<Track>("Tracks", Vec::new()).unwrap();
    assert_eq!(
        pipeline.process(&mut occupied).unwrap_err(),
        EventError::DuplicateCollection("Tracks".into())
    );
    assert_eq!(pipeline.finish().events, 0);
}

#[test]
fn collections_follow_configured_names() {
    let geometry = telescope(3, 0.0);
    let engine = ReferenceEngine::new(&geometry);
    let config = RecoConfig {
        input_hit_collection_name: "SimHits".into(),
        output_collection_name: "Hits".into(),
        seed_collection_name: "Seeds".into(),
        track_collection_name: "Fitted".into(),
        merge_hits: false,
        min_hits: 3,
        ..Default::default()
    };
    let mut pipeline =
        TrackingPipeline::new(config, &geometry, &engine, Refitters::default()).unwrap();

    let mut event = Event::new(9);
    event.add("SimHits", electron().hits(&geometry)).unwrap();
    let report = pipeline.process(&mut event).unwrap();

    assert!(report.merge.is_none());
    assert_eq!(event.get_collection::<Measurement>("Hits").unwrap().len(), 3);
    assert_eq!(event.get_collection::<Seed>("Seeds").unwrap().len(), 1);
    assert_eq!(event.get_collection::<Track>("Fitted").unwrap().len(), 1);
    assert!(!event.contains("Tracks"));
    assert_eq!(report.event, 9);
    assert_eq!(report.index.associated, 3);
}

#[test]
fn digitization_is_reproducible_for_a_fixed_seed() {
    let geometry = telescope(5, 0.0);
    let engine = ReferenceEngine::new(&geometry);
    let hits = electron().hits(&geometry);
    let measurements_for = |rng_seed: u64| {
        let config = RecoConfig {
            rng_seed,
            sigma_v: 0.02,
            ..Default::default()
        };
        let mut pipeline =
            TrackingPipeline::new(config, &geometry, &engine, Refitters::default()).unwrap();
        let mut event = event_with_hits(0, hits.clone());
        pipeline.process(&mut event).unwrap();
        event
            .get_collection::<Measurement>("TaggerMeasurements")
            .unwrap()
            .to_vec()
    };

    let first = measurements_for(7);
    assert_eq!(first.len(), 5);
    assert_eq!(first, measurements_for(7));
    assert_ne!(first, measurements_for(8));
}

#[test]
fn run_summary_accumulates_events() {
    let geometry = telescope(3, 0.0);
    let engine = ReferenceEngine::new(&geometry);
    let config = RecoConfig {
        min_hits: 3,
        ..Default::default()
    };
    let mut pipeline =
        TrackingPipeline::new(config, &geometry, &engine, Refitters::default()).unwrap();

    for number in 0..3 {
        let mut event = event_with_hits(number, electron().hits(&geometry));
        pipeline.process(&mut event).unwrap();
    }
    let mut empty = event_with_hits(3, Vec::new());
    let report = pipeline.process(&mut empty).unwrap();
    assert_eq!(report.finding.topology_skips, 1);

    let summary = pipeline.finish();
    assert_eq!(summary.events, 4);
    assert_eq!(summary.raw_hits, 9);
    assert_eq!(summary.measurements, 9);
    assert_eq!(summary.tracks, 3);
    assert_eq!(summary.topology_skips, 1);
    let labels: Vec<&str> = summary
        .mean_stage_ms
        .iter()
        .map(|s| s.label.as_str())
        .collect();
    assert_eq!(
        labels,
        vec!["merging", "digitization", "indexing", "seeding", "finding"]
    );
}

#[test]
fn refits_are_reported_per_candidate() {
    let geometry = telescope(7, 0.02);
    let engine = ReferenceEngine::new(&geometry);
    let reverse = KalmanRefitter::new(&geometry, true);
    let gsf = GaussianSumRefitter::new(&geometry, 3);
    let config = RecoConfig {
        enable_refit_a: true,
        enable_refit_b: true,
        ..Default::default()
    };
    let refitters = Refitters {
        a: Some(&reverse),
        b: Some(&gsf),
    };
    let mut pipeline = TrackingPipeline::new(config, &geometry, &engine, refitters).unwrap();

    let mut event = event_with_hits(0, electron().hits(&geometry));
    let report = pipeline.process(&mut event).unwrap();

    assert_eq!(report.candidates.len(), 1);
    let candidate = &report.candidates[0];
    assert_eq!(candidate.state, CandidateState::Accepted);
    let names: Vec<&str> = candidate.refits.iter().map(|r| r.algorithm.as_str()).collect();
    assert_eq!(names, vec!["kalman-reverse", "gaussian-sum"]);
    for refit in &candidate.refits {
        assert!(refit.ok, "{refit:?}");
        let p = refit.momentum.unwrap();
        assert!((p - 2.0).abs() < 0.1, "{} momentum {p}", refit.algorithm);
    }
    assert_eq!(report.finding.refit_failures, 0);
}

#[test]
fn invalid_configuration_is_rejected_up_front() {
    let geometry = telescope(3, 0.0);
    let engine = ReferenceEngine::new(&geometry);
    let config = RecoConfig {
        pmin: 10.0,
        ..Default::default()
    };
    match TrackingPipeline::new(config, &geometry, &engine, Refitters::default()) {
        Err(ConfigError::Invalid { name, .. }) => assert_eq!(name, "pmax"),
        Ok(_) => panic!("expected pmax validation failure"),
    }
}
