use track_reco::fitting::{GaussianSumRefitter, KalmanRefitter};
use track_reco::prelude::*;

fn main() {
    env_logger::init();
    if let Err(err) = run() {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    // Demo: one electron through a seven-plane stereo telescope
    let depths: Vec<f64> = (0..7).map(|i| 50.0 * i as f64).collect();
    let geometry = TelescopeGeometry::stereo_telescope(&depths, 0.02)
        .map_err(|e| format!("Failed to build telescope: {e}"))?;
    let engine = ReferenceEngine::new(&geometry);
    let reverse = KalmanRefitter::new(&geometry, true);
    let config = RecoConfig {
        enable_refit_a: true,
        enable_refit_b: true,
        ..Default::default()
    };
    let gsf = GaussianSumRefitter::new(&geometry, config.max_components);
    let refitters = Refitters {
        a: Some(&reverse),
        b: Some(&gsf),
    };
    let mut pipeline = TrackingPipeline::new(config, &geometry, &engine, refitters)
        .map_err(|e| e.to_string())?;

    let gun = ParticleGun {
        deposits_per_sensor: 2,
        ..Default::default()
    };
    let mut event = Event::new(0);
    event
        .add("TaggerSimHits", gun.hits(&geometry))
        .map_err(|e| e.to_string())?;
    let report = pipeline.process(&mut event).map_err(|e| e.to_string())?;

    let tracks: &[Track] = event
        .get_collection(&pipeline.config().track_collection_name)
        .map_err(|e| e.to_string())?;
    println!(
        "hits={} measurements={} seeds={} tracks={} total_ms={:.3}",
        report.raw_hits,
        report.digitization.emitted,
        report.seeding.accepted,
        tracks.len(),
        report.timings.total_ms
    );
    for track in tracks {
        println!(
            "  p={:.4} GeV q={:+} chi2/ndf={:.2}/{} hits={}",
            track.p(),
            track.charge(),
            track.chi2,
            track.ndf,
            track.n_hits
        );
    }
    for refit in report.candidates.iter().flat_map(|c| &c.refits) {
        match (refit.ok, refit.momentum) {
            (true, Some(p)) => println!("  refit {}: p={p:.4} GeV", refit.algorithm),
            _ => println!(
                "  refit {} failed: {}",
                refit.algorithm,
                refit.message.as_deref().unwrap_or("-")
            ),
        }
    }
    pipeline.finish();
    Ok(())
}
