use serde::Serialize;
use std::env;
use track_reco::config::{self, OutputFormat, RuntimeConfig};
use track_reco::fitting::{GaussianSumRefitter, KalmanRefitter, ReferenceEngine};
use track_reco::geometry::TelescopeGeometry;
use track_reco::io::{read_json_file, write_json_file, EventInput};
use track_reco::{Event, EventReport, Refitters, RunSummary, Track, TrackingPipeline};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EventTracks {
    event: u64,
    tracks: Vec<Track>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RunReport {
    events: Vec<EventReport>,
    summary: RunSummary,
}

fn main() {
    env_logger::init();
    if let Err(err) = run() {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let program = env::args()
        .next()
        .unwrap_or_else(|| "reco_demo".to_string());
    let config = config::parse_cli(&program)?;

    let geometry = TelescopeGeometry::from_config(&config.geometry)
        .map_err(|e| format!("Failed to build geometry: {e}"))?;
    let inputs: Vec<EventInput> = read_json_file(&config.input_path)?;

    let engine = ReferenceEngine::new(&geometry);
    let reverse = KalmanRefitter::new(&geometry, true);
    let gsf = GaussianSumRefitter::new(&geometry, config.reco.max_components);
    let refitters = Refitters {
        a: Some(&reverse),
        b: Some(&gsf),
    };
    let mut pipeline = TrackingPipeline::new(config.reco.clone(), &geometry, &engine, refitters)
        .map_err(|e| format!("Invalid reconstruction config: {e}"))?;

    let mut reports = Vec::with_capacity(inputs.len());
    let mut tracks = Vec::with_capacity(inputs.len());
    for input in inputs {
        let mut event = Event::new(input.number);
        event
            .add(&config.reco.input_hit_collection_name, input.hits)
            .map_err(|e| format!("Event {}: {e}", input.number))?;
        let report = pipeline
            .process(&mut event)
            .map_err(|e| format!("Event {}: {e}", input.number))?;
        let found: &[Track] = event
            .get_collection(&config.reco.track_collection_name)
            .map_err(|e| format!("Event {}: {e}", input.number))?;
        tracks.push(EventTracks {
            event: input.number,
            tracks: found.to_vec(),
        });
        reports.push(report);
    }
    let summary = pipeline.finish();

    if config.output.format.includes_text() {
        print_text_summary(&reports, &summary);
    }
    if let Some(path) = &config.output.tracks_json {
        write_json_file(path, &tracks)?;
        println!("Tracks written to {}", path.display());
    }
    let run_report = RunReport {
        events: reports,
        summary,
    };
    if config.output.format.includes_json() {
        emit_json_report(&config, &run_report)?;
    }
    Ok(())
}

fn emit_json_report(config: &RuntimeConfig, report: &RunReport) -> Result<(), String> {
    if let Some(path) = &config.output.report_json {
        write_json_file(path, report)?;
        println!("JSON report written to {}", path.display());
    } else {
        let json = serde_json::to_string_pretty(report)
            .map_err(|e| format!("Failed to serialize JSON: {e}"))?;
        if config.output.format == OutputFormat::Both {
            println!("\nJSON report:\n{json}");
        } else {
            println!("{json}");
        }
    }
    Ok(())
}

fn print_text_summary(reports: &[EventReport], summary: &RunSummary) {
    println!("Reconstruction summary");
    for report in reports {
        println!(
            "  event {}: hits={} measurements={} seeds={} tracks={} ({:.3} ms)",
            report.event,
            report.raw_hits,
            report.digitization.emitted,
            report.seeding.accepted,
            report.n_tracks(),
            report.timings.total_ms
        );
        let seeding = &report.seeding;
        if seeding.fail_pmin + seeding.fail_pmax + seeding.fail_d0max + seeding.fail_z0max > 0 {
            println!(
                "    seed cuts: pmin={} pmax={} d0max={} d0min={} z0max={} duplicates={}",
                seeding.fail_pmin,
                seeding.fail_pmax,
                seeding.fail_d0max,
                seeding.fail_d0min,
                seeding.fail_z0max,
                seeding.duplicates
            );
        }
        for candidate in &report.candidates {
            if let Some(reason) = &candidate.reason {
                println!(
                    "    seed {} {:?}: {reason}",
                    candidate.seed_index, candidate.state
                );
            }
        }
    }
    println!(
        "\nRun: events={} hits={} measurements={} seeds={} tracks={} topology_skips={} engine_failures={} refit_failures={}",
        summary.events,
        summary.raw_hits,
        summary.measurements,
        summary.seeds,
        summary.tracks,
        summary.topology_skips,
        summary.engine_failures,
        summary.refit_failures
    );
    let stages: Vec<String> = summary
        .mean_stage_ms
        .iter()
        .map(|s| format!("{}={:.3}", s.label, s.elapsed_ms))
        .collect();
    println!(
        "Timings (ms/event): {} total={:.3}",
        stages.join(" "),
        summary.mean_total_ms
    );
}
