#![doc = include_str!("../README.md")]

// Reconstruction stages
pub mod finder;
pub mod hits;
pub mod pipeline;
pub mod seeding;
pub mod surface_index;

// Data model and collaborators
pub mod error;
pub mod event;
pub mod fitting;
pub mod geometry;
pub mod helix;
pub mod types;

// Configuration, reports and tooling support
pub mod config;
pub mod diagnostics;
pub mod io;
pub mod synthetic;

// --- High-level re-exports -------------------------------------------------

pub use crate::config::RecoConfig;
pub use crate::diagnostics::{EventReport, RunSummary};
pub use crate::event::Event;
pub use crate::finder::{FinderOptions, Refitters, TrackCandidateFinder};
pub use crate::hits::{merge_hits, Digitizer, DigitizerOptions};
pub use crate::pipeline::TrackingPipeline;
pub use crate::seeding::{SeedBuilder, SeedOptions};
pub use crate::surface_index::SurfaceIndex;
pub use crate::types::{Measurement, MergedHit, RawHit, Seed, Track};

// --- Prelude ---------------------------------------------------------------

/// Everything needed to run the pipeline on a telescope geometry.
///
/// ```no_run
/// use track_reco::prelude::*;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let geometry = TelescopeGeometry::stereo_telescope(&[0.0, 50.0, 100.0, 150.0], 0.02)?;
/// let engine = ReferenceEngine::new(&geometry);
/// let config = RecoConfig { min_hits: 4, ..Default::default() };
/// let mut pipeline = TrackingPipeline::new(config, &geometry, &engine, Refitters::default())?;
///
/// let mut event = Event::new(0);
/// event.add("TaggerSimHits", ParticleGun::default().hits(&geometry))?;
/// let report = pipeline.process(&mut event)?;
/// println!("tracks={}", report.n_tracks());
/// # Ok(())
/// # }
/// ```
pub mod prelude {
    pub use crate::fitting::ReferenceEngine;
    pub use crate::geometry::{GeometryProvider, TelescopeGeometry};
    pub use crate::synthetic::ParticleGun;
    pub use crate::{Event, RecoConfig, Refitters, Track, TrackingPipeline};
}
