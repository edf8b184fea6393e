use crate::error::GeometryError;
use crate::geometry::GeometryProvider;
use crate::types::{Measurement, RawHit};
use log::{debug, warn};
use nalgebra::{Matrix2, Vector2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

/// Digitization knobs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DigitizerOptions {
    /// Hits must deposit strictly more than this (MeV).
    pub min_energy_deposit: f64,
    /// Keep only this particle when positive.
    pub track_id_filter: i32,
    pub do_smearing: bool,
    /// Resolution along the local `u` axis (mm).
    pub sigma_u: f64,
    /// Resolution along the local `v` axis (mm); zero makes strip measurements.
    pub sigma_v: f64,
    /// Maximum distance of a hit from its sensor plane (mm).
    pub surface_thickness: f64,
    pub rng_seed: u64,
}

impl Default for DigitizerOptions {
    fn default() -> Self {
        Self {
            min_energy_deposit: 0.05,
            track_id_filter: -1,
            do_smearing: true,
            sigma_u: 0.01,
            sigma_v: 0.0,
            surface_thickness: 0.32,
            rng_seed: 1,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DigitizationStats {
    pub input: usize,
    pub below_threshold: usize,
    pub filtered_track_id: usize,
    pub missing_surface: usize,
    pub off_surface: usize,
    pub emitted: usize,
}

#[derive(Clone, Debug, Default)]
pub struct DigitizeOutput {
    pub measurements: Vec<Measurement>,
    pub stats: DigitizationStats,
}

enum Rejection {
    BelowThreshold,
    FilteredTrackId,
    Geometry(GeometryError),
}

/// Turns hits into smeared measurements on their sensor surfaces.
///
/// The smearing generator lives as long as the digitizer, so a run is
/// reproducible for a fixed seed and input order.
pub struct Digitizer {
    options: DigitizerOptions,
    rng: StdRng,
}

impl Digitizer {
    pub fn new(options: DigitizerOptions) -> Self {
        let rng = StdRng::seed_from_u64(options.rng_seed);
        Self::with_rng(options, rng)
    }

    pub fn with_rng(options: DigitizerOptions, rng: StdRng) -> Self {
        Self { options, rng }
    }

    pub fn options(&self) -> &DigitizerOptions {
        &self.options
    }

    pub fn digitize<G>(&mut self, hits: &[RawHit], geometry: &G) -> DigitizeOutput
    where
        G: GeometryProvider + ?Sized,
    {
        let mut out = DigitizeOutput {
            stats: DigitizationStats {
                input: hits.len(),
                ..Default::default()
            },
            ..Default::default()
        };
        for hit in hits {
            match self.digitize_hit(hit, geometry) {
                Ok(measurement) => out.measurements.push(measurement),
                Err(Rejection::BelowThreshold) => out.stats.below_threshold += 1,
                Err(Rejection::FilteredTrackId) => out.stats.filtered_track_id += 1,
                Err(Rejection::Geometry(err @ GeometryError::NoSurface(_))) => {
                    warn!("Digitizer::digitize skipping hit: {err}");
                    out.stats.missing_surface += 1;
                }
                Err(Rejection::Geometry(err)) => {
                    debug!("Digitizer::digitize skipping hit: {err}");
                    out.stats.off_surface += 1;
                }
            }
        }
        out.stats.emitted = out.measurements.len();
        debug!(
            "Digitizer::digitize input={} emitted={} below_threshold={} missing_surface={} off_surface={}",
            out.stats.input,
            out.stats.emitted,
            out.stats.below_threshold,
            out.stats.missing_surface,
            out.stats.off_surface
        );
        out
    }

    fn digitize_hit<G>(&mut self, hit: &RawHit, geometry: &G) -> Result<Measurement, Rejection>
    where
        G: GeometryProvider + ?Sized,
    {
        let opts = &self.options;
        if hit.edep <= opts.min_energy_deposit {
            return Err(Rejection::BelowThreshold);
        }
        if opts.track_id_filter > 0 && hit.track_id != opts.track_id_filter {
            return Err(Rejection::FilteredTrackId);
        }
        let surface = geometry
            .surface_for(hit.sensor_id)
            .ok_or(Rejection::Geometry(GeometryError::NoSurface(hit.sensor_id)))?;
        let mut local = geometry
            .global_to_local(surface, &hit.position, opts.surface_thickness)
            .map_err(Rejection::Geometry)?;

        let mut global = hit.position;
        if opts.do_smearing {
            let du: f64 = self.rng.sample(StandardNormal);
            let dv: f64 = self.rng.sample(StandardNormal);
            local += Vector2::new(du * opts.sigma_u, dv * opts.sigma_v);
            // Sensors are stacked along x; smearing stays in the plane.
            let depth = global.x;
            global = geometry.local_to_global(surface, &local);
            global.x = depth;
        }

        Ok(Measurement {
            local,
            global,
            layer_id: surface.layer_id,
            covariance: Matrix2::new(
                opts.sigma_u * opts.sigma_u,
                0.0,
                0.0,
                opts.sigma_v * opts.sigma_v,
            ),
            time: hit.time,
        })
    }
}
