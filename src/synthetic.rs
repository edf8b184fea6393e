//! Synthetic single-particle events for demos and tests.
//!
//! A particle is followed along its analytic helix through every plane of a
//! geometry; each crossing inside the sensor area yields one or more energy
//! deposits spread along the path through the sensor.

use crate::geometry::GeometryProvider;
use crate::helix::Helix;
use crate::types::{BoundVector, RawHit};
use log::debug;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

const SPEED_OF_LIGHT_MM_PER_NS: f64 = 299.792_458;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ParticleGun {
    pub vertex: Vector3<f64>,
    /// Momentum at the vertex (GeV).
    pub momentum: Vector3<f64>,
    pub charge: f64,
    pub pdg_id: i32,
    pub track_id: i32,
    pub mass: f64,
    /// Field along `z` (T).
    pub b_field: f64,
    /// Energy deposited per crossed sensor (MeV).
    pub edep: f64,
    /// Number of deposit records per crossing; more than one exercises merging.
    pub deposits_per_sensor: usize,
}

impl Default for ParticleGun {
    fn default() -> Self {
        Self {
            vertex: Vector3::new(-700.0, 0.0, 0.0),
            momentum: Vector3::new(2.0 * 0.1_f64.cos(), -2.0 * 0.1_f64.sin(), 0.0),
            charge: -1.0,
            pdg_id: 11,
            track_id: 1,
            mass: 0.000_511,
            b_field: 1.5,
            edep: 0.1,
            deposits_per_sensor: 1,
        }
    }
}

impl ParticleGun {
    pub fn helix(&self) -> Option<Helix> {
        Helix::from_momentum(self.vertex, &self.momentum, self.charge, self.b_field)
    }

    /// True perigee parameters relative to `reference`.
    pub fn perigee(&self, reference: &Vector3<f64>) -> Option<BoundVector> {
        self.helix().map(|h| h.to_perigee(reference))
    }

    /// Deposits of this particle in every plane it crosses, in plane order.
    pub fn hits<G: GeometryProvider + ?Sized>(&self, geometry: &G) -> Vec<RawHit> {
        let Some(helix) = self.helix() else {
            return Vec::new();
        };
        let p = self.momentum.norm();
        let energy = (p * p + self.mass * self.mass).sqrt();
        let beta = if energy > 0.0 { p / energy } else { 1.0 };
        let parts = self.deposits_per_sensor.max(1);

        let mut hits = Vec::new();
        for surface in geometry.surfaces() {
            let normal = surface.normal();
            let Some(s) = helix.intersect_plane(&surface.center, &normal, 100, None) else {
                continue;
            };
            let crossing = helix.position_at(s);
            let local = surface.to_local3(&crossing);
            if !surface.contains(&local.xy(), 0.0) {
                debug!(
                    "ParticleGun::hits track {} misses layer {} at ({:.2}, {:.2})",
                    self.track_id, surface.layer_id, local.x, local.y
                );
                continue;
            }
            let direction = helix.direction_at(s);
            let incidence = normal.dot(&direction).abs().max(1e-6);
            let path_length = surface.thickness / incidence;
            let time = helix.path_length(s) / (beta * SPEED_OF_LIGHT_MM_PER_NS);
            for k in 0..parts {
                // symmetric offsets keep the edep-weighted mean on the crossing
                let offset = if parts == 1 {
                    0.0
                } else {
                    path_length * (k as f64 / (parts - 1) as f64 - 0.5) * 0.5
                };
                hits.push(RawHit {
                    sensor_id: surface.layer_id,
                    track_id: self.track_id,
                    pdg_id: self.pdg_id,
                    position: crossing + direction * offset,
                    momentum: helix.momentum_at(s),
                    edep: self.edep / parts as f64,
                    energy,
                    time: time + offset / (beta * SPEED_OF_LIGHT_MM_PER_NS),
                    path_length: path_length / parts as f64,
                });
            }
        }
        hits
    }
}
