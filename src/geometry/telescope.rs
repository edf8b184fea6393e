use super::{GeometryProvider, Surface, SurfaceId};
use crate::error::GeometryError;
use log::debug;
use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const TELESCOPE_VOLUME: u8 = 1;

/// One rectangular sensor plane.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaneConfig {
    pub layer_id: u32,
    /// Plane center in global coordinates (mm).
    pub center: [f64; 3],
    /// Plane normal; planes of a telescope face the beam axis.
    #[serde(default = "default_normal")]
    pub normal: [f64; 3],
    /// Rotation of the local axes about the normal (radians).
    #[serde(default)]
    pub stereo_angle: f64,
    #[serde(default = "default_half_u")]
    pub half_u: f64,
    #[serde(default = "default_half_v")]
    pub half_v: f64,
    #[serde(default = "default_thickness")]
    pub thickness: f64,
}

fn default_normal() -> [f64; 3] {
    [1.0, 0.0, 0.0]
}

fn default_half_u() -> f64 {
    20.17
}

fn default_half_v() -> f64 {
    50.0
}

fn default_thickness() -> f64 {
    0.32
}

impl PlaneConfig {
    /// Plane orthogonal to `x` at depth `x` with the default sensor size.
    pub fn at_depth(layer_id: u32, x: f64) -> Self {
        Self {
            layer_id,
            center: [x, 0.0, 0.0],
            normal: default_normal(),
            stereo_angle: 0.0,
            half_u: default_half_u(),
            half_v: default_half_v(),
            thickness: default_thickness(),
        }
    }

    pub fn with_stereo(mut self, angle: f64) -> Self {
        self.stereo_angle = angle;
        self
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeometryConfig {
    pub planes: Vec<PlaneConfig>,
}

/// Planar telescope: independent rectangular planes, looked up by layer id.
#[derive(Clone, Debug)]
pub struct TelescopeGeometry {
    surfaces: Vec<Surface>,
    by_layer: HashMap<u32, usize>,
}

impl TelescopeGeometry {
    pub fn from_config(config: &GeometryConfig) -> Result<Self, GeometryError> {
        let mut surfaces = config
            .planes
            .iter()
            .map(build_surface)
            .collect::<Result<Vec<_>, _>>()?;
        surfaces.sort_by(|a, b| {
            a.center
                .x
                .total_cmp(&b.center.x)
                .then(a.layer_id.cmp(&b.layer_id))
        });

        let mut by_layer = HashMap::with_capacity(surfaces.len());
        for (idx, surface) in surfaces.iter().enumerate() {
            if by_layer.insert(surface.layer_id, idx).is_some() {
                return Err(GeometryError::DuplicateLayer(surface.layer_id));
            }
        }
        debug!(
            "TelescopeGeometry::from_config built {} planes",
            surfaces.len()
        );
        Ok(Self { surfaces, by_layer })
    }

    /// Layers `1..=n` at the given depths, alternating axial and stereo planes.
    pub fn stereo_telescope(depths: &[f64], stereo_angle: f64) -> Result<Self, GeometryError> {
        let planes = depths
            .iter()
            .enumerate()
            .map(|(i, &x)| {
                let angle = if i % 2 == 1 { stereo_angle } else { 0.0 };
                PlaneConfig::at_depth(i as u32 + 1, x).with_stereo(angle)
            })
            .collect();
        Self::from_config(&GeometryConfig { planes })
    }

    pub fn len(&self) -> usize {
        self.surfaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.surfaces.is_empty()
    }
}

impl GeometryProvider for TelescopeGeometry {
    fn surface_for(&self, layer_id: u32) -> Option<&Surface> {
        self.by_layer.get(&layer_id).map(|&idx| &self.surfaces[idx])
    }

    fn surfaces(&self) -> &[Surface] {
        &self.surfaces
    }

    fn surface(&self, id: SurfaceId) -> Option<&Surface> {
        self.surface_for(id.layer())
            .filter(|surface| surface.id == id)
    }
}

fn build_surface(plane: &PlaneConfig) -> Result<Surface, GeometryError> {
    let degenerate = |reason: &str| GeometryError::DegeneratePlane {
        layer_id: plane.layer_id,
        reason: reason.to_string(),
    };
    if !(plane.half_u > 0.0 && plane.half_v > 0.0) {
        return Err(degenerate("half lengths must be positive"));
    }
    if !(plane.thickness >= 0.0) {
        return Err(degenerate("thickness must be non-negative"));
    }
    let normal = Vector3::from(plane.normal);
    let norm = normal.norm();
    if !(norm > 1e-9) {
        return Err(degenerate("normal has zero length"));
    }
    let normal = normal / norm;

    // Reference axis for the local frame; z unless the plane faces z.
    let up = if normal.z.abs() < 0.9 {
        Vector3::z()
    } else {
        Vector3::x()
    };
    let u0 = up.cross(&normal).normalize();
    let v0 = normal.cross(&u0);
    let (sin_a, cos_a) = plane.stereo_angle.sin_cos();
    let u = u0 * cos_a + v0 * sin_a;
    let v = v0 * cos_a - u0 * sin_a;

    Ok(Surface {
        id: SurfaceId::new(TELESCOPE_VOLUME, plane.layer_id, 1),
        layer_id: plane.layer_id,
        center: Vector3::from(plane.center),
        rotation: Matrix3::from_columns(&[u, v, normal]),
        half_u: plane.half_u,
        half_v: plane.half_v,
        thickness: plane.thickness,
    })
}
