//! Sensor surfaces and the geometry provider interface.
//!
//! Modules
//! - `telescope`: a planar telescope built from a list of rectangular planes.
//!
//! Each [`Surface`] carries a rotation whose columns are the local `u` axis,
//! the local `v` axis and the plane normal, so local coordinates are
//! `Rᵀ·(x − center)` and the third component is the signed distance to the
//! plane.

pub mod telescope;

pub use telescope::{GeometryConfig, PlaneConfig, TelescopeGeometry};

use crate::error::GeometryError;
use nalgebra::{Matrix3, Vector2, Vector3};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Hierarchical surface identifier: volume, layer and sensitive element.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SurfaceId(pub u64);

impl SurfaceId {
    const LAYER_SHIFT: u32 = 20;
    const VOLUME_SHIFT: u32 = 52;

    pub fn new(volume: u8, layer: u32, sensitive: u32) -> Self {
        Self(
            (u64::from(volume) << Self::VOLUME_SHIFT)
                | (u64::from(layer) << Self::LAYER_SHIFT)
                | u64::from(sensitive & 0xF_FFFF),
        )
    }

    pub fn volume(self) -> u8 {
        (self.0 >> Self::VOLUME_SHIFT) as u8
    }

    pub fn layer(self) -> u32 {
        ((self.0 >> Self::LAYER_SHIFT) & 0xFFFF_FFFF) as u32
    }

    pub fn sensitive(self) -> u32 {
        (self.0 & 0xF_FFFF) as u32
    }
}

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "vol={}|lay={}|sen={}",
            self.volume(),
            self.layer(),
            self.sensitive()
        )
    }
}

/// Rectangular sensor plane.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Surface {
    pub id: SurfaceId,
    pub layer_id: u32,
    pub center: Vector3<f64>,
    /// Columns: local `u`, local `v`, normal.
    pub rotation: Matrix3<f64>,
    pub half_u: f64,
    pub half_v: f64,
    pub thickness: f64,
}

impl Surface {
    pub fn normal(&self) -> Vector3<f64> {
        self.rotation.column(2).into_owned()
    }

    /// Local `(u, v, w)` of a global point, `w` being the distance to the plane.
    pub fn to_local3(&self, global: &Vector3<f64>) -> Vector3<f64> {
        self.rotation.transpose() * (global - self.center)
    }

    pub fn local_to_global(&self, local: &Vector2<f64>) -> Vector3<f64> {
        self.center + self.rotation * Vector3::new(local.x, local.y, 0.0)
    }

    pub fn contains(&self, local: &Vector2<f64>, tolerance: f64) -> bool {
        local.x.abs() <= self.half_u + tolerance && local.y.abs() <= self.half_v + tolerance
    }
}

/// Read-only access to the sensor surfaces of a detector.
pub trait GeometryProvider {
    fn surface_for(&self, layer_id: u32) -> Option<&Surface>;

    /// All surfaces, ordered by increasing depth.
    fn surfaces(&self) -> &[Surface];

    fn surface(&self, id: SurfaceId) -> Option<&Surface> {
        self.surfaces().iter().find(|s| s.id == id)
    }

    /// Projects `global` onto `surface`, failing when the point lies further
    /// than `thickness` from the plane.
    fn global_to_local(
        &self,
        surface: &Surface,
        global: &Vector3<f64>,
        thickness: f64,
    ) -> Result<Vector2<f64>, GeometryError> {
        let local = surface.to_local3(global);
        if local.z.abs() > thickness {
            return Err(GeometryError::OffSurface {
                layer_id: surface.layer_id,
                distance: local.z.abs(),
                tolerance: thickness,
            });
        }
        Ok(local.xy())
    }

    fn local_to_global(&self, surface: &Surface, local: &Vector2<f64>) -> Vector3<f64> {
        surface.local_to_global(local)
    }
}
