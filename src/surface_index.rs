//! Per-event association of measurements to sensor surfaces.

use crate::fitting::MeasurementSource;
use crate::geometry::{GeometryProvider, SurfaceId};
use crate::types::Measurement;
use log::{debug, warn};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexStats {
    pub surfaces: usize,
    pub associated: usize,
    pub unassociated: usize,
}

/// Multi-map from surface id to measurement indices.
///
/// Keys are sorted; indices under one key keep the order of the measurement
/// collection.
#[derive(Clone, Debug, Default)]
pub struct SurfaceIndex {
    entries: BTreeMap<SurfaceId, Vec<usize>>,
    associated: usize,
    unassociated: Vec<usize>,
}

impl SurfaceIndex {
    pub fn build<G>(measurements: &[Measurement], geometry: &G) -> Self
    where
        G: GeometryProvider + ?Sized,
    {
        let mut index = Self::default();
        for (idx, measurement) in measurements.iter().enumerate() {
            match geometry.surface_for(measurement.layer_id) {
                Some(surface) => {
                    index.entries.entry(surface.id).or_default().push(idx);
                    index.associated += 1;
                }
                None => {
                    warn!(
                        "SurfaceIndex::build measurement {idx} on unknown layer {}",
                        measurement.layer_id
                    );
                    index.unassociated.push(idx);
                }
            }
        }
        debug!(
            "SurfaceIndex::build surfaces={} associated={} unassociated={}",
            index.entries.len(),
            index.associated,
            index.unassociated.len()
        );
        index
    }

    /// Measurement indices on `id`, empty when the surface saw nothing.
    pub fn equal_range(&self, id: SurfaceId) -> &[usize] {
        self.entries.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn surfaces(&self) -> impl Iterator<Item = SurfaceId> + '_ {
        self.entries.keys().copied()
    }

    /// Number of associated measurements.
    pub fn len(&self) -> usize {
        self.associated
    }

    pub fn is_empty(&self) -> bool {
        self.associated == 0
    }

    pub fn unassociated(&self) -> &[usize] {
        &self.unassociated
    }

    pub fn stats(&self) -> IndexStats {
        IndexStats {
            surfaces: self.entries.len(),
            associated: self.associated,
            unassociated: self.unassociated.len(),
        }
    }
}

impl MeasurementSource for SurfaceIndex {
    fn measurements_on(&self, surface: SurfaceId) -> &[usize] {
        self.equal_range(surface)
    }
}
