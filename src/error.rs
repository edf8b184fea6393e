//! Error taxonomy of the reconstruction chain.
//!
//! Per-hit, per-seed and per-candidate failures are local: the stage that
//! observes them records the error (or a counter) and moves on. Only
//! [`ConfigError`] and the construction variants of [`GeometryError`] stop a
//! run, and [`EventError`] is returned to whoever drives the pipeline.

use thiserror::Error;

/// A group of deposits that cannot be combined into one hit.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum MergeError {
    #[error("sensor {sensor_id}, track {track_id}: species mismatch ({expected} vs {found})")]
    SpeciesMismatch {
        sensor_id: u32,
        track_id: i32,
        expected: i32,
        found: i32,
    },
    #[error("sensor {sensor_id}, track {track_id}: total deposit {total} is not positive")]
    NonPositiveDeposit {
        sensor_id: u32,
        track_id: i32,
        total: f64,
    },
}

#[derive(Clone, Debug, Error, PartialEq)]
pub enum GeometryError {
    #[error("no surface registered for layer {0}")]
    NoSurface(u32),
    #[error("point is {distance:.4} mm off surface of layer {layer_id} (tolerance {tolerance:.4} mm)")]
    OffSurface {
        layer_id: u32,
        distance: f64,
        tolerance: f64,
    },
    #[error("layer {0} is defined more than once")]
    DuplicateLayer(u32),
    #[error("plane of layer {layer_id} is degenerate: {reason}")]
    DegeneratePlane { layer_id: u32, reason: String },
}

/// Failure of the finding engine or a refitter for one start parameter set.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum EngineError {
    #[error("invalid start parameters: {0}")]
    InvalidStart(String),
    #[error("no surface reachable from the start parameters")]
    NoReachableSurface,
    #[error("trajectory lost surface of layer {0}")]
    LostSurface(u32),
    #[error("singular {0}")]
    Singular(&'static str),
    #[error("no measurement attached to the trajectory")]
    NoMeasurements,
    #[error("engine returned no result for this start")]
    MissingResult,
}

#[derive(Clone, Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("invalid option {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            name,
            reason: reason.into(),
        }
    }
}

/// Event-store access failure.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum EventError {
    #[error("collection '{0}' not found in event")]
    MissingCollection(String),
    #[error("collection '{name}' holds {stored}, requested {requested}")]
    TypeMismatch {
        name: String,
        stored: &'static str,
        requested: &'static str,
    },
    #[error("collection '{0}' already exists in event")]
    DuplicateCollection(String),
}
