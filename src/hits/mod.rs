//! From simulated energy deposits to calibrated measurements.
//!
//! - `merge`: combines deposits of the same particle in the same sensor.
//! - `digitize`: projects hits to the sensor frame, applies resolution
//!   smearing and emits [`crate::types::Measurement`]s.

pub mod digitize;
pub mod merge;

pub use digitize::{DigitizationStats, DigitizeOutput, Digitizer, DigitizerOptions};
pub use merge::{merge_hits, MergeOutcome, MergeStats};
