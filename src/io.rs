//! JSON file helpers used by the tools.
//!
//! - `write_json_file`: pretty-print a serializable value, creating parent
//!   directories.
//! - `read_json_file`: parse a JSON file into any deserializable type.
//! - `EventInput`: on-disk layout of one event of raw hits.

use crate::types::RawHit;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventInput {
    pub number: u64,
    pub hits: Vec<RawHit>,
}

pub fn write_json_file<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), String> {
    ensure_parent_dir(path)?;
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| format!("Failed to serialize JSON for {}: {e}", path.display()))?;
    fs::write(path, json).map_err(|e| format!("Failed to write JSON {}: {e}", path.display()))
}

pub fn read_json_file<T: DeserializeOwned>(path: &Path) -> Result<T, String> {
    let contents = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read {}: {e}", path.display()))?;
    serde_json::from_str(&contents)
        .map_err(|e| format!("Failed to parse JSON {}: {e}", path.display()))
}

fn ensure_parent_dir(path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create {}: {e}", parent.display()))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;

    #[test]
    fn events_survive_a_file_round_trip() {
        let dir = std::env::temp_dir().join(format!("track-reco-io-{}", std::process::id()));
        let path = dir.join("nested").join("events.json");
        let events = vec![EventInput {
            number: 3,
            hits: vec![RawHit {
                sensor_id: 2,
                track_id: 1,
                pdg_id: 11,
                position: Vector3::new(100.0, 1.0, -2.0),
                momentum: Vector3::new(1.0, 0.1, 0.0),
                edep: 0.1,
                energy: 1.0,
                time: 0.5,
                path_length: 0.3,
            }],
        }];
        write_json_file(&path, &events).unwrap();
        let back: Vec<EventInput> = read_json_file(&path).unwrap();
        assert_eq!(back, events);
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn read_reports_missing_file() {
        let err = read_json_file::<Vec<EventInput>>(Path::new("/nonexistent/events.json"))
            .unwrap_err();
        assert!(err.starts_with("Failed to read /nonexistent/events.json"));
    }
}
