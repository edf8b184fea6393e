use crate::error::MergeError;
use crate::types::{MergedHit, RawHit};
use log::{debug, warn};
use nalgebra::Vector3;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Hits that survived merging plus the groups that could not be merged.
#[derive(Clone, Debug, Default)]
pub struct MergeOutcome {
    pub hits: Vec<MergedHit>,
    pub failures: Vec<MergeError>,
    pub stats: MergeStats,
}

#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeStats {
    pub input: usize,
    pub groups: usize,
    /// Groups with more than one member.
    pub combined: usize,
    pub failed: usize,
    pub emitted: usize,
}

/// Merges deposits sharing `(sensor_id, track_id)`.
///
/// Groups are emitted in key order and their members are summed in a
/// canonical order, so any permutation of `hits` gives the same output.
pub fn merge_hits(hits: &[RawHit]) -> MergeOutcome {
    let mut groups: BTreeMap<(u32, i32), Vec<&RawHit>> = BTreeMap::new();
    for hit in hits {
        groups
            .entry((hit.sensor_id, hit.track_id))
            .or_default()
            .push(hit);
    }

    let mut outcome = MergeOutcome {
        stats: MergeStats {
            input: hits.len(),
            groups: groups.len(),
            ..Default::default()
        },
        ..Default::default()
    };
    for (_, mut members) in groups {
        if members.len() > 1 {
            outcome.stats.combined += 1;
        }
        match merge_group(&mut members) {
            Ok(hit) => outcome.hits.push(hit),
            Err(err) => {
                warn!("merge_hits dropping group: {err}");
                outcome.failures.push(err);
            }
        }
    }
    outcome.stats.failed = outcome.failures.len();
    outcome.stats.emitted = outcome.hits.len();
    debug!(
        "merge_hits input={} groups={} emitted={} failed={}",
        outcome.stats.input, outcome.stats.groups, outcome.stats.emitted, outcome.stats.failed
    );
    outcome
}

/// Combines one non-empty group into a single energy-weighted hit.
fn merge_group(members: &mut [&RawHit]) -> Result<MergedHit, MergeError> {
    if let [single] = members {
        return Ok((*single).clone());
    }
    members.sort_by(|a, b| canonical_order(a, b));
    let first = members[0];

    if let Some(other) = members.iter().find(|h| h.pdg_id != first.pdg_id) {
        return Err(MergeError::SpeciesMismatch {
            sensor_id: first.sensor_id,
            track_id: first.track_id,
            expected: first.pdg_id,
            found: other.pdg_id,
        });
    }

    let total_edep: f64 = members.iter().map(|h| h.edep).sum();
    if !(total_edep > 0.0) {
        return Err(MergeError::NonPositiveDeposit {
            sensor_id: first.sensor_id,
            track_id: first.track_id,
            total: total_edep,
        });
    }

    let mut merged = MergedHit {
        position: Vector3::zeros(),
        momentum: Vector3::zeros(),
        edep: 0.0,
        energy: 0.0,
        time: 0.0,
        path_length: 0.0,
        ..first.clone()
    };
    for hit in members.iter() {
        let w = hit.edep;
        merged.position += hit.position * w;
        merged.momentum += hit.momentum * w;
        merged.time += hit.time * w;
        merged.path_length += hit.path_length * w;
        merged.edep += hit.edep;
        merged.energy += hit.energy;
    }
    merged.position /= total_edep;
    merged.momentum /= total_edep;
    merged.time /= total_edep;
    merged.path_length /= total_edep;
    Ok(merged)
}

fn canonical_order(a: &RawHit, b: &RawHit) -> Ordering {
    a.time
        .total_cmp(&b.time)
        .then(a.edep.total_cmp(&b.edep))
        .then(a.position.x.total_cmp(&b.position.x))
        .then(a.position.y.total_cmp(&b.position.y))
        .then(a.position.z.total_cmp(&b.position.z))
        .then(a.path_length.total_cmp(&b.path_length))
        .then(a.energy.total_cmp(&b.energy))
        .then(a.momentum.x.total_cmp(&b.momentum.x))
        .then(a.momentum.y.total_cmp(&b.momentum.y))
        .then(a.momentum.z.total_cmp(&b.momentum.z))
        .then(a.pdg_id.cmp(&b.pdg_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn hit(sensor_id: u32, track_id: i32, x: f64, edep: f64, time: f64) -> RawHit {
        RawHit {
            sensor_id,
            track_id,
            pdg_id: 11,
            position: Vector3::new(x, 2.0 * x, -x),
            momentum: Vector3::new(1.0, 0.0, x),
            edep,
            energy: 4.0,
            time,
            path_length: 0.3,
        }
    }

    #[test]
    fn two_hits_merge_into_weighted_mean() {
        let hits = vec![hit(1, 5, 1.0, 1.0, 2.0), hit(1, 5, 4.0, 2.0, 5.0)];
        let out = merge_hits(&hits);
        assert!(out.failures.is_empty());
        assert_eq!(out.hits.len(), 1);
        let merged = &out.hits[0];
        assert_abs_diff_eq!(merged.edep, 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(merged.energy, 8.0, epsilon = 1e-12);
        assert_abs_diff_eq!(merged.position.x, 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(merged.position.y, 6.0, epsilon = 1e-12);
        assert_abs_diff_eq!(merged.momentum.z, 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(merged.time, 4.0, epsilon = 1e-12);
        assert_abs_diff_eq!(merged.path_length, 0.3, epsilon = 1e-12);
        assert_eq!(out.stats.combined, 1);
    }

    #[test]
    fn five_hit_group_sums_and_weights() {
        let hits: Vec<RawHit> = (1..=5)
            .map(|i| hit(2, 9, i as f64, i as f64, 0.5 * i as f64))
            .collect();
        let out = merge_hits(&hits);
        let merged = &out.hits[0];
        // Σ i² / Σ i = 55 / 15
        assert_abs_diff_eq!(merged.edep, 15.0, epsilon = 1e-12);
        assert_abs_diff_eq!(merged.position.x, 55.0 / 15.0, epsilon = 1e-12);
        assert_abs_diff_eq!(merged.time, 0.5 * 55.0 / 15.0, epsilon = 1e-12);
        assert_abs_diff_eq!(merged.energy, 20.0, epsilon = 1e-12);
    }

    #[test]
    fn singletons_pass_through_and_groups_stay_separate() {
        let hits = vec![hit(1, 1, 1.0, 0.5, 0.0), hit(2, 1, 2.0, 0.5, 0.0), hit(1, 2, 3.0, 0.5, 0.0)];
        let out = merge_hits(&hits);
        assert_eq!(out.hits.len(), 3);
        assert_eq!(out.hits[0], hits[0]);
        assert_eq!(out.stats.combined, 0);
    }

    #[test]
    fn permuted_input_gives_identical_output() {
        let hits = vec![
            hit(1, 5, 0.1, 0.7, 1.0),
            hit(1, 5, 0.3, 0.2, 3.0),
            hit(3, 5, 0.5, 0.9, 1.5),
            hit(1, 5, 0.7, 0.4, 2.0),
            hit(3, 5, 0.9, 0.1, 0.5),
        ];
        let reference = merge_hits(&hits).hits;
        let mut reversed = hits.clone();
        reversed.reverse();
        let mut rotated = hits.clone();
        rotated.rotate_left(2);
        for permutation in [reversed, rotated] {
            let merged = merge_hits(&permutation).hits;
            assert_eq!(merged.len(), reference.len());
            for (a, b) in merged.iter().zip(&reference) {
                assert_eq!(a.position.x.to_bits(), b.position.x.to_bits());
                assert_eq!(a.time.to_bits(), b.time.to_bits());
                assert_eq!(a.edep.to_bits(), b.edep.to_bits());
            }
        }
    }

    #[test]
    fn species_mismatch_drops_only_that_group() {
        let mut odd = hit(1, 5, 1.0, 1.0, 2.0);
        odd.pdg_id = 13;
        let hits = vec![hit(1, 5, 0.0, 1.0, 1.0), odd, hit(2, 5, 0.0, 1.0, 1.0)];
        let out = merge_hits(&hits);
        assert_eq!(out.hits.len(), 1);
        assert_eq!(out.hits[0].sensor_id, 2);
        assert_eq!(
            out.failures,
            vec![MergeError::SpeciesMismatch {
                sensor_id: 1,
                track_id: 5,
                expected: 11,
                found: 13
            }]
        );
    }

    #[test]
    fn zero_deposit_group_is_a_consistency_failure() {
        let hits = vec![hit(1, 5, 0.0, 0.0, 1.0), hit(1, 5, 1.0, 0.0, 2.0)];
        let out = merge_hits(&hits);
        assert!(out.hits.is_empty());
        assert!(matches!(
            out.failures[0],
            MergeError::NonPositiveDeposit { sensor_id: 1, .. }
        ));
    }
}
