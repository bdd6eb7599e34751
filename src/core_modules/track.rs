//! Multi-frame mid-body tracks.

use crate::core_modules::spot::MidBodySpot;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Position in the cropped movie where the mid-body is expected, per frame.
pub type ExpectedPositions = BTreeMap<u32, (f64, f64)>;

/// An ordered set of spots, at most one per frame, under a unique id.
///
/// Frames may be skipped (gap closing), so `length` counts the frames that
/// hold a spot, not the span between first and last frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MidBodyTrack {
    pub track_id: u32,
    spots: BTreeMap<u32, MidBodySpot>,
}

impl MidBodyTrack {
    pub fn new(track_id: u32) -> Self {
        Self {
            track_id,
            spots: BTreeMap::new(),
        }
    }

    /// Adds a spot under its own frame. A second spot for an occupied frame is
    /// refused and `false` is returned.
    pub fn add_spot(&mut self, mut spot: MidBodySpot) -> bool {
        if self.spots.contains_key(&spot.frame) {
            return false;
        }
        spot.track_id = Some(self.track_id);
        self.spots.insert(spot.frame, spot);
        true
    }

    pub fn spots(&self) -> &BTreeMap<u32, MidBodySpot> {
        &self.spots
    }

    pub fn into_spots(self) -> BTreeMap<u32, MidBodySpot> {
        self.spots
    }

    pub fn spot(&self, frame: u32) -> Option<&MidBodySpot> {
        self.spots.get(&frame)
    }

    pub fn length(&self) -> usize {
        self.spots.len()
    }

    pub fn first_frame(&self) -> Option<u32> {
        self.spots.keys().next().copied()
    }

    pub fn last_frame(&self) -> Option<u32> {
        self.spots.keys().next_back().copied()
    }

    /// Mean distance to the expected positions over the frames both share.
    /// `None` when the track never overlaps the expectation window.
    pub fn expected_distance(&self, expected_positions: &ExpectedPositions) -> Option<f64> {
        let distances: Vec<f64> = self
            .spots
            .iter()
            .filter_map(|(frame, spot)| {
                expected_positions
                    .get(frame)
                    .map(|&position| spot.distance_to_point(position))
            })
            .collect();
        if distances.is_empty() {
            return None;
        }
        Some(distances.iter().sum::<f64>() / distances.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn frame_keys_stay_unique() {
        let mut track = MidBodyTrack::new(7);
        assert!(track.add_spot(MidBodySpot::new(2, 0, 0, 1.0, 1.0)));
        assert!(track.add_spot(MidBodySpot::new(5, 1, 1, 1.0, 1.0)));
        assert!(!track.add_spot(MidBodySpot::new(2, 9, 9, 1.0, 1.0)));
        assert_eq!(track.length(), 2);
        assert_eq!(track.spot(2).map(|s| s.x), Some(0));
        assert_eq!((track.first_frame(), track.last_frame()), (Some(2), Some(5)));
        assert!(track.spots().values().all(|s| s.track_id == Some(7)));
    }

    #[test]
    fn expected_distance_averages_shared_frames() {
        let mut track = MidBodyTrack::new(0);
        track.add_spot(MidBodySpot::new(0, 0, 0, 1.0, 1.0));
        track.add_spot(MidBodySpot::new(1, 10, 0, 1.0, 1.0));
        track.add_spot(MidBodySpot::new(2, 99, 99, 1.0, 1.0));
        let expected: ExpectedPositions = [(0, (3.0, 4.0)), (1, (10.0, 1.0)), (8, (0.0, 0.0))]
            .into_iter()
            .collect();
        assert_abs_diff_eq!(track.expected_distance(&expected).unwrap(), 3.0);
    }

    #[test]
    fn no_overlap_has_no_expected_distance() {
        let mut track = MidBodyTrack::new(0);
        track.add_spot(MidBodySpot::new(0, 0, 0, 1.0, 1.0));
        let expected: ExpectedPositions = [(4, (0.0, 0.0))].into_iter().collect();
        assert_eq!(track.expected_distance(&expected), None);
    }
}
