// THEORY:
// A `MidBodySpot` is the atomic observation of the engine: one candidate mid-body
// seen in one frame. Like `SmartBlob` in the spatial layer it is a "dumb" data
// container; it knows its position and its two intensity measurements, and can
// measure how far it is from another spot. It has no notion of time beyond its
// own frame index.
//
// Links to the previous and next spot of a track are stored as `SpotKey`s (frame
// plus index in that frame's candidate list) instead of references, so a frame's
// candidate list stays the single owner of every spot.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Candidate spots of a movie, keyed by frame. A frame without detections
/// maps to an empty list rather than being absent.
pub type SpotFrames = BTreeMap<u32, Vec<MidBodySpot>>;

/// Addresses a spot inside a frame-indexed candidate map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SpotKey {
    pub frame: u32,
    pub index: usize,
}

/// A point detection of the mid-body marker in one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MidBodySpot {
    /// Frame index, relative to the start of the mitosis movie.
    pub frame: u32,
    /// Column in pixel coordinates.
    pub x: u32,
    /// Row in pixel coordinates.
    pub y: u32,
    /// Mean intensity of the mid-body marker channel around the spot.
    pub intensity: f64,
    /// Mean intensity of the structural channel around the spot.
    pub sir_intensity: f64,
    /// Spot this one was linked from in an earlier frame.
    pub parent_spot: Option<SpotKey>,
    /// Spot this one is linked to in a later frame.
    pub child_spot: Option<SpotKey>,
    /// Track membership, set once the track builder has run.
    pub track_id: Option<u32>,
}

impl MidBodySpot {
    pub fn new(frame: u32, x: u32, y: u32, intensity: f64, sir_intensity: f64) -> Self {
        Self {
            frame,
            x,
            y,
            intensity,
            sir_intensity,
            parent_spot: None,
            child_spot: None,
            track_id: None,
        }
    }

    pub fn position(&self) -> (f64, f64) {
        (self.x as f64, self.y as f64)
    }

    /// Euclidean distance in pixels.
    pub fn distance_to(&self, other: &MidBodySpot) -> f64 {
        let dx = self.x as f64 - other.x as f64;
        let dy = self.y as f64 - other.y as f64;
        (dx * dx + dy * dy).sqrt()
    }

    pub fn distance_to_point(&self, point: (f64, f64)) -> f64 {
        let dx = self.x as f64 - point.0;
        let dy = self.y as f64 - point.1;
        (dx * dx + dy * dy).sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn distance_is_euclidean() {
        let a = MidBodySpot::new(0, 0, 0, 10.0, 10.0);
        let b = MidBodySpot::new(1, 3, 4, 10.0, 10.0);
        assert_abs_diff_eq!(a.distance_to(&b), 5.0);
        assert_abs_diff_eq!(b.distance_to(&a), 5.0);
        assert_abs_diff_eq!(a.distance_to_point((3.0, 4.0)), 5.0);
    }

    #[test]
    fn new_spot_is_unlinked() {
        let spot = MidBodySpot::new(4, 1, 2, 0.0, 0.0);
        assert!(spot.parent_spot.is_none());
        assert!(spot.child_spot.is_none());
        assert!(spot.track_id.is_none());
    }
}
