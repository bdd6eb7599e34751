// THEORY:
// The mitosis record and the cell tracks it points to are produced upstream, by
// the segmentation and cell tracking stages. The mid-body engine treats them as
// read-only input with a single exception: `MitosisTrack::mid_body_spots`, which
// the assembler fills once a mid-body track has been selected.
//
// Mother and daughter cells are referenced by id, never by live pointer. The
// selector resolves them exactly once, through `resolve_pedigree`, into a
// `Pedigree` of shared borrows over the caller's cell track list.

use crate::core_modules::spot::MidBodySpot;
use crate::error::{MidBodyError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Key of the cytokinesis start in `MitosisTrack::key_events_frame`.
pub const CYTOKINESIS_EVENT: &str = "cytokinesis";

/// Segmented outline of one cell in one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellSpot {
    pub frame: u32,
    /// Boundary points of the cell polygon, `(x, y)` in absolute pixels.
    pub spot_points: Vec<(i32, i32)>,
}

impl CellSpot {
    pub fn new(frame: u32, spot_points: Vec<(i32, i32)>) -> Self {
        Self { frame, spot_points }
    }
}

/// A cell followed over time by the cell tracking stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellTrack {
    pub id: u32,
    /// First frame in which the cell exists.
    pub start: u32,
    pub spots: BTreeMap<u32, CellSpot>,
}

impl CellTrack {
    pub fn new(id: u32, start: u32) -> Self {
        Self {
            id,
            start,
            spots: BTreeMap::new(),
        }
    }

    pub fn add_spot(&mut self, spot: CellSpot) {
        self.spots.insert(spot.frame, spot);
    }
}

/// Position of the cropped mitosis movie inside the full movie.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: i32,
    pub max_x: i32,
    pub min_y: i32,
    pub max_y: i32,
}

/// One mother-to-daughters division event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MitosisTrack {
    pub id: u32,
    pub mother_track_id: u32,
    pub daughter_track_ids: Vec<u32>,
    /// First frame of the cropped movie, in absolute frames.
    pub min_frame: u32,
    pub max_frame: u32,
    pub position: BoundingBox,
    /// Absolute frame of named events, e.g. `"cytokinesis"`.
    pub key_events_frame: BTreeMap<String, u32>,
    /// Selected mid-body spots, keyed by absolute frame.
    pub mid_body_spots: BTreeMap<u32, MidBodySpot>,
}

/// Mother and daughter cell tracks of a mitosis, resolved once.
#[derive(Debug, Clone, Copy)]
pub struct Pedigree<'a> {
    pub mother: &'a CellTrack,
    /// Only the first daughter takes part in mid-body localisation.
    pub daughter: &'a CellTrack,
}

impl MitosisTrack {
    pub fn new(id: u32, mother_track_id: u32, daughter_track_ids: Vec<u32>) -> Self {
        Self {
            id,
            mother_track_id,
            daughter_track_ids,
            min_frame: 0,
            max_frame: 0,
            position: BoundingBox::default(),
            key_events_frame: BTreeMap::new(),
            mid_body_spots: BTreeMap::new(),
        }
    }

    /// Finds the mother and first daughter among `cell_tracks`.
    pub fn resolve_pedigree<'a>(&self, cell_tracks: &'a [CellTrack]) -> Result<Pedigree<'a>> {
        let find = |track_id: u32| {
            cell_tracks
                .iter()
                .find(|track| track.id == track_id)
                .ok_or(MidBodyError::MissingPedigree {
                    mitosis_id: self.id,
                    track_id,
                })
        };
        let mother = find(self.mother_track_id)?;
        let daughter_id = self
            .daughter_track_ids
            .first()
            .copied()
            .ok_or_else(|| MidBodyError::MissingPedigree {
                mitosis_id: self.id,
                track_id: self.mother_track_id,
            })?;
        let daughter = find(daughter_id)?;
        Ok(Pedigree { mother, daughter })
    }

    /// Absolute frame at which cytokinesis starts.
    pub fn cytokinesis_frame(&self) -> Result<u32> {
        self.key_events_frame
            .get(CYTOKINESIS_EVENT)
            .copied()
            .ok_or_else(|| MidBodyError::MissingKeyEvent {
                mitosis_id: self.id,
                event: CYTOKINESIS_EVENT.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pedigree_resolves_mother_and_first_daughter() {
        let cells = vec![CellTrack::new(3, 0), CellTrack::new(8, 5), CellTrack::new(9, 5)];
        let mitosis = MitosisTrack::new(1, 3, vec![9, 8]);
        let pedigree = mitosis.resolve_pedigree(&cells).unwrap();
        assert_eq!(pedigree.mother.id, 3);
        assert_eq!(pedigree.daughter.id, 9);
    }

    #[test]
    fn missing_cell_track_is_reported() {
        let cells = vec![CellTrack::new(3, 0)];
        let mitosis = MitosisTrack::new(1, 3, vec![4]);
        let err = mitosis.resolve_pedigree(&cells).unwrap_err();
        assert!(matches!(
            err,
            MidBodyError::MissingPedigree { mitosis_id: 1, track_id: 4 }
        ));
        let orphan = MitosisTrack::new(2, 3, vec![]);
        assert!(orphan.resolve_pedigree(&cells).is_err());
    }

    #[test]
    fn cytokinesis_frame_comes_from_key_events() {
        let mut mitosis = MitosisTrack::new(1, 0, vec![1]);
        assert!(matches!(
            mitosis.cytokinesis_frame(),
            Err(MidBodyError::MissingKeyEvent { .. })
        ));
        mitosis.key_events_frame.insert(CYTOKINESIS_EVENT.to_string(), 42);
        assert_eq!(mitosis.cytokinesis_frame().unwrap(), 42);
    }
}
