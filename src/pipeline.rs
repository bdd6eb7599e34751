// THEORY:
// The `pipeline` module is the top-level API of the mid-body engine. The
// `MidBodyDetector` wires the three layers together for one mitosis event:
//
//   frames --(SpotDetector)--> SpotFrames --(TrackBuilder)--> tracks
//          --(TrackSelector)--> best track --> MitosisTrack::mid_body_spots
//
// The detector holds no state across mitosis events; the only mutation it
// performs is writing the selected track into the mitosis record, and only when
// a track was actually selected.

use crate::config::MidBodyConfig;
use crate::core_modules::frame::{Mask, MitosisMovie};
use crate::core_modules::linker::TrackingMethod;
use crate::core_modules::mitosis::{CellTrack, MitosisTrack};
use crate::core_modules::spot::SpotFrames;
use crate::core_modules::spot_detector::{DetectionMethod, ScaleSpaceBackend, SpotDetector};
use crate::core_modules::track::MidBodyTrack;
use crate::core_modules::track_builder::TrackBuilder;
use crate::core_modules::track_selector::TrackSelector;
use crate::error::Result;
use std::sync::Arc;
use tracing::{debug, info};

/// Drives spot extraction, tracking and selection for mitosis events.
#[derive(Clone)]
pub struct MidBodyDetector {
    config: MidBodyConfig,
    spot_detector: SpotDetector,
}

impl MidBodyDetector {
    pub fn new(config: MidBodyConfig) -> Self {
        let spot_detector = SpotDetector::new(&config);
        Self {
            config,
            spot_detector,
        }
    }

    /// Installs the numerics behind the scale-space detection strategies.
    pub fn with_backend(mut self, backend: Arc<dyn ScaleSpaceBackend>) -> Self {
        self.spot_detector = self.spot_detector.with_backend(backend);
        self
    }

    pub fn config(&self) -> &MidBodyConfig {
        &self.config
    }

    pub fn spot_detector(&self) -> &SpotDetector {
        &self.spot_detector
    }

    /// Detects, tracks and selects the mid-body of `mitosis`, then writes the
    /// selected spots into `mitosis.mid_body_spots` keyed by absolute frame.
    ///
    /// Returns the id of the selected track. When no track is viable the record
    /// is left untouched and `None` is returned.
    pub fn update_mid_body_spots(
        &self,
        mitosis: &mut MitosisTrack,
        movie: &MitosisMovie,
        masks: Option<&[Mask]>,
        cell_tracks: &[CellTrack],
        detection: &DetectionMethod,
        tracking: &TrackingMethod,
    ) -> Result<Option<u32>> {
        let mut spots = self.detect_mid_body_spots(movie, masks, detection)?;
        self.finish(mitosis, &mut spots, movie, cell_tracks, tracking)
    }

    /// Per-frame spot candidates of the whole movie.
    pub fn detect_mid_body_spots(
        &self,
        movie: &MitosisMovie,
        masks: Option<&[Mask]>,
        detection: &DetectionMethod,
    ) -> Result<SpotFrames> {
        self.spot_detector.detect_movie(movie, masks, detection)
    }

    pub fn generate_tracks_from_spots(
        &self,
        spots: &mut SpotFrames,
        tracking: &TrackingMethod,
    ) -> Vec<MidBodyTrack> {
        TrackBuilder::new(self.config.clone(), tracking.clone()).generate_tracks_from_spots(spots)
    }

    pub fn select_best_track(
        &self,
        mitosis: &MitosisTrack,
        tracks: Vec<MidBodyTrack>,
        cell_tracks: &[CellTrack],
        movie: &MitosisMovie,
    ) -> Result<Option<MidBodyTrack>> {
        TrackSelector::new(self.config.clone())
            .select_best_track(mitosis, tracks, cell_tracks, movie)
    }

    /// Tracking, selection and write-back over already extracted spots.
    pub(crate) fn finish(
        &self,
        mitosis: &mut MitosisTrack,
        spots: &mut SpotFrames,
        movie: &MitosisMovie,
        cell_tracks: &[CellTrack],
        tracking: &TrackingMethod,
    ) -> Result<Option<u32>> {
        let tracks = self.generate_tracks_from_spots(spots, tracking);
        debug!(
            mitosis = mitosis.id,
            tracks = tracks.len(),
            "candidate mid-body tracks"
        );

        let Some(track) = self.select_best_track(mitosis, tracks, cell_tracks, movie)? else {
            return Ok(None);
        };
        let track_id = track.track_id;
        let length = track.length();
        apply_track(mitosis, track);
        info!(
            mitosis = mitosis.id,
            track_id,
            spots = length,
            "mid-body spots updated"
        );
        Ok(Some(track_id))
    }
}

/// Copies the track's spots into the mitosis record, shifting relative frames
/// by `min_frame`.
pub fn apply_track(mitosis: &mut MitosisTrack, track: MidBodyTrack) {
    let offset = mitosis.min_frame;
    for (relative_frame, spot) in track.into_spots() {
        mitosis.mid_body_spots.insert(relative_frame + offset, spot);
    }
}
