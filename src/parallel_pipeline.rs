// THEORY:
// Spot extraction is the only stage of the mid-body engine that scales with the
// number of frames, and every frame is independent of the others: the frames are
// read-only and no spot depends on another frame. This module fans the frames
// out to tokio's blocking pool, bounded by a semaphore sized to the machine, and
// merges the answers back into the frame-indexed map. Tracking and selection
// stay sequential; they are cheap next to extraction and need the whole movie.
//
// The result is identical to `SpotDetector::detect_movie`, whatever order the
// workers finish in.

use crate::core_modules::frame::{Mask, MitosisMovie};
use crate::core_modules::linker::TrackingMethod;
use crate::core_modules::mitosis::{CellTrack, MitosisTrack};
use crate::core_modules::spot::SpotFrames;
use crate::core_modules::spot_detector::{check_mask_count, DetectionMethod, SpotDetector};
use crate::error::{MidBodyError, Result};
use crate::pipeline::MidBodyDetector;
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::debug;

/// Extracts the spots of every frame concurrently.
pub async fn detect_mid_body_spots_parallel(
    detector: &SpotDetector,
    movie: Arc<MitosisMovie>,
    masks: Option<Arc<Vec<Mask>>>,
    method: &DetectionMethod,
) -> Result<SpotFrames> {
    check_mask_count(&movie, masks.as_deref().map(Vec::as_slice))?;
    let workers = num_cpus::get().max(1);
    let semaphore = Arc::new(Semaphore::new(workers));
    debug!(frames = movie.len(), workers, "parallel spot extraction");

    let tasks = (0..movie.len()).map(|index| {
        let detector = detector.clone();
        let movie = Arc::clone(&movie);
        let masks = masks.clone();
        let method = method.clone();
        let semaphore = Arc::clone(&semaphore);
        async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .map_err(|e| MidBodyError::Worker(e.to_string()))?;
            let frame_index = index as u32;
            let spots = tokio::task::spawn_blocking(move || {
                let mask = masks.as_ref().map(|m| &m[index]);
                detector.detect_frame(&movie.frames[index], mask, frame_index, &method)
            })
            .await
            .map_err(|e| MidBodyError::Worker(e.to_string()))??;
            Ok::<_, MidBodyError>((frame_index, spots))
        }
    });

    join_all(tasks).await.into_iter().collect()
}

impl MidBodyDetector {
    /// `update_mid_body_spots` with per-frame extraction spread over all cores.
    pub async fn update_mid_body_spots_parallel(
        &self,
        mitosis: &mut MitosisTrack,
        movie: Arc<MitosisMovie>,
        masks: Option<Arc<Vec<Mask>>>,
        cell_tracks: &[CellTrack],
        detection: &DetectionMethod,
        tracking: &TrackingMethod,
    ) -> Result<Option<u32>> {
        let mut spots = detect_mid_body_spots_parallel(
            self.spot_detector(),
            Arc::clone(&movie),
            masks,
            detection,
        )
        .await?;
        self.finish(mitosis, &mut spots, &movie, cell_tracks, tracking)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MidBodyConfig;
    use crate::core_modules::frame::Frame;

    fn movie_with_squares(frames: u32) -> MitosisMovie {
        let (width, height) = (48u32, 32u32);
        let frames = (0..frames)
            .map(|t| {
                let mut mklp = vec![0.0f32; (width * height) as usize];
                let cx = 10 + 3 * t;
                for y in 14..18 {
                    for x in cx..cx + 4 {
                        mklp[(y * width + x) as usize] = 100.0;
                    }
                }
                let sir = vec![20.0f32; (width * height) as usize];
                Frame::from_planes(width, height, vec![sir, mklp]).unwrap()
            })
            .collect();
        MitosisMovie::new(frames)
    }

    #[tokio::test]
    async fn parallel_matches_sequential() {
        let config = MidBodyConfig::default();
        let detector = SpotDetector::new(&config);
        let movie = movie_with_squares(8);
        let sequential = detector
            .detect_movie(&movie, None, &DetectionMethod::HMaxima)
            .unwrap();
        let parallel = detect_mid_body_spots_parallel(
            &detector,
            Arc::new(movie),
            None,
            &DetectionMethod::HMaxima,
        )
        .await
        .unwrap();
        assert_eq!(parallel, sequential);
        assert_eq!(parallel.len(), 8);
        assert!(parallel.values().all(|spots| spots.len() == 1));
    }

    #[tokio::test]
    async fn mask_count_is_checked() {
        let detector = SpotDetector::new(&MidBodyConfig::default());
        let masks = Arc::new(vec![Mask::new(48, 32)]);
        let err = detect_mid_body_spots_parallel(
            &detector,
            Arc::new(movie_with_squares(3)),
            Some(masks),
            &DetectionMethod::HMaxima,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, MidBodyError::DimensionMismatch(_)));
    }

    #[tokio::test]
    async fn empty_movie_gives_empty_map() {
        let detector = SpotDetector::new(&MidBodyConfig::default());
        let spots = detect_mid_body_spots_parallel(
            &detector,
            Arc::new(MitosisMovie::default()),
            None,
            &DetectionMethod::HMaxima,
        )
        .await
        .unwrap();
        assert!(spots.is_empty());
    }
}
