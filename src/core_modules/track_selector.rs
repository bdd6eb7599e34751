// THEORY:
// Among all the mid-body tracks of one mitosis, the `TrackSelector` picks the one
// that behaves like a real mid-body. Two biological priors are used:
//
// 1.  **Position**: during cytokinesis the mid-body sits where the mother and the
//     first daughter touch. For every frame where both cells are segmented, the
//     expected position is the midpoint of their closest boundary points.
// 2.  **Structural signal**: the secondary (SiR-tubulin) channel is bright on the
//     mid-body during the first half of cytokinesis. A track that does not cover
//     at least half of that window is not viable.
//
// The final score is `expected_distance - 0.5 * sir_intensity`; lower is better.
// Tracks shorter than the configured minimum are discarded before scoring, and
// infinite scores never win. "No winner" is a normal outcome, returned as `None`.

use crate::config::MidBodyConfig;
use crate::core_modules::frame::MitosisMovie;
use crate::core_modules::mitosis::{CellTrack, MitosisTrack, Pedigree};
use crate::core_modules::track::{ExpectedPositions, MidBodyTrack};
use crate::error::Result;
use tracing::{debug, info};

/// Weight of the structural intensity in the combined score.
const SIR_INTENSITY_WEIGHT: f64 = 0.5;

/// Breakdown of one candidate's score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackScore {
    pub track_id: u32,
    /// Mean distance to the expected positions; infinite without overlap.
    pub expected_distance: f64,
    /// Mean structural intensity over the window; `-inf` when too sparse.
    pub sir_intensity: f64,
    pub score: f64,
}

impl TrackScore {
    pub fn is_viable(&self) -> bool {
        self.score.is_finite()
    }
}

pub struct TrackSelector {
    config: MidBodyConfig,
}

impl TrackSelector {
    pub fn new(config: MidBodyConfig) -> Self {
        Self { config }
    }

    /// Picks the most plausible mid-body track, or `None` if no candidate is
    /// viable.
    pub fn select_best_track(
        &self,
        mitosis: &MitosisTrack,
        tracks: Vec<MidBodyTrack>,
        cell_tracks: &[CellTrack],
        movie: &MitosisMovie,
    ) -> Result<Option<MidBodyTrack>> {
        let candidates = self.filter_by_length(tracks);
        if candidates.is_empty() {
            info!(mitosis = mitosis.id, "no mid-body track long enough");
            return Ok(None);
        }

        let pedigree = mitosis.resolve_pedigree(cell_tracks)?;
        let cytokinesis_frame = mitosis.cytokinesis_frame()?;
        let expected_positions = self.expected_positions(mitosis, &pedigree);

        let mut best: Option<(f64, usize)> = None;
        for (index, track) in candidates.iter().enumerate() {
            let score = self.score_track(
                track,
                mitosis,
                &expected_positions,
                movie,
                cytokinesis_frame,
            )?;
            debug!(
                track_id = score.track_id,
                expected_distance = score.expected_distance,
                sir_intensity = score.sir_intensity,
                score = score.score,
                "mid-body track scored"
            );
            if !score.is_viable() {
                continue;
            }
            if best.is_none_or(|(best_score, _)| score.score < best_score) {
                best = Some((score.score, index));
            }
        }

        let winner = best.and_then(|(_, index)| candidates.into_iter().nth(index));
        match &winner {
            Some(track) => info!(
                mitosis = mitosis.id,
                track_id = track.track_id,
                "mid-body track selected"
            ),
            None => info!(mitosis = mitosis.id, "no viable mid-body track"),
        }
        Ok(winner)
    }

    /// Keeps the tracks strictly longer than the configured minimum.
    pub fn filter_by_length(&self, tracks: Vec<MidBodyTrack>) -> Vec<MidBodyTrack> {
        let minimum = self.config.minimum_mid_body_track_length;
        tracks.into_iter().filter(|t| t.length() > minimum).collect()
    }

    /// Expected mid-body position per frame of the cropped movie.
    ///
    /// Frames run from the daughter's first frame over `cytokinesis_duration`
    /// frames. Positions are relative to the mitosis bounding box and keyed by
    /// frame relative to `min_frame`.
    pub fn expected_positions(
        &self,
        mitosis: &MitosisTrack,
        pedigree: &Pedigree<'_>,
    ) -> ExpectedPositions {
        let mut positions = ExpectedPositions::new();
        let start = pedigree.daughter.start;
        let offset = (mitosis.position.min_x as f64, mitosis.position.min_y as f64);
        for frame in start..start.saturating_add(self.config.cytokinesis_duration) {
            let (Some(mother), Some(daughter)) =
                (pedigree.mother.spots.get(&frame), pedigree.daughter.spots.get(&frame))
            else {
                continue;
            };
            let Some(relative_frame) = frame.checked_sub(mitosis.min_frame) else {
                continue;
            };
            let midpoint = closest_boundary_midpoint(&mother.spot_points, &daughter.spot_points);
            if let Some((x, y)) = midpoint {
                positions.insert(relative_frame, (x - offset.0, y - offset.1));
            }
        }
        positions
    }

    /// Mean structural intensity under the track's spots, over the absolute
    /// frames `[cytokinesis, cytokinesis + duration / 2]`.
    pub fn sir_intensity(
        &self,
        track: &MidBodyTrack,
        mitosis: &MitosisTrack,
        movie: &MitosisMovie,
        cytokinesis_frame: u32,
    ) -> Result<f64> {
        let window_start = cytokinesis_frame;
        let window_end = cytokinesis_frame.saturating_add(self.config.cytokinesis_duration / 2);
        let window_len = (window_end - window_start + 1) as f64;

        let mut total = 0.0;
        let mut covered = 0usize;
        for frame in window_start..=window_end {
            let Some(relative_frame) = frame.checked_sub(mitosis.min_frame) else {
                continue;
            };
            let (Some(spot), Some(movie_frame)) =
                (track.spot(relative_frame), movie.frame(relative_frame))
            else {
                continue;
            };
            let channel = movie_frame.channel(self.config.sir_channel)?;
            let Some(pixel) = channel.get_pixel_checked(spot.x, spot.y) else {
                continue;
            };
            total += pixel.0[0] as f64;
            covered += 1;
        }

        if (covered as f64) < window_len / 2.0 {
            return Ok(f64::NEG_INFINITY);
        }
        Ok(total / covered as f64)
    }

    fn score_track(
        &self,
        track: &MidBodyTrack,
        mitosis: &MitosisTrack,
        expected_positions: &ExpectedPositions,
        movie: &MitosisMovie,
        cytokinesis_frame: u32,
    ) -> Result<TrackScore> {
        let expected_distance = track
            .expected_distance(expected_positions)
            .unwrap_or(f64::INFINITY);
        let sir_intensity = self.sir_intensity(track, mitosis, movie, cytokinesis_frame)?;
        Ok(TrackScore {
            track_id: track.track_id,
            expected_distance,
            sir_intensity,
            score: expected_distance - SIR_INTENSITY_WEIGHT * sir_intensity,
        })
    }
}

/// Midpoint of the closest mother/daughter boundary point pair. Pairs tied at
/// the minimum distance are averaged together.
fn closest_boundary_midpoint(
    mother: &[(i32, i32)],
    daughter: &[(i32, i32)],
) -> Option<(f64, f64)> {
    let mut min_distance = f64::INFINITY;
    let mut closest: Vec<((i32, i32), (i32, i32))> = Vec::new();
    for &m in mother {
        for &d in daughter {
            let dx = (m.0 - d.0) as f64;
            let dy = (m.1 - d.1) as f64;
            let distance = (dx * dx + dy * dy).sqrt();
            if distance < min_distance {
                min_distance = distance;
                closest.clear();
            }
            if distance == min_distance {
                closest.push((m, d));
            }
        }
    }
    if closest.is_empty() {
        return None;
    }
    let n = (2 * closest.len()) as f64;
    let (sx, sy) = closest.iter().fold((0.0, 0.0), |(sx, sy), (m, d)| {
        (sx + (m.0 + d.0) as f64, sy + (m.1 + d.1) as f64)
    });
    Some((sx / n, sy / n))
}
