// THEORY:
// The `TrackBuilder` turns the linker's answer into `MidBodyTrack`s. The linker
// only speaks in `SpotKey` groups; the builder is the one place that trusts or
// rejects those groups, writes the parent/child/track links back into the
// frame-indexed candidate map, and hands out track ids.
//
// Key architectural principles:
// 1.  **Single owner**: the frame map keeps owning every spot. Tracks receive
//     copies taken after the links have been written, so both views agree.
// 2.  **Deterministic ids**: groups are ordered by their first `SpotKey`
//     (frame, then index) before ids are handed out, so identical input always
//     gives identical track ids and membership.
// 3.  **Untrusted linkers**: a custom linker may return keys that address no
//     spot, reuse a spot already claimed by another group, or put two spots in
//     the same frame. Such entries are dropped with a warning instead of
//     corrupting the tracks.

use crate::config::MidBodyConfig;
use crate::core_modules::linker::{SpotDistanceMetric, TrackingMethod};
use crate::core_modules::spot::{SpotFrames, SpotKey};
use crate::core_modules::track::MidBodyTrack;
use std::collections::HashSet;
use tracing::{debug, info, warn};

pub struct TrackBuilder {
    config: MidBodyConfig,
    method: TrackingMethod,
}

impl TrackBuilder {
    pub fn new(config: MidBodyConfig, method: TrackingMethod) -> Self {
        Self { config, method }
    }

    pub fn method(&self) -> &TrackingMethod {
        &self.method
    }

    /// Links the candidate spots of every frame into tracks.
    ///
    /// The spots in `frames` get their `parent_spot`, `child_spot` and
    /// `track_id` filled in. Every spot ends up in exactly one returned track,
    /// singletons included.
    pub fn generate_tracks_from_spots(&self, frames: &mut SpotFrames) -> Vec<MidBodyTrack> {
        if let TrackingMethod::Custom(_) = self.method {
            warn!("custom linker overrides the built-in LAP tracker");
        }
        let linker = self.method.linker(self.config.mid_body_linking_max_distance);
        let metric = SpotDistanceMetric::from_config(&self.config);

        let groups = linker.link(frames, &metric);
        debug!(method = self.method.name(), groups = groups.len(), "linker finished");

        let mut groups = sanitize_groups(frames, groups);
        groups.sort_by_key(|group| group[0]);

        let mut tracks = Vec::with_capacity(groups.len());
        for (track_id, group) in (0u32..).zip(groups) {
            for pair in group.windows(2) {
                let (from, to) = (pair[0], pair[1]);
                frames.entry(from.frame).or_default()[from.index].child_spot = Some(to);
                frames.entry(to.frame).or_default()[to.index].parent_spot = Some(from);
            }
            let mut track = MidBodyTrack::new(track_id);
            for key in &group {
                let spot = frames
                    .get_mut(&key.frame)
                    .and_then(|spots| spots.get_mut(key.index));
                let Some(spot) = spot else {
                    continue;
                };
                spot.track_id = Some(track_id);
                track.add_spot(spot.clone());
            }
            tracks.push(track);
        }

        info!(
            spots = frames.values().map(Vec::len).sum::<usize>(),
            tracks = tracks.len(),
            "mid-body tracks built"
        );
        tracks
    }
}

/// Drops keys that address no spot, were already claimed, or repeat a frame
/// within their group. Groups are returned ordered by frame; empty groups are
/// removed.
fn sanitize_groups(frames: &SpotFrames, groups: Vec<Vec<SpotKey>>) -> Vec<Vec<SpotKey>> {
    let mut claimed: HashSet<SpotKey> = HashSet::new();
    let mut clean = Vec::with_capacity(groups.len());
    for group in groups {
        let mut kept: Vec<SpotKey> = Vec::with_capacity(group.len());
        let mut seen_frames: HashSet<u32> = HashSet::new();
        for key in group {
            let exists = frames.get(&key.frame).is_some_and(|s| key.index < s.len());
            if !exists {
                warn!(frame = key.frame, index = key.index, "linker returned an unknown spot");
                continue;
            }
            if claimed.contains(&key) || !seen_frames.insert(key.frame) {
                warn!(frame = key.frame, index = key.index, "linker reused a spot or frame");
                continue;
            }
            claimed.insert(key);
            kept.push(key);
        }
        kept.sort_by_key(|key| key.frame);
        if !kept.is_empty() {
            clean.push(kept);
        }
    }
    clean
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::linker::{LinkMetric, SpotLinker};
    use crate::core_modules::spot::MidBodySpot;
    use std::sync::Arc;

    fn spot(frame: u32, x: u32, y: u32) -> MidBodySpot {
        MidBodySpot::new(frame, x, y, 100.0, 50.0)
    }

    fn builder(method: TrackingMethod) -> TrackBuilder {
        TrackBuilder::new(MidBodyConfig::default(), method)
    }

    #[test]
    fn builds_linked_tracks_with_back_references() {
        let mut frames: SpotFrames = [
            (0, vec![spot(0, 10, 10), spot(0, 80, 80)]),
            (1, vec![spot(1, 81, 80), spot(1, 11, 10)]),
        ]
        .into_iter()
        .collect();
        let tracks = builder(TrackingMethod::Basic).generate_tracks_from_spots(&mut frames);

        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[0].track_id, 0);
        assert_eq!(tracks[0].spot(1).map(|s| s.x), Some(11));
        assert_eq!(tracks[1].spot(1).map(|s| s.x), Some(81));

        let first = &frames[&0][0];
        assert_eq!(first.child_spot, Some(SpotKey { frame: 1, index: 1 }));
        assert_eq!(frames[&1][1].parent_spot, Some(SpotKey { frame: 0, index: 0 }));
        assert_eq!(frames[&1][0].track_id, Some(1));
        assert_eq!(tracks[0].spot(0), Some(first));
    }

    #[test]
    fn isolated_spots_become_singleton_tracks() {
        let mut frames: SpotFrames = [(0, vec![spot(0, 0, 0)]), (1, vec![spot(1, 400, 400)])]
            .into_iter()
            .collect();
        let tracks = builder(TrackingMethod::Spatial).generate_tracks_from_spots(&mut frames);
        assert_eq!(tracks.len(), 2);
        assert!(tracks.iter().all(|t| t.length() == 1));
        assert!(frames.values().flatten().all(|s| s.child_spot.is_none()));
    }

    #[test]
    fn rebuilding_is_deterministic() {
        let input: SpotFrames = (0..6)
            .map(|f| (f, vec![spot(f, 10 + f, 10), spot(f, 30, 30 + f), spot(f, 60, 5)]))
            .collect();
        let mut a = input.clone();
        let mut b = input;
        let method = TrackingMethod::Spatial;
        assert_eq!(
            builder(method.clone()).generate_tracks_from_spots(&mut a),
            builder(method).generate_tracks_from_spots(&mut b)
        );
        assert_eq!(a, b);
    }

    struct SloppyLinker;

    impl SpotLinker for SloppyLinker {
        fn link(&self, _frames: &SpotFrames, _metric: &dyn LinkMetric) -> Vec<Vec<SpotKey>> {
            vec![
                vec![SpotKey { frame: 1, index: 0 }, SpotKey { frame: 0, index: 0 }],
                vec![SpotKey { frame: 0, index: 0 }, SpotKey { frame: 7, index: 0 }],
                vec![SpotKey { frame: 1, index: 1 }, SpotKey { frame: 1, index: 2 }],
            ]
        }
    }

    #[test]
    fn custom_linker_output_is_sanitized() {
        let mut frames: SpotFrames = [
            (0, vec![spot(0, 0, 0)]),
            (1, vec![spot(1, 0, 0), spot(1, 5, 5), spot(1, 9, 9)]),
        ]
        .into_iter()
        .collect();
        let method = TrackingMethod::Custom(Arc::new(SloppyLinker));
        let tracks = builder(method).generate_tracks_from_spots(&mut frames);

        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[0].length(), 2);
        assert_eq!(tracks[0].first_frame(), Some(0));
        assert_eq!(tracks[1].length(), 1);
        assert_eq!(tracks[1].spot(1).map(|s| s.x), Some(5));
        assert!(frames[&1][2].track_id.is_none());
    }
}
