// THEORY:
// The `linker` module solves the data association problem for mid-body spots:
// which candidate in frame t+1 continues which candidate in frame t. Where the
// real-time tracker of the vision pipeline matches greedily by nearest predicted
// position, the mid-body engine sees the whole short movie at once and can
// afford a global answer, so every association step is a linear assignment
// problem over a padded `CostMatrix`.
//
// Algorithm steps:
// 1.  **Frame-to-frame linking**: for each pair of adjacent frames that both
//     have detections, link spots by minimum total cost. An empty frame on
//     either side makes the step a no-op.
// 2.  **Segment building**: follow the links to get unbroken segments.
// 3.  **Gap closing**: the end of one segment may be joined to the start of
//     another that begins 2..=N frames later, again by assignment, using the
//     same metric with its own cutoff. This recovers tracks interrupted by a
//     transient non-detection.
// 4.  **No splitting, no merging**: every spot keeps at most one predecessor and
//     one successor.
//
// The cost metric is pluggable (`LinkMetric`), and so is the whole linker
// (`SpotLinker`); `TrackingMethod` picks between the two built-in variants and
// a caller-supplied engine.

use crate::config::MidBodyConfig;
use crate::core_modules::cost_matrix::{CostMatrix, LinkCost};
use crate::core_modules::spot::{MidBodySpot, SpotFrames, SpotKey};
use crate::error::{MidBodyError, Result};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

/// Pairwise cost between two spots.
pub trait LinkMetric: Send + Sync {
    fn cost(&self, from: &MidBodySpot, to: &MidBodySpot) -> LinkCost;
}

/// TrackMate-style spot distance: spatial distance inflated by relative
/// intensity differences, squared.
///
/// `cost = (d * (1 + 3 w1 |I1a - I1b| / (I1a + I1b) + 3 w2 |I2a - I2b| / (I2a + I2b)))²`
///
/// Pairs further apart than `max_distance` are forbidden whatever their
/// intensities.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpotDistanceMetric {
    pub weight_mklp_intensity: f64,
    pub weight_sir_intensity: f64,
    pub max_distance: f64,
}

impl SpotDistanceMetric {
    pub fn from_config(config: &MidBodyConfig) -> Self {
        Self {
            weight_mklp_intensity: config.weight_mklp_intensity_factor,
            weight_sir_intensity: config.weight_sir_intensity_factor,
            max_distance: config.mid_body_linking_max_distance,
        }
    }

    /// Multiplicative penalty `1 + primary + secondary`.
    pub fn penalty(&self, a: &MidBodySpot, b: &MidBodySpot) -> f64 {
        1.0 + relative_difference(self.weight_mklp_intensity, a.intensity, b.intensity)
            + relative_difference(self.weight_sir_intensity, a.sir_intensity, b.sir_intensity)
    }
}

fn relative_difference(weight: f64, a: f64, b: f64) -> f64 {
    let total = a + b;
    if total == 0.0 {
        return 0.0;
    }
    3.0 * weight * (a - b).abs() / total.abs()
}

impl LinkMetric for SpotDistanceMetric {
    fn cost(&self, from: &MidBodySpot, to: &MidBodySpot) -> LinkCost {
        let distance = from.distance_to(to);
        if distance > self.max_distance {
            return LinkCost::Forbidden;
        }
        LinkCost::Allowed((distance * self.penalty(from, to)).powi(2))
    }
}

/// A linking engine: per-frame spot sets plus a cost function in, groups of
/// linked spots out. Each group is ordered by frame.
pub trait SpotLinker: Send + Sync {
    fn link(&self, frames: &SpotFrames, metric: &dyn LinkMetric) -> Vec<Vec<SpotKey>>;
}

/// How candidate pairs are proposed before their cost is evaluated.
///
/// Proposal only prunes work. With `SpotDistanceMetric` every pair further
/// apart than `sqrt(cutoff)` already costs more than the cutoff, so a grid
/// sized to that reach yields the same links as `AllPairs` at the same cutoff.
/// A custom metric that can price distant pairs below the cutoff should use
/// `AllPairs`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CandidateProposal {
    /// Every pair between the two sets.
    AllPairs,
    /// Only pairs sharing or neighbouring a grid cell of the given size.
    SpatialGrid { cell_size: f64 },
}

/// Cutoffs and windows of a LAP linker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinkerSettings {
    /// Links costlier than this are forbidden.
    pub track_cost_cutoff: f64,
    /// Gap-closing links costlier than this are forbidden.
    pub gap_closing_cost_cutoff: f64,
    /// Largest frame difference bridged by gap closing.
    pub gap_closing_max_frame_count: u32,
    pub proposal: CandidateProposal,
}

/// Linear-assignment linker with gap closing.
#[derive(Debug, Clone)]
pub struct LapLinker {
    settings: LinkerSettings,
}

impl LapLinker {
    pub fn new(settings: LinkerSettings) -> Self {
        Self { settings }
    }

    /// Frame-adjacent linking over every candidate pair.
    pub fn basic(max_distance: f64) -> Self {
        Self::new(LinkerSettings {
            track_cost_cutoff: max_distance * max_distance,
            gap_closing_cost_cutoff: max_distance * max_distance,
            gap_closing_max_frame_count: 2,
            proposal: CandidateProposal::AllPairs,
        })
    }

    /// Linking restricted to spatial neighbourhoods.
    ///
    /// The cost cutoff is `max_distance` itself, so no link spans more than
    /// `sqrt(max_distance)` pixels; grid cells are sized to that reach.
    pub fn spatial(max_distance: f64) -> Self {
        Self::new(LinkerSettings {
            track_cost_cutoff: max_distance,
            gap_closing_cost_cutoff: max_distance,
            gap_closing_max_frame_count: 3,
            proposal: CandidateProposal::SpatialGrid {
                cell_size: max_distance.max(0.0).sqrt(),
            },
        })
    }

    pub fn settings(&self) -> &LinkerSettings {
        &self.settings
    }

    /// Builds the padded matrix between two spot sets and solves it.
    fn assign(
        &self,
        sources: &[&MidBodySpot],
        targets: &[&MidBodySpot],
        metric: &dyn LinkMetric,
        cutoff: f64,
    ) -> Vec<(usize, usize)> {
        if sources.is_empty() || targets.is_empty() {
            return Vec::new();
        }
        let candidates = self.propose(sources, targets);
        let matrix = CostMatrix::build(sources.len(), targets.len(), |i, j| {
            if !candidates(i, j) {
                return LinkCost::Forbidden;
            }
            match metric.cost(sources[i], targets[j]) {
                LinkCost::Allowed(cost) if cost <= cutoff => LinkCost::Allowed(cost),
                _ => LinkCost::Forbidden,
            }
        });
        matrix.solve()
    }

    /// Returns a predicate telling whether `(i, j)` is worth evaluating.
    fn propose<'a>(
        &self,
        sources: &'a [&MidBodySpot],
        targets: &'a [&MidBodySpot],
    ) -> Box<dyn Fn(usize, usize) -> bool + 'a> {
        match self.settings.proposal {
            CandidateProposal::AllPairs => Box::new(|_, _| true),
            CandidateProposal::SpatialGrid { cell_size } => {
                let index = SpatialGrid::new(targets, cell_size);
                let neighbours: Vec<Vec<usize>> =
                    sources.iter().map(|s| index.neighbours(s)).collect();
                Box::new(move |i, j| neighbours[i].binary_search(&j).is_ok())
            }
        }
    }
}

impl SpotLinker for LapLinker {
    fn link(&self, frames: &SpotFrames, metric: &dyn LinkMetric) -> Vec<Vec<SpotKey>> {
        let mut next: HashMap<SpotKey, SpotKey> = HashMap::new();
        let mut has_prev: HashMap<SpotKey, SpotKey> = HashMap::new();

        // --- 1. Frame-to-frame linking ---
        let frame_keys: Vec<u32> = frames.keys().copied().collect();
        for pair in frame_keys.windows(2) {
            let (f1, f2) = (pair[0], pair[1]);
            if f2 != f1 + 1 {
                continue;
            }
            let sources: Vec<&MidBodySpot> = frames[&f1].iter().collect();
            let targets: Vec<&MidBodySpot> = frames[&f2].iter().collect();
            let links = self.assign(&sources, &targets, metric, self.settings.track_cost_cutoff);
            debug!(from = f1, to = f2, links = links.len(), "frame linking");
            for (i, j) in links {
                let a = SpotKey { frame: f1, index: i };
                let b = SpotKey { frame: f2, index: j };
                next.insert(a, b);
                has_prev.insert(b, a);
            }
        }

        // --- 2. Segments ---
        let mut segments: Vec<Vec<SpotKey>> = Vec::new();
        for (&frame, spots) in frames {
            for index in 0..spots.len() {
                let key = SpotKey { frame, index };
                if has_prev.contains_key(&key) {
                    continue;
                }
                let mut segment = vec![key];
                let mut current = key;
                while let Some(&following) = next.get(&current) {
                    segment.push(following);
                    current = following;
                }
                segments.push(segment);
            }
        }

        // --- 3. Gap closing ---
        let ends: Vec<&MidBodySpot> = segments
            .iter()
            .map(|s| spot_at(frames, &s[s.len() - 1]))
            .collect();
        let starts: Vec<&MidBodySpot> = segments.iter().map(|s| spot_at(frames, &s[0])).collect();
        let max_gap = self.settings.gap_closing_max_frame_count;
        let gap_metric = GapWindow { inner: metric, max_gap };
        let joins = self.assign(&ends, &starts, &gap_metric, self.settings.gap_closing_cost_cutoff);
        debug!(segments = segments.len(), joins = joins.len(), "gap closing");

        let mut successor: BTreeMap<usize, usize> = BTreeMap::new();
        let mut joined: Vec<bool> = vec![false; segments.len()];
        for (end, start) in joins {
            if end != start {
                successor.insert(end, start);
                joined[start] = true;
            }
        }

        // --- 4. Chains of segments become tracks ---
        let mut tracks: Vec<Vec<SpotKey>> = Vec::new();
        for head in 0..segments.len() {
            if joined[head] {
                continue;
            }
            let mut track = segments[head].clone();
            let mut current = head;
            while let Some(&following) = successor.get(&current) {
                track.extend_from_slice(&segments[following]);
                current = following;
            }
            tracks.push(track);
        }
        tracks.sort_by_key(|track| track[0]);
        tracks
    }
}

fn spot_at<'f>(frames: &'f SpotFrames, key: &SpotKey) -> &'f MidBodySpot {
    &frames[&key.frame][key.index]
}

/// Restricts a metric to end/start pairs 2..=`max_gap` frames apart.
struct GapWindow<'a> {
    inner: &'a dyn LinkMetric,
    max_gap: u32,
}

impl LinkMetric for GapWindow<'_> {
    fn cost(&self, from: &MidBodySpot, to: &MidBodySpot) -> LinkCost {
        if to.frame < from.frame + 2 || to.frame - from.frame > self.max_gap {
            return LinkCost::Forbidden;
        }
        self.inner.cost(from, to)
    }
}

/// Uniform grid over a spot set, used to propose nearby candidates only.
struct SpatialGrid {
    cell_size: f64,
    cells: HashMap<(i64, i64), Vec<usize>>,
}

impl SpatialGrid {
    fn new(spots: &[&MidBodySpot], cell_size: f64) -> Self {
        let cell_size = if cell_size > 0.0 { cell_size } else { 1.0 };
        let mut cells: HashMap<(i64, i64), Vec<usize>> = HashMap::new();
        for (i, spot) in spots.iter().enumerate() {
            cells.entry(Self::cell_of(spot, cell_size)).or_default().push(i);
        }
        Self { cell_size, cells }
    }

    fn cell_of(spot: &MidBodySpot, cell_size: f64) -> (i64, i64) {
        (
            (spot.x as f64 / cell_size).floor() as i64,
            (spot.y as f64 / cell_size).floor() as i64,
        )
    }

    /// Sorted indices of the spots in the 3x3 block of cells around `spot`.
    fn neighbours(&self, spot: &MidBodySpot) -> Vec<usize> {
        let (cx, cy) = Self::cell_of(spot, self.cell_size);
        let mut out: Vec<usize> = Vec::new();
        for dy in -1..=1 {
            for dx in -1..=1 {
                if let Some(members) = self.cells.get(&(cx + dx, cy + dy)) {
                    out.extend(members);
                }
            }
        }
        out.sort_unstable();
        out
    }
}

/// Which linking engine the track builder uses.
#[derive(Clone)]
pub enum TrackingMethod {
    /// `laptrack`: frame-adjacent linking over all pairs.
    Basic,
    /// `spatial_laptrack`: candidates proposed from spatial neighbourhoods.
    Spatial,
    Custom(Arc<dyn SpotLinker>),
}

impl TrackingMethod {
    pub fn name(&self) -> &str {
        match self {
            Self::Basic => "laptrack",
            Self::Spatial => "spatial_laptrack",
            Self::Custom(_) => "custom",
        }
    }

    /// Resolves the method to a linker configured for `max_distance`.
    pub fn linker(&self, max_distance: f64) -> Arc<dyn SpotLinker> {
        match self {
            Self::Basic => Arc::new(LapLinker::basic(max_distance)),
            Self::Spatial => Arc::new(LapLinker::spatial(max_distance)),
            Self::Custom(linker) => Arc::clone(linker),
        }
    }
}

impl Default for TrackingMethod {
    fn default() -> Self {
        Self::Spatial
    }
}

impl fmt::Debug for TrackingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TrackingMethod({})", self.name())
    }
}

impl FromStr for TrackingMethod {
    type Err = MidBodyError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "laptrack" => Ok(Self::Basic),
            "spatial_laptrack" => Ok(Self::Spatial),
            other => Err(MidBodyError::InvalidTrackingMethod(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn metric() -> SpotDistanceMetric {
        SpotDistanceMetric::from_config(&MidBodyConfig::default())
    }

    fn spot(frame: u32, x: u32, y: u32) -> MidBodySpot {
        MidBodySpot::new(frame, x, y, 100.0, 50.0)
    }

    fn frames(entries: Vec<(u32, Vec<MidBodySpot>)>) -> SpotFrames {
        entries.into_iter().collect()
    }

    fn key(frame: u32, index: usize) -> SpotKey {
        SpotKey { frame, index }
    }

    #[test]
    fn identical_spots_cost_nothing() {
        let a = spot(0, 10, 10);
        let b = spot(1, 10, 10);
        assert_eq!(metric().cost(&a, &b), LinkCost::Allowed(0.0));
    }

    #[test]
    fn cost_grows_with_distance_for_fixed_intensities() {
        let m = metric();
        let origin = spot(0, 0, 0);
        let mut previous = -1.0;
        for d in [1, 5, 20, 100, 175] {
            let cost = m.cost(&origin, &spot(1, d, 0)).value().expect("within range");
            assert!(cost > previous);
            assert!(cost.is_finite());
            previous = cost;
        }
    }

    #[test]
    fn spots_beyond_max_distance_are_forbidden() {
        let m = metric();
        let a = spot(0, 0, 0);
        let b = spot(1, 176, 0);
        assert!(m.cost(&a, &b).is_forbidden());
    }

    #[test]
    fn intensity_difference_inflates_the_cost() {
        let m = metric();
        let a = MidBodySpot::new(0, 0, 0, 100.0, 50.0);
        let b = MidBodySpot::new(1, 3, 4, 300.0, 50.0);
        // penalty = 1 + 3 * 5 * 200 / 400 = 8.5; cost = (5 * 8.5)^2
        assert_abs_diff_eq!(m.penalty(&a, &b), 8.5);
        assert_abs_diff_eq!(m.cost(&a, &b).value().unwrap(), 1806.25);
    }

    #[test]
    fn zero_intensities_do_not_divide_by_zero() {
        let a = MidBodySpot::new(0, 0, 0, 0.0, 0.0);
        let b = MidBodySpot::new(1, 1, 0, 0.0, 0.0);
        assert_eq!(metric().cost(&a, &b), LinkCost::Allowed(1.0));
    }

    #[test]
    fn two_parallel_tracks_are_kept_apart() {
        let input = frames(vec![
            (0, vec![spot(0, 10, 10), spot(0, 50, 50)]),
            (1, vec![spot(1, 51, 50), spot(1, 11, 10)]),
            (2, vec![spot(2, 12, 10), spot(2, 52, 50)]),
        ]);
        let tracks = LapLinker::basic(175.0).link(&input, &metric());
        assert_eq!(
            tracks,
            vec![
                vec![key(0, 0), key(1, 1), key(2, 0)],
                vec![key(0, 1), key(1, 0), key(2, 1)],
            ]
        );
    }

    #[test]
    fn empty_frame_breaks_linking_but_gap_closing_rejoins() {
        let input = frames(vec![
            (0, vec![spot(0, 10, 10)]),
            (1, vec![]),
            (2, vec![spot(2, 11, 10)]),
        ]);
        let tracks = LapLinker::basic(175.0).link(&input, &metric());
        assert_eq!(tracks, vec![vec![key(0, 0), key(2, 0)]]);
    }

    #[test]
    fn gaps_longer_than_the_window_stay_open() {
        let input = frames(vec![
            (0, vec![spot(0, 10, 10)]),
            (1, vec![]),
            (2, vec![]),
            (3, vec![spot(3, 10, 10)]),
        ]);
        let basic = LapLinker::basic(175.0).link(&input, &metric());
        assert_eq!(basic.len(), 2);
        let spatial = LapLinker::spatial(175.0).link(&input, &metric());
        assert_eq!(spatial, vec![vec![key(0, 0), key(3, 0)]]);
    }

    #[test]
    fn spatial_variant_respects_its_tighter_cutoff() {
        // Distance 20 with equal intensities costs 400 > 175.
        let input = frames(vec![(0, vec![spot(0, 0, 0)]), (1, vec![spot(1, 20, 0)])]);
        assert_eq!(LapLinker::spatial(175.0).link(&input, &metric()).len(), 2);
        assert_eq!(LapLinker::basic(175.0).link(&input, &metric()).len(), 1);
    }

    #[test]
    fn spatial_grid_only_proposes_nearby_spots() {
        let targets = [spot(1, 5, 5), spot(1, 500, 500), spot(1, 15, 2)];
        let refs: Vec<&MidBodySpot> = targets.iter().collect();
        let grid = SpatialGrid::new(&refs, 10.0);
        assert_eq!(grid.neighbours(&spot(0, 9, 9)), vec![0, 2]);
    }

    #[test]
    fn spatial_grid_prunes_pairs_beyond_the_cutoff_reach() {
        let linker = LapLinker::spatial(175.0);
        let CandidateProposal::SpatialGrid { cell_size } = linker.settings().proposal else {
            panic!("spatial linker proposes from a grid");
        };
        assert_abs_diff_eq!(cell_size, 175.0f64.sqrt());

        let sources = [spot(0, 0, 0)];
        let targets = [spot(1, 5, 0), spot(1, 60, 0), spot(1, 0, 120)];
        let sources: Vec<&MidBodySpot> = sources.iter().collect();
        let targets: Vec<&MidBodySpot> = targets.iter().collect();
        let proposed = linker.propose(&sources, &targets);
        assert!(proposed(0, 0));
        assert!(!proposed(0, 1));
        assert!(!proposed(0, 2));
    }

    #[test]
    fn spatial_grid_links_like_all_pairs_at_the_same_cutoff() {
        let input = frames(vec![
            (0, vec![spot(0, 10, 10), spot(0, 30, 10), spot(0, 80, 40)]),
            (1, vec![spot(1, 31, 11), spot(1, 11, 12), spot(1, 82, 41)]),
            (2, vec![spot(2, 12, 12), spot(2, 83, 40), spot(2, 33, 10)]),
            (3, vec![spot(3, 32, 12), spot(3, 12, 13)]),
        ]);
        let mut all_pairs = *LapLinker::spatial(175.0).settings();
        all_pairs.proposal = CandidateProposal::AllPairs;
        assert_eq!(
            LapLinker::spatial(175.0).link(&input, &metric()),
            LapLinker::new(all_pairs).link(&input, &metric())
        );
    }

    #[test]
    fn linking_is_deterministic() {
        let input = frames(vec![
            (0, vec![spot(0, 10, 10), spot(0, 12, 10), spot(0, 14, 10)]),
            (1, vec![spot(1, 11, 10), spot(1, 13, 10), spot(1, 15, 10)]),
        ]);
        let linker = LapLinker::spatial(175.0);
        assert_eq!(linker.link(&input, &metric()), linker.link(&input, &metric()));
    }

    #[test]
    fn method_names_parse() {
        assert!(matches!("laptrack".parse::<TrackingMethod>(), Ok(TrackingMethod::Basic)));
        assert!(matches!(
            "spatial_laptrack".parse::<TrackingMethod>(),
            Ok(TrackingMethod::Spatial)
        ));
        let err = "trackmate".parse::<TrackingMethod>().unwrap_err();
        assert!(matches!(err, MidBodyError::InvalidTrackingMethod(name) if name == "trackmate"));
        assert_eq!(TrackingMethod::default().name(), "spatial_laptrack");
    }
}
