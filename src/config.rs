// THEORY:
// All tunables of the mid-body engine live in one plain data struct, in the same
// spirit as the `PipelineConfig` of the vision pipeline: the orchestrator owns a
// copy and hands references down to each layer. Nothing here carries behaviour
// beyond the derived cutoffs, so the struct can be loaded from JSON and shared
// between worker tasks freely.

use crate::error::{MidBodyError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Number of frames during which the mid-body is searched between the cells.
pub const CYTOKINESIS_DURATION: u32 = 20;

/// Configuration for spot extraction, tracking and track selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MidBodyConfig {
    /// Weight of the primary (MKLP) intensity difference in the link cost.
    pub weight_mklp_intensity_factor: f64,
    /// Weight of the secondary (SiR) intensity difference in the link cost.
    pub weight_sir_intensity_factor: f64,
    /// Maximum distance in pixels between two linked mid-body spots.
    pub mid_body_linking_max_distance: f64,
    /// `h` of the h-maxima transform used by the local-maxima strategy.
    pub h_maxima_threshold: f64,
    /// Scale of the LoG filter used by the LoG-threshold strategy.
    pub sigma: f64,
    /// Minimum filtered response kept by the LoG-threshold strategy.
    pub threshold: f64,
    /// Number of frames to look for the mid-body in between cells.
    pub cytokinesis_duration: u32,
    /// Tracks must be strictly longer than this to be considered.
    pub minimum_mid_body_track_length: usize,
    /// Half-width of the square used to average spot intensities.
    pub intensity_margin: u32,
    /// Channel carrying the mid-body marker.
    pub mid_body_channel: usize,
    /// Channel carrying the structural (tubulin) marker.
    pub sir_channel: usize,
}

impl Default for MidBodyConfig {
    fn default() -> Self {
        Self {
            weight_mklp_intensity_factor: 5.0,
            weight_sir_intensity_factor: 1.5,
            mid_body_linking_max_distance: 175.0,
            h_maxima_threshold: 5.0,
            sigma: 2.0,
            threshold: 1.0,
            cytokinesis_duration: CYTOKINESIS_DURATION,
            minimum_mid_body_track_length: 10,
            intensity_margin: 1,
            mid_body_channel: 1,
            sir_channel: 0,
        }
    }
}

impl MidBodyConfig {
    pub fn from_json_str(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| MidBodyError::Config(e.to_string()))
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }
}
