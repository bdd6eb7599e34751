use thiserror::Error;

/// Top-level error type for the mid-body engine.
///
/// Data sparsity (no viable track, frames without detections) is never an
/// error; only configuration mistakes and malformed inputs end up here.
#[derive(Debug, Error)]
pub enum MidBodyError {
    #[error("unknown spot detection strategy: {0}")]
    UnknownStrategy(String),

    #[error("invalid tracking method '{0}'")]
    InvalidTrackingMethod(String),

    #[error("detection strategy '{0}' needs a scale-space backend, none installed")]
    DetectorUnavailable(String),

    #[error("channel {channel} requested but frame only has {channels} channel(s)")]
    ChannelOutOfRange { channel: usize, channels: usize },

    #[error("dimension mismatch: {0}")]
    DimensionMismatch(String),

    #[error("mitosis {mitosis_id}: cell track {track_id} not found")]
    MissingPedigree { mitosis_id: u32, track_id: u32 },

    #[error("mitosis {mitosis_id}: key event '{event}' not recorded")]
    MissingKeyEvent { mitosis_id: u32, event: String },

    #[error("extraction worker failed: {0}")]
    Worker(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, MidBodyError>;
