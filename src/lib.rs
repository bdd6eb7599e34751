// THEORY:
// This file is the main entry point for the `midbody_vision` library crate.
// It defines the public API exposed to the surrounding cell division analysis:
// the `MidBodyDetector` orchestrator, its configuration, and the data
// structures that flow between the layers (`MidBodySpot`, `MidBodyTrack`,
// `MitosisTrack`, ...).
//
// The engine is organised in three layers under `core_modules`, each consuming
// only the output of the previous one:
// 1.  **Extraction** (`frame`, `spot_detector`, `blob_detector`): one frame in,
//     candidate spots out.
// 2.  **Tracking** (`cost_matrix`, `assignment`, `linker`, `track_builder`):
//     per-frame spots in, multi-frame tracks out.
// 3.  **Selection** (`mitosis`, `track_selector`): tracks plus cell pedigree in,
//     at most one mid-body track out.
//
// `pipeline` chains the three for one mitosis event; `parallel_pipeline` runs
// the extraction layer over all frames concurrently.

pub mod config;
pub mod core_modules;
pub mod error;
pub mod parallel_pipeline;
pub mod pipeline;

pub use config::MidBodyConfig;
pub use core_modules::frame::{ChannelImage, Frame, Mask, MitosisMovie};
pub use core_modules::linker::{LinkMetric, SpotLinker, TrackingMethod};
pub use core_modules::mitosis::{BoundingBox, CellSpot, CellTrack, MitosisTrack};
pub use core_modules::spot::{MidBodySpot, SpotFrames, SpotKey};
pub use core_modules::spot_detector::{BlobCoords, BlobDetector, DetectionMethod, ScaleSpaceBackend};
pub use core_modules::track::MidBodyTrack;
pub use error::{MidBodyError, Result};
pub use pipeline::MidBodyDetector;
