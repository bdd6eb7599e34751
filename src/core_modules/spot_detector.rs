// THEORY:
// The `spot_detector` module is the Spot Extractor: it turns one frame of the
// mitosis movie into the list of `MidBodySpot` candidates for that frame. The
// numerics of blob finding are not its concern. It dispatches to a strategy,
// normalises whatever shape of coordinates the strategy returns, drops
// detections outside the search mask, and measures the two intensities every
// spot carries.
//
// Key architectural principles:
// 1.  **Closed set of strategies plus an escape hatch**: `DetectionMethod` names
//     every built-in strategy and has a `Custom` variant wrapping any
//     `BlobDetector`. Strings are parsed once, up front, into this enum.
// 2.  **Pluggable numerics**: the scale-space strategies (LoG, DoG, DoH) and the
//     masked LoG-threshold strategy carry their parameters here but call an
//     installed `ScaleSpaceBackend` for the filtering itself. The local-maxima
//     strategy is computed in-crate by the `blob_detector` layer.
// 3.  **Stateless**: a `SpotDetector` holds configuration only; detecting one
//     frame never depends on another, which is what lets the parallel pipeline
//     fan frames out to worker threads.

use crate::config::MidBodyConfig;
use crate::core_modules::blob_detector::blob_detector;
use crate::core_modules::frame::{
    average_intensity, inside_mask, ChannelImage, Frame, Mask, MitosisMovie,
};
use crate::core_modules::spot::MidBodySpot;
use crate::error::{MidBodyError, Result};
use image::{ImageBuffer, Luma};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

/// Raw output of a blob detector, in (row, column) order.
///
/// Peak-based detectors report a bare position; scale-space detectors also
/// report the scale at which the blob responded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BlobCoords {
    Point { y: f64, x: f64 },
    Scaled { y: f64, x: f64, sigma: f64 },
}

impl BlobCoords {
    /// Reads a `(y, x)` or `(y, x, sigma)` row. Other lengths are rejected.
    pub fn from_row(row: &[f64]) -> Option<Self> {
        match *row {
            [y, x] => Some(Self::Point { y, x }),
            [y, x, sigma] => Some(Self::Scaled { y, x, sigma }),
            _ => None,
        }
    }

    pub fn y(&self) -> f64 {
        match *self {
            Self::Point { y, .. } | Self::Scaled { y, .. } => y,
        }
    }

    pub fn x(&self) -> f64 {
        match *self {
            Self::Point { x, .. } | Self::Scaled { x, .. } => x,
        }
    }

    pub fn sigma(&self) -> Option<f64> {
        match *self {
            Self::Point { .. } => None,
            Self::Scaled { sigma, .. } => Some(sigma),
        }
    }
}

/// Capability shared by built-in and caller-supplied detectors.
pub trait BlobDetector: Send + Sync {
    fn detect(&self, image: &ChannelImage) -> Vec<BlobCoords>;
}

impl<F> BlobDetector for F
where
    F: Fn(&ChannelImage) -> Vec<BlobCoords> + Send + Sync,
{
    fn detect(&self, image: &ChannelImage) -> Vec<BlobCoords> {
        self(image)
    }
}

/// Family of scale-space filter a preset asks the backend for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleSpaceKind {
    LaplacianOfGaussian,
    DifferenceOfGaussian,
    DeterminantOfHessian,
    /// Single-scale LoG filter, then thresholding of the positive response
    /// inside the mask.
    LogThreshold,
}

/// Parameters handed to a `ScaleSpaceBackend` call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleSpaceParams {
    pub kind: ScaleSpaceKind,
    pub min_sigma: f64,
    pub max_sigma: f64,
    /// Number of scales sampled between the bounds (LoG, DoH).
    pub num_sigma: usize,
    /// Ratio between successive scales (DoG).
    pub sigma_ratio: f64,
    pub threshold: f64,
}

/// External implementation of the LoG/DoG/DoH blob numerics.
///
/// The image given to `detect` is min-max normalised to `[0, 1]`.
pub trait ScaleSpaceBackend: Send + Sync {
    fn detect(&self, normalized: &ChannelImage, params: &ScaleSpaceParams) -> Vec<BlobCoords>;

    /// LoG-filters the raw channel at `params.min_sigma` and keeps the
    /// positive responses above `params.threshold` inside `mask`. Returns
    /// nothing when no positive response lies inside the mask.
    fn detect_thresholded(
        &self,
        image: &ChannelImage,
        mask: Option<&Mask>,
        params: &ScaleSpaceParams,
    ) -> Vec<BlobCoords>;
}

/// Named scale-space strategies and their parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleSpacePreset {
    CurLog,
    LapGau,
    Log2Wider,
    ShiftedCenteredLog,
    CurDog,
    DiffGau,
    CurDoh,
    Hessian,
}

impl ScaleSpacePreset {
    pub const ALL: [ScaleSpacePreset; 8] = [
        Self::CurLog,
        Self::LapGau,
        Self::Log2Wider,
        Self::ShiftedCenteredLog,
        Self::CurDog,
        Self::DiffGau,
        Self::CurDoh,
        Self::Hessian,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::CurLog => "cur_log",
            Self::LapGau => "lapgau",
            Self::Log2Wider => "log2_wider",
            Self::ShiftedCenteredLog => "shifted_centered_log",
            Self::CurDog => "cur_dog",
            Self::DiffGau => "diffgau",
            Self::CurDoh => "cur_doh",
            Self::Hessian => "hessian",
        }
    }

    pub fn params(&self) -> ScaleSpaceParams {
        use ScaleSpaceKind::*;
        let (kind, min_sigma, max_sigma, num_sigma, sigma_ratio, threshold) = match self {
            Self::CurLog | Self::LapGau => (LaplacianOfGaussian, 5.0, 10.0, 5, 1.6, 0.1),
            Self::Log2Wider => (LaplacianOfGaussian, 2.0, 8.0, 4, 1.6, 0.1),
            Self::ShiftedCenteredLog => (LaplacianOfGaussian, 3.0, 11.0, 5, 1.6, 0.1),
            Self::CurDog | Self::DiffGau => (DifferenceOfGaussian, 2.0, 5.0, 0, 1.2, 0.1),
            Self::CurDoh | Self::Hessian => (DeterminantOfHessian, 5.0, 10.0, 5, 1.6, 0.004),
        };
        ScaleSpaceParams {
            kind,
            min_sigma,
            max_sigma,
            num_sigma,
            sigma_ratio,
            threshold,
        }
    }
}

/// Which strategy the extractor runs on the mid-body channel.
#[derive(Clone)]
pub enum DetectionMethod {
    ScaleSpace(ScaleSpacePreset),
    /// Morphological local maxima (`h_maxima`), computed in-crate.
    HMaxima,
    /// Masked LoG filter plus spot thresholding (`bigfish`).
    LogThreshold,
    Custom(Arc<dyn BlobDetector>),
}

impl DetectionMethod {
    pub fn custom(detector: impl BlobDetector + 'static) -> Self {
        Self::Custom(Arc::new(detector))
    }

    pub fn name(&self) -> &str {
        match self {
            Self::ScaleSpace(preset) => preset.name(),
            Self::HMaxima => "h_maxima",
            Self::LogThreshold => "bigfish",
            Self::Custom(_) => "custom",
        }
    }
}

impl Default for DetectionMethod {
    fn default() -> Self {
        Self::ScaleSpace(ScaleSpacePreset::LapGau)
    }
}

impl fmt::Debug for DetectionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DetectionMethod({})", self.name())
    }
}

impl FromStr for DetectionMethod {
    type Err = MidBodyError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "h_maxima" => return Ok(Self::HMaxima),
            "bigfish" => return Ok(Self::LogThreshold),
            _ => {}
        }
        ScaleSpacePreset::ALL
            .iter()
            .find(|preset| preset.name() == s)
            .map(|preset| Self::ScaleSpace(*preset))
            .ok_or_else(|| MidBodyError::UnknownStrategy(s.to_string()))
    }
}

/// Extracts mid-body spot candidates from frames.
#[derive(Clone)]
pub struct SpotDetector {
    mid_body_channel: usize,
    sir_channel: usize,
    intensity_margin: u32,
    h_maxima_threshold: f64,
    log_sigma: f64,
    log_threshold: f64,
    backend: Option<Arc<dyn ScaleSpaceBackend>>,
}

impl SpotDetector {
    pub fn new(config: &MidBodyConfig) -> Self {
        Self {
            mid_body_channel: config.mid_body_channel,
            sir_channel: config.sir_channel,
            intensity_margin: config.intensity_margin,
            h_maxima_threshold: config.h_maxima_threshold,
            log_sigma: config.sigma,
            log_threshold: config.threshold,
            backend: None,
        }
    }

    /// Installs the numerics used by the scale-space strategies.
    pub fn with_backend(mut self, backend: Arc<dyn ScaleSpaceBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Detects the spots of one frame. `frame_index` is stamped on every spot.
    pub fn detect_frame(
        &self,
        frame: &Frame,
        mask: Option<&Mask>,
        frame_index: u32,
        method: &DetectionMethod,
    ) -> Result<Vec<MidBodySpot>> {
        let image_mklp = frame.channel(self.mid_body_channel)?;
        let image_sir = frame.channel(self.sir_channel)?;
        if let Some(mask) = mask {
            if mask.dimensions() != image_mklp.dimensions() {
                return Err(MidBodyError::DimensionMismatch(format!(
                    "mask {:?} vs frame {:?}",
                    mask.dimensions(),
                    image_mklp.dimensions()
                )));
            }
        }

        let blobs = match method {
            DetectionMethod::HMaxima => {
                blob_detector::find_h_maxima(image_mklp, self.h_maxima_threshold)
            }
            DetectionMethod::ScaleSpace(preset) => {
                let backend = self.backend(method)?;
                backend.detect(&min_max_normalize(image_mklp), &preset.params())
            }
            DetectionMethod::LogThreshold => {
                let params = ScaleSpaceParams {
                    kind: ScaleSpaceKind::LogThreshold,
                    min_sigma: self.log_sigma,
                    max_sigma: self.log_sigma,
                    num_sigma: 1,
                    sigma_ratio: 1.0,
                    threshold: self.log_threshold,
                };
                self.backend(method)?.detect_thresholded(image_mklp, mask, &params)
            }
            DetectionMethod::Custom(detector) => detector.detect(image_mklp),
        };

        let (width, height) = image_mklp.dimensions();
        let spots: Vec<MidBodySpot> = blobs
            .into_iter()
            .filter_map(|blob| {
                debug!(
                    frame = frame_index,
                    x = blob.x(),
                    y = blob.y(),
                    sigma = ?blob.sigma(),
                    "found blob"
                );
                let (x, y) = (blob.x().trunc(), blob.y().trunc());
                if !x.is_finite() || !y.is_finite() {
                    return None;
                }
                if x < 0.0 || y < 0.0 || x >= width as f64 || y >= height as f64 {
                    return None;
                }
                let (x, y) = (x as u32, y as u32);
                if !inside_mask(mask, x, y) {
                    return None;
                }
                Some(MidBodySpot::new(
                    frame_index,
                    x,
                    y,
                    average_intensity(image_mklp, x, y, self.intensity_margin),
                    average_intensity(image_sir, x, y, self.intensity_margin),
                ))
            })
            .collect();

        debug!(
            frame = frame_index,
            method = method.name(),
            count = spots.len(),
            "spot detection"
        );
        Ok(spots)
    }

    fn backend(&self, method: &DetectionMethod) -> Result<&Arc<dyn ScaleSpaceBackend>> {
        self.backend
            .as_ref()
            .ok_or_else(|| MidBodyError::DetectorUnavailable(method.name().to_string()))
    }

    /// Detects spots in every frame of the movie. Frames without detections map
    /// to an empty list.
    pub fn detect_movie(
        &self,
        movie: &MitosisMovie,
        masks: Option<&[Mask]>,
        method: &DetectionMethod,
    ) -> Result<BTreeMap<u32, Vec<MidBodySpot>>> {
        check_mask_count(movie, masks)?;
        let mut spots_dictionary = BTreeMap::new();
        for (index, frame) in movie.frames.iter().enumerate() {
            let mask = masks.map(|m| &m[index]);
            let spots = self.detect_frame(frame, mask, index as u32, method)?;
            spots_dictionary.insert(index as u32, spots);
        }
        Ok(spots_dictionary)
    }
}

pub(crate) fn check_mask_count(movie: &MitosisMovie, masks: Option<&[Mask]>) -> Result<()> {
    match masks {
        Some(masks) if masks.len() != movie.len() => Err(MidBodyError::DimensionMismatch(format!(
            "{} masks for {} frames",
            masks.len(),
            movie.len()
        ))),
        _ => Ok(()),
    }
}

/// Rescales a channel to `[0, 1]`; a constant channel maps to zeros.
pub fn min_max_normalize(image: &ChannelImage) -> ChannelImage {
    let (min, max) = image.pixels().fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), p| {
        (lo.min(p.0[0]), hi.max(p.0[0]))
    });
    let range = max - min;
    let (width, height) = image.dimensions();
    ImageBuffer::from_fn(width, height, |x, y| {
        let v = image.get_pixel(x, y).0[0];
        Luma([if range > 0.0 { (v - min) / range } else { 0.0 }])
    })
}
