// THEORY:
// The `frame` module is the bridge between raw microscopy data and the analysis
// layers. A `Frame` is one time point of a multi-channel movie, held as a list of
// single-channel planes (one `image::ImageBuffer` per fluorescence channel) so
// that any layer can pick the plane it needs without copying. A `Mask` restricts
// where detections are accepted; the segmentation collaborator produces them.
//
// Key architectural principles:
// 1.  **Read-only data**: frames are never mutated once built. This is what
//     makes per-frame extraction safe to run on many threads at once.
// 2.  **Local pooling**: the only numeric operation owned here is the clipped
//     square average around a pixel, the same "average a block to cancel
//     single-pixel noise" idea used by chunks in the temporal layer.

use crate::error::{MidBodyError, Result};
use image::{GrayImage, ImageBuffer, Luma};

/// A single fluorescence channel of a frame.
pub type ChannelImage = ImageBuffer<Luma<f32>, Vec<f32>>;

/// A binary search-region mask; non-zero pixels are inside.
pub type Mask = GrayImage;

/// One time point of a multi-channel movie (YXC in array terms).
#[derive(Debug, Clone)]
pub struct Frame {
    channels: Vec<ChannelImage>,
}

impl Frame {
    /// Builds a frame from planes that must all share the same dimensions.
    pub fn new(channels: Vec<ChannelImage>) -> Result<Self> {
        if let Some(first) = channels.first() {
            let dims = first.dimensions();
            if let Some(bad) = channels.iter().find(|c| c.dimensions() != dims) {
                return Err(MidBodyError::DimensionMismatch(format!(
                    "channel of {:?} does not match {:?}",
                    bad.dimensions(),
                    dims
                )));
            }
        }
        Ok(Self { channels })
    }

    /// Builds a frame from raw row-major planes.
    pub fn from_planes(width: u32, height: u32, planes: Vec<Vec<f32>>) -> Result<Self> {
        let channels = planes
            .into_iter()
            .map(|plane| {
                let len = plane.len();
                ImageBuffer::from_raw(width, height, plane).ok_or_else(|| {
                    MidBodyError::DimensionMismatch(format!(
                        "plane of {len} values cannot be {width}x{height}"
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(channels)
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.channels.first().map(|c| c.dimensions()).unwrap_or((0, 0))
    }

    pub fn channel(&self, index: usize) -> Result<&ChannelImage> {
        self.channels
            .get(index)
            .ok_or(MidBodyError::ChannelOutOfRange {
                channel: index,
                channels: self.channels.len(),
            })
    }
}

/// A cropped mitosis movie: frames are indexed relative to the mitosis start.
#[derive(Debug, Clone, Default)]
pub struct MitosisMovie {
    pub frames: Vec<Frame>,
}

impl MitosisMovie {
    pub fn new(frames: Vec<Frame>) -> Self {
        Self { frames }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn frame(&self, index: u32) -> Option<&Frame> {
        self.frames.get(index as usize)
    }
}

/// Mean value of the square `[x - margin, x + margin] x [y - margin, y + margin]`,
/// clipped to the image bounds.
pub fn average_intensity(image: &ChannelImage, x: u32, y: u32, margin: u32) -> f64 {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return 0.0;
    }
    let x0 = x.saturating_sub(margin).min(width - 1);
    let y0 = y.saturating_sub(margin).min(height - 1);
    let x1 = x.saturating_add(margin).min(width - 1);
    let y1 = y.saturating_add(margin).min(height - 1);

    let mut sum = 0.0;
    let mut count = 0usize;
    for py in y0..=y1 {
        for px in x0..=x1 {
            sum += image.get_pixel(px, py).0[0] as f64;
            count += 1;
        }
    }
    sum / count as f64
}

/// `true` when the mask is absent or the pixel lies inside it.
pub fn inside_mask(mask: Option<&Mask>, x: u32, y: u32) -> bool {
    match mask {
        None => true,
        Some(mask) => mask
            .get_pixel_checked(x, y)
            .map(|p| p.0[0] > 0)
            .unwrap_or(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn ramp(width: u32, height: u32) -> ChannelImage {
        ImageBuffer::from_fn(width, height, |x, y| Luma([(y * width + x) as f32]))
    }

    #[test]
    fn average_in_interior_uses_full_square() {
        let img = ramp(5, 5);
        // 3x3 block centred on (2, 2): mean of a symmetric ramp is the centre.
        assert_abs_diff_eq!(average_intensity(&img, 2, 2, 1), 12.0);
    }

    #[test]
    fn average_is_clipped_at_corner() {
        let img = ramp(4, 4);
        // Only (0,0), (1,0), (0,1), (1,1) remain: 0, 1, 4, 5.
        assert_abs_diff_eq!(average_intensity(&img, 0, 0, 1), 2.5);
    }

    #[test]
    fn zero_margin_reads_single_pixel() {
        let img = ramp(4, 4);
        assert_abs_diff_eq!(average_intensity(&img, 3, 2, 0), 11.0);
    }

    #[test]
    fn mismatched_planes_are_rejected() {
        let err = Frame::new(vec![ramp(4, 4), ramp(5, 4)]).unwrap_err();
        assert!(matches!(err, MidBodyError::DimensionMismatch(_)));
        let err = Frame::from_planes(2, 2, vec![vec![0.0; 3]]).unwrap_err();
        assert!(matches!(err, MidBodyError::DimensionMismatch(_)));
    }

    #[test]
    fn missing_channel_is_reported() {
        let frame = Frame::new(vec![ramp(2, 2)]).expect("frame");
        let err = frame.channel(1).unwrap_err();
        assert!(matches!(
            err,
            MidBodyError::ChannelOutOfRange { channel: 1, channels: 1 }
        ));
    }

    #[test]
    fn absent_mask_accepts_everything() {
        assert!(inside_mask(None, 100, 100));
        let mut mask = Mask::new(2, 2);
        mask.put_pixel(1, 0, Luma([1]));
        assert!(inside_mask(Some(&mask), 1, 0));
        assert!(!inside_mask(Some(&mask), 0, 0));
        assert!(!inside_mask(Some(&mask), 5, 5));
    }
}
