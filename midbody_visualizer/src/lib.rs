//! Overlays of mid-body spot candidates on the marker channel.
//!
//! Colours are handed out per track by a [`TrackColorManager`] that the caller
//! owns and threads through every rendering call, so a whole movie keeps one
//! colour per track without any process-wide state.

use anyhow::Context;
use image::{Rgb, RgbImage};
use midbody_vision::{ChannelImage, MidBodySpot, MitosisMovie, SpotFrames};
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

/// The ten-colour qualitative palette used for tracks.
pub const TAB10: [Rgb<u8>; 10] = [
    Rgb([31, 119, 180]),
    Rgb([255, 127, 14]),
    Rgb([44, 160, 44]),
    Rgb([214, 39, 40]),
    Rgb([148, 103, 189]),
    Rgb([140, 86, 75]),
    Rgb([227, 119, 194]),
    Rgb([127, 127, 127]),
    Rgb([188, 189, 34]),
    Rgb([23, 190, 207]),
];

/// Colour of spots that belong to no track.
pub const UNTRACKED: Rgb<u8> = Rgb([0, 0, 0]);

/// Radius in pixels of the disc drawn for each spot.
const SPOT_RADIUS: i64 = 2;

/// Assigns palette colours to track ids in order of first request.
///
/// The palette wraps around once every colour has been used.
#[derive(Debug, Clone, Default)]
pub struct TrackColorManager {
    index: usize,
    id_to_color: HashMap<u32, Rgb<u8>>,
}

impl TrackColorManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn color_for_track(&mut self, track_id: u32) -> Rgb<u8> {
        if let Some(color) = self.id_to_color.get(&track_id) {
            return *color;
        }
        let color = TAB10[self.index];
        self.id_to_color.insert(track_id, color);
        self.index = (self.index + 1) % TAB10.len();
        color
    }

    pub fn color_for_spot(&mut self, spot: &MidBodySpot) -> Rgb<u8> {
        match spot.track_id {
            Some(id) => self.color_for_track(id),
            None => UNTRACKED,
        }
    }
}

/// Contrast-stretched grey rendering of `channel` with every spot filled in
/// its track colour.
pub fn render_spot_overlay(
    channel: &ChannelImage,
    spots: &[MidBodySpot],
    colors: &mut TrackColorManager,
) -> RgbImage {
    let (width, height) = channel.dimensions();
    let (min, max) = channel
        .pixels()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), p| (lo.min(p.0[0]), hi.max(p.0[0])));
    let range = max - min;

    let mut out = RgbImage::from_fn(width, height, |x, y| {
        let value = channel.get_pixel(x, y).0[0];
        let grey = if range > 0.0 {
            ((value - min) / range * 255.0).round() as u8
        } else {
            0
        };
        Rgb([grey, grey, grey])
    });

    for spot in spots {
        let color = colors.color_for_spot(spot);
        fill_disc(&mut out, spot.x as i64, spot.y as i64, color);
    }
    out
}

fn fill_disc(image: &mut RgbImage, cx: i64, cy: i64, color: Rgb<u8>) {
    let (width, height) = (image.width() as i64, image.height() as i64);
    for dy in -SPOT_RADIUS..=SPOT_RADIUS {
        for dx in -SPOT_RADIUS..=SPOT_RADIUS {
            if dx * dx + dy * dy > SPOT_RADIUS * SPOT_RADIUS {
                continue;
            }
            let (x, y) = (cx + dx, cy + dy);
            if x >= 0 && y >= 0 && x < width && y < height {
                image.put_pixel(x as u32, y as u32, color);
            }
        }
    }
}

/// Writes `spot_detection_{frame}.png` for every frame of the movie into
/// `output_dir`, creating it if needed. Returns the number of files written.
pub fn save_overlay_sequence(
    movie: &MitosisMovie,
    spots: &SpotFrames,
    mid_body_channel: usize,
    output_dir: impl AsRef<Path>,
) -> anyhow::Result<usize> {
    let output_dir = output_dir.as_ref();
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("creating {}", output_dir.display()))?;

    let mut colors = TrackColorManager::new();
    let no_spots: Vec<MidBodySpot> = Vec::new();
    for (index, frame) in movie.frames.iter().enumerate() {
        let channel = frame.channel(mid_body_channel)?;
        let frame_spots = spots.get(&(index as u32)).unwrap_or(&no_spots);
        let overlay = render_spot_overlay(channel, frame_spots, &mut colors);
        let path = output_dir.join(format!("spot_detection_{index}.png"));
        overlay
            .save(&path)
            .with_context(|| format!("writing {}", path.display()))?;
        debug!(frame = index, spots = frame_spots.len(), "overlay saved");
    }
    Ok(movie.len())
}
