// THEORY:
// The `blob_detector` module holds the one detection strategy the engine computes
// itself: a "Peak Finding and Region Labelling" pass over the mid-body marker
// channel. Every other strategy (Laplacian/Difference of Gaussian, Hessian) is a
// pluggable backend; this one is the local-maxima fallback that needs nothing but
// the image.
//
// Algorithm steps:
// 1.  **Smoothing**: a 3x3 grey opening removes bright specks smaller than the
//     structuring element, so isolated hot pixels cannot become peaks.
// 2.  **Peak Finding**: the h-maxima transform keeps only the regional maxima
//     whose height above their surroundings is at least `h`. It is computed by
//     morphological reconstruction by dilation of `image - h` under `image`.
// 3.  **Region Labelling**: the surviving maxima are grouped into 8-connected
//     regions with a breadth-first flood, like region growing from a seed.
// 4.  **Intensity Gate**: a region is dropped when its mean intensity in the raw
//     channel is below the 99th percentile of the whole channel.
// 5.  **Data Aggregation**: each region becomes one point at its centre of mass.

use crate::core_modules::frame::ChannelImage;
use crate::core_modules::spot_detector::BlobCoords;

pub mod blob_detector {
    use super::*;

    /// Quantile used for the intensity gate of local-maxima regions.
    const FILTERING_QUANTILE: f64 = 0.99;

    /// Finds mid-body candidates as h-maxima regions of the marker channel.
    pub fn find_h_maxima(image: &ChannelImage, h: f64) -> Vec<BlobCoords> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Vec::new();
        }
        let grid = Grid::from_image(image);

        let filtered = grid.erode().dilate();
        let maxima = filtered.h_maxima(h);
        let regions = label_regions(&maxima, width as usize, height as usize);

        let threshold = quantile(&grid.values, FILTERING_QUANTILE);
        regions
            .into_iter()
            .filter(|region| {
                let mean = region.iter().map(|&(x, y)| grid.get(x, y)).sum::<f64>()
                    / region.len() as f64;
                mean >= threshold
            })
            .map(|region| {
                let n = region.len() as f64;
                let cx = region.iter().map(|&(x, _)| x as f64).sum::<f64>() / n;
                let cy = region.iter().map(|&(_, y)| y as f64).sum::<f64>() / n;
                BlobCoords::Point {
                    y: cy.trunc(),
                    x: cx.trunc(),
                }
            })
            .collect()
    }

    /// Row-major f64 copy of a channel with 3x3 morphology helpers.
    #[derive(Debug, Clone, PartialEq)]
    pub(crate) struct Grid {
        pub(crate) width: usize,
        pub(crate) height: usize,
        pub(crate) values: Vec<f64>,
    }

    impl Grid {
        pub(crate) fn from_image(image: &ChannelImage) -> Self {
            let (width, height) = image.dimensions();
            Self {
                width: width as usize,
                height: height as usize,
                values: image.pixels().map(|p| p.0[0] as f64).collect(),
            }
        }

        fn get(&self, x: usize, y: usize) -> f64 {
            self.values[y * self.width + x]
        }

        /// Applies `pick` over each clipped 3x3 neighbourhood.
        fn neighbourhood(&self, pick: fn(f64, f64) -> f64) -> Self {
            let mut out = self.values.clone();
            for y in 0..self.height {
                for x in 0..self.width {
                    let mut acc = self.get(x, y);
                    for (nx, ny) in neighbours(x, y, self.width, self.height) {
                        acc = pick(acc, self.get(nx, ny));
                    }
                    out[y * self.width + x] = acc;
                }
            }
            Self {
                width: self.width,
                height: self.height,
                values: out,
            }
        }

        pub(crate) fn erode(&self) -> Self {
            self.neighbourhood(f64::min)
        }

        pub(crate) fn dilate(&self) -> Self {
            self.neighbourhood(f64::max)
        }

        /// Binary map of the maxima of height at least `h`.
        pub(crate) fn h_maxima(&self, h: f64) -> Vec<bool> {
            let (min, max) = self
                .values
                .iter()
                .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
            if h > max - min {
                return vec![false; self.values.len()];
            }
            let marker: Vec<f64> = self.values.iter().map(|v| v - h).collect();
            let reconstructed = self.reconstruct_by_dilation(marker);
            // Small tolerance absorbs rounding in `v - h` followed by `v - rec`.
            let tolerance = h.abs() * 1e-9 + 1e-12;
            self.values
                .iter()
                .zip(&reconstructed)
                .map(|(v, r)| v - r >= h - tolerance)
                .collect()
        }

        /// Geodesic reconstruction of `marker` under `self`, iterated to stability.
        fn reconstruct_by_dilation(&self, marker: Vec<f64>) -> Vec<f64> {
            let mut current = Self {
                width: self.width,
                height: self.height,
                values: marker,
            };
            loop {
                let dilated = current.dilate();
                let next: Vec<f64> = dilated
                    .values
                    .iter()
                    .zip(&self.values)
                    .map(|(d, m)| d.min(*m))
                    .collect();
                if next == current.values {
                    return next;
                }
                current.values = next;
            }
        }
    }

    /// In-bounds 8-neighbours of `(x, y)`.
    fn neighbours(x: usize, y: usize, width: usize, height: usize) -> Vec<(usize, usize)> {
        let mut out = Vec::with_capacity(8);
        for dy in -1i64..=1 {
            for dx in -1i64..=1 {
                if dx == 0 && dy == 0 {
                    continue;
                }
                let nx = x as i64 + dx;
                let ny = y as i64 + dy;
                if nx >= 0 && ny >= 0 && (nx as usize) < width && (ny as usize) < height {
                    out.push((nx as usize, ny as usize));
                }
            }
        }
        out
    }

    /// Groups set pixels into 8-connected regions, in raster order of their seeds.
    pub(crate) fn label_regions(
        binary: &[bool],
        width: usize,
        height: usize,
    ) -> Vec<Vec<(usize, usize)>> {
        let mut visited = vec![false; binary.len()];
        let mut regions = Vec::new();

        for seed in 0..binary.len() {
            if !binary[seed] || visited[seed] {
                continue;
            }
            visited[seed] = true;
            let mut queue = vec![(seed % width, seed / width)];
            let mut region = Vec::new();

            while let Some((x, y)) = queue.pop() {
                region.push((x, y));
                for (nx, ny) in neighbours(x, y, width, height) {
                    let idx = ny * width + nx;
                    if binary[idx] && !visited[idx] {
                        visited[idx] = true;
                        queue.push((nx, ny));
                    }
                }
            }
            regions.push(region);
        }
        regions
    }

    /// Linear-interpolated quantile, `q` in `[0, 1]`.
    pub(crate) fn quantile(values: &[f64], q: f64) -> f64 {
        if values.is_empty() {
            return 0.0;
        }
        let mut sorted = values.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
        let lo = pos.floor() as usize;
        let hi = pos.ceil() as usize;
        let frac = pos - lo as f64;
        sorted[lo] + (sorted[hi] - sorted[lo]) * frac
    }
}
