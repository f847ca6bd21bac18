//! Structural similarity (SSIM) between two images.
//!
//! Both images are resized to a fixed canvas and reduced to luminance before
//! comparison, so inputs of different resolution or aspect ratio are
//! comparable. Local statistics come from summed-area tables, which keeps the
//! windowed variant linear in the number of pixels regardless of window size.

use image::{imageops::FilterType, DynamicImage, GrayImage};

use crate::settings::{SimilarityMode, WatchSettings};

/// Peak value of an 8-bit channel.
const DYNAMIC_RANGE: f64 = 255.0;
const K1: f64 = 0.01;
const K2: f64 = 0.03;
/// (K1 * L)^2 = 6.5025
const C1: f64 = (K1 * DYNAMIC_RANGE) * (K1 * DYNAMIC_RANGE);
/// (K2 * L)^2 = 58.5225
const C2: f64 = (K2 * DYNAMIC_RANGE) * (K2 * DYNAMIC_RANGE);

/// Luminance canvas ready for comparison.
#[derive(Debug, Clone)]
pub struct PreparedImage {
    width: u32,
    height: u32,
    luma: Vec<f64>,
}

impl PreparedImage {
    pub fn from_luma(image: &GrayImage) -> Self {
        Self {
            width: image.width(),
            height: image.height(),
            luma: image.pixels().map(|p| f64::from(p.0[0])).collect(),
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Scores how alike two images are. 1.0 means identical.
///
/// `prepare` is split from `compare` so a fixed reference image only pays the
/// resize/convert cost once.
pub trait SimilarityScorer: Send + Sync {
    fn prepare(&self, image: &DynamicImage) -> PreparedImage;

    fn compare(&self, reference: &PreparedImage, candidate: &PreparedImage) -> f64;

    fn score(&self, a: &DynamicImage, b: &DynamicImage) -> f64 {
        self.compare(&self.prepare(a), &self.prepare(b))
    }
}

#[derive(Debug, Clone)]
pub struct Ssim {
    canvas_width: u32,
    canvas_height: u32,
    mode: SimilarityMode,
    window: u32,
}

impl Default for Ssim {
    fn default() -> Self {
        Self::from_settings(&WatchSettings::default())
    }
}

impl Ssim {
    pub fn new(canvas_width: u32, canvas_height: u32, mode: SimilarityMode, window: u32) -> Self {
        Self {
            canvas_width: canvas_width.max(1),
            canvas_height: canvas_height.max(1),
            mode,
            window: window.max(1),
        }
    }

    pub fn from_settings(settings: &WatchSettings) -> Self {
        Self::new(
            settings.canvas_width,
            settings.canvas_height,
            settings.similarity_mode,
            settings.window_size,
        )
    }

    /// Window edge actually used; a window larger than the canvas degrades to
    /// a single global window.
    fn effective_window(&self, width: u32, height: u32) -> Option<u32> {
        match self.mode {
            SimilarityMode::Global => None,
            SimilarityMode::Windowed if self.window > width || self.window > height => None,
            SimilarityMode::Windowed => Some(self.window),
        }
    }
}

impl SimilarityScorer for Ssim {
    fn prepare(&self, image: &DynamicImage) -> PreparedImage {
        let resized = image
            .resize_exact(self.canvas_width, self.canvas_height, FilterType::Triangle)
            .to_luma8();
        PreparedImage::from_luma(&resized)
    }

    fn compare(&self, reference: &PreparedImage, candidate: &PreparedImage) -> f64 {
        if reference.dimensions() != candidate.dimensions() || reference.luma.is_empty() {
            return 0.0;
        }
        let (width, height) = reference.dimensions();
        let tables = MomentTables::build(&reference.luma, &candidate.luma, width, height);

        let score = match self.effective_window(width, height) {
            None => tables.window_ssim(0, 0, width, height),
            Some(window) => {
                let mut total = 0.0;
                let mut count = 0u64;
                for y in 0..=(height - window) {
                    for x in 0..=(width - window) {
                        total += tables.window_ssim(x, y, window, window);
                        count += 1;
                    }
                }
                total / count as f64
            }
        };

        score.clamp(0.0, 1.0)
    }
}

/// Summed-area tables of x, y, x², y² and xy, each (w+1)×(h+1) with a zero
/// first row and column.
struct MomentTables {
    stride: usize,
    x: Vec<f64>,
    y: Vec<f64>,
    xx: Vec<f64>,
    yy: Vec<f64>,
    xy: Vec<f64>,
}

impl MomentTables {
    fn build(a: &[f64], b: &[f64], width: u32, height: u32) -> Self {
        let (w, h) = (width as usize, height as usize);
        let stride = w + 1;
        let size = stride * (h + 1);
        let mut tables = Self {
            stride,
            x: vec![0.0; size],
            y: vec![0.0; size],
            xx: vec![0.0; size],
            yy: vec![0.0; size],
            xy: vec![0.0; size],
        };

        for row in 0..h {
            let mut run = [0.0f64; 5];
            for col in 0..w {
                let va = a[row * w + col];
                let vb = b[row * w + col];
                run[0] += va;
                run[1] += vb;
                run[2] += va * va;
                run[3] += vb * vb;
                run[4] += va * vb;

                let above = row * stride + col + 1;
                let here = (row + 1) * stride + col + 1;
                tables.x[here] = tables.x[above] + run[0];
                tables.y[here] = tables.y[above] + run[1];
                tables.xx[here] = tables.xx[above] + run[2];
                tables.yy[here] = tables.yy[above] + run[3];
                tables.xy[here] = tables.xy[above] + run[4];
            }
        }
        tables
    }

    fn rect_sum(&self, table: &[f64], x: u32, y: u32, w: u32, h: u32) -> f64 {
        let (x0, y0) = (x as usize, y as usize);
        let (x1, y1) = (x0 + w as usize, y0 + h as usize);
        table[y1 * self.stride + x1] - table[y0 * self.stride + x1] - table[y1 * self.stride + x0]
            + table[y0 * self.stride + x0]
    }

    fn window_ssim(&self, x: u32, y: u32, w: u32, h: u32) -> f64 {
        let n = f64::from(w) * f64::from(h);
        let sum_x = self.rect_sum(&self.x, x, y, w, h);
        let sum_y = self.rect_sum(&self.y, x, y, w, h);
        let mean_x = sum_x / n;
        let mean_y = sum_y / n;

        // Sample (n - 1) normalisation; a single-pixel window has no spread.
        let denom = (n - 1.0).max(1.0);
        let var_x = ((self.rect_sum(&self.xx, x, y, w, h) - sum_x * mean_x) / denom).max(0.0);
        let var_y = ((self.rect_sum(&self.yy, x, y, w, h) - sum_y * mean_y) / denom).max(0.0);
        let cov = (self.rect_sum(&self.xy, x, y, w, h) - sum_x * mean_y) / denom;

        let luminance = (2.0 * mean_x * mean_y + C1) / (mean_x * mean_x + mean_y * mean_y + C1);
        let contrast_structure = (2.0 * cov + C2) / (var_x + var_y + C2);
        luminance * contrast_structure
    }
}
