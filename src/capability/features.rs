//! Built-in feature extractors.
//!
//! Two extractors ship with the server:
//!
//! - `"opencv"`: downsampled grayscale intensities. Cheap, dimension-stable,
//!   good at catching gross geometric differences.
//! - `"mobilenet"`: a joint RGB histogram standing in for the neural
//!   embedding backend. When a real inference backend is linked it registers
//!   itself under the same key through [`Capabilities::with_extractor`].
//!
//! Both are process-wide singletons, initialized lazily at first use.
//!
//! [`Capabilities::with_extractor`]: super::Capabilities::with_extractor

use super::FeatureExtractor;
use anyhow::Result;
use image::imageops::{self, FilterType};
use image::RgbImage;
use once_cell::sync::Lazy;
use std::sync::Arc;

/// Side length the pixel extractor normalizes inputs to.
const PIXEL_GRID: u32 = 32;

/// Histogram bins per channel (8^3 = 512-dimensional joint histogram).
const HIST_BINS: u32 = 8;

static PIXEL: Lazy<Arc<PixelFeatureExtractor>> =
    Lazy::new(|| Arc::new(PixelFeatureExtractor));

static HISTOGRAM: Lazy<Arc<HistogramFeatureExtractor>> = Lazy::new(|| {
    tracing::warn!(
        "neural feature backend not linked; 'mobilenet' comparisons use color-histogram features"
    );
    Arc::new(HistogramFeatureExtractor)
});

/// Shared instance of the grayscale pixel extractor.
pub fn pixel_extractor() -> Arc<dyn FeatureExtractor> {
    PIXEL.clone() as Arc<dyn FeatureExtractor>
}

/// Shared instance of the histogram extractor.
pub fn histogram_extractor() -> Arc<dyn FeatureExtractor> {
    HISTOGRAM.clone() as Arc<dyn FeatureExtractor>
}

/// Downsampled grayscale intensity features.
pub struct PixelFeatureExtractor;

impl FeatureExtractor for PixelFeatureExtractor {
    fn name(&self) -> &str {
        "opencv"
    }

    fn extract(&self, image: &RgbImage) -> Result<Vec<f32>> {
        let resized = imageops::resize(image, PIXEL_GRID, PIXEL_GRID, FilterType::Triangle);
        let gray = imageops::grayscale(&resized);
        Ok(gray.pixels().map(|p| f32::from(p.0[0]) / 255.0).collect())
    }
}

/// Joint RGB histogram features.
pub struct HistogramFeatureExtractor;

impl FeatureExtractor for HistogramFeatureExtractor {
    fn name(&self) -> &str {
        "mobilenet"
    }

    fn extract(&self, image: &RgbImage) -> Result<Vec<f32>> {
        let mut bins = vec![0f32; (HIST_BINS * HIST_BINS * HIST_BINS) as usize];
        let bucket = 256 / HIST_BINS;
        for pixel in image.pixels() {
            let r = u32::from(pixel.0[0]) / bucket;
            let g = u32::from(pixel.0[1]) / bucket;
            let b = u32::from(pixel.0[2]) / bucket;
            let index = (r * HIST_BINS + g) * HIST_BINS + b;
            bins[index as usize] += 1.0;
        }
        let total = image.width() as f32 * image.height() as f32;
        if total > 0.0 {
            for bin in &mut bins {
                *bin /= total;
            }
        }
        Ok(bins)
    }
}
