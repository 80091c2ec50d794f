//! Shared image geometry and color helpers.

use crate::error::{AoiError, AppResult};
use crate::roi::Rect;
use image::imageops::{self, FilterType};
use image::RgbImage;
use std::path::Path;

/// Crops a frame by ROI coordinates. Coordinates are clamped to the frame;
/// a rectangle entirely outside the frame is an error.
pub fn crop(frame: &RgbImage, rect: Rect) -> AppResult<RgbImage> {
    let x1 = rect.x1.min(frame.width());
    let y1 = rect.y1.min(frame.height());
    let x2 = rect.x2.min(frame.width());
    let y2 = rect.y2.min(frame.height());
    if x2 <= x1 || y2 <= y1 {
        return Err(AoiError::RoiTaskFailed(format!(
            "coords [{},{},{},{}] fall outside the {}x{} frame",
            rect.x1,
            rect.y1,
            rect.x2,
            rect.y2,
            frame.width(),
            frame.height()
        )));
    }
    Ok(imageops::crop_imm(frame, x1, y1, x2 - x1, y2 - y1).to_image())
}

/// Rotates a crop by the configured angle. Angles are applied in 90-degree
/// steps; anything else snaps to the nearest step with a warning.
pub fn rotate(image: &RgbImage, degrees: i32) -> RgbImage {
    let normalized = degrees.rem_euclid(360);
    let steps = ((normalized + 45) / 90) % 4;
    if normalized % 90 != 0 {
        tracing::warn!(degrees, snapped = steps * 90, "rotation snapped to 90-degree step");
    }
    match steps {
        1 => imageops::rotate90(image),
        2 => imageops::rotate180(image),
        3 => imageops::rotate270(image),
        _ => image.clone(),
    }
}

/// Resizes a candidate to the capture's dimensions before comparison.
pub fn resize_to_match(image: &RgbImage, width: u32, height: u32) -> RgbImage {
    if image.width() == width && image.height() == height {
        return image.clone();
    }
    imageops::resize(image, width, height, FilterType::Triangle)
}

/// Saves a crop as JPEG, creating parent directories as needed.
pub fn save_jpeg(image: &RgbImage, path: &Path) -> AppResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    image.save(path)?;
    Ok(())
}

/// Converts one RGB pixel to HSV with H in [0,360) and S/V in [0,255].
pub fn rgb_to_hsv(rgb: [u8; 3]) -> [f32; 3] {
    let r = f32::from(rgb[0]) / 255.0;
    let g = f32::from(rgb[1]) / 255.0;
    let b = f32::from(rgb[2]) / 255.0;
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let hue = if delta == 0.0 {
        0.0
    } else if max == r {
        60.0 * (((g - b) / delta).rem_euclid(6.0))
    } else if max == g {
        60.0 * ((b - r) / delta + 2.0)
    } else {
        60.0 * ((r - g) / delta + 4.0)
    };
    let saturation = if max == 0.0 { 0.0 } else { delta / max };

    [hue, saturation * 255.0, max * 255.0]
}
