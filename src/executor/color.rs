//! Color ROI executor.
//!
//! Two configuration variants:
//!
//! - **Simple**: a target color, a per-channel tolerance (clamped to
//!   [0,255]) and a minimum matching-pixel percentage.
//! - **Ranges**: enumerated named ranges, each in RGB or HSV with its own
//!   threshold. Raw per-range percentages are summed per name; the name with
//!   the highest raw sum wins, the reported percentage is capped at 100
//!   after selection, and the winner's threshold decides the verdict.

use super::RoiPayload;
use crate::error::{AoiError, AppResult};
use crate::imaging::ops;
use crate::roi::{ColorConfig, ColorRange, ColorSpace, Roi};
use image::RgbImage;

pub fn run(roi: &Roi, crop: &RgbImage) -> AppResult<(bool, RoiPayload)> {
    let config = roi.color_config.as_ref().ok_or_else(|| {
        AoiError::RoiTaskFailed("Color ROI without color configuration".to_string())
    })?;
    match config {
        ColorConfig::Simple {
            expected_color,
            color_tolerance,
            min_pixel_percentage,
        } => Ok(match_simple(
            crop,
            *expected_color,
            *color_tolerance,
            *min_pixel_percentage,
        )),
        ColorConfig::Ranges { color_ranges } => match_ranges(crop, color_ranges),
    }
}

fn match_simple(
    crop: &RgbImage,
    expected: [u8; 3],
    tolerance: u32,
    min_pixel_percentage: f64,
) -> (bool, RoiPayload) {
    // Per-channel inclusive range, clamped to the byte domain; an oversized
    // tolerance degenerates to "any value".
    let bounds: Vec<(u8, u8)> = expected
        .iter()
        .map(|&channel| {
            let lo = i64::from(channel) - i64::from(tolerance);
            let hi = i64::from(channel) + i64::from(tolerance);
            (lo.clamp(0, 255) as u8, hi.clamp(0, 255) as u8)
        })
        .collect();

    let total = u64::from(crop.width()) * u64::from(crop.height());
    let mut matching = 0u64;
    let mut match_sum = [0u64; 3];
    let mut overall_sum = [0u64; 3];
    for pixel in crop.pixels() {
        for c in 0..3 {
            overall_sum[c] += u64::from(pixel.0[c]);
        }
        let inside = (0..3).all(|c| pixel.0[c] >= bounds[c].0 && pixel.0[c] <= bounds[c].1);
        if inside {
            matching += 1;
            for c in 0..3 {
                match_sum[c] += u64::from(pixel.0[c]);
            }
        }
    }

    let match_percentage = if total == 0 {
        0.0
    } else {
        100.0 * matching as f64 / total as f64
    };
    let dominant_color = if matching > 0 {
        mean_color(match_sum, matching)
    } else {
        mean_color(overall_sum, total.max(1))
    };

    let passed = match_percentage >= min_pixel_percentage;
    let payload = RoiPayload::Color {
        detected_color: "target".to_string(),
        dominant_color,
        match_percentage,
        match_percentage_raw: None,
    };
    (passed, payload)
}

fn match_ranges(crop: &RgbImage, ranges: &[ColorRange]) -> AppResult<(bool, RoiPayload)> {
    if ranges.is_empty() {
        return Err(AoiError::RoiTaskFailed(
            "Color ROI with empty color_ranges".to_string(),
        ));
    }
    let total = u64::from(crop.width()) * u64::from(crop.height());
    if total == 0 {
        return Err(AoiError::RoiTaskFailed("empty crop".to_string()));
    }

    // Per-name aggregation: raw percentages sum per name, in first-seen
    // order; the threshold of a name is the first range bearing it.
    let mut names: Vec<String> = Vec::new();
    let mut sums: Vec<f64> = Vec::new();
    let mut thresholds: Vec<f64> = Vec::new();
    let mut matched_any = vec![false; total as usize];

    for range in ranges {
        let mut count = 0u64;
        for (i, pixel) in crop.pixels().enumerate() {
            if pixel_in_range(pixel.0, range) {
                count += 1;
                matched_any[i] = true;
            }
        }
        let raw = 100.0 * count as f64 / total as f64;
        match names.iter().position(|n| n == &range.name) {
            Some(slot) => sums[slot] += raw,
            None => {
                names.push(range.name.clone());
                sums.push(raw);
                thresholds.push(range.threshold);
            }
        }
    }

    let mut dominant_sum = [0u64; 3];
    let mut dominant_count = 0u64;
    let mut overall_sum = [0u64; 3];
    for (i, pixel) in crop.pixels().enumerate() {
        for c in 0..3 {
            overall_sum[c] += u64::from(pixel.0[c]);
        }
        if matched_any[i] {
            dominant_count += 1;
            for c in 0..3 {
                dominant_sum[c] += u64::from(pixel.0[c]);
            }
        }
    }
    let dominant_color = if dominant_count > 0 {
        mean_color(dominant_sum, dominant_count)
    } else {
        mean_color(overall_sum, total)
    };

    // Argmax over raw sums; earlier names win ties.
    let winner = sums
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(i, _)| i);

    let payload = match winner {
        Some(i) if sums[i] > 0.0 => {
            let raw = sums[i];
            let capped = raw.min(100.0);
            let passed = capped >= thresholds[i];
            return Ok((
                passed,
                RoiPayload::Color {
                    detected_color: names[i].clone(),
                    dominant_color,
                    match_percentage: capped,
                    match_percentage_raw: Some(raw),
                },
            ));
        }
        _ => RoiPayload::Color {
            detected_color: "Unknown".to_string(),
            dominant_color,
            match_percentage: 0.0,
            match_percentage_raw: Some(0.0),
        },
    };
    Ok((false, payload))
}

fn pixel_in_range(rgb: [u8; 3], range: &ColorRange) -> bool {
    match range.color_space {
        ColorSpace::Rgb => (0..3).all(|c| {
            let v = f32::from(rgb[c]);
            v >= range.lower[c] && v <= range.upper[c]
        }),
        ColorSpace::Hsv => {
            let hsv = ops::rgb_to_hsv(rgb);
            let hue_ok = if range.lower[0] <= range.upper[0] {
                hsv[0] >= range.lower[0] && hsv[0] <= range.upper[0]
            } else {
                // Wrap-around hue range (e.g. red 350..10).
                hsv[0] >= range.lower[0] || hsv[0] <= range.upper[0]
            };
            hue_ok
                && (1..3).all(|c| hsv[c] >= range.lower[c] && hsv[c] <= range.upper[c])
        }
    }
}

fn mean_color(sum: [u64; 3], count: u64) -> [u8; 3] {
    [
        (sum[0] / count) as u8,
        (sum[1] / count) as u8,
        (sum[2] / count) as u8,
    ]
}
