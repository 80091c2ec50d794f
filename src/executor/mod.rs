//! Per-type ROI executors.
//!
//! Every executor receives the rotated crop of its ROI plus the execution
//! context, and returns a typed outcome. The shared shell here crops the
//! frame, applies the configured rotation, saves the crop as
//! `output/roi_<idx>.jpg`, and dispatches to the type-specific logic. An
//! executor failure never propagates: it becomes a `passed=false` outcome
//! with the reason recorded, and the inspection continues.

pub mod barcode;
pub mod color;
pub mod compare;
pub mod ocr;

use crate::capability::Capabilities;
use crate::error::AppResult;
use crate::golden::GoldenStore;
use crate::imaging::ops;
use crate::roi::{Roi, RoiType};
use image::RgbImage;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Shared state an executor runs against.
pub struct ExecContext<'a> {
    pub product_id: &'a str,
    pub output_dir: &'a Path,
    pub capabilities: &'a Capabilities,
    pub store: &'a GoldenStore,
}

/// Type-specific result payload of one ROI.
#[derive(Debug, Clone)]
pub enum RoiPayload {
    Barcode {
        barcode_values: Vec<String>,
    },
    Compare {
        ai_similarity: f64,
        threshold: f64,
        match_result: String,
        golden_image_path: Option<PathBuf>,
    },
    Ocr {
        ocr_text: String,
    },
    Color {
        detected_color: String,
        dominant_color: [u8; 3],
        match_percentage: f64,
        match_percentage_raw: Option<f64>,
    },
    /// A task that failed before producing a payload.
    Empty,
}

/// Result of one ROI task.
#[derive(Debug, Clone)]
pub struct RoiOutcome {
    pub roi: Roi,
    pub passed: bool,
    pub payload: RoiPayload,
    pub error: Option<String>,
    /// Server-local path of the saved crop, when saving succeeded.
    pub roi_image_path: Option<PathBuf>,
}

impl RoiOutcome {
    /// A failed outcome carrying a reason; used for task errors, panics and
    /// timeouts so a single ROI failure cannot sink the inspection.
    pub fn failed(roi: Roi, reason: impl Into<String>) -> Self {
        Self {
            roi,
            passed: false,
            payload: RoiPayload::Empty,
            error: Some(reason.into()),
            roi_image_path: None,
        }
    }
}

/// Runs one ROI against a decoded frame.
pub async fn execute_roi(roi: Roi, frame: Arc<RgbImage>, ctx: ExecContext<'_>) -> RoiOutcome {
    let crop = match prepare_region(&roi, &frame) {
        Ok(crop) => crop,
        Err(err) => return RoiOutcome::failed(roi, err.to_string()),
    };

    // The crop is always published for the caller, pass or fail.
    let crop_path = ctx.output_dir.join(format!("roi_{}.jpg", roi.idx));
    let roi_image_path = match ops::save_jpeg(&crop, &crop_path) {
        Ok(()) => Some(crop_path),
        Err(err) => {
            tracing::warn!(roi = roi.idx, error = %err, "failed to save ROI crop artifact");
            None
        }
    };

    let result = match roi.roi_type {
        RoiType::Barcode => barcode::run(&roi, &crop, &ctx),
        RoiType::Compare => compare::run(&roi, &crop, &ctx).await,
        RoiType::Ocr => ocr::run(&roi, &crop, &ctx),
        RoiType::Color => color::run(&roi, &crop),
    };

    match result {
        Ok((passed, payload)) => RoiOutcome {
            roi,
            passed,
            payload,
            error: None,
            roi_image_path,
        },
        Err(err) => {
            tracing::warn!(roi = roi.idx, error = %err, "ROI task failed");
            RoiOutcome {
                roi,
                passed: false,
                payload: RoiPayload::Empty,
                error: Some(err.to_string()),
                roi_image_path,
            }
        }
    }
}

fn prepare_region(roi: &Roi, frame: &RgbImage) -> AppResult<RgbImage> {
    let crop = ops::crop(frame, roi.coords)?;
    Ok(ops::rotate(&crop, roi.rotation))
}
