//! Barcode ROI executor.

use super::{ExecContext, RoiPayload};
use crate::error::{AoiError, AppResult};
use crate::roi::Roi;
use image::RgbImage;

/// Decodes barcodes from the rotated crop. The ROI passes iff at least one
/// code was decoded. The decoded values stay a list of strings end to end;
/// downstream selection and linking extract scalars from it.
pub fn run(roi: &Roi, crop: &RgbImage, ctx: &ExecContext<'_>) -> AppResult<(bool, RoiPayload)> {
    let decoded = ctx
        .capabilities
        .barcode()
        .decode(crop)
        .map_err(|err| AoiError::RoiTaskFailed(format!("barcode decode: {err}")))?;

    // Preserve detection order, drop duplicates.
    let mut barcode_values = Vec::with_capacity(decoded.len());
    for value in decoded {
        if !barcode_values.contains(&value) {
            barcode_values.push(value);
        }
    }

    tracing::debug!(roi = roi.idx, values = ?barcode_values, "barcode ROI decoded");
    let passed = !barcode_values.is_empty();
    Ok((passed, RoiPayload::Barcode { barcode_values }))
}
