//! Compare ROI executor: delegates to the golden matcher.

use super::{ExecContext, RoiPayload};
use crate::error::{AoiError, AppResult};
use crate::golden::matcher;
use crate::roi::Roi;
use image::RgbImage;

pub async fn run(roi: &Roi, crop: &RgbImage, ctx: &ExecContext<'_>) -> AppResult<(bool, RoiPayload)> {
    let threshold = roi
        .ai_threshold
        .ok_or_else(|| AoiError::RoiTaskFailed("Compare ROI without ai_threshold".to_string()))?;
    let extractor = ctx.capabilities.extractor_for(&roi.feature_method);

    let outcome = matcher::match_and_promote(
        ctx.store,
        ctx.product_id,
        roi.idx,
        crop,
        threshold,
        extractor.as_ref(),
    )
    .await?;

    if let Some(reason) = &outcome.promotion_error {
        tracing::warn!(roi = roi.idx, reason, "promotion failed after a passing match");
    }

    // Publish the golden that produced the score next to the ROI crop so the
    // client can fetch both sides of the comparison.
    let golden_copy = ctx.output_dir.join(format!("golden_{}.jpg", roi.idx));
    let golden_image_path = match std::fs::copy(&outcome.golden_path, &golden_copy) {
        Ok(_) => Some(golden_copy),
        Err(err) => {
            tracing::warn!(roi = roi.idx, error = %err, "failed to publish golden artifact");
            None
        }
    };

    let payload = RoiPayload::Compare {
        ai_similarity: outcome.ai_similarity,
        threshold,
        match_result: if outcome.passed { "Match" } else { "Different" }.to_string(),
        golden_image_path,
    };
    Ok((outcome.passed, payload))
}
