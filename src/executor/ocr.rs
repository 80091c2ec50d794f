//! OCR ROI executor.
//!
//! The recognized text is validated against the ROI's optional
//! `expected_text` with case-insensitive substring semantics on trimmed
//! inputs, and the verdict is appended to the returned text as exactly one
//! bracketed tag. Downstream consumers key on the `[PASS:`/`[FAIL:` class.

use super::{ExecContext, RoiPayload};
use crate::error::{AoiError, AppResult};
use crate::roi::Roi;
use image::RgbImage;

pub fn run(roi: &Roi, crop: &RgbImage, ctx: &ExecContext<'_>) -> AppResult<(bool, RoiPayload)> {
    let text = ctx
        .capabilities
        .ocr()
        .recognize(crop)
        .map_err(|err| AoiError::RoiTaskFailed(format!("text recognition: {err}")))?;
    let (passed, ocr_text) = evaluate(roi.expected_text.as_deref(), &text);
    Ok((passed, RoiPayload::Ocr { ocr_text }))
}

/// Applies the OCR decision table, returning the verdict and the tagged text.
pub fn evaluate(expected: Option<&str>, text: &str) -> (bool, String) {
    let text = text.trim();
    let expected = expected.map(str::trim).filter(|e| !e.is_empty());

    let (passed, tag) = match expected {
        Some(expected) => {
            if text.to_lowercase().contains(&expected.to_lowercase()) {
                (true, format!("[PASS: Contains '{expected}']"))
            } else {
                (false, format!("[FAIL: Expected '{expected}', detected '{text}']"))
            }
        }
        None => {
            if text.is_empty() {
                (false, "[FAIL: No text detected]".to_string())
            } else {
                (true, "[PASS: Text detected]".to_string())
            }
        }
    };

    let tagged = if text.is_empty() {
        tag
    } else {
        format!("{text} {tag}")
    };
    (passed, tagged)
}
