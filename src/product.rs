//! Product configuration loading.
//!
//! A product lives under `PRODUCTS_ROOT/<product>/` and is read on demand:
//!
//! ```text
//! <products_root>/<product>/
//!   rois_config_<product>.json     # array of ROI records (object or tuple form)
//!   colors_config_<product>.json   # legacy per-product color ranges (optional)
//!   golden_rois/roi_<idx>/         # golden sample library (see golden::store)
//! ```
//!
//! Legacy per-product color ranges are merged into any Color ROI that does
//! not carry its own `color_config`.

use crate::error::{AoiError, AppResult};
use crate::roi::{ColorConfig, ColorRange, Roi, RoiType};
use serde_json::Value;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// A product's normalized inspection configuration.
#[derive(Debug, Clone)]
pub struct ProductConfig {
    pub product_id: String,
    pub rois: Vec<Roi>,
}

impl ProductConfig {
    pub fn roi_by_idx(&self, idx: u32) -> Option<&Roi> {
        self.rois.iter().find(|r| r.idx == idx)
    }
}

/// Directory holding one product's configuration.
pub fn product_dir(products_root: &Path, product_id: &str) -> PathBuf {
    products_root.join(product_id)
}

/// Loads and normalizes a product's ROI configuration.
pub fn load_product(products_root: &Path, product_id: &str) -> AppResult<ProductConfig> {
    let dir = product_dir(products_root, product_id);
    let rois_path = dir.join(format!("rois_config_{product_id}.json"));
    if !rois_path.is_file() {
        return Err(AoiError::ProductUnknown(product_id.to_string()));
    }

    let raw = std::fs::read_to_string(&rois_path)?;
    let entries: Vec<Value> = serde_json::from_str(&raw)?;

    let legacy_ranges = load_legacy_color_ranges(&dir, product_id)?;

    let mut rois = Vec::with_capacity(entries.len());
    let mut seen = HashSet::new();
    for (position, entry) in entries.iter().enumerate() {
        let context = format!("{product_id}/rois[{position}]");
        let mut roi = Roi::from_config_value(entry, &context)?;
        roi.validate(&context)?;
        if !seen.insert(roi.idx) {
            return Err(AoiError::config_invalid(
                &context,
                format!("duplicate ROI idx {}", roi.idx),
            ));
        }
        if roi.roi_type == RoiType::Color && roi.color_config.is_none() {
            if let Some(ranges) = &legacy_ranges {
                roi.color_config = Some(ColorConfig::Ranges {
                    color_ranges: ranges.clone(),
                });
            }
        }
        roi.ensure_color_config(&context)?;
        rois.push(roi);
    }

    Ok(ProductConfig {
        product_id: product_id.to_string(),
        rois,
    })
}

/// Reads the optional legacy per-product color ranges file. Accepts either a
/// bare array of ranges or an object with a `color_ranges` key.
fn load_legacy_color_ranges(
    dir: &Path,
    product_id: &str,
) -> AppResult<Option<Vec<ColorRange>>> {
    let path = dir.join(format!("colors_config_{product_id}.json"));
    if !path.is_file() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(&path)?;
    let value: Value = serde_json::from_str(&raw)?;
    let ranges_value = match &value {
        Value::Array(_) => value.clone(),
        Value::Object(map) => map.get("color_ranges").cloned().ok_or_else(|| {
            AoiError::config_invalid(
                format!("{product_id}/colors_config"),
                "expected array or object with 'color_ranges'",
            )
        })?,
        _ => {
            return Err(AoiError::config_invalid(
                format!("{product_id}/colors_config"),
                "expected array or object with 'color_ranges'",
            ))
        }
    };
    let ranges: Vec<ColorRange> = serde_json::from_value(ranges_value).map_err(|err| {
        AoiError::config_invalid(format!("{product_id}/colors_config"), err.to_string())
    })?;
    Ok(Some(ranges))
}
