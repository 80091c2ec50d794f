//! Canonical ROI records and config normalization.
//!
//! Product ROI configs arrive in two shapes: object form (a keyed map) and
//! positional tuple form. Both normalize into the immutable [`Roi`] record.
//! Tuple form is `[idx, type, [x1,y1,x2,y2], focus, exposure, ai_threshold,
//! feature_method, rotation, device_location, expected_text,
//! is_device_barcode, color_config]`; elements from `focus` onward may be
//! omitted, and unknown trailing elements are ignored. Missing optional
//! fields default to absent.
//!
//! Validation is performed by a separate step so that legacy per-product
//! color ranges can be merged into Color ROIs before the "exactly one color
//! variant" rule is enforced.

use crate::error::{AoiError, AppResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// ROI inspection type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoiType {
    Barcode,
    Compare,
    Ocr,
    Color,
}

impl RoiType {
    /// Maps the wire code (1..=4) to a type.
    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            1 => Some(Self::Barcode),
            2 => Some(Self::Compare),
            3 => Some(Self::Ocr),
            4 => Some(Self::Color),
            _ => None,
        }
    }

    pub fn code(&self) -> u64 {
        match self {
            Self::Barcode => 1,
            Self::Compare => 2,
            Self::Ocr => 3,
            Self::Color => 4,
        }
    }

    /// Human-readable name used in result records.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Barcode => "Barcode",
            Self::Compare => "Compare",
            Self::Ocr => "OCR",
            Self::Color => "Color",
        }
    }
}

/// Axis-aligned rectangle in source-image pixel space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl Rect {
    pub fn width(&self) -> u32 {
        self.x2.saturating_sub(self.x1)
    }

    pub fn height(&self) -> u32 {
        self.y2.saturating_sub(self.y1)
    }

    pub fn as_array(&self) -> [u32; 4] {
        [self.x1, self.y1, self.x2, self.y2]
    }
}

/// Color space a range is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ColorSpace {
    #[default]
    #[serde(rename = "RGB")]
    Rgb,
    #[serde(rename = "HSV")]
    Hsv,
}

/// One named color range of the enumerated variant.
///
/// HSV bounds use H in [0,360) and S/V in [0,255]; an H lower bound greater
/// than the upper bound denotes a hue wrap-around range (e.g. red 350..10).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColorRange {
    pub name: String,
    pub lower: [f32; 3],
    pub upper: [f32; 3],
    #[serde(default)]
    pub color_space: ColorSpace,
    pub threshold: f64,
}

/// Per-ROI color matching configuration; exactly one variant applies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ColorConfig {
    Ranges {
        color_ranges: Vec<ColorRange>,
    },
    Simple {
        expected_color: [u8; 3],
        color_tolerance: u32,
        min_pixel_percentage: f64,
    },
}

/// Canonical ROI record (v3.2). Immutable once validated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Roi {
    pub idx: u32,
    pub roi_type: RoiType,
    pub coords: Rect,
    pub focus: u32,
    pub exposure: u32,
    pub ai_threshold: Option<f64>,
    pub feature_method: String,
    pub rotation: i32,
    pub device_location: u32,
    pub expected_text: Option<String>,
    pub is_device_barcode: Option<bool>,
    pub color_config: Option<ColorConfig>,
}

impl Roi {
    /// Grouping key shared by ROIs captured with the same camera settings.
    pub fn capture_group(&self) -> (u32, u32) {
        (self.focus, self.exposure)
    }

    /// Parses one config entry (object or tuple form). `context` names the
    /// record position for error reporting.
    pub fn from_config_value(value: &Value, context: &str) -> AppResult<Self> {
        match value {
            Value::Object(_) => Self::from_object(value, context),
            Value::Array(items) => Self::from_tuple(items, context),
            other => Err(AoiError::config_invalid(
                context,
                format!("expected object or tuple, got {}", type_name(other)),
            )),
        }
    }

    fn from_object(value: &Value, context: &str) -> AppResult<Self> {
        let idx = require_u32(value.get("idx"), "idx", context)?;
        let type_code = require_u64(value.get("type"), "type", context)?;
        let roi_type = RoiType::from_code(type_code).ok_or_else(|| {
            AoiError::config_invalid(context, format!("unknown ROI type code {type_code}"))
        })?;
        let coords = parse_coords(value.get("coords"), context)?;

        Ok(Self {
            idx,
            roi_type,
            coords,
            focus: optional_u32(value.get("focus"), "focus", context)?.unwrap_or(0),
            exposure: optional_u32(value.get("exposure"), "exposure", context)?.unwrap_or(0),
            ai_threshold: optional_f64(value.get("ai_threshold"), "ai_threshold", context)?,
            feature_method: optional_str(value.get("feature_method"))
                .unwrap_or_else(|| "opencv".to_string()),
            rotation: optional_i32(value.get("rotation"), "rotation", context)?.unwrap_or(0),
            device_location: optional_u32(value.get("device_location"), "device_location", context)?
                .unwrap_or(1),
            expected_text: optional_str(value.get("expected_text")),
            is_device_barcode: optional_bool(value.get("is_device_barcode")),
            color_config: parse_color_config(value.get("color_config"), context)?,
        })
    }

    fn from_tuple(items: &[Value], context: &str) -> AppResult<Self> {
        if items.len() < 3 {
            return Err(AoiError::config_invalid(
                context,
                format!("tuple form needs at least [idx, type, coords], got {} elements", items.len()),
            ));
        }
        let idx = require_u32(items.first(), "idx", context)?;
        let type_code = require_u64(items.get(1), "type", context)?;
        let roi_type = RoiType::from_code(type_code).ok_or_else(|| {
            AoiError::config_invalid(context, format!("unknown ROI type code {type_code}"))
        })?;
        let coords = parse_coords(items.get(2), context)?;

        // Everything past the coords is optional; short tuples are tolerated
        // and elements past the known layout are ignored.
        Ok(Self {
            idx,
            roi_type,
            coords,
            focus: optional_u32(items.get(3), "focus", context)?.unwrap_or(0),
            exposure: optional_u32(items.get(4), "exposure", context)?.unwrap_or(0),
            ai_threshold: optional_f64(items.get(5), "ai_threshold", context)?,
            feature_method: optional_str(items.get(6)).unwrap_or_else(|| "opencv".to_string()),
            rotation: optional_i32(items.get(7), "rotation", context)?.unwrap_or(0),
            device_location: optional_u32(items.get(8), "device_location", context)?.unwrap_or(1),
            expected_text: optional_str(items.get(9)),
            is_device_barcode: optional_bool(items.get(10)),
            color_config: parse_color_config(items.get(11), context)?,
        })
    }

    /// Enforces structural constraints shared by all ROI types.
    pub fn validate(&self, context: &str) -> AppResult<()> {
        if self.idx == 0 {
            return Err(AoiError::config_invalid(context, "idx must be positive"));
        }
        if self.coords.x1 >= self.coords.x2 || self.coords.y1 >= self.coords.y2 {
            return Err(AoiError::config_invalid(
                context,
                format!(
                    "degenerate coords [{}, {}, {}, {}] (require x1<x2, y1<y2)",
                    self.coords.x1, self.coords.y1, self.coords.x2, self.coords.y2
                ),
            ));
        }
        if self.device_location == 0 {
            return Err(AoiError::config_invalid(
                context,
                "device_location must be positive",
            ));
        }
        if self.roi_type == RoiType::Compare {
            match self.ai_threshold {
                Some(t) if (0.0..=1.0).contains(&t) => {}
                Some(t) => {
                    return Err(AoiError::config_invalid(
                        context,
                        format!("ai_threshold {t} outside [0, 1]"),
                    ))
                }
                None => {
                    return Err(AoiError::config_invalid(
                        context,
                        "Compare ROI requires ai_threshold",
                    ))
                }
            }
        }
        Ok(())
    }

    /// Enforces the color-variant requirement. Called after the legacy
    /// per-product ranges have been merged in.
    pub fn ensure_color_config(&self, context: &str) -> AppResult<()> {
        if self.roi_type == RoiType::Color && self.color_config.is_none() {
            return Err(AoiError::config_invalid(
                context,
                "Color ROI requires color_config (or product-level color ranges)",
            ));
        }
        Ok(())
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn require_u64(value: Option<&Value>, field: &str, context: &str) -> AppResult<u64> {
    value
        .and_then(Value::as_u64)
        .ok_or_else(|| AoiError::config_invalid(context, format!("missing or non-integer '{field}'")))
}

fn require_u32(value: Option<&Value>, field: &str, context: &str) -> AppResult<u32> {
    let raw = require_u64(value, field, context)?;
    u32::try_from(raw)
        .map_err(|_| AoiError::config_invalid(context, format!("'{field}' out of range: {raw}")))
}

fn optional_u32(value: Option<&Value>, field: &str, context: &str) -> AppResult<Option<u32>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(v) => {
            // Tolerate float-typed integers ("305.0") from loosely-typed
            // config writers.
            let raw = v.as_f64().ok_or_else(|| {
                AoiError::config_invalid(context, format!("non-numeric '{field}'"))
            })?;
            if raw < 0.0 || raw > f64::from(u32::MAX) {
                return Err(AoiError::config_invalid(
                    context,
                    format!("'{field}' out of range: {raw}"),
                ));
            }
            Ok(Some(raw as u32))
        }
    }
}

fn optional_i32(value: Option<&Value>, field: &str, context: &str) -> AppResult<Option<i32>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(v) => {
            let raw = v.as_f64().ok_or_else(|| {
                AoiError::config_invalid(context, format!("non-numeric '{field}'"))
            })?;
            if raw < f64::from(i32::MIN) || raw > f64::from(i32::MAX) {
                return Err(AoiError::config_invalid(
                    context,
                    format!("'{field}' out of range: {raw}"),
                ));
            }
            Ok(Some(raw as i32))
        }
    }
}

fn optional_f64(value: Option<&Value>, field: &str, context: &str) -> AppResult<Option<f64>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v.as_f64().map(Some).ok_or_else(|| {
            AoiError::config_invalid(context, format!("non-numeric '{field}'"))
        }),
    }
}

fn optional_str(value: Option<&Value>) -> Option<String> {
    value.and_then(Value::as_str).map(str::to_string)
}

fn optional_bool(value: Option<&Value>) -> Option<bool> {
    value.and_then(Value::as_bool)
}

fn parse_coords(value: Option<&Value>, context: &str) -> AppResult<Rect> {
    let items = value.and_then(Value::as_array).ok_or_else(|| {
        AoiError::config_invalid(context, "missing or non-array 'coords'")
    })?;
    if items.len() != 4 {
        return Err(AoiError::config_invalid(
            context,
            format!("coords must have 4 elements, got {}", items.len()),
        ));
    }
    let mut parsed = [0u32; 4];
    for (i, item) in items.iter().enumerate() {
        let raw = item.as_f64().ok_or_else(|| {
            AoiError::config_invalid(context, format!("non-numeric coords[{i}]"))
        })?;
        if raw < 0.0 || raw > f64::from(u32::MAX) {
            return Err(AoiError::config_invalid(
                context,
                format!("coords[{i}] out of range: {raw}"),
            ));
        }
        parsed[i] = raw as u32;
    }
    Ok(Rect {
        x1: parsed[0],
        y1: parsed[1],
        x2: parsed[2],
        y2: parsed[3],
    })
}

fn parse_color_config(value: Option<&Value>, context: &str) -> AppResult<Option<ColorConfig>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(v) => serde_json::from_value(v.clone()).map(Some).map_err(|err| {
            AoiError::config_invalid(context, format!("invalid color_config: {err}"))
        }),
    }
}
