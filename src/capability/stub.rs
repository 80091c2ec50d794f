//! Stub capability backends.
//!
//! Stand-ins used when no real barcode or OCR backend is linked at startup.
//! They log once at construction and report empty results, so Barcode and
//! OCR ROIs fail honestly instead of crashing the inspection.

use super::{BarcodeDecoder, TextRecognizer};
use anyhow::Result;
use image::RgbImage;

pub struct StubBarcodeDecoder;

impl StubBarcodeDecoder {
    pub fn new() -> Self {
        tracing::warn!("barcode decoding backend not linked; Barcode ROIs will report no codes");
        Self
    }
}

impl Default for StubBarcodeDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl BarcodeDecoder for StubBarcodeDecoder {
    fn decode(&self, _image: &RgbImage) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

pub struct StubTextRecognizer;

impl StubTextRecognizer {
    pub fn new() -> Self {
        tracing::warn!("OCR backend not linked; OCR ROIs will report no text");
        Self
    }
}

impl Default for StubTextRecognizer {
    fn default() -> Self {
        Self::new()
    }
}

impl TextRecognizer for StubTextRecognizer {
    fn recognize(&self, _image: &RgbImage) -> Result<String> {
        Ok(String::new())
    }
}
