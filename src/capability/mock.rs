//! Mock capabilities for tests.
//!
//! The mocks are keyed by the red channel of the region's top-left pixel, so
//! a test can paint each ROI of a synthetic frame a distinct solid color and
//! script per-ROI behavior without caring about scheduling order.

use super::{BarcodeDecoder, FeatureExtractor, TextRecognizer};
use crate::linking::{parse_link_response, BarcodeLinker};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use image::RgbImage;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

fn key_of(image: &RgbImage) -> u8 {
    image.get_pixel(0, 0).0[0]
}

/// JPEG round-trips shift uniform pixel values by a couple of counts, so
/// scripted lookups match the nearest key within a small tolerance instead
/// of demanding exact equality.
fn nearest_key<'a, V>(map: &'a HashMap<u8, V>, key: u8) -> Option<&'a V> {
    map.iter()
        .map(|(k, v)| (u8::abs_diff(*k, key), v))
        .filter(|(distance, _)| *distance <= 8)
        .min_by_key(|(distance, _)| *distance)
        .map(|(_, v)| v)
}

/// Feature extractor returning scripted vectors keyed by region color.
pub struct KeyedExtractor {
    name: String,
    vectors: HashMap<u8, Vec<f32>>,
}

impl KeyedExtractor {
    pub fn new(name: &str, vectors: HashMap<u8, Vec<f32>>) -> Self {
        Self {
            name: name.to_string(),
            vectors,
        }
    }
}

impl FeatureExtractor for KeyedExtractor {
    fn name(&self) -> &str {
        &self.name
    }

    fn extract(&self, image: &RgbImage) -> Result<Vec<f32>> {
        let key = key_of(image);
        nearest_key(&self.vectors, key)
            .cloned()
            .ok_or_else(|| anyhow!("no scripted feature vector for key {key}"))
    }
}

/// Wraps an extractor and counts `extract` calls (short-circuit assertions).
pub struct CountingExtractor {
    inner: Arc<dyn FeatureExtractor>,
    calls: AtomicUsize,
}

impl CountingExtractor {
    pub fn new(inner: Arc<dyn FeatureExtractor>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl FeatureExtractor for CountingExtractor {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn extract(&self, image: &RgbImage) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.extract(image)
    }
}

/// Barcode decoder returning scripted values keyed by region color.
pub struct KeyedBarcodeDecoder {
    values: HashMap<u8, Vec<String>>,
}

impl KeyedBarcodeDecoder {
    pub fn new(values: HashMap<u8, Vec<String>>) -> Self {
        Self { values }
    }
}

impl BarcodeDecoder for KeyedBarcodeDecoder {
    fn decode(&self, image: &RgbImage) -> Result<Vec<String>> {
        Ok(nearest_key(&self.values, key_of(image))
            .cloned()
            .unwrap_or_default())
    }
}

/// Text recognizer returning one fixed string.
pub struct FixedTextRecognizer {
    text: String,
}

impl FixedTextRecognizer {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
        }
    }
}

impl TextRecognizer for FixedTextRecognizer {
    fn recognize(&self, _image: &RgbImage) -> Result<String> {
        Ok(self.text.clone())
    }
}

/// Linker that serves canned response bodies and records every raw value it
/// was asked to link. Bodies go through the same response parsing as the
/// HTTP client, so quoted and `null` bodies behave as they would on the wire.
pub struct ScriptedLinker {
    responses: HashMap<String, String>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedLinker {
    pub fn new(responses: HashMap<String, String>) -> Arc<Self> {
        Arc::new(Self {
            responses,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl BarcodeLinker for ScriptedLinker {
    async fn link(&self, raw: &str) -> Option<String> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(raw.to_string());
        }
        let body = self.responses.get(raw)?;
        parse_link_response(body)
    }
}
