//! Capability adapters over pluggable inspection backends.
//!
//! Barcode decoding, text recognition and feature extraction are external
//! capabilities with defined input/output contracts. The executors only ever
//! talk to the traits below; concrete backends are wired in at startup and
//! must be `Send + Sync` (the adapter wraps a backend in a mutex or pool if
//! the underlying library is not thread-safe).

pub mod features;
pub mod mock;
pub mod stub;

use anyhow::Result;
use image::RgbImage;
use std::collections::HashMap;
use std::sync::Arc;

/// Capability for extracting a feature vector from an image region.
///
/// Implementations are process-wide, initialized once, and assumed
/// thread-safe for inference.
pub trait FeatureExtractor: Send + Sync {
    /// Capability key this extractor answers to (e.g. "opencv", "mobilenet").
    fn name(&self) -> &str;

    /// Extracts a feature vector. Vectors from the same extractor may vary in
    /// dimension between calls; the comparison layer is responsible for
    /// reconciling that.
    fn extract(&self, image: &RgbImage) -> Result<Vec<f32>>;
}

/// Capability for decoding zero or more barcode symbologies from a region.
pub trait BarcodeDecoder: Send + Sync {
    /// Returns the decoded strings in detection order. An empty list is a
    /// normal outcome, not an error.
    fn decode(&self, image: &RgbImage) -> Result<Vec<String>>;
}

/// Capability for recognizing text in a region.
pub trait TextRecognizer: Send + Sync {
    /// Returns the recognized text, possibly empty.
    fn recognize(&self, image: &RgbImage) -> Result<String>;
}

/// The bundle of capabilities an inspection runs against.
#[derive(Clone)]
pub struct Capabilities {
    extractors: HashMap<String, Arc<dyn FeatureExtractor>>,
    default_extractor: Arc<dyn FeatureExtractor>,
    barcode: Arc<dyn BarcodeDecoder>,
    ocr: Arc<dyn TextRecognizer>,
}

impl Capabilities {
    /// Builds the default capability set: the built-in pixel and histogram
    /// extractors, and stub barcode/OCR backends that report nothing until a
    /// real backend is wired in.
    pub fn builtin() -> Self {
        let pixel = features::pixel_extractor();
        let histogram = features::histogram_extractor();
        let mut extractors: HashMap<String, Arc<dyn FeatureExtractor>> = HashMap::new();
        extractors.insert(pixel.name().to_string(), pixel.clone());
        extractors.insert(histogram.name().to_string(), histogram);
        Self {
            extractors,
            default_extractor: pixel,
            barcode: Arc::new(stub::StubBarcodeDecoder::new()),
            ocr: Arc::new(stub::StubTextRecognizer::new()),
        }
    }

    /// Registers (or replaces) an extractor under its capability key.
    pub fn with_extractor(mut self, extractor: Arc<dyn FeatureExtractor>) -> Self {
        self.extractors
            .insert(extractor.name().to_string(), extractor);
        self
    }

    pub fn with_barcode(mut self, decoder: Arc<dyn BarcodeDecoder>) -> Self {
        self.barcode = decoder;
        self
    }

    pub fn with_ocr(mut self, recognizer: Arc<dyn TextRecognizer>) -> Self {
        self.ocr = recognizer;
        self
    }

    /// Resolves the extractor for an advisory `feature_method` key, falling
    /// back to the default extractor for unknown keys.
    pub fn extractor_for(&self, method: &str) -> Arc<dyn FeatureExtractor> {
        match self.extractors.get(method) {
            Some(extractor) => extractor.clone(),
            None => {
                tracing::debug!(method, "unknown feature method, using default extractor");
                self.default_extractor.clone()
            }
        }
    }

    pub fn barcode(&self) -> Arc<dyn BarcodeDecoder> {
        self.barcode.clone()
    }

    pub fn ocr(&self) -> Arc<dyn TextRecognizer> {
        self.ocr.clone()
    }
}
