//! Golden sample matching and promotion.
//!
//! Candidates are examined in store order (best first, then alternates by
//! age). Each candidate is resized to the capture's dimensions, features are
//! extracted from both sides, and cosine similarity decides the verdict.
//! The scan short-circuits at the first candidate meeting the threshold; if
//! that candidate is not already the best, it is promoted under the store's
//! directory mutex. A failed inspection never alters the library.

use super::store::{GoldenStore, SampleRole};
use crate::capability::FeatureExtractor;
use crate::error::{AoiError, AppResult};
use crate::imaging::ops;
use image::RgbImage;
use std::path::PathBuf;

/// Comparisons within this distance of the threshold count as passing, so a
/// score exactly at the threshold is never lost to float rounding.
pub const SIMILARITY_EPSILON: f64 = 1e-8;

/// Result of one capture-vs-library comparison.
#[derive(Debug, Clone)]
pub struct MatchOutcome {
    pub passed: bool,
    /// Best similarity actually observed (the matching score on pass).
    pub ai_similarity: f64,
    /// Server-local path of the golden that produced the score. After a
    /// successful promotion this is the best slot.
    pub golden_path: PathBuf,
    pub promoted: bool,
    /// Set when the capture matched but the promotion rename failed; the
    /// verdict stands, the library keeps its previous best.
    pub promotion_error: Option<String>,
}

/// Cosine similarity over feature vectors. Dimension mismatches are resolved
/// by zero-padding the shorter vector, never by dropping data.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let len = a.len().max(b.len());
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for i in 0..len {
        let x = f64::from(a.get(i).copied().unwrap_or(0.0));
        let y = f64::from(b.get(i).copied().unwrap_or(0.0));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Compares a captured crop against one ROI's golden library and maintains
/// the best designation.
pub async fn match_and_promote(
    store: &GoldenStore,
    product_id: &str,
    idx: u32,
    capture: &RgbImage,
    threshold: f64,
    extractor: &dyn FeatureExtractor,
) -> AppResult<MatchOutcome> {
    // The whole scan runs under the directory mutex: candidate files must not
    // be renamed by a concurrent promotion while we iterate them, and
    // promotions on one (product, idx) are totally ordered.
    let lock = store.lock_for(product_id, idx);
    let _guard = lock.lock().await;

    let candidates = store.candidates(product_id, idx)?;
    if candidates.is_empty() {
        return Err(AoiError::GoldenStore(format!(
            "no golden samples for {product_id}/roi_{idx}"
        )));
    }

    let capture_features = extractor
        .extract(capture)
        .map_err(|err| AoiError::RoiTaskFailed(format!("feature extraction: {err}")))?;

    let best_path = candidates[0].path.clone();
    let mut best_seen = 0.0f64;

    for candidate in &candidates {
        let golden = match image::open(&candidate.path) {
            Ok(img) => img.to_rgb8(),
            Err(err) => {
                tracing::warn!(
                    candidate = %candidate.path.display(),
                    error = %err,
                    "skipping unreadable golden candidate"
                );
                continue;
            }
        };
        let resized = ops::resize_to_match(&golden, capture.width(), capture.height());
        let features = extractor
            .extract(&resized)
            .map_err(|err| AoiError::RoiTaskFailed(format!("feature extraction: {err}")))?;
        let score = cosine_similarity(&capture_features, &features);
        best_seen = best_seen.max(score);

        if score + SIMILARITY_EPSILON >= threshold {
            // Short-circuit: remaining candidates are not examined.
            if candidate.role == SampleRole::Best {
                return Ok(MatchOutcome {
                    passed: true,
                    ai_similarity: score,
                    golden_path: candidate.path.clone(),
                    promoted: false,
                    promotion_error: None,
                });
            }
            let dir = store.roi_dir(product_id, idx);
            return match store.promote_locked(&dir, &candidate.name) {
                Ok(new_best) => Ok(MatchOutcome {
                    passed: true,
                    ai_similarity: score,
                    golden_path: new_best,
                    promoted: true,
                    promotion_error: None,
                }),
                Err(err) => {
                    // The capture matched; the verdict is unaffected.
                    tracing::warn!(
                        product = product_id,
                        roi = idx,
                        error = %err,
                        "golden promotion failed, keeping previous best"
                    );
                    Ok(MatchOutcome {
                        passed: true,
                        ai_similarity: score,
                        golden_path: candidate.path.clone(),
                        promoted: false,
                        promotion_error: Some(err.to_string()),
                    })
                }
            };
        }
    }

    Ok(MatchOutcome {
        passed: false,
        ai_similarity: best_seen,
        golden_path: best_path,
        promoted: false,
        promotion_error: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::mock::{CountingExtractor, KeyedExtractor};
    use image::{Rgb, RgbImage};
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn solid_jpeg(path: &std::path::Path, key: u8) {
        RgbImage::from_pixel(16, 16, Rgb([key, key, key]))
            .save(path)
            .unwrap();
    }

    /// Builds a golden tree where each file is a solid image whose red
    /// channel keys the scripted extractor.
    fn fixture(
        files: &[(&str, u8)],
        vectors: &[(u8, Vec<f32>)],
    ) -> (TempDir, GoldenStore, KeyedExtractor) {
        let tmp = TempDir::new().unwrap();
        let store = GoldenStore::new(tmp.path());
        let dir = store.roi_dir("widget", 3);
        std::fs::create_dir_all(&dir).unwrap();
        for (name, key) in files {
            solid_jpeg(&dir.join(name), *key);
        }
        let extractor = KeyedExtractor::new(
            "opencv",
            vectors.iter().cloned().collect::<HashMap<_, _>>(),
        );
        (tmp, store, extractor)
    }

    fn capture(key: u8) -> RgbImage {
        RgbImage::from_pixel(16, 16, Rgb([key, key, key]))
    }

    #[tokio::test]
    async fn identical_best_passes_without_touching_directory() {
        // Capture and best share a feature vector: cosine 1.0.
        let (_tmp, store, extractor) = fixture(
            &[("best_golden.jpg", 50)],
            &[(50, vec![1.0, 0.0]), (200, vec![1.0, 0.0])],
        );
        let outcome = match_and_promote(&store, "widget", 3, &capture(200), 0.9, &extractor)
            .await
            .unwrap();
        assert!(outcome.passed);
        assert!(outcome.ai_similarity > 0.999);
        assert!(!outcome.promoted);
        assert_eq!(store.list("widget", 3).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn alternate_over_threshold_is_promoted() {
        // best scores 0.8 against the capture, the alternate 0.97.
        let deg = |theta: f32| vec![theta.cos(), theta.sin()];
        let (_tmp, store, extractor) = fixture(
            &[("best_golden.jpg", 10), ("1700000000_golden_sample.jpg", 20)],
            &[
                (200, deg(0.0)),
                (10, deg(0.8f32.acos())),
                (20, deg(0.97f32.acos())),
            ],
        );
        let outcome = match_and_promote(&store, "widget", 3, &capture(200), 0.93, &extractor)
            .await
            .unwrap();
        assert!(outcome.passed);
        assert!((outcome.ai_similarity - 0.97).abs() < 1e-3);
        assert!(outcome.promoted);

        let samples = store.list("widget", 3).unwrap();
        let best = samples
            .iter()
            .find(|s| s.role == SampleRole::Best)
            .unwrap();
        // The former alternate's pixels now live in the best slot.
        let pixel = image::open(&best.path).unwrap().to_rgb8().get_pixel(0, 0).0[0];
        assert!(u8::abs_diff(pixel, 20) <= 8, "best slot holds wrong image: {pixel}");
        assert_eq!(
            samples.iter().filter(|s| s.role == SampleRole::Backup).count(),
            1
        );
        assert_eq!(samples.len(), 2);
    }

    #[tokio::test]
    async fn failure_leaves_directory_untouched_and_reports_best_seen() {
        let deg = |theta: f32| vec![theta.cos(), theta.sin()];
        let (_tmp, store, extractor) = fixture(
            &[("best_golden.jpg", 10), ("1700000000_golden_sample.jpg", 20)],
            &[
                (200, deg(0.0)),
                (10, deg(0.90f32.acos())),
                (20, deg(0.85f32.acos())),
            ],
        );
        let dir = store.roi_dir("widget", 3);
        let before: Vec<_> = std::fs::read_dir(&dir)
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();

        let outcome = match_and_promote(&store, "widget", 3, &capture(200), 0.99, &extractor)
            .await
            .unwrap();
        assert!(!outcome.passed);
        assert!((outcome.ai_similarity - 0.90).abs() < 1e-3);

        let after: Vec<_> = std::fs::read_dir(&dir)
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(before.len(), after.len());
        for name in before {
            assert!(after.contains(&name));
        }
    }

    #[tokio::test]
    async fn scan_short_circuits_at_first_match() {
        let (_tmp, store, extractor) = fixture(
            &[
                ("best_golden.jpg", 10),
                ("1700000000_golden_sample.jpg", 20),
                ("1700000001_golden_sample.jpg", 30),
            ],
            &[
                (200, vec![1.0, 0.0]),
                (10, vec![1.0, 0.0]),
                (20, vec![0.0, 1.0]),
                (30, vec![0.0, 1.0]),
            ],
        );
        let counting = CountingExtractor::new(std::sync::Arc::new(extractor));
        let outcome = match_and_promote(&store, "widget", 3, &capture(200), 0.9, &*counting)
            .await
            .unwrap();
        assert!(outcome.passed);
        // One extraction for the capture, one for the best; the two
        // alternates are never examined.
        assert_eq!(counting.calls(), 2);
    }

    #[tokio::test]
    async fn score_exactly_at_threshold_passes() {
        let (_tmp, store, extractor) = fixture(
            &[("best_golden.jpg", 10)],
            &[(200, vec![1.0, 0.0]), (10, vec![1.0, 0.0])],
        );
        let outcome = match_and_promote(&store, "widget", 3, &capture(200), 1.0, &extractor)
            .await
            .unwrap();
        assert!(outcome.passed);
    }

    #[test]
    fn cosine_zero_pads_shorter_vector() {
        // [1,0] vs [1] zero-pads the right side to [1,0]: identical.
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0]) - 1.0).abs() < 1e-9);
        // Orthogonal after padding.
        assert!(cosine_similarity(&[0.0, 1.0], &[1.0]).abs() < 1e-9);
        // Zero vector never matches.
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[tokio::test]
    async fn empty_library_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let store = GoldenStore::new(tmp.path());
        let extractor = KeyedExtractor::new("opencv", HashMap::new());
        let result =
            match_and_promote(&store, "widget", 3, &capture(0), 0.9, &extractor).await;
        assert!(matches!(result, Err(AoiError::GoldenStore(_))));
    }
}
