//! Grouped inspection, deadline behavior, and promotion through the full
//! orchestration path.

use image::{Rgb, RgbImage};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use visual_aoi::capability::mock::KeyedExtractor;
use visual_aoi::capability::Capabilities;
use visual_aoi::config::Settings;
use visual_aoi::error::AoiError;
use visual_aoi::golden::{GoldenStore, SampleRole};
use visual_aoi::linking::{BarcodeLinker, DisabledLinker};
use visual_aoi::orchestrator::{GroupedInspectRequest, InspectRequest, Orchestrator};
use visual_aoi::session::SessionManager;

struct Fixture {
    _tmp: TempDir,
    settings: Arc<Settings>,
    sessions: Arc<SessionManager>,
    store: Arc<GoldenStore>,
}

fn write_rois(products_root: &std::path::Path, rois: &serde_json::Value) {
    let product_dir = products_root.join("widget");
    std::fs::create_dir_all(&product_dir).unwrap();
    std::fs::write(
        product_dir.join("rois_config_widget.json"),
        serde_json::to_string_pretty(rois).unwrap(),
    )
    .unwrap();
}

fn fixture(rois: &serde_json::Value) -> Fixture {
    let tmp = TempDir::new().unwrap();
    let shared_root = tmp.path().join("shared");
    let products_root = tmp.path().join("products");
    std::fs::create_dir_all(shared_root.join("sessions")).unwrap();
    write_rois(&products_root, rois);

    let settings = Arc::new(Settings::for_roots(&shared_root, &products_root));
    let sessions = Arc::new(SessionManager::new(
        settings.sessions_root(),
        settings.session_ttl,
    ));
    let store = Arc::new(GoldenStore::new(products_root));
    Fixture {
        _tmp: tmp,
        settings,
        sessions,
        store,
    }
}

fn orchestrator_with(fixture: &Fixture, capabilities: Capabilities) -> Orchestrator {
    Orchestrator::new(
        fixture.settings.clone(),
        fixture.sessions.clone(),
        fixture.store.clone(),
        capabilities,
        Arc::new(DisabledLinker) as Arc<dyn BarcodeLinker>,
    )
}

fn simple_color_roi(idx: u32, coords: [u32; 4], focus: u32, exposure: u32, rgb: [u8; 3]) -> serde_json::Value {
    serde_json::json!({
        "idx": idx, "type": 4, "coords": coords, "focus": focus, "exposure": exposure,
        "device_location": 1,
        "color_config": { "expected_color": rgb, "color_tolerance": 10,
                          "min_pixel_percentage": 50.0 }
    })
}

#[tokio::test]
async fn grouped_inspection_uses_one_frame_per_group() {
    // Two capture groups: red+green regions in group (305,1200), a blue
    // region in group (310,900).
    let fixture = fixture(&serde_json::json!([
        simple_color_roi(1, [0, 0, 50, 50], 305, 1200, [255, 0, 0]),
        simple_color_roi(2, [50, 0, 100, 50], 305, 1200, [0, 255, 0]),
        simple_color_roi(3, [0, 0, 50, 50], 310, 900, [0, 0, 255]),
    ]));
    let orchestrator = orchestrator_with(&fixture, Capabilities::builtin());
    let session = fixture.sessions.create("widget", None).unwrap();

    let frame_a = RgbImage::from_fn(100, 50, |x, _| {
        if x < 50 {
            Rgb([255, 0, 0])
        } else {
            Rgb([0, 255, 0])
        }
    });
    frame_a.save(session.input_dir().join("group_a.png")).unwrap();
    RgbImage::from_pixel(50, 50, Rgb([0, 0, 255]))
        .save(session.input_dir().join("group_b.png"))
        .unwrap();

    let request: GroupedInspectRequest = serde_json::from_value(serde_json::json!({
        "session_id": session.id,
        "captured_images": {
            "305_1200": { "focus": 305, "exposure": 1200,
                          "image_filename": "group_a.png", "rois": [1, 2] },
            "310_900":  { "focus": 310, "exposure": 900,
                          "image_filename": "group_b.png", "rois": [3] }
        }
    }))
    .unwrap();

    let response = orchestrator.inspect_grouped(request).await.unwrap();
    assert!(response.overall_result.passed);
    assert_eq!(response.overall_result.total_rois, 3);
    let ids: Vec<u32> = response.roi_results.iter().map(|r| r.roi_id).collect();
    assert_eq!(ids, [1, 2, 3]);
}

#[tokio::test]
async fn grouped_inspection_rejects_unknown_roi_index() {
    let fixture = fixture(&serde_json::json!([
        simple_color_roi(1, [0, 0, 50, 50], 305, 1200, [255, 0, 0]),
    ]));
    let orchestrator = orchestrator_with(&fixture, Capabilities::builtin());
    let session = fixture.sessions.create("widget", None).unwrap();
    RgbImage::from_pixel(50, 50, Rgb([255, 0, 0]))
        .save(session.input_dir().join("a.png"))
        .unwrap();

    let request: GroupedInspectRequest = serde_json::from_value(serde_json::json!({
        "session_id": session.id,
        "captured_images": {
            "g": { "focus": 305, "exposure": 1200, "image_filename": "a.png", "rois": [1, 99] }
        }
    }))
    .unwrap();

    let result = orchestrator.inspect_grouped(request).await;
    assert!(matches!(result, Err(AoiError::ConfigInvalid { .. })));
}

#[tokio::test]
async fn expired_deadline_returns_partial_timeout_results() {
    let fixture = fixture(&serde_json::json!([
        simple_color_roi(1, [0, 0, 50, 50], 0, 0, [255, 0, 0]),
        simple_color_roi(2, [0, 0, 50, 50], 0, 0, [255, 0, 0]),
    ]));
    // A deadline that is already unreachable when the tasks are collected.
    let mut settings = (*fixture.settings).clone();
    settings.inspection_deadline = Some(Duration::ZERO);
    let orchestrator = Orchestrator::new(
        Arc::new(settings),
        fixture.sessions.clone(),
        fixture.store.clone(),
        Capabilities::builtin(),
        Arc::new(DisabledLinker) as Arc<dyn BarcodeLinker>,
    );

    let session = fixture.sessions.create("widget", None).unwrap();
    RgbImage::from_pixel(50, 50, Rgb([255, 0, 0]))
        .save(session.input_dir().join("a.png"))
        .unwrap();

    let request = InspectRequest {
        source: serde_json::from_value(serde_json::json!({ "image_filename": "a.png" })).unwrap(),
        device_barcodes: None,
        device_barcode: None,
    };
    let response = orchestrator.inspect(session.id, request).await.unwrap();

    // Partial results come back; the overall verdict cannot pass.
    assert!(!response.overall_result.passed);
    assert_eq!(response.roi_results.len(), 2);
    for record in &response.roi_results {
        if !record.passed && record.error.is_some() {
            assert!(record.error.as_deref().unwrap().contains("deadline"));
        }
    }
}

#[tokio::test]
async fn passing_alternate_is_promoted_during_inspection() {
    let fixture = fixture(&serde_json::json!([
        { "idx": 7, "type": 2, "coords": [0, 0, 50, 50], "device_location": 1,
          "ai_threshold": 0.9, "feature_method": "opencv" }
    ]));

    // Golden library: a best that no longer matches and an alternate that
    // does. The scripted extractor keys off region brightness.
    let golden_dir = fixture.store.roi_dir("widget", 7);
    std::fs::create_dir_all(&golden_dir).unwrap();
    RgbImage::from_pixel(50, 50, Rgb([10, 10, 10]))
        .save(golden_dir.join("best_golden.jpg"))
        .unwrap();
    RgbImage::from_pixel(50, 50, Rgb([60, 60, 60]))
        .save(golden_dir.join("1700000000_golden_sample.jpg"))
        .unwrap();

    let extractor = KeyedExtractor::new(
        "opencv",
        HashMap::from([
            (200, vec![1.0, 0.0]),
            (10, vec![0.0, 1.0]),
            (60, vec![1.0, 0.0]),
        ]),
    );
    let capabilities = Capabilities::builtin().with_extractor(Arc::new(extractor));
    let orchestrator = orchestrator_with(&fixture, capabilities);

    let session = fixture.sessions.create("widget", None).unwrap();
    RgbImage::from_pixel(50, 50, Rgb([200, 200, 200]))
        .save(session.input_dir().join("a.png"))
        .unwrap();

    let request = InspectRequest {
        source: serde_json::from_value(serde_json::json!({ "image_filename": "a.png" })).unwrap(),
        device_barcodes: None,
        device_barcode: None,
    };
    let response = orchestrator.inspect(session.id, request).await.unwrap();
    assert!(response.overall_result.passed);

    // The alternate now owns the best slot, the former best is backed up.
    let samples = fixture.store.list("widget", 7).unwrap();
    assert_eq!(samples.len(), 2);
    let best = samples.iter().find(|s| s.role == SampleRole::Best).unwrap();
    let pixel = image::open(&best.path).unwrap().to_rgb8().get_pixel(0, 0).0[0];
    assert!(u8::abs_diff(pixel, 60) <= 8, "best slot holds wrong image: {pixel}");
    assert_eq!(
        samples.iter().filter(|s| s.role == SampleRole::Backup).count(),
        1
    );
}
