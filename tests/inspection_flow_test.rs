//! End-to-end inspection flow against mock capabilities.

use image::{Rgb, RgbImage};
use std::collections::HashMap;
use std::sync::Arc;
use tempfile::TempDir;
use visual_aoi::capability::mock::{FixedTextRecognizer, KeyedBarcodeDecoder, ScriptedLinker};
use visual_aoi::capability::Capabilities;
use visual_aoi::config::Settings;
use visual_aoi::golden::GoldenStore;
use visual_aoi::linking::BarcodeLinker;
use visual_aoi::orchestrator::{InspectRequest, Orchestrator};
use visual_aoi::session::SessionManager;

struct Fixture {
    _tmp: TempDir,
    settings: Arc<Settings>,
    sessions: Arc<SessionManager>,
    linker: Arc<ScriptedLinker>,
    orchestrator: Orchestrator,
}

/// Five-ROI product: two barcodes and a compare on device 1, OCR and color
/// on device 2. Regions are solid colors so the keyed mocks can script
/// per-ROI behavior.
fn fixture() -> Fixture {
    let tmp = TempDir::new().unwrap();
    let shared_root = tmp.path().join("shared");
    let products_root = tmp.path().join("products");
    std::fs::create_dir_all(shared_root.join("sessions")).unwrap();

    let product_dir = products_root.join("widget");
    std::fs::create_dir_all(&product_dir).unwrap();
    let rois = serde_json::json!([
        { "idx": 1, "type": 1, "coords": [0, 0, 50, 50], "device_location": 1,
          "is_device_barcode": false },
        { "idx": 2, "type": 1, "coords": [50, 0, 100, 50], "device_location": 1,
          "is_device_barcode": true },
        { "idx": 3, "type": 2, "coords": [100, 0, 150, 50], "device_location": 1,
          "ai_threshold": 0.9, "feature_method": "opencv" },
        { "idx": 4, "type": 3, "coords": [150, 0, 200, 50], "device_location": 2,
          "expected_text": "OK" },
        { "idx": 5, "type": 4, "coords": [0, 50, 100, 100], "device_location": 2,
          "color_config": { "expected_color": [255, 0, 0], "color_tolerance": 10,
                            "min_pixel_percentage": 25.0 } }
    ]);
    std::fs::write(
        product_dir.join("rois_config_widget.json"),
        serde_json::to_string_pretty(&rois).unwrap(),
    )
    .unwrap();

    // Golden library for the compare ROI: one best, identical to the capture
    // region (solid gray 140).
    let golden_dir = product_dir.join("golden_rois/roi_3");
    std::fs::create_dir_all(&golden_dir).unwrap();
    RgbImage::from_pixel(50, 50, Rgb([140, 140, 140]))
        .save(golden_dir.join("best_golden.jpg"))
        .unwrap();

    let settings = Arc::new(Settings::for_roots(&shared_root, &products_root));
    let sessions = Arc::new(SessionManager::new(
        settings.sessions_root(),
        settings.session_ttl,
    ));
    let store = Arc::new(GoldenStore::new(products_root.clone()));

    let capabilities = Capabilities::builtin()
        .with_barcode(Arc::new(KeyedBarcodeDecoder::new(HashMap::from([
            (100, vec!["XYZ".to_string()]),
            (120, vec!["2907912062542P1087".to_string()]),
        ]))))
        .with_ocr(Arc::new(FixedTextRecognizer::new("OK GO")));

    let linker = ScriptedLinker::new(HashMap::from([(
        "2907912062542P1087".to_string(),
        "\"20004157-0003285-1022823-101\"".to_string(),
    )]));

    let orchestrator = Orchestrator::new(
        settings.clone(),
        sessions.clone(),
        store,
        capabilities,
        linker.clone() as Arc<dyn BarcodeLinker>,
    );

    Fixture {
        _tmp: tmp,
        settings,
        sessions,
        linker,
        orchestrator,
    }
}

/// 200x100 frame painting each ROI region its scripted key color.
fn frame() -> RgbImage {
    RgbImage::from_fn(200, 100, |x, y| {
        if y < 50 {
            match x {
                0..=49 => Rgb([100, 100, 100]),
                50..=99 => Rgb([120, 120, 120]),
                100..=149 => Rgb([140, 140, 140]),
                _ => Rgb([220, 220, 220]),
            }
        } else if x < 100 {
            Rgb([255, 0, 0])
        } else {
            Rgb([0, 0, 0])
        }
    })
}

fn write_capture(session: &visual_aoi::session::Session) {
    frame()
        .save(session.input_dir().join("capture.png"))
        .unwrap();
}

#[tokio::test]
async fn happy_path_inspection_passes_all_rois() {
    let fixture = fixture();
    let session = fixture.sessions.create("widget", None).unwrap();
    write_capture(&session);

    let request = InspectRequest {
        source: serde_json::from_value(serde_json::json!({ "image_filename": "capture.png" }))
            .unwrap(),
        device_barcodes: None,
        device_barcode: None,
    };
    let response = fixture.orchestrator.inspect(session.id, request).await.unwrap();

    assert!(response.overall_result.passed);
    assert_eq!(response.overall_result.total_rois, 5);
    assert_eq!(response.overall_result.passed_rois, 5);
    assert_eq!(response.overall_result.failed_rois, 0);

    // Stable ordering by idx regardless of completion order.
    let ids: Vec<u32> = response.roi_results.iter().map(|r| r.roi_id).collect();
    assert_eq!(ids, [1, 2, 3, 4, 5]);

    assert!(response.processing_time >= 0.0);
}

#[tokio::test]
async fn device_barcode_ladder_links_designated_roi_only() {
    let fixture = fixture();
    let session = fixture.sessions.create("widget", None).unwrap();
    write_capture(&session);

    let request = InspectRequest {
        source: serde_json::from_value(serde_json::json!({ "image_filename": "capture.png" }))
            .unwrap(),
        device_barcodes: None,
        device_barcode: None,
    };
    let response = fixture.orchestrator.inspect(session.id, request).await.unwrap();

    // Device 1: the designated ROI (idx 2) wins and is linked.
    let device1 = &response.device_summaries[&1];
    assert_eq!(device1.barcode, "20004157-0003285-1022823-101");
    assert!(device1.device_passed);
    assert_eq!(device1.total_rois, 3);

    // Only the selected value crossed the linking boundary.
    assert_eq!(fixture.linker.calls(), vec!["2907912062542P1087"]);

    // The non-designated ROI still carries its raw decode for audit.
    let roi1 = response.roi_results.iter().find(|r| r.roi_id == 1).unwrap();
    let serialized = serde_json::to_value(roi1).unwrap();
    assert_eq!(
        serialized["barcode_values"],
        serde_json::json!(["XYZ"])
    );

    // Device 2 has no barcode source at all.
    assert_eq!(response.device_summaries[&2].barcode, "N/A");
}

#[tokio::test]
async fn response_paths_are_client_projected() {
    let fixture = fixture();
    let session = fixture.sessions.create("widget", None).unwrap();
    write_capture(&session);

    let request = InspectRequest {
        source: serde_json::from_value(serde_json::json!({ "image_filename": "capture.png" }))
            .unwrap(),
        device_barcodes: None,
        device_barcode: None,
    };
    let response = fixture.orchestrator.inspect(session.id, request).await.unwrap();

    for record in &response.roi_results {
        let path = record.roi_image_path.as_deref().unwrap();
        assert!(
            path.starts_with("/mnt/visual-aoi-shared/sessions/"),
            "unprojected path: {path}"
        );
        assert!(path.ends_with(&format!("roi_{}.jpg", record.roi_id)));
    }

    // The compare ROI also published its golden counterpart.
    let compare = response.roi_results.iter().find(|r| r.roi_id == 3).unwrap();
    let value = serde_json::to_value(compare).unwrap();
    assert_eq!(value["match_result"], "Match");
    let golden_path = value["golden_image_path"].as_str().unwrap();
    assert!(golden_path.starts_with("/mnt/visual-aoi-shared/sessions/"));
    assert!(golden_path.ends_with("golden_3.jpg"));

    // Server-side artifacts exist under the session output directory.
    assert!(session.output_dir().join("roi_3.jpg").is_file());
    assert!(session.output_dir().join("golden_3.jpg").is_file());
}

#[tokio::test]
async fn ocr_result_is_tagged() {
    let fixture = fixture();
    let session = fixture.sessions.create("widget", None).unwrap();
    write_capture(&session);

    let request = InspectRequest {
        source: serde_json::from_value(serde_json::json!({ "image_filename": "capture.png" }))
            .unwrap(),
        device_barcodes: None,
        device_barcode: None,
    };
    let response = fixture.orchestrator.inspect(session.id, request).await.unwrap();

    let ocr = response.roi_results.iter().find(|r| r.roi_id == 4).unwrap();
    let value = serde_json::to_value(ocr).unwrap();
    assert_eq!(value["ocr_text"], "OK GO [PASS: Contains 'OK']");
    assert!(ocr.passed);
}

#[tokio::test]
async fn caller_supplied_barcodes_fill_unresolved_devices() {
    let fixture = fixture();
    let session = fixture.sessions.create("widget", None).unwrap();
    write_capture(&session);

    // Device 2 has no barcode ROI; the caller mapping resolves it at P2.
    let request = InspectRequest {
        source: serde_json::from_value(serde_json::json!({ "image_filename": "capture.png" }))
            .unwrap(),
        device_barcodes: Some(
            serde_json::from_value(serde_json::json!({ "2": "CALLER-0002" })).unwrap(),
        ),
        device_barcode: None,
    };
    let response = fixture.orchestrator.inspect(session.id, request).await.unwrap();

    // The linker has no entry for the caller value: fallback to verbatim.
    assert_eq!(response.device_summaries[&2].barcode, "CALLER-0002");
    // Device 1 still resolves from its designated ROI.
    assert_eq!(
        response.device_summaries[&1].barcode,
        "20004157-0003285-1022823-101"
    );
}

#[tokio::test]
async fn single_roi_failure_keeps_inspection_alive() {
    let fixture = fixture();

    // Remove the golden library: the compare ROI must fail, others pass.
    let golden_dir = fixture
        .settings
        .products_root
        .join("widget/golden_rois/roi_3");
    std::fs::remove_dir_all(&golden_dir).unwrap();

    let session = fixture.sessions.create("widget", None).unwrap();
    write_capture(&session);

    let request = InspectRequest {
        source: serde_json::from_value(serde_json::json!({ "image_filename": "capture.png" }))
            .unwrap(),
        device_barcodes: None,
        device_barcode: None,
    };
    let response = fixture.orchestrator.inspect(session.id, request).await.unwrap();

    assert!(!response.overall_result.passed);
    assert_eq!(response.overall_result.total_rois, 5);
    assert_eq!(response.overall_result.passed_rois, 4);
    assert_eq!(response.overall_result.failed_rois, 1);

    let compare = response.roi_results.iter().find(|r| r.roi_id == 3).unwrap();
    assert!(!compare.passed);
    assert!(compare.error.as_deref().unwrap().contains("no golden samples"));

    // Device 1 fails (its compare ROI failed), device 2 still passes.
    assert!(!response.device_summaries[&1].device_passed);
    assert!(response.device_summaries[&2].device_passed);
}

#[tokio::test]
async fn unknown_session_is_refused() {
    let fixture = fixture();
    let request = InspectRequest {
        source: serde_json::from_value(serde_json::json!({ "image_filename": "capture.png" }))
            .unwrap(),
        device_barcodes: None,
        device_barcode: None,
    };
    let result = fixture
        .orchestrator
        .inspect(uuid::Uuid::new_v4(), request)
        .await;
    assert!(matches!(
        result,
        Err(visual_aoi::error::AoiError::SessionUnknown(_))
    ));
}
