//! Inspection orchestration.
//!
//! Drives a single inspection from request to aggregated response:
//!
//! 1. resolve the session and load the product configuration,
//! 2. decode one frame per capture group,
//! 3. fan the group's ROIs out over a bounded worker pool,
//! 4. fan in, order results by `idx`, and run the barcode resolution ladder
//!    once per device as the single terminal writer of `barcode`,
//! 5. assemble per-device and overall verdicts with client-projected paths.
//!
//! A single ROI failure never sinks the inspection; a deadline expiry
//! cancels outstanding tasks cooperatively and returns partial results with
//! `overall_result.passed = false`.

use crate::capability::Capabilities;
use crate::config::Settings;
use crate::error::{AoiError, AppResult};
use crate::executor::{self, ExecContext, RoiOutcome, RoiPayload};
use crate::golden::GoldenStore;
use crate::imaging::{self, ImageSource};
use crate::ladder::{self, BarcodeEvidence};
use crate::linking::BarcodeLinker;
use crate::paths::PathProjector;
use crate::product::{self, ProductConfig};
use crate::roi::{Roi, RoiType};
use crate::session::SessionManager;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use uuid::Uuid;

// ============================================================================
// Request types
// ============================================================================

/// Caller-supplied per-device barcodes; accepts both the mapping form
/// (`{"1": "CODE"}`) and the list form (`[{"device_id": 1, "barcode": "CODE"}]`).
#[derive(Debug, Clone, Default)]
pub struct DeviceBarcodes(pub HashMap<u32, String>);

impl<'de> Deserialize<'de> for DeviceBarcodes {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Wire {
            Map(HashMap<String, String>),
            List(Vec<Entry>),
        }
        #[derive(Deserialize)]
        struct Entry {
            device_id: serde_json::Value,
            barcode: String,
        }

        fn parse_device_id<E: serde::de::Error>(value: &serde_json::Value) -> Result<u32, E> {
            match value {
                serde_json::Value::Number(n) => n
                    .as_u64()
                    .and_then(|n| u32::try_from(n).ok())
                    .ok_or_else(|| E::custom(format!("invalid device_id {n}"))),
                serde_json::Value::String(s) => s
                    .parse()
                    .map_err(|_| E::custom(format!("invalid device_id '{s}'"))),
                other => Err(E::custom(format!("invalid device_id {other}"))),
            }
        }

        let mut map = HashMap::new();
        match Wire::deserialize(deserializer)? {
            Wire::Map(entries) => {
                for (key, barcode) in entries {
                    let device: u32 = key.parse().map_err(|_| {
                        serde::de::Error::custom(format!("invalid device key '{key}'"))
                    })?;
                    map.insert(device, barcode);
                }
            }
            Wire::List(entries) => {
                for entry in entries {
                    map.insert(parse_device_id(&entry.device_id)?, entry.barcode);
                }
            }
        }
        Ok(Self(map))
    }
}

/// Single-image inspection request.
#[derive(Debug, Default, Deserialize)]
pub struct InspectRequest {
    #[serde(flatten)]
    pub source: ImageSource,
    #[serde(default)]
    pub device_barcodes: Option<DeviceBarcodes>,
    #[serde(default)]
    pub device_barcode: Option<String>,
}

/// One capture group of a grouped inspection request.
#[derive(Debug, Deserialize)]
pub struct CapturedGroup {
    pub focus: u32,
    pub exposure: u32,
    #[serde(flatten)]
    pub source: ImageSource,
    pub rois: Vec<u32>,
}

/// Grouped (pre-grouped by the client) inspection request.
#[derive(Debug, Deserialize)]
pub struct GroupedInspectRequest {
    pub session_id: Uuid,
    #[serde(default)]
    pub device_barcodes: Option<DeviceBarcodes>,
    #[serde(default)]
    pub device_barcode: Option<String>,
    pub captured_images: HashMap<String, CapturedGroup>,
}

// ============================================================================
// Response types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct OverallResult {
    pub passed: bool,
    pub total_rois: usize,
    pub passed_rois: usize,
    pub failed_rois: usize,
}

#[derive(Debug, Serialize)]
pub struct DeviceSummary {
    pub device_id: u32,
    pub barcode: String,
    pub device_passed: bool,
    pub passed_rois: usize,
    pub total_rois: usize,
}

/// Type-specific payload of one ROI result, flattened into the record.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum PayloadRecord {
    Barcode {
        barcode_values: Vec<String>,
    },
    Compare {
        ai_similarity: f64,
        threshold: f64,
        match_result: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        golden_image_path: Option<String>,
    },
    Ocr {
        ocr_text: String,
    },
    Color {
        detected_color: String,
        dominant_color: [u8; 3],
        match_percentage: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        match_percentage_raw: Option<f64>,
    },
    Empty {},
}

#[derive(Debug, Serialize)]
pub struct RoiResultRecord {
    pub roi_id: u32,
    pub device_id: u32,
    pub roi_type_name: String,
    pub passed: bool,
    pub coordinates: [u32; 4],
    #[serde(flatten)]
    pub payload: PayloadRecord,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roi_image_path: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct InspectionResponse {
    pub overall_result: OverallResult,
    pub device_summaries: BTreeMap<u32, DeviceSummary>,
    pub roi_results: Vec<RoiResultRecord>,
    /// Seconds.
    pub processing_time: f64,
}

// ============================================================================
// Orchestrator
// ============================================================================

pub struct Orchestrator {
    settings: Arc<Settings>,
    sessions: Arc<SessionManager>,
    store: Arc<GoldenStore>,
    capabilities: Capabilities,
    linker: Arc<dyn BarcodeLinker>,
    projector: PathProjector,
}

impl Orchestrator {
    pub fn new(
        settings: Arc<Settings>,
        sessions: Arc<SessionManager>,
        store: Arc<GoldenStore>,
        capabilities: Capabilities,
        linker: Arc<dyn BarcodeLinker>,
    ) -> Self {
        let projector = PathProjector::new(&settings.shared_root, &settings.client_mount_prefix);
        Self {
            settings,
            sessions,
            store,
            capabilities,
            linker,
            projector,
        }
    }

    /// Single-image inspection: one decoded frame shared by every ROI of the
    /// product.
    pub async fn inspect(
        &self,
        session_id: Uuid,
        request: InspectRequest,
    ) -> AppResult<InspectionResponse> {
        let started = Instant::now();
        let guard = self.sessions.begin_inspection(session_id)?;
        let session = guard.session().clone();
        let product = product::load_product(&self.settings.products_root, &session.product_id)?;
        let deadline = self.deadline();

        let frame = imaging::resolve_image_source(&request.source, &session.input_dir())?;
        log_source(session_id, &frame);
        let frame = Arc::new(frame.image);

        let groups = group_by_capture(&product.rois);
        tracing::debug!(
            session = %session_id,
            groups = groups.len(),
            rois = product.rois.len(),
            "single-image inspection covers all capture groups with one frame"
        );

        let outcomes = self
            .run_rois(
                product.rois.clone(),
                frame,
                &session.product_id,
                session.output_dir(),
                deadline,
            )
            .await;

        self.assemble(outcomes, &request.device_barcodes, request.device_barcode.as_deref(), started)
            .await
    }

    /// Grouped inspection: the client supplies one image source per capture
    /// group plus the ROI indices it covers. The client's grouping wins; a
    /// divergence from the server-computed grouping is logged.
    pub async fn inspect_grouped(
        &self,
        request: GroupedInspectRequest,
    ) -> AppResult<InspectionResponse> {
        let started = Instant::now();
        let guard = self.sessions.begin_inspection(request.session_id)?;
        let session = guard.session().clone();
        let product = product::load_product(&self.settings.products_root, &session.product_id)?;
        let deadline = self.deadline();

        // Deterministic group order regardless of map iteration.
        let mut group_keys: Vec<&String> = request.captured_images.keys().collect();
        group_keys.sort();

        let mut outcomes = Vec::new();
        for key in group_keys {
            let group = &request.captured_images[key];
            let rois = select_group_rois(&product, group, key)?;
            let frame = imaging::resolve_image_source(&group.source, &session.input_dir())?;
            log_source(request.session_id, &frame);
            let frame = Arc::new(frame.image);

            outcomes.extend(
                self.run_rois(
                    rois,
                    frame,
                    &session.product_id,
                    session.output_dir(),
                    deadline,
                )
                .await,
            );
        }
        outcomes.sort_by_key(|o| o.roi.idx);

        self.assemble(outcomes, &request.device_barcodes, request.device_barcode.as_deref(), started)
            .await
    }

    fn deadline(&self) -> Option<tokio::time::Instant> {
        self.settings
            .inspection_deadline
            .map(|d| tokio::time::Instant::now() + d)
    }

    /// Fans one group's ROIs out over a bounded worker pool and fans back in
    /// with stable `idx` ordering. Outstanding tasks past the deadline are
    /// aborted and reported as timeouts; completed results are retained.
    async fn run_rois(
        &self,
        rois: Vec<Roi>,
        frame: Arc<RgbImage>,
        product_id: &str,
        output_dir: PathBuf,
        deadline: Option<tokio::time::Instant>,
    ) -> Vec<RoiOutcome> {
        if rois.is_empty() {
            return Vec::new();
        }
        let workers = rois.len().min(self.settings.worker_pool()).max(1);
        let semaphore = Arc::new(Semaphore::new(workers));

        let mut handles = Vec::with_capacity(rois.len());
        for roi in rois {
            let semaphore = semaphore.clone();
            let frame = frame.clone();
            let product_id = product_id.to_string();
            let output_dir = output_dir.clone();
            let capabilities = self.capabilities.clone();
            let store = self.store.clone();
            let fallback = roi.clone();

            let handle = tokio::spawn(async move {
                // A closed semaphore cannot happen here; treat it as a task
                // failure rather than unwinding.
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return RoiOutcome::failed(roi, "worker pool unavailable");
                    }
                };
                let ctx = ExecContext {
                    product_id: product_id.as_str(),
                    output_dir: output_dir.as_path(),
                    capabilities: &capabilities,
                    store: store.as_ref(),
                };
                executor::execute_roi(roi, frame, ctx).await
            });
            handles.push((fallback, handle));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for (roi, handle) in handles {
            let abort = handle.abort_handle();
            let joined = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, handle).await {
                    Ok(joined) => joined,
                    Err(_) => {
                        abort.abort();
                        tracing::warn!(roi = roi.idx, "ROI task cancelled at deadline");
                        let outcome = RoiOutcome::failed(roi, AoiError::Timeout.to_string());
                        outcomes.push(outcome);
                        continue;
                    }
                },
                None => handle.await,
            };
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(err) => {
                    tracing::error!(roi = roi.idx, error = %err, "ROI task aborted");
                    outcomes.push(RoiOutcome::failed(roi, format!("task aborted: {err}")));
                }
            }
        }
        outcomes.sort_by_key(|o| o.roi.idx);
        outcomes
    }

    /// Terminal fan-in: device grouping, the barcode ladder (the only writer
    /// of `device_summaries[d].barcode`), verdict aggregation and path
    /// projection.
    async fn assemble(
        &self,
        outcomes: Vec<RoiOutcome>,
        device_barcodes: &Option<DeviceBarcodes>,
        device_barcode: Option<&str>,
        started: Instant,
    ) -> AppResult<InspectionResponse> {
        let per_device_map = device_barcodes.as_ref().map(|d| &d.0);

        let mut devices: BTreeMap<u32, Vec<&RoiOutcome>> = BTreeMap::new();
        for outcome in &outcomes {
            devices
                .entry(outcome.roi.device_location)
                .or_default()
                .push(outcome);
        }

        // One linking pass per device, concurrently; devices are independent
        // and nothing else writes the barcode field.
        let resolutions = futures::future::join_all(devices.iter().map(
            |(device, device_outcomes)| {
                let evidence: Vec<BarcodeEvidence> = device_outcomes
                    .iter()
                    .filter(|o| o.roi.roi_type == RoiType::Barcode)
                    .map(|o| BarcodeEvidence {
                        roi_idx: o.roi.idx,
                        is_device_barcode: o.roi.is_device_barcode.unwrap_or(false),
                        values: match &o.payload {
                            RoiPayload::Barcode { barcode_values } => barcode_values.clone(),
                            _ => Vec::new(),
                        },
                    })
                    .collect();
                let per_device = per_device_map
                    .and_then(|m| m.get(device))
                    .map(String::as_str);
                let selection = ladder::select_raw(&evidence, per_device, device_barcode);
                async move {
                    let barcode =
                        ladder::resolve_barcode(*device, &selection, self.linker.as_ref()).await;
                    (*device, barcode)
                }
            },
        ))
        .await;

        let mut device_summaries = BTreeMap::new();
        for (device, barcode) in resolutions {
            let device_outcomes = &devices[&device];
            let passed_rois = device_outcomes.iter().filter(|o| o.passed).count();
            device_summaries.insert(
                device,
                DeviceSummary {
                    device_id: device,
                    barcode,
                    device_passed: passed_rois == device_outcomes.len(),
                    passed_rois,
                    total_rois: device_outcomes.len(),
                },
            );
        }

        let total_rois = outcomes.len();
        let passed_rois = outcomes.iter().filter(|o| o.passed).count();
        let roi_results = outcomes
            .into_iter()
            .map(|o| self.record_of(o))
            .collect::<Vec<_>>();

        Ok(InspectionResponse {
            overall_result: OverallResult {
                passed: passed_rois == total_rois,
                total_rois,
                passed_rois,
                failed_rois: total_rois - passed_rois,
            },
            device_summaries,
            roi_results,
            processing_time: started.elapsed().as_secs_f64(),
        })
    }

    fn record_of(&self, outcome: RoiOutcome) -> RoiResultRecord {
        let payload = match outcome.payload {
            RoiPayload::Barcode { barcode_values } => PayloadRecord::Barcode { barcode_values },
            RoiPayload::Compare {
                ai_similarity,
                threshold,
                match_result,
                golden_image_path,
            } => PayloadRecord::Compare {
                ai_similarity,
                threshold,
                match_result,
                golden_image_path: golden_image_path.map(|p| self.projector.project(&p)),
            },
            RoiPayload::Ocr { ocr_text } => PayloadRecord::Ocr { ocr_text },
            RoiPayload::Color {
                detected_color,
                dominant_color,
                match_percentage,
                match_percentage_raw,
            } => PayloadRecord::Color {
                detected_color,
                dominant_color,
                match_percentage,
                match_percentage_raw,
            },
            RoiPayload::Empty => PayloadRecord::Empty {},
        };
        RoiResultRecord {
            roi_id: outcome.roi.idx,
            device_id: outcome.roi.device_location,
            roi_type_name: outcome.roi.roi_type.name().to_string(),
            passed: outcome.passed,
            coordinates: outcome.roi.coords.as_array(),
            payload,
            error: outcome.error,
            roi_image_path: outcome.roi_image_path.map(|p| self.projector.project(&p)),
        }
    }
}

/// Server-side capture grouping of a product's ROIs.
pub fn group_by_capture(rois: &[Roi]) -> BTreeMap<(u32, u32), Vec<u32>> {
    let mut groups: BTreeMap<(u32, u32), Vec<u32>> = BTreeMap::new();
    for roi in rois {
        groups.entry(roi.capture_group()).or_default().push(roi.idx);
    }
    groups
}

fn select_group_rois(
    product: &ProductConfig,
    group: &CapturedGroup,
    key: &str,
) -> AppResult<Vec<Roi>> {
    let mut rois = Vec::with_capacity(group.rois.len());
    for idx in &group.rois {
        let roi = product.roi_by_idx(*idx).ok_or_else(|| {
            AoiError::config_invalid(
                format!("captured_images['{key}']"),
                format!("ROI idx {idx} not present in product '{}'", product.product_id),
            )
        })?;
        if roi.capture_group() != (group.focus, group.exposure) {
            // The client's grouping wins; the divergence is only surfaced.
            tracing::warn!(
                roi = roi.idx,
                client_group = ?(group.focus, group.exposure),
                server_group = ?roi.capture_group(),
                "client grouping diverges from ROI capture settings"
            );
        }
        rois.push(roi.clone());
    }
    Ok(rois)
}

fn log_source(session_id: Uuid, frame: &imaging::ResolvedFrame) {
    if frame.kind.is_degraded() {
        tracing::warn!(
            session = %session_id,
            origin = %frame.origin,
            "inspection running from inline payload (degraded source)"
        );
    } else {
        tracing::debug!(session = %session_id, origin = %frame.origin, "frame resolved");
    }
}
