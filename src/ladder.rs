//! Barcode resolution ladder.
//!
//! After all ROI tasks for a device have terminated, the device's canonical
//! `barcode` field is chosen by the first applicable rule:
//!
//! | Priority | Source |
//! |----------|--------|
//! | P0 | a Barcode ROI of the device with `is_device_barcode=true` and decoded values |
//! | P1 | any Barcode ROI of the device with decoded values |
//! | P2 | the caller-supplied per-device mapping |
//! | P3 | the caller-supplied singular legacy value |
//! | P4 | the literal `"N/A"` |
//!
//! Values selected at P0-P3 are offered to the linking service; P4 never is.
//! Selection is a pure function; linking is the only async step and runs as
//! a single terminal pass after ROI fan-in. Nothing else writes the
//! device's barcode.

use crate::linking::BarcodeLinker;

/// Barcode ROI evidence for one device, in ascending `idx` order.
#[derive(Debug, Clone)]
pub struct BarcodeEvidence {
    pub roi_idx: u32,
    pub is_device_barcode: bool,
    pub values: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    P0,
    P1,
    P2,
    P3,
    P4,
}

impl Priority {
    pub fn label(&self) -> &'static str {
        match self {
            Self::P0 => "P0",
            Self::P1 => "P1",
            Self::P2 => "P2",
            Self::P3 => "P3",
            Self::P4 => "P4",
        }
    }
}

/// Outcome of the selection step, before linking.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub priority: Priority,
    /// The selected raw value; absent only at P4.
    pub raw: Option<String>,
}

/// Applies the five-priority rule for one device.
///
/// `evidence` must be ordered by ROI `idx`; the decoding step returns lists,
/// so the first element is extracted here and a collection never crosses
/// the linking boundary.
pub fn select_raw(
    evidence: &[BarcodeEvidence],
    per_device: Option<&str>,
    singular: Option<&str>,
) -> Selection {
    if let Some(hit) = evidence
        .iter()
        .find(|e| e.is_device_barcode && !e.values.is_empty())
    {
        return Selection {
            priority: Priority::P0,
            raw: hit.values.first().cloned(),
        };
    }
    if let Some(hit) = evidence.iter().find(|e| !e.values.is_empty()) {
        return Selection {
            priority: Priority::P1,
            raw: hit.values.first().cloned(),
        };
    }
    if let Some(value) = per_device.filter(|v| !v.is_empty()) {
        return Selection {
            priority: Priority::P2,
            raw: Some(value.to_string()),
        };
    }
    if let Some(value) = singular.filter(|v| !v.is_empty()) {
        return Selection {
            priority: Priority::P3,
            raw: Some(value.to_string()),
        };
    }
    Selection {
        priority: Priority::P4,
        raw: None,
    }
}

/// Resolves a selection into the final canonical barcode, consulting the
/// linker for P0-P3.
pub async fn resolve_barcode(
    device: u32,
    selection: &Selection,
    linker: &dyn BarcodeLinker,
) -> String {
    let label = selection.priority.label();
    let Some(raw) = selection.raw.as_deref() else {
        tracing::info!("device {device}: [{label}] N/A (linking not applied)");
        return "N/A".to_string();
    };
    match linker.link(raw).await {
        Some(linked) => {
            tracing::info!("device {device}: [{label}] {raw} -> {linked}");
            linked
        }
        None => {
            tracing::info!("device {device}: [{label}] {raw} (linking not applied)");
            raw.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::mock::ScriptedLinker;
    use std::collections::HashMap;

    fn evidence(roi_idx: u32, is_device_barcode: bool, values: &[&str]) -> BarcodeEvidence {
        BarcodeEvidence {
            roi_idx,
            is_device_barcode,
            values: values.iter().map(|v| v.to_string()).collect(),
        }
    }

    #[test]
    fn designated_roi_beats_other_sources() {
        let selection = select_raw(
            &[
                evidence(5, false, &["XYZ"]),
                evidence(7, true, &["2907912062542P1087"]),
            ],
            Some("from-map"),
            Some("from-scalar"),
        );
        assert_eq!(selection.priority, Priority::P0);
        assert_eq!(selection.raw.as_deref(), Some("2907912062542P1087"));
    }

    #[test]
    fn designated_roi_with_empty_values_is_skipped() {
        let selection = select_raw(
            &[evidence(5, true, &[]), evidence(7, false, &["XYZ"])],
            None,
            None,
        );
        assert_eq!(selection.priority, Priority::P1);
        assert_eq!(selection.raw.as_deref(), Some("XYZ"));
    }

    #[test]
    fn caller_map_applies_when_no_roi_decoded() {
        let selection = select_raw(&[evidence(5, false, &[])], Some("MAPPED"), Some("SCALAR"));
        assert_eq!(selection.priority, Priority::P2);
        assert_eq!(selection.raw.as_deref(), Some("MAPPED"));
    }

    #[test]
    fn scalar_fallback_then_na() {
        let selection = select_raw(&[], None, Some("SCALAR"));
        assert_eq!(selection.priority, Priority::P3);

        let terminal = select_raw(&[], None, None);
        assert_eq!(terminal.priority, Priority::P4);
        assert_eq!(terminal.raw, None);
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn linking_rewrites_selected_value() {
        let linker = ScriptedLinker::new(HashMap::from([(
            "2907912062542P1087".to_string(),
            "\"20004157-0003285-1022823-101\"".to_string(),
        )]));
        let selection = select_raw(&[evidence(7, true, &["2907912062542P1087"])], None, None);
        let resolved = resolve_barcode(1, &selection, &*linker).await;
        assert_eq!(resolved, "20004157-0003285-1022823-101");
        assert_eq!(linker.calls(), vec!["2907912062542P1087"]);
        assert!(logs_contain(
            "[P0] 2907912062542P1087 -> 20004157-0003285-1022823-101"
        ));
    }

    #[tokio::test]
    async fn null_link_response_keeps_raw_value() {
        let linker = ScriptedLinker::new(HashMap::from([
            ("A".to_string(), "null".to_string()),
            ("B".to_string(), "\"\"".to_string()),
        ]));
        let a = select_raw(&[evidence(1, true, &["A"])], None, None);
        assert_eq!(resolve_barcode(1, &a, &*linker).await, "A");
        let b = select_raw(&[evidence(1, true, &["B"])], None, None);
        assert_eq!(resolve_barcode(1, &b, &*linker).await, "B");
    }

    #[tokio::test]
    async fn terminal_na_never_links() {
        let linker = ScriptedLinker::new(HashMap::new());
        let selection = select_raw(&[evidence(1, false, &[])], None, None);
        assert_eq!(resolve_barcode(2, &selection, &*linker).await, "N/A");
        assert!(linker.calls().is_empty());
    }
}
