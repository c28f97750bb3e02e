//! Matching of expected work items against extracted PO line items.
//!
//! Phase 1 pairs items by fuzzy serial number, accepting candidate pairs in
//! order of increasing price difference so each work item and each PO line
//! is used at most once. Phase 2 looks for the remaining work items in the
//! document text and pairs each one found with the closest-priced unused
//! PO line.

pub mod serial;

use std::collections::HashSet;

use tracing::{debug, info};

pub use serial::{normalize_serial, serial_variants, serials_match};

use crate::config::MatchingConfig;
use crate::models::{
    format_money, AnnotationStatus, LineAnnotation, MissingWorkItem, PoExtraction, PoLineItem, PriceMismatch,
    ValidationResult, ValidationStatus, WorkItem,
};

/// Absorbs binary rounding so a difference of exactly the tolerance passes
const TOLERANCE_EPSILON: f64 = 1e-9;

pub const UNVERIFIED_COMMENT: &str = "Not matched to a work item";

/// True for the outbound "order price update / request for PO" form, which
/// looks like a PO but is not one.
pub fn is_price_update_request(first_page_text: &str) -> bool {
    let text = first_page_text.to_lowercase();
    text.contains("order price update") && text.contains("request for po")
}

/// Result for a document recognised as a price-update request.
pub fn skipped_result() -> ValidationResult {
    ValidationResult::skipped("Document is an outbound price-update request, not a customer PO")
}

/// Result when the order has no work items to compare against.
pub fn no_work_items_result() -> ValidationResult {
    ValidationResult {
        status: ValidationStatus::ExtractionFailed,
        notes: "No work items found for this service order".to_string(),
        ..ValidationResult::default()
    }
}

/// One accepted (work item, PO line) pairing.
struct Pairing {
    wi_idx: usize,
    po_idx: usize,
    expected: f64,
    po_price: f64,
    serial_number: String,
}

#[derive(Debug, Clone)]
pub struct MatchingEngine {
    price_tolerance: f64,
    min_partial_serial_len: usize,
}

impl Default for MatchingEngine {
    fn default() -> Self {
        Self::new(&MatchingConfig::default())
    }
}

impl MatchingEngine {
    pub fn new(config: &MatchingConfig) -> Self {
        Self {
            price_tolerance: config.price_tolerance,
            min_partial_serial_len: config.min_partial_serial_len,
        }
    }

    /// Compare an extraction with the work items of its service order.
    pub fn validate(&self, extraction: &PoExtraction, work_items: &[WorkItem]) -> ValidationResult {
        if work_items.is_empty() {
            return no_work_items_result();
        }

        for wi in work_items {
            if let (Some(charge), Some(total)) = (wi.service_charge, wi.service_total) {
                if charge != total {
                    info!(
                        "Work item {} (S/N {}): service_charge=${:.2} != service_total=${:.2}",
                        wi.work_item_id,
                        wi.serial_number.as_deref().unwrap_or(""),
                        charge,
                        total
                    );
                }
            }
        }

        let base = ValidationResult {
            po_number: extraction.po_number.clone(),
            work_items_total: work_items.len(),
            extraction_method: extraction.extraction_method,
            confidence: extraction.confidence,
            ..ValidationResult::default()
        };

        if extraction.line_items.is_empty() {
            return ValidationResult {
                status: ValidationStatus::ExtractionFailed,
                notes: "No line items could be extracted from PO".to_string(),
                ..base
            };
        }

        if !extraction.has_any_price() {
            return ValidationResult {
                status: ValidationStatus::NoPricing,
                line_items_checked: extraction.line_items.len(),
                notes: "PO contains no pricing — acceptable per policy".to_string(),
                ..base
            };
        }

        let items = &extraction.line_items;
        let mut used_wi: HashSet<usize> = HashSet::new();
        let mut used_po: HashSet<usize> = HashSet::new();

        let mut pairings = self.match_by_serial(items, work_items, &mut used_wi, &mut used_po);
        pairings.extend(self.match_by_text(extraction, work_items, &mut used_wi, &mut used_po));
        debug!("Accepted {} pairings", pairings.len());

        let mut mismatches = Vec::new();
        let mut annotations = Vec::new();
        let mut matched = 0;

        for pairing in &pairings {
            let po_item = &items[pairing.po_idx];
            let wi = &work_items[pairing.wi_idx];
            let diff = pairing.po_price - pairing.expected;
            let search_text = search_text_for(po_item, wi.serial_number.as_deref());

            if diff.abs() <= self.price_tolerance + TOLERANCE_EPSILON {
                matched += 1;
                annotations.push(LineAnnotation {
                    status: AnnotationStatus::Ok,
                    comment: String::new(),
                    page_number: po_item.page_number,
                    bbox: po_item.bbox,
                    search_text,
                });
            } else {
                mismatches.push(PriceMismatch {
                    serial_number: pairing.serial_number.clone(),
                    po_price: pairing.po_price,
                    expected_price: pairing.expected,
                    difference: (diff * 100.0).round() / 100.0,
                    description: po_item.description.clone(),
                    work_item_id: Some(wi.work_item_id),
                });
                annotations.push(LineAnnotation {
                    status: AnnotationStatus::Mismatch,
                    comment: format!(
                        "Expected {}, PO says {}",
                        format_money(pairing.expected),
                        format_money(pairing.po_price)
                    ),
                    page_number: po_item.page_number,
                    bbox: po_item.bbox,
                    search_text,
                });
            }
        }

        let missing_items: Vec<MissingWorkItem> = work_items
            .iter()
            .enumerate()
            .filter(|(i, _)| !used_wi.contains(i))
            .map(|(_, wi)| MissingWorkItem {
                work_item_id: wi.work_item_id,
                serial_number: wi.serial_number.clone().unwrap_or_default(),
                asset_name: wi.asset_label().to_string(),
                expected_price: wi.expected_price(),
            })
            .collect();

        for (i, po_item) in items.iter().enumerate() {
            if !used_po.contains(&i) && po_item.has_price() {
                annotations.push(LineAnnotation {
                    status: AnnotationStatus::Unverified,
                    comment: UNVERIFIED_COMMENT.to_string(),
                    page_number: po_item.page_number,
                    bbox: po_item.bbox,
                    search_text: search_text_for(po_item, None),
                });
            }
        }

        let status = if mismatches.is_empty() && missing_items.is_empty() {
            ValidationStatus::Pass
        } else {
            ValidationStatus::Fail
        };

        let mut notes = Vec::new();
        if !missing_items.is_empty() {
            notes.push(format!("{} work item(s) not found on PO", missing_items.len()));
        }
        if pairings.is_empty() && mismatches.is_empty() {
            notes.push("No S/N matches found between PO and work items".to_string());
        }

        ValidationResult {
            status,
            mismatches,
            missing_items,
            annotations,
            po_line_items_total: items.len(),
            line_items_checked: pairings.len(),
            line_items_matched: matched,
            notes: notes.join("; "),
            ..base
        }
    }

    /// Phase 1: global best-price assignment over serial-number candidates.
    fn match_by_serial(
        &self,
        items: &[PoLineItem],
        work_items: &[WorkItem],
        used_wi: &mut HashSet<usize>,
        used_po: &mut HashSet<usize>,
    ) -> Vec<Pairing> {
        // (|diff|, wi_idx, po_idx, expected, po_price)
        let mut candidates: Vec<(f64, usize, usize, f64, f64)> = Vec::new();
        for (wi_idx, wi) in work_items.iter().enumerate() {
            let Some(wi_sn) = wi.serial_number.as_deref().filter(|s| !s.trim().is_empty()) else {
                continue;
            };
            let Some(expected) = wi.expected_price() else {
                continue;
            };
            for (po_idx, item) in items.iter().enumerate() {
                let Some(po_sn) = item.serial_number.as_deref().filter(|s| !s.is_empty()) else {
                    continue;
                };
                if !serials_match(po_sn, wi_sn, self.min_partial_serial_len) {
                    continue;
                }
                if let Some(po_price) = item.price() {
                    candidates.push(((po_price - expected).abs(), wi_idx, po_idx, expected, po_price));
                }
            }
        }

        candidates.sort_by(|a, b| {
            a.0.partial_cmp(&b.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.1.cmp(&b.1))
                .then(a.2.cmp(&b.2))
        });

        let mut pairings = Vec::new();
        for (_, wi_idx, po_idx, expected, po_price) in candidates {
            if used_wi.contains(&wi_idx) || used_po.contains(&po_idx) {
                continue;
            }
            used_wi.insert(wi_idx);
            used_po.insert(po_idx);
            let serial_number = items[po_idx]
                .serial_number
                .clone()
                .or_else(|| work_items[wi_idx].serial_number.clone())
                .unwrap_or_default();
            pairings.push(Pairing {
                wi_idx,
                po_idx,
                expected,
                po_price,
                serial_number,
            });
        }
        pairings
    }

    /// Phase 2: remaining work items located in the document text.
    fn match_by_text(
        &self,
        extraction: &PoExtraction,
        work_items: &[WorkItem],
        used_wi: &mut HashSet<usize>,
        used_po: &mut HashSet<usize>,
    ) -> Vec<Pairing> {
        let items = &extraction.line_items;
        let raw_text = extraction.raw_text.as_str();
        let raw_lower = raw_text.to_lowercase();
        let mut pairings = Vec::new();

        for (wi_idx, wi) in work_items.iter().enumerate() {
            if used_wi.contains(&wi_idx) {
                continue;
            }

            let sn = wi.serial_number.as_deref().unwrap_or("").trim();
            let variants = serial_variants(sn);
            let asset = wi.asset_label().to_lowercase();

            let mentions = |hay: &str, hay_lower: &str| {
                variants.iter().any(|v| hay.contains(v.as_str())) || (!asset.is_empty() && hay_lower.contains(&asset))
            };

            let found = mentions(raw_text, &raw_lower)
                || items
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| !used_po.contains(i))
                    .any(|(_, item)| mentions(&item.description, &item.description.to_lowercase()));
            if !found {
                continue;
            }

            let Some(expected) = wi.expected_price() else {
                continue;
            };

            let mut best: Option<(usize, f64, f64)> = None;
            for (po_idx, item) in items.iter().enumerate() {
                if used_po.contains(&po_idx) {
                    continue;
                }
                let Some(po_price) = item.price() else {
                    continue;
                };
                let diff = (po_price - expected).abs();
                if best.map_or(true, |(_, best_diff, _)| diff < best_diff) {
                    best = Some((po_idx, diff, po_price));
                }
            }

            if let Some((po_idx, _, po_price)) = best {
                debug!("Text fallback matched work item {} to PO line {}", wi.work_item_id, po_idx);
                used_wi.insert(wi_idx);
                used_po.insert(po_idx);
                pairings.push(Pairing {
                    wi_idx,
                    po_idx,
                    expected,
                    po_price,
                    serial_number: sn.to_string(),
                });
            }
        }
        pairings
    }
}

/// Text the annotator searches for when a line has no box: the PO serial,
/// else the work-item serial, else the description.
fn search_text_for(item: &PoLineItem, wi_serial: Option<&str>) -> String {
    if let Some(sn) = item.serial_number.as_deref().filter(|s| !s.is_empty()) {
        return sn.to_string();
    }
    if let Some(sn) = wi_serial.filter(|s| !s.is_empty()) {
        return sn.to_string();
    }
    item.description.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BBox, ExtractionMethod};

    fn wi(id: i64, sn: &str, expected: f64) -> WorkItem {
        WorkItem {
            work_item_id: id,
            serial_number: if sn.is_empty() { None } else { Some(sn.to_string()) },
            service_charge: Some(expected),
            ..Default::default()
        }
    }

    fn line(sn: Option<&str>, desc: &str, price: Option<f64>) -> PoLineItem {
        PoLineItem {
            serial_number: sn.map(str::to_string),
            description: desc.to_string(),
            unit_price: price,
            quantity: Some(1),
            extended_price: None,
            page_number: Some(0),
            bbox: Some(BBox::new(100.0, 200.0, 500.0, 212.0)),
        }
    }

    fn extraction(items: Vec<PoLineItem>, raw: &str) -> PoExtraction {
        PoExtraction {
            po_number: "4500".to_string(),
            line_items: items,
            confidence: 0.9,
            extraction_method: ExtractionMethod::Table,
            raw_text: raw.to_string(),
        }
    }

    fn engine() -> MatchingEngine {
        MatchingEngine::default()
    }

    fn count(result: &ValidationResult, status: AnnotationStatus) -> usize {
        result.annotations.iter().filter(|a| a.status == status).count()
    }

    #[test]
    fn test_scenario_exact_match_passes() {
        let result = engine().validate(
            &extraction(vec![line(Some("ABC-123"), "Caliper", Some(100.0))], ""),
            &[wi(1, "ABC123", 100.0)],
        );
        assert_eq!(result.status, ValidationStatus::Pass);
        assert_eq!(result.line_items_checked, 1);
        assert_eq!(result.line_items_matched, 1);
        assert_eq!(count(&result, AnnotationStatus::Ok), 1);
        assert_eq!(result.annotations[0].search_text, "ABC-123");
        assert!(result.notes.is_empty());
    }

    #[test]
    fn test_scenario_price_mismatch_fails() {
        let result = engine().validate(
            &extraction(vec![line(Some("XYZ1"), "Torque wrench", Some(75.0))], ""),
            &[wi(2, "XYZ1", 50.0)],
        );
        assert_eq!(result.status, ValidationStatus::Fail);
        assert_eq!(result.mismatches.len(), 1);
        let m = &result.mismatches[0];
        assert_eq!(m.difference, 25.0);
        assert_eq!(m.serial_number, "XYZ1");
        assert_eq!(m.work_item_id, Some(2));
        assert_eq!(result.annotations[0].comment, "Expected $50.00, PO says $75.00");
    }

    #[test]
    fn test_scenario_missing_item_fails() {
        let result = engine().validate(
            &extraction(vec![line(Some("AAA111"), "Scale", Some(10.0))], "AAA111 Scale"),
            &[wi(3, "Q9", 10.0)],
        );
        assert_eq!(result.status, ValidationStatus::Fail);
        assert_eq!(result.missing_items.len(), 1);
        assert_eq!(result.missing_items[0].serial_number, "Q9");
        assert_eq!(count(&result, AnnotationStatus::Unverified), 1);
        assert_eq!(
            result.notes,
            "1 work item(s) not found on PO; No S/N matches found between PO and work items"
        );
    }

    #[test]
    fn test_scenario_no_pricing() {
        let result = engine().validate(
            &extraction(vec![line(Some("A1"), "Caliper", None), line(None, "Gauge", None)], ""),
            &[wi(1, "A1", 10.0)],
        );
        assert_eq!(result.status, ValidationStatus::NoPricing);
        assert_eq!(result.line_items_checked, 2);
        assert!(result.annotations.is_empty());
    }

    #[test]
    fn test_no_work_items_or_lines() {
        let result = engine().validate(&extraction(vec![line(Some("A1"), "x", Some(1.0))], ""), &[]);
        assert_eq!(result.status, ValidationStatus::ExtractionFailed);

        let result = engine().validate(&extraction(Vec::new(), "text"), &[wi(1, "A1", 1.0)]);
        assert_eq!(result.status, ValidationStatus::ExtractionFailed);
        assert_eq!(result.work_items_total, 1);
    }

    #[test]
    fn test_tolerance_boundary() {
        let result = engine().validate(
            &extraction(vec![line(Some("T1"), "a", Some(100.01)), line(Some("T2"), "b", Some(100.0101))], ""),
            &[wi(1, "T1", 100.0), wi(2, "T2", 100.0)],
        );
        assert_eq!(result.line_items_matched, 1);
        assert_eq!(result.mismatches.len(), 1);
        assert_eq!(result.mismatches[0].serial_number, "T2");
    }

    #[test]
    fn test_closest_price_wins_for_duplicate_serials() {
        // Two PO lines carry the same serial; each work item gets the closer price
        let result = engine().validate(
            &extraction(vec![line(Some("DUP1"), "first", Some(80.0)), line(Some("DUP1"), "second", Some(120.0))], ""),
            &[wi(1, "DUP1", 120.0), wi(2, "DUP1", 80.0)],
        );
        assert_eq!(result.status, ValidationStatus::Pass);
        assert_eq!(result.line_items_checked, 2);
        assert_eq!(result.line_items_matched, 2);
    }

    #[test]
    fn test_matching_is_injective() {
        let items = vec![
            line(Some("1234"), "a", Some(10.0)),
            line(Some("12345"), "b", Some(10.0)),
            line(Some("123456"), "c", Some(10.0)),
        ];
        let work = [wi(1, "1234", 10.0), wi(2, "12345", 10.0)];
        let result = engine().validate(&extraction(items, ""), &work);
        assert_eq!(result.line_items_checked, 2);
        assert_eq!(count(&result, AnnotationStatus::Ok), 2);
        assert_eq!(count(&result, AnnotationStatus::Unverified), 1);
        // completeness: matched + missing covers every work item once
        assert_eq!(result.line_items_checked + result.missing_items.len(), work.len());
    }

    #[test]
    fn test_text_fallback_by_serial_in_raw_text() {
        let result = engine().validate(
            &extraction(
                vec![line(None, "Calibration service", Some(60.0)), line(None, "Rush fee", Some(20.0))],
                "Calibration service\nInstrument 7781-B (Unit 2)",
            ),
            &[wi(5, "7781-B (Unit 2)", 60.0)],
        );
        assert_eq!(result.status, ValidationStatus::Pass);
        assert_eq!(result.line_items_matched, 1);
        assert_eq!(result.annotations[0].search_text, "7781-B (Unit 2)");
        assert_eq!(count(&result, AnnotationStatus::Unverified), 1);
    }

    #[test]
    fn test_text_fallback_strips_parenthetical() {
        let result = engine().validate(
            &extraction(vec![line(None, "Service", Some(30.0))], "S/N 99812 calibrated"),
            &[wi(6, "99812 (old tag)", 35.0)],
        );
        assert_eq!(result.mismatches.len(), 1);
        assert_eq!(result.mismatches[0].serial_number, "99812 (old tag)");
        assert_eq!(result.mismatches[0].difference, -5.0);
    }

    #[test]
    fn test_text_fallback_by_asset_name_in_description() {
        let mut item = wi(7, "", 15.0);
        item.asset_name = Some("Torque Screwdriver".to_string());
        let result = engine().validate(
            &extraction(vec![line(None, "TORQUE SCREWDRIVER cal", Some(15.0))], ""),
            &[item],
        );
        assert_eq!(result.status, ValidationStatus::Pass);
    }

    #[test]
    fn test_work_item_without_serial_or_mention_is_missing() {
        let mut item = wi(8, "", 15.0);
        item.asset_name = Some("Oscilloscope".to_string());
        let result = engine().validate(&extraction(vec![line(Some("A1"), "Caliper", Some(15.0))], ""), &[item]);
        assert_eq!(result.missing_items.len(), 1);
        assert_eq!(result.missing_items[0].asset_name, "Oscilloscope");
        assert_eq!(result.status, ValidationStatus::Fail);
    }

    #[test]
    fn test_extended_price_and_service_total_fallbacks() {
        let mut po = line(Some("E1"), "x", None);
        po.extended_price = Some(40.0);
        let work = WorkItem {
            work_item_id: 9,
            serial_number: Some("E1".to_string()),
            service_total: Some(40.0),
            ..Default::default()
        };
        let result = engine().validate(&extraction(vec![po], ""), &[work]);
        assert_eq!(result.status, ValidationStatus::Pass);
    }

    #[test]
    fn test_price_update_detection() {
        assert!(is_price_update_request("ORDER PRICE UPDATE\nRequest for PO attached"));
        assert!(!is_price_update_request("Order Price Update"));
        let skipped = skipped_result();
        assert_eq!(skipped.status, ValidationStatus::Skipped);
        assert!(skipped.annotations.is_empty());
    }

    #[test]
    fn test_partial_threshold_is_tunable() {
        let strict = MatchingEngine::new(&MatchingConfig {
            min_partial_serial_len: 10,
            ..Default::default()
        });
        let result = strict.validate(
            &extraction(vec![line(Some("XJ45001"), "a", Some(5.0))], ""),
            &[wi(1, "45001", 5.0)],
        );
        assert_eq!(result.missing_items.len(), 1);
    }
}
