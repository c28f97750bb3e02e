use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Axis-aligned box in document space: `(x0, top, x1, bottom)` in points,
/// origin at the top-left corner of the page.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f32; 4]", into = "[f32; 4]")]
pub struct BBox {
    pub x0: f32,
    pub top: f32,
    pub x1: f32,
    pub bottom: f32,
}

impl BBox {
    pub fn new(x0: f32, top: f32, x1: f32, bottom: f32) -> Self {
        Self { x0, top, x1, bottom }
    }

    pub fn width(&self) -> f32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f32 {
        self.bottom - self.top
    }

    pub fn center_x(&self) -> f32 {
        (self.x0 + self.x1) / 2.0
    }

    pub fn center_y(&self) -> f32 {
        (self.top + self.bottom) / 2.0
    }

    /// Smallest box containing both.
    pub fn union(&self, other: &BBox) -> BBox {
        BBox {
            x0: self.x0.min(other.x0),
            top: self.top.min(other.top),
            x1: self.x1.max(other.x1),
            bottom: self.bottom.max(other.bottom),
        }
    }
}

impl From<[f32; 4]> for BBox {
    fn from(v: [f32; 4]) -> Self {
        BBox::new(v[0], v[1], v[2], v[3])
    }
}

impl From<BBox> for [f32; 4] {
    fn from(b: BBox) -> Self {
        [b.x0, b.top, b.x1, b.bottom]
    }
}

/// How a [`PoExtraction`] was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionMethod {
    Table,
    Text,
    Llm,
    #[default]
    None,
}

impl ExtractionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionMethod::Table => "table",
            ExtractionMethod::Text => "text",
            ExtractionMethod::Llm => "llm",
            ExtractionMethod::None => "none",
        }
    }
}

impl std::fmt::Display for ExtractionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row extracted from a purchase order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoLineItem {
    pub serial_number: Option<String>,
    pub description: String,
    pub unit_price: Option<f64>,
    pub quantity: Option<u32>,
    pub extended_price: Option<f64>,
    /// 0-based page index
    pub page_number: Option<usize>,
    pub bbox: Option<BBox>,
}

impl PoLineItem {
    /// Price used for comparison: unit price, else the extended price.
    pub fn price(&self) -> Option<f64> {
        self.unit_price.or(self.extended_price)
    }

    pub fn has_price(&self) -> bool {
        self.unit_price.is_some() || self.extended_price.is_some()
    }

    /// Copy of this item carrying `serial_number`.
    pub fn with_serial(&self, serial_number: impl Into<String>) -> Self {
        Self {
            serial_number: Some(serial_number.into()),
            ..self.clone()
        }
    }
}

/// Output of the extraction phase for one document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoExtraction {
    pub po_number: String,
    pub line_items: Vec<PoLineItem>,
    /// Heuristic reliability score in `[0, 1]`
    pub confidence: f64,
    pub extraction_method: ExtractionMethod,
    /// Bounded raw-text excerpt kept for text-fallback matching
    pub raw_text: String,
}

impl PoExtraction {
    /// Zero-confidence result with no method, used when nothing could be read.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn has_any_price(&self) -> bool {
        self.line_items.iter().any(PoLineItem::has_price)
    }
}

/// Expected instrument/service charge supplied by the order-management system.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    #[serde(default, alias = "WorkItemId")]
    pub work_item_id: i64,
    #[serde(default, alias = "SerialNumber")]
    pub serial_number: Option<String>,
    #[serde(default, alias = "AssetName")]
    pub asset_name: Option<String>,
    #[serde(default, alias = "AssetDescription")]
    pub asset_description: Option<String>,
    #[serde(default, alias = "ServiceCharge")]
    pub service_charge: Option<f64>,
    #[serde(default, alias = "ServiceTotal")]
    pub service_total: Option<f64>,
}

impl WorkItem {
    /// Service charge, or the service total when no charge is recorded.
    pub fn expected_price(&self) -> Option<f64> {
        self.service_charge.or(self.service_total)
    }

    /// Asset name, falling back to the asset description.
    pub fn asset_label(&self) -> &str {
        self.asset_name
            .as_deref()
            .filter(|s| !s.is_empty())
            .or(self.asset_description.as_deref())
            .unwrap_or("")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceMismatch {
    pub serial_number: String,
    pub po_price: f64,
    pub expected_price: f64,
    /// `po_price - expected_price`; positive means the PO overcharges
    pub difference: f64,
    pub description: String,
    pub work_item_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissingWorkItem {
    pub work_item_id: i64,
    pub serial_number: String,
    pub asset_name: String,
    pub expected_price: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnnotationStatus {
    /// Price verified
    Ok,
    /// Price differs from the expected charge
    Mismatch,
    /// Work item not on the PO
    Missing,
    /// PO line could not be tied to any work item
    Unverified,
}

/// Rendering instruction for one PO line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineAnnotation {
    pub status: AnnotationStatus,
    pub comment: String,
    pub page_number: Option<usize>,
    pub bbox: Option<BBox>,
    /// Text to look for on the page when no bbox is known
    pub search_text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    Pass,
    Fail,
    NoPricing,
    #[default]
    ExtractionFailed,
    Skipped,
}

impl ValidationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationStatus::Pass => "pass",
            ValidationStatus::Fail => "fail",
            ValidationStatus::NoPricing => "no_pricing",
            ValidationStatus::ExtractionFailed => "extraction_failed",
            ValidationStatus::Skipped => "skipped",
        }
    }
}

impl std::fmt::Display for ValidationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate outcome of validating one PO document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub document_name: String,
    pub po_number: String,
    pub service_order_id: Option<i64>,
    pub status: ValidationStatus,
    pub mismatches: Vec<PriceMismatch>,
    pub missing_items: Vec<MissingWorkItem>,
    pub annotations: Vec<LineAnnotation>,
    pub po_line_items_total: usize,
    pub line_items_checked: usize,
    pub line_items_matched: usize,
    pub work_items_total: usize,
    pub extraction_method: ExtractionMethod,
    pub confidence: f64,
    pub timestamp: DateTime<Local>,
    pub notes: String,
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self {
            document_name: String::new(),
            po_number: String::new(),
            service_order_id: None,
            status: ValidationStatus::default(),
            mismatches: Vec::new(),
            missing_items: Vec::new(),
            annotations: Vec::new(),
            po_line_items_total: 0,
            line_items_checked: 0,
            line_items_matched: 0,
            work_items_total: 0,
            extraction_method: ExtractionMethod::None,
            confidence: 0.0,
            timestamp: Local::now(),
            notes: String::new(),
        }
    }
}

impl ValidationResult {
    /// Result for a document that is not a customer PO.
    pub fn skipped(notes: impl Into<String>) -> Self {
        Self {
            status: ValidationStatus::Skipped,
            notes: notes.into(),
            ..Self::default()
        }
    }

    /// Attach the document identity supplied by the caller.
    pub fn for_document(mut self, document_name: &str, service_order_id: Option<i64>) -> Self {
        self.document_name = document_name.to_string();
        self.service_order_id = service_order_id;
        self
    }
}

impl std::fmt::Display for ValidationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "<ValidationResult {:?} PO# {:?} status={} mismatches={} missing_items={}>",
            self.document_name,
            self.po_number,
            self.status,
            self.mismatches.len(),
            self.missing_items.len()
        )
    }
}

/// Format a price as `$1,234.56`.
pub fn format_money(value: f64) -> String {
    let negative = value < 0.0;
    let cents = (value.abs() * 100.0).round() as u64;
    let whole = (cents / 100).to_string();
    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, ch) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    format!("{}${}.{:02}", if negative { "-" } else { "" }, grouped, cents % 100)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&ValidationStatus::ExtractionFailed).unwrap();
        assert_eq!(json, "\"extraction_failed\"");
        let json = serde_json::to_string(&ExtractionMethod::Llm).unwrap();
        assert_eq!(json, "\"llm\"");
        let json = serde_json::to_string(&AnnotationStatus::Unverified).unwrap();
        assert_eq!(json, "\"unverified\"");
    }

    #[test]
    fn test_bbox_serializes_as_tuple() {
        let bbox = BBox::new(1.0, 2.0, 3.0, 4.0);
        assert_eq!(serde_json::to_string(&bbox).unwrap(), "[1.0,2.0,3.0,4.0]");
        let back: BBox = serde_json::from_str("[1.0,2.0,3.0,4.0]").unwrap();
        assert_eq!(back, bbox);
    }

    #[test]
    fn test_expected_price_prefers_service_charge() {
        let wi = WorkItem {
            service_charge: Some(80.0),
            service_total: Some(95.0),
            ..Default::default()
        };
        assert_eq!(wi.expected_price(), Some(80.0));

        let wi = WorkItem {
            service_total: Some(95.0),
            ..Default::default()
        };
        assert_eq!(wi.expected_price(), Some(95.0));
    }

    #[test]
    fn test_work_item_accepts_pascal_case() {
        let wi: WorkItem = serde_json::from_str(
            r#"{"WorkItemId": 7, "SerialNumber": "AB-12", "AssetName": "Caliper", "ServiceCharge": 45.5}"#,
        )
        .unwrap();
        assert_eq!(wi.work_item_id, 7);
        assert_eq!(wi.serial_number.as_deref(), Some("AB-12"));
        assert_eq!(wi.asset_label(), "Caliper");
        assert_eq!(wi.expected_price(), Some(45.5));
    }

    #[test]
    fn test_line_item_price_fallback() {
        let item = PoLineItem {
            extended_price: Some(12.5),
            ..Default::default()
        };
        assert_eq!(item.price(), Some(12.5));
        assert!(item.has_price());
        assert!(!PoLineItem::default().has_price());
    }

    #[test]
    fn test_format_money() {
        assert_eq!(format_money(1234.5), "$1,234.50");
        assert_eq!(format_money(0.0), "$0.00");
        assert_eq!(format_money(-25.0), "-$25.00");
        assert_eq!(format_money(1_000_000.0), "$1,000,000.00");
    }
}
