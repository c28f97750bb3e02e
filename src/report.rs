//! Console rendering and append-only JSON/CSV reports for validation results.

use std::fs::OpenOptions;
use std::path::Path;

use serde::Serialize;
use tracing::{info, warn};

use crate::error::{ValidatorError, ValidatorResult};
use crate::models::{format_money, ValidationResult, ValidationStatus};

const NOTE_WIDTH: usize = 96;

fn signed_money(value: f64) -> String {
    if value >= 0.0 {
        format!("+{}", format_money(value))
    } else {
        format_money(value)
    }
}

/// Multi-line console description of one result.
pub fn render_result(result: &ValidationResult) -> String {
    let mut lines = Vec::new();
    let po = if result.po_number.is_empty() {
        "(unknown)"
    } else {
        result.po_number.as_str()
    };
    lines.push(format!(
        "[{}] {}  PO# {}  ({}, conf={:.0}%)",
        result.status.as_str().to_uppercase(),
        result.document_name,
        po,
        result.extraction_method,
        result.confidence * 100.0
    ));

    for m in &result.mismatches {
        lines.push(format!(
            "  MISMATCH  S/N {}: PO {} vs expected {} (diff {})",
            m.serial_number,
            format_money(m.po_price),
            format_money(m.expected_price),
            signed_money(m.difference)
        ));
    }
    for mi in &result.missing_items {
        let price = mi
            .expected_price
            .map(format_money)
            .unwrap_or_else(|| "n/a".to_string());
        lines.push(format!(
            "  MISSING   S/N {}: {} (expected price {})",
            mi.serial_number, mi.asset_name, price
        ));
    }

    if result.status == ValidationStatus::Pass {
        let extra = result.po_line_items_total.saturating_sub(result.line_items_matched);
        let extra_note = if extra > 0 {
            format!("  ({} unmatched PO line(s), e.g. travel)", extra)
        } else {
            String::new()
        };
        lines.push(format!(
            "  All {} work item(s) verified on PO{}",
            result.line_items_matched, extra_note
        ));
    }

    if !result.notes.is_empty() {
        let options = textwrap::Options::new(NOTE_WIDTH)
            .initial_indent("  Note: ")
            .subsequent_indent("        ");
        lines.push(textwrap::fill(&result.notes, options));
    }

    lines.join("\n")
}

pub fn print_result(result: &ValidationResult) {
    println!("{}\n", render_result(result));
}

/// One-line tally over a batch, framed by rules.
pub fn render_summary(results: &[ValidationResult]) -> String {
    let count = |status: ValidationStatus| results.iter().filter(|r| r.status == status).count();
    let rule = "=".repeat(60);
    format!(
        "{rule}\nSUMMARY: {} POs checked: {} passed, {} FAILED, {} no pricing, {} extraction errors, {} skipped\n{rule}",
        results.len(),
        count(ValidationStatus::Pass),
        count(ValidationStatus::Fail),
        count(ValidationStatus::NoPricing),
        count(ValidationStatus::ExtractionFailed),
        count(ValidationStatus::Skipped),
    )
}

pub fn print_summary(results: &[ValidationResult]) {
    println!("{}", render_summary(results));
}

/// Append `results` to the JSON array stored at `path`.
///
/// An existing file that cannot be read as a JSON array is replaced.
pub fn save_json_report<P: AsRef<Path>>(results: &[ValidationResult], path: P) -> ValidatorResult<()> {
    let path = path.as_ref();
    let mut existing: Vec<serde_json::Value> = Vec::new();
    if path.exists() {
        match std::fs::read_to_string(path).map(|s| serde_json::from_str::<Vec<serde_json::Value>>(&s)) {
            Ok(Ok(values)) => existing = values,
            Ok(Err(e)) => warn!("⚠️ Ignoring malformed report {}: {}", path.display(), e),
            Err(e) => warn!("⚠️ Ignoring unreadable report {}: {}", path.display(), e),
        }
    }

    for r in results {
        existing.push(serde_json::to_value(r)?);
    }
    let body = serde_json::to_string_pretty(&existing)?;
    std::fs::write(path, body).map_err(|e| ValidatorError::file_io(path.display().to_string(), e))?;

    info!("💾 Saved {} results to {}", results.len(), path.display());
    Ok(())
}

#[derive(Debug, Serialize)]
struct CsvRow<'a> {
    timestamp: String,
    document_name: &'a str,
    po_number: &'a str,
    service_order_id: Option<i64>,
    status: &'static str,
    extraction_method: &'static str,
    confidence: String,
    work_items_total: usize,
    line_items_checked: usize,
    line_items_matched: usize,
    mismatches: String,
    missing_items: String,
    notes: &'a str,
}

impl<'a> From<&'a ValidationResult> for CsvRow<'a> {
    fn from(r: &'a ValidationResult) -> Self {
        let mismatches = r
            .mismatches
            .iter()
            .map(|m| {
                format!(
                    "{}: {} vs {}",
                    m.serial_number,
                    format_money(m.po_price),
                    format_money(m.expected_price)
                )
            })
            .collect::<Vec<_>>()
            .join("; ");
        let missing_items = r
            .missing_items
            .iter()
            .map(|mi| format!("{} ({})", mi.serial_number, mi.asset_name))
            .collect::<Vec<_>>()
            .join("; ");

        Self {
            timestamp: r.timestamp.to_rfc3339(),
            document_name: &r.document_name,
            po_number: &r.po_number,
            service_order_id: r.service_order_id,
            status: r.status.as_str(),
            extraction_method: r.extraction_method.as_str(),
            confidence: format!("{:.2}", r.confidence),
            work_items_total: r.work_items_total,
            line_items_checked: r.line_items_checked,
            line_items_matched: r.line_items_matched,
            mismatches,
            missing_items,
            notes: &r.notes,
        }
    }
}

/// Append one CSV row per result; the header is written only for a new file.
pub fn save_csv_report<P: AsRef<Path>>(results: &[ValidationResult], path: P) -> ValidatorResult<()> {
    let path = path.as_ref();
    let write_header = std::fs::metadata(path).map(|m| m.len() == 0).unwrap_or(true);

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| ValidatorError::file_io(path.display().to_string(), e))?;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(write_header)
        .from_writer(file);

    for r in results {
        writer
            .serialize(CsvRow::from(r))
            .map_err(|e| ValidatorError::report(format!("Failed to write CSV row: {}", e)))?;
    }
    writer
        .flush()
        .map_err(|e| ValidatorError::file_io(path.display().to_string(), e))?;

    info!("💾 Appended {} results to {}", results.len(), path.display());
    Ok(())
}
