use std::collections::BTreeMap;

use tracing::debug;

use super::patterns::{self, ColumnRoles};
use super::tables::DetectedTable;
use crate::models::{BBox, PoLineItem};

/// Line items parsed from one table, with the table's confidence.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedTable {
    pub items: Vec<PoLineItem>,
    pub confidence: f64,
}

#[derive(Debug, Clone)]
pub struct TableParser {
    header_scan_rows: usize,
    row_merge_tolerance: f32,
}

impl Default for TableParser {
    fn default() -> Self {
        Self {
            header_scan_rows: 8,
            row_merge_tolerance: 2.0,
        }
    }
}

impl TableParser {
    pub fn new(header_scan_rows: usize, row_merge_tolerance: f32) -> Self {
        Self {
            header_scan_rows,
            row_merge_tolerance,
        }
    }

    /// Parse `table` into line items. An empty result carries confidence 0.
    pub fn parse(&self, table: &DetectedTable) -> ParsedTable {
        let rows = &table.rows;
        if rows.len() < 2 {
            return ParsedTable::default();
        }

        let header_idx = self.find_header_row(rows);
        if header_idx >= rows.len() - 1 {
            return ParsedTable::default();
        }

        let headers: Vec<String> = rows[header_idx]
            .iter()
            .map(|c| c.as_deref().unwrap_or("").trim().to_string())
            .collect();
        let roles = ColumnRoles::resolve(&headers);

        if roles.price.is_none() && roles.serial.is_none() {
            debug!("Table on page {} has neither serial nor price column", table.page_index);
            return ParsedTable::default();
        }

        let row_boxes = row_bboxes(&table.cell_boxes, self.row_merge_tolerance);

        let mut items = Vec::new();
        for (offset, row) in rows[header_idx + 1..].iter().enumerate() {
            if let Some(item) = self.parse_row(row, &roles, table.page_index) {
                let bbox = row_boxes.get(&(header_idx + 1 + offset)).copied();
                items.push(PoLineItem { bbox, ..item });
            }
        }

        if items.is_empty() {
            return ParsedTable::default();
        }

        let confidence = score(&roles, &items);
        debug!(
            "Parsed table on page {}: {} items, {} roles, confidence {:.3}",
            table.page_index,
            items.len(),
            roles.found(),
            confidence
        );
        ParsedTable { items, confidence }
    }

    /// Row among the first few with the most cells matching a column-role family.
    /// Ties keep the earliest row.
    pub fn find_header_row(&self, rows: &[Vec<Option<String>>]) -> usize {
        let mut best_row = 0;
        let mut best_score = 0;
        for (i, row) in rows.iter().take(self.header_scan_rows).enumerate() {
            let score = patterns::header_score(row);
            if score > best_score {
                best_score = score;
                best_row = i;
            }
        }
        best_row
    }

    fn parse_row(&self, row: &[Option<String>], roles: &ColumnRoles, page_index: usize) -> Option<PoLineItem> {
        let filled: Vec<&str> = row.iter().flatten().map(String::as_str).filter(|c| !c.is_empty()).collect();
        if filled.is_empty() {
            return None;
        }
        if patterns::SKIP_ROW.is_match(&filled.join(" ")) {
            return None;
        }

        let cell = |idx: Option<usize>| -> Option<String> {
            idx.and_then(|i| row.get(i))
                .and_then(|c| c.as_deref())
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string)
        };

        let description = cell(roles.description)
            .map(|d| patterns::collapse_multiline(&d))
            .unwrap_or_default();

        let serial_number = cell(roles.serial)
            .map(|s| patterns::collapse_multiline(&s))
            .filter(|s| !patterns::is_ip_address(s))
            .or_else(|| {
                if description.is_empty() {
                    None
                } else {
                    patterns::serial_from_text(&description)
                }
            });

        let unit_price = cell(roles.price).and_then(|p| patterns::clean_price(&p));
        let quantity = cell(roles.quantity).and_then(|q| patterns::clean_quantity(&q));
        let extended_price = cell(roles.extended).and_then(|p| patterns::clean_price(&p));

        if serial_number.is_none() && unit_price.is_none() && description.is_empty() {
            return None;
        }

        Some(PoLineItem {
            serial_number,
            description,
            unit_price,
            quantity,
            extended_price,
            page_number: Some(page_index),
            bbox: None,
        })
    }
}

/// `0.5 * roles/4 + 0.5 * (rows with serial + rows with unit price) / (2 * rows)`,
/// rounded to three decimals.
fn score(roles: &ColumnRoles, items: &[PoLineItem]) -> f64 {
    let col_conf = roles.found() as f64 / 4.0;
    let with_sn = items.iter().filter(|i| i.serial_number.is_some()).count();
    let with_price = items.iter().filter(|i| i.unit_price.is_some()).count();
    let data_conf = (with_sn + with_price) as f64 / (2 * items.len()) as f64;
    let confidence = 0.5 * col_conf + 0.5 * data_conf;
    (confidence * 1000.0).round() / 1000.0
}

/// Row index → union of the boxes of the cells in that row.
///
/// Cells may arrive in any order, so tops are first collapsed into row
/// positions: sorted, and merged when within `tolerance` of the previous row.
pub fn row_bboxes(cells: &[BBox], tolerance: f32) -> BTreeMap<usize, BBox> {
    let round1 = |v: f32| (v * 10.0).round() / 10.0;

    let mut tops: Vec<f32> = cells.iter().map(|c| round1(c.top)).collect();
    tops.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    tops.dedup();

    let mut row_tops: Vec<f32> = Vec::new();
    for top in tops {
        match row_tops.last() {
            Some(last) if (top - last).abs() < tolerance => {}
            _ => row_tops.push(top),
        }
    }

    let mut boxes: BTreeMap<usize, BBox> = BTreeMap::new();
    for cell in cells {
        let top = round1(cell.top);
        let row = row_tops
            .iter()
            .position(|ry| (top - ry).abs() < tolerance)
            .unwrap_or(row_tops.len());
        boxes
            .entry(row)
            .and_modify(|b| *b = b.union(cell))
            .or_insert(*cell);
    }
    boxes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::tables::tests::po_layout;
    use crate::extraction::tables::TableDetector;

    fn table(rows: &[&[&str]]) -> DetectedTable {
        DetectedTable {
            page_index: 1,
            bbox: BBox::new(0.0, 0.0, 500.0, 500.0),
            rows: rows
                .iter()
                .map(|r| {
                    r.iter()
                        .map(|c| if c.is_empty() { None } else { Some(c.to_string()) })
                        .collect()
                })
                .collect(),
            cell_boxes: Vec::new(),
        }
    }

    #[test]
    fn test_header_row_found_below_title() {
        let t = table(&[
            &["ACME Corp", "", ""],
            &["Serial Number", "Description", "Price"],
            &["A1", "Caliper", "$10.00"],
        ]);
        assert_eq!(TableParser::default().find_header_row(&t.rows), 1);
        let parsed = TableParser::default().parse(&t);
        assert_eq!(parsed.items.len(), 1);
        assert_eq!(parsed.items[0].serial_number.as_deref(), Some("A1"));
        assert_eq!(parsed.items[0].page_number, Some(1));
    }

    #[test]
    fn test_rejects_table_without_serial_or_price() {
        let t = table(&[&["Description", "Qty"], &["Caliper", "1"]]);
        assert_eq!(TableParser::default().parse(&t), ParsedTable::default());
    }

    #[test]
    fn test_header_as_last_row_is_rejected() {
        let t = table(&[&["Vendor", "Address"], &["Serial", "Price"]]);
        assert!(TableParser::default().parse(&t).items.is_empty());
    }

    #[test]
    fn test_confidence_formula() {
        let t = table(&[
            &["S/N", "Description", "Qty", "Unit Price", "Total"],
            &["A1", "Caliper", "1", "$10.00", "$10.00"],
            &["", "Travel", "1", "$50.00", "$50.00"],
        ]);
        let parsed = TableParser::default().parse(&t);
        // 4/4 roles; serials 1/2, prices 2/2 -> 0.5 + 0.5 * 3/4
        assert_eq!(parsed.confidence, 0.875);
        assert_eq!(parsed.items[0].extended_price, Some(10.0));
        assert_eq!(parsed.items[1].serial_number, None);
    }

    #[test]
    fn test_skip_rows_and_zero_price_kept() {
        let t = table(&[
            &["Serial #", "Description", "Price"],
            &["W1", "Warranty check", "$0.00"],
            &["", "Subtotal", "$0.00"],
            &["", "", ""],
        ]);
        let parsed = TableParser::default().parse(&t);
        assert_eq!(parsed.items.len(), 1);
        assert_eq!(parsed.items[0].unit_price, Some(0.0));
    }

    #[test]
    fn test_serial_from_description_when_no_column() {
        let t = table(&[
            &["Description", "Amount"],
            &["Multimeter\n(Fluke SN: 44012345)", "$85.00"],
            &["Probe SN: 10.0.0.12", "$5.00"],
        ]);
        let parsed = TableParser::default().parse(&t);
        assert_eq!(parsed.items[0].description, "Multimeter (Fluke SN: 44012345)");
        assert_eq!(parsed.items[0].serial_number.as_deref(), Some("44012345"));
        assert_eq!(parsed.items[1].serial_number, None);
    }

    #[test]
    fn test_row_bboxes_from_unordered_cells() {
        let cells = vec![
            BBox::new(200.0, 120.4, 250.0, 130.0),
            BBox::new(10.0, 100.0, 60.0, 110.0),
            BBox::new(10.0, 121.0, 60.0, 130.0),
            BBox::new(200.0, 100.5, 250.0, 110.0),
        ];
        let rows = row_bboxes(&cells, 2.0);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[&0], BBox::new(10.0, 100.0, 250.0, 110.0));
        assert_eq!(rows[&1], BBox::new(10.0, 120.4, 250.0, 130.0));
    }

    #[test]
    fn test_parse_detected_table_with_bboxes() {
        let tables = TableDetector::default().detect(&po_layout());
        let parsed = TableParser::default().parse(&tables[0]);
        assert_eq!(parsed.items.len(), 2);
        let first = &parsed.items[0];
        assert_eq!(first.serial_number.as_deref(), Some("ABC-123"));
        assert_eq!(first.description, "Caliper 6 inch digital");
        assert_eq!(first.unit_price, Some(100.0));
        assert_eq!(first.quantity, Some(1));
        let bbox = first.bbox.unwrap();
        assert_eq!(bbox.top, 116.0);
        assert_eq!(bbox.x0, 40.0);
        assert_eq!(parsed.items[1].bbox.unwrap().top, 146.0);
        assert_eq!(parsed.confidence, 1.0);
    }
}
