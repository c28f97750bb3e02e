//! Table detection from positioned text.
//!
//! Rows come from clustering segments vertically, table regions from runs of
//! multi-cell rows, and columns from merging the horizontal extents of the
//! cells in a region. Rows holding a single segment inside a region are
//! treated as continuation lines of the row above (multi-line cells).

use crate::config::ExtractionConfig;
use crate::models::BBox;
use crate::pdf::{PageLayout, TextSegment};

/// Gap (pt) allowed between x-spans that still belong to one column
const COLUMN_MERGE_GAP: f32 = 2.0;

/// Cells wider than this share of the table are ignored when finding columns
const WIDE_CELL_RATIO: f32 = 0.5;

/// A table found on one page.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedTable {
    pub page_index: usize,
    pub bbox: BBox,
    /// Cell text by row then column; `None` for empty cells
    pub rows: Vec<Vec<Option<String>>>,
    /// Box of every non-empty cell. Not in row-major order.
    pub cell_boxes: Vec<BBox>,
}

#[derive(Debug, Clone)]
pub struct TableDetector {
    row_tolerance: f32,
    max_row_gap: f32,
    min_columns: usize,
}

impl Default for TableDetector {
    fn default() -> Self {
        Self::from_config(&ExtractionConfig::default())
    }
}

#[derive(Debug, Clone)]
struct Row<'a> {
    cells: Vec<&'a TextSegment>,
    /// Continuation lines folded into this row
    continuation: Vec<&'a TextSegment>,
    top: f32,
    bottom: f32,
}

impl<'a> Row<'a> {
    fn center(&self) -> f32 {
        (self.top + self.bottom) / 2.0
    }
}

impl TableDetector {
    pub fn from_config(config: &ExtractionConfig) -> Self {
        Self {
            row_tolerance: config.table_row_tolerance,
            max_row_gap: config.table_max_row_gap,
            min_columns: config.table_min_columns.max(2),
        }
    }

    /// Detect every table on the page, top to bottom.
    pub fn detect(&self, layout: &PageLayout) -> Vec<DetectedTable> {
        let rows = self.cluster_rows(&layout.segments);
        self.find_regions(rows)
            .into_iter()
            .filter_map(|region| self.build_table(layout.page_index, region))
            .collect()
    }

    fn cluster_rows<'a>(&self, segments: &'a [TextSegment]) -> Vec<Row<'a>> {
        let mut sorted: Vec<&TextSegment> = segments.iter().filter(|s| !s.text.trim().is_empty()).collect();
        sorted.sort_by(|a, b| {
            a.bbox
                .center_y()
                .partial_cmp(&b.bbox.center_y())
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut rows: Vec<Row> = Vec::new();
        for seg in sorted {
            if let Some(row) = rows.last_mut() {
                if (row.center() - seg.bbox.center_y()).abs() <= self.row_tolerance {
                    row.top = row.top.min(seg.bbox.top);
                    row.bottom = row.bottom.max(seg.bbox.bottom);
                    row.cells.push(seg);
                    continue;
                }
            }
            rows.push(Row {
                cells: vec![seg],
                continuation: Vec::new(),
                top: seg.bbox.top,
                bottom: seg.bbox.bottom,
            });
        }

        for row in &mut rows {
            row.cells
                .sort_by(|a, b| a.bbox.x0.partial_cmp(&b.bbox.x0).unwrap_or(std::cmp::Ordering::Equal));
        }
        rows
    }

    /// Runs of multi-cell rows separated by less than `max_row_gap`.
    /// Single-cell rows inside a run fold into the row above.
    fn find_regions<'a>(&self, rows: Vec<Row<'a>>) -> Vec<Vec<Row<'a>>> {
        let mut regions: Vec<Vec<Row>> = Vec::new();
        let mut current: Vec<Row> = Vec::new();

        for row in rows {
            let close = current
                .last()
                .map(|prev| row.top - prev.bottom <= self.max_row_gap)
                .unwrap_or(false);

            if row.cells.len() >= self.min_columns {
                if !close && !current.is_empty() {
                    regions.push(std::mem::take(&mut current));
                }
                current.push(row);
            } else if close {
                if let Some(prev) = current.last_mut() {
                    prev.bottom = prev.bottom.max(row.bottom);
                    prev.continuation.extend(row.cells);
                }
            } else if !current.is_empty() {
                regions.push(std::mem::take(&mut current));
            }
        }
        if !current.is_empty() {
            regions.push(current);
        }

        regions.retain(|r| r.len() >= 2);
        regions
    }

    fn build_table(&self, page_index: usize, region: Vec<Row>) -> Option<DetectedTable> {
        let mut bbox = region.first()?.cells.first()?.bbox;
        for row in &region {
            for seg in row.cells.iter().chain(row.continuation.iter()) {
                bbox = bbox.union(&seg.bbox);
            }
        }

        let columns = column_spans(&region, bbox.width());
        if columns.len() < self.min_columns {
            return None;
        }

        let mut rows = Vec::with_capacity(region.len());
        // Per column, per row: accumulated box
        let mut boxes: Vec<Vec<Option<BBox>>> = vec![vec![None; region.len()]; columns.len()];

        for (ri, row) in region.iter().enumerate() {
            let mut texts: Vec<Vec<String>> = vec![Vec::new(); columns.len()];
            let mut lines: Vec<Vec<String>> = vec![Vec::new(); columns.len()];

            for seg in &row.cells {
                let ci = nearest_column(&columns, seg.bbox.center_x());
                texts[ci].push(seg.text.trim().to_string());
                widen(&mut boxes[ci][ri], &seg.bbox, row);
            }
            for seg in &row.continuation {
                let ci = nearest_column(&columns, seg.bbox.center_x());
                lines[ci].push(seg.text.trim().to_string());
                widen(&mut boxes[ci][ri], &seg.bbox, row);
            }

            let cells = texts
                .into_iter()
                .zip(lines)
                .map(|(first, extra)| {
                    let mut parts = Vec::new();
                    if !first.is_empty() {
                        parts.push(first.join(" "));
                    }
                    parts.extend(extra);
                    if parts.is_empty() {
                        None
                    } else {
                        Some(parts.join("\n"))
                    }
                })
                .collect();
            rows.push(cells);
        }

        // Column-major, like grid-based extractors report them
        let cell_boxes = boxes.into_iter().flatten().flatten().collect();

        Some(DetectedTable {
            page_index,
            bbox,
            rows,
            cell_boxes,
        })
    }
}

/// Grow a cell box by `seg`, keeping the row's full height.
fn widen(slot: &mut Option<BBox>, seg: &BBox, row: &Row) {
    let base = BBox::new(seg.x0, row.top, seg.x1, row.bottom);
    *slot = Some(match slot {
        Some(b) => b.union(&base),
        None => base,
    });
}

/// Merged x-spans of the region's cells, left to right.
fn column_spans(region: &[Row], table_width: f32) -> Vec<(f32, f32)> {
    let mut spans: Vec<(f32, f32)> = region
        .iter()
        .flat_map(|r| r.cells.iter())
        .filter(|s| s.bbox.width() <= table_width * WIDE_CELL_RATIO)
        .map(|s| (s.bbox.x0, s.bbox.x1))
        .collect();
    spans.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

    let mut merged: Vec<(f32, f32)> = Vec::new();
    for (x0, x1) in spans {
        match merged.last_mut() {
            Some(last) if x0 <= last.1 + COLUMN_MERGE_GAP => last.1 = last.1.max(x1),
            _ => merged.push((x0, x1)),
        }
    }
    merged
}

fn nearest_column(columns: &[(f32, f32)], x: f32) -> usize {
    if let Some(i) = columns.iter().position(|&(x0, x1)| x >= x0 && x <= x1) {
        return i;
    }
    columns
        .iter()
        .enumerate()
        .map(|(i, &(x0, x1))| (i, (x - (x0 + x1) / 2.0).abs()))
        .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(i, _)| i)
        .unwrap_or(0)
}
