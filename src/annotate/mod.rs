// Marked-up copy of a PO: per-line icons, mismatch comments, missing-items
// block and an overall outcome stamp
pub mod canvas;
pub mod stamp;

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::rc::Rc;

use lopdf::{Document, ObjectId};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::AnnotationConfig;
use crate::error::{ValidatorError, ValidatorResult};
use crate::logging::PerformanceTimer;
use crate::models::{
    format_money, AnnotationStatus, LineAnnotation, MissingWorkItem, ValidationResult, ValidationStatus,
};
use crate::pdf::{DocumentReader, PageLayout};

use canvas::{add_blank_page, add_font, media_box, text_width, PageCanvas, BLACK, GREEN, RED, WHITE, YELLOW};

const MISSING_HEADER: &str = "MISSING WORK ITEMS (not found on PO):";
const MISSING_CONTINUED: &str = "MISSING WORK ITEMS (continued):";
const HEADER_FONT_SIZE: f32 = 9.0;
const ITEM_FONT_SIZE: f32 = 8.0;
const LINE_SPACING: f32 = 12.0;
const BOTTOM_MARGIN: f32 = 20.0;
const BLOCK_PAD: f32 = 4.0;
const COMMENT_PAD: f32 = 2.0;
const SEARCH_PREFIXES: [usize; 2] = [60, 30];

/// Overall verdict stamped on the first page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Outcome {
    Approved,
    Rejected,
    Inconclusive,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Approved => "APPROVED",
            Outcome::Rejected => "REJECTED",
            Outcome::Inconclusive => "INCONCLUSIVE",
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Map a validation result to the stamp outcome.
pub fn determine_outcome(result: &ValidationResult) -> Outcome {
    if !result.mismatches.is_empty() {
        return Outcome::Rejected;
    }
    if !result.missing_items.is_empty() {
        return Outcome::Inconclusive;
    }
    if matches!(
        result.status,
        ValidationStatus::NoPricing | ValidationStatus::ExtractionFailed | ValidationStatus::Skipped
    ) {
        return Outcome::Inconclusive;
    }
    if result
        .annotations
        .iter()
        .any(|a| a.status == AnnotationStatus::Unverified)
    {
        return Outcome::Inconclusive;
    }
    Outcome::Approved
}

/// `{stem}_{OUTCOME}.pdf`, with `UNKNOWN` standing in for a missing name.
pub fn output_filename(document_name: &str, outcome: Outcome) -> String {
    let name = if document_name.trim().is_empty() {
        "UNKNOWN.pdf"
    } else {
        document_name
    };
    let stem = Path::new(name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "UNKNOWN".to_string());
    format!("{}_{}.pdf", stem, outcome)
}

/// Annotated document ready to be written or uploaded.
#[derive(Debug, Clone)]
pub struct AnnotatedPdf {
    pub bytes: Vec<u8>,
    pub filename: String,
    pub outcome: Outcome,
}

pub struct Annotator {
    reader: Rc<dyn DocumentReader>,
    config: AnnotationConfig,
}

impl Annotator {
    pub fn new(reader: Rc<dyn DocumentReader>, config: AnnotationConfig) -> Self {
        Self { reader, config }
    }

    /// Produce the marked-up copy of `pdf_bytes` for `result`.
    pub fn annotate(&self, pdf_bytes: &[u8], result: &ValidationResult) -> ValidatorResult<AnnotatedPdf> {
        let timer = PerformanceTimer::start("PDF annotation");

        let mut doc = Document::load_mem(pdf_bytes)
            .map_err(|e| ValidatorError::markup_with_source("Failed to open PDF for annotation", e))?;
        let mut page_ids: Vec<ObjectId> = doc.get_pages().into_values().collect();
        if page_ids.is_empty() {
            return Err(ValidatorError::markup("PDF has no pages"));
        }

        let layouts = self.layouts(pdf_bytes, result);
        let mut canvases: BTreeMap<ObjectId, PageCanvas> = BTreeMap::new();
        let mut used_rows: HashSet<(usize, i64)> = HashSet::new();

        let mut drawn = 0;
        for ann in &result.annotations {
            let mut page_index = ann.page_number.unwrap_or(0);
            if page_index >= page_ids.len() {
                page_index = 0;
            }
            let layout = layouts.iter().find(|l| l.page_index == page_index);

            let Some((x, y_center)) = self.resolve_position(ann, page_index, layout, &mut used_rows) else {
                debug!("Could not place {:?} on page {}", ann.search_text, page_index);
                continue;
            };

            let canvas = canvas_for(&doc, &mut canvases, page_ids[page_index])?;
            self.draw_icon(canvas, ann.status, x, y_center);
            if !ann.comment.is_empty()
                && matches!(ann.status, AnnotationStatus::Mismatch | AnnotationStatus::Missing)
            {
                self.draw_comment(canvas, x, y_center, &ann.comment);
            }
            drawn += 1;
        }
        timer.checkpoint("line marks");

        if !result.missing_items.is_empty() {
            let last = page_ids.len() - 1;
            let last_layout = layouts.iter().find(|l| l.page_index == last);
            self.draw_missing_block(&mut doc, &mut canvases, &mut page_ids, last_layout, &result.missing_items)?;
            timer.checkpoint("missing-items block");
        }

        let outcome = determine_outcome(result);
        let stamp_image = stamp::load_stamp(self.config.stamps_dir.as_deref(), outcome);
        let first_page = canvas_for(&doc, &mut canvases, page_ids[0])?;
        stamp::draw_stamp(
            &mut doc,
            first_page,
            outcome,
            stamp_image.as_ref(),
            self.config.stamp_width,
        );
        timer.checkpoint("stamp");

        let font_id = if canvases.values().any(PageCanvas::uses_font) {
            Some(add_font(&mut doc))
        } else {
            None
        };
        for (page_id, canvas) in canvases {
            canvas.apply(&mut doc, page_id, font_id)?;
        }

        doc.compress();
        let mut bytes = Vec::new();
        doc.save_to(&mut bytes)
            .map_err(|e| ValidatorError::markup(format!("Failed to serialize annotated PDF: {}", e)))?;

        let filename = output_filename(&result.document_name, outcome);
        info!(
            "🖊️ Annotated {} ({} of {} marks placed, {} missing items) -> {}",
            result.document_name,
            drawn,
            result.annotations.len(),
            result.missing_items.len(),
            filename
        );

        Ok(AnnotatedPdf {
            bytes,
            filename,
            outcome,
        })
    }

    /// Page layouts, fetched only when something needs text positions.
    fn layouts(&self, pdf_bytes: &[u8], result: &ValidationResult) -> Vec<PageLayout> {
        let needs_search = result
            .annotations
            .iter()
            .any(|a| a.bbox.is_none() && !a.search_text.trim().is_empty());
        if !needs_search && result.missing_items.is_empty() {
            return Vec::new();
        }
        match self.reader.page_layouts(pdf_bytes) {
            Ok(layouts) => layouts,
            Err(e) => {
                warn!("⚠️ Text positions unavailable, annotating without search: {}", e);
                Vec::new()
            }
        }
    }

    /// Icon origin `(x, y_center)` for an annotation, or `None` when it cannot be placed.
    ///
    /// A stored box puts the icon just left of the row (right of it when the
    /// row starts at the page edge) and claims the row. Otherwise the page is
    /// searched for the annotation text, full length then 60 then 30 chars,
    /// taking the first hit on a row nobody has claimed yet.
    pub fn resolve_position(
        &self,
        ann: &LineAnnotation,
        page_index: usize,
        layout: Option<&PageLayout>,
        used_rows: &mut HashSet<(usize, i64)>,
    ) -> Option<(f32, f32)> {
        let offset = self.config.icon_size + self.config.icon_margin;

        if let Some(bbox) = ann.bbox {
            let y_center = bbox.center_y();
            used_rows.insert((page_index, y_center.round() as i64));
            let mut x = bbox.x0 - offset;
            if x < 2.0 {
                x = bbox.x1 + self.config.icon_margin;
            }
            return Some((x, y_center));
        }

        let search = ann.search_text.trim();
        if search.is_empty() {
            return None;
        }
        let layout = layout?;

        let full = search.chars().count();
        let lengths = std::iter::once(full).chain(SEARCH_PREFIXES.iter().copied());
        for len in lengths {
            let needle: String = search.chars().take(len).collect();
            for hit in layout.search(&needle) {
                let y_center = hit.center_y();
                let key = (page_index, y_center.round() as i64);
                if used_rows.insert(key) {
                    let mut x = hit.x0 - offset;
                    if x < 2.0 {
                        x = hit.x0 + self.config.icon_margin;
                    }
                    return Some((x, y_center));
                }
            }
        }
        None
    }

    fn draw_icon(&self, canvas: &mut PageCanvas, status: AnnotationStatus, x: f32, yc: f32) {
        let size = self.config.icon_size;
        let half = size / 2.0;
        match status {
            AnnotationStatus::Ok => canvas.polyline(
                &[(x + 2.0, yc), (x + half, yc + half - 2.0), (x + size - 2.0, yc - half + 2.0)],
                GREEN,
                2.5,
            ),
            AnnotationStatus::Mismatch | AnnotationStatus::Missing => {
                canvas.line(
                    (x + 2.0, yc - half + 2.0),
                    (x + size - 2.0, yc + half - 2.0),
                    RED,
                    2.5,
                );
                canvas.line(
                    (x + size - 2.0, yc - half + 2.0),
                    (x + 2.0, yc + half - 2.0),
                    RED,
                    2.5,
                );
            }
            AnnotationStatus::Unverified => {
                canvas.fill_polygon(
                    &[
                        (x + half, yc - half + 1.0),
                        (x + size - 1.0, yc + half - 1.0),
                        (x + 1.0, yc + half - 1.0),
                    ],
                    YELLOW,
                );
                let glyph = size * 0.6;
                let gx = x + half - text_width("!", glyph) / 2.0;
                canvas.text(gx, yc + half - 2.5, glyph, BLACK, "!");
            }
        }
    }

    fn draw_comment(&self, canvas: &mut PageCanvas, x: f32, yc: f32, comment: &str) {
        let size = self.config.comment_font_size;
        let cx = x + self.config.icon_size + self.config.icon_margin;
        let baseline = yc + size / 2.0;
        let width = text_width(comment, size);
        canvas.fill_rect(
            cx - COMMENT_PAD,
            baseline - size - COMMENT_PAD,
            cx + width + COMMENT_PAD,
            baseline + COMMENT_PAD,
            WHITE,
        );
        canvas.text(cx, baseline, size, RED, comment);
    }

    /// List unmatched work items at the bottom of the last page, or on new
    /// pages when the block would run into the page content or past the top.
    fn draw_missing_block(
        &self,
        doc: &mut Document,
        canvases: &mut BTreeMap<ObjectId, PageCanvas>,
        page_ids: &mut Vec<ObjectId>,
        last_layout: Option<&PageLayout>,
        missing: &[MissingWorkItem],
    ) -> ValidatorResult<()> {
        let items: Vec<String> = missing
            .iter()
            .map(|m| {
                let price = m
                    .expected_price
                    .map(format_money)
                    .unwrap_or_else(|| "n/a".to_string());
                format!("  S/N {}  -  {}  ({})", m.serial_number, m.asset_name, price)
            })
            .collect();

        let mut page_id = page_ids[page_ids.len() - 1];
        let page_box = media_box(doc, page_id)?;
        let per_page = missing_items_per_page(page_box.height());

        let block_height = missing_block_height(items.len());
        let block_top = page_box.height() - BOTTOM_MARGIN - block_height - HEADER_FONT_SIZE - BLOCK_PAD;
        let fits = items.len() <= per_page
            && match last_layout.and_then(PageLayout::content_bottom) {
                Some(content_bottom) => block_top > content_bottom,
                None => block_height + BOTTOM_MARGIN <= (page_box.height() - BOTTOM_MARGIN) / 2.0,
            };

        let mut header = MISSING_HEADER;
        let mut remaining = items.as_slice();
        loop {
            if !fits || header != MISSING_HEADER {
                page_id = add_blank_page(doc, page_box.width(), page_box.height())?;
                page_ids.push(page_id);
                debug!("Missing-items block continues on new page {}", page_ids.len());
            }
            let take = remaining.len().min(per_page);
            let canvas = canvas_for(doc, canvases, page_id)?;
            draw_missing_lines(canvas, header, &remaining[..take]);
            remaining = &remaining[take..];
            if remaining.is_empty() {
                return Ok(());
            }
            header = MISSING_CONTINUED;
        }
    }
}

/// Header plus `items` lines, header baseline to last baseline.
fn missing_block_height(items: usize) -> f32 {
    HEADER_FONT_SIZE + LINE_SPACING * items as f32
}

/// Most item lines one page holds below a header without crossing either margin.
fn missing_items_per_page(page_height: f32) -> usize {
    let room = page_height - 2.0 * BOTTOM_MARGIN - 2.0 * HEADER_FONT_SIZE - BLOCK_PAD;
    ((room / LINE_SPACING).floor() as usize).max(1)
}

/// Header and item lines anchored to the bottom margin of the canvas page.
fn draw_missing_lines(canvas: &mut PageCanvas, header: &str, items: &[String]) {
    let mut lines: Vec<(&str, f32, f32)> = vec![(header, HEADER_FONT_SIZE, 36.0)];
    lines.extend(items.iter().map(|text| (text.as_str(), ITEM_FONT_SIZE, 40.0)));

    let y_start = canvas.height() - BOTTOM_MARGIN - missing_block_height(items.len());
    let block_top = y_start - HEADER_FONT_SIZE - BLOCK_PAD;
    let last_baseline = y_start + LINE_SPACING * items.len() as f32;
    let max_width = lines
        .iter()
        .map(|(text, size, _)| text_width(text, *size))
        .fold(0.0_f32, f32::max);
    canvas.fill_rect(
        36.0 - BLOCK_PAD,
        block_top,
        36.0 + max_width + BLOCK_PAD,
        last_baseline + BLOCK_PAD,
        WHITE,
    );

    let mut baseline = y_start;
    for (text, size, x) in lines {
        canvas.text(x, baseline, size, RED, text);
        baseline += LINE_SPACING;
    }
}

fn canvas_for<'a>(
    doc: &Document,
    canvases: &'a mut BTreeMap<ObjectId, PageCanvas>,
    page_id: ObjectId,
) -> ValidatorResult<&'a mut PageCanvas> {
    if !canvases.contains_key(&page_id) {
        canvases.insert(page_id, PageCanvas::new(media_box(doc, page_id)?));
    }
    canvases
        .get_mut(&page_id)
        .ok_or_else(|| ValidatorError::markup("page canvas vanished"))
}
