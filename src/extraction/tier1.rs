use std::collections::HashSet;
use std::rc::Rc;

use tracing::{debug, info, warn};

use super::patterns;
use super::table_parser::TableParser;
use super::tables::TableDetector;
use super::text_parser::parse_text_lines;
use super::ExtractionTier;
use crate::config::ExtractionConfig;
use crate::models::{ExtractionMethod, PoExtraction, PoLineItem};
use crate::pdf::{DocumentReader, PageLayout};

/// Confidence reported when only raw text could be recovered
const RAW_TEXT_CONFIDENCE: f64 = 0.1;

/// Heuristic extraction from the PDF's text layer: tables first, then
/// dollar-amount lines.
pub struct Tier1Parser {
    reader: Rc<dyn DocumentReader>,
    detector: TableDetector,
    parser: TableParser,
    raw_text_limit: usize,
    text_confidence: f64,
}

impl Tier1Parser {
    pub fn new(reader: Rc<dyn DocumentReader>, config: &ExtractionConfig) -> Self {
        Self {
            reader,
            detector: TableDetector::from_config(config),
            parser: TableParser::new(config.header_scan_rows, config.row_merge_tolerance),
            raw_text_limit: config.raw_text_limit,
            text_confidence: config.text_confidence,
        }
    }

    /// Parse a PDF. `None` when the document cannot be opened or has neither
    /// text nor tables.
    pub fn parse(&self, pdf_bytes: &[u8]) -> Option<PoExtraction> {
        match self.reader.page_layouts(pdf_bytes) {
            Ok(layouts) => self.parse_layouts(&layouts),
            Err(e) => {
                warn!("Tier 1 could not read PDF: {}", e);
                None
            }
        }
    }

    pub fn parse_layouts(&self, layouts: &[PageLayout]) -> Option<PoExtraction> {
        let pages: Vec<(usize, &str)> = layouts
            .iter()
            .filter(|l| !l.text.is_empty())
            .map(|l| (l.page_index, l.text.as_str()))
            .collect();
        let raw_text = pages.iter().map(|(_, t)| *t).collect::<Vec<_>>().join("\n");

        let tables: Vec<_> = layouts.iter().flat_map(|l| self.detector.detect(l)).collect();
        debug!("Tier 1: {} pages with text, {} tables", pages.len(), tables.len());

        if raw_text.is_empty() && tables.is_empty() {
            return None;
        }

        let po_number = patterns::find_po_number(&raw_text);
        let excerpt: String = raw_text.chars().take(self.raw_text_limit).collect();

        let mut best_items = Vec::new();
        let mut best_conf = 0.0;
        for table in &tables {
            let parsed = self.parser.parse(table);
            if parsed.confidence > best_conf {
                best_items = parsed.items;
                best_conf = parsed.confidence;
            }
        }

        if !best_items.is_empty() {
            info!("📊 Table parse: {} items, confidence {:.3}", best_items.len(), best_conf);
            return Some(PoExtraction {
                po_number,
                line_items: enrich_serials(&best_items, &raw_text),
                confidence: best_conf,
                extraction_method: ExtractionMethod::Table,
                raw_text: excerpt,
            });
        }

        let text_items = parse_text_lines(&pages);
        if !text_items.is_empty() {
            info!("📝 Text-line parse: {} items", text_items.len());
            return Some(PoExtraction {
                po_number,
                line_items: text_items,
                confidence: self.text_confidence,
                extraction_method: ExtractionMethod::Text,
                raw_text: excerpt,
            });
        }

        Some(PoExtraction {
            po_number,
            line_items: Vec::new(),
            confidence: RAW_TEXT_CONFIDENCE,
            extraction_method: ExtractionMethod::None,
            raw_text: excerpt,
        })
    }
}

impl ExtractionTier for Tier1Parser {
    fn name(&self) -> &'static str {
        "tier-1"
    }

    fn extract(&self, pdf_bytes: &[u8]) -> Option<PoExtraction> {
        self.parse(pdf_bytes)
    }
}

/// Assign serial numbers found in `raw_text` to items lacking one, in order.
///
/// IP-shaped tokens and serials already on another item are never assigned.
pub fn enrich_serials(items: &[PoLineItem], raw_text: &str) -> Vec<PoLineItem> {
    let assigned: HashSet<&str> = items.iter().filter_map(|i| i.serial_number.as_deref()).collect();
    let mut available = patterns::all_serials_in_text(raw_text)
        .into_iter()
        .filter(|sn| !patterns::is_ip_address(sn) && !assigned.contains(sn.as_str()));

    items
        .iter()
        .map(|item| {
            if item.serial_number.is_some() {
                return item.clone();
            }
            match available.next() {
                Some(sn) => item.with_serial(sn),
                None => item.clone(),
            }
        })
        .collect()
}
