// Two-tier PO extraction: text-layer heuristics, escalating to a vision model
pub mod patterns;
pub mod table_parser;
pub mod tables;
pub mod text_parser;
pub mod tier1;
pub mod vision;

use tracing::info;

use crate::logging::PerformanceTimer;
use crate::models::PoExtraction;

pub use tier1::Tier1Parser;
pub use vision::{GeminiClient, VisionModel, VisionTier};

/// One extraction strategy. `None` means the tier produced nothing usable.
pub trait ExtractionTier {
    fn name(&self) -> &'static str;
    fn extract(&self, pdf_bytes: &[u8]) -> Option<PoExtraction>;
}

/// Routes a document through tier 1 and, when its confidence is too low,
/// through tier 2.
pub struct Extractor {
    tier1: Box<dyn ExtractionTier>,
    tier2: Option<Box<dyn ExtractionTier>>,
    confidence_threshold: f64,
}

impl Extractor {
    pub fn new(
        tier1: Box<dyn ExtractionTier>,
        tier2: Option<Box<dyn ExtractionTier>>,
        confidence_threshold: f64,
    ) -> Self {
        Self {
            tier1,
            tier2,
            confidence_threshold,
        }
    }

    /// Best available extraction. Never fails; an unreadable document yields
    /// a zero-confidence extraction with method `none`.
    pub fn extract(&self, pdf_bytes: &[u8]) -> PoExtraction {
        let timer = PerformanceTimer::start("PO extraction");

        let first = self.tier1.extract(pdf_bytes);
        timer.checkpoint(self.tier1.name());
        if let Some(result) = &first {
            if result.confidence >= self.confidence_threshold {
                info!(
                    "✅ {} succeeded: confidence {:.2}, {} items",
                    self.tier1.name(),
                    result.confidence,
                    result.line_items.len()
                );
                return first.unwrap_or_default();
            }
            info!("{} confidence {:.2}, trying vision fallback", self.tier1.name(), result.confidence);
        } else {
            info!("{} returned nothing, trying vision fallback", self.tier1.name());
        }

        let second = self.tier2.as_ref().and_then(|t| {
            let result = t.extract(pdf_bytes);
            timer.checkpoint(t.name());
            result
        });
        match (first, second) {
            (first, Some(mut second)) if !second.line_items.is_empty() => {
                if let Some(raw) = first.map(|f| f.raw_text).filter(|r| !r.is_empty()) {
                    second.raw_text = raw;
                }
                info!("✅ Vision fallback succeeded: {} items", second.line_items.len());
                second
            }
            (Some(first), _) => first,
            (None, _) => PoExtraction::empty(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExtractionMethod, PoLineItem};
    use std::cell::Cell;
    use std::rc::Rc;

    struct StubTier {
        result: Option<PoExtraction>,
        calls: Rc<Cell<usize>>,
    }

    impl ExtractionTier for StubTier {
        fn name(&self) -> &'static str {
            "stub"
        }

        fn extract(&self, _pdf_bytes: &[u8]) -> Option<PoExtraction> {
            self.calls.set(self.calls.get() + 1);
            self.result.clone()
        }
    }

    fn stub(result: Option<PoExtraction>) -> (Box<dyn ExtractionTier>, Rc<Cell<usize>>) {
        let calls = Rc::new(Cell::new(0));
        (
            Box::new(StubTier {
                result,
                calls: calls.clone(),
            }),
            calls,
        )
    }

    fn extraction(method: ExtractionMethod, confidence: f64, items: usize, raw: &str) -> PoExtraction {
        PoExtraction {
            po_number: "PO1".to_string(),
            line_items: vec![PoLineItem::default(); items],
            confidence,
            extraction_method: method,
            raw_text: raw.to_string(),
        }
    }

    #[test]
    fn test_confident_tier1_skips_tier2() {
        let (t1, _) = stub(Some(extraction(ExtractionMethod::Table, 0.7, 2, "raw")));
        let (t2, t2_calls) = stub(Some(extraction(ExtractionMethod::Llm, 0.9, 3, "")));
        let result = Extractor::new(t1, Some(t2), 0.7).extract(b"");
        assert_eq!(result.extraction_method, ExtractionMethod::Table);
        assert_eq!(t2_calls.get(), 0);
    }

    #[test]
    fn test_tier2_wins_and_inherits_raw_text() {
        let (t1, _) = stub(Some(extraction(ExtractionMethod::Text, 0.5, 1, "page text")));
        let (t2, t2_calls) = stub(Some(extraction(ExtractionMethod::Llm, 0.9, 3, "")));
        let result = Extractor::new(t1, Some(t2), 0.7).extract(b"");
        assert_eq!(t2_calls.get(), 1);
        assert_eq!(result.extraction_method, ExtractionMethod::Llm);
        assert_eq!(result.line_items.len(), 3);
        assert_eq!(result.raw_text, "page text");
    }

    #[test]
    fn test_empty_tier2_falls_back_to_tier1() {
        let (t1, _) = stub(Some(extraction(ExtractionMethod::None, 0.1, 0, "page text")));
        let (t2, _) = stub(Some(extraction(ExtractionMethod::Llm, 0.9, 0, "")));
        let result = Extractor::new(t1, Some(t2), 0.7).extract(b"");
        assert_eq!(result.extraction_method, ExtractionMethod::None);
        assert_eq!(result.confidence, 0.1);

        let (t1, _) = stub(Some(extraction(ExtractionMethod::Text, 0.5, 1, "")));
        let (t2, _) = stub(None);
        let result = Extractor::new(t1, Some(t2), 0.7).extract(b"");
        assert_eq!(result.extraction_method, ExtractionMethod::Text);
    }

    #[test]
    fn test_nothing_anywhere() {
        let (t1, _) = stub(None);
        let (t2, _) = stub(None);
        let result = Extractor::new(t1, Some(t2), 0.7).extract(b"");
        assert_eq!(result, PoExtraction::empty());
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.extraction_method, ExtractionMethod::None);

        let (t1, _) = stub(None);
        assert!(Extractor::new(t1, None, 0.7).extract(b"").line_items.is_empty());
    }

    #[test]
    fn test_tier2_alone_when_tier1_empty() {
        let (t1, _) = stub(None);
        let (t2, _) = stub(Some(extraction(ExtractionMethod::Llm, 0.9, 1, "")));
        let result = Extractor::new(t1, Some(t2), 0.7).extract(b"");
        assert_eq!(result.extraction_method, ExtractionMethod::Llm);
        assert!(result.raw_text.is_empty());
    }
}
