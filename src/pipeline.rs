//! End-to-end facade: extract, match, annotate.

use std::rc::Rc;

use tracing::{debug, info, warn};

use crate::annotate::{AnnotatedPdf, Annotator};
use crate::config::ValidatorConfig;
use crate::error::ValidatorResult;
use crate::extraction::{ExtractionTier, Extractor, GeminiClient, Tier1Parser, VisionModel, VisionTier};
use crate::matching::{is_price_update_request, skipped_result, MatchingEngine};
use crate::models::{PoExtraction, ValidationResult, ValidationStatus, WorkItem};
use crate::pdf::{DocumentReader, PdfEngine};
use crate::{log_error, log_processing_start};

pub struct PoValidator {
    reader: Rc<dyn DocumentReader>,
    extractor: Extractor,
    engine: MatchingEngine,
    annotator: Annotator,
}

impl PoValidator {
    /// Validator backed by pdfium and, when enabled, the Gemini vision model.
    pub fn new(config: &ValidatorConfig) -> ValidatorResult<Self> {
        let reader: Rc<dyn DocumentReader> = Rc::new(PdfEngine::new()?);

        let vision: Option<Box<dyn VisionModel>> = if config.vision.enabled {
            match GeminiClient::new(&config.vision) {
                Ok(client) => Some(Box::new(client)),
                Err(e) => {
                    warn!("⚠️ Vision fallback disabled: {}", e);
                    None
                }
            }
        } else {
            info!("Vision fallback disabled by configuration");
            None
        };

        Ok(Self::with_components(reader, vision, config))
    }

    /// Assemble a validator from an explicit reader and vision model.
    pub fn with_components(
        reader: Rc<dyn DocumentReader>,
        vision: Option<Box<dyn VisionModel>>,
        config: &ValidatorConfig,
    ) -> Self {
        let tier1: Box<dyn ExtractionTier> = Box::new(Tier1Parser::new(reader.clone(), &config.extraction));
        let tier2 = vision.map(|model| {
            Box::new(VisionTier::new(reader.clone(), model, &config.vision)) as Box<dyn ExtractionTier>
        });

        Self {
            extractor: Extractor::new(tier1, tier2, config.extraction.confidence_threshold),
            engine: MatchingEngine::new(&config.matching),
            annotator: Annotator::new(reader.clone(), config.annotation.clone()),
            reader,
        }
    }

    /// Extraction only, without matching.
    pub fn extract(&self, pdf_bytes: &[u8]) -> PoExtraction {
        self.extractor.extract(pdf_bytes)
    }

    /// Validate a PO against the work items of its service order.
    ///
    /// Never fails: unreadable or unsuitable documents come back with a
    /// status explaining why.
    pub fn validate(
        &self,
        pdf_bytes: &[u8],
        work_items: &[WorkItem],
        document_name: &str,
        service_order_id: Option<i64>,
    ) -> ValidationResult {
        log_processing_start!(document_name, pdf_bytes.len());

        match self.reader.first_page_text(pdf_bytes) {
            Ok(text) if is_price_update_request(&text) => {
                info!("⏭️ Skipping price-update request {}", document_name);
                return skipped_result().for_document(document_name, service_order_id);
            }
            Ok(_) => {}
            Err(e) => debug!("Quick content check failed, continuing: {}", e),
        }

        let extraction = self.extractor.extract(pdf_bytes);
        let result = self
            .engine
            .validate(&extraction, work_items)
            .for_document(document_name, service_order_id);

        info!(
            "📋 {} -> {} ({} mismatches, {} missing, {}/{} work items matched)",
            document_name,
            result.status,
            result.mismatches.len(),
            result.missing_items.len(),
            result.line_items_matched,
            result.work_items_total
        );
        result
    }

    /// Marked-up copy of the PO for an existing result.
    pub fn annotate(&self, pdf_bytes: &[u8], result: &ValidationResult) -> ValidatorResult<AnnotatedPdf> {
        self.annotator.annotate(pdf_bytes, result)
    }

    /// Validate, then annotate unless the document was skipped.
    ///
    /// The result is always returned; annotation failure is reported
    /// separately so the caller can fall back to the unannotated document.
    pub fn validate_and_annotate(
        &self,
        pdf_bytes: &[u8],
        work_items: &[WorkItem],
        document_name: &str,
        service_order_id: Option<i64>,
    ) -> (ValidationResult, ValidatorResult<Option<AnnotatedPdf>>) {
        let result = self.validate(pdf_bytes, work_items, document_name, service_order_id);
        if result.status == ValidationStatus::Skipped {
            return (result, Ok(None));
        }

        let annotated = self.annotate(pdf_bytes, &result);
        match &annotated {
            Ok(pdf) => info!("✅ Annotated PDF generated: {}", pdf.filename),
            Err(e) => {
                log_error!(e, document_name);
            }
        }
        (result, annotated.map(Some))
    }
}
