//! Tier-2 extraction: page images sent to a vision-capable language model.
//!
//! Every failure on this path (missing credentials, rendering, transport,
//! unparseable output) is logged and reported as "no result" so the
//! orchestrator falls back to the tier-1 extraction.

use std::rc::Rc;
use std::time::Duration;

use base64::Engine;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, warn};

use super::patterns;
use super::ExtractionTier;
use crate::config::VisionConfig;
use crate::error::{ValidatorError, ValidatorResult};
use crate::models::{ExtractionMethod, PoExtraction, PoLineItem};
use crate::pdf::{DocumentReader, PageImage};

pub const EXTRACTION_PROMPT: &str = r#"You are a data-extraction assistant.  The user will show you page images of a Purchase Order (PO) document.  Extract ALL line items into JSON.

Return ONLY a JSON object with this schema (no markdown fences):
{
  "po_number": "<string>",
  "line_items": [
    {
      "serial_number": "<string or null>",
      "description": "<string>",
      "unit_price": <number or null>,
      "quantity": <integer or null>,
      "extended_price": <number or null>,
      "page_number": <0-based page index where this item appears>
    }
  ]
}

Rules:
- serial_number: the instrument serial number, S/N, or asset tag.  null if absent.
- unit_price: per-unit price.  null if not listed.
- extended_price: line total (qty × unit_price).  null if not listed.
- page_number: 0-based index of which page image the line item appears on.
- Omit header/footer rows, subtotals, tax lines, and shipping charges.
- INCLUDE line items with $0.00 price or zero quantity — they are real items.
- If the PO contains NO line-item pricing at all, return line items with null prices.
- Return valid JSON only.  No extra text.
"#;

const PROMPT_SUFFIX: &str = "\n\nExtract line items from this PO:";

static CODE_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^```(?:json)?\s*|\s*```$").unwrap());

/// A model that answers a text prompt about a set of page images.
pub trait VisionModel {
    /// Whether the model can be called at all (credentials present).
    fn is_available(&self) -> bool {
        true
    }

    fn generate(&self, prompt: &str, images: &[PageImage]) -> ValidatorResult<String>;
}

// Gemini generateContent wire types

#[derive(Debug, Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content {
    role: String,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part {
    Text { text: String },
    Image { inline_data: InlineData },
}

#[derive(Debug, Serialize)]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

/// Blocking Gemini REST client.
pub struct GeminiClient {
    http: Client,
    endpoint: String,
    model: String,
    api_key_env: String,
    max_output_tokens: u32,
}

impl GeminiClient {
    pub fn new(config: &VisionConfig) -> ValidatorResult<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ValidatorError::vision_with_source("Failed to build HTTP client", e))?;

        Ok(Self {
            http,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key_env: config.api_key_env.clone(),
            max_output_tokens: config.max_output_tokens,
        })
    }

    fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env).ok().filter(|k| !k.trim().is_empty())
    }

    fn url(&self) -> String {
        format!("{}/v1beta/models/{}:generateContent", self.endpoint, self.model)
    }

    fn build_request(&self, prompt: &str, images: &[PageImage]) -> GenerateRequest {
        let mut parts = vec![Part::Text {
            text: prompt.to_string(),
        }];
        for image in images {
            parts.push(Part::Image {
                inline_data: InlineData {
                    mime_type: "image/png".to_string(),
                    data: base64::engine::general_purpose::STANDARD.encode(&image.png_data),
                },
            });
        }

        GenerateRequest {
            contents: vec![Content {
                role: "user".to_string(),
                parts,
            }],
            generation_config: GenerationConfig {
                temperature: 0.0,
                max_output_tokens: self.max_output_tokens,
            },
        }
    }
}

impl VisionModel for GeminiClient {
    fn is_available(&self) -> bool {
        self.api_key().is_some()
    }

    fn generate(&self, prompt: &str, images: &[PageImage]) -> ValidatorResult<String> {
        let key = self
            .api_key()
            .ok_or_else(|| ValidatorError::vision(format!("{} not set", self.api_key_env)))?;

        let response = self
            .http
            .post(self.url())
            .header("x-goog-api-key", key)
            .json(&self.build_request(prompt, images))
            .send()
            .map_err(|e| {
                if e.is_timeout() {
                    ValidatorError::vision_with_source("Gemini request timed out", e)
                } else {
                    ValidatorError::vision_with_source("Gemini request failed", e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(ValidatorError::vision(format!(
                "Gemini returned {}: {}",
                status,
                body.chars().take(300).collect::<String>()
            )));
        }

        let parsed: GenerateResponse = response
            .json()
            .map_err(|e| ValidatorError::vision_with_source("Invalid Gemini response body", e))?;

        Ok(parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect::<String>())
            .unwrap_or_default())
    }
}

/// Tier-2 extractor. Holds an explicitly constructed model client.
pub struct VisionTier {
    reader: Rc<dyn DocumentReader>,
    model: Box<dyn VisionModel>,
    render_dpi: u32,
    confidence: f64,
}

impl VisionTier {
    pub fn new(reader: Rc<dyn DocumentReader>, model: Box<dyn VisionModel>, config: &VisionConfig) -> Self {
        Self {
            reader,
            model,
            render_dpi: config.render_dpi,
            confidence: config.confidence,
        }
    }

    pub fn parse(&self, pdf_bytes: &[u8]) -> Option<PoExtraction> {
        if !self.model.is_available() {
            warn!("Vision model credentials not set, tier 2 unavailable");
            return None;
        }

        let images = match self.reader.render_pages(pdf_bytes, self.render_dpi) {
            Ok(images) => images,
            Err(e) => {
                error!("Failed to render PDF pages for vision model: {}", e);
                return None;
            }
        };
        info!("🔭 Sending {} page image(s) to vision model", images.len());

        let prompt = format!("{}{}", EXTRACTION_PROMPT, PROMPT_SUFFIX);
        let raw = match self.model.generate(&prompt, &images) {
            Ok(raw) => raw,
            Err(e) => {
                crate::log_error!(e, "vision model call");
                return None;
            }
        };

        match parse_response(&raw, self.confidence) {
            Ok(extraction) => Some(extraction),
            Err(e) => {
                error!("Vision model returned invalid JSON ({}): {}", e, raw.chars().take(500).collect::<String>());
                None
            }
        }
    }
}

impl ExtractionTier for VisionTier {
    fn name(&self) -> &'static str {
        "tier-2"
    }

    fn extract(&self, pdf_bytes: &[u8]) -> Option<PoExtraction> {
        self.parse(pdf_bytes)
    }
}

#[derive(Debug, Deserialize)]
struct VisionPayload {
    #[serde(default)]
    po_number: Option<String>,
    #[serde(default)]
    line_items: Vec<VisionItem>,
}

#[derive(Debug, Deserialize)]
struct VisionItem {
    #[serde(default)]
    serial_number: Option<Value>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    unit_price: Option<Value>,
    #[serde(default)]
    quantity: Option<Value>,
    #[serde(default)]
    extended_price: Option<Value>,
    #[serde(default)]
    page_number: Option<Value>,
}

/// Map the model's JSON answer (optionally fenced) to an extraction.
pub fn parse_response(raw: &str, confidence: f64) -> ValidatorResult<PoExtraction> {
    let cleaned = CODE_FENCE.replace_all(raw.trim(), "");
    let payload: VisionPayload = serde_json::from_str(&cleaned)?;

    let line_items = payload
        .line_items
        .into_iter()
        .map(|item| PoLineItem {
            serial_number: item.serial_number.as_ref().and_then(value_text),
            description: item.description.unwrap_or_default(),
            unit_price: item.unit_price.as_ref().and_then(value_number),
            quantity: item
                .quantity
                .as_ref()
                .and_then(value_number)
                .filter(|q| *q >= 0.0)
                .map(|q| q as u32),
            extended_price: item.extended_price.as_ref().and_then(value_number),
            page_number: item
                .page_number
                .as_ref()
                .and_then(value_number)
                .filter(|p| *p >= 0.0)
                .map(|p| p as usize),
            bbox: None,
        })
        .collect();

    Ok(PoExtraction {
        po_number: payload.po_number.unwrap_or_default(),
        line_items,
        confidence,
        extraction_method: ExtractionMethod::Llm,
        raw_text: String::new(),
    })
}

fn value_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => patterns::clean_price(s),
        _ => None,
    }
}

fn value_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
