use std::path::Path;

use lopdf::{dictionary, Document, ObjectId, Stream};
use tracing::{debug, warn};

use super::canvas::{text_width, PageCanvas, Rgb, GREEN, RED, WHITE, YELLOW};
use super::Outcome;
use crate::error::{ValidatorError, ValidatorResult};

const MARGIN: f32 = 20.0;
const VECTOR_HEIGHT: f32 = 50.0;
const VECTOR_LABEL_SIZE: f32 = 20.0;

impl Outcome {
    pub fn stamp_file(&self) -> &'static str {
        match self {
            Outcome::Approved => "Approved_stamp.png",
            Outcome::Rejected => "Rejected_stamp.png",
            Outcome::Inconclusive => "Inconclusive_stamp.png",
        }
    }

    fn color(&self) -> Rgb {
        match self {
            Outcome::Approved => GREEN,
            Outcome::Rejected => RED,
            Outcome::Inconclusive => YELLOW,
        }
    }
}

/// Decoded stamp ready to embed: RGB samples plus an alpha mask.
#[derive(Debug)]
pub struct StampImage {
    pub width: u32,
    pub height: u32,
    rgb: Vec<u8>,
    alpha: Vec<u8>,
}

impl StampImage {
    pub fn from_png(data: &[u8]) -> ValidatorResult<Self> {
        let decoded = image::load_from_memory(data)
            .map_err(|e| ValidatorError::markup_with_source("Failed to decode stamp image", e))?
            .to_rgba8();
        let (width, height) = decoded.dimensions();
        if width == 0 || height == 0 {
            return Err(ValidatorError::markup("Stamp image has no pixels"));
        }

        let mut rgb = Vec::with_capacity((width * height * 3) as usize);
        let mut alpha = Vec::with_capacity((width * height) as usize);
        for px in decoded.pixels() {
            rgb.extend_from_slice(&px.0[..3]);
            alpha.push(px.0[3]);
        }
        Ok(Self {
            width,
            height,
            rgb,
            alpha,
        })
    }

    /// Add the image and its soft mask as XObjects; returns the image id.
    fn embed(&self, doc: &mut Document) -> ObjectId {
        let mask_id = doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => self.width as i64,
                "Height" => self.height as i64,
                "ColorSpace" => "DeviceGray",
                "BitsPerComponent" => 8,
            },
            self.alpha.clone(),
        ));
        doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => self.width as i64,
                "Height" => self.height as i64,
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8,
                "SMask" => mask_id,
            },
            self.rgb.clone(),
        ))
    }
}

/// Stamp asset for `outcome`, if a stamps directory is configured and holds a readable PNG.
pub fn load_stamp(stamps_dir: Option<&Path>, outcome: Outcome) -> Option<StampImage> {
    let path = stamps_dir?.join(outcome.stamp_file());
    if !path.exists() {
        debug!("No stamp asset at {}", path.display());
        return None;
    }

    let loaded = std::fs::read(&path)
        .map_err(|e| ValidatorError::file_io(path.display().to_string(), e))
        .and_then(|data| StampImage::from_png(&data));
    match loaded {
        Ok(stamp) => Some(stamp),
        Err(e) => {
            warn!("⚠️ Unusable stamp {}: {}", path.display(), e);
            None
        }
    }
}

/// Draw the outcome stamp in the top-right corner of `canvas`.
pub fn draw_stamp(
    doc: &mut Document,
    canvas: &mut PageCanvas,
    outcome: Outcome,
    image: Option<&StampImage>,
    stamp_width: f32,
) {
    let x0 = canvas.width() - stamp_width - MARGIN;
    let y0 = MARGIN;

    match image {
        Some(img) => {
            let height = stamp_width * img.height as f32 / img.width as f32;
            let id = img.embed(doc);
            canvas.image(id, x0, y0, stamp_width, height);
        }
        None => {
            let color = outcome.color();
            let x1 = x0 + stamp_width;
            let y1 = y0 + VECTOR_HEIGHT;
            canvas.fill_rect(x0, y0, x1, y1, WHITE);
            canvas.stroke_rect(x0, y0, x1, y1, color, 3.0);
            canvas.stroke_rect(x0 + 4.0, y0 + 4.0, x1 - 4.0, y1 - 4.0, color, 1.0);

            let label = outcome.as_str();
            let mut size = VECTOR_LABEL_SIZE;
            let inner = stamp_width - 16.0;
            let w = text_width(label, size);
            if w > inner {
                size *= inner / w;
            }
            let tx = x0 + (stamp_width - text_width(label, size)) / 2.0;
            let baseline = y0 + (VECTOR_HEIGHT + size * 0.7) / 2.0;
            canvas.text(tx, baseline, size, color, label);
        }
    }
}
