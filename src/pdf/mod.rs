// PDF access: positioned text for the parsers and page rasters for the vision tier
pub mod layout;

pub use layout::{PageLayout, TextLine, TextSegment};

use image::ImageFormat;
use pdfium_render::prelude::*;
use std::io::Cursor;
use tracing::{debug, warn};

use crate::error::{ErrorContext, ValidatorResult};
use crate::models::BBox;

/// PDF points per inch
const PDF_POINTS_PER_INCH: f32 = 72.0;

/// One page rendered to PNG.
#[derive(Debug, Clone)]
pub struct PageImage {
    pub page_index: usize,
    pub width_px: u32,
    pub height_px: u32,
    pub png_data: Vec<u8>,
}

/// Page box in PDF user space, bottom-left origin.
///
/// Text positions and overlay drawing both measure from the top-left corner
/// of this box, so a box found by the reader can be drawn on unchanged.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageBox {
    pub left: f32,
    pub bottom: f32,
    pub right: f32,
    pub top: f32,
}

impl PageBox {
    /// US Letter at the origin
    pub const LETTER: PageBox = PageBox {
        left: 0.0,
        bottom: 0.0,
        right: 612.0,
        top: 792.0,
    };

    /// Normalised box from two opposite corners.
    pub fn from_corners(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self {
            left: x0.min(x1),
            bottom: y0.min(y1),
            right: x0.max(x1),
            top: y0.max(y1),
        }
    }

    pub fn width(&self) -> f32 {
        self.right - self.left
    }

    pub fn height(&self) -> f32 {
        self.top - self.bottom
    }

    /// User-space rectangle to a top-left-origin box on this page.
    pub fn to_page_bbox(&self, left: f32, bottom: f32, right: f32, top: f32) -> BBox {
        BBox::new(left - self.left, self.top - top, right - self.left, self.top - bottom)
    }

    /// Top-left-origin point back to user space.
    pub fn to_user(&self, x: f32, y: f32) -> (f32, f32) {
        (self.left + x, self.top - y)
    }
}

/// Read access to a PDF's pages.
pub trait DocumentReader {
    /// Positioned text of every page, in page order.
    fn page_layouts(&self, pdf_bytes: &[u8]) -> ValidatorResult<Vec<PageLayout>>;

    /// Rasterize every page at `dpi`.
    fn render_pages(&self, pdf_bytes: &[u8], dpi: u32) -> ValidatorResult<Vec<PageImage>>;

    /// Text of the first page, empty if the document has no pages.
    fn first_page_text(&self, pdf_bytes: &[u8]) -> ValidatorResult<String> {
        Ok(self
            .page_layouts(pdf_bytes)?
            .into_iter()
            .next()
            .map(|p| p.text)
            .unwrap_or_default())
    }
}

/// pdfium-backed reader
pub struct PdfEngine {
    pdfium: Pdfium,
}

impl PdfEngine {
    /// Bind pdfium from the working directory, falling back to the system library.
    pub fn new() -> ValidatorResult<Self> {
        let bindings = Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
            .or_else(|_| Pdfium::bind_to_system_library())
            .with_context("Failed to bind pdfium")?;

        Ok(Self {
            pdfium: Pdfium::new(bindings),
        })
    }

    fn load<'a>(&'a self, pdf_bytes: &'a [u8]) -> ValidatorResult<PdfDocument<'a>> {
        self.pdfium
            .load_pdf_from_byte_slice(pdf_bytes, None)
            .with_context("Failed to load PDF")
    }

    /// MediaBox of `page`; the annotator draws against the same box.
    fn page_box(page: &PdfPage) -> PageBox {
        match page.boundaries().media() {
            Ok(media) => PageBox::from_corners(
                media.bounds.left().value,
                media.bounds.bottom().value,
                media.bounds.right().value,
                media.bounds.top().value,
            ),
            Err(_) => PageBox::from_corners(0.0, 0.0, page.width().value, page.height().value),
        }
    }

    fn layout_of(page_index: usize, page: &PdfPage) -> ValidatorResult<PageLayout> {
        let page_box = Self::page_box(page);
        // Text bounds come back in unrotated user space, which is also where
        // the overlay is drawn; only the reading order suffers on a turned page
        match page.rotation() {
            Ok(PdfPageRenderRotation::None) | Err(_) => {}
            Ok(rotation) => warn!(
                "⚠️ Page {} has /Rotate {:?}; row detection reads it unrotated",
                page_index, rotation
            ),
        }
        let text = page
            .text()
            .with_context(&format!("Failed to get text of page {}", page_index))?;

        let mut segments = Vec::new();
        for segment in text.segments().iter() {
            let content = segment.text();
            let content = content.trim();
            if content.is_empty() {
                continue;
            }
            let bounds = segment.bounds();
            segments.push(TextSegment::new(
                content,
                page_box.to_page_bbox(
                    bounds.left().value,
                    bounds.bottom().value,
                    bounds.right().value,
                    bounds.top().value,
                ),
            ));
        }

        debug!("Page {}: {} text segments", page_index, segments.len());
        Ok(PageLayout::from_segments(
            page_index,
            page_box.width(),
            page_box.height(),
            segments,
        ))
    }
}

impl DocumentReader for PdfEngine {
    fn page_layouts(&self, pdf_bytes: &[u8]) -> ValidatorResult<Vec<PageLayout>> {
        let document = self.load(pdf_bytes)?;
        let mut layouts = Vec::with_capacity(document.pages().len() as usize);
        for (index, page) in document.pages().iter().enumerate() {
            layouts.push(Self::layout_of(index, &page)?);
        }
        Ok(layouts)
    }

    fn render_pages(&self, pdf_bytes: &[u8], dpi: u32) -> ValidatorResult<Vec<PageImage>> {
        let document = self.load(pdf_bytes)?;
        let mut images = Vec::with_capacity(document.pages().len() as usize);

        for (index, page) in document.pages().iter().enumerate() {
            let width = (page.width().value * dpi as f32 / PDF_POINTS_PER_INCH) as i32;
            let height = (page.height().value * dpi as f32 / PDF_POINTS_PER_INCH) as i32;

            let render_config = PdfRenderConfig::new()
                .set_target_width(width)
                .set_target_height(height);

            let bitmap = page
                .render_with_config(&render_config)
                .with_context(&format!("Failed to render page {}", index))?;

            let image = bitmap.as_image();
            let mut png_data = Vec::new();
            image
                .write_to(&mut Cursor::new(&mut png_data), ImageFormat::Png)
                .with_context(&format!("Failed to encode page {}", index))?;

            images.push(PageImage {
                page_index: index,
                width_px: image.width(),
                height_px: image.height(),
                png_data,
            });
        }

        Ok(images)
    }

    fn first_page_text(&self, pdf_bytes: &[u8]) -> ValidatorResult<String> {
        let document = self.load(pdf_bytes)?;
        let pages = document.pages();
        let text = match pages.iter().next() {
            Some(page) => Ok(Self::layout_of(0, &page)?.text),
            None => Ok(String::new()),
        };
        text
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::error::ValidatorError;

    /// In-memory reader serving fixed layouts regardless of the bytes passed.
    pub struct FakeReader {
        pub layouts: Vec<PageLayout>,
        pub fail: bool,
    }

    impl FakeReader {
        pub fn new(layouts: Vec<PageLayout>) -> Self {
            Self { layouts, fail: false }
        }

        pub fn failing() -> Self {
            Self {
                layouts: Vec::new(),
                fail: true,
            }
        }
    }

    impl DocumentReader for FakeReader {
        fn page_layouts(&self, _pdf_bytes: &[u8]) -> ValidatorResult<Vec<PageLayout>> {
            if self.fail {
                return Err(ValidatorError::pdf_processing("unreadable"));
            }
            Ok(self.layouts.clone())
        }

        fn render_pages(&self, _pdf_bytes: &[u8], _dpi: u32) -> ValidatorResult<Vec<PageImage>> {
            if self.fail {
                return Err(ValidatorError::pdf_processing("unreadable"));
            }
            Ok(self
                .layouts
                .iter()
                .map(|l| PageImage {
                    page_index: l.page_index,
                    width_px: 1,
                    height_px: 1,
                    png_data: vec![0x89, b'P', b'N', b'G'],
                })
                .collect())
        }
    }

    #[test]
    fn test_default_first_page_text() {
        let reader = FakeReader::new(vec![
            PageLayout::from_segments(
                0,
                612.0,
                792.0,
                vec![TextSegment::new("first", BBox::new(0.0, 0.0, 10.0, 10.0))],
            ),
            PageLayout::from_segments(
                1,
                612.0,
                792.0,
                vec![TextSegment::new("second", BBox::new(0.0, 0.0, 10.0, 10.0))],
            ),
        ]);
        assert_eq!(reader.first_page_text(b"").unwrap(), "first");
        assert!(FakeReader::failing().first_page_text(b"").is_err());
    }

    #[test]
    fn test_page_box_offset_media_box() {
        let page_box = PageBox::from_corners(0.0, 892.0, 612.0, 100.0);
        assert_eq!(page_box, PageBox { left: 0.0, bottom: 100.0, right: 612.0, top: 892.0 });
        assert_eq!(page_box.height(), 792.0);

        // a row whose text sits between y=790 and y=800 in user space
        let bbox = page_box.to_page_bbox(40.0, 790.0, 100.0, 800.0);
        assert_eq!(bbox, BBox::new(40.0, 92.0, 100.0, 102.0));
        assert_eq!(page_box.to_user(bbox.x0, bbox.top), (40.0, 800.0));
        assert_eq!(page_box.to_user(bbox.x1, bbox.bottom), (100.0, 790.0));
    }

    #[test]
    fn test_page_box_shifted_left_edge() {
        let page_box = PageBox::from_corners(-50.0, 0.0, 562.0, 792.0);
        let bbox = page_box.to_page_bbox(0.0, 700.0, 10.0, 710.0);
        assert_eq!(bbox.x0, 50.0);
        assert_eq!(page_box.to_user(bbox.x0, bbox.top), (0.0, 710.0));
    }
}
