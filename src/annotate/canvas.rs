//! Minimal drawing surface over a lopdf page.
//!
//! Callers use top-left page coordinates in points; the canvas converts to
//! PDF user space using the page's MediaBox. Operations are buffered and
//! written as one content stream appended after the page's existing
//! content, which is wrapped in `q`/`Q` so its graphics state cannot leak
//! into the overlay.

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};

use crate::error::{ValidatorError, ValidatorResult};
pub use crate::pdf::PageBox;

/// Resource name of the overlay font
pub const FONT_NAME: &str = "POVHelv";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rgb(pub f32, pub f32, pub f32);

pub const GREEN: Rgb = Rgb(0.18, 0.70, 0.29);
pub const RED: Rgb = Rgb(0.86, 0.14, 0.14);
pub const YELLOW: Rgb = Rgb(0.90, 0.72, 0.10);
pub const WHITE: Rgb = Rgb(1.0, 1.0, 1.0);
pub const BLACK: Rgb = Rgb(0.0, 0.0, 0.0);

/// Helvetica advance widths (1/1000 em) for ASCII 32..=126
const HELVETICA_WIDTHS: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278, // ' '..'/'
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, // '0'..'9'
    278, 278, 584, 584, 584, 556, 1015, // ':'..'@'
    667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, // 'A'..'M'
    722, 778, 667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, // 'N'..'Z'
    278, 278, 278, 469, 556, 333, // '['..'`'
    556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, // 'a'..'m'
    556, 556, 556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, // 'n'..'z'
    334, 260, 334, 584, // '{'..'~'
];

/// Width in points of `text` set in Helvetica at `size`.
pub fn text_width(text: &str, size: f32) -> f32 {
    let units: u32 = pdf_text(text)
        .bytes()
        .map(|b| HELVETICA_WIDTHS[(b - 32) as usize] as u32)
        .sum();
    units as f32 * size / 1000.0
}

/// Printable ASCII only; anything else becomes `?`.
fn pdf_text(text: &str) -> String {
    text.chars()
        .map(|c| if (' '..='~').contains(&c) { c } else { '?' })
        .collect()
}

fn real(v: f32) -> Object {
    Object::Real(v.into())
}

fn number(obj: &Object) -> Option<f32> {
    match obj {
        Object::Integer(i) => Some(*i as f32),
        Object::Real(r) => Some(*r as f32),
        _ => None,
    }
}

fn markup_err(context: &str) -> impl Fn(lopdf::Error) -> ValidatorError + '_ {
    move |e| ValidatorError::markup_with_source(context.to_string(), e)
}

/// Follow a reference to its target; other objects are returned as is.
fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> ValidatorResult<&'a Object> {
    match obj {
        Object::Reference(id) => doc.get_object(*id).map_err(markup_err("dangling reference")),
        other => Ok(other),
    }
}

/// Look up `key` on the page or the nearest ancestor that defines it.
fn inherited<'a>(doc: &'a Document, page_id: ObjectId, key: &[u8]) -> ValidatorResult<Option<&'a Object>> {
    let mut node = doc.get_dictionary(page_id).map_err(markup_err("page dictionary"))?;
    // Page trees are shallow; the bound guards against cycles
    for _ in 0..32 {
        if let Ok(value) = node.get(key) {
            return Ok(Some(resolve(doc, value)?));
        }
        match node.get(b"Parent").and_then(Object::as_reference) {
            Ok(parent) => node = doc.get_dictionary(parent).map_err(markup_err("page tree node"))?,
            Err(_) => return Ok(None),
        }
    }
    Ok(None)
}

/// Effective MediaBox of a page, US Letter when absent.
pub fn media_box(doc: &Document, page_id: ObjectId) -> ValidatorResult<PageBox> {
    let values: Vec<f32> = match inherited(doc, page_id, b"MediaBox")? {
        Some(Object::Array(arr)) => arr
            .iter()
            .filter_map(|o| resolve(doc, o).ok().and_then(number))
            .collect(),
        _ => Vec::new(),
    };

    if values.len() == 4 {
        Ok(PageBox::from_corners(values[0], values[1], values[2], values[3]))
    } else {
        Ok(PageBox::LETTER)
    }
}

/// Append an empty page of the given size at the end of the document.
pub fn add_blank_page(doc: &mut Document, width: f32, height: f32) -> ValidatorResult<ObjectId> {
    let root_id = doc
        .trailer
        .get(b"Root")
        .and_then(Object::as_reference)
        .map_err(markup_err("document catalog"))?;
    let pages_id = doc
        .get_dictionary(root_id)
        .and_then(|root| root.get(b"Pages"))
        .and_then(Object::as_reference)
        .map_err(markup_err("page tree root"))?;

    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "MediaBox" => vec![0.into(), 0.into(), real(width), real(height)],
        "Resources" => dictionary! {},
    });

    let pages = doc
        .get_object_mut(pages_id)
        .and_then(Object::as_dict_mut)
        .map_err(markup_err("page tree root"))?;
    let count = pages.get(b"Count").ok().and_then(|c| c.as_i64().ok()).unwrap_or(0);
    pages.set("Count", count + 1);
    match pages.get_mut(b"Kids") {
        Ok(Object::Array(kids)) => kids.push(Object::Reference(page_id)),
        _ => pages.set("Kids", vec![Object::Reference(page_id)]),
    }

    Ok(page_id)
}

/// Register the overlay font once per document.
pub fn add_font(doc: &mut Document) -> ObjectId {
    doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    })
}

/// Buffered overlay for one page.
#[derive(Debug)]
pub struct PageCanvas {
    page_box: PageBox,
    ops: Vec<Operation>,
    uses_font: bool,
    images: Vec<(String, ObjectId)>,
}

impl PageCanvas {
    pub fn new(page_box: PageBox) -> Self {
        Self {
            page_box,
            ops: Vec::new(),
            uses_font: false,
            images: Vec::new(),
        }
    }

    pub fn width(&self) -> f32 {
        self.page_box.width()
    }

    pub fn height(&self) -> f32 {
        self.page_box.height()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn uses_font(&self) -> bool {
        self.uses_font
    }

    fn pt(&self, x: f32, y: f32) -> (f32, f32) {
        self.page_box.to_user(x, y)
    }

    fn op(&mut self, operator: &str, operands: Vec<Object>) {
        self.ops.push(Operation::new(operator, operands));
    }

    fn stroke_color(&mut self, c: Rgb) {
        self.op("RG", vec![real(c.0), real(c.1), real(c.2)]);
    }

    fn fill_color(&mut self, c: Rgb) {
        self.op("rg", vec![real(c.0), real(c.1), real(c.2)]);
    }

    /// Stroke an open path through `points`.
    pub fn polyline(&mut self, points: &[(f32, f32)], color: Rgb, width: f32) {
        if points.len() < 2 {
            return;
        }
        self.op("q", vec![]);
        self.stroke_color(color);
        self.op("w", vec![real(width)]);
        self.op("J", vec![1.into()]);
        self.op("j", vec![1.into()]);
        for (i, &(x, y)) in points.iter().enumerate() {
            let (px, py) = self.pt(x, y);
            self.op(if i == 0 { "m" } else { "l" }, vec![real(px), real(py)]);
        }
        self.op("S", vec![]);
        self.op("Q", vec![]);
    }

    pub fn line(&mut self, from: (f32, f32), to: (f32, f32), color: Rgb, width: f32) {
        self.polyline(&[from, to], color, width);
    }

    /// Fill a closed polygon.
    pub fn fill_polygon(&mut self, points: &[(f32, f32)], color: Rgb) {
        if points.len() < 3 {
            return;
        }
        self.op("q", vec![]);
        self.fill_color(color);
        for (i, &(x, y)) in points.iter().enumerate() {
            let (px, py) = self.pt(x, y);
            self.op(if i == 0 { "m" } else { "l" }, vec![real(px), real(py)]);
        }
        self.op("h", vec![]);
        self.op("f", vec![]);
        self.op("Q", vec![]);
    }

    pub fn fill_rect(&mut self, x0: f32, top: f32, x1: f32, bottom: f32, color: Rgb) {
        let (px, py) = self.pt(x0, bottom);
        self.op("q", vec![]);
        self.fill_color(color);
        self.op("re", vec![real(px), real(py), real(x1 - x0), real(bottom - top)]);
        self.op("f", vec![]);
        self.op("Q", vec![]);
    }

    pub fn stroke_rect(&mut self, x0: f32, top: f32, x1: f32, bottom: f32, color: Rgb, width: f32) {
        let (px, py) = self.pt(x0, bottom);
        self.op("q", vec![]);
        self.stroke_color(color);
        self.op("w", vec![real(width)]);
        self.op("re", vec![real(px), real(py), real(x1 - x0), real(bottom - top)]);
        self.op("S", vec![]);
        self.op("Q", vec![]);
    }

    /// Helvetica text with its baseline at `baseline` (distance from the page top).
    pub fn text(&mut self, x: f32, baseline: f32, size: f32, color: Rgb, text: &str) {
        let (px, py) = self.pt(x, baseline);
        self.uses_font = true;
        self.op("q", vec![]);
        self.fill_color(color);
        self.op("BT", vec![]);
        self.op("Tf", vec![FONT_NAME.into(), real(size)]);
        self.op("Td", vec![real(px), real(py)]);
        self.op("Tj", vec![Object::string_literal(pdf_text(text))]);
        self.op("ET", vec![]);
        self.op("Q", vec![]);
    }

    /// Paint image XObject `image_id` into the box whose top-left corner is `(x, top)`.
    pub fn image(&mut self, image_id: ObjectId, x: f32, top: f32, width: f32, height: f32) {
        let name = format!("POVImg{}", self.images.len());
        let (px, py) = self.pt(x, top + height);
        self.op("q", vec![]);
        self.op(
            "cm",
            vec![real(width), 0.into(), 0.into(), real(height), real(px), real(py)],
        );
        self.op("Do", vec![Object::Name(name.clone().into_bytes())]);
        self.op("Q", vec![]);
        self.images.push((name, image_id));
    }

    /// Write the buffered operations onto `page_id`.
    pub fn apply(self, doc: &mut Document, page_id: ObjectId, font_id: Option<ObjectId>) -> ValidatorResult<()> {
        if self.is_empty() {
            return Ok(());
        }

        let mut resources = match inherited(doc, page_id, b"Resources")? {
            Some(Object::Dictionary(d)) => d.clone(),
            _ => Dictionary::new(),
        };

        if self.uses_font {
            let font_id = font_id.ok_or_else(|| ValidatorError::markup("overlay font not registered"))?;
            let mut fonts = sub_dictionary(doc, &resources, b"Font")?;
            fonts.set(FONT_NAME, Object::Reference(font_id));
            resources.set("Font", Object::Dictionary(fonts));
        }

        if !self.images.is_empty() {
            let mut xobjects = sub_dictionary(doc, &resources, b"XObject")?;
            for (name, id) in &self.images {
                xobjects.set(name.as_str(), Object::Reference(*id));
            }
            resources.set("XObject", Object::Dictionary(xobjects));
        }

        let overlay = Content { operations: self.ops }
            .encode()
            .map_err(markup_err("encode overlay"))?;
        let save_id = doc.add_object(Stream::new(dictionary! {}, b"q\n".to_vec()));
        let restore_id = doc.add_object(Stream::new(dictionary! {}, b"\nQ\n".to_vec()));
        let overlay_id = doc.add_object(Stream::new(dictionary! {}, overlay));

        let page = doc
            .get_object_mut(page_id)
            .and_then(Object::as_dict_mut)
            .map_err(markup_err("page dictionary"))?;

        let existing: Vec<Object> = match page.get(b"Contents") {
            Ok(Object::Array(items)) => items.clone(),
            Ok(obj @ Object::Reference(_)) => vec![obj.clone()],
            _ => Vec::new(),
        };

        let mut contents = Vec::with_capacity(existing.len() + 3);
        if !existing.is_empty() {
            contents.push(Object::Reference(save_id));
            contents.extend(existing);
            contents.push(Object::Reference(restore_id));
        }
        contents.push(Object::Reference(overlay_id));

        page.set("Contents", contents);
        page.set("Resources", Object::Dictionary(resources));
        Ok(())
    }
}

/// Copy of `resources[key]` as a dictionary, resolving a reference.
fn sub_dictionary(doc: &Document, resources: &Dictionary, key: &[u8]) -> ValidatorResult<Dictionary> {
    match resources.get(key) {
        Ok(obj) => match resolve(doc, obj)? {
            Object::Dictionary(d) => Ok(d.clone()),
            _ => Ok(Dictionary::new()),
        },
        Err(_) => Ok(Dictionary::new()),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// One-page document with a single text line, optionally with the MediaBox on the page tree root.
    pub(crate) fn sample_pdf(pages: usize, inherit_media_box: bool) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });

        let mut kids = Vec::new();
        for i in 0..pages {
            let content = Content {
                operations: vec![
                    Operation::new("BT", vec![]),
                    Operation::new("Tf", vec!["F1".into(), 12.into()]),
                    Operation::new("Td", vec![72.into(), 700.into()]),
                    Operation::new("Tj", vec![Object::string_literal(format!("Page {}", i + 1))]),
                    Operation::new("ET", vec![]),
                ],
            };
            let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
            let mut page = dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            };
            if !inherit_media_box {
                page.set("MediaBox", vec![0.into(), 0.into(), 612.into(), 792.into()]);
            }
            kids.push(Object::Reference(doc.add_object(page)));
        }

        let mut pages_dict = dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => pages as i64,
            "Resources" => resources_id,
        };
        if inherit_media_box {
            pages_dict.set("MediaBox", vec![0.into(), 0.into(), 595.into(), 842.into()]);
        }
        doc.objects.insert(pages_id, Object::Dictionary(pages_dict));
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut out = Vec::new();
        doc.save_to(&mut out).unwrap();
        out
    }

    fn first_page(doc: &Document) -> ObjectId {
        *doc.get_pages().values().next().unwrap()
    }

    #[test]
    fn test_text_width_matches_helvetica_metrics() {
        // H=722 e=556 l=222 l=222 o=556 -> 2278
        assert!((text_width("Hello", 10.0) - 22.78).abs() < 1e-4);
        assert_eq!(text_width("é", 10.0), text_width("?", 10.0));
    }

    #[test]
    fn test_media_box_inherited_from_parent() {
        let doc = Document::load_mem(&sample_pdf(1, true)).unwrap();
        let b = media_box(&doc, first_page(&doc)).unwrap();
        assert_eq!((b.width(), b.height()), (595.0, 842.0));
    }

    #[test]
    fn test_apply_keeps_existing_content_and_fonts() {
        let mut doc = Document::load_mem(&sample_pdf(1, false)).unwrap();
        let page_id = first_page(&doc);
        let font_id = add_font(&mut doc);

        let mut canvas = PageCanvas::new(media_box(&doc, page_id).unwrap());
        canvas.fill_rect(10.0, 10.0, 50.0, 30.0, WHITE);
        canvas.text(20.0, 25.0, 7.0, RED, "Expected $5.00");
        canvas.apply(&mut doc, page_id, Some(font_id)).unwrap();

        let content = String::from_utf8_lossy(&doc.get_page_content(page_id).unwrap()).to_string();
        assert!(content.contains("Page 1"));
        assert!(content.contains("Expected $5.00"));
        assert!(content.trim_start().starts_with('q'));

        let page = doc.get_dictionary(page_id).unwrap();
        let fonts = page
            .get(b"Resources")
            .and_then(Object::as_dict)
            .and_then(|r| r.get(b"Font"))
            .and_then(Object::as_dict)
            .unwrap();
        assert!(fonts.has(b"F1"));
        assert!(fonts.has(FONT_NAME.as_bytes()));
    }

    #[test]
    fn test_coordinates_flip_to_pdf_space() {
        let mut canvas = PageCanvas::new(PageBox {
            left: 0.0,
            bottom: 0.0,
            right: 612.0,
            top: 792.0,
        });
        canvas.line((10.0, 100.0), (20.0, 100.0), GREEN, 2.5);
        let moveto = canvas.ops.iter().find(|o| o.operator == "m").unwrap();
        assert_eq!(number(&moveto.operands[1]), Some(692.0));
    }

    #[test]
    fn test_offset_media_box_lands_on_text_row() {
        let mut doc = Document::load_mem(&sample_pdf(1, false)).unwrap();
        let page_id = first_page(&doc);
        doc.get_object_mut(page_id)
            .and_then(Object::as_dict_mut)
            .unwrap()
            .set("MediaBox", vec![0.into(), 100.into(), 612.into(), 892.into()]);

        let page_box = media_box(&doc, page_id).unwrap();
        // text between y=790 and y=800 in user space, as the reader reports it
        let row = page_box.to_page_bbox(40.0, 790.0, 100.0, 800.0);

        let mut canvas = PageCanvas::new(page_box);
        canvas.line((row.x0, row.center_y()), (row.x1, row.center_y()), GREEN, 1.0);
        let moveto = canvas.ops.iter().find(|o| o.operator == "m").unwrap();
        assert_eq!(number(&moveto.operands[0]), Some(40.0));
        assert_eq!(number(&moveto.operands[1]), Some(795.0));
    }

    #[test]
    fn test_empty_canvas_leaves_page_alone() {
        let mut doc = Document::load_mem(&sample_pdf(1, false)).unwrap();
        let page_id = first_page(&doc);
        let before = doc.get_page_content(page_id).unwrap();

        let canvas = PageCanvas::new(media_box(&doc, page_id).unwrap());
        assert!(canvas.is_empty());
        canvas.apply(&mut doc, page_id, None).unwrap();
        assert_eq!(doc.get_page_content(page_id).unwrap(), before);
        assert!(!doc.get_dictionary(page_id).unwrap().has(b"Resources"));
    }

    #[test]
    fn test_add_blank_page() {
        let mut doc = Document::load_mem(&sample_pdf(2, false)).unwrap();
        let id = add_blank_page(&mut doc, 612.0, 792.0).unwrap();
        let pages = doc.get_pages();
        assert_eq!(pages.len(), 3);
        assert_eq!(*pages.values().last().unwrap(), id);
    }
}
