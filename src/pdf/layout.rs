use crate::models::BBox;

/// Vertical distance (pt) within which two segments are read as the same line
const LINE_TOLERANCE: f32 = 3.0;

/// A run of text with its position, top-left origin.
#[derive(Debug, Clone, PartialEq)]
pub struct TextSegment {
    pub text: String,
    pub bbox: BBox,
}

impl TextSegment {
    pub fn new(text: impl Into<String>, bbox: BBox) -> Self {
        Self {
            text: text.into(),
            bbox,
        }
    }
}

/// Segments sharing a baseline, left to right.
#[derive(Debug, Clone, PartialEq)]
pub struct TextLine {
    pub text: String,
    pub bbox: BBox,
    /// `(char_start, char_end, bbox)` of each segment inside `text`
    spans: Vec<(usize, usize, BBox)>,
}

/// Positioned text content of one page.
#[derive(Debug, Clone, PartialEq)]
pub struct PageLayout {
    pub page_index: usize,
    pub width: f32,
    pub height: f32,
    /// Page text, one line per visual line
    pub text: String,
    pub segments: Vec<TextSegment>,
}

impl PageLayout {
    /// Build a layout whose text is derived from the segments' line grouping.
    pub fn from_segments(page_index: usize, width: f32, height: f32, segments: Vec<TextSegment>) -> Self {
        let segments: Vec<TextSegment> = segments
            .into_iter()
            .filter(|s| !s.text.trim().is_empty())
            .collect();
        let text = group_lines(&segments)
            .iter()
            .map(|l| l.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        Self {
            page_index,
            width,
            height,
            text,
            segments,
        }
    }

    pub fn lines(&self) -> Vec<TextLine> {
        group_lines(&self.segments)
    }

    /// Lowest text bottom on the page, if any text exists.
    pub fn content_bottom(&self) -> Option<f32> {
        self.segments
            .iter()
            .map(|s| s.bbox.bottom)
            .fold(None, |acc: Option<f32>, b| Some(acc.map_or(b, |a| a.max(b))))
    }

    /// Case-insensitive search returning the box of every occurrence, top to bottom.
    pub fn search(&self, needle: &str) -> Vec<BBox> {
        let needle: Vec<char> = fold_case(needle.trim());
        if needle.is_empty() {
            return Vec::new();
        }

        let mut hits = Vec::new();
        for line in self.lines() {
            let hay = fold_case(&line.text);
            if hay.len() < needle.len() {
                continue;
            }
            let mut start = 0;
            while start + needle.len() <= hay.len() {
                if hay[start..start + needle.len()] == needle[..] {
                    if let Some(bbox) = line.span_bbox(start, start + needle.len()) {
                        hits.push(bbox);
                    }
                    start += needle.len();
                } else {
                    start += 1;
                }
            }
        }
        hits
    }
}

impl TextLine {
    /// Box covering characters `[start, end)`; partially covered segments are
    /// interpolated by character position.
    fn span_bbox(&self, start: usize, end: usize) -> Option<BBox> {
        let mut result: Option<BBox> = None;
        for &(s, e, bbox) in &self.spans {
            if e <= start || s >= end {
                continue;
            }
            let len = (e - s).max(1) as f32;
            let from = start.max(s) - s;
            let to = end.min(e) - s;
            let x0 = bbox.x0 + bbox.width() * from as f32 / len;
            let x1 = bbox.x0 + bbox.width() * to as f32 / len;
            let part = BBox::new(x0, bbox.top, x1, bbox.bottom);
            result = Some(match result {
                Some(r) => r.union(&part),
                None => part,
            });
        }
        result
    }
}

/// One char per input char so offsets stay aligned with the original text.
fn fold_case(s: &str) -> Vec<char> {
    s.chars()
        .map(|c| c.to_lowercase().next().unwrap_or(c))
        .collect()
}

fn group_lines(segments: &[TextSegment]) -> Vec<TextLine> {
    let mut sorted: Vec<&TextSegment> = segments.iter().collect();
    sorted.sort_by(|a, b| {
        a.bbox
            .center_y()
            .partial_cmp(&b.bbox.center_y())
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.bbox.x0.partial_cmp(&b.bbox.x0).unwrap_or(std::cmp::Ordering::Equal))
    });

    let mut rows: Vec<Vec<&TextSegment>> = Vec::new();
    for seg in sorted {
        match rows.last_mut() {
            Some(row)
                if (row[0].bbox.center_y() - seg.bbox.center_y()).abs() <= LINE_TOLERANCE =>
            {
                row.push(seg)
            }
            _ => rows.push(vec![seg]),
        }
    }

    rows.into_iter()
        .map(|mut row| {
            row.sort_by(|a, b| a.bbox.x0.partial_cmp(&b.bbox.x0).unwrap_or(std::cmp::Ordering::Equal));
            let mut text = String::new();
            let mut spans = Vec::with_capacity(row.len());
            let mut bbox = row[0].bbox;
            let mut offset = 0;
            for seg in row {
                let seg_text = seg.text.trim();
                if !text.is_empty() {
                    text.push(' ');
                    offset += 1;
                }
                let len = seg_text.chars().count();
                text.push_str(seg_text);
                spans.push((offset, offset + len, seg.bbox));
                offset += len;
                bbox = bbox.union(&seg.bbox);
            }
            TextLine { text, bbox, spans }
        })
        .collect()
}
