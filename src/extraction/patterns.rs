//! Regular expressions and cell-cleaning helpers shared by the tier-1 parsers.

use once_cell::sync::Lazy;
use regex::Regex;

/// Serial-number column header
pub static SN_HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(serial\s*(?:#|number|no\.?)?|s/?n)\b").unwrap());

/// Price-like column header (unit price, extended price, totals)
pub static PRICE_HEADER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(unit\s*price|price|rate|amount|ext(?:ended)?\.?\s*(?:price|amt)?|total|each)\b").unwrap()
});

pub static QTY_HEADER: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\b(qty|quantity|qty\.?)\b").unwrap());

/// Description family used only when scoring header candidates
pub static DESC_SCORE_HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(desc(?:ription)?|product|service|detail)\b").unwrap());

static DESC_PRIMARY: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\b(desc(?:ription)?|product)\b").unwrap());
static DESC_SECONDARY: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\b(service|detail)\b").unwrap());
static DESC_ITEM: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bitem\b").unwrap());
static DESC_ITEM_EXCLUDE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)(line|#|no\.?|number)").unwrap());

/// Serial number embedded in free text: `SN:J530199`, `S/N HDCC000017632`, `Serial # 305939`
pub static SN_IN_TEXT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:s/?n[:#]?\s*|serial\s*(?:#|no\.?)?:?\s*)([A-Z0-9][A-Z0-9_.\-]{2,30})").unwrap()
});

static IP_ADDRESS: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}$").unwrap());

/// Subtotal, tax and routing rows inside tables
pub static SKIP_ROW: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(sub\s*total|grand\s*total|\btotal\b|full\s*tax|withheld|route\s*to)").unwrap());

/// Boilerplate lines in the free-text fallback
pub static SKIP_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(sub\s*tota[il]|grand\s*total|order\s*total|\btotal\s*:|^total$|^tax\b|^shipping\b|^freight\b|comments|approved\s+by)",
    )
    .unwrap()
});

/// Dollar amount in free text
pub static TEXT_PRICE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$(\d[\d,.]+)").unwrap());

static NON_NUMERIC: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\d.\-]").unwrap());
static LEADING_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d[\d,]*").unwrap());
static MULTILINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s*\n\s*").unwrap());
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// PO-number patterns, most precise first
static PO_NUMBER: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)purchase\s+order\s*(?:#|no\.?:?)\s*([A-Z0-9][\w\-]{2,30})",
        r"(?i)purchase\s+order[ \t]+(\d[\w\-]{2,30})",
        r"(?i)\bPO\s+Number\s*:?\s*([A-Z0-9][\w\-]{2,30})",
        r"(?i)\bPO\s*(?:#|No\.?)\s*:?\s*([A-Z0-9][\w\-]{2,30})",
        r"(?i)customer\s+PO[#:]?\s+([A-Z0-9][\w\-]{2,30})",
        r"(?i)invoice\s*#:?\s*(\d[\d\-]{4,30})",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

/// Words that the PO-number patterns capture from labels rather than values
const PO_FALSE_POSITIVES: &[&str] = &[
    "VENDOR",
    "TO",
    "NUMBER",
    "NO",
    "DATE",
    "UPDATE",
    "REQUEST",
    "DETERMINED",
    "HOLD",
    "PAGE",
    "CUSTOMER",
];

/// Column roles located in a header row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ColumnRoles {
    pub serial: Option<usize>,
    pub price: Option<usize>,
    /// Last price-like column, when it differs from `price`
    pub extended: Option<usize>,
    pub quantity: Option<usize>,
    pub description: Option<usize>,
}

impl ColumnRoles {
    pub fn resolve(headers: &[String]) -> Self {
        let price = find_column(headers, &PRICE_HEADER);
        let price_columns: Vec<usize> = headers
            .iter()
            .enumerate()
            .filter(|(_, h)| !h.is_empty() && PRICE_HEADER.is_match(h))
            .map(|(i, _)| i)
            .collect();
        let extended = match (price, price_columns.last()) {
            (Some(first), Some(&last)) if price_columns.len() > 1 && last != first => Some(last),
            _ => None,
        };

        Self {
            serial: find_column(headers, &SN_HEADER),
            price,
            extended,
            quantity: find_column(headers, &QTY_HEADER),
            description: find_description_column(headers),
        }
    }

    /// Count of the four primary roles found (extended price is not counted)
    pub fn found(&self) -> usize {
        [self.serial, self.price, self.quantity, self.description]
            .iter()
            .filter(|c| c.is_some())
            .count()
    }
}

/// Index of the first non-empty header matching `pattern`.
pub fn find_column(headers: &[String], pattern: &Regex) -> Option<usize> {
    headers.iter().position(|h| !h.is_empty() && pattern.is_match(h))
}

/// Description column by priority: description/product, then service/detail,
/// then a bare "item" that is not a line-number or item-number column.
pub fn find_description_column(headers: &[String]) -> Option<usize> {
    if let Some(i) = find_column(headers, &DESC_PRIMARY) {
        return Some(i);
    }
    if let Some(i) = find_column(headers, &DESC_SECONDARY) {
        return Some(i);
    }
    headers.iter().position(|h| {
        let norm = WHITESPACE.replace_all(h, " ");
        !h.is_empty() && DESC_ITEM.is_match(&norm) && !DESC_ITEM_EXCLUDE.is_match(&norm)
    })
}

/// Number of cells in `row` matching any column-role family (one per cell).
pub fn header_score(row: &[Option<String>]) -> usize {
    let families: [&Regex; 4] = [&SN_HEADER, &PRICE_HEADER, &QTY_HEADER, &DESC_SCORE_HEADER];
    row.iter()
        .flatten()
        .map(|c| c.trim())
        .filter(|c| !c.is_empty())
        .filter(|c| families.iter().any(|p| p.is_match(c)))
        .count()
}

/// Parse `$1,234.56`-style text. Everything but digits, `.` and `-` is dropped.
pub fn clean_price(raw: &str) -> Option<f64> {
    let cleaned = NON_NUMERIC.replace_all(raw, "");
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Leading whole number of a quantity cell (`"2 EA"` → 2, `"1.00"` → 1).
pub fn clean_quantity(raw: &str) -> Option<u32> {
    let m = LEADING_NUMBER.find(raw)?;
    m.as_str().replace(',', "").parse().ok()
}

pub fn is_ip_address(s: &str) -> bool {
    IP_ADDRESS.is_match(s)
}

/// First embedded serial number in `text`, never an IP address.
pub fn serial_from_text(text: &str) -> Option<String> {
    let caps = SN_IN_TEXT.captures(text)?;
    let sn = caps.get(1)?.as_str().trim();
    if is_ip_address(sn) {
        return None;
    }
    Some(sn.to_string())
}

/// Every embedded serial number in `text`, in order of appearance.
pub fn all_serials_in_text(text: &str) -> Vec<String> {
    SN_IN_TEXT
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .collect()
}

/// Collapse multi-line cell content onto one line.
pub fn collapse_multiline(s: &str) -> String {
    MULTILINE.replace_all(s, " ").trim().to_string()
}

/// Best-effort PO number from raw document text, empty if none.
pub fn find_po_number(text: &str) -> String {
    for pattern in PO_NUMBER.iter() {
        if let Some(m) = pattern.captures(text).and_then(|c| c.get(1)) {
            let value = m.as_str().trim();
            if PO_FALSE_POSITIVES.contains(&value.to_uppercase().as_str()) {
                continue;
            }
            return value.to_string();
        }
    }
    String::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(cols: &[&str]) -> Vec<String> {
        cols.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_column_roles() {
        let roles = ColumnRoles::resolve(&headers(&["Line Item", "Serial #", "Description", "Qty", "Unit Price", "Ext. Price"]));
        assert_eq!(roles.serial, Some(1));
        assert_eq!(roles.description, Some(2));
        assert_eq!(roles.quantity, Some(3));
        assert_eq!(roles.price, Some(4));
        assert_eq!(roles.extended, Some(5));
        assert_eq!(roles.found(), 4);
    }

    #[test]
    fn test_single_price_column_has_no_extended() {
        let roles = ColumnRoles::resolve(&headers(&["S/N", "Amount"]));
        assert_eq!(roles.serial, Some(0));
        assert_eq!(roles.price, Some(1));
        assert_eq!(roles.extended, None);
    }

    #[test]
    fn test_description_priority_skips_item_numbers() {
        assert_eq!(find_description_column(&headers(&["Item No.", "Item", "Price"])), Some(1));
        assert_eq!(find_description_column(&headers(&["Line\nItem", "Item #"])), None);
        assert_eq!(find_description_column(&headers(&["Item", "Service Detail"])), Some(1));
        assert_eq!(find_description_column(&headers(&["Item", "Product"])), Some(1));
    }

    #[test]
    fn test_header_score_counts_cells_once() {
        let row = vec![Some("Serial Number".to_string()), Some("Unit Price".to_string()), None, Some("Notes".to_string())];
        assert_eq!(header_score(&row), 2);
    }

    #[test]
    fn test_clean_price() {
        assert_eq!(clean_price("$1,234.56"), Some(1234.56));
        assert_eq!(clean_price("0.00"), Some(0.0));
        assert_eq!(clean_price("-15.00"), Some(-15.0));
        assert_eq!(clean_price("N/A"), None);
        assert_eq!(clean_price("1.2.3"), None);
    }

    #[test]
    fn test_clean_quantity() {
        assert_eq!(clean_quantity("2"), Some(2));
        assert_eq!(clean_quantity("1.00"), Some(1));
        assert_eq!(clean_quantity("3 EA"), Some(3));
        assert_eq!(clean_quantity("1,200"), Some(1200));
        assert_eq!(clean_quantity("each"), None);
    }

    #[test]
    fn test_serial_from_text() {
        assert_eq!(serial_from_text("Caliper (SN: M21400189)").as_deref(), Some("M21400189"));
        assert_eq!(serial_from_text("S/N HDCC000017632 cal").as_deref(), Some("HDCC000017632"));
        assert_eq!(serial_from_text("Serial # 305939").as_deref(), Some("305939"));
        assert_eq!(serial_from_text("Digital caliper 6in"), None);
    }

    #[test]
    fn test_ip_address_never_a_serial() {
        assert_eq!(serial_from_text("SN: 192.168.1.10"), None);
        assert!(is_ip_address("10.0.0.1"));
        assert!(!is_ip_address("10.0.0.1A"));
    }

    #[test]
    fn test_find_po_number() {
        assert_eq!(find_po_number("Purchase Order#20260105016PO"), "20260105016PO");
        assert_eq!(find_po_number("Purchase Order No: 53105"), "53105");
        assert_eq!(find_po_number("Purchase Order 10496\nDate"), "10496");
        assert_eq!(find_po_number("PO Number: 160003"), "160003");
        assert_eq!(find_po_number("PO No: TE022442"), "TE022442");
        assert_eq!(find_po_number("Customer PO# 53057"), "53057");
        assert_eq!(find_po_number("Invoice #: 56561-084498"), "56561-084498");
        assert_eq!(find_po_number("nothing useful"), "");
    }

    #[test]
    fn test_po_number_skips_label_words() {
        // "PO Number: Date" is a label; the later PO# value wins
        assert_eq!(find_po_number("PO Number: DATE\nPO# 4455"), "4455");
    }

    #[test]
    fn test_skip_patterns() {
        assert!(SKIP_ROW.is_match("Subtotal"));
        assert!(SKIP_ROW.is_match("Route To: Receiving"));
        assert!(!SKIP_ROW.is_match("Calibration of torque wrench"));
        assert!(SKIP_LINE.is_match("Tax 8.25%"));
        assert!(SKIP_LINE.is_match("Order Total $400.00"));
        assert!(!SKIP_LINE.is_match("Caliper calibration"));
    }

    #[test]
    fn test_collapse_multiline() {
        assert_eq!(collapse_multiline("Digital\n  Caliper \n6in"), "Digital Caliper 6in");
    }
}
