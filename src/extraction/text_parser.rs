use once_cell::sync::Lazy;
use regex::Regex;

use super::patterns::{self, SKIP_LINE, TEXT_PRICE};
use crate::models::PoLineItem;

static DOUBLE_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s{2,}").unwrap());

/// Lines before a price line searched for a serial number
const CONTEXT_BEFORE: usize = 2;
/// Lines from the price line onward searched for a serial number
const CONTEXT_AFTER: usize = 7;
/// Following lines considered for the description
const DESCRIPTION_LOOKAHEAD: usize = 2;
/// Longer lines are treated as boilerplate paragraphs
const MAX_DESCRIPTION_LINE: usize = 80;
const FIRST_LINE_LIMIT: usize = 120;
const DESCRIPTION_LIMIT: usize = 250;

/// Scan page text for dollar amounts, one line item per price-bearing line.
pub fn parse_text_lines(pages: &[(usize, &str)]) -> Vec<PoLineItem> {
    let mut items = Vec::new();

    for &(page_index, text) in pages {
        let lines: Vec<&str> = text.lines().collect();

        for (i, line) in lines.iter().enumerate() {
            let prices: Vec<f64> = TEXT_PRICE
                .captures_iter(line)
                .filter_map(|c| c.get(1))
                .filter_map(|m| patterns::clean_price(m.as_str()))
                .collect();
            if prices.is_empty() {
                continue;
            }

            let context_start = i.saturating_sub(CONTEXT_BEFORE);
            let context_end = (i + CONTEXT_AFTER).min(lines.len());
            let serial_number = patterns::serial_from_text(&lines[context_start..context_end].join("\n"));

            let (unit_price, extended_price) = match prices.as_slice() {
                [.., unit, ext] => (Some(*unit), Some(*ext)),
                [only] => (Some(*only), None),
                [] => (None, None),
            };

            let stripped = TEXT_PRICE.replace_all(line, "");
            let mut description = truncate(&DOUBLE_SPACE.replace_all(stripped.trim(), " "), FIRST_LINE_LIMIT);

            for next in lines.iter().skip(i + 1).take(DESCRIPTION_LOOKAHEAD) {
                let next = next.trim();
                if next.is_empty() {
                    continue;
                }
                if TEXT_PRICE.is_match(next) || next.chars().count() > MAX_DESCRIPTION_LINE || SKIP_LINE.is_match(next) {
                    break;
                }
                description = truncate(&format!("{} | {}", description, next), DESCRIPTION_LIMIT);
            }

            let first_part = description.split('|').next().unwrap_or("").trim();
            if SKIP_LINE.is_match(first_part) {
                continue;
            }

            items.push(PoLineItem {
                serial_number,
                description,
                unit_price,
                quantity: Some(1),
                extended_price,
                page_number: Some(page_index),
                bbox: None,
            });
        }
    }

    items
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}
