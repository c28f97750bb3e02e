use once_cell::sync::Lazy;
use regex::Regex;

static PARENTHETICAL: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s*\([^)]*\)").unwrap());

/// Uppercase, trimmed, dashes and spaces removed.
pub fn normalize_serial(sn: &str) -> String {
    sn.trim().to_uppercase().replace(['-', ' '], "")
}

/// Fuzzy serial comparison: equal after normalization, equal once leading
/// zeros are dropped, or one contains the other when both have at least
/// `min_partial_len` characters.
pub fn serials_match(a: &str, b: &str, min_partial_len: usize) -> bool {
    let a = normalize_serial(a);
    let b = normalize_serial(b);
    if a == b {
        return true;
    }
    if a.trim_start_matches('0') == b.trim_start_matches('0') {
        return true;
    }
    a.chars().count() >= min_partial_len
        && b.chars().count() >= min_partial_len
        && (a.contains(&b) || b.contains(&a))
}

/// The serial itself plus, when different, the serial with parenthetical
/// suffixes removed (`"1234 (SN2)"` → `"1234"`).
pub fn serial_variants(sn: &str) -> Vec<String> {
    let mut variants = Vec::new();
    if sn.is_empty() {
        return variants;
    }
    variants.push(sn.to_string());
    let base = PARENTHETICAL.replace_all(sn, "").trim().to_string();
    if !base.is_empty() && base != sn {
        variants.push(base);
    }
    variants
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize_serial(" abc-12 3 "), "ABC123");
    }

    #[test]
    fn test_match_rules() {
        assert!(serials_match("ABC-123", "abc123", 4));
        assert!(serials_match("000456", "456", 4));
        assert!(serials_match("XJ45001", "45001", 4));
        assert!(!serials_match("Q9", "Q99", 4));
        assert!(!serials_match("123", "1234", 4));
        assert!(serials_match("123", "1234", 3));
    }

    #[test]
    fn test_all_zero_serials() {
        // both reduce to "" once leading zeros go
        assert!(serials_match("000", "0", 4));
    }

    #[test]
    fn test_variants() {
        assert_eq!(serial_variants("1234 (Unit B)"), vec!["1234 (Unit B)", "1234"]);
        assert_eq!(serial_variants("1234"), vec!["1234"]);
        assert!(serial_variants("").is_empty());
    }
}
