//! Page-key extraction: split a file stem into a grouping key and a page number.
//!
//! Scanners and phones produce one file per sheet, and people mark the sheet
//! in the name: `Договор стр.2`, `Report p.1`, `Invoice page 3`. Every file
//! whose name differs only by that marker belongs to the same document.

use crate::error::BatchError;
use regex::{Regex, RegexBuilder};
use once_cell::sync::Lazy;
use tracing::debug;

/// Grouping key derived from a normalised stem.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PageKey {
    /// Identity shared by all pages of one logical document.
    pub base_key: String,
    /// Page number from the marker, if the marker carried digits.
    pub page_number: Option<u32>,
}

static RE_DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").unwrap());
static RE_SPACES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s{2,}").unwrap());

/// Matches page markers against stems in a fixed priority order.
#[derive(Debug, Clone)]
pub struct PageKeyExtractor {
    patterns: Vec<Regex>,
}

impl PageKeyExtractor {
    /// Compile `patterns` case-insensitively, keeping their order.
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self, BatchError> {
        let patterns = patterns
            .iter()
            .map(|p| {
                RegexBuilder::new(p.as_ref())
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| {
                        BatchError::InvalidConfig(format!(
                            "Invalid page pattern '{}': {e}",
                            p.as_ref()
                        ))
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    /// Extract `(base_key, page_number)` from a stem without extension.
    ///
    /// Only the first pattern in priority order that matches is used, and only
    /// its first match is removed. A marker with no digit run is still
    /// removed but yields `page_number = None`.
    pub fn extract(&self, stem: &str) -> PageKey {
        for pattern in &self.patterns {
            let Some(m) = pattern.find(stem) else {
                continue;
            };

            let page_number = RE_DIGITS
                .find(m.as_str())
                // An all-digit run only fails to parse on overflow.
                .map(|d| d.as_str().parse::<u32>().unwrap_or(u32::MAX));

            let mut base = String::with_capacity(stem.len());
            base.push_str(&stem[..m.start()]);
            base.push_str(&stem[m.end()..]);
            let base_key = RE_SPACES.replace_all(base.trim(), " ").into_owned();

            debug!(
                "Page marker {:?} in {:?}: base={:?} page={:?}",
                m.as_str(),
                stem,
                base_key,
                page_number
            );
            return PageKey {
                base_key,
                page_number,
            };
        }

        PageKey {
            base_key: stem.to_string(),
            page_number: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_PAGE_PATTERNS;

    fn extractor() -> PageKeyExtractor {
        PageKeyExtractor::new(DEFAULT_PAGE_PATTERNS).unwrap()
    }

    fn key(base: &str, page: Option<u32>) -> PageKey {
        PageKey {
            base_key: base.to_string(),
            page_number: page,
        }
    }

    #[test]
    fn test_latin_abbreviated_marker() {
        assert_eq!(extractor().extract("Report No1 p.2"), key("Report No1", Some(2)));
        assert_eq!(extractor().extract("Report No1 p 10"), key("Report No1", Some(10)));
    }

    #[test]
    fn test_oversized_page_number_saturates() {
        let k = extractor().extract("Scan p.99999999999");
        assert_eq!(k, key("Scan", Some(u32::MAX)));
        // Still orders after every ordinary page.
        assert!(k.page_number > extractor().extract("Scan p.2").page_number);
    }

    #[test]
    fn test_latin_full_marker_any_case() {
        assert_eq!(extractor().extract("Invoice PAGE 3"), key("Invoice", Some(3)));
    }

    #[test]
    fn test_cyrillic_markers() {
        let x = extractor();
        assert_eq!(x.extract("Договор стр.2"), key("Договор", Some(2)));
        assert_eq!(x.extract("Договор стр1"), key("Договор", Some(1)));
        assert_eq!(x.extract("Договор ст. 4"), key("Договор", Some(4)));
        assert_eq!(x.extract("Акт с.5"), key("Акт", Some(5)));
        assert_eq!(x.extract("Акт страница 7"), key("Акт", Some(7)));
        assert_eq!(x.extract("Акт СТР.8"), key("Акт", Some(8)));
    }

    #[test]
    fn test_marker_in_middle_collapses_gap() {
        assert_eq!(
            extractor().extract("Договор стр.2 подписан"),
            key("Договор подписан", Some(2))
        );
    }

    #[test]
    fn test_no_marker() {
        assert_eq!(extractor().extract("Statement"), key("Statement", None));
        // Letters inside words are not markers.
        assert_eq!(extractor().extract("Sheep2"), key("Sheep2", None));
        assert_eq!(extractor().extract("Лист1"), key("Лист1", None));
    }

    #[test]
    fn test_no_marker_keeps_input_verbatim() {
        let stem = "  Statement  2024 ";
        assert_eq!(extractor().extract(stem).base_key, stem);
    }

    #[test]
    fn test_first_pattern_in_priority_order_wins() {
        // "page 9" appears first in the string, but "стр" outranks "page".
        assert_eq!(
            extractor().extract("page 9 Договор стр.3"),
            key("page 9 Договор", Some(3))
        );
    }

    #[test]
    fn test_marker_without_digits_is_removed() {
        let x = PageKeyExtractor::new(&[r"\bscan(\s*\d+)?"]).unwrap();
        assert_eq!(x.extract("Passport scan"), key("Passport", None));
        assert_eq!(x.extract("Passport scan 2"), key("Passport", Some(2)));
    }

    #[test]
    fn test_only_first_match_removed() {
        assert_eq!(extractor().extract("p.1 of p.2"), key("of p.2", Some(1)));
    }

    #[test]
    fn test_invalid_pattern_is_config_error() {
        let err = PageKeyExtractor::new(&["p(\\d"]).unwrap_err();
        assert!(matches!(err, BatchError::InvalidConfig(_)));
    }
}
