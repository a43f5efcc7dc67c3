//! Free-text date filters.
//!
//! User-typed date text is matched against an ordered list of patterns;
//! the first that matches wins and its captured groups are substituted
//! into a template to build an inclusive range filter for the query
//! string. Text matching no pattern is not a valid filter.

use once_cell::sync::Lazy;
use regex_lite::Regex;

struct DatePattern {
    regex: Regex,
    template: &'static str,
}

/// Ordered date pattern table. Templates use `` `n` `` placeholders for
/// the nth captured group.
static DATE_PATTERNS: Lazy<Vec<DatePattern>> = Lazy::new(|| {
    let patterns: [(&str, &str); 5] = [
        // yyyy
        (r"(\d{4})", "[`1`-01-01 TO `1`-12-31]"),
        // yyyy-yyyy range
        (r"(\d{4})-(\d{4})", "[`1`-01-01 TO `2`-12-31]"),
        // dd/mm/yyyy
        (r"(\d{2})/(\d{2})/(\d{4})", "`3`-`2`-`1`"),
        // yyyy-mm-dd
        (r"(\d{4})-(\d{2})-(\d{2})", "`1`-`2`-`3`"),
        // dd/mm/yyyy hh:mm, matched to the enclosing minute
        (
            r"(\d{2})/(\d{2})/(\d{4}) (\d{2}):(\d{2})",
            "[\"`3`-`2`-`1` `4`:`5`:00\" TO \"`3`-`2`-`1` `4`:`5`:59\"]",
        ),
    ];
    patterns
        .into_iter()
        .map(|(pattern, template)| DatePattern {
            regex: Regex::new(&format!("^{pattern}$")).unwrap(),
            template,
        })
        .collect()
});

/// Converts free date text into a query-string filter on `field`.
///
/// Returns `None` when the text matches no known date pattern, which
/// the caller surfaces as an invalid filter input.
pub fn date_filter(text: &str, field: &str) -> Option<String> {
    for pattern in DATE_PATTERNS.iter() {
        if let Some(caps) = pattern.regex.captures(text) {
            let mut value = pattern.template.to_string();
            for i in 1..caps.len() {
                value = value.replace(&format!("`{i}`"), &caps[i]);
            }
            return Some(format!("{field}:{value}"));
        }
    }
    None
}
