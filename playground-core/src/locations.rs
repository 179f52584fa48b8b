//! Map interpreter diagnostics back to source locations.

use once_cell::sync::Lazy;
use playground_types::{ErrorLocation, OutputRecord};
use regex::Regex;

static ERROR_LINE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[line (\d+)(:\d+)?\] (Error.*)").expect("valid error line regex"));

static EXPECT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bExpect\b").expect("valid expect regex"));

/// The interpreter reports this one line past the statement missing its
/// semicolon, unless the error is at end of input.
const MISSING_SEMICOLON: &str = "Expected ';' after expression.";
const ERROR_AT_END: &str = "Error at end";

/// Derive highlight targets from the error records of a run.
///
/// Records that are not errors, or whose text does not look like
/// `[line L(:C)?] Error...`, produce nothing. Output order follows input
/// order and duplicates are kept.
pub fn extract_error_locations(records: &[OutputRecord]) -> Vec<ErrorLocation> {
    records
        .iter()
        .filter(|record| record.is_error)
        .filter_map(|record| parse_error_location(&record.text))
        .collect()
}

/// Parse a single diagnostic line
pub fn parse_error_location(text: &str) -> Option<ErrorLocation> {
    let caps = ERROR_LINE_RE.captures(text)?;

    let mut line: u32 = caps.get(1)?.as_str().parse().ok()?;
    if line == 0 {
        return None;
    }

    let column = match caps.get(2) {
        Some(m) => Some(m.as_str().trim_start_matches(':').parse::<u32>().ok()?),
        None => None,
    };

    let message = caps.get(3).map(|m| m.as_str()).unwrap_or_default();
    if message.ends_with(MISSING_SEMICOLON) && !message.contains(ERROR_AT_END) {
        line = line.saturating_sub(1).max(1);
    }

    Some(ErrorLocation { line, column })
}

/// Fix up the upstream interpreter's wording: `Expect ...` becomes
/// `Expected ...`. Only the first standalone `Expect` is rewritten.
pub fn normalize_diagnostic(text: &str) -> String {
    EXPECT_RE.replace(text, "Expected").into_owned()
}
