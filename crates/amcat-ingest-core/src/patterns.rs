use regex::Regex;
use scraper::Selector;

/// Compile one of the crate's built-in patterns.
///
/// Only used for literals in this crate; user-supplied patterns go through
/// `Regex::new` and report errors.
pub(crate) fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid built-in pattern {pattern:?}: {e}"))
}

/// Parse one of the crate's built-in CSS selectors.
pub(crate) fn selector(css: &str) -> Selector {
    Selector::parse(css).unwrap_or_else(|e| panic!("invalid built-in selector {css:?}: {e}"))
}
