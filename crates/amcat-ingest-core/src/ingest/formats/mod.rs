//! One module per supported export format.
//!
//! Each module exposes a splitter (document to fragment bodies) used by
//! [`DocumentFormat::split`](super::parser::DocumentFormat::split) and an
//! extractor (fragment to raw fields) used by [`extract`](super::extractor::extract).

pub mod apa;
pub mod bzk_eml;
pub mod bzk_html;
pub mod bzk_pdf;
pub mod csv;
pub mod defacto;
pub mod lexisnexis;
pub mod text;
pub mod xml;

/// Map every byte to the code point with the same value.
pub(crate) fn latin1(bytes: &[u8]) -> String {
    bytes.iter().copied().map(char::from).collect()
}

/// Collapse runs of whitespace to single spaces and trim.
pub(crate) fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
