//! Product page fetching and readable-text extraction.
//!
//! This crate provides:
//! - [`PageFetcher`], a timeout-bound, SSRF-guarded HTML fetcher
//! - [`readable`], helpers turning fetched HTML into scoreable text

pub mod fetch;
pub mod readable;

pub use fetch::{PageFetcher, is_ssrf_target};
pub use readable::{
    collapse_whitespace, contains_product_schema, extract_readable_text, looks_like_html,
    truncate_chars,
};
