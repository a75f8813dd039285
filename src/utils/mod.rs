//! Shared utility functions.
//!
//! This module contains reusable utilities used across the codebase:
//! - `text`: text normalization, chunking, and word statistics

mod text;

pub use text::{chunk_text, clean_text, count_words, split_into_paragraphs, truncate_chars};
