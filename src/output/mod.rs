//! Output formatting module
//!
//! Renders scenario summaries in the supported output formats.

mod formatter;

pub use formatter::{write_summary_to_file, OutputFormat, ResultFormatter};
