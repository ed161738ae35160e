//! Result rendering: JSON results files and the text report

pub mod json;
pub mod text;

pub use json::{write_snapshot_file, JsonArrayWriter, JsonSnapshot};
pub use text::{format_report, print_results, summary_line};
