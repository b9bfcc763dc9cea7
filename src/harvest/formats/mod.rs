//! Result sink implementations.
//!
//! Every sink renders records through [`FlatRecord`](crate::harvest::FlatRecord),
//! so the same aggregate can be written in any supported format:
//! - `csv` - header row plus one comma-separated row per record
//! - `jsonl` - one flat JSON object per line

pub mod csv;
pub mod jsonl;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::str::FromStr;

use crate::harvest::traits::{FlatRecord, ResultSink, SinkError};

pub use self::csv::CsvSink;
pub use self::jsonl::JsonLinesSink;

/// Text format for temporal fields: `YYYY/MM/DD HH:MM:SS`.
pub const TIMESTAMP_FORMAT: &str = "%Y/%m/%d %H:%M:%S";

pub fn format_timestamp(value: &DateTime<Utc>) -> String {
    value.format(TIMESTAMP_FORMAT).to_string()
}

/// Supported output formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Csv,
    Jsonl,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Csv => f.write_str("csv"),
            OutputFormat::Jsonl => f.write_str("jsonl"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(OutputFormat::Csv),
            "jsonl" | "json-lines" => Ok(OutputFormat::Jsonl),
            other => Err(format!("unsupported output format: {other}")),
        }
    }
}

/// Creates (or truncates) `path` and returns a buffered sink for `format`.
///
/// # Errors
///
/// Returns [`SinkError::Io`] if the file cannot be created.
pub fn create_file_sink<R>(
    format: OutputFormat,
    path: &Path,
) -> Result<Box<dyn ResultSink<R>>, SinkError>
where
    R: FlatRecord + 'static,
{
    let writer = BufWriter::new(File::create(path)?);
    let sink: Box<dyn ResultSink<R>> = match format {
        OutputFormat::Csv => Box::new(CsvSink::new(writer)),
        OutputFormat::Jsonl => Box::new(JsonLinesSink::new(writer)),
    };
    Ok(sink)
}
