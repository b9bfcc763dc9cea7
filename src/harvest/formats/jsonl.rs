//! Newline-delimited JSON output.

use serde_json::{Map, Value};
use std::io::Write;

use super::format_timestamp;
use crate::harvest::traits::{FieldValue, FlatRecord, ResultSink, SinkError};

/// Writes each record as one flat JSON object per line. Missing timestamps
/// are written as `null`.
pub struct JsonLinesSink<W: Write> {
    writer: W,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

fn to_json(value: FieldValue) -> Value {
    match value {
        FieldValue::Unsigned(n) => Value::from(n),
        FieldValue::Text(s) => Value::String(s),
        FieldValue::Timestamp(Some(ts)) => Value::String(format_timestamp(&ts)),
        FieldValue::Timestamp(None) => Value::Null,
    }
}

impl<R: FlatRecord, W: Write> ResultSink<R> for JsonLinesSink<W> {
    fn format_name(&self) -> &'static str {
        "jsonl"
    }

    fn write(&mut self, records: &[R]) -> Result<(), SinkError> {
        for record in records {
            let object: Map<String, Value> = R::columns()
                .iter()
                .map(|column| column.to_string())
                .zip(record.fields().into_iter().map(to_json))
                .collect();
            serde_json::to_writer(&mut self.writer, &object)?;
            self.writer.write_all(b"\n")?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
