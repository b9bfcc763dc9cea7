//! Comma-separated output with a header row.

use std::io::Write;

use super::format_timestamp;
use crate::harvest::traits::{FieldValue, FlatRecord, ResultSink, SinkError};

/// Writes records as RFC 4180 CSV: one header row, then one row per record.
pub struct CsvSink<W: Write> {
    writer: W,
}

impl<W: Write> CsvSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn write_row<'a>(&mut self, cells: impl Iterator<Item = &'a str>) -> Result<(), SinkError> {
        for (i, cell) in cells.enumerate() {
            if i > 0 {
                self.writer.write_all(b",")?;
            }
            write_cell(&mut self.writer, cell)?;
        }
        self.writer.write_all(b"\n")?;
        Ok(())
    }
}

fn write_cell<W: Write>(writer: &mut W, cell: &str) -> Result<(), SinkError> {
    let needs_quotes = cell.contains([',', '"', '\n', '\r']);
    if needs_quotes {
        writer.write_all(b"\"")?;
        writer.write_all(cell.replace('"', "\"\"").as_bytes())?;
        writer.write_all(b"\"")?;
    } else {
        writer.write_all(cell.as_bytes())?;
    }
    Ok(())
}

fn render(value: FieldValue) -> String {
    match value {
        FieldValue::Unsigned(n) => n.to_string(),
        FieldValue::Text(s) => s,
        FieldValue::Timestamp(Some(ts)) => format_timestamp(&ts),
        FieldValue::Timestamp(None) => String::new(),
    }
}

impl<R: FlatRecord, W: Write> ResultSink<R> for CsvSink<W> {
    fn format_name(&self) -> &'static str {
        "csv"
    }

    fn write(&mut self, records: &[R]) -> Result<(), SinkError> {
        self.write_row(R::columns().iter().copied())?;
        for record in records {
            let cells: Vec<String> = record.fields().into_iter().map(render).collect();
            self.write_row(cells.iter().map(String::as_str))?;
        }
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CharacterRecord, WorkKey};
    use chrono::{TimeZone, Utc};

    fn render_csv(records: &[CharacterRecord]) -> String {
        let mut sink = CsvSink::new(Vec::new());
        ResultSink::write(&mut sink, records).unwrap();
        String::from_utf8(sink.into_inner()).unwrap()
    }

    #[test]
    fn test_header_and_rows() {
        let mut record = CharacterRecord::new(WorkKey(10), "Alpha Beta");
        record.world = "Gilgamesh".to_string();
        record.first_achievement = Some(Utc.with_ymd_and_hms(2014, 8, 27, 9, 5, 3).unwrap());
        record.achievements = 5;
        record.achievement_points = 50;

        let output = render_csv(&[record]);
        let lines: Vec<&str> = output.lines().collect();

        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[0],
            "id,name,world,avatar,active_classjob_id,free_company_id,pvp_team_id,\
             first_achievement,achievements,achievement_points,race,clan,gender,starting_city"
        );
        assert_eq!(
            lines[1],
            "10,Alpha Beta,Gilgamesh,,0,,,2014/08/27 09:05:03,5,50,,,,"
        );
    }

    #[test]
    fn test_missing_enrichment_renders_empty_and_zero() {
        let output = render_csv(&[CharacterRecord::new(WorkKey(3), "Gamma Delta")]);
        let row = output.lines().nth(1).unwrap();
        let cells: Vec<&str> = row.split(',').collect();

        assert_eq!(cells[7], "");
        assert_eq!(cells[8], "0");
        assert_eq!(cells[9], "0");
    }

    #[test]
    fn test_quoting() {
        let record = CharacterRecord::new(WorkKey(1), "Say \"hi\", friend");
        let output = render_csv(&[record]);
        let row = output.lines().nth(1).unwrap();
        assert!(row.starts_with("1,\"Say \"\"hi\"\", friend\","));
    }

    #[test]
    fn test_empty_aggregate_writes_header_only() {
        let output = render_csv(&[]);
        assert_eq!(output.lines().count(), 1);
    }
}
