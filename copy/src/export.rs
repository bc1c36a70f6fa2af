//! `COPY ... TO STDOUT` export: reads an executor's result rows and
//! encodes them as CSV `CopyData` chunks, one row at a time so a caller
//! writing to a slow socket naturally provides backpressure (spec.md
//! §4.6, "on every outbound ... stream, writes are awaited").

use pgrepr::{Format, Type, Value};

use crate::csv::{encode_row, CsvOptions, Field};

/// Encodes already-fetched rows into CSV `CopyData` payloads. The
/// pgwire layer calls [`next_chunk`](CopyOutPipeline::next_chunk) once
/// per outbound `CopyData` message and awaits the socket write before
/// asking for the next one — that await *is* the backpressure; this type
/// holds no buffering of its own beyond the current row.
pub struct CopyOutPipeline {
    options: CsvOptions,
    column_types: Vec<Type>,
    rows: std::vec::IntoIter<Vec<Value>>,
    header_emitted: bool,
}

impl CopyOutPipeline {
    pub fn new(rows: Vec<Vec<Value>>, column_types: Vec<Type>, options: CsvOptions) -> Self {
        CopyOutPipeline { options, column_types, rows: rows.into_iter(), header_emitted: false }
    }

    /// Returns the next `CopyData` payload, or `None` once every row
    /// (and the optional header) has been emitted.
    pub fn next_chunk(&mut self) -> Option<Vec<u8>> {
        if self.options.header && !self.header_emitted {
            self.header_emitted = true;
            let header: Vec<Field> = (0..self.column_types.len()).map(|i| Some(format!("column{i}"))).collect();
            return Some(encode_row(&header, &self.options));
        }
        let row = self.rows.next()?;
        let fields: Vec<Field> = row
            .iter()
            .map(|value| match value {
                Value::Null => None,
                other => other.encode(Format::Text).ok().flatten().map(|bytes| String::from_utf8_lossy(&bytes).into_owned()),
            })
            .collect();
        Some(encode_row(&fields, &self.options))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emits_one_chunk_per_row() {
        let rows = vec![
            vec![Value::Int4(1), Value::Text("alice".to_string())],
            vec![Value::Int4(2), Value::Null],
        ];
        let mut pipeline = CopyOutPipeline::new(rows, vec![Type::Int4, Type::Text], CsvOptions::default());
        assert_eq!(pipeline.next_chunk().unwrap(), b"1,alice\n");
        assert_eq!(pipeline.next_chunk().unwrap(), b"2,\\N\n");
        assert!(pipeline.next_chunk().is_none());
    }

    #[test]
    fn header_is_emitted_first_when_configured() {
        let rows = vec![vec![Value::Int4(7)]];
        let options = CsvOptions { header: true, ..CsvOptions::default() };
        let mut pipeline = CopyOutPipeline::new(rows, vec![Type::Int4], options);
        assert_eq!(pipeline.next_chunk().unwrap(), b"column0\n");
        assert_eq!(pipeline.next_chunk().unwrap(), b"7\n");
        assert!(pipeline.next_chunk().is_none());
    }
}
