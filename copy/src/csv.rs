//! A streaming CSV row reader/writer for the COPY sub-protocol (spec.md
//! §4.6). Grounded in the shape of `sqlx-postgres`'s `copy.rs`
//! (`CopyData` frames accumulate into rows rather than requiring the
//! whole payload up front) but this is a server-side parser the teacher
//! never needed, so the row-splitting logic itself is new: double-quote
//! escaping, embedded newlines inside quoted fields, and CRLF/LF both
//! accepted (spec.md §4.6's CSV rules).

#[derive(Debug, Clone)]
pub struct CsvOptions {
    pub delimiter: u8,
    pub null_sentinel: String,
    pub header: bool,
    pub quote: u8,
}

impl Default for CsvOptions {
    fn default() -> Self {
        CsvOptions { delimiter: b',', null_sentinel: "\\N".to_string(), header: false, quote: b'"' }
    }
}

/// One CSV field, already NULL-aware: `None` if it matched the
/// configured NULL sentinel (text `\N` by default, or an empty
/// unquoted field per configuration), `Some(text)` otherwise.
pub type Field = Option<String>;

/// Incrementally parses `CopyData` chunks into complete rows. Bytes that
/// don't yet form a complete row (a partial field, or inside an open
/// quote) are held across calls to [`CsvReader::feed`] — the payload is
/// never buffered in full (spec.md §4.6, "Parse CSV into rows streaming,
/// never load the whole payload").
pub struct CsvReader {
    options: CsvOptions,
    buf: Vec<u8>,
    /// 1-based line number of the next row `feed`/`finish` will yield,
    /// used for COPY error reporting (spec.md §4.6's "1-based line
    /// number of the offending row").
    next_line: u32,
    header_consumed: bool,
}

impl CsvReader {
    pub fn new(options: CsvOptions) -> Self {
        CsvReader { options, buf: Vec::new(), next_line: 1, header_consumed: false }
    }

    /// Feeds another `CopyData` chunk, returning every row (and its
    /// 1-based line number) that became complete as a result. Bytes that
    /// don't yet form a full row remain buffered for the next call.
    pub fn feed(&mut self, data: &[u8]) -> Vec<(u32, Vec<Field>)> {
        self.buf.extend_from_slice(data);
        self.drain_complete_rows()
    }

    /// Call once `CopyDone` arrives: parses whatever's left in the
    /// buffer as a final, possibly-unterminated row.
    pub fn finish(mut self) -> Vec<(u32, Vec<Field>)> {
        let mut rows = self.drain_complete_rows();
        if !self.buf.is_empty() {
            let (fields, _) = parse_row(&self.buf, &self.options);
            rows.push((self.next_line, fields));
            self.next_line += 1;
        }
        rows
    }

    fn drain_complete_rows(&mut self) -> Vec<(u32, Vec<Field>)> {
        let mut rows = Vec::new();
        loop {
            let Some(row_end) = find_row_end(&self.buf, self.options.quote) else {
                break;
            };
            let row_bytes: Vec<u8> = self.buf.drain(..row_end.consumed).collect();
            let line_text = &row_bytes[..row_end.line_len];

            if self.options.header && !self.header_consumed {
                self.header_consumed = true;
                self.next_line += 1;
                continue;
            }

            let (fields, _) = parse_row(line_text, &self.options);
            rows.push((self.next_line, fields));
            self.next_line += 1;
        }
        rows
    }
}

struct RowEnd {
    /// Bytes to remove from the front of the buffer, including the line
    /// terminator.
    consumed: usize,
    /// Length of the row's content, excluding the line terminator.
    line_len: usize,
}

/// Scans for the next unquoted line terminator (`\n`, optionally
/// preceded by `\r`), respecting quoted sections where a CR/LF is data,
/// not a terminator.
fn find_row_end(buf: &[u8], quote: u8) -> Option<RowEnd> {
    let mut in_quotes = false;
    let mut i = 0;
    while i < buf.len() {
        let b = buf[i];
        if b == quote {
            if in_quotes && buf.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            in_quotes = !in_quotes;
            i += 1;
            continue;
        }
        if b == b'\n' && !in_quotes {
            let line_len = if i > 0 && buf[i - 1] == b'\r' { i - 1 } else { i };
            return Some(RowEnd { consumed: i + 1, line_len });
        }
        i += 1;
    }
    None
}

/// Parses one already-delimited line into fields, unescaping
/// double-quoted fields (including embedded `""` and embedded newlines,
/// which `find_row_end` already preserved inside the field bytes).
fn parse_row(line: &[u8], options: &CsvOptions) -> (Vec<Field>, usize) {
    let mut fields = Vec::new();
    let mut i = 0;
    loop {
        let (field, consumed) = parse_field(&line[i..], options);
        fields.push(field);
        i += consumed;
        if i >= line.len() {
            break;
        }
        // consumed includes the trailing delimiter when present; if we
        // stopped short of the end without consuming a delimiter, the
        // line is malformed but we still emit what we have rather than
        // looping forever.
        if i > line.len() {
            break;
        }
    }
    (fields, i)
}

fn parse_field(input: &[u8], options: &CsvOptions) -> (Field, usize) {
    if input.first() == Some(&options.quote) {
        let mut out = Vec::new();
        let mut i = 1;
        loop {
            match input.get(i) {
                None => break,
                Some(&b) if b == options.quote => {
                    if input.get(i + 1) == Some(&options.quote) {
                        out.push(options.quote);
                        i += 2;
                    } else {
                        i += 1; // closing quote
                        break;
                    }
                }
                Some(&b) => {
                    out.push(b);
                    i += 1;
                }
            }
        }
        // skip the delimiter that follows the closing quote, if present
        if input.get(i) == Some(&options.delimiter) {
            i += 1;
        }
        let text = String::from_utf8_lossy(&out).into_owned();
        (Some(text), i)
    } else {
        let end = input.iter().position(|&b| b == options.delimiter).unwrap_or(input.len());
        let raw = &input[..end];
        let consumed = if end < input.len() { end + 1 } else { end };
        let text = String::from_utf8_lossy(raw).into_owned();
        if text == options.null_sentinel {
            (None, consumed)
        } else {
            (Some(text), consumed)
        }
    }
}

/// Encodes one row of already-text-formatted fields for COPY TO STDOUT,
/// quoting fields that contain the delimiter, a quote character, or a
/// newline, and doubling embedded quotes.
pub fn encode_row(fields: &[Field], options: &CsvOptions) -> Vec<u8> {
    let mut out = Vec::new();
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            out.push(options.delimiter);
        }
        match field {
            None => out.extend_from_slice(options.null_sentinel.as_bytes()),
            Some(text) => {
                let needs_quoting = text.as_bytes().iter().any(|&b| {
                    b == options.delimiter || b == options.quote || b == b'\n' || b == b'\r'
                });
                if needs_quoting {
                    out.push(options.quote);
                    for &b in text.as_bytes() {
                        if b == options.quote {
                            out.push(options.quote);
                        }
                        out.push(b);
                    }
                    out.push(options.quote);
                } else {
                    out.extend_from_slice(text.as_bytes());
                }
            }
        }
    }
    out.push(b'\n');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts() -> CsvOptions {
        CsvOptions::default()
    }

    #[test]
    fn simple_row_splits_on_commas() {
        let mut reader = CsvReader::new(opts());
        let rows = reader.feed(b"1,2001-01-01\n");
        assert_eq!(rows, vec![(1, vec![Some("1".into()), Some("2001-01-01".into())])]);
    }

    #[test]
    fn null_sentinel_becomes_none() {
        let mut reader = CsvReader::new(opts());
        let rows = reader.feed(b"1,\\N\n");
        assert_eq!(rows, vec![(1, vec![Some("1".into()), None])]);
    }

    #[test]
    fn quoted_field_with_embedded_comma_and_newline() {
        let mut reader = CsvReader::new(opts());
        let rows = reader.feed(b"1,\"a,b\nc\"\n2,plain\n");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], (1, vec![Some("1".into()), Some("a,b\nc".into())]));
        assert_eq!(rows[1], (2, vec![Some("2".into()), Some("plain".into())]));
    }

    #[test]
    fn doubled_quotes_unescape_to_one() {
        let mut reader = CsvReader::new(opts());
        let rows = reader.feed(b"1,\"say \"\"hi\"\"\"\n");
        assert_eq!(rows, vec![(1, vec![Some("1".into()), Some("say \"hi\"".into())])]);
    }

    #[test]
    fn crlf_line_endings_are_accepted() {
        let mut reader = CsvReader::new(opts());
        let rows = reader.feed(b"1,2\r\n3,4\r\n");
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn partial_chunk_is_buffered_until_row_completes() {
        let mut reader = CsvReader::new(opts());
        assert!(reader.feed(b"1,200").is_empty());
        let rows = reader.feed(b"1-01-01\n");
        assert_eq!(rows, vec![(1, vec![Some("1".into()), Some("2001-01-01".into())])]);
    }

    #[test]
    fn header_row_is_skipped_and_line_numbers_continue_after_it() {
        let mut reader = CsvReader::new(CsvOptions { header: true, ..opts() });
        let rows = reader.feed(b"id,dob\n1,2001-01-01\n");
        assert_eq!(rows, vec![(2, vec![Some("1".into()), Some("2001-01-01".into())])]);
    }

    #[test]
    fn unterminated_final_row_is_yielded_by_finish() {
        let mut reader = CsvReader::new(opts());
        let fed = reader.feed(b"1,2\n3,4");
        assert_eq!(fed, vec![(1, vec![Some("1".into()), Some("2".into())])]);
        let rows = reader.finish();
        assert_eq!(rows, vec![(2, vec![Some("3".into()), Some("4".into())])]);
    }

    #[test]
    fn encode_row_quotes_fields_needing_it() {
        let encoded = encode_row(&[Some("plain".into()), Some("has,comma".into()), None], &opts());
        assert_eq!(encoded, b"plain,\"has,comma\",\\N\n");
    }
}
