//! Stage 6: scan the (already-translated) `SELECT` list for each output
//! column's user-visible alias, since IRIS may report a different column
//! name than the client's driver expects (spec.md §4.4).

use crate::mask::{in_ranges, literal_ranges, Range};

/// The alias stage's verdict for one output column. `None` means neither an
/// explicit `AS` nor a recognizable trailing bare identifier was found —
/// the caller falls back to whatever name the executor reports.
pub fn extract_aliases(sql: &str) -> Vec<Option<String>> {
    let ranges = literal_ranges(sql);
    let Some(list) = select_list_span(sql, &ranges) else {
        return Vec::new();
    };
    split_top_level(&sql[list.0..list.1], list.0, &ranges)
        .into_iter()
        .map(|(start, end)| alias_for(&sql[start..end]))
        .collect()
}

fn select_list_span(sql: &str, ranges: &[Range]) -> Option<(usize, usize)> {
    let upper = sql.to_ascii_uppercase();
    let select_pos = upper.find("SELECT").filter(|&p| !in_ranges(ranges, p))?;
    let mut start = select_pos + "SELECT".len();
    let rest = &upper[start..];
    let trimmed = rest.trim_start();
    start += rest.len() - trimmed.len();
    if trimmed.starts_with("DISTINCT") {
        start += "DISTINCT".len();
    }
    if upper[start..].trim_start().starts_with("TOP") {
        let top_rel = upper[start..].find("TOP").unwrap();
        let mut j = start + top_rel + "TOP".len();
        let bytes = upper.as_bytes();
        while j < bytes.len() && bytes[j] == b' ' {
            j += 1;
        }
        while j < bytes.len() && bytes[j].is_ascii_digit() {
            j += 1;
        }
        start = j;
    }

    let end = find_top_level_from(sql, ranges, start)?;
    Some((start, end))
}

fn find_top_level_from(sql: &str, ranges: &[Range], from: usize) -> Option<usize> {
    let upper = sql.to_ascii_uppercase();
    let mut depth = 0i32;
    let mut i = from;
    let bytes = sql.as_bytes();
    while i < bytes.len() {
        if in_ranges(ranges, i) {
            i += 1;
            continue;
        }
        match bytes[i] {
            b'(' => depth += 1,
            b')' => depth -= 1,
            _ => {}
        }
        if depth == 0 && upper[i..].starts_with("FROM") {
            let boundary_before = i == 0 || !bytes[i - 1].is_ascii_alphanumeric();
            let boundary_after = bytes.get(i + 4).is_none_or(|b| !b.is_ascii_alphanumeric());
            if boundary_before && boundary_after {
                return Some(i);
            }
        }
        i += 1;
    }
    Some(bytes.len())
}

fn split_top_level(list: &str, offset: usize, ranges: &[Range]) -> Vec<(usize, usize)> {
    let bytes = list.as_bytes();
    let mut depth = 0i32;
    let mut start = 0usize;
    let mut spans = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let abs = offset + i;
        if in_ranges(ranges, abs) {
            i += 1;
            continue;
        }
        match bytes[i] {
            b'(' => depth += 1,
            b')' => depth -= 1,
            b',' if depth == 0 => {
                spans.push((offset + start, abs));
                start = i + 1;
            }
            _ => {}
        }
        i += 1;
    }
    spans.push((offset + start, offset + bytes.len()));
    spans
}

fn alias_for(expr: &str) -> Option<String> {
    let trimmed = expr.trim();
    if trimmed.is_empty() || trimmed == "*" {
        return None;
    }

    let upper = trimmed.to_ascii_uppercase();
    if let Some(pos) = find_as_keyword(&upper) {
        let name = trimmed[pos + 2..].trim();
        return Some(unquote(name));
    }

    if is_simple_identifier(trimmed) {
        return Some(unquote(trimmed.rsplit('.').next().unwrap_or(trimmed)));
    }

    if let Some(last_space) = trimmed.rfind(char::is_whitespace) {
        let tail = trimmed[last_space..].trim();
        if is_simple_identifier(tail) && !is_reserved_word(tail) {
            return Some(unquote(tail));
        }
    }

    None
}

fn find_as_keyword(upper: &str) -> Option<usize> {
    let bytes = upper.as_bytes();
    let mut i = 0;
    while let Some(rel) = upper[i..].find(" AS ") {
        let pos = i + rel;
        if bytes.get(pos.wrapping_sub(1)).is_none_or(|b| !b.is_ascii_alphanumeric()) {
            return Some(pos + 1);
        }
        i = pos + 1;
    }
    None
}

fn is_simple_identifier(s: &str) -> bool {
    !s.is_empty()
        && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '"')
        && s.chars().next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_' || c == '"')
}

fn is_reserved_word(s: &str) -> bool {
    matches!(
        s.to_ascii_uppercase().as_str(),
        "ASC" | "DESC" | "NULLS" | "FIRST" | "LAST" | "AND" | "OR" | "NOT"
    )
}

fn unquote(s: &str) -> String {
    s.trim_matches('"').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_as_alias_wins() {
        let aliases = extract_aliases("SELECT a + b AS total, name FROM t");
        assert_eq!(aliases, vec![Some("total".to_string()), Some("name".to_string())]);
    }

    #[test]
    fn qualified_column_alias_is_last_segment() {
        let aliases = extract_aliases("SELECT t.id FROM t");
        assert_eq!(aliases, vec![Some("id".to_string())]);
    }

    #[test]
    fn implicit_trailing_identifier_becomes_alias() {
        let aliases = extract_aliases("SELECT price * qty total FROM t");
        assert_eq!(aliases, vec![Some("total".to_string())]);
    }

    #[test]
    fn unresolvable_expression_yields_none() {
        let aliases = extract_aliases("SELECT count(*) FROM t");
        assert_eq!(aliases, vec![None]);
    }
}
