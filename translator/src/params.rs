//! Stages 2, 3, and (the parameter half of) 7: rewrite PostgreSQL `$n`
//! parameter markers into IRIS `?` placeholders, normalize `$n::type` into
//! `CAST(? AS iris_type)`, and record the resulting parameter OID table
//! (spec.md §4.4).

use std::collections::BTreeMap;

use pgrepr::Type;

use crate::casts;
use crate::mask::{in_ranges, literal_ranges, Range};

/// Multi-word PostgreSQL type names, longest first so the scanner doesn't
/// stop at a prefix match (`timestamp` before `timestamp with time zone`).
const MULTI_WORD_TYPES: &[&str] =
    &["timestamp with time zone", "double precision", "character varying"];

pub struct ParamRewrite {
    pub sql: String,
    /// Parameter index (1-based, as in `$1`) to the PostgreSQL type its
    /// most recent explicit cast named. A parameter never explicitly cast
    /// has no entry here; callers fall back to IRIS's NUMERIC default.
    pub param_oids: BTreeMap<u32, Type>,
    pub warnings: Vec<String>,
}

pub fn rewrite_params(sql: &str) -> ParamRewrite {
    let ranges = literal_ranges(sql);
    let bytes = sql.as_bytes();
    let mut out = String::with_capacity(sql.len());
    let mut param_oids = BTreeMap::new();
    let mut warnings = Vec::new();

    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' && !in_ranges(&ranges, i) && bytes.get(i + 1).is_some_and(u8::is_ascii_digit) {
            let digit_start = i + 1;
            let mut j = digit_start;
            while j < bytes.len() && bytes[j].is_ascii_digit() {
                j += 1;
            }
            let index: u32 = sql[digit_start..j].parse().unwrap_or(0);

            if let Some((type_name, cast_end)) = try_match_cast(sql, &ranges, j) {
                match casts::lookup(&type_name) {
                    Some((iris_type, pg_type)) => {
                        out.push_str("CAST(? AS ");
                        out.push_str(iris_type);
                        out.push(')');
                        param_oids.insert(index, pg_type);
                        i = cast_end;
                        continue;
                    }
                    None => {
                        warnings.push(format!("unrecognized cast type '{type_name}' on ${index}, left uncast"));
                    }
                }
            }
            out.push('?');
            i = j;
            continue;
        }
        let ch = sql[i..].chars().next().expect("valid utf8 boundary");
        out.push(ch);
        i += ch.len_utf8();
    }

    ParamRewrite { sql: out, param_oids, warnings }
}

/// If `pos` is immediately followed by `::<type name>`, returns the type
/// name text and the byte offset just past it.
fn try_match_cast(sql: &str, ranges: &[Range], pos: usize) -> Option<(String, usize)> {
    let bytes = sql.as_bytes();
    if pos + 1 >= bytes.len() || bytes[pos] != b':' || bytes[pos + 1] != b':' || in_ranges(ranges, pos) {
        return None;
    }
    let mut start = pos + 2;
    while start < bytes.len() && bytes[start] == b' ' {
        start += 1;
    }
    let rest = &sql[start..];
    for phrase in MULTI_WORD_TYPES {
        if rest.len() >= phrase.len() && rest[..phrase.len()].eq_ignore_ascii_case(phrase) {
            return Some((phrase.to_string(), start + phrase.len()));
        }
    }
    let mut end = start;
    while end < bytes.len() && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'_') {
        end += 1;
    }
    if end == start {
        return None;
    }
    Some((sql[start..end].to_string(), end))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_placeholder_becomes_question_mark() {
        let r = rewrite_params("select * from t where id = $1");
        assert_eq!(r.sql, "select * from t where id = ?");
        assert!(r.param_oids.is_empty());
    }

    #[test]
    fn cast_placeholder_becomes_cast_expression() {
        let r = rewrite_params("select $1::int + $2::bool");
        assert_eq!(r.sql, "select CAST(? AS INTEGER) + CAST(? AS BIT)");
        assert_eq!(r.param_oids[&1], Type::Int4);
        assert_eq!(r.param_oids[&2], Type::Bool);
    }

    #[test]
    fn ignores_dollar_sign_inside_string_literal() {
        let r = rewrite_params("select 'cost is $1' as label, $1");
        assert_eq!(r.sql, "select 'cost is $1' as label, ?");
    }

    #[test]
    fn multi_word_type_names_are_recognized() {
        let r = rewrite_params("select $1::timestamp with time zone");
        assert_eq!(r.sql, "select CAST(? AS TIMESTAMP)");
        assert_eq!(r.param_oids[&1], Type::TimestampTz);
    }
}
