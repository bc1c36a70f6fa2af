//! Stage 8: apply the configured identifier-case policy. IRIS is
//! case-sensitive and conventionally uppercase, so an unquoted `orders`
//! from a PostgreSQL client may need folding before IRIS will recognize it
//! (spec.md §4.4). String literals, comments, and already-quoted
//! identifiers are left exactly as written.

use common::config::IdentifierCasePolicy;

use crate::mask::{in_ranges, literal_ranges};

pub fn apply_case_policy(sql: &str, policy: IdentifierCasePolicy) -> String {
    if policy == IdentifierCasePolicy::Preserve {
        return sql.to_string();
    }
    let ranges = literal_ranges(sql);
    let bytes = sql.as_bytes();
    let mut out = String::with_capacity(sql.len());
    let mut i = 0;
    while i < bytes.len() {
        if in_ranges(&ranges, i) {
            let end = ranges.iter().find(|&&(s, _)| s <= i).map(|&(_, e)| e).unwrap_or(i + 1);
            out.push_str(&sql[i..end]);
            i = end;
            continue;
        }
        if bytes[i] == b'"' {
            let end = sql[i + 1..].find('"').map(|p| i + 1 + p + 1).unwrap_or(sql.len());
            out.push_str(&sql[i..end]);
            i = end;
            continue;
        }
        let ch = sql[i..].chars().next().expect("char boundary");
        match policy {
            IdentifierCasePolicy::Upper => out.extend(ch.to_uppercase()),
            IdentifierCasePolicy::Lower => out.extend(ch.to_lowercase()),
            IdentifierCasePolicy::Preserve => unreachable!(),
        }
        i += ch.len_utf8();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preserve_leaves_sql_untouched() {
        let sql = "select Name from Orders";
        assert_eq!(apply_case_policy(sql, IdentifierCasePolicy::Preserve), sql);
    }

    #[test]
    fn upper_folds_unquoted_identifiers() {
        assert_eq!(apply_case_policy("select name from orders", IdentifierCasePolicy::Upper), "SELECT NAME FROM ORDERS");
    }

    #[test]
    fn upper_leaves_quoted_identifiers_and_literals_alone() {
        let sql = "select \"MixedCase\" from t where s = 'KeepMe'";
        assert_eq!(
            apply_case_policy(sql, IdentifierCasePolicy::Upper),
            "SELECT \"MixedCase\" FROM T WHERE S = 'KeepMe'"
        );
    }
}
