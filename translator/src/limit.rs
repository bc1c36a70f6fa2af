//! Stage 5: rewrite `LIMIT N` into IRIS's `TOP N`, which sits right after
//! `SELECT` (and after `DISTINCT`, if present) rather than at the end of
//! the statement (spec.md §4.4).

use crate::mask::{in_ranges, literal_ranges};

pub fn rewrite_limit(sql: &str) -> String {
    let ranges = literal_ranges(sql);
    let Some((limit_start, limit_end, n)) = find_top_level_limit(sql, &ranges) else {
        return sql.to_string();
    };
    let Some(select_end) = find_select_insertion_point(sql, &ranges) else {
        return sql.to_string();
    };

    let mut out = String::with_capacity(sql.len());
    out.push_str(&sql[..select_end]);
    out.push_str(&format!(" TOP {n}"));
    out.push_str(&sql[select_end..limit_start]);
    out.push_str(sql[limit_end..].trim_start());
    out.trim_end().to_string()
}

fn find_top_level_limit(sql: &str, ranges: &[(usize, usize)]) -> Option<(usize, usize, u64)> {
    let upper = sql.to_ascii_uppercase();
    let mut search_from = 0;
    while let Some(rel) = upper[search_from..].find("LIMIT") {
        let pos = search_from + rel;
        let word_boundary_before = pos == 0 || !upper.as_bytes()[pos - 1].is_ascii_alphanumeric();
        let after = pos + "LIMIT".len();
        let word_boundary_after = upper.as_bytes().get(after).is_none_or(|b| !b.is_ascii_alphanumeric());
        if word_boundary_before && word_boundary_after && !in_ranges(ranges, pos) {
            let mut j = after;
            while j < sql.len() && sql.as_bytes()[j] == b' ' {
                j += 1;
            }
            let digit_start = j;
            while j < sql.len() && sql.as_bytes()[j].is_ascii_digit() {
                j += 1;
            }
            if j > digit_start {
                if let Ok(n) = sql[digit_start..j].parse() {
                    return Some((pos, j, n));
                }
            }
        }
        search_from = pos + "LIMIT".len();
    }
    None
}

fn find_select_insertion_point(sql: &str, ranges: &[(usize, usize)]) -> Option<usize> {
    let upper = sql.to_ascii_uppercase();
    let select_pos = upper.find("SELECT").filter(|&p| !in_ranges(ranges, p))?;
    let mut pos = select_pos + "SELECT".len();
    let rest = &upper[pos..];
    let trimmed = rest.trim_start();
    let skipped = rest.len() - trimmed.len();
    if trimmed.starts_with("DISTINCT") {
        let after_distinct = pos + skipped + "DISTINCT".len();
        if upper.as_bytes().get(after_distinct).is_none_or(|b| !b.is_ascii_alphanumeric()) {
            pos = after_distinct;
        }
    }
    Some(pos)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrites_limit_to_top() {
        assert_eq!(rewrite_limit("SELECT a, b FROM t ORDER BY a LIMIT 10"), "SELECT TOP 10 a, b FROM t ORDER BY a");
    }

    #[test]
    fn inserts_after_distinct() {
        assert_eq!(rewrite_limit("SELECT DISTINCT a FROM t LIMIT 5"), "SELECT DISTINCT TOP 5 a FROM t");
    }

    #[test]
    fn leaves_queries_without_limit_unchanged() {
        let sql = "SELECT a FROM t";
        assert_eq!(rewrite_limit(sql), sql);
    }

    #[test]
    fn ignores_limit_inside_string_literal() {
        let sql = "SELECT a FROM t WHERE name = 'has a LIMIT 5 in it'";
        assert_eq!(rewrite_limit(sql), sql);
    }
}
