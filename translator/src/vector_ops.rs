//! Stage 4: rewrite pgvector's infix distance operators into the IRIS
//! function calls that compute the same thing, and rewrite vector literal
//! operands into `TO_VECTOR(...)` calls (spec.md §4.4).
//!
//! ```text
//! a <-> b   ->  VECTOR_L2(a, b)
//! a <#> b   ->  VECTOR_DOT_PRODUCT(a, b)
//! a <=> b   ->  VECTOR_COSINE(a, b)
//! '[1,2,3]' (optionally `::vector`)  ->  TO_VECTOR('[1,2,3]', FLOAT)
//! ```

use crate::mask::{literal_ranges, Range};

const OPERATORS: &[(&str, &str)] = &[("<->", "VECTOR_L2"), ("<#>", "VECTOR_DOT_PRODUCT"), ("<=>", "VECTOR_COSINE")];

pub fn rewrite_vector_ops(sql: &str) -> String {
    let ranges = literal_ranges(sql);
    let bytes = sql.as_bytes();
    let mut out = String::with_capacity(sql.len());
    let mut cursor = 0;
    let mut i = 0;

    while i + 3 <= bytes.len() {
        if !sql.is_char_boundary(i) || !sql.is_char_boundary(i + 3) {
            i += 1;
            continue;
        }
        let candidate = &sql[i..i + 3];
        let op = OPERATORS.iter().find(|(token, _)| *token == candidate);
        if let (Some((_, func)), false) = (op, in_ranges(&ranges, i)) {
            let func = *func;
            if let Some((left_start, left_text)) = backward_operand(sql, &ranges, i) {
                if let Some((right_end, right_text)) = forward_operand(sql, &ranges, i + 3) {
                    out.push_str(&sql[cursor..left_start]);
                    out.push_str(func);
                    out.push('(');
                    out.push_str(&left_text);
                    out.push_str(", ");
                    out.push_str(&right_text);
                    out.push(')');
                    cursor = right_end;
                    i = right_end;
                    continue;
                }
            }
        }
        i += 1;
    }
    out.push_str(&sql[cursor..]);
    out
}

fn in_ranges(ranges: &[Range], pos: usize) -> bool {
    ranges.iter().any(|&(s, e)| pos >= s && pos < e)
}

/// Scans backward from `end` (the operator's start byte, i.e. the operand
/// must finish at or before `end` modulo whitespace) for the operand
/// immediately preceding the operator. Returns the operand's start byte and
/// its rendered (possibly rewritten) text.
fn backward_operand(sql: &str, ranges: &[Range], end: usize) -> Option<(usize, String)> {
    let bytes = sql.as_bytes();
    let mut j = end;
    while j > 0 && bytes[j - 1] == b' ' {
        j -= 1;
    }
    if j == 0 {
        return None;
    }

    if let Some(&(start, range_end)) = ranges.iter().find(|&&(_, e)| e == j) {
        return Some((start, format!("TO_VECTOR({}, FLOAT)", &sql[start..range_end])));
    }

    if bytes[j - 1] == b')' {
        let mut depth = 0i32;
        let mut k = j;
        loop {
            if k == 0 {
                return None;
            }
            if let Some(&(start, range_end)) = ranges.iter().find(|&&(_, e)| e == k) {
                k = start;
                let _ = range_end;
                continue;
            }
            k -= 1;
            match bytes[k] {
                b')' => depth += 1,
                b'(' => {
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                }
                _ => {}
            }
        }
        // Include a function name directly preceding the parenthesized
        // group (e.g. `CAST(...)`), so the operand isn't split in two.
        while k > 0 {
            let c = bytes[k - 1];
            if c.is_ascii_alphanumeric() || c == b'_' {
                k -= 1;
            } else {
                break;
            }
        }
        return Some((k, sql[k..j].to_string()));
    }

    let mut k = j;
    while k > 0 {
        let c = bytes[k - 1];
        if c.is_ascii_alphanumeric() || c == b'_' || c == b'.' || c == b'"' || c == b'?' {
            k -= 1;
        } else {
            break;
        }
    }
    if k == j {
        return None;
    }
    Some((k, sql[k..j].to_string()))
}

/// The forward counterpart of [`backward_operand`]: scans from `start`
/// (just past the operator) for the following operand. Returns the
/// operand's end byte and its rendered text.
fn forward_operand(sql: &str, ranges: &[Range], start: usize) -> Option<(usize, String)> {
    let bytes = sql.as_bytes();
    let mut j = start;
    while j < bytes.len() && bytes[j] == b' ' {
        j += 1;
    }
    if j >= bytes.len() {
        return None;
    }

    if let Some(&(range_start, range_end)) = ranges.iter().find(|&&(s, _)| s == j) {
        let mut end = range_end;
        if sql[end..].starts_with("::") {
            let mut k = end + 2;
            while k < bytes.len() && (bytes[k].is_ascii_alphanumeric() || bytes[k] == b'_') {
                k += 1;
            }
            if sql[end + 2..k].eq_ignore_ascii_case("vector") {
                end = k;
            }
        }
        return Some((end, format!("TO_VECTOR({}, FLOAT)", &sql[range_start..range_end])));
    }

    if bytes[j] == b'(' {
        let mut depth = 0i32;
        let mut k = j;
        loop {
            if k >= bytes.len() {
                return None;
            }
            if let Some(&(_, range_end)) = ranges.iter().find(|&&(s, _)| s == k) {
                k = range_end;
                continue;
            }
            match bytes[k] {
                b'(' => depth += 1,
                b')' => {
                    depth -= 1;
                    if depth == 0 {
                        k += 1;
                        break;
                    }
                }
                _ => {}
            }
            k += 1;
        }
        return Some((k, sql[j..k].to_string()));
    }

    let mut k = j;
    while k < bytes.len() {
        let c = bytes[k];
        if c.is_ascii_alphanumeric() || c == b'_' || c == b'.' || c == b'"' || c == b'?' {
            k += 1;
        } else {
            break;
        }
    }
    if k == j {
        return None;
    }
    Some((k, sql[j..k].to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrites_l2_between_columns() {
        assert_eq!(rewrite_vector_ops("select embedding <-> query from t"), "select VECTOR_L2(embedding, query) from t");
    }

    #[test]
    fn rewrites_cosine_against_a_literal() {
        assert_eq!(
            rewrite_vector_ops("select e <=> '[1,2,3]'::vector from t"),
            "select VECTOR_COSINE(e, TO_VECTOR('[1,2,3]', FLOAT)) from t"
        );
    }

    #[test]
    fn rewrites_dot_product_with_parenthesized_operand() {
        assert_eq!(
            rewrite_vector_ops("select (a + b) <#> c from t"),
            "select VECTOR_DOT_PRODUCT((a + b), c) from t"
        );
    }

    #[test]
    fn leaves_operator_like_text_inside_string_literals_alone() {
        let sql = "select '<->' from t";
        assert_eq!(rewrite_vector_ops(sql), sql);
    }
}
