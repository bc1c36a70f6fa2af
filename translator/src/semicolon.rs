//! Stage 1: semicolon trim (spec.md §4.4). IRIS rejects a trailing `;`;
//! clients send one routinely.

pub fn trim_trailing_semicolons(sql: &str) -> &str {
    sql.trim_end().trim_end_matches(';').trim_end()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_trailing_semicolon_and_whitespace() {
        assert_eq!(trim_trailing_semicolons("select 1;  \n"), "select 1");
        assert_eq!(trim_trailing_semicolons("select 1;;  "), "select 1");
        assert_eq!(trim_trailing_semicolons("select 1"), "select 1");
    }
}
