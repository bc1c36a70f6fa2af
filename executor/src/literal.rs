//! Literal-substitution quoting rules used by the `execute_many`
//! degradation cascade (spec.md §4.3, §9): when a variant's parameter
//! binding cannot carry a value's type (IRIS's in-process API and `DATE`/
//! `vector` parameters), the batch falls back to a per-row loop where each
//! `?` placeholder is replaced by an inline SQL literal instead of a bound
//! parameter.

use pgrepr::Value;

/// Substitutes each `?` in `sql`, in order, with the literal rendering of
/// the corresponding entry in `params`. Panics only if `sql` has fewer `?`
/// placeholders than `params` has entries, which would indicate a
/// translator bug upstream, not bad client input.
pub fn substitute(sql: &str, params: &[Value]) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut params = params.iter();
    for ch in sql.chars() {
        if ch == '?' {
            let value = params.next().expect("fewer `?` placeholders than bound parameters");
            out.push_str(&render_literal(value));
        } else {
            out.push(ch);
        }
    }
    out
}

/// Renders one value as an IRIS SQL literal: strings are quoted with
/// embedded `'` doubled, NULL renders as the bare keyword, and numeric
/// types render bare (spec.md §4.3).
fn render_literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => if *b { "1" } else { "0" }.to_string(),
        Value::Int2(n) => n.to_string(),
        Value::Int4(n) => n.to_string(),
        Value::Int8(n) => n.to_string(),
        Value::Float4(f) => f.to_string(),
        Value::Float8(f) => f.to_string(),
        Value::Numeric(s) => s.clone(),
        Value::Text(s) | Value::Varchar(s) => quote_string(s),
        Value::Date(days) => quote_string(&pgrepr::iris::pg_days_to_iso_date(*days)),
        Value::Timestamp(micros) | Value::TimestampTz(micros) => {
            quote_string(&format_timestamp_literal(*micros))
        }
        Value::Vector(v) => {
            let rendered: Vec<String> = v.iter().map(|f| f.to_string()).collect();
            format!("TO_VECTOR('[{}]', FLOAT)", rendered.join(","))
        }
    }
}

fn quote_string(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

fn format_timestamp_literal(micros: i64) -> String {
    let days = micros.div_euclid(86_400_000_000);
    let day_micros = micros.rem_euclid(86_400_000_000);
    let date = pgrepr::iris::pg_days_to_iso_date(days as i32);
    let hour = day_micros / 3_600_000_000;
    let min = (day_micros / 60_000_000) % 60;
    let sec = (day_micros / 1_000_000) % 60;
    let frac = day_micros % 1_000_000;
    if frac == 0 {
        format!("{date} {hour:02}:{min:02}:{sec:02}")
    } else {
        format!("{date} {hour:02}:{min:02}:{sec:02}.{frac:06}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quotes_strings_and_doubles_embedded_quotes() {
        let sql = substitute("INSERT INTO t VALUES (?, ?)", &[
            Value::Int4(1),
            Value::Text("O'Brien".to_string()),
        ]);
        assert_eq!(sql, "INSERT INTO t VALUES (1, 'O''Brien')");
    }

    #[test]
    fn null_renders_bare() {
        let sql = substitute("INSERT INTO t VALUES (?)", &[Value::Null]);
        assert_eq!(sql, "INSERT INTO t VALUES (NULL)");
    }

    #[test]
    fn date_renders_as_quoted_iso_string() {
        let sql = substitute("INSERT INTO t VALUES (?)", &[Value::Date(0)]);
        assert_eq!(sql, "INSERT INTO t VALUES ('2000-01-01')");
    }

    #[test]
    fn vector_renders_as_to_vector_call() {
        let sql = substitute("INSERT INTO t VALUES (?)", &[Value::Vector(vec![1.0, 2.0])]);
        assert_eq!(sql, "INSERT INTO t VALUES (TO_VECTOR('[1,2]', FLOAT))");
    }
}
