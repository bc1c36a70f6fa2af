//! A test-only [`BackendExecutor`] that needs no real IRIS instance,
//! grounded in the teacher's `storage::memory::MemoryEngine` in-memory
//! table. spec.md treats IRIS as an external collaborator (§1), so this
//! workspace needs *some* stand-in to be testable at all; this one
//! implements exactly the statement shapes this crate's own test suite and
//! `gateway`'s end-to-end smoke test exercise (`CREATE TABLE`, `INSERT`, and
//! a `SELECT` with an optional `FROM`/`WHERE`/`ORDER BY`/`TOP` or `LIMIT`) —
//! not a general SQL engine. Unlike the real variants, this one does its
//! own minimal clause splitting rather than reaching for a SQL parser,
//! following the same hand-scanning idiom `translator::mask` already
//! established in this workspace.

use std::collections::HashMap;

use async_trait::async_trait;
use pgrepr::{Format, Type, Value};

use crate::{
    BackendExecutor, BatchPath, CancelSignal, CancelWaiter, ColumnMeta, ExecError, ExecResult,
    ExecuteResult, TransactionStatus,
};

#[derive(Clone)]
struct Column {
    name: String,
    ty: Type,
}

#[derive(Clone, Default)]
struct Table {
    columns: Vec<Column>,
    rows: Vec<Vec<Value>>,
}

/// One value position in a parsed statement: either a literal already
/// present in the SQL text, or a `?` placeholder bound from the caller's
/// parameter list, matching the IRIS-dialect placeholder convention
/// `executor::literal` substitutes against.
enum Tok {
    Literal(String),
    Placeholder,
}

/// An in-memory stand-in for an IRIS instance. `begin()` snapshots every
/// table; `rollback()` restores the snapshot, matching the all-or-nothing
/// behavior spec.md §8's COPY rollback scenario needs without a real
/// transaction log.
pub struct FakeExecutor {
    tables: HashMap<String, Table>,
    snapshot: Option<HashMap<String, Table>>,
    waiter: CancelWaiter,
    _signal: CancelSignal,
}

impl Default for FakeExecutor {
    fn default() -> Self {
        let (signal, waiter) = CancelSignal::new();
        FakeExecutor { tables: HashMap::new(), snapshot: None, waiter, _signal: signal }
    }
}

impl FakeExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    fn run(&mut self, sql: &str, params: &[Value]) -> ExecResult<ExecuteResult> {
        let trimmed = sql.trim().trim_end_matches(';').trim();
        let upper = trimmed.to_ascii_uppercase();
        if upper.starts_with("CREATE TABLE") {
            self.create_table(trimmed)
        } else if upper.starts_with("INSERT INTO") {
            self.insert(trimmed, params)
        } else if upper.starts_with("SELECT") {
            self.select(trimmed, params)
        } else {
            Err(ExecError::Syntax { message: format!("unsupported statement in fake executor: {trimmed}"), position: None })
        }
    }

    fn create_table(&mut self, sql: &str) -> ExecResult<ExecuteResult> {
        let rest = &sql["CREATE TABLE".len()..];
        let open = rest.find('(').ok_or_else(|| syntax("missing column list"))?;
        let close = rest.rfind(')').ok_or_else(|| syntax("missing closing paren"))?;
        let name = rest[..open].trim().to_ascii_uppercase();
        let mut columns = Vec::new();
        for col_def in split_top_level(&rest[open + 1..close], ',') {
            let mut parts = col_def.trim().splitn(2, char::is_whitespace);
            let col_name = parts.next().unwrap_or_default().trim().to_ascii_uppercase();
            let type_name = parts.next().unwrap_or("TEXT").trim();
            columns.push(Column { name: col_name, ty: parse_type_name(type_name) });
        }
        self.tables.insert(name, Table { columns, rows: Vec::new() });
        Ok(ExecuteResult::empty("CREATE TABLE"))
    }

    fn insert(&mut self, sql: &str, params: &[Value]) -> ExecResult<ExecuteResult> {
        let rest = sql["INSERT INTO".len()..].trim();
        let values_pos = find_keyword(rest, "VALUES").ok_or_else(|| syntax("expected VALUES"))?;
        let (head, tail) = rest.split_at(values_pos);
        let tail = &tail["VALUES".len()..];

        let (table_part, explicit_columns) = match head.find('(') {
            Some(open) => {
                let close = head.rfind(')').ok_or_else(|| syntax("missing closing paren in column list"))?;
                let cols: Vec<String> = split_top_level(&head[open + 1..close], ',')
                    .into_iter()
                    .map(|c| c.trim().to_ascii_uppercase())
                    .collect();
                (head[..open].trim(), Some(cols))
            }
            None => (head.trim(), None),
        };
        let name = table_part.to_ascii_uppercase();

        let open = tail.find('(').ok_or_else(|| syntax("expected value list"))?;
        let close = tail.rfind(')').ok_or_else(|| syntax("missing closing paren in value list"))?;
        let value_toks: Vec<Tok> = split_top_level(&tail[open + 1..close], ',')
            .into_iter()
            .map(|v| parse_tok(v.trim()))
            .collect();

        let table = self.tables.get_mut(&name).ok_or_else(|| syntax(&format!("undefined table {name}")))?;
        let target_columns: Vec<usize> = match &explicit_columns {
            Some(cols) => cols
                .iter()
                .map(|c| {
                    table.columns.iter().position(|tc| &tc.name == c).ok_or_else(|| syntax(&format!("undefined column {c}")))
                })
                .collect::<ExecResult<_>>()?,
            None => (0..table.columns.len()).collect(),
        };

        let mut param_cursor = 0usize;
        let mut row = vec![Value::Null; table.columns.len()];
        for (slot, tok) in target_columns.iter().zip(value_toks.iter()) {
            let ty = table.columns[*slot].ty;
            let value = resolve_tok(tok, params, &mut param_cursor, ty)?;
            row[*slot] = value;
        }
        table.rows.push(row);
        Ok(ExecuteResult { columns: Vec::new(), rows: Vec::new(), rows_affected: 1, tag: "INSERT 0 1".to_string() })
    }

    fn select(&mut self, sql: &str, params: &[Value]) -> ExecResult<ExecuteResult> {
        let rest = &sql["SELECT".len()..];

        let (top_limit, rest) = match find_keyword(rest.trim_start(), "TOP") {
            Some(0) => {
                let after = rest.trim_start()["TOP".len()..].trim_start();
                let digits: String = after.chars().take_while(|c| c.is_ascii_digit()).collect();
                let n: usize = digits.parse().map_err(|_| syntax("invalid TOP count"))?;
                (Some(n), &after[digits.len()..])
            }
            _ => (None, rest),
        };

        let from_pos = find_keyword(rest, "FROM");
        let (select_list, after_from) = match from_pos {
            Some(pos) => (&rest[..pos], &rest[pos + "FROM".len()..]),
            None => (rest, ""),
        };

        let where_pos = find_keyword(after_from, "WHERE");
        let order_pos = find_keyword(after_from, "ORDER BY");
        let limit_pos = find_keyword(after_from, "LIMIT");

        let clause_starts: Vec<usize> = [where_pos, order_pos, limit_pos].into_iter().flatten().collect();
        let table_end = clause_starts.iter().copied().min().unwrap_or(after_from.len());
        let table_name = after_from[..table_end].trim();

        let where_clause = where_pos.map(|p| {
            let end = [order_pos, limit_pos].into_iter().flatten().filter(|&o| o > p).min().unwrap_or(after_from.len());
            after_from[p + "WHERE".len()..end].trim()
        });
        let order_clause = order_pos.map(|p| {
            let end = limit_pos.filter(|&o| o > p).unwrap_or(after_from.len());
            after_from[p + "ORDER BY".len()..end].trim()
        });
        let limit_clause = limit_pos.map(|p| after_from[p + "LIMIT".len()..].trim());

        let (columns, mut rows): (Vec<Column>, Vec<Vec<Value>>) = if table_name.is_empty() {
            (Vec::new(), vec![Vec::new()])
        } else {
            let table = self
                .tables
                .get(&table_name.to_ascii_uppercase())
                .ok_or_else(|| syntax(&format!("undefined table {table_name}")))?;
            (table.columns.clone(), table.rows.clone())
        };

        if let Some(clause) = where_clause {
            let (col, value_text) = split_once_operator(clause).ok_or_else(|| syntax("unsupported WHERE clause"))?;
            let idx = columns.iter().position(|c| c.name.eq_ignore_ascii_case(col)).ok_or_else(|| syntax(&format!("undefined column {col}")))?;
            let ty = columns[idx].ty;
            let target = resolve_tok(&parse_tok(value_text), params, &mut 0, ty)?;
            rows.retain(|row| values_equal(&row[idx], &target));
        }

        if let Some(clause) = order_clause {
            let mut parts = clause.split_whitespace();
            let col = parts.next().unwrap_or_default();
            let descending = parts.next().map(|d| d.eq_ignore_ascii_case("DESC")).unwrap_or(false);
            if let Some(idx) = columns.iter().position(|c| c.name.eq_ignore_ascii_case(col)) {
                rows.sort_by(|a, b| {
                    let ord = compare_values(&a[idx], &b[idx]);
                    if descending { ord.reverse() } else { ord }
                });
            }
        }

        let mut out_columns = Vec::new();
        let item_list: Vec<&str> = split_top_level(select_list, ',');
        let mut projected: Vec<Vec<Value>> = rows.iter().map(|_| Vec::new()).collect();

        for item in &item_list {
            let item = item.trim();
            if item == "*" {
                for (i, col) in columns.iter().enumerate() {
                    out_columns.push(ColumnMeta::new(col.name.clone(), col.ty));
                    for (row_idx, row) in rows.iter().enumerate() {
                        projected[row_idx].push(row[i].clone());
                    }
                }
                continue;
            }
            if let Some(idx) = columns.iter().position(|c| c.name.eq_ignore_ascii_case(item)) {
                out_columns.push(ColumnMeta::new(columns[idx].name.clone(), columns[idx].ty));
                for (row_idx, row) in rows.iter().enumerate() {
                    projected[row_idx].push(row[idx].clone());
                }
                continue;
            }
            // A bare literal or placeholder projection (e.g. `SELECT 1`).
            let tok = parse_tok(item);
            let ty = infer_literal_type(&tok);
            out_columns.push(ColumnMeta::new(default_column_name(item), ty));
            let mut cursor = 0usize;
            for row_idx in 0..rows.len() {
                let value = resolve_tok(&tok, params, &mut cursor, ty)?;
                projected[row_idx].push(value);
            }
        }

        let limit = top_limit.or_else(|| limit_clause.and_then(|s| s.parse().ok()));
        if let Some(n) = limit {
            projected.truncate(n);
        }

        let count = projected.len();
        Ok(ExecuteResult { columns: out_columns, rows: projected, rows_affected: count as u64, tag: format!("SELECT {count}") })
    }
}

fn syntax(message: &str) -> ExecError {
    ExecError::Syntax { message: message.to_string(), position: None }
}

/// Splits `s` on top-level occurrences of `sep`, ignoring separators inside
/// single-quoted strings or parenthesized groups.
fn split_top_level(s: &str, sep: char) -> Vec<&str> {
    let mut out = Vec::new();
    let mut depth = 0i32;
    let mut in_string = false;
    let mut start = 0usize;
    for (i, ch) in s.char_indices() {
        match ch {
            '\'' => in_string = !in_string,
            '(' if !in_string => depth += 1,
            ')' if !in_string => depth -= 1,
            c if c == sep && !in_string && depth == 0 => {
                out.push(&s[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    out.push(&s[start..]);
    out
}

/// Finds the first top-level occurrence of `keyword`, case-insensitively,
/// word-bounded so e.g. `FROM` does not match inside `FROMAGE`.
fn find_keyword(s: &str, keyword: &str) -> Option<usize> {
    let upper = s.to_ascii_uppercase();
    let kw = keyword.to_ascii_uppercase();
    let mut search_from = 0usize;
    while let Some(rel) = upper[search_from..].find(&kw) {
        let pos = search_from + rel;
        let before_ok = pos == 0 || !upper.as_bytes()[pos - 1].is_ascii_alphanumeric();
        let after = pos + kw.len();
        let after_ok = after >= upper.len() || !upper.as_bytes()[after].is_ascii_alphanumeric();
        if before_ok && after_ok {
            return Some(pos);
        }
        search_from = pos + kw.len();
    }
    None
}

fn split_once_operator(clause: &str) -> Option<(&str, &str)> {
    let pos = clause.find('=')?;
    Some((clause[..pos].trim(), clause[pos + 1..].trim()))
}

fn parse_tok(text: &str) -> Tok {
    if text == "?" {
        Tok::Placeholder
    } else {
        Tok::Literal(text.to_string())
    }
}

fn default_column_name(item: &str) -> String {
    item.trim_matches('\'').to_string()
}

fn infer_literal_type(tok: &Tok) -> Type {
    match tok {
        Tok::Placeholder => Type::Text,
        Tok::Literal(s) => {
            let trimmed = s.trim();
            if trimmed.starts_with('\'') {
                Type::Text
            } else if trimmed.eq_ignore_ascii_case("NULL") {
                Type::Text
            } else if trimmed.contains('.') && trimmed.parse::<f64>().is_ok() {
                Type::Float8
            } else if trimmed.parse::<i32>().is_ok() {
                Type::Int4
            } else {
                Type::Text
            }
        }
    }
}

fn resolve_tok(tok: &Tok, params: &[Value], param_cursor: &mut usize, ty: Type) -> ExecResult<Value> {
    match tok {
        Tok::Placeholder => {
            let value = params.get(*param_cursor).cloned().unwrap_or(Value::Null);
            *param_cursor += 1;
            Ok(value)
        }
        Tok::Literal(text) => Ok(parse_literal_text(text, ty)),
    }
}

fn parse_literal_text(text: &str, ty: Type) -> Value {
    let trimmed = text.trim();
    if trimmed.eq_ignore_ascii_case("NULL") {
        return Value::Null;
    }
    if let Some(inner) = trimmed.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')) {
        let unescaped = inner.replace("''", "'");
        return match ty {
            Type::Varchar => Value::Varchar(unescaped),
            Type::Date => pgrepr::iris::iso_date_to_pg_days(&unescaped).map(Value::Date).unwrap_or(Value::Text(unescaped)),
            _ => Value::Text(unescaped),
        };
    }
    match ty {
        Type::Int2 => trimmed.parse().map(Value::Int2).unwrap_or(Value::Null),
        Type::Int4 => trimmed.parse().map(Value::Int4).unwrap_or(Value::Null),
        Type::Int8 => trimmed.parse().map(Value::Int8).unwrap_or(Value::Null),
        Type::Float4 => trimmed.parse().map(Value::Float4).unwrap_or(Value::Null),
        Type::Float8 => trimmed.parse().map(Value::Float8).unwrap_or(Value::Null),
        Type::Bool => match trimmed.to_ascii_uppercase().as_str() {
            "TRUE" | "1" => Value::Bool(true),
            "FALSE" | "0" => Value::Bool(false),
            _ => Value::Null,
        },
        Type::Text | Type::Varchar => Value::Text(trimmed.to_string()),
        _ => trimmed.parse::<i32>().map(Value::Int4).unwrap_or_else(|_| Value::Text(trimmed.to_string())),
    }
}

fn parse_type_name(name: &str) -> Type {
    let upper = name.trim().to_ascii_uppercase();
    let base = upper.split('(').next().unwrap_or(&upper);
    match base.trim() {
        "INT" | "INTEGER" => Type::Int4,
        "SMALLINT" => Type::Int2,
        "BIGINT" => Type::Int8,
        "BOOL" | "BOOLEAN" => Type::Bool,
        "DATE" => Type::Date,
        "TIMESTAMP" => Type::Timestamp,
        "FLOAT" | "REAL" => Type::Float4,
        "DOUBLE" => Type::Float8,
        "NUMERIC" | "DECIMAL" => Type::Numeric,
        "VARCHAR" => Type::Varchar,
        _ => Type::Text,
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    compare_values(a, b) == std::cmp::Ordering::Equal
}

fn compare_values(a: &Value, b: &Value) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    match (a, b) {
        (Value::Int2(x), Value::Int2(y)) => x.cmp(y),
        (Value::Int4(x), Value::Int4(y)) => x.cmp(y),
        (Value::Int8(x), Value::Int8(y)) => x.cmp(y),
        (Value::Text(x), Value::Text(y)) | (Value::Varchar(x), Value::Varchar(y)) => x.cmp(y),
        (Value::Text(x), Value::Varchar(y)) | (Value::Varchar(x), Value::Text(y)) => x.cmp(y),
        (Value::Float8(x), Value::Float8(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
        (Value::Date(x), Value::Date(y)) => x.cmp(y),
        (Value::Null, Value::Null) => Ordering::Equal,
        _ => Ordering::Equal,
    }
}

#[async_trait]
impl BackendExecutor for FakeExecutor {
    async fn execute(&mut self, sql: &str, params: &[Value], _result_formats: &[Format]) -> ExecResult<ExecuteResult> {
        if self.waiter.is_cancelled() {
            self.waiter.reset();
            return Err(ExecError::Cancelled);
        }
        self.run(sql, params)
    }

    async fn execute_many(&mut self, sql: &str, params_list: &[Vec<Value>]) -> ExecResult<(u64, BatchPath)> {
        let mut affected = 0u64;
        for params in params_list {
            let result = self.run(sql, params)?;
            affected += result.rows_affected;
        }
        Ok((affected, BatchPath::TrueBatch))
    }

    async fn begin(&mut self) -> ExecResult<()> {
        self.snapshot = Some(self.tables.clone());
        Ok(())
    }

    async fn commit(&mut self) -> ExecResult<()> {
        self.snapshot = None;
        Ok(())
    }

    async fn rollback(&mut self) -> ExecResult<()> {
        if let Some(snapshot) = self.snapshot.take() {
            self.tables = snapshot;
        }
        Ok(())
    }

    async fn savepoint(&mut self, _name: &str) -> ExecResult<()> {
        Ok(())
    }

    async fn rollback_to(&mut self, _name: &str) -> ExecResult<()> {
        if let Some(snapshot) = &self.snapshot {
            self.tables = snapshot.clone();
        }
        Ok(())
    }

    fn transaction_status(&self) -> TransactionStatus {
        if self.snapshot.is_some() {
            TransactionStatus::InTransaction
        } else {
            TransactionStatus::Idle
        }
    }

    fn cancel_waiter(&self) -> CancelWaiter {
        self.waiter.clone()
    }

    fn cancel_signal(&self) -> CancelSignal {
        self._signal.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn literal_select_returns_one_row() {
        let mut exec = FakeExecutor::new();
        let result = exec.execute("SELECT 1", &[], &[]).await.unwrap();
        assert_eq!(result.rows, vec![vec![Value::Int4(1)]]);
    }

    #[tokio::test]
    async fn create_insert_select_round_trips() {
        let mut exec = FakeExecutor::new();
        exec.execute("CREATE TABLE patients (id INT, dob DATE)", &[], &[]).await.unwrap();
        exec.execute("INSERT INTO patients (id, dob) VALUES (1, '2001-01-01')", &[], &[]).await.unwrap();
        let result = exec.execute("SELECT id FROM patients", &[], &[]).await.unwrap();
        assert_eq!(result.rows, vec![vec![Value::Int4(1)]]);
    }

    #[tokio::test]
    async fn where_clause_filters_rows() {
        let mut exec = FakeExecutor::new();
        exec.execute("CREATE TABLE t (id INT)", &[], &[]).await.unwrap();
        exec.execute("INSERT INTO t (id) VALUES (1)", &[], &[]).await.unwrap();
        exec.execute("INSERT INTO t (id) VALUES (2)", &[], &[]).await.unwrap();
        let result = exec.execute("SELECT id FROM t WHERE id = 2", &[], &[]).await.unwrap();
        assert_eq!(result.rows, vec![vec![Value::Int4(2)]]);
    }

    #[tokio::test]
    async fn order_by_and_top_limit_results() {
        let mut exec = FakeExecutor::new();
        exec.execute("CREATE TABLE t (id INT)", &[], &[]).await.unwrap();
        exec.execute("INSERT INTO t (id) VALUES (3)", &[], &[]).await.unwrap();
        exec.execute("INSERT INTO t (id) VALUES (1)", &[], &[]).await.unwrap();
        exec.execute("INSERT INTO t (id) VALUES (2)", &[], &[]).await.unwrap();
        let result = exec.execute("SELECT TOP 2 id FROM t ORDER BY id DESC", &[], &[]).await.unwrap();
        assert_eq!(result.rows, vec![vec![Value::Int4(3)], vec![Value::Int4(2)]]);
    }

    #[tokio::test]
    async fn bound_parameters_insert_via_placeholder() {
        let mut exec = FakeExecutor::new();
        exec.execute("CREATE TABLE t (id INT)", &[], &[]).await.unwrap();
        exec.execute("INSERT INTO t (id) VALUES (?)", &[Value::Int4(7)], &[]).await.unwrap();
        let result = exec.execute("SELECT id FROM t", &[], &[]).await.unwrap();
        assert_eq!(result.rows, vec![vec![Value::Int4(7)]]);
    }

    #[tokio::test]
    async fn rollback_restores_snapshot() {
        let mut exec = FakeExecutor::new();
        exec.execute("CREATE TABLE patients (id INT)", &[], &[]).await.unwrap();
        exec.begin().await.unwrap();
        exec.execute("INSERT INTO patients (id) VALUES (1)", &[], &[]).await.unwrap();
        exec.rollback().await.unwrap();
        let result = exec.execute("SELECT id FROM patients", &[], &[]).await.unwrap();
        assert_eq!(result.rows.len(), 0);
    }
}
