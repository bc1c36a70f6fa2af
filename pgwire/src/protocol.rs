//! The query engine (spec.md §4.5's Parse/Bind/Describe/Execute semantics
//! and the `SIMPLE_QUERY` sub-state's per-statement translate → execute
//! pipeline), grounded in the teacher's `pgwire::protocol::StateMachine`
//! (`query`, `one_query` were left as `todo!()` bodies; the translate →
//! execute → encode pipeline here is what they were reaching for, against
//! the real [`translator`]/[`executor`]/[`catalog`] crates rather than the
//! teacher's own in-process query planner).
//!
//! This module knows nothing about the transaction-wrapping or
//! skip-until-sync bookkeeping that spans multiple messages — that lives
//! in [`crate::session_machine`], which calls into the functions here once
//! per message.

use std::sync::{Arc, Mutex};

use common::config::IdentifierCasePolicy;
use common::error::{GatewayError, Result};
use executor::{BackendExecutor, ColumnMeta, ExecuteResult};
use pgrepr::{Format, Type, Value};
use session::{PreparedStatement, Session};
use translator::mask;
use translator::TranslationCache;

use crate::message::{
    data_row, row_description, BackendMessage, DescribeKind, FrontendMessage, RawParam,
};

/// Shared, read-mostly translation state every session's [`QueryEngine`]
/// consults (spec.md §5: "the translation cache is a concurrent LRU with
/// per-shard locks" — simplified here to one shared mutex, since the
/// teacher never reaches for a sharded map either; see DESIGN.md).
pub struct TranslatorShared {
    pub policy: IdentifierCasePolicy,
    pub cache: Mutex<TranslationCache>,
}

impl TranslatorShared {
    pub fn new(policy: IdentifierCasePolicy, cache: TranslationCache) -> Arc<TranslatorShared> {
        Arc::new(TranslatorShared { policy, cache: Mutex::new(cache) })
    }

    fn translate(&self, sql: &str) -> translator::TranslationResult {
        let mut cache = self.cache.lock().expect("translation cache lock poisoned");
        translator::translate_cached(sql, self.policy, &mut cache)
    }
}

/// Splits a simple-query string on unquoted, non-commented `;` (spec.md
/// §4.5's `SIMPLE_QUERY` step 1). Reuses [`mask::literal_ranges`] rather
/// than a fresh scanner, since the same "don't touch string/comment
/// bytes" rule applies here as it does to every `translator` stage.
pub fn split_statements(sql: &str) -> Vec<String> {
    let ranges = mask::literal_ranges(sql);
    let mut statements = Vec::new();
    let mut start = 0usize;
    for (i, b) in sql.bytes().enumerate() {
        if b == b';' && !mask::in_ranges(&ranges, i) {
            let stmt = sql[start..i].trim();
            if !stmt.is_empty() {
                statements.push(stmt.to_string());
            }
            start = i + 1;
        }
    }
    let tail = sql[start..].trim();
    if !tail.is_empty() {
        statements.push(tail.to_string());
    }
    statements
}

/// Whether a translated statement produces a result set, decided
/// syntactically rather than by running it (spec.md §9's "pick one at
/// startup" reflection note: this workspace picks the dry-run path, but
/// only for statements this check identifies as read-only — see
/// DESIGN.md's resolution of that open question).
fn is_row_producing(translated_sql: &str) -> bool {
    let upper = translated_sql.trim_start().to_ascii_uppercase();
    upper.starts_with("SELECT") || upper.starts_with("SHOW") || upper.starts_with("WITH")
}

/// Extracts the quoted literals inside a parenthesized `IN (...)` list
/// (spec.md §6's `pg_type` probe). Hand-scanned rather than parsed with
/// `sqlparser`, matching the precedent `executor::fake` and
/// `translator::mask` already set in this workspace for the handful of
/// stereotyped statements drivers actually send at startup.
fn extract_in_list(sql: &str) -> Vec<String> {
    let upper = sql.to_ascii_uppercase();
    let Some(in_pos) = upper.find(" IN ") else { return Vec::new() };
    let after = &sql[in_pos + 4..];
    let Some(open) = after.find('(') else { return Vec::new() };
    let Some(close) = after[open..].find(')') else { return Vec::new() };
    after[open + 1..open + close]
        .split(',')
        .filter_map(|s| {
            let s = s.trim().trim_matches('\'');
            if s.is_empty() { None } else { Some(s.to_string()) }
        })
        .collect()
}

/// Answers a catalog-shim probe (spec.md §6) from `catalog`'s static
/// tables, or `None` if `original_sql` isn't one of the recognized
/// startup queries — callers fall back to the real executor in that case.
pub fn catalog_lookup(original_sql: &str) -> Option<catalog::RowSet> {
    let trimmed = original_sql.trim().trim_end_matches(';').trim();
    let upper = trimmed.to_ascii_uppercase();
    if upper == "SELECT VERSION()" {
        return Some(catalog::version_row_set());
    }
    if let Some(rest) = upper.strip_prefix("SHOW ") {
        return catalog::show_row_set(rest.trim());
    }
    if upper.contains("PG_TYPE") {
        let names = extract_in_list(trimmed);
        let names_ref: Vec<&str> = names.iter().map(String::as_str).collect();
        return Some(catalog::pg_type_row_set(&names_ref));
    }
    None
}

fn catalog_to_execute_result(rs: catalog::RowSet) -> ExecuteResult {
    let columns: Vec<ColumnMeta> = rs.columns.iter().map(|c| ColumnMeta::new(c.name, c.ty)).collect();
    let row_count = rs.rows.len();
    let rows: Vec<Vec<Value>> = rs
        .rows
        .into_iter()
        .map(|row| row.into_iter().map(|v| v.map(Value::Text).unwrap_or(Value::Null)).collect())
        .collect();
    ExecuteResult { columns, rows, rows_affected: row_count as u64, tag: format!("SELECT {row_count}") }
}

/// Merges alias-stage output over executor-reported column metadata
/// (spec.md §3's "Column descriptor" naming precedence: alias, then
/// executor name, then synthesized `columnN`).
fn apply_aliases(mut columns: Vec<ColumnMeta>, aliases: &[Option<String>]) -> Vec<ColumnMeta> {
    for (i, col) in columns.iter_mut().enumerate() {
        if let Some(Some(alias)) = aliases.get(i) {
            col.name = alias.clone();
        } else if col.name.is_empty() {
            col.name = format!("column{}", i + 1);
        }
    }
    columns
}

pub struct QueryEngine {
    shared: Arc<TranslatorShared>,
}

impl QueryEngine {
    pub fn new(shared: Arc<TranslatorShared>) -> Self {
        QueryEngine { shared }
    }

    /// Runs one already-split statement from a simple-query string
    /// (spec.md §4.5 `SIMPLE_QUERY` steps 2-4). Catalog probes are
    /// answered directly; everything else is translated and handed to the
    /// executor. Does not touch transaction state — the caller wraps the
    /// whole query string in an implicit transaction (spec.md step 2).
    pub async fn run_simple_statement(
        &self,
        executor: &mut dyn BackendExecutor,
        sql: &str,
    ) -> Result<Vec<BackendMessage>> {
        if let Some(rs) = catalog_lookup(sql) {
            let result = catalog_to_execute_result(rs);
            return Ok(self.encode_select_result(result, &[]));
        }

        let translated = self.shared.translate(sql);
        for warning in &translated.warnings {
            tracing::debug!(sql, warning, "translation warning");
        }

        if is_row_producing(&translated.sql) {
            let result = executor
                .execute(&translated.sql, &[], &[])
                .await
                .map_err(GatewayError::from)?;
            Ok(self.encode_select_result(result, &translated.aliases))
        } else {
            let result = executor
                .execute(&translated.sql, &[], &[])
                .await
                .map_err(GatewayError::from)?;
            Ok(vec![BackendMessage::CommandComplete { tag: result.tag }])
        }
    }

    fn encode_select_result(&self, result: ExecuteResult, aliases: &[Option<String>]) -> Vec<BackendMessage> {
        let columns = apply_aliases(result.columns, aliases);
        let formats = vec![Format::Text; columns.len()];
        let mut messages = vec![row_description(&columns, &formats)];
        for row in &result.rows {
            messages.push(data_row(row, &formats).expect("text encoding never fails"));
        }
        let tag = if result.tag.is_empty() { format!("SELECT {}", result.rows.len()) } else { result.tag };
        messages.push(BackendMessage::CommandComplete { tag });
        messages
    }

    /// `Parse` (spec.md §4.5, §3's `PreparedStatement` lifecycle). Builds
    /// the statement's column metadata eagerly via a dry run with NULL
    /// parameters for row-producing statements (one of the two legal
    /// reflection paths spec.md §9 allows — see DESIGN.md), so `Describe`
    /// never needs to touch the executor again and column names stay
    /// stable across every subsequent `Bind` (spec.md §4.5's invariant).
    pub async fn parse(
        &self,
        session: &mut Session,
        statement: &str,
        sql: &str,
        client_param_oids: &[Option<Type>],
    ) -> Result<Vec<BackendMessage>> {
        let catalog_rs = catalog_lookup(sql);

        let (translated_sql, param_oids, aliases) = if let Some(rs) = &catalog_rs {
            (sql.to_string(), Vec::new(), rs.columns.iter().map(|c| Some(c.name.to_string())).collect())
        } else {
            let translated = self.shared.translate(sql);
            (translated.sql, translated.param_oids, translated.aliases)
        };

        let final_param_oids: Vec<Type> = (0..param_oids.len())
            .map(|i| client_param_oids.get(i).copied().flatten().unwrap_or(param_oids[i]))
            .collect();

        let columns = if let Some(rs) = catalog_rs {
            catalog_to_execute_result(rs).columns
        } else if is_row_producing(&translated_sql) {
            let null_params = vec![Value::Null; final_param_oids.len()];
            let executor = session.executor_mut().expect("executor bound for the life of the session");
            let dry_run = executor
                .execute(&translated_sql, &null_params, &[])
                .await
                .map_err(GatewayError::from)?;
            apply_aliases(dry_run.columns, &aliases)
        } else {
            Vec::new()
        };

        let prepared = PreparedStatement {
            name: statement.to_string(),
            original_sql: sql.to_string(),
            translated_sql,
            param_oids: final_param_oids,
            columns,
        };
        session.add_statement(prepared)?;
        Ok(vec![BackendMessage::ParseComplete])
    }

    /// `Bind` (spec.md §4.5). Validates parameter and format-code counts
    /// against the statement before decoding, per the invariant in spec.md
    /// §3.
    pub fn bind(
        &self,
        session: &mut Session,
        portal: &str,
        statement: &str,
        raw_params: Vec<RawParam>,
        result_format_codes: Vec<Format>,
    ) -> Result<Vec<BackendMessage>> {
        let stmt = session
            .get_statement(statement)
            .ok_or_else(|| GatewayError::undefined_statement(statement))?
            .clone();

        if raw_params.len() != stmt.param_count() {
            return Err(GatewayError::parameter_bind(format!(
                "bind message supplies {} parameters, but statement \"{statement}\" requires {}",
                raw_params.len(),
                stmt.param_count()
            )));
        }

        let mut params = Vec::with_capacity(raw_params.len());
        for (raw, ty) in raw_params.into_iter().zip(stmt.param_oids.iter()) {
            params.push(Value::decode(*ty, raw.format, raw.bytes.as_deref())?);
        }

        let result_formats = pgrepr::resolve_format_codes(&result_format_codes, stmt.columns.len())?;

        session.add_portal(session::Portal::new(portal.to_string(), stmt, params, result_formats));
        Ok(vec![BackendMessage::BindComplete])
    }

    /// `Describe(Statement)` (spec.md §4.5): `ParameterDescription` plus
    /// `RowDescription`/`NoData` from the statement's cached metadata —
    /// never re-executes anything.
    pub fn describe_statement(&self, session: &Session, name: &str) -> Result<Vec<BackendMessage>> {
        let stmt = session.get_statement(name).ok_or_else(|| GatewayError::undefined_statement(name))?;
        let mut messages = vec![BackendMessage::ParameterDescription {
            param_oids: stmt.param_oids.iter().map(|t| t.oid()).collect(),
        }];
        messages.push(if stmt.columns.is_empty() {
            BackendMessage::NoData
        } else {
            let formats = vec![Format::Text; stmt.columns.len()];
            row_description(&stmt.columns, &formats)
        });
        Ok(messages)
    }

    /// `Describe(Portal)` (spec.md §4.5): `RowDescription`/`NoData` using
    /// the portal's already-resolved result formats.
    pub fn describe_portal(&self, session: &Session, name: &str) -> Result<Vec<BackendMessage>> {
        let portal = session.get_portal(name).ok_or_else(|| GatewayError::undefined_portal(name))?;
        Ok(vec![if portal.statement.columns.is_empty() {
            BackendMessage::NoData
        } else {
            row_description(&portal.statement.columns, &portal.result_formats)
        }])
    }

    /// `Execute` (spec.md §4.5). Row-limited execution buffers the
    /// remainder on the portal and emits `PortalSuspended`; an unlimited
    /// or fully-drained execution destroys the unnamed portal implicitly.
    pub async fn execute(
        &self,
        session: &mut Session,
        portal_name: &str,
        max_rows: i32,
    ) -> Result<Vec<BackendMessage>> {
        let (messages, exhausted) = {
            let (executor, portal) = session
                .executor_and_portal_mut(portal_name)
                .ok_or_else(|| GatewayError::undefined_portal(portal_name))?;

            if portal.pending_rows.is_none() {
                if let Some(rs) = catalog_lookup(&portal.statement.original_sql) {
                    portal.pending_rows = Some(catalog_to_execute_result(rs).rows.into());
                } else if portal.statement.columns.is_empty() && !is_row_producing(&portal.statement.translated_sql) {
                    // Non-row-producing statement: run it now and return its
                    // tag directly, nothing to buffer or suspend.
                    let result = executor
                        .execute(&portal.statement.translated_sql, &portal.params, &portal.result_formats)
                        .await
                        .map_err(GatewayError::from)?;
                    return Ok(vec![BackendMessage::CommandComplete { tag: result.tag }]);
                } else {
                    let result = executor
                        .execute(&portal.statement.translated_sql, &portal.params, &portal.result_formats)
                        .await
                        .map_err(GatewayError::from)?;
                    portal.pending_rows = Some(result.rows.into());
                }
            }

            let formats = portal.result_formats.clone();
            let pending = portal.pending_rows.as_mut().expect("just populated above");
            let to_send = if max_rows > 0 { (max_rows as usize).min(pending.len()) } else { pending.len() };
            let mut messages = Vec::with_capacity(to_send + 1);
            for _ in 0..to_send {
                let row = pending.pop_front().expect("bounded by pending.len()");
                messages.push(data_row(&row, &formats)?);
            }

            let exhausted = pending.is_empty();
            if exhausted {
                let tag = format!("SELECT {}", messages.len());
                messages.push(BackendMessage::CommandComplete { tag });
            } else {
                messages.push(BackendMessage::PortalSuspended);
            }
            (messages, exhausted)
        };

        // Only the unnamed portal is torn down automatically on completion
        // (real PostgreSQL's convention); a named portal survives until an
        // explicit `Close` or the session ends.
        if exhausted && portal_name.is_empty() {
            session.close_portal(portal_name);
        }
        Ok(messages)
    }

    /// `Close` (spec.md §4.5, §3). Closing a statement cascades to every
    /// portal bound against it.
    pub fn close(&self, session: &mut Session, kind: DescribeKind, name: &str) -> Vec<BackendMessage> {
        match kind {
            DescribeKind::Statement => session.close_statement_cascade(name),
            DescribeKind::Portal => session.close_portal(name),
        }
        vec![BackendMessage::CloseComplete]
    }
}

/// Converts a decoded `Bind` frontend message's raw fields into the
/// `(portal, statement, params, result_formats)` tuple [`QueryEngine::bind`]
/// expects, a thin adapter kept separate so `session_machine` doesn't have
/// to pattern-match `FrontendMessage::Bind` itself.
pub fn bind_fields(message: FrontendMessage) -> Option<(String, String, Vec<RawParam>, Vec<Format>)> {
    match message {
        FrontendMessage::Bind { portal, statement, params, result_formats } => {
            Some((portal, statement, params, result_formats))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_unquoted_semicolons_only() {
        let stmts = split_statements("select 'a;b'; select 1; ");
        assert_eq!(stmts, vec!["select 'a;b'".to_string(), "select 1".to_string()]);
    }

    #[test]
    fn catalog_lookup_answers_version_probe() {
        let rs = catalog_lookup("SELECT version()").unwrap();
        assert_eq!(rs.rows.len(), 1);
    }

    #[test]
    fn catalog_lookup_ignores_unrelated_queries() {
        assert!(catalog_lookup("SELECT * FROM accounts").is_none());
    }

    #[test]
    fn row_producing_detects_select_and_show() {
        assert!(is_row_producing("SELECT 1"));
        assert!(is_row_producing("SHOW DateStyle"));
        assert!(!is_row_producing("INSERT INTO t VALUES (1)"));
    }
}
