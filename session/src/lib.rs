//! Per-connection session state (spec.md §3), generalizing the teacher's
//! `session` crate: `Session`, `PreparedStatement`, `Portal`,
//! `TransactionState` all exist there already, sketched with `todo!()`
//! bodies. Here `PreparedStatement`/`Portal` additionally carry the
//! parameter OIDs, column descriptors, and bound parameter bytes spec.md
//! §3 requires, and `Session` drives transaction state from the bound
//! [`executor::BackendExecutor`] handle rather than tracking it locally.

use std::collections::HashMap;
use std::sync::Arc;

use common::error::{GatewayError, Result};
use executor::{BackendExecutor, ColumnMeta, TransactionStatus};
use pgrepr::{Format, Type, Value};

/// One `Parse`-created statement. The unnamed statement (empty name) is
/// replaced without notice on each new Parse (spec.md §3); `Portal`s hold
/// an `Arc` clone so replacing it doesn't invalidate portals already bound
/// against the old one.
#[derive(Debug)]
pub struct PreparedStatement {
    pub name: String,
    pub original_sql: String,
    pub translated_sql: String,
    pub param_oids: Vec<Type>,
    pub columns: Vec<ColumnMeta>,
}

impl PreparedStatement {
    pub fn param_count(&self) -> usize {
        self.param_oids.len()
    }
}

/// One `Bind`-created portal: a reference to its statement plus the bound
/// parameter bytes and requested result formats (spec.md §3). Never
/// readable once the statement it references is closed — enforced here by
/// holding the statement via `Arc` rather than by name lookup, so a
/// portal's statement never disappears out from under it while the portal
/// itself still exists; `Session::close_statement` instead refuses future
/// lookups by name.
#[derive(Debug)]
pub struct Portal {
    pub name: String,
    pub statement: Arc<PreparedStatement>,
    pub params: Vec<Value>,
    pub result_formats: Vec<Format>,
    /// Rows fetched from the executor but not yet sent to the client,
    /// populated on the first row-limited `Execute` and drained by
    /// subsequent `Execute`s on the same portal (spec.md §4.5:
    /// "PortalSuspended on a row-limited Execute"). `None` until the
    /// portal has actually been executed once.
    pub pending_rows: Option<std::collections::VecDeque<Vec<Value>>>,
}

impl Portal {
    pub fn new(name: String, statement: Arc<PreparedStatement>, params: Vec<Value>, result_formats: Vec<Format>) -> Self {
        Portal { name, statement, params, result_formats, pending_rows: None }
    }
}

/// The cancel token issued once per session in `BackendKeyData` (spec.md
/// §3): the pair a second connection must present to request
/// cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancelToken {
    pub backend_pid: i32,
    pub secret_key: i32,
}

/// Per-connection state: a backend pid/secret pair, prepared statements
/// and portals keyed by name, and an optional leased executor handle.
/// Destroyed on TCP close or `Terminate`; destruction returns any leased
/// executor to its pool via normal `Drop`.
pub struct Session {
    pub cancel_token: CancelToken,
    pub application_name: Option<String>,
    statements: HashMap<String, Arc<PreparedStatement>>,
    portals: HashMap<String, Portal>,
    executor: Option<Box<dyn BackendExecutor>>,
}

impl Session {
    pub fn new(cancel_token: CancelToken) -> Self {
        Session {
            cancel_token,
            application_name: None,
            statements: HashMap::new(),
            portals: HashMap::new(),
            executor: None,
        }
    }

    pub fn bind_executor(&mut self, executor: Box<dyn BackendExecutor>) {
        self.executor = Some(executor);
    }

    pub fn executor_mut(&mut self) -> Option<&mut (dyn BackendExecutor + 'static)> {
        self.executor.as_deref_mut()
    }

    pub fn take_executor(&mut self) -> Option<Box<dyn BackendExecutor>> {
        self.executor.take()
    }

    /// Transaction status as `ReadyForQuery` should report it: idle when
    /// no executor is bound (no transaction can be open without one).
    pub fn transaction_status(&self) -> TransactionStatus {
        self.executor.as_ref().map(|e| e.transaction_status()).unwrap_or(TransactionStatus::Idle)
    }

    /// Registers a statement from `Parse`. The unnamed statement (empty
    /// name) replaces any prior unnamed statement without notice (spec.md
    /// §3); a named statement that already exists is an error, since
    /// `Parse` on an existing named statement is a protocol violation the
    /// session machine should have already rejected before calling here.
    pub fn add_statement(&mut self, statement: PreparedStatement) -> Result<()> {
        if !statement.name.is_empty() && self.statements.contains_key(&statement.name) {
            return Err(GatewayError::new(
                common::error::ErrorKind::ProtocolViolation,
                format!("prepared statement \"{}\" already exists", statement.name),
            ));
        }
        self.statements.insert(statement.name.clone(), Arc::new(statement));
        Ok(())
    }

    pub fn get_statement(&self, name: &str) -> Option<&Arc<PreparedStatement>> {
        self.statements.get(name)
    }

    pub fn close_statement(&mut self, name: &str) {
        self.statements.remove(name);
    }

    /// Binds a portal from `Bind`. The unnamed portal (empty name)
    /// replaces any prior unnamed portal (spec.md §3's "destroyed by ...
    /// implicit Execute-to-completion" plus the unnamed-portal-is-replaced
    /// convention PostgreSQL itself follows).
    pub fn add_portal(&mut self, portal: Portal) {
        self.portals.insert(portal.name.clone(), portal);
    }

    pub fn get_portal(&self, name: &str) -> Option<&Portal> {
        self.portals.get(name)
    }

    pub fn get_portal_mut(&mut self, name: &str) -> Option<&mut Portal> {
        self.portals.get_mut(name)
    }

    /// Borrows the bound executor and a named portal simultaneously —
    /// disjoint fields of `self`, so this compiles where two calls to
    /// `executor_mut()`/`get_portal_mut()` chained through separate method
    /// calls would not. `Execute` (spec.md §4.5) needs both at once: the
    /// executor to run the statement, the portal to stash unsent rows.
    pub fn executor_and_portal_mut(&mut self, name: &str) -> Option<(&mut dyn BackendExecutor, &mut Portal)> {
        let executor = self.executor.as_deref_mut()?;
        let portal = self.portals.get_mut(name)?;
        Some((executor, portal))
    }

    pub fn close_portal(&mut self, name: &str) {
        self.portals.remove(name);
    }

    /// Every portal bound to `statement_name` is also torn down, since a
    /// portal is never readable after the statement it references is
    /// closed (spec.md §3's invariant) — `Close(statement)` cascades.
    pub fn close_statement_cascade(&mut self, statement_name: &str) {
        self.close_statement(statement_name);
        self.portals.retain(|_, portal| portal.statement.name != statement_name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_statement(name: &str) -> PreparedStatement {
        PreparedStatement {
            name: name.to_string(),
            original_sql: "SELECT 1".to_string(),
            translated_sql: "SELECT 1".to_string(),
            param_oids: Vec::new(),
            columns: Vec::new(),
        }
    }

    #[test]
    fn unnamed_statement_is_replaced_without_notice() {
        let mut session = Session::new(CancelToken { backend_pid: 1, secret_key: 2 });
        session.add_statement(dummy_statement("")).unwrap();
        session.add_statement(PreparedStatement { original_sql: "SELECT 2".to_string(), ..dummy_statement("") }).unwrap();
        assert_eq!(session.get_statement("").unwrap().original_sql, "SELECT 2");
    }

    #[test]
    fn named_statement_collision_is_rejected() {
        let mut session = Session::new(CancelToken { backend_pid: 1, secret_key: 2 });
        session.add_statement(dummy_statement("s1")).unwrap();
        assert!(session.add_statement(dummy_statement("s1")).is_err());
    }

    #[test]
    fn portal_outlives_statement_replacement_via_arc() {
        let mut session = Session::new(CancelToken { backend_pid: 1, secret_key: 2 });
        session.add_statement(dummy_statement("s1")).unwrap();
        let stmt = session.get_statement("s1").unwrap().clone();
        session.add_portal(Portal::new("p1".to_string(), stmt, Vec::new(), Vec::new()));
        session.close_statement("s1");
        assert!(session.get_portal("p1").unwrap().statement.original_sql.contains("SELECT 1"));
    }

    #[test]
    fn idle_session_without_executor_reports_idle() {
        let session = Session::new(CancelToken { backend_pid: 1, secret_key: 2 });
        assert_eq!(session.transaction_status(), TransactionStatus::Idle);
    }
}
