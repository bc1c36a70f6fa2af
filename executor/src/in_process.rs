//! The in-process executor variant (spec.md §4.3): calls IRIS's in-process
//! SQL API directly, in the same OS process as the gateway. IRIS's
//! embedded API is a real external dependency this workspace does not
//! vendor (spec.md §1 names IRIS itself as an external collaborator), so
//! this module is generic over [`EmbeddedIris`], the thin boundary a real
//! driver would implement.
//!
//! The defining limitation (spec.md §4.3, §9): some parameter types —
//! notably `DATE` and `vector` — cannot be bound through this API as
//! proper typed parameters and must instead be inlined as SQL literals.
//! `execute_many` therefore always takes the degraded per-row
//! literal-substitution path for statements touching those types; this is
//! documented as permanent, not a bug to fix.

use std::sync::Arc;

use async_trait::async_trait;
use pgrepr::{Format, Type, Value};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::{
    literal, BackendExecutor, CancelSignal, CancelWaiter, ColumnMeta, ExecError, ExecResult,
    ExecuteResult, BatchPath, TransactionStatus,
};

/// The boundary a real IRIS in-process SQL binding implements. Calls are
/// synchronous by nature (an embedded database has no network round
/// trip), which is why [`InProcessExecutor::execute`] wraps them in
/// `spawn_blocking` rather than awaiting them directly (spec.md §5: "IRIS
/// calls in this variant are synchronous").
pub trait EmbeddedIris: Send + 'static {
    /// Executes `sql`. Parameters that couldn't be bound natively have
    /// already been inlined as literals by the caller; `native_params`
    /// carries only the ones this call should bind directly.
    fn exec(&mut self, sql: &str, native_params: &[Value]) -> ExecResult<RawResult>;
    fn begin(&mut self) -> ExecResult<()>;
    fn commit(&mut self) -> ExecResult<()>;
    fn rollback(&mut self) -> ExecResult<()>;
    fn savepoint(&mut self, name: &str) -> ExecResult<()>;
    fn rollback_to(&mut self, name: &str) -> ExecResult<()>;
    fn in_transaction(&self) -> bool;
}

/// What an [`EmbeddedIris`] call returns: column metadata plus rows,
/// already typed. The real driver is responsible for mapping IRIS's own
/// metadata into this shape; `pgrepr`'s OID table is the target.
pub struct RawResult {
    pub columns: Vec<ColumnMeta>,
    pub rows: Vec<Vec<Value>>,
    pub rows_affected: u64,
    pub tag: String,
}

/// Types whose bind cannot be carried through [`EmbeddedIris::exec`] and
/// must be substituted as literals before the call (spec.md §4.3).
fn requires_literal_inlining(ty: Option<Type>) -> bool {
    matches!(ty, Some(Type::Date) | Some(Type::Vector))
}

/// Serializes access to the single embedded IRIS instance a process may
/// open (spec.md §5: "the executor's serialization requirements force an
/// internal mutex so that at most one query is active ... at a time").
/// Shared across every `InProcessExecutor` handle in the process.
pub struct EmbeddedLock<I>(Arc<Mutex<I>>);

impl<I: EmbeddedIris> EmbeddedLock<I> {
    pub fn new(iris: I) -> Self {
        EmbeddedLock(Arc::new(Mutex::new(iris)))
    }
}

impl<I> Clone for EmbeddedLock<I> {
    fn clone(&self) -> Self {
        EmbeddedLock(self.0.clone())
    }
}

pub struct InProcessExecutor<I: EmbeddedIris> {
    iris: EmbeddedLock<I>,
    txn_failed: bool,
    cancel: CancelSignal,
    waiter: CancelWaiter,
}

impl<I: EmbeddedIris> InProcessExecutor<I> {
    pub fn new(lock: EmbeddedLock<I>) -> Self {
        let (cancel, waiter) = CancelSignal::new();
        InProcessExecutor { iris: lock, txn_failed: false, cancel, waiter }
    }
}

#[async_trait]
impl<I: EmbeddedIris> BackendExecutor for InProcessExecutor<I> {
    async fn execute(
        &mut self,
        sql: &str,
        params: &[Value],
        _result_formats: &[Format],
    ) -> ExecResult<ExecuteResult> {
        if self.waiter.is_cancelled() {
            self.waiter.reset();
            return Err(ExecError::Cancelled);
        }

        let needs_literal = params.iter().any(|p| requires_literal_inlining(p.pg_type()));
        let (final_sql, native_params) = if needs_literal {
            (literal::substitute(sql, params), Vec::new())
        } else {
            (sql.to_string(), params.to_vec())
        };

        let guard = self.iris.0.clone().lock_owned().await;
        let raw = run_blocking(guard, move |iris| iris.exec(&final_sql, &native_params)).await;
        if raw.is_err() {
            self.txn_failed = true;
        }
        let raw = raw?;
        Ok(ExecuteResult { columns: raw.columns, rows: raw.rows, rows_affected: raw.rows_affected, tag: raw.tag })
    }

    async fn execute_many(&mut self, sql: &str, params_list: &[Vec<Value>]) -> ExecResult<(u64, BatchPath)> {
        warn!(rows = params_list.len(), "execute_many degrading to per-row literal substitution (in-process variant)");
        let mut affected = 0u64;
        for params in params_list {
            if self.waiter.is_cancelled() {
                self.waiter.reset();
                return Err(ExecError::Cancelled);
            }
            let literal_sql = literal::substitute(sql, params);
            let guard = self.iris.0.clone().lock_owned().await;
            let result = run_blocking(guard, move |iris| iris.exec(&literal_sql, &[])).await?;
            affected += result.rows_affected;
        }
        Ok((affected, BatchPath::DegradedToLiteralLoop))
    }

    async fn begin(&mut self) -> ExecResult<()> {
        let guard = self.iris.0.clone().lock_owned().await;
        run_blocking(guard, |iris| iris.begin()).await
    }

    async fn commit(&mut self) -> ExecResult<()> {
        let guard = self.iris.0.clone().lock_owned().await;
        let result = run_blocking(guard, |iris| iris.commit()).await;
        self.txn_failed = false;
        result
    }

    async fn rollback(&mut self) -> ExecResult<()> {
        let guard = self.iris.0.clone().lock_owned().await;
        let result = run_blocking(guard, |iris| iris.rollback()).await;
        self.txn_failed = false;
        result
    }

    async fn savepoint(&mut self, name: &str) -> ExecResult<()> {
        let name = name.to_string();
        let guard = self.iris.0.clone().lock_owned().await;
        run_blocking(guard, move |iris| iris.savepoint(&name)).await
    }

    async fn rollback_to(&mut self, name: &str) -> ExecResult<()> {
        let name = name.to_string();
        let guard = self.iris.0.clone().lock_owned().await;
        run_blocking(guard, move |iris| iris.rollback_to(&name)).await
    }

    fn transaction_status(&self) -> TransactionStatus {
        if self.txn_failed {
            TransactionStatus::Failed
        } else {
            TransactionStatus::Idle
        }
    }

    fn cancel_waiter(&self) -> CancelWaiter {
        self.waiter.clone()
    }

    fn cancel_signal(&self) -> CancelSignal {
        self.cancel.clone()
    }
}

/// Runs `f` against the locked embedded connection on a blocking-safe
/// worker thread, since `EmbeddedIris` calls are synchronous FFI into IRIS
/// and must not block the Tokio reactor (spec.md §5). Takes an
/// `OwnedMutexGuard` (from [`tokio::sync::Mutex::lock_owned`]) rather than
/// a borrowed one so the guard can move into `spawn_blocking`'s `'static`
/// closure; the lock stays held for the call's duration either way.
async fn run_blocking<I, T, F>(
    mut guard: tokio::sync::OwnedMutexGuard<I>,
    f: F,
) -> ExecResult<T>
where
    I: EmbeddedIris,
    T: Send + 'static,
    F: FnOnce(&mut I) -> ExecResult<T> + Send + 'static,
{
    debug!("executing against embedded IRIS instance");
    tokio::task::spawn_blocking(move || f(&mut guard))
        .await
        .unwrap_or_else(|e| Err(ExecError::Internal(format!("blocking IRIS call panicked: {e}"))))
}
