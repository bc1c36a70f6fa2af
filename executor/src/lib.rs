//! The backend executor abstraction (spec.md §4.3): a single
//! [`BackendExecutor`] trait behind which two real implementations
//! ([`in_process::InProcessExecutor`], [`pooled::PooledExecutor`]) and one
//! test double ([`fake::FakeExecutor`]) live. Selecting between the two
//! real variants is a startup-time [`common::config::ExecutorVariant`]
//! decision, never a runtime one — see `gateway`'s construction code.
//!
//! IRIS itself is named in spec.md §1 as an external collaborator this
//! specification does not redesign; the two real variants are generic over
//! a thin connection trait (`in_process::EmbeddedIris`,
//! `pooled::PooledIrisConn`) that a real IRIS driver would implement. That
//! driver is not part of this workspace.

pub mod fake;
pub mod in_process;
pub mod literal;
pub mod pooled;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use common::error::{ErrorKind, GatewayError};
use pgrepr::{Format, Type, Value};
use tokio::sync::Notify;

/// Transaction status as reported in `ReadyForQuery` (spec.md §4.5). The
/// session does not infer this by parsing SQL — it asks the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    Idle,
    InTransaction,
    Failed,
}

impl TransactionStatus {
    /// The single byte `ReadyForQuery` sends: `I`, `T`, or `E`.
    pub fn as_byte(self) -> u8 {
        match self {
            TransactionStatus::Idle => b'I',
            TransactionStatus::InTransaction => b'T',
            TransactionStatus::Failed => b'E',
        }
    }
}

/// One output column's metadata, as `RowDescription` needs it (spec.md
/// §3's "Column descriptor").
#[derive(Debug, Clone)]
pub struct ColumnMeta {
    pub name: String,
    pub table_oid: u32,
    pub attr_number: i16,
    pub ty: Type,
    /// Overrides `ty`'s default typmod (e.g. a `varchar(n)` length or
    /// `numeric(p,s)` constraint the executor reported).
    pub type_modifier: i32,
}

impl ColumnMeta {
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        ColumnMeta { name: name.into(), table_oid: 0, attr_number: 0, ty, type_modifier: -1 }
    }
}

/// The result of one `execute` call: column metadata (empty for statements
/// with no result set), the decoded rows, the affected-row count, and the
/// `CommandComplete` tag text (e.g. `"SELECT 3"`, `"INSERT 0 1"`).
#[derive(Debug, Clone, Default)]
pub struct ExecuteResult {
    pub columns: Vec<ColumnMeta>,
    pub rows: Vec<Vec<Value>>,
    pub rows_affected: u64,
    pub tag: String,
}

impl ExecuteResult {
    pub fn empty(tag: impl Into<String>) -> Self {
        ExecuteResult { columns: Vec::new(), rows: Vec::new(), rows_affected: 0, tag: tag.into() }
    }
}

/// Whether a batch-execution path had to degrade from a true batch into a
/// per-row literal-substitution loop (spec.md §4.3's "key algorithm",
/// §9's "explicit batch-degradation code path with a visible metric").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchPath {
    TrueBatch,
    DegradedToLiteralLoop,
}

/// Converts an [`ExecError`] into the client-facing [`GatewayError`]
/// (spec.md §7's taxonomy).
#[derive(Debug, Clone)]
pub enum ExecError {
    Syntax { message: String, position: Option<u32> },
    ConstraintViolation { message: String, kind: ConstraintKind },
    SerializationFailure(String),
    ConnectionLost(String),
    Cancelled,
    ParameterBind(String),
    PoolExhausted(String),
    Internal(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintKind {
    Unique,
    ForeignKey,
    Other,
}

impl From<ExecError> for GatewayError {
    fn from(e: ExecError) -> Self {
        match e {
            ExecError::Syntax { message, position } => {
                let mut err = GatewayError::syntax(message);
                if let Some(p) = position {
                    err = err.with_position(p);
                }
                err
            }
            ExecError::ConstraintViolation { message, kind } => {
                let kind = match kind {
                    ConstraintKind::Unique => ErrorKind::UniqueViolation,
                    ConstraintKind::ForeignKey => ErrorKind::ForeignKeyViolation,
                    ConstraintKind::Other => ErrorKind::Internal,
                };
                GatewayError::new(kind, message)
            }
            ExecError::SerializationFailure(message) => {
                GatewayError::new(ErrorKind::SerializationFailure, message)
            }
            ExecError::ConnectionLost(message) => GatewayError::connection_lost(message),
            ExecError::Cancelled => GatewayError::cancelled(),
            ExecError::ParameterBind(message) => GatewayError::parameter_bind(message),
            ExecError::PoolExhausted(message) => GatewayError::pool_exhausted(message),
            ExecError::Internal(message) => GatewayError::internal(message),
        }
    }
}

pub type ExecResult<T> = std::result::Result<T, ExecError>;

/// Capability set every backend-executor implementation exposes (spec.md
/// §4.3). `cancel` is callable concurrently with an in-flight `execute`
/// from a different task (the Cancel Registry's job), so it takes `&self`,
/// not `&mut self`.
#[async_trait]
pub trait BackendExecutor: Send {
    async fn execute(
        &mut self,
        sql: &str,
        params: &[Value],
        result_formats: &[Format],
    ) -> ExecResult<ExecuteResult>;

    /// Executes the same SQL once per row of `params_list`, returning the
    /// total affected-row count and which code path was taken.
    async fn execute_many(&mut self, sql: &str, params_list: &[Vec<Value>]) -> ExecResult<(u64, BatchPath)>;

    async fn begin(&mut self) -> ExecResult<()>;
    async fn commit(&mut self) -> ExecResult<()>;
    async fn rollback(&mut self) -> ExecResult<()>;
    async fn savepoint(&mut self, name: &str) -> ExecResult<()>;
    async fn rollback_to(&mut self, name: &str) -> ExecResult<()>;

    fn transaction_status(&self) -> TransactionStatus;

    /// A cheap clone of this handle's cancellation waiter, checked at the
    /// executor's own suspension points. The matching [`CancelSignal`]
    /// half is what the Cancel Registry holds (spec.md §4.9).
    fn cancel_waiter(&self) -> CancelWaiter;

    /// A cheap clone of the signal half paired with [`cancel_waiter`](
    /// BackendExecutor::cancel_waiter), handed to the Cancel Registry at
    /// `BackendKeyData` time so a `CancelRequest` on a second connection
    /// reaches this executor's own suspension points (spec.md §4.9).
    fn cancel_signal(&self) -> CancelSignal;
}

/// A cancellation flag plus a `Notify` so a waiting `execute` wakes
/// immediately rather than polling (spec.md §5: cancellation is observed
/// "at its next suspension point").
#[derive(Clone)]
pub struct CancelSignal {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

#[derive(Clone)]
pub struct CancelWaiter {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancelSignal {
    pub fn new() -> (CancelSignal, CancelWaiter) {
        let flag = Arc::new(AtomicBool::new(false));
        let notify = Arc::new(Notify::new());
        (
            CancelSignal { flag: flag.clone(), notify: notify.clone() },
            CancelWaiter { flag, notify },
        )
    }

    /// Invoked by the Cancel Registry when a matching `CancelRequest`
    /// arrives (spec.md §4.9). Idempotent and safe to call after the
    /// statement this was meant for already completed.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }
}

impl CancelWaiter {
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Resolves once `cancel()` has been called. Callers `select!` this
    /// against the actual executor suspension point.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        self.notify.notified().await;
    }

    /// Resets this waiter so a handle can be reused for the next
    /// statement on the same connection (spec.md: cancellation targets
    /// "the session's currently executing statement", not the session
    /// forever).
    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}
