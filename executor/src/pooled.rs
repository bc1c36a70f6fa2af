//! The pooled out-of-process executor variant (spec.md §4.3): a bounded
//! pool of sessions to a separate IRIS instance, reached over the network
//! (or at least a separate process) rather than embedded.
//!
//! The pool itself is hand-rolled rather than built on a generic pooling
//! crate (`deadpool`/`bb8`): the teacher's codebase never reaches for one,
//! and spec.md's semantics (base + overflow sizing, discard-on-reconnect,
//! bounded exponential backoff) are specific enough that matching them
//! exactly is simpler to write directly than to configure through a
//! generic pool's extension points.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use common::config::PoolConfig;
use pgrepr::{Format, Value};
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info, warn};

use crate::{
    literal, BackendExecutor, BatchPath, CancelSignal, CancelWaiter, ColumnMeta, ExecError,
    ExecResult, ExecuteResult, TransactionStatus,
};

/// The boundary a real pooled IRIS client implements: one logical
/// connection to an out-of-process IRIS instance. `reconnect` is called
/// after a [`ExecError::ConnectionLost`] to get a fresh connection before
/// the slot is returned to the pool, or the slot is dropped if
/// reconnection also fails.
#[async_trait]
pub trait PooledIrisConn: Send {
    async fn exec(&mut self, sql: &str, params: &[Value]) -> ExecResult<RawResult>;
    async fn begin(&mut self) -> ExecResult<()>;
    async fn commit(&mut self) -> ExecResult<()>;
    async fn rollback(&mut self) -> ExecResult<()>;
    async fn savepoint(&mut self, name: &str) -> ExecResult<()>;
    async fn rollback_to(&mut self, name: &str) -> ExecResult<()>;
    fn in_transaction(&self) -> bool;
    fn is_healthy(&self) -> bool;
}

pub struct RawResult {
    pub columns: Vec<ColumnMeta>,
    pub rows: Vec<Vec<Value>>,
    pub rows_affected: u64,
    pub tag: String,
}

/// A factory for fresh connections, called on initial pool fill and on
/// reconnection after a lost connection (spec.md §4.3: "discards any
/// sessions that were connected to the dead IRIS instance").
#[async_trait]
pub trait ConnFactory<C: PooledIrisConn>: Send + Sync {
    async fn connect(&self) -> ExecResult<C>;
}

struct Slot<C> {
    conn: C,
    created_at: Instant,
}

/// The pool's shared state: base-sized connections plus an overflow
/// allowance, gated by a `Semaphore` so acquisition blocks (with a
/// timeout) rather than spinning once the pool is exhausted.
struct PoolInner<C> {
    idle: Mutex<VecDeque<Slot<C>>>,
    semaphore: Semaphore,
    config: PoolConfig,
}

pub struct Pool<C, F> {
    inner: Arc<PoolInner<C>>,
    factory: Arc<F>,
}

impl<C, F> Clone for Pool<C, F> {
    fn clone(&self) -> Self {
        Pool { inner: self.inner.clone(), factory: self.factory.clone() }
    }
}

impl<C: PooledIrisConn, F: ConnFactory<C> + 'static> Pool<C, F> {
    pub fn new(config: PoolConfig, factory: F) -> Self {
        let total = (config.base_size + config.overflow_size) as usize;
        Pool {
            inner: Arc::new(PoolInner {
                idle: Mutex::new(VecDeque::new()),
                semaphore: Semaphore::new(total),
                config,
            }),
            factory: Arc::new(factory),
        }
    }

    /// Acquires a leased connection, waiting up to `acquire_timeout`
    /// before failing with [`ExecError::PoolExhausted`] (spec.md §4.3).
    pub async fn acquire(&self) -> ExecResult<Lease<C, F>> {
        tokio::time::timeout(self.inner.config.acquire_timeout, self.inner.semaphore.acquire())
            .await
            .map_err(|_| ExecError::PoolExhausted("timed out acquiring a pool connection".to_string()))?
            .expect("semaphore never closed")
            .forget();

        let mut idle = self.inner.idle.lock().await;
        let reused = loop {
            let Some(slot) = idle.pop_front() else { break None };
            if slot.created_at.elapsed() > self.inner.config.recycle_age {
                debug!("discarding connection past its recycle age");
                continue;
            }
            if !slot.conn.is_healthy() {
                debug!("discarding unhealthy connection before reuse");
                continue;
            }
            break Some(slot);
        };
        drop(idle);

        let slot = match reused {
            Some(slot) => slot,
            None => {
                let conn = connect_with_backoff(&*self.factory).await?;
                Slot { conn, created_at: Instant::now() }
            }
        };

        Ok(Lease { pool: self.clone(), slot: Some(slot) })
    }

    async fn release(&self, slot: Slot<C>) {
        if slot.conn.is_healthy() && slot.created_at.elapsed() <= self.inner.config.recycle_age {
            self.inner.idle.lock().await.push_back(slot);
        } else {
            debug!("dropping connection instead of returning it to the pool");
        }
        self.inner.semaphore.add_permits(1);
    }

    async fn discard(&self) {
        // The connection is poisoned (e.g. `ConnectionLost`); return the
        // permit without returning the slot itself.
        self.inner.semaphore.add_permits(1);
    }
}

/// Bounded exponential-backoff reconnection (spec.md §4.3: "N attempts,
/// doubling delay, capped").
async fn connect_with_backoff<C: PooledIrisConn, F: ConnFactory<C>>(factory: &F) -> ExecResult<C> {
    const MAX_ATTEMPTS: u32 = 5;
    const INITIAL_DELAY: Duration = Duration::from_millis(100);
    const MAX_DELAY: Duration = Duration::from_secs(10);

    let mut delay = INITIAL_DELAY;
    let mut last_err = None;
    for attempt in 1..=MAX_ATTEMPTS {
        match factory.connect().await {
            Ok(conn) => return Ok(conn),
            Err(e) => {
                warn!(attempt, "failed to connect to IRIS, retrying with backoff");
                last_err = Some(e);
                if attempt < MAX_ATTEMPTS {
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(MAX_DELAY);
                }
            }
        }
    }
    Err(last_err.unwrap_or_else(|| ExecError::ConnectionLost("exhausted reconnection attempts".to_string())))
}

/// A leased connection. Every exit path — normal return, early `?`, panic
/// unwind — releases the slot back to the pool via `Drop`, matching
/// spec.md §7's "hard invariant" that executor handles are never leaked.
pub struct Lease<C: PooledIrisConn, F: ConnFactory<C> + 'static> {
    pool: Pool<C, F>,
    slot: Option<Slot<C>>,
}

impl<C: PooledIrisConn, F: ConnFactory<C> + 'static> Drop for Lease<C, F> {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            let pool = self.pool.clone();
            tokio::spawn(async move { pool.release(slot).await });
        }
    }
}

impl<C: PooledIrisConn, F: ConnFactory<C> + 'static> Lease<C, F> {
    fn conn_mut(&mut self) -> &mut C {
        &mut self.slot.as_mut().expect("lease used after poison").conn
    }

    /// Drops the slot without returning it to the pool, releasing only
    /// the semaphore permit (used after `ConnectionLost`).
    async fn poison(&mut self) {
        if self.slot.take().is_some() {
            self.pool.discard().await;
        }
    }
}

pub struct PooledExecutor<C: PooledIrisConn, F: ConnFactory<C> + 'static> {
    lease: Lease<C, F>,
    waiter: CancelWaiter,
    _signal: CancelSignal,
}

impl<C: PooledIrisConn, F: ConnFactory<C> + 'static> PooledExecutor<C, F> {
    pub fn new(lease: Lease<C, F>) -> Self {
        let (signal, waiter) = CancelSignal::new();
        PooledExecutor { lease, waiter, _signal: signal }
    }
}

#[async_trait]
impl<C: PooledIrisConn, F: ConnFactory<C> + 'static> BackendExecutor for PooledExecutor<C, F> {
    async fn execute(
        &mut self,
        sql: &str,
        params: &[Value],
        _result_formats: &[Format],
    ) -> ExecResult<ExecuteResult> {
        let call = self.lease.conn_mut().exec(sql, params);
        let raw = tokio::select! {
            result = call => result,
            _ = self.waiter.cancelled() => {
                self.waiter.reset();
                return Err(ExecError::Cancelled);
            }
        };
        match raw {
            Ok(raw) => Ok(ExecuteResult { columns: raw.columns, rows: raw.rows, rows_affected: raw.rows_affected, tag: raw.tag }),
            Err(ExecError::ConnectionLost(msg)) => {
                self.lease.poison().await;
                Err(ExecError::ConnectionLost(msg))
            }
            Err(e) => Err(e),
        }
    }

    async fn execute_many(&mut self, sql: &str, params_list: &[Vec<Value>]) -> ExecResult<(u64, BatchPath)> {
        let needs_literal = params_list.iter().flatten().any(|v| matches!(v, Value::Date(_) | Value::Vector(_)));
        if !needs_literal {
            let mut affected = 0u64;
            for params in params_list {
                let result = self.lease.conn_mut().exec(sql, params).await;
                match result {
                    Ok(r) => affected += r.rows_affected,
                    Err(ExecError::ConnectionLost(msg)) => {
                        self.lease.poison().await;
                        return Err(ExecError::ConnectionLost(msg));
                    }
                    Err(e) => return Err(e),
                }
            }
            return Ok((affected, BatchPath::TrueBatch));
        }

        warn!(rows = params_list.len(), "execute_many degrading to per-row literal substitution (pooled variant)");
        let mut affected = 0u64;
        for params in params_list {
            let literal_sql = literal::substitute(sql, params);
            let result = self.lease.conn_mut().exec(&literal_sql, &[]).await?;
            affected += result.rows_affected;
        }
        Ok((affected, BatchPath::DegradedToLiteralLoop))
    }

    async fn begin(&mut self) -> ExecResult<()> {
        self.lease.conn_mut().begin().await
    }

    async fn commit(&mut self) -> ExecResult<()> {
        self.lease.conn_mut().commit().await
    }

    async fn rollback(&mut self) -> ExecResult<()> {
        self.lease.conn_mut().rollback().await
    }

    async fn savepoint(&mut self, name: &str) -> ExecResult<()> {
        self.lease.conn_mut().savepoint(name).await
    }

    async fn rollback_to(&mut self, name: &str) -> ExecResult<()> {
        self.lease.conn_mut().rollback_to(name).await
    }

    fn transaction_status(&self) -> TransactionStatus {
        match self.lease.slot.as_ref() {
            Some(slot) if slot.conn.in_transaction() => TransactionStatus::InTransaction,
            Some(_) => TransactionStatus::Idle,
            None => TransactionStatus::Failed,
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
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingConn {
        healthy: bool,
        in_txn: bool,
    }

    #[async_trait]
    impl PooledIrisConn for CountingConn {
        async fn exec(&mut self, _sql: &str, _params: &[Value]) -> ExecResult<RawResult> {
            Ok(RawResult { columns: Vec::new(), rows: Vec::new(), rows_affected: 1, tag: "OK".to_string() })
        }
        async fn begin(&mut self) -> ExecResult<()> {
            self.in_txn = true;
            Ok(())
        }
        async fn commit(&mut self) -> ExecResult<()> {
            self.in_txn = false;
            Ok(())
        }
        async fn rollback(&mut self) -> ExecResult<()> {
            self.in_txn = false;
            Ok(())
        }
        async fn savepoint(&mut self, _name: &str) -> ExecResult<()> {
            Ok(())
        }
        async fn rollback_to(&mut self, _name: &str) -> ExecResult<()> {
            Ok(())
        }
        fn in_transaction(&self) -> bool {
            self.in_txn
        }
        fn is_healthy(&self) -> bool {
            self.healthy
        }
    }

    struct CountingFactory(AtomicU32);

    #[async_trait]
    impl ConnFactory<CountingConn> for CountingFactory {
        async fn connect(&self) -> ExecResult<CountingConn> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(CountingConn { healthy: true, in_txn: false })
        }
    }

    #[tokio::test]
    async fn acquire_and_release_reuses_connections() {
        let pool = Pool::new(
            PoolConfig { base_size: 2, overflow_size: 0, acquire_timeout: Duration::from_secs(1), recycle_age: Duration::from_secs(60) },
            CountingFactory(AtomicU32::new(0)),
        );
        {
            let _lease = pool.acquire().await.unwrap();
        }
        // Give the background release task a chance to run.
        tokio::time::sleep(Duration::from_millis(10)).await;
        let _lease2 = pool.acquire().await.unwrap();
        assert_eq!(pool.factory.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn acquire_times_out_when_pool_exhausted() {
        let pool = Pool::new(
            PoolConfig { base_size: 1, overflow_size: 0, acquire_timeout: Duration::from_millis(20), recycle_age: Duration::from_secs(60) },
            CountingFactory(AtomicU32::new(0)),
        );
        let _lease = pool.acquire().await.unwrap();
        let second = pool.acquire().await;
        assert!(matches!(second, Err(ExecError::PoolExhausted(_))));
    }
}
