//! Ambient Transaction
//!
//! Every mutating controller operation runs inside one [`Transaction`]. The
//! transaction holds the exclusive write guard of the object cache for its
//! whole lifetime, so there is exactly one writer at a time and readers only
//! ever observe committed state.
//!
//! Cache mutations take effect immediately and are journaled by the cache's
//! transactional maps and number pools. Backend writes are buffered as
//! [`WriteOp`]s and handed to the engine in one batch on commit. If the
//! engine rejects the batch, or the transaction is dropped without commit,
//! the cache journal is rolled back.

use crate::cache::ObjectCache;
use crate::db::engine::{SharedEngine, WriteOp};
use crate::domain::names::{LayerId, MinorNumber, TcpPortNumber};
use crate::error::Result;
use crate::metrics::DbMetrics;
use crate::numberpool::PoolKind;
use tokio::sync::OwnedRwLockWriteGuard;
use tracing::{debug, warn};

/// One unit of work against the object graph and the backend
pub struct Transaction {
    cache: OwnedRwLockWriteGuard<ObjectCache>,
    pending: Vec<WriteOp>,
    engine: SharedEngine,
    metrics: DbMetrics,
    finished: bool,
}

impl Transaction {
    pub(crate) fn new(cache: OwnedRwLockWriteGuard<ObjectCache>, engine: SharedEngine, metrics: DbMetrics) -> Self {
        Self {
            cache,
            pending: Vec::new(),
            engine,
            metrics,
            finished: false,
        }
    }

    pub fn cache(&self) -> &ObjectCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut ObjectCache {
        &mut self.cache
    }

    /// Buffer one backend write
    pub fn push(&mut self, op: WriteOp) {
        self.pending.push(op);
    }

    pub fn extend(&mut self, ops: impl IntoIterator<Item = WriteOp>) {
        self.pending.extend(ops);
    }

    /// Writes buffered so far
    pub fn pending(&self) -> &[WriteOp] {
        &self.pending
    }

    // =========================================================================
    // Number Pools
    // =========================================================================

    pub fn allocate_minor(&mut self) -> Result<MinorNumber> {
        let minor = self.cache.pools.allocate_minor()?;
        self.metrics.record_allocation(PoolKind::Minor.name());
        Ok(minor)
    }

    /// Claim a caller-chosen minor number
    pub fn allocate_minor_explicit(&mut self, minor: MinorNumber) -> Result<MinorNumber> {
        self.cache.pools.minor.allocate_explicit(minor.value())?;
        self.metrics.record_allocation(PoolKind::Minor.name());
        Ok(minor)
    }

    pub fn allocate_tcp_port(&mut self) -> Result<TcpPortNumber> {
        let port = self.cache.pools.allocate_tcp_port()?;
        self.metrics.record_allocation(PoolKind::TcpPort.name());
        Ok(port)
    }

    pub fn allocate_layer_id(&mut self) -> Result<LayerId> {
        let id = self.cache.pools.allocate_layer_id()?;
        self.metrics.record_allocation(PoolKind::LayerId.name());
        Ok(id)
    }

    // =========================================================================
    // Completion
    // =========================================================================

    /// Apply the buffered writes atomically, then make the cache changes
    /// permanent. On failure the cache is rolled back and the engine error
    /// is returned. Dropping the returned future before the engine answers
    /// rolls the cache back like any other unfinished transaction.
    pub async fn commit(mut self) -> Result<()> {
        let writes = std::mem::take(&mut self.pending);

        if !writes.is_empty() {
            let result = self.engine.commit(&writes).await;
            self.finished = true;
            if let Err(e) = result {
                warn!(
                    "Rolling back transaction with {} writes after {} engine failure: {}",
                    writes.len(),
                    self.engine.name(),
                    e
                );
                self.cache.rollback();
                self.metrics.transactions_rolled_back.inc();
                return Err(e);
            }
        }

        self.finished = true;
        self.cache.commit();
        self.metrics.transactions_committed.inc();
        debug!("Committed transaction with {} writes", writes.len());
        Ok(())
    }

    /// Discard the buffered writes and undo every cache change
    pub fn rollback(mut self) {
        self.abort();
    }

    fn abort(&mut self) {
        self.finished = true;
        if !self.pending.is_empty() || self.cache.is_dirty() {
            warn!("Rolling back transaction with {} buffered writes", self.pending.len());
            self.metrics.transactions_rolled_back.inc();
        }
        self.pending.clear();
        self.cache.rollback();
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.finished {
            self.abort();
        }
    }
}
