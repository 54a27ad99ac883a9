//! Number Pool Allocator
//!
//! Transactionally scoped allocators for globally unique integers: DRBD minor
//! numbers, DRBD TCP ports and layer resource ids. Allocation and release
//! take effect immediately, so two allocations of one transaction never
//! collide; a journal of changes lets the transaction undo them on rollback.

use crate::domain::names::{LayerId, MinorNumber, TcpPortNumber};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::trace;

// =============================================================================
// Configuration
// =============================================================================

/// Inclusive range of one pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumberPoolConfig {
    pub min: u32,
    pub max: u32,
}

/// Ranges of every pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NumberPoolsConfig {
    pub minor: NumberPoolConfig,
    pub tcp_port: NumberPoolConfig,
    pub layer_id: NumberPoolConfig,
}

impl Default for NumberPoolsConfig {
    fn default() -> Self {
        Self {
            minor: NumberPoolConfig { min: 1000, max: 49999 },
            tcp_port: NumberPoolConfig { min: 7000, max: 7999 },
            layer_id: NumberPoolConfig {
                min: LayerId::MIN,
                max: LayerId::MAX,
            },
        }
    }
}

impl NumberPoolsConfig {
    /// Check every range against the bounds of its value type
    pub fn validate(&self) -> Result<()> {
        let checks = [
            (PoolKind::Minor, self.minor, MinorNumber::MIN, MinorNumber::MAX),
            (PoolKind::TcpPort, self.tcp_port, TcpPortNumber::MIN, TcpPortNumber::MAX),
            (PoolKind::LayerId, self.layer_id, LayerId::MIN, LayerId::MAX),
        ];
        for (kind, range, lo, hi) in checks {
            if range.min > range.max || range.min < lo || range.max > hi {
                return Err(Error::Configuration(format!(
                    "{} pool range [{}, {}] is not within [{}, {}]",
                    kind.name(),
                    range.min,
                    range.max,
                    lo,
                    hi
                )));
            }
        }
        Ok(())
    }
}

// =============================================================================
// Number Pool
// =============================================================================

/// What a pool hands out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolKind {
    Minor,
    TcpPort,
    LayerId,
}

impl PoolKind {
    pub fn name(self) -> &'static str {
        match self {
            PoolKind::Minor => "minor number",
            PoolKind::TcpPort => "TCP port",
            PoolKind::LayerId => "layer resource id",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Change {
    Allocated { value: u32, cursor: u32 },
    Released { value: u32 },
}

/// Set of assigned integers within `[min, max]` plus a round-robin cursor
#[derive(Debug, Clone)]
pub struct NumberPool {
    kind: PoolKind,
    min: u32,
    max: u32,
    used: BTreeSet<u32>,
    cursor: u32,
    journal: Vec<Change>,
}

impl NumberPool {
    pub fn new(kind: PoolKind, config: NumberPoolConfig) -> Self {
        Self {
            kind,
            min: config.min,
            max: config.max,
            used: BTreeSet::new(),
            cursor: config.min,
            journal: Vec::new(),
        }
    }

    pub fn kind(&self) -> PoolKind {
        self.kind
    }

    pub fn is_allocated(&self, value: u32) -> bool {
        self.used.contains(&value)
    }

    pub fn allocated(&self) -> impl Iterator<Item = u32> + '_ {
        self.used.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.used.len()
    }

    pub fn is_empty(&self) -> bool {
        self.used.is_empty()
    }

    /// Whether uncommitted changes exist
    pub fn is_dirty(&self) -> bool {
        !self.journal.is_empty()
    }

    fn first_free_in(&self, lo: u32, hi: u32) -> Option<u32> {
        if lo > hi {
            return None;
        }
        let mut candidate = lo;
        for &used in self.used.range(lo..=hi) {
            if used > candidate {
                return Some(candidate);
            }
            candidate = used + 1;
        }
        (candidate <= hi).then_some(candidate)
    }

    /// Hand out the next free value at or after the cursor, wrapping around
    pub fn allocate(&mut self) -> Result<u32> {
        let wrapped = if self.cursor > self.min {
            self.first_free_in(self.min, self.cursor - 1)
        } else {
            None
        };
        let value = self
            .first_free_in(self.cursor, self.max)
            .or(wrapped)
            .ok_or(Error::PoolExhausted {
                pool: self.kind.name(),
                min: self.min,
                max: self.max,
            })?;

        self.used.insert(value);
        self.journal.push(Change::Allocated {
            value,
            cursor: self.cursor,
        });
        self.cursor = if value >= self.max { self.min } else { value + 1 };
        trace!("Allocated {} {}", self.kind.name(), value);
        Ok(value)
    }

    /// Claim a specific value, e.g. one restored from the database
    pub fn allocate_explicit(&mut self, value: u32) -> Result<()> {
        if value < self.min || value > self.max {
            return Err(Error::ValueOutOfRange {
                kind: self.kind.name(),
                value: i64::from(value),
                min: i64::from(self.min),
                max: i64::from(self.max),
            });
        }
        if !self.used.insert(value) {
            return Err(Error::ValueInUse {
                pool: self.kind.name(),
                value,
            });
        }
        self.journal.push(Change::Allocated {
            value,
            cursor: self.cursor,
        });
        trace!("Allocated {} {} explicitly", self.kind.name(), value);
        Ok(())
    }

    /// Returns false if the value was not allocated
    pub fn release(&mut self, value: u32) -> bool {
        let released = self.used.remove(&value);
        if released {
            self.journal.push(Change::Released { value });
            trace!("Released {} {}", self.kind.name(), value);
        }
        released
    }

    pub fn commit(&mut self) {
        self.journal.clear();
    }

    pub fn rollback(&mut self) {
        while let Some(change) = self.journal.pop() {
            match change {
                Change::Allocated { value, cursor } => {
                    self.used.remove(&value);
                    self.cursor = cursor;
                }
                Change::Released { value } => {
                    self.used.insert(value);
                }
            }
        }
    }
}

// =============================================================================
// Pool Set
// =============================================================================

/// Every pool of one controller
#[derive(Debug, Clone)]
pub struct NumberPools {
    pub minor: NumberPool,
    pub tcp_port: NumberPool,
    pub layer_id: NumberPool,
}

impl NumberPools {
    pub fn new(config: &NumberPoolsConfig) -> Self {
        Self {
            minor: NumberPool::new(PoolKind::Minor, config.minor),
            tcp_port: NumberPool::new(PoolKind::TcpPort, config.tcp_port),
            layer_id: NumberPool::new(PoolKind::LayerId, config.layer_id),
        }
    }

    pub fn allocate_minor(&mut self) -> Result<MinorNumber> {
        MinorNumber::new(i64::from(self.minor.allocate()?))
    }

    pub fn allocate_tcp_port(&mut self) -> Result<TcpPortNumber> {
        TcpPortNumber::new(i64::from(self.tcp_port.allocate()?))
    }

    pub fn allocate_layer_id(&mut self) -> Result<LayerId> {
        LayerId::new(i64::from(self.layer_id.allocate()?))
    }

    pub fn commit(&mut self) {
        self.minor.commit();
        self.tcp_port.commit();
        self.layer_id.commit();
    }

    pub fn rollback(&mut self) {
        self.minor.rollback();
        self.tcp_port.rollback();
        self.layer_id.rollback();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn pool(min: u32, max: u32) -> NumberPool {
        NumberPool::new(PoolKind::Minor, NumberPoolConfig { min, max })
    }

    #[test]
    fn test_allocate_round_robin() {
        let mut p = pool(10, 12);
        assert_eq!(p.allocate().unwrap(), 10);
        assert_eq!(p.allocate().unwrap(), 11);
        assert!(p.release(10));
        // The cursor moves on before reusing released values
        assert_eq!(p.allocate().unwrap(), 12);
        assert_eq!(p.allocate().unwrap(), 10);
        assert_matches!(p.allocate(), Err(Error::PoolExhausted { min: 10, max: 12, .. }));
    }

    #[test]
    fn test_explicit_allocation() {
        let mut p = pool(1000, 1010);
        p.allocate_explicit(1005).unwrap();
        assert_matches!(p.allocate_explicit(1005), Err(Error::ValueInUse { value: 1005, .. }));
        assert_matches!(p.allocate_explicit(999), Err(Error::ValueOutOfRange { .. }));
        assert!(p.is_allocated(1005));
        assert_eq!(p.allocate().unwrap(), 1000);
    }

    #[test]
    fn test_skips_used_values() {
        let mut p = pool(0, 5);
        for v in [0, 1, 3] {
            p.allocate_explicit(v).unwrap();
        }
        assert_eq!(p.allocate().unwrap(), 2);
        assert_eq!(p.allocate().unwrap(), 4);
        assert_eq!(p.allocate().unwrap(), 5);
        assert!(p.allocate().is_err());
    }

    #[test]
    fn test_rollback_restores_state() {
        let mut p = pool(1, 100);
        p.allocate_explicit(7).unwrap();
        p.commit();

        let a = p.allocate().unwrap();
        assert!(p.release(7));
        assert!(p.is_dirty());
        p.rollback();

        assert!(!p.is_allocated(a));
        assert!(p.is_allocated(7));
        assert_eq!(p.allocate().unwrap(), a);
    }

    #[test]
    fn test_pools_config() {
        assert!(NumberPoolsConfig::default().validate().is_ok());

        let mut config = NumberPoolsConfig::default();
        config.tcp_port = NumberPoolConfig { min: 0, max: 10 };
        assert_matches!(config.validate(), Err(Error::Configuration(_)));

        let mut pools = NumberPools::new(&NumberPoolsConfig::default());
        assert_eq!(pools.allocate_minor().unwrap().value(), 1000);
        assert_eq!(pools.allocate_tcp_port().unwrap().value(), 7000);
        assert_eq!(pools.allocate_layer_id().unwrap().value(), 0);
        pools.rollback();
        assert!(pools.minor.is_empty());
    }
}
