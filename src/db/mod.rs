//! Persistence Layer
//!
//! ```text
//!   table catalogue ──► column registries ──► entity drivers
//!                                               │      ▲
//!                                    WriteOp    ▼      │ RawRow
//!                               ┌──────────────────────────────┐
//!                               │      DbEngine (one of)       │
//!                               │   SQL  │  etcd KV  │  CRD    │
//!                               └──────────────────────────────┘
//! ```
//!
//! - [`table`]: table and column identifiers shared by every backend
//! - [`value`]: backend-neutral column values
//! - [`raw`]: typed reader over one loaded row
//! - [`columns`]: getter/setter registries per entity type
//! - [`engine`]: the backend contract and its three implementations
//! - [`drivers`]: one driver per table
//! - [`loader`]: the full load pass

pub mod columns;
pub mod drivers;
pub mod engine;
pub mod loader;
pub mod raw;
pub mod table;
pub mod value;

pub use columns::{ColumnDriver, ColumnRegistry};
pub use drivers::DbDrivers;
pub use engine::{DbEngine, EngineConfig, EngineFactory, SharedEngine, WriteOp};
pub use loader::DatabaseLoader;
pub use raw::RawRow;
pub use table::{Column, Table};
pub use value::{DbValue, RowValues};
