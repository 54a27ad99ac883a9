//! Storage Controller Database
//!
//! Persistence and object-graph core of a layered block storage controller.
//! The same object graph of nodes, storage pools, resource and volume
//! definitions, resources, volumes and their device-layer trees can be kept
//! in a SQL database, an etcd key-value store or Kubernetes custom resources.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                            Controller                                │
//! │   create / delete / update operations, access checks, snapshots      │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────────┐   ┌──────────────────┐   ┌──────────────────┐  │
//! │  │   Transaction    │──►│   Object Cache   │   │   Number Pools   │  │
//! │  │  (write buffer)  │   │ (identity maps)  │   │ minor/port/layer │  │
//! │  └────────┬─────────┘   └────────▲─────────┘   └──────────────────┘  │
//! │           │                      │ load                              │
//! │  ┌────────▼─────────┐   ┌────────┴─────────┐                         │
//! │  │ Column Registries│   │ Database Loader  │                         │
//! │  │ (entity drivers) │   │ (stack assembly) │                         │
//! │  └────────┬─────────┘   └────────▲─────────┘                         │
//! ├───────────┼──────────────────────┼───────────────────────────────────┤
//! │           ▼        Engines       │                                   │
//! │   ┌────────────┐   ┌────────────┐   ┌────────────────────────────┐   │
//! │   │    SQL     │   │  etcd KV   │   │  Kubernetes custom objects │   │
//! │   └────────────┘   └────────────┘   └────────────────────────────┘   │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`controller`]: explicit controller state and its operations
//! - [`db`]: tables, column registries, engines and the loader
//! - [`cache`]: transactional identity maps
//! - [`domain`]: names, entities, layer objects and access control
//! - [`numberpool`]: minor number, TCP port and layer id pools
//! - [`transaction`]: the write buffer shared by one operation
//! - [`error`]: error types and handling

pub mod cache;
pub mod controller;
pub mod db;
pub mod domain;
pub mod error;
pub mod metrics;
pub mod numberpool;
pub mod transaction;

// Re-export commonly used types
pub use cache::{GraphSnapshot, ObjectCache};

pub use controller::{Controller, ControllerConfig, DrbdDefaults};

pub use db::{DatabaseLoader, DbEngine, EngineConfig, EngineFactory, SharedEngine, WriteOp};

pub use domain::{
    AccessContext, AccessType, DeviceLayerKind, DeviceProviderKind, NodeType, ObjectProtection,
    ResourceKey, RscDfnKey,
};

pub use error::{Error, ErrorKind, Result};

pub use metrics::DbMetrics;

pub use numberpool::{NumberPools, NumberPoolsConfig};

pub use transaction::Transaction;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
