//! Identity / Object Cache
//!
//! Process-wide maps from natural composite keys to live entities. Every map
//! is a [`TransactionalMap`]: mutations made inside the ambient transaction
//! become permanent on commit and are undone on rollback.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        ObjectCache                           │
//! ├──────────────────────────────────────────────────────────────┤
//! │  nodes        NodeName             -> Node                   │
//! │  stor_pools   (node, pool)         -> StorPool               │
//! │  rsc_dfns     (rsc, snap)          -> ResourceDefinition     │
//! │  vlm_dfns     (rsc, snap, vlm)     -> VolumeDefinition       │
//! │  resources    (node, rsc, snap)    -> Resource               │
//! │  volumes      (node, rsc, snap, v) -> Volume                 │
//! │  drbd_*       suffixed name [+vlm] -> DRBD definition data   │
//! │  layers       LayerId              -> LayerRscObject         │
//! ├──────────────────────────────────────────────────────────────┤
//! │  pools        minor / TCP port / layer id                    │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod objects;
pub mod txmap;

pub use objects::{DrbdVlmDfnKey, GraphSnapshot, ObjectCache, PropKey};
pub use txmap::TransactionalMap;
