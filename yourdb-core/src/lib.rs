//! YourDB: an embedded, single-process, schema-validated object store
//! with append-only log persistence, secondary indexes, writer-preference
//! concurrency, a small query planner, lazy schema upgrades, and
//! background compaction.
//!
//! See [`Catalog`] for the entry point.

pub mod catalog;
pub mod codec;
pub mod compactor;
pub mod config;
pub mod entity;
pub mod error;
pub mod filter;
pub mod gate;
pub mod index;
pub mod log;
pub mod persistence;
pub mod query;
pub mod record;
pub mod schema;
pub mod value;

pub use catalog::Catalog;
pub use config::EngineConfig;
pub use entity::EntityEngine;
pub use error::{Result, YourDbError};
pub use filter::{FieldPredicate, Filter, Op};
pub use query::{AccessPath, QueryPlan};
pub use record::Record;
pub use schema::{Schema, UpgradeStep};
pub use value::{FieldKind, Value};
