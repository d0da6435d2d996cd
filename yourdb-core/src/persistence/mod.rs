//! On-disk metadata formats and I/O helpers, split out the way the
//! teacher's `persistence/` module separates DTOs (`schema.rs`), retry
//! plumbing (`io_utils.rs`), and the manager that ties them together.

pub mod catalog_meta;
pub mod io_utils;
pub mod schema_meta;
