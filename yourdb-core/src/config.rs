//! Engine configuration.

/// Tuning knobs for the catalog and its entities.
///
/// Mirrors the teacher's plain-struct-with-`Default` configuration style:
/// no config-file parsing lives in the core, callers build this however
/// they like and hand it to [`crate::catalog::Catalog::open`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Compaction triggers automatically once `live_records / frame_count`
    /// drops below this ratio (spec §4.7). `0.0` disables automatic
    /// triggering; compaction then only runs on explicit `optimize()`.
    pub compaction_trigger_ratio: f64,
    /// Maximum number of retry attempts for transient I/O errors during
    /// append/sync/catalog writes.
    pub io_max_retries: u32,
    /// Delay between retry attempts.
    pub io_retry_delay_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            compaction_trigger_ratio: 0.5,
            io_max_retries: 3,
            io_retry_delay_ms: 50,
        }
    }
}
