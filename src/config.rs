//! Engine and reader configuration

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

/// Process-wide engine tunables.
///
/// Installed once with [`EngineConfig::try_init`]; readers snapshot the
/// values they care about into a [`ReaderConfig`] at construction, so a
/// running scan is never affected by later config changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Soft cap on physical rows folded into one logical row per
    /// `next_row` call when the caller aggregates upstream. Bounds
    /// per-call latency on hot keys.
    pub scanner_row_num: u64,
    /// An IN-list with at least this many operands no longer selects its
    /// column for bloom-filter loading.
    pub max_in_list_bloom_operands: usize,
    /// Rows per decoded block in the in-memory segment backend.
    pub block_row_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scanner_row_num: 16_384,
            max_in_list_bloom_operands: 100,
            block_row_capacity: 1_024,
        }
    }
}

static GLOBAL: OnceCell<EngineConfig> = OnceCell::new();

impl EngineConfig {
    /// The process-wide config, defaulting if never installed.
    pub fn global() -> &'static EngineConfig {
        GLOBAL.get_or_init(EngineConfig::default)
    }

    /// Install the process-wide config. Returns false if one was already
    /// installed (the existing config stays in effect).
    pub fn try_init(config: EngineConfig) -> bool {
        GLOBAL.set(config).is_ok()
    }
}

/// Per-reader snapshot of the tunables the read path consults.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ReaderConfig {
    pub scanner_row_num: u64,
    pub max_in_list_bloom_operands: usize,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        let global = EngineConfig::global();
        Self {
            scanner_row_num: global.scanner_row_num,
            max_in_list_bloom_operands: global.max_in_list_bloom_operands,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.scanner_row_num, 16_384);
        assert_eq!(config.max_in_list_bloom_operands, 100);

        let reader = ReaderConfig::default();
        assert_eq!(reader.scanner_row_num, 16_384);
    }
}
