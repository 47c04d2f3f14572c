use std::sync::Once;

use tracing_subscriber::EnvFilter;

use crate::config::StoreConfig;

static TRACING: Once = Once::new();

/// Install a test-writer `tracing` subscriber once per test binary.
///
/// Filtered by `RUST_LOG`, silent by default.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("off")),
            )
            .with_test_writer()
            .try_init();
    });
}

/// Configuration with small pages and caches.
///
/// A few hundred keys are enough to split the root, grow a multi-level tree
/// and push nodes and data pages through cache eviction.
pub fn small_config() -> StoreConfig {
    init_tracing();
    StoreConfig {
        page_size: 512,
        node_cache_size: 16,
        node_cache_purge_unit: 4,
        data_cache_size: 8,
        data_cache_purge_unit: 2,
        page_cache_size: 8,
    }
}
