//! Store configuration.

use crate::service::context_service::DEFAULT_RETENTION_DAYS;
use crate::store::DEFAULT_STORE_ROOT;
use std::path::PathBuf;
use std::time::Duration;

const LOG_DIR_NAME: &str = "logs";

/// Default freshness window for agent session read caches.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60);

/// Settings shared by the CLI and embedding callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Directory holding `context/` and `checkpoints/`.
    pub root: PathBuf,
    /// Age after which cleanup removes checkpoints and archives.
    pub retention_days: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::with_root(DEFAULT_STORE_ROOT)
    }
}

impl StoreConfig {
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            retention_days: DEFAULT_RETENTION_DAYS,
        }
    }

    /// Log directory under the store root.
    pub fn log_dir(&self) -> PathBuf {
        self.root.join(LOG_DIR_NAME)
    }
}

#[cfg(test)]
mod tests {
    use super::StoreConfig;
    use std::path::Path;

    #[test]
    fn defaults_point_at_runtime_global() {
        let config = StoreConfig::default();
        assert_eq!(config.root, Path::new(".cc-deck/runtime/global"));
        assert_eq!(config.retention_days, 90);
        assert_eq!(config.log_dir(), Path::new(".cc-deck/runtime/global/logs"));
    }
}
