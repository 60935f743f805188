use std::sync::Arc;

/// Store open configuration (spec §6's configuration surface). Built through
/// [`StoreConfigBuilder`] the way the teacher's own configuration layer
/// accumulates a builder before handing it to `open`.
#[derive(Clone)]
pub struct StoreConfig {
    pub file_name: Option<String>,
    pub read_only: bool,
    pub recovery_mode: bool,
    pub cache_size_mb: usize,
    pub cache_concurrency: usize,
    pub page_split_size: usize,
    pub keys_per_page: usize,
    pub auto_commit_buffer_size_kb: usize,
    pub auto_commit_delay_ms: u64,
    pub auto_compact_fill_rate: u32,
    pub compress: CompressionMode,
    pub background_exception_handler: Option<Arc<dyn Fn(&crate::error::StorageError) + Send + Sync>>,
    /// Minimum age (ms) a fully-dead chunk must reach before its blocks are
    /// physically reclaimed. Exposed mainly so tests can shrink it instead
    /// of waiting out the real default.
    pub retention_time_ms: u64,
    /// Passphrase used to derive the store's encryption key. Taken out of
    /// the config and discarded the moment `Store::open` consumes it; the
    /// store never keeps a copy around.
    pub encryption_key: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMode {
    Off,
    Lzf,
    Deflate,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            file_name: None,
            read_only: false,
            recovery_mode: false,
            cache_size_mb: 16,
            cache_concurrency: 16,
            page_split_size: 16 * 1024,
            keys_per_page: 48,
            auto_commit_buffer_size_kb: 1024,
            auto_commit_delay_ms: 1000,
            auto_compact_fill_rate: 90,
            compress: CompressionMode::Off,
            background_exception_handler: None,
            retention_time_ms: crate::consts::DEFAULT_RETENTION_TIME_MS,
            encryption_key: None,
        }
    }
}

impl StoreConfig {
    pub fn builder() -> StoreConfigBuilder {
        StoreConfigBuilder::default()
    }

    pub fn is_in_memory(&self) -> bool {
        self.file_name.is_none()
    }
}

#[derive(Default)]
pub struct StoreConfigBuilder {
    config: StoreConfig,
}

impl StoreConfigBuilder {
    pub fn file_name(mut self, name: impl Into<String>) -> Self {
        self.config.file_name = Some(name.into());
        // In-memory stores default to a smaller split size; a file name
        // implies on-disk pages, so restore the file-backed default.
        if self.config.page_split_size == StoreConfig::default().page_split_size {
            self.config.page_split_size = 16 * 1024;
        }
        self
    }

    pub fn in_memory(mut self) -> Self {
        self.config.file_name = None;
        self.config.page_split_size = 48;
        self
    }

    pub fn read_only(mut self, value: bool) -> Self {
        self.config.read_only = value;
        self
    }

    pub fn recovery_mode(mut self, value: bool) -> Self {
        self.config.recovery_mode = value;
        self
    }

    pub fn cache_size_mb(mut self, value: usize) -> Self {
        self.config.cache_size_mb = value;
        self
    }

    pub fn cache_concurrency(mut self, value: usize) -> Self {
        self.config.cache_concurrency = value;
        self
    }

    pub fn page_split_size(mut self, value: usize) -> Self {
        self.config.page_split_size = value;
        self
    }

    pub fn keys_per_page(mut self, value: usize) -> Self {
        self.config.keys_per_page = value;
        self
    }

    pub fn auto_commit_buffer_size_kb(mut self, value: usize) -> Self {
        self.config.auto_commit_buffer_size_kb = value;
        self
    }

    pub fn auto_commit_delay_ms(mut self, value: u64) -> Self {
        self.config.auto_commit_delay_ms = value;
        self
    }

    pub fn auto_compact_fill_rate(mut self, value: u32) -> Self {
        self.config.auto_compact_fill_rate = value;
        self
    }

    pub fn compress(mut self, value: CompressionMode) -> Self {
        self.config.compress = value;
        self
    }

    pub fn background_exception_handler(
        mut self,
        handler: impl Fn(&crate::error::StorageError) + Send + Sync + 'static,
    ) -> Self {
        self.config.background_exception_handler = Some(Arc::new(handler));
        self
    }

    pub fn retention_time_ms(mut self, value: u64) -> Self {
        self.config.retention_time_ms = value;
        self
    }

    pub fn encryption_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.config.encryption_key = Some(key.into());
        self
    }

    pub fn build(self) -> crate::error::Result<StoreConfig> {
        if self.config.read_only && self.config.file_name.is_none() {
            return Err(crate::error::StorageError::IllegalArgument(
                "read-only requires a file name".to_string(),
            ));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = StoreConfig::default();
        assert_eq!(config.cache_size_mb, 16);
        assert_eq!(config.cache_concurrency, 16);
        assert_eq!(config.auto_compact_fill_rate, 90);
        assert_eq!(config.auto_commit_delay_ms, 1000);
    }

    #[test]
    fn read_only_without_file_is_rejected() {
        let result = StoreConfig::builder().read_only(true).build();
        assert!(result.is_err());
    }

    #[test]
    fn in_memory_uses_small_split_size() {
        let config = StoreConfig::builder().in_memory().build().unwrap();
        assert!(config.is_in_memory());
        assert_eq!(config.page_split_size, 48);
    }

    #[test]
    fn encryption_key_and_retention_time_are_configurable() {
        let config = StoreConfig::builder()
            .in_memory()
            .encryption_key(b"passphrase".to_vec())
            .retention_time_ms(0)
            .build()
            .unwrap();
        assert_eq!(config.encryption_key.as_deref(), Some(b"passphrase".as_slice()));
        assert_eq!(config.retention_time_ms, 0);
    }
}
