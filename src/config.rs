//! Persistent application configuration model and defaults.

/// Root configuration persisted to `config.toml`.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Config {
    #[serde(default)]
    /// Metadata service endpoint and HTTP timeouts.
    pub source: SourceConfig,
    #[serde(default)]
    /// Request coalescing behavior.
    pub batching: BatchingConfig,
    #[serde(default)]
    /// Lookup waiter polling behavior.
    pub lookup: LookupConfig,
    #[serde(default)]
    /// Title store backend selection.
    pub store: StoreConfig,
    #[serde(default)]
    /// Startup catalog seeding.
    pub bootstrap: BootstrapConfig,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct SourceConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct BatchingConfig {
    /// Quiet period after the last missing-title signal before a batch is sent.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Event bus buffer size; lookups published while the coordinator lags beyond this are lost.
    #[serde(default = "default_bus_capacity")]
    pub bus_capacity: usize,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct LookupConfig {
    #[serde(default = "default_lookup_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

/// Supported title store backends.
#[derive(Debug, Clone, Copy, serde::Deserialize, serde::Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    Memory,
    #[default]
    Sqlite,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize, Default)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    /// SQLite database path; empty means the user data directory.
    #[serde(default)]
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct BootstrapConfig {
    #[serde(default = "default_true")]
    pub seed_on_start: bool,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            bus_capacity: default_bus_capacity(),
        }
    }
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_lookup_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            seed_on_start: true,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_base_url() -> String {
    "http://localhost:80".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    5
}

fn default_request_timeout_secs() -> u64 {
    15
}

fn default_debounce_ms() -> u64 {
    1_000
}

fn default_bus_capacity() -> usize {
    4_096
}

fn default_lookup_timeout_ms() -> u64 {
    120_000
}

fn default_poll_interval_ms() -> u64 {
    500
}

/// Clamps values into workable ranges.
pub fn sanitize_config(config: Config) -> Config {
    let poll_interval_ms = config.lookup.poll_interval_ms.clamp(10, 5_000);
    let timeout_ms = config.lookup.timeout_ms.clamp(poll_interval_ms, 600_000);
    let base_url = {
        let trimmed = config.source.base_url.trim().trim_end_matches('/');
        if trimmed.is_empty() {
            default_base_url()
        } else {
            trimmed.to_string()
        }
    };

    Config {
        source: SourceConfig {
            base_url,
            connect_timeout_secs: config.source.connect_timeout_secs.max(1),
            request_timeout_secs: config.source.request_timeout_secs.max(1),
        },
        batching: BatchingConfig {
            debounce_ms: config.batching.debounce_ms.clamp(50, 10_000),
            bus_capacity: config.batching.bus_capacity.clamp(64, 65_536),
        },
        lookup: LookupConfig {
            timeout_ms,
            poll_interval_ms,
        },
        store: StoreConfig {
            backend: config.store.backend,
            path: config.store.path.trim().to_string(),
        },
        bootstrap: config.bootstrap,
    }
}
