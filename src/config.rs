//! Configuration surface (§6): everything the metadata service needs to
//! boot, loaded the way the teacher's `config.rs` does — a layered
//! `config::Config` built from a file plus environment overrides.

use config::{Config, Environment, File};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub db_name: String,
    pub user: String,
    pub password: String,
}

impl DatabaseConfig {
    pub fn connection_string(&self) -> String {
        format!(
            "postgresql://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, self.db_name
        )
    }
}

/// Paths to the cost-graph CSVs loaded by [`crate::cost_graph::CostGraph`].
#[derive(Debug, Clone, Deserialize)]
pub struct CostGraphFiles {
    pub cost_csv: String,
    pub throughput_csv: String,
    pub complete_latency_csv: String,
    pub storage_csv: String,
}

/// Background sweeper cadence and staleness cutoff (§4.5).
#[derive(Debug, Clone, Deserialize)]
pub struct SweeperConfig {
    pub period_minutes: u64,
    pub lock_timeout_minutes: i64,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            period_minutes: 10,
            lock_timeout_minutes: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub db: DatabaseConfig,
    pub cost_graph: CostGraphFiles,

    /// `cloud:region` tags this deployment always keeps a copy in.
    pub init_regions: Vec<String>,
    pub skystore_bucket_prefix: String,

    /// one of the closed names in §4.2
    pub put_policy: String,
    /// one of the closed names in §4.3
    pub get_policy: String,

    /// default versioning for freshly created buckets: NULL | Enabled | Suspended
    pub version_enable: Option<String>,

    pub server_addr: String,

    /// when true, skips real cloud adapters and uses the in-process
    /// `LocalObjectStore` test double (see `crate::store`).
    #[serde(default)]
    pub local_test: bool,

    #[serde(default)]
    pub sweeper: SweeperConfig,

    /// the `fixed_ttl` placement policy's configured per-copy TTL in seconds
    /// (§4.2, `fixed_ttl` ... else configured constant).
    #[serde(default = "default_fixed_ttl_seconds")]
    pub fixed_ttl_seconds: i64,
}

fn default_fixed_ttl_seconds() -> i64 {
    3600
}

impl Settings {
    pub fn new(config_path: &str) -> std::result::Result<Self, Box<dyn std::error::Error>> {
        let s = Config::builder()
            .add_source(File::with_name(config_path))
            .add_source(Environment::with_prefix("SKYSTORE").separator("__"))
            .build()?;

        Ok(s.try_deserialize()?)
    }
}
