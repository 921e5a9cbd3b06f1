//! Service configuration, read from the environment with defaults.

use std::path::PathBuf;
use std::time::Duration;

use crate::trilateration::SolverConfig;

/// Default ceiling for `history` queries.
pub const DEFAULT_HISTORY_LIMIT_MAX: usize = 10_000;

/// Default bound on any single durable store call.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_millis(2_000);

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// HTTP port (default 3001)
    pub http_port: u16,
    /// UDP port for gateway batch ingest (default 5555)
    pub ingest_udp_port: u16,
    /// Anchor directory snapshot (default anchors.json)
    pub anchors_file: PathBuf,
    /// PostgreSQL URL; in-memory history when unset
    pub database_url: Option<String>,
    /// Bound on each store call
    pub store_timeout: Duration,
    /// Maximum `limit` accepted by history queries
    pub history_limit_max: usize,
    /// Keep a raw copy of every batch in the store
    pub record_raw_measurements: bool,
    pub solver: SolverConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            http_port: 3001,
            ingest_udp_port: 5555,
            anchors_file: PathBuf::from("anchors.json"),
            database_url: None,
            store_timeout: DEFAULT_STORE_TIMEOUT,
            history_limit_max: DEFAULT_HISTORY_LIMIT_MAX,
            record_raw_measurements: true,
            solver: SolverConfig::default(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

impl EngineConfig {
    /// Overlay environment variables on the defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let solver_defaults = defaults.solver.clone();
        Self {
            http_port: env_parse("PORT").unwrap_or(defaults.http_port),
            ingest_udp_port: env_parse("INGEST_UDP_PORT").unwrap_or(defaults.ingest_udp_port),
            anchors_file: std::env::var("ANCHORS_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.anchors_file),
            database_url: std::env::var("DATABASE_URL").ok().filter(|v| !v.is_empty()),
            store_timeout: env_parse::<u64>("STORE_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.store_timeout),
            history_limit_max: env_parse("HISTORY_LIMIT_MAX").unwrap_or(defaults.history_limit_max),
            record_raw_measurements: env_parse("RECORD_RAW_MEASUREMENTS")
                .unwrap_or(defaults.record_raw_measurements),
            solver: SolverConfig {
                min_ranges: env_parse("MIN_RANGES").unwrap_or(solver_defaults.min_ranges),
                fallback_accuracy_m: env_parse("FALLBACK_ACCURACY_M")
                    .unwrap_or(solver_defaults.fallback_accuracy_m),
                rank_tolerance: env_parse("SOLVER_RANK_TOLERANCE").unwrap_or(solver_defaults.rank_tolerance),
                ..solver_defaults
            },
        }
    }
}
