//! Runtime configuration.
//!
//! Built once at startup from the environment (after `.env` is loaded by the
//! binary) and passed by reference to everything that needs it.

use std::path::PathBuf;
use std::time::Duration;

pub const ENV_CONFIG_DIR: &str = "DBSCOUT_CONFIG_DIR";
pub const ENV_CACHE_TTL: &str = "DBSCOUT_CACHE_TTL_SECS";
pub const ENV_MOCK_CLOUD: &str = "DBSCOUT_MOCK_CLOUD";
pub const ENV_MOCK_MISSING_DRIVERS: &str = "DBSCOUT_MOCK_MISSING_DRIVERS";

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);
pub const DEFAULT_AWS_REGION_CONCURRENCY: usize = 10;
pub const DEFAULT_AZURE_SERVER_CONCURRENCY: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MissingDrivers {
    None,
    All,
    Only(Vec<String>),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub config_dir: PathBuf,
    pub cache_ttl: Duration,
    pub mock_cloud: bool,
    pub mock_missing_drivers: MissingDrivers,
    pub aws_region_concurrency: usize,
    pub azure_server_concurrency: usize,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (tests pass a closure over a map).
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let config_dir = lookup(ENV_CONFIG_DIR)
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(default_config_dir);

        let cache_ttl = lookup(ENV_CACHE_TTL)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_CACHE_TTL);

        let mock_cloud = lookup(ENV_MOCK_CLOUD).is_some_and(|v| v.trim() == "1");

        let mock_missing_drivers = match lookup(ENV_MOCK_MISSING_DRIVERS) {
            Some(raw) => parse_missing_drivers(&raw),
            None => MissingDrivers::None,
        };

        Self {
            config_dir,
            cache_ttl,
            mock_cloud,
            mock_missing_drivers,
            aws_region_concurrency: DEFAULT_AWS_REGION_CONCURRENCY,
            azure_server_concurrency: DEFAULT_AZURE_SERVER_CONCURRENCY,
        }
    }

    /// Defaults rooted at `dir`, no mocks.
    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: dir.into(),
            cache_ttl: DEFAULT_CACHE_TTL,
            mock_cloud: false,
            mock_missing_drivers: MissingDrivers::None,
            aws_region_concurrency: DEFAULT_AWS_REGION_CONCURRENCY,
            azure_server_concurrency: DEFAULT_AZURE_SERVER_CONCURRENCY,
        }
    }

    pub fn driver_missing(&self, db_type: &str) -> bool {
        match &self.mock_missing_drivers {
            MissingDrivers::None => false,
            MissingDrivers::All => true,
            MissingDrivers::Only(list) => list.iter().any(|d| d == db_type),
        }
    }

    pub fn connections_file(&self) -> PathBuf {
        self.config_dir.join("connections.json")
    }
}

fn parse_missing_drivers(raw: &str) -> MissingDrivers {
    let raw = raw.trim();
    if raw.is_empty() {
        return MissingDrivers::None;
    }
    if raw.eq_ignore_ascii_case("all") {
        return MissingDrivers::All;
    }
    let list: Vec<String> = raw
        .split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect();
    if list.is_empty() {
        MissingDrivers::None
    } else {
        MissingDrivers::Only(list)
    }
}

fn default_config_dir() -> PathBuf {
    if let Some(dir) = dirs::config_dir() {
        return dir.join("dbscout");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("dbscout")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_env() {
        let cfg = Config::from_lookup(lookup_from(&[]));
        assert_eq!(cfg.cache_ttl, Duration::from_secs(300));
        assert!(!cfg.mock_cloud);
        assert_eq!(cfg.mock_missing_drivers, MissingDrivers::None);
        assert_eq!(cfg.aws_region_concurrency, 10);
        assert_eq!(cfg.azure_server_concurrency, 5);
        assert!(cfg.config_dir.ends_with("dbscout"));
    }

    #[test]
    fn test_overrides() {
        let cfg = Config::from_lookup(lookup_from(&[
            (ENV_CONFIG_DIR, "/tmp/scout"),
            (ENV_CACHE_TTL, "42"),
            (ENV_MOCK_CLOUD, "1"),
            (ENV_MOCK_MISSING_DRIVERS, "PostgreSQL, mysql"),
        ]));
        assert_eq!(cfg.config_dir, PathBuf::from("/tmp/scout"));
        assert_eq!(cfg.cache_ttl, Duration::from_secs(42));
        assert!(cfg.mock_cloud);
        assert!(cfg.driver_missing("postgresql"));
        assert!(cfg.driver_missing("mysql"));
        assert!(!cfg.driver_missing("mssql"));
        assert_eq!(cfg.connections_file(), PathBuf::from("/tmp/scout/connections.json"));
    }

    #[test]
    fn test_mock_flag_requires_exact_one() {
        let cfg = Config::from_lookup(lookup_from(&[(ENV_MOCK_CLOUD, "true")]));
        assert!(!cfg.mock_cloud);

        let cfg = Config::from_lookup(lookup_from(&[(ENV_MOCK_MISSING_DRIVERS, "all")]));
        assert!(cfg.driver_missing("anything"));
    }
}
