use std::path::PathBuf;
use std::time::Duration;

use clap::Args;

/// Runtime settings for the storage engine and the transfer orchestrator.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// SQLite database file
    pub database: PathBuf,
    /// Upper bound on pooled SQLite connections
    pub max_connections: u32,
    /// How long a statement waits on SQLite's write lock before reporting a conflict
    pub busy_timeout: Duration,
    /// How long to wait for a free pooled connection
    pub acquire_timeout: Duration,
    /// Deadline for a whole transfer; `None` waits indefinitely
    pub transfer_timeout: Option<Duration>,
    /// How long the in-memory store waits on a row lock before reporting a conflict
    pub lock_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database: PathBuf::from("ledgerline.db"),
            max_connections: 5,
            busy_timeout: Duration::from_secs(5),
            acquire_timeout: Duration::from_secs(30),
            transfer_timeout: None,
            lock_timeout: Duration::from_secs(5),
        }
    }
}

impl EngineConfig {
    pub fn with_database(database: impl Into<PathBuf>) -> Self {
        Self {
            database: database.into(),
            ..Self::default()
        }
    }

    pub fn with_transfer_timeout(mut self, timeout: Duration) -> Self {
        self.transfer_timeout = Some(timeout);
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }
}

/// Engine settings as command-line flags, each overridable from the environment.
#[derive(Args, Debug, Clone)]
pub struct EngineArgs {
    /// Database file path
    #[arg(short, long, global = true, env = "LEDGERLINE_DATABASE", default_value = "ledgerline.db")]
    pub database: PathBuf,

    /// Maximum number of pooled database connections
    #[arg(long, global = true, env = "LEDGERLINE_MAX_CONNECTIONS", default_value_t = 5)]
    pub max_connections: u32,

    /// Milliseconds to wait on a locked database before giving up with a conflict
    #[arg(long, global = true, env = "LEDGERLINE_BUSY_TIMEOUT_MS", default_value_t = 5000)]
    pub busy_timeout_ms: u64,

    /// Milliseconds to wait for a free pooled connection
    #[arg(long, global = true, env = "LEDGERLINE_ACQUIRE_TIMEOUT_MS", default_value_t = 30_000)]
    pub acquire_timeout_ms: u64,

    /// Milliseconds a single transfer may take before it is rolled back
    #[arg(long, global = true, env = "LEDGERLINE_TRANSFER_TIMEOUT_MS")]
    pub transfer_timeout_ms: Option<u64>,
}

impl From<EngineArgs> for EngineConfig {
    fn from(args: EngineArgs) -> Self {
        Self {
            database: args.database,
            max_connections: args.max_connections.max(1),
            busy_timeout: Duration::from_millis(args.busy_timeout_ms),
            acquire_timeout: Duration::from_millis(args.acquire_timeout_ms),
            transfer_timeout: args.transfer_timeout_ms.map(Duration::from_millis),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.database, PathBuf::from("ledgerline.db"));
        assert_eq!(config.max_connections, 5);
        assert!(config.transfer_timeout.is_none());
    }

    #[test]
    fn test_builders() {
        let config = EngineConfig::with_database("ledger.db")
            .with_transfer_timeout(Duration::from_millis(500))
            .with_lock_timeout(Duration::from_millis(50));
        assert_eq!(config.database, PathBuf::from("ledger.db"));
        assert_eq!(config.transfer_timeout, Some(Duration::from_millis(500)));
        assert_eq!(config.lock_timeout, Duration::from_millis(50));
    }

    #[test]
    fn test_from_args() {
        let args = EngineArgs {
            database: PathBuf::from("/tmp/ledger.db"),
            max_connections: 0,
            busy_timeout_ms: 250,
            acquire_timeout_ms: 2_000,
            transfer_timeout_ms: Some(1000),
        };
        let config = EngineConfig::from(args);
        assert_eq!(config.database, PathBuf::from("/tmp/ledger.db"));
        assert_eq!(config.max_connections, 1);
        assert_eq!(config.busy_timeout, Duration::from_millis(250));
        assert_eq!(config.acquire_timeout, Duration::from_secs(2));
        assert_eq!(config.transfer_timeout, Some(Duration::from_secs(1)));
        assert_eq!(config.lock_timeout, Duration::from_secs(5));
    }
}
