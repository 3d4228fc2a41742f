//! # Constants
//!
//! Default values shared by the configuration layer and the runtime.

use std::time::Duration;

/// Capacity of the task bus between the watcher and the executor
pub const DEFAULT_BUS_CAPACITY: usize = 100;

/// Default watcher poll interval (seconds)
pub const DEFAULT_CHECK_INTERVAL_SECS: u64 = 10;

/// Default Vault lease renewal cadence (seconds)
pub const DEFAULT_VAULT_RENEWAL_SECS: u64 = 24 * 60 * 60;

/// Default KV v2 mount used for secret lookups
pub const DEFAULT_VAULT_PATH: &str = "secret";

/// Lease renewal attempts before the failure becomes fatal
pub const RENEWAL_MAX_ATTEMPTS: u32 = 3;

/// Constant delay between lease renewal attempts
pub const RENEWAL_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Fetch attempts per target per poll cycle
pub const FETCH_MAX_ATTEMPTS: u32 = 3;

/// First delay of the exponential fetch backoff
pub const FETCH_BACKOFF_BASE: Duration = Duration::from_millis(500);

/// Upper bound of the exponential fetch backoff
pub const FETCH_BACKOFF_MAX: Duration = Duration::from_secs(5);

/// Default branch tracked when a target does not name one
pub const DEFAULT_BRANCH: &str = "main";

/// Prefix of environment variables seeded into the memory secret store
pub const MEMORY_SECRET_ENV_PREFIX: &str = "PICO_SECRET_";

/// Default log filter when `RUST_LOG` is not set
pub const DEFAULT_LOG_FILTER: &str = "pico=info";
