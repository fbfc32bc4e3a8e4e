/// Runtime configuration for the snapshot job queue.
///
/// Loaded from environment variables (with `.env` support via dotenvy) into a
/// typed struct so the rest of the code never touches raw strings. Feature
/// flags are plain fields here, passed at construction, not ambient state.
#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,

    /// Logical worker identity, persisted in `lock_owner` for diagnostics.
    pub worker_instance_id: String,

    /// When false, enqueue callers should fall back to synchronous handling
    /// and the poll loop stays dormant; already-enqueued jobs wait in the
    /// table until the flag is turned back on.
    pub async_enabled: bool,
    /// Kept separate from `async_enabled` so tests and tools can enqueue jobs
    /// without the poll loop running (and vice versa).
    pub worker_enabled: bool,

    pub poll_interval_ms: u64,
    pub batch_size: usize,
    pub max_attempts: i32,

    pub retry_base_seconds: i64,
    pub retry_backoff_multiplier: f64,
    pub retry_max_delay_seconds: i64,

    /// A `running` row whose `locked_at` is older than this is presumed
    /// abandoned and eligible for stale recovery.
    pub lock_timeout_seconds: i64,
    /// Must satisfy `heartbeat_interval_ms * 3 < lock_timeout_seconds * 1000`
    /// so an actively heartbeating job survives transient store slowness
    /// without being reclaimed.
    pub heartbeat_interval_ms: u64,

    pub cleanup_enabled: bool,
    pub cleanup_interval_ms: u64,
    pub retention_hours: i64,
    pub cleanup_batch_size: i64,

    /// Admin HTTP listener (metrics + job introspection); None disables it.
    pub admin_addr: Option<String>,
    pub migrate_on_startup: bool,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL is missing"))?;

        let worker_instance_id = env_or_fallback("SNAPQ_WORKER_ID", "WORKER_ID")
            .or_else(|| std::env::var("HOSTNAME").ok())
            .unwrap_or_else(|| "local-worker".to_string());

        let cfg = Self {
            database_url,
            worker_instance_id,
            async_enabled: env_bool("SNAPQ_ASYNC_ENABLED").unwrap_or(true),
            worker_enabled: env_bool("SNAPQ_WORKER_ENABLED").unwrap_or(true),
            poll_interval_ms: env_parse("SNAPQ_POLL_INTERVAL_MS").unwrap_or(1_000),
            batch_size: env_parse("SNAPQ_BATCH_SIZE").unwrap_or(1),
            max_attempts: env_parse("SNAPQ_MAX_ATTEMPTS").unwrap_or(3),
            retry_base_seconds: env_parse("SNAPQ_RETRY_BASE_SECONDS").unwrap_or(10),
            retry_backoff_multiplier: env_parse("SNAPQ_RETRY_BACKOFF_MULTIPLIER").unwrap_or(2.0),
            retry_max_delay_seconds: env_parse("SNAPQ_RETRY_MAX_DELAY_SECONDS").unwrap_or(300),
            lock_timeout_seconds: env_parse("SNAPQ_LOCK_TIMEOUT_SECONDS").unwrap_or(120),
            heartbeat_interval_ms: env_parse("SNAPQ_HEARTBEAT_INTERVAL_MS").unwrap_or(30_000),
            cleanup_enabled: env_bool("SNAPQ_CLEANUP_ENABLED").unwrap_or(true),
            cleanup_interval_ms: env_parse("SNAPQ_CLEANUP_INTERVAL_MS").unwrap_or(60_000),
            retention_hours: env_parse("SNAPQ_RETENTION_HOURS").unwrap_or(168),
            cleanup_batch_size: env_parse("SNAPQ_CLEANUP_BATCH_SIZE").unwrap_or(100),
            admin_addr: env_or_fallback("SNAPQ_ADMIN_ADDR", "ADMIN_ADDR")
                .and_then(|s| normalize_optional_addr(&s)),
            migrate_on_startup: env_bool("SNAPQ_MIGRATE_ON_STARTUP").unwrap_or(false),
        };

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.batch_size == 0 {
            anyhow::bail!("SNAPQ_BATCH_SIZE must be >= 1");
        }
        if self.max_attempts < 1 {
            anyhow::bail!("SNAPQ_MAX_ATTEMPTS must be >= 1");
        }
        if self.retry_base_seconds < 1 {
            anyhow::bail!("SNAPQ_RETRY_BASE_SECONDS must be >= 1");
        }
        if self.retry_backoff_multiplier < 1.0 {
            anyhow::bail!("SNAPQ_RETRY_BACKOFF_MULTIPLIER must be >= 1.0");
        }
        if self.retry_max_delay_seconds < self.retry_base_seconds {
            anyhow::bail!("SNAPQ_RETRY_MAX_DELAY_SECONDS must be >= SNAPQ_RETRY_BASE_SECONDS");
        }
        if self.lock_timeout_seconds < 1 {
            anyhow::bail!("SNAPQ_LOCK_TIMEOUT_SECONDS must be >= 1");
        }
        if self.heartbeat_interval_ms == 0 {
            anyhow::bail!("SNAPQ_HEARTBEAT_INTERVAL_MS must be >= 1");
        }
        // Three missed heartbeat windows must fit inside the lock timeout.
        if self.heartbeat_interval_ms.saturating_mul(3) >= self.lock_timeout_seconds as u64 * 1_000
        {
            anyhow::bail!(
                "SNAPQ_HEARTBEAT_INTERVAL_MS * 3 must be < SNAPQ_LOCK_TIMEOUT_SECONDS * 1000 \
                 (got {}ms heartbeat vs {}s lock timeout)",
                self.heartbeat_interval_ms,
                self.lock_timeout_seconds
            );
        }
        if self.retention_hours < 1 {
            anyhow::bail!("SNAPQ_RETENTION_HOURS must be >= 1");
        }
        if self.cleanup_batch_size < 1 {
            anyhow::bail!("SNAPQ_CLEANUP_BATCH_SIZE must be >= 1");
        }
        Ok(())
    }
}

impl Default for Config {
    /// Defaults used by tests and tooling; mirrors the `from_env` fallbacks
    /// with a placeholder database URL.
    fn default() -> Self {
        Self {
            database_url: String::new(),
            worker_instance_id: "local-worker".to_string(),
            async_enabled: true,
            worker_enabled: true,
            poll_interval_ms: 1_000,
            batch_size: 1,
            max_attempts: 3,
            retry_base_seconds: 10,
            retry_backoff_multiplier: 2.0,
            retry_max_delay_seconds: 300,
            lock_timeout_seconds: 120,
            heartbeat_interval_ms: 30_000,
            cleanup_enabled: true,
            cleanup_interval_ms: 60_000,
            retention_hours: 168,
            cleanup_batch_size: 100,
            admin_addr: None,
            migrate_on_startup: false,
        }
    }
}

fn env_or_fallback(primary: &str, fallback: &str) -> Option<String> {
    std::env::var(primary)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .or_else(|| std::env::var(fallback).ok().filter(|s| !s.trim().is_empty()))
}

fn env_bool(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

fn normalize_optional_addr(value: &str) -> Option<String> {
    let v = value.trim();
    if v.is_empty() {
        return None;
    }
    if matches!(v.to_lowercase().as_str(), "0" | "off" | "false" | "none") {
        return None;
    }
    Some(v.to_string())
}
