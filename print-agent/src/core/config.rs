use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::discovery::DiscoveryConfig;
use crate::health::HealthConfig;
use crate::printing::DispatchConfig;
use crate::resilience::{BreakerConfig, PoolConfig, RateLimitConfig};
use crate::shutdown::ShutdownConfig;
use crate::sync::SyncConfig;
use crate::usb::UsbConfig;

/// Agent configuration
///
/// # Environment variables
///
/// Every field can be overridden from the environment (a `.env` file is
/// loaded first by `main`):
///
/// | Variable | Default | Meaning |
/// |----------|---------|---------|
/// | DATA_ROOT | /var/lib/print-agent | Data root (`state/`, `logs/`) |
/// | HTTP_HOST | 127.0.0.1 | Local HTTP bind address |
/// | HTTP_PORT | 9721 | Local HTTP port |
/// | ENVIRONMENT | development | development \| production |
/// | LOG_LEVEL | info | Default log level (`RUST_LOG` wins) |
/// | LOG_JSON | false in development | JSON console logs |
/// | LOG_RETENTION_DAYS | 14 | Days of log files kept |
/// | DISCOVERY_INTERVAL_SECS | 300 | Periodic discovery interval |
/// | DISCOVERY_SYSTEM / _USB / _NETWORK / _BLUETOOTH | true/true/false/false | Sub-scans |
/// | DISCOVERY_NETWORK_RANGE | - | CIDR for the network scan |
/// | DISCOVERY_PORTS | 9100,515,631 | Ports probed per host |
/// | DISCOVERY_NETWORK_TIMEOUT_MS | 500 | Per-probe connect timeout |
/// | DISCOVERY_MAX_IN_FLIGHT | 64 | Concurrent network probes |
/// | DISCOVERY_SCAN_TIMEOUT_SECS | 30 | Deadline for each sub-scan |
/// | USB_VENDOR_FILTER | true | Only allowlisted vendors count as printers |
/// | USB_SCAN_INTERVAL_SECS | 5 | USB poll interval |
/// | PRINT_COMMAND | lp | OS print command |
/// | JOB_TIMEOUT_SECS | 30 | Per-job execution deadline |
/// | PAPER_WIDTH | 48 | ESC/POS characters per line |
/// | BREAKER_FAILURE_THRESHOLD | 5 | Failures before a breaker opens |
/// | BREAKER_SUCCESS_THRESHOLD | 2 | Trial successes before it closes |
/// | BREAKER_RECOVERY_SECS | 30 | Open duration |
/// | BREAKER_CALL_TIMEOUT_SECS | 10 | Per-call deadline |
/// | RATE_LIMIT_MAX | 120 | Requests per window per client |
/// | RATE_LIMIT_WINDOW_SECS | 60 | Window length |
/// | POOL_MAX_SIZE | 4 | Backend HTTP sessions |
/// | HEALTH_INTERVAL_SECS | 30 | Health check interval |
/// | BACKEND_URL | - | Backend base URL; sync disabled when unset |
/// | LICENSE_KEY / BRANCH_ID / DEVICE_ID | - | Sync credentials |
/// | SHUTDOWN_TIMEOUT_SECS | 30 | Overall shutdown deadline |
/// | SHUTDOWN_DRAIN_SECS | 10 | In-flight job drain deadline |
///
/// # Example
///
/// ```ignore
/// DATA_ROOT=/tmp/agent BACKEND_URL=https://pos.example.com BRANCH_ID=7 print-agent
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// Root of all persisted files
    pub data_root: PathBuf,
    pub http_host: String,
    pub http_port: u16,
    /// development | production
    pub environment: String,
    pub log_level: String,
    pub log_json: bool,
    pub log_retention_days: u64,

    pub discovery: DiscoveryConfig,
    pub usb: UsbConfig,
    pub dispatch: DispatchConfig,
    pub breaker: BreakerConfig,
    pub rate_limit: RateLimitConfig,
    pub pool: PoolConfig,
    pub health: HealthConfig,
    pub sync: SyncConfig,
    pub shutdown: ShutdownConfig,
}

fn env_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.into())
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_secs(key: &str, default: u64) -> Duration {
    Duration::from_secs(env_parse(key, default))
}

fn env_ports(key: &str, default: &[u16]) -> Vec<u16> {
    match env_opt(key) {
        Some(raw) => {
            let ports: Vec<u16> = raw
                .split(',')
                .filter_map(|p| p.trim().parse().ok())
                .collect();
            if ports.is_empty() {
                default.to_vec()
            } else {
                ports
            }
        }
        None => default.to_vec(),
    }
}

impl Config {
    /// Load configuration from the environment, falling back to defaults
    pub fn from_env() -> Self {
        let environment = env_str("ENVIRONMENT", "development");
        let is_production = environment == "production";

        let discovery_defaults = DiscoveryConfig::default();
        let discovery = DiscoveryConfig {
            interval: env_secs(
                "DISCOVERY_INTERVAL_SECS",
                discovery_defaults.interval.as_secs(),
            ),
            enable_system: env_parse("DISCOVERY_SYSTEM", discovery_defaults.enable_system),
            enable_usb: env_parse("DISCOVERY_USB", discovery_defaults.enable_usb),
            enable_network: env_parse("DISCOVERY_NETWORK", discovery_defaults.enable_network),
            enable_bluetooth: env_parse(
                "DISCOVERY_BLUETOOTH",
                discovery_defaults.enable_bluetooth,
            ),
            network_range: env_opt("DISCOVERY_NETWORK_RANGE"),
            ports: env_ports("DISCOVERY_PORTS", &discovery_defaults.ports),
            network_timeout: Duration::from_millis(env_parse(
                "DISCOVERY_NETWORK_TIMEOUT_MS",
                discovery_defaults.network_timeout.as_millis() as u64,
            )),
            max_in_flight: env_parse("DISCOVERY_MAX_IN_FLIGHT", discovery_defaults.max_in_flight),
            vendor_filter: env_parse("USB_VENDOR_FILTER", discovery_defaults.vendor_filter),
            scan_timeout: env_secs(
                "DISCOVERY_SCAN_TIMEOUT_SECS",
                discovery_defaults.scan_timeout.as_secs(),
            ),
        };

        let usb_defaults = UsbConfig::default();
        let usb = UsbConfig {
            scan_interval: env_secs("USB_SCAN_INTERVAL_SECS", usb_defaults.scan_interval.as_secs()),
            vendor_filter: discovery.vendor_filter,
            sysfs_root: env_opt("USB_SYSFS_ROOT")
                .map(PathBuf::from)
                .unwrap_or(usb_defaults.sysfs_root),
        };

        let dispatch_defaults = DispatchConfig::default();
        let dispatch = DispatchConfig {
            job_timeout: env_secs("JOB_TIMEOUT_SECS", dispatch_defaults.job_timeout.as_secs()),
            print_command: env_str("PRINT_COMMAND", &dispatch_defaults.print_command),
            paper_width: env_parse("PAPER_WIDTH", dispatch_defaults.paper_width),
            history_limit: env_parse("JOB_HISTORY_LIMIT", dispatch_defaults.history_limit),
            socket_timeout: dispatch_defaults.socket_timeout,
        };

        let breaker_defaults = BreakerConfig::default();
        let breaker = BreakerConfig {
            failure_threshold: env_parse(
                "BREAKER_FAILURE_THRESHOLD",
                breaker_defaults.failure_threshold,
            ),
            success_threshold: env_parse(
                "BREAKER_SUCCESS_THRESHOLD",
                breaker_defaults.success_threshold,
            ),
            recovery_timeout: env_secs(
                "BREAKER_RECOVERY_SECS",
                breaker_defaults.recovery_timeout.as_secs(),
            ),
            call_timeout: env_secs(
                "BREAKER_CALL_TIMEOUT_SECS",
                breaker_defaults.call_timeout.as_secs(),
            ),
        };

        let rate_defaults = RateLimitConfig::default();
        let rate_limit = RateLimitConfig {
            max_requests: env_parse("RATE_LIMIT_MAX", rate_defaults.max_requests),
            window: env_secs("RATE_LIMIT_WINDOW_SECS", rate_defaults.window.as_secs()),
            sweep_interval: rate_defaults.sweep_interval,
        };

        let pool_defaults = PoolConfig::default();
        let pool = PoolConfig {
            max_size: env_parse("POOL_MAX_SIZE", pool_defaults.max_size),
            acquire_timeout: env_secs(
                "POOL_ACQUIRE_TIMEOUT_SECS",
                pool_defaults.acquire_timeout.as_secs(),
            ),
            idle_timeout: env_secs("POOL_IDLE_TIMEOUT_SECS", pool_defaults.idle_timeout.as_secs()),
        };

        let health_defaults = HealthConfig::default();
        let health = HealthConfig {
            interval: env_secs("HEALTH_INTERVAL_SECS", health_defaults.interval.as_secs()),
            memory_warn_percent: env_parse("HEALTH_MEMORY_WARN", health_defaults.memory_warn_percent),
            memory_fail_percent: env_parse("HEALTH_MEMORY_FAIL", health_defaults.memory_fail_percent),
            disk_warn_percent: env_parse("HEALTH_DISK_WARN", health_defaults.disk_warn_percent),
            disk_fail_percent: env_parse("HEALTH_DISK_FAIL", health_defaults.disk_fail_percent),
            memory_escalation_threshold: health_defaults.memory_escalation_threshold,
        };

        let sync_defaults = SyncConfig::default();
        let sync = SyncConfig {
            backend_url: env_opt("BACKEND_URL"),
            ws_path: env_str("SYNC_WS_PATH", &sync_defaults.ws_path),
            license_key: env_str("LICENSE_KEY", ""),
            branch_id: env_str("BRANCH_ID", ""),
            device_id: env_opt("DEVICE_ID").unwrap_or_else(default_device_id),
            role: env_str("AGENT_ROLE", &sync_defaults.role),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            reconnect_initial: env_secs(
                "SYNC_RECONNECT_INITIAL_SECS",
                sync_defaults.reconnect_initial.as_secs(),
            ),
            reconnect_max: env_secs(
                "SYNC_RECONNECT_MAX_SECS",
                sync_defaults.reconnect_max.as_secs(),
            ),
            ping_interval: env_secs(
                "SYNC_PING_INTERVAL_SECS",
                sync_defaults.ping_interval.as_secs(),
            ),
            outbound_buffer: sync_defaults.outbound_buffer,
            request_timeout: sync_defaults.request_timeout,
        };

        let shutdown_defaults = ShutdownConfig::default();
        let shutdown = ShutdownConfig {
            overall_timeout: env_secs(
                "SHUTDOWN_TIMEOUT_SECS",
                shutdown_defaults.overall_timeout.as_secs(),
            ),
            drain_timeout: env_secs("SHUTDOWN_DRAIN_SECS", shutdown_defaults.drain_timeout.as_secs()),
            sync_close_timeout: shutdown_defaults.sync_close_timeout,
        };

        Self {
            data_root: PathBuf::from(env_str("DATA_ROOT", "/var/lib/print-agent")),
            http_host: env_str("HTTP_HOST", "127.0.0.1"),
            http_port: env_parse("HTTP_PORT", 9721),
            log_level: env_str("LOG_LEVEL", "info"),
            log_json: env_parse("LOG_JSON", is_production),
            log_retention_days: env_parse("LOG_RETENTION_DAYS", 14),
            environment,
            discovery,
            usb,
            dispatch,
            breaker,
            rate_limit,
            pool,
            health,
            sync,
            shutdown,
        }
    }

    /// Defaults rooted at `data_root`, ignoring the environment
    ///
    /// Used by tests so that one agent instance never sees another's files.
    pub fn for_data_root(data_root: impl Into<PathBuf>) -> Self {
        Self {
            data_root: data_root.into(),
            http_host: "127.0.0.1".into(),
            http_port: 0,
            environment: "development".into(),
            log_level: "debug".into(),
            log_json: false,
            log_retention_days: 14,
            discovery: DiscoveryConfig::default(),
            usb: UsbConfig::default(),
            dispatch: DispatchConfig::default(),
            breaker: BreakerConfig::default(),
            rate_limit: RateLimitConfig::default(),
            pool: PoolConfig::default(),
            health: HealthConfig::default(),
            sync: SyncConfig::default(),
            shutdown: ShutdownConfig::default(),
        }
    }

    pub fn state_dir(&self) -> PathBuf {
        self.data_root.join("state")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.data_root.join("logs")
    }

    pub fn data_root(&self) -> &Path {
        &self.data_root
    }

    pub fn http_addr(&self) -> String {
        format!("{}:{}", self.http_host, self.http_port)
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Host name based device id, stable across restarts
fn default_device_id() -> String {
    sysinfo::System::host_name()
        .map(|h| format!("agent-{}", shared::models::normalize_name(&h)))
        .unwrap_or_else(|| "agent-unknown".into())
}
