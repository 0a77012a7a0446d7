//! Agent state - one explicit context owning every component
//!
//! Nothing lives in module-level statics, so several agents can run side
//! by side in one test process, each rooted at its own data directory.
//!
//! | Field | Type | Role |
//! |-------|------|------|
//! | config | Config | immutable configuration |
//! | store | StateStore | durable JSON under `state/` |
//! | registry | PrinterRegistry | current printer set (snapshot swap) |
//! | discovery | Arc<DiscoveryEngine> | periodic and on-demand discovery |
//! | usb | Arc<UsbManager> | USB device persistence |
//! | dispatcher | Dispatcher | per-printer job lanes |
//! | breakers | BreakerRegistry | named circuit breakers |
//! | rate_limiter | RateLimiter | local HTTP rate limiting |
//! | health | Arc<HealthMonitor> | checks, recovery, readiness |
//! | sync | SyncHandle | emit side of the sync channel |
//! | backend | Option<Arc<BackendClient>> | pooled REST client |
//! | lifecycle | Lifecycle | graceful / emergency stop requests |

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use printer_driver::{CommandRunner, SystemCommandRunner};
use shared::AppError;

use super::config::Config;
use super::error::Result;
use super::lifecycle::Lifecycle;
use super::tasks::BackgroundTasks;
use crate::discovery::bluetooth::BluetoothScanner;
use crate::discovery::network::NetworkScanner;
use crate::discovery::system::SystemScanner;
use crate::discovery::usb::UsbScanner;
use crate::discovery::{DiscoveryEngine, PrinterRegistry, PrinterScanner};
use crate::health::{
    DiskCheck, HealthMonitor, MemoryCheck, PrinterCheck, RecoveryAction, RecoveryHandler,
    SyncChannelCheck, TaskCheck,
};
use crate::printing::{Dispatcher, HardwareExecutor, JobExecutor};
use crate::resilience::{BreakerRegistry, RateLimiter};
use crate::storage::StateStore;
use crate::sync::{BackendClient, CommandHandler, SyncChannel, SyncHandle};
use crate::usb::{SysfsUsbEnumerator, UsbEnumerator, UsbManager};

/// Reachability probe timeout used by the printer health check
const PRINTER_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Collaborators that touch the host; tests swap in fakes
#[derive(Clone)]
pub struct AgentDeps {
    pub runner: Arc<dyn CommandRunner>,
    pub enumerator: Arc<dyn UsbEnumerator>,
    /// Replaces the hardware executor when set
    pub executor: Option<Arc<dyn JobExecutor>>,
    /// Replaces the four built-in sub-scans when set
    pub scanners: Option<Vec<Arc<dyn PrinterScanner>>>,
    /// Directory watched for `lp*` device nodes
    pub device_dir: PathBuf,
}

impl AgentDeps {
    /// Real host access: `lp`/`lpstat`, sysfs, `/dev/usb`
    pub fn system(config: &Config) -> Self {
        Self {
            runner: Arc::new(SystemCommandRunner),
            enumerator: Arc::new(SysfsUsbEnumerator::new(config.usb.sysfs_root.clone())),
            executor: None,
            scanners: None,
            device_dir: PathBuf::from("/dev/usb"),
        }
    }

    pub fn with_executor(mut self, executor: Arc<dyn JobExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn with_scanners(mut self, scanners: Vec<Arc<dyn PrinterScanner>>) -> Self {
        self.scanners = Some(scanners);
        self
    }
}

#[derive(Clone)]
pub struct AgentState {
    pub config: Config,
    pub store: StateStore,
    pub registry: PrinterRegistry,
    pub discovery: Arc<DiscoveryEngine>,
    pub usb: Arc<UsbManager>,
    pub dispatcher: Dispatcher,
    pub breakers: BreakerRegistry,
    pub rate_limiter: RateLimiter,
    pub health: Arc<HealthMonitor>,
    pub sync: SyncHandle,
    pub backend: Option<Arc<BackendClient>>,
    pub lifecycle: Lifecycle,
    /// Unix millis
    pub started_at: i64,
}

/// A freshly wired agent, not yet running
pub struct Bootstrap {
    pub state: AgentState,
    pub tasks: BackgroundTasks,
    pub sync_channel: SyncChannel,
    /// Directory watched for `lp*` device nodes
    pub device_dir: PathBuf,
}

impl AgentState {
    /// Wire every component; nothing is started yet
    pub fn initialize(config: Config, deps: AgentDeps) -> Result<Bootstrap> {
        let store = StateStore::open(config.state_dir())?;
        let lifecycle = Lifecycle::new();
        let tasks = BackgroundTasks::new(lifecycle.clone());
        let breakers = BreakerRegistry::new(config.breaker.clone());
        let registry = PrinterRegistry::new();

        let usb = Arc::new(
            UsbManager::new(deps.enumerator.clone(), config.usb.clone()).with_store(store.clone()),
        );

        let scanners = deps.scanners.clone().unwrap_or_else(|| {
            vec![
                Arc::new(SystemScanner::new(deps.runner.clone())) as Arc<dyn PrinterScanner>,
                Arc::new(UsbScanner::new(deps.enumerator.clone())),
                Arc::new(NetworkScanner),
                Arc::new(BluetoothScanner::new(deps.runner.clone())),
            ]
        });
        let mut engine = DiscoveryEngine::new(config.discovery.clone(), registry.clone())
            .with_usb_manager(usb.clone())
            .with_store(store.clone());
        for scanner in scanners {
            engine = engine.with_scanner(scanner);
        }
        let discovery = Arc::new(engine);

        let executor = deps.executor.clone().unwrap_or_else(|| {
            Arc::new(HardwareExecutor::new(
                deps.runner.clone(),
                breakers.clone(),
                config.dispatch.clone(),
            ))
        });
        let dispatcher = Dispatcher::new(config.dispatch.clone(), registry.clone(), executor);

        let handler = CommandHandler::new(
            dispatcher.clone(),
            discovery.clone(),
            config.sync.request_timeout,
        );
        let (mut sync_channel, sync) = SyncChannel::new(
            config.sync.clone(),
            registry.clone(),
            handler,
            &breakers,
            dispatcher.subscribe(),
            discovery.subscribe(),
        );

        let backend = if config.sync.is_enabled() {
            match BackendClient::new(&config.sync, config.pool.clone(), &breakers) {
                Ok(client) => Some(Arc::new(client)),
                Err(e) => {
                    warn!(error = %e, "Backend REST client unavailable, channel-only mode");
                    None
                }
            }
        } else {
            None
        };
        if let Some(client) = &backend {
            sync_channel = sync_channel.with_backend(client.clone());
        }

        let hc = &config.health;
        let health = Arc::new(
            HealthMonitor::new(hc.clone())
                .with_check(Arc::new(MemoryCheck::new(hc.memory_warn_percent, hc.memory_fail_percent)))
                .with_check(Arc::new(DiskCheck::new(
                    config.data_root.clone(),
                    hc.disk_warn_percent,
                    hc.disk_fail_percent,
                )))
                .with_check(Arc::new(SyncChannelCheck::new(sync.clone())))
                .with_check(Arc::new(PrinterCheck::new(
                    registry.clone(),
                    Some(usb.clone()),
                    PRINTER_PROBE_TIMEOUT,
                )))
                .with_check(Arc::new(TaskCheck::new(tasks.monitor())))
                .with_recovery(Arc::new(AgentRecovery {
                    discovery: discovery.clone(),
                    sync: sync.clone(),
                }))
                .with_store(store.clone())
                .with_lifecycle(lifecycle.clone()),
        );

        info!(
            data_root = %config.data_root.display(),
            sync_enabled = config.sync.is_enabled(),
            checks = ?health.check_names(),
            "Agent state initialized"
        );

        let state = AgentState {
            rate_limiter: RateLimiter::new(config.rate_limit.clone()),
            config,
            store,
            registry,
            discovery,
            usb,
            dispatcher,
            breakers,
            health,
            sync,
            backend,
            lifecycle,
            started_at: shared::util::now_millis(),
        };
        Ok(Bootstrap {
            state,
            tasks,
            sync_channel,
            device_dir: deps.device_dir,
        })
    }

    pub fn uptime(&self) -> Duration {
        self.health.uptime()
    }
}

/// Recovery actions the health monitor may trigger
pub struct AgentRecovery {
    discovery: Arc<DiscoveryEngine>,
    sync: SyncHandle,
}

#[async_trait]
impl RecoveryHandler for AgentRecovery {
    async fn recover(&self, action: RecoveryAction) -> std::result::Result<String, AppError> {
        match action {
            RecoveryAction::ClearDiscoveryCache => {
                self.discovery.clear_cache();
                Ok("discovery cache cleared".into())
            }
            RecoveryAction::ReconnectSyncChannel => {
                if !self.sync.is_enabled() {
                    return Ok("sync disabled, nothing to reconnect".into());
                }
                self.sync.request_reconnect();
                Ok("sync channel reconnect requested".into())
            }
            RecoveryAction::RescanPrinters => {
                self.discovery.request_run();
                Ok("printer rescan requested".into())
            }
        }
    }
}
