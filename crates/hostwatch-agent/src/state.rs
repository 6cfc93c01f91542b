use crate::config::AgentConfig;
use crate::reporter::Reporter;
use hostwatch_common::audit::AuditLog;
use hostwatch_exec::JobManager;
use hostwatch_probe::Probe;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

/// Everything the handlers and background tasks share.
pub struct AgentContext {
    pub config: Mutex<AgentConfig>,
    pub config_path: PathBuf,
    pub probe: Probe,
    pub jobs: JobManager,
    pub reporter: Arc<Reporter>,
    pub audit: Arc<AuditLog>,
    shutdown: watch::Sender<bool>,
}

impl AgentContext {
    pub fn new(
        config: AgentConfig,
        config_path: PathBuf,
        shutdown: watch::Sender<bool>,
    ) -> Arc<Self> {
        let audit = Arc::new(AuditLog::new(
            config.audit_path(),
            config.audit_log_enabled,
        ));
        Arc::new(Self {
            probe: Probe::new(),
            jobs: JobManager::new(Arc::clone(&audit)),
            reporter: Arc::new(Reporter::new()),
            audit,
            config: Mutex::new(config),
            config_path,
            shutdown,
        })
    }

    pub fn scripts_dir(&self) -> PathBuf {
        self.config.lock().unwrap().scripts_path()
    }

    /// Flip the shared running flag; every loop observes it at its head and
    /// the HTTP endpoint finishes in-flight requests before exiting.
    pub fn request_shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }
}
