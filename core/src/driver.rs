//! Connection management for the external sensor driver.
//!
//! The driver is an out-of-process service: calls return a status right
//! away and results arrive later as [`biod_protocol::SensorEvent`]s, so
//! nothing here blocks the coordinator's queue.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use biod_protocol::SubjectId;
use biod_protocol::TemplateId;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;
use tracing::error;
use tracing::warn;

use crate::coordinator::Command;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DriverError {
    /// The driver answered the call with a non-zero status.
    #[error("driver rejected call with status {0}")]
    Rejected(i32),

    /// The call never reached the driver.
    #[error("driver transport failure: {0}")]
    Transport(String),
}

/// Pass-through surface of the sensor driver daemon.
pub trait SensorDriver: Send + Sync {
    fn pre_enroll(&self) -> Result<u64, DriverError>;
    fn begin_enroll(
        &self,
        token: u64,
        subject: SubjectId,
        timeout: Duration,
    ) -> Result<(), DriverError>;
    fn cancel_enroll(&self) -> Result<(), DriverError>;
    fn begin_authenticate(&self, op_id: u64, subject: SubjectId) -> Result<(), DriverError>;
    fn cancel_authenticate(&self) -> Result<(), DriverError>;
    fn remove(&self, template_id: TemplateId, subject: SubjectId) -> Result<(), DriverError>;
    fn set_active_subject(&self, subject: SubjectId, storage_path: &Path)
    -> Result<(), DriverError>;
    fn get_authenticator_id(&self) -> Result<u64, DriverError>;
}

/// Handed to a [`DriverRegistry`] when a driver handle is acquired. A
/// driver integration fires it when the driver process dies; the signal is
/// funneled onto the coordinator queue instead of touching shared state on
/// the notifier's thread.
#[derive(Clone)]
pub struct DeathNotice {
    commands: UnboundedSender<Command>,
}

impl DeathNotice {
    pub(crate) fn new(commands: UnboundedSender<Command>) -> Self {
        Self { commands }
    }

    pub fn notify(&self) {
        // A send failure just means the coordinator is already gone.
        let _ = self.commands.send(Command::DriverGone);
    }
}

/// External acquisition point for the driver handle.
pub trait DriverRegistry: Send + Sync {
    /// Attempt to connect to the driver. On success the registry must
    /// arrange for `death` to fire if the driver later dies.
    fn connect(&self, death: DeathNotice) -> Option<Arc<dyn SensorDriver>>;
}

/// Lazily acquired, process-wide driver handle shared by all sessions.
/// Reset to absent on a death notice so the next access re-acquires.
pub(crate) struct DriverConnection {
    registry: Arc<dyn DriverRegistry>,
    cached: Option<Arc<dyn SensorDriver>>,
}

impl DriverConnection {
    pub(crate) fn new(registry: Arc<dyn DriverRegistry>) -> Self {
        Self {
            registry,
            cached: None,
        }
    }

    pub(crate) fn get(&mut self, death: &DeathNotice) -> Option<Arc<dyn SensorDriver>> {
        if self.cached.is_none() {
            match self.registry.connect(death.clone()) {
                Some(driver) => {
                    debug!("acquired sensor driver handle");
                    self.cached = Some(driver);
                }
                None => warn!("sensor driver not available"),
            }
        }
        self.cached.clone()
    }

    pub(crate) fn invalidate(&mut self) {
        debug!("sensor driver died; dropping cached handle");
        self.cached = None;
    }
}

/// Log a failed driver call. Rejections are routine enough for a warning;
/// transport failures mean the driver connection is in trouble.
pub(crate) fn log_call_failure(call: &'static str, err: &DriverError) {
    match err {
        DriverError::Rejected(status) => warn!("{call} rejected by driver, status {status}"),
        DriverError::Transport(_) => error!("{call} failed: {err}"),
    }
}
