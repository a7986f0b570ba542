#![allow(dead_code)]
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;
use std::time::Duration;

use biod_core::CoordinatorConfig;
use biod_core::CoordinatorHandle;
use biod_core::DeathNotice;
use biod_core::DriverError;
use biod_core::DriverRegistry;
use biod_core::MemoryTemplateStore;
use biod_core::SensorDriver;
use biod_core::SessionCoordinator;
use biod_protocol::CallerHandle;
use biod_protocol::SubjectId;
use biod_protocol::TemplateId;

/// One driver call observed by the mock, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverCall {
    PreEnroll,
    BeginEnroll { token: u64, subject: SubjectId },
    CancelEnroll,
    BeginAuthenticate { op_id: u64, subject: SubjectId },
    CancelAuthenticate,
    Remove { template_id: TemplateId, subject: SubjectId },
    SetActiveSubject { subject: SubjectId },
    GetAuthenticatorId,
}

/// Records every call; optionally rejects them all with a fixed status.
#[derive(Default)]
pub struct MockDriver {
    calls: Mutex<Vec<DriverCall>>,
    reject_status: Mutex<Option<i32>>,
}

impl MockDriver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reject_with(&self, status: i32) {
        *self.reject_status.lock().unwrap() = Some(status);
    }

    pub fn accept(&self) {
        *self.reject_status.lock().unwrap() = None;
    }

    pub fn calls(&self) -> Vec<DriverCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count_matching(&self, matches: impl Fn(&DriverCall) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| matches(c)).count()
    }

    fn record(&self, call: DriverCall) -> Result<(), DriverError> {
        self.calls.lock().unwrap().push(call);
        match *self.reject_status.lock().unwrap() {
            Some(status) => Err(DriverError::Rejected(status)),
            None => Ok(()),
        }
    }
}

impl SensorDriver for MockDriver {
    fn pre_enroll(&self) -> Result<u64, DriverError> {
        self.record(DriverCall::PreEnroll)?;
        Ok(0x5eed)
    }

    fn begin_enroll(
        &self,
        token: u64,
        subject: SubjectId,
        _timeout: Duration,
    ) -> Result<(), DriverError> {
        self.record(DriverCall::BeginEnroll { token, subject })
    }

    fn cancel_enroll(&self) -> Result<(), DriverError> {
        self.record(DriverCall::CancelEnroll)
    }

    fn begin_authenticate(&self, op_id: u64, subject: SubjectId) -> Result<(), DriverError> {
        self.record(DriverCall::BeginAuthenticate { op_id, subject })
    }

    fn cancel_authenticate(&self) -> Result<(), DriverError> {
        self.record(DriverCall::CancelAuthenticate)
    }

    fn remove(&self, template_id: TemplateId, subject: SubjectId) -> Result<(), DriverError> {
        self.record(DriverCall::Remove {
            template_id,
            subject,
        })
    }

    fn set_active_subject(
        &self,
        subject: SubjectId,
        _storage_path: &Path,
    ) -> Result<(), DriverError> {
        self.record(DriverCall::SetActiveSubject { subject })
    }

    fn get_authenticator_id(&self) -> Result<u64, DriverError> {
        self.record(DriverCall::GetAuthenticatorId)?;
        Ok(0xb10d)
    }
}

/// Registry that hands out an optional mock driver and keeps the death
/// notice so tests can simulate the driver process dying.
pub struct MockRegistry {
    driver: Mutex<Option<Arc<MockDriver>>>,
    death: Mutex<Option<DeathNotice>>,
    connects: AtomicU32,
}

impl MockRegistry {
    pub fn with_driver(driver: Arc<MockDriver>) -> Arc<Self> {
        Arc::new(Self {
            driver: Mutex::new(Some(driver)),
            death: Mutex::new(None),
            connects: AtomicU32::new(0),
        })
    }

    pub fn unavailable() -> Arc<Self> {
        Arc::new(Self {
            driver: Mutex::new(None),
            death: Mutex::new(None),
            connects: AtomicU32::new(0),
        })
    }

    pub fn connect_count(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }

    /// Fire the death notice captured at the last successful connect.
    pub fn kill_driver(&self) {
        if let Some(death) = self.death.lock().unwrap().take() {
            death.notify();
        }
    }
}

impl DriverRegistry for MockRegistry {
    fn connect(&self, death: DeathNotice) -> Option<Arc<dyn SensorDriver>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let driver = self.driver.lock().unwrap().clone()?;
        *self.death.lock().unwrap() = Some(death);
        Some(driver)
    }
}

pub struct Harness {
    pub handle: CoordinatorHandle,
    pub driver: Arc<MockDriver>,
    pub registry: Arc<MockRegistry>,
    pub store: Arc<MemoryTemplateStore>,
}

impl Harness {
    pub fn spawn() -> Self {
        Self::spawn_with_config(CoordinatorConfig::default())
    }

    pub fn spawn_with_config(config: CoordinatorConfig) -> Self {
        let driver = MockDriver::new();
        let registry = MockRegistry::with_driver(driver.clone());
        let store = Arc::new(MemoryTemplateStore::new());
        let handle = SessionCoordinator::spawn(config, registry.clone(), store.clone());
        Self {
            handle,
            driver,
            registry,
            store,
        }
    }

    pub fn spawn_without_driver() -> Self {
        let driver = MockDriver::new();
        let registry = MockRegistry::unavailable();
        let store = Arc::new(MemoryTemplateStore::new());
        let handle =
            SessionCoordinator::spawn(CoordinatorConfig::default(), registry.clone(), store.clone());
        Self {
            handle,
            driver,
            registry,
            store,
        }
    }

    /// Round-trip through the serial queue so every previously submitted
    /// command has been processed when this returns.
    pub async fn barrier(&self) {
        self.handle
            .enrolled_templates(CallerHandle::new(), SubjectId(u32::MAX))
            .await
            .expect("coordinator should be running");
    }

    /// Let spawned watcher tasks (death watches) run and their posted
    /// commands drain.
    pub async fn settle(&self) {
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
        self.barrier().await;
    }
}
