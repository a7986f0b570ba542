//! The session coordinator: a single worker task that owns the three
//! exclusive session slots, the lockout tracker, and the driver
//! connection.
//!
//! Uses a submission-queue pattern: caller requests, driver events, death
//! notices, and the lockout timer all arrive as [`Command`]s on one
//! channel and are processed strictly in order. That serialization is the
//! whole concurrency story — no locks guard the slots or the lockout
//! state.

use std::path::PathBuf;
use std::sync::Arc;

use biod_protocol::CallerHandle;
use biod_protocol::OperationKind;
use biod_protocol::SensorError;
use biod_protocol::SensorEvent;
use biod_protocol::SessionEvent;
use biod_protocol::SubjectId;
use biod_protocol::TemplateId;
use tokio::sync::mpsc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::oneshot;
use tracing::debug;
use tracing::warn;

use crate::config::CoordinatorConfig;
use crate::driver::DeathNotice;
use crate::driver::DriverConnection;
use crate::driver::DriverError;
use crate::driver::DriverRegistry;
use crate::driver::SensorDriver;
use crate::driver::log_call_failure;
use crate::error::CoordinatorError;
use crate::error::Result;
use crate::lockout::LockoutTracker;
use crate::policy::AccessPolicy;
use crate::policy::AllowAll;
use crate::policy::Capability;
use crate::session::Session;
use crate::store::TemplateStore;

/// Submission queue entry. Everything that can touch coordinator state
/// becomes one of these.
#[derive(Debug)]
pub(crate) enum Command {
    StartEnroll {
        caller: CallerHandle,
        token: u64,
        subject: SubjectId,
        sink: UnboundedSender<SessionEvent>,
    },
    CancelEnroll {
        caller: CallerHandle,
    },
    StartAuthenticate {
        caller: CallerHandle,
        op_id: u64,
        subject: SubjectId,
        sink: UnboundedSender<SessionEvent>,
    },
    CancelAuthenticate {
        caller: CallerHandle,
    },
    StartRemove {
        caller: CallerHandle,
        template_id: TemplateId,
        subject: SubjectId,
        sink: UnboundedSender<SessionEvent>,
    },
    PreEnroll {
        reply: oneshot::Sender<Result<u64>>,
    },
    AuthenticatorId {
        reply: oneshot::Sender<Result<u64>>,
    },
    DriverAvailable {
        reply: oneshot::Sender<bool>,
    },
    EnrolledTemplates {
        subject: SubjectId,
        reply: oneshot::Sender<Vec<(TemplateId, String)>>,
    },
    RenameTemplate {
        subject: SubjectId,
        template_id: TemplateId,
        label: String,
    },
    SetActiveSubject {
        subject: SubjectId,
        storage_path: PathBuf,
    },
    /// Asynchronous event from the sensor driver.
    Sensor(SensorEvent),
    /// The caller that owned the active session of `kind` went away.
    CallerGone {
        kind: OperationKind,
        caller: CallerHandle,
    },
    /// The armed lockout reset timer elapsed.
    LockoutTimerFired,
    /// The driver process died; drop the cached handle.
    DriverGone,
    Shutdown,
}

/// Arena of the three exclusive slots, keyed by kind. Replacing a session
/// is always explicit teardown-then-insert, never an overwrite.
#[derive(Default)]
pub(crate) struct SessionSlots {
    enroll: Option<Session>,
    authenticate: Option<Session>,
    remove: Option<Session>,
}

impl SessionSlots {
    fn slot_mut(&mut self, kind: OperationKind) -> &mut Option<Session> {
        match kind {
            OperationKind::Enroll => &mut self.enroll,
            OperationKind::Authenticate => &mut self.authenticate,
            OperationKind::Remove => &mut self.remove,
        }
    }

    pub(crate) fn get(&self, kind: OperationKind) -> Option<&Session> {
        match kind {
            OperationKind::Enroll => self.enroll.as_ref(),
            OperationKind::Authenticate => self.authenticate.as_ref(),
            OperationKind::Remove => self.remove.as_ref(),
        }
    }

    fn insert(&mut self, session: Session) {
        let slot = self.slot_mut(session.kind);
        debug_assert!(slot.is_none(), "session slot must be empty on insert");
        *slot = Some(session);
    }

    fn take(&mut self, kind: OperationKind) -> Option<Session> {
        self.slot_mut(kind).take()
    }
}

pub struct SessionCoordinator;

impl SessionCoordinator {
    pub fn spawn(
        config: CoordinatorConfig,
        registry: Arc<dyn DriverRegistry>,
        store: Arc<dyn TemplateStore>,
    ) -> CoordinatorHandle {
        Self::spawn_with_policy(config, registry, store, Arc::new(AllowAll))
    }

    pub fn spawn_with_policy(
        config: CoordinatorConfig,
        registry: Arc<dyn DriverRegistry>,
        store: Arc<dyn TemplateStore>,
        policy: Arc<dyn AccessPolicy>,
    ) -> CoordinatorHandle {
        let (commands, rx) = mpsc::unbounded_channel();
        let worker = CoordinatorWorker {
            lockout: LockoutTracker::new(
                config.max_failed_attempts,
                config.lockout_duration,
                commands.clone(),
            ),
            config,
            slots: SessionSlots::default(),
            driver: DriverConnection::new(registry),
            store,
            commands: commands.clone(),
        };
        tokio::spawn(worker.run(rx));
        CoordinatorHandle { commands, policy }
    }
}

/// Caller-side handle to the coordinator. Cloneable; all methods enqueue
/// onto the serial queue after the capability check.
#[derive(Clone)]
pub struct CoordinatorHandle {
    commands: UnboundedSender<Command>,
    policy: Arc<dyn AccessPolicy>,
}

impl CoordinatorHandle {
    /// Start enrolling a new template for `subject`. Events for the new
    /// session arrive on the returned receiver; dropping it counts as the
    /// caller going away.
    pub fn start_enroll(
        &self,
        caller: CallerHandle,
        token: u64,
        subject: SubjectId,
    ) -> Result<UnboundedReceiver<SessionEvent>> {
        self.check(caller, Capability::ManageSensor, "enroll")?;
        let (sink, events) = mpsc::unbounded_channel();
        self.submit(Command::StartEnroll {
            caller,
            token,
            subject,
            sink,
        })?;
        Ok(events)
    }

    pub fn cancel_enroll(&self, caller: CallerHandle) -> Result<()> {
        self.check(caller, Capability::ManageSensor, "cancel enrollment")?;
        self.submit(Command::CancelEnroll { caller })
    }

    pub fn start_authenticate(
        &self,
        caller: CallerHandle,
        op_id: u64,
        subject: SubjectId,
    ) -> Result<UnboundedReceiver<SessionEvent>> {
        self.check(caller, Capability::UseSensor, "authenticate")?;
        let (sink, events) = mpsc::unbounded_channel();
        self.submit(Command::StartAuthenticate {
            caller,
            op_id,
            subject,
            sink,
        })?;
        Ok(events)
    }

    pub fn cancel_authenticate(&self, caller: CallerHandle) -> Result<()> {
        self.check(caller, Capability::UseSensor, "cancel authentication")?;
        self.submit(Command::CancelAuthenticate { caller })
    }

    /// Remove `template_id` for `subject`; the sentinel id removes all of
    /// the subject's templates. Never preempts enroll/authenticate.
    pub fn start_remove(
        &self,
        caller: CallerHandle,
        template_id: TemplateId,
        subject: SubjectId,
    ) -> Result<UnboundedReceiver<SessionEvent>> {
        self.check(caller, Capability::ManageSensor, "remove templates")?;
        let (sink, events) = mpsc::unbounded_channel();
        self.submit(Command::StartRemove {
            caller,
            template_id,
            subject,
            sink,
        })?;
        Ok(events)
    }

    /// Ask the driver for an enrollment challenge token.
    pub async fn pre_enroll(&self, caller: CallerHandle) -> Result<u64> {
        self.check(caller, Capability::ManageSensor, "pre-enroll")?;
        let (reply, rx) = oneshot::channel();
        self.submit(Command::PreEnroll { reply })?;
        rx.await.map_err(|_| CoordinatorError::CoordinatorGone)?
    }

    pub async fn authenticator_id(&self, caller: CallerHandle) -> Result<u64> {
        self.check(caller, Capability::UseSensor, "query authenticator id")?;
        let (reply, rx) = oneshot::channel();
        self.submit(Command::AuthenticatorId { reply })?;
        rx.await.map_err(|_| CoordinatorError::CoordinatorGone)?
    }

    /// Whether the sensor driver can currently be reached. Reflects the
    /// lazy acquire: after a driver death this reports `false` until the
    /// registry hands out a new handle.
    pub async fn driver_available(&self, caller: CallerHandle) -> Result<bool> {
        self.check(caller, Capability::UseSensor, "query driver availability")?;
        let (reply, rx) = oneshot::channel();
        self.submit(Command::DriverAvailable { reply })?;
        rx.await.map_err(|_| CoordinatorError::CoordinatorGone)
    }

    pub async fn enrolled_templates(
        &self,
        caller: CallerHandle,
        subject: SubjectId,
    ) -> Result<Vec<(TemplateId, String)>> {
        self.check(caller, Capability::UseSensor, "list templates")?;
        let (reply, rx) = oneshot::channel();
        self.submit(Command::EnrolledTemplates { subject, reply })?;
        rx.await.map_err(|_| CoordinatorError::CoordinatorGone)
    }

    pub async fn has_enrolled_templates(
        &self,
        caller: CallerHandle,
        subject: SubjectId,
    ) -> Result<bool> {
        Ok(!self.enrolled_templates(caller, subject).await?.is_empty())
    }

    pub fn rename_template(
        &self,
        caller: CallerHandle,
        subject: SubjectId,
        template_id: TemplateId,
        label: String,
    ) -> Result<()> {
        self.check(caller, Capability::ManageSensor, "rename template")?;
        self.submit(Command::RenameTemplate {
            subject,
            template_id,
            label,
        })
    }

    /// Lifecycle hook: the active subject changed. Creating and labeling
    /// `storage_path` is the caller's responsibility.
    pub fn set_active_subject(&self, subject: SubjectId, storage_path: PathBuf) -> Result<()> {
        self.submit(Command::SetActiveSubject {
            subject,
            storage_path,
        })
    }

    /// Ingress point for asynchronous driver events.
    pub fn sensor_event(&self, event: SensorEvent) -> Result<()> {
        self.submit(Command::Sensor(event))
    }

    pub fn shutdown(&self) -> Result<()> {
        self.submit(Command::Shutdown)
    }

    fn check(
        &self,
        caller: CallerHandle,
        capability: Capability,
        what: &'static str,
    ) -> Result<()> {
        if self.policy.allows(caller, capability) {
            Ok(())
        } else {
            Err(CoordinatorError::PermissionDenied(what))
        }
    }

    fn submit(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| CoordinatorError::CoordinatorGone)
    }
}

pub(crate) struct CoordinatorWorker {
    pub(crate) config: CoordinatorConfig,
    pub(crate) slots: SessionSlots,
    pub(crate) lockout: LockoutTracker,
    pub(crate) driver: DriverConnection,
    pub(crate) store: Arc<dyn TemplateStore>,
    /// Clone of the queue's sender, handed to death watchers and the
    /// lockout timer so their signals funnel back through the queue.
    pub(crate) commands: UnboundedSender<Command>,
}

impl CoordinatorWorker {
    async fn run(mut self, mut rx: UnboundedReceiver<Command>) {
        while let Some(command) = rx.recv().await {
            if matches!(command, Command::Shutdown) {
                debug!("session coordinator shutting down");
                break;
            }
            self.handle_command(command);
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::StartEnroll {
                caller,
                token,
                subject,
                sink,
            } => self.start_enroll(caller, token, subject, sink),
            Command::CancelEnroll { caller } => self.stop_enrollment(caller, true),
            Command::StartAuthenticate {
                caller,
                op_id,
                subject,
                sink,
            } => self.start_authenticate(caller, op_id, subject, sink),
            Command::CancelAuthenticate { caller } => self.stop_authentication(caller, true),
            Command::StartRemove {
                caller,
                template_id,
                subject,
                sink,
            } => self.start_remove(caller, template_id, subject, sink),
            Command::PreEnroll { reply } => {
                let _ = reply.send(self.pre_enroll());
            }
            Command::AuthenticatorId { reply } => {
                let _ = reply.send(self.authenticator_id());
            }
            Command::DriverAvailable { reply } => {
                let _ = reply.send(self.driver_handle().is_some());
            }
            Command::EnrolledTemplates { subject, reply } => {
                let _ = reply.send(self.store.list(subject));
            }
            Command::RenameTemplate {
                subject,
                template_id,
                label,
            } => self.store.rename(subject, template_id, label),
            Command::SetActiveSubject {
                subject,
                storage_path,
            } => self.set_active_subject(subject, &storage_path),
            Command::Sensor(event) => self.dispatch_sensor_event(event),
            Command::CallerGone { kind, caller } => self.handle_caller_gone(kind, caller),
            Command::LockoutTimerFired => self.lockout.handle_timer_fired(),
            Command::DriverGone => self.driver.invalidate(),
            Command::Shutdown => unreachable!("handled by the run loop"),
        }
    }

    pub(crate) fn driver_handle(&mut self) -> Option<Arc<dyn SensorDriver>> {
        let death = DeathNotice::new(self.commands.clone());
        self.driver.get(&death)
    }

    fn start_enroll(
        &mut self,
        caller: CallerHandle,
        token: u64,
        subject: SubjectId,
        sink: UnboundedSender<SessionEvent>,
    ) {
        let Some(driver) = self.driver_handle() else {
            warn!("start_enroll: sensor driver unavailable");
            return;
        };
        self.stop_pending();
        self.register_session(Session::new(OperationKind::Enroll, caller, subject, sink));
        if let Err(err) = driver.begin_enroll(token, subject, self.config.enroll_timeout) {
            // TODO: tear the session down here once callers are migrated
            // to expect a rejected start to resolve immediately. Today it
            // stays registered (the sensor never armed) and the caller
            // must cancel.
            log_call_failure("begin_enroll", &err);
        }
    }

    fn start_authenticate(
        &mut self,
        caller: CallerHandle,
        op_id: u64,
        subject: SubjectId,
        sink: UnboundedSender<SessionEvent>,
    ) {
        let Some(driver) = self.driver_handle() else {
            warn!("start_authenticate: sensor driver unavailable");
            return;
        };
        self.stop_pending();
        self.register_session(Session::new(
            OperationKind::Authenticate,
            caller,
            subject,
            sink,
        ));
        if self.lockout.is_locked() {
            warn!(
                until = ?self.lockout.locked_until(),
                "in lockout mode; disallowing authentication"
            );
            if let Some(session) = self.slots.get(OperationKind::Authenticate) {
                session.notify_error(SensorError::Lockout);
            }
            self.remove_session(OperationKind::Authenticate);
            return;
        }
        if let Err(err) = driver.begin_authenticate(op_id, subject) {
            log_call_failure("begin_authenticate", &err);
        }
    }

    fn start_remove(
        &mut self,
        caller: CallerHandle,
        template_id: TemplateId,
        subject: SubjectId,
        sink: UnboundedSender<SessionEvent>,
    ) {
        let Some(driver) = self.driver_handle() else {
            warn!("start_remove: sensor driver unavailable");
            return;
        };
        // Removal never preempts enroll/authenticate and is never
        // preempted by them. It does replace an earlier remove session,
        // which is torn down like any other superseded session.
        if let Some(session) = self.slots.get(OperationKind::Remove) {
            session.notify_error(SensorError::Canceled);
            self.remove_session(OperationKind::Remove);
        }
        self.register_session(Session::new(OperationKind::Remove, caller, subject, sink));
        // Template bookkeeping happens when the driver confirms each
        // removal, not here.
        if let Err(err) = driver.remove(template_id, subject) {
            log_call_failure("remove", &err);
        }
    }

    /// Cancel whichever of enroll/authenticate is in flight before a new
    /// one takes the sensor. The superseded session gets a `Canceled`
    /// error, same as an explicit cancel.
    fn stop_pending(&mut self) {
        if let Some(owner) = self.slots.get(OperationKind::Enroll).map(|s| s.caller) {
            self.stop_enrollment(owner, true);
        }
        if let Some(owner) = self.slots.get(OperationKind::Authenticate).map(|s| s.caller) {
            self.stop_authentication(owner, true);
        }
        // The remove session, if any, is allowed to continue.
    }

    pub(crate) fn stop_enrollment(&mut self, caller: CallerHandle, notify: bool) {
        let Some(owner) = self.slots.get(OperationKind::Enroll).map(|s| s.caller) else {
            return;
        };
        if owner != caller {
            debug!("stop_enrollment: caller does not own the active session");
            return;
        }
        let Some(driver) = self.driver_handle() else {
            warn!("stop_enrollment: sensor driver unavailable");
            return;
        };
        if let Err(err) = driver.cancel_enroll() {
            log_call_failure("cancel_enroll", &err);
        }
        if notify
            && let Some(session) = self.slots.get(OperationKind::Enroll)
        {
            session.notify_error(SensorError::Canceled);
        }
        self.remove_session(OperationKind::Enroll);
    }

    pub(crate) fn stop_authentication(&mut self, caller: CallerHandle, notify: bool) {
        let Some(owner) = self.slots.get(OperationKind::Authenticate).map(|s| s.caller) else {
            return;
        };
        if owner != caller {
            debug!("stop_authentication: caller does not own the active session");
            return;
        }
        let Some(driver) = self.driver_handle() else {
            warn!("stop_authentication: sensor driver unavailable");
            return;
        };
        if let Err(err) = driver.cancel_authenticate() {
            log_call_failure("cancel_authenticate", &err);
        }
        if notify
            && let Some(session) = self.slots.get(OperationKind::Authenticate)
        {
            session.notify_error(SensorError::Canceled);
        }
        self.remove_session(OperationKind::Authenticate);
    }

    /// Insert the session into its slot and register the caller's death
    /// watch: a task that waits for the sink's receiver to drop and posts
    /// `CallerGone` back onto the queue.
    fn register_session(&mut self, mut session: Session) {
        let kind = session.kind;
        let caller = session.caller;
        if let Some(sink) = session.watch_sink() {
            let commands = self.commands.clone();
            let watcher = tokio::spawn(async move {
                sink.closed().await;
                let _ = commands.send(Command::CallerGone { kind, caller });
            });
            session.set_death_watch(watcher.abort_handle());
        }
        self.slots.insert(session);
    }

    fn handle_caller_gone(&mut self, kind: OperationKind, caller: CallerHandle) {
        let Some(owner) = self.slots.get(kind).map(|s| s.caller) else {
            return;
        };
        if owner != caller {
            debug!(%kind, "stale death notice for a replaced session");
            return;
        }
        // Silent teardown: the peer is gone, nobody to notify.
        debug!(%kind, %caller, "caller went away; tearing down session");
        self.remove_session(kind);
    }

    /// Clear the slot and release the caller binding. Idempotent.
    pub(crate) fn remove_session(&mut self, kind: OperationKind) {
        if let Some(mut session) = self.slots.take(kind) {
            session.destroy();
        }
    }

    fn pre_enroll(&mut self) -> Result<u64> {
        let Some(driver) = self.driver_handle() else {
            return Err(CoordinatorError::DriverUnavailable);
        };
        driver.pre_enroll().map_err(|err| {
            log_call_failure("pre_enroll", &err);
            into_coordinator_error("pre_enroll", err)
        })
    }

    fn authenticator_id(&mut self) -> Result<u64> {
        let Some(driver) = self.driver_handle() else {
            return Err(CoordinatorError::DriverUnavailable);
        };
        driver.get_authenticator_id().map_err(|err| {
            log_call_failure("get_authenticator_id", &err);
            into_coordinator_error("get_authenticator_id", err)
        })
    }

    fn set_active_subject(&mut self, subject: SubjectId, storage_path: &std::path::Path) {
        let Some(driver) = self.driver_handle() else {
            warn!("set_active_subject: sensor driver unavailable");
            return;
        };
        if let Err(err) = driver.set_active_subject(subject, storage_path) {
            log_call_failure("set_active_subject", &err);
        }
    }
}

fn into_coordinator_error(call: &'static str, err: DriverError) -> CoordinatorError {
    match err {
        DriverError::Rejected(status) => CoordinatorError::rejected(call, status),
        DriverError::Transport(_) => CoordinatorError::DriverUnavailable,
    }
}
