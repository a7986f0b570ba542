//! One in-flight sensor operation and its caller binding.

use biod_protocol::CallerHandle;
use biod_protocol::OperationKind;
use biod_protocol::SensorError;
use biod_protocol::SessionEvent;
use biod_protocol::SubjectId;
use biod_protocol::TemplateId;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::AbortHandle;
use tracing::warn;

/// Whether a delivered event was terminal for the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Done,
    Continuing,
}

impl SessionStatus {
    pub fn is_done(self) -> bool {
        matches!(self, SessionStatus::Done)
    }
}

/// A single enroll/authenticate/remove operation bound to one caller.
///
/// The sink is the caller's result channel; once it is gone (explicitly
/// detached or the receiver dropped) every notification resolves as
/// [`SessionStatus::Done`] so the coordinator tears the session down.
pub(crate) struct Session {
    pub(crate) kind: OperationKind,
    pub(crate) caller: CallerHandle,
    pub(crate) subject: SubjectId,
    sink: Option<UnboundedSender<SessionEvent>>,
    death_watch: Option<AbortHandle>,
}

impl Session {
    pub(crate) fn new(
        kind: OperationKind,
        caller: CallerHandle,
        subject: SubjectId,
        sink: UnboundedSender<SessionEvent>,
    ) -> Self {
        Self {
            kind,
            caller,
            subject,
            sink: Some(sink),
            death_watch: None,
        }
    }

    /// Clone of the sink handed to the death watcher. Present until
    /// [`Session::destroy`].
    pub(crate) fn watch_sink(&self) -> Option<UnboundedSender<SessionEvent>> {
        self.sink.clone()
    }

    /// Record the death-watch task spawned when this session was
    /// registered. Aborted exactly once, on [`Session::destroy`].
    pub(crate) fn set_death_watch(&mut self, handle: AbortHandle) {
        self.death_watch = Some(handle);
    }

    /// Release the caller binding. Idempotent.
    pub(crate) fn destroy(&mut self) {
        if let Some(watch) = self.death_watch.take() {
            watch.abort();
        }
        self.sink = None;
    }

    /// Send `event` to the sink. Returns `false` when the caller is no
    /// longer listening (absent sink or dropped receiver).
    fn deliver(&self, event: SessionEvent) -> bool {
        let Some(sink) = &self.sink else {
            return false;
        };
        if sink.send(event).is_err() {
            warn!(kind = %self.kind, caller = %self.caller, "failed to notify session sink");
            return false;
        }
        true
    }

    pub(crate) fn notify_acquired(&self, info: i32) -> SessionStatus {
        if self.deliver(SessionEvent::Acquired { info }) {
            SessionStatus::Continuing
        } else {
            SessionStatus::Done
        }
    }

    pub(crate) fn notify_enroll_progress(
        &self,
        template_id: TemplateId,
        remaining: u32,
    ) -> SessionStatus {
        if !self.deliver(SessionEvent::EnrollProgress {
            template_id,
            remaining,
        }) {
            return SessionStatus::Done;
        }
        if remaining == 0 {
            SessionStatus::Done
        } else {
            SessionStatus::Continuing
        }
    }

    /// Authentication results are terminal whether or not they matched;
    /// the lockout bookkeeping happens in the dispatcher.
    pub(crate) fn notify_authenticated(
        &self,
        template_id: TemplateId,
        subject: SubjectId,
    ) -> SessionStatus {
        self.deliver(SessionEvent::Authenticated {
            template_id,
            subject,
        });
        SessionStatus::Done
    }

    pub(crate) fn notify_removed(
        &self,
        template_id: TemplateId,
        subject: SubjectId,
    ) -> SessionStatus {
        if !self.deliver(SessionEvent::Removed {
            template_id,
            subject,
        }) {
            return SessionStatus::Done;
        }
        if template_id.is_sentinel() {
            SessionStatus::Done
        } else {
            SessionStatus::Continuing
        }
    }

    /// Errors always terminate progress.
    pub(crate) fn notify_error(&self, code: SensorError) -> SessionStatus {
        self.deliver(SessionEvent::Error { code });
        SessionStatus::Done
    }
}
