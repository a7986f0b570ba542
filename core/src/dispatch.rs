//! Routing of asynchronous sensor events to the active sessions.
//!
//! Each event type has one entry point, runs on the coordinator worker,
//! and applies that event's terminal/continuation rule. A terminal result
//! tears the session down exactly once; events with no matching active
//! session are dropped.

use biod_protocol::OperationKind;
use biod_protocol::SensorError;
use biod_protocol::SensorEvent;
use biod_protocol::SubjectId;
use biod_protocol::TemplateId;
use tracing::debug;
use tracing::warn;

use crate::coordinator::CoordinatorWorker;
use crate::driver::log_call_failure;
use crate::lockout::LockoutStatus;

impl CoordinatorWorker {
    pub(crate) fn dispatch_sensor_event(&mut self, event: SensorEvent) {
        match event {
            SensorEvent::Acquired { info } => self.dispatch_acquired(info),
            SensorEvent::EnrollProgress {
                template_id,
                subject: _,
                remaining,
            } => self.dispatch_enroll_progress(template_id, remaining),
            SensorEvent::Authenticated {
                template_id,
                subject,
            } => self.dispatch_authenticated(template_id, subject),
            SensorEvent::Error { code } => self.dispatch_error(code),
            SensorEvent::Removed {
                template_id,
                subject,
            } => self.dispatch_removed(template_id, subject),
            SensorEvent::Enumerate {
                template_ids,
                subjects,
            } => dispatch_enumerate(&template_ids, &subjects),
        }
    }

    /// Image acquisition feedback goes to whichever capture session is
    /// active, enrollment taking priority.
    fn dispatch_acquired(&mut self, info: i32) {
        for kind in [OperationKind::Enroll, OperationKind::Authenticate] {
            if let Some(session) = self.slots.get(kind) {
                if session.notify_acquired(info).is_done() {
                    self.remove_session(kind);
                }
                return;
            }
        }
        debug!("acquired event with no active capture session");
    }

    fn dispatch_enroll_progress(&mut self, template_id: TemplateId, remaining: u32) {
        let Some(session) = self.slots.get(OperationKind::Enroll) else {
            debug!("enroll progress with no active enrollment");
            return;
        };
        // New templates are recorded under the enrolling session's
        // subject, not whatever scope the driver echoed back.
        let scope = session.subject;
        let status = session.notify_enroll_progress(template_id, remaining);
        if status.is_done() {
            if remaining == 0 {
                self.store.add(scope, template_id);
            }
            self.remove_session(OperationKind::Enroll);
        }
    }

    /// Authentication results are always terminal. The lockout tracker is
    /// fed before teardown: a match resets it, a non-match records the
    /// failure and — once over the threshold — injects a lockout error on
    /// top of the normal result.
    fn dispatch_authenticated(&mut self, template_id: TemplateId, subject: SubjectId) {
        let Some(session) = self.slots.get(OperationKind::Authenticate) else {
            debug!("authentication result with no active session");
            return;
        };
        session.notify_authenticated(template_id, subject);

        if template_id.is_sentinel() {
            if self.lockout.record_failure() == LockoutStatus::LockoutEntered
                && let Some(session) = self.slots.get(OperationKind::Authenticate)
            {
                session.notify_error(SensorError::Lockout);
            }
        } else {
            self.lockout.record_success();
        }

        self.best_effort_driver_cancel(OperationKind::Authenticate);
        self.remove_session(OperationKind::Authenticate);
    }

    /// Driver errors probe enroll, then authenticate, then remove — a
    /// fixed, tie-break-significant order — and stop at the first active
    /// session. Errors always terminate that session.
    fn dispatch_error(&mut self, code: SensorError) {
        for kind in [
            OperationKind::Enroll,
            OperationKind::Authenticate,
            OperationKind::Remove,
        ] {
            if let Some(session) = self.slots.get(kind) {
                session.notify_error(code);
                self.best_effort_driver_cancel(kind);
                self.remove_session(kind);
                return;
            }
        }
        debug!(%code, "sensor error with no active session");
    }

    fn dispatch_removed(&mut self, template_id: TemplateId, subject: SubjectId) {
        let Some(session) = self.slots.get(OperationKind::Remove) else {
            debug!("removal confirmation with no active remove session");
            return;
        };
        // Each confirmed removal is recorded before the terminal rule is
        // evaluated; the sentinel id only signals that the request
        // drained. Bookkeeping is scoped to the removing session's
        // subject.
        if !template_id.is_sentinel() {
            self.store.remove(session.subject, template_id);
        }
        if session.notify_removed(template_id, subject).is_done() {
            self.remove_session(OperationKind::Remove);
        }
    }

    /// Abandon the driver-side operation backing a session that just
    /// resolved. The teardown itself must not depend on this succeeding.
    fn best_effort_driver_cancel(&mut self, kind: OperationKind) {
        let Some(driver) = self.driver_handle() else {
            warn!(%kind, "cannot reach driver to cancel resolved operation");
            return;
        };
        let result = match kind {
            OperationKind::Enroll => driver.cancel_enroll(),
            OperationKind::Authenticate => driver.cancel_authenticate(),
            // Removal has no driver-side cancel.
            OperationKind::Remove => return,
        };
        if let Err(err) = result {
            match kind {
                OperationKind::Enroll => log_call_failure("cancel_enroll", &err),
                OperationKind::Authenticate => log_call_failure("cancel_authenticate", &err),
                OperationKind::Remove => {}
            }
        }
    }
}

fn dispatch_enumerate(template_ids: &[TemplateId], subjects: &[SubjectId]) {
    if template_ids.len() != subjects.len() {
        warn!(
            templates = template_ids.len(),
            subjects = subjects.len(),
            "enumerate arrays differ in length"
        );
        return;
    }
    debug!(count = template_ids.len(), "driver enumerated templates");
    // TODO: reconcile the enumerated templates with the store.
}
