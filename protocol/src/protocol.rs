//! Defines the types shared between callers of the biometric session
//! coordinator, the coordinator itself, and sensor driver integrations.
//!
//! The driver side of the protocol is asynchronous: driver calls return a
//! status immediately and the interesting results arrive later as
//! [`SensorEvent`]s. The caller side receives [`SessionEvent`]s on a
//! per-session result sink.

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use strum_macros::Display;
use uuid::Uuid;

/// The operation category that partitions the coordinator's three exclusive
/// session slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OperationKind {
    Enroll,
    Authenticate,
    Remove,
}

/// User/group scope that owns a set of enrolled templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct SubjectId(pub u32);

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of one enrolled template.
///
/// `0` is reserved: in an [`SensorEvent::Authenticated`] event it means "no
/// match", and in a [`SensorEvent::Removed`] event it is the sentinel for
/// "all templates removed".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct TemplateId(pub u32);

impl TemplateId {
    pub const SENTINEL: TemplateId = TemplateId(0);

    pub fn is_sentinel(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for TemplateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque caller identity. Doubles as the key under which a session's
/// death watch is registered, so a stale caller can never cancel a session
/// it does not own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct CallerHandle(Uuid);

impl CallerHandle {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CallerHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CallerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Error codes reported by the sensor driver or injected by the
/// coordinator (`Canceled`, `Lockout`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Display)]
#[serde(tag = "type", rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SensorError {
    HwUnavailable,
    UnableToProcess,
    Timeout,
    NoSpace,
    Canceled,
    UnableToRemove,
    Lockout,
    /// Vendor-defined code outside the standard range.
    Vendor { code: i32 },
}

/// Asynchronous events emitted by the sensor driver.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SensorEvent {
    /// An image was captured; the operation continues.
    Acquired { info: i32 },

    /// One step of enrollment finished; `remaining == 0` means the new
    /// template is complete.
    EnrollProgress {
        template_id: TemplateId,
        subject: SubjectId,
        remaining: u32,
    },

    /// An authentication attempt resolved. `template_id` is the matched
    /// template, or the sentinel `0` when nothing matched.
    Authenticated {
        template_id: TemplateId,
        subject: SubjectId,
    },

    /// The driver-side operation failed.
    Error { code: SensorError },

    /// One template was removed, or — with the sentinel id — the removal
    /// request has fully drained.
    Removed {
        template_id: TemplateId,
        subject: SubjectId,
    },

    /// The driver enumerated its stored templates. Both arrays are
    /// index-aligned.
    Enumerate {
        template_ids: Vec<TemplateId>,
        subjects: Vec<SubjectId>,
    },
}

/// Events delivered to a session's result sink.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    Acquired {
        info: i32,
    },
    EnrollProgress {
        template_id: TemplateId,
        remaining: u32,
    },
    Authenticated {
        template_id: TemplateId,
        subject: SubjectId,
    },
    Removed {
        template_id: TemplateId,
        subject: SubjectId,
    },
    Error {
        code: SensorError,
    },
}
