//! Capability checks for caller-facing operations. The actual decision is
//! an external collaborator's; the coordinator only asks.

use biod_protocol::CallerHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// Enroll, remove, rename — operations that change the template set.
    ManageSensor,
    /// Authenticate and query — read-side use of the sensor.
    UseSensor,
}

pub trait AccessPolicy: Send + Sync {
    fn allows(&self, caller: CallerHandle, capability: Capability) -> bool;
}

/// Permissive default for embedders that enforce access upstream.
pub struct AllowAll;

impl AccessPolicy for AllowAll {
    fn allows(&self, _caller: CallerHandle, _capability: Capability) -> bool {
        true
    }
}
