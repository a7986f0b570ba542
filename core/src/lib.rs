//! Session coordination for a single biometric sensor.
//!
//! One worker task arbitrates the sensor between the three
//! mutually-exclusive operation kinds (enroll, authenticate, remove),
//! routes asynchronous driver events to the active session of the
//! matching kind, and enforces the failed-attempt lockout policy.

mod config;
mod coordinator;
mod dispatch;
mod driver;
mod error;
mod lockout;
mod policy;
mod session;
mod store;

pub use config::CoordinatorConfig;
pub use coordinator::CoordinatorHandle;
pub use coordinator::SessionCoordinator;
pub use driver::DeathNotice;
pub use driver::DriverError;
pub use driver::DriverRegistry;
pub use driver::SensorDriver;
pub use error::CoordinatorError;
pub use error::Result;
pub use policy::AccessPolicy;
pub use policy::AllowAll;
pub use policy::Capability;
pub use store::MemoryTemplateStore;
pub use store::TemplateStore;
