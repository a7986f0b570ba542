mod protocol;

pub use protocol::CallerHandle;
pub use protocol::OperationKind;
pub use protocol::SensorError;
pub use protocol::SensorEvent;
pub use protocol::SessionEvent;
pub use protocol::SubjectId;
pub use protocol::TemplateId;
