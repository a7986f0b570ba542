use std::time::Duration;

/// Tunables for the session coordinator. The defaults match the fixed
/// values the sensor stack has always shipped with; tests shrink the
/// durations.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Consecutive failed authentication attempts tolerated before the
    /// lockout engages. Lockout is entered when the count *exceeds* this.
    pub max_failed_attempts: u32,

    /// How long authentication stays locked after the last over-threshold
    /// failure. Every further failure re-arms the full duration.
    pub lockout_duration: Duration,

    /// Time budget handed to the driver for a single enrollment.
    pub enroll_timeout: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_failed_attempts: 5,
            lockout_duration: Duration::from_secs(30),
            enroll_timeout: Duration::from_secs(60),
        }
    }
}
