//! Work thread configuration.

/// Scheduling hint for the background thread.
///
/// Applied best-effort when the thread starts; a hint the OS refuses (for
/// example `TimeCritical` without the required privileges) degrades to the
/// inherited scheduling class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThreadPriority {
    /// Keep whatever the spawning thread would pass on.
    #[default]
    Inherit,
    /// Above-normal priority for hosts that service many workers.
    Elevated,
    /// Real-time class for work feeding an audio callback directly.
    TimeCritical,
}

/// Construction parameters for a [`WorkThread`](crate::WorkThread).
#[derive(Debug, Clone)]
pub struct WorkThreadConfig {
    /// OS thread name, also used as the logging context.
    pub name: String,
    /// Request queue capacity in bytes, rounded up to a power of two.
    pub request_capacity: usize,
    /// Scheduling hint for the background thread.
    pub priority: ThreadPriority,
}

impl Default for WorkThreadConfig {
    fn default() -> Self {
        Self {
            name: "handoff-work".to_string(),
            request_capacity: 4096,
            priority: ThreadPriority::Inherit,
        }
    }
}
