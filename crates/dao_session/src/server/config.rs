use std::time::Duration;

/// Settings captured by every session at construction.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Log reported errors at `warn` level (otherwise `debug`).
    pub log_errors: bool,

    /// Server-driven heartbeat. Disabled when `None`.
    pub heartbeat: Option<HeartbeatConfig>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            log_errors: true,
            heartbeat: None,
        }
    }
}

impl SessionSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set whether reported errors are logged at `warn` level.
    pub fn with_log_errors(mut self, log_errors: bool) -> Self {
        self.log_errors = log_errors;
        self
    }

    /// Enable the heartbeat connection monitor.
    pub fn with_heartbeat(mut self, heartbeat: HeartbeatConfig) -> Self {
        self.heartbeat = Some(heartbeat);
        self
    }
}

/// Configuration for the connection monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// How often a `ping` is written to the client.
    pub interval: Duration,

    /// Close the connection when nothing arrived from the client for this long.
    pub timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            timeout: Duration::from_secs(30),
        }
    }
}

impl HeartbeatConfig {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }
}
