use std::time::Duration;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};

use crate::server::config::HeartbeatConfig;

/// What the monitor wants done on a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Beat {
    Ping,
    TimedOut,
}

/// Server-driven liveness check for one connection.
///
/// Any inbound message counts as a sign of life.
pub(crate) struct Monitor {
    interval: Interval,
    timeout: Duration,
    last_seen: Instant,
}

impl Monitor {
    pub fn new(config: HeartbeatConfig) -> Self {
        let now = Instant::now();
        let mut interval = time::interval_at(now + config.interval, config.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            interval,
            timeout: config.timeout,
            last_seen: now,
        }
    }

    pub fn seen(&mut self) {
        self.last_seen = Instant::now();
    }

    pub async fn tick(&mut self) -> Beat {
        self.interval.tick().await;
        if self.last_seen.elapsed() >= self.timeout {
            Beat::TimedOut
        } else {
            Beat::Ping
        }
    }
}

/// Next beat of an optional monitor; never resolves without one.
pub(crate) async fn next_beat(monitor: &mut Option<Monitor>) -> Beat {
    match monitor {
        Some(monitor) => monitor.tick().await,
        None => std::future::pending().await,
    }
}
