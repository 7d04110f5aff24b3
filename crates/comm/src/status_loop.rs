#![forbid(unsafe_code)]

use std::time::{Duration, Instant};
use tracing::info;

/// Periodic status task driven by the owning event loop.
///
/// A tick is only handed out while the loop is running and due. The returned guard borrows the
/// loop mutably, so ticks never overlap; the next tick is scheduled from the later of the tick's
/// start and the moment the guard is dropped.
#[derive(Debug)]
pub struct StatusLoop {
    interval: Duration,
    running: bool,
    next_due: Option<Instant>,
}

impl StatusLoop {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            running: false,
            next_due: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Starts the loop with a tick due immediately. Starting a running loop is a no-op.
    pub fn start(&mut self, now: Instant) {
        if self.running {
            return;
        }
        self.running = true;
        self.next_due = Some(now);
        info!(interval_ms = self.interval.as_millis() as u64, "status loop started");
    }

    pub fn stop(&mut self) {
        if !self.running {
            return;
        }
        self.running = false;
        self.next_due = None;
        info!("status loop stopped");
    }

    /// Time left until the next tick; `None` when stopped.
    pub fn time_until_due(&self, now: Instant) -> Option<Duration> {
        if !self.running {
            return None;
        }
        Some(
            self.next_due
                .map(|due| due.saturating_duration_since(now))
                .unwrap_or(Duration::ZERO),
        )
    }

    pub fn begin_tick(&mut self, now: Instant) -> Option<TickGuard<'_>> {
        if !self.running {
            return None;
        }
        if self.next_due.is_some_and(|due| due > now) {
            return None;
        }
        self.next_due = None;
        Some(TickGuard {
            owner: self,
            started: now,
        })
    }
}

pub struct TickGuard<'a> {
    owner: &'a mut StatusLoop,
    started: Instant,
}

impl TickGuard<'_> {
    pub fn stop_loop(&mut self) {
        self.owner.stop();
    }
}

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        if self.owner.running {
            let ended = self.started.max(Instant::now());
            self.owner.next_due = Some(ended + self.owner.interval);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stopped_loop_never_ticks() {
        let mut status = StatusLoop::new(Duration::from_secs(5));
        let now = Instant::now();
        assert!(!status.is_running());
        assert!(status.begin_tick(now).is_none());
        assert_eq!(status.time_until_due(now), None);
    }

    #[test]
    fn first_tick_is_immediate_then_waits_a_full_interval() {
        let mut status = StatusLoop::new(Duration::from_secs(60));
        let now = Instant::now();
        status.start(now);
        assert_eq!(status.time_until_due(now), Some(Duration::ZERO));

        {
            let tick = status.begin_tick(now);
            assert!(tick.is_some());
        }

        let after = Instant::now();
        assert!(status.begin_tick(after).is_none());
        let wait = status.time_until_due(after).unwrap();
        assert!(wait > Duration::from_secs(59), "wait was {wait:?}");

        assert!(status.begin_tick(after + Duration::from_secs(61)).is_some());
    }

    #[test]
    fn late_ticks_coalesce_into_one() {
        let mut status = StatusLoop::new(Duration::from_millis(10));
        let start = Instant::now();
        status.start(start);
        drop(status.begin_tick(start));

        // Many intervals later only one tick is due, and the next is scheduled from its end.
        let late = Instant::now() + Duration::from_secs(1);
        assert!(status.begin_tick(late).is_some());
        assert!(status.begin_tick(late).is_none());
        assert!(status.begin_tick(Instant::now()).is_none());
        assert_eq!(
            status.time_until_due(late),
            Some(Duration::from_millis(10))
        );
        assert!(status.begin_tick(late + Duration::from_millis(10)).is_some());
    }

    #[test]
    fn stop_is_idempotent_and_works_mid_tick() {
        let mut status = StatusLoop::new(Duration::from_millis(10));
        let now = Instant::now();
        status.start(now);
        if let Some(mut tick) = status.begin_tick(now) {
            tick.stop_loop();
        }
        assert!(!status.is_running());
        assert_eq!(status.time_until_due(now), None);
        status.stop();
        assert!(!status.is_running());

        status.start(now);
        assert!(status.is_running());
        assert!(status.begin_tick(now).is_some());
    }
}
