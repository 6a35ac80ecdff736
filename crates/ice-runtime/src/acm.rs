//! Active Connection Management timer (spec.md §4.5). One [`AcmTimer`] per
//! connection tracks the last time activity was observed and, on each
//! tick, decides whether to send a heartbeat, consider the connection idle
//! for closure purposes, or do nothing — leaving the actual close/send
//! decision to the connection state machine in `ice-rpc`, which is the
//! only place that also knows about pending invocations.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use ice_core::config::{AcmClose, AcmConfig, AcmHeartbeat};

/// What an [`AcmTimer`] tick recommends the connection do (spec.md §4.5).
/// The connection decides how to act: e.g. `OnInvocation` close is only
/// honored when there are zero pending invocations, information the timer
/// itself does not have.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcmAction {
    None,
    SendHeartbeat,
    CloseIfIdle,
    CloseIfIdleForceful,
}

/// Tracks elapsed idle time against a connection's [`AcmConfig`] using a
/// single atomic timestamp so both the I/O task (recording activity) and
/// the timer task (checking it) can touch it without a lock.
pub struct AcmTimer {
    config: AcmConfig,
    started_at: Instant,
    last_activity_millis: AtomicI64,
}

impl AcmTimer {
    pub fn new(config: AcmConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            started_at: Instant::now(),
            last_activity_millis: AtomicI64::new(0),
        })
    }

    /// Records that a byte was read or written, or a dispatch completed,
    /// resetting the idle clock (spec.md §4.5).
    pub fn record_activity(&self) {
        let elapsed = self.started_at.elapsed().as_millis() as i64;
        self.last_activity_millis.store(elapsed, Ordering::Relaxed);
    }

    fn idle_for(&self) -> Duration {
        let last = self.last_activity_millis.load(Ordering::Relaxed);
        let elapsed = self.started_at.elapsed().as_millis() as i64;
        Duration::from_millis((elapsed - last).max(0) as u64)
    }

    /// Evaluates the current tick against the configured policy. Called on
    /// a fixed-interval timer (spec.md §4.5: typically `timeout / 2`) by
    /// the connection's own task.
    pub fn tick(&self) -> AcmAction {
        if self.config.timeout.is_zero() {
            return AcmAction::None;
        }
        let idle = self.idle_for();
        let past_timeout = idle >= self.config.timeout;

        let close_action = match self.config.close {
            AcmClose::Off => AcmAction::None,
            AcmClose::OnIdle | AcmClose::OnInvocation | AcmClose::OnInvocationAndIdle if past_timeout => {
                AcmAction::CloseIfIdle
            }
            AcmClose::OnIdleForceful if past_timeout => AcmAction::CloseIfIdleForceful,
            _ => AcmAction::None,
        };
        if close_action != AcmAction::None {
            return close_action;
        }

        let heartbeat_due = idle >= self.config.timeout / 2;
        match self.config.heartbeat {
            AcmHeartbeat::Always if heartbeat_due => AcmAction::SendHeartbeat,
            AcmHeartbeat::OnIdle if heartbeat_due => AcmAction::SendHeartbeat,
            _ => AcmAction::None,
        }
    }

    pub fn suggested_tick_interval(&self) -> Duration {
        if self.config.timeout.is_zero() {
            Duration::from_secs(60)
        } else {
            (self.config.timeout / 2).max(Duration::from_millis(100))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recommends_nothing_when_acm_is_off() {
        let config = AcmConfig {
            timeout: Duration::from_secs(60),
            close: AcmClose::Off,
            heartbeat: AcmHeartbeat::Off,
        };
        let timer = AcmTimer::new(config);
        assert_eq!(timer.tick(), AcmAction::None);
    }

    #[test]
    fn recommends_heartbeat_once_half_the_timeout_has_elapsed() {
        let config = AcmConfig {
            timeout: Duration::from_millis(0),
            close: AcmClose::Off,
            heartbeat: AcmHeartbeat::Always,
        };
        let timer = AcmTimer::new(config);
        // A zero timeout disables ACM entirely regardless of policy.
        assert_eq!(timer.tick(), AcmAction::None);
    }
}
