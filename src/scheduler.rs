use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::error::{EmuError, Result};
use crate::input::{InputQueue, KeyEvent};

/// Shared cooperative cancellation flag. Cloned freely between the host and
/// the interpreter; every suspension primitive and every statement dispatch
/// polls it.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Bail out with `Cancelled` once the flag is set.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(EmuError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Longest uninterruptible stretch inside a cooperative wait.
const WAIT_SLICE: Duration = Duration::from_millis(10);

/// Cooperative sleep and key-wait, scaled by a speed factor.
///
/// Waits are performed in short slices with a cancellation check between
/// them, which serves both the native host and constrained single-thread
/// hosts that cannot park on a monitor.
pub struct Scheduler {
    speed_factor: f64,
}

impl Default for Scheduler {
    fn default() -> Self {
        Scheduler { speed_factor: 1.0 }
    }
}

impl Scheduler {
    pub fn new(speed_factor: f64) -> Self {
        Scheduler {
            speed_factor: if speed_factor > 0.0 { speed_factor } else { 1.0 },
        }
    }

    pub fn speed_factor(&self) -> f64 {
        self.speed_factor
    }

    pub fn set_speed_factor(&mut self, speed_factor: f64) {
        if speed_factor > 0.0 {
            self.speed_factor = speed_factor;
        }
    }

    /// Real wall time a requested wait maps to: duration / speed_factor,
    /// clamped to at least 1 ms for positive requests.
    pub fn scaled(&self, duration: Duration) -> Duration {
        if duration.is_zero() {
            return Duration::ZERO;
        }
        let scaled = duration.div_f64(self.speed_factor);
        scaled.max(Duration::from_millis(1))
    }

    /// Sleep for `duration` of program time, honoring cancellation.
    /// Zero or negative requests return immediately.
    pub fn sleep(&self, duration: Duration, cancel: &CancelToken) -> Result<()> {
        let target = self.scaled(duration);
        if target.is_zero() {
            return cancel.check();
        }
        let deadline = Instant::now() + target;
        loop {
            cancel.check()?;
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            std::thread::sleep((deadline - now).min(WAIT_SLICE));
        }
    }

    /// Block until a key event is available or the token fires.
    pub fn wait_for_key(&self, queue: &InputQueue, cancel: &CancelToken) -> Result<KeyEvent> {
        loop {
            cancel.check()?;
            if let Some(ev) = queue.pop_timeout(WAIT_SLICE) {
                return Ok(ev);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::KeyCode;

    #[test]
    fn zero_sleep_returns_immediately() {
        let sched = Scheduler::default();
        let start = Instant::now();
        sched.sleep(Duration::ZERO, &CancelToken::new()).unwrap();
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn speed_factor_divides_wait() {
        let sched = Scheduler::new(1000.0);
        // A second of program time collapses to ~1 ms of wall time.
        let start = Instant::now();
        sched
            .sleep(Duration::from_secs(1), &CancelToken::new())
            .unwrap();
        assert!(start.elapsed() < Duration::from_millis(200));
    }

    #[test]
    fn cancelled_sleep_raises() {
        let sched = Scheduler::default();
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = sched
            .sleep(Duration::from_secs(60), &cancel)
            .expect_err("cancelled sleep must not complete");
        assert!(matches!(err, EmuError::Cancelled));
    }

    #[test]
    fn wait_for_key_sees_injected_event() {
        let sched = Scheduler::default();
        let queue = std::sync::Arc::new(InputQueue::new());
        let cancel = CancelToken::new();

        let producer = std::sync::Arc::clone(&queue);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            producer.inject(KeyEvent::down(KeyCode::Enter, Some('\r')));
        });

        let ev = sched.wait_for_key(&queue, &cancel).unwrap();
        assert_eq!(ev.code, KeyCode::Enter);
        handle.join().unwrap();
    }
}
