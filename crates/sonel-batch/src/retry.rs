//! Cancellation and retry helpers shared by every polling loop.

use std::fmt::Display;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Longest uninterrupted sleep; cancellation is observed at this granularity.
const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// Process-wide interrupt flag, set from the signal handler and observed by
/// every wait.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Sleep for `duration` unless cancelled first. Returns `false` when the
    /// sleep was cut short by cancellation.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep((deadline - now).min(SLEEP_SLICE));
        }
    }
}

/// Attempt count plus delay schedule for retrying an operation.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    attempts: u32,
    base: Duration,
    progressive: bool,
}

impl Backoff {
    /// Same delay between every attempt.
    pub fn fixed(attempts: u32, interval: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            base: interval,
            progressive: false,
        }
    }

    /// Delay grows linearly: base, 2*base, 3*base ...
    pub fn progressive(attempts: u32, base: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            base,
            progressive: true,
        }
    }

    /// Delay after the zero-based `attempt` fails.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        if self.progressive {
            self.base * (attempt + 1)
        } else {
            self.base
        }
    }

    /// Run `op` until it succeeds, attempts run out, `should_retry` rejects the
    /// error, or `cancel` fires. The last error is returned on failure.
    pub fn retry_if<T, E, F, P>(
        &self,
        what: &str,
        cancel: &CancellationFlag,
        mut should_retry: P,
        mut op: F,
    ) -> Result<T, E>
    where
        E: Display,
        F: FnMut(u32) -> Result<T, E>,
        P: FnMut(&E) -> bool,
    {
        let mut attempt = 0;
        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(e) => {
                    let last = attempt + 1 >= self.attempts;
                    if last || !should_retry(&e) {
                        return Err(e);
                    }
                    let delay = self.delay_after(attempt);
                    debug!(
                        "{what} failed (attempt {}/{}): {e}; retrying in {:?}",
                        attempt + 1,
                        self.attempts,
                        delay
                    );
                    if !cancel.sleep(delay) {
                        return Err(e);
                    }
                    attempt += 1;
                }
            }
        }
    }

    pub fn retry<T, E, F>(&self, what: &str, cancel: &CancellationFlag, op: F) -> Result<T, E>
    where
        E: Display,
        F: FnMut(u32) -> Result<T, E>,
    {
        self.retry_if(what, cancel, |_| true, op)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progressive_delays_grow_linearly() {
        let b = Backoff::progressive(5, Duration::from_secs(2));
        let delays: Vec<u64> = (0..5).map(|a| b.delay_after(a).as_secs()).collect();
        assert_eq!(delays, vec![2, 4, 6, 8, 10]);
        assert_eq!(
            Backoff::fixed(3, Duration::from_millis(300)).delay_after(2),
            Duration::from_millis(300)
        );
    }

    #[test]
    fn retry_stops_at_first_success() {
        let cancel = CancellationFlag::new();
        let mut calls = 0;
        let result: Result<u32, String> =
            Backoff::fixed(3, Duration::ZERO).retry("op", &cancel, |attempt| {
                calls += 1;
                if attempt < 1 {
                    Err("not yet".to_string())
                } else {
                    Ok(attempt)
                }
            });
        assert_eq!(result, Ok(1));
        assert_eq!(calls, 2);
    }

    #[test]
    fn retry_gives_up_after_attempts() {
        let cancel = CancellationFlag::new();
        let mut calls = 0;
        let result: Result<(), String> = Backoff::fixed(3, Duration::ZERO).retry("op", &cancel, |_| {
            calls += 1;
            Err("nope".to_string())
        });
        assert_eq!(result, Err("nope".to_string()));
        assert_eq!(calls, 3);
    }

    #[test]
    fn non_retryable_errors_return_immediately() {
        let cancel = CancellationFlag::new();
        let mut calls = 0;
        let result: Result<(), String> = Backoff::fixed(3, Duration::ZERO).retry_if(
            "op",
            &cancel,
            |e: &String| e != "fatal",
            |_| {
                calls += 1;
                Err("fatal".to_string())
            },
        );
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[test]
    fn cancelled_sleep_returns_early() {
        let cancel = CancellationFlag::new();
        cancel.cancel();
        let started = Instant::now();
        assert!(!cancel.sleep(Duration::from_secs(5)));
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
