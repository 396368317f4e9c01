use std::thread;
use std::time::{Duration, Instant};

use crate::{Error, Result};

/// Outcome of a single poll attempt.
pub(crate) enum PollOutcome<T> {
    Done(T),
    Retry,
}

/// Fixed-interval waiting with an overall bound and an optional caller
/// deadline. Used for both challenge-status and order-status polling.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Poller {
    interval: Duration,
    timeout: Duration,
}

impl Poller {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Poller { interval, timeout }
    }

    /// Run `attempt` until it yields a result or the bound is reached. The
    /// first attempt runs immediately; no sleep ever extends past the bound.
    /// A caller deadline earlier than the timeout takes precedence.
    pub fn wait<T, F>(&self, deadline: Option<Instant>, mut attempt: F) -> Result<T>
    where
        F: FnMut() -> Result<PollOutcome<T>>,
    {
        let bound = Instant::now() + self.timeout;
        let cutoff = match deadline {
            Some(d) if d < bound => d,
            _ => bound,
        };

        loop {
            if Instant::now() >= cutoff {
                return Err(Error::Timeout("polling bound exceeded".into()));
            }

            if let PollOutcome::Done(value) = attempt()? {
                return Ok(value);
            }

            let now = Instant::now();
            if now >= cutoff {
                return Err(Error::Timeout("polling bound exceeded".into()));
            }
            let remaining = cutoff - now;
            thread::sleep(if remaining < self.interval {
                remaining
            } else {
                self.interval
            });
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_done_returns_immediately() {
        let poller = Poller::new(Duration::from_millis(10), Duration::from_secs(5));
        let start = Instant::now();
        let v = poller.wait(None, || Ok(PollOutcome::Done(42))).unwrap();
        assert_eq!(v, 42);
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[test]
    fn test_retries_until_done() {
        let poller = Poller::new(Duration::from_millis(1), Duration::from_secs(5));
        let mut calls = 0;
        let v = poller
            .wait(None, || {
                calls += 1;
                if calls < 3 {
                    Ok(PollOutcome::Retry)
                } else {
                    Ok(PollOutcome::Done("done"))
                }
            })
            .unwrap();
        assert_eq!(v, "done");
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_timeout_is_timeout_error() {
        let poller = Poller::new(Duration::from_millis(1), Duration::from_millis(10));
        let res: Result<()> = poller.wait(None, || Ok(PollOutcome::Retry));
        assert!(matches!(res, Err(Error::Timeout(_))));
    }

    #[test]
    fn test_past_deadline_aborts_without_attempt() {
        let poller = Poller::new(Duration::from_millis(1), Duration::from_secs(60));
        let deadline = Some(Instant::now() - Duration::from_millis(1));
        let mut calls = 0;
        let res: Result<()> = poller.wait(deadline, || {
            calls += 1;
            Ok(PollOutcome::Retry)
        });
        assert!(matches!(res, Err(Error::Timeout(_))));
        assert_eq!(calls, 0);
    }

    #[test]
    fn test_attempt_error_propagates() {
        let poller = Poller::new(Duration::from_millis(1), Duration::from_secs(5));
        let res: Result<()> = poller.wait(None, || Err(Error::Protocol("boom".into())));
        assert!(matches!(res, Err(Error::Protocol(_))));
    }
}
