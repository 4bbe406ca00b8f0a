use crate::types::{ArdError, ArdResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Wait between two attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Backoff {
    None,
    Fixed { millis: u64 },
}

impl Backoff {
    pub fn delay(&self) -> Duration {
        match self {
            Backoff::None => Duration::ZERO,
            Backoff::Fixed { millis } => Duration::from_millis(*millis),
        }
    }
}

/// Bounded retry with a fixed backoff.
///
/// Permanent errors (see [`ArdError::failure_class`]) stop the loop at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self { max_attempts, backoff }
    }

    /// Three attempts one second apart, used inside dispatcher workers
    pub fn unit_default() -> Self {
        Self::new(3, Backoff::Fixed { millis: 1000 })
    }

    pub fn no_backoff(max_attempts: u32) -> Self {
        Self::new(max_attempts, Backoff::None)
    }

    pub fn once() -> Self {
        Self::new(1, Backoff::None)
    }

    /// Run `op` until it succeeds, fails permanently or the attempts run out.
    /// `op` receives the 1-based attempt number.
    pub fn run<T, F>(&self, label: &str, mut op: F) -> ArdResult<T>
    where
        F: FnMut(u32) -> ArdResult<T>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Ok(value) => {
                    if attempt > 1 {
                        log::debug!("{} succeeded on attempt {}", label, attempt);
                    }
                    return Ok(value);
                }
                Err(e) if e.is_permanent() => {
                    log::debug!("{} failed permanently: {}", label, e);
                    return Err(e);
                }
                Err(e) if attempt >= max_attempts => {
                    log::warn!("{} failed after {} attempts: {}", label, attempt, e);
                    return Err(e);
                }
                Err(e) => {
                    log::warn!("{} attempt {} of {} failed, retrying: {}", label, attempt, max_attempts, e);
                    let delay = self.backoff.delay();
                    if !delay.is_zero() {
                        std::thread::sleep(delay);
                    }
                    attempt += 1;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::unit_default()
    }
}

/// Error used when a retried closure panics
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> ArdError {
    let message = if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    };
    ArdError::Processing(format!("worker panicked: {}", message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stops_on_first_success() {
        let mut calls = 0;
        let result = RetryPolicy::no_backoff(3).run("unit", |attempt| {
            calls += 1;
            if attempt < 2 {
                Err(ArdError::Processing("transient".into()))
            } else {
                Ok(attempt)
            }
        });
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls, 2);
    }

    #[test]
    fn gives_up_after_max_attempts() {
        let mut calls = 0;
        let result: ArdResult<()> = RetryPolicy::no_backoff(3).run("unit", |_| {
            calls += 1;
            Err(ArdError::Processing("always".into()))
        });
        assert!(result.is_err());
        assert_eq!(calls, 3);
    }

    #[test]
    fn permanent_errors_are_not_retried() {
        let mut calls = 0;
        let result: ArdResult<()> = RetryPolicy::no_backoff(10).run("download", |_| {
            calls += 1;
            Err(ArdError::MissingFromArchive("scene".into()))
        });
        assert!(matches!(result, Err(ArdError::MissingFromArchive(_))));
        assert_eq!(calls, 1);
    }

    #[test]
    fn backoff_serialises_as_tagged_value() {
        let json = serde_json::to_string(&RetryPolicy::unit_default()).unwrap();
        assert!(json.contains("\"fixed\""));
        let back: RetryPolicy = serde_json::from_str(&json).unwrap();
        assert_eq!(back, RetryPolicy::unit_default());
    }
}
