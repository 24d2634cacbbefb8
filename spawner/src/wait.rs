//! Bounded polling decomposition for blocking waits.

use std::time::{Duration, Instant};

use crate::error::{Result, SpawnError};

/// Upper bound on a single blocking OS wait. Long and infinite waits are
/// broken into segments of at most this length so the loop regains control
/// between OS calls instead of parking indefinitely in one.
pub(crate) const WAIT_STEP: Duration = Duration::from_secs(1);

/// Drives `poll` with wait segments of `min(WAIT_STEP, remaining)` until it
/// produces a value, the timeout elapses (`Ok(None)`), or it fails.
/// `timeout = None` waits indefinitely in `WAIT_STEP` segments. A zero
/// timeout is a contract violation.
pub(crate) fn wait_in_steps<T>(
    timeout: Option<Duration>,
    poll: impl FnMut(Duration) -> Result<Option<T>>,
) -> Result<Option<T>> {
    wait_in_steps_with(WAIT_STEP, timeout, poll)
}

fn wait_in_steps_with<T>(
    step: Duration,
    timeout: Option<Duration>,
    mut poll: impl FnMut(Duration) -> Result<Option<T>>,
) -> Result<Option<T>> {
    if timeout.is_some_and(|limit| limit.is_zero()) {
        return Err(SpawnError::InvalidTimeout);
    }
    match timeout {
        None => loop {
            if let Some(value) = poll(step)? {
                return Ok(Some(value));
            }
        },
        Some(limit) => {
            let begin = Instant::now();
            loop {
                let elapsed = begin.elapsed();
                if elapsed >= limit {
                    return Ok(None);
                }
                if let Some(value) = poll(step.min(limit - elapsed))? {
                    return Ok(Some(value));
                }
            }
        }
    }
}
