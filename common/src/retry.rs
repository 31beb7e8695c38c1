use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::{
    error::RetryError,
    platform::{NetworkLink, Timer},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay_ms: u64,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, delay_ms: u64) -> Self {
        Self {
            max_attempts,
            delay_ms,
        }
    }

    pub fn sanitize(&mut self) {
        self.max_attempts = self.max_attempts.clamp(1, 50);
        self.delay_ms = self.delay_ms.clamp(50, 10_000);
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(10, 200)
    }
}

/// Brings the link up, blocking for at most `max_attempts * delay_ms`.
///
/// Returns the number of reconnect attempts that were needed (0 when the
/// link was already up).
pub fn ensure_connected(
    link: &mut dyn NetworkLink,
    timer: &mut dyn Timer,
    policy: RetryPolicy,
) -> Result<u32, RetryError> {
    let mut attempts = 0;
    while !link.is_connected() {
        if attempts >= policy.max_attempts {
            return Err(RetryError::Exhausted { attempts });
        }
        attempts += 1;
        if let Err(err) = link.reconnect() {
            warn!("reconnect attempt {attempts}/{} failed: {err}", policy.max_attempts);
        } else {
            debug!("reconnect attempt {attempts}/{} issued", policy.max_attempts);
        }
        timer.delay_ms(policy.delay_ms);
    }
    Ok(attempts)
}
