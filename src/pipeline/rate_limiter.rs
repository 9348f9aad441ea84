use std::time::Duration;

use async_trait::async_trait;
use log::trace;

/// Paces outbound calls to an external API.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Waits until the next call may be issued.
    async fn acquire(&self);
}

/// Sleeps a fixed interval before every call, whatever the latency of the
/// previous one. Caps the call rate at one per `delay`.
#[derive(Debug, Clone, Copy)]
pub struct FixedDelay {
    delay: Duration,
}

impl FixedDelay {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl RateLimiter for FixedDelay {
    async fn acquire(&self) {
        if self.delay.is_zero() {
            return;
        }
        trace!("Rate limiting: waiting {:?}", self.delay);
        tokio::time::sleep(self.delay).await;
    }
}
