//! Inter-request delay.

use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

/// Enforces a minimum gap between the end of one fetch and the start of the
/// next.
#[derive(Debug)]
pub struct Politeness {
    delay: Duration,
    last_finished: Option<Instant>,
}

impl Politeness {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            last_finished: None,
        }
    }

    /// Sleep until the delay since the previous fetch has elapsed.
    pub async fn wait(&self) {
        let Some(last) = self.last_finished else {
            return;
        };
        let ready_at = last + self.delay;
        if ready_at > Instant::now() {
            debug!("Waiting {:?} before next request", ready_at - Instant::now());
            tokio::time::sleep_until(ready_at).await;
        }
    }

    /// Record that a fetch just finished, successfully or not.
    pub fn mark_finished(&mut self) {
        self.last_finished = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_wait_is_immediate() {
        let politeness = Politeness::new(Duration::from_secs(60));
        let start = Instant::now();
        politeness.wait().await;
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_wait_covers_remaining_delay() {
        let mut politeness = Politeness::new(Duration::from_millis(50));
        let start = Instant::now();
        politeness.mark_finished();
        politeness.wait().await;
        assert!(start.elapsed() >= Duration::from_millis(50));
    }
}
