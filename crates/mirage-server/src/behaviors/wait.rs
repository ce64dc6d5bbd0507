//! Latency simulation.

use std::time::Duration;
use tracing::debug;

/// Sleep for `ms` milliseconds without blocking the runtime. Zero is a no-op.
pub async fn apply_latency(ms: u64) {
    if ms == 0 {
        return;
    }
    debug!("Applying {}ms latency", ms);
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn test_zero_latency_returns_immediately() {
        let start = Instant::now();
        apply_latency(0).await;
        assert!(start.elapsed() < Duration::from_millis(20));
    }

    #[tokio::test]
    async fn test_latency_waits() {
        let start = Instant::now();
        apply_latency(30).await;
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn test_latency_does_not_block_other_tasks() {
        let start = Instant::now();
        let slow = tokio::spawn(apply_latency(200));
        let fast = tokio::spawn(async { Instant::now() });

        let fast_done = fast.await.unwrap();
        assert!(fast_done.duration_since(start) < Duration::from_millis(150));
        slow.await.unwrap();
    }
}
