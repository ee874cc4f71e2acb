use std::time::Duration;

use async_trait::async_trait;

/// Suspends only the calling negotiation; other tasks keep running.
#[async_trait]
pub trait Suspender: Send + Sync {
    async fn suspend(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSuspender;

#[async_trait]
impl Suspender for TokioSuspender {
    async fn suspend(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
