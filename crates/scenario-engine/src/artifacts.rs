//! Bounded artifact-save queue shared by every device of every run.

use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::errors::ArtifactError;
use crate::traits::ArtifactSink;
use crate::types::{Artifact, CorrelationContext, SavedArtifact};

/// Caps concurrent [`ArtifactSink::save`] calls so only a handful of image
/// buffers are alive at once. Each buffer is dropped when its save
/// returns, success or not.
#[derive(Clone)]
pub struct ArtifactQueue {
    sink: Arc<dyn ArtifactSink>,
    permits: Arc<Semaphore>,
}

impl ArtifactQueue {
    pub fn new(sink: Arc<dyn ArtifactSink>, concurrency: usize) -> Self {
        Self {
            sink,
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
        }
    }

    pub async fn save(
        &self,
        ctx: &CorrelationContext,
        artifact: Artifact,
    ) -> Result<SavedArtifact, ArtifactError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| ArtifactError::QueueClosed)?;
        self.sink.save(ctx, artifact).await
    }
}

impl std::fmt::Debug for ArtifactQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactQueue")
            .field("available", &self.permits.available_permits())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::types::ArtifactKind;

    #[derive(Default)]
    struct SlowSink {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl ArtifactSink for SlowSink {
        async fn save(
            &self,
            ctx: &CorrelationContext,
            artifact: Artifact,
        ) -> Result<SavedArtifact, ArtifactError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(SavedArtifact {
                path: artifact.file_name,
                kind: artifact.kind,
                device_id: ctx.device_id.clone(),
                report_id: ctx.report_id.clone(),
            })
        }
    }

    fn shot(n: usize) -> Artifact {
        Artifact {
            kind: ArtifactKind::FailureScreenshot,
            node_id: None,
            file_name: format!("shot-{n}.png"),
            bytes: vec![0; 16],
        }
    }

    #[tokio::test(start_paused = true)]
    async fn caps_concurrent_saves() {
        let sink = Arc::new(SlowSink::default());
        let queue = ArtifactQueue::new(sink.clone(), 2);
        let ctx = CorrelationContext::for_device("run", "report", "dev");

        let saves = (0..6).map(|n| {
            let queue = queue.clone();
            let ctx = ctx.clone();
            async move { queue.save(&ctx, shot(n)).await }
        });
        let results = futures::future::join_all(saves).await;

        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(sink.peak.load(Ordering::SeqCst), 2);
    }
}
