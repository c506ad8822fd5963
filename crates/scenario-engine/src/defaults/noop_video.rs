//! Video recorder that records nothing.

use async_trait::async_trait;

use crate::traits::VideoRecorder;
use crate::types::{CorrelationContext, VideoOutcome};

/// [`VideoRecorder`] that accepts every start and never produces a file.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopVideoRecorder;

#[async_trait]
impl VideoRecorder for NoopVideoRecorder {
    async fn start(&self, _ctx: &CorrelationContext) -> VideoOutcome {
        VideoOutcome::started()
    }

    async fn stop(&self, _ctx: &CorrelationContext) -> VideoOutcome {
        VideoOutcome {
            success: true,
            local_path: None,
            error: None,
        }
    }
}
