//! Artifact sink that keeps every saved artifact in memory.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::errors::ArtifactError;
use crate::traits::ArtifactSink;
use crate::types::{Artifact, CorrelationContext, SavedArtifact};

#[derive(Default)]
struct Inner {
    /// `(report_id, device_id)` pairs currently registered.
    contexts: BTreeSet<(String, String)>,
    saved: Vec<(SavedArtifact, Vec<u8>)>,
}

/// In-memory implementation of [`ArtifactSink`].
///
/// Paths follow the `{report_id}/{device_id}/{file_name}` layout a
/// file-backed sink would use.
#[derive(Clone, Default)]
pub struct InMemoryArtifactSink {
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryArtifactSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn saved(&self) -> Vec<SavedArtifact> {
        self.inner.lock().saved.iter().map(|(a, _)| a.clone()).collect()
    }

    /// Bytes of the artifact saved at `path`.
    pub fn bytes(&self, path: &str) -> Option<Vec<u8>> {
        self.inner
            .lock()
            .saved
            .iter()
            .find(|(a, _)| a.path == path)
            .map(|(_, b)| b.clone())
    }

    pub fn is_registered(&self, report_id: &str, device_id: &str) -> bool {
        self.inner
            .lock()
            .contexts
            .contains(&(report_id.to_string(), device_id.to_string()))
    }
}

#[async_trait]
impl ArtifactSink for InMemoryArtifactSink {
    fn register_context(&self, ctx: &CorrelationContext) {
        self.inner
            .lock()
            .contexts
            .insert((ctx.report_id.clone(), ctx.device_id.clone()));
    }

    fn unregister_context(&self, ctx: &CorrelationContext) {
        self.inner
            .lock()
            .contexts
            .remove(&(ctx.report_id.clone(), ctx.device_id.clone()));
    }

    async fn save(
        &self,
        ctx: &CorrelationContext,
        artifact: Artifact,
    ) -> Result<SavedArtifact, ArtifactError> {
        if artifact.bytes.is_empty() {
            return Err(ArtifactError::Write {
                message: format!("{} is empty", artifact.file_name),
            });
        }
        let saved = SavedArtifact {
            path: format!("{}/{}/{}", ctx.report_id, ctx.device_id, artifact.file_name),
            kind: artifact.kind,
            device_id: ctx.device_id.clone(),
            report_id: ctx.report_id.clone(),
        };
        tracing::debug!(path = %saved.path, bytes = artifact.bytes.len(), "artifact saved");
        self.inner
            .lock()
            .saved
            .push((saved.clone(), artifact.bytes));
        Ok(saved)
    }
}
