use std::sync::Arc;

use uuid::Uuid;

use crate::models::detection::{Detection, ResultsDocument, SamplingConfig};
use crate::services::storage::{self, BlobStore, StorageError};

/// Merges per-frame detection batches into one job-level document and
/// persists it under the job's deterministic results key.
///
/// The write is all-or-nothing: the document is fully serialized before
/// a single blob put, so a failure leaves nothing behind and the caller
/// marks the job failed.
pub struct ResultAggregator {
    blobs: Arc<dyn BlobStore>,
}

impl ResultAggregator {
    pub fn new(blobs: Arc<dyn BlobStore>) -> Self {
        Self { blobs }
    }

    /// Flatten the batches in frame order, write the document, and
    /// return its blob reference alongside the document itself.
    pub async fn aggregate(
        &self,
        job_id: Uuid,
        batches: impl IntoIterator<Item = Vec<Detection>> + Send,
        sampling: SamplingConfig,
    ) -> Result<(String, ResultsDocument), StorageError> {
        let detections: Vec<Detection> = batches.into_iter().flatten().collect();

        let document = ResultsDocument {
            job_id,
            sampling,
            detections,
        };

        let key = storage::results_key(job_id);
        storage::put_json(self.blobs.as_ref(), &key, &document).await?;

        Ok((key, document))
    }
}
