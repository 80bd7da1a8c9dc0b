use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use crate::models::detection::SamplingConfig;
use crate::models::job::{Job, JobPatch, JobStatus};
use crate::services::aggregator::ResultAggregator;
use crate::services::detector::{DetectError, DetectionEngine, Thresholds};
use crate::services::sampler::{DecodeError, FfmpegDecoder, FrameSampler, VideoDecoder};
use crate::services::storage::{BlobStore, StorageError};
use crate::store::{JobStore, StoreError};

/// Sampling and inference knobs a worker processes every job with.
#[derive(Debug, Clone)]
pub struct SamplingSettings {
    pub sample_fps: f64,
    pub max_frames: u32,
    pub conf: f64,
    pub iou: f64,
    pub max_det: u32,
}

/// Seam for opening a downloaded video file as a decoder. Keeps the
/// decoder implementation out of the pipeline and swappable in tests.
pub trait VideoOpener: Send + Sync {
    fn open(&self, path: &Path) -> Result<Box<dyn VideoDecoder + Send>, DecodeError>;
}

/// Opens videos through the ffmpeg CLI decoder.
pub struct FfmpegOpener;

impl VideoOpener for FfmpegOpener {
    fn open(&self, path: &Path) -> Result<Box<dyn VideoDecoder + Send>, DecodeError> {
        Ok(Box::new(FfmpegDecoder::open(path)?))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("job has no video_ref")]
    MissingVideo,

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Detect(#[from] DetectError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("temp file error: {0}")]
    Io(#[from] std::io::Error),
}

/// Runs one claimed job end to end: download, sample, detect,
/// aggregate, terminal update.
///
/// Any failure inside processing becomes the `failed` terminal state
/// with a descriptive message; nothing here is allowed to leave a job
/// in `running` or to crash the worker loop.
pub struct Processor {
    store: Arc<dyn JobStore>,
    blobs: Arc<dyn BlobStore>,
    engine: Arc<dyn DetectionEngine>,
    opener: Arc<dyn VideoOpener>,
    aggregator: ResultAggregator,
    settings: SamplingSettings,
}

impl Processor {
    pub fn new(
        store: Arc<dyn JobStore>,
        blobs: Arc<dyn BlobStore>,
        engine: Arc<dyn DetectionEngine>,
        opener: Arc<dyn VideoOpener>,
        settings: SamplingSettings,
    ) -> Self {
        let aggregator = ResultAggregator::new(blobs.clone());
        Self {
            store,
            blobs,
            engine,
            opener,
            aggregator,
            settings,
        }
    }

    /// Select the oldest queued job, claim it, and process it to a
    /// terminal state. Returns `Ok(true)` if a job was handled (even if
    /// it failed or the claim was lost), `Ok(false)` when the queue is
    /// empty.
    pub async fn process_next(&self) -> Result<bool, StoreError> {
        let queued = self.store.list(Some(JobStatus::Queued), 1, 0).await?;
        let Some(candidate) = queued.into_iter().next() else {
            return Ok(false);
        };

        // The claim is the exclusive transition to `running`; losing it
        // means another worker took the job between list and claim.
        let Some(job) = self.store.claim(candidate.job_id).await? else {
            tracing::debug!(job_id = %candidate.job_id, "lost claim race");
            return Ok(true);
        };

        self.run(job).await;
        Ok(true)
    }

    /// Process an already-claimed (`running`) job to a terminal state.
    pub async fn run(&self, job: Job) {
        let job_id = job.job_id;
        let start = Instant::now();

        match self.run_inner(&job).await {
            Ok((results_ref, detections)) => {
                let update = self
                    .store
                    .update(
                        job_id,
                        JobPatch {
                            status: Some(JobStatus::Completed),
                            results_ref: Some(results_ref.clone()),
                            error: Some(None),
                            ..Default::default()
                        },
                    )
                    .await;

                if let Err(e) = update {
                    tracing::error!(job_id = %job_id, error = %e, "failed to record completion");
                    return;
                }

                metrics::counter!("detection_jobs_completed").increment(1);
                metrics::histogram!("detection_processing_seconds")
                    .record(start.elapsed().as_secs_f64());
                tracing::info!(
                    job_id = %job_id,
                    results_ref = %results_ref,
                    detections = detections,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "job completed"
                );
            }
            Err(e) => {
                let message = e.to_string();
                let update = self
                    .store
                    .update(
                        job_id,
                        JobPatch {
                            status: Some(JobStatus::Failed),
                            error: Some(Some(message.clone())),
                            ..Default::default()
                        },
                    )
                    .await;

                if let Err(e) = update {
                    tracing::error!(job_id = %job_id, error = %e, "failed to record failure");
                }

                metrics::counter!("detection_jobs_failed").increment(1);
                tracing::error!(job_id = %job_id, error = %message, "job failed");
            }
        }
    }

    async fn run_inner(&self, job: &Job) -> Result<(String, usize), ProcessError> {
        let video_ref = job.video_ref.as_deref().ok_or(ProcessError::MissingVideo)?;

        tracing::debug!(job_id = %job.job_id, video_ref = %video_ref, "downloading video");
        let video_bytes = self.blobs.get(video_ref).await?;

        let workdir = tempfile::tempdir()?;
        let video_path = workdir.path().join("video.mp4");
        tokio::fs::write(&video_path, &video_bytes).await?;

        let decoder = self.opener.open(&video_path)?;
        let mut sampler =
            FrameSampler::new(decoder, self.settings.sample_fps, self.settings.max_frames);
        let frame_stride = sampler.stride();

        let thresholds = Thresholds {
            conf: self.settings.conf,
            iou: self.settings.iou,
            max_det: self.settings.max_det,
        };

        let mut batches = Vec::new();
        while let Some(frame) = sampler.next() {
            let frame = frame?;
            let detections = self.engine.detect(&frame.buffer, thresholds).await?;
            tracing::trace!(
                job_id = %job.job_id,
                frame = frame.frame_index,
                detections = detections.len(),
                "frame analyzed"
            );
            batches.push(
                detections
                    .into_iter()
                    .map(|d| d.at(frame.frame_index, frame.timestamp_sec))
                    .collect(),
            );
        }

        let sampling = SamplingConfig {
            target_fps: self.settings.sample_fps,
            frame_stride,
            max_frames: self.settings.max_frames,
            model: self.engine.model().to_string(),
            conf: self.settings.conf,
            iou: self.settings.iou,
        };

        let (results_ref, document) = self
            .aggregator
            .aggregate(job.job_id, batches, sampling)
            .await?;

        Ok((results_ref, document.detections.len()))
    }
}

/// Single-consumer poll loop: one job per cycle, processed to a
/// terminal state before the next poll. A failed job never stops the
/// loop.
pub async fn run_loop(processor: Arc<Processor>, poll_interval: std::time::Duration) {
    loop {
        match processor.process_next().await {
            Ok(true) => {
                tracing::debug!("job handled, checking for next job");
            }
            Ok(false) => {
                tracing::trace!("no jobs queued, sleeping");
                tokio::time::sleep(poll_interval).await;
            }
            Err(e) => {
                tracing::error!(error = %e, "worker poll failed, will retry");
                tokio::time::sleep(poll_interval).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::detection::ResultsDocument;
    use crate::services::detector::FrameDetection;
    use crate::services::sampler::FrameBuffer;
    use crate::services::storage::{self, MemoryBlobStore};
    use crate::store::MemoryJobStore;
    use async_trait::async_trait;
    use uuid::Uuid;

    struct StubDecoder {
        frames: u64,
        cursor: u64,
    }

    impl VideoDecoder for StubDecoder {
        fn frame_rate(&self) -> f64 {
            30.0
        }

        fn next_frame(&mut self) -> Result<Option<FrameBuffer>, DecodeError> {
            if self.cursor >= self.frames {
                return Ok(None);
            }
            self.cursor += 1;
            Ok(Some(FrameBuffer { data: vec![0xFF] }))
        }
    }

    struct StubOpener {
        frames: u64,
        fail: bool,
    }

    impl VideoOpener for StubOpener {
        fn open(&self, _path: &Path) -> Result<Box<dyn VideoDecoder + Send>, DecodeError> {
            if self.fail {
                return Err(DecodeError::Open("unsupported container".to_string()));
            }
            Ok(Box::new(StubDecoder {
                frames: self.frames,
                cursor: 0,
            }))
        }
    }

    struct StubEngine {
        per_frame: usize,
    }

    #[async_trait]
    impl DetectionEngine for StubEngine {
        async fn detect(
            &self,
            _frame: &FrameBuffer,
            _thresholds: Thresholds,
        ) -> Result<Vec<FrameDetection>, DetectError> {
            Ok((0..self.per_frame)
                .map(|i| FrameDetection {
                    asset_type: "milepost".to_string(),
                    confidence: 0.9,
                    bbox: [i as i64, 0, 10, 10],
                    class_id: 1,
                    source: "stub".to_string(),
                })
                .collect())
        }

        fn model(&self) -> &str {
            "stub-model"
        }
    }

    fn settings() -> SamplingSettings {
        SamplingSettings {
            sample_fps: 1.0,
            max_frames: 300,
            conf: 0.25,
            iou: 0.45,
            max_det: 100,
        }
    }

    async fn queued_job(
        store: &MemoryJobStore,
        blobs: &MemoryBlobStore,
    ) -> (Uuid, String) {
        let job = store.create(vec!["milepost".into()], None).await.unwrap();
        let video_ref = format!("videos/{}/v.mp4", job.job_id);
        blobs
            .put(&video_ref, b"fake video bytes", "video/mp4")
            .await
            .unwrap();
        store
            .update(
                job.job_id,
                JobPatch {
                    status: Some(JobStatus::Queued),
                    video_ref: Some(video_ref.clone()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        (job.job_id, video_ref)
    }

    #[tokio::test]
    async fn processes_queued_job_to_completed() {
        let store = Arc::new(MemoryJobStore::new());
        let blobs = Arc::new(MemoryBlobStore::new());
        let (job_id, _) = queued_job(&store, &blobs).await;

        let processor = Processor::new(
            store.clone(),
            blobs.clone(),
            Arc::new(StubEngine { per_frame: 2 }),
            Arc::new(StubOpener {
                frames: 61, // samples frames 0, 30, 60 at stride 30
                fail: false,
            }),
            settings(),
        );

        assert!(processor.process_next().await.unwrap());

        let job = store.get(job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.error.is_none());
        assert!(job.started_at.is_some());
        assert!(job.finished_at.is_some());

        let results_ref = job.results_ref.expect("results_ref set");
        let doc: ResultsDocument = storage::get_json(blobs.as_ref(), &results_ref)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc.detections.len(), 6);
        assert_eq!(doc.sampling.frame_stride, 30);
        assert_eq!(doc.sampling.model, "stub-model");
        assert_eq!(doc.detections[2].frame, 30);
        assert_eq!(doc.detections[2].timestamp_sec, 1.0);
    }

    #[tokio::test]
    async fn empty_queue_reports_idle() {
        let store = Arc::new(MemoryJobStore::new());
        let processor = Processor::new(
            store,
            Arc::new(MemoryBlobStore::new()),
            Arc::new(StubEngine { per_frame: 0 }),
            Arc::new(StubOpener {
                frames: 0,
                fail: false,
            }),
            settings(),
        );
        assert!(!processor.process_next().await.unwrap());
    }

    #[tokio::test]
    async fn decode_failure_marks_job_failed_without_results() {
        let store = Arc::new(MemoryJobStore::new());
        let blobs = Arc::new(MemoryBlobStore::new());
        let (job_id, _) = queued_job(&store, &blobs).await;

        let processor = Processor::new(
            store.clone(),
            blobs.clone(),
            Arc::new(StubEngine { per_frame: 1 }),
            Arc::new(StubOpener {
                frames: 0,
                fail: true,
            }),
            settings(),
        );

        assert!(processor.process_next().await.unwrap());

        let job = store.get(job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(!job.error.as_deref().unwrap().is_empty());
        assert!(job.finished_at.is_some());
        assert!(job.results_ref.is_none());

        // No partially-written results document.
        let doc: Option<ResultsDocument> =
            storage::get_json(blobs.as_ref(), &storage::results_key(job_id))
                .await
                .unwrap();
        assert!(doc.is_none());
    }

    #[tokio::test]
    async fn missing_video_blob_marks_job_failed() {
        let store = Arc::new(MemoryJobStore::new());
        let blobs = Arc::new(MemoryBlobStore::new());

        let job = store.create(vec!["sign".into()], None).await.unwrap();
        store
            .update(
                job.job_id,
                JobPatch {
                    status: Some(JobStatus::Queued),
                    video_ref: Some("videos/missing.mp4".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let processor = Processor::new(
            store.clone(),
            blobs,
            Arc::new(StubEngine { per_frame: 1 }),
            Arc::new(StubOpener {
                frames: 10,
                fail: false,
            }),
            settings(),
        );

        assert!(processor.process_next().await.unwrap());
        let failed = store.get(job.job_id).await.unwrap().unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert!(failed.error.as_deref().unwrap().contains("not found"));
    }
}
