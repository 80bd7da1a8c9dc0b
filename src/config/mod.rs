use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Unused by the worker.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string. When unset the API falls back to
    /// the in-process job store (single-node mode).
    pub database_url: Option<String>,

    /// R2 bucket name. When unset, blobs are held in process memory.
    pub r2_bucket: Option<String>,

    /// R2 endpoint URL
    pub r2_endpoint: Option<String>,

    /// R2 access key ID (S3-compatible)
    pub r2_access_key: Option<String>,

    /// R2 secret access key (S3-compatible)
    pub r2_secret_key: Option<String>,

    /// Lifetime of presigned upload/download URLs
    #[serde(default = "default_presign_expires_secs")]
    pub presign_expires_secs: u32,

    /// "worker" (local poll loop) or "remote" (serverless invocation)
    #[serde(default = "default_dispatch_mode")]
    pub dispatch_mode: String,

    /// Endpoint of the remote processing function ("remote" mode)
    pub remote_endpoint_url: Option<String>,

    /// API key for the remote processing function
    pub remote_api_key: Option<String>,

    /// Inference service endpoint (worker-side detection)
    pub inference_url: Option<String>,

    /// Bearer token for the inference service
    pub inference_token: Option<String>,

    /// Detection model identifier, echoed into results documents
    #[serde(default = "default_model")]
    pub model: String,

    /// Frames per second to analyze
    #[serde(default = "default_sample_fps")]
    pub sample_fps: f64,

    /// Safety cap on sampled frames per job
    #[serde(default = "default_max_frames")]
    pub max_frames: u32,

    /// Confidence threshold
    #[serde(default = "default_conf")]
    pub conf: f64,

    /// IoU threshold for NMS
    #[serde(default = "default_iou")]
    pub iou: f64,

    /// Max detections per frame
    #[serde(default = "default_max_det")]
    pub max_det: u32,

    /// Worker poll interval in milliseconds
    #[serde(default = "default_worker_poll_ms")]
    pub worker_poll_ms: u64,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_presign_expires_secs() -> u32 {
    3600
}

fn default_dispatch_mode() -> String {
    "worker".to_string()
}

fn default_model() -> String {
    "yolov8n".to_string()
}

fn default_sample_fps() -> f64 {
    1.0
}

fn default_max_frames() -> u32 {
    300
}

fn default_conf() -> f64 {
    0.25
}

fn default_iou() -> f64 {
    0.45
}

fn default_max_det() -> u32 {
    100
}

fn default_worker_poll_ms() -> u64 {
    2000
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    /// Sampling/inference knobs as the worker consumes them.
    pub fn sampling_settings(&self) -> crate::services::processor::SamplingSettings {
        crate::services::processor::SamplingSettings {
            sample_fps: self.sample_fps,
            max_frames: self.max_frames,
            conf: self.conf,
            iou: self.iou,
            max_det: self.max_det,
        }
    }
}
