use std::collections::HashMap;

use async_trait::async_trait;
use base64::Engine as _;
use reqwest::Client;
use serde::Deserialize;

use crate::models::detection::{round_confidence, round_timestamp, Detection};
use crate::services::sampler::FrameBuffer;

/// Per-call inference thresholds.
#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    pub conf: f64,
    pub iou: f64,
    pub max_det: u32,
}

/// One observation on a single frame, already normalized to canonical
/// labels and precision but not yet bound to a frame position.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameDetection {
    pub asset_type: String,
    pub confidence: f64,
    pub bbox: [i64; 4],
    pub class_id: i64,
    pub source: String,
}

impl FrameDetection {
    /// Bind this observation to its sampled frame.
    pub fn at(self, frame_index: u64, timestamp_sec: f64) -> Detection {
        Detection {
            asset_type: self.asset_type,
            confidence: self.confidence,
            frame: frame_index,
            timestamp_sec: round_timestamp(timestamp_sec),
            bbox: self.bbox,
            source: self.source,
            class_id: self.class_id,
        }
    }
}

/// Adapter over an external object-detection engine.
///
/// The adapter's sole responsibility is normalization: whatever
/// heterogeneous output the engine returns becomes a flat list of
/// [`FrameDetection`]. Zero detections and empty model output are the
/// same non-error outcome.
#[async_trait]
pub trait DetectionEngine: Send + Sync {
    async fn detect(
        &self,
        frame: &FrameBuffer,
        thresholds: Thresholds,
    ) -> Result<Vec<FrameDetection>, DetectError>;

    /// Identifier of the model behind the engine, echoed into results
    /// documents for reproducibility.
    fn model(&self) -> &str;
}

#[derive(Debug, thiserror::Error)]
pub enum DetectError {
    #[error("inference request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("inference engine rejected frame: {0}")]
    Engine(String),
}

/// Raw per-box output as the inference service reports it. Field names
/// vary across engine versions; aliases absorb the variants.
#[derive(Debug, Deserialize)]
struct RawBox {
    #[serde(alias = "class", alias = "class_id")]
    cls: i64,
    #[serde(alias = "confidence")]
    conf: f64,
    #[serde(alias = "bbox")]
    xyxy: [f64; 4],
}

#[derive(Debug, Default, Deserialize)]
struct RawInferenceResponse {
    #[serde(default)]
    detections: Vec<RawBox>,
    /// Class-id to label map, when the engine provides one.
    #[serde(default)]
    names: HashMap<String, String>,
}

/// Normalize raw engine output into canonical frame detections:
/// resolve class ids to labels (stringified id when unmapped), round
/// confidence to stable precision, truncate boxes to pixel integers.
fn normalize(raw: RawInferenceResponse, source: &str) -> Vec<FrameDetection> {
    raw.detections
        .into_iter()
        .map(|b| {
            let asset_type = raw
                .names
                .get(&b.cls.to_string())
                .cloned()
                .unwrap_or_else(|| b.cls.to_string());

            FrameDetection {
                asset_type,
                confidence: round_confidence(b.conf),
                bbox: [
                    b.xyxy[0] as i64,
                    b.xyxy[1] as i64,
                    b.xyxy[2] as i64,
                    b.xyxy[3] as i64,
                ],
                class_id: b.cls,
                source: source.to_string(),
            }
        })
        .collect()
}

/// Client for a remote inference HTTP endpoint serving the detection
/// model. Frames go up base64-encoded with the threshold knobs; the
/// response is normalized before anything downstream sees it.
pub struct HttpDetectionEngine {
    http: Client,
    endpoint_url: String,
    api_token: Option<String>,
    model: String,
    source: String,
}

impl HttpDetectionEngine {
    pub fn new(
        endpoint_url: String,
        api_token: Option<String>,
        model: String,
    ) -> Result<Self, DetectError> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()?;

        Ok(Self {
            http,
            endpoint_url,
            api_token,
            model,
            source: "yolo".to_string(),
        })
    }
}

#[async_trait]
impl DetectionEngine for HttpDetectionEngine {
    async fn detect(
        &self,
        frame: &FrameBuffer,
        thresholds: Thresholds,
    ) -> Result<Vec<FrameDetection>, DetectError> {
        let request_body = serde_json::json!({
            "image": base64::engine::general_purpose::STANDARD.encode(&frame.data),
            "model": self.model,
            "conf": thresholds.conf,
            "iou": thresholds.iou,
            "max_det": thresholds.max_det,
        });

        let mut request = self.http.post(&self.endpoint_url).json(&request_body);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DetectError::Engine(format!("{status}: {body}")));
        }

        let raw: RawInferenceResponse = response.json().await?;
        Ok(normalize(raw, &self.source))
    }

    fn model(&self) -> &str {
        &self.model
    }
}
