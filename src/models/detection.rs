use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One bounding-box observation on a sampled frame, normalized from
/// whatever shape the inference engine returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Detected class label, e.g. "milepost".
    pub asset_type: String,
    /// Confidence in [0, 1], rounded to 4 decimal places.
    pub confidence: f64,
    /// Ordinal of the sampled frame within the original stream (not a
    /// re-numbered 0..k sequence). Use `timestamp_sec` for alignment.
    pub frame: u64,
    /// Seconds from stream start, rounded to 3 decimal places.
    pub timestamp_sec: f64,
    /// Pixel-space [x1, y1, x2, y2] in the source frame.
    pub bbox: [i64; 4],
    /// Tag identifying the producing engine.
    pub source: String,
    /// Numeric class id as reported by the engine.
    pub class_id: i64,
}

/// Echo of the sampling/inference configuration a job ran with, stored
/// alongside the detections so a result is reproducible.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingConfig {
    pub target_fps: f64,
    pub frame_stride: u64,
    pub max_frames: u32,
    pub model: String,
    pub conf: f64,
    pub iou: f64,
}

/// Job-level results document persisted to the blob store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultsDocument {
    pub job_id: Uuid,
    pub sampling: SamplingConfig,
    pub detections: Vec<Detection>,
}

/// Round a confidence value to the stable 4-decimal precision used in
/// persisted detections.
pub fn round_confidence(v: f64) -> f64 {
    (v * 10_000.0).round() / 10_000.0
}

/// Round a timestamp to the stable 3-decimal precision used in
/// persisted detections.
pub fn round_timestamp(v: f64) -> f64 {
    (v * 1_000.0).round() / 1_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounding_is_stable() {
        assert_eq!(round_confidence(0.123_456_78), 0.1235);
        assert_eq!(round_confidence(1.0), 1.0);
        assert_eq!(round_timestamp(2.333_333_3), 2.333);
    }

    #[test]
    fn results_document_serde_round_trip() {
        let doc = ResultsDocument {
            job_id: Uuid::new_v4(),
            sampling: SamplingConfig {
                target_fps: 1.0,
                frame_stride: 30,
                max_frames: 300,
                model: "yolov8n".to_string(),
                conf: 0.25,
                iou: 0.45,
            },
            detections: vec![Detection {
                asset_type: "milepost".to_string(),
                confidence: 0.91,
                frame: 30,
                timestamp_sec: 1.0,
                bbox: [10, 20, 110, 220],
                source: "yolo".to_string(),
                class_id: 7,
            }],
        };

        let bytes = serde_json::to_vec(&doc).unwrap();
        let back: ResultsDocument = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back, doc);
    }
}
