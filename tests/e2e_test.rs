//! End-to-end API tests against a running server.
//!
//! These require:
//! 1. The API server running (with a worker process or in-process loop)
//! 2. Blob storage reachable by both
//!
//! Run with: cargo test --test e2e_test -- --ignored --nocapture
//!
//! Set API_BASE_URL to override the default (http://localhost:3000).

use serde_json::Value;
use std::time::Duration;

fn get_base_url() -> String {
    std::env::var("API_BASE_URL").unwrap_or_else(|_| "http://localhost:3000".to_string())
}

#[tokio::test]
#[ignore] // Requires a running API server
async fn test_e2e_health_check() {
    let base_url = get_base_url();
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{base_url}/health"))
        .send()
        .await
        .expect("Health check failed");

    assert!(
        response.status().is_success(),
        "Health check returned non-success status: {}",
        response.status()
    );
}

#[tokio::test]
#[ignore] // Requires a running API server
async fn test_e2e_submit_before_upload_is_rejected() {
    let base_url = get_base_url();
    let client = reqwest::Client::new();

    let created: Value = client
        .post(format!("{base_url}/jobs"))
        .json(&serde_json::json!({"asset_types": ["milepost"]}))
        .send()
        .await
        .expect("create failed")
        .json()
        .await
        .expect("invalid create response");
    let job_id = created["job_id"].as_str().expect("job_id").to_string();

    let submit = client
        .post(format!("{base_url}/jobs/{job_id}/submit"))
        .send()
        .await
        .expect("submit failed");
    assert_eq!(submit.status(), 400);

    let job: Value = client
        .get(format!("{base_url}/jobs/{job_id}"))
        .send()
        .await
        .expect("get failed")
        .json()
        .await
        .expect("invalid job response");
    assert_eq!(job["status"], "created");

    // Results are not ready while non-terminal.
    let results = client
        .get(format!("{base_url}/jobs/{job_id}/results"))
        .send()
        .await
        .expect("results failed");
    assert_eq!(results.status(), 202);
}

#[tokio::test]
#[ignore] // Requires a running API server, worker, and a sample video
async fn test_e2e_full_job_lifecycle() {
    let video_path =
        std::env::var("E2E_VIDEO_PATH").expect("E2E_VIDEO_PATH must point at a sample video");
    let video_bytes = std::fs::read(&video_path).expect("failed to read sample video");

    let base_url = get_base_url();
    let client = reqwest::Client::new();

    // Create
    let created: Value = client
        .post(format!("{base_url}/jobs"))
        .json(&serde_json::json!({"asset_types": ["milepost", "sign"], "filename": "e2e.mp4"}))
        .send()
        .await
        .expect("create failed")
        .json()
        .await
        .expect("invalid create response");
    let job_id = created["job_id"].as_str().expect("job_id").to_string();

    // Upload through the fallback multipart route
    let part = reqwest::multipart::Part::bytes(video_bytes)
        .file_name("e2e.mp4")
        .mime_str("video/mp4")
        .unwrap();
    let form = reqwest::multipart::Form::new().part("file", part);
    let upload = client
        .post(format!("{base_url}/jobs/{job_id}/upload"))
        .multipart(form)
        .send()
        .await
        .expect("upload failed");
    assert!(upload.status().is_success());

    // Submit
    let submit: Value = client
        .post(format!("{base_url}/jobs/{job_id}/submit"))
        .send()
        .await
        .expect("submit failed")
        .json()
        .await
        .expect("invalid submit response");
    assert!(matches!(
        submit["status"].as_str(),
        Some("queued") | Some("running")
    ));

    // Poll until terminal
    let mut last_status = String::new();
    for _ in 0..120 {
        let job: Value = client
            .get(format!("{base_url}/jobs/{job_id}"))
            .send()
            .await
            .expect("get failed")
            .json()
            .await
            .expect("invalid job response");
        last_status = job["status"].as_str().unwrap_or_default().to_string();
        if last_status == "completed" || last_status == "failed" {
            break;
        }
        tokio::time::sleep(Duration::from_secs(2)).await;
    }
    assert_eq!(last_status, "completed", "job did not complete");

    // Results document is served with the sampling echo
    let results: Value = client
        .get(format!("{base_url}/jobs/{job_id}/results"))
        .send()
        .await
        .expect("results failed")
        .json()
        .await
        .expect("invalid results response");
    assert_eq!(results["job_id"].as_str(), Some(job_id.as_str()));
    assert!(results["results"]["sampling"]["frame_stride"].is_u64());
    assert!(results["results"]["detections"].is_array());
}
