//! HTTP flow tests against a real listener.
//!
//! A server is bound to an ephemeral port and driven with `reqwest`, the way
//! a frontend polls for lesson jobs.

use std::io::Read as _;
use std::time::Duration;

use lesson_orchestrator::{
    create_router, AppState, Config, CreateLessonResponse, DeleteLessonResponse, ErrorResponse,
    HealthResponse, JobStatus, LessonListResponse, LessonPreview, LessonStatusResponse,
    TaskManager, SUMMARY_FILE,
};
use reqwest::StatusCode;
use serde_json::json;
use tempfile::TempDir;

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const POLL_ATTEMPTS: usize = 600;

/// Spawns the API server and returns its base URL.
async fn spawn_test_server(dir: &TempDir) -> (String, tokio::task::JoinHandle<()>) {
    let manager = TaskManager::new(Config::default()).with_output_dir(dir.path());
    let router = create_router(AppState::with_manager(manager));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind");
    let addr = listener.local_addr().expect("Failed to get local addr");

    let handle = tokio::spawn(async move {
        axum::serve(listener, router).await.expect("Server failed");
    });

    (format!("http://{addr}/api"), handle)
}

async fn create_lesson(client: &reqwest::Client, base: &str, body: serde_json::Value) -> String {
    let response = client
        .post(format!("{base}/lessons"))
        .json(&body)
        .send()
        .await
        .expect("request sent");
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let created: CreateLessonResponse = response.json().await.expect("json body");
    assert_eq!(created.status, JobStatus::Pending);
    created.lesson_id
}

/// Polls until the job reaches a terminal state.
async fn poll_until_finished(
    client: &reqwest::Client,
    base: &str,
    id: &str,
) -> LessonStatusResponse {
    let mut last_percent = 0;
    for _ in 0..POLL_ATTEMPTS {
        let status: LessonStatusResponse = client
            .get(format!("{base}/lessons/{id}"))
            .send()
            .await
            .expect("request sent")
            .json()
            .await
            .expect("json body");

        assert!(
            status.progress.percent >= last_percent,
            "progress went backwards"
        );
        last_percent = status.progress.percent;

        if status.status.is_terminal() {
            return status;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
    panic!("job {id} did not finish in time");
}

#[tokio::test]
async fn test_health_over_http() {
    let dir = TempDir::new().expect("temp dir");
    let (base, server) = spawn_test_server(&dir).await;

    let health: HealthResponse = reqwest::get(format!("{base}/health"))
        .await
        .expect("request sent")
        .json()
        .await
        .expect("json body");
    assert_eq!(health.status, "ok");

    server.abort();
}

#[tokio::test]
async fn test_create_poll_preview_download_delete() {
    let dir = TempDir::new().expect("temp dir");
    let (base, server) = spawn_test_server(&dir).await;
    let client = reqwest::Client::new();

    let id = create_lesson(
        &client,
        &base,
        json!({
            "topics": ["Python Fundamentals"],
            "difficulty": "beginner",
            "modules": 2,
            "ai": false
        }),
    )
    .await;

    let status = poll_until_finished(&client, &base, &id).await;
    assert_eq!(status.status, JobStatus::Completed, "{:?}", status.error);
    assert_eq!(status.progress.percent, 100);
    let result = status.result.expect("completed job has a result");
    assert_eq!(result.generated_paths.len(), 1);

    let preview: LessonPreview = client
        .get(format!("{base}/lessons/{id}/preview"))
        .send()
        .await
        .expect("request sent")
        .json()
        .await
        .expect("json body");
    assert_eq!(preview.files.len(), 2 * 8 + 6);
    assert_eq!(preview.modules.len(), 2);
    assert!(preview
        .readme
        .as_deref()
        .is_some_and(|r| r.contains("Python Fundamentals")));

    let response = client
        .get(format!("{base}/lessons/{id}/download"))
        .send()
        .await
        .expect("request sent");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[reqwest::header::CONTENT_TYPE],
        "application/zip"
    );
    let bytes = response.bytes().await.expect("archive body");
    let mut archive =
        zip::ZipArchive::new(std::io::Cursor::new(bytes.to_vec())).expect("valid zip");
    assert_eq!(archive.len(), 2 * 8 + 6 + 1);
    let mut summary = String::new();
    archive
        .by_name(SUMMARY_FILE)
        .expect("summary entry")
        .read_to_string(&mut summary)
        .expect("utf-8 summary");
    assert!(summary.contains(&id));

    let listing: LessonListResponse = client
        .get(format!("{base}/lessons?status=completed"))
        .send()
        .await
        .expect("request sent")
        .json()
        .await
        .expect("json body");
    assert_eq!(listing.total, 1);
    assert_eq!(listing.lessons[0].lesson_id, id);

    let deleted: DeleteLessonResponse = client
        .delete(format!("{base}/lessons/{id}"))
        .send()
        .await
        .expect("request sent")
        .json()
        .await
        .expect("json body");
    assert!(deleted.deleted);
    assert!(!dir.path().join(&id).exists());

    let response = client
        .get(format!("{base}/lessons/{id}"))
        .send()
        .await
        .expect("request sent");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    server.abort();
}

#[tokio::test]
async fn test_invalid_module_count_is_rejected() {
    let dir = TempDir::new().expect("temp dir");
    let (base, server) = spawn_test_server(&dir).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{base}/lessons"))
        .json(&json!({ "topics": ["Python Fundamentals"], "modules": 11, "ai": false }))
        .send()
        .await
        .expect("request sent");
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let error: ErrorResponse = response.json().await.expect("json body");
    assert!(error.error.contains("modules"), "{}", error.error);

    let listing: LessonListResponse = client
        .get(format!("{base}/lessons"))
        .send()
        .await
        .expect("request sent")
        .json()
        .await
        .expect("json body");
    assert_eq!(listing.total, 0);

    server.abort();
}

#[tokio::test]
async fn test_preview_of_unfinished_or_unknown_job() {
    let dir = TempDir::new().expect("temp dir");
    let (base, server) = spawn_test_server(&dir).await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{base}/lessons/lesson_ffffffff/preview"))
        .send()
        .await
        .expect("request sent");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = client
        .post(format!("{base}/lessons/lesson_ffffffff/cancel"))
        .send()
        .await
        .expect("request sent");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    server.abort();
}
