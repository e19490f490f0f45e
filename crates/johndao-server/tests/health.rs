use axum::body::Body;
use axum::http::{Request, StatusCode};
use johndao_db::DbRuntimeSettings;
use johndao_server::jobs::JobError;
use johndao_server::{app, background, AppState, JOB_BACKUP_USERS, JOB_SCHEDULE_TWEET};
use johndao_sync::StoreError;
use serde_json::Value;
use tower::ServiceExt;

fn test_state() -> (tempfile::TempDir, AppState) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("johndao.db");
    let pool = johndao_db::open(path.to_str().unwrap(), DbRuntimeSettings::default()).unwrap();
    (dir, AppState { pool })
}

async fn get_json(state: AppState, uri: &str) -> (StatusCode, Value) {
    let response = app(state)
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn health_reports_version() {
    let (_dir, state) = test_state();
    let (status, body) = get_json(state, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn job_status_follows_recorded_runs() {
    let (_dir, state) = test_state();

    let (status, body) = get_json(state.clone(), "/jobs/backup_users").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("backup_users"));

    let ok = background::run_job(JOB_BACKUP_USERS, Some(&state.pool), || async {
        Ok::<_, JobError>("2 changed, 1 matched".to_string())
    })
    .await;
    assert!(ok);

    let (status, body) = get_json(state.clone(), "/jobs/backup_users").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["job"], JOB_BACKUP_USERS);
    assert_eq!(body["success"], true);
    assert_eq!(body["detail"], "2 changed, 1 matched");

    let ok = background::run_job(JOB_SCHEDULE_TWEET, Some(&state.pool), || async {
        Err(JobError::Store(StoreError::Backend("offline".to_string())))
    })
    .await;
    assert!(!ok);

    let (status, body) = get_json(state, "/jobs/schedule_tweet").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], false);
    assert!(body["detail"].as_str().unwrap().contains("offline"));
}
