//! Out-of-band cleanup against a mock Neon API.

use std::time::Duration;

use branch_harness::config::NeonApiConfig;
use branch_harness::services::cleanup::{cleanup_branch, sweep_stale_branches, SweepOptions};
use branch_harness::services::retry::RetryPolicy;
use branch_harness::{DeleteOutcome, NeonClient};
use chrono::{DateTime, Utc};
use mockito::{Server, ServerGuard};
use serde_json::json;

fn client(server: &ServerGuard) -> NeonClient {
    NeonClient::new(&NeonApiConfig {
        api_key: "napi_test".to_string(),
        project_id: "proj-1".to_string(),
        base_url: server.url(),
    })
    .expect("client should build")
    .with_retry_policy(RetryPolicy {
        max_attempts: 2,
        base_delay: Duration::from_millis(5),
    })
}

fn now() -> DateTime<Utc> {
    "2024-03-01T12:00:00Z".parse().unwrap()
}

#[tokio::test]
async fn cleanup_without_id_does_nothing() {
    //* Given
    let mut server = Server::new_async().await;
    let any_delete = server
        .mock("DELETE", mockito::Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    //* When
    let outcome = cleanup_branch(&client(&server), None).await;
    let blank = cleanup_branch(&client(&server), Some("  ")).await;

    //* Then
    any_delete.assert_async().await;
    assert_eq!(outcome, None);
    assert_eq!(blank, None);
}

#[tokio::test]
async fn cleanup_tolerates_missing_branch() {
    //* Given
    let mut server = Server::new_async().await;
    let delete = server
        .mock("DELETE", "/projects/proj-1/branches/br-x")
        .with_status(404)
        .expect(1)
        .create_async()
        .await;

    //* When
    let outcome = cleanup_branch(&client(&server), Some("br-x")).await;

    //* Then
    delete.assert_async().await;
    assert_eq!(outcome, Some(DeleteOutcome::AlreadyGone));
}

#[tokio::test]
async fn sweep_deletes_only_stale_test_branches() {
    //* Given
    let mut server = Server::new_async().await;
    let _list = server
        .mock("GET", "/projects/proj-1/branches")
        .with_status(200)
        .with_body(
            json!({
                "branches": [
                    {"id": "br-main", "project_id": "proj-1", "name": "main", "created_at": "2023-01-01T00:00:00Z"},
                    {"id": "br-staging", "project_id": "proj-1", "name": "test-staging", "created_at": "2023-06-01T00:00:00Z"},
                    {"id": "br-old", "project_id": "proj-1", "name": "unit-1", "created_at": "2024-03-01T07:00:00Z"},
                    {"id": "br-older", "project_id": "proj-1", "name": "e2e-1", "created_at": "2024-02-28T07:00:00Z"},
                    {"id": "br-fresh", "project_id": "proj-1", "name": "integration-1", "created_at": "2024-03-01T11:30:00Z"}
                ]
            })
            .to_string(),
        )
        .expect(1)
        .create_async()
        .await;
    let delete_old = server
        .mock("DELETE", "/projects/proj-1/branches/br-old")
        .with_status(200)
        .expect(1)
        .create_async()
        .await;
    let delete_older = server
        .mock("DELETE", "/projects/proj-1/branches/br-older")
        .with_status(500)
        .expect(2)
        .create_async()
        .await;
    let options = SweepOptions {
        protected_ids: vec!["br-staging".to_string(), "br-main".to_string()],
        ..Default::default()
    };

    //* When
    let summary = sweep_stale_branches(&client(&server), now(), &options)
        .await
        .expect("listing succeeds");

    //* Then
    delete_old.assert_async().await;
    delete_older.assert_async().await;
    assert_eq!(summary.deleted, vec!["br-old".to_string()]);
    assert_eq!(summary.failed, vec!["br-older".to_string()]);
    assert_eq!(summary.kept, vec!["br-staging".to_string(), "br-fresh".to_string()]);
    assert_eq!(summary.ignored, 1);
}

#[tokio::test]
async fn dry_run_sweep_deletes_nothing() {
    //* Given
    let mut server = Server::new_async().await;
    let _list = server
        .mock("GET", "/projects/proj-1/branches")
        .with_status(200)
        .with_body(r#"{"branches":[{"id":"br-old","project_id":"proj-1","name":"test-1","created_at":"2024-03-01T01:00:00Z"}]}"#)
        .create_async()
        .await;
    let delete = server
        .mock("DELETE", mockito::Matcher::Any)
        .expect(0)
        .create_async()
        .await;
    let options = SweepOptions {
        dry_run: true,
        ..Default::default()
    };

    //* When
    let summary = sweep_stale_branches(&client(&server), now(), &options)
        .await
        .expect("listing succeeds");

    //* Then
    delete.assert_async().await;
    assert_eq!(summary.deleted, vec!["br-old".to_string()]);
}

#[tokio::test]
async fn sweep_fails_when_listing_fails() {
    //* Given
    let mut server = Server::new_async().await;
    let _list = server
        .mock("GET", "/projects/proj-1/branches")
        .with_status(401)
        .with_body(r#"{"message":"unauthorized"}"#)
        .create_async()
        .await;

    //* When
    let result = sweep_stale_branches(&client(&server), now(), &SweepOptions::default()).await;

    //* Then
    assert_eq!(result.unwrap_err().status(), Some(401));
}
