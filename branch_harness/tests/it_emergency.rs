//! Interrupt and panic handling while a branch is armed.
//!
//! Each case re-runs this test binary as a child filtered to
//! `child_scenario`, so forced exits can be observed from outside.
#![cfg(unix)]

use std::process::Output;
use std::time::Duration;

use branch_harness::config::NeonApiConfig;
use branch_harness::services::emergency::{EmergencyCleanupGuard, PANIC_EXIT_CODE};
use branch_harness::services::retry::RetryPolicy;
use branch_harness::NeonClient;
use mockito::Server;

const SCENARIO_VAR: &str = "BRANCH_GUARD_SCENARIO";
const API_VAR: &str = "BRANCH_GUARD_API";

fn client(base_url: &str) -> NeonClient {
    NeonClient::new(&NeonApiConfig {
        api_key: "napi_test".to_string(),
        project_id: "proj-1".to_string(),
        base_url: base_url.to_string(),
    })
    .expect("client should build")
    .with_retry_policy(RetryPolicy {
        max_attempts: 1,
        base_delay: Duration::from_millis(5),
    })
}

async fn run_child(scenario: &str, api: &str) -> Output {
    let exe = std::env::current_exe().expect("test binary path");
    tokio::process::Command::new(exe)
        .args(["child_scenario", "--exact", "--nocapture", "--test-threads=1"])
        .env(SCENARIO_VAR, scenario)
        .env(API_VAR, api)
        .output()
        .await
        .expect("child test process runs")
}

fn raise(signal: &str) {
    std::process::Command::new("kill")
        .args([signal, &std::process::id().to_string()])
        .status()
        .expect("kill runs");
}

/// Body of the child process. A no-op in a normal test run.
#[tokio::test]
async fn child_scenario() {
    let Ok(scenario) = std::env::var(SCENARIO_VAR) else {
        return;
    };
    let api = std::env::var(API_VAR).expect("api url for child");
    let client = client(&api);

    match scenario.as_str() {
        "caught-panic" => {
            let _guard = EmergencyCleanupGuard::arm(&client, "br-live");
            let joined = tokio::spawn(async { panic!("worker failed") }).await;
            println!("survived caught panic: {}", joined.is_err());
        }
        "disarmed-sigint" => {
            EmergencyCleanupGuard::arm(&client, "br-done").disarm();
            raise("-INT");
            std::thread::sleep(Duration::from_secs(5));
            println!("survived SIGINT");
        }
        "armed-sigterm" => {
            let _guard = EmergencyCleanupGuard::arm(&client, "br-live");
            raise("-TERM");
            std::thread::sleep(Duration::from_secs(10));
            println!("survived SIGTERM");
        }
        other => panic!("unknown scenario {other}"),
    }
}

#[tokio::test]
async fn panic_while_armed_deletes_once_and_exits() {
    //* Given
    let mut server = Server::new_async().await;
    let delete = server
        .mock("DELETE", "/projects/proj-1/branches/br-live")
        .with_status(200)
        .with_body("{}")
        .expect(1)
        .create_async()
        .await;

    //* When
    let output = run_child("caught-panic", &server.url()).await;

    //* Then
    assert_eq!(output.status.code(), Some(PANIC_EXIT_CODE));
    assert!(!String::from_utf8_lossy(&output.stdout).contains("survived"));
    delete.assert_async().await;
}

#[tokio::test]
async fn sigint_after_disarm_still_terminates() {
    //* Given
    let mut server = Server::new_async().await;
    let any_delete = server
        .mock("DELETE", mockito::Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    //* When
    let output = run_child("disarmed-sigint", &server.url()).await;

    //* Then
    assert_eq!(output.status.code(), Some(130));
    assert!(!String::from_utf8_lossy(&output.stdout).contains("survived"));
    any_delete.assert_async().await;
}

#[tokio::test]
async fn sigterm_while_armed_deletes_then_exits() {
    //* Given
    let mut server = Server::new_async().await;
    let delete = server
        .mock("DELETE", "/projects/proj-1/branches/br-live")
        .with_status(404)
        .expect(1)
        .create_async()
        .await;

    //* When
    let output = run_child("armed-sigterm", &server.url()).await;

    //* Then
    assert_eq!(output.status.code(), Some(143));
    assert!(!String::from_utf8_lossy(&output.stdout).contains("survived"));
    delete.assert_async().await;
}
