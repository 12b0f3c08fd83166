use branch_harness::services::diagnostics::verify_test_setup;
use branch_harness::ProcessEnv;

/// Prints the report; exit code 0 clean, 1 critical, 2 warnings only.
pub async fn run() -> i32 {
    let report = verify_test_setup(&ProcessEnv).await;
    println!("{report}");
    report.exit_code()
}
