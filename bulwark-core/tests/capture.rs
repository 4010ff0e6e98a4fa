use bulwark_core::error::{AppError, ErrorCode};
use bulwark_core::ResilienceContext;
use serial_test::serial;

#[test]
#[serial]
fn uncaught_panics_in_threads_are_logged() {
    let ctx = ResilienceContext::default();
    ctx.global_capture().install();

    let worker = std::thread::spawn(|| panic!("shader compile failed: missing semicolon"));
    assert!(worker.join().is_err());

    ctx.global_capture().uninstall();

    let entries = ctx.logger().entries();
    let entry = entries
        .iter()
        .find(|e| e.error.message().contains("missing semicolon"))
        .unwrap();
    assert_eq!(entry.error.code(), ErrorCode::RenderShaderCompile);
    assert_eq!(entry.metadata["source"], "uncaught_panic");
}

#[test]
#[serial]
fn install_is_idempotent() {
    let ctx = ResilienceContext::default();
    ctx.global_capture().install();
    ctx.global_capture().install();

    let _ = std::panic::catch_unwind(|| panic!("Failed to fetch tile 4"));
    ctx.global_capture().uninstall();
    assert!(!ctx.global_capture().is_installed());

    let matching = ctx
        .logger()
        .entries()
        .into_iter()
        .filter(|e| e.error.message().contains("tile 4"))
        .count();
    assert_eq!(matching, 1);
}

#[tokio::test]
async fn failed_background_tasks_are_logged() {
    let ctx = ResilienceContext::default();

    let failed = ctx.spawn_observed(async {
        Err::<(), _>(AppError::from_code(ErrorCode::AiRateLimited))
    });
    let panicked = ctx.spawn_observed(async {
        if true {
            panic!("inference worker crashed");
        }
        Ok::<u32, AppError>(1)
    });
    let succeeded = ctx.spawn_observed(async { Ok::<_, AppError>("done") });

    assert_eq!(failed.await.unwrap(), None);
    assert_eq!(panicked.await.unwrap(), None);
    assert_eq!(succeeded.await.unwrap(), Some("done"));

    let entries = ctx.logger().entries();
    assert_eq!(entries.len(), 2);
    assert!(entries
        .iter()
        .all(|e| e.metadata["source"] == "unhandled_rejection"));
    assert!(entries
        .iter()
        .any(|e| e.error.code() == ErrorCode::AiServiceUnavailable));
}
