//! Tests for raw failure conversions
//!
//! These check that the `From` implementations keep enough information for
//! the classifier to pick the right code, so `?`-style propagation into
//! `RawFailure` never loses the failure's meaning.

use super::*;
use std::io::ErrorKind;
use tokio::time::{timeout, Duration};

#[tokio::test]
async fn test_join_error_panic_conversion() {
    let handle = tokio::spawn(async {
        panic!("renderer exploded");
    });
    let join_err = handle.await.unwrap_err();

    let raw = RawFailure::from(join_err);
    match &raw {
        RawFailure::Panic(message) => assert!(message.contains("renderer exploded")),
        other => panic!("Expected panic failure, got {:?}", other),
    }

    let err = Classifier::new().classify(raw);
    assert_eq!(err.code(), ErrorCode::Unknown);
    assert!(err.stack().is_some());
}

#[tokio::test]
async fn test_join_error_cancelled_conversion() {
    let handle = tokio::spawn(async {
        tokio::time::sleep(Duration::from_secs(60)).await;
    });
    handle.abort();
    let join_err = handle.await.unwrap_err();

    let err = Classifier::new().classify(join_err);
    assert_eq!(err.code(), ErrorCode::OperationCancelled);
}

#[tokio::test]
async fn test_elapsed_conversion() {
    let elapsed = timeout(Duration::from_millis(1), tokio::time::sleep(Duration::from_secs(1)))
        .await
        .unwrap_err();

    let err = Classifier::new().classify(elapsed);
    assert_eq!(err.code(), ErrorCode::NetworkTimeout);
    assert!(err.retryable());
}

#[test]
fn test_io_error_carrying_app_error_is_unwrapped() {
    let inner = AppError::new(ErrorCode::StorageQuotaExceeded, "quota hit");
    let io = std::io::Error::new(ErrorKind::Other, inner.clone());

    let err = Classifier::new().classify(io);
    assert_eq!(err, inner);
}

#[test]
fn test_boxed_error_downcasts() {
    let boxed: Box<dyn std::error::Error + Send + Sync> =
        Box::new(AppError::new(ErrorCode::AuthRequired, "no session"));
    let err = Classifier::new().classify(boxed);
    assert_eq!(err.code(), ErrorCode::AuthRequired);

    let boxed: Box<dyn std::error::Error + Send + Sync> =
        Box::new(std::io::Error::new(ErrorKind::TimedOut, "slow peer"));
    let err = Classifier::new().classify(boxed);
    assert_eq!(err.code(), ErrorCode::NetworkTimeout);
}

#[test]
fn test_anyhow_error_conversion() {
    let app = anyhow::Error::new(AppError::new(ErrorCode::AiRateLimited, "slow down"));
    assert_eq!(Classifier::new().classify(app).code(), ErrorCode::AiRateLimited);

    let foreign = anyhow::anyhow!("Unexpected token < in JSON at position 0");
    assert_eq!(
        Classifier::new().classify(foreign).code(),
        ErrorCode::DataParseFailed
    );
}

#[test]
fn test_nested_io_source_is_found() {
    #[derive(Debug, thiserror::Error)]
    #[error("loading region atlas")]
    struct AtlasError {
        #[source]
        source: std::io::Error,
    }

    let err = AtlasError {
        source: std::io::Error::new(ErrorKind::ConnectionReset, "peer reset"),
    };
    let classified = Classifier::new().classify(RawFailure::native(err));
    assert_eq!(classified.code(), ErrorCode::NetworkRequestFailed);
    assert!(classified.message().contains("peer reset"));
}

#[test]
fn test_serde_json_error_conversion() {
    let parse_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
    let err = Classifier::new().classify(parse_err);
    assert_eq!(err.code(), ErrorCode::DataParseFailed);
    assert!(err.cause().is_some());
}
