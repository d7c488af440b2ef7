use super::*;

#[test]
fn test_retryable_classification() {
    assert!(SwitchboardError::transient(Dependency::Delivery, "503").is_retryable());
    assert!(
        SwitchboardError::BreakerOpen {
            dependency: Dependency::Generation,
            remaining_secs: 10,
        }
        .is_retryable()
    );
    assert!(SwitchboardError::Internal(anyhow::anyhow!("boom")).is_retryable());

    assert!(!SwitchboardError::permanent(Dependency::Delivery, "401").is_retryable());
    assert!(!SwitchboardError::Auth(AuthError::BadSignature).is_retryable());
    assert!(!SwitchboardError::RateLimited(RateLimitReason::Address).is_retryable());
    assert!(!SwitchboardError::SafetyViolation("jailbreak".into()).is_retryable());
    assert!(!SwitchboardError::Config("bad".into()).is_retryable());
}

#[test]
fn test_auth_error_status_mapping() {
    assert!(AuthError::StaleTimestamp { skew_secs: 600 }.is_bad_request());
    assert!(AuthError::MalformedTimestamp.is_bad_request());
    assert!(!AuthError::BadSignature.is_bad_request());
    assert!(!AuthError::MissingHeader("X-Signature").is_bad_request());
    assert!(!AuthError::BadToken.is_bad_request());
}

#[test]
fn test_display_includes_dependency() {
    let err = SwitchboardError::transient(Dependency::Generation, "HTTP 502");
    assert_eq!(err.to_string(), "generation transient failure: HTTP 502");

    let err = SwitchboardError::BreakerOpen {
        dependency: Dependency::Delivery,
        remaining_secs: 42,
    };
    assert_eq!(
        err.to_string(),
        "delivery circuit breaker is open (42s remaining)"
    );
}

#[test]
fn test_auth_from_conversion() {
    let err: SwitchboardError = AuthError::BadToken.into();
    assert_eq!(err.kind(), "auth");
    assert!(err.to_string().contains("webhook token mismatch"));
}
