//! Tests for error classification and conversions.

use eartho_one::error::{AuthError, ErrorCategory, RECOVERABLE_ERRORS};

#[test]
fn error_category_and_retry_flags_follow_variant() {
    struct Case {
        error: AuthError,
        expected_category: ErrorCategory,
        expected_retryable: bool,
        expected_recoverable: bool,
    }

    let cases = vec![
        Case {
            error: AuthError::CryptoUnavailable("no rng".to_string()),
            expected_category: ErrorCategory::Crypto,
            expected_retryable: false,
            expected_recoverable: false,
        },
        Case {
            error: AuthError::StateMismatch,
            expected_category: ErrorCategory::Integrity,
            expected_retryable: false,
            expected_recoverable: false,
        },
        Case {
            error: AuthError::MissingTransaction,
            expected_category: ErrorCategory::Integrity,
            expected_retryable: false,
            expected_recoverable: false,
        },
        Case {
            error: AuthError::InvalidIdToken("nonce mismatch".to_string()),
            expected_category: ErrorCategory::Integrity,
            expected_retryable: false,
            expected_recoverable: false,
        },
        Case {
            error: AuthError::Timeout { timeout_ms: 60_000 },
            expected_category: ErrorCategory::Timeout,
            expected_retryable: false,
            expected_recoverable: false,
        },
        Case {
            error: AuthError::LockTimeout("earthoOne.lock.getTokenSilently".to_string()),
            expected_category: ErrorCategory::Timeout,
            expected_retryable: true,
            expected_recoverable: false,
        },
        Case {
            error: AuthError::PopupCancelled,
            expected_category: ErrorCategory::Cancelled,
            expected_retryable: false,
            expected_recoverable: false,
        },
        Case {
            error: AuthError::PopupBlocked,
            expected_category: ErrorCategory::Cancelled,
            expected_retryable: false,
            expected_recoverable: false,
        },
        Case {
            error: AuthError::login_required(),
            expected_category: ErrorCategory::Provider,
            expected_retryable: false,
            expected_recoverable: true,
        },
        Case {
            error: AuthError::oauth("invalid_grant", None),
            expected_category: ErrorCategory::Provider,
            expected_retryable: false,
            expected_recoverable: false,
        },
        Case {
            error: AuthError::MissingRefreshToken,
            expected_category: ErrorCategory::Provider,
            expected_retryable: false,
            expected_recoverable: false,
        },
        Case {
            error: AuthError::Http {
                status: 503,
                message: "unavailable".to_string(),
            },
            expected_category: ErrorCategory::Network,
            expected_retryable: false,
            expected_recoverable: false,
        },
        Case {
            error: AuthError::Io("disk full".to_string()),
            expected_category: ErrorCategory::Storage,
            expected_retryable: false,
            expected_recoverable: false,
        },
        Case {
            error: AuthError::InvalidArgument("no code".to_string()),
            expected_category: ErrorCategory::Configuration,
            expected_retryable: false,
            expected_recoverable: false,
        },
        Case {
            error: AuthError::Internal("worker gone".to_string()),
            expected_category: ErrorCategory::Internal,
            expected_retryable: false,
            expected_recoverable: false,
        },
    ];

    for case in cases {
        assert_eq!(case.error.category(), case.expected_category, "{}", case.error);
        assert_eq!(case.error.is_retryable(), case.expected_retryable, "{}", case.error);
        assert_eq!(
            case.error.is_recoverable(),
            case.expected_recoverable,
            "{}",
            case.error
        );
    }
}

#[test]
fn every_interaction_code_is_recoverable() {
    for code in RECOVERABLE_ERRORS {
        let err = AuthError::oauth(*code, None);
        assert!(err.is_recoverable(), "{code} should be recoverable");
        assert_eq!(err.oauth_code(), Some(*code));
    }
}

#[test]
fn oauth_display_without_description() {
    let err = AuthError::oauth("login_required", None);
    assert_eq!(err.to_string(), "login_required: no description");
    assert_eq!(AuthError::StateMismatch.oauth_code(), None);
}

#[test]
fn io_and_serde_errors_convert() {
    let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
    assert!(matches!(AuthError::from(io), AuthError::Io(_)));

    let serde_error = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
    let err = AuthError::from(serde_error);
    assert!(matches!(err, AuthError::Serialization(_)));
    assert_eq!(err.category(), ErrorCategory::Storage);
}

#[tokio::test]
async fn reqwest_errors_become_network_errors() {
    let reqwest_error = reqwest::Client::new()
        .get("not a url")
        .send()
        .await
        .unwrap_err();
    let err = AuthError::from(reqwest_error);
    assert!(matches!(err, AuthError::Network(_)));
    assert!(!err.is_retryable());
}

#[test]
fn errors_clone_for_fan_out() {
    let err = AuthError::Http {
        status: 500,
        message: "upstream down".to_string(),
    };
    let copy = err.clone();
    assert_eq!(copy.to_string(), err.to_string());
}
