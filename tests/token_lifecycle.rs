mod support;

use std::sync::Arc;

use eartho_one::auth::AuthorizationParams;
use eartho_one::error::AuthError;
use eartho_one::lock::InProcessLocks;
use eartho_one::{CacheMode, GetTokenSilentlyOptions};
use futures::future::join_all;
use pretty_assertions::assert_eq;
use serde_json::json;
use support::{Answer, FakeFrame, Harness, Transports, EXPIRES_IN, REFRESH_PATH};
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

#[tokio::test]
async fn fresh_entry_is_served_without_network() {
    let harness = Harness::start().await;
    harness.mount_token_endpoint(1).await;
    harness.mount_refresh_endpoint(0).await;
    let client = harness.engine(harness.options());
    harness.login(&client).await;

    let first = client
        .get_token_silently_verbose(GetTokenSilentlyOptions::default())
        .await
        .unwrap();
    let second = client.get_access_token(Default::default()).await.unwrap();

    assert_eq!(first.access_token, "code-at-1");
    assert_eq!(first.expires_in, EXPIRES_IN as u64);
    assert_eq!(second, "code-at-1");
    assert!(!first.id_token.is_empty());
}

#[tokio::test]
async fn concurrent_callers_share_one_refresh() {
    let harness = Harness::start().await;
    harness.mount_token_endpoint(1).await;
    harness.mount_refresh_endpoint(1).await;
    let client = harness.engine(harness.options());
    harness.login(&client).await;
    harness.clock.advance(EXPIRES_IN);

    let calls = (0..10).map(|_| {
        let client = client.clone();
        async move { client.get_access_token(Default::default()).await }
    });
    let tokens = join_all(calls).await;

    for token in tokens {
        assert_eq!(token.unwrap(), "refreshed-at-1");
    }
}

#[tokio::test]
async fn expiry_skew_decides_freshness() {
    let harness = Harness::start().await;
    harness.mount_token_endpoint(1).await;
    harness.mount_refresh_endpoint(1).await;
    let client = harness.engine(harness.options());
    harness.login(&client).await;

    // One second before the 60s skew window.
    harness.clock.advance(EXPIRES_IN - 61);
    let cached = client.get_access_token(Default::default()).await.unwrap();
    assert_eq!(cached, "code-at-1");

    harness.clock.advance(1);
    let renewed = client.get_access_token(Default::default()).await.unwrap();
    assert_eq!(renewed, "refreshed-at-1");
}

#[tokio::test]
async fn renewed_tokens_keep_the_refresh_token_and_replace_the_entry() {
    let harness = Harness::start().await;
    harness.mount_token_endpoint(1).await;
    harness.mount_refresh_endpoint(1).await;
    let client = harness.engine(harness.options());
    harness.login(&client).await;
    harness.clock.advance(EXPIRES_IN);

    client.get_access_token(Default::default()).await.unwrap();
    let after = client
        .get_token_silently_verbose(GetTokenSilentlyOptions {
            cache_mode: CacheMode::CacheOnly,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(after.access_token, "refreshed-at-1");
}

#[tokio::test]
async fn cache_only_miss_is_login_required() {
    let harness = Harness::start().await;
    harness.mount_refresh_endpoint(0).await;
    let client = harness.engine(harness.options());

    let err = client
        .get_token_silently(GetTokenSilentlyOptions {
            cache_mode: CacheMode::CacheOnly,
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert_eq!(err.oauth_code(), Some("login_required"));
}

#[tokio::test]
async fn cache_off_always_renews() {
    let harness = Harness::start().await;
    harness.mount_token_endpoint(1).await;
    harness.mount_refresh_endpoint(2).await;
    let client = harness.engine(harness.options());
    harness.login(&client).await;

    let off = GetTokenSilentlyOptions {
        cache_mode: CacheMode::Off,
        ..Default::default()
    };
    assert_eq!(
        client.get_access_token(off.clone()).await.unwrap(),
        "refreshed-at-1"
    );
    assert_eq!(client.get_access_token(off).await.unwrap(), "refreshed-at-2");
}

#[tokio::test]
async fn failed_refresh_reaches_every_waiter() {
    let harness = Harness::start().await;
    harness.mount_token_endpoint(1).await;
    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream down"))
        .expect(1)
        .mount(&harness.server)
        .await;
    let client = harness.engine(harness.options());
    harness.login(&client).await;
    harness.clock.advance(EXPIRES_IN);

    let calls = (0..5).map(|_| {
        let client = client.clone();
        async move { client.get_access_token(Default::default()).await }
    });
    for result in join_all(calls).await {
        assert!(matches!(result, Err(AuthError::Http { status: 500, .. })));
    }
}

#[tokio::test]
async fn missing_refresh_token_without_frame_is_login_required() {
    let harness = Harness::start().await;
    let client = harness.engine(harness.options());

    let err = client
        .get_access_token(Default::default())
        .await
        .unwrap_err();
    assert_eq!(err.oauth_code(), Some("login_required"));
    assert!(err.is_recoverable());
}

#[tokio::test]
async fn rejected_refresh_token_falls_back_to_hidden_frame() {
    let harness = Harness::start().await;
    harness.mount_token_endpoint(2).await;
    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "Unknown or invalid refresh token.",
        })))
        .expect(1)
        .mount(&harness.server)
        .await;
    let frame = Arc::new(FakeFrame::new(Answer::Code, harness.nonce.clone()));
    let client = harness.engine_with(
        harness.options(),
        harness.context(),
        Transports {
            silent_frame: Some(frame.clone()),
            ..Transports::default()
        },
    );
    harness.login(&client).await;
    harness.clock.advance(EXPIRES_IN);

    let token = client.get_access_token(Default::default()).await.unwrap();
    assert_eq!(token, "code-at-2");

    let loads = frame.loads();
    assert_eq!(loads.len(), 1);
    let params = support::query(&loads[0]);
    assert_eq!(params["prompt"], "none");
    assert_eq!(params["response_mode"], "web_message");
}

#[tokio::test]
async fn tabs_sharing_a_lock_refresh_once() {
    let harness = Harness::start().await;
    harness.mount_token_endpoint(1).await;
    harness.mount_refresh_endpoint(1).await;
    let locks = Arc::new(InProcessLocks::new());
    let tab = |harness: &Harness| {
        harness.engine_with(
            harness.options(),
            harness.context().with_cross_tab_lock(locks.clone()),
            Transports::default(),
        )
    };
    let first = tab(&harness);
    let second = tab(&harness);
    harness.login(&first).await;
    harness.clock.advance(EXPIRES_IN);

    let (a, b) = tokio::join!(
        first.get_access_token(Default::default()),
        second.get_access_token(Default::default()),
    );
    assert_eq!(a.unwrap(), "refreshed-at-1");
    assert_eq!(b.unwrap(), "refreshed-at-1");
}

#[tokio::test]
async fn different_scopes_are_cached_separately() {
    let harness = Harness::start().await;
    harness.mount_token_endpoint(2).await;
    harness.mount_refresh_endpoint(0).await;
    let frame = Arc::new(FakeFrame::new(Answer::Code, harness.nonce.clone()));
    let client = harness.engine_with(
        harness.options(),
        harness.context(),
        Transports {
            silent_frame: Some(frame.clone()),
            ..Transports::default()
        },
    );
    harness.login(&client).await;

    // No refresh token is stored for the wider scope, so it goes through the frame.
    let wider = GetTokenSilentlyOptions {
        authorization_params: AuthorizationParams::default().with_scope("read:items"),
        ..Default::default()
    };
    assert_eq!(
        client.get_access_token(wider.clone()).await.unwrap(),
        "code-at-2"
    );
    assert_eq!(
        client.get_access_token(Default::default()).await.unwrap(),
        "code-at-1"
    );
    assert_eq!(client.get_access_token(wider).await.unwrap(), "code-at-2");
    assert_eq!(frame.loads().len(), 1);
}

#[tokio::test]
async fn expired_session_without_refresh_token_reports_no_user() {
    let harness = Harness::start().await;
    harness.mount_token_endpoint(1).await;
    let mut options = harness.options();
    options.use_refresh_tokens = false;
    let client = harness.engine_with(options, harness.context(), Transports::default());
    harness.login(&client).await;
    assert!(client.get_user().await.unwrap().is_some());

    harness.clock.advance(30 * 24 * 60 * 60);

    let err = client
        .get_access_token(Default::default())
        .await
        .unwrap_err();
    assert_eq!(err.oauth_code(), Some("login_required"));
    assert!(client.get_user().await.unwrap().is_none());
    assert!(client.get_id_token_claims().await.unwrap().is_none());
    assert!(!client.is_connected().await.unwrap());
}

#[tokio::test]
async fn concurrent_callers_on_an_empty_cache_share_one_frame_round_trip() {
    let harness = Harness::start().await;
    harness.mount_token_endpoint(1).await;
    let frame = Arc::new(FakeFrame::new(Answer::Code, harness.nonce.clone()));
    let mut options = harness.options();
    options.use_refresh_tokens = false;
    let client = harness.engine_with(
        options,
        harness.context(),
        Transports {
            silent_frame: Some(frame.clone()),
            ..Transports::default()
        },
    );

    let calls = (0..10).map(|_| {
        let client = client.clone();
        async move { client.get_token_silently(GetTokenSilentlyOptions::default()).await }
    });
    for token in join_all(calls).await {
        assert_eq!(token.unwrap(), "code-at-1");
    }
    assert_eq!(frame.loads().len(), 1);
    assert_eq!(frame.delivered(), 1);
}
