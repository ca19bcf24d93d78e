use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use terra_core::api::{build_http_client, ApiClient};
use terra_core::error::ApiError;
use terra_core::session::{SessionManager, SessionStatus};
use terra_core::store::{KeyValueStore, MemoryStore, ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY};

mod support;
use support::{MockBackend, MockState};

fn client_for(base_url: &str, access: Option<&str>, refresh: Option<&str>) -> (ApiClient, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let mut seed = vec![];
    if let Some(a) = access {
        seed.push((ACCESS_TOKEN_KEY, a));
    }
    if let Some(r) = refresh {
        seed.push((REFRESH_TOKEN_KEY, r));
    }
    store.set_many(&seed).unwrap();

    let http = build_http_client(Duration::from_secs(5)).unwrap();
    let session = Arc::new(SessionManager::new(store.clone(), http.clone(), base_url));
    session.restore_session();
    (ApiClient::new(http, base_url, session), store)
}

fn refresh_map(entries: &[(&str, &str, Option<&str>)]) -> std::collections::HashMap<String, (String, Option<String>)> {
    entries
        .iter()
        .map(|(old, access, rotated)| {
            (
                old.to_string(),
                (access.to_string(), rotated.map(str::to_string)),
            )
        })
        .collect()
}

#[tokio::test]
async fn refresh_rotates_both_tokens() {
    let backend = MockBackend::start(MockState {
        valid_access: "A".into(),
        refresh_map: refresh_map(&[("R1", "B", Some("R2"))]),
        ..Default::default()
    });
    let (api, store) = client_for(&backend.url, Some("A"), Some("R1"));

    assert!(api.session().refresh().await);

    assert_eq!(api.session().access_token().as_deref(), Some("B"));
    assert_eq!(store.get(ACCESS_TOKEN_KEY).unwrap().as_deref(), Some("B"));
    assert_eq!(store.get(REFRESH_TOKEN_KEY).unwrap().as_deref(), Some("R2"));
    let s = backend.state();
    assert_eq!(s.refresh_calls, 1);
    assert_eq!(s.refresh_bodies[0], json!({ "refreshToken": "R1" }));
}

#[tokio::test]
async fn restore_after_refresh_returns_the_new_access_token() {
    let backend = MockBackend::start(MockState {
        refresh_map: refresh_map(&[("R1", "B", Some("R2"))]),
        ..Default::default()
    });
    let (api, store) = client_for(&backend.url, Some("A"), Some("R1"));
    assert!(api.session().refresh().await);

    let http = build_http_client(Duration::from_secs(5)).unwrap();
    let relaunched = SessionManager::new(store, http, &backend.url);
    let credential = relaunched.restore_session().unwrap();

    assert_eq!(credential.access_token, "B");
    assert_eq!(credential.refresh_token.as_deref(), Some("R2"));
}

#[tokio::test]
async fn cancelled_caller_does_not_lose_a_rotated_pair() {
    let backend = MockBackend::start(MockState {
        valid_access: "B".into(),
        refresh_map: refresh_map(&[("R1", "B", Some("R2"))]),
        refresh_delay_ms: 300,
        ..Default::default()
    });
    let (api, store) = client_for(&backend.url, Some("A"), Some("R1"));

    let first = tokio::time::timeout(
        Duration::from_millis(100),
        api.session().refresh_after_rejection("A"),
    )
    .await;
    assert!(first.is_err(), "caller should have timed out mid-exchange");

    // A second caller rejected with the same token waits for the in-flight
    // exchange instead of replaying R1.
    assert!(api.session().refresh_after_rejection("A").await);

    assert_eq!(backend.state().refresh_calls, 1);
    assert_eq!(store.get(ACCESS_TOKEN_KEY).unwrap().as_deref(), Some("B"));
    assert_eq!(store.get(REFRESH_TOKEN_KEY).unwrap().as_deref(), Some("R2"));
    assert_eq!(api.session().access_token().as_deref(), Some("B"));
}

#[tokio::test]
async fn refresh_without_rotation_keeps_refresh_token() {
    let backend = MockBackend::start(MockState {
        refresh_map: refresh_map(&[("R1", "B", None)]),
        ..Default::default()
    });
    let (api, store) = client_for(&backend.url, Some("A"), Some("R1"));

    assert!(api.session().refresh().await);

    assert_eq!(store.get(ACCESS_TOKEN_KEY).unwrap().as_deref(), Some("B"));
    assert_eq!(store.get(REFRESH_TOKEN_KEY).unwrap().as_deref(), Some("R1"));
}

#[tokio::test]
async fn refresh_without_refresh_token_makes_no_request() {
    let backend = MockBackend::start(MockState::default());
    let (api, _store) = client_for(&backend.url, Some("A"), None);

    assert!(!api.session().refresh().await);
    assert_eq!(backend.state().refresh_calls, 0);
    assert_eq!(api.session().access_token().as_deref(), Some("A"));
}

#[tokio::test]
async fn rejected_refresh_leaves_tokens_untouched() {
    let backend = MockBackend::start(MockState::default());
    let (api, store) = client_for(&backend.url, Some("A"), Some("R1"));

    assert!(!api.session().refresh().await);

    assert_eq!(backend.state().refresh_calls, 1);
    assert_eq!(store.get(ACCESS_TOKEN_KEY).unwrap().as_deref(), Some("A"));
    assert_eq!(store.get(REFRESH_TOKEN_KEY).unwrap().as_deref(), Some("R1"));
    assert_eq!(api.session().status(), SessionStatus::LoggedIn);
}

#[tokio::test]
async fn refresh_transport_failure_returns_false() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let (api, _store) = client_for(&format!("http://127.0.0.1:{port}"), Some("A"), Some("R1"));

    assert!(!api.session().refresh().await);
    assert_eq!(api.session().access_token().as_deref(), Some("A"));
}

#[tokio::test]
async fn rejected_request_is_retried_once_with_the_refreshed_token() {
    let backend = MockBackend::start(MockState {
        valid_access: "B".into(),
        refresh_map: refresh_map(&[("R1", "B", Some("R2"))]),
        history: vec![support::completed("1", "batch")],
        ..Default::default()
    });
    let (api, store) = client_for(&backend.url, Some("A"), Some("R1"));

    let items = api.fetch_history(None).await.unwrap();

    assert_eq!(items.len(), 1);
    let s = backend.state();
    assert_eq!(s.seen_history_auth, vec!["A".to_string(), "B".to_string()]);
    assert_eq!(s.refresh_calls, 1);
    assert_eq!(store.get(ACCESS_TOKEN_KEY).unwrap().as_deref(), Some("B"));
    assert_eq!(store.get(REFRESH_TOKEN_KEY).unwrap().as_deref(), Some("R2"));
}

#[tokio::test]
async fn failed_refresh_surfaces_session_expired() {
    let backend = MockBackend::start(MockState {
        valid_access: "B".into(),
        ..Default::default()
    });
    let (api, _store) = client_for(&backend.url, Some("A"), Some("R1"));

    let err = api.fetch_history(None).await.unwrap_err();

    assert!(matches!(err, ApiError::SessionExpired), "{err:?}");
    assert!(err.requires_login());
    let s = backend.state();
    assert_eq!(s.history_calls, 1);
    assert_eq!(s.refresh_calls, 1);
}

#[tokio::test]
async fn concurrent_rejections_share_one_refresh() {
    let backend = MockBackend::start(MockState {
        valid_access: "B".into(),
        refresh_map: refresh_map(&[("R1", "B", Some("R2"))]),
        refresh_delay_ms: 100,
        history: vec![support::pending("1", "batch")],
        ..Default::default()
    });
    let (api, _store) = client_for(&backend.url, Some("A"), Some("R1"));

    let results = futures_util::future::join_all((0..5).map(|_| api.fetch_history(None))).await;

    assert!(results.iter().all(Result::is_ok), "{results:?}");
    assert_eq!(backend.state().refresh_calls, 1);
    assert_eq!(api.session().access_token().as_deref(), Some("B"));
}

#[tokio::test]
async fn concurrent_rejections_with_a_dead_refresh_token_refresh_once() {
    let backend = MockBackend::start(MockState {
        valid_access: "B".into(),
        refresh_delay_ms: 100,
        ..Default::default()
    });
    let (api, _store) = client_for(&backend.url, Some("A"), Some("R1"));

    let results = futures_util::future::join_all((0..4).map(|_| api.fetch_models())).await;

    assert!(results
        .iter()
        .all(|r| matches!(r, Err(ApiError::SessionExpired))));
    assert_eq!(backend.state().refresh_calls, 1);
}

#[tokio::test]
async fn missing_access_token_short_circuits() {
    let backend = MockBackend::start(MockState::default());
    let (api, _store) = client_for(&backend.url, None, Some("R1"));

    let err = api.fetch_models().await.unwrap_err();

    assert!(matches!(err, ApiError::NoCredential), "{err:?}");
    let s = backend.state();
    assert_eq!(s.models_calls, 0);
    assert_eq!(s.refresh_calls, 0);
}

#[tokio::test]
async fn logout_notifies_once_and_is_idempotent() {
    let backend = MockBackend::start(MockState::default());
    let (api, store) = client_for(&backend.url, Some("A"), Some("R1"));
    let mut rx = api.session().subscribe();
    assert_eq!(*rx.borrow_and_update(), SessionStatus::LoggedIn);

    api.session().logout();
    assert!(rx.has_changed().unwrap());
    assert_eq!(*rx.borrow_and_update(), SessionStatus::LoggedOut);

    api.session().logout();
    assert!(!rx.has_changed().unwrap());
    assert_eq!(store.get(ACCESS_TOKEN_KEY).unwrap(), None);
    assert_eq!(store.get(REFRESH_TOKEN_KEY).unwrap(), None);
}

#[tokio::test]
async fn generate_sends_camel_case_body_and_normalizes_request_id() {
    let backend = MockBackend::start(MockState {
        valid_access: "A".into(),
        generate_response: json!({ "request_id": 42 }),
        ..Default::default()
    });
    let (api, _store) = client_for(&backend.url, Some("A"), Some("R1"));

    let request_id = api.submit_generation("a red fox", "flux", 2).await.unwrap();

    assert_eq!(request_id, "42");
    assert_eq!(
        backend.state().generate_bodies[0],
        json!({ "prompt": "a red fox", "model": "flux", "numImages": 2 })
    );
}

#[tokio::test]
async fn models_keep_server_order() {
    let backend = MockBackend::start(MockState {
        valid_access: "A".into(),
        models: vec![support::model("flux"), support::model("sdxl")],
        ..Default::default()
    });
    let (api, _store) = client_for(&backend.url, Some("A"), Some("R1"));

    let models = api.fetch_models().await.unwrap();

    let ids: Vec<_> = models.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["flux", "sdxl"]);
    assert_eq!(models[0].name, "Model flux");
}
