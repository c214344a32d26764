//! Key directory caching, refresh and outage behavior

mod common;

use std::sync::Arc;
use std::time::Duration;

use aif_auth::{AtkError, KeyDirectory};
use common::{KEYS_PATH, MockAuthority, TestKey, key_set};
use pretty_assertions::assert_eq;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

fn directory(authority: &MockAuthority) -> KeyDirectory {
    KeyDirectory::new(authority.keys_url(), reqwest::Client::new())
}

#[tokio::test]
async fn test_fresh_snapshot_serves_hits_and_misses_without_refetch() {
    let key = TestKey::generate("key-1");
    let authority = MockAuthority::start().await;
    authority.mock_keys(&[&key]).await;
    let directory = directory(&authority);

    let entry = directory.get_key("key-1").await.unwrap();
    assert_eq!(entry.key_id(), "key-1");
    directory.get_key("key-1").await.unwrap();

    // Probing unknown ids must not amplify into authority requests.
    for kid in ["key-2", "key-3", "key-4"] {
        let err = directory.get_key(kid).await.unwrap_err();
        assert!(matches!(err, AtkError::KeyNotFound(_)), "got {err:?}");
    }

    assert_eq!(authority.request_count(KEYS_PATH).await, 1);
    assert_eq!(directory.fetch_count(), 1);
    assert_eq!(directory.key_ids(), vec!["key-1".to_string()]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_lookups_share_one_fetch() {
    let key = TestKey::generate("key-1");
    let authority = MockAuthority::start().await;
    Mock::given(method("GET"))
        .and(path(KEYS_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(key_set(&[&key]))
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&authority.server)
        .await;

    let directory = Arc::new(directory(&authority));
    let lookups = (0..16).map(|_| {
        let directory = Arc::clone(&directory);
        tokio::spawn(async move { directory.get_key("key-1").await })
    });
    let results = futures::future::join_all(lookups).await;

    for result in results {
        assert_eq!(result.unwrap().unwrap().key_id(), "key-1");
    }
    assert_eq!(directory.fetch_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_waiters_share_a_failed_fetch() {
    let authority = MockAuthority::start().await;
    Mock::given(method("GET"))
        .and(path(KEYS_PATH))
        .respond_with(ResponseTemplate::new(503).set_delay(Duration::from_millis(200)))
        .expect(1)
        .mount(&authority.server)
        .await;

    let directory = Arc::new(directory(&authority));
    let lookups = (0..8).map(|_| {
        let directory = Arc::clone(&directory);
        tokio::spawn(async move { directory.get_key("key-1").await })
    });

    for result in futures::future::join_all(lookups).await {
        let err = result.unwrap().unwrap_err();
        assert!(matches!(err, AtkError::RegistryConnection(_)), "got {err:?}");
    }
}

#[tokio::test]
async fn test_expired_snapshot_is_refreshed() {
    let old_key = TestKey::generate("key-1");
    let new_key = TestKey::generate("key-2");
    let authority = MockAuthority::start().await;
    Mock::given(method("GET"))
        .and(path(KEYS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(key_set(&[&old_key])))
        .up_to_n_times(1)
        .mount(&authority.server)
        .await;
    authority.mock_keys(&[&new_key]).await;

    let directory = directory(&authority).with_ttl(Duration::from_millis(100));
    directory.get_key("key-1").await.unwrap();
    let err = directory.get_key("key-2").await.unwrap_err();
    assert!(matches!(err, AtkError::KeyNotFound(_)), "got {err:?}");

    tokio::time::sleep(Duration::from_millis(200)).await;

    // The rotated set replaces the old one wholesale.
    directory.get_key("key-2").await.unwrap();
    let err = directory.get_key("key-1").await.unwrap_err();
    assert!(matches!(err, AtkError::KeyNotFound(_)), "got {err:?}");
    assert_eq!(directory.fetch_count(), 2);
}

#[tokio::test]
async fn test_outage_without_snapshot() {
    let authority = MockAuthority::start().await;
    Mock::given(method("GET"))
        .and(path(KEYS_PATH))
        .respond_with(ResponseTemplate::new(503))
        .mount(&authority.server)
        .await;

    let err = directory(&authority).get_key("key-1").await.unwrap_err();
    assert!(matches!(err, AtkError::RegistryConnection(_)), "got {err:?}");
}

async fn authority_that_goes_down(key: &TestKey) -> MockAuthority {
    let authority = MockAuthority::start().await;
    Mock::given(method("GET"))
        .and(path(KEYS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(key_set(&[key])))
        .up_to_n_times(1)
        .mount(&authority.server)
        .await;
    Mock::given(method("GET"))
        .and(path(KEYS_PATH))
        .respond_with(ResponseTemplate::new(503))
        .mount(&authority.server)
        .await;
    authority
}

#[tokio::test]
async fn test_expired_snapshot_is_not_served_by_default() {
    let key = TestKey::generate("key-1");
    let authority = authority_that_goes_down(&key).await;
    let directory = directory(&authority).with_ttl(Duration::from_millis(100));

    directory.get_key("key-1").await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let err = directory.get_key("key-1").await.unwrap_err();
    assert!(matches!(err, AtkError::RegistryConnection(_)), "got {err:?}");
}

#[tokio::test]
async fn test_stale_fallback_when_enabled() {
    let key = TestKey::generate("key-1");
    let authority = authority_that_goes_down(&key).await;
    let directory = directory(&authority)
        .with_ttl(Duration::from_millis(100))
        .with_stale_fallback(true);

    directory.get_key("key-1").await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(directory.get_key("key-1").await.unwrap().key_id(), "key-1");
    // A key missing from the stale set cannot be told apart from an outage.
    let err = directory.get_key("key-2").await.unwrap_err();
    assert!(matches!(err, AtkError::RegistryConnection(_)), "got {err:?}");
    assert!(directory.snapshot_age().unwrap() >= Duration::from_millis(200));
}

#[tokio::test]
async fn test_fetch_timeout() {
    let key = TestKey::generate("key-1");
    let authority = MockAuthority::start().await;
    Mock::given(method("GET"))
        .and(path(KEYS_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(key_set(&[&key]))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&authority.server)
        .await;

    let directory = directory(&authority).with_fetch_timeout(Duration::from_millis(200));
    let started = std::time::Instant::now();
    let err = directory.get_key("key-1").await.unwrap_err();

    assert!(matches!(err, AtkError::RegistryConnection(_)), "got {err:?}");
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_malformed_directory() {
    let authority = MockAuthority::start().await;
    Mock::given(method("GET"))
        .and(path(KEYS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&authority.server)
        .await;

    let err = directory(&authority).get_key("key-1").await.unwrap_err();
    assert_eq!(err, AtkError::RegistryConnection("malformed key directory".into()));
    let message = err.to_string();
    assert!(!message.contains("error decoding"), "{message}");
    assert!(!message.contains(&authority.server.uri()), "{message}");
}

#[tokio::test]
async fn test_unreachable_directory_message() {
    let unreachable = url::Url::parse("http://127.0.0.1:1/.well-known/jwks.json").unwrap();
    let directory = KeyDirectory::new(unreachable, reqwest::Client::new())
        .with_fetch_timeout(Duration::from_secs(2));

    let err = directory.get_key("key-1").await.unwrap_err();
    assert!(matches!(err, AtkError::RegistryConnection(_)), "got {err:?}");
    let message = err.to_string();
    assert!(!message.contains("error sending request"), "{message}");
    assert!(!message.contains("127.0.0.1"), "{message}");
}

#[tokio::test]
async fn test_unusable_entries_are_skipped() {
    let key = TestKey::generate("key-1");
    let authority = MockAuthority::start().await;
    Mock::given(method("GET"))
        .and(path(KEYS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "keys": [
                key.jwk(),
                {"kty": "oct", "kid": "hmac", "alg": "HS256", "k": "c2VjcmV0"},
                {"kty": "OKP", "crv": "Ed25519", "alg": "EdDSA"},
            ]
        })))
        .mount(&authority.server)
        .await;

    let directory = directory(&authority);
    assert_eq!(directory.refresh().await.unwrap(), 1);
    assert_eq!(directory.key_ids(), vec!["key-1".to_string()]);
}

#[tokio::test]
async fn test_invalidate_and_forced_refresh() {
    let key = TestKey::generate("key-1");
    let authority = MockAuthority::start().await;
    authority.mock_keys(&[&key]).await;
    let directory = directory(&authority);

    assert_eq!(directory.refresh().await.unwrap(), 1);
    directory.get_key("key-1").await.unwrap();
    assert_eq!(directory.fetch_count(), 1);

    directory.invalidate();
    assert!(directory.snapshot_age().is_none());
    directory.get_key("key-1").await.unwrap();
    assert_eq!(directory.fetch_count(), 2);
    assert_eq!(directory.entries().len(), 1);
}
