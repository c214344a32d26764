//! Common test utilities for integration tests
//!
//! A wiremock-backed authority (key directory + revocation endpoint) and
//! Ed25519 signing keys for minting Agent Tokens.

#![allow(dead_code)]

use std::time::{SystemTime, UNIX_EPOCH};

use aif_auth::AtkConfig;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use ring::rand::SystemRandom;
use ring::signature::{Ed25519KeyPair, KeyPair};
use serde_json::{Value, json};
use url::Url;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const ISSUER: &str = "aif://issuer.example";
pub const AGENT_ID: &str = "aif://issuer.example/model-x/user-42/instance-7";
pub const KEYS_PATH: &str = "/.well-known/jwks.json";
pub const REVOCATION_PATH: &str = "/api/v1/revocation/status";

/// Mock AIF authority
pub struct MockAuthority {
    pub server: MockServer,
}

impl MockAuthority {
    /// Start a mock authority on a loopback port
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    pub fn base_url(&self) -> Url {
        Url::parse(&self.server.uri()).expect("mock server URI")
    }

    pub fn keys_url(&self) -> Url {
        self.base_url().join(KEYS_PATH).expect("key directory URL")
    }

    pub fn revocation_url(&self) -> Url {
        self.base_url().join(REVOCATION_PATH).expect("revocation URL")
    }

    /// Configuration accepting audience `svc-a` from this authority
    pub fn config(&self) -> AtkConfig {
        AtkConfig::new(self.base_url(), ISSUER, ["svc-a"])
    }

    /// Serve a key directory containing `keys`
    pub async fn mock_keys(&self, keys: &[&TestKey]) {
        Mock::given(method("GET"))
            .and(path(KEYS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(key_set(keys)))
            .mount(&self.server)
            .await;
    }

    /// Answer revocation queries for `jti`
    pub async fn mock_revocation(&self, jti: &str, revoked: bool) {
        Mock::given(method("GET"))
            .and(path(REVOCATION_PATH))
            .and(query_param("jti", jti))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jti": jti,
                "is_revoked": revoked,
            })))
            .mount(&self.server)
            .await;
    }

    /// Fail every revocation query
    pub async fn mock_revocation_outage(&self) {
        Mock::given(method("GET"))
            .and(path(REVOCATION_PATH))
            .respond_with(ResponseTemplate::new(503))
            .mount(&self.server)
            .await;
    }

    /// Number of requests received on `request_path`
    pub async fn request_count(&self, request_path: &str) -> usize {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|req| req.url.path() == request_path)
            .count()
    }
}

/// Key directory document for `keys`
pub fn key_set(keys: &[&TestKey]) -> Value {
    json!({ "keys": keys.iter().map(|k| k.jwk()).collect::<Vec<_>>() })
}

/// Ed25519 signing key with a key id
pub struct TestKey {
    pub kid: String,
    pkcs8: Vec<u8>,
    public_key: Vec<u8>,
}

impl TestKey {
    pub fn generate(kid: &str) -> Self {
        let pkcs8 = Ed25519KeyPair::generate_pkcs8(&SystemRandom::new()).expect("generate key");
        let pair = Ed25519KeyPair::from_pkcs8(pkcs8.as_ref()).expect("parse key");

        Self {
            kid: kid.to_string(),
            pkcs8: pkcs8.as_ref().to_vec(),
            public_key: pair.public_key().as_ref().to_vec(),
        }
    }

    /// Public JWK as published by the authority
    pub fn jwk(&self) -> Value {
        json!({
            "kty": "OKP",
            "crv": "Ed25519",
            "use": "sig",
            "alg": "EdDSA",
            "kid": self.kid,
            "x": URL_SAFE_NO_PAD.encode(&self.public_key),
        })
    }

    /// Sign `claims` with this key's id in the header
    pub fn sign(&self, claims: &Value) -> String {
        let mut header = Header::new(Algorithm::EdDSA);
        header.kid = Some(self.kid.clone());
        self.sign_with_header(&header, claims)
    }

    pub fn sign_with_header(&self, header: &Header, claims: &Value) -> String {
        let key = EncodingKey::from_ed_der(&self.pkcs8);
        encode(header, claims, &key).expect("encode token")
    }
}

/// Token with an arbitrary header and a garbage signature
pub fn forge_token(header: &Value, claims: &Value) -> String {
    format!(
        "{}.{}.{}",
        URL_SAFE_NO_PAD.encode(header.to_string()),
        URL_SAFE_NO_PAD.encode(claims.to_string()),
        URL_SAFE_NO_PAD.encode(b"not a signature"),
    )
}

/// Get current Unix timestamp
pub fn current_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("Time went backwards")
        .as_secs() as i64
}

/// Well-formed claim set valid for an hour
pub fn valid_claims() -> Value {
    let now = current_timestamp();
    json!({
        "iss": ISSUER,
        "sub": AGENT_ID,
        "aud": ["svc-a"],
        "exp": now + 3600,
        "iat": now,
        "jti": "abc-1",
        "permissions": ["read:calendar", "write:calendar"],
        "purpose": "schedule a meeting",
        "trust_tags": {"verified_user": true},
    })
}
