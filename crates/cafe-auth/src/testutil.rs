//! Test fixtures: RSA signers, token claims and a mock identity provider.
//!
//! Compiled for this crate's tests and, behind the `test-util` feature, for
//! downstream crates' tests.

#![allow(clippy::expect_used, clippy::missing_panics_doc)]

use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use rsa::pkcs8::{EncodePrivateKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::RsaPrivateKey;
use serde_json::{Value, json};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;

use crate::config::{AuthSettings, JWKS_PATH};

/// Audience minted into test tokens
pub const AUDIENCE: &str = "api";
/// Subject minted into test tokens
pub const SUBJECT: &str = "auth0|barista";
/// Identity provider domain used for test settings
pub const DOMAIN: &str = "trust.example";
/// Issuer minted into test tokens
pub const ISSUER: &str = "https://trust.example/";

/// An RSA key pair that signs RS256 tokens under a fixed `kid`.
#[derive(Clone)]
pub struct TestSigner {
    kid: &'static str,
    private_key: Arc<RsaPrivateKey>,
    encoding_key: Arc<EncodingKey>,
}

impl std::fmt::Debug for TestSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestSigner").field("kid", &self.kid).finish()
    }
}

impl TestSigner {
    /// Key ID of the identity provider's current signing key
    pub const TRUSTED_KID: &'static str = "trusted-key";
    /// Key ID of a key the identity provider rotates in later
    pub const ROTATED_KID: &'static str = "rotated-key";

    /// The identity provider's current key
    pub fn trusted() -> Self {
        static KEY: OnceLock<Arc<RsaPrivateKey>> = OnceLock::new();
        Self::with_key(Self::TRUSTED_KID, KEY.get_or_init(generate_key))
    }

    /// A different key claiming the trusted `kid`: forged signatures
    pub fn impostor() -> Self {
        static KEY: OnceLock<Arc<RsaPrivateKey>> = OnceLock::new();
        Self::with_key(Self::TRUSTED_KID, KEY.get_or_init(generate_key))
    }

    /// A new key the identity provider has not published yet
    pub fn rotated() -> Self {
        static KEY: OnceLock<Arc<RsaPrivateKey>> = OnceLock::new();
        Self::with_key(Self::ROTATED_KID, KEY.get_or_init(generate_key))
    }

    fn with_key(kid: &'static str, key: &Arc<RsaPrivateKey>) -> Self {
        let pem = key
            .to_pkcs8_pem(LineEnding::LF)
            .expect("Failed to encode private key");
        let encoding_key =
            EncodingKey::from_rsa_pem(pem.as_bytes()).expect("Invalid RSA key");
        Self {
            kid,
            private_key: Arc::clone(key),
            encoding_key: Arc::new(encoding_key),
        }
    }

    /// Key ID this signer puts in token headers
    pub fn kid(&self) -> &'static str {
        self.kid
    }

    /// Sign claims as an RS256 JWT with this signer's `kid`
    pub fn sign(&self, claims: &Value) -> String {
        let mut header = Header::new(Algorithm::RS256);
        header.typ = Some("JWT".to_string());
        header.kid = Some(self.kid.to_string());
        self.sign_with_header(header, claims)
    }

    /// Sign claims under an arbitrary JOSE header
    pub fn sign_with_header(&self, header: Header, claims: &Value) -> String {
        jsonwebtoken::encode(&header, claims, &self.encoding_key)
            .expect("Failed to encode test JWT")
    }

    /// Public half as a JWK
    pub fn jwk(&self) -> Value {
        let public = self.private_key.to_public_key();
        json!({
            "kty": "RSA",
            "use": "sig",
            "alg": "RS256",
            "kid": self.kid,
            "n": URL_SAFE_NO_PAD.encode(public.n().to_bytes_be()),
            "e": URL_SAFE_NO_PAD.encode(public.e().to_bytes_be()),
        })
    }
}

fn generate_key() -> Arc<RsaPrivateKey> {
    let mut rng = rand::thread_rng();
    Arc::new(RsaPrivateKey::new(&mut rng, 2048).expect("Failed to generate RSA key"))
}

/// Build a JWKS document for the given signers
pub fn jwks(signers: &[TestSigner]) -> Value {
    json!({ "keys": signers.iter().map(TestSigner::jwk).collect::<Vec<_>>() })
}

/// Serves whatever template is currently installed
#[derive(Clone)]
struct SwappableResponse {
    current: Arc<Mutex<ResponseTemplate>>,
}

impl Respond for SwappableResponse {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        self.current.lock().expect("responder poisoned").clone()
    }
}

/// A wiremock-backed identity provider serving `/.well-known/jwks.json`.
///
/// The served response can be swapped mid-test to simulate key rotation and
/// outages.
pub struct MockIdentityProvider {
    server: MockServer,
    response: SwappableResponse,
    delay: Mutex<Option<Duration>>,
}

impl MockIdentityProvider {
    /// Start a provider publishing the given signers' keys
    pub async fn start(signers: &[TestSigner]) -> Self {
        let server = MockServer::start().await;
        let response = SwappableResponse {
            current: Arc::new(Mutex::new(
                ResponseTemplate::new(200).set_body_json(jwks(signers)),
            )),
        };

        Mock::given(method("GET"))
            .and(path(format!("/{JWKS_PATH}")))
            .respond_with(response.clone())
            .mount(&server)
            .await;

        Self {
            server,
            response,
            delay: Mutex::new(None),
        }
    }

    /// The provider's JWKS endpoint
    pub fn jwks_url(&self) -> Url {
        Url::parse(&format!("{}/{JWKS_PATH}", self.server.uri())).expect("mock server URI")
    }

    /// Publish a new key set (rotation)
    pub async fn publish(&self, signers: &[TestSigner]) {
        self.install(ResponseTemplate::new(200).set_body_json(jwks(signers)));
    }

    /// Answer every fetch with this status
    pub async fn fail_with(&self, status: u16) {
        self.install(ResponseTemplate::new(status));
    }

    /// Answer every fetch with a raw 200 body
    pub async fn respond_with_body(&self, body: &str) {
        self.install(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/json")
                .set_body_string(body),
        );
    }

    /// Delay the current and future responses
    pub async fn delay_responses(&self, delay: Duration) {
        *self.delay.lock().expect("delay poisoned") = Some(delay);
        let mut current = self.response.current.lock().expect("responder poisoned");
        *current = current.clone().set_delay(delay);
    }

    /// How many JWKS fetches the provider has served
    pub async fn jwks_requests(&self) -> usize {
        let jwks_path = format!("/{JWKS_PATH}");
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|request| request.url.path() == jwks_path)
            .count()
    }

    fn install(&self, mut template: ResponseTemplate) {
        if let Some(delay) = *self.delay.lock().expect("delay poisoned") {
            template = template.set_delay(delay);
        }
        *self.response.current.lock().expect("responder poisoned") = template;
    }
}

/// Auth settings trusting `provider`, with issuer `https://trust.example/`
/// and audience `api`.
pub fn settings(provider: &MockIdentityProvider) -> AuthSettings {
    AuthSettings::new(DOMAIN, AUDIENCE, "RS256")
        .expect("RS256 is supported")
        .with_jwks_url(provider.jwks_url().as_str())
}

/// Claims for a valid token, expiring in an hour, granting `permissions`.
pub fn claims(permissions: &[&str]) -> Value {
    json!({
        "sub": SUBJECT,
        "iss": ISSUER,
        "aud": AUDIENCE,
        "iat": now(),
        "exp": now() + 3600,
        "permissions": permissions,
    })
}

/// Current Unix timestamp
pub fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("Time went backwards")
        .as_secs()
}

/// Parse a served JWKS document the same way the key cache does
pub fn parse_jwks(document: &Value) -> JwkSet {
    serde_json::from_value(document.clone()).expect("valid JWKS")
}
