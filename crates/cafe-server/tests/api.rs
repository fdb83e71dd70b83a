//! End-to-end tests: axum router, auth middleware and catalog together,
//! against a mock identity provider.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode, header};
use cafe_auth::testutil::{self, MockIdentityProvider, TestSigner};
use cafe_auth::{Authorizer, TokenVerifier};
use cafe_server::catalog::{
    CatalogError, CatalogStore, Drink, DrinkPatch, Ingredient, LocalCatalog, NewDrink, RecipeInput,
};
use cafe_server::{AppState, ServerConfig, build_app, router};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tower::ServiceExt;

/// Records how often the handlers reached the store
#[derive(Debug, Default)]
struct CountingCatalog {
    inner: LocalCatalog,
    calls: AtomicUsize,
}

impl CountingCatalog {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn hit(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl CatalogStore for CountingCatalog {
    async fn list(&self) -> Result<Vec<Drink>, CatalogError> {
        self.hit();
        self.inner.list().await
    }

    async fn get(&self, id: u64) -> Result<Drink, CatalogError> {
        self.hit();
        self.inner.get(id).await
    }

    async fn create(&self, drink: NewDrink) -> Result<Drink, CatalogError> {
        self.hit();
        self.inner.create(drink).await
    }

    async fn update(&self, id: u64, patch: DrinkPatch) -> Result<Drink, CatalogError> {
        self.hit();
        self.inner.update(id, patch).await
    }

    async fn delete(&self, id: u64) -> Result<u64, CatalogError> {
        self.hit();
        self.inner.delete(id).await
    }
}

struct Harness {
    idp: MockIdentityProvider,
    catalog: Arc<CountingCatalog>,
    app: Router,
}

impl Harness {
    async fn start() -> Self {
        let idp = MockIdentityProvider::start(&[TestSigner::trusted()]).await;
        let verifier = TokenVerifier::from_settings(&testutil::settings(&idp)).unwrap();

        let catalog = Arc::new(CountingCatalog::default());
        catalog
            .inner
            .create(NewDrink {
                title: "matcha shake".into(),
                recipe: RecipeInput::Many(vec![
                    ingredient("milk", "grey", 1),
                    ingredient("matcha", "green", 3),
                ]),
            })
            .await
            .unwrap();

        let state = AppState {
            catalog: catalog.clone(),
        };
        let app = router(state, &Authorizer::new(verifier));
        Self { idp, catalog, app }
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Value, Option<String>) {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let challenge = response
            .headers()
            .get(header::WWW_AUTHENTICATE)
            .map(|v| v.to_str().unwrap().to_string());
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body, challenge)
    }
}

fn ingredient(name: &str, color: &str, parts: u32) -> Ingredient {
    Ingredient {
        name: name.into(),
        color: color.into(),
        parts,
    }
}

fn token(permissions: &[&str]) -> String {
    TestSigner::trusted().sign(&testutil::claims(permissions))
}

fn request(
    method: Method,
    uri: &str,
    authorization: Option<&str>,
    body: Option<&str>,
) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(value) = authorization {
        builder = builder.header(header::AUTHORIZATION, value);
    }
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

fn bearer(token: &str) -> String {
    format!("Bearer {token}")
}

fn auth_error(status: u16, code: &str) -> Value {
    json!({ "success": false, "error_code": status, "error_message": code })
}

#[tokio::test]
async fn public_listing_ignores_authorization_header() {
    let harness = Harness::start().await;
    let expected = json!({
        "success": true,
        "drinks": [{ "id": 1, "title": "matcha shake" }]
    });

    for authorization in [None, Some("Token abc"), Some("Bearer garbage")] {
        let (status, body, _) = harness
            .send(request(Method::GET, "/drinks", authorization, None))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, expected);
    }
    assert_eq!(harness.idp.jwks_requests().await, 0);
}

#[tokio::test]
async fn detail_requires_authorization_header() {
    let harness = Harness::start().await;

    let (status, body, challenge) = harness
        .send(request(Method::GET, "/drinks-detail", None, None))
        .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, auth_error(401, "missing_auth_header"));
    assert_eq!(challenge.as_deref(), Some("Bearer error=\"invalid_request\""));
    assert_eq!(harness.catalog.calls(), 0);
}

#[tokio::test]
async fn read_only_token_reads_details_but_cannot_create() {
    let harness = Harness::start().await;
    let t1 = bearer(&token(&["get:drinks-detail"]));

    let (status, body, _) = harness
        .send(request(Method::GET, "/drinks-detail", Some(&t1), None))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({
            "success": true,
            "drinks": [{
                "id": 1,
                "title": "matcha shake",
                "recipe": [
                    { "name": "milk", "color": "grey", "parts": 1 },
                    { "name": "matcha", "color": "green", "parts": 3 }
                ]
            }]
        })
    );
    assert_eq!(harness.catalog.calls(), 1);

    let (status, body, challenge) = harness
        .send(request(
            Method::POST,
            "/drinks",
            Some(&t1),
            Some(r#"{"title": "water", "recipe": []}"#),
        ))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body, auth_error(403, "permission_denied"));
    assert!(challenge.is_none());
    assert_eq!(harness.catalog.calls(), 1);
}

#[tokio::test]
async fn credential_failures_are_reported_by_kind() {
    let harness = Harness::start().await;

    let mut expired = testutil::claims(&["get:drinks-detail"]);
    expired["exp"] = json!(testutil::now() - 60);
    let mut wrong_audience = testutil::claims(&["get:drinks-detail"]);
    wrong_audience["aud"] = json!("someone-else");
    let mut no_permissions = testutil::claims(&[]);
    no_permissions.as_object_mut().unwrap().remove("permissions");

    let cases = [
        ("Token abc".to_string(), 401, "invalid_header_format"),
        ("Bearer a.b".to_string(), 401, "malformed_token"),
        (
            bearer(&TestSigner::impostor().sign(&testutil::claims(&["get:drinks-detail"]))),
            401,
            "invalid_signature",
        ),
        (
            bearer(&TestSigner::rotated().sign(&testutil::claims(&["get:drinks-detail"]))),
            401,
            "unknown_signing_key",
        ),
        (bearer(&TestSigner::trusted().sign(&expired)), 401, "token_expired"),
        (bearer(&TestSigner::trusted().sign(&wrong_audience)), 401, "invalid_audience"),
        (
            bearer(&TestSigner::trusted().sign(&no_permissions)),
            403,
            "permissions_not_configured",
        ),
    ];

    for (authorization, status, code) in cases {
        let (actual, body, _) = harness
            .send(request(Method::GET, "/drinks-detail", Some(&authorization), None))
            .await;
        assert_eq!(actual.as_u16(), status, "{code}");
        assert_eq!(body, auth_error(status, code));
    }
    assert_eq!(harness.catalog.calls(), 0);
}

#[tokio::test]
async fn key_provider_outage_is_internal_error() {
    let harness = Harness::start().await;
    harness.idp.fail_with(503).await;

    let (status, body, _) = harness
        .send(request(
            Method::DELETE,
            "/drinks/1",
            Some(&bearer(&token(&["delete:drinks"]))),
            None,
        ))
        .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, auth_error(500, "key_provider_unavailable"));
    assert_eq!(harness.catalog.calls(), 0);
}

#[tokio::test]
async fn manager_creates_drink_exactly_once() {
    let harness = Harness::start().await;
    let manager = bearer(&token(&["post:drinks"]));

    let (status, body, _) = harness
        .send(request(
            Method::POST,
            "/drinks",
            Some(&manager),
            Some(r#"{"title": "water", "recipe": {"name": "water", "color": "blue", "parts": 1}}"#),
        ))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({
            "success": true,
            "drinks": {
                "id": 2,
                "title": "water",
                "recipe": [{ "name": "water", "color": "blue", "parts": 1 }]
            }
        })
    );
    assert_eq!(harness.catalog.calls(), 1);
}

#[tokio::test]
async fn create_rejects_bad_bodies() {
    let harness = Harness::start().await;
    let manager = bearer(&token(&["post:drinks"]));

    let cases = [
        (r#"{"title": "water", "recipe": "#, StatusCode::BAD_REQUEST, "Bad Request"),
        (r#"{"title": 7, "recipe": []}"#, StatusCode::UNPROCESSABLE_ENTITY, "Unprocessable"),
        (
            r#"{"title": "matcha shake", "recipe": []}"#,
            StatusCode::UNPROCESSABLE_ENTITY,
            "Unprocessable",
        ),
    ];

    for (payload, status, message) in cases {
        let (actual, body, _) = harness
            .send(request(Method::POST, "/drinks", Some(&manager), Some(payload)))
            .await;
        assert_eq!(actual, status, "{payload}");
        assert_eq!(
            body,
            json!({ "success": false, "error": status.as_u16(), "message": message })
        );
    }
}

#[tokio::test]
async fn patch_updates_existing_drink() {
    let harness = Harness::start().await;
    let barista = bearer(&token(&["patch:drinks"]));

    let (status, body, _) = harness
        .send(request(
            Method::PATCH,
            "/drinks/1",
            Some(&barista),
            Some(r#"{"title": "iced matcha"}"#),
        ))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["drinks"]["title"], "iced matcha");
    assert_eq!(body["drinks"]["recipe"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn patch_and_delete_report_missing_before_mutating() {
    let harness = Harness::start().await;
    let admin = bearer(&token(&["patch:drinks", "delete:drinks"]));

    for (method, body) in [
        (Method::PATCH, Some(r#"{"title": "ghost"}"#)),
        (Method::DELETE, None),
    ] {
        let (status, response, _) = harness
            .send(request(method.clone(), "/drinks/42", Some(&admin), body))
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{method}");
        assert_eq!(
            response,
            json!({ "success": false, "error": 404, "message": "Not found" })
        );

        let (status, _, _) = harness
            .send(request(method.clone(), "/drinks/not-a-number", Some(&admin), body))
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{method}");
    }

    assert_eq!(harness.catalog.inner.list().await.unwrap().len(), 1);
}

#[tokio::test]
async fn delete_removes_drink() {
    let harness = Harness::start().await;
    let admin = bearer(&token(&["delete:drinks"]));

    let (status, body, _) = harness
        .send(request(Method::DELETE, "/drinks/1", Some(&admin), None))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "success": true, "delete": 1 }));

    let (status, _, _) = harness
        .send(request(Method::DELETE, "/drinks/1", Some(&admin), None))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn delete_permission_does_not_grant_patch() {
    let harness = Harness::start().await;
    let deleter = bearer(&token(&["delete:drinks"]));

    let (status, body, _) = harness
        .send(request(
            Method::PATCH,
            "/drinks/1",
            Some(&deleter),
            Some(r#"{"title": "hijacked"}"#),
        ))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body, auth_error(403, "permission_denied"));
    assert_eq!(harness.catalog.calls(), 0);
}

#[tokio::test]
async fn unknown_route_is_not_found() {
    let harness = Harness::start().await;
    let (status, body, _) = harness
        .send(request(Method::GET, "/coffee", None, None))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, json!({ "success": false, "error": 404, "message": "Not found" }));
}

#[tokio::test]
async fn app_builds_from_configuration() {
    let idp = MockIdentityProvider::start(&[TestSigner::trusted()]).await;
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("drinks.json");

    let config = ServerConfig::from_vars(
        None,
        [
            ("AUTH_DOMAIN", testutil::DOMAIN.to_string()),
            ("API_AUDIENCE", testutil::AUDIENCE.to_string()),
            ("JWKS_URL", idp.jwks_url().to_string()),
            ("DB_URL", format!("file://{}", db.display())),
        ],
    )
    .unwrap();
    let app = build_app(&config).await.unwrap();

    // Startup primed the key cache
    assert_eq!(idp.jwks_requests().await, 1);

    let response = app
        .oneshot(request(
            Method::POST,
            "/drinks",
            Some(&bearer(&token(&["post:drinks"]))),
            Some(
                r#"{"title": "water", "recipe": [{"name": "water", "color": "blue", "parts": 1}]}"#,
            ),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(db.exists());
    assert_eq!(idp.jwks_requests().await, 1);
}

#[tokio::test]
async fn app_refuses_insecure_jwks_url() {
    let config = ServerConfig::from_vars(
        None,
        [
            ("AUTH_DOMAIN", "trust.example"),
            ("API_AUDIENCE", "api"),
            ("JWKS_URL", "http://trust.example/.well-known/jwks.json"),
        ],
    )
    .unwrap();

    assert!(build_app(&config).await.is_err());
}
