//! Test helpers for onboarding-service integration tests.
//!
//! Every test gets its own router over in-memory stores, a capturing
//! notifier and a fixed OTP code.

#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use onboarding_service::{
    build_router,
    config::AppConfig,
    models::{Role, User},
    services::{CodeGenerator, EphemeralStore, MemoryStore, MemoryUserRepository, MockOtpNotifier},
    utils::Identifier,
    AppState,
};
use serde_json::{json, Value};
use tower::util::ServiceExt;

pub const TEST_OTP: &str = "1234";
pub const TEST_PIN: &str = "112233";
pub const ADMIN_PHONE: &str = "081100000001";

pub struct FixedCode;

impl CodeGenerator for FixedCode {
    fn generate(&self, _length: usize) -> String {
        TEST_OTP.to_string()
    }
}

/// Memory store that yields before every call, the way a network round
/// trip would, so concurrent requests interleave between store operations.
#[derive(Default)]
pub struct YieldingStore {
    inner: MemoryStore,
}

#[async_trait]
impl EphemeralStore for YieldingStore {
    async fn get(&self, key: &str) -> Result<Option<String>, anyhow::Error> {
        tokio::task::yield_now().await;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), anyhow::Error> {
        tokio::task::yield_now().await;
        self.inner.set(key, value, ttl_seconds).await
    }

    async fn delete(&self, key: &str) -> Result<bool, anyhow::Error> {
        tokio::task::yield_now().await;
        self.inner.delete(key).await
    }

    async fn exists(&self, key: &str) -> Result<bool, anyhow::Error> {
        tokio::task::yield_now().await;
        self.inner.exists(key).await
    }

    async fn incr_window(&self, key: &str, window_seconds: u64) -> Result<u64, anyhow::Error> {
        tokio::task::yield_now().await;
        self.inner.incr_window(key, window_seconds).await
    }

    async fn ttl(&self, key: &str) -> Result<Option<u64>, anyhow::Error> {
        tokio::task::yield_now().await;
        self.inner.ttl(key).await
    }

    async fn set_add(
        &self,
        key: &str,
        member: &str,
        ttl_seconds: u64,
    ) -> Result<(), anyhow::Error> {
        tokio::task::yield_now().await;
        self.inner.set_add(key, member, ttl_seconds).await
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, anyhow::Error> {
        tokio::task::yield_now().await;
        self.inner.set_members(key).await
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<(), anyhow::Error> {
        tokio::task::yield_now().await;
        self.inner.set_remove(key, member).await
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        self.inner.health_check().await
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub users: Arc<MemoryUserRepository>,
    pub notifier: Arc<MockOtpNotifier>,
}

/// Status and parsed JSON body (Null when empty or not JSON).
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
    pub retry_after: Option<String>,
}

impl TestApp {
    pub fn spawn() -> Self {
        Self::spawn_with(AppConfig::development())
    }

    pub fn spawn_with(config: AppConfig) -> Self {
        Self::spawn_with_store(config, Arc::new(MemoryStore::new()))
    }

    /// Same app over a store whose calls yield to other requests.
    pub fn spawn_yielding() -> Self {
        Self::spawn_with_store(AppConfig::development(), Arc::new(YieldingStore::default()))
    }

    pub fn spawn_with_store(mut config: AppConfig, store: Arc<dyn EphemeralStore>) -> Self {
        config.log_level = "error".to_string();

        let users = Arc::new(MemoryUserRepository::new());
        let notifier = Arc::new(MockOtpNotifier::new());
        let state = AppState::new(
            config,
            users.clone(),
            store,
            notifier.clone(),
            Arc::new(FixedCode),
        )
        .expect("Failed to build app state");

        Self {
            router: build_router(state.clone()),
            state,
            users,
            notifier,
        }
    }

    pub async fn send(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        device_id: Option<&str>,
        body: Option<Value>,
    ) -> TestResponse {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        if let Some(device_id) = device_id {
            builder = builder.header("x-device-id", device_id);
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let retry_after = response
            .headers()
            .get(header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);

        TestResponse {
            status,
            body,
            retry_after,
        }
    }

    pub async fn post(&self, uri: &str, token: Option<&str>, body: Value) -> TestResponse {
        self.send(Method::POST, uri, token, None, Some(body)).await
    }

    pub async fn request_otp(&self, phone: &str, role: &str) -> TestResponse {
        self.post(
            "/auth/request-otp",
            None,
            json!({ "phone": phone, "role": role }),
        )
        .await
    }

    pub async fn verify_otp(&self, phone: &str, role: &str, otp: &str, device_id: &str) -> TestResponse {
        self.post(
            "/auth/verif-otp",
            None,
            json!({ "phone": phone, "otp": otp, "role": role, "device_id": device_id }),
        )
        .await
    }

    /// Request and verify an OTP; returns the session body.
    pub async fn otp_session(&self, phone: &str, role: &str, device_id: &str) -> Value {
        let res = self.request_otp(phone, role).await;
        assert_eq!(res.status, StatusCode::OK, "request-otp: {}", res.body);
        let res = self.verify_otp(phone, role, TEST_OTP, device_id).await;
        assert_eq!(res.status, StatusCode::OK, "verif-otp: {}", res.body);
        res.body
    }

    pub async fn submit_profile(&self, token: &str) -> TestResponse {
        self.send(
            Method::PUT,
            "/registration/profile",
            Some(token),
            None,
            Some(json!({ "name": "Budi Santoso", "gender": "male", "address": "Jl. Merdeka 1" })),
        )
        .await
    }

    pub async fn create_pin(&self, token: &str, pin: &str) -> TestResponse {
        self.post("/pin/create", Some(token), json!({ "userpin": pin }))
            .await
    }

    pub async fn verify_pin(&self, token: &str, device_id: &str, pin: &str) -> TestResponse {
        self.send(
            Method::POST,
            "/pin/verif",
            Some(token),
            Some(device_id),
            Some(json!({ "userpin": pin, "device_id": device_id })),
        )
        .await
    }

    pub async fn submit_identity_card(&self, token: &str) -> TestResponse {
        self.post(
            "/registration/identity-card",
            Some(token),
            json!({
                "identity_number": "3201234567890001",
                "full_name": "Budi Santoso",
                "address": "Jl. Merdeka 1",
                "photo_url": "https://files.example.com/ktp/budi.jpg"
            }),
        )
        .await
    }

    pub async fn submit_company_profile(&self, token: &str) -> TestResponse {
        self.post(
            "/registration/company-profile",
            Some(token),
            json!({
                "company_name": "PT Bank Sampah Sejahtera",
                "company_address": "Jl. Industri 5",
                "company_phone": "0221234567",
                "photo_url": "https://files.example.com/company/logo.jpg"
            }),
        )
        .await
    }

    /// Register through profile and PIN; returns the latest session body.
    pub async fn register_through_pin(&self, phone: &str, role: &str, device_id: &str) -> Value {
        let session = self.otp_session(phone, role, device_id).await;
        let res = self.submit_profile(token(&session)).await;
        assert_eq!(res.status, StatusCode::OK, "profile: {}", res.body);
        let res = self.create_pin(token(&res.body), TEST_PIN).await;
        assert_eq!(res.status, StatusCode::CREATED, "pin: {}", res.body);
        res.body
    }

    /// Pengepul waiting for review; returns the latest session body.
    pub async fn pending_pengepul(&self, phone: &str, device_id: &str) -> Value {
        let session = self.register_through_pin(phone, "pengepul", device_id).await;
        let res = self.submit_identity_card(token(&session)).await;
        assert_eq!(res.status, StatusCode::OK, "identity card: {}", res.body);
        res.body
    }

    /// Seeds the administrator and walks it to a full token.
    pub async fn admin_token(&self) -> String {
        let identifier = Identifier::phone(ADMIN_PHONE).unwrap();
        self.state
            .registration
            .bootstrap_administrator(&identifier)
            .await
            .unwrap();

        let session = self.otp_session(ADMIN_PHONE, "administrator", "admin-console").await;
        let res = self.create_pin(token(&session), TEST_PIN).await;
        assert_eq!(res.status, StatusCode::CREATED, "admin pin: {}", res.body);
        assert_eq!(res.body["token_type"], "full");
        token(&res.body).to_string()
    }

    pub async fn stored_user(&self, phone: &str, role: Role) -> User {
        use onboarding_service::services::UserRepository;

        let identifier = Identifier::phone(phone).unwrap();
        self.users
            .find_by_identifier(&identifier, role)
            .await
            .unwrap()
            .expect("user should exist")
    }
}

pub fn token(session: &Value) -> &str {
    session["access_token"]
        .as_str()
        .expect("session body should carry an access token")
}

pub fn refresh(session: &Value) -> &str {
    session["refresh_token"]
        .as_str()
        .expect("session body should carry a refresh token")
}
