//! Firebase Cloud Messaging (FCM) push provider.
//!
//! Acquires web delivery tokens the way the Firebase web SDK does: create a
//! Firebase installation, then register the console's web-push subscription
//! against it. The resulting token is what the device registry stores.

use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use domain::services::{PermissionState, ProviderError, PushProvider, TokenOptions};
use rand::RngCore;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use shared::validation::token_prefix;
use tokio::sync::Mutex;

use crate::config::FcmConfig;

const INSTALLATIONS_BASE_URL: &str = "https://firebaseinstallations.googleapis.com/v1";
const REGISTRATIONS_BASE_URL: &str = "https://fcmregistrations.googleapis.com/v1";
const INSTALLATIONS_SDK_VERSION: &str = "w:0.6.4";
const INITIAL_BACKOFF_MS: u64 = 100;
const MAX_BACKOFF_MS: u64 = 30_000;

/// Delay before retry `attempt` (1-based): 100ms, 200ms, 400ms, etc., capped.
fn backoff_delay(attempt: u32) -> Duration {
    let factor = 1u64.checked_shl(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
    Duration::from_millis(INITIAL_BACKOFF_MS.saturating_mul(factor).min(MAX_BACKOFF_MS))
}

/// Push provider backed by the FCM web registration API.
pub struct FcmPushProvider {
    client: Client,
    config: FcmConfig,
    installations_url: String,
    registrations_url: String,
    /// Current registration. The lock also serializes acquisitions so two
    /// concurrent callers never mint two tokens.
    current: Mutex<Option<Registration>>,
}

/// Installation and token currently held.
#[derive(Debug, Clone)]
struct Registration {
    auth_token: String,
    token: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateInstallationRequest<'a> {
    fid: &'a str,
    app_id: &'a str,
    auth_version: &'static str,
    sdk_version: &'static str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstallationResponse {
    auth_token: InstallationAuthToken,
}

#[derive(Debug, Deserialize)]
struct InstallationAuthToken {
    token: String,
}

#[derive(Debug, Serialize)]
struct CreateRegistrationRequest<'a> {
    web: WebSubscription<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WebSubscription<'a> {
    endpoint: &'a str,
    auth: &'a str,
    p256dh: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    application_pub_key: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct RegistrationResponse {
    token: String,
}

/// Error type for FCM operations.
#[derive(Debug, thiserror::Error)]
pub enum FcmError {
    #[error("FCM is not enabled")]
    NotEnabled,

    #[error("FCM is not configured: {0}")]
    NotConfigured(String),

    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("FCM API error ({status}): {body}")]
    ApiError { status: u16, body: String },
}

impl From<FcmError> for ProviderError {
    fn from(err: FcmError) -> Self {
        match err {
            FcmError::NotEnabled | FcmError::NotConfigured(_) => {
                ProviderError::NotConfigured(err.to_string())
            }
            FcmError::HttpError(e) => ProviderError::Network(e.to_string()),
            FcmError::ApiError { status, .. } if status >= 500 => {
                ProviderError::Network(err.to_string())
            }
            FcmError::ApiError { .. } => ProviderError::Rejected(err.to_string()),
        }
    }
}

impl FcmPushProvider {
    /// Create a provider talking to the production Firebase endpoints.
    pub fn new(config: FcmConfig) -> Result<Self, FcmError> {
        Self::with_base_urls(config, INSTALLATIONS_BASE_URL, REGISTRATIONS_BASE_URL)
    }

    /// Create a provider against custom endpoint roots.
    pub fn with_base_urls(
        config: FcmConfig,
        installations_url: &str,
        registrations_url: &str,
    ) -> Result<Self, FcmError> {
        if !config.enabled {
            return Err(FcmError::NotEnabled);
        }
        if config.project_id.is_empty() || config.api_key.is_empty() {
            return Err(FcmError::NotConfigured(
                "project_id and api_key are required".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;

        Ok(Self {
            client,
            config,
            installations_url: installations_url.trim_end_matches('/').to_string(),
            registrations_url: registrations_url.trim_end_matches('/').to_string(),
            current: Mutex::new(None),
        })
    }

    fn has_subscription(&self) -> bool {
        !self.config.subscription_endpoint.is_empty()
            && !self.config.subscription_p256dh.is_empty()
            && !self.config.subscription_auth.is_empty()
    }

    /// Create a fresh Firebase installation and return its auth token.
    async fn create_installation(&self) -> Result<String, FcmError> {
        let fid = generate_fid();
        let url = format!(
            "{}/projects/{}/installations",
            self.installations_url, self.config.project_id
        );
        let body = CreateInstallationRequest {
            fid: &fid,
            app_id: &self.config.app_id,
            auth_version: "FIS_v2",
            sdk_version: INSTALLATIONS_SDK_VERSION,
        };

        let response: InstallationResponse = self
            .send_with_retry("create installation", || {
                self.client
                    .post(&url)
                    .header("x-goog-api-key", &self.config.api_key)
                    .json(&body)
            })
            .await?;
        tracing::debug!(fid = %fid, "Firebase installation created");
        Ok(response.auth_token.token)
    }

    /// Register the web-push subscription and return the delivery token.
    async fn register(&self, auth_token: &str) -> Result<String, FcmError> {
        let url = format!(
            "{}/projects/{}/registrations",
            self.registrations_url, self.config.project_id
        );
        let body = CreateRegistrationRequest {
            web: WebSubscription {
                endpoint: &self.config.subscription_endpoint,
                auth: &self.config.subscription_auth,
                p256dh: &self.config.subscription_p256dh,
                application_pub_key: Some(self.config.vapid_key.as_str())
                    .filter(|k| !k.is_empty()),
            },
        };
        let auth_header = format!("FIS {}", auth_token);

        let response: RegistrationResponse = self
            .send_with_retry("register subscription", || {
                self.client
                    .post(&url)
                    .header("x-goog-api-key", &self.config.api_key)
                    .header("x-goog-firebase-installations-auth", &auth_header)
                    .json(&body)
            })
            .await?;
        Ok(response.token)
    }

    /// Best-effort removal of a replaced token.
    async fn unregister(&self, registration: &Registration) {
        let url = format!(
            "{}/projects/{}/registrations/{}",
            self.registrations_url, self.config.project_id, registration.token
        );
        let result = self
            .client
            .delete(&url)
            .header("x-goog-api-key", &self.config.api_key)
            .header(
                "x-goog-firebase-installations-auth",
                format!("FIS {}", registration.auth_token),
            )
            .send()
            .await;
        if let Err(e) = result {
            tracing::debug!(
                token = %token_prefix(&registration.token),
                error = %e,
                "Failed to delete replaced FCM registration"
            );
        }
    }

    /// Send a request, retrying transport errors and 5xx responses.
    async fn send_with_retry<T, F>(&self, operation: &'static str, build: F) -> Result<T, FcmError>
    where
        T: DeserializeOwned,
        F: Fn() -> RequestBuilder,
    {
        let mut last_error = None;
        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                tokio::time::sleep(backoff_delay(attempt)).await;
            }

            match build().send().await {
                Ok(resp) if resp.status().is_success() => {
                    tracing::debug!(operation, attempt, "FCM request succeeded");
                    return Ok(resp.json().await?);
                }
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    let body = resp.text().await.unwrap_or_default();
                    let error = FcmError::ApiError { status, body };
                    if status < 500 {
                        return Err(error);
                    }
                    tracing::warn!(operation, attempt, status, "FCM request failed, retrying");
                    last_error = Some(error);
                }
                Err(e) => {
                    tracing::warn!(operation, attempt, error = %e, "FCM request failed, retrying");
                    last_error = Some(FcmError::HttpError(e));
                }
            }
        }

        Err(last_error.unwrap_or_else(|| FcmError::ApiError {
            status: 0,
            body: "no attempt made".to_string(),
        }))
    }
}

#[async_trait]
impl PushProvider for FcmPushProvider {
    async fn permission_state(&self) -> PermissionState {
        if self.has_subscription() {
            PermissionState::Granted
        } else {
            PermissionState::Denied
        }
    }

    async fn request_permission(&self) -> Result<PermissionState, ProviderError> {
        Ok(self.permission_state().await)
    }

    async fn acquire_token(&self, options: TokenOptions) -> Result<Option<String>, ProviderError> {
        if !self.has_subscription() {
            return Ok(None);
        }

        let mut current = self.current.lock().await;
        if let Some(registration) = current.as_ref() {
            if !options.force_refresh {
                return Ok(Some(registration.token.clone()));
            }
        }

        let previous = current.clone();
        let auth_token = self.create_installation().await?;
        let token = self.register(&auth_token).await?;
        tracing::info!(
            token = %token_prefix(&token),
            forced = options.force_refresh,
            "FCM delivery token acquired"
        );

        if let Some(previous) = previous {
            self.unregister(&previous).await;
        }
        *current = Some(Registration {
            auth_token,
            token: token.clone(),
        });
        Ok(Some(token))
    }
}

/// Firebase installation id: 17 random bytes with the `0111` prefix,
/// URL-safe base64, 22 characters.
fn generate_fid() -> String {
    let mut bytes = [0u8; 17];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes[0] = 0b0111_0000 | (bytes[0] & 0b0000_1111);
    let mut fid = URL_SAFE_NO_PAD.encode(bytes);
    fid.truncate(22);
    fid
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        extract::State,
        http::{HeaderMap, StatusCode},
        routing::post,
        Json, Router,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn config() -> FcmConfig {
        FcmConfig {
            enabled: true,
            project_id: "mentor-console".to_string(),
            api_key: "key-123".to_string(),
            app_id: "1:42:web:abc".to_string(),
            vapid_key: "BPubKey".to_string(),
            subscription_endpoint: "https://push.example.com/sub/1".to_string(),
            subscription_p256dh: "p256dh".to_string(),
            subscription_auth: "auth".to_string(),
            timeout_ms: 2000,
            max_retries: 2,
        }
    }

    #[derive(Clone, Default)]
    struct FakeFirebase {
        installations: Arc<AtomicUsize>,
        registrations: Arc<AtomicUsize>,
        failures_left: Arc<AtomicUsize>,
    }

    async fn create_installation(
        State(fake): State<FakeFirebase>,
        headers: HeaderMap,
    ) -> Result<Json<serde_json::Value>, StatusCode> {
        if headers.get("x-goog-api-key").map(|v| v.as_bytes()) != Some(b"key-123".as_slice()) {
            return Err(StatusCode::FORBIDDEN);
        }
        let n = fake.installations.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Json(serde_json::json!({
            "fid": format!("fid-{}", n),
            "authToken": {"token": format!("auth-{}", n), "expiresIn": "604800s"}
        })))
    }

    async fn create_registration(
        State(fake): State<FakeFirebase>,
        headers: HeaderMap,
        Json(body): Json<serde_json::Value>,
    ) -> Result<Json<serde_json::Value>, StatusCode> {
        if fake
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(StatusCode::SERVICE_UNAVAILABLE);
        }
        let auth = headers
            .get("x-goog-firebase-installations-auth")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if !auth.starts_with("FIS auth-") || body["web"]["endpoint"].is_null() {
            return Err(StatusCode::BAD_REQUEST);
        }
        let n = fake.registrations.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Json(serde_json::json!({ "token": format!("fcm-token-{}", n) })))
    }

    async fn spawn_fake(fake: FakeFirebase) -> String {
        let app = Router::new()
            .route(
                "/projects/mentor-console/installations",
                post(create_installation),
            )
            .route(
                "/projects/mentor-console/registrations",
                post(create_registration),
            )
            .route(
                "/projects/mentor-console/registrations/:token",
                axum::routing::delete(|| async { StatusCode::OK }),
            )
            .with_state(fake);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[test]
    fn test_fcm_not_enabled_error() {
        let config = FcmConfig {
            enabled: false,
            ..config()
        };
        assert!(matches!(
            FcmPushProvider::new(config),
            Err(FcmError::NotEnabled)
        ));
    }

    #[test]
    fn test_generate_fid_shape() {
        let fid = generate_fid();
        assert_eq!(fid.len(), 22);
        let first = fid.chars().next().unwrap();
        assert!(matches!(first, 'c' | 'd' | 'e' | 'f'));
    }

    #[test]
    fn test_error_mapping() {
        let err: ProviderError = FcmError::ApiError {
            status: 503,
            body: String::new(),
        }
        .into();
        assert!(matches!(err, ProviderError::Network(_)));

        let err: ProviderError = FcmError::ApiError {
            status: 400,
            body: String::new(),
        }
        .into();
        assert!(matches!(err, ProviderError::Rejected(_)));
    }

    #[tokio::test]
    async fn test_permission_follows_subscription() {
        let provider = FcmPushProvider::new(config()).unwrap();
        assert_eq!(provider.permission_state().await, PermissionState::Granted);

        let provider = FcmPushProvider::new(FcmConfig {
            subscription_endpoint: String::new(),
            ..config()
        })
        .unwrap();
        assert_eq!(provider.permission_state().await, PermissionState::Denied);
        assert_eq!(
            provider.acquire_token(TokenOptions::default()).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_token_is_cached_until_forced() {
        let fake = FakeFirebase::default();
        let base = spawn_fake(fake.clone()).await;
        let provider = FcmPushProvider::with_base_urls(config(), &base, &base).unwrap();

        let first = provider.acquire_token(TokenOptions::default()).await.unwrap();
        let again = provider.acquire_token(TokenOptions::default()).await.unwrap();
        assert_eq!(first.as_deref(), Some("fcm-token-1"));
        assert_eq!(again, first);
        assert_eq!(fake.installations.load(Ordering::SeqCst), 1);

        let forced = provider.acquire_token(TokenOptions::refresh()).await.unwrap();
        assert_eq!(forced.as_deref(), Some("fcm-token-2"));
        assert_eq!(fake.installations.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retries_server_errors() {
        let fake = FakeFirebase::default();
        fake.failures_left.store(2, Ordering::SeqCst);
        let base = spawn_fake(fake.clone()).await;
        let provider = FcmPushProvider::with_base_urls(config(), &base, &base).unwrap();

        let token = provider.acquire_token(TokenOptions::default()).await.unwrap();
        assert_eq!(token.as_deref(), Some("fcm-token-1"));
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let fake = FakeFirebase::default();
        fake.failures_left.store(10, Ordering::SeqCst);
        let base = spawn_fake(fake).await;
        let provider = FcmPushProvider::with_base_urls(config(), &base, &base).unwrap();

        let err = provider
            .acquire_token(TokenOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Network(_)));
    }

    #[tokio::test]
    async fn test_rejected_credentials_are_not_retried() {
        let fake = FakeFirebase::default();
        let base = spawn_fake(fake.clone()).await;
        let provider = FcmPushProvider::with_base_urls(
            FcmConfig {
                api_key: "wrong".to_string(),
                ..config()
            },
            &base,
            &base,
        )
        .unwrap();

        let err = provider
            .acquire_token(TokenOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Rejected(_)));
        assert_eq!(fake.installations.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_backoff_doubles_up_to_cap() {
        assert_eq!(backoff_delay(1), Duration::from_millis(100));
        assert_eq!(backoff_delay(3), Duration::from_millis(400));
        assert_eq!(backoff_delay(57), Duration::from_millis(MAX_BACKOFF_MS));
        assert_eq!(backoff_delay(64), Duration::from_millis(MAX_BACKOFF_MS));
        assert_eq!(backoff_delay(u32::MAX), Duration::from_millis(MAX_BACKOFF_MS));
    }
}
