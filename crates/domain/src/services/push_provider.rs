//! Push-messaging provider abstraction.
//!
//! Provides permission checks, delivery token acquisition and the foreground
//! message channel.

use std::collections::VecDeque;
use std::sync::Mutex;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::models::IncomingNotification;

/// Runtime notification permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionState {
    Granted,
    Denied,
    /// The user dismissed the prompt without choosing.
    Default,
}

impl std::fmt::Display for PermissionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PermissionState::Granted => write!(f, "granted"),
            PermissionState::Denied => write!(f, "denied"),
            PermissionState::Default => write!(f, "default"),
        }
    }
}

/// Options for token acquisition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenOptions {
    /// Discard any cached token and mint a new one.
    pub force_refresh: bool,
}

impl TokenOptions {
    pub fn refresh() -> Self {
        Self {
            force_refresh: true,
        }
    }
}

/// Error type for provider calls.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    #[error("Push provider is unreachable: {0}")]
    Network(String),

    #[error("Push provider rejected the request: {0}")]
    Rejected(String),

    #[error("Push provider is not configured: {0}")]
    NotConfigured(String),
}

/// Push-messaging provider operations.
#[async_trait::async_trait]
pub trait PushProvider: Send + Sync {
    /// Current permission without prompting.
    async fn permission_state(&self) -> PermissionState;

    /// Prompt for permission.
    async fn request_permission(&self) -> Result<PermissionState, ProviderError>;

    /// Acquire a delivery token. `None` when the provider has none to give.
    async fn acquire_token(&self, options: TokenOptions) -> Result<Option<String>, ProviderError>;

    /// Channel of messages arriving while the context is visible.
    fn on_foreground_message(&self) -> Option<broadcast::Receiver<IncomingNotification>> {
        None
    }
}

/// Mock provider for development and testing.
///
/// Tokens come from a preset queue, then from random generation.
#[derive(Debug)]
pub struct MockPushProvider {
    permission: Mutex<PermissionState>,
    prompt_outcome: PermissionState,
    tokens: Mutex<VecDeque<String>>,
    cached: Mutex<Option<String>>,
    simulate_failure: bool,
    yield_no_token: bool,
    foreground: broadcast::Sender<IncomingNotification>,
}

impl Default for MockPushProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockPushProvider {
    /// Provider whose permission prompt is granted.
    pub fn new() -> Self {
        Self::with_prompt_outcome(PermissionState::Granted)
    }

    /// Provider whose permission prompt resolves to `outcome`.
    pub fn with_prompt_outcome(outcome: PermissionState) -> Self {
        let (foreground, _) = broadcast::channel(64);
        Self {
            permission: Mutex::new(PermissionState::Default),
            prompt_outcome: outcome,
            tokens: Mutex::new(VecDeque::new()),
            cached: Mutex::new(None),
            simulate_failure: false,
            yield_no_token: false,
            foreground,
        }
    }

    /// Provider whose token acquisition always fails.
    pub fn failing() -> Self {
        Self {
            simulate_failure: true,
            ..Self::new()
        }
    }

    /// Provider that grants permission but never yields a token.
    pub fn without_token() -> Self {
        Self {
            yield_no_token: true,
            ..Self::new()
        }
    }

    /// Queue tokens to be handed out before random ones.
    pub fn with_tokens<I, S>(self, tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tokens
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend(tokens.into_iter().map(Into::into));
        self
    }

    /// Pretend permission was already decided.
    pub fn set_permission(&self, state: PermissionState) {
        *self.permission.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    /// Deliver a message to foreground subscribers. Returns the number of
    /// receivers reached.
    pub fn push_foreground(&self, notification: IncomingNotification) -> usize {
        self.foreground.send(notification).unwrap_or(0)
    }

    fn next_token(&self) -> String {
        if let Some(token) = self
            .tokens
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
        {
            return token;
        }
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        format!("mock-{}", URL_SAFE_NO_PAD.encode(bytes))
    }
}

#[async_trait::async_trait]
impl PushProvider for MockPushProvider {
    async fn permission_state(&self) -> PermissionState {
        *self.permission.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn request_permission(&self) -> Result<PermissionState, ProviderError> {
        let mut permission = self.permission.lock().unwrap_or_else(|e| e.into_inner());
        if *permission == PermissionState::Default {
            *permission = self.prompt_outcome;
        }
        tracing::info!(permission = %*permission, "Mock: permission prompt resolved");
        Ok(*permission)
    }

    async fn acquire_token(&self, options: TokenOptions) -> Result<Option<String>, ProviderError> {
        if self.simulate_failure {
            tracing::warn!("Mock push provider simulating failure");
            return Err(ProviderError::Network("Simulated failure".to_string()));
        }
        if self.yield_no_token {
            return Ok(None);
        }

        let mut cached = self.cached.lock().unwrap_or_else(|e| e.into_inner());
        if options.force_refresh || cached.is_none() {
            *cached = Some(self.next_token());
        }
        tracing::info!(force_refresh = options.force_refresh, "Mock: token acquired");
        Ok(cached.clone())
    }

    fn on_foreground_message(&self) -> Option<broadcast::Receiver<IncomingNotification>> {
        Some(self.foreground.subscribe())
    }
}
