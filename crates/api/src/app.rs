use axum::{
    middleware,
    routing::{delete, get, patch, post},
    Router,
};
use domain::models::DeliverySource;
use domain::services::{
    Clock, DeliveryDeduplicator, DeliveryPipeline, DeviceRegistryClient, LocalStore,
    MemoryLocalStore, MemoryProfileStore, MockPushProvider, NotificationHistory, ProfileStore,
    PushProvider, SessionRegistry, SystemClock, TokenLifecycleCoordinator,
};
use persistence::{FileLocalStore, PgProfileStore};
use shared::session_token::SessionVerifier;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::info;

use crate::config::{Config, ProviderKind, RegistryBackend};
use crate::middleware::{metrics_handler, metrics_middleware, trace_id};
use crate::routes::{deliveries, devices, health, notifications, session};
use crate::services::FcmPushProvider;

/// Storage, provider and time sources the service runs against.
pub struct Backends {
    pub profile_store: Arc<dyn ProfileStore>,
    pub local_store: Arc<dyn LocalStore>,
    pub provider: Arc<dyn PushProvider>,
    pub clock: Arc<dyn Clock>,
}

impl Backends {
    /// Pick backends from configuration.
    ///
    /// The postgres registry backend requires `pool`.
    pub async fn from_config(config: &Config, pool: Option<&PgPool>) -> anyhow::Result<Self> {
        let profile_store: Arc<dyn ProfileStore> = match config.push.registry_backend {
            RegistryBackend::Postgres => {
                let pool = pool.ok_or_else(|| {
                    anyhow::anyhow!("postgres registry backend needs a database pool")
                })?;
                Arc::new(PgProfileStore::new(pool.clone()))
            }
            RegistryBackend::Memory => Arc::new(MemoryProfileStore::new()),
        };

        let local_store: Arc<dyn LocalStore> = if config.push.local_store_dir.is_empty() {
            Arc::new(MemoryLocalStore::new())
        } else {
            Arc::new(
                FileLocalStore::open(&config.push.local_store_dir, config.push.max_document_bytes)
                    .await?,
            )
        };

        let provider: Arc<dyn PushProvider> = match config.push.provider {
            ProviderKind::Fcm => Arc::new(FcmPushProvider::new(config.fcm.clone())?),
            ProviderKind::Mock => Arc::new(MockPushProvider::new()),
        };

        info!(
            registry_backend = ?config.push.registry_backend,
            provider = ?config.push.provider,
            local_store_dir = %config.push.local_store_dir,
            "Backends selected"
        );

        Ok(Self {
            profile_store,
            local_store,
            provider,
            clock: Arc::new(SystemClock),
        })
    }
}

#[derive(Clone)]
pub struct AppState {
    pub pool: Option<PgPool>,
    pub config: Arc<Config>,
    pub sessions: Arc<SessionRegistry>,
    pub coordinator: TokenLifecycleCoordinator,
    pub pipeline: DeliveryPipeline,
    pub verifier: Arc<SessionVerifier>,
}

impl AppState {
    /// Wire the domain services together and load the local history.
    ///
    /// Starts the foreground delivery listener when the provider offers a
    /// foreground channel.
    pub async fn new(config: Config, pool: Option<PgPool>, backends: Backends) -> anyhow::Result<Self> {
        let verifier = match config.auth.algorithm.as_str() {
            "HS256" => SessionVerifier::from_shared_secret(
                &config.auth.shared_secret,
                config.auth.leeway_secs,
            )?,
            _ => SessionVerifier::from_rsa_public_key(
                &config.auth.public_key,
                config.auth.leeway_secs,
            )?,
        };

        let registry = DeviceRegistryClient::new(backends.profile_store, backends.clock.clone());
        let coordinator = TokenLifecycleCoordinator::new(backends.provider.clone(), registry)
            .with_timeout(Duration::from_secs(config.push.operation_timeout_secs));

        let dedup = DeliveryDeduplicator::new(backends.local_store.clone(), backends.clock.clone())
            .with_window(chrono::Duration::seconds(config.push.dedup_window_secs));
        let history = Arc::new(
            NotificationHistory::open(backends.local_store, config.push.history_capacity).await,
        );
        let pipeline = DeliveryPipeline::new(dedup, history, backends.clock);

        if let Some(rx) = backends.provider.on_foreground_message() {
            pipeline.listen(rx, DeliverySource::Foreground);
        }

        Ok(Self {
            pool,
            config: Arc::new(config),
            sessions: Arc::new(SessionRegistry::new()),
            coordinator,
            pipeline,
            verifier: Arc::new(verifier),
        })
    }
}

pub fn create_app(state: AppState) -> Router {
    let config = state.config.clone();

    let cors = if config.security.cors_origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        use tower_http::cors::AllowOrigin;
        let origins: Vec<_> = config
            .security
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(Any)
            .allow_headers(Any)
    };

    // Session-token protected routes; handlers authenticate through extractors
    let api_routes = Router::new()
        .route(
            "/api/v1/session",
            post(session::sign_in).delete(session::sign_out),
        )
        .route("/api/v1/devices", get(devices::list_devices))
        .route("/api/v1/devices/enable", post(devices::enable))
        .route("/api/v1/devices/refresh", post(devices::refresh))
        .route("/api/v1/devices/consolidate", post(devices::consolidate))
        .route("/api/v1/devices/state", get(devices::sync_state))
        .route("/api/v1/devices/current", delete(devices::disable_all))
        .route(
            "/api/v1/devices/:token",
            patch(devices::update_device).delete(devices::remove_device),
        )
        .route(
            "/api/v1/notifications",
            get(notifications::list).delete(notifications::clear_all),
        )
        .route(
            "/api/v1/notifications/unread-count",
            get(notifications::unread_count),
        )
        .route("/api/v1/notifications/read-all", post(notifications::mark_all_read))
        .route("/api/v1/notifications/events", get(notifications::events))
        .route("/api/v1/notifications/:id", delete(notifications::delete))
        .route("/api/v1/notifications/:id/read", post(notifications::mark_read))
        .route("/api/v1/deliveries", post(deliveries::receive))
        .route("/api/v1/deliveries/reconcile", post(deliveries::reconcile));

    let public_routes = Router::new()
        .route("/api/health", get(health::health_check))
        .route("/api/health/ready", get(health::ready))
        .route("/api/health/live", get(health::live))
        .route("/metrics", get(metrics_handler));

    Router::new()
        .merge(public_routes)
        .merge(api_routes)
        // Global middleware (order matters: bottom layers run first)
        .layer(CompressionLayer::new())
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.server.request_timeout_secs,
        )))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(trace_id))
        .layer(cors)
        .with_state(state)
}
