pub mod config;
pub mod db;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod utils;

use std::{sync::Arc, time::Duration};

use service_core::axum::{
    extract::State,
    http::{header, HeaderName, HeaderValue, Method},
    middleware::{from_fn, from_fn_with_state},
    routing::{get, patch, post, put},
    Json, Router,
};
use service_core::error::AppError;
use service_core::middleware::{
    rate_limit::{create_ip_rate_limiter, ip_rate_limit_middleware, IpRateLimiter},
    security_headers::security_headers_middleware,
    tracing::request_id_middleware,
};
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

use crate::config::{AppConfig, SwaggerMode};
use crate::middleware::{
    authorize, metrics_middleware, require_bound_device, require_live_session, AccessGuard,
    AccessPolicy, DEVICE_ID_HEADER,
};
use crate::models::{RegistrationStatus, Role};
use crate::services::{
    steps::RegistrationStep, ApprovalService, AuthService, CodeGenerator, EphemeralStore, Metrics,
    OtpNotifier, OtpService, PinService, RegistrationService, TokenService, TokenType,
    UserRepository,
};

#[derive(OpenApi)]
#[openapi(
    paths(
        health_check,
        handlers::auth::request_otp,
        handlers::auth::verify_otp,
        handlers::auth::refresh_token,
        handlers::auth::logout,
        handlers::auth::registration_status,
        handlers::registration::submit_profile,
        handlers::registration::submit_identity_card,
        handlers::registration::submit_company_profile,
        handlers::pin::create_pin,
        handlers::pin::verify_pin,
        handlers::admin::review_user,
        handlers::admin::bulk_review,
        handlers::admin::list_pending,
    ),
    components(
        schemas(
            dtos::ErrorResponse,
            dtos::MessageResponse,
            dtos::auth::RequestOtpRequest,
            dtos::auth::RequestOtpResponse,
            dtos::auth::VerifyOtpRequest,
            dtos::auth::RefreshRequest,
            dtos::auth::SessionResponse,
            dtos::auth::RegistrationStatusResponse,
            dtos::pin::CreatePinRequest,
            dtos::pin::VerifyPinRequest,
            dtos::registration::ProfileRequest,
            dtos::registration::IdentityCardRequest,
            dtos::registration::CompanyProfileRequest,
            dtos::admin::ReviewRequest,
            dtos::admin::BulkReviewRequest,
            dtos::admin::PendingUsersResponse,
            models::Role,
            models::RegistrationStatus,
            models::OtpPurpose,
            models::UserResponse,
            services::TokenType,
            services::steps::RegistrationStep,
            services::steps::RegistrationStepInfo,
            services::ReviewAction,
            services::ReviewOutcome,
            services::BulkReport,
            services::approval::BulkFailure,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Authentication", description = "OTP login, registration and device sessions"),
        (name = "Registration", description = "Profile and document steps"),
        (name = "PIN", description = "Account PIN creation and verification"),
        (name = "Admin", description = "Registration review"),
        (name = "Observability", description = "Service health and monitoring"),
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub users: Arc<dyn UserRepository>,
    pub store: Arc<dyn EphemeralStore>,
    pub metrics: Arc<Metrics>,
    pub tokens: TokenService,
    pub auth: AuthService,
    pub pin: PinService,
    pub registration: RegistrationService,
    pub approval: ApprovalService,
    pub ip_rate_limiter: IpRateLimiter,
}

impl AppState {
    /// Wires every engine around the given stores and notifier.
    pub fn new(
        config: AppConfig,
        users: Arc<dyn UserRepository>,
        store: Arc<dyn EphemeralStore>,
        notifier: Arc<dyn OtpNotifier>,
        codes: Arc<dyn CodeGenerator>,
    ) -> Result<Self, AppError> {
        let metrics = Arc::new(
            Metrics::new().map_err(|e| AppError::InternalError(anyhow::Error::new(e)))?,
        );

        let tokens = TokenService::new(&config.jwt, store.clone());
        let otp = OtpService::new(
            config.otp.clone(),
            store.clone(),
            notifier,
            codes,
            metrics.clone(),
        );
        let auth = AuthService::new(users.clone(), otp, tokens.clone());
        let pin = PinService::new(
            config.pin.clone(),
            users.clone(),
            store.clone(),
            tokens.clone(),
            metrics.clone(),
        );
        let registration = RegistrationService::new(users.clone());
        let approval = ApprovalService::new(users.clone(), tokens.clone(), metrics.clone());
        let ip_rate_limiter = create_ip_rate_limiter(
            config.rate_limit.global_ip_limit,
            config.rate_limit.global_ip_window_seconds,
        );

        Ok(Self {
            config: Arc::new(config),
            users,
            store,
            metrics,
            tokens,
            auth,
            pin,
            registration,
            approval,
            ip_rate_limiter,
        })
    }
}

/// Puts `routes` behind token validation, `policy` and session liveness.
fn protect(routes: Router<AppState>, state: &AppState, policy: AccessPolicy) -> Router<AppState> {
    routes
        .route_layer(from_fn_with_state(state.clone(), require_live_session))
        .route_layer(from_fn_with_state(AccessGuard::new(state, policy), authorize))
}

pub fn build_router(state: AppState) -> Router {
    let session_routes = protect(
        Router::new()
            .route("/auth/logout", post(handlers::auth::logout))
            .route("/pin/verif", post(handlers::pin::verify_pin))
            .route_layer(from_fn(require_bound_device)),
        &state,
        AccessPolicy::authenticated().allow_awaiting_approval(),
    );

    let status_routes = protect(
        Router::new().route(
            "/auth/registration-status",
            get(handlers::auth::registration_status),
        ),
        &state,
        AccessPolicy::authenticated().allow_awaiting_approval(),
    );

    let profile_routes = protect(
        Router::new().route("/registration/profile", put(handlers::registration::submit_profile)),
        &state,
        AccessPolicy::authenticated()
            .statuses([RegistrationStatus::Incomplete])
            .min_step(RegistrationStep::CompleteProfile),
    );

    let pin_create_routes = protect(
        Router::new().route("/pin/create", post(handlers::pin::create_pin)),
        &state,
        // status is checked by the engine so a repeat create reports a conflict
        AccessPolicy::authenticated().min_step(RegistrationStep::CreatePin),
    );

    let identity_card_routes = protect(
        Router::new().route(
            "/registration/identity-card",
            post(handlers::registration::submit_identity_card),
        ),
        &state,
        AccessPolicy::authenticated()
            .roles([Role::Pengepul])
            .statuses([RegistrationStatus::OtpVerified, RegistrationStatus::Rejected])
            .min_step(RegistrationStep::UploadIdentityCard),
    );

    let company_profile_routes = protect(
        Router::new().route(
            "/registration/company-profile",
            post(handlers::registration::submit_company_profile),
        ),
        &state,
        AccessPolicy::authenticated()
            .roles([Role::Pengelola])
            .statuses([RegistrationStatus::OtpVerified, RegistrationStatus::Rejected])
            .min_step(RegistrationStep::SubmitCompanyProfile),
    );

    let admin_routes = protect(
        Router::new()
            .route("/admusers/reguser/bulk", post(handlers::admin::bulk_review))
            .route("/admusers/reguser/:userid", patch(handlers::admin::review_user))
            .route("/admusers/pending", get(handlers::admin::list_pending)),
        &state,
        AccessPolicy::authenticated()
            .token_type(TokenType::Full)
            .roles([Role::Administrator]),
    );

    let mut app = Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(handlers::metrics::metrics));

    if state.config.swagger.enabled == SwaggerMode::Public {
        app = app.merge(SwaggerUi::new("/docs").url("/.well-known/openapi.json", ApiDoc::openapi()));
    }

    let allowed_origins: Vec<HeaderValue> = state
        .config
        .security
        .allowed_origins
        .iter()
        .filter_map(|o| match o.parse::<HeaderValue>() {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::error!("Invalid CORS origin '{}': {}. Skipping.", o, e);
                None
            }
        })
        .collect();

    let ip_limiter = state.ip_rate_limiter.clone();
    let metrics = state.metrics.clone();
    let request_timeout = Duration::from_secs(state.config.common.request_timeout_seconds);

    app.route("/auth/request-otp", post(handlers::auth::request_otp))
        .route("/auth/verif-otp", post(handlers::auth::verify_otp))
        .route("/auth/refresh-token", post(handlers::auth::refresh_token))
        .merge(session_routes)
        .merge(status_routes)
        .merge(profile_routes)
        .merge(pin_create_routes)
        .merge(identity_card_routes)
        .merge(company_profile_routes)
        .merge(admin_routes)
        .with_state(state)
        .layer(from_fn_with_state(ip_limiter, ip_rate_limit_middleware))
        .layer(TimeoutLayer::new(request_timeout))
        .layer(from_fn_with_state(metrics, metrics_middleware))
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &service_core::axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                )
            },
        ))
        .layer(from_fn(request_id_middleware))
        .layer(from_fn(security_headers_middleware))
        .layer(
            CorsLayer::new()
                .allow_origin(allowed_origins)
                .allow_methods([
                    Method::GET,
                    Method::POST,
                    Method::PUT,
                    Method::PATCH,
                    Method::OPTIONS,
                ])
                .allow_headers([
                    header::AUTHORIZATION,
                    header::CONTENT_TYPE,
                    HeaderName::from_static(DEVICE_ID_HEADER),
                    HeaderName::from_static("x-request-id"),
                ]),
        )
}

/// Liveness plus store reachability
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service healthy"),
        (status = 500, description = "A backing store is unreachable", body = ErrorResponse)
    ),
    tag = "Observability"
)]
pub async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.users.health_check().await.map_err(|e| {
        tracing::error!(error = %e, "Credential store health check failed");
        AppError::from(e)
    })?;

    state.store.health_check().await.map_err(|e| {
        tracing::error!(error = %e, "Ephemeral store health check failed");
        AppError::InternalError(e)
    })?;

    Ok(Json(serde_json::json!({
        "status": "healthy",
        "service": state.config.service_name,
        "version": state.config.service_version,
        "environment": format!("{:?}", state.config.environment),
        "store_backend": format!("{:?}", state.config.store_backend),
        "checks": {
            "credential_store": "up",
            "ephemeral_store": "up"
        }
    })))
}
