/// Application state and router builder
///
/// # Router layout
///
/// ```text
/// /
/// ├── /health, /ready, /health/workers   # public probes
/// ├── /auth/register | /login | /refresh # public, each with its own rate budget
/// ├── /auth/me                           # bearer
/// ├── /tasks ...                         # bearer + task budgets
/// └── /executions/{id} ...               # bearer + execution budgets
/// ```
///
/// # Middleware stack (outermost first)
///
/// 1. Security headers
/// 2. CORS
/// 3. Request tracing
/// 4. 1 MiB body limit
/// 5. Bearer auth (protected groups), which must run before the rate
///    limiter so budgets key on the user instead of the IP

use crate::middleware::rate_limit::{self, RateLimitRule, RateLimiter};
use crate::middleware::security::SecurityHeadersLayer;
use crate::{config::Config, error::ApiError, routes};
use axum::{
    extract::{DefaultBodyLimit, Request},
    http::{header, HeaderValue, Method},
    middleware::Next,
    response::Response,
    routing::{get, post},
    Router,
};
use runforge_shared::auth::jwt;
use runforge_shared::auth::middleware::{bearer_token, AuthContext};
use runforge_shared::service::{ExecutionService, TaskService};
use runforge_shared::store::Store;
use runforge_worker::manager::Manager;
use std::sync::Arc;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

/// Request body cap (spec'd at 1 MiB; oversize yields 413)
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Shared application state, cloned per request
#[derive(Clone)]
pub struct AppState {
    /// Storage handle (PostgreSQL in production, in-memory in tests)
    pub store: Arc<dyn Store>,

    /// Task service
    pub tasks: TaskService,

    /// Execution lifecycle service
    pub executions: ExecutionService,

    /// Application configuration
    pub config: Arc<Config>,

    /// Sliding-window rate limiter
    pub limiter: Arc<RateLimiter>,

    /// Embedded worker manager (health surface)
    pub manager: Manager,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, config: Config, manager: Manager) -> Self {
        Self {
            tasks: TaskService::new(store.clone()),
            executions: ExecutionService::new(store.clone()),
            store,
            config: Arc::new(config),
            limiter: Arc::new(RateLimiter::new()),
            manager,
        }
    }

    /// JWT signing secret
    pub fn jwt_secret(&self) -> &str {
        &self.config.jwt.secret
    }
}

fn with_rate_limit(
    router: Router<AppState>,
    limiter: Arc<RateLimiter>,
    rule: RateLimitRule,
) -> Router<AppState> {
    router.layer(axum::middleware::from_fn(
        move |request: Request, next: Next| {
            let limiter = limiter.clone();
            async move { rate_limit::enforce(limiter, rule, request, next).await }
        },
    ))
}

/// Builds the complete router with all routes and middleware
pub fn build_router(state: AppState) -> Router {
    let limiter = state.limiter.clone();
    let rate = state.config.limits.rate;

    let health_routes = Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/ready", get(routes::health::readiness))
        .route("/health/workers", get(routes::health::workers_health));

    // Public auth endpoints, each with its own budget (keyed per IP)
    let register_routes = with_rate_limit(
        Router::new().route("/auth/register", post(routes::auth::register)),
        limiter.clone(),
        RateLimitRule::per_hour("register", rate.register_per_hour),
    );
    let login_routes = with_rate_limit(
        Router::new().route("/auth/login", post(routes::auth::login)),
        limiter.clone(),
        RateLimitRule::per_hour("auth", rate.auth_per_hour),
    );
    let refresh_routes = with_rate_limit(
        Router::new().route("/auth/refresh", post(routes::auth::refresh)),
        limiter.clone(),
        RateLimitRule::per_hour("refresh", rate.refresh_per_hour),
    );

    // Authenticated groups, budgets keyed per user
    let task_create_routes = with_rate_limit(
        Router::new().route("/tasks", post(routes::tasks::create_task)),
        limiter.clone(),
        RateLimitRule::per_hour("task_create", rate.task_create_per_hour),
    );
    let task_op_routes = with_rate_limit(
        Router::new()
            .route("/tasks", get(routes::tasks::list_tasks))
            .route(
                "/tasks/:id",
                get(routes::tasks::get_task)
                    .put(routes::tasks::update_task)
                    .delete(routes::tasks::delete_task),
            ),
        limiter.clone(),
        RateLimitRule::per_hour("task_ops", rate.task_ops_per_hour),
    );
    let execution_create_routes = with_rate_limit(
        Router::new().route(
            "/tasks/:id/executions",
            post(routes::executions::create_execution),
        ),
        limiter.clone(),
        RateLimitRule::per_hour("execution_create", rate.execution_create_per_hour),
    );
    let execution_op_routes = with_rate_limit(
        Router::new()
            .route(
                "/tasks/:id/executions",
                get(routes::executions::list_executions),
            )
            .route(
                "/executions/:id",
                get(routes::executions::get_execution)
                    .put(routes::executions::update_execution)
                    .delete(routes::executions::cancel_execution),
            ),
        limiter,
        RateLimitRule::per_hour("execution_ops", rate.execution_ops_per_hour),
    );

    let protected_routes = Router::new()
        .route("/auth/me", get(routes::auth::me))
        .merge(task_create_routes)
        .merge(task_op_routes)
        .merge(execution_create_routes)
        .merge(execution_op_routes)
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            bearer_auth,
        ));

    let cors = if state.config.api.cors_origins.contains(&"*".to_string()) {
        CorsLayer::permissive()
    } else {
        let origins: Vec<HeaderValue> = state
            .config
            .api
            .cors_origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::DELETE,
                Method::OPTIONS,
            ])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
            .allow_credentials(true)
            .max_age(std::time::Duration::from_secs(3600))
    };

    Router::new()
        .merge(health_routes)
        .merge(register_routes)
        .merge(login_routes)
        .merge(refresh_routes)
        .merge(protected_routes)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors)
        .layer(SecurityHeadersLayer::new(state.config.api.production))
        .with_state(state)
}

/// Bearer authentication middleware
///
/// Validates the access token and injects [`AuthContext`] into request
/// extensions for handlers and the rate limiter.
async fn bearer_auth(
    state: axum::extract::State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(request.headers())?;
    let claims = jwt::validate_access_token(token, state.jwt_secret())?;

    request
        .extensions_mut()
        .insert(AuthContext::from_claims(&claims));

    Ok(next.run(request).await)
}
