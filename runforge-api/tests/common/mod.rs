/// Shared test harness
///
/// Builds the full application (router + embedded worker manager) over the
/// in-memory store with the mock executor, and drives it through
/// `tower::ServiceExt::oneshot` without binding a socket.

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use runforge_api::app::{build_router, AppState};
use runforge_api::config::{
    default_deny_list, ApiConfig, Config, DatabaseSettings, JwtConfig, LimitsConfig,
    RateLimitSettings, WorkerSettings,
};
use runforge_shared::store::memory::MemoryStore;
use runforge_shared::store::Store;
use runforge_worker::executor::MockExecutor;
use runforge_worker::manager::{Manager, ManagerConfig, ReapPolicy};
use runforge_worker::pool::WorkerConfig;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

/// Configuration for tests: fast worker polling, effectively-unlimited
/// rate budgets (individual tests tighten them as needed)
pub fn test_config() -> Config {
    Config {
        api: ApiConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            cors_origins: vec!["*".to_string()],
            production: false,
        },
        database: DatabaseSettings {
            url: "memory://".to_string(),
            max_connections: 1,
        },
        jwt: JwtConfig {
            secret: "integration-test-secret-key-32-bytes!".to_string(),
            access_ttl_seconds: 3600,
            refresh_ttl_seconds: 86400,
        },
        worker: WorkerSettings {
            slots: 4,
            user_slots: 4,
            poll_interval_ms: 20,
            batch_size: 10,
            reap_policy: "requeue".to_string(),
            max_output_bytes: 64 * 1024,
            shutdown_grace_seconds: 5,
        },
        limits: LimitsConfig {
            script_deny_list: default_deny_list(),
            max_script_bytes: 64 * 1024,
            rate: RateLimitSettings {
                auth_per_hour: 10_000,
                register_per_hour: 10_000,
                refresh_per_hour: 10_000,
                task_ops_per_hour: 10_000,
                task_create_per_hour: 10_000,
                execution_ops_per_hour: 10_000,
                execution_create_per_hour: 10_000,
            },
        },
    }
}

pub struct TestContext {
    pub app: Router,
    pub store: Arc<dyn Store>,
    pub manager: Manager,
}

impl TestContext {
    pub async fn new() -> Self {
        Self::with_config(test_config()).await
    }

    pub async fn with_config(config: Config) -> Self {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let manager = Manager::new(
            store.clone(),
            Arc::new(MockExecutor::new()),
            ManagerConfig {
                slot_capacity: config.worker.slots,
                per_user_slots: config.worker.user_slots,
                worker: WorkerConfig {
                    poll_interval: Duration::from_millis(config.worker.poll_interval_ms),
                    batch_size: config.worker.batch_size,
                    dispatch_wait: Duration::from_millis(50),
                    ..WorkerConfig::default()
                },
                reap_policy: config
                    .worker
                    .reap_policy
                    .parse()
                    .unwrap_or(ReapPolicy::Requeue),
            },
        );
        manager.start().await.expect("manager failed to start");

        let state = AppState::new(store.clone(), config, manager.clone());
        TestContext {
            app: build_router(state),
            store,
            manager,
        }
    }

    /// Sends one request, returning status and parsed JSON body
    pub async fn request(
        &self,
        method: &str,
        path: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let response = self.raw_request(method, path, token, body).await;
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("failed to read response body");
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }

    /// Sends one request, returning the raw response (for header checks)
    pub async fn raw_request(
        &self,
        method: &str,
        path: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(path);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .expect("failed to build request"),
            None => builder.body(Body::empty()).expect("failed to build request"),
        };

        self.app
            .clone()
            .oneshot(request)
            .await
            .expect("request failed")
    }

    /// Registers a user and returns their access token
    pub async fn register(&self, email: &str) -> String {
        let (status, body) = self
            .request(
                "POST",
                "/auth/register",
                None,
                Some(json!({
                    "email": email,
                    "password": "P4ssw0rd!",
                    "name": "Test User",
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "register failed: {}", body);
        body["access_token"]
            .as_str()
            .expect("no access token in register response")
            .to_string()
    }

    /// Creates a task and returns its id
    pub async fn create_task(&self, token: &str, name: &str, script: &str) -> String {
        let (status, body) = self
            .request(
                "POST",
                "/tasks",
                Some(token),
                Some(json!({
                    "name": name,
                    "script_content": script,
                    "script_type": "python",
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "create task failed: {}", body);
        body["id"].as_str().expect("no task id").to_string()
    }

    /// Starts an execution for a task and returns the execution id
    pub async fn start_execution(&self, token: &str, task_id: &str) -> String {
        let (status, body) = self
            .request(
                "POST",
                &format!("/tasks/{}/executions", task_id),
                Some(token),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "start execution failed: {}", body);
        body["id"].as_str().expect("no execution id").to_string()
    }

    /// Polls an execution until its status matches, panicking on timeout
    pub async fn wait_for_execution_status(
        &self,
        token: &str,
        execution_id: &str,
        wanted: &str,
        seconds: u64,
    ) -> Value {
        let deadline = seconds * 40;
        for _ in 0..deadline {
            let (status, body) = self
                .request(
                    "GET",
                    &format!("/executions/{}", execution_id),
                    Some(token),
                    None,
                )
                .await;
            assert_eq!(status, StatusCode::OK, "get execution failed: {}", body);
            if body["status"] == wanted {
                return body;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("execution {} never reached status {}", execution_id, wanted);
    }
}
