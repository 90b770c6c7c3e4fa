/// End-to-end API tests
///
/// The full stack runs in-process: router, services, in-memory store, and
/// the worker manager with the mock executor. Each test gets a fresh
/// context.

mod common;

use axum::http::StatusCode;
use common::{test_config, TestContext};
use serde_json::json;
use std::collections::HashSet;

#[tokio::test]
async fn test_happy_path_execution_lifecycle() {
    let ctx = TestContext::new().await;
    let token = ctx.register("alice@example.com").await;

    // Task starts pending
    let (status, task) = ctx
        .request(
            "POST",
            "/tasks",
            Some(&token),
            Some(json!({
                "name": "T1",
                "script_content": "print(1)",
                "script_type": "python",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(task["status"], "pending");
    assert_eq!(task["priority"], 5);
    let task_id = task["id"].as_str().unwrap();

    // Starting an execution flips the task to running
    let (status, execution) = ctx
        .request(
            "POST",
            &format!("/tasks/{}/executions", task_id),
            Some(&token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(execution["status"], "pending");
    let execution_id = execution["id"].as_str().unwrap();

    let (_, task) = ctx
        .request("GET", &format!("/tasks/{}", task_id), Some(&token), None)
        .await;
    assert_eq!(task["status"], "running");

    // The worker picks it up and completes it
    let execution = ctx
        .wait_for_execution_status(&token, execution_id, "completed", 10)
        .await;
    assert_eq!(execution["return_code"], 0);
    assert!(execution["completed_at"].is_string());

    let (_, task) = ctx
        .request("GET", &format!("/tasks/{}", task_id), Some(&token), None)
        .await;
    assert_eq!(task["status"], "completed");
}

#[tokio::test]
async fn test_double_start_rejected() {
    let ctx = TestContext::new().await;
    let token = ctx.register("alice@example.com").await;
    let task_id = ctx.create_task(&token, "busy task", "sleep:3000").await;

    ctx.start_execution(&token, &task_id).await;

    let (status, body) = ctx
        .request(
            "POST",
            &format!("/tasks/{}/executions", task_id),
            Some(&token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(
        body["message"]
            .as_str()
            .unwrap_or_default()
            .to_lowercase()
            .contains("already running"),
        "unexpected conflict body: {}",
        body
    );
}

#[tokio::test]
async fn test_cancel_in_flight_requeues_task() {
    let ctx = TestContext::new().await;
    let token = ctx.register("alice@example.com").await;
    let task_id = ctx.create_task(&token, "long sleeper", "sleep:10000").await;
    let execution_id = ctx.start_execution(&token, &task_id).await;

    // Wait for the worker to claim it
    ctx.wait_for_execution_status(&token, &execution_id, "running", 10)
        .await;

    let (status, cancelled) = ctx
        .request(
            "DELETE",
            &format!("/executions/{}", execution_id),
            Some(&token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cancelled["status"], "cancelled");

    // The task is re-queued and re-runnable
    let (_, task) = ctx
        .request("GET", &format!("/tasks/{}", task_id), Some(&token), None)
        .await;
    assert_eq!(task["status"], "pending");

    let (status, _) = ctx
        .request(
            "POST",
            &format!("/tasks/{}/executions", task_id),
            Some(&token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn test_cancel_twice_conflicts() {
    let ctx = TestContext::new().await;
    let token = ctx.register("alice@example.com").await;
    let task_id = ctx.create_task(&token, "cancelled twice", "sleep:10000").await;
    let execution_id = ctx.start_execution(&token, &task_id).await;

    let (status, _) = ctx
        .request(
            "DELETE",
            &format!("/executions/{}", execution_id),
            Some(&token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = ctx
        .request(
            "DELETE",
            &format!("/executions/{}", execution_id),
            Some(&token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["message"]
        .as_str()
        .unwrap_or_default()
        .contains("cannot cancel execution"));
}

#[tokio::test]
async fn test_cross_tenant_access_forbidden() {
    let ctx = TestContext::new().await;
    let alice = ctx.register("alice@example.com").await;
    let bob = ctx.register("bob@example.com").await;

    let task_id = ctx.create_task(&alice, "private", "print(1)").await;
    let execution_id = ctx.start_execution(&alice, &task_id).await;

    let (status, _) = ctx
        .request("GET", &format!("/tasks/{}", task_id), Some(&bob), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = ctx
        .request(
            "DELETE",
            &format!("/executions/{}", execution_id),
            Some(&bob),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = ctx
        .request(
            "POST",
            &format!("/tasks/{}/executions", task_id),
            Some(&bob),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_dangerous_script_rejected() {
    let ctx = TestContext::new().await;
    let token = ctx.register("alice@example.com").await;

    let (status, body) = ctx
        .request(
            "POST",
            "/tasks",
            Some(&token),
            Some(json!({
                "name": "bad",
                "script_content": "rm -rf /",
                "script_type": "bash",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let fields: Vec<&str> = body["validation_errors"]
        .as_array()
        .expect("validation_errors missing")
        .iter()
        .filter_map(|e| e["field"].as_str())
        .collect();
    assert!(fields.contains(&"script_content"), "body: {}", body);
}

#[tokio::test]
async fn test_validation_field_errors() {
    let ctx = TestContext::new().await;
    let token = ctx.register("alice@example.com").await;

    let (status, body) = ctx
        .request(
            "POST",
            "/tasks",
            Some(&token),
            Some(json!({
                "name": "bad|name",
                "script_content": "print(1)",
                "script_type": "ruby",
                "priority": 11,
                "timeout_seconds": 4000,
            })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let fields: HashSet<&str> = body["validation_errors"]
        .as_array()
        .expect("validation_errors missing")
        .iter()
        .filter_map(|e| e["field"].as_str())
        .collect();
    for field in ["name", "script_type", "priority", "timeout_seconds"] {
        assert!(fields.contains(field), "missing {}: {}", field, body);
    }
}

#[tokio::test]
async fn test_offset_and_cursor_pagination() {
    let ctx = TestContext::new().await;
    let token = ctx.register("alice@example.com").await;

    for i in 0..25 {
        ctx.create_task(&token, &format!("task-{:02}", i), "print(1)")
            .await;
    }

    // Offset pagination carries the total
    let (status, page) = ctx
        .request("GET", "/tasks?limit=10&offset=0", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["items"].as_array().unwrap().len(), 10);
    assert_eq!(page["total"], 25);

    let (_, page) = ctx
        .request("GET", "/tasks?limit=10&offset=20", Some(&token), None)
        .await;
    assert_eq!(page["items"].as_array().unwrap().len(), 5);
    assert_eq!(page["total"], 25);

    // Cursor pagination yields every task exactly once, in order
    let mut seen = HashSet::new();
    let mut names = Vec::new();
    let mut uri = "/tasks?limit=10&sort_field=name&sort_order=asc".to_string();
    loop {
        let (status, page) = ctx.request("GET", &uri, Some(&token), None).await;
        assert_eq!(status, StatusCode::OK, "body: {}", page);
        for item in page["items"].as_array().unwrap() {
            assert!(
                seen.insert(item["id"].as_str().unwrap().to_string()),
                "duplicate task in cursor iteration"
            );
            names.push(item["name"].as_str().unwrap().to_string());
        }
        if page["pagination"]["has_more"] == true {
            let next = page["pagination"]["next_cursor"].as_str().unwrap();
            uri = format!(
                "/tasks?limit=10&sort_field=name&sort_order=asc&cursor={}",
                next
            );
        } else {
            break;
        }
    }
    assert_eq!(seen.len(), 25);
    let mut sorted = names.clone();
    sorted.sort();
    assert_eq!(names, sorted, "cursor iteration out of order");

    // A tampered cursor is rejected
    let (status, _) = ctx
        .request(
            "GET",
            "/tasks?cursor=bm90LWEtY3Vyc29y&sort_field=name&sort_order=asc",
            Some(&token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_auth_flows() {
    let ctx = TestContext::new().await;

    // Register carries the full auth response shape
    let (status, body) = ctx
        .request(
            "POST",
            "/auth/register",
            None,
            Some(json!({
                "email": "alice@example.com",
                "password": "P4ssw0rd!",
                "name": "Alice",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["token_type"], "Bearer");
    assert_eq!(body["expires_in"], 3600);
    assert_eq!(body["user"]["email"], "alice@example.com");
    let refresh_token = body["refresh_token"].as_str().unwrap().to_string();

    // Duplicate email
    let (status, _) = ctx
        .request(
            "POST",
            "/auth/register",
            None,
            Some(json!({
                "email": "Alice@example.com",
                "password": "P4ssw0rd!",
                "name": "Alice Again",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    // Wrong password
    let (status, _) = ctx
        .request(
            "POST",
            "/auth/login",
            None,
            Some(json!({
                "email": "alice@example.com",
                "password": "wrong-password1",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Login works and the access token opens /auth/me
    let (status, body) = ctx
        .request(
            "POST",
            "/auth/login",
            None,
            Some(json!({
                "email": "alice@example.com",
                "password": "P4ssw0rd!",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let access = body["access_token"].as_str().unwrap().to_string();

    let (status, me) = ctx.request("GET", "/auth/me", Some(&access), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["email"], "alice@example.com");
    assert!(me["password_hash"].is_null());

    // Refresh mints a new pair
    let (status, body) = ctx
        .request(
            "POST",
            "/auth/refresh",
            None,
            Some(json!({ "refresh_token": refresh_token })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["access_token"].is_string());

    // A refresh token is not an access token
    let (status, _) = ctx
        .request("GET", "/auth/me", Some(&refresh_token), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // No token at all
    let (status, _) = ctx.request("GET", "/tasks", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_running_task_mutation_guards() {
    let ctx = TestContext::new().await;
    let token = ctx.register("alice@example.com").await;
    let task_id = ctx.create_task(&token, "guarded", "sleep:10000").await;
    ctx.start_execution(&token, &task_id).await;

    let (status, _) = ctx
        .request(
            "PUT",
            &format!("/tasks/{}", task_id),
            Some(&token),
            Some(json!({ "name": "renamed" })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = ctx
        .request("DELETE", &format!("/tasks/{}", task_id), Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_delete_task_cascades_executions() {
    let ctx = TestContext::new().await;
    let token = ctx.register("alice@example.com").await;
    let task_id = ctx.create_task(&token, "short lived", "print(1)").await;
    let execution_id = ctx.start_execution(&token, &task_id).await;

    ctx.wait_for_execution_status(&token, &execution_id, "completed", 10)
        .await;

    let (status, _) = ctx
        .request("DELETE", &format!("/tasks/{}", task_id), Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = ctx
        .request(
            "GET",
            &format!("/executions/{}", execution_id),
            Some(&token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_execution_listing() {
    let ctx = TestContext::new().await;
    let token = ctx.register("alice@example.com").await;
    let task_id = ctx.create_task(&token, "rerun me", "print(1)").await;

    let first = ctx.start_execution(&token, &task_id).await;
    ctx.wait_for_execution_status(&token, &first, "completed", 10)
        .await;

    // Completed tasks cannot be re-run
    let (status, _) = ctx
        .request(
            "POST",
            &format!("/tasks/{}/executions", task_id),
            Some(&token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, page) = ctx
        .request(
            "GET",
            &format!("/tasks/{}/executions", task_id),
            Some(&token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["total"], 1);
    assert_eq!(page["items"][0]["id"], first.as_str());

    // Executions cannot sort by task attributes
    let (status, _) = ctx
        .request(
            "GET",
            &format!("/tasks/{}/executions?sort_field=priority", task_id),
            Some(&token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_health_endpoints() {
    let ctx = TestContext::new().await;

    let (status, body) = ctx.request("GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["database"], "connected");

    let (status, _) = ctx.request("GET", "/ready", None, None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = ctx.request("GET", "/health/workers", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["is_running"], true);
    assert_eq!(body["is_healthy"], true);
    assert!(body["worker_pool"]["pool_size"].as_u64().unwrap() > 0);
    assert!(body["concurrency"]["available_slots"].is_u64());
}

#[tokio::test]
async fn test_security_headers_present() {
    let ctx = TestContext::new().await;
    let response = ctx.raw_request("GET", "/health", None, None).await;
    let headers = response.headers();

    assert_eq!(headers["X-Content-Type-Options"], "nosniff");
    assert_eq!(headers["X-Frame-Options"], "DENY");
    assert_eq!(headers["X-XSS-Protection"], "1; mode=block");
    assert_eq!(
        headers["Referrer-Policy"],
        "strict-origin-when-cross-origin"
    );
    assert_eq!(headers["Content-Security-Policy"], "default-src 'self'");
    // HSTS only in production mode
    assert!(headers.get("Strict-Transport-Security").is_none());
}

#[tokio::test]
async fn test_rate_limit_returns_429() {
    let mut config = test_config();
    config.limits.rate.task_create_per_hour = 2;
    let ctx = TestContext::with_config(config).await;
    let token = ctx.register("alice@example.com").await;

    ctx.create_task(&token, "one", "print(1)").await;
    ctx.create_task(&token, "two", "print(1)").await;

    let response = ctx
        .raw_request(
            "POST",
            "/tasks",
            Some(&token),
            Some(json!({
                "name": "three",
                "script_content": "print(1)",
                "script_type": "python",
            })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().get("Retry-After").is_some());

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert!(body["retry_after_seconds"].as_u64().unwrap() >= 1);
}

#[tokio::test]
async fn test_oversize_body_rejected() {
    let ctx = TestContext::new().await;
    let token = ctx.register("alice@example.com").await;

    let huge = "x".repeat(1024 * 1024 + 512);
    let (status, _) = ctx
        .request(
            "POST",
            "/tasks",
            Some(&token),
            Some(json!({
                "name": "too big",
                "script_content": huge,
                "script_type": "python",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn test_timeout_marks_execution_and_task() {
    let ctx = TestContext::new().await;
    let token = ctx.register("alice@example.com").await;

    // "hang" blocks until killed; the 1-second budget expires first
    let (status, task) = ctx
        .request(
            "POST",
            "/tasks",
            Some(&token),
            Some(json!({
                "name": "hanger",
                "script_content": "hang",
                "script_type": "python",
                "timeout_seconds": 1,
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let task_id = task["id"].as_str().unwrap();
    let execution_id = ctx.start_execution(&token, task_id).await;

    let execution = ctx
        .wait_for_execution_status(&token, &execution_id, "timeout", 15)
        .await;
    assert!(execution["stderr"]
        .as_str()
        .unwrap_or_default()
        .contains("exceeded timeout"));

    let (_, task) = ctx
        .request("GET", &format!("/tasks/{}", task_id), Some(&token), None)
        .await;
    assert_eq!(task["status"], "timeout");

    // Timed-out tasks may be re-run
    let (status, _) = ctx
        .request(
            "POST",
            &format!("/tasks/{}/executions", task_id),
            Some(&token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
}
