#![allow(dead_code)]

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use hostwatch_agent::config::AgentConfig;
use hostwatch_agent::server;
use hostwatch_agent::state::AgentContext;
use serde_json::Value;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::watch;
use tower::util::ServiceExt;

pub struct TestContext {
    pub temp_dir: TempDir,
    pub ctx: Arc<AgentContext>,
    pub app: axum::Router,
}

pub fn build_test_context() -> TestContext {
    build_test_context_with(|_| {})
}

pub fn build_test_context_with(tweak: impl FnOnce(&mut AgentConfig)) -> TestContext {
    let temp_dir = tempfile::tempdir().expect("tempdir should create");
    let mut config = AgentConfig::default();
    config.agent_id = "agent_test_0001".into();
    config.machine_name = "test-host".into();
    config.scripts_dir = temp_dir
        .path()
        .join("scripts")
        .to_string_lossy()
        .into_owned();
    config.audit_log_path = temp_dir
        .path()
        .join("audit.log")
        .to_string_lossy()
        .into_owned();
    config.max_script_timeout_sec = 30;
    tweak(&mut config);

    let config_path = temp_dir.path().join("agent_config.json");
    let (shutdown_tx, _) = watch::channel(false);
    let ctx = AgentContext::new(config, config_path, shutdown_tx);
    let app = server::build_router(Arc::clone(&ctx));
    TestContext { temp_dir, ctx, app }
}

pub async fn post_command(app: &axum::Router, body: Value) -> (StatusCode, Value) {
    post_raw(app, body.to_string().into_bytes()).await
}

pub async fn post_raw(app: &axum::Router, body: Vec<u8>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri("/command")
        .header("content-type", "application/json")
        .body(Body::from(body))
        .expect("request should build");
    let response = app
        .clone()
        .oneshot(request)
        .await
        .expect("handler should answer");
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body should read");
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

/// Poll `get_job_output` until the job reports completion.
pub async fn wait_for_job(app: &axum::Router, job_id: &str) -> Value {
    for _ in 0..200 {
        let (status, body) = post_command(
            app,
            serde_json::json!({
                "command": "get_job_output",
                "data": {"job_id": job_id},
                "timestamp": ""
            }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        if body["data"]["completed"] == true {
            return body;
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
    panic!("job {job_id} never completed");
}
