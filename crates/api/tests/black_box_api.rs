use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use serde_json::{json, Value};

use recalc_api::app::{build_app, build_services, AppServices};
use recalc_infra::{RecalcConfig, TaskStore};

struct TestServer {
    base_url: String,
    services: Arc<AppServices>,
    handle: tokio::task::JoinHandle<()>,
    _dir: tempfile::TempDir,
}

impl TestServer {
    /// Same router as prod over a seeded catalog of `items` published items
    /// (plus one draft), bound to an ephemeral port.
    async fn spawn(items: u64, admin_token: Option<&str>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let catalog_path = dir.path().join("catalog.json");

        let mut seed: Vec<Value> = (1..=items)
            .map(|id| json!({"id": id, "status": "published", "categories": [id % 3 + 1]}))
            .collect();
        seed.push(json!({"id": items + 1, "status": "draft", "categories": [1]}));
        std::fs::write(&catalog_path, json!({ "items": seed }).to_string()).unwrap();

        let config = RecalcConfig {
            batch_size: 7,
            poll_interval: Duration::from_millis(2),
            catalog_path: Some(catalog_path),
            state_path: Some(dir.path().join("state.json")),
            admin_token: admin_token.map(str::to_string),
            ..RecalcConfig::default()
        };

        let services = Arc::new(build_services(&config).await.unwrap());
        let app = build_app(services.clone(), config.admin_token.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            services,
            handle,
            _dir: dir,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
        self.services.shutdown();
    }
}

async fn status_eventually(client: &reqwest::Client, srv: &TestServer, want: &str) -> Value {
    // Batches run on the executor thread; poll until the job settles.
    for _ in 0..500 {
        let body: Value = client
            .get(srv.url("/recalc/status"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        if body["state"]["status"] == want {
            return body;
        }

        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    panic!("job did not reach {want} within timeout");
}

#[tokio::test]
async fn health_is_public() {
    let srv = TestServer::spawn(3, Some("s3cret")).await;

    let res = reqwest::get(srv.url("/health")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn admin_token_required_when_configured() {
    let srv = TestServer::spawn(3, Some("s3cret")).await;
    let client = reqwest::Client::new();

    let res = client.post(srv.url("/recalc/start")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = client
        .get(srv.url("/recalc/status"))
        .bearer_auth("wrong")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = client
        .get(srv.url("/recalc/status"))
        .bearer_auth("s3cret")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn status_reports_idle_before_any_job() {
    let srv = TestServer::spawn(10, None).await;

    let res = reqwest::get(srv.url("/recalc/status")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let body: Value = res.json().await.unwrap();
    assert_eq!(body["state"]["status"], "idle");
    assert_eq!(body["state"]["batch_size"], 7);
    assert_eq!(body["percent"], 0);
    assert!(body.get("message").is_none());
}

#[tokio::test]
async fn started_job_runs_to_completion() {
    let srv = TestServer::spawn(50, None).await;
    let client = reqwest::Client::new();

    let res = client.post(srv.url("/recalc/start")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);

    let body: Value = res.json().await.unwrap();
    assert_eq!(body["state"]["status"], "running");
    assert_eq!(body["state"]["total"], 50);
    assert_eq!(body["state"]["processed"], 0);
    assert!(body["message"].is_string());

    let body = status_eventually(&client, &srv, "completed").await;
    assert_eq!(body["state"]["processed"], 50);
    assert_eq!(body["percent"], 100);
    assert!(body["state"]["finished_at"].is_string());

    let res = client.get(srv.url("/recalc/tasks")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["scheduler_available"], true);
    // The last task may still be marked running for a moment after it commits.
    let done = body["tasks"]["completed"].as_u64().unwrap() + body["tasks"]["running"].as_u64().unwrap();
    assert_eq!(done, 8);
    assert_eq!(body["tasks"]["pending"], 0);
    assert_eq!(body["tasks"]["dead_lettered"], 0);
}

#[tokio::test]
async fn clear_resets_to_idle() {
    let srv = TestServer::spawn(20, None).await;
    let client = reqwest::Client::new();

    client.post(srv.url("/recalc/start")).send().await.unwrap();
    status_eventually(&client, &srv, "completed").await;

    let res = client.post(srv.url("/recalc/clear")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let body: Value = res.json().await.unwrap();
    assert_eq!(body["state"]["status"], "idle");
    assert_eq!(body["state"]["processed"], 0);
    assert_eq!(body["percent"], 0);
    assert!(body["message"].is_string());
}

#[tokio::test]
async fn start_is_rejected_when_scheduler_is_down() {
    let srv = TestServer::spawn(5, None).await;
    srv.services.tasks().close();
    let client = reqwest::Client::new();

    let res = client.post(srv.url("/recalc/start")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);

    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "scheduler_unavailable");

    let body: Value = client
        .get(srv.url("/recalc/status"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["state"]["status"], "idle");
}
