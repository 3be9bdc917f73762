//! End-to-end tests of the HTTP surface, backed by the in-memory adapters.

use std::collections::HashMap;
use std::sync::Arc;

use api_lib::config::Config;
use api_lib::web::{self, AppState};
use asset_history_core::memory::{InMemoryAccounts, InMemoryMirror, InMemoryPartitions};
use asset_history_core::{
    GenerationService, GenerationWorkflow, HistoryStore, InteractionRequest, PortError,
    PortResult, ProductInfo, RemoteMirror, ScriptRequest, SessionManager, SyncConfig,
    SyncGateway,
};
use async_trait::async_trait;
use reqwest::{header, Method, StatusCode};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

struct CannedGenerator;

#[async_trait]
impl GenerationService for CannedGenerator {
    async fn analyze_product(&self, pid: &str) -> PortResult<ProductInfo> {
        if pid == "broken" {
            return Err(PortError::Generation("analysis model unavailable".to_string()));
        }
        Ok(ProductInfo {
            pid: pid.to_string(),
            introduction: format!("Product {}", pid),
            ..ProductInfo::default()
        })
    }

    async fn generate_three_view(&self, product: &ProductInfo) -> PortResult<String> {
        Ok(format!("three-view:{}", product.pid))
    }

    async fn generate_interaction(
        &self,
        _product: &ProductInfo,
        request: &InteractionRequest,
    ) -> PortResult<String> {
        Ok(format!("interaction:{}", request.custom_prompt.as_deref().unwrap_or("default")))
    }

    async fn generate_selling_points(&self, _product: &ProductInfo) -> PortResult<Vec<String>> {
        Ok(vec!["Light".to_string(), "Cheap".to_string()])
    }

    async fn generate_script(
        &self,
        _product: &ProductInfo,
        request: &ScriptRequest,
    ) -> PortResult<String> {
        Ok(format!(
            "points={} assets={}",
            request.points.join("|"),
            request.assets.join("|")
        ))
    }
}

struct TestServer {
    base: String,
    client: reqwest::Client,
    mirror: Arc<InMemoryMirror>,
    cancel: CancellationToken,
}

impl TestServer {
    async fn start() -> Self {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("DATABASE_URL", "sqlite::memory:"),
            ("ADMIN_TOKEN", "admin-secret"),
        ]);
        let config = Arc::new(Config::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap());

        let accounts = Arc::new(InMemoryAccounts::with_accounts([("alice", "pw"), ("bob", "pw")]));
        let partitions = Arc::new(InMemoryPartitions::new());
        let mirror = Arc::new(InMemoryMirror::new());
        let cancel = CancellationToken::new();
        let (gateway, _worker) = SyncGateway::spawn(
            mirror.clone(),
            SyncConfig {
                base_backoff: std::time::Duration::from_millis(1),
                ..SyncConfig::default()
            },
            cancel.clone(),
        );
        let sync = Arc::new(gateway);
        let store = Arc::new(HistoryStore::new(partitions, sync.clone()));
        let sessions = Arc::new(SessionManager::new(
            accounts.clone(),
            store.clone(),
            Some(mirror.clone() as Arc<dyn RemoteMirror>),
        ));
        let workflow = Arc::new(GenerationWorkflow::new(Arc::new(CannedGenerator), store.clone()));
        let state = Arc::new(AppState::new(config, sessions, store, workflow, sync, accounts));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = web::router(state);
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base: format!("http://{}", addr),
            client: reqwest::Client::new(),
            mirror,
            cancel,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    /// Logs in and returns the cookie header value for later requests.
    async fn login(&self, username: &str, password: &str) -> String {
        let response = self
            .client
            .post(self.url("/auth/login"))
            .json(&json!({ "username": username, "password": password }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let set_cookie = response.headers()[header::SET_COOKIE].to_str().unwrap();
        set_cookie.split(';').next().unwrap().to_string()
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        cookie: &str,
        body: Option<Value>,
    ) -> reqwest::Response {
        let mut request = self
            .client
            .request(method, self.url(path))
            .header(header::COOKIE, cookie);
        if let Some(body) = body {
            request = request.json(&body);
        }
        request.send().await.unwrap()
    }

    async fn json(
        &self,
        method: Method,
        path: &str,
        cookie: &str,
        body: Option<Value>,
    ) -> Value {
        let response = self.send(method, path, cookie, body).await;
        assert!(response.status().is_success(), "{} -> {}", path, response.status());
        response.json().await.unwrap()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[tokio::test]
async fn session_routes_require_a_live_session() {
    let server = TestServer::start().await;

    let response = server.client.get(server.url("/history")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = server
        .client
        .post(server.url("/auth/login"))
        .json(&json!({ "username": "alice", "password": "nope" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let cookie = server.login("alice", "pw").await;
    let response = server.send(Method::GET, "/history", &cookie, None).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = server.send(Method::POST, "/auth/logout", &cookie, None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let response = server.send(Method::GET, "/history", &cookie, None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn full_generation_flow() {
    let server = TestServer::start().await;
    let cookie = server.login("alice", "pw").await;

    let item = server
        .json(Method::POST, "/products", &cookie, Some(json!({ "pid": "42" })))
        .await;
    let id = item["id"].as_str().unwrap().to_string();
    assert!(id.contains("-42-"));

    // The new item owns the asset selection.
    let selection = server.json(Method::GET, "/selection", &cookie, None).await;
    assert_eq!(selection["activeItem"], json!(id));

    server
        .json(Method::POST, &format!("/history/{}/three-views", id), &cookie, None)
        .await;
    let item = server
        .json(
            Method::POST,
            &format!("/history/{}/interactions", id),
            &cookie,
            Some(json!({ "customPrompt": "beach" })),
        )
        .await;
    assert_eq!(item["interactions"], json!(["interaction:beach"]));

    let item = server
        .json(Method::POST, &format!("/history/{}/selling-points", id), &cookie, None)
        .await;
    assert_eq!(item["selectedPoints"], json!(["Light", "Cheap"]));

    server
        .json(
            Method::POST,
            &format!("/history/{}/custom-points", id),
            &cookie,
            Some(json!({ "point": "Gift ready" })),
        )
        .await;
    server
        .json(
            Method::POST,
            &format!("/history/{}/selected-points", id),
            &cookie,
            Some(json!({ "point": "Cheap" })),
        )
        .await;
    let response = server
        .send(
            Method::POST,
            &format!("/history/{}/selected-points", id),
            &cookie,
            Some(json!({ "point": "Unknown" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    server
        .json(
            Method::POST,
            "/selection/assets",
            &cookie,
            Some(json!({ "url": "interaction:beach" })),
        )
        .await;
    let item = server
        .json(
            Method::POST,
            &format!("/history/{}/script", id),
            &cookie,
            Some(json!({})),
        )
        .await;
    assert_eq!(item["script"], json!("points=Light assets=interaction:beach"));
    assert_eq!(item["threeViews"], json!(["three-view:42"]));

    let history = server.json(Method::GET, "/history", &cookie, None).await;
    assert_eq!(history["lastActiveId"], json!(id));
    assert_eq!(history["items"].as_array().unwrap().len(), 1);

    let response = server
        .send(Method::GET, &format!("/history/{}/export", id), &cookie, None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let disposition = response.headers()[header::CONTENT_DISPOSITION]
        .to_str()
        .unwrap()
        .to_string();
    let created_at = item["timestamp"].as_i64().unwrap();
    assert_eq!(
        disposition,
        format!("attachment; filename=\"project-42-{}.json\"", created_at)
    );
    let exported: Value = response.json().await.unwrap();
    assert_eq!(exported["id"], json!(id));
}

#[tokio::test]
async fn generation_failures_map_to_bad_gateway() {
    let server = TestServer::start().await;
    let cookie = server.login("alice", "pw").await;

    let response = server
        .send(Method::POST, "/products", &cookie, Some(json!({ "pid": "broken" })))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert!(response.text().await.unwrap().contains("analysis model unavailable"));

    let response = server
        .send(Method::POST, "/products", &cookie, Some(json!({ "pid": " " })))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn trash_restore_and_delete() {
    let server = TestServer::start().await;
    let cookie = server.login("alice", "pw").await;
    let item = server
        .json(Method::POST, "/products", &cookie, Some(json!({ "pid": "1" })))
        .await;
    let id = item["id"].as_str().unwrap().to_string();

    let response = server
        .send(Method::POST, &format!("/history/{}/trash", id), &cookie, None)
        .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    // Trashing the active item releases the asset selection.
    let selection = server.json(Method::GET, "/selection", &cookie, None).await;
    assert_eq!(selection["activeItem"], Value::Null);
    let active = server.json(Method::GET, "/history/active", &cookie, None).await;
    assert_eq!(active, Value::Null);

    let trash = server.json(Method::GET, "/history/trash", &cookie, None).await;
    assert_eq!(trash.as_array().unwrap().len(), 1);
    assert!(trash[0]["deletedAt"].is_number());

    let response = server
        .send(Method::POST, &format!("/history/{}/three-views", id), &cookie, None)
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = server
        .send(Method::POST, &format!("/history/{}/restore", id), &cookie, None)
        .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let trash = server.json(Method::GET, "/history/trash", &cookie, None).await;
    assert!(trash.as_array().unwrap().is_empty());

    server
        .send(Method::POST, &format!("/history/{}/trash", id), &cookie, None)
        .await;
    let emptied = server.json(Method::DELETE, "/trash", &cookie, None).await;
    assert_eq!(emptied["removed"], json!(1));

    let response = server
        .send(Method::DELETE, &format!("/history/{}", id), &cookie, None)
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn repeated_trash_and_restore_succeed() {
    let server = TestServer::start().await;
    let cookie = server.login("alice", "pw").await;
    let item = server
        .json(Method::POST, "/products", &cookie, Some(json!({ "pid": "1" })))
        .await;
    let id = item["id"].as_str().unwrap().to_string();

    for _ in 0..2 {
        let response = server
            .send(Method::POST, &format!("/history/{}/trash", id), &cookie, None)
            .await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }
    let trash = server.json(Method::GET, "/history/trash", &cookie, None).await;
    assert_eq!(trash.as_array().unwrap().len(), 1);

    for _ in 0..2 {
        let response = server
            .send(Method::POST, &format!("/history/{}/restore", id), &cookie, None)
            .await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }
    let history = server.json(Method::GET, "/history", &cookie, None).await;
    assert_eq!(history["items"].as_array().unwrap().len(), 1);

    for action in ["trash", "restore"] {
        let response = server
            .send(Method::POST, &format!("/history/missing/{}", action), &cookie, None)
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}

#[tokio::test]
async fn selection_follows_the_item_a_write_made_active() {
    let server = TestServer::start().await;
    let cookie = server.login("alice", "pw").await;
    let a = server
        .json(Method::POST, "/products", &cookie, Some(json!({ "pid": "1" })))
        .await["id"]
        .as_str()
        .unwrap()
        .to_string();
    let b = server
        .json(Method::POST, "/products", &cookie, Some(json!({ "pid": "2" })))
        .await["id"]
        .as_str()
        .unwrap()
        .to_string();

    server
        .json(Method::PUT, "/selection/active", &cookie, Some(json!({ "itemId": a })))
        .await;
    let selection = server
        .json(Method::POST, "/selection/assets", &cookie, Some(json!({ "url": "asset-of-a" })))
        .await;
    assert_eq!(selection["assets"], json!(["asset-of-a"]));

    // Generating on b moves both active pointers to b and drops a's assets.
    server
        .json(Method::POST, &format!("/history/{}/three-views", b), &cookie, None)
        .await;
    let selection = server.json(Method::GET, "/selection", &cookie, None).await;
    assert_eq!(selection["activeItem"], json!(b));
    assert_eq!(selection["assets"], json!([]));
    let active = server.json(Method::GET, "/history/active", &cookie, None).await;
    assert_eq!(active["id"], json!(b));

    // A write to the item that is already active keeps its assets.
    server
        .json(Method::POST, "/selection/assets", &cookie, Some(json!({ "url": "asset-of-b" })))
        .await;
    server
        .json(
            Method::POST,
            &format!("/history/{}/custom-points", b),
            &cookie,
            Some(json!({ "point": "Durable" })),
        )
        .await;
    let selection = server.json(Method::GET, "/selection", &cookie, None).await;
    assert_eq!(selection["activeItem"], json!(b));
    assert_eq!(selection["assets"], json!(["asset-of-b"]));

    // Point edits on another item move the selection too.
    server
        .json(
            Method::POST,
            &format!("/history/{}/custom-points", a),
            &cookie,
            Some(json!({ "point": "Compact" })),
        )
        .await;
    let selection = server.json(Method::GET, "/selection", &cookie, None).await;
    assert_eq!(selection["activeItem"], json!(a));
    assert_eq!(selection["assets"], json!([]));
    let history = server.json(Method::GET, "/history", &cookie, None).await;
    assert_eq!(history["lastActiveId"], json!(a));
}

#[tokio::test]
async fn users_only_see_their_own_history() {
    let server = TestServer::start().await;
    let alice = server.login("alice", "pw").await;
    let bob = server.login("bob", "pw").await;

    let item = server
        .json(Method::POST, "/products", &alice, Some(json!({ "pid": "9" })))
        .await;
    let id = item["id"].as_str().unwrap().to_string();

    let history = server.json(Method::GET, "/history", &bob, None).await;
    assert!(history["items"].as_array().unwrap().is_empty());
    let response = server
        .send(Method::POST, &format!("/history/{}/trash", id), &bob, None)
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let response = server
        .send(Method::PUT, "/selection/active", &bob, Some(json!({ "itemId": id })))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn writes_are_mirrored_and_status_is_reported() {
    let server = TestServer::start().await;
    let cookie = server.login("alice", "pw").await;
    server
        .json(Method::POST, "/products", &cookie, Some(json!({ "pid": "3" })))
        .await;

    let status = tokio::time::timeout(std::time::Duration::from_secs(5), async {
        loop {
            let status = server.json(Method::GET, "/sync/status", &cookie, None).await;
            if status["state"] == json!("succeeded") {
                return status;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert!(status["at"].is_number() || status["at"].is_string());
    assert_eq!(server.mirror.history("alice").await.unwrap().len(), 1);
}

#[tokio::test]
async fn admin_routes_require_the_admin_token() {
    let server = TestServer::start().await;

    let response = server.client.get(server.url("/admin/users")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = server
        .client
        .post(server.url("/admin/users"))
        .header("x-admin-token", "admin-secret")
        .json(&json!({ "username": "carol", "password": "pw3" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    server.login("carol", "pw3").await;

    let users: Value = server
        .client
        .get(server.url("/admin/users"))
        .header("x-admin-token", "admin-secret")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let names: Vec<&str> = users
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|u| u["username"].as_str())
        .collect();
    assert_eq!(names, vec!["alice", "bob", "carol"]);

    let response = server
        .client
        .delete(server.url("/admin/users/carol"))
        .header("x-admin-token", "admin-secret")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let response = server
        .client
        .post(server.url("/auth/login"))
        .json(&json!({ "username": "carol", "password": "pw3" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
