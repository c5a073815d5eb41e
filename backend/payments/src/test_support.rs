//! Shared fixtures: in-memory database, seed rows, and an in-process PayPal
//! mock bound to an ephemeral port.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::Client;
use serde_json::{json, Value};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::api::{self, ApiState};
use crate::config::{PayPalConfig, PayPalEnvironment};
use crate::db::{self, Datastore, DonationFilter};
use crate::models::{Campaign, Donation, Project};
use crate::paypal::PayPalClient;

pub const CLIENT_ID: &str = "test-client";
pub const CLIENT_SECRET: &str = "test-secret";
pub const WEBHOOK_ID: &str = "WH-TEST";

// ─────────────────────────────────────────────────────────
// Database
// ─────────────────────────────────────────────────────────

/// Single-connection in-memory database with migrations applied.
pub async fn memory_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");
    db::MIGRATOR.run(&pool).await.expect("migrations");
    pool
}

pub async fn seed_project(pool: &SqlitePool, id: &str, title: &str, goal: Option<&str>) -> Project {
    sqlx::query("INSERT INTO projects (id, title, goal_amount) VALUES (?1, ?2, ?3)")
        .bind(id)
        .bind(title)
        .bind(goal)
        .execute(pool)
        .await
        .expect("seed project");
    Project {
        id: id.to_string(),
        title: title.to_string(),
        goal_amount: goal.map(String::from),
    }
}

pub async fn seed_campaign(pool: &SqlitePool, slug: &str, active: Option<bool>) -> Campaign {
    sqlx::query_as::<_, Campaign>(
        r#"
        INSERT INTO campaigns (id, slug, title, goal_amount, currency, active, created_at)
        VALUES (?1, ?2, ?3, '1000', 'BRL', ?4, 0)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(slug)
    .bind(format!("Campaign {slug}"))
    .bind(active)
    .fetch_one(pool)
    .await
    .expect("seed campaign")
}

pub async fn donation_count(pool: &SqlitePool) -> i64 {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM donations")
        .fetch_one(pool)
        .await
        .expect("count donations");
    count
}

// ─────────────────────────────────────────────────────────
// PayPal mock
// ─────────────────────────────────────────────────────────

#[derive(Default)]
struct MockState {
    token_requests: AtomicUsize,
    token_ttl: AtomicI64,
    reject_tokens: AtomicBool,
    fail_orders: AtomicBool,
    omit_order_id: AtomicBool,
    omit_capture_id: AtomicBool,
    order_seq: AtomicUsize,
    verify_requests: AtomicUsize,
    verification_status: Mutex<String>,
    /// order id → custom_id sent at creation
    orders: Mutex<HashMap<String, String>>,
    /// order id → capture id to return
    captures: Mutex<HashMap<String, String>>,
    last_order_body: Mutex<Option<Value>>,
}

pub struct MockPayPal {
    pub base_url: String,
    state: Arc<MockState>,
}

impl MockPayPal {
    pub async fn start() -> Self {
        let state = Arc::new(MockState::default());
        state.token_ttl.store(3600, Ordering::SeqCst);
        *state.verification_status.lock().unwrap() = "SUCCESS".to_string();

        let app = Router::new()
            .route("/v1/oauth2/token", post(token))
            .route("/v2/checkout/orders", post(create_order))
            .route("/v2/checkout/orders/:id/capture", post(capture_order))
            .route("/v1/notifications/verify-webhook-signature", post(verify))
            .route("/v1/plain-error", get(plain_error))
            .route("/v1/plain-ok", get(plain_ok))
            .route("/v1/no-content", post(no_content))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock");
        let addr = listener.local_addr().expect("mock addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("mock server");
        });

        Self {
            base_url: format!("http://{addr}"),
            state,
        }
    }

    pub fn config(&self) -> PayPalConfig {
        PayPalConfig {
            environment: PayPalEnvironment::Sandbox,
            client_id: Some(CLIENT_ID.to_string()),
            client_secret: Some(CLIENT_SECRET.to_string()),
            webhook_id: Some(WEBHOOK_ID.to_string()),
            api_base_override: Some(self.base_url.clone()),
            brand_name: None,
        }
    }

    pub fn client(&self) -> PayPalClient {
        PayPalClient::new(Client::new(), self.config())
    }

    pub fn token_requests(&self) -> usize {
        self.state.token_requests.load(Ordering::SeqCst)
    }

    pub fn verify_requests(&self) -> usize {
        self.state.verify_requests.load(Ordering::SeqCst)
    }

    pub fn set_token_ttl(&self, secs: i64) {
        self.state.token_ttl.store(secs, Ordering::SeqCst);
    }

    pub fn reject_token_requests(&self) {
        self.state.reject_tokens.store(true, Ordering::SeqCst);
    }

    pub fn fail_orders(&self) {
        self.state.fail_orders.store(true, Ordering::SeqCst);
    }

    pub fn omit_order_id(&self) {
        self.state.omit_order_id.store(true, Ordering::SeqCst);
    }

    pub fn omit_capture_id(&self) {
        self.state.omit_capture_id.store(true, Ordering::SeqCst);
    }

    pub fn set_verification_status(&self, status: &str) {
        *self.state.verification_status.lock().unwrap() = status.to_string();
    }

    /// Make the mock know an order created outside of it.
    pub fn register_order(&self, order_id: &str, custom_id: &str) {
        self.state
            .orders
            .lock()
            .unwrap()
            .insert(order_id.to_string(), custom_id.to_string());
    }

    pub fn set_capture_id(&self, order_id: &str, capture_id: &str) {
        self.state
            .captures
            .lock()
            .unwrap()
            .insert(order_id.to_string(), capture_id.to_string());
    }

    pub fn last_order_body(&self) -> Option<Value> {
        self.state.last_order_body.lock().unwrap().clone()
    }
}

async fn token(State(state): State<Arc<MockState>>, headers: HeaderMap) -> Response {
    state.token_requests.fetch_add(1, Ordering::SeqCst);

    let expected = format!("Basic {}", BASE64.encode(format!("{CLIENT_ID}:{CLIENT_SECRET}")));
    let authorized = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        == Some(expected.as_str());

    if state.reject_tokens.load(Ordering::SeqCst) || !authorized {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "invalid_client" })),
        )
            .into_response();
    }

    let n = state.token_requests.load(Ordering::SeqCst);
    Json(json!({
        "access_token": format!("TOKEN-{n}"),
        "token_type": "Bearer",
        "expires_in": state.token_ttl.load(Ordering::SeqCst),
    }))
    .into_response()
}

async fn create_order(State(state): State<Arc<MockState>>, Json(body): Json<Value>) -> Response {
    if state.fail_orders.load(Ordering::SeqCst) {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "name": "INTERNAL_SERVICE_ERROR" })),
        )
            .into_response();
    }

    let custom_id = body["purchase_units"][0]["custom_id"]
        .as_str()
        .unwrap_or_default()
        .to_string();
    *state.last_order_body.lock().unwrap() = Some(body);

    if state.omit_order_id.load(Ordering::SeqCst) {
        return Json(json!({ "status": "CREATED" })).into_response();
    }

    let seq = state.order_seq.fetch_add(1, Ordering::SeqCst) + 1;
    let order_id = format!("ORDER-{seq}");
    state
        .orders
        .lock()
        .unwrap()
        .insert(order_id.clone(), custom_id);

    Json(json!({ "id": order_id, "status": "CREATED" })).into_response()
}

async fn capture_order(State(state): State<Arc<MockState>>, Path(order_id): Path<String>) -> Response {
    if state.omit_capture_id.load(Ordering::SeqCst) {
        return Json(json!({ "id": order_id, "status": "COMPLETED", "purchase_units": [{}] }))
            .into_response();
    }

    let custom_id = state.orders.lock().unwrap().get(&order_id).cloned();
    let capture_id = state
        .captures
        .lock()
        .unwrap()
        .get(&order_id)
        .cloned()
        .unwrap_or_else(|| format!("CAP-{order_id}"));

    Json(json!({
        "id": order_id,
        "status": "COMPLETED",
        "purchase_units": [{
            "payments": {
                "captures": [{
                    "id": capture_id,
                    "status": "COMPLETED",
                    "custom_id": custom_id,
                }]
            }
        }]
    }))
    .into_response()
}

async fn verify(State(state): State<Arc<MockState>>, Json(body): Json<Value>) -> Response {
    state.verify_requests.fetch_add(1, Ordering::SeqCst);
    let status = if body["webhook_id"] == WEBHOOK_ID && body["webhook_event"].is_object() {
        state.verification_status.lock().unwrap().clone()
    } else {
        "FAILURE".to_string()
    };
    Json(json!({ "verification_status": status })).into_response()
}

async fn plain_error() -> Response {
    (StatusCode::SERVICE_UNAVAILABLE, "maintenance").into_response()
}

async fn plain_ok() -> Response {
    ([(header::CONTENT_TYPE, "text/plain")], "pong").into_response()
}

async fn no_content() -> Response {
    (
        StatusCode::NO_CONTENT,
        [(header::CONTENT_TYPE, "application/json")],
    )
        .into_response()
}

// ─────────────────────────────────────────────────────────
// Application under test
// ─────────────────────────────────────────────────────────

pub struct TestApp {
    pub base_url: String,
    pub pool: SqlitePool,
    pub paypal: MockPayPal,
    pub http: Client,
}

impl TestApp {
    pub async fn start() -> Self {
        Self::start_with(|_| {}).await
    }

    /// Start with a PayPal configuration adjusted by `configure`.
    pub async fn start_with(configure: impl FnOnce(&mut PayPalConfig)) -> Self {
        let pool = memory_pool().await;
        let paypal = MockPayPal::start().await;
        let mut config = paypal.config();
        configure(&mut config);
        let state = Arc::new(ApiState {
            datastore: Datastore::with_pool(pool.clone()),
            paypal: PayPalClient::new(Client::new(), config),
        });

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind app");
        let addr = listener.local_addr().expect("app addr");
        let app = api::router(state);
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("app server");
        });

        Self {
            base_url: format!("http://{addr}"),
            pool,
            paypal,
            http: Client::new(),
        }
    }

    pub async fn post_json(&self, path: &str, body: &Value) -> (StatusCode, Value) {
        let resp = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .json(body)
            .send()
            .await
            .expect("request");
        read(resp).await
    }

    pub async fn post_raw(&self, path: &str, body: &str, headers: &[(&str, &str)]) -> (StatusCode, Value) {
        let mut request = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .header(header::CONTENT_TYPE, "application/json")
            .body(body.to_string());
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        read(request.send().await.expect("request")).await
    }

    pub async fn get(&self, path: &str) -> (StatusCode, Value) {
        let resp = self
            .http
            .get(format!("{}{}", self.base_url, path))
            .send()
            .await
            .expect("request");
        read(resp).await
    }
}

impl TestApp {
    /// Create a 50 BRL donation through the API; returns `(order_id, donation_id)`.
    pub async fn create_donation(&self, slug: &str) -> (String, String) {
        let (status, body) = self
            .post_json(
                "/api/paypal/create-order",
                &json!({ "campaignSlug": slug, "amount": 50, "currency": "BRL" }),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        (
            body["orderID"].as_str().expect("orderID").to_string(),
            body["donationId"].as_str().expect("donationId").to_string(),
        )
    }

    pub async fn donation(&self, id: &str) -> Donation {
        db::find_donation(&self.pool, DonationFilter::Id(id))
            .await
            .expect("query donation")
            .expect("donation exists")
    }
}

async fn read(resp: reqwest::Response) -> (StatusCode, Value) {
    let status = StatusCode::from_u16(resp.status().as_u16()).expect("status");
    let body = resp.json::<Value>().await.unwrap_or(Value::Null);
    (status, body)
}
