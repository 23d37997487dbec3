//! Integration test harness for the KNoT thing gateway
//!
//! Runs the session and northbound listeners in-process on ephemeral ports,
//! backed by a mock context broker and a mock device, both plain axum
//! servers that record what they receive.
//!
//! # Test Structure
//!
//! - `session_e2e_test.rs` - session requests over a real WebSocket
//! - `command_e2e_test.rs` - broker commands delivered to a device endpoint

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use iota_api::{create_northbound_router, create_router, AppState};
use iota_broker::HttpContextBroker;
use iota_core::{EntityStore, MemoryStore};
use iota_gateway::{Gateway, GatewayConfig};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// How long a test waits for a frame or a background effect
pub const WAIT: Duration = Duration::from_secs(5);

async fn spawn_router(router: Router, connect_info: bool) -> Result<(SocketAddr, oneshot::Sender<()>), BoxError> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let (tx, rx) = oneshot::channel::<()>();
    let shutdown = async move {
        let _ = rx.await;
    };

    if connect_info {
        let service = router.into_make_service_with_connect_info::<SocketAddr>();
        tokio::spawn(async move {
            let _ = axum::serve(listener, service).with_graceful_shutdown(shutdown).await;
        });
    } else {
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).with_graceful_shutdown(shutdown).await;
        });
    }
    Ok((addr, tx))
}

// =============================================================================
// Gateway under test
// =============================================================================

/// Session and northbound listeners around one in-memory gateway
pub struct TestServer {
    pub ws_addr: SocketAddr,
    pub northbound_addr: SocketAddr,
    pub gateway: Gateway,
    shutdown: Vec<oneshot::Sender<()>>,
}

impl TestServer {
    /// Start against `broker`; the broker host in `config` is pointed at it
    pub async fn start(mut config: GatewayConfig, broker: &MockBrokerServer) -> Result<Self, BoxError> {
        config.broker_host = broker.addr.ip().to_string();
        config.broker_port = broker.addr.port();
        config.ensure_default_group();

        let store: Arc<dyn EntityStore> = Arc::new(MemoryStore::new());
        let client = Arc::new(HttpContextBroker::new(&config.broker_url())?);
        let gateway = Gateway::new(config, store, client)?;
        let state = AppState::new(gateway.clone());

        let (ws_addr, ws_shutdown) = spawn_router(create_router(state.clone()), true).await?;
        let (northbound_addr, nb_shutdown) = spawn_router(create_northbound_router(state), false).await?;

        Ok(Self {
            ws_addr,
            northbound_addr,
            gateway,
            shutdown: vec![ws_shutdown, nb_shutdown],
        })
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.ws_addr)
    }

    pub fn health_url(&self) -> String {
        format!("http://{}/health", self.ws_addr)
    }

    pub fn northbound_url(&self) -> String {
        format!("http://{}/v2/op/update", self.northbound_addr)
    }

    pub async fn connect(&self) -> Result<SessionClient, BoxError> {
        SessionClient::connect(&self.ws_url()).await
    }

    /// Send a command batch as the broker would
    pub async fn send_command(
        &self,
        subservice: &str,
        device_id: &str,
        value: Value,
    ) -> Result<reqwest::Response, BoxError> {
        let body = json!({
            "actionType": "update",
            "entities": [{"id": device_id, "type": "DEVICE", "command": {"type": "command", "value": value}}]
        });
        Ok(reqwest::Client::new()
            .post(self.northbound_url())
            .header("fiware-service", &self.gateway.config.service)
            .header("fiware-servicepath", subservice)
            .json(&body)
            .send()
            .await?)
    }

    /// Poll until `check` holds or [`WAIT`] elapses
    pub async fn wait_until<F, Fut>(&self, mut check: F) -> bool
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        let deadline = tokio::time::Instant::now() + WAIT;
        while tokio::time::Instant::now() < deadline {
            if check().await {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        false
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        for tx in self.shutdown.drain(..) {
            let _ = tx.send(());
        }
    }
}

// =============================================================================
// Session client
// =============================================================================

/// WebSocket client speaking the session protocol
pub struct SessionClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    pub session_id: String,
    next_id: u64,
    /// Events read while waiting for a response
    pending_events: Vec<Value>,
}

impl SessionClient {
    /// Connect and consume the `connected` greeting
    pub async fn connect(url: &str) -> Result<Self, BoxError> {
        let (ws, _) = tokio_tungstenite::connect_async(url).await?;
        let mut client = Self {
            ws,
            session_id: String::new(),
            next_id: 0,
            pending_events: Vec::new(),
        };
        let greeting = client.next_frame().await?;
        if greeting["type"] != "connected" {
            return Err(format!("expected connected greeting, got {}", greeting).into());
        }
        client.session_id = greeting["session_id"].as_str().unwrap_or_default().to_string();
        Ok(client)
    }

    /// Next JSON frame, skipping control frames
    pub async fn next_frame(&mut self) -> Result<Value, BoxError> {
        loop {
            let frame = tokio::time::timeout(WAIT, self.ws.next())
                .await
                .map_err(|_| "timed out waiting for a frame")?
                .ok_or("session closed")??;
            match frame {
                Message::Text(text) => return Ok(serde_json::from_str(text.as_str())?),
                Message::Close(_) => return Err("session closed".into()),
                _ => continue,
            }
        }
    }

    pub async fn send_raw(&mut self, text: &str) -> Result<(), BoxError> {
        self.ws.send(Message::Text(text.to_string().into())).await?;
        Ok(())
    }

    /// Send `request` with a fresh `request_id` and wait for its response
    pub async fn request(&mut self, mut request: Value) -> Result<Value, BoxError> {
        self.next_id += 1;
        let request_id = format!("r{}", self.next_id);
        if let Some(obj) = request.as_object_mut() {
            obj.insert("request_id".to_string(), Value::from(request_id.clone()));
        }
        self.send_raw(&request.to_string()).await?;

        loop {
            let frame = self.next_frame().await?;
            match frame["type"].as_str() {
                Some("response") if frame["request_id"] == request_id.as_str() => return Ok(frame),
                Some("event") => self.pending_events.push(frame),
                _ => {}
            }
        }
    }

    /// Next broadcast event, including ones read during [`Self::request`]
    pub async fn next_event(&mut self) -> Result<Value, BoxError> {
        if !self.pending_events.is_empty() {
            return Ok(self.pending_events.remove(0));
        }
        loop {
            let frame = self.next_frame().await?;
            if frame["type"] == "event" {
                return Ok(frame);
            }
        }
    }

    pub async fn close(mut self) -> Result<(), BoxError> {
        self.ws.close(None).await?;
        Ok(())
    }
}

// =============================================================================
// Mock context broker
// =============================================================================

/// One request received by [`MockBrokerServer`]
#[derive(Debug, Clone)]
pub struct BrokerRequest {
    pub method: &'static str,
    pub entity_id: String,
    pub service: Option<String>,
    pub subservice: Option<String>,
    pub body: Value,
}

#[derive(Clone, Default)]
struct BrokerState {
    requests: Arc<Mutex<Vec<BrokerRequest>>>,
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_string)
}

async fn broker_update(State(state): State<BrokerState>, headers: HeaderMap, body: String) -> StatusCode {
    let body: Value = serde_json::from_str(&body).unwrap_or(Value::Null);
    let entity_id = body["entities"][0]["id"].as_str().unwrap_or_default().to_string();
    state.requests.lock().push(BrokerRequest {
        method: "POST",
        entity_id,
        service: header(&headers, "fiware-service"),
        subservice: header(&headers, "fiware-servicepath"),
        body,
    });
    StatusCode::NO_CONTENT
}

async fn broker_delete(
    State(state): State<BrokerState>,
    Path(id): Path<String>,
    Query(query): Query<Vec<(String, String)>>,
    headers: HeaderMap,
) -> StatusCode {
    state.requests.lock().push(BrokerRequest {
        method: "DELETE",
        entity_id: id,
        service: header(&headers, "fiware-service"),
        subservice: header(&headers, "fiware-servicepath"),
        body: json!({ "query": query }),
    });
    StatusCode::NO_CONTENT
}

async fn broker_query(Path(id): Path<String>) -> (StatusCode, axum::Json<Value>) {
    (
        StatusCode::OK,
        axum::Json(json!({"id": id, "type": "DEVICE", "value": {"type": "String", "value": "1"}})),
    )
}

/// NGSIv2 broker stand-in recording updates and deletes
pub struct MockBrokerServer {
    pub addr: SocketAddr,
    state: BrokerState,
    _shutdown: oneshot::Sender<()>,
}

impl MockBrokerServer {
    pub async fn start() -> Result<Self, BoxError> {
        let state = BrokerState::default();
        let router = Router::new()
            .route("/v2/op/update", post(broker_update))
            .route("/v2/entities/{id}", get(broker_query).delete(broker_delete))
            .with_state(state.clone());
        let (addr, shutdown) = spawn_router(router, false).await?;
        Ok(Self {
            addr,
            state,
            _shutdown: shutdown,
        })
    }

    pub fn requests(&self) -> Vec<BrokerRequest> {
        self.state.requests.lock().clone()
    }

    /// Updates whose first entity is `entity_id`
    pub fn updates_for(&self, entity_id: &str) -> Vec<Value> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == "POST" && r.entity_id == entity_id)
            .map(|r| r.body)
            .collect()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == "DELETE")
            .map(|r| r.entity_id)
            .collect()
    }
}

// =============================================================================
// Mock device
// =============================================================================

/// Reply a [`MockDevice`] gives to every command
#[derive(Debug, Clone)]
pub enum DeviceReply {
    /// 200 with `<device>@<command>|<result>`
    Ok(String),
    /// Non-200 with the given body
    Status(u16, String),
    /// Sleep before answering 200
    Delay(Duration),
}

#[derive(Clone)]
struct DeviceState {
    reply: Arc<Mutex<DeviceReply>>,
    received: Arc<Mutex<Vec<String>>>,
}

async fn device_command(State(state): State<DeviceState>, body: String) -> (StatusCode, String) {
    state.received.lock().push(body.clone());
    let (device, command) = match body.split_once('@') {
        Some((device, rest)) => (device.to_string(), rest.split('|').next().unwrap_or_default().to_string()),
        None => (String::new(), String::new()),
    };
    let reply = state.reply.lock().clone();
    match reply {
        DeviceReply::Ok(result) => (StatusCode::OK, format!("{}@{}|{}", device, command, result)),
        DeviceReply::Status(code, body) => (
            StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            body,
        ),
        DeviceReply::Delay(delay) => {
            tokio::time::sleep(delay).await;
            (StatusCode::OK, format!("{}@{}|late", device, command))
        }
    }
}

/// Device endpoint accepting UltraLight commands
pub struct MockDevice {
    pub addr: SocketAddr,
    state: DeviceState,
    _shutdown: oneshot::Sender<()>,
}

impl MockDevice {
    pub async fn start(reply: DeviceReply) -> Result<Self, BoxError> {
        let state = DeviceState {
            reply: Arc::new(Mutex::new(reply)),
            received: Arc::new(Mutex::new(Vec::new())),
        };
        let router = Router::new()
            .route("/", post(device_command))
            .with_state(state.clone());
        let (addr, shutdown) = spawn_router(router, false).await?;
        Ok(Self {
            addr,
            state,
            _shutdown: shutdown,
        })
    }

    pub fn endpoint(&self) -> String {
        format!("http://{}/", self.addr)
    }

    pub fn set_reply(&self, reply: DeviceReply) {
        *self.state.reply.lock() = reply;
    }

    /// Command payloads received so far
    pub fn received(&self) -> Vec<String> {
        self.state.received.lock().clone()
    }
}
