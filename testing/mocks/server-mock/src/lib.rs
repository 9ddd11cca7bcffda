// Mock management server for testing

use chrono::{DateTime, TimeZone, Utc};
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::header::{HeaderValue, CONTENT_TYPE, COOKIE, SET_COOKIE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const SESSION_COOKIE: &str = "session";

/// A DHCP daemon of a mocked Kea app.
#[derive(Debug, Clone)]
pub struct MockDaemon {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct MockMachine {
    pub id: i64,
    pub address: String,
    pub agent_port: u16,
    pub authorized: bool,
    pub app_id: i64,
    pub daemons: Vec<MockDaemon>,
    /// Number of state reads answered with an old `lastVisitedAt`.
    pub stale_state_reads: u32,
}

impl MockMachine {
    /// An unauthorized machine running one Kea app with the given daemons.
    pub fn kea(id: i64, address: &str, daemons: &[(i64, &str)]) -> Self {
        Self {
            id,
            address: address.to_string(),
            agent_port: 8888,
            authorized: false,
            app_id: id * 100,
            daemons: daemons
                .iter()
                .map(|(id, name)| MockDaemon {
                    id: *id,
                    name: name.to_string(),
                })
                .collect(),
            stale_state_reads: 0,
        }
    }

    pub fn with_stale_state_reads(mut self, reads: u32) -> Self {
        self.stale_state_reads = reads;
        self
    }

    fn to_json(&self) -> Value {
        json!({
            "id": self.id,
            "address": self.address,
            "agentPort": self.agent_port,
            "authorized": self.authorized,
            "agentVersion": "1.0.0",
        })
    }

    fn state_json(&self, last_visited_at: DateTime<Utc>) -> Value {
        let daemons: Vec<Value> = self
            .daemons
            .iter()
            .map(|d| json!({"id": d.id, "name": d.name, "active": true, "monitored": true}))
            .collect();
        json!({
            "id": self.id,
            "address": self.address,
            "hostname": self.address,
            "authorized": self.authorized,
            "lastVisitedAt": last_visited_at.to_rfc3339(),
            "apps": [{
                "id": self.app_id,
                "type": "kea",
                "details": {"daemons": daemons},
            }],
        })
    }
}

/// One scripted answer to `GET /daemons/{id}/config-reports`.
#[derive(Debug, Clone)]
pub enum ReportResponse {
    /// `202 Accepted`, the review has not finished.
    InProgress,
    /// `200 OK` with the given body.
    Body(Value),
    /// An empty response with the given status.
    Status(u16),
}

impl ReportResponse {
    /// A report collection where `flagged` checkers carry content and
    /// `clean` checkers do not.
    pub fn reports(flagged: &[&str], clean: &[&str]) -> Self {
        let items: Vec<Value> = flagged
            .iter()
            .map(|c| json!({"checker": c, "content": format!("{} found an issue", c)}))
            .chain(clean.iter().map(|c| json!({"checker": c})))
            .collect();
        ReportResponse::Body(json!({"total": items.len(), "items": items}))
    }
}

#[derive(Debug, Default)]
struct ServerState {
    credentials: HashMap<String, String>,
    sessions: HashSet<String>,
    next_session: u64,
    machines: Vec<MockMachine>,
    reports: HashMap<i64, VecDeque<ReportResponse>>,
    report_polls: HashMap<i64, u32>,
    served_reports: HashMap<i64, ReportResponse>,
    events: Vec<(i64, DateTime<Utc>, String)>,
    requests: Vec<String>,
}

/// In-process HTTP server speaking the subset of the management REST API the
/// harness uses. Listens on an ephemeral local port until dropped.
#[derive(Debug, Clone)]
pub struct MockServer {
    addr: SocketAddr,
    state: Arc<Mutex<ServerState>>,
    task: Arc<JoinHandle<()>>,
}

impl MockServer {
    /// Starts the server with the `admin`/`admin` account.
    pub async fn start() -> std::io::Result<Self> {
        let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).await?;
        let addr = listener.local_addr()?;

        let mut state = ServerState::default();
        let _ = state
            .credentials
            .insert("admin".to_string(), "admin".to_string());
        let state = Arc::new(Mutex::new(state));

        let served = Arc::clone(&state);
        let task = tokio::spawn(async move {
            loop {
                let stream = match listener.accept().await {
                    Ok((stream, _)) => stream,
                    Err(e) => {
                        warn!("Mock server accept failed: {}", e);
                        continue;
                    }
                };
                let io = TokioIo::new(stream);
                let state = Arc::clone(&served);

                let _ = tokio::task::spawn(async move {
                    if let Err(err) = http1::Builder::new()
                        .serve_connection(
                            io,
                            service_fn(move |req| handle_request(req, Arc::clone(&state))),
                        )
                        .await
                    {
                        debug!("Error serving connection: {}", err);
                    }
                });
            }
        });
        debug!("Mock server listening on {}", addr);

        Ok(Self {
            addr,
            state,
            task: Arc::new(task),
        })
    }

    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    fn lock(&self) -> MutexGuard<'_, ServerState> {
        lock(&self.state)
    }

    pub fn add_machine(&self, machine: MockMachine) {
        self.lock().machines.push(machine);
    }

    pub fn machine(&self, id: i64) -> Option<MockMachine> {
        self.lock().machines.iter().find(|m| m.id == id).cloned()
    }

    /// Queues answers for the config reports of a daemon. The last queued
    /// answer is repeated once the others are used up.
    pub fn script_reports(&self, daemon_id: i64, responses: Vec<ReportResponse>) {
        self.lock()
            .reports
            .entry(daemon_id)
            .or_default()
            .extend(responses);
    }

    /// How many times the config reports of a daemon were requested.
    pub fn report_polls(&self, daemon_id: i64) -> u32 {
        self.lock()
            .report_polls
            .get(&daemon_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn push_event(&self, text: &str) {
        let mut state = self.lock();
        let id = state.events.len() as i64 + 1;
        state.events.push((id, Utc::now(), text.to_string()));
    }

    pub fn active_sessions(&self) -> usize {
        self.lock().sessions.len()
    }

    /// `METHOD /path` of every request received so far.
    pub fn requests(&self) -> Vec<String> {
        self.lock().requests.clone()
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        if Arc::strong_count(&self.task) == 1 {
            self.task.abort();
        }
    }
}

fn lock(state: &Mutex<ServerState>) -> MutexGuard<'_, ServerState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    state: Arc<Mutex<ServerState>>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let query = req.uri().query().unwrap_or("").to_string();
    let session = req
        .headers()
        .get(COOKIE)
        .and_then(|v| v.to_str().ok())
        .and_then(session_from_cookie);
    let body = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!("Failed to read request body: {}", e);
            Bytes::new()
        }
    };

    let reply = route(&mut lock(&state), &method, &path, &query, session.as_deref(), &body);
    Ok(reply.into_response())
}

fn session_from_cookie(header: &str) -> Option<String> {
    header.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        (name == SESSION_COOKIE).then(|| value.to_string())
    })
}

#[derive(Debug)]
struct Reply {
    status: StatusCode,
    body: Option<Value>,
    session: Option<String>,
}

impl Reply {
    fn json(status: StatusCode, body: Value) -> Self {
        Self {
            status,
            body: Some(body),
            session: None,
        }
    }

    fn empty(status: StatusCode) -> Self {
        Self {
            status,
            body: None,
            session: None,
        }
    }

    fn into_response(self) -> Response<Full<Bytes>> {
        let body = match self.body {
            Some(ref value) => Bytes::from(value.to_string()),
            None => Bytes::new(),
        };
        let mut response = Response::new(Full::new(body));
        *response.status_mut() = self.status;
        if self.body.is_some() {
            let _ = response
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }
        if let Some(token) = self.session {
            if let Ok(value) =
                HeaderValue::from_str(&format!("{}={}; Path=/", SESSION_COOKIE, token))
            {
                let _ = response.headers_mut().insert(SET_COOKIE, value);
            }
        }
        response
    }
}

fn route(
    state: &mut ServerState,
    method: &Method,
    path: &str,
    query: &str,
    session: Option<&str>,
    body: &[u8],
) -> Reply {
    state.requests.push(format!("{} {}", method, path));
    let segments: Vec<&str> = path
        .trim_start_matches("/api")
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();

    if let (&Method::POST, ["sessions"]) = (method, segments.as_slice()) {
        return log_in(state, body);
    }

    let authenticated = session.map_or(false, |s| state.sessions.contains(s));
    if !authenticated {
        return Reply::json(
            StatusCode::UNAUTHORIZED,
            json!({"message": "unauthorized"}),
        );
    }

    match (method, segments.as_slice()) {
        (&Method::DELETE, ["sessions"]) => {
            if let Some(token) = session {
                let _ = state.sessions.remove(token);
            }
            Reply::empty(StatusCode::OK)
        }
        (&Method::GET, ["machines"]) => list_machines(state, query),
        (&Method::PUT, ["machines", id]) => update_machine(state, id, body),
        (&Method::GET, ["machines", id, "state"]) => machine_state(state, id),
        (&Method::GET, ["daemons", id, "config-reports"]) => config_reports(state, id, query),
        (&Method::GET, ["events"]) => list_events(state),
        _ => Reply::json(StatusCode::NOT_FOUND, json!({"message": "not found"})),
    }
}

fn log_in(state: &mut ServerState, body: &[u8]) -> Reply {
    let credentials: Value = serde_json::from_slice(body).unwrap_or(Value::Null);
    let login = credentials["useremail"].as_str().unwrap_or_default();
    let password = credentials["userpassword"].as_str().unwrap_or_default();

    if state.credentials.get(login).map(String::as_str) != Some(password) {
        return Reply::json(
            StatusCode::BAD_REQUEST,
            json!({"message": "invalid login or password"}),
        );
    }

    state.next_session += 1;
    let token = format!("mock-session-{}", state.next_session);
    let _ = state.sessions.insert(token.clone());

    let mut reply = Reply::json(
        StatusCode::OK,
        json!({
            "id": 1,
            "login": login,
            "email": "",
            "name": "admin",
            "lastname": "admin",
            "groups": [1],
        }),
    );
    reply.session = Some(token);
    reply
}

fn query_param<'a>(query: &'a str, name: &str) -> Option<&'a str> {
    query.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        (key == name).then_some(value)
    })
}

fn list_machines(state: &ServerState, query: &str) -> Reply {
    let authorized = query_param(query, "authorized").and_then(|v| v.parse::<bool>().ok());
    let items: Vec<Value> = state
        .machines
        .iter()
        .filter(|m| authorized.map_or(true, |a| m.authorized == a))
        .map(MockMachine::to_json)
        .collect();
    Reply::json(StatusCode::OK, json!({"items": items, "total": items.len()}))
}

fn find_machine<'a>(state: &'a mut ServerState, id: &str) -> Option<&'a mut MockMachine> {
    let id: i64 = id.parse().ok()?;
    state.machines.iter_mut().find(|m| m.id == id)
}

fn update_machine(state: &mut ServerState, id: &str, body: &[u8]) -> Reply {
    let update: Value = match serde_json::from_slice(body) {
        Ok(update) => update,
        Err(e) => {
            return Reply::json(
                StatusCode::BAD_REQUEST,
                json!({"message": format!("invalid machine: {}", e)}),
            )
        }
    };
    match find_machine(state, id) {
        Some(machine) => {
            if let Some(authorized) = update["authorized"].as_bool() {
                machine.authorized = authorized;
            }
            Reply::json(StatusCode::OK, machine.to_json())
        }
        None => Reply::json(
            StatusCode::NOT_FOUND,
            json!({"message": format!("cannot find machine with ID {}", id)}),
        ),
    }
}

fn machine_state(state: &mut ServerState, id: &str) -> Reply {
    match find_machine(state, id) {
        Some(machine) => {
            let visited = if machine.stale_state_reads > 0 {
                machine.stale_state_reads -= 1;
                Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0)
                    .single()
                    .unwrap_or_else(Utc::now)
            } else {
                Utc::now()
            };
            Reply::json(StatusCode::OK, machine.state_json(visited))
        }
        None => Reply::json(
            StatusCode::NOT_FOUND,
            json!({"message": format!("cannot find machine with ID {}", id)}),
        ),
    }
}

/// A request for the first page takes the next scripted answer; later pages
/// are cut from the same answer.
fn config_reports(state: &mut ServerState, id: &str, query: &str) -> Reply {
    let Ok(daemon_id) = id.parse::<i64>() else {
        return Reply::json(StatusCode::BAD_REQUEST, json!({"message": "invalid daemon ID"}));
    };
    let start: usize = query_param(query, "start")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let limit: usize = query_param(query, "limit")
        .and_then(|v| v.parse().ok())
        .unwrap_or(usize::MAX);

    if start == 0 {
        *state.report_polls.entry(daemon_id).or_default() += 1;
        let next = match state.reports.get_mut(&daemon_id) {
            Some(queue) if queue.len() > 1 => queue.pop_front(),
            Some(queue) => queue.front().cloned(),
            None => None,
        };
        let _ = state
            .served_reports
            .insert(daemon_id, next.unwrap_or(ReportResponse::InProgress));
    }
    let response = state
        .served_reports
        .get(&daemon_id)
        .cloned()
        .unwrap_or(ReportResponse::InProgress);

    match response {
        ReportResponse::InProgress => Reply::empty(StatusCode::ACCEPTED),
        ReportResponse::Body(mut body) => {
            if let Some(items) = body.get_mut("items").and_then(Value::as_array_mut) {
                let page: Vec<Value> = items.iter().skip(start).take(limit).cloned().collect();
                *items = page;
            }
            Reply::json(StatusCode::OK, body)
        }
        ReportResponse::Status(code) => {
            Reply::empty(StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR))
        }
    }
}

fn list_events(state: &ServerState) -> Reply {
    let items: Vec<Value> = state
        .events
        .iter()
        .rev()
        .map(|(id, created_at, text)| {
            json!({"id": id, "createdAt": created_at.to_rfc3339(), "text": text, "level": 0})
        })
        .collect();
    Reply::json(StatusCode::OK, json!({"items": items, "total": items.len()}))
}
