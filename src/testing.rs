//! Test doubles
//!
//! [`FakeController`] is a stateful in-process Controller behind the
//! [`Transport`] port. It issues rotating tokens on login, scripts token
//! expiry, tracks volume mappings and, when given a directory, creates the
//! by-id link a real host would see after a map. [`FakeCommandRunner`]
//! replays a canned helper output.

use crate::controlplane::auth::{AuthController, LOGIN_PATH, LOGOUT_PATH};
use crate::controlplane::orchestrator::{
    VolumeAction, VolumeOrchestrator, ERROR_CODE_ALREADY_MAPPED, ERROR_CODE_NOT_MAPPED,
};
use crate::controlplane::session::{ControllerSession, AUTH_TOKEN_HEADER};
use crate::controlplane::token_store::MemoryTokenStore;
use crate::domain::ports::{
    CommandOutput, CommandRunner, HttpRequest, HttpResponse, TokenStoreRef, Transport,
};
use crate::domain::types::{Credentials, Endpoint, SessionToken};
use crate::error::Result;
use crate::host::devices::{DeviceScanner, DeviceScannerConfig, DEFAULT_DEVICE_PREFIX};
use crate::host::guid::{GuidProbe, DEFAULT_GUID_HELPER};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use reqwest::{Method, StatusCode};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub const TEST_USER: &str = "root";
pub const TEST_PASSWORD: &str = "Password123!";
pub const TEST_GUID: &str = "11111111-2222-3333-4444-555555555555";

const SYSTEM_ID: &str = "7a1b2c3d00000000";
const GET_BY_NAME_PREFIX: &str = "/api/types/Volume/instances/getByName::";
const GET_BY_IP_PREFIX: &str = "/api/types/Client/instances/getByIp::";
const VOLUME_INSTANCE_PREFIX: &str = "/api/instances/Volume::";

// =============================================================================
// Recorded Request
// =============================================================================

/// A request as the fake saw it
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    /// Path and query relative to the endpoint
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
    pub basic_user: Option<String>,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn json_body(&self) -> Option<Value> {
        self.body
            .as_deref()
            .and_then(|body| serde_json::from_slice(body).ok())
    }
}

// =============================================================================
// Fake Controller
// =============================================================================

struct Route {
    status: u16,
    body: Vec<u8>,
}

struct Reply {
    status: u16,
    headers: BTreeMap<String, String>,
    body: Vec<u8>,
}

impl Reply {
    fn json(status: u16, body: Value) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body: body.to_string().into_bytes(),
        }
    }
}

#[derive(Default)]
struct FakeState {
    routes: HashMap<(Method, String), Route>,
    requests: Vec<RecordedRequest>,
    token_serial: u32,
    valid_token: Option<String>,
    expire_remaining: u32,
    login_attempts: u32,
    login_count: u32,
    volumes: HashMap<String, String>,
    clients: HashMap<String, String>,
    mapped: HashSet<(String, String)>,
    qos_fails: bool,
    device_dir: Option<PathBuf>,
}

impl FakeState {
    fn respond(&mut self, request: &RecordedRequest, password: Option<&str>) -> Reply {
        if request.path == LOGIN_PATH {
            return self.login(request.basic_user.as_deref(), password);
        }

        if request.path == LOGOUT_PATH {
            self.valid_token = None;
            return Reply::json(200, json!({}));
        }

        if self.expire_remaining > 0 {
            self.expire_remaining -= 1;
            return Reply::json(401, json!({"details": "session token expired"}));
        }
        let presented = request.header(AUTH_TOKEN_HEADER);
        if presented.is_none() || presented != self.valid_token.as_deref() {
            return Reply::json(401, json!({"details": "invalid session token"}));
        }

        if let Some(route) = self.routes.get(&(request.method.clone(), request.path.clone())) {
            return Reply {
                status: route.status,
                headers: BTreeMap::new(),
                body: route.body.clone(),
            };
        }

        if request.method == Method::GET {
            if let Some(encoded) = request.path.strip_prefix(GET_BY_NAME_PREFIX) {
                return self.get_by_name(encoded);
            }
            if let Some(ip) = request.path.strip_prefix(GET_BY_IP_PREFIX) {
                return self.get_by_ip(ip.trim_end_matches('/'));
            }
        }

        if request.method == Method::POST {
            if let Some(rest) = request.path.strip_prefix(VOLUME_INSTANCE_PREFIX) {
                if let Some((volume_id, action)) = rest.split_once("/action/") {
                    return self.volume_action(volume_id, action, request.json_body());
                }
            }
        }

        Reply::json(404, json!({"details": format!("no route for {}", request.path)}))
    }

    fn login(&mut self, user: Option<&str>, password: Option<&str>) -> Reply {
        self.login_attempts += 1;
        if user != Some(TEST_USER) || password != Some(TEST_PASSWORD) {
            return Reply::json(401, json!({"code": 401, "details": "Invalid credentials"}));
        }

        self.login_count += 1;
        self.token_serial += 1;
        let token = format!("token-{}", self.token_serial);
        self.valid_token = Some(token.clone());

        let mut reply = Reply::json(200, json!({}));
        reply
            .headers
            .insert(AUTH_TOKEN_HEADER.to_ascii_lowercase(), token);
        reply
    }

    fn get_by_name(&self, encoded: &str) -> Reply {
        let once = urlencoding::decode(encoded).map(|s| s.into_owned()).unwrap_or_default();
        let name = urlencoding::decode(&once).map(|s| s.into_owned()).unwrap_or_default();
        match self.volumes.get(&name) {
            Some(id) => Reply::json(200, json!(id)),
            None => Reply::json(
                404,
                json!({"errorCode": 3, "message": format!("Could not find the volume {}", name)}),
            ),
        }
    }

    fn get_by_ip(&self, ip: &str) -> Reply {
        match self.clients.get(ip) {
            Some(id) => Reply::json(200, json!(id)),
            None => Reply::json(404, json!({"message": format!("no client at {}", ip)})),
        }
    }

    fn materialize(&self, volume_id: &str) -> std::io::Result<()> {
        match &self.device_dir {
            Some(dir) => {
                let link = dir.join(format!("{}-{}-{}", DEFAULT_DEVICE_PREFIX, SYSTEM_ID, volume_id));
                std::fs::write(link, b"")
            }
            None => Ok(()),
        }
    }

    fn volume_action(&mut self, volume_id: &str, action: &str, body: Option<Value>) -> Reply {
        if !self.volumes.values().any(|id| id == volume_id) {
            return Reply::json(404, json!({"message": format!("volume {} not found", volume_id)}));
        }

        let body = body.unwrap_or(Value::Null);
        let host = match body
            .get("guid")
            .or_else(|| body.get("sdcId"))
            .and_then(Value::as_str)
        {
            Some(host) => host.to_string(),
            None => return Reply::json(400, json!({"message": "missing client identity"})),
        };
        let key = (volume_id.to_string(), host);

        if action == VolumeAction::AddMappedSdc.as_str() {
            if !self.mapped.insert(key) {
                return Reply::json(
                    400,
                    json!({"errorCode": ERROR_CODE_ALREADY_MAPPED, "message": "already mapped", "httpStatusCode": 400}),
                );
            }
            if let Err(e) = self.materialize(volume_id) {
                return Reply::json(500, json!({"details": e.to_string()}));
            }
            Reply::json(200, json!({}))
        } else if action == VolumeAction::SetMappedSdcLimits.as_str() {
            if self.qos_fails {
                return Reply::json(500, json!({"details": "QoS limits rejected"}));
            }
            if !self.mapped.contains(&key) {
                return Reply::json(400, json!({"errorCode": ERROR_CODE_NOT_MAPPED, "message": "not mapped"}));
            }
            Reply::json(200, json!({}))
        } else if action == VolumeAction::RemoveMappedSdc.as_str() {
            if !self.mapped.remove(&key) {
                return Reply::json(
                    400,
                    json!({"errorCode": ERROR_CODE_NOT_MAPPED, "message": "not mapped", "httpStatusCode": 400}),
                );
            }
            Reply::json(200, json!({}))
        } else {
            Reply::json(405, json!({"message": format!("unknown action {}", action)}))
        }
    }
}

/// In-process stand-in for the Controller REST API
pub struct FakeController {
    endpoint: Endpoint,
    state: Mutex<FakeState>,
}

impl FakeController {
    pub fn new() -> Self {
        let state = FakeState {
            valid_token: Some("token-0".into()),
            ..FakeState::default()
        };
        Self {
            endpoint: Endpoint::new("ctrl", 4443),
            state: Mutex::new(state),
        }
    }

    pub fn endpoint(&self) -> Endpoint {
        self.endpoint.clone()
    }

    /// Token currently accepted on authenticated calls
    pub fn valid_token(&self) -> SessionToken {
        SessionToken::new(self.state.lock().valid_token.clone().unwrap_or_default())
    }

    pub fn route(&self, method: Method, path: &str, status: u16, body: Value) {
        self.route_raw(method, path, status, body.to_string().into_bytes());
    }

    pub fn route_raw(&self, method: Method, path: &str, status: u16, body: Vec<u8>) {
        self.state
            .lock()
            .routes
            .insert((method, path.to_string()), Route { status, body });
    }

    /// Reject the next `count` authenticated calls with 401
    pub fn expire_token(&self, count: u32) {
        self.state.lock().expire_remaining = count;
    }

    pub fn add_volume(&self, name: &str, id: &str) {
        self.state.lock().volumes.insert(name.into(), id.into());
    }

    pub fn add_client(&self, ip: &str, id: &str) {
        self.state.lock().clients.insert(ip.into(), id.into());
    }

    /// Record an existing mapping. Its device link is already present when
    /// devices are being materialized.
    pub fn premap(&self, volume_id: &str, host: &str) {
        let mut state = self.state.lock();
        state.mapped.insert((volume_id.into(), host.into()));
        if let Err(e) = state.materialize(volume_id) {
            panic!("cannot create device link for {}: {}", volume_id, e);
        }
    }

    pub fn is_mapped(&self, volume_id: &str, host: &str) -> bool {
        self.state
            .lock()
            .mapped
            .contains(&(volume_id.to_string(), host.to_string()))
    }

    pub fn fail_qos(&self) {
        self.state.lock().qos_fails = true;
    }

    /// Create `emc-vol-<system>-<volume id>` in `dir` for every mapping
    pub fn materialize_devices_in(&self, dir: &Path) {
        self.state.lock().device_dir = Some(dir.to_path_buf());
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().requests.clone()
    }

    pub fn requests_to(&self, path: &str) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.path == path)
            .collect()
    }

    pub fn last_request(&self) -> Option<RecordedRequest> {
        self.state.lock().requests.last().cloned()
    }

    pub fn count_requests(&self, method: &Method, path: &str) -> usize {
        self.state
            .lock()
            .requests
            .iter()
            .filter(|r| &r.method == method && r.path == path)
            .count()
    }

    pub fn login_attempts(&self) -> u32 {
        self.state.lock().login_attempts
    }

    /// Successful logins
    pub fn login_count(&self) -> u32 {
        self.state.lock().login_count
    }

    /// Session holding the current token and no way to re-login
    pub fn plain_session(self: &Arc<Self>) -> ControllerSession {
        let tokens = Arc::new(MemoryTokenStore::with_token(self.valid_token()));
        ControllerSession::new(self.endpoint(), self.clone(), tokens)
    }

    /// Session holding the current token, able to re-login as `user`
    pub fn session_with_reauth(
        self: &Arc<Self>,
        user: &str,
        password: &str,
    ) -> (ControllerSession, Arc<AuthController>) {
        let tokens: TokenStoreRef = Arc::new(MemoryTokenStore::with_token(self.valid_token()));
        let auth = Arc::new(
            AuthController::new(self.endpoint(), self.clone(), tokens.clone())
                .with_credentials(Credentials::new(user, password)),
        );
        let session = ControllerSession::new(self.endpoint(), self.clone(), tokens)
            .with_reauthenticator(auth.clone());
        (session, auth)
    }
}

#[async_trait]
impl Transport for FakeController {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        let base = self.endpoint.base_url();
        let path = request
            .url
            .strip_prefix(base.as_str())
            .unwrap_or(&request.url)
            .to_string();

        let record = RecordedRequest {
            method: request.method.clone(),
            path,
            headers: request.headers.clone(),
            body: request.body.clone(),
            basic_user: request.basic_auth.as_ref().map(|a| a.username.clone()),
        };
        let password = request.basic_auth.as_ref().map(|a| a.password.as_str());

        let mut state = self.state.lock();
        state.requests.push(record.clone());
        let reply = state.respond(&record, password);

        let reason = StatusCode::from_u16(reply.status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or("Unknown")
            .to_string();
        Ok(HttpResponse {
            status: reply.status,
            reason,
            headers: reply.headers,
            body: Bytes::from(reply.body),
        })
    }
}

// =============================================================================
// Fake Command Runner
// =============================================================================

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub program: String,
    pub args: Vec<String>,
    pub as_root: bool,
}

/// Returns the same output for every command
pub struct FakeCommandRunner {
    output: CommandOutput,
    calls: Mutex<Vec<RecordedCall>>,
}

impl FakeCommandRunner {
    pub fn succeeding(stdout: &str) -> Self {
        Self {
            output: CommandOutput {
                success: true,
                exit_code: Some(0),
                stdout: stdout.to_string(),
                stderr: String::new(),
            },
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(exit_code: i32, stderr: &str) -> Self {
        Self {
            output: CommandOutput {
                success: false,
                exit_code: Some(exit_code),
                stdout: String::new(),
                stderr: stderr.to_string(),
            },
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl CommandRunner for FakeCommandRunner {
    async fn run(&self, program: &str, args: &[&str], as_root: bool) -> Result<CommandOutput> {
        self.calls.lock().push(RecordedCall {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            as_root,
        });
        Ok(self.output.clone())
    }
}

// =============================================================================
// Attach Harness
// =============================================================================

/// Orchestrator wired to a fake Controller, a fake GUID helper and a
/// temporary by-id directory
pub struct AttachHarness {
    pub controller: Arc<FakeController>,
    pub runner: Arc<FakeCommandRunner>,
    pub orchestrator: VolumeOrchestrator,
    pub by_id: TempDir,
}

impl AttachHarness {
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> AttachHarnessBuilder {
        AttachHarnessBuilder {
            materialize_devices: true,
            max_attempts: 5,
            guid_helper_fails: false,
        }
    }
}

pub struct AttachHarnessBuilder {
    materialize_devices: bool,
    max_attempts: u32,
    guid_helper_fails: bool,
}

impl AttachHarnessBuilder {
    pub fn materialize_devices(mut self, enabled: bool) -> Self {
        self.materialize_devices = enabled;
        self
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn guid_helper_fails(mut self) -> Self {
        self.guid_helper_fails = true;
        self
    }

    pub fn build(self) -> AttachHarness {
        let by_id = TempDir::new().unwrap();
        let controller = Arc::new(FakeController::new());
        if self.materialize_devices {
            controller.materialize_devices_in(by_id.path());
        }

        let runner = Arc::new(if self.guid_helper_fails {
            FakeCommandRunner::failing(1, "sdc driver not loaded")
        } else {
            FakeCommandRunner::succeeding(&format!("{}\n", TEST_GUID))
        });

        let (session, _auth) = controller.session_with_reauth(TEST_USER, TEST_PASSWORD);
        let scanner = DeviceScanner::new(DeviceScannerConfig {
            by_id_dir: by_id.path().to_path_buf(),
            prefix: DEFAULT_DEVICE_PREFIX.to_string(),
            max_attempts: self.max_attempts,
            poll_interval: Duration::from_millis(1),
        });
        let orchestrator = VolumeOrchestrator::new(
            Arc::new(session),
            GuidProbe::new(runner.clone(), DEFAULT_GUID_HELPER),
            scanner,
        );

        AttachHarness {
            controller,
            runner,
            orchestrator,
            by_id,
        }
    }
}
