//! In-memory Kubernetes API server for integration tests.
//!
//! [`FakeCluster`] answers the subset of the API the backend uses: `/version`,
//! custom resource definitions and namespaced custom resources. Writes bump a
//! cluster-wide revision counter that doubles as `resourceVersion`; `PUT`
//! with a stale version is rejected with 409 like the real server.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde_json::{Value, json};
use time::OffsetDateTime;
use time::macros::datetime;
use url::Url;
use warden_storage::{
    AuthCode, AuthRequest, Claims, Client, Connector, DeviceRequest, DeviceToken, OfflineSessions,
    Password, PkceChallenge, RefreshToken, RefreshTokenRef,
};
use warden_storage_k8s::resources::ALL_KINDS;
use warden_storage_k8s::{ClusterConnection, KubernetesConfig, KubernetesStorage, LockConfig};
use wiremock::matchers::any;
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

pub const NAMESPACE: &str = "identity";
pub const GROUP: &str = "warden.dev";

/// Behaviour knobs of the fake server.
#[derive(Debug, Clone)]
pub struct ClusterOptions {
    /// `gitVersion` reported by `/version`; `None` makes the endpoint fail.
    pub git_version: Option<String>,
    /// Definition API versions served.
    pub crd_versions: Vec<&'static str>,
    /// Whether created definitions report `Established=True`.
    pub establish: bool,
    /// Whether the definitions exist before the storage opens.
    pub preinstalled: bool,
}

impl Default for ClusterOptions {
    fn default() -> Self {
        Self {
            git_version: Some("v1.27.3".to_string()),
            crd_versions: vec!["v1", "v1beta1"],
            establish: true,
            preinstalled: true,
        }
    }
}

#[derive(Default)]
struct State {
    crds: BTreeMap<String, Value>,
    objects: BTreeMap<String, BTreeMap<String, Value>>,
    revision: u64,
    page_size: Option<usize>,
    put_conflicts: usize,
    crd_api_down: bool,
    failing_lists: Vec<String>,
    requests: Vec<(String, String)>,
}

impl State {
    fn next_revision(&mut self) -> String {
        self.revision += 1;
        self.revision.to_string()
    }
}

pub struct FakeCluster {
    server: MockServer,
    state: Arc<Mutex<State>>,
}

impl FakeCluster {
    pub async fn start() -> Self {
        Self::start_with(ClusterOptions::default()).await
    }

    pub async fn start_with(options: ClusterOptions) -> Self {
        let server = MockServer::start().await;
        let state = Arc::new(Mutex::new(State::default()));

        if options.preinstalled {
            let mut guard = state.lock().unwrap();
            for kind in ALL_KINDS {
                let name = kind.crd_name(GROUP);
                guard.crds.insert(name.clone(), established_crd(&name));
            }
        }

        Mock::given(any())
            .respond_with(Responder {
                state: state.clone(),
                options,
            })
            .mount(&server)
            .await;

        Self { server, state }
    }

    pub fn connection(&self) -> ClusterConnection {
        ClusterConnection::new(Url::parse(&self.server.uri()).unwrap(), NAMESPACE)
    }

    /// Configuration with short lock and retry timings.
    pub fn config(&self) -> KubernetesConfig {
        KubernetesConfig::default()
            .with_wait_for_resources(true)
            .with_schema_ready_timeout(Duration::from_secs(2))
            .with_conflict_retry_budget(Duration::from_millis(500))
            .with_lock(LockConfig {
                timeout: Duration::from_secs(10),
                check_period: Duration::from_millis(10),
                check_attempts: 500,
            })
    }

    pub async fn open(&self) -> KubernetesStorage {
        self.open_with(self.config()).await
    }

    pub async fn open_with(&self, config: KubernetesConfig) -> KubernetesStorage {
        KubernetesStorage::open_with_connection(config, self.connection())
            .await
            .expect("open storage")
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn crd(&self, name: &str) -> Option<Value> {
        self.state().crds.get(name).cloned()
    }

    pub fn crd_count(&self) -> usize {
        self.state().crds.len()
    }

    pub fn object(&self, plural: &str, name: &str) -> Option<Value> {
        self.state()
            .objects
            .get(plural)
            .and_then(|objects| objects.get(name))
            .cloned()
    }

    pub fn object_count(&self, plural: &str) -> usize {
        self.state().objects.get(plural).map_or(0, BTreeMap::len)
    }

    /// Sets an annotation directly, bumping the version like a foreign write.
    pub fn set_annotation(&self, plural: &str, name: &str, key: &str, value: &str) {
        let mut state = self.state();
        let revision = state.next_revision();
        let object = state
            .objects
            .get_mut(plural)
            .and_then(|objects| objects.get_mut(name))
            .expect("object exists");
        object["metadata"]["annotations"][key] = json!(value);
        object["metadata"]["resourceVersion"] = json!(revision);
    }

    pub fn set_page_size(&self, size: usize) {
        self.state().page_size = Some(size);
    }

    /// Rejects the next `count` object PUTs with 409.
    pub fn inject_put_conflicts(&self, count: usize) {
        self.state().put_conflicts = count;
    }

    /// Makes the definition API answer 404 until switched back.
    pub fn set_crd_api_down(&self, down: bool) {
        self.state().crd_api_down = down;
    }

    /// Makes list calls on `plural` answer 500.
    pub fn fail_lists(&self, plural: &str) {
        self.state().failing_lists.push(plural.to_string());
    }

    /// Number of requests with `method` whose path ends with `suffix`.
    pub fn requests(&self, method: &str, suffix: &str) -> usize {
        self.state()
            .requests
            .iter()
            .filter(|(m, path)| m == method && path.ends_with(suffix))
            .count()
    }
}

fn established_crd(name: &str) -> Value {
    json!({
        "apiVersion": "apiextensions.k8s.io/v1",
        "kind": "CustomResourceDefinition",
        "metadata": { "name": name },
        "status": {
            "conditions": [{ "type": "Established", "status": "True" }]
        }
    })
}

fn status(code: u16, reason: &str) -> ResponseTemplate {
    ResponseTemplate::new(code).set_body_json(json!({
        "kind": "Status",
        "apiVersion": "v1",
        "status": "Failure",
        "reason": reason,
        "code": code,
    }))
}

struct Responder {
    state: Arc<Mutex<State>>,
    options: ClusterOptions,
}

impl Respond for Responder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let method = request.method.as_str().to_string();
        let path = request.url.path().to_string();
        let segments: Vec<&str> = path.trim_start_matches('/').split('/').collect();

        let mut state = self.state.lock().unwrap();
        state.requests.push((method.clone(), path.clone()));

        match segments.as_slice() {
            ["version"] => match &self.options.git_version {
                Some(version) => ResponseTemplate::new(200)
                    .set_body_json(json!({ "major": "1", "gitVersion": version })),
                None => status(500, "InternalError"),
            },
            ["apis", "apiextensions.k8s.io", version, "customresourcedefinitions", rest @ ..] => {
                if state.crd_api_down
                    || !self.options.crd_versions.iter().any(|served| served == version)
                {
                    return status(404, "NotFound");
                }
                self.definitions(&mut state, &method, rest, &request.body)
            }
            ["apis", group, "v1", "namespaces", NAMESPACE, plural, rest @ ..] => {
                if !state.crds.contains_key(&format!("{plural}.{group}")) {
                    return status(404, "NotFound");
                }
                objects(&mut state, &method, plural, rest, request)
            }
            _ => status(404, "NotFound"),
        }
    }
}

impl Responder {
    fn definitions(
        &self,
        state: &mut State,
        method: &str,
        rest: &[&str],
        body: &[u8],
    ) -> ResponseTemplate {
        match (method, rest) {
            ("POST", []) => {
                let mut crd: Value = serde_json::from_slice(body).unwrap();
                let name = crd["metadata"]["name"].as_str().unwrap().to_string();
                if state.crds.contains_key(&name) {
                    return status(409, "AlreadyExists");
                }
                if self.options.establish {
                    crd["status"] = established_crd(&name)["status"].clone();
                }
                state.crds.insert(name, crd.clone());
                ResponseTemplate::new(201).set_body_json(crd)
            }
            ("GET", [name]) => match state.crds.get(*name) {
                Some(crd) => ResponseTemplate::new(200).set_body_json(crd),
                None => status(404, "NotFound"),
            },
            _ => status(405, "MethodNotAllowed"),
        }
    }
}

fn objects(
    state: &mut State,
    method: &str,
    plural: &str,
    rest: &[&str],
    request: &Request,
) -> ResponseTemplate {
    match (method, rest) {
        ("GET", []) if state.failing_lists.iter().any(|p| p == plural) => {
            status(500, "InternalError")
        }
        ("GET", []) => list(state, plural, &request.url),
        ("POST", []) => {
            let mut object: Value = serde_json::from_slice(&request.body).unwrap();
            let name = object["metadata"]["name"].as_str().unwrap().to_string();
            if state
                .objects
                .get(plural)
                .is_some_and(|objects| objects.contains_key(&name))
            {
                return status(409, "AlreadyExists");
            }
            object["metadata"]["resourceVersion"] = json!(state.next_revision());
            object["metadata"]["namespace"] = json!(NAMESPACE);
            state
                .objects
                .entry(plural.to_string())
                .or_default()
                .insert(name, object.clone());
            ResponseTemplate::new(201).set_body_json(object)
        }
        ("GET", [name]) => match state.objects.get(plural).and_then(|o| o.get(*name)) {
            Some(object) => ResponseTemplate::new(200).set_body_json(object),
            None => status(404, "NotFound"),
        },
        ("PUT", [name]) => {
            let mut object: Value = serde_json::from_slice(&request.body).unwrap();
            let Some(current_version) = state
                .objects
                .get(plural)
                .and_then(|o| o.get(*name))
                .map(|current| current["metadata"]["resourceVersion"].clone())
            else {
                return status(404, "NotFound");
            };
            if state.put_conflicts > 0 {
                state.put_conflicts -= 1;
                return status(409, "Conflict");
            }
            if object["metadata"]["resourceVersion"] != current_version {
                return status(409, "Conflict");
            }
            object["metadata"]["resourceVersion"] = json!(state.next_revision());
            state
                .objects
                .entry(plural.to_string())
                .or_default()
                .insert((*name).to_string(), object.clone());
            ResponseTemplate::new(200).set_body_json(object)
        }
        ("DELETE", [name]) => {
            match state.objects.get_mut(plural).and_then(|o| o.remove(*name)) {
                Some(_) => ResponseTemplate::new(200)
                    .set_body_json(json!({ "kind": "Status", "status": "Success" })),
                None => status(404, "NotFound"),
            }
        }
        _ => status(405, "MethodNotAllowed"),
    }
}

fn list(state: &State, plural: &str, url: &Url) -> ResponseTemplate {
    let mut limit = usize::MAX;
    let mut offset = 0;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "limit" => limit = value.parse().unwrap(),
            "continue" => offset = value.parse().unwrap(),
            _ => {}
        }
    }
    if let Some(page_size) = state.page_size {
        limit = limit.min(page_size);
    }

    let all: Vec<&Value> = state
        .objects
        .get(plural)
        .map(|objects| objects.values().collect())
        .unwrap_or_default();
    let items: Vec<&Value> = all.iter().skip(offset).take(limit).copied().collect();

    let mut metadata = json!({ "resourceVersion": state.revision.to_string() });
    if offset + items.len() < all.len() {
        metadata["continue"] = json!((offset + items.len()).to_string());
    }

    ResponseTemplate::new(200).set_body_json(json!({
        "apiVersion": format!("{GROUP}/v1"),
        "kind": "List",
        "metadata": metadata,
        "items": items,
    }))
}

// =============================================================================
// Fixtures
// =============================================================================

pub const EXPIRY: OffsetDateTime = datetime!(2024-06-01 12:00:00 UTC);

pub fn claims() -> Claims {
    Claims {
        user_id: "u-1".to_string(),
        username: "jane".to_string(),
        preferred_username: "jane.doe".to_string(),
        email: "jane@example.com".to_string(),
        email_verified: true,
        groups: vec!["admins".to_string(), "dev".to_string()],
    }
}

pub fn pkce() -> PkceChallenge {
    PkceChallenge {
        code_challenge: "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM".to_string(),
        code_challenge_method: "S256".to_string(),
    }
}

pub fn auth_request(id: &str, expiry: OffsetDateTime) -> AuthRequest {
    AuthRequest {
        id: id.to_string(),
        client_id: "web-app".to_string(),
        response_types: vec!["code".to_string()],
        scopes: vec!["openid".to_string(), "email".to_string()],
        redirect_uri: "https://app.example.com/callback".to_string(),
        nonce: "n-0S6_WzA2Mj".to_string(),
        state: "af0ifjsldkj".to_string(),
        force_approval_prompt: true,
        logged_in: true,
        claims: claims(),
        connector_id: "ldap".to_string(),
        connector_data: b"{\"dn\":\"cn=jane\"}".to_vec(),
        expiry,
        pkce: pkce(),
        hmac_key: vec![1, 2, 3, 4],
    }
}

pub fn auth_code(id: &str, expiry: OffsetDateTime) -> AuthCode {
    AuthCode {
        id: id.to_string(),
        client_id: "web-app".to_string(),
        redirect_uri: "https://app.example.com/callback".to_string(),
        nonce: "n-0S6_WzA2Mj".to_string(),
        state: "af0ifjsldkj".to_string(),
        scopes: vec!["openid".to_string()],
        connector_id: "ldap".to_string(),
        connector_data: vec![],
        claims: claims(),
        expiry,
        pkce: pkce(),
    }
}

pub fn client(id: &str) -> Client {
    Client {
        id: id.to_string(),
        secret: "s3cr3t".to_string(),
        redirect_uris: vec!["https://app.example.com/callback".to_string()],
        trusted_peers: vec!["cli".to_string()],
        public: false,
        name: "Example App".to_string(),
        logo_url: "https://app.example.com/logo.png".to_string(),
    }
}

pub fn refresh_token(id: &str) -> RefreshToken {
    RefreshToken {
        id: id.to_string(),
        token: "bar".to_string(),
        obsolete_token: String::new(),
        created_at: datetime!(2024-05-01 08:00:00 UTC),
        last_used: datetime!(2024-05-01 09:00:00 UTC),
        client_id: "web-app".to_string(),
        connector_id: "ldap".to_string(),
        connector_data: b"session".to_vec(),
        scopes: vec!["openid".to_string(), "offline_access".to_string()],
        nonce: "n-1".to_string(),
        claims: claims(),
    }
}

pub fn password(email: &str) -> Password {
    Password {
        email: email.to_string(),
        hash: b"$2a$10$33EMT0cVYVlPy6WAMCLsceLYjWhuHpbz5yuZxu/GAFj03J9Lytjuy".to_vec(),
        username: "jane".to_string(),
        user_id: "u-1".to_string(),
    }
}

pub fn offline_sessions(user_id: &str, conn_id: &str) -> OfflineSessions {
    let mut refresh = BTreeMap::new();
    refresh.insert(
        "web-app".to_string(),
        RefreshTokenRef {
            id: "rt-1".to_string(),
            client_id: "web-app".to_string(),
            created_at: datetime!(2024-05-01 08:00:00 UTC),
            last_used: datetime!(2024-05-01 09:00:00 UTC),
        },
    );
    OfflineSessions {
        user_id: user_id.to_string(),
        conn_id: conn_id.to_string(),
        refresh,
        connector_data: b"offline".to_vec(),
    }
}

pub fn connector(id: &str) -> Connector {
    Connector {
        id: id.to_string(),
        connector_type: "ldap".to_string(),
        name: "Corporate LDAP".to_string(),
        config_version: "1".to_string(),
        config: b"{\"host\":\"ldap.example.com:636\"}".to_vec(),
    }
}

pub fn device_request(user_code: &str, expiry: OffsetDateTime) -> DeviceRequest {
    DeviceRequest {
        user_code: user_code.to_string(),
        device_code: format!("dc-{}", user_code.to_lowercase()),
        client_id: "tv-app".to_string(),
        client_secret: "tv-secret".to_string(),
        scopes: vec!["openid".to_string()],
        expiry,
    }
}

pub fn device_token(device_code: &str, expiry: OffsetDateTime) -> DeviceToken {
    DeviceToken {
        device_code: device_code.to_string(),
        status: "pending".to_string(),
        token: String::new(),
        expiry,
        last_request_time: datetime!(2024-06-01 11:55:00 UTC),
        poll_interval_seconds: 5,
        pkce: pkce(),
    }
}
