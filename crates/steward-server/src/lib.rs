use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use reqwest::Client;
use serde_json::{json, Value};
use steward_config::Config;
use steward_contracts::{
    ControlStatusBody, ControlUpdateBody, Credentials, DesiredCount, ErrorBody, ErrorResponse,
    FollowupMessage, Interaction, InteractionAck, NetworkInterface, ServerState, TaskDescription,
};
use steward_kernel::{
    classify_interaction, deferred_ack, parse_command, pong_ack, shared_secret_matches,
    standard_response, verify_signature, InteractionKind,
};
use tokio::sync::{mpsc, OnceCell};
use tracing::{error, info, warn};

pub async fn serve(cfg: Config) -> Result<(), String> {
    let addr: SocketAddr = cfg
        .server
        .listen_addr
        .parse()
        .map_err(|e| format!("invalid listen_addr: {e}"))?;

    let app = build_app(cfg)?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| format!("bind failed: {e}"))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| format!("serve failed: {e}"))
}

pub fn build_app(cfg: Config) -> Result<Router, String> {
    let orchestrator: Arc<dyn Orchestrator> = Arc::new(HttpOrchestrator::new(&cfg)?);
    let secrets: Arc<dyn SecretStore> = Arc::new(HttpSecretStore::new(&cfg)?);
    build_app_with(cfg, orchestrator, secrets, None)
}

/// Assembles the router from explicit collaborators. Tests inject mocks and
/// a recording follow-up sink here; `build_app` wires the HTTP-backed ones.
pub fn build_app_with(
    cfg: Config,
    orchestrator: Arc<dyn Orchestrator>,
    secrets: Arc<dyn SecretStore>,
    followup_sink: Option<Arc<dyn FollowupSink>>,
) -> Result<Router, String> {
    let state = AppState::new(cfg, orchestrator, secrets, followup_sink)?;
    Ok(Router::new()
        .route("/v1/healthz", get(healthz))
        .route("/v1/interactions", post(interactions))
        .route("/v1/server", get(control_status).post(control_update))
        .with_state(state))
}

#[derive(Clone)]
struct AppState {
    interaction_authorizer: Arc<dyn Authorizer>,
    control_authorizer: Arc<dyn Authorizer>,
    resolver: Arc<StateResolver>,
    mutator: Arc<StateMutator>,
    jobs: mpsc::Sender<CommandJob>,
}

impl AppState {
    fn new(
        cfg: Config,
        orchestrator: Arc<dyn Orchestrator>,
        secrets: Arc<dyn SecretStore>,
        followup_sink: Option<Arc<dyn FollowupSink>>,
    ) -> Result<Self, String> {
        let credentials = Arc::new(CredentialCache::new(
            secrets,
            cfg.secrets.secret_name.clone(),
        ));
        let sink: Arc<dyn FollowupSink> = match followup_sink {
            Some(sink) => sink,
            None => Arc::new(DiscordFollowupSink::new(&cfg, credentials.clone())?),
        };
        let resolver = Arc::new(StateResolver::new(orchestrator.clone(), &cfg));
        let mutator = Arc::new(StateMutator::new(orchestrator, &cfg));
        let executor = Arc::new(CommandExecutor::new(resolver.clone(), mutator.clone()));

        let (jobs, rx) = mpsc::channel(cfg.executor.queue_capacity);
        tokio::spawn(run_command_worker(rx, executor, sink));

        Ok(Self {
            interaction_authorizer: Arc::new(SignatureAuthorizer {
                credentials: credentials.clone(),
            }),
            control_authorizer: Arc::new(SharedSecretAuthorizer { credentials }),
            resolver,
            mutator,
            jobs,
        })
    }
}

async fn healthz() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

/// Bot channel entry point. Verification happens against the raw body bytes
/// before any parsing; unverified callers get nothing but a 401.
async fn interactions(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<InteractionAck>, (StatusCode, Json<ErrorResponse>)> {
    let evidence = AuthorityEvidence {
        timestamp: header_str(&headers, "x-signature-timestamp"),
        signature: header_str(&headers, "x-signature-ed25519"),
        raw_body: &body,
        shared_key: None,
    };
    match state.interaction_authorizer.authorize(&evidence).await {
        AuthorityDecision::Granted => {}
        AuthorityDecision::Denied | AuthorityDecision::Unavailable(_) => {
            return Err(error_response(
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                "invalid request signature",
            ));
        }
    }

    let interaction: Interaction = serde_json::from_slice(&body).map_err(|_| {
        error_response(
            StatusCode::BAD_REQUEST,
            "validation_error",
            "malformed interaction body",
        )
    })?;

    match classify_interaction(&interaction) {
        InteractionKind::Ping => Ok(Json(pong_ack())),
        InteractionKind::Command => {
            let job = CommandJob {
                job_id: format!("job_{}", uuid::Uuid::new_v4().as_simple()),
                interaction,
            };
            // The deferred ack is only sent once the handoff is accepted;
            // the synchronous path never waits for execution itself.
            match state.jobs.try_send(job) {
                Ok(()) => Ok(Json(deferred_ack())),
                Err(e) => {
                    error!("command handoff rejected: {e}");
                    Err(error_response(
                        StatusCode::SERVICE_UNAVAILABLE,
                        "dispatch_unavailable",
                        "command execution queue is full",
                    ))
                }
            }
        }
        InteractionKind::Unsupported => Err(error_response(
            StatusCode::BAD_REQUEST,
            "validation_error",
            "unsupported interaction type",
        )),
    }
}

async fn control_status(
    State(state): State<AppState>,
) -> (StatusCode, Json<ControlStatusBody>) {
    match state.resolver.resolve().await {
        Ok(ServerState {
            public_address: Some(ip),
            ..
        }) => (
            StatusCode::OK,
            Json(ControlStatusBody {
                message: "Server status request successful".to_string(),
                ip: Some(ip),
            }),
        ),
        Ok(_) => (
            StatusCode::OK,
            Json(ControlStatusBody {
                message: "No running instances".to_string(),
                ip: None,
            }),
        ),
        Err(e) => {
            error!("status resolution failed: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ControlStatusBody {
                    message: "Status request failed".to_string(),
                    ip: None,
                }),
            )
        }
    }
}

async fn control_update(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> (StatusCode, Json<ControlUpdateBody>) {
    let (Some(action), Some(key)) = (
        header_str(&headers, "action"),
        header_str(&headers, "key"),
    ) else {
        return control_reply(StatusCode::BAD_REQUEST, "Missing required parameters");
    };

    let count = match action {
        "start" => DesiredCount::Running,
        "stop" => DesiredCount::Stopped,
        _ => {
            return control_reply(
                StatusCode::BAD_REQUEST,
                "Action must be either START or STOP",
            );
        }
    };

    let evidence = AuthorityEvidence {
        timestamp: None,
        signature: None,
        raw_body: &[],
        shared_key: Some(key),
    };
    match state.control_authorizer.authorize(&evidence).await {
        AuthorityDecision::Granted => {}
        AuthorityDecision::Denied => {
            warn!("control update rejected: shared secret mismatch");
            return control_reply(StatusCode::BAD_REQUEST, "Authentication failed");
        }
        AuthorityDecision::Unavailable(e) => {
            error!("control credentials unavailable: {e}");
            return control_reply(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Control credentials unavailable",
            );
        }
    }

    match count {
        DesiredCount::Running => info!("starting service"),
        DesiredCount::Stopped => info!("stopping service"),
    }
    if state.mutator.set_desired_count(count).await {
        control_reply(StatusCode::OK, "Server update successful")
    } else {
        control_reply(StatusCode::INTERNAL_SERVER_ERROR, "Update request failed")
    }
}

fn control_reply(status: StatusCode, message: &str) -> (StatusCode, Json<ControlUpdateBody>) {
    (
        status,
        Json(ControlUpdateBody {
            message: message.to_string(),
        }),
    )
}

fn error_response(
    status: StatusCode,
    code: &str,
    message: &str,
) -> (StatusCode, Json<ErrorResponse>) {
    (
        status,
        Json(ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message: message.to_string(),
                details: None,
            },
        }),
    )
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Evidence a caller presents to an entry point. The bot channel carries a
/// detached signature over the raw body; the control endpoint carries a
/// shared key. Each authorizer reads only the fields its trust model uses.
pub struct AuthorityEvidence<'a> {
    pub timestamp: Option<&'a str>,
    pub signature: Option<&'a str>,
    pub raw_body: &'a [u8],
    pub shared_key: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorityDecision {
    Granted,
    Denied,
    /// Credentials could not be obtained, so no trust decision was possible.
    Unavailable(String),
}

#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn authorize(&self, evidence: &AuthorityEvidence<'_>) -> AuthorityDecision;
}

/// Signature trust model for the bot channel. Fails closed: a missing
/// header, an unobtainable public key, or any verification failure is a
/// plain denial, never an error.
struct SignatureAuthorizer {
    credentials: Arc<CredentialCache>,
}

#[async_trait]
impl Authorizer for SignatureAuthorizer {
    async fn authorize(&self, evidence: &AuthorityEvidence<'_>) -> AuthorityDecision {
        let (Some(timestamp), Some(signature)) = (evidence.timestamp, evidence.signature) else {
            return AuthorityDecision::Denied;
        };
        let creds = match self.credentials.get().await {
            Ok(v) => v,
            Err(e) => {
                warn!("credential fetch failed during verification: {e}");
                return AuthorityDecision::Denied;
            }
        };
        if verify_signature(
            &creds.signing_public_key,
            timestamp,
            evidence.raw_body,
            signature,
        ) {
            AuthorityDecision::Granted
        } else {
            AuthorityDecision::Denied
        }
    }
}

/// Shared-secret trust model for the direct control endpoint. Unlike the
/// signature path, an unobtainable secret is reported as such so the caller
/// sees a server-side failure rather than an authentication one.
struct SharedSecretAuthorizer {
    credentials: Arc<CredentialCache>,
}

#[async_trait]
impl Authorizer for SharedSecretAuthorizer {
    async fn authorize(&self, evidence: &AuthorityEvidence<'_>) -> AuthorityDecision {
        let Some(provided) = evidence.shared_key else {
            return AuthorityDecision::Denied;
        };
        let creds = match self.credentials.get().await {
            Ok(v) => v,
            Err(e) => return AuthorityDecision::Unavailable(e),
        };
        if shared_secret_matches(provided, &creds.control_shared_secret) {
            AuthorityDecision::Granted
        } else {
            AuthorityDecision::Denied
        }
    }
}

/// Process-lifetime credential cache. The first successful fetch is pinned
/// for the rest of the process; concurrent first uses share one in-flight
/// fetch, and a failed fetch is retried on the next request.
pub struct CredentialCache {
    store: Arc<dyn SecretStore>,
    secret_name: String,
    cell: OnceCell<Credentials>,
}

impl CredentialCache {
    pub fn new(store: Arc<dyn SecretStore>, secret_name: String) -> Self {
        Self {
            store,
            secret_name,
            cell: OnceCell::new(),
        }
    }

    pub async fn get(&self) -> Result<Credentials, String> {
        self.cell
            .get_or_try_init(|| async { self.store.get_secret(&self.secret_name).await })
            .await
            .cloned()
    }
}

#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get_secret(&self, name: &str) -> Result<Credentials, String>;
}

/// The orchestration-platform surface this plane consumes. One method per
/// remote operation; transport failures surface as `Err` and are converted
/// at each component boundary.
#[async_trait]
pub trait Orchestrator: Send + Sync {
    async fn list_running_tasks(
        &self,
        service: &str,
        cluster: &str,
    ) -> Result<Vec<String>, String>;

    async fn describe_tasks(
        &self,
        cluster: &str,
        tasks: &[String],
    ) -> Result<Vec<TaskDescription>, String>;

    async fn describe_network_interfaces(
        &self,
        ids: &[String],
    ) -> Result<Vec<NetworkInterface>, String>;

    async fn update_service_desired_count(
        &self,
        service: &str,
        cluster: &str,
        count: DesiredCount,
    ) -> Result<(), String>;
}

struct HttpOrchestrator {
    client: Client,
    endpoint: String,
}

impl HttpOrchestrator {
    fn new(cfg: &Config) -> Result<Self, String> {
        let client = Client::builder()
            .timeout(Duration::from_millis(cfg.orchestrator.timeout_ms))
            .build()
            .map_err(|e| e.to_string())?;
        Ok(Self {
            client,
            endpoint: cfg.orchestrator.endpoint.trim_end_matches('/').to_string(),
        })
    }

    async fn call(&self, operation: &str, body: Value) -> Result<Value, String> {
        let url = format!("{}/{operation}", self.endpoint);
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| format!("{operation} transport error: {e}"))?;
        if !response.status().is_success() {
            return Err(format!("{operation} returned {}", response.status()));
        }
        response
            .json()
            .await
            .map_err(|e| format!("{operation} returned invalid JSON: {e}"))
    }
}

#[async_trait]
impl Orchestrator for HttpOrchestrator {
    async fn list_running_tasks(
        &self,
        service: &str,
        cluster: &str,
    ) -> Result<Vec<String>, String> {
        let payload = self
            .call(
                "list-tasks",
                json!({
                    "serviceName": service,
                    "cluster": cluster,
                    "desiredStatus": "RUNNING",
                }),
            )
            .await?;
        Ok(payload
            .get("taskArns")
            .and_then(Value::as_array)
            .map(|arns| {
                arns.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn describe_tasks(
        &self,
        cluster: &str,
        tasks: &[String],
    ) -> Result<Vec<TaskDescription>, String> {
        let payload = self
            .call("describe-tasks", json!({"cluster": cluster, "tasks": tasks}))
            .await?;
        let tasks = payload.get("tasks").cloned().unwrap_or(Value::Array(vec![]));
        serde_json::from_value(tasks)
            .map_err(|e| format!("describe-tasks returned unexpected shape: {e}"))
    }

    async fn describe_network_interfaces(
        &self,
        ids: &[String],
    ) -> Result<Vec<NetworkInterface>, String> {
        let payload = self
            .call(
                "describe-network-interfaces",
                json!({"networkInterfaceIds": ids}),
            )
            .await?;
        let interfaces = payload
            .get("networkInterfaces")
            .cloned()
            .unwrap_or(Value::Array(vec![]));
        serde_json::from_value(interfaces)
            .map_err(|e| format!("describe-network-interfaces returned unexpected shape: {e}"))
    }

    async fn update_service_desired_count(
        &self,
        service: &str,
        cluster: &str,
        count: DesiredCount,
    ) -> Result<(), String> {
        self.call(
            "update-service",
            json!({
                "service": service,
                "cluster": cluster,
                "desiredCount": count.as_u32(),
            }),
        )
        .await
        .map(|_| ())
    }
}

struct HttpSecretStore {
    client: Client,
    endpoint: String,
}

impl HttpSecretStore {
    fn new(cfg: &Config) -> Result<Self, String> {
        let client = Client::builder()
            .timeout(Duration::from_millis(cfg.secrets.timeout_ms))
            .build()
            .map_err(|e| e.to_string())?;
        Ok(Self {
            client,
            endpoint: cfg.secrets.endpoint.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl SecretStore for HttpSecretStore {
    async fn get_secret(&self, name: &str) -> Result<Credentials, String> {
        let url = format!("{}/secrets/{name}", self.endpoint);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| format!("get-secret transport error: {e}"))?;
        if !response.status().is_success() {
            return Err(format!("get-secret returned {}", response.status()));
        }
        response
            .json()
            .await
            .map_err(|e| format!("get-secret returned unexpected shape: {e}"))
    }
}

/// Resolves the workload's current network identity through the three-hop
/// lookup chain. A miss on any hop is a valid "offline" observation; only
/// transport failures surface as `Err`.
pub struct StateResolver {
    orchestrator: Arc<dyn Orchestrator>,
    service: String,
    cluster: String,
}

impl StateResolver {
    fn new(orchestrator: Arc<dyn Orchestrator>, cfg: &Config) -> Self {
        Self {
            orchestrator,
            service: cfg.orchestrator.service.clone(),
            cluster: cfg.orchestrator.cluster.clone(),
        }
    }

    pub async fn resolve(&self) -> Result<ServerState, String> {
        let tasks = self
            .orchestrator
            .list_running_tasks(&self.service, &self.cluster)
            .await?;
        // Only the first task is ever inspected. The service targets at most
        // one instance; with more than one listed, "arbitrary first" is all
        // this lookup can offer.
        let Some(first) = tasks.first() else {
            return Ok(ServerState::offline());
        };

        let described = self
            .orchestrator
            .describe_tasks(&self.cluster, std::slice::from_ref(first))
            .await?;
        let interface_id = described
            .first()
            .and_then(|task| task.attachments.first())
            .and_then(|attachment| {
                attachment
                    .details
                    .iter()
                    .find(|detail| detail.name == "networkInterfaceId")
            })
            .and_then(|detail| detail.value.clone());
        let Some(interface_id) = interface_id else {
            return Ok(ServerState::offline());
        };

        let interfaces = self
            .orchestrator
            .describe_network_interfaces(std::slice::from_ref(&interface_id))
            .await?;
        let address = interfaces
            .iter()
            .find_map(|interface| interface.association.as_ref())
            .and_then(|association| association.public_ip.clone());

        Ok(match address {
            Some(ip) => ServerState::online(ip),
            None => ServerState::offline(),
        })
    }
}

/// Issues the desired-count change. Success means the platform accepted the
/// request, not that the transition completed.
pub struct StateMutator {
    orchestrator: Arc<dyn Orchestrator>,
    service: String,
    cluster: String,
}

impl StateMutator {
    fn new(orchestrator: Arc<dyn Orchestrator>, cfg: &Config) -> Self {
        Self {
            orchestrator,
            service: cfg.orchestrator.service.clone(),
            cluster: cfg.orchestrator.cluster.clone(),
        }
    }

    pub async fn set_desired_count(&self, count: DesiredCount) -> bool {
        match self
            .orchestrator
            .update_service_desired_count(&self.service, &self.cluster, count)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                error!("desired-count update failed: {e}");
                false
            }
        }
    }
}

struct CommandJob {
    job_id: String,
    interaction: Interaction,
}

/// Executes a verified command outside the response deadline. Total: every
/// path, including backend failures and unknown commands, yields a message.
pub struct CommandExecutor {
    resolver: Arc<StateResolver>,
    mutator: Arc<StateMutator>,
}

impl CommandExecutor {
    fn new(resolver: Arc<StateResolver>, mutator: Arc<StateMutator>) -> Self {
        Self { resolver, mutator }
    }

    pub async fn execute(&self, interaction: &Interaction) -> FollowupMessage {
        if interaction.member.is_none() {
            return standard_response("Sorry, there is no member info with this request.");
        }

        match parse_command(interaction) {
            steward_contracts::Command::Status => match self.resolver.resolve().await {
                Ok(ServerState {
                    public_address: Some(ip),
                    ..
                }) => standard_response(format!("Server is online at IP: {ip}")),
                Ok(_) => standard_response("Server is offline. Use '/start' to start it."),
                Err(e) => {
                    warn!("status resolution failed: {e}");
                    standard_response("Unable to check server status.")
                }
            },
            steward_contracts::Command::Start => {
                if self.mutator.set_desired_count(DesiredCount::Running).await {
                    standard_response("Service updated to start server.")
                } else {
                    standard_response("Unable to update service")
                }
            }
            steward_contracts::Command::Stop => {
                if self.mutator.set_desired_count(DesiredCount::Stopped).await {
                    standard_response("Service updated to stop server.")
                } else {
                    standard_response("Unable to update service")
                }
            }
            steward_contracts::Command::Unknown => {
                standard_response("Hey, that's a new command!")
            }
        }
    }
}

async fn run_command_worker(
    mut rx: mpsc::Receiver<CommandJob>,
    executor: Arc<CommandExecutor>,
    sink: Arc<dyn FollowupSink>,
) {
    while let Some(job) = rx.recv().await {
        let response = executor.execute(&job.interaction).await;
        match job.interaction.token.as_deref() {
            Some(token) if !token.is_empty() => {
                if sink.deliver(&response, token).await {
                    info!(job_id = %job.job_id, "follow-up delivered");
                } else {
                    warn!(job_id = %job.job_id, "follow-up delivery failed");
                }
            }
            _ => warn!(job_id = %job.job_id, "interaction carried no follow-up token"),
        }
    }
}

/// One-time follow-up channel bound to the original interaction.
/// At-most-once, best-effort: a failed delivery is logged, never retried.
#[async_trait]
pub trait FollowupSink: Send + Sync {
    async fn deliver(&self, message: &FollowupMessage, token: &str) -> bool;
}

struct DiscordFollowupSink {
    client: Client,
    base_url: String,
    credentials: Arc<CredentialCache>,
}

impl DiscordFollowupSink {
    fn new(cfg: &Config, credentials: Arc<CredentialCache>) -> Result<Self, String> {
        let client = Client::builder()
            .timeout(Duration::from_millis(cfg.dispatch.timeout_ms))
            .build()
            .map_err(|e| e.to_string())?;
        Ok(Self {
            client,
            base_url: cfg.dispatch.webhook_base_url.trim_end_matches('/').to_string(),
            credentials,
        })
    }
}

#[async_trait]
impl FollowupSink for DiscordFollowupSink {
    async fn deliver(&self, message: &FollowupMessage, token: &str) -> bool {
        let creds = match self.credentials.get().await {
            Ok(v) => v,
            Err(e) => {
                error!("follow-up credentials unavailable: {e}");
                return false;
            }
        };
        let url = format!("{}/{}/{token}", self.base_url, creds.bot_client_id);
        match self
            .client
            .post(&url)
            .header("Authorization", format!("Bot {}", creds.bot_auth_token))
            .json(message)
            .send()
            .await
        {
            Ok(response) => {
                let ok = response.status().is_success();
                if !ok {
                    warn!("follow-up post returned {}", response.status());
                }
                ok
            }
            Err(e) => {
                warn!("error posting follow-up: {e}");
                false
            }
        }
    }
}
