//! Request dispatcher
//!
//! Pulls frames from the transport (single reader), demultiplexes
//! requests from notifications, checks the session-state precondition of
//! every method, and runs each request handler in its own task. A
//! bounded semaphore caps concurrent handlers; the reader acquires a
//! permit before reading the next frame, so a saturated pool exerts
//! backpressure instead of queueing unboundedly.
//!
//! Every in-flight request owns a cancellation token keyed by its id.
//! `notifications/cancelled` triggers the matching token; a cancelled
//! handler unwinds into a single response with code -32009. Requests
//! that already responded are no-ops.
//!
//! For every well-formed request there is exactly one response with the
//! same identifier; notifications never produce one.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Mutex as StdMutex;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::codec::Inbound;
use crate::error::{JsonRpcError, Result};
use crate::protocol::{
    methods, CallToolParams, CancelledParams, GetPromptParams, InitializeParams, InitializeResult,
    JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, ListPromptsResult, ListResourcesResult,
    ListToolsResult, LogLevel, LoggingMessageParams, ReadResourceParams, RequestId,
    SetLogLevelParams, SubscribeResourceParams, UnsubscribeResourceParams,
};
use crate::session::{ClientInfo, Session, SessionError, SessionState};
use crate::telemetry::{NoopTelemetry, TelemetryObserver};
use crate::transport::Transport;

/// Hook invoked when the session reaches `Ready`; used to seed the
/// session's registries.
pub type ReadyHook = Box<dyn Fn(&Arc<Session>) + Send + Sync>;

/// Dispatcher limits.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Maximum concurrently running request handlers.
    pub max_concurrent_requests: usize,
    /// How long to wait for in-flight handlers on shutdown.
    pub shutdown_grace: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: 32,
            shutdown_grace: Duration::from_secs(2),
        }
    }
}

struct DispatcherInner {
    transport: Arc<dyn Transport>,
    session: Arc<Session>,
    config: DispatcherConfig,
    semaphore: Arc<Semaphore>,
    in_flight: StdMutex<HashMap<RequestId, CancellationToken>>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    ready_hook: StdMutex<Option<ReadyHook>>,
    telemetry: Arc<dyn TelemetryObserver>,
}

/// Serves one transport connection against one session.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

impl Dispatcher {
    pub fn new(
        transport: Arc<dyn Transport>,
        session: Arc<Session>,
        config: DispatcherConfig,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_requests.max(1)));
        Self {
            inner: Arc::new(DispatcherInner {
                transport,
                session,
                config,
                semaphore,
                in_flight: StdMutex::new(HashMap::new()),
                shutdown: CancellationToken::new(),
                tracker: TaskTracker::new(),
                ready_hook: StdMutex::new(None),
                telemetry: Arc::new(NoopTelemetry),
            }),
        }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.inner.session
    }

    /// Install a hook run once the session transitions to `Ready`.
    pub fn set_ready_hook(&self, hook: impl Fn(&Arc<Session>) + Send + Sync + 'static) {
        *self.inner.ready_hook.lock().unwrap() = Some(Box::new(hook));
    }

    /// Request a graceful stop of the serve loop.
    pub fn stop(&self) {
        self.inner.shutdown.cancel();
    }

    /// Serve until EOF, `shutdown`, or a fatal transport failure.
    pub async fn serve(&self) -> Result<()> {
        tracing::info!(session = %self.inner.session.id(), "dispatcher started");

        let outcome = self.read_loop().await;

        self.drain().await;
        self.inner.transport.close().await?;

        if self.inner.session.state() != SessionState::Closed {
            let _ = self.inner.session.close();
        }

        tracing::info!(session = %self.inner.session.id(), "dispatcher stopped");
        outcome
    }

    async fn read_loop(&self) -> Result<()> {
        loop {
            // Backpressure: hold a pool slot before reading the next frame.
            let Ok(permit) = self.inner.semaphore.clone().acquire_owned().await else {
                return Ok(());
            };

            let inbound = tokio::select! {
                _ = self.inner.shutdown.cancelled() => return Ok(()),
                inbound = self.inner.transport.read() => inbound?,
            };

            match inbound {
                None => {
                    tracing::info!("transport closed (EOF)");
                    return Ok(());
                }
                Some(Inbound::Malformed { id, error }) => {
                    drop(permit);
                    self.write_response(JsonRpcResponse::error(id, error)).await;
                }
                Some(Inbound::Notification(notification)) => {
                    drop(permit);
                    self.handle_notification(notification);
                }
                Some(Inbound::Request(request)) => {
                    let token = CancellationToken::new();
                    self.inner
                        .in_flight
                        .lock()
                        .unwrap()
                        .insert(request.id.clone(), token.clone());

                    let this = self.clone();
                    self.inner.tracker.spawn(async move {
                        let _permit = permit;
                        let id = request.id.clone();
                        let method = request.method.clone();

                        let response = this.handle_request(request, &token).await;
                        this.inner.in_flight.lock().unwrap().remove(&id);
                        let ok = matches!(response, JsonRpcResponse::Result(_));
                        this.write_response(response).await;

                        if method == methods::SHUTDOWN && ok {
                            this.inner.shutdown.cancel();
                        }
                    });
                }
            }
        }
    }

    /// Cancel in-flight handlers and wait for them, bounded by the
    /// shutdown grace period.
    async fn drain(&self) {
        let tokens: Vec<CancellationToken> = {
            let mut in_flight = self.inner.in_flight.lock().unwrap();
            in_flight.drain().map(|(_, token)| token).collect()
        };
        for token in tokens {
            token.cancel();
        }

        self.inner.tracker.close();
        if tokio::time::timeout(self.inner.config.shutdown_grace, self.inner.tracker.wait())
            .await
            .is_err()
        {
            tracing::warn!("shutdown grace elapsed with handlers still in flight");
        }
    }

    async fn write_response(&self, response: JsonRpcResponse) {
        if let Err(e) = self.inner.transport.write(&response).await {
            tracing::error!(error = %e, "failed to write response");
        }
    }

    /// Run one request to exactly one response.
    async fn handle_request(&self, request: JsonRpcRequest, token: &CancellationToken) -> JsonRpcResponse {
        let span = self.inner.telemetry.span_start("request");
        let method = request.method.clone();
        let id = request.id.clone();

        let handler = AssertUnwindSafe(self.dispatch(&method, request.params)).catch_unwind();
        let outcome = tokio::select! {
            _ = token.cancelled() => Err(JsonRpcError::cancelled(format!(
                "request {} cancelled", id
            ))),
            outcome = handler => match outcome {
                Ok(result) => result,
                Err(_) => {
                    tracing::error!(method = %method, "handler panicked");
                    // Redacted: panic payloads stay out of the wire.
                    Err(JsonRpcError::internal_error("internal error"))
                }
            },
        };

        self.inner.telemetry.span_end(span, "request", outcome.is_ok());
        match outcome {
            Ok(value) => JsonRpcResponse::result(id, value),
            Err(error) => JsonRpcResponse::error(Some(id), error),
        }
    }

    /// The method table: route to a handler after checking the
    /// session-state precondition.
    async fn dispatch(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> std::result::Result<Value, JsonRpcError> {
        let session = &self.inner.session;
        let state = session.state();

        match method {
            methods::INITIALIZE => {
                match state {
                    SessionState::Created => {}
                    SessionState::Closed => {
                        return Err(JsonRpcError::invalid_session_state(method, "Closed"));
                    }
                    _ => {
                        return Err(JsonRpcError::invalid_request(
                            "session already initialized",
                        ));
                    }
                }
                let params: InitializeParams = parse_params(params)?;
                self.handle_initialize(params)
            }
            methods::PING => {
                if state == SessionState::Closed {
                    return Err(JsonRpcError::invalid_session_state(method, "Closed"));
                }
                Ok(Value::Object(Default::default()))
            }
            methods::SHUTDOWN => {
                session.close().map_err(|_| {
                    JsonRpcError::invalid_request("session already closed")
                })?;
                Ok(Value::Object(Default::default()))
            }
            methods::TOOLS_LIST => {
                self.require_ready(method, state)?;
                let tools = session.tools().map_err(|e| session_error(method, e))?;
                let mut descriptors: Vec<_> = tools
                    .iter()
                    .filter(|t| t.is_enabled())
                    .map(|t| t.descriptor())
                    .collect();
                descriptors.sort_by(|a, b| a.name.cmp(&b.name));
                to_result(&ListToolsResult { tools: descriptors })
            }
            methods::TOOLS_CALL => {
                self.require_ready(method, state)?;
                let params: CallToolParams = parse_params(params)?;
                let tool = session
                    .tool(&params.name)
                    .map_err(|e| session_error(method, e))?;
                if !tool.is_enabled() {
                    return Err(JsonRpcError::tool_not_found(&params.name));
                }

                // Handler failures become value-level tool errors, never
                // JSON-RPC errors.
                let result = match tool.call(params.arguments).await {
                    Ok(result) => result,
                    Err(e) => crate::protocol::CallToolResult::error(e.to_string()),
                };
                to_result(&result)
            }
            methods::RESOURCES_LIST => {
                self.require_ready(method, state)?;
                let resources = session.resources().map_err(|e| session_error(method, e))?;
                let mut descriptors: Vec<_> =
                    resources.iter().map(|r| r.descriptor()).collect();
                descriptors.sort_by(|a, b| a.uri.cmp(&b.uri));
                to_result(&ListResourcesResult {
                    resources: descriptors,
                })
            }
            methods::RESOURCES_READ => {
                self.require_ready(method, state)?;
                let params: ReadResourceParams = parse_params(params)?;
                let resource = session
                    .resource(&params.uri)
                    .map_err(|e| session_error(method, e))?;
                to_result(&resource.read())
            }
            methods::RESOURCES_SUBSCRIBE => {
                self.require_ready(method, state)?;
                let params: SubscribeResourceParams = parse_params(params)?;
                session
                    .subscribe(&params.uri)
                    .map_err(|e| session_error(method, e))?;
                Ok(Value::Object(Default::default()))
            }
            methods::RESOURCES_UNSUBSCRIBE => {
                self.require_ready(method, state)?;
                let params: UnsubscribeResourceParams = parse_params(params)?;
                session
                    .unsubscribe(&params.uri)
                    .map_err(|e| session_error(method, e))?;
                Ok(Value::Object(Default::default()))
            }
            methods::PROMPTS_LIST => {
                self.require_ready(method, state)?;
                let prompts = session.prompts().map_err(|e| session_error(method, e))?;
                let mut descriptors: Vec<_> = prompts.iter().map(|p| p.descriptor()).collect();
                descriptors.sort_by(|a, b| a.name.cmp(&b.name));
                to_result(&ListPromptsResult {
                    prompts: descriptors,
                })
            }
            methods::PROMPTS_GET => {
                self.require_ready(method, state)?;
                let params: GetPromptParams = parse_params(params)?;
                let prompt = session
                    .prompt(&params.name)
                    .map_err(|e| session_error(method, e))?;
                let rendered = prompt
                    .render(&params.arguments)
                    .map_err(|e| JsonRpcError::invalid_params(e.to_string()))?;
                to_result(&rendered)
            }
            methods::LOGGING_SET_LEVEL => {
                self.require_ready(method, state)?;
                let params: SetLogLevelParams = parse_params(params)?;
                session.set_log_level(params.level);
                Ok(Value::Object(Default::default()))
            }
            other => Err(JsonRpcError::method_not_found(other)),
        }
    }

    fn handle_initialize(
        &self,
        params: InitializeParams,
    ) -> std::result::Result<Value, JsonRpcError> {
        let session = &self.inner.session;
        session
            .initialize(
                ClientInfo {
                    name: params.client_info.name,
                    version: params.client_info.version,
                },
                &params.protocol_version,
            )
            .map_err(|e| match e {
                SessionError::EmptyClientName => JsonRpcError::invalid_params(e.to_string()),
                SessionError::AlreadyInitialized => {
                    JsonRpcError::invalid_request("session already initialized")
                }
                other => JsonRpcError::internal_error(other.to_string()),
            })?;

        to_result(&InitializeResult {
            protocol_version: session.protocol_version(),
            capabilities: session.capabilities(),
            server_info: session.server_info(),
        })
    }

    fn require_ready(
        &self,
        method: &str,
        state: SessionState,
    ) -> std::result::Result<(), JsonRpcError> {
        if state != SessionState::Ready {
            return Err(JsonRpcError::invalid_session_state(
                method,
                &state.to_string(),
            ));
        }
        Ok(())
    }

    /// Handle an inbound notification. Never produces a response.
    fn handle_notification(&self, notification: JsonRpcNotification) {
        match notification.method.as_str() {
            methods::INITIALIZED => match self.inner.session.mark_ready() {
                Ok(()) => {
                    tracing::debug!("session ready");
                    let hook = self.inner.ready_hook.lock().unwrap();
                    if let Some(hook) = hook.as_ref() {
                        hook(&self.inner.session);
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "ignoring initialized notification");
                }
            },
            methods::CANCELLED => {
                let params = notification
                    .params
                    .and_then(|p| serde_json::from_value::<CancelledParams>(p).ok());
                let Some(params) = params else {
                    tracing::debug!("malformed cancelled notification");
                    return;
                };

                let token = {
                    let in_flight = self.inner.in_flight.lock().unwrap();
                    in_flight.get(&params.request_id).cloned()
                };
                match token {
                    Some(token) => {
                        tracing::debug!(
                            request_id = %params.request_id,
                            reason = params.reason.as_deref().unwrap_or(""),
                            "cancelling request"
                        );
                        token.cancel();
                    }
                    // Best effort: the handler may already have responded.
                    None => tracing::debug!(
                        request_id = %params.request_id,
                        "cancellation for unknown request"
                    ),
                }
            }
            other => {
                tracing::debug!(method = other, "ignoring unknown notification");
            }
        }
    }

    // =========================================================================
    // Server-origin notifications
    // =========================================================================

    /// Emit `notifications/message`, honoring the level set by
    /// `logging/setLevel`. Returns whether the message was sent.
    pub async fn notify_log(
        &self,
        level: LogLevel,
        logger: Option<&str>,
        data: Value,
    ) -> Result<bool> {
        if self.inner.session.state() != SessionState::Ready {
            return Ok(false);
        }
        if !self.inner.session.should_log(level) {
            return Ok(false);
        }

        let params = LoggingMessageParams {
            level,
            logger: logger.map(str::to_string),
            data: Some(data),
        };
        let notification = JsonRpcNotification::new(methods::MESSAGE)
            .with_params(serde_json::to_value(params)?);
        self.inner.transport.write_notification(&notification).await?;
        Ok(true)
    }

    /// Emit `notifications/tools/list_changed`.
    pub async fn notify_tools_list_changed(&self) -> Result<bool> {
        self.notify_simple(methods::TOOLS_LIST_CHANGED).await
    }

    /// Emit `notifications/resources/list_changed`.
    pub async fn notify_resources_list_changed(&self) -> Result<bool> {
        self.notify_simple(methods::RESOURCES_LIST_CHANGED).await
    }

    /// Emit `notifications/resources/updated` for a subscribed URI.
    pub async fn notify_resource_updated(&self, uri: &str) -> Result<bool> {
        if self.inner.session.state() != SessionState::Ready {
            return Ok(false);
        }
        if !self.inner.session.subscriptions().iter().any(|s| s == uri) {
            return Ok(false);
        }
        let notification = JsonRpcNotification::new(methods::RESOURCE_UPDATED)
            .with_params(serde_json::json!({ "uri": uri }));
        self.inner.transport.write_notification(&notification).await?;
        Ok(true)
    }

    /// Emit `notifications/prompts/list_changed`.
    pub async fn notify_prompts_list_changed(&self) -> Result<bool> {
        self.notify_simple(methods::PROMPTS_LIST_CHANGED).await
    }

    async fn notify_simple(&self, method: &str) -> Result<bool> {
        if self.inner.session.state() != SessionState::Ready {
            return Ok(false);
        }
        let notification = JsonRpcNotification::new(method);
        self.inner.transport.write_notification(&notification).await?;
        Ok(true)
    }
}

fn parse_params<T: DeserializeOwned>(params: Option<Value>) -> std::result::Result<T, JsonRpcError> {
    let value = params.unwrap_or_else(|| Value::Object(Default::default()));
    serde_json::from_value(value).map_err(|e| JsonRpcError::invalid_params(e.to_string()))
}

fn to_result<T: serde::Serialize>(value: &T) -> std::result::Result<Value, JsonRpcError> {
    serde_json::to_value(value).map_err(|e| JsonRpcError::internal_error(e.to_string()))
}

/// Map a session failure to its wire error.
fn session_error(method: &str, error: SessionError) -> JsonRpcError {
    match error {
        SessionError::InvalidState { actual, .. } => {
            JsonRpcError::invalid_session_state(method, actual)
        }
        SessionError::ToolNotFound(name) => JsonRpcError::tool_not_found(&name),
        SessionError::ResourceNotFound(uri) => JsonRpcError::resource_not_found(&uri),
        SessionError::PromptNotFound(name) => JsonRpcError::prompt_not_found(&name),
        SessionError::ConversationNotFound(id) => {
            JsonRpcError::invalid_params(format!("conversation not found: {}", id))
        }
        other => JsonRpcError::invalid_request(other.to_string()),
    }
}
