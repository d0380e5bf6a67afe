//! Session aggregate
//!
//! Tracks the lifecycle of one MCP connection and owns the registries of
//! tools, resources, prompts, and conversations. The state machine is
//! monotonic:
//!
//! ```text
//! Created ──initialize──▶ Initializing ──mark_ready──▶ Ready ──close──▶ Closed
//! ```
//!
//! Feature operations are admitted only while `Ready`. Every transition
//! and registry mutation is atomic under the session's lock; reads
//! return snapshots so callers never observe mutation mid-iteration.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};

use crate::conversation::Conversation;
use crate::prompt::Prompt;
use crate::protocol::{LogLevel, ServerCapabilities, ServerInfo, PROTOCOL_VERSION};
use crate::resource::Resource;
use crate::tool::Tool;
use crate::values::{ConversationId, SessionId};

/// Session lifecycle state. Transitions never go backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Freshly created; only `initialize` (and `ping`/`shutdown`) are legal.
    Created,
    /// Initialize answered; waiting for `notifications/initialized`.
    Initializing,
    /// Normal operation.
    Ready,
    /// Terminal.
    Closed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionState::Created => "Created",
            SessionState::Initializing => "Initializing",
            SessionState::Ready => "Ready",
            SessionState::Closed => "Closed",
        };
        f.write_str(s)
    }
}

/// Client identity captured during initialize.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

/// Failures raised by session operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("session already initialized")]
    AlreadyInitialized,
    #[error("client name cannot be empty")]
    EmptyClientName,
    #[error("operation requires state {expected}, session is {actual}")]
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },
    #[error("session is closed")]
    Closed,
    #[error("duplicate tool: {0}")]
    DuplicateTool(String),
    #[error("duplicate resource: {0}")]
    DuplicateResource(String),
    #[error("duplicate prompt: {0}")]
    DuplicatePrompt(String),
    #[error("duplicate conversation: {0}")]
    DuplicateConversation(String),
    #[error("conversation belongs to another session")]
    ForeignConversation,
    #[error("tool not found: {0}")]
    ToolNotFound(String),
    #[error("resource not found: {0}")]
    ResourceNotFound(String),
    #[error("prompt not found: {0}")]
    PromptNotFound(String),
    #[error("conversation not found: {0}")]
    ConversationNotFound(String),
    #[error("already subscribed: {0}")]
    AlreadySubscribed(String),
    #[error("not subscribed: {0}")]
    NotSubscribed(String),
}

#[derive(Debug)]
struct SessionInner {
    state: SessionState,
    protocol_version: String,
    client_info: Option<ClientInfo>,
    tools: HashMap<String, Arc<Tool>>,
    resources: HashMap<String, Arc<Resource>>,
    prompts: HashMap<String, Arc<Prompt>>,
    conversations: HashMap<ConversationId, Arc<Conversation>>,
    subscriptions: HashSet<String>,
    min_log_level: LogLevel,
    closed_at: Option<DateTime<Utc>>,
}

/// The aggregate root for one MCP connection.
pub struct Session {
    id: SessionId,
    created_at: DateTime<Utc>,
    capabilities: ServerCapabilities,
    server_info: ServerInfo,
    inner: RwLock<SessionInner>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    /// Create a session in the `Created` state with the fixed capability
    /// set.
    pub fn new() -> Self {
        Self {
            id: SessionId::generate(),
            created_at: Utc::now(),
            capabilities: ServerCapabilities::default(),
            server_info: ServerInfo::default(),
            inner: RwLock::new(SessionInner {
                state: SessionState::Created,
                protocol_version: PROTOCOL_VERSION.to_string(),
                client_info: None,
                tools: HashMap::new(),
                resources: HashMap::new(),
                prompts: HashMap::new(),
                conversations: HashMap::new(),
                subscriptions: HashSet::new(),
                min_log_level: LogLevel::Debug,
                closed_at: None,
            }),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn state(&self) -> SessionState {
        self.inner.read().unwrap().state
    }

    pub fn capabilities(&self) -> ServerCapabilities {
        self.capabilities.clone()
    }

    pub fn server_info(&self) -> ServerInfo {
        self.server_info.clone()
    }

    pub fn protocol_version(&self) -> String {
        self.inner.read().unwrap().protocol_version.clone()
    }

    pub fn client_info(&self) -> Option<ClientInfo> {
        self.inner.read().unwrap().client_info.clone()
    }

    pub fn closed_at(&self) -> Option<DateTime<Utc>> {
        self.inner.read().unwrap().closed_at
    }

    /// `initialize`: Created -> Initializing. A second call fails.
    pub fn initialize(
        &self,
        client_info: ClientInfo,
        protocol_version: &str,
    ) -> Result<(), SessionError> {
        if client_info.name.trim().is_empty() {
            return Err(SessionError::EmptyClientName);
        }

        let mut inner = self.inner.write().unwrap();
        if inner.state != SessionState::Created {
            return Err(SessionError::AlreadyInitialized);
        }
        inner.client_info = Some(client_info);
        if !protocol_version.is_empty() {
            inner.protocol_version = protocol_version.to_string();
        }
        inner.state = SessionState::Initializing;
        Ok(())
    }

    /// `notifications/initialized`: Initializing -> Ready. The only legal
    /// trigger into `Ready`.
    pub fn mark_ready(&self) -> Result<(), SessionError> {
        let mut inner = self.inner.write().unwrap();
        if inner.state != SessionState::Initializing {
            return Err(SessionError::InvalidState {
                expected: "Initializing",
                actual: state_name(inner.state),
            });
        }
        inner.state = SessionState::Ready;
        Ok(())
    }

    /// Close the session. Terminal; a second close fails.
    pub fn close(&self) -> Result<(), SessionError> {
        let mut inner = self.inner.write().unwrap();
        if inner.state == SessionState::Closed {
            return Err(SessionError::Closed);
        }
        inner.state = SessionState::Closed;
        inner.closed_at = Some(Utc::now());
        Ok(())
    }

    // =========================================================================
    // Tool registry
    // =========================================================================

    pub fn register_tool(&self, tool: Tool) -> Result<(), SessionError> {
        let mut inner = self.ready_inner()?;
        let name = tool.name().as_str().to_string();
        if inner.tools.contains_key(&name) {
            return Err(SessionError::DuplicateTool(name));
        }
        inner.tools.insert(name, Arc::new(tool));
        Ok(())
    }

    pub fn unregister_tool(&self, name: &str) -> Result<(), SessionError> {
        let mut inner = self.ready_inner()?;
        if inner.tools.remove(name).is_none() {
            return Err(SessionError::ToolNotFound(name.to_string()));
        }
        Ok(())
    }

    pub fn tool(&self, name: &str) -> Result<Arc<Tool>, SessionError> {
        let inner = self.ready_read()?;
        inner
            .tools
            .get(name)
            .cloned()
            .ok_or_else(|| SessionError::ToolNotFound(name.to_string()))
    }

    /// Snapshot of all registered tools.
    pub fn tools(&self) -> Result<Vec<Arc<Tool>>, SessionError> {
        let inner = self.ready_read()?;
        Ok(inner.tools.values().cloned().collect())
    }

    // =========================================================================
    // Resource registry
    // =========================================================================

    pub fn register_resource(&self, resource: Resource) -> Result<(), SessionError> {
        let mut inner = self.ready_inner()?;
        let uri = resource.uri().as_str().to_string();
        if inner.resources.contains_key(&uri) {
            return Err(SessionError::DuplicateResource(uri));
        }
        inner.resources.insert(uri, Arc::new(resource));
        Ok(())
    }

    pub fn resource(&self, uri: &str) -> Result<Arc<Resource>, SessionError> {
        let inner = self.ready_read()?;
        inner
            .resources
            .get(uri)
            .cloned()
            .ok_or_else(|| SessionError::ResourceNotFound(uri.to_string()))
    }

    pub fn resources(&self) -> Result<Vec<Arc<Resource>>, SessionError> {
        let inner = self.ready_read()?;
        Ok(inner.resources.values().cloned().collect())
    }

    /// Subscribe to updates for a registered resource.
    pub fn subscribe(&self, uri: &str) -> Result<(), SessionError> {
        let mut inner = self.ready_inner()?;
        if !inner.resources.contains_key(uri) {
            return Err(SessionError::ResourceNotFound(uri.to_string()));
        }
        if !inner.subscriptions.insert(uri.to_string()) {
            return Err(SessionError::AlreadySubscribed(uri.to_string()));
        }
        Ok(())
    }

    pub fn unsubscribe(&self, uri: &str) -> Result<(), SessionError> {
        let mut inner = self.ready_inner()?;
        if !inner.subscriptions.remove(uri) {
            return Err(SessionError::NotSubscribed(uri.to_string()));
        }
        Ok(())
    }

    pub fn subscriptions(&self) -> Vec<String> {
        let inner = self.inner.read().unwrap();
        inner.subscriptions.iter().cloned().collect()
    }

    // =========================================================================
    // Prompt registry
    // =========================================================================

    pub fn register_prompt(&self, prompt: Prompt) -> Result<(), SessionError> {
        let mut inner = self.ready_inner()?;
        let name = prompt.name().as_str().to_string();
        if inner.prompts.contains_key(&name) {
            return Err(SessionError::DuplicatePrompt(name));
        }
        inner.prompts.insert(name, Arc::new(prompt));
        Ok(())
    }

    pub fn prompt(&self, name: &str) -> Result<Arc<Prompt>, SessionError> {
        let inner = self.ready_read()?;
        inner
            .prompts
            .get(name)
            .cloned()
            .ok_or_else(|| SessionError::PromptNotFound(name.to_string()))
    }

    pub fn prompts(&self) -> Result<Vec<Arc<Prompt>>, SessionError> {
        let inner = self.ready_read()?;
        Ok(inner.prompts.values().cloned().collect())
    }

    // =========================================================================
    // Conversations
    // =========================================================================

    /// Take ownership of a conversation. The conversation's session id
    /// must match this session.
    pub fn add_conversation(&self, conversation: Arc<Conversation>) -> Result<(), SessionError> {
        if conversation.session_id() != self.id {
            return Err(SessionError::ForeignConversation);
        }
        let mut inner = self.ready_inner()?;
        let id = conversation.id();
        if inner.conversations.contains_key(&id) {
            return Err(SessionError::DuplicateConversation(id.to_string()));
        }
        inner.conversations.insert(id, conversation);
        Ok(())
    }

    pub fn conversation(&self, id: ConversationId) -> Result<Arc<Conversation>, SessionError> {
        let inner = self.ready_read()?;
        inner
            .conversations
            .get(&id)
            .cloned()
            .ok_or_else(|| SessionError::ConversationNotFound(id.to_string()))
    }

    pub fn conversations(&self) -> Result<Vec<Arc<Conversation>>, SessionError> {
        let inner = self.ready_read()?;
        Ok(inner.conversations.values().cloned().collect())
    }

    // =========================================================================
    // Logging
    // =========================================================================

    pub fn set_log_level(&self, level: LogLevel) {
        self.inner.write().unwrap().min_log_level = level;
    }

    pub fn log_level(&self) -> LogLevel {
        self.inner.read().unwrap().min_log_level
    }

    /// Whether a `notifications/message` at `level` passes the filter set
    /// by `logging/setLevel`.
    pub fn should_log(&self, level: LogLevel) -> bool {
        level.severity() >= self.log_level().severity()
    }

    fn ready_inner(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, SessionInner>, SessionError> {
        let inner = self.inner.write().unwrap();
        if inner.state != SessionState::Ready {
            return Err(SessionError::InvalidState {
                expected: "Ready",
                actual: state_name(inner.state),
            });
        }
        Ok(inner)
    }

    fn ready_read(&self) -> Result<std::sync::RwLockReadGuard<'_, SessionInner>, SessionError> {
        let inner = self.inner.read().unwrap();
        if inner.state != SessionState::Ready {
            return Err(SessionError::InvalidState {
                expected: "Ready",
                actual: state_name(inner.state),
            });
        }
        Ok(inner)
    }
}

fn state_name(state: SessionState) -> &'static str {
    match state {
        SessionState::Created => "Created",
        SessionState::Initializing => "Initializing",
        SessionState::Ready => "Ready",
        SessionState::Closed => "Closed",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::CallToolResult;
    use crate::tool::ToolBuilder;
    use crate::values::{Model, ResourceUri, ToolName};

    fn client() -> ClientInfo {
        ClientInfo {
            name: "TestClient".to_string(),
            version: "1.0.0".to_string(),
        }
    }

    fn ready_session() -> Session {
        let session = Session::new();
        session.initialize(client(), "2024-11-05").unwrap();
        session.mark_ready().unwrap();
        session
    }

    fn test_tool(name: &str) -> Tool {
        ToolBuilder::new(name)
            .description("test tool")
            .raw_handler(|_| async { Ok(CallToolResult::text("ok")) })
            .unwrap()
    }

    #[test]
    fn test_new_session_state_and_defaults() {
        let session = Session::new();
        assert_eq!(session.state(), SessionState::Created);
        assert_eq!(session.protocol_version(), "2024-11-05");
        assert!(session.client_info().is_none());
    }

    #[test]
    fn test_ids_are_unique() {
        assert_ne!(Session::new().id(), Session::new().id());
    }

    #[test]
    fn test_initialize_transitions_and_stores_client() {
        let session = Session::new();
        session.initialize(client(), "2024-11-05").unwrap();
        assert_eq!(session.state(), SessionState::Initializing);
        assert_eq!(session.client_info().unwrap().name, "TestClient");
    }

    #[test]
    fn test_initialize_twice_fails() {
        let session = Session::new();
        session.initialize(client(), "2024-11-05").unwrap();
        assert_eq!(
            session.initialize(client(), "2024-11-05").unwrap_err(),
            SessionError::AlreadyInitialized
        );
    }

    #[test]
    fn test_initialize_empty_client_name_fails() {
        let session = Session::new();
        let info = ClientInfo {
            name: "  ".to_string(),
            version: "1.0".to_string(),
        };
        assert_eq!(
            session.initialize(info, "2024-11-05").unwrap_err(),
            SessionError::EmptyClientName
        );
        assert_eq!(session.state(), SessionState::Created);
    }

    #[test]
    fn test_mark_ready_requires_initializing() {
        let session = Session::new();
        assert!(session.mark_ready().is_err());
        assert_eq!(session.state(), SessionState::Created);

        session.initialize(client(), "2024-11-05").unwrap();
        session.mark_ready().unwrap();
        assert_eq!(session.state(), SessionState::Ready);

        // Monotonic: once Ready, never Initializing again
        assert!(session.mark_ready().is_err());
        assert_eq!(session.state(), SessionState::Ready);
    }

    #[test]
    fn test_close_is_terminal() {
        let session = ready_session();
        session.close().unwrap();
        assert_eq!(session.state(), SessionState::Closed);
        assert!(session.closed_at().is_some());
        assert_eq!(session.close().unwrap_err(), SessionError::Closed);

        // No feature ops after close
        assert!(session.register_tool(test_tool("late")).is_err());
        assert!(session.tools().is_err());
    }

    #[test]
    fn test_feature_ops_require_ready() {
        let session = Session::new();
        assert!(matches!(
            session.register_tool(test_tool("echo")).unwrap_err(),
            SessionError::InvalidState { .. }
        ));
        assert!(session.tools().is_err());
    }

    #[test]
    fn test_tool_registry() {
        let session = ready_session();
        session.register_tool(test_tool("echo")).unwrap();
        assert_eq!(session.tools().unwrap().len(), 1);
        assert_eq!(session.tool("echo").unwrap().name().as_str(), "echo");

        assert_eq!(
            session.register_tool(test_tool("echo")).unwrap_err(),
            SessionError::DuplicateTool("echo".to_string())
        );

        session.unregister_tool("echo").unwrap();
        assert!(session.tools().unwrap().is_empty());
        assert_eq!(
            session.unregister_tool("echo").unwrap_err(),
            SessionError::ToolNotFound("echo".to_string())
        );
    }

    #[test]
    fn test_concurrent_register_exactly_one_success() {
        let session = Arc::new(ready_session());
        let handles: Vec<_> = (0..10)
            .map(|_| {
                let session = session.clone();
                std::thread::spawn(move || session.register_tool(test_tool("echo")).is_ok())
            })
            .collect();

        let successes = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();

        assert_eq!(successes, 1);
        assert_eq!(session.tools().unwrap().len(), 1);
    }

    #[test]
    fn test_resource_registry_and_subscriptions() {
        let session = ready_session();
        let resource = Resource::new(ResourceUri::new("file:///x").unwrap(), "X");
        session.register_resource(resource.clone()).unwrap();

        assert!(session.resource("file:///x").is_ok());
        assert!(matches!(
            session.resource("file:///missing").unwrap_err(),
            SessionError::ResourceNotFound(_)
        ));
        assert!(matches!(
            session.register_resource(resource).unwrap_err(),
            SessionError::DuplicateResource(_)
        ));

        session.subscribe("file:///x").unwrap();
        assert!(matches!(
            session.subscribe("file:///x").unwrap_err(),
            SessionError::AlreadySubscribed(_)
        ));
        assert!(matches!(
            session.subscribe("file:///missing").unwrap_err(),
            SessionError::ResourceNotFound(_)
        ));

        session.unsubscribe("file:///x").unwrap();
        assert!(matches!(
            session.unsubscribe("file:///x").unwrap_err(),
            SessionError::NotSubscribed(_)
        ));
    }

    #[test]
    fn test_prompt_registry() {
        let session = ready_session();
        let prompt = Prompt::new(ToolName::new("p").unwrap());
        session.register_prompt(prompt.clone()).unwrap();
        assert!(session.prompt("p").is_ok());
        assert!(matches!(
            session.register_prompt(prompt).unwrap_err(),
            SessionError::DuplicatePrompt(_)
        ));
        assert!(matches!(
            session.prompt("missing").unwrap_err(),
            SessionError::PromptNotFound(_)
        ));
    }

    #[test]
    fn test_conversation_ownership() {
        let session = ready_session();
        let conv = Arc::new(Conversation::new(session.id(), Model::Sonnet4));
        let conv_id = conv.id();
        session.add_conversation(conv.clone()).unwrap();
        assert_eq!(session.conversation(conv_id).unwrap().id(), conv_id);
        assert_eq!(
            session.add_conversation(conv).unwrap_err(),
            SessionError::DuplicateConversation(conv_id.to_string())
        );

        let foreign = Arc::new(Conversation::new(SessionId::generate(), Model::Sonnet4));
        assert_eq!(
            session.add_conversation(foreign).unwrap_err(),
            SessionError::ForeignConversation
        );
    }

    #[test]
    fn test_capabilities_are_fixed() {
        let session = Session::new();
        let caps = session.capabilities();
        assert!(caps.tools.list_changed);
        assert!(caps.resources.subscribe);
        assert!(caps.resources.list_changed);
        assert!(caps.prompts.list_changed);
    }

    #[test]
    fn test_log_level_filter() {
        let session = Session::new();
        // Default Debug lets everything through
        assert!(session.should_log(LogLevel::Debug));

        session.set_log_level(LogLevel::Warning);
        assert!(!session.should_log(LogLevel::Info));
        assert!(session.should_log(LogLevel::Warning));
        assert!(session.should_log(LogLevel::Error));
    }
}
