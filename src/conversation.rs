//! Conversation aggregate
//!
//! A multi-turn message log with sampling parameters, token accounting,
//! and a per-conversation binding of the tools exposed to the LLM.
//! All mutation goes through the conversation's mutex; the proxy holds
//! it only to append, never across an upstream call.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use crate::claude::{Usage, DEFAULT_MAX_TOKENS};
use crate::content::{ContentBlock, Message};
use crate::tool::Tool;
use crate::values::{
    ConversationId, Model, SessionId, SystemPrompt, MAX_TEXT_CONTENT_LEN,
};

/// Conversation lifecycle status. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationStatus {
    Active,
    Closed,
}

/// Failures raised by conversation operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConversationError {
    #[error("conversation is closed")]
    Closed,
    #[error("message content cannot be empty")]
    EmptyContent,
    #[error("text content exceeds maximum length")]
    ContentTooLong,
    #[error("maxTokens must be positive")]
    InvalidMaxTokens,
    #[error("temperature must be within [0, 2]")]
    InvalidTemperature,
    #[error("topP must be within (0, 1]")]
    InvalidTopP,
    #[error("tool already bound: {0}")]
    DuplicateTool(String),
}

#[derive(Debug)]
struct ConversationInner {
    status: ConversationStatus,
    system_prompt: Option<SystemPrompt>,
    messages: Vec<Message>,
    max_tokens: u32,
    temperature: f64,
    top_p: f64,
    top_k: u32,
    stop_sequences: Vec<String>,
    total_tokens: u64,
    tools: HashMap<String, Arc<Tool>>,
    metadata: HashMap<String, String>,
    closed_at: Option<DateTime<Utc>>,
}

/// A conversation owned by a session.
///
/// Holds the owner's id but no back-reference; callers that need the
/// session pass it by handle.
#[derive(Debug)]
pub struct Conversation {
    id: ConversationId,
    session_id: SessionId,
    model: Model,
    created_at: DateTime<Utc>,
    inner: Mutex<ConversationInner>,
}

impl Conversation {
    pub fn new(session_id: SessionId, model: Model) -> Self {
        Self {
            id: ConversationId::generate(),
            session_id,
            model,
            created_at: Utc::now(),
            inner: Mutex::new(ConversationInner {
                status: ConversationStatus::Active,
                system_prompt: None,
                messages: Vec::new(),
                max_tokens: DEFAULT_MAX_TOKENS,
                temperature: 1.0,
                top_p: 1.0,
                top_k: 0,
                stop_sequences: Vec::new(),
                total_tokens: 0,
                tools: HashMap::new(),
                metadata: HashMap::new(),
                closed_at: None,
            }),
        }
    }

    pub fn id(&self) -> ConversationId {
        self.id
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn model(&self) -> Model {
        self.model
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn status(&self) -> ConversationStatus {
        self.inner.lock().unwrap().status
    }

    /// Append a message. Order of successful returns is the order of the
    /// message log.
    pub fn add_message(&self, message: Message) -> Result<(), ConversationError> {
        if message.content.is_empty() {
            return Err(ConversationError::EmptyContent);
        }
        for block in &message.content {
            if let ContentBlock::Text { text } = block {
                if text.chars().count() > MAX_TEXT_CONTENT_LEN {
                    return Err(ConversationError::ContentTooLong);
                }
            }
        }

        let mut inner = self.inner.lock().unwrap();
        if inner.status != ConversationStatus::Active {
            return Err(ConversationError::Closed);
        }
        inner.messages.push(message);
        Ok(())
    }

    /// Snapshot of the message log.
    pub fn messages(&self) -> Vec<Message> {
        self.inner.lock().unwrap().messages.clone()
    }

    pub fn message_count(&self) -> usize {
        self.inner.lock().unwrap().messages.len()
    }

    pub fn set_system_prompt(&self, prompt: SystemPrompt) -> Result<(), ConversationError> {
        let mut inner = self.active_inner()?;
        inner.system_prompt = Some(prompt);
        Ok(())
    }

    pub fn system_prompt(&self) -> Option<SystemPrompt> {
        self.inner.lock().unwrap().system_prompt.clone()
    }

    pub fn set_max_tokens(&self, max_tokens: u32) -> Result<(), ConversationError> {
        if max_tokens == 0 {
            return Err(ConversationError::InvalidMaxTokens);
        }
        let mut inner = self.active_inner()?;
        inner.max_tokens = max_tokens;
        Ok(())
    }

    pub fn max_tokens(&self) -> u32 {
        self.inner.lock().unwrap().max_tokens
    }

    pub fn set_temperature(&self, temperature: f64) -> Result<(), ConversationError> {
        if !(0.0..=2.0).contains(&temperature) {
            return Err(ConversationError::InvalidTemperature);
        }
        let mut inner = self.active_inner()?;
        inner.temperature = temperature;
        Ok(())
    }

    pub fn temperature(&self) -> f64 {
        self.inner.lock().unwrap().temperature
    }

    pub fn set_top_p(&self, top_p: f64) -> Result<(), ConversationError> {
        if !(top_p > 0.0 && top_p <= 1.0) {
            return Err(ConversationError::InvalidTopP);
        }
        let mut inner = self.active_inner()?;
        inner.top_p = top_p;
        Ok(())
    }

    pub fn top_p(&self) -> f64 {
        self.inner.lock().unwrap().top_p
    }

    pub fn set_top_k(&self, top_k: u32) -> Result<(), ConversationError> {
        let mut inner = self.active_inner()?;
        inner.top_k = top_k;
        Ok(())
    }

    pub fn top_k(&self) -> u32 {
        self.inner.lock().unwrap().top_k
    }

    pub fn set_stop_sequences(&self, sequences: Vec<String>) -> Result<(), ConversationError> {
        let mut inner = self.active_inner()?;
        inner.stop_sequences = sequences;
        Ok(())
    }

    pub fn stop_sequences(&self) -> Vec<String> {
        self.inner.lock().unwrap().stop_sequences.clone()
    }

    /// Bind a session tool to this conversation, exposing it to the LLM.
    pub fn register_tool(&self, tool: Arc<Tool>) -> Result<(), ConversationError> {
        let mut inner = self.active_inner()?;
        let name = tool.name().as_str().to_string();
        if inner.tools.contains_key(&name) {
            return Err(ConversationError::DuplicateTool(name));
        }
        inner.tools.insert(name, tool);
        Ok(())
    }

    pub fn tool(&self, name: &str) -> Option<Arc<Tool>> {
        self.inner.lock().unwrap().tools.get(name).cloned()
    }

    /// Snapshot of the bound tools.
    pub fn tools(&self) -> Vec<Arc<Tool>> {
        self.inner.lock().unwrap().tools.values().cloned().collect()
    }

    pub fn set_metadata(&self, key: impl Into<String>, value: impl Into<String>) {
        let mut inner = self.inner.lock().unwrap();
        inner.metadata.insert(key.into(), value.into());
    }

    pub fn metadata(&self) -> HashMap<String, String> {
        self.inner.lock().unwrap().metadata.clone()
    }

    /// Record upstream usage. `total_tokens` grows monotonically.
    pub fn record_usage(&self, usage: &Usage) {
        let mut inner = self.inner.lock().unwrap();
        inner.total_tokens += usage.input_tokens + usage.output_tokens;
    }

    pub fn total_tokens(&self) -> u64 {
        self.inner.lock().unwrap().total_tokens
    }

    /// Close the conversation. A second close fails; message history is
    /// preserved.
    pub fn close(&self) -> Result<(), ConversationError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.status == ConversationStatus::Closed {
            return Err(ConversationError::Closed);
        }
        inner.status = ConversationStatus::Closed;
        inner.closed_at = Some(Utc::now());
        Ok(())
    }

    pub fn closed_at(&self) -> Option<DateTime<Utc>> {
        self.inner.lock().unwrap().closed_at
    }

    fn active_inner(&self) -> Result<std::sync::MutexGuard<'_, ConversationInner>, ConversationError> {
        let inner = self.inner.lock().unwrap();
        if inner.status != ConversationStatus::Active {
            return Err(ConversationError::Closed);
        }
        Ok(inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::CallToolResult;
    use crate::tool::ToolBuilder;
    use crate::values::Role;

    fn conversation() -> Conversation {
        Conversation::new(SessionId::generate(), Model::Sonnet4)
    }

    #[test]
    fn test_new_conversation_is_active() {
        let conv = conversation();
        assert_eq!(conv.status(), ConversationStatus::Active);
        assert_eq!(conv.message_count(), 0);
        assert_eq!(conv.total_tokens(), 0);
        assert!(conv.closed_at().is_none());
    }

    #[test]
    fn test_add_message_preserves_order() {
        let conv = conversation();
        conv.add_message(Message::user_text("one")).unwrap();
        conv.add_message(Message::assistant_text("two")).unwrap();
        conv.add_message(Message::user_text("three")).unwrap();

        let messages = conv.messages();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(crate::content::extract_text(&messages[2].content), "three");
    }

    #[test]
    fn test_add_empty_message_fails() {
        let conv = conversation();
        let err = conv
            .add_message(Message::new(Role::User, vec![]))
            .unwrap_err();
        assert_eq!(err, ConversationError::EmptyContent);
    }

    #[test]
    fn test_add_message_after_close_fails() {
        let conv = conversation();
        conv.add_message(Message::user_text("hi")).unwrap();
        conv.close().unwrap();

        let err = conv.add_message(Message::user_text("late")).unwrap_err();
        assert_eq!(err, ConversationError::Closed);
        // History preserved
        assert_eq!(conv.message_count(), 1);
    }

    #[test]
    fn test_close_is_idempotent_failing() {
        let conv = conversation();
        conv.close().unwrap();
        assert!(conv.closed_at().is_some());
        assert_eq!(conv.close().unwrap_err(), ConversationError::Closed);
    }

    #[test]
    fn test_sampling_bounds() {
        let conv = conversation();
        assert!(conv.set_max_tokens(0).is_err());
        assert!(conv.set_max_tokens(1024).is_ok());
        assert_eq!(conv.max_tokens(), 1024);

        assert!(conv.set_temperature(-0.1).is_err());
        assert!(conv.set_temperature(2.1).is_err());
        assert!(conv.set_temperature(0.7).is_ok());

        assert!(conv.set_top_p(0.0).is_err());
        assert!(conv.set_top_p(1.1).is_err());
        assert!(conv.set_top_p(0.9).is_ok());

        assert!(conv.set_top_k(40).is_ok());
        assert_eq!(conv.top_k(), 40);
    }

    #[test]
    fn test_setters_refused_after_close() {
        let conv = conversation();
        conv.close().unwrap();
        assert!(conv.set_max_tokens(10).is_err());
        assert!(conv.set_temperature(0.5).is_err());
        assert!(conv
            .set_system_prompt(SystemPrompt::new("x").unwrap())
            .is_err());
    }

    #[test]
    fn test_register_tool_rejects_duplicate() {
        let conv = conversation();
        let tool = Arc::new(
            ToolBuilder::new("echo")
                .raw_handler(|_| async { Ok(CallToolResult::text("ok")) })
                .unwrap(),
        );

        conv.register_tool(tool.clone()).unwrap();
        let err = conv.register_tool(tool).unwrap_err();
        assert_eq!(err, ConversationError::DuplicateTool("echo".to_string()));
        assert_eq!(conv.tools().len(), 1);
        assert!(conv.tool("echo").is_some());
    }

    #[test]
    fn test_token_accounting_is_monotonic() {
        let conv = conversation();
        conv.record_usage(&Usage {
            input_tokens: 10,
            output_tokens: 5,
        });
        conv.record_usage(&Usage {
            input_tokens: 7,
            output_tokens: 3,
        });
        assert_eq!(conv.total_tokens(), 25);
    }

    #[test]
    fn test_metadata() {
        let conv = conversation();
        conv.set_metadata("purpose", "test");
        assert_eq!(conv.metadata().get("purpose").map(String::as_str), Some("test"));
    }

    #[test]
    fn test_concurrent_appends_serialize() {
        let conv = Arc::new(conversation());
        let mut handles = Vec::new();
        for i in 0..8 {
            let conv = conv.clone();
            handles.push(std::thread::spawn(move || {
                conv.add_message(Message::user_text(format!("m{}", i)))
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(conv.message_count(), 8);
    }
}
