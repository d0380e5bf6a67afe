//! Collaborator boundaries
//!
//! The core persists nothing itself; it talks to these traits. The
//! in-memory implementations here back the binary's default wiring and
//! the test suite. Analytics is fire-and-forget: a failing sink must
//! never fail the caller.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::conversation::{Conversation, ConversationStatus};
use crate::session::{Session, SessionState};
use crate::values::{ConversationId, SessionId};

/// Persistence failures.
#[derive(Debug, Clone, thiserror::Error)]
#[error("repository error: {message}")]
pub struct RepositoryError {
    pub message: String,
}

impl RepositoryError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Snapshot of a session as stored.
#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub id: SessionId,
    pub state: SessionState,
    pub client_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl SessionRecord {
    pub fn from_session(session: &Session) -> Self {
        Self {
            id: session.id(),
            state: session.state(),
            client_name: session.client_info().map(|c| c.name),
            created_at: session.created_at(),
            closed_at: session.closed_at(),
        }
    }
}

/// Snapshot of a conversation as stored.
#[derive(Debug, Clone)]
pub struct ConversationRecord {
    pub id: ConversationId,
    pub session_id: SessionId,
    pub model: String,
    pub status: ConversationStatus,
    pub message_count: usize,
    pub total_tokens: u64,
}

impl ConversationRecord {
    pub fn from_conversation(conversation: &Conversation) -> Self {
        Self {
            id: conversation.id(),
            session_id: conversation.session_id(),
            model: conversation.model().as_str().to_string(),
            status: conversation.status(),
            message_count: conversation.message_count(),
            total_tokens: conversation.total_tokens(),
        }
    }
}

/// Session snapshot store.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn save(&self, record: SessionRecord) -> Result<(), RepositoryError>;
    async fn find(&self, id: SessionId) -> Result<Option<SessionRecord>, RepositoryError>;
    async fn list(&self) -> Result<Vec<SessionRecord>, RepositoryError>;
}

/// Conversation snapshot store.
#[async_trait]
pub trait ConversationRepository: Send + Sync {
    async fn save(&self, record: ConversationRecord) -> Result<(), RepositoryError>;
    async fn find(&self, id: ConversationId)
        -> Result<Option<ConversationRecord>, RepositoryError>;
    async fn list_by_session(
        &self,
        session_id: SessionId,
    ) -> Result<Vec<ConversationRecord>, RepositoryError>;
}

/// Typed analytics events. Best-effort; sinks must not block callers.
#[derive(Debug, Clone)]
pub enum AnalyticsEvent {
    ToolCall {
        tool: String,
        duration_ms: u64,
        is_error: bool,
        at: DateTime<Utc>,
    },
    ApiRequest {
        model: String,
        input_tokens: u64,
        output_tokens: u64,
        duration_ms: u64,
        at: DateTime<Utc>,
    },
    SessionEvent {
        session_id: SessionId,
        kind: String,
        at: DateTime<Utc>,
    },
}

/// Fire-and-forget analytics ingestion.
pub trait AnalyticsSink: Send + Sync {
    fn record(&self, event: AnalyticsEvent);
}

/// Key-value cache with TTL.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Option<Value>;
    async fn set(&self, key: &str, value: Value, ttl: Duration);
    async fn delete(&self, key: &str);
}

// =============================================================================
// In-memory implementations
// =============================================================================

/// In-memory session store.
#[derive(Default)]
pub struct InMemorySessionRepository {
    records: RwLock<HashMap<SessionId, SessionRecord>>,
}

#[async_trait]
impl SessionRepository for InMemorySessionRepository {
    async fn save(&self, record: SessionRecord) -> Result<(), RepositoryError> {
        self.records.write().unwrap().insert(record.id, record);
        Ok(())
    }

    async fn find(&self, id: SessionId) -> Result<Option<SessionRecord>, RepositoryError> {
        Ok(self.records.read().unwrap().get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<SessionRecord>, RepositoryError> {
        Ok(self.records.read().unwrap().values().cloned().collect())
    }
}

/// In-memory conversation store.
#[derive(Default)]
pub struct InMemoryConversationRepository {
    records: RwLock<HashMap<ConversationId, ConversationRecord>>,
}

#[async_trait]
impl ConversationRepository for InMemoryConversationRepository {
    async fn save(&self, record: ConversationRecord) -> Result<(), RepositoryError> {
        self.records.write().unwrap().insert(record.id, record);
        Ok(())
    }

    async fn find(
        &self,
        id: ConversationId,
    ) -> Result<Option<ConversationRecord>, RepositoryError> {
        Ok(self.records.read().unwrap().get(&id).cloned())
    }

    async fn list_by_session(
        &self,
        session_id: SessionId,
    ) -> Result<Vec<ConversationRecord>, RepositoryError> {
        Ok(self
            .records
            .read()
            .unwrap()
            .values()
            .filter(|r| r.session_id == session_id)
            .cloned()
            .collect())
    }
}

/// Sink that drops every event.
#[derive(Debug, Default)]
pub struct NullAnalyticsSink;

impl AnalyticsSink for NullAnalyticsSink {
    fn record(&self, _event: AnalyticsEvent) {}
}

/// Sink that buffers events in memory; used in tests and as a default.
#[derive(Default)]
pub struct InMemoryAnalyticsSink {
    events: RwLock<Vec<AnalyticsEvent>>,
}

impl InMemoryAnalyticsSink {
    pub fn events(&self) -> Vec<AnalyticsEvent> {
        self.events.read().unwrap().clone()
    }
}

impl AnalyticsSink for InMemoryAnalyticsSink {
    fn record(&self, event: AnalyticsEvent) {
        self.events.write().unwrap().push(event);
    }
}

struct CacheEntry {
    value: Value,
    expires_at: Instant,
}

/// In-memory cache with lazy expiry.
#[derive(Default)]
pub struct InMemoryCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

#[async_trait]
impl Cache for InMemoryCache {
    async fn get(&self, key: &str) -> Option<Value> {
        let entries = self.entries.read().unwrap();
        let entry = entries.get(key)?;
        if entry.expires_at <= Instant::now() {
            return None;
        }
        Some(entry.value.clone())
    }

    async fn set(&self, key: &str, value: Value, ttl: Duration) {
        let entry = CacheEntry {
            value,
            expires_at: Instant::now() + ttl,
        };
        self.entries.write().unwrap().insert(key.to_string(), entry);
    }

    async fn delete(&self, key: &str) {
        self.entries.write().unwrap().remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ClientInfo;
    use crate::values::Model;
    use serde_json::json;

    #[tokio::test]
    async fn test_session_repository_round_trip() {
        let repo = InMemorySessionRepository::default();
        let session = Session::new();
        session
            .initialize(
                ClientInfo {
                    name: "c".to_string(),
                    version: "1".to_string(),
                },
                "2024-11-05",
            )
            .unwrap();

        repo.save(SessionRecord::from_session(&session)).await.unwrap();

        let found = repo.find(session.id()).await.unwrap().unwrap();
        assert_eq!(found.state, SessionState::Initializing);
        assert_eq!(found.client_name.as_deref(), Some("c"));
        assert_eq!(repo.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_conversation_repository_filters_by_session() {
        let repo = InMemoryConversationRepository::default();
        let session_id = SessionId::generate();
        let conv_a = Conversation::new(session_id, Model::Sonnet4);
        let conv_b = Conversation::new(SessionId::generate(), Model::Sonnet4);

        repo.save(ConversationRecord::from_conversation(&conv_a))
            .await
            .unwrap();
        repo.save(ConversationRecord::from_conversation(&conv_b))
            .await
            .unwrap();

        let mine = repo.list_by_session(session_id).await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].id, conv_a.id());
    }

    #[test]
    fn test_analytics_sink_buffers() {
        let sink = InMemoryAnalyticsSink::default();
        sink.record(AnalyticsEvent::ToolCall {
            tool: "echo".to_string(),
            duration_ms: 3,
            is_error: false,
            at: Utc::now(),
        });
        assert_eq!(sink.events().len(), 1);
    }

    #[tokio::test]
    async fn test_cache_ttl() {
        let cache = InMemoryCache::default();
        cache
            .set("k", json!({"v": 1}), Duration::from_secs(60))
            .await;
        assert_eq!(cache.get("k").await.unwrap()["v"], 1);

        cache.set("gone", json!(2), Duration::from_nanos(1)).await;
        tokio::time::sleep(Duration::from_millis(2)).await;
        assert!(cache.get("gone").await.is_none());

        cache.delete("k").await;
        assert!(cache.get("k").await.is_none());
    }
}
