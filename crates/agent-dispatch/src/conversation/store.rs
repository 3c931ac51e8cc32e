//! Authoritative in-memory session state, mirrored to the SQL sink and a
//! JSON snapshot after every mutation.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::error::StoreError;
use super::feedback::{
    negative_feedback_guidance, FeedbackAnalytics, FeedbackEntry, FeedbackReceipt,
    FeedbackSubmission, MAX_FEEDBACK_CONTENT_CHARS,
};
use super::snapshot::{Snapshot, SnapshotFile};
use crate::capabilities::AgentType;
use crate::memory::Message;
use crate::memory_db::{ChatRecord, ChatSink, FeedbackRecord, MessageRecord};
use crate::utils::TextUtils;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMeta {
    pub user_id: Option<i64>,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub message_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub msgid: String,
    pub role: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_type: Option<AgentType>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub user_id: Option<i64>,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub message_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationStats {
    pub session_id: String,
    pub total_messages: usize,
    pub user_messages: usize,
    pub assistant_messages: usize,
}

/// One finished user/assistant exchange ready to persist.
#[derive(Debug, Clone)]
pub struct CompletedTurn {
    pub user_msg_id: Option<String>,
    pub assistant_msg_id: Option<String>,
    pub user_content: String,
    pub assistant_content: String,
    pub agent: AgentType,
}

pub struct ConversationStore {
    sessions: DashMap<String, SessionMeta>,
    conversations: DashMap<String, Vec<StoredMessage>>,
    feedback: DashMap<String, Vec<FeedbackEntry>>,
    sink: Option<Arc<dyn ChatSink>>,
    snapshot: SnapshotFile,
    flush_lock: Mutex<()>,
}

impl ConversationStore {
    /// Rebuild the maps from the snapshot; the sink only receives new writes.
    pub fn open(sink: Option<Arc<dyn ChatSink>>, snapshot: SnapshotFile) -> Self {
        let Snapshot {
            sessions,
            conversations,
            feedback,
        } = snapshot.load();

        let store = Self {
            sessions: sessions.into_iter().collect(),
            conversations: conversations.into_iter().collect(),
            feedback: feedback.into_iter().collect(),
            sink,
            snapshot,
            flush_lock: Mutex::new(()),
        };
        info!("Conversation store opened with {} session(s)", store.sessions.len());
        store
    }

    pub fn in_memory() -> Self {
        Self::open(None, SnapshotFile::disabled())
    }

    pub fn flush(&self) -> anyhow::Result<()> {
        let _guard = self
            .flush_lock
            .lock()
            .map_err(|_| anyhow::anyhow!("snapshot lock poisoned"))?;
        let snapshot = Snapshot {
            sessions: self.sessions.iter().map(|e| (e.key().clone(), e.value().clone())).collect(),
            conversations: self
                .conversations
                .iter()
                .map(|e| (e.key().clone(), e.value().clone()))
                .collect(),
            feedback: self.feedback.iter().map(|e| (e.key().clone(), e.value().clone())).collect(),
        };
        self.snapshot.save(&snapshot)?;
        debug!("Snapshot flushed ({} sessions)", snapshot.sessions.len());
        Ok(())
    }

    fn persist(&self) {
        if let Err(e) = self.flush() {
            error!("Snapshot flush failed, keeping in-memory state: {:#}", e);
        }
    }

    fn mirror<F>(&self, what: &str, write: F)
    where
        F: FnOnce(&dyn ChatSink) -> anyhow::Result<()>,
    {
        if let Some(sink) = &self.sink {
            if let Err(e) = write(sink.as_ref()) {
                warn!("Durable sink {} failed: {:#}", what, e);
            }
        }
    }

    pub fn contains_session(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    /// Create the session when absent. Returns whether it was created.
    pub fn ensure_session(&self, session_id: &str, user_id: Option<i64>, title: &str) -> bool {
        if self.sessions.contains_key(session_id) {
            return false;
        }

        let now = Utc::now();
        let meta = SessionMeta {
            user_id,
            title: title.to_string(),
            created_at: now,
            last_updated: now,
            message_count: 0,
        };
        let created = match self.sessions.entry(session_id.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(meta);
                true
            }
        };
        if !created {
            return false;
        }
        self.conversations.entry(session_id.to_string()).or_default();

        self.mirror("insert_chat", |sink| {
            sink.insert_chat(&ChatRecord {
                chatid: session_id.to_string(),
                userid: user_id,
                chatname: title.to_string(),
                created_at: now,
                last_updated: now,
            })
        });
        self.persist();
        info!("Created session {} titled {:?}", session_id, title);
        true
    }

    pub fn append_turn(&self, session_id: &str, turn: CompletedTurn) -> Result<(), StoreError> {
        let now = Utc::now();
        {
            let mut meta = self
                .sessions
                .get_mut(session_id)
                .ok_or_else(|| StoreError::SessionNotFound(session_id.to_string()))?;
            meta.message_count += 2;
            meta.last_updated = now;
        }

        let user = StoredMessage {
            msgid: turn.user_msg_id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            role: "user".to_string(),
            content: turn.user_content,
            agent_type: None,
            timestamp: now,
        };
        let assistant = StoredMessage {
            msgid: turn.assistant_msg_id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            role: "assistant".to_string(),
            content: turn.assistant_content,
            agent_type: Some(turn.agent),
            timestamp: now,
        };

        self.mirror("insert_turn", |sink| {
            let records: Vec<MessageRecord> = [&user, &assistant]
                .into_iter()
                .map(|message| MessageRecord {
                    msgid: message.msgid.clone(),
                    chatid: session_id.to_string(),
                    sendertype: message.role.clone(),
                    content: message.content.clone(),
                    agent_name: message.agent_type.map(|a| a.agent_name().to_string()),
                    timestamp: message.timestamp,
                })
                .collect();
            sink.insert_turn(session_id, &records, now)
        });

        self.conversations
            .entry(session_id.to_string())
            .or_default()
            .extend([user, assistant]);
        self.persist();
        Ok(())
    }

    /// Most recent `limit` messages in insertion order; `None` returns all.
    pub fn history(&self, session_id: &str, limit: Option<usize>) -> Vec<StoredMessage> {
        self.conversations
            .get(session_id)
            .map(|messages| {
                let start = limit.map_or(0, |n| messages.len().saturating_sub(n));
                messages[start..].to_vec()
            })
            .unwrap_or_default()
    }

    /// Role/content view used as graph context.
    pub fn history_messages(&self, session_id: &str) -> Vec<Message> {
        self.conversations
            .get(session_id)
            .map(|messages| {
                messages
                    .iter()
                    .map(|m| Message::new(m.role.clone(), m.content.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn message_count(&self, session_id: &str) -> usize {
        self.conversations.get(session_id).map_or(0, |m| m.len())
    }

    pub fn session(&self, session_id: &str) -> Option<SessionMeta> {
        self.sessions.get(session_id).map(|m| m.clone())
    }

    pub fn list_sessions(&self) -> Vec<SessionSummary> {
        let mut sessions: Vec<SessionSummary> = self
            .sessions
            .iter()
            .map(|entry| {
                let meta = entry.value();
                SessionSummary {
                    session_id: entry.key().clone(),
                    user_id: meta.user_id,
                    title: meta.title.clone(),
                    created_at: meta.created_at,
                    last_updated: meta.last_updated,
                    message_count: meta.message_count,
                }
            })
            .collect();
        sessions.sort_by(|a, b| {
            b.last_updated
                .cmp(&a.last_updated)
                .then_with(|| a.session_id.cmp(&b.session_id))
        });
        sessions
    }

    pub fn conversation_stats(&self, session_id: &str) -> ConversationStats {
        let (total, user, assistant) = self
            .conversations
            .get(session_id)
            .map(|messages| {
                let user = messages.iter().filter(|m| m.role == "user").count();
                let assistant = messages.iter().filter(|m| m.role == "assistant").count();
                (messages.len(), user, assistant)
            })
            .unwrap_or((0, 0, 0));
        ConversationStats {
            session_id: session_id.to_string(),
            total_messages: total,
            user_messages: user,
            assistant_messages: assistant,
        }
    }

    pub fn record_feedback(&self, submission: FeedbackSubmission) -> Result<FeedbackReceipt, StoreError> {
        let agent = AgentType::parse(&submission.agent_type)
            .ok_or_else(|| StoreError::UnknownAgentType(submission.agent_type.clone()))?;

        if !self.sessions.contains_key(&submission.session_id) {
            return Err(StoreError::SessionNotFound(submission.session_id));
        }

        let truncated = TextUtils::truncate_chars(&submission.message_content, MAX_FEEDBACK_CONTENT_CHARS);
        let present = self
            .conversations
            .get(&submission.session_id)
            .is_some_and(|messages| messages.iter().any(|m| m.content.starts_with(truncated)));
        if !present {
            return Err(StoreError::MessageNotFound(submission.session_id));
        }

        let now = Utc::now();
        let entry = FeedbackEntry {
            feedback_id: Uuid::new_v4().to_string(),
            session_id: submission.session_id.clone(),
            message_content: truncated.to_string(),
            feedback_type: submission.feedback_type,
            agent_type: agent,
            answer_mode: submission.answer_mode,
            timestamp: submission.timestamp.unwrap_or(now),
            message_length: submission.message_content.chars().count(),
            created_at: now,
        };

        self.mirror("insert_feedback", |sink| {
            sink.insert_feedback(&FeedbackRecord {
                chatid: entry.session_id.clone(),
                msg_content: entry.message_content.clone(),
                agent_name: agent.agent_name().to_string(),
                feedback_type: entry.feedback_type.as_str().to_string(),
                answer_mode: entry.answer_mode.as_str().to_string(),
                msg_length: entry.message_length as i64,
                created_at: now,
            })
            .map(|_| ())
        });

        let receipt = FeedbackReceipt {
            feedback_id: entry.feedback_id.clone(),
            status: "stored".to_string(),
            session_id: entry.session_id.clone(),
        };
        info!(
            "Stored {} feedback for session {}",
            entry.feedback_type.as_str(),
            entry.session_id
        );
        self.feedback
            .entry(submission.session_id)
            .or_default()
            .push(entry);
        self.persist();
        Ok(receipt)
    }

    pub fn feedback_analytics(&self) -> FeedbackAnalytics {
        let entries: Vec<FeedbackEntry> = self
            .feedback
            .iter()
            .flat_map(|e| e.value().clone())
            .collect();
        FeedbackAnalytics::from_entries(&entries)
    }

    /// Extra instruction for the next reply when the session was rated down recently.
    pub fn feedback_guidance(&self, session_id: &str) -> Option<String> {
        self.feedback
            .get(session_id)
            .and_then(|entries| negative_feedback_guidance(&entries))
    }

    /// Idempotent: deleting an unknown session succeeds.
    pub fn delete_session(&self, session_id: &str) -> bool {
        let existed = self.sessions.remove(session_id).is_some();
        self.conversations.remove(session_id);
        self.feedback.remove(session_id);

        self.mirror("delete_chat", |sink| sink.delete_chat(session_id).map(|_| ()));
        self.persist();
        if existed {
            info!("Deleted session {}", session_id);
        }
        existed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::AnswerMode;
    use crate::conversation::feedback::FeedbackType;
    use crate::memory_db::SessionDatabase;
    use tempfile::TempDir;

    fn turn(user: &str, assistant: &str, agent: AgentType) -> CompletedTurn {
        CompletedTurn {
            user_msg_id: None,
            assistant_msg_id: None,
            user_content: user.to_string(),
            assistant_content: assistant.to_string(),
            agent,
        }
    }

    fn submission(session: &str, content: &str, agent: &str, kind: FeedbackType) -> FeedbackSubmission {
        FeedbackSubmission {
            session_id: session.to_string(),
            message_content: content.to_string(),
            feedback_type: kind,
            agent_type: agent.to_string(),
            answer_mode: AnswerMode::Specific,
            timestamp: None,
        }
    }

    // ===== Sessions And Turns =====

    #[test]
    fn test_ensure_session_is_create_if_absent() {
        let store = ConversationStore::in_memory();
        assert!(store.ensure_session("s1", Some(1), "First"));
        assert!(!store.ensure_session("s1", Some(1), "Second"));
        assert_eq!(store.session("s1").unwrap().title, "First");
    }

    #[test]
    fn test_append_turn_counts_and_history() {
        let store = ConversationStore::in_memory();
        store.ensure_session("s1", None, "T");
        store.append_turn("s1", turn("q1", "a1", AgentType::General)).unwrap();
        store.append_turn("s1", turn("q2", "a2", AgentType::Coding)).unwrap();

        assert_eq!(store.session("s1").unwrap().message_count, 4);
        assert_eq!(store.message_count("s1"), 4);
        let last_two = store.history("s1", Some(2));
        assert_eq!(last_two[0].content, "q2");
        assert_eq!(last_two[1].agent_type, Some(AgentType::Coding));
        assert_eq!(store.history("s1", None).len(), 4);

        let stats = store.conversation_stats("s1");
        assert_eq!((stats.user_messages, stats.assistant_messages), (2, 2));
    }

    #[test]
    fn test_append_turn_requires_session() {
        let store = ConversationStore::in_memory();
        let err = store.append_turn("nope", turn("q", "a", AgentType::General)).unwrap_err();
        assert!(matches!(err, StoreError::SessionNotFound(_)));
    }

    #[test]
    fn test_list_sessions_newest_first() {
        let store = ConversationStore::in_memory();
        store.ensure_session("old", None, "Old");
        store.ensure_session("new", None, "New");
        store.append_turn("old", turn("q", "a", AgentType::General)).unwrap();

        let listed = store.list_sessions();
        assert_eq!(listed[0].session_id, "old");
        assert_eq!(listed[0].message_count, 2);
    }

    // ===== Feedback =====

    #[test]
    fn test_feedback_round_trip_for_coding() {
        let store = ConversationStore::in_memory();
        store.ensure_session("s1", None, "T");
        store
            .append_turn("s1", turn("sort in C", "```c\nint main() {}\n```", AgentType::Coding))
            .unwrap();

        let before = store
            .feedback_analytics()
            .feedback_by_agent
            .get("coding")
            .copied()
            .unwrap_or_default();
        store
            .record_feedback(submission("s1", "```c\nint main() {}\n```", "coding", FeedbackType::Positive))
            .unwrap();
        let after = store.feedback_analytics().feedback_by_agent["coding"];

        assert_eq!(after.positive, before.positive + 1);
        assert_eq!(after.negative, before.negative);
    }

    #[test]
    fn test_feedback_validation() {
        let store = ConversationStore::in_memory();
        store.ensure_session("s1", None, "T");
        store.append_turn("s1", turn("q", "answer", AgentType::General)).unwrap();

        assert!(matches!(
            store.record_feedback(submission("s1", "answer", "poetry", FeedbackType::Positive)),
            Err(StoreError::UnknownAgentType(_))
        ));
        assert!(matches!(
            store.record_feedback(submission("ghost", "answer", "general", FeedbackType::Positive)),
            Err(StoreError::SessionNotFound(_))
        ));
        assert!(matches!(
            store.record_feedback(submission("s1", "never said", "general", FeedbackType::Positive)),
            Err(StoreError::MessageNotFound(_))
        ));
    }

    #[test]
    fn test_feedback_truncates_long_messages() {
        let store = ConversationStore::in_memory();
        let long = "x".repeat(800);
        store.ensure_session("s1", None, "T");
        store.append_turn("s1", turn("q", &long, AgentType::General)).unwrap();
        store
            .record_feedback(submission("s1", &long, "general", FeedbackType::Negative))
            .unwrap();

        let recent = &store.feedback_analytics().recent_feedback[0];
        assert_eq!(recent.message_content.len(), 500);
        assert_eq!(recent.message_length, 800);
        assert!(store.feedback_guidance("s1").is_some());
    }

    // ===== Deletion And Durability =====

    #[test]
    fn test_delete_session_without_turns_succeeds() {
        let store = ConversationStore::in_memory();
        assert!(!store.delete_session("never-created"));
        store.ensure_session("s1", None, "T");
        assert!(store.delete_session("s1"));
        assert!(!store.delete_session("s1"));
        assert!(store.session("s1").is_none());
    }

    #[test]
    fn test_snapshot_survives_reopen_and_sink_mirrors() {
        let dir = TempDir::new().unwrap();
        let db = Arc::new(SessionDatabase::new(&dir.path().join("conversations.db")).unwrap());
        let snapshot = SnapshotFile::at(dir.path().join("conversations.json"));

        {
            let store = ConversationStore::open(Some(db.clone()), snapshot.clone());
            store.ensure_session("s1", Some(4), "Persisted");
            store.append_turn("s1", turn("q", "a", AgentType::Websearch)).unwrap();
        }
        assert_eq!(db.count_messages("s1").unwrap(), 2);

        let reopened = ConversationStore::open(Some(db.clone()), snapshot);
        assert_eq!(reopened.session("s1").unwrap().title, "Persisted");
        assert_eq!(reopened.message_count("s1"), 2);

        reopened.delete_session("s1");
        assert_eq!(db.count_messages("s1").unwrap(), 0);
    }

    #[test]
    fn test_rejected_turn_mirror_leaves_sink_consistent() {
        let dir = TempDir::new().unwrap();
        let db = Arc::new(SessionDatabase::new(&dir.path().join("conversations.db")).unwrap());
        let store = ConversationStore::open(
            Some(db.clone()),
            SnapshotFile::at(dir.path().join("conversations.json")),
        );
        store.ensure_session("s1", None, "T");

        let mut first = turn("q1", "a1", AgentType::General);
        first.assistant_msg_id = Some("reply-1".to_string());
        store.append_turn("s1", first).unwrap();

        let mut reused = turn("q2", "a2", AgentType::General);
        reused.assistant_msg_id = Some("reply-1".to_string());
        store.append_turn("s1", reused).unwrap();

        assert_eq!(db.count_messages("s1").unwrap(), 2);
        assert_eq!(store.message_count("s1"), 4);
    }
}
