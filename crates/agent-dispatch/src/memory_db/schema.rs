//! Row shapes written to the durable sink.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRecord {
    pub chatid: String,
    pub userid: Option<i64>,
    pub chatname: String,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    pub msgid: String,
    pub chatid: String,
    /// `user` or `assistant`.
    pub sendertype: String,
    pub content: String,
    /// Resolved to `agentid` by name; `None` for user messages.
    pub agent_name: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub chatid: String,
    pub msg_content: String,
    pub agent_name: String,
    pub feedback_type: String,
    pub answer_mode: String,
    pub msg_length: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SinkStats {
    pub chats: i64,
    pub messages: i64,
    pub feedback: i64,
    pub schema_version: i32,
}
