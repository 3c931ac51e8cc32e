use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use tracing::debug;

use super::schema::{ChatRecord, FeedbackRecord, MessageRecord};
use super::SessionDatabase;

/// Relational mirror of the conversation store.
pub trait ChatSink: Send + Sync {
    /// No-op when the chat already exists.
    fn insert_chat(&self, chat: &ChatRecord) -> anyhow::Result<()>;
    fn insert_message(&self, message: &MessageRecord) -> anyhow::Result<()>;
    /// Writes the turn's messages and bumps `last_updated` in one transaction.
    fn insert_turn(
        &self,
        chatid: &str,
        messages: &[MessageRecord],
        last_updated: DateTime<Utc>,
    ) -> anyhow::Result<()>;
    /// Returns the new `feedbackid`.
    fn insert_feedback(&self, feedback: &FeedbackRecord) -> anyhow::Result<i64>;
    /// Removes the chat with its messages and feedback; returns chats deleted.
    fn delete_chat(&self, chatid: &str) -> anyhow::Result<usize>;
    fn count_messages(&self, chatid: &str) -> anyhow::Result<i64>;
}

impl ChatSink for SessionDatabase {
    fn insert_chat(&self, chat: &ChatRecord) -> anyhow::Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO chats (chatid, userid, chatname, created_at, last_updated)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                chat.chatid,
                chat.userid,
                chat.chatname,
                chat.created_at.to_rfc3339(),
                chat.last_updated.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn insert_message(&self, message: &MessageRecord) -> anyhow::Result<()> {
        let conn = self.conn()?;
        write_message(&conn, message)
    }

    fn insert_turn(
        &self,
        chatid: &str,
        messages: &[MessageRecord],
        last_updated: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        for message in messages {
            write_message(&tx, message)?;
        }
        tx.execute(
            "UPDATE chats SET last_updated = ?1 WHERE chatid = ?2",
            params![last_updated.to_rfc3339(), chatid],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn insert_feedback(&self, feedback: &FeedbackRecord) -> anyhow::Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO feedback
             (userid, chatid, msg_content, agentid, feedback_type, answer_mode, msg_length, created_at)
             VALUES (
                (SELECT userid FROM chats WHERE chatid = ?1),
                ?1, ?2,
                (SELECT agentid FROM agents WHERE agentname = ?3),
                ?4, ?5, ?6, ?7
             )",
            params![
                feedback.chatid,
                feedback.msg_content,
                feedback.agent_name,
                feedback.feedback_type,
                feedback.answer_mode,
                feedback.msg_length,
                feedback.created_at.to_rfc3339(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn delete_chat(&self, chatid: &str) -> anyhow::Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM feedback WHERE chatid = ?1", [chatid])?;
        tx.execute("DELETE FROM messages WHERE chatid = ?1", [chatid])?;
        let deleted = tx.execute("DELETE FROM chats WHERE chatid = ?1", [chatid])?;
        tx.commit()?;
        Ok(deleted)
    }

    fn count_messages(&self, chatid: &str) -> anyhow::Result<i64> {
        let conn = self.conn()?;
        Ok(conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE chatid = ?1",
            [chatid],
            |row| row.get(0),
        )?)
    }
}

fn write_message(conn: &Connection, message: &MessageRecord) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO messages (msgid, chatid, sendertype, content, agentid, timestamp)
         VALUES (?1, ?2, ?3, ?4, (SELECT agentid FROM agents WHERE agentname = ?5), ?6)",
        params![
            message.msgid,
            message.chatid,
            message.sendertype,
            message.content,
            message.agent_name,
            message.timestamp.to_rfc3339(),
        ],
    )?;
    debug!("Mirrored message {} for chat {}", message.msgid, message.chatid);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chat(id: &str) -> ChatRecord {
        let now = Utc::now();
        ChatRecord {
            chatid: id.to_string(),
            userid: Some(7),
            chatname: "Bubble Sort in C".to_string(),
            created_at: now,
            last_updated: now,
        }
    }

    fn message(id: &str, chatid: &str, agent: Option<&str>) -> MessageRecord {
        MessageRecord {
            msgid: id.to_string(),
            chatid: chatid.to_string(),
            sendertype: if agent.is_some() { "assistant" } else { "user" }.to_string(),
            content: format!("content of {}", id),
            agent_name: agent.map(str::to_string),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_insert_chat_is_idempotent() {
        let db = SessionDatabase::new_in_memory().unwrap();
        db.insert_chat(&chat("c1")).unwrap();
        db.insert_chat(&chat("c1")).unwrap();
        assert_eq!(db.stats().unwrap().chats, 1);
    }

    #[test]
    fn test_message_agent_resolved_by_name() {
        let db = SessionDatabase::new_in_memory().unwrap();
        db.insert_chat(&chat("c1")).unwrap();
        db.insert_message(&message("m1", "c1", None)).unwrap();
        db.insert_message(&message("m2", "c1", Some("CodingAgent"))).unwrap();
        assert_eq!(db.count_messages("c1").unwrap(), 2);

        let conn = db.conn().unwrap();
        let agentid: Option<i64> = conn
            .query_row("SELECT agentid FROM messages WHERE msgid = 'm2'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(agentid, Some(2));
    }

    #[test]
    fn test_feedback_resolves_user_and_agent() {
        let db = SessionDatabase::new_in_memory().unwrap();
        db.insert_chat(&chat("c1")).unwrap();
        let id = db
            .insert_feedback(&FeedbackRecord {
                chatid: "c1".into(),
                msg_content: "answer".into(),
                agent_name: "AnalyticsAgent".into(),
                feedback_type: "negative".into(),
                answer_mode: "detailed".into(),
                msg_length: 6,
                created_at: Utc::now(),
            })
            .unwrap();

        let conn = db.conn().unwrap();
        let (userid, agentid): (Option<i64>, Option<i64>) = conn
            .query_row(
                "SELECT userid, agentid FROM feedback WHERE feedbackid = ?1",
                [id],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(userid, Some(7));
        assert_eq!(agentid, Some(3));
    }

    #[test]
    fn test_delete_chat_removes_children() {
        let db = SessionDatabase::new_in_memory().unwrap();
        db.insert_chat(&chat("c1")).unwrap();
        db.insert_message(&message("m1", "c1", None)).unwrap();

        assert_eq!(db.delete_chat("c1").unwrap(), 1);
        assert_eq!(db.count_messages("c1").unwrap(), 0);
        assert_eq!(db.delete_chat("c1").unwrap(), 0);
    }

    #[test]
    fn test_insert_turn_commits_messages_and_timestamp() {
        let db = SessionDatabase::new_in_memory().unwrap();
        db.insert_chat(&chat("c1")).unwrap();
        let later = Utc::now() + chrono::Duration::minutes(5);

        db.insert_turn(
            "c1",
            &[message("m1", "c1", None), message("m2", "c1", Some("GeneralAgent"))],
            later,
        )
        .unwrap();

        assert_eq!(db.count_messages("c1").unwrap(), 2);
        let conn = db.conn().unwrap();
        let stored: String = conn
            .query_row("SELECT last_updated FROM chats WHERE chatid = 'c1'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(stored, later.to_rfc3339());
    }

    #[test]
    fn test_failed_turn_leaves_no_partial_rows() {
        let db = SessionDatabase::new_in_memory().unwrap();
        db.insert_chat(&chat("c1")).unwrap();
        db.insert_message(&message("taken", "c1", None)).unwrap();
        let before: String = {
            let conn = db.conn().unwrap();
            conn.query_row("SELECT last_updated FROM chats WHERE chatid = 'c1'", [], |r| r.get(0))
                .unwrap()
        };

        let result = db.insert_turn(
            "c1",
            &[message("fresh", "c1", None), message("taken", "c1", Some("CodingAgent"))],
            Utc::now() + chrono::Duration::minutes(5),
        );

        assert!(result.is_err());
        assert_eq!(db.count_messages("c1").unwrap(), 1);
        let conn = db.conn().unwrap();
        let after: String = conn
            .query_row("SELECT last_updated FROM chats WHERE chatid = 'c1'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(after, before);
    }

    #[test]
    fn test_message_for_unknown_chat_rejected() {
        let db = SessionDatabase::new_in_memory().unwrap();
        assert!(db.insert_message(&message("m1", "missing", None)).is_err());
    }
}
