//! Conversation and message storage with SQLite
//!
//! The store is append-only: conversations and messages are inserted, never
//! updated or deleted. Every public method takes the connection lock once, so
//! a single insert (with its invariant checks) is atomic with respect to other
//! callers sharing the same store.

mod schema;

use chrono::{DateTime, Duration, SecondsFormat, SubsecRound, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, Type, ValueRef};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

use crate::error::{Error, Result};

pub use schema::SCHEMA;

// ============================================
// ROW TYPES
// ============================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

impl ToSql for Role {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for Role {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: String| FromSqlError::Other(e.into()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Conversation {
    pub id: i64,
    pub created_at: DateTime<Utc>,
}

/// Conversation annotated for listing: its first message doubles as a summary
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversationSummary {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub first_message: Option<String>,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub id: i64,
    pub conversation_id: i64,
    pub parent_id: Option<i64>,
    pub branch_root_id: Option<i64>,
    pub role: Role,
    pub content: String,
    pub selected_text: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// True for the synthetic first message of a branch conversation
    pub fn is_branch_marker(&self) -> bool {
        self.parent_id.is_some()
    }

    /// Ordering key: timestamp first, id breaks ties
    pub fn position(&self) -> (DateTime<Utc>, i64) {
        (self.timestamp, self.id)
    }
}

/// Linkage carried by a branch-marker message
#[derive(Debug, Clone, PartialEq)]
pub struct BranchLink {
    pub parent_id: i64,
    pub branch_root_id: i64,
    pub selected_text: Option<String>,
}

// ============================================
// STORE
// ============================================

struct Inner {
    conn: Connection,
    /// Last timestamp handed out; keeps stamps strictly increasing
    last_stamp: Option<DateTime<Utc>>,
}

impl Inner {
    fn next_stamp(&mut self) -> DateTime<Utc> {
        // Stored with microsecond precision, so compare at that precision
        let mut now = Utc::now().trunc_subsecs(6);
        if let Some(last) = self.last_stamp {
            if now <= last {
                now = last + Duration::microseconds(1);
            }
        }
        self.last_stamp = Some(now);
        now
    }
}

pub struct ConversationStore {
    inner: Mutex<Inner>,
}

impl ConversationStore {
    pub fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;

        let last: Option<String> = conn.query_row(
            "SELECT MAX(stamp) FROM (
                 SELECT MAX(timestamp) AS stamp FROM messages
                 UNION ALL
                 SELECT MAX(created_at) AS stamp FROM conversations
             )",
            [],
            |row| row.get(0),
        )?;
        let last_stamp = last.as_deref().map(|s| parse_stamp(0, s)).transpose()?;

        Ok(Self {
            inner: Mutex::new(Inner { conn, last_stamp }),
        })
    }

    /// Close the underlying connection, surfacing any error SQLite reports
    pub fn close(self) -> Result<()> {
        let inner = self
            .inner
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        inner.conn.close().map_err(|(_, e)| Error::from(e))
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Each statement commits on its own, so a panicked holder leaves nothing half-written
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ============================================
    // CONVERSATIONS
    // ============================================

    pub fn create_conversation(&self) -> Result<i64> {
        let mut inner = self.lock();
        let stamp = format_stamp(inner.next_stamp());
        let id = inner.conn.query_row(
            "INSERT INTO conversations (created_at) VALUES (?) RETURNING id",
            params![stamp],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    pub fn get_conversation(&self, id: i64) -> Result<Conversation> {
        let inner = self.lock();
        find_conversation(&inner.conn, id)?.ok_or(Error::ConversationNotFound(id))
    }

    /// Most recent first, each annotated with its earliest message
    pub fn list_conversations(&self) -> Result<Vec<ConversationSummary>> {
        let inner = self.lock();
        let mut stmt = inner.conn.prepare(
            r#"SELECT c.id, c.created_at,
                      (SELECT content FROM messages
                       WHERE conversation_id = c.id
                       ORDER BY timestamp ASC, id ASC
                       LIMIT 1) AS first_message
               FROM conversations c
               ORDER BY c.created_at DESC, c.id DESC"#,
        )?;

        let rows = stmt.query_map([], |row| {
            let id: i64 = row.get(0)?;
            let created_at: String = row.get(1)?;
            Ok(ConversationSummary {
                id,
                created_at: parse_stamp(1, &created_at)?,
                first_message: row.get(2)?,
                title: format!("Chat {}", id),
            })
        })?;

        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    // ============================================
    // MESSAGES
    // ============================================

    /// Append a message. A `link` turns it into the conversation's branch marker.
    pub fn insert_message(
        &self,
        conversation_id: i64,
        role: Role,
        content: &str,
        link: Option<&BranchLink>,
    ) -> Result<i64> {
        let mut inner = self.lock();

        if find_conversation(&inner.conn, conversation_id)?.is_none() {
            return Err(Error::ConversationNotFound(conversation_id));
        }

        if let Some(link) = link {
            check_branch_link(&inner.conn, conversation_id, link)?;
        }

        let stamp = format_stamp(inner.next_stamp());
        let id = inner.conn.query_row(
            r#"INSERT INTO messages
               (conversation_id, parent_id, branch_root_id, role, content, selected_text, timestamp)
               VALUES (?, ?, ?, ?, ?, ?, ?)
               RETURNING id"#,
            params![
                conversation_id,
                link.map(|l| l.parent_id),
                link.map(|l| l.branch_root_id),
                role,
                content,
                link.and_then(|l| l.selected_text.as_deref()),
                stamp,
            ],
            |row| row.get(0),
        )?;

        Ok(id)
    }

    pub fn get_message(&self, id: i64) -> Result<Message> {
        self.find_message(id)?.ok_or(Error::MessageNotFound(id))
    }

    pub fn find_message(&self, id: i64) -> Result<Option<Message>> {
        let inner = self.lock();
        find_message(&inner.conn, id)
    }

    /// A conversation's own messages, oldest first
    pub fn list_messages(&self, conversation_id: i64) -> Result<Vec<Message>> {
        let inner = self.lock();

        if find_conversation(&inner.conn, conversation_id)?.is_none() {
            return Err(Error::ConversationNotFound(conversation_id));
        }

        let mut stmt = inner.conn.prepare(
            r#"SELECT id, conversation_id, parent_id, branch_root_id, role, content,
                      selected_text, timestamp
               FROM messages
               WHERE conversation_id = ?
               ORDER BY timestamp ASC, id ASC"#,
        )?;

        let rows = stmt.query_map(params![conversation_id], map_message)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// The branch-marker message of a conversation, if it is a branch
    pub fn branch_marker(&self, conversation_id: i64) -> Result<Option<Message>> {
        let inner = self.lock();
        find_branch_marker(&inner.conn, conversation_id)
    }

    /// Top-most ancestor of the lineage `message` belongs to.
    ///
    /// Only markers carry a root, so any other message inside a branch takes
    /// its conversation's marker root. Outside a branch the message is its own
    /// root.
    pub fn lineage_root(&self, message: &Message) -> Result<i64> {
        let inner = self.lock();
        lineage_root(&inner.conn, message)
    }
}

// ============================================
// HELPERS
// ============================================

fn check_branch_link(conn: &Connection, conversation_id: i64, link: &BranchLink) -> Result<()> {
    let parent =
        find_message(conn, link.parent_id)?.ok_or(Error::MessageNotFound(link.parent_id))?;

    if parent.conversation_id == conversation_id {
        return Err(Error::validation(format!(
            "branch parent {} must belong to a different conversation than {}",
            link.parent_id, conversation_id
        )));
    }

    if link.branch_root_id != link.parent_id
        && find_message(conn, link.branch_root_id)?.is_none()
    {
        return Err(Error::MessageNotFound(link.branch_root_id));
    }

    let expected_root = lineage_root(conn, &parent)?;
    if link.branch_root_id != expected_root {
        return Err(Error::validation(format!(
            "branch root {} does not match root {} of parent {}",
            link.branch_root_id, expected_root, link.parent_id
        )));
    }

    let existing: i64 = conn.query_row(
        "SELECT COUNT(*) FROM messages WHERE conversation_id = ?",
        params![conversation_id],
        |row| row.get(0),
    )?;
    if existing > 0 {
        return Err(Error::validation(format!(
            "branch marker must be the first message of conversation {}",
            conversation_id
        )));
    }

    Ok(())
}

fn lineage_root(conn: &Connection, message: &Message) -> Result<i64> {
    if let Some(root) = message.branch_root_id {
        return Ok(root);
    }
    let marker = find_branch_marker(conn, message.conversation_id)?;
    Ok(marker.and_then(|m| m.branch_root_id).unwrap_or(message.id))
}

fn find_branch_marker(conn: &Connection, conversation_id: i64) -> Result<Option<Message>> {
    conn.query_row(
        r#"SELECT id, conversation_id, parent_id, branch_root_id, role, content,
                  selected_text, timestamp
           FROM messages
           WHERE conversation_id = ? AND parent_id IS NOT NULL
           ORDER BY timestamp ASC, id ASC
           LIMIT 1"#,
        params![conversation_id],
        map_message,
    )
    .optional()
    .map_err(Into::into)
}

fn find_conversation(conn: &Connection, id: i64) -> Result<Option<Conversation>> {
    conn.query_row(
        "SELECT id, created_at FROM conversations WHERE id = ?",
        params![id],
        |row| {
            let created_at: String = row.get(1)?;
            Ok(Conversation {
                id: row.get(0)?,
                created_at: parse_stamp(1, &created_at)?,
            })
        },
    )
    .optional()
    .map_err(Into::into)
}

fn find_message(conn: &Connection, id: i64) -> Result<Option<Message>> {
    conn.query_row(
        r#"SELECT id, conversation_id, parent_id, branch_root_id, role, content,
                  selected_text, timestamp
           FROM messages
           WHERE id = ?"#,
        params![id],
        map_message,
    )
    .optional()
    .map_err(Into::into)
}

fn map_message(row: &rusqlite::Row) -> rusqlite::Result<Message> {
    let timestamp: String = row.get(7)?;
    Ok(Message {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        parent_id: row.get(2)?,
        branch_root_id: row.get(3)?,
        role: row.get(4)?,
        content: row.get(5)?,
        selected_text: row.get(6)?,
        timestamp: parse_stamp(7, &timestamp)?,
    })
}

fn format_stamp(stamp: DateTime<Utc>) -> String {
    stamp.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_stamp(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}
