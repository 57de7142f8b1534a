//! SQLite schema definition
//!
//! Two tables only: conversations and messages. Branch linkage lives on the
//! messages table (parent_id / branch_root_id), so a branch is just a
//! conversation whose first message points back into another conversation.

pub const SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

-- ============================================
-- CONVERSATIONS
-- ============================================

-- A conversation is either a top-level session or a branch
CREATE TABLE IF NOT EXISTS conversations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    created_at TEXT NOT NULL               -- RFC 3339, microsecond precision, UTC
);

-- ============================================
-- MESSAGES
-- ============================================

-- Append-only. Exactly one message per branch conversation (the branch
-- marker) carries parent_id / branch_root_id.
CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    conversation_id INTEGER NOT NULL,
    parent_id INTEGER,                     -- Source message in the parent conversation
    branch_root_id INTEGER,                -- Top-most ancestor message of the lineage
    role TEXT NOT NULL,                    -- 'user', 'assistant', 'system'
    content TEXT NOT NULL,
    selected_text TEXT,                    -- Excerpt that motivated the branch
    timestamp TEXT NOT NULL,               -- RFC 3339, microsecond precision, UTC
    FOREIGN KEY(conversation_id) REFERENCES conversations(id),
    FOREIGN KEY(parent_id) REFERENCES messages(id),
    FOREIGN KEY(branch_root_id) REFERENCES messages(id)
);

-- ============================================
-- INDEXES
-- ============================================

CREATE INDEX IF NOT EXISTS idx_conversations_created ON conversations(created_at DESC);
CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(conversation_id);
CREATE INDEX IF NOT EXISTS idx_messages_timestamp ON messages(timestamp);
CREATE INDEX IF NOT EXISTS idx_messages_parent ON messages(parent_id);
"#;
