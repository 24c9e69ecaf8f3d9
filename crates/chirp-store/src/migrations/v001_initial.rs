//! v001 -- Initial schema creation.
//!
//! Creates the core tables for conversations, messages, messaging settings,
//! and notifications, plus their per-principal side tables.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Conversations
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS conversations (
    id                         TEXT PRIMARY KEY NOT NULL,  -- UUID v4
    is_group                   INTEGER NOT NULL DEFAULT 0, -- boolean 0/1
    direct_key                 TEXT UNIQUE,                -- sorted "a|b" pair; NULL for groups
    group_name                 TEXT,
    group_description          TEXT,
    created_by                 TEXT NOT NULL,
    last_message_id            TEXT,
    last_activity              TEXT NOT NULL,              -- ISO-8601 / RFC-3339
    is_message_request         INTEGER NOT NULL DEFAULT 0,
    requested_by               TEXT,
    request_status             TEXT NOT NULL DEFAULT 'accepted',
    disappearing_enabled       INTEGER NOT NULL DEFAULT 0,
    disappearing_duration_secs INTEGER NOT NULL DEFAULT 86400,
    created_at                 TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_conversations_last_activity
    ON conversations(last_activity DESC);
CREATE INDEX IF NOT EXISTS idx_conversations_request
    ON conversations(is_message_request, request_status);

CREATE TABLE IF NOT EXISTS conversation_participants (
    conversation_id TEXT NOT NULL,
    principal       TEXT NOT NULL,
    is_admin        INTEGER NOT NULL DEFAULT 0,
    joined_at       TEXT NOT NULL,

    PRIMARY KEY (conversation_id, principal),
    FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_participants_principal
    ON conversation_participants(principal);

-- Per-principal conversation state: muted / archived / pinned.
CREATE TABLE IF NOT EXISTS conversation_marks (
    conversation_id TEXT NOT NULL,
    principal       TEXT NOT NULL,
    kind            TEXT NOT NULL,              -- muted | archived | pinned
    marked_at       TEXT NOT NULL,
    until           TEXT,                       -- only meaningful for muted

    PRIMARY KEY (conversation_id, principal, kind),
    FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id                  TEXT PRIMARY KEY NOT NULL,  -- UUID v4
    conversation_id     TEXT NOT NULL,
    sender              TEXT NOT NULL,
    receiver            TEXT,                       -- other participant; direct only
    content             TEXT NOT NULL DEFAULT '',
    message_type        TEXT NOT NULL DEFAULT 'text',
    media_url           TEXT,
    media_kind          TEXT,
    media_thumbnail     TEXT,
    media_duration_secs REAL,
    media_size          INTEGER,
    media_filename      TEXT,
    shared_post_id      TEXT,
    reply_to            TEXT,
    forwarded_from      TEXT,
    edited              INTEGER NOT NULL DEFAULT 0,
    edited_at           TEXT,
    deleted             INTEGER NOT NULL DEFAULT 0,
    deleted_at          TEXT,
    is_ghost            INTEGER NOT NULL DEFAULT 0,
    expires_at          TEXT,
    created_at          TEXT NOT NULL,

    FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_messages_conversation_created
    ON messages(conversation_id, created_at DESC);
CREATE INDEX IF NOT EXISTS idx_messages_expires
    ON messages(expires_at) WHERE is_ghost = 1;

CREATE TABLE IF NOT EXISTS message_reactions (
    message_id TEXT NOT NULL,
    principal  TEXT NOT NULL,
    emoji      TEXT NOT NULL,
    created_at TEXT NOT NULL,

    PRIMARY KEY (message_id, principal, emoji),
    FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS message_reads (
    message_id TEXT NOT NULL,
    principal  TEXT NOT NULL,
    read_at    TEXT NOT NULL,

    PRIMARY KEY (message_id, principal),
    FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS message_deliveries (
    message_id   TEXT NOT NULL,
    principal    TEXT NOT NULL,
    delivered_at TEXT NOT NULL,

    PRIMARY KEY (message_id, principal),
    FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE
);

-- "Deleted for me": the message stays, these principals no longer see it.
CREATE TABLE IF NOT EXISTS message_hidden (
    message_id TEXT NOT NULL,
    principal  TEXT NOT NULL,
    hidden_at  TEXT NOT NULL,

    PRIMARY KEY (message_id, principal),
    FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS message_edits (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    message_id       TEXT NOT NULL,
    previous_content TEXT NOT NULL,
    edited_at        TEXT NOT NULL,

    FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE
);

-- ----------------------------------------------------------------
-- Messaging settings (one row per principal, created lazily)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messaging_settings (
    principal               TEXT PRIMARY KEY NOT NULL,
    who_can_message         TEXT NOT NULL DEFAULT 'everyone',
    allow_message_requests  INTEGER NOT NULL DEFAULT 1,
    read_receipts           INTEGER NOT NULL DEFAULT 1,
    show_online_status      INTEGER NOT NULL DEFAULT 1,
    show_typing_indicator   INTEGER NOT NULL DEFAULT 1,
    notify_messages         INTEGER NOT NULL DEFAULT 1,
    notify_message_requests INTEGER NOT NULL DEFAULT 1,
    notify_group_messages   INTEGER NOT NULL DEFAULT 1,
    notify_reactions        INTEGER NOT NULL DEFAULT 1,
    auto_delete_enabled     INTEGER NOT NULL DEFAULT 0,
    auto_delete_days        INTEGER NOT NULL DEFAULT 30,
    theme                   TEXT NOT NULL DEFAULT 'auto',
    chat_wallpaper          TEXT,
    updated_at              TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS blocked_users (
    principal  TEXT NOT NULL,               -- owner of the block list
    blocked    TEXT NOT NULL,
    blocked_at TEXT NOT NULL,
    reason     TEXT,

    PRIMARY KEY (principal, blocked)
);

CREATE TABLE IF NOT EXISTS muted_conversations (
    principal       TEXT NOT NULL,
    conversation_id TEXT NOT NULL,
    muted_at        TEXT NOT NULL,
    muted_until     TEXT,                   -- NULL = muted indefinitely

    PRIMARY KEY (principal, conversation_id)
);

-- ----------------------------------------------------------------
-- Notifications (append-only side effect of message fan-out)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS notifications (
    id              TEXT PRIMARY KEY NOT NULL,  -- UUID v4
    from_principal  TEXT NOT NULL,
    to_principal    TEXT NOT NULL,
    kind            TEXT NOT NULL DEFAULT 'message',
    message_id      TEXT,
    conversation_id TEXT,
    read            INTEGER NOT NULL DEFAULT 0,
    created_at      TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_notifications_to
    ON notifications(to_principal, created_at DESC);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
