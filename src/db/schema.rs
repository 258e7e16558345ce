//! SQLite schema for guild replication state.
//!
//! Every child table cascades from `guilds`, so leaving a guild is a single
//! delete. `messages` enforces a dense, duplicate-free index per guild via
//! `UNIQUE(guild_id, idx)` and store-wide uniqueness of the platform message id.

pub const SCHEMA: &str = "
    PRAGMA foreign_keys = ON;

    CREATE TABLE IF NOT EXISTS guilds (
        guild_id TEXT PRIMARY KEY,
        prefix TEXT NOT NULL DEFAULT '!'
    );

    CREATE TABLE IF NOT EXISTS guild_configs (
        guild_id TEXT PRIMARY KEY REFERENCES guilds (guild_id) ON DELETE CASCADE,
        enabled BOOLEAN NOT NULL DEFAULT FALSE,
        target_user_id TEXT,
        guild_message_count INTEGER NOT NULL DEFAULT 0,
        target_message_count INTEGER NOT NULL DEFAULT 0,
        probability REAL NOT NULL DEFAULT 0,
        auto_update_probability BOOLEAN NOT NULL DEFAULT TRUE,
        can_mention BOOLEAN NOT NULL DEFAULT FALSE,
        can_embed BOOLEAN NOT NULL DEFAULT FALSE,
        last_update INTEGER
    );

    CREATE TABLE IF NOT EXISTS channel_permissions (
        guild_id TEXT NOT NULL REFERENCES guilds (guild_id) ON DELETE CASCADE,
        channel_id TEXT NOT NULL,
        permissions INTEGER NOT NULL,
        PRIMARY KEY (guild_id, channel_id)
    );

    CREATE TABLE IF NOT EXISTS disabled_users (
        guild_id TEXT NOT NULL REFERENCES guilds (guild_id) ON DELETE CASCADE,
        user_id TEXT NOT NULL,
        PRIMARY KEY (guild_id, user_id)
    );

    CREATE TABLE IF NOT EXISTS disabled_substrings (
        guild_id TEXT NOT NULL REFERENCES guilds (guild_id) ON DELETE CASCADE,
        substring TEXT NOT NULL,
        PRIMARY KEY (guild_id, substring)
    );

    CREATE TABLE IF NOT EXISTS messages (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        guild_id TEXT NOT NULL REFERENCES guilds (guild_id) ON DELETE CASCADE,
        message_id TEXT NOT NULL UNIQUE,
        idx INTEGER NOT NULL,
        kind INTEGER NOT NULL,
        text TEXT NOT NULL,
        UNIQUE (guild_id, idx)
    );
    CREATE INDEX IF NOT EXISTS idx_messages_guild_kind ON messages (guild_id, kind);
";
