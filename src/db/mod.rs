use crate::config::Config;
use crate::model::{ChannelPermission, GuildConfig, MessageKind, StoredMessage};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Result, Row};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

pub mod schema;

#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

const CONFIG_COLUMNS: &str = "guild_id, enabled, target_user_id, guild_message_count, \
     target_message_count, probability, auto_update_probability, can_mention, can_embed, last_update";

impl Database {
    pub fn new(config: &Config) -> Result<Self> {
        Self::open(&config.database_url)
    }

    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // A panic while holding the lock leaves SQLite itself consistent.
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn execute_init(&self) -> Result<()> {
        info!("Database: Initializing schema...");
        self.conn().execute_batch(schema::SCHEMA)?;
        debug!("Database: Schema initialized successfully");
        Ok(())
    }

    /// Runs `f` on tokio's blocking pool.
    pub async fn run_blocking<F, T>(&self, f: F) -> crate::error::Result<T>
    where
        F: FnOnce(&Database) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.clone();
        let result = tokio::task::spawn_blocking(move || f(&db)).await?;
        Ok(result?)
    }

    // --- Guild lifecycle ---

    /// Registers a guild with default config and read/write permission on
    /// every known channel. Returns `false` if it already existed.
    pub fn ensure_guild(&self, guild_id: u64, default_prefix: &str, channels: &[u64]) -> Result<bool> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO guilds (guild_id, prefix) VALUES (?1, ?2)",
            (guild_id.to_string(), default_prefix),
        )?;
        if inserted == 0 {
            return Ok(false);
        }

        write_config(&tx, &GuildConfig::new(guild_id), true)?;
        for channel_id in channels {
            tx.execute(
                "INSERT OR IGNORE INTO channel_permissions (guild_id, channel_id, permissions)
                 VALUES (?1, ?2, ?3)",
                (
                    guild_id.to_string(),
                    channel_id.to_string(),
                    ChannelPermission::READ_WRITE.bits(),
                ),
            )?;
        }
        tx.commit()?;
        info!("Database: Registered guild {} with {} channels", guild_id, channels.len());
        Ok(true)
    }

    /// Deletes a guild and, by cascade, every row that belongs to it.
    pub fn remove_guild(&self, guild_id: u64) -> Result<usize> {
        let count = self
            .conn()
            .execute("DELETE FROM guilds WHERE guild_id = ?1", (guild_id.to_string(),))?;
        debug!("Database: Removed guild {} ({} rows)", guild_id, count);
        Ok(count)
    }

    pub fn prefix(&self, guild_id: u64) -> Result<Option<String>> {
        self.conn()
            .query_row(
                "SELECT prefix FROM guilds WHERE guild_id = ?1",
                (guild_id.to_string(),),
                |row| row.get(0),
            )
            .optional()
    }

    pub fn set_prefix(&self, guild_id: u64, prefix: &str) -> Result<usize> {
        self.conn().execute(
            "UPDATE guilds SET prefix = ?1 WHERE guild_id = ?2",
            (prefix, guild_id.to_string()),
        )
    }

    // --- Guild config ---

    pub fn guild_config(&self, guild_id: u64) -> Result<Option<GuildConfig>> {
        let sql = format!("SELECT {} FROM guild_configs WHERE guild_id = ?1", CONFIG_COLUMNS);
        self.conn()
            .query_row(&sql, (guild_id.to_string(),), read_config)
            .optional()
    }

    pub fn save_guild_config(&self, config: &GuildConfig) -> Result<usize> {
        write_config(&self.conn(), config, false)
    }

    // --- Channel permissions ---

    /// Guild-configured permission for a channel; unknown channels are
    /// recorded as read/write.
    pub fn channel_permission(&self, guild_id: u64, channel_id: u64) -> Result<ChannelPermission> {
        let conn = self.conn();
        let existing: Option<u8> = conn
            .query_row(
                "SELECT permissions FROM channel_permissions WHERE guild_id = ?1 AND channel_id = ?2",
                (guild_id.to_string(), channel_id.to_string()),
                |row| row.get(0),
            )
            .optional()?;

        match existing {
            Some(bits) => Ok(ChannelPermission::from_bits(bits)),
            None => {
                conn.execute(
                    "INSERT INTO channel_permissions (guild_id, channel_id, permissions) VALUES (?1, ?2, ?3)",
                    (
                        guild_id.to_string(),
                        channel_id.to_string(),
                        ChannelPermission::READ_WRITE.bits(),
                    ),
                )?;
                Ok(ChannelPermission::READ_WRITE)
            }
        }
    }

    pub fn set_channel_permission(
        &self,
        guild_id: u64,
        channel_id: u64,
        permission: ChannelPermission,
    ) -> Result<()> {
        self.conn().execute(
            "INSERT INTO channel_permissions (guild_id, channel_id, permissions) VALUES (?1, ?2, ?3)
             ON CONFLICT(guild_id, channel_id) DO UPDATE SET permissions = ?3",
            (guild_id.to_string(), channel_id.to_string(), permission.bits()),
        )?;
        Ok(())
    }

    // --- Exclusion lists ---

    pub fn add_disabled_user(&self, guild_id: u64, user_id: u64) -> Result<bool> {
        let inserted = self.conn().execute(
            "INSERT OR IGNORE INTO disabled_users (guild_id, user_id) VALUES (?1, ?2)",
            (guild_id.to_string(), user_id.to_string()),
        )?;
        Ok(inserted > 0)
    }

    pub fn remove_disabled_user(&self, guild_id: u64, user_id: u64) -> Result<bool> {
        let deleted = self.conn().execute(
            "DELETE FROM disabled_users WHERE guild_id = ?1 AND user_id = ?2",
            (guild_id.to_string(), user_id.to_string()),
        )?;
        Ok(deleted > 0)
    }

    pub fn is_user_disabled(&self, guild_id: u64, user_id: u64) -> Result<bool> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT 1 FROM disabled_users WHERE guild_id = ?1 AND user_id = ?2")?;
        stmt.exists((guild_id.to_string(), user_id.to_string()))
    }

    pub fn disabled_users(&self, guild_id: u64) -> Result<Vec<u64>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT user_id FROM disabled_users WHERE guild_id = ?1")?;
        let rows = stmt.query_map((guild_id.to_string(),), |row| id_column(row, 0))?;
        rows.collect()
    }

    pub fn add_disabled_substring(&self, guild_id: u64, substring: &str) -> Result<bool> {
        let inserted = self.conn().execute(
            "INSERT OR IGNORE INTO disabled_substrings (guild_id, substring) VALUES (?1, ?2)",
            (guild_id.to_string(), substring),
        )?;
        Ok(inserted > 0)
    }

    pub fn remove_disabled_substring(&self, guild_id: u64, substring: &str) -> Result<bool> {
        let deleted = self.conn().execute(
            "DELETE FROM disabled_substrings WHERE guild_id = ?1 AND substring = ?2",
            (guild_id.to_string(), substring),
        )?;
        Ok(deleted > 0)
    }

    pub fn disabled_substrings(&self, guild_id: u64) -> Result<Vec<String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT substring FROM disabled_substrings WHERE guild_id = ?1 ORDER BY rowid",
        )?;
        let rows = stmt.query_map((guild_id.to_string(),), |row| row.get(0))?;
        rows.collect()
    }

    // --- Messages ---

    /// Drops every stored message for the guild and persists the (already
    /// zeroed) config in the same transaction.
    pub fn reset_guild_messages(&self, config: &GuildConfig) -> Result<usize> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let deleted = tx.execute(
            "DELETE FROM messages WHERE guild_id = ?1",
            (config.guild_id.to_string(),),
        )?;
        write_config(&tx, config, false)?;
        tx.commit()?;
        debug!("Database: Cleared {} messages for guild {}", deleted, config.guild_id);
        Ok(deleted)
    }

    /// Inserts a batch of messages and persists the config atomically.
    pub fn commit_batch(&self, config: &GuildConfig, messages: &[StoredMessage]) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO messages (guild_id, message_id, idx, kind, text) VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for message in messages {
                stmt.execute(params![
                    message.guild_id.to_string(),
                    message.message_id.to_string(),
                    message.index,
                    message.kind.as_i64(),
                    message.text,
                ])?;
            }
        }
        write_config(&tx, config, false)?;
        tx.commit()?;
        debug!(
            "Database: Committed {} messages for guild {}",
            messages.len(),
            config.guild_id
        );
        Ok(())
    }

    pub fn message_at(&self, guild_id: u64, index: i64) -> Result<Option<StoredMessage>> {
        self.conn()
            .query_row(
                "SELECT guild_id, message_id, idx, kind, text FROM messages WHERE guild_id = ?1 AND idx = ?2",
                (guild_id.to_string(), index),
                read_message,
            )
            .optional()
    }

    pub fn indices_of_kind(&self, guild_id: u64, kind: MessageKind) -> Result<Vec<i64>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT idx FROM messages WHERE guild_id = ?1 AND kind = ?2 ORDER BY idx")?;
        let rows = stmt.query_map((guild_id.to_string(), kind.as_i64()), |row| row.get(0))?;
        rows.collect()
    }

    pub fn known_message_ids(&self, guild_id: u64) -> Result<HashSet<u64>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT message_id FROM messages WHERE guild_id = ?1")?;
        let rows = stmt.query_map((guild_id.to_string(),), |row| id_column(row, 0))?;
        rows.collect()
    }

    pub fn contains_message(&self, message_id: u64) -> Result<bool> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT 1 FROM messages WHERE message_id = ?1")?;
        stmt.exists((message_id.to_string(),))
    }

    pub fn message_count(&self, guild_id: u64) -> Result<i64> {
        self.conn().query_row(
            "SELECT COUNT(*) FROM messages WHERE guild_id = ?1",
            (guild_id.to_string(),),
            |row| row.get(0),
        )
    }

    pub fn guild_messages(&self, guild_id: u64) -> Result<Vec<StoredMessage>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT guild_id, message_id, idx, kind, text FROM messages WHERE guild_id = ?1 ORDER BY idx",
        )?;
        let rows = stmt.query_map((guild_id.to_string(),), read_message)?;
        rows.collect()
    }
}

fn write_config(conn: &Connection, config: &GuildConfig, insert: bool) -> Result<usize> {
    let sql = if insert {
        format!(
            "INSERT INTO guild_configs ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            CONFIG_COLUMNS
        )
    } else {
        "UPDATE guild_configs SET enabled = ?2, target_user_id = ?3, guild_message_count = ?4,
             target_message_count = ?5, probability = ?6, auto_update_probability = ?7,
             can_mention = ?8, can_embed = ?9, last_update = ?10
         WHERE guild_id = ?1"
            .to_string()
    };
    conn.execute(
        &sql,
        params![
            config.guild_id.to_string(),
            config.enabled,
            config.target_user_id.map(|id| id.to_string()),
            config.guild_message_count,
            config.target_message_count,
            config.probability,
            config.auto_update_probability,
            config.can_mention,
            config.can_embed,
            config.last_update.map(|t| t.timestamp_millis()),
        ],
    )
}

fn id_column(row: &Row<'_>, idx: usize) -> Result<u64> {
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn read_config(row: &Row<'_>) -> Result<GuildConfig> {
    let target: Option<String> = row.get(2)?;
    let target_user_id = match target {
        Some(_) => Some(id_column(row, 2)?),
        None => None,
    };
    let last_update: Option<i64> = row.get(9)?;

    Ok(GuildConfig {
        guild_id: id_column(row, 0)?,
        enabled: row.get(1)?,
        target_user_id,
        guild_message_count: row.get(3)?,
        target_message_count: row.get(4)?,
        probability: row.get(5)?,
        auto_update_probability: row.get(6)?,
        can_mention: row.get(7)?,
        can_embed: row.get(8)?,
        last_update: last_update.and_then(DateTime::<Utc>::from_timestamp_millis),
    })
}

fn read_message(row: &Row<'_>) -> Result<StoredMessage> {
    let kind: i64 = row.get(3)?;
    Ok(StoredMessage {
        guild_id: id_column(row, 0)?,
        message_id: id_column(row, 1)?,
        index: row.get(2)?,
        kind: MessageKind::from_i64(kind).unwrap_or(MessageKind::Raw),
        text: row.get(4)?,
    })
}
