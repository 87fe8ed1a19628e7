//! SQLite message log.
//!
//! One database file with five tables:
//! - `users` — participants and their display names
//! - `chats` — per-chat overrides set by configuration commands
//! - `messages` — the append-only log, keyed by `(chat_id, msg_id)`
//! - `hidden_members` — opt-outs from broadcast mentions
//! - `cooldowns` — last invocation of each expensive operation per user
//!
//! Timestamps are stored as Unix milliseconds so ordering is plain integer
//! comparison.

use async_trait::async_trait;
use chatterbox_core::chat::{AuthorStats, ChatActivity, ChatSettings, KindCount, User};
use chatterbox_core::cooldown::{CooldownDecision, CooldownTracker, OperationKind};
use chatterbox_core::error::StoreError;
use chatterbox_core::message::{ChatId, ChatMessage, LogRow, MessageKind, MsgId, UserId};
use chatterbox_core::store::{AuthorFilter, HistoryPage, MessageLog};
use chrono::{DateTime, Duration, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};

/// Columns selected for every `LogRow` query.
const ROW_COLUMNS: &str = r#"
    m.chat_id, m.msg_id, m.author_id, m.timestamp_ms, m.kind, m.text, m.photo_ref, m.reply_to,
    u.display_name AS author_name,
    p.author_id AS parent_author_id
"#;

const ROW_JOINS: &str = r#"
    FROM messages m
    LEFT JOIN users u ON u.user_id = m.author_id
    LEFT JOIN messages p ON p.chat_id = m.chat_id AND p.msg_id = m.reply_to
"#;

/// A production SQLite message log. Also tracks cooldowns durably.
pub struct SqliteLog {
    pool: SqlitePool,
}

impl SqliteLog {
    /// Open (or create) the database at `url` and run migrations.
    ///
    /// Pass `"sqlite::memory:"` for an ephemeral database (useful for tests).
    pub async fn new(url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| StoreError::Unavailable(format!("Invalid SQLite URL: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        // Every connection to :memory: is its own database.
        let in_memory = url.contains(":memory:");
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(4)
        };

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Unavailable(format!("Failed to open SQLite: {e}")))?;

        let log = Self { pool };
        log.run_migrations().await?;
        info!("SQLite message log initialized at {url}");
        Ok(log)
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        let statements = [
            (
                "users table",
                r#"
                CREATE TABLE IF NOT EXISTS users (
                    user_id      INTEGER PRIMARY KEY,
                    username     TEXT,
                    display_name TEXT NOT NULL
                )
                "#,
            ),
            (
                "chats table",
                r#"
                CREATE TABLE IF NOT EXISTS chats (
                    chat_id       INTEGER PRIMARY KEY,
                    system_prompt TEXT,
                    temperature   REAL,
                    model_name    TEXT
                )
                "#,
            ),
            (
                "messages table",
                r#"
                CREATE TABLE IF NOT EXISTS messages (
                    chat_id      INTEGER NOT NULL,
                    msg_id       INTEGER NOT NULL,
                    author_id    INTEGER NOT NULL,
                    timestamp_ms INTEGER NOT NULL,
                    kind         TEXT NOT NULL,
                    text         TEXT,
                    photo_ref    TEXT,
                    reply_to     INTEGER,
                    PRIMARY KEY (chat_id, msg_id)
                )
                "#,
            ),
            (
                "messages timeline index",
                "CREATE INDEX IF NOT EXISTS idx_messages_timeline ON messages(chat_id, timestamp_ms DESC, msg_id DESC)",
            ),
            (
                "messages author index",
                "CREATE INDEX IF NOT EXISTS idx_messages_author ON messages(chat_id, author_id)",
            ),
            (
                "hidden_members table",
                r#"
                CREATE TABLE IF NOT EXISTS hidden_members (
                    chat_id INTEGER NOT NULL,
                    user_id INTEGER NOT NULL,
                    PRIMARY KEY (chat_id, user_id)
                )
                "#,
            ),
            (
                "cooldowns table",
                r#"
                CREATE TABLE IF NOT EXISTS cooldowns (
                    user_id         INTEGER NOT NULL,
                    operation       TEXT NOT NULL,
                    last_invoked_at INTEGER NOT NULL,
                    PRIMARY KEY (user_id, operation)
                )
                "#,
            ),
        ];

        for (what, sql) in statements {
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::MigrationFailed(format!("{what}: {e}")))?;
        }

        debug!("SQLite migrations complete");
        Ok(())
    }

    fn query_failed(context: &str) -> impl Fn(sqlx::Error) -> StoreError + '_ {
        move |e| StoreError::QueryFailed(format!("{context}: {e}"))
    }

    fn from_millis(ms: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(ms).unwrap_or_default()
    }

    /// Parse a `LogRow` from a row selected with [`ROW_COLUMNS`].
    fn row_to_log_row(row: &sqlx::sqlite::SqliteRow) -> Result<LogRow, StoreError> {
        let col = |name: &str| {
            let name = name.to_string();
            move |e: sqlx::Error| StoreError::QueryFailed(format!("{name} column: {e}"))
        };

        let kind: String = row.try_get("kind").map_err(col("kind"))?;
        let kind = MessageKind::from_str(&kind).map_err(StoreError::QueryFailed)?;
        let timestamp_ms: i64 = row.try_get("timestamp_ms").map_err(col("timestamp_ms"))?;

        let message = ChatMessage {
            chat_id: row.try_get("chat_id").map_err(col("chat_id"))?,
            msg_id: row.try_get("msg_id").map_err(col("msg_id"))?,
            author_id: row.try_get("author_id").map_err(col("author_id"))?,
            timestamp: Self::from_millis(timestamp_ms),
            kind,
            text: row.try_get("text").map_err(col("text"))?,
            photo_ref: row.try_get("photo_ref").map_err(col("photo_ref"))?,
            reply_to: row.try_get("reply_to").map_err(col("reply_to"))?,
        };

        Ok(LogRow {
            message,
            author_name: row.try_get("author_name").map_err(col("author_name"))?,
            parent_author_id: row
                .try_get("parent_author_id")
                .map_err(col("parent_author_id"))?,
        })
    }

    /// Lower timestamp bound for period queries.
    fn since_millis(since: Option<DateTime<Utc>>) -> i64 {
        since.map_or(i64::MIN, |s| s.timestamp_millis())
    }

    fn row_to_author_stats(row: &sqlx::sqlite::SqliteRow) -> Result<AuthorStats, StoreError> {
        let count: i64 = row
            .try_get("message_count")
            .map_err(Self::query_failed("message_count column"))?;
        Ok(AuthorStats {
            user_id: row
                .try_get("author_id")
                .map_err(Self::query_failed("author_id column"))?,
            display_name: row
                .try_get("display_name")
                .map_err(Self::query_failed("display_name column"))?,
            message_count: count.max(0) as u64,
        })
    }

    fn row_to_user(row: &sqlx::sqlite::SqliteRow) -> Result<User, StoreError> {
        let last_op: Option<i64> = row.try_get("last_op").unwrap_or(None);
        Ok(User {
            user_id: row
                .try_get("user_id")
                .map_err(Self::query_failed("user_id column"))?,
            username: row
                .try_get("username")
                .map_err(Self::query_failed("username column"))?,
            display_name: row
                .try_get("display_name")
                .map_err(Self::query_failed("display_name column"))?,
            last_expensive_op_at: last_op.map(Self::from_millis),
        })
    }
}

#[async_trait]
impl MessageLog for SqliteLog {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn insert_message(&self, message: &ChatMessage) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO messages (chat_id, msg_id, author_id, timestamp_ms, kind, text, photo_ref, reply_to)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(chat_id, msg_id) DO NOTHING
            "#,
        )
        .bind(message.chat_id)
        .bind(message.msg_id)
        .bind(message.author_id)
        .bind(message.timestamp.timestamp_millis())
        .bind(message.kind.as_str())
        .bind(&message.text)
        .bind(&message.photo_ref)
        .bind(message.reply_to)
        .execute(&self.pool)
        .await
        .map_err(Self::query_failed("insert message"))?;

        let inserted = result.rows_affected() > 0;
        debug!(
            chat_id = message.chat_id,
            msg_id = message.msg_id,
            inserted,
            "Logged message"
        );
        Ok(inserted)
    }

    async fn upsert_user(&self, user: &User) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO users (user_id, username, display_name) VALUES (?, ?, ?)
            ON CONFLICT(user_id) DO UPDATE SET
                username = excluded.username,
                display_name = excluded.display_name
            "#,
        )
        .bind(user.user_id)
        .bind(&user.username)
        .bind(&user.display_name)
        .execute(&self.pool)
        .await
        .map_err(Self::query_failed("upsert user"))?;
        Ok(())
    }

    async fn get_user(&self, user_id: UserId) -> Result<Option<User>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT u.user_id, u.username, u.display_name,
                   (SELECT MAX(c.last_invoked_at) FROM cooldowns c WHERE c.user_id = u.user_id) AS last_op
            FROM users u WHERE u.user_id = ?
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Self::query_failed("get user"))?;

        row.as_ref().map(Self::row_to_user).transpose()
    }

    async fn get(&self, chat_id: ChatId, msg_id: MsgId) -> Result<Option<LogRow>, StoreError> {
        let sql = format!("SELECT {ROW_COLUMNS} {ROW_JOINS} WHERE m.chat_id = ? AND m.msg_id = ?");
        let row = sqlx::query(&sql)
            .bind(chat_id)
            .bind(msg_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Self::query_failed("get message"))?;

        row.as_ref().map(Self::row_to_log_row).transpose()
    }

    async fn recent(&self, page: &HistoryPage) -> Result<Vec<LogRow>, StoreError> {
        let (author_clause, author_id) = match page.author {
            AuthorFilter::Only(id) => ("m.author_id = ?", id),
            AuthorFilter::Except(id) => ("m.author_id != ?", id),
        };

        let mut sql = format!("SELECT {ROW_COLUMNS} {ROW_JOINS} WHERE m.chat_id = ? AND {author_clause}");
        if page.before.is_some() {
            sql.push_str(" AND (m.timestamp_ms < ? OR (m.timestamp_ms = ? AND m.msg_id < ?))");
        }
        if page.text_only {
            sql.push_str(" AND m.text IS NOT NULL AND TRIM(m.text) != ''");
        }
        sql.push_str(" ORDER BY m.timestamp_ms DESC, m.msg_id DESC LIMIT ?");

        let mut query = sqlx::query(&sql).bind(page.chat_id).bind(author_id);
        if let Some(cursor) = page.before {
            let ts = cursor.timestamp.timestamp_millis();
            query = query.bind(ts).bind(ts).bind(cursor.msg_id);
        }
        let rows = query
            .bind(page.limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(Self::query_failed("recent history"))?;

        rows.iter().map(Self::row_to_log_row).collect()
    }

    async fn chat_settings(&self, chat_id: ChatId) -> Result<Option<ChatSettings>, StoreError> {
        let row = sqlx::query(
            "SELECT system_prompt, temperature, model_name FROM chats WHERE chat_id = ?",
        )
        .bind(chat_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Self::query_failed("chat settings"))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let temperature: Option<f64> = row
            .try_get("temperature")
            .map_err(Self::query_failed("temperature column"))?;
        Ok(Some(ChatSettings {
            system_prompt: row
                .try_get("system_prompt")
                .map_err(Self::query_failed("system_prompt column"))?,
            temperature: temperature.map(|t| t as f32),
            model_name: row
                .try_get("model_name")
                .map_err(Self::query_failed("model_name column"))?,
        }))
    }

    async fn set_system_prompt(
        &self,
        chat_id: ChatId,
        prompt: Option<&str>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO chats (chat_id, system_prompt) VALUES (?, ?)
            ON CONFLICT(chat_id) DO UPDATE SET system_prompt = excluded.system_prompt
            "#,
        )
        .bind(chat_id)
        .bind(prompt)
        .execute(&self.pool)
        .await
        .map_err(Self::query_failed("set system prompt"))?;
        Ok(())
    }

    async fn set_temperature(&self, chat_id: ChatId, temperature: f32) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO chats (chat_id, temperature) VALUES (?, ?)
            ON CONFLICT(chat_id) DO UPDATE SET temperature = excluded.temperature
            "#,
        )
        .bind(chat_id)
        .bind(f64::from(temperature))
        .execute(&self.pool)
        .await
        .map_err(Self::query_failed("set temperature"))?;
        Ok(())
    }

    async fn set_model(&self, chat_id: ChatId, model: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO chats (chat_id, model_name) VALUES (?, ?)
            ON CONFLICT(chat_id) DO UPDATE SET model_name = excluded.model_name
            "#,
        )
        .bind(chat_id)
        .bind(model)
        .execute(&self.pool)
        .await
        .map_err(Self::query_failed("set model"))?;
        Ok(())
    }

    async fn toggle_visibility(
        &self,
        chat_id: ChatId,
        user_id: UserId,
    ) -> Result<bool, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(Self::query_failed("begin toggle"))?;

        let removed = sqlx::query("DELETE FROM hidden_members WHERE chat_id = ? AND user_id = ?")
            .bind(chat_id)
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(Self::query_failed("unhide member"))?
            .rows_affected()
            > 0;

        if !removed {
            sqlx::query("INSERT INTO hidden_members (chat_id, user_id) VALUES (?, ?)")
                .bind(chat_id)
                .bind(user_id)
                .execute(&mut *tx)
                .await
                .map_err(Self::query_failed("hide member"))?;
        }

        tx.commit()
            .await
            .map_err(Self::query_failed("commit toggle"))?;
        Ok(!removed)
    }

    async fn chat_members(&self, chat_id: ChatId) -> Result<Vec<User>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT u.user_id, u.username, u.display_name, NULL AS last_op
            FROM messages m
            JOIN users u ON u.user_id = m.author_id
            WHERE m.chat_id = ?
              AND NOT EXISTS (
                  SELECT 1 FROM hidden_members h
                  WHERE h.chat_id = m.chat_id AND h.user_id = m.author_id
              )
            ORDER BY u.user_id
            "#,
        )
        .bind(chat_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Self::query_failed("chat members"))?;

        rows.iter().map(Self::row_to_user).collect()
    }

    async fn top_authors(
        &self,
        chat_id: ChatId,
        limit: usize,
    ) -> Result<Vec<AuthorStats>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT m.author_id,
                   COALESCE(u.display_name, CAST(m.author_id AS TEXT)) AS display_name,
                   COUNT(*) AS message_count
            FROM messages m
            LEFT JOIN users u ON u.user_id = m.author_id
            WHERE m.chat_id = ? AND m.text IS NOT NULL AND TRIM(m.text) != ''
            GROUP BY m.author_id
            ORDER BY message_count DESC, m.author_id ASC
            LIMIT ?
            "#,
        )
        .bind(chat_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(Self::query_failed("top authors"))?;

        rows.iter().map(Self::row_to_author_stats).collect()
    }

    async fn activity(
        &self,
        chat_id: ChatId,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<ChatActivity, StoreError> {
        let since = Self::since_millis(since);
        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM messages WHERE chat_id = ? AND timestamp_ms >= ?",
        )
        .bind(chat_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await
        .map_err(Self::query_failed("message total"))?;

        let rows = sqlx::query(
            r#"
            SELECT m.author_id,
                   COALESCE(u.display_name, CAST(m.author_id AS TEXT)) AS display_name,
                   COUNT(*) AS message_count
            FROM messages m
            LEFT JOIN users u ON u.user_id = m.author_id
            WHERE m.chat_id = ? AND m.timestamp_ms >= ?
            GROUP BY m.author_id
            ORDER BY message_count DESC, m.author_id ASC
            LIMIT ?
            "#,
        )
        .bind(chat_id)
        .bind(since)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(Self::query_failed("active authors"))?;

        Ok(ChatActivity {
            total: total.max(0) as u64,
            top: rows
                .iter()
                .map(Self::row_to_author_stats)
                .collect::<Result<_, _>>()?,
        })
    }

    async fn kind_counts(
        &self,
        chat_id: ChatId,
        user_id: UserId,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<KindCount>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT kind, COUNT(*) AS kind_count
            FROM messages
            WHERE chat_id = ? AND author_id = ? AND timestamp_ms >= ?
            GROUP BY kind
            ORDER BY kind_count DESC, kind ASC
            "#,
        )
        .bind(chat_id)
        .bind(user_id)
        .bind(Self::since_millis(since))
        .fetch_all(&self.pool)
        .await
        .map_err(Self::query_failed("kind counts"))?;

        rows.iter()
            .map(|row| {
                let kind: String = row
                    .try_get("kind")
                    .map_err(Self::query_failed("kind column"))?;
                let count: i64 = row
                    .try_get("kind_count")
                    .map_err(Self::query_failed("kind_count column"))?;
                Ok(KindCount {
                    kind: MessageKind::from_str(&kind).map_err(StoreError::QueryFailed)?,
                    count: count.max(0) as u64,
                })
            })
            .collect()
    }

    async fn author_texts(
        &self,
        chat_id: ChatId,
        user_id: UserId,
        limit: usize,
    ) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT text FROM messages
            WHERE chat_id = ? AND author_id = ? AND text IS NOT NULL AND TRIM(text) != ''
            ORDER BY timestamp_ms DESC, msg_id DESC
            LIMIT ?
            "#,
        )
        .bind(chat_id)
        .bind(user_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(Self::query_failed("author texts"))?;

        rows.iter()
            .map(|row| {
                row.try_get("text")
                    .map_err(Self::query_failed("text column"))
            })
            .collect()
    }
}

#[async_trait]
impl CooldownTracker for SqliteLog {
    async fn check_and_consume(
        &self,
        user_id: UserId,
        operation: OperationKind,
        now: DateTime<Utc>,
        period: Duration,
    ) -> Result<CooldownDecision, StoreError> {
        // The conditional upsert is a single statement, so the check and the
        // write cannot interleave with another caller.
        let result = sqlx::query(
            r#"
            INSERT INTO cooldowns (user_id, operation, last_invoked_at) VALUES (?, ?, ?)
            ON CONFLICT(user_id, operation) DO UPDATE SET last_invoked_at = excluded.last_invoked_at
            WHERE excluded.last_invoked_at >= cooldowns.last_invoked_at + ?
            "#,
        )
        .bind(user_id)
        .bind(operation.as_str())
        .bind(now.timestamp_millis())
        .bind(period.num_milliseconds())
        .execute(&self.pool)
        .await
        .map_err(Self::query_failed("consume cooldown"))?;

        if result.rows_affected() > 0 {
            return Ok(CooldownDecision::Allowed);
        }

        let last: Option<i64> = sqlx::query_scalar(
            "SELECT last_invoked_at FROM cooldowns WHERE user_id = ? AND operation = ?",
        )
        .bind(user_id)
        .bind(operation.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(Self::query_failed("read cooldown"))?;

        Ok(match CooldownDecision::evaluate(last.map(Self::from_millis), now, period) {
            // Lost a race with a writer that just moved the clock forward.
            CooldownDecision::Allowed => CooldownDecision::Denied {
                remaining: period,
            },
            denied => denied,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatterbox_core::store::Cursor;
    use chrono::TimeZone;

    async fn test_log() -> SqliteLog {
        SqliteLog::new("sqlite::memory:").await.unwrap()
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).single().unwrap()
    }

    #[tokio::test]
    async fn backend_name() {
        assert_eq!(test_log().await.name(), "sqlite");
    }

    #[tokio::test]
    async fn insert_and_get_round_trip() {
        let db = test_log().await;
        db.upsert_user(&User::new(5, "Bob").with_username("bob"))
            .await
            .unwrap();
        let photo = ChatMessage::photo(-100, 1, 5, at(1), "file-1", Some("caption".into()));
        assert!(db.insert_message(&photo).await.unwrap());

        let row = db.get(-100, 1).await.unwrap().unwrap();
        assert_eq!(row.message, photo);
        assert_eq!(row.author_name.as_deref(), Some("Bob"));
        assert!(row.parent_author_id.is_none());
        assert!(db.get(-100, 2).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_insert_keeps_first_row() {
        let db = test_log().await;
        let msg = ChatMessage::text(-1, 1, 5, at(0), "original");
        assert!(db.insert_message(&msg).await.unwrap());

        let mut dup = msg.clone();
        dup.text = Some("rewritten".into());
        assert!(!db.insert_message(&dup).await.unwrap());

        let row = db.get(-1, 1).await.unwrap().unwrap();
        assert_eq!(row.message.text.as_deref(), Some("original"));
    }

    #[tokio::test]
    async fn parent_author_is_joined() {
        let db = test_log().await;
        db.insert_message(&ChatMessage::text(-1, 1, 777, at(0), "bot says"))
            .await
            .unwrap();
        db.insert_message(&ChatMessage::text(-1, 2, 5, at(1), "reply").replying_to(1))
            .await
            .unwrap();
        db.insert_message(&ChatMessage::text(-1, 3, 5, at(2), "reply to ghost").replying_to(99))
            .await
            .unwrap();

        assert_eq!(db.get(-1, 2).await.unwrap().unwrap().parent_author_id, Some(777));
        assert_eq!(db.get(-1, 3).await.unwrap().unwrap().parent_author_id, None);
    }

    #[tokio::test]
    async fn recent_respects_filter_cursor_and_limit() {
        let db = test_log().await;
        for i in 1..=6 {
            let author = if i % 2 == 0 { 777 } else { 5 };
            db.insert_message(&ChatMessage::text(-1, i, author, at(i), format!("m{i}")))
                .await
                .unwrap();
        }

        let bot = HistoryPage::new(-1, AuthorFilter::Only(777), 10);
        let ids: Vec<_> = db
            .recent(&bot)
            .await
            .unwrap()
            .iter()
            .map(|r| r.message.msg_id)
            .collect();
        assert_eq!(ids, vec![6, 4, 2]);

        let humans = HistoryPage::new(-1, AuthorFilter::Except(777), 1);
        let first = db.recent(&humans).await.unwrap();
        assert_eq!(first[0].message.msg_id, 5);

        let next = humans.before(Some(Cursor::of(&first[0].message)));
        let second = db.recent(&next).await.unwrap();
        assert_eq!(second[0].message.msg_id, 3);
    }

    #[tokio::test]
    async fn recent_breaks_timestamp_ties_by_id() {
        let db = test_log().await;
        for id in [3, 1, 2] {
            db.insert_message(&ChatMessage::text(-1, id, 5, at(0), "same time"))
                .await
                .unwrap();
        }
        let rows = db
            .recent(&HistoryPage::new(-1, AuthorFilter::Only(5), 10))
            .await
            .unwrap();
        let ids: Vec<_> = rows.iter().map(|r| r.message.msg_id).collect();
        assert_eq!(ids, vec![3, 2, 1]);
    }

    #[tokio::test]
    async fn chat_settings_upserts() {
        let db = test_log().await;
        assert!(db.chat_settings(-1).await.unwrap().is_none());

        db.set_temperature(-1, 0.5).await.unwrap();
        db.set_system_prompt(-1, Some("pirate")).await.unwrap();
        db.set_model(-1, "gpt-4o").await.unwrap();

        let s = db.chat_settings(-1).await.unwrap().unwrap();
        assert_eq!(s.system_prompt.as_deref(), Some("pirate"));
        assert_eq!(s.temperature, Some(0.5));
        assert_eq!(s.model_name.as_deref(), Some("gpt-4o"));

        db.set_system_prompt(-1, None).await.unwrap();
        let s = db.chat_settings(-1).await.unwrap().unwrap();
        assert!(s.system_prompt.is_none());
        assert_eq!(s.model_name.as_deref(), Some("gpt-4o"));
    }

    #[tokio::test]
    async fn visibility_toggles() {
        let db = test_log().await;
        db.upsert_user(&User::new(1, "Ann")).await.unwrap();
        db.upsert_user(&User::new(2, "Ben")).await.unwrap();
        db.insert_message(&ChatMessage::text(-1, 1, 1, at(1), "a"))
            .await
            .unwrap();
        db.insert_message(&ChatMessage::text(-1, 2, 2, at(2), "b"))
            .await
            .unwrap();
        db.insert_message(&ChatMessage::text(-1, 3, 2, at(3), "b again"))
            .await
            .unwrap();

        assert_eq!(db.chat_members(-1).await.unwrap().len(), 2);
        assert!(db.toggle_visibility(-1, 1).await.unwrap());
        let members = db.chat_members(-1).await.unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].user_id, 2);
        assert!(!db.toggle_visibility(-1, 1).await.unwrap());
    }

    #[tokio::test]
    async fn top_authors_and_texts() {
        let db = test_log().await;
        db.upsert_user(&User::new(1, "Ann")).await.unwrap();
        db.insert_message(&ChatMessage::text(-1, 1, 1, at(1), "one"))
            .await
            .unwrap();
        db.insert_message(&ChatMessage::text(-1, 2, 1, at(2), "two"))
            .await
            .unwrap();
        db.insert_message(&ChatMessage::text(-1, 3, 2, at(3), "three"))
            .await
            .unwrap();
        db.insert_message(&ChatMessage::photo(-1, 4, 2, at(4), "f", None))
            .await
            .unwrap();

        let top = db.top_authors(-1, 20).await.unwrap();
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].display_name, "Ann");
        assert_eq!(top[0].message_count, 2);
        assert_eq!(top[1].display_name, "2");
        assert_eq!(top[1].message_count, 1);

        let texts = db.author_texts(-1, 1, 10).await.unwrap();
        assert_eq!(texts, vec!["two".to_string(), "one".to_string()]);
    }

    #[tokio::test]
    async fn activity_and_kind_counts_by_period() {
        let db = test_log().await;
        db.upsert_user(&User::new(1, "Ann")).await.unwrap();
        db.insert_message(&ChatMessage::text(-1, 1, 1, at(0), "last month"))
            .await
            .unwrap();
        db.insert_message(&ChatMessage::photo(-1, 2, 1, at(100), "f", None))
            .await
            .unwrap();
        db.insert_message(&ChatMessage::text(-1, 3, 2, at(101), "hi"))
            .await
            .unwrap();
        db.insert_message(&ChatMessage::text(-2, 4, 2, at(102), "other chat"))
            .await
            .unwrap();

        let all = db.activity(-1, None, 5).await.unwrap();
        assert_eq!(all.total, 3);
        assert_eq!(all.top[0].display_name, "Ann");
        assert_eq!(all.top[0].message_count, 2);
        assert_eq!(all.top[1].display_name, "2");

        let recent = db.activity(-1, Some(at(100)), 5).await.unwrap();
        assert_eq!(recent.total, 2);
        assert_eq!(recent.top.len(), 2);
        assert!(recent.top.iter().all(|a| a.message_count == 1));

        let kinds = db.kind_counts(-1, 1, None).await.unwrap();
        assert_eq!(kinds.len(), 2);
        assert_eq!(
            db.kind_counts(-1, 1, Some(at(50))).await.unwrap(),
            vec![KindCount { kind: MessageKind::Photo, count: 1 }]
        );
        assert_eq!(db.activity(-9, None, 5).await.unwrap(), ChatActivity::default());
    }

    #[tokio::test]
    async fn cooldown_lifecycle() {
        let db = test_log().await;
        db.upsert_user(&User::new(1, "Ann")).await.unwrap();
        let period = Duration::seconds(300);

        let d = db
            .check_and_consume(1, OperationKind::Analyze, at(0), period)
            .await
            .unwrap();
        assert!(d.is_allowed());

        let d = db
            .check_and_consume(1, OperationKind::Analyze, at(150), period)
            .await
            .unwrap();
        assert_eq!(
            d,
            CooldownDecision::Denied {
                remaining: Duration::seconds(150)
            }
        );

        let d = db
            .check_and_consume(1, OperationKind::Analyze, at(300), period)
            .await
            .unwrap();
        assert!(d.is_allowed());

        let user = db.get_user(1).await.unwrap().unwrap();
        assert_eq!(user.last_expensive_op_at, Some(at(300)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_checks_allow_exactly_one() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("cooldowns.db").display());
        let db = std::sync::Arc::new(SqliteLog::new(&url).await.unwrap());

        let mut handles = Vec::new();
        for _ in 0..16 {
            let db = db.clone();
            handles.push(tokio::spawn(async move {
                db.check_and_consume(7, OperationKind::Analyze, at(0), Duration::seconds(300))
                    .await
                    .unwrap()
            }));
        }

        let mut allowed = 0;
        for handle in handles {
            if handle.await.unwrap().is_allowed() {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 1);
    }

    #[tokio::test]
    async fn cooldown_kinds_are_independent() {
        let db = test_log().await;
        let period = Duration::seconds(60);
        assert!(db
            .check_and_consume(1, OperationKind::Analyze, at(0), period)
            .await
            .unwrap()
            .is_allowed());
        assert!(db
            .check_and_consume(1, OperationKind::ImageSearch, at(1), period)
            .await
            .unwrap()
            .is_allowed());
    }
}
