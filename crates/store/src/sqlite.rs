//! SQLite store backend.
//!
//! A single database file with five tables: `conversations`, `messages`,
//! `summaries`, `entities`, `relationships`. Messages are keyed by
//! `(conversation_id, ordinal)` so the monotonic-ordinal contract is also
//! enforced by the schema. The rebuild's bulk knowledge delete runs inside
//! one transaction.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use storyloom_core::error::StoreError;
use storyloom_core::knowledge::{Entity, EntityKind, Relationship};
use storyloom_core::message::{ConversationId, Message, MessageKind, Role, StoryId};
use storyloom_core::store::Store;
use storyloom_core::summary::{SummaryKind, SummaryRecord};
use tracing::{debug, info};

/// A production SQLite [`Store`].
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the database at `path`.
    ///
    /// Pass `"sqlite::memory:"` for an in-process ephemeral database.
    pub async fn new(path: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| StoreError::Storage(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .pragma("foreign_keys", "ON");

        // A single connection: in-memory databases are per-connection, and
        // the write pattern here is one engine per process anyway.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("SQLite store initialized at {path}");
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS conversations (
                id            TEXT PRIMARY KEY,
                story_id      TEXT NOT NULL,
                custom_prompt TEXT,
                created_at    TEXT NOT NULL,
                updated_at    TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("conversations table: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_conversations_story ON conversations(story_id)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("story index: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                conversation_id TEXT NOT NULL,
                ordinal         INTEGER NOT NULL,
                role            TEXT NOT NULL,
                kind            TEXT NOT NULL,
                content         TEXT NOT NULL,
                summary         TEXT,
                important       INTEGER NOT NULL DEFAULT 0,
                created_at      TEXT NOT NULL,
                PRIMARY KEY (conversation_id, ordinal)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("messages table: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS summaries (
                id              TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL,
                kind            TEXT NOT NULL,
                content         TEXT NOT NULL,
                source_ordinals TEXT NOT NULL,
                created_at      TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("summaries table: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_summaries_conversation ON summaries(conversation_id)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("summaries index: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS entities (
                id         TEXT NOT NULL,
                story_id   TEXT NOT NULL,
                name       TEXT NOT NULL,
                kind       TEXT NOT NULL,
                value      TEXT NOT NULL,
                version    INTEGER NOT NULL,
                provenance TEXT NOT NULL,
                PRIMARY KEY (story_id, id)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("entities table: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS relationships (
                id          TEXT NOT NULL,
                story_id    TEXT NOT NULL,
                from_entity TEXT NOT NULL,
                to_entity   TEXT NOT NULL,
                kind        TEXT NOT NULL,
                version     INTEGER NOT NULL,
                provenance  TEXT NOT NULL,
                PRIMARY KEY (story_id, id)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("relationships table: {e}")))?;

        debug!("SQLite migrations complete");
        Ok(())
    }

    fn row_to_message(row: &sqlx::sqlite::SqliteRow) -> Result<Message, StoreError> {
        let ordinal: i64 = row
            .try_get("ordinal")
            .map_err(|e| StoreError::QueryFailed(format!("ordinal column: {e}")))?;
        let role: String = row
            .try_get("role")
            .map_err(|e| StoreError::QueryFailed(format!("role column: {e}")))?;
        let kind: String = row
            .try_get("kind")
            .map_err(|e| StoreError::QueryFailed(format!("kind column: {e}")))?;
        let content: String = row
            .try_get("content")
            .map_err(|e| StoreError::QueryFailed(format!("content column: {e}")))?;
        let summary: Option<String> = row
            .try_get("summary")
            .map_err(|e| StoreError::QueryFailed(format!("summary column: {e}")))?;
        let important: i64 = row
            .try_get("important")
            .map_err(|e| StoreError::QueryFailed(format!("important column: {e}")))?;
        let created_at_str: String = row
            .try_get("created_at")
            .map_err(|e| StoreError::QueryFailed(format!("created_at column: {e}")))?;

        let created_at = chrono::DateTime::parse_from_rfc3339(&created_at_str)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());

        Ok(Message {
            ordinal: ordinal as u64,
            role: role_from_str(&role)?,
            kind: kind_from_str(&kind)?,
            content,
            summary,
            important: important != 0,
            created_at,
        })
    }

    fn row_to_summary(row: &sqlx::sqlite::SqliteRow) -> Result<SummaryRecord, StoreError> {
        let id: String = row
            .try_get("id")
            .map_err(|e| StoreError::QueryFailed(format!("id column: {e}")))?;
        let conversation_id: String = row
            .try_get("conversation_id")
            .map_err(|e| StoreError::QueryFailed(format!("conversation_id column: {e}")))?;
        let kind: String = row
            .try_get("kind")
            .map_err(|e| StoreError::QueryFailed(format!("kind column: {e}")))?;
        let content: String = row
            .try_get("content")
            .map_err(|e| StoreError::QueryFailed(format!("content column: {e}")))?;
        let ordinals_json: String = row
            .try_get("source_ordinals")
            .map_err(|e| StoreError::QueryFailed(format!("source_ordinals column: {e}")))?;
        let created_at_str: String = row
            .try_get("created_at")
            .map_err(|e| StoreError::QueryFailed(format!("created_at column: {e}")))?;

        let source_ordinals: Vec<u64> = serde_json::from_str(&ordinals_json)
            .map_err(|e| StoreError::QueryFailed(format!("source_ordinals decode: {e}")))?;
        let created_at = chrono::DateTime::parse_from_rfc3339(&created_at_str)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());

        Ok(SummaryRecord {
            id,
            conversation_id: ConversationId::from(conversation_id),
            kind: summary_kind_from_str(&kind)?,
            content,
            source_ordinals,
            created_at,
        })
    }

    fn row_to_entity(row: &sqlx::sqlite::SqliteRow) -> Result<Entity, StoreError> {
        let provenance_json: String = row
            .try_get("provenance")
            .map_err(|e| StoreError::QueryFailed(format!("provenance column: {e}")))?;
        let kind: String = row
            .try_get("kind")
            .map_err(|e| StoreError::QueryFailed(format!("kind column: {e}")))?;
        let story_id: String = row
            .try_get("story_id")
            .map_err(|e| StoreError::QueryFailed(format!("story_id column: {e}")))?;
        let version: i64 = row
            .try_get("version")
            .map_err(|e| StoreError::QueryFailed(format!("version column: {e}")))?;

        Ok(Entity {
            id: row
                .try_get("id")
                .map_err(|e| StoreError::QueryFailed(format!("id column: {e}")))?,
            story_id: StoryId::from(story_id),
            name: row
                .try_get("name")
                .map_err(|e| StoreError::QueryFailed(format!("name column: {e}")))?,
            kind: entity_kind_from_str(&kind)?,
            value: row
                .try_get("value")
                .map_err(|e| StoreError::QueryFailed(format!("value column: {e}")))?,
            version: version as u32,
            provenance: serde_json::from_str(&provenance_json)
                .map_err(|e| StoreError::QueryFailed(format!("provenance decode: {e}")))?,
        })
    }

    fn row_to_relationship(row: &sqlx::sqlite::SqliteRow) -> Result<Relationship, StoreError> {
        let provenance_json: String = row
            .try_get("provenance")
            .map_err(|e| StoreError::QueryFailed(format!("provenance column: {e}")))?;
        let story_id: String = row
            .try_get("story_id")
            .map_err(|e| StoreError::QueryFailed(format!("story_id column: {e}")))?;
        let version: i64 = row
            .try_get("version")
            .map_err(|e| StoreError::QueryFailed(format!("version column: {e}")))?;

        Ok(Relationship {
            id: row
                .try_get("id")
                .map_err(|e| StoreError::QueryFailed(format!("id column: {e}")))?,
            story_id: StoryId::from(story_id),
            from_entity: row
                .try_get("from_entity")
                .map_err(|e| StoreError::QueryFailed(format!("from_entity column: {e}")))?,
            to_entity: row
                .try_get("to_entity")
                .map_err(|e| StoreError::QueryFailed(format!("to_entity column: {e}")))?,
            kind: row
                .try_get("kind")
                .map_err(|e| StoreError::QueryFailed(format!("kind column: {e}")))?,
            version: version as u32,
            provenance: serde_json::from_str(&provenance_json)
                .map_err(|e| StoreError::QueryFailed(format!("provenance decode: {e}")))?,
        })
    }
}

fn role_to_str(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Model => "model",
    }
}

fn role_from_str(s: &str) -> Result<Role, StoreError> {
    match s {
        "user" => Ok(Role::User),
        "model" => Ok(Role::Model),
        other => Err(StoreError::QueryFailed(format!("unknown role '{other}'"))),
    }
}

fn kind_to_str(kind: MessageKind) -> &'static str {
    match kind {
        MessageKind::General => "general",
        MessageKind::SectionProposal => "section_proposal",
        MessageKind::SectionContent => "section_content",
        MessageKind::SectionStructure => "section_structure",
        MessageKind::Deca => "deca",
        MessageKind::RevisionRequest => "revision_request",
        MessageKind::System => "system",
    }
}

fn kind_from_str(s: &str) -> Result<MessageKind, StoreError> {
    match s {
        "general" => Ok(MessageKind::General),
        "section_proposal" => Ok(MessageKind::SectionProposal),
        "section_content" => Ok(MessageKind::SectionContent),
        "section_structure" => Ok(MessageKind::SectionStructure),
        "deca" => Ok(MessageKind::Deca),
        "revision_request" => Ok(MessageKind::RevisionRequest),
        "system" => Ok(MessageKind::System),
        other => Err(StoreError::QueryFailed(format!(
            "unknown message kind '{other}'"
        ))),
    }
}

fn summary_kind_to_str(kind: SummaryKind) -> &'static str {
    match kind {
        SummaryKind::Consolidated => "consolidated",
        SummaryKind::Block => "block",
        SummaryKind::Individual => "individual",
    }
}

fn summary_kind_from_str(s: &str) -> Result<SummaryKind, StoreError> {
    match s {
        "consolidated" => Ok(SummaryKind::Consolidated),
        "block" => Ok(SummaryKind::Block),
        "individual" => Ok(SummaryKind::Individual),
        other => Err(StoreError::QueryFailed(format!(
            "unknown summary kind '{other}'"
        ))),
    }
}

fn entity_kind_from_str(s: &str) -> Result<EntityKind, StoreError> {
    match s {
        "character" => Ok(EntityKind::Character),
        "location" => Ok(EntityKind::Location),
        "plot_thread" => Ok(EntityKind::PlotThread),
        "canon_fact" => Ok(EntityKind::CanonFact),
        other => Err(StoreError::QueryFailed(format!(
            "unknown entity kind '{other}'"
        ))),
    }
}

#[async_trait]
impl Store for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn create_conversation(
        &self,
        story: &StoryId,
        conversation: &ConversationId,
    ) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO conversations (id, story_id, custom_prompt, created_at, updated_at)
             VALUES (?1, ?2, NULL, ?3, ?3)",
        )
        .bind(conversation.as_str())
        .bind(story.as_str())
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("INSERT conversation: {e}")))?;
        Ok(())
    }

    async fn conversation_exists(
        &self,
        conversation: &ConversationId,
    ) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT 1 FROM conversations WHERE id = ?1")
            .bind(conversation.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("conversation exists: {e}")))?;
        Ok(row.is_some())
    }

    async fn conversation_for_story(
        &self,
        story: &StoryId,
    ) -> Result<Option<ConversationId>, StoreError> {
        let row = sqlx::query(
            "SELECT id FROM conversations WHERE story_id = ?1 ORDER BY created_at DESC LIMIT 1",
        )
        .bind(story.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("conversation for story: {e}")))?;

        match row {
            Some(row) => {
                let id: String = row
                    .try_get("id")
                    .map_err(|e| StoreError::QueryFailed(format!("id column: {e}")))?;
                Ok(Some(ConversationId::from(id)))
            }
            None => Ok(None),
        }
    }

    async fn story_for_conversation(
        &self,
        conversation: &ConversationId,
    ) -> Result<Option<StoryId>, StoreError> {
        let row = sqlx::query("SELECT story_id FROM conversations WHERE id = ?1")
            .bind(conversation.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("story for conversation: {e}")))?;

        match row {
            Some(row) => {
                let id: String = row
                    .try_get("story_id")
                    .map_err(|e| StoreError::QueryFailed(format!("story_id column: {e}")))?;
                Ok(Some(StoryId::from(id)))
            }
            None => Ok(None),
        }
    }

    async fn custom_prompt(
        &self,
        conversation: &ConversationId,
    ) -> Result<Option<String>, StoreError> {
        let row = sqlx::query("SELECT custom_prompt FROM conversations WHERE id = ?1")
            .bind(conversation.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("custom prompt: {e}")))?
            .ok_or_else(|| StoreError::NotFound(format!("conversation {conversation}")))?;
        row.try_get("custom_prompt")
            .map_err(|e| StoreError::QueryFailed(format!("custom_prompt column: {e}")))
    }

    async fn set_custom_prompt(
        &self,
        conversation: &ConversationId,
        prompt: Option<String>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE conversations SET custom_prompt = ?2, updated_at = ?3 WHERE id = ?1",
        )
        .bind(conversation.as_str())
        .bind(&prompt)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("UPDATE custom prompt: {e}")))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("conversation {conversation}")));
        }
        Ok(())
    }

    async fn append_message(
        &self,
        conversation: &ConversationId,
        message: Message,
    ) -> Result<(), StoreError> {
        if !self.conversation_exists(conversation).await? {
            return Err(StoreError::NotFound(format!("conversation {conversation}")));
        }
        let last = self.next_ordinal(conversation).await? - 1;
        if message.ordinal <= last {
            return Err(StoreError::Storage(format!(
                "non-monotonic ordinal {} after {last} in {conversation}",
                message.ordinal
            )));
        }

        sqlx::query(
            "INSERT INTO messages
                 (conversation_id, ordinal, role, kind, content, summary, important, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .bind(conversation.as_str())
        .bind(message.ordinal as i64)
        .bind(role_to_str(message.role))
        .bind(kind_to_str(message.kind))
        .bind(&message.content)
        .bind(&message.summary)
        .bind(message.important as i64)
        .bind(message.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("INSERT message: {e}")))?;
        Ok(())
    }

    async fn messages(
        &self,
        conversation: &ConversationId,
        after: Option<u64>,
        limit: Option<usize>,
    ) -> Result<Vec<Message>, StoreError> {
        if !self.conversation_exists(conversation).await? {
            return Err(StoreError::NotFound(format!("conversation {conversation}")));
        }
        let rows = sqlx::query(
            "SELECT * FROM messages
             WHERE conversation_id = ?1 AND ordinal > ?2
             ORDER BY ordinal ASC
             LIMIT ?3",
        )
        .bind(conversation.as_str())
        .bind(after.unwrap_or(0) as i64)
        .bind(limit.map(|n| n as i64).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("SELECT messages: {e}")))?;

        rows.iter().map(Self::row_to_message).collect()
    }

    async fn next_ordinal(&self, conversation: &ConversationId) -> Result<u64, StoreError> {
        let row = sqlx::query(
            "SELECT COALESCE(MAX(ordinal), 0) AS last FROM messages WHERE conversation_id = ?1",
        )
        .bind(conversation.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("MAX ordinal: {e}")))?;
        let last: i64 = row
            .try_get("last")
            .map_err(|e| StoreError::QueryFailed(format!("last column: {e}")))?;
        Ok(last as u64 + 1)
    }

    async fn set_message_summary(
        &self,
        conversation: &ConversationId,
        ordinal: u64,
        summary: String,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE messages SET summary = ?3 WHERE conversation_id = ?1 AND ordinal = ?2",
        )
        .bind(conversation.as_str())
        .bind(ordinal as i64)
        .bind(&summary)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("UPDATE summary: {e}")))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!(
                "message {ordinal} in {conversation}"
            )));
        }
        Ok(())
    }

    async fn delete_messages(
        &self,
        conversation: &ConversationId,
        ordinals: &[u64],
    ) -> Result<usize, StoreError> {
        let mut removed = 0usize;
        for ordinal in ordinals {
            let result = sqlx::query(
                "DELETE FROM messages WHERE conversation_id = ?1 AND ordinal = ?2",
            )
            .bind(conversation.as_str())
            .bind(*ordinal as i64)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("DELETE message: {e}")))?;
            removed += result.rows_affected() as usize;
        }
        Ok(removed)
    }

    async fn summaries(
        &self,
        conversation: &ConversationId,
    ) -> Result<Vec<SummaryRecord>, StoreError> {
        let rows = sqlx::query("SELECT * FROM summaries WHERE conversation_id = ?1")
            .bind(conversation.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("SELECT summaries: {e}")))?;

        let mut records: Vec<SummaryRecord> = rows
            .iter()
            .map(Self::row_to_summary)
            .collect::<Result<_, _>>()?;
        records.sort_by_key(|s| s.span().map(|(lo, _)| lo).unwrap_or(u64::MAX));
        Ok(records)
    }

    async fn upsert_summary(&self, record: SummaryRecord) -> Result<(), StoreError> {
        let ordinals_json = serde_json::to_string(&record.source_ordinals)
            .map_err(|e| StoreError::Storage(format!("source_ordinals encode: {e}")))?;
        sqlx::query(
            r#"
            INSERT INTO summaries (id, conversation_id, kind, content, source_ordinals, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(id) DO UPDATE SET
                content = excluded.content,
                source_ordinals = excluded.source_ordinals,
                created_at = excluded.created_at
            "#,
        )
        .bind(&record.id)
        .bind(record.conversation_id.as_str())
        .bind(summary_kind_to_str(record.kind))
        .bind(&record.content)
        .bind(&ordinals_json)
        .bind(record.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("UPSERT summary: {e}")))?;
        Ok(())
    }

    async fn delete_summaries(&self, ids: &[String]) -> Result<usize, StoreError> {
        let mut removed = 0usize;
        for id in ids {
            let result = sqlx::query("DELETE FROM summaries WHERE id = ?1")
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::Storage(format!("DELETE summary: {e}")))?;
            removed += result.rows_affected() as usize;
        }
        Ok(removed)
    }

    async fn entities(&self, story: &StoryId) -> Result<Vec<Entity>, StoreError> {
        let rows = sqlx::query("SELECT * FROM entities WHERE story_id = ?1")
            .bind(story.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("SELECT entities: {e}")))?;
        rows.iter().map(Self::row_to_entity).collect()
    }

    async fn relationships(&self, story: &StoryId) -> Result<Vec<Relationship>, StoreError> {
        let rows = sqlx::query("SELECT * FROM relationships WHERE story_id = ?1")
            .bind(story.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("SELECT relationships: {e}")))?;
        rows.iter().map(Self::row_to_relationship).collect()
    }

    async fn delete_knowledge(&self, story: &StoryId) -> Result<(u64, u64), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Storage(format!("BEGIN: {e}")))?;

        let entities = sqlx::query("DELETE FROM entities WHERE story_id = ?1")
            .bind(story.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Storage(format!("DELETE entities: {e}")))?
            .rows_affected();

        let relationships = sqlx::query("DELETE FROM relationships WHERE story_id = ?1")
            .bind(story.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Storage(format!("DELETE relationships: {e}")))?
            .rows_affected();

        tx.commit()
            .await
            .map_err(|e| StoreError::Storage(format!("COMMIT: {e}")))?;

        debug!(story = %story, entities, relationships, "Knowledge graph deleted");
        Ok((entities, relationships))
    }

    async fn put_entity(&self, entity: Entity) -> Result<(), StoreError> {
        let provenance_json = serde_json::to_string(&entity.provenance)
            .map_err(|e| StoreError::Storage(format!("provenance encode: {e}")))?;
        sqlx::query(
            r#"
            INSERT INTO entities (id, story_id, name, kind, value, version, provenance)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(story_id, id) DO UPDATE SET
                name = excluded.name,
                value = excluded.value,
                version = excluded.version,
                provenance = excluded.provenance
            "#,
        )
        .bind(&entity.id)
        .bind(entity.story_id.as_str())
        .bind(&entity.name)
        .bind(entity.kind.as_str())
        .bind(&entity.value)
        .bind(entity.version as i64)
        .bind(&provenance_json)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("UPSERT entity: {e}")))?;
        Ok(())
    }

    async fn put_relationship(&self, relationship: Relationship) -> Result<(), StoreError> {
        let provenance_json = serde_json::to_string(&relationship.provenance)
            .map_err(|e| StoreError::Storage(format!("provenance encode: {e}")))?;
        sqlx::query(
            r#"
            INSERT INTO relationships (id, story_id, from_entity, to_entity, kind, version, provenance)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(story_id, id) DO UPDATE SET
                kind = excluded.kind,
                version = excluded.version,
                provenance = excluded.provenance
            "#,
        )
        .bind(&relationship.id)
        .bind(relationship.story_id.as_str())
        .bind(&relationship.from_entity)
        .bind(&relationship.to_entity)
        .bind(&relationship.kind)
        .bind(relationship.version as i64)
        .bind(&provenance_json)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("UPSERT relationship: {e}")))?;
        Ok(())
    }
}
