//! # Story store
//!
//! The persistence capability: every entity from the data model, scoped by
//! conversation id, over a single SQLite connection. All writes run inside
//! Diesel transactions. The schema is created on open, so a fresh database
//! file is usable immediately.
//!
//! A conversation has no row of its own; it comes into existence with its
//! first message or settings write and is removed by [`StoryStore::delete_conversation`],
//! which cascades across every table.
//!
//! One domain rule lives here rather than in SQL foreign keys: deleting the
//! most recent message also deletes any character whose first appearance was
//! that message.

use crate::error::StoryError;
use crate::models::{
    now_rfc3339, CharacterRecord, ChatMessage, ConversationSettings, ConversationSummary,
    ProviderConfigRow, StoryProgress,
};
use crate::progress::{ProgressPatch, SectionStatus};
use crate::schema::{
    characters, chat_messages, conversation_settings, conversation_summaries, provider_configs,
    story_progress,
};
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use std::collections::HashMap;

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS chat_messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    conversation_id TEXT NOT NULL,
    role TEXT NOT NULL,
    content TEXT NOT NULL,
    model TEXT,
    provider TEXT,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_messages_conversation_created
    ON chat_messages (conversation_id, created_at);

CREATE TABLE IF NOT EXISTS conversation_settings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    conversation_id TEXT NOT NULL UNIQUE,
    title TEXT,
    background TEXT,
    characters TEXT,
    character_personalities TEXT,
    outline TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS conversation_summaries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    conversation_id TEXT NOT NULL,
    summary TEXT NOT NULL,
    message_count INTEGER NOT NULL DEFAULT 0,
    token_count INTEGER,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_summaries_conversation
    ON conversation_summaries (conversation_id);

CREATE TABLE IF NOT EXISTS story_progress (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    conversation_id TEXT NOT NULL UNIQUE,
    current_section INTEGER NOT NULL DEFAULT 0,
    total_sections INTEGER,
    last_generated_content TEXT,
    last_generated_section INTEGER,
    status TEXT NOT NULL DEFAULT 'pending',
    outline_confirmed BOOLEAN NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS characters (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    conversation_id TEXT NOT NULL,
    name TEXT NOT NULL,
    is_main BOOLEAN NOT NULL DEFAULT 0,
    is_unavailable BOOLEAN NOT NULL DEFAULT 0,
    first_message_id INTEGER,
    notes TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE (conversation_id, name)
);

CREATE TABLE IF NOT EXISTS provider_configs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    provider TEXT NOT NULL UNIQUE,
    model TEXT,
    api_key TEXT,
    base_url TEXT,
    max_tokens INTEGER,
    temperature REAL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
";

/// Partial update for a conversation's settings. `None` keeps the stored
/// value; the row is created when missing.
#[derive(Debug, Clone, Default)]
pub struct SettingsPatch {
    pub title: Option<String>,
    pub background: Option<String>,
    pub characters: Option<Vec<String>>,
    pub character_personalities: Option<HashMap<String, String>>,
    pub outline: Option<String>,
}

/// Record store over one SQLite connection.
pub struct StoryStore {
    conn: SqliteConnection,
}

impl StoryStore {
    /// Open (or create) the database at `db_url` and ensure the schema
    /// exists.
    pub fn open(db_url: &str) -> Result<Self, StoryError> {
        let mut conn = SqliteConnection::establish(db_url)?;
        conn.batch_execute(SCHEMA_SQL)?;
        Ok(Self { conn })
    }

    // ── messages ───────────────────────────────────────────────────────

    /// Append a message to a conversation.
    pub fn save_message(
        &mut self,
        conversation: &str,
        role: &str,
        content: &str,
        model: Option<&str>,
        provider: Option<&str>,
    ) -> Result<ChatMessage, StoryError> {
        let row = ChatMessage {
            id: None,
            conversation_id: conversation.to_string(),
            role: role.to_string(),
            content: content.to_string(),
            model: model.map(str::to_string),
            provider: provider.map(str::to_string),
            created_at: now_rfc3339(),
        };

        let message = self.conn.transaction(|conn| {
            diesel::insert_into(chat_messages::table)
                .values(&row)
                .returning(ChatMessage::as_returning())
                .get_result(conn)
        })?;

        Ok(message)
    }

    /// Messages of a conversation in chronological order (creation time,
    /// then id). `limit`/`offset` page through the range; without a limit
    /// the full history is returned.
    pub fn conversation_messages(
        &mut self,
        conversation: &str,
        limit: Option<i64>,
        offset: i64,
    ) -> Result<Vec<ChatMessage>, StoryError> {
        let mut query = chat_messages::table
            .filter(chat_messages::conversation_id.eq(conversation))
            .order((chat_messages::created_at.asc(), chat_messages::id.asc()))
            .into_boxed();

        if let Some(limit) = limit {
            query = query.limit(limit).offset(offset);
        }

        Ok(query.load(&mut self.conn)?)
    }

    pub fn message_count(&mut self, conversation: &str) -> Result<usize, StoryError> {
        let count: i64 = chat_messages::table
            .filter(chat_messages::conversation_id.eq(conversation))
            .count()
            .get_result(&mut self.conn)?;
        Ok(count as usize)
    }

    pub fn last_assistant_message(
        &mut self,
        conversation: &str,
    ) -> Result<Option<ChatMessage>, StoryError> {
        let message = chat_messages::table
            .filter(chat_messages::conversation_id.eq(conversation))
            .filter(chat_messages::role.eq("assistant"))
            .order((chat_messages::created_at.desc(), chat_messages::id.desc()))
            .first(&mut self.conn)
            .optional()?;
        Ok(message)
    }

    /// Delete exactly the single latest message of a conversation, along
    /// with any character first observed in it.
    pub fn delete_most_recent_message(
        &mut self,
        conversation: &str,
    ) -> Result<Option<ChatMessage>, StoryError> {
        let deleted = self
            .conn
            .transaction::<_, diesel::result::Error, _>(|conn| {
                let latest: Option<ChatMessage> = chat_messages::table
                    .filter(chat_messages::conversation_id.eq(conversation))
                    .order((chat_messages::created_at.desc(), chat_messages::id.desc()))
                    .first(conn)
                    .optional()?;

                let Some(message) = latest else {
                    return Ok(None);
                };

                diesel::delete(
                    chat_messages::table.filter(chat_messages::id.eq(message.id.unwrap_or(-1))),
                )
                .execute(conn)?;

                diesel::delete(
                    characters::table
                        .filter(characters::conversation_id.eq(conversation))
                        .filter(characters::first_message_id.eq(message.id)),
                )
                .execute(conn)?;

                Ok(Some(message))
            })?;

        Ok(deleted)
    }

    /// Ids of every conversation that has at least one message.
    pub fn list_conversations(&mut self) -> Result<Vec<String>, StoryError> {
        let ids = chat_messages::table
            .select(chat_messages::conversation_id)
            .distinct()
            .load(&mut self.conn)?;
        Ok(ids)
    }

    /// Remove every record associated with a conversation.
    pub fn delete_conversation(&mut self, conversation: &str) -> Result<(), StoryError> {
        self.conn
            .transaction::<_, diesel::result::Error, _>(|conn| {
                diesel::delete(
                    chat_messages::table.filter(chat_messages::conversation_id.eq(conversation)),
                )
                .execute(conn)?;
                diesel::delete(
                    conversation_settings::table
                        .filter(conversation_settings::conversation_id.eq(conversation)),
                )
                .execute(conn)?;
                diesel::delete(
                    conversation_summaries::table
                        .filter(conversation_summaries::conversation_id.eq(conversation)),
                )
                .execute(conn)?;
                diesel::delete(
                    story_progress::table
                        .filter(story_progress::conversation_id.eq(conversation)),
                )
                .execute(conn)?;
                diesel::delete(
                    characters::table.filter(characters::conversation_id.eq(conversation)),
                )
                .execute(conn)?;
                Ok(())
            })?;
        Ok(())
    }

    // ── settings ───────────────────────────────────────────────────────

    pub fn get_settings(
        &mut self,
        conversation: &str,
    ) -> Result<Option<ConversationSettings>, StoryError> {
        let settings = conversation_settings::table
            .filter(conversation_settings::conversation_id.eq(conversation))
            .first(&mut self.conn)
            .optional()?;
        Ok(settings)
    }

    /// Create or update the settings row for a conversation.
    pub fn upsert_settings(
        &mut self,
        conversation: &str,
        patch: SettingsPatch,
    ) -> Result<ConversationSettings, StoryError> {
        let characters_json = patch
            .characters
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let personalities_json = patch
            .character_personalities
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let now = now_rfc3339();

        let settings = self
            .conn
            .transaction::<_, diesel::result::Error, _>(|conn| {
                let existing: Option<ConversationSettings> = conversation_settings::table
                    .filter(conversation_settings::conversation_id.eq(conversation))
                    .first(conn)
                    .optional()?;

                match existing {
                    Some(existing) => {
                        diesel::update(
                            conversation_settings::table
                                .filter(conversation_settings::conversation_id.eq(conversation)),
                        )
                        .set((
                            conversation_settings::title.eq(patch.title.or(existing.title)),
                            conversation_settings::background
                                .eq(patch.background.or(existing.background)),
                            conversation_settings::characters
                                .eq(characters_json.or(existing.characters)),
                            conversation_settings::character_personalities
                                .eq(personalities_json.or(existing.character_personalities)),
                            conversation_settings::outline.eq(patch.outline.or(existing.outline)),
                            conversation_settings::updated_at.eq(now),
                        ))
                        .execute(conn)?;

                        conversation_settings::table
                            .filter(conversation_settings::conversation_id.eq(conversation))
                            .first(conn)
                    }
                    None => {
                        let row = ConversationSettings {
                            id: None,
                            conversation_id: conversation.to_string(),
                            title: patch.title,
                            background: patch.background,
                            characters: characters_json,
                            character_personalities: personalities_json,
                            outline: patch.outline,
                            created_at: now.clone(),
                            updated_at: now,
                        };
                        diesel::insert_into(conversation_settings::table)
                            .values(&row)
                            .returning(ConversationSettings::as_returning())
                            .get_result(conn)
                    }
                }
            })?;

        Ok(settings)
    }

    // ── summaries ──────────────────────────────────────────────────────

    /// Most recent summary for a conversation, if any.
    pub fn get_summary(
        &mut self,
        conversation: &str,
    ) -> Result<Option<ConversationSummary>, StoryError> {
        let summary = conversation_summaries::table
            .filter(conversation_summaries::conversation_id.eq(conversation))
            .order((
                conversation_summaries::updated_at.desc(),
                conversation_summaries::id.desc(),
            ))
            .first(&mut self.conn)
            .optional()?;
        Ok(summary)
    }

    /// Write the conversation's summary, superseding the current one in
    /// place rather than versioning it.
    pub fn upsert_summary(
        &mut self,
        conversation: &str,
        summary_text: &str,
        message_count: usize,
        token_count: Option<i32>,
    ) -> Result<ConversationSummary, StoryError> {
        let now = now_rfc3339();

        let summary = self
            .conn
            .transaction::<_, diesel::result::Error, _>(|conn| {
                let existing: Option<ConversationSummary> = conversation_summaries::table
                    .filter(conversation_summaries::conversation_id.eq(conversation))
                    .order((
                        conversation_summaries::updated_at.desc(),
                        conversation_summaries::id.desc(),
                    ))
                    .first(conn)
                    .optional()?;

                match existing {
                    Some(existing) => {
                        diesel::update(
                            conversation_summaries::table
                                .filter(conversation_summaries::id.eq(existing.id.unwrap_or(-1))),
                        )
                        .set((
                            conversation_summaries::summary.eq(summary_text),
                            conversation_summaries::message_count.eq(message_count as i32),
                            conversation_summaries::token_count.eq(token_count),
                            conversation_summaries::updated_at.eq(now),
                        ))
                        .execute(conn)?;

                        conversation_summaries::table
                            .filter(conversation_summaries::id.eq(existing.id.unwrap_or(-1)))
                            .first(conn)
                    }
                    None => {
                        let row = ConversationSummary {
                            id: None,
                            conversation_id: conversation.to_string(),
                            summary: summary_text.to_string(),
                            message_count: message_count as i32,
                            token_count,
                            created_at: now.clone(),
                            updated_at: now,
                        };
                        diesel::insert_into(conversation_summaries::table)
                            .values(&row)
                            .returning(ConversationSummary::as_returning())
                            .get_result(conn)
                    }
                }
            })?;

        Ok(summary)
    }

    pub fn delete_summary(&mut self, conversation: &str) -> Result<bool, StoryError> {
        let deleted = diesel::delete(
            conversation_summaries::table
                .filter(conversation_summaries::conversation_id.eq(conversation)),
        )
        .execute(&mut self.conn)?;
        Ok(deleted > 0)
    }

    // ── story progress ─────────────────────────────────────────────────

    pub fn get_progress(
        &mut self,
        conversation: &str,
    ) -> Result<Option<StoryProgress>, StoryError> {
        let progress = story_progress::table
            .filter(story_progress::conversation_id.eq(conversation))
            .first(&mut self.conn)
            .optional()?;
        Ok(progress)
    }

    /// Apply a [`ProgressPatch`], creating the row in the machine's initial
    /// state first when missing.
    pub fn upsert_progress(
        &mut self,
        conversation: &str,
        patch: ProgressPatch,
    ) -> Result<StoryProgress, StoryError> {
        let now = now_rfc3339();

        let progress = self
            .conn
            .transaction::<_, diesel::result::Error, _>(|conn| {
                let existing: Option<StoryProgress> = story_progress::table
                    .filter(story_progress::conversation_id.eq(conversation))
                    .first(conn)
                    .optional()?;

                match existing {
                    Some(existing) => {
                        diesel::update(
                            story_progress::table
                                .filter(story_progress::conversation_id.eq(conversation)),
                        )
                        .set((
                            story_progress::current_section
                                .eq(patch.current_section.unwrap_or(existing.current_section)),
                            story_progress::total_sections
                                .eq(patch.total_sections.or(existing.total_sections)),
                            story_progress::last_generated_content.eq(patch
                                .last_generated_content
                                .or(existing.last_generated_content)),
                            story_progress::last_generated_section.eq(patch
                                .last_generated_section
                                .or(existing.last_generated_section)),
                            story_progress::status.eq(patch
                                .status
                                .map(|s| s.as_str().to_string())
                                .unwrap_or(existing.status)),
                            story_progress::outline_confirmed
                                .eq(patch.outline_confirmed.unwrap_or(existing.outline_confirmed)),
                            story_progress::updated_at.eq(now),
                        ))
                        .execute(conn)?;

                        story_progress::table
                            .filter(story_progress::conversation_id.eq(conversation))
                            .first(conn)
                    }
                    None => {
                        let row = StoryProgress {
                            id: None,
                            conversation_id: conversation.to_string(),
                            current_section: patch.current_section.unwrap_or(0),
                            total_sections: patch.total_sections,
                            last_generated_content: patch.last_generated_content,
                            last_generated_section: patch.last_generated_section,
                            status: patch
                                .status
                                .unwrap_or(SectionStatus::Pending)
                                .as_str()
                                .to_string(),
                            outline_confirmed: patch.outline_confirmed.unwrap_or(false),
                            created_at: now.clone(),
                            updated_at: now,
                        };
                        diesel::insert_into(story_progress::table)
                            .values(&row)
                            .returning(StoryProgress::as_returning())
                            .get_result(conn)
                    }
                }
            })?;

        Ok(progress)
    }

    /// Put a progress row back to a previously captured state. Used by the
    /// orchestrator to undo the `generating` transition after a failed
    /// provider call.
    pub fn restore_progress(&mut self, snapshot: &StoryProgress) -> Result<(), StoryError> {
        let patch = ProgressPatch {
            current_section: Some(snapshot.current_section),
            total_sections: snapshot.total_sections,
            last_generated_content: snapshot.last_generated_content.clone(),
            last_generated_section: snapshot.last_generated_section,
            status: Some(SectionStatus::parse(&snapshot.status)?),
            outline_confirmed: Some(snapshot.outline_confirmed),
        };
        self.upsert_progress(&snapshot.conversation_id, patch)?;
        Ok(())
    }

    pub fn delete_progress(&mut self, conversation: &str) -> Result<bool, StoryError> {
        let deleted = diesel::delete(
            story_progress::table.filter(story_progress::conversation_id.eq(conversation)),
        )
        .execute(&mut self.conn)?;
        Ok(deleted > 0)
    }

    // ── characters ─────────────────────────────────────────────────────

    /// Record a character sighting. Creates the record on first sight;
    /// afterwards only refreshes notes and clears the unavailable flag.
    pub fn upsert_character(
        &mut self,
        conversation: &str,
        name: &str,
        is_main: bool,
        first_message_id: Option<i32>,
        notes: Option<&str>,
    ) -> Result<CharacterRecord, StoryError> {
        let now = now_rfc3339();

        let character = self
            .conn
            .transaction::<_, diesel::result::Error, _>(|conn| {
                let existing: Option<CharacterRecord> = characters::table
                    .filter(characters::conversation_id.eq(conversation))
                    .filter(characters::name.eq(name))
                    .first(conn)
                    .optional()?;

                match existing {
                    Some(existing) => {
                        diesel::update(
                            characters::table.filter(characters::id.eq(existing.id.unwrap_or(-1))),
                        )
                        .set((
                            characters::notes.eq(notes
                                .map(str::to_string)
                                .or(existing.notes)),
                            characters::is_unavailable.eq(false),
                            characters::updated_at.eq(now),
                        ))
                        .execute(conn)?;

                        characters::table
                            .filter(characters::id.eq(existing.id.unwrap_or(-1)))
                            .first(conn)
                    }
                    None => {
                        let row = CharacterRecord {
                            id: None,
                            conversation_id: conversation.to_string(),
                            name: name.to_string(),
                            is_main,
                            is_unavailable: false,
                            first_message_id,
                            notes: notes.map(str::to_string),
                            created_at: now.clone(),
                            updated_at: now,
                        };
                        diesel::insert_into(characters::table)
                            .values(&row)
                            .returning(CharacterRecord::as_returning())
                            .get_result(conn)
                    }
                }
            })?;

        Ok(character)
    }

    /// Soft-delete (or restore) a character.
    pub fn set_character_unavailable(
        &mut self,
        conversation: &str,
        name: &str,
        unavailable: bool,
    ) -> Result<bool, StoryError> {
        let updated = diesel::update(
            characters::table
                .filter(characters::conversation_id.eq(conversation))
                .filter(characters::name.eq(name)),
        )
        .set((
            characters::is_unavailable.eq(unavailable),
            characters::updated_at.eq(now_rfc3339()),
        ))
        .execute(&mut self.conn)?;
        Ok(updated > 0)
    }

    pub fn get_characters(
        &mut self,
        conversation: &str,
        include_unavailable: bool,
    ) -> Result<Vec<CharacterRecord>, StoryError> {
        let mut query = characters::table
            .filter(characters::conversation_id.eq(conversation))
            .order(characters::id.asc())
            .into_boxed();

        if !include_unavailable {
            query = query.filter(characters::is_unavailable.eq(false));
        }

        Ok(query.load(&mut self.conn)?)
    }

    // ── provider configs ───────────────────────────────────────────────

    pub fn get_provider_config(
        &mut self,
        provider_name: &str,
    ) -> Result<Option<ProviderConfigRow>, StoryError> {
        let config = provider_configs::table
            .filter(provider_configs::provider.eq(provider_name))
            .first(&mut self.conn)
            .optional()?;
        Ok(config)
    }

    /// Create or update the stored defaults for one provider. `None` keeps
    /// the stored value.
    pub fn upsert_provider_config(
        &mut self,
        provider_name: &str,
        model: Option<&str>,
        api_key: Option<&str>,
        base_url: Option<&str>,
        max_tokens: Option<i32>,
        temperature: Option<f32>,
    ) -> Result<ProviderConfigRow, StoryError> {
        let now = now_rfc3339();

        let config = self
            .conn
            .transaction::<_, diesel::result::Error, _>(|conn| {
                let existing: Option<ProviderConfigRow> = provider_configs::table
                    .filter(provider_configs::provider.eq(provider_name))
                    .first(conn)
                    .optional()?;

                match existing {
                    Some(existing) => {
                        diesel::update(
                            provider_configs::table
                                .filter(provider_configs::provider.eq(provider_name)),
                        )
                        .set((
                            provider_configs::model
                                .eq(model.map(str::to_string).or(existing.model)),
                            provider_configs::api_key
                                .eq(api_key.map(str::to_string).or(existing.api_key)),
                            provider_configs::base_url
                                .eq(base_url.map(str::to_string).or(existing.base_url)),
                            provider_configs::max_tokens
                                .eq(max_tokens.or(existing.max_tokens)),
                            provider_configs::temperature
                                .eq(temperature.or(existing.temperature)),
                            provider_configs::updated_at.eq(now),
                        ))
                        .execute(conn)?;

                        provider_configs::table
                            .filter(provider_configs::provider.eq(provider_name))
                            .first(conn)
                    }
                    None => {
                        let row = ProviderConfigRow {
                            id: None,
                            provider: provider_name.to_string(),
                            model: model.map(str::to_string),
                            api_key: api_key.map(str::to_string),
                            base_url: base_url.map(str::to_string),
                            max_tokens,
                            temperature,
                            created_at: now.clone(),
                            updated_at: now,
                        };
                        diesel::insert_into(provider_configs::table)
                            .values(&row)
                            .returning(ProviderConfigRow::as_returning())
                            .get_result(conn)
                    }
                }
            })?;

        Ok(config)
    }
}
