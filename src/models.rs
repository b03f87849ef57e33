//! # Database models
//!
//! Data structures that map to the SQLite schema via **Diesel**.
//!
//! A conversation has no table of its own: it exists implicitly wherever its
//! opaque string id appears. The tables below hang off that id:
//!
//! - [`ChatMessage`]: one record per turn (`user` / `assistant`), append-only.
//! - [`ConversationSettings`]: one-to-one story settings (background, cast,
//!   outline). The `characters` and `character_personalities` columns hold
//!   JSON text; use the accessor methods rather than reading them raw.
//! - [`ConversationSummary`]: the current narrative summary, superseded in
//!   place rather than versioned.
//! - [`StoryProgress`]: one-to-one section/status tracking.
//! - [`CharacterRecord`]: cast members observed in the story so far.
//! - [`ProviderConfigRow`]: stored per-provider model/credential defaults.
//!
//! Each struct derives the appropriate Diesel traits (`Queryable`,
//! `Insertable`, `Selectable`) and is annotated with
//! `#[diesel(table_name = ...)]`. Timestamps are RFC 3339 text so rows order
//! lexicographically by creation time; surrogate ids break ties.

use chrono::{SecondsFormat, Utc};
use diesel::prelude::*;
use std::collections::HashMap;

/// Current wall-clock time in the fixed-width RFC 3339 form used for every
/// `created_at` / `updated_at` column.
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// One turn in a conversation.
///
/// Role values are `"user"` and `"assistant"`. `model` and `provider` tag
/// assistant rows with what produced them. Rows are immutable once written,
/// except for the delete-most-recent operation on the store.
#[derive(Queryable, Insertable, Debug, Selectable, Clone)]
#[diesel(table_name = crate::schema::chat_messages)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ChatMessage {
    /// Auto-increment primary key (set by the DB on insert).
    #[diesel(deserialize_as = i32)]
    pub id: Option<i32>,
    /// Opaque id of the owning conversation.
    pub conversation_id: String,
    /// Sender role: `"user"` or `"assistant"`.
    pub role: String,
    /// Raw message text.
    pub content: String,
    /// Model that produced the message, for assistant rows.
    pub model: Option<String>,
    /// Provider that produced the message, for assistant rows.
    pub provider: Option<String>,
    /// RFC 3339 creation timestamp.
    pub created_at: String,
}

/// Story settings for a conversation (one-to-one).
#[derive(Queryable, Insertable, Debug, Selectable, Clone)]
#[diesel(table_name = crate::schema::conversation_settings)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ConversationSettings {
    #[diesel(deserialize_as = i32)]
    pub id: Option<i32>,
    pub conversation_id: String,
    pub title: Option<String>,
    /// Free-text story background.
    pub background: Option<String>,
    /// JSON array of predefined character names, in roster order.
    pub characters: Option<String>,
    /// JSON object mapping character name to personality text.
    pub character_personalities: Option<String>,
    /// Story outline text; may be set independently of confirmation state.
    pub outline: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl ConversationSettings {
    /// Predefined character names, decoded from the JSON column.
    /// Malformed or absent JSON yields an empty roster.
    pub fn character_names(&self) -> Vec<String> {
        self.characters
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_default()
    }

    /// Character personality map, decoded from the JSON column.
    pub fn personality_map(&self) -> HashMap<String, String> {
        self.character_personalities
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_default()
    }
}

/// The current summary of a conversation's story so far.
#[derive(Queryable, Insertable, Debug, Selectable, Clone)]
#[diesel(table_name = crate::schema::conversation_summaries)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ConversationSummary {
    #[diesel(deserialize_as = i32)]
    pub id: Option<i32>,
    pub conversation_id: String,
    /// Narrative summary text.
    pub summary: String,
    /// Message count at the time the summary was produced.
    pub message_count: i32,
    /// Estimated token count of the summary, when recorded.
    pub token_count: Option<i32>,
    pub created_at: String,
    pub updated_at: String,
}

/// Section progress for a conversation (one-to-one).
///
/// `status` holds the textual form of
/// [`SectionStatus`](crate::progress::SectionStatus). `outline_confirmed`
/// must be true before any section may be generated.
#[derive(Queryable, Insertable, Debug, Selectable, Clone)]
#[diesel(table_name = crate::schema::story_progress)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct StoryProgress {
    #[diesel(deserialize_as = i32)]
    pub id: Option<i32>,
    pub conversation_id: String,
    /// Zero-based index of the section currently being written.
    pub current_section: i32,
    /// Total planned sections, when the outline is segmented.
    pub total_sections: Option<i32>,
    /// Text of the most recently generated section.
    pub last_generated_content: Option<String>,
    /// Index of the section that text belongs to.
    pub last_generated_section: Option<i32>,
    /// `pending`, `generating`, or `completed`.
    pub status: String,
    pub outline_confirmed: bool,
    pub created_at: String,
    pub updated_at: String,
}

/// A cast member observed in a conversation's story.
///
/// `is_main` marks predefined characters; auto-detected ones have it unset.
/// `is_unavailable` is a soft delete. `first_message_id` points at the
/// message where the character first appeared, and drives referential
/// cleanup when that message is deleted.
#[derive(Queryable, Insertable, Debug, Selectable, Clone)]
#[diesel(table_name = crate::schema::characters)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct CharacterRecord {
    #[diesel(deserialize_as = i32)]
    pub id: Option<i32>,
    pub conversation_id: String,
    /// Unique within the conversation.
    pub name: String,
    pub is_main: bool,
    pub is_unavailable: bool,
    pub first_message_id: Option<i32>,
    pub notes: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Stored defaults for one LLM provider.
///
/// At most one row per provider name; absent fields fall back to the
/// provider's built-in defaults at resolution time.
#[derive(Queryable, Insertable, Debug, Selectable, Clone)]
#[diesel(table_name = crate::schema::provider_configs)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ProviderConfigRow {
    #[diesel(deserialize_as = i32)]
    pub id: Option<i32>,
    pub provider: String,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub max_tokens: Option<i32>,
    pub temperature: Option<f32>,
    pub created_at: String,
    pub updated_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_accessors_decode_json_columns() {
        let settings = ConversationSettings {
            id: Some(1),
            conversation_id: "c1".to_string(),
            title: None,
            background: None,
            characters: Some(r#"["Ada","Brendan"]"#.to_string()),
            character_personalities: Some(r#"{"Ada":"sharp-tongued"}"#.to_string()),
            outline: None,
            created_at: now_rfc3339(),
            updated_at: now_rfc3339(),
        };

        assert_eq!(settings.character_names(), vec!["Ada", "Brendan"]);
        assert_eq!(
            settings.personality_map().get("Ada").map(String::as_str),
            Some("sharp-tongued")
        );
    }

    #[test]
    fn settings_accessors_tolerate_missing_columns() {
        let settings = ConversationSettings {
            id: None,
            conversation_id: "c1".to_string(),
            title: None,
            background: None,
            characters: None,
            character_personalities: None,
            outline: None,
            created_at: now_rfc3339(),
            updated_at: now_rfc3339(),
        };

        assert!(settings.character_names().is_empty());
        assert!(settings.personality_map().is_empty());
    }
}
