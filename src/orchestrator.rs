//! # Orchestration service
//!
//! Ties the store, provider configuration, prompt builders, context
//! assembler, summarization trigger, and story state machine together into
//! the externally visible operations: `chat`, `confirm_outline`,
//! `generate_section` (plus a streaming variant), `confirm_section`,
//! `rewrite_section`, and `generate_summary`.
//!
//! Every generation operation follows the same spine: validate inputs,
//! check domain gates, resolve the provider configuration, assemble
//! context, build prompts, call the model, persist, then evaluate the
//! summarization trigger. Validation and precondition failures return
//! before anything is written. A provider failure after the `generating`
//! status has been written restores the progress snapshot taken beforehand,
//! so the status never dangles.
//!
//! The one partial-failure window in the design is a persistence error
//! after a successful model call: the generated text exists but could not
//! be saved. That path is logged at `error!` with the conversation id, and
//! the assistant-message write is retried a bounded number of times before
//! giving up.

use crate::api::{
    self, CompletionOutcome, CompletionRequest, Provider, ResolvedProviderConfig, StreamEvent,
};
use crate::config::{PlotlineConfig, ProviderResolver};
use crate::context::{self, ContextBudget, HistoryMessage};
use crate::error::StoryError;
use crate::models::StoryProgress;
use crate::progress::{self, ProgressPatch, SectionStatus};
use crate::prompt::{PromptTemplate, SystemPromptInputs};
use crate::store::StoryStore;
use crate::summary;
use crate::token_estimate;
use once_cell::sync::Lazy;
use regex::Regex;
use std::str::FromStr;
use tokio::sync::mpsc;
use tracing::{error, warn};
use uuid::Uuid;

static THINK_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<think>.*?</think>").unwrap());
static THINK_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)```think\s*\n.*?\n```").unwrap());
static THINK_FENCE_EMPTY: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)```think\s*```").unwrap());
static BLANK_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n\s*\n\s*\n+").unwrap());

/// Remove reasoning blocks some local models emit before their answer, and
/// collapse the blank runs left behind.
pub fn strip_think_content(text: &str) -> String {
    let text = THINK_TAG.replace_all(text, "");
    let text = THINK_FENCE.replace_all(&text, "");
    let text = THINK_FENCE_EMPTY.replace_all(&text, "");
    let text = BLANK_RUNS.replace_all(&text, "\n\n");
    text.trim().to_string()
}

/// Result of a plain chat turn.
#[derive(Debug, Clone)]
pub struct ChatOutcome {
    pub response: String,
    pub model: String,
    pub conversation_id: String,
}

/// Result of a section generation, confirmation, or rewrite.
#[derive(Debug, Clone)]
pub struct SectionOutcome {
    pub response: String,
    pub model: String,
    pub progress: StoryProgress,
    /// True when the summarization trigger says the history now warrants a
    /// (fresh) summary.
    pub needs_summary: bool,
    pub message_count: usize,
}

/// Result of a summarization run.
#[derive(Debug, Clone)]
pub struct SummaryOutcome {
    pub summary: String,
    pub message_count: usize,
}

/// The orchestration service. Owns the store and provider resolver; one
/// instance serves requests sequentially.
pub struct Orchestrator {
    store: StoryStore,
    resolver: ProviderResolver,
    template: PromptTemplate,
    summary_threshold: usize,
    context_budget: ContextBudget,
}

impl Orchestrator {
    pub fn new(
        store: StoryStore,
        resolver: ProviderResolver,
        template: PromptTemplate,
        config: &PlotlineConfig,
    ) -> Self {
        Self {
            store,
            resolver,
            template,
            summary_threshold: config.summary_threshold,
            context_budget: config.context_budget(),
        }
    }

    /// Direct access to the store for the settings-management and
    /// conversation-administration surfaces that sit outside the
    /// orchestrated operations.
    pub fn store_mut(&mut self) -> &mut StoryStore {
        &mut self.store
    }

    pub fn resolver_mut(&mut self) -> &mut ProviderResolver {
        &mut self.resolver
    }

    fn require_conversation_id(conversation_id: &str) -> Result<(), StoryError> {
        if conversation_id.trim().is_empty() {
            return Err(StoryError::validation_field(
                "conversation_id is required",
                "conversation_id",
            ));
        }
        Ok(())
    }

    // ── operations ─────────────────────────────────────────────────────

    /// Single-turn chat without story context. Generates a conversation id
    /// when none is supplied; persists the message pair only after the call
    /// succeeds.
    pub async fn chat(
        &mut self,
        message: &str,
        provider: &str,
        conversation_id: Option<String>,
        model: Option<&str>,
    ) -> Result<ChatOutcome, StoryError> {
        if message.trim().is_empty() {
            return Err(StoryError::validation_field(
                "message cannot be empty",
                "message",
            ));
        }
        let provider = Provider::from_str(provider)?;
        let conversation_id = conversation_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let config = self.resolver.resolve(&mut self.store, provider, model)?;
        let request = CompletionRequest {
            system_prompt: None,
            history: Vec::new(),
            user_message: message.to_string(),
        };

        let outcome = api::complete(&config, &request).await?;
        let clean = strip_think_content(&outcome.text);

        // The response already exists; losing the transcript row is the one
        // tolerated partial failure for plain chat.
        if let Err(err) = self.persist_exchange(&conversation_id, message, &clean, &outcome.model, provider)
        {
            error!(
                "chat response for conversation {conversation_id} generated but not persisted: {err}"
            );
        }

        Ok(ChatOutcome {
            response: clean,
            model: outcome.model,
            conversation_id,
        })
    }

    /// Mark the conversation's outline as confirmed, creating the progress
    /// record in its initial state on first use. Does not change `status`.
    pub fn confirm_outline(&mut self, conversation_id: &str) -> Result<StoryProgress, StoryError> {
        Self::require_conversation_id(conversation_id)?;
        self.store
            .upsert_progress(conversation_id, ProgressPatch::confirm_outline())
    }

    /// Generate the current section. Requires a stored outline and a
    /// confirmed progress record.
    pub async fn generate_section(
        &mut self,
        conversation_id: &str,
        provider: &str,
        model: Option<&str>,
    ) -> Result<SectionOutcome, StoryError> {
        self.generate_current_section(conversation_id, provider, model, None)
            .await
    }

    /// Streaming variant of [`Orchestrator::generate_section`]; chunks are
    /// pushed through `events` as they arrive. Nothing is persisted unless
    /// the stream runs to completion.
    pub async fn generate_section_stream(
        &mut self,
        conversation_id: &str,
        provider: &str,
        model: Option<&str>,
        events: mpsc::Sender<StreamEvent>,
    ) -> Result<SectionOutcome, StoryError> {
        self.generate_current_section(conversation_id, provider, model, Some(events))
            .await
    }

    async fn generate_current_section(
        &mut self,
        conversation_id: &str,
        provider: &str,
        model: Option<&str>,
        events: Option<mpsc::Sender<StreamEvent>>,
    ) -> Result<SectionOutcome, StoryError> {
        Self::require_conversation_id(conversation_id)?;
        let provider = Provider::from_str(provider)?;

        let settings = self.store.get_settings(conversation_id)?;
        let has_outline = settings
            .as_ref()
            .and_then(|s| s.outline.as_deref())
            .map(|o| !o.trim().is_empty())
            .unwrap_or(false);
        if !has_outline {
            return Err(StoryError::precondition(
                "no outline set for this conversation; write an outline first",
            ));
        }

        let snapshot =
            progress::ensure_outline_confirmed(self.store.get_progress(conversation_id)?)?;

        let config = self.resolver.resolve(&mut self.store, provider, model)?;
        self.store
            .upsert_progress(conversation_id, ProgressPatch::status(SectionStatus::Generating))?;

        let (history, system_prompt) = self.prepare_generation_context(conversation_id, None)?;
        let request = CompletionRequest {
            system_prompt: Some(system_prompt),
            history,
            user_message: self.template.generate_instruction.clone(),
        };

        let outcome = self
            .call_or_restore(conversation_id, &snapshot, &config, &request, events)
            .await?;

        let clean = strip_think_content(&outcome.text);
        let user_message = self.template.generate_instruction.clone();
        self.persist_section_exchange(conversation_id, &user_message, &clean, &outcome.model, provider)?;

        let progress = self.store.upsert_progress(
            conversation_id,
            ProgressPatch::section_completed(snapshot.current_section, clean.clone()),
        )?;

        let (needs_summary, message_count) = self.summary_check(conversation_id)?;
        Ok(SectionOutcome {
            response: clean,
            model: outcome.model,
            progress,
            needs_summary,
            message_count,
        })
    }

    /// Confirm the current section and generate the next one. Requires an
    /// existing progress record; mirrors the generate transition at the
    /// incremented section index.
    pub async fn confirm_section(
        &mut self,
        conversation_id: &str,
        provider: &str,
        model: Option<&str>,
    ) -> Result<SectionOutcome, StoryError> {
        Self::require_conversation_id(conversation_id)?;
        let provider = Provider::from_str(provider)?;

        let snapshot =
            progress::ensure_progress_exists(self.store.get_progress(conversation_id)?)?;
        let new_section = snapshot.current_section + 1;

        let config = self.resolver.resolve(&mut self.store, provider, model)?;
        self.store
            .upsert_progress(conversation_id, ProgressPatch::advance_to(new_section))?;

        let (history, system_prompt) =
            self.prepare_generation_context(conversation_id, Some(new_section))?;
        let request = CompletionRequest {
            system_prompt: Some(system_prompt),
            history,
            user_message: self.template.continue_instruction.clone(),
        };

        let outcome = self
            .call_or_restore(conversation_id, &snapshot, &config, &request, None)
            .await?;

        let clean = strip_think_content(&outcome.text);
        let user_message = self.template.continue_instruction.clone();
        self.persist_section_exchange(conversation_id, &user_message, &clean, &outcome.model, provider)?;

        let progress = self.store.upsert_progress(
            conversation_id,
            ProgressPatch::section_completed(new_section, clean.clone()),
        )?;

        let (needs_summary, message_count) = self.summary_check(conversation_id)?;
        Ok(SectionOutcome {
            response: clean,
            model: outcome.model,
            progress,
            needs_summary,
            message_count,
        })
    }

    /// Rewrite (or adjust) the most recently generated section according to
    /// user feedback. The section index does not move; the previous content
    /// is replaced. No progress write happens before the call, so a failed
    /// call leaves no trace.
    pub async fn rewrite_section(
        &mut self,
        conversation_id: &str,
        feedback: &str,
        provider: &str,
        model: Option<&str>,
    ) -> Result<SectionOutcome, StoryError> {
        Self::require_conversation_id(conversation_id)?;
        if feedback.trim().is_empty() {
            return Err(StoryError::validation_field(
                "feedback cannot be empty",
                "feedback",
            ));
        }
        let provider = Provider::from_str(provider)?;

        let current =
            progress::ensure_progress_exists(self.store.get_progress(conversation_id)?)?;
        let previous = progress::ensure_rewrite_source(&current)?;

        let config = self.resolver.resolve(&mut self.store, provider, model)?;
        let (history, system_prompt) = self.prepare_generation_context(conversation_id, None)?;
        let request = CompletionRequest {
            system_prompt: Some(system_prompt),
            history,
            user_message: self
                .template
                .build_feedback_prompt(feedback, Some(&previous)),
        };

        let outcome = api::complete(&config, &request).await?;

        let clean = strip_think_content(&outcome.text);
        // The transcript keeps the user's own words, not the built prompt.
        self.persist_section_exchange(conversation_id, feedback, &clean, &outcome.model, provider)?;

        let progress = self
            .store
            .upsert_progress(conversation_id, ProgressPatch::rewrite_completed(clean.clone()))?;

        let (needs_summary, message_count) = self.summary_check(conversation_id)?;
        Ok(SectionOutcome {
            response: clean,
            model: outcome.model,
            progress,
            needs_summary,
            message_count,
        })
    }

    /// Summarize the conversation from its **full** history and persist the
    /// result, superseding any previous summary.
    pub async fn generate_summary(
        &mut self,
        conversation_id: &str,
        provider: &str,
        model: Option<&str>,
    ) -> Result<SummaryOutcome, StoryError> {
        Self::require_conversation_id(conversation_id)?;
        let provider = Provider::from_str(provider)?;

        let messages = self.store.conversation_messages(conversation_id, None, 0)?;
        if messages.is_empty() {
            return Err(StoryError::precondition(
                "no messages found for summarization",
            ));
        }

        let config = self.resolver.resolve(&mut self.store, provider, model)?;
        let request = CompletionRequest {
            system_prompt: None,
            history: Vec::new(),
            user_message: summary::build_summary_prompt(&self.template, &messages),
        };

        let outcome = api::complete(&config, &request).await?;
        let clean = strip_think_content(&outcome.text);

        let tokens = token_estimate::estimate(&clean) as i32;
        self.store
            .upsert_summary(conversation_id, &clean, messages.len(), Some(tokens))?;

        Ok(SummaryOutcome {
            summary: clean,
            message_count: messages.len(),
        })
    }

    // ── shared plumbing ────────────────────────────────────────────────

    async fn call_or_restore(
        &mut self,
        conversation_id: &str,
        snapshot: &StoryProgress,
        config: &ResolvedProviderConfig,
        request: &CompletionRequest,
        events: Option<mpsc::Sender<StreamEvent>>,
    ) -> Result<CompletionOutcome, StoryError> {
        let result = match events {
            Some(tx) => api::complete_stream(config, request, tx).await,
            None => api::complete(config, request).await,
        };

        match result {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                if let Err(restore_err) = self.store.restore_progress(snapshot) {
                    error!(
                        "failed to restore progress for {conversation_id} after provider failure: {restore_err}"
                    );
                }
                Err(err)
            }
        }
    }

    fn persist_exchange(
        &mut self,
        conversation_id: &str,
        user_message: &str,
        assistant_content: &str,
        model: &str,
        provider: Provider,
    ) -> Result<(), StoryError> {
        self.store
            .save_message(conversation_id, "user", user_message, None, None)?;

        let mut last_err = None;
        for attempt in 1..=3 {
            match self.store.save_message(
                conversation_id,
                "assistant",
                assistant_content,
                Some(model),
                Some(provider.as_str()),
            ) {
                Ok(_) => return Ok(()),
                Err(err) => {
                    warn!("assistant message save attempt {attempt} failed: {err}");
                    last_err = Some(err);
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| StoryError::Internal("assistant message save failed".to_string())))
    }

    fn persist_section_exchange(
        &mut self,
        conversation_id: &str,
        user_message: &str,
        assistant_content: &str,
        model: &str,
        provider: Provider,
    ) -> Result<(), StoryError> {
        self.persist_exchange(conversation_id, user_message, assistant_content, model, provider)
            .map_err(|err| {
                error!(
                    "generated section for {conversation_id} could not be persisted: {err}"
                );
                err
            })
    }

    fn prepare_generation_context(
        &mut self,
        conversation_id: &str,
        section_override: Option<i32>,
    ) -> Result<(Vec<HistoryMessage>, String), StoryError> {
        let settings = self.store.get_settings(conversation_id)?;
        let progress = self.store.get_progress(conversation_id)?;
        let summary_row = self.store.get_summary(conversation_id)?;
        let appeared = self.store.get_characters(conversation_id, true)?;

        let current_section =
            section_override.or_else(|| progress.as_ref().map(|p| p.current_section));
        let total_sections = progress.as_ref().and_then(|p| p.total_sections);

        let characters = settings
            .as_ref()
            .map(|s| s.character_names())
            .unwrap_or_default();
        let personalities = settings
            .as_ref()
            .map(|s| s.personality_map())
            .unwrap_or_default();

        let system_prompt = self.template.build_system_prompt(&SystemPromptInputs {
            background: settings.as_ref().and_then(|s| s.background.as_deref()),
            characters: &characters,
            personalities: &personalities,
            appeared: &appeared,
            outline: settings.as_ref().and_then(|s| s.outline.as_deref()),
            summary: summary_row.as_ref().map(|s| s.summary.as_str()),
            current_section,
            total_sections,
        });

        let all_messages = self.store.conversation_messages(conversation_id, None, 0)?;
        let system_tokens = token_estimate::estimate(&system_prompt);
        let history = context::assemble(
            &all_messages,
            summary_row.is_some(),
            &self.context_budget,
            system_tokens,
        );

        Ok((history, system_prompt))
    }

    fn summary_check(&mut self, conversation_id: &str) -> Result<(bool, usize), StoryError> {
        let count = self.store.message_count(conversation_id)?;
        let existing = self.store.get_summary(conversation_id)?;
        Ok((
            summary::should_summarize(count, existing.as_ref(), self.summary_threshold),
            count,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SettingsPatch;
    use httpmock::prelude::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn orchestrator(dir: &TempDir, base_url: &str, summary_threshold: usize) -> Orchestrator {
        let db = dir.path().join("orchestrator-test.db");
        let mut store = StoryStore::open(db.to_str().unwrap()).unwrap();
        store
            .upsert_provider_config("ollama", Some("stub-model"), None, Some(base_url), None, None)
            .unwrap();

        let config = PlotlineConfig {
            database_url: db.to_str().unwrap().to_string(),
            summary_threshold,
            ..PlotlineConfig::default()
        };
        let resolver = ProviderResolver::new(&config);
        Orchestrator::new(store, resolver, PromptTemplate::default(), &config)
    }

    fn completion_body(text: &str) -> serde_json::Value {
        json!({
            "id": "cmpl-1",
            "object": "chat.completion",
            "created": 1,
            "model": "stub-model",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": text},
                "finish_reason": "stop"
            }]
        })
    }

    fn set_up_story(orc: &mut Orchestrator, conversation: &str) {
        orc.store_mut()
            .upsert_settings(
                conversation,
                SettingsPatch {
                    background: Some("A detective in 1920s Paris".to_string()),
                    outline: Some("3-part mystery".to_string()),
                    ..SettingsPatch::default()
                },
            )
            .unwrap();
    }

    #[test]
    fn strip_think_removes_reasoning_blocks() {
        let raw = "<think>\nplotting...\n</think>\n\n\nThe rain fell.";
        assert_eq!(strip_think_content(raw), "The rain fell.");
        assert_eq!(strip_think_content("plain text"), "plain text");
    }

    #[tokio::test]
    async fn chat_assigns_an_id_and_persists_the_pair() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(200).json_body(completion_body("Hello there."));
        });

        let dir = TempDir::new().unwrap();
        let mut orc = orchestrator(&dir, &server.base_url(), 150);

        let outcome = orc.chat("Hi!", "ollama", None, None).await.unwrap();
        assert_eq!(outcome.response, "Hello there.");
        assert!(!outcome.conversation_id.is_empty());

        let messages = orc
            .store_mut()
            .conversation_messages(&outcome.conversation_id, None, 0)
            .unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "user");
        assert_eq!(messages[1].role, "assistant");
        assert_eq!(messages[1].model.as_deref(), Some("stub-model"));
        assert_eq!(messages[1].provider.as_deref(), Some("ollama"));
    }

    #[tokio::test]
    async fn chat_rejects_empty_messages_and_unknown_providers() {
        let dir = TempDir::new().unwrap();
        let mut orc = orchestrator(&dir, "http://localhost:1", 150);

        assert!(matches!(
            orc.chat("   ", "ollama", None, None).await,
            Err(StoryError::Validation { .. })
        ));
        assert!(matches!(
            orc.chat("hi", "claude", None, None).await,
            Err(StoryError::Validation { .. })
        ));
    }

    #[tokio::test]
    async fn generation_is_blocked_until_the_outline_is_confirmed() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(200).json_body(completion_body("never sent"));
        });

        let dir = TempDir::new().unwrap();
        let mut orc = orchestrator(&dir, &server.base_url(), 150);
        set_up_story(&mut orc, "story-1");

        // Progress row exists but the outline is not confirmed.
        orc.store_mut()
            .upsert_progress("story-1", ProgressPatch::default())
            .unwrap();

        let err = orc
            .generate_section("story-1", "ollama", None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoryError::Precondition { .. }));

        // No model call, no writes: progress is untouched.
        mock.assert_hits(0);
        let progress = orc.store_mut().get_progress("story-1").unwrap().unwrap();
        assert_eq!(progress.status, "pending");
        assert_eq!(orc.store_mut().message_count("story-1").unwrap(), 0);
    }

    #[tokio::test]
    async fn generation_requires_a_stored_outline() {
        let dir = TempDir::new().unwrap();
        let mut orc = orchestrator(&dir, "http://localhost:1", 150);

        orc.confirm_outline("story-1").unwrap();
        let err = orc
            .generate_section("story-1", "ollama", None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoryError::Precondition { .. }));
    }

    #[tokio::test]
    async fn full_story_flow_generates_confirms_and_advances() {
        let server = MockServer::start();
        let mut section0 = server.mock(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(200)
                .json_body(completion_body("Section 0 content"));
        });

        let dir = TempDir::new().unwrap();
        let mut orc = orchestrator(&dir, &server.base_url(), 150);
        set_up_story(&mut orc, "story-1");

        let confirmed = orc.confirm_outline("story-1").unwrap();
        assert!(confirmed.outline_confirmed);
        assert_eq!(confirmed.current_section, 0);
        assert_eq!(confirmed.status, "pending");

        let outcome = orc.generate_section("story-1", "ollama", None).await.unwrap();
        assert_eq!(outcome.response, "Section 0 content");
        assert_eq!(outcome.progress.current_section, 0);
        assert_eq!(outcome.progress.status, "completed");
        assert_eq!(outcome.progress.last_generated_section, Some(0));
        assert_eq!(
            outcome.progress.last_generated_content.as_deref(),
            Some("Section 0 content")
        );
        assert!(!outcome.needs_summary);
        assert_eq!(outcome.message_count, 2);

        let messages = orc.store_mut().conversation_messages("story-1", None, 0).unwrap();
        assert_eq!(messages.len(), 2);

        section0.delete();
        server.mock(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(200)
                .json_body(completion_body("Section 1 content"));
        });

        let advanced = orc.confirm_section("story-1", "ollama", None).await.unwrap();
        assert_eq!(advanced.progress.current_section, 1);
        assert_eq!(advanced.progress.status, "completed");
        assert_eq!(advanced.progress.last_generated_section, Some(1));
        assert_eq!(advanced.response, "Section 1 content");
    }

    #[tokio::test]
    async fn provider_failure_restores_the_progress_snapshot() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(500).json_body(json!({
                "error": {
                    "message": "backend exploded",
                    "type": "server_error",
                    "param": null,
                    "code": null
                }
            }));
        });

        let dir = TempDir::new().unwrap();
        let mut orc = orchestrator(&dir, &server.base_url(), 150);
        set_up_story(&mut orc, "story-1");
        orc.confirm_outline("story-1").unwrap();

        let err = orc
            .generate_section("story-1", "ollama", None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoryError::Provider { .. }));

        let progress = orc.store_mut().get_progress("story-1").unwrap().unwrap();
        assert_eq!(progress.status, "pending");
        assert_eq!(progress.current_section, 0);
        assert_eq!(orc.store_mut().message_count("story-1").unwrap(), 0);
    }

    #[tokio::test]
    async fn confirm_section_rolls_back_the_increment_on_failure() {
        let server = MockServer::start();
        let mut ok = server.mock(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(200).json_body(completion_body("Section 0 content"));
        });

        let dir = TempDir::new().unwrap();
        let mut orc = orchestrator(&dir, &server.base_url(), 150);
        set_up_story(&mut orc, "story-1");
        orc.confirm_outline("story-1").unwrap();
        orc.generate_section("story-1", "ollama", None).await.unwrap();

        ok.delete();
        server.mock(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(503).json_body(json!({
                "error": {
                    "message": "overloaded",
                    "type": "server_error",
                    "param": null,
                    "code": null
                }
            }));
        });

        let err = orc.confirm_section("story-1", "ollama", None).await.unwrap_err();
        assert!(matches!(err, StoryError::Provider { .. }));

        let progress = orc.store_mut().get_progress("story-1").unwrap().unwrap();
        assert_eq!(progress.current_section, 0);
        assert_eq!(progress.status, "completed");
    }

    #[tokio::test]
    async fn rewrite_validates_feedback_and_replaces_content() {
        let server = MockServer::start();
        let mut first = server.mock(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(200).json_body(completion_body("Section 0 content"));
        });

        let dir = TempDir::new().unwrap();
        let mut orc = orchestrator(&dir, &server.base_url(), 150);
        set_up_story(&mut orc, "story-1");
        orc.confirm_outline("story-1").unwrap();

        // Nothing generated yet: rewrite is a precondition failure, and an
        // empty feedback string never reaches the gates.
        assert!(matches!(
            orc.rewrite_section("story-1", "  ", "ollama", None).await,
            Err(StoryError::Validation { .. })
        ));
        assert!(matches!(
            orc.rewrite_section("story-1", "rewrite it", "ollama", None).await,
            Err(StoryError::Precondition { .. })
        ));

        orc.generate_section("story-1", "ollama", None).await.unwrap();

        first.delete();
        server.mock(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(200).json_body(completion_body("A darker opening"));
        });

        let outcome = orc
            .rewrite_section("story-1", "rewrite it darker", "ollama", None)
            .await
            .unwrap();
        assert_eq!(outcome.response, "A darker opening");
        assert_eq!(outcome.progress.current_section, 0);
        assert_eq!(
            outcome.progress.last_generated_content.as_deref(),
            Some("A darker opening")
        );

        // The transcript records the user's feedback verbatim.
        let messages = orc.store_mut().conversation_messages("story-1", None, 0).unwrap();
        assert_eq!(messages[2].content, "rewrite it darker");
    }

    #[tokio::test]
    async fn summary_flag_and_summary_generation() {
        let server = MockServer::start();
        let mut generate = server.mock(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(200).json_body(completion_body("Section 0 content"));
        });

        let dir = TempDir::new().unwrap();
        // Threshold of 2: the first generated pair already trips it.
        let mut orc = orchestrator(&dir, &server.base_url(), 2);
        set_up_story(&mut orc, "story-1");
        orc.confirm_outline("story-1").unwrap();

        let outcome = orc.generate_section("story-1", "ollama", None).await.unwrap();
        assert!(outcome.needs_summary);

        generate.delete();
        server.mock(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(200).json_body(completion_body("A tidy summary."));
        });

        let summary = orc.generate_summary("story-1", "ollama", None).await.unwrap();
        assert_eq!(summary.summary, "A tidy summary.");
        assert_eq!(summary.message_count, 2);

        let stored = orc.store_mut().get_summary("story-1").unwrap().unwrap();
        assert_eq!(stored.summary, "A tidy summary.");
        assert_eq!(stored.message_count, 2);
        assert!(stored.token_count.is_some());

        // A fresh summary suppresses the flag on the next generation.
        let (needs_summary, _) = orc.summary_check("story-1").unwrap();
        assert!(!needs_summary);
    }

    #[tokio::test]
    async fn generate_summary_requires_history() {
        let dir = TempDir::new().unwrap();
        let mut orc = orchestrator(&dir, "http://localhost:1", 150);

        let err = orc
            .generate_summary("story-1", "ollama", None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoryError::Precondition { .. }));
    }

    #[tokio::test]
    async fn streaming_generation_persists_after_the_stream_ends() {
        let server = MockServer::start();
        let chunk = |content: &str| {
            json!({
                "id": "cmpl-1",
                "object": "chat.completion.chunk",
                "created": 1,
                "model": "stub-model",
                "choices": [{
                    "index": 0,
                    "delta": {"content": content},
                    "finish_reason": null
                }]
            })
            .to_string()
        };
        let body = format!(
            "data: {}\n\ndata: {}\n\ndata: [DONE]\n\n",
            chunk("Section 0 "),
            chunk("content")
        );
        server.mock(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(200)
                .header("content-type", "text/event-stream")
                .body(body);
        });

        let dir = TempDir::new().unwrap();
        let mut orc = orchestrator(&dir, &server.base_url(), 150);
        set_up_story(&mut orc, "story-1");
        orc.confirm_outline("story-1").unwrap();

        let (tx, mut rx) = mpsc::channel(16);
        let outcome = orc
            .generate_section_stream("story-1", "ollama", None, tx)
            .await
            .unwrap();
        assert_eq!(outcome.response, "Section 0 content");
        assert_eq!(outcome.progress.status, "completed");

        let mut streamed = String::new();
        let mut saw_done = false;
        while let Some(event) = rx.recv().await {
            match event {
                StreamEvent::Chunk(c) => streamed.push_str(&c),
                StreamEvent::Done => {
                    saw_done = true;
                    break;
                }
                StreamEvent::Error(e) => panic!("unexpected stream error: {e}"),
            }
        }
        assert_eq!(streamed, "Section 0 content");
        assert!(saw_done);

        assert_eq!(orc.store_mut().message_count("story-1").unwrap(), 2);
    }
}
