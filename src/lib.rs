//! # Plotline (library root)
//!
//! Backend core for an AI-assisted interactive story-writing application.
//! A request comes in, the orchestrator assembles conversation context
//! under a token budget, builds the system prompt from the story's
//! settings, calls one of two interchangeable OpenAI-compatible providers,
//! persists the exchange in SQLite, and decides whether the history has
//! grown enough to need summarizing.
//!
//! ## Modules
//! - [`orchestrator`]: the public operations (chat, confirm-outline,
//!   generate/confirm/rewrite section, generate summary).
//! - [`context`]: budget-limited history selection.
//! - [`prompt`]: system/feedback prompt builders and their template text.
//! - [`summary`]: summarization trigger and summary prompt.
//! - [`progress`]: the per-conversation section state machine.
//! - [`token_estimate`]: the heuristic token counter behind every budget.
//! - [`api`]: the LLM provider capability (plain and streaming).
//! - [`store`], [`models`], [`schema`]: SQLite persistence via Diesel.
//! - [`config`]: YAML app config and per-provider config resolution.
//! - [`error`]: the validation / precondition / provider / internal
//!   error taxonomy.
//! - [`commands`]: the clap CLI surface used by the `plot` binary.

use directories::ProjectDirs;
use std::path::PathBuf;

pub mod api;
pub mod commands;
pub mod config;
pub mod context;
pub mod error;
pub mod models;
pub mod orchestrator;
pub mod progress;
pub mod prompt;
pub mod schema;
pub mod store;
pub mod summary;
pub mod token_estimate;

use crate::error::StoryError;

/// Per-platform configuration directory for Plotline.
///
/// Resolved with [`directories::ProjectDirs`] under the application triple
/// `("io", "plotline", "plot")`, e.g. `~/.config/plot` on Linux. The
/// directory is not created by this function; `plot init` does that.
pub fn config_dir() -> Result<PathBuf, StoryError> {
    let proj_dirs = ProjectDirs::from("io", "plotline", "plot")
        .ok_or_else(|| StoryError::Internal("unable to determine config directory".to_string()))?;
    Ok(proj_dirs.config_dir().to_path_buf())
}
