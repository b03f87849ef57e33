//! # Story progression state machine
//!
//! Per-conversation section tracking. The status cycles across requests:
//!
//! ```text
//! pending ──► generating ──► completed ──► generating ──► completed ─ ...
//! ```
//!
//! with an orthogonal `outline_confirmed` flag that gates generation: no
//! section may be generated until the outline is confirmed. There is no
//! terminal state; sections keep advancing for the lifetime of the
//! conversation.
//!
//! The gates in this module are checked by the orchestrator **before** any
//! write happens, so a failed gate leaves the stored progress untouched.
//! When a generation call fails after `generating` has been written, the
//! orchestrator restores the snapshot taken beforehand so the status never
//! dangles in `generating`.

use crate::error::StoryError;
use crate::models::StoryProgress;

/// Generation status of the current section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionStatus {
    Pending,
    Generating,
    Completed,
}

impl SectionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Generating => "generating",
            Self::Completed => "completed",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, StoryError> {
        match raw {
            "pending" => Ok(Self::Pending),
            "generating" => Ok(Self::Generating),
            "completed" => Ok(Self::Completed),
            other => Err(StoryError::Internal(format!(
                "unknown section status '{other}'"
            ))),
        }
    }
}

/// Partial update applied to a conversation's progress row. `None` fields
/// keep their stored value; missing rows are created with the machine's
/// initial state (`current_section = 0`, `pending`, outline unconfirmed)
/// before the patch is applied.
#[derive(Debug, Clone, Default)]
pub struct ProgressPatch {
    pub current_section: Option<i32>,
    pub total_sections: Option<i32>,
    pub last_generated_content: Option<String>,
    pub last_generated_section: Option<i32>,
    pub status: Option<SectionStatus>,
    pub outline_confirmed: Option<bool>,
}

impl ProgressPatch {
    pub fn status(status: SectionStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn confirm_outline() -> Self {
        Self {
            outline_confirmed: Some(true),
            ..Self::default()
        }
    }

    pub fn advance_to(section: i32) -> Self {
        Self {
            current_section: Some(section),
            status: Some(SectionStatus::Generating),
            ..Self::default()
        }
    }

    pub fn section_completed(section: i32, content: String) -> Self {
        Self {
            last_generated_content: Some(content),
            last_generated_section: Some(section),
            status: Some(SectionStatus::Completed),
            ..Self::default()
        }
    }

    pub fn rewrite_completed(content: String) -> Self {
        Self {
            last_generated_content: Some(content),
            status: Some(SectionStatus::Completed),
            ..Self::default()
        }
    }
}

/// Gate for `generate_section`: progress must exist with the outline
/// confirmed. Returns the progress row so the caller can snapshot it.
pub fn ensure_outline_confirmed(
    progress: Option<StoryProgress>,
) -> Result<StoryProgress, StoryError> {
    match progress {
        Some(p) if p.outline_confirmed => Ok(p),
        _ => Err(StoryError::precondition(
            "outline is not confirmed; confirm the outline before generating sections",
        )),
    }
}

/// Gate for `confirm_section`: a progress row must already exist.
pub fn ensure_progress_exists(
    progress: Option<StoryProgress>,
) -> Result<StoryProgress, StoryError> {
    progress.ok_or_else(|| {
        StoryError::precondition("no story progress found for this conversation")
    })
}

/// Gate for `rewrite_section`: there must be something to rewrite.
pub fn ensure_rewrite_source(progress: &StoryProgress) -> Result<String, StoryError> {
    progress
        .last_generated_content
        .as_ref()
        .filter(|content| !content.is_empty())
        .cloned()
        .ok_or_else(|| StoryError::precondition("no previously generated content to rewrite"))
}
