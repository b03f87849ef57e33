//! # Context assembly
//!
//! Selects the slice of conversation history to send with a generation
//! request. Two regimes:
//!
//! - **Summarized** conversations send only the most recent
//!   `recent_with_summary` messages; the summary text itself travels in the
//!   system prompt, so the bounded tail keeps cost flat no matter how long
//!   the history grows.
//! - **Unsummarized** conversations walk the history newest-to-oldest,
//!   accumulating estimated tokens on top of the system prompt's cost, and
//!   stop at either the token budget or the message-count cap. The newest
//!   message is always kept, even when it alone blows the budget, so a
//!   non-empty history never assembles to nothing.
//!
//! The returned sequence is always chronological, never duplicates a
//! message, and is a contiguous suffix of the input.

use crate::models::ChatMessage;
use crate::token_estimate;

/// Budgets governing history selection.
#[derive(Debug, Clone)]
pub struct ContextBudget {
    /// Hard cap on selected messages when no summary exists.
    pub max_message_count: usize,
    /// Token ceiling for system prompt plus selected history.
    pub max_context_tokens: usize,
    /// Fixed tail length once a summary exists.
    pub recent_with_summary: usize,
}

impl Default for ContextBudget {
    fn default() -> Self {
        Self {
            max_message_count: 100,
            max_context_tokens: 60_000,
            recent_with_summary: 15,
        }
    }
}

/// A role/content pair ready to be sent to the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryMessage {
    pub role: String,
    pub content: String,
}

impl From<&ChatMessage> for HistoryMessage {
    fn from(msg: &ChatMessage) -> Self {
        Self {
            role: msg.role.clone(),
            content: msg.content.clone(),
        }
    }
}

/// Select the history to include this turn.
///
/// `summarized` says whether the conversation currently has a summary (the
/// summary text is supplied to the model through the system prompt, not
/// through this list). `system_prompt_tokens` seeds the running token total
/// in the unsummarized regime.
pub fn assemble(
    all_messages: &[ChatMessage],
    summarized: bool,
    budget: &ContextBudget,
    system_prompt_tokens: usize,
) -> Vec<HistoryMessage> {
    if summarized {
        let skip = all_messages.len().saturating_sub(budget.recent_with_summary);
        return all_messages[skip..].iter().map(HistoryMessage::from).collect();
    }

    let mut selected: Vec<HistoryMessage> = Vec::new();
    let mut running_tokens = system_prompt_tokens;

    for msg in all_messages.iter().rev() {
        let msg_tokens = token_estimate::estimate(&msg.content);
        if running_tokens + msg_tokens > budget.max_context_tokens && !selected.is_empty() {
            break;
        }
        if selected.len() >= budget.max_message_count {
            break;
        }
        selected.push(HistoryMessage::from(msg));
        running_tokens += msg_tokens;
    }

    selected.reverse();
    selected
}
