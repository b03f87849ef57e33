//! # Summarization trigger and prompt
//!
//! Decides when a conversation's history has grown enough to need a fresh
//! summary, and builds the summarization prompt over the **full** history
//! (compressing that history is the whole point, so the budget-limited
//! context assembler is deliberately not involved here).

use crate::models::{ChatMessage, ConversationSummary};
use crate::prompt::PromptTemplate;

/// Should this conversation be (re)summarized now?
///
/// True when the message count has reached `threshold` and either no summary
/// exists yet, or the existing one is at least `threshold / 2` messages
/// stale. The half-threshold interval gives the trigger hysteresis: once a
/// summary lands, another is not requested until a meaningful amount of new
/// history has accumulated.
pub fn should_summarize(
    message_count: usize,
    existing_summary: Option<&ConversationSummary>,
    threshold: usize,
) -> bool {
    if message_count < threshold {
        return false;
    }

    match existing_summary {
        None => true,
        Some(summary) => {
            let update_interval = threshold / 2;
            message_count >= summary.message_count.max(0) as usize + update_interval
        }
    }
}

/// Build the summarization prompt from the full message history.
///
/// Messages with roles other than `user`/`assistant` are skipped.
pub fn build_summary_prompt(template: &PromptTemplate, messages: &[ChatMessage]) -> String {
    let text = &template.summary_prompt;
    let mut parts: Vec<String> = Vec::new();

    parts.push(text.intro.clone());
    parts.push(text.include_title.clone());
    parts.extend(text.include_items.iter().cloned());
    parts.push(String::new());
    parts.push(text.requirements_title.clone());
    parts.extend(text.requirement_items.iter().cloned());
    parts.push(String::new());
    parts.push(text.content_intro.clone());
    parts.push(String::new());

    for msg in messages {
        match msg.role.as_str() {
            "user" => parts.push(format!("{}{}", text.user_prefix, msg.content)),
            "assistant" => parts.push(format!("{}{}", text.assistant_prefix, msg.content)),
            _ => continue,
        }
        parts.push(String::new());
    }

    parts.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::now_rfc3339;

    fn summary_at(message_count: i32) -> ConversationSummary {
        ConversationSummary {
            id: Some(1),
            conversation_id: "c1".to_string(),
            summary: "so far...".to_string(),
            message_count,
            token_count: None,
            created_at: now_rfc3339(),
            updated_at: now_rfc3339(),
        }
    }

    #[test]
    fn below_threshold_never_summarizes() {
        assert!(!should_summarize(100, None, 150));
        assert!(!should_summarize(100, Some(&summary_at(10)), 150));
    }

    #[test]
    fn at_threshold_without_summary_triggers() {
        assert!(should_summarize(150, None, 150));
    }

    #[test]
    fn fresh_summary_suppresses_resummarization() {
        // 160 < 150 + 75
        assert!(!should_summarize(160, Some(&summary_at(150)), 150));
    }

    #[test]
    fn stale_summary_triggers_again() {
        // 230 >= 150 + 75
        assert!(should_summarize(230, Some(&summary_at(150)), 150));
        // Boundary: exactly threshold/2 messages of drift.
        assert!(should_summarize(225, Some(&summary_at(150)), 150));
    }

    #[test]
    fn summary_prompt_prefixes_roles_and_keeps_order() {
        let template = PromptTemplate::default();
        let messages = vec![
            ChatMessage {
                id: Some(1),
                conversation_id: "c1".to_string(),
                role: "user".to_string(),
                content: "Begin the story.".to_string(),
                model: None,
                provider: None,
                created_at: now_rfc3339(),
            },
            ChatMessage {
                id: Some(2),
                conversation_id: "c1".to_string(),
                role: "assistant".to_string(),
                content: "It began at midnight.".to_string(),
                model: None,
                provider: None,
                created_at: now_rfc3339(),
            },
        ];

        let prompt = build_summary_prompt(&template, &messages);
        let user_pos = prompt.find("User: Begin the story.").expect("user line");
        let assistant_pos = prompt
            .find("Assistant: It began at midnight.")
            .expect("assistant line");
        assert!(user_pos < assistant_pos);
        assert!(prompt.starts_with(&template.summary_prompt.intro));
    }
}
