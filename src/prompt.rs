//! # Prompt templates and builders
//!
//! All model-facing instruction text lives in [`PromptTemplate`], a plain
//! serde struct with a built-in English default that can be overridden from
//! a YAML file in the per-platform config directory:
//!
//! ```text
//! <config_dir>/templates/story.yaml
//! ```
//!
//! Two pure builders operate on the template:
//!
//! - [`PromptTemplate::build_system_prompt`] assembles the single system
//!   instruction for a generation turn, in fixed order: framing, story
//!   background, character roster with personalities, appeared characters,
//!   outline (with a section-progress marker when both the current and
//!   total section counts are known, else a generic pacing note), prior
//!   summary with a continuity instruction, creative guidelines,
//!   feedback-handling rules, and output rules. Same inputs, same text.
//! - [`PromptTemplate::build_feedback_prompt`] wraps user feedback for the
//!   rewrite operation. Feedback is classified by keyword membership into
//!   rewrite / adjust / continue; the rewrite keyword list is checked first
//!   and wins over adjust when both match. The precedence is load-bearing
//!   for compatibility, so keep the check order if you touch this.

use crate::error::StoryError;
use crate::models::CharacterRecord;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Which handling mode a piece of feedback falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackCategory {
    Rewrite,
    Adjust,
    Continue,
}

/// Text blocks for one feedback-handling mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackMode {
    /// Lowercase substrings that select this mode. Empty for the fallback.
    pub keywords: Vec<String>,
    pub label: String,
    pub content_label: String,
    pub instruction: String,
}

/// Feedback-prompt text blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackTemplate {
    pub intro: String,
    pub rewrite: FeedbackMode,
    pub adjust: FeedbackMode,
    #[serde(rename = "continue")]
    pub continue_mode: FeedbackMode,
}

/// Text blocks for the summarization prompt built over the full history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryPromptTemplate {
    pub intro: String,
    pub include_title: String,
    pub include_items: Vec<String>,
    pub requirements_title: String,
    pub requirement_items: Vec<String>,
    pub content_intro: String,
    pub user_prefix: String,
    pub assistant_prefix: String,
}

/// Every piece of instruction text the orchestrator sends to a model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptTemplate {
    /// Role/task framing; always present.
    pub introduction: Vec<String>,
    pub background_header: String,
    pub characters_header: String,
    pub character_note: String,
    pub appeared_header: String,
    pub appeared_available_label: String,
    pub appeared_unavailable_label: String,
    pub appeared_main_label: String,
    pub appeared_auto_label: String,
    pub outline_header: String,
    /// Section-progress marker; `{current}` and `{total}` are substituted
    /// with the 1-indexed section number and the section count.
    pub outline_progress: String,
    pub outline_progress_title: String,
    pub outline_progress_instructions: Vec<String>,
    /// Used instead of the marker when the section position is unknown.
    pub outline_pacing_note: String,
    pub summary_header: String,
    pub summary_intro: String,
    pub summary_note: String,
    pub guidelines_title: String,
    pub guidelines: Vec<String>,
    pub feedback_title: String,
    pub feedback_intro: String,
    pub feedback_rules: Vec<String>,
    pub output_title: String,
    pub output_rules: Vec<String>,
    /// Appended to the output rules only when a section index is in play.
    pub output_section_rule: String,
    /// User-turn instruction for generating the current section.
    pub generate_instruction: String,
    /// User-turn instruction for continuing into the next section.
    pub continue_instruction: String,
    pub feedback: FeedbackTemplate,
    pub summary_prompt: SummaryPromptTemplate,
}

/// Inputs for [`PromptTemplate::build_system_prompt`]. Everything is
/// optional except the fixed framing/guideline/output blocks, which are
/// always emitted.
#[derive(Debug, Clone, Copy)]
pub struct SystemPromptInputs<'a> {
    pub background: Option<&'a str>,
    pub characters: &'a [String],
    pub personalities: &'a HashMap<String, String>,
    pub appeared: &'a [CharacterRecord],
    pub outline: Option<&'a str>,
    pub summary: Option<&'a str>,
    /// Zero-based; rendered 1-indexed in the progress marker.
    pub current_section: Option<i32>,
    pub total_sections: Option<i32>,
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self {
            introduction: vec![
                "You are a skilled fiction writer collaborating on an interactive story."
                    .to_string(),
                "Write vivid, coherent prose that continues the story the user is building."
                    .to_string(),
                String::new(),
            ],
            background_header: "## Story Background".to_string(),
            characters_header: "## Characters".to_string(),
            character_note: "Keep every character consistent with the personality given above."
                .to_string(),
            appeared_header: "## Appeared Characters".to_string(),
            appeared_available_label: "**Available characters**:".to_string(),
            appeared_unavailable_label: "**Unavailable characters** (do not bring back):"
                .to_string(),
            appeared_main_label: " (main)".to_string(),
            appeared_auto_label: " (auto-detected)".to_string(),
            outline_header: "## Story Outline".to_string(),
            outline_progress: "You are currently writing section {current}/{total} of the story."
                .to_string(),
            outline_progress_title: "Section instructions:".to_string(),
            outline_progress_instructions: vec![
                "- Cover only the events belonging to this section of the outline.".to_string(),
                "- End at a natural stopping point that leads into the next section.".to_string(),
            ],
            outline_pacing_note:
                "Follow the outline and pace the story so every part of it gets its due."
                    .to_string(),
            summary_header: "## Story So Far".to_string(),
            summary_intro: "A summary of everything written before this point:".to_string(),
            summary_note:
                "Stay strictly consistent with the summary above; do not contradict established events."
                    .to_string(),
            guidelines_title: "## Creative Guidelines".to_string(),
            guidelines: vec![
                "- Show, don't tell; prefer concrete sensory detail over abstraction.".to_string(),
                "- Keep dialogue natural and distinct per character.".to_string(),
                "- Maintain continuity of names, places, and timeline.".to_string(),
                "- Match the tone and register already established in the story.".to_string(),
            ],
            feedback_title: "## Feedback Handling".to_string(),
            feedback_intro: "When the user gives feedback on generated text:".to_string(),
            feedback_rules: vec![
                "- A rewrite request replaces the previous passage entirely.".to_string(),
                "- An adjustment request changes only what the user points at and keeps the rest."
                    .to_string(),
                "- Anything else continues the story forward.".to_string(),
            ],
            output_title: "## Output Requirements".to_string(),
            output_rules: vec![
                "- Respond with story prose only; no commentary about being an AI.".to_string(),
                "- Do not repeat text the story already contains.".to_string(),
            ],
            output_section_rule:
                "- Write one complete section per response; do not run ahead of the outline."
                    .to_string(),
            generate_instruction: "Please write the current section of the story.".to_string(),
            continue_instruction:
                "The previous section is confirmed. Please continue with the next section."
                    .to_string(),
            feedback: FeedbackTemplate {
                intro: "The user has given the following feedback:".to_string(),
                rewrite: FeedbackMode {
                    keywords: vec![
                        "rewrite".to_string(),
                        "redo".to_string(),
                        "start over".to_string(),
                        "scrap".to_string(),
                        "from scratch".to_string(),
                    ],
                    label: "This is a REWRITE request.".to_string(),
                    content_label: "The passage to rewrite:".to_string(),
                    instruction:
                        "Write a full replacement for the passage above, honoring the feedback."
                            .to_string(),
                },
                adjust: FeedbackMode {
                    keywords: vec![
                        "adjust".to_string(),
                        "modify".to_string(),
                        "change".to_string(),
                        "tweak".to_string(),
                        "revise".to_string(),
                        "edit".to_string(),
                    ],
                    label: "This is an ADJUSTMENT request.".to_string(),
                    content_label: "The passage to adjust:".to_string(),
                    instruction:
                        "Keep the passage above mostly intact and change only what the feedback asks for."
                            .to_string(),
                },
                continue_mode: FeedbackMode {
                    keywords: Vec::new(),
                    label: "This is a CONTINUATION request.".to_string(),
                    content_label: String::new(),
                    instruction: "Continue the story, taking the feedback into account."
                        .to_string(),
                },
            },
            summary_prompt: SummaryPromptTemplate {
                intro: "Summarize the story written so far in the conversation below.".to_string(),
                include_title: "The summary must cover:".to_string(),
                include_items: vec![
                    "- The main events, in order.".to_string(),
                    "- Every named character and their current situation.".to_string(),
                    "- Unresolved threads and open questions.".to_string(),
                ],
                requirements_title: "Requirements:".to_string(),
                requirement_items: vec![
                    "- Plain prose, no headings or lists.".to_string(),
                    "- Dense but faithful; do not invent events.".to_string(),
                ],
                content_intro: "The conversation:".to_string(),
                user_prefix: "User: ".to_string(),
                assistant_prefix: "Assistant: ".to_string(),
            },
        }
    }
}

impl PromptTemplate {
    /// Load a template override from a YAML file.
    pub fn load(path: &Path) -> Result<Self, StoryError> {
        tracing::info!("loading prompt template: {}", path.display());
        let content = fs::read_to_string(path)
            .map_err(|e| StoryError::Internal(format!("cannot read {}: {e}", path.display())))?;
        serde_yaml::from_str(&content)
            .map_err(|e| StoryError::Internal(format!("invalid template {}: {e}", path.display())))
    }

    /// Assemble the system instruction for one generation turn.
    pub fn build_system_prompt(&self, inputs: &SystemPromptInputs) -> String {
        let mut parts: Vec<String> = Vec::new();
        parts.extend(self.introduction.iter().cloned());

        if let Some(background) = inputs.background {
            parts.push(self.background_header.clone());
            parts.push(background.to_string());
            parts.push(String::new());
        }

        if !inputs.characters.is_empty() {
            parts.push(self.characters_header.clone());
            for (i, name) in inputs.characters.iter().enumerate() {
                match inputs.personalities.get(name).filter(|p| !p.is_empty()) {
                    Some(personality) => {
                        parts.push(format!("{}. **{name}** - {personality}", i + 1))
                    }
                    None => parts.push(format!("{}. **{name}**", i + 1)),
                }
            }
            parts.push(String::new());
            parts.push(self.character_note.clone());
            parts.push(String::new());
        }

        if !inputs.appeared.is_empty() {
            parts.push(self.appeared_header.clone());
            let (available, unavailable): (Vec<_>, Vec<_>) =
                inputs.appeared.iter().partition(|c| !c.is_unavailable);

            if !available.is_empty() {
                parts.push(self.appeared_available_label.clone());
                for character in available {
                    let main = if character.is_main {
                        self.appeared_main_label.as_str()
                    } else {
                        ""
                    };
                    let auto = if !character.is_main {
                        self.appeared_auto_label.as_str()
                    } else {
                        ""
                    };
                    parts.push(format!("- {}{main}{auto}", character.name));
                }
                parts.push(String::new());
            }

            if !unavailable.is_empty() {
                parts.push(self.appeared_unavailable_label.clone());
                for character in unavailable {
                    match character.notes.as_deref().filter(|n| !n.is_empty()) {
                        Some(notes) => parts.push(format!("- {} ({notes})", character.name)),
                        None => parts.push(format!("- {}", character.name)),
                    }
                }
                parts.push(String::new());
            }
        }

        if let Some(outline) = inputs.outline {
            parts.push(self.outline_header.clone());
            parts.push(outline.to_string());
            parts.push(String::new());

            match (inputs.current_section, inputs.total_sections) {
                (Some(current), Some(total)) => {
                    let marker = self
                        .outline_progress
                        .replace("{current}", &(current + 1).to_string())
                        .replace("{total}", &total.to_string());
                    parts.push(marker);
                    parts.push(String::new());
                    parts.push(self.outline_progress_title.clone());
                    parts.extend(self.outline_progress_instructions.iter().cloned());
                    parts.push(String::new());
                }
                _ => {
                    parts.push(self.outline_pacing_note.clone());
                    parts.push(String::new());
                }
            }
        }

        if let Some(summary) = inputs.summary {
            parts.push(self.summary_header.clone());
            parts.push(self.summary_intro.clone());
            parts.push(summary.to_string());
            parts.push(String::new());
            parts.push(self.summary_note.clone());
            parts.push(String::new());
        }

        parts.push(self.guidelines_title.clone());
        parts.extend(self.guidelines.iter().cloned());
        parts.push(String::new());

        parts.push(self.feedback_title.clone());
        parts.push(self.feedback_intro.clone());
        parts.extend(self.feedback_rules.iter().cloned());
        parts.push(String::new());

        parts.push(self.output_title.clone());
        parts.extend(self.output_rules.iter().cloned());
        if inputs.current_section.is_some() {
            parts.push(self.output_section_rule.clone());
        }

        parts.join("\n")
    }

    /// Classify feedback by keyword membership. Rewrite keywords are
    /// checked before adjust keywords; first match wins.
    pub fn classify_feedback(&self, feedback: &str) -> FeedbackCategory {
        let lowered = feedback.to_lowercase();
        if self.feedback.rewrite.keywords.iter().any(|k| lowered.contains(k.as_str())) {
            FeedbackCategory::Rewrite
        } else if self.feedback.adjust.keywords.iter().any(|k| lowered.contains(k.as_str())) {
            FeedbackCategory::Adjust
        } else {
            FeedbackCategory::Continue
        }
    }

    /// Build the user-turn prompt that carries feedback into a rewrite
    /// request. For rewrite/adjust feedback the previous passage is quoted
    /// so the model has the text to revise.
    pub fn build_feedback_prompt(&self, feedback: &str, previous_content: Option<&str>) -> String {
        let mut parts: Vec<String> = Vec::new();
        parts.push(self.feedback.intro.clone());
        parts.push(feedback.to_string());
        parts.push(String::new());

        let mode = match self.classify_feedback(feedback) {
            FeedbackCategory::Rewrite => &self.feedback.rewrite,
            FeedbackCategory::Adjust => &self.feedback.adjust,
            FeedbackCategory::Continue => {
                parts.push(self.feedback.continue_mode.label.clone());
                parts.push(self.feedback.continue_mode.instruction.clone());
                return parts.join("\n");
            }
        };

        parts.push(mode.label.clone());
        if let Some(previous) = previous_content {
            parts.push(String::new());
            parts.push(mode.content_label.clone());
            parts.push(previous.to_string());
            parts.push(String::new());
            parts.push(mode.instruction.clone());
        }

        parts.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::now_rfc3339;

    fn empty_inputs<'a>(personalities: &'a HashMap<String, String>) -> SystemPromptInputs<'a> {
        SystemPromptInputs {
            background: None,
            characters: &[],
            personalities,
            appeared: &[],
            outline: None,
            summary: None,
            current_section: None,
            total_sections: None,
        }
    }

    #[test]
    fn bare_prompt_still_carries_the_fixed_blocks() {
        let template = PromptTemplate::default();
        let personalities = HashMap::new();
        let prompt = template.build_system_prompt(&empty_inputs(&personalities));

        assert!(!prompt.is_empty());
        assert!(prompt.contains(&template.introduction[0]));
        assert!(prompt.contains(&template.guidelines_title));
        assert!(prompt.contains(&template.feedback_title));
        assert!(prompt.contains(&template.output_title));
        // Without a section index, the section output rule is dropped.
        assert!(!prompt.contains(&template.output_section_rule));
        assert!(!prompt.contains(&template.background_header));
    }

    #[test]
    fn progress_marker_is_one_indexed() {
        let template = PromptTemplate::default();
        let personalities = HashMap::new();
        let mut inputs = empty_inputs(&personalities);
        inputs.outline = Some("A 3-part mystery");
        inputs.current_section = Some(1);
        inputs.total_sections = Some(3);

        let prompt = template.build_system_prompt(&inputs);
        assert!(prompt.contains("2/3"));
        assert!(prompt.contains(&template.output_section_rule));
        assert!(!prompt.contains(&template.outline_pacing_note));
    }

    #[test]
    fn outline_without_position_gets_the_pacing_note() {
        let template = PromptTemplate::default();
        let personalities = HashMap::new();
        let mut inputs = empty_inputs(&personalities);
        inputs.outline = Some("A 3-part mystery");

        let prompt = template.build_system_prompt(&inputs);
        assert!(prompt.contains(&template.outline_pacing_note));
    }

    #[test]
    fn roster_lists_personalities_in_order() {
        let template = PromptTemplate::default();
        let characters = vec!["Ada".to_string(), "Brendan".to_string()];
        let mut personalities = HashMap::new();
        personalities.insert("Ada".to_string(), "sharp-tongued archivist".to_string());

        let mut inputs = empty_inputs(&personalities);
        inputs.characters = &characters;

        let prompt = template.build_system_prompt(&inputs);
        assert!(prompt.contains("1. **Ada** - sharp-tongued archivist"));
        assert!(prompt.contains("2. **Brendan**"));
    }

    #[test]
    fn appeared_characters_split_by_availability() {
        let template = PromptTemplate::default();
        let personalities = HashMap::new();
        let appeared = vec![
            CharacterRecord {
                id: Some(1),
                conversation_id: "c1".to_string(),
                name: "Ada".to_string(),
                is_main: true,
                is_unavailable: false,
                first_message_id: Some(1),
                notes: None,
                created_at: now_rfc3339(),
                updated_at: now_rfc3339(),
            },
            CharacterRecord {
                id: Some(2),
                conversation_id: "c1".to_string(),
                name: "Brendan".to_string(),
                is_main: false,
                is_unavailable: true,
                first_message_id: Some(3),
                notes: Some("left for Marseille".to_string()),
                created_at: now_rfc3339(),
                updated_at: now_rfc3339(),
            },
        ];

        let mut inputs = empty_inputs(&personalities);
        inputs.appeared = &appeared;

        let prompt = template.build_system_prompt(&inputs);
        assert!(prompt.contains("- Ada (main)"));
        assert!(prompt.contains("- Brendan (left for Marseille)"));
    }

    #[test]
    fn identical_inputs_build_identical_text() {
        let template = PromptTemplate::default();
        let personalities = HashMap::new();
        let mut inputs = empty_inputs(&personalities);
        inputs.background = Some("A detective in 1920s Paris");
        inputs.summary = Some("The detective found the first clue.");

        assert_eq!(
            template.build_system_prompt(&inputs),
            template.build_system_prompt(&inputs)
        );
    }

    #[test]
    fn rewrite_keywords_take_precedence_over_adjust() {
        let template = PromptTemplate::default();
        assert_eq!(
            template.classify_feedback("Please rewrite this but also adjust the pacing"),
            FeedbackCategory::Rewrite
        );
        assert_eq!(
            template.classify_feedback("tweak the dialogue a little"),
            FeedbackCategory::Adjust
        );
        assert_eq!(
            template.classify_feedback("love it, keep going"),
            FeedbackCategory::Continue
        );
    }

    #[test]
    fn rewrite_prompt_quotes_the_previous_passage() {
        let template = PromptTemplate::default();
        let prompt =
            template.build_feedback_prompt("rewrite the ending", Some("It was a dark night."));
        assert!(prompt.contains("rewrite the ending"));
        assert!(prompt.contains(&template.feedback.rewrite.label));
        assert!(prompt.contains("It was a dark night."));
        assert!(prompt.contains(&template.feedback.rewrite.instruction));
    }

    #[test]
    fn continue_feedback_skips_the_previous_passage() {
        let template = PromptTemplate::default();
        let prompt = template.build_feedback_prompt("more tension please", Some("old text"));
        assert!(prompt.contains(&template.feedback.continue_mode.label));
        assert!(!prompt.contains("old text"));
    }

    #[test]
    fn template_round_trips_through_yaml() {
        let template = PromptTemplate::default();
        let yaml = serde_yaml::to_string(&template).expect("serializes");
        let reloaded: PromptTemplate = serde_yaml::from_str(&yaml).expect("deserializes");
        assert_eq!(reloaded.generate_instruction, template.generate_instruction);
        assert_eq!(
            reloaded.feedback.rewrite.keywords,
            template.feedback.rewrite.keywords
        );
    }
}
