//! # Heuristic token estimation
//!
//! Approximates the token cost of text without a real tokenizer: CJK
//! ideographs weigh 1.5 tokens each, whitespace-delimited alphabetic words
//! weigh 1.3. The result is a budget heuristic for the context assembler and
//! summarization bookkeeping, never an exact count.

/// Estimate the token cost of `text`.
///
/// Deterministic, side-effect free, and zero for empty input. The estimate
/// is monotone non-decreasing under repetition: `estimate(s + s) >=
/// estimate(s)`.
pub fn estimate(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }

    let cjk_chars = text
        .chars()
        .filter(|c| ('\u{4e00}'..='\u{9fff}').contains(c))
        .count();
    let alpha_words = text
        .split_whitespace()
        .filter(|w| w.chars().all(char::is_alphabetic))
        .count();

    (cjk_chars as f64 * 1.5 + alpha_words as f64 * 1.3) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_costs_nothing() {
        assert_eq!(estimate(""), 0);
    }

    #[test]
    fn english_words_weigh_more_than_one() {
        // Ten alphabetic words at 1.3 each, truncated.
        let text = "the quick brown fox jumps over the lazy sleeping dog";
        assert_eq!(estimate(text), 13);
    }

    #[test]
    fn cjk_characters_weigh_one_and_a_half() {
        // Four ideographs at 1.5 each. The unspaced run also counts as one
        // alphabetic word, matching the reference heuristic.
        assert_eq!(estimate("星辰大海"), 7);
    }

    #[test]
    fn numeric_tokens_are_not_counted_as_words() {
        assert_eq!(estimate("1234 5678"), 0);
    }

    #[test]
    fn monotone_under_repetition() {
        for text in ["hello world", "侦探在巴黎", "mixed 中文 and english", "a"] {
            let doubled = format!("{text} {text}");
            assert!(estimate(&doubled) >= estimate(text));
        }
    }
}
