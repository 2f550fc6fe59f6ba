//! Voice-safe end-of-task recaps.
//!
//! The recap has a fixed shape: sentence one starts with "I did", sentence
//! two contains "I learned", sentence three asks a "Next ...?" question.
//! The LLM is untrusted for shape, so its output always passes through a
//! deterministic normalizer; if the call fails entirely a recap is built
//! from the source text alone.

use std::sync::Arc;
use std::sync::OnceLock;

use regex::Regex;

use kestrel_domain::chat::ChatMessage;
use kestrel_domain::config::SUMMARIZER_TIMEOUT;
use kestrel_providers::ChatProvider;

fn re(cell: &'static OnceLock<Regex>, pattern: &'static str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("static pattern"))
}

const NEXT_QUESTION: &str = "Next, should I proceed?";
const CONTINUATION_TOKENS: &[&str] = &["proceed", "continue", "answer"];

pub struct Summarizer {
    provider: Arc<dyn ChatProvider>,
    model: Option<String>,
}

impl Summarizer {
    pub fn new(provider: Arc<dyn ChatProvider>, model: Option<String>) -> Self {
        Self { provider, model }
    }

    /// Produce the three-sentence recap for a turn's accumulated output.
    pub async fn summarize(&self, source_text: &str) -> String {
        let prompt = format!(
            "Summarize the assistant's response as a short, spoken end-of-task recap.\n\
             Include brief mentions of any code blocks, shell commands, file changes, or outputs.\n\
             Only use facts present in the text; do not invent details.\n\
             Output exactly three sentences in this order:\n\
             1) \"I did ...\"\n\
             2) \"I learned ...\"\n\
             3) \"Next ...?\" (ask whether we should proceed)\n\
             Keep each sentence concise and factual. No bullet points or preamble.\n\n\
             ---\n{source_text}\n---"
        );

        let messages = [
            ChatMessage::system("You are a concise summarizer."),
            ChatMessage::user(prompt),
        ];

        let raw = match tokio::time::timeout(
            SUMMARIZER_TIMEOUT,
            self.provider.chat(&messages, self.model.as_deref(), None),
        )
        .await
        {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "summarizer LLM call failed, using fallback");
                String::new()
            }
            Err(_) => {
                tracing::warn!("summarizer LLM call timed out, using fallback");
                String::new()
            }
        };

        normalize_summary(&raw, source_text)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Normalizer
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Split into sentences at `[.!?]` followed by whitespace (or end).
fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.trim().chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);
        if matches!(c, '.' | '!' | '?') && chars.peek().map_or(true, |n| n.is_whitespace()) {
            while chars.peek().map_or(false, |n| n.is_whitespace()) {
                chars.next();
            }
            let sentence = current.trim().to_string();
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
            current.clear();
        }
    }
    let tail = current.trim().to_string();
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}

fn has_continuation_token(text: &str) -> bool {
    let lowered = text.to_lowercase();
    CONTINUATION_TOKENS.iter().any(|t| lowered.contains(t))
}

/// Guarantee the recap ends on a "Next ...?" style question.
fn enforce_next_question(text: &str) -> String {
    static NEXT: OnceLock<Regex> = OnceLock::new();

    let text = text.trim();
    let mut sentences = split_sentences(text);

    if sentences.len() < 3 {
        if has_continuation_token(text) {
            return text.to_string();
        }
        if text.to_lowercase().contains("next") {
            return re(&NEXT, r"(?i)next\s*[^.?!]*\??")
                .replace(text, NEXT_QUESTION)
                .into_owned();
        }
        return format!("{text} {NEXT_QUESTION}");
    }

    if has_continuation_token(&sentences[2]) {
        return text.to_string();
    }
    sentences[2] = NEXT_QUESTION.to_string();
    sentences.join(" ")
}

fn has_format(text: &str) -> bool {
    let trimmed = text.trim();
    trimmed.starts_with("I did")
        && trimmed.contains("I learned")
        && trimmed.contains("Next")
        && trimmed.contains('?')
}

/// Normalize an LLM recap, falling back to a deterministic summary built
/// from the source text when the shape cannot be recovered.
pub fn normalize_summary(raw_summary: &str, source_text: &str) -> String {
    static CODE_BLOCK: OnceLock<Regex> = OnceLock::new();
    static WHITESPACE: OnceLock<Regex> = OnceLock::new();

    let raw = raw_summary.trim();
    if !raw.is_empty() {
        let enforced = enforce_next_question(raw);
        if has_format(&enforced) {
            return enforced;
        }
    }

    let code_re = re(&CODE_BLOCK, r"```[\s\S]*?```");
    let code_blocks = code_re.find_iter(source_text).count();
    let clean = code_re.replace_all(source_text, " code block ");
    let clean = re(&WHITESPACE, r"\s+").replace_all(&clean, " ");
    let clean = clean.trim();

    let snippet_words: Vec<&str> = clean.split_whitespace().take(12).collect();
    let snippet = if snippet_words.is_empty() {
        "the current task context".to_string()
    } else {
        snippet_words.join(" ")
    };
    let block_phrase = if code_blocks > 0 {
        format!("{code_blocks} code block(s)")
    } else {
        "no code blocks".to_string()
    };

    enforce_next_question(&format!(
        "I did review the response and noted {block_phrase}.\n\
         I learned {snippet}.\n\
         Next should we proceed to validate the output and iterate on any remaining gaps?"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedProvider;

    fn assert_shape(summary: &str) {
        assert!(summary.starts_with("I did"), "bad start: {summary}");
        assert!(summary.contains("I learned"), "no learned: {summary}");
        assert!(summary.contains("Next"), "no next: {summary}");
        assert!(summary.contains('?'), "no question: {summary}");
        let sentences = split_sentences(summary);
        assert!(sentences.len() >= 3, "too few sentences: {summary}");
    }

    #[test]
    fn well_formed_summary_passes_through() {
        let input = "I did update the parser. I learned the grammar was ambiguous. Next, should I proceed with the tests?";
        let normalized = normalize_summary(input, "source");
        assert_eq!(normalized, input);
    }

    #[test]
    fn third_sentence_without_question_is_replaced() {
        let input = "I did fix the bug. I learned the cause was a typo. Next I will rest.";
        let normalized = normalize_summary(input, "source");
        assert_shape(&normalized);
        assert!(normalized.contains(NEXT_QUESTION));
    }

    #[test]
    fn malformed_summary_falls_back_to_source() {
        let source = "We changed the server.\n```python\nprint('x')\n```\nThen we added tests.";
        let normalized = normalize_summary("whatever, it went fine", source);
        assert_shape(&normalized);
        assert!(normalized.contains("1 code block(s)"));
    }

    #[test]
    fn fallback_counts_multiple_code_blocks() {
        let source = "```a```\n```b```";
        let normalized = normalize_summary("", source);
        assert_shape(&normalized);
        assert!(normalized.contains("2 code block(s)"));
    }

    #[test]
    fn fallback_with_empty_source_uses_placeholder() {
        let normalized = normalize_summary("", "");
        assert_shape(&normalized);
        assert!(normalized.contains("the current task context"));
    }

    #[test]
    fn fallback_snippet_is_twelve_words() {
        let source = "one two three four five six seven eight nine ten eleven twelve thirteen fourteen";
        let normalized = normalize_summary("", source);
        assert!(normalized.contains("I learned one two three four five six seven eight nine ten eleven twelve."));
        assert!(!normalized.contains("thirteen"));
    }

    #[test]
    fn short_text_gets_question_appended() {
        let out = enforce_next_question("I did things.");
        assert!(out.ends_with(NEXT_QUESTION));
    }

    #[test]
    fn short_text_with_next_clause_is_rewritten() {
        let out = enforce_next_question("I did things. Next we might do more");
        assert!(out.contains(NEXT_QUESTION));
        assert!(!out.contains("might do more"));
    }

    #[test]
    fn sentences_split_on_terminators() {
        let sentences = split_sentences("One. Two! Three? Four");
        assert_eq!(sentences, vec!["One.", "Two!", "Three?", "Four"]);
    }

    #[test]
    fn decimal_points_do_not_split() {
        let sentences = split_sentences("Version 1.2 shipped. Done.");
        assert_eq!(sentences.len(), 2);
    }

    #[tokio::test]
    async fn failing_provider_yields_deterministic_fallback() {
        let provider = Arc::new(ScriptedProvider::new());
        let summarizer = Summarizer::new(provider, None);
        let summary = summarizer.summarize("Built the feature and ran tests.").await;
        assert_shape(&summary);
    }

    #[tokio::test]
    async fn provider_output_is_normalized() {
        let provider = Arc::new(ScriptedProvider::with_chat([
            "I did build it. I learned plenty. Next we stop here.",
        ]));
        let summarizer = Summarizer::new(provider, None);
        let summary = summarizer.summarize("irrelevant").await;
        assert_shape(&summary);
        assert!(summary.contains(NEXT_QUESTION));
    }
}
