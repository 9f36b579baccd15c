//! Personality-portrait prompt and pagination.

use serde::{Deserialize, Serialize};

use crate::DomainError;

/// Default page size for chat captions.
pub const PAGE_LEN: usize = 1000;

/// Pages are only cut at whitespace past this many characters.
const MIN_BREAK: usize = 200;

const PORTRAIT_INSTRUCTIONS: &str = "\
You are a professional analyst who builds a psychological portrait and communication-style profile from text. \
Analyse the messages below, which are the user's side of their conversations.

YOUR ANALYSIS MUST CONTAIN THESE SECTIONS:
1. OVERALL EMOTIONAL BACKGROUND: which emotions prevail (anxiety, insecurity, need for control, optimism, and so on)?
2. THINKING AND REACTION PATTERNS: recurring themes, beliefs, cognitive distortions or defence mechanisms.
3. COMMUNICATION STYLE: how detailed, emotional, structured or self-reflective the messages are.
4. KEY NEEDS AND VALUES: the fundamental needs or values that matter most to this person.
5. ADVICE: one supportive, strengths-focused, constructive recommendation.

FORMATTING:
* Write connected, professional prose. Do not limit the length; it will be shown page by page.
* Plain text only, no Markdown.
* Never use placeholders such as 'example text' or '[...]'. Write only the actual analysis.
* Never answer with phrases like \"I am not a specialist\". Your role is to give the analysis.";

/// One stored user message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserMessage {
    pub text: String,
    #[serde(default)]
    pub username: Option<String>,
}

impl UserMessage {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            username: None,
        }
    }
}

/// Build the portrait prompt from the user's message history (oldest first).
pub fn build_portrait_prompt(messages: &[UserMessage]) -> Result<String, DomainError> {
    let lines: Vec<String> = messages
        .iter()
        .filter(|m| !m.text.trim().is_empty())
        .map(|m| match m.username.as_deref() {
            Some(name) if !name.is_empty() => format!("- @{}: {}", name, m.text),
            _ => format!("- {}", m.text),
        })
        .collect();

    if lines.is_empty() {
        return Err(DomainError::NoUserMessages);
    }

    Ok(format!(
        "{}\n\nUSER MESSAGE HISTORY:\n---\n{}\n---",
        PORTRAIT_INSTRUCTIONS,
        lines.join("\n")
    ))
}

/// Split text into pages of at most `max_len` characters, preferring to cut
/// at the last newline or space when it lies past the first 200 characters.
pub fn split_into_pages(text: &str, max_len: usize) -> Vec<String> {
    let max_len = max_len.max(1);
    let chars: Vec<char> = text.chars().collect();
    let mut pages = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let end = (start + max_len).min(chars.len());
        let mut cut = end;

        if chars.len() - start > max_len {
            let window = &chars[start..end];
            let last_break = window.iter().rposition(|&c| c == '\n' || c == ' ');
            if let Some(pos) = last_break {
                if pos > MIN_BREAK {
                    cut = start + pos;
                }
            }
        }

        pages.push(chars[start..cut].iter().collect());
        start = cut;
    }

    pages
}
