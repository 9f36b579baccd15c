//! # solace-core
//!
//! Deterministic building blocks for the Solace companion bot.
//!
//! This crate holds everything that does not talk to the network:
//! - the conversation payload handed to LLM providers
//! - rendering of the per-user context block injected into the system prompt
//! - admin metric arithmetic
//! - the personality-portrait prompt and its pagination
//!
//! ## Key Guarantees
//!
//! 1. **No I/O**: every function is pure; callers supply "now"
//! 2. **No LLM calls**: generation lives in `solace-runtime`
//! 3. **Total**: rendering never fails, missing data degrades to shorter text
//!
//! ## Example
//!
//! ```rust,ignore
//! use solace_core::{Conversation, ChatMessage};
//!
//! let conversation = Conversation::new(vec![ChatMessage::user("I can't sleep again")])
//!     .with_system_instruction("You are a warm, supportive companion.");
//! assert!(!conversation.is_blank());
//! ```

pub mod context;
pub mod conversation;
pub mod metrics;
pub mod portrait;

pub use context::{
    render_user_context, time_of_day_line, MoodScore, TestOutcome, TestResult, TimeOfDay,
};
pub use conversation::{ChatMessage, Conversation, Role};
pub use metrics::{AdminMetrics, AverageMessages, MetricCounts};
pub use portrait::{build_portrait_prompt, split_into_pages, UserMessage, PAGE_LEN};

use thiserror::Error;

/// Errors raised while validating domain input.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("Conversation has no content")]
    EmptyConversation,

    #[error("No user messages to analyse")]
    NoUserMessages,
}
