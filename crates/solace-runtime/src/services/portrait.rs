//! Personality portrait generation.
//!
//! Reads the user's message history, asks the `portrait` profile for an
//! analysis and returns it split into caption-sized pages. The result is
//! saved in the background; a failed save is logged and does not affect
//! the reply.

use chrono::Utc;
use solace_core::{build_portrait_prompt, split_into_pages, Conversation, DomainError, PAGE_LEN};
use std::sync::Arc;
use thiserror::Error;

use super::{StoreError, UserStore};
use crate::resilience::{OrchestratorError, TextGenerator};
use crate::tasks::BackgroundTasks;

const PORTRAIT_HEADER: &str = "Your psychological portrait: 🧠\n\n";

#[derive(Error, Debug)]
pub enum PortraitError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Generation(#[from] OrchestratorError),
}

impl PortraitError {
    /// Text suitable for the end user of the chat.
    pub fn user_message(&self) -> &'static str {
        match self {
            PortraitError::Domain(_) => {
                "There is not enough conversation history yet to build a portrait. \
                 Talk with me a little more and try again."
            }
            PortraitError::Store(_) => {
                "Your history is unavailable right now. Please try again later."
            }
            PortraitError::Generation(err) => err.user_message(),
        }
    }
}

pub struct PortraitService {
    store: Arc<dyn UserStore>,
    generator: Arc<dyn TextGenerator>,
    tasks: Arc<BackgroundTasks>,
}

impl PortraitService {
    pub fn new(
        store: Arc<dyn UserStore>,
        generator: Arc<dyn TextGenerator>,
        tasks: Arc<BackgroundTasks>,
    ) -> Self {
        Self {
            store,
            generator,
            tasks,
        }
    }

    /// Generate a portrait for `user_id`, returned as pages of at most
    /// [`PAGE_LEN`] characters.
    pub async fn generate(&self, user_id: i64) -> Result<Vec<String>, PortraitError> {
        let messages = self.store.user_messages(user_id).await?;
        let prompt = build_portrait_prompt(&messages)?;

        let text = self
            .generator
            .generate_text(&Conversation::from_prompt(prompt))
            .await?;
        tracing::info!(user_id, chars = text.chars().count(), "Portrait generated");

        let store = self.store.clone();
        let saved = text.clone();
        self.tasks.spawn("save_portrait", async move {
            if let Err(err) = store.save_portrait(user_id, &saved, Utc::now()).await {
                tracing::warn!(user_id, error = %err, "Failed to save portrait");
            }
        });

        Ok(split_into_pages(&format!("{}{}", PORTRAIT_HEADER, text), PAGE_LEN))
    }
}
