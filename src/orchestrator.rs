//! Completion orchestration
//!
//! One chat turn: resolve the working memory, persist the user message, ask the
//! completion service, persist the reply. Turns on the same conversation are
//! serialized so a reply is always built from a chain that includes every
//! earlier turn. The completion call holds only that conversation's guard,
//! never the store lock.
//!
//! A failed completion leaves the already-persisted user message in place.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::branch::{create_branch, BranchOutcome};
use crate::chain::{branch_context, resolve_chain};
use crate::completion::{CompletionService, GenerationParams, PromptMessage};
use crate::error::{Error, Result};
use crate::store::{ConversationStore, Message, Role};

#[derive(Debug, Clone, PartialEq)]
pub struct ChatOutcome {
    pub conversation_id: i64,
    pub reply: String,
    /// Whether the prompt carried branch context
    pub is_new_branch: bool,
}

pub struct ChatService {
    store: Arc<ConversationStore>,
    completion: Arc<dyn CompletionService>,
    params: GenerationParams,
    turns: DashMap<i64, Arc<Mutex<()>>>,
}

impl ChatService {
    pub fn new(
        store: Arc<ConversationStore>,
        completion: Arc<dyn CompletionService>,
        params: GenerationParams,
    ) -> Self {
        Self {
            store,
            completion,
            params,
            turns: DashMap::new(),
        }
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    pub fn chain(&self, conversation_id: i64) -> Result<Vec<Message>> {
        resolve_chain(&self.store, conversation_id)
    }

    pub fn branch(&self, source_message_id: i64, selected_text: &str) -> Result<BranchOutcome> {
        create_branch(&self.store, source_message_id, selected_text)
    }

    pub async fn chat(&self, message: &str, conversation_id: Option<i64>) -> Result<ChatOutcome> {
        if message.trim().is_empty() {
            return Err(Error::validation("Message is required"));
        }

        let conversation_id = match conversation_id {
            Some(id) => self.store.get_conversation(id)?.id,
            None => self.store.create_conversation()?,
        };

        let turn = self.turns.entry(conversation_id).or_default().clone();
        let result = {
            let _guard = turn.lock().await;
            self.run_turn(message, conversation_id).await
        };

        drop(turn);
        self.turns
            .remove_if(&conversation_id, |_, turn| Arc::strong_count(turn) == 1);

        result
    }

    async fn run_turn(&self, message: &str, conversation_id: i64) -> Result<ChatOutcome> {
        let chain = resolve_chain(&self.store, conversation_id)?;
        self.store
            .insert_message(conversation_id, Role::User, message, None)?;

        let prompt = build_prompt(&chain, message);
        let is_new_branch = branch_selection(&chain).is_some();

        tracing::debug!(
            conversation_id,
            prompt_len = prompt.len(),
            is_new_branch,
            "requesting completion"
        );

        let reply = self.completion.complete(&prompt, &self.params).await?;

        self.store
            .insert_message(conversation_id, Role::Assistant, &reply, None)?;

        Ok(ChatOutcome {
            conversation_id,
            reply,
            is_new_branch,
        })
    }
}

/// System message quoting the excerpt a branch was created from
pub fn branch_context_prompt(selected_text: &str) -> String {
    format!(
        "This conversation is branching from the context: \"{}\". Previous messages provide context for this branch.",
        selected_text
    )
}

fn branch_selection(chain: &[Message]) -> Option<&str> {
    branch_context(chain).and_then(|m| m.selected_text.as_deref())
}

/// Branch context (if any), then the chain, then the new user turn
pub fn build_prompt(chain: &[Message], user_message: &str) -> Vec<PromptMessage> {
    let mut prompt = Vec::with_capacity(chain.len() + 2);

    if let Some(selected) = branch_selection(chain) {
        prompt.push(PromptMessage::new(
            Role::System,
            branch_context_prompt(selected),
        ));
    }

    prompt.extend(
        chain
            .iter()
            .map(|m| PromptMessage::new(m.role, m.content.clone())),
    );
    prompt.push(PromptMessage::new(Role::User, user_message));

    prompt
}
