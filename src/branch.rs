//! Branch creation
//!
//! A branch is a fresh conversation whose first message is a system marker
//! pointing back at the source message. `branch_root_id` always names the
//! top-most ancestor of the lineage, so branching a branch keeps the original
//! root instead of the intermediate source.

use crate::chain::resolve_chain;
use crate::error::{Error, Result};
use crate::store::{BranchLink, ConversationStore, Message, Role};

#[derive(Debug, Clone)]
pub struct BranchOutcome {
    pub conversation_id: i64,
    pub parent_message_id: i64,
    pub marker_id: i64,
    pub chain: Vec<Message>,
}

/// Content of the synthetic first message of a branch
pub fn marker_content(selected_text: &str) -> String {
    format!("Branching from: \"{}\"", selected_text)
}

pub fn create_branch(
    store: &ConversationStore,
    source_message_id: i64,
    selected_text: &str,
) -> Result<BranchOutcome> {
    if selected_text.trim().is_empty() {
        return Err(Error::validation("selectedText is required"));
    }

    let source = store.get_message(source_message_id)?;
    let link = BranchLink {
        parent_id: source.id,
        branch_root_id: store.lineage_root(&source)?,
        selected_text: Some(selected_text.to_string()),
    };

    let conversation_id = store.create_conversation()?;
    let marker_id = store.insert_message(
        conversation_id,
        Role::System,
        &marker_content(selected_text),
        Some(&link),
    )?;

    let chain = resolve_chain(store, conversation_id)?;

    tracing::info!(
        conversation_id,
        parent_message_id = source.id,
        branch_root_id = link.branch_root_id,
        chain_len = chain.len(),
        "created branch"
    );

    Ok(BranchOutcome {
        conversation_id,
        parent_message_id: source.id,
        marker_id,
        chain,
    })
}
