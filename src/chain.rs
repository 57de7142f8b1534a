//! Working-memory chain resolution
//!
//! The chain for a conversation is its own messages plus, transitively, the
//! messages of every ancestor conversation up to the message it branched from.
//! Ancestry is followed through `parent_id` links, which always cross into a
//! different conversation.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::store::{ConversationStore, Message};

/// One pending visit: a conversation and, for ancestors, the last position
/// (inclusive) that belongs to the branch being resolved.
struct Visit {
    conversation_id: i64,
    cutoff: Option<(DateTime<Utc>, i64)>,
}

/// Resolve the ordered working memory of `conversation_id`
pub fn resolve_chain(store: &ConversationStore, conversation_id: i64) -> Result<Vec<Message>> {
    let mut collected: BTreeMap<i64, Message> = BTreeMap::new();
    let mut followed: HashSet<i64> = HashSet::new();
    let mut pending = vec![Visit {
        conversation_id,
        cutoff: None,
    }];

    while let Some(visit) = pending.pop() {
        let messages = store.list_messages(visit.conversation_id)?;

        for message in messages {
            if let Some(cutoff) = visit.cutoff {
                if message.position() > cutoff {
                    break;
                }
            }

            if let Some(parent_id) = message.parent_id {
                // Guard against cycles even though branches only point backwards
                if followed.insert(parent_id) {
                    let parent = store.find_message(parent_id)?.ok_or(Error::ChainBroken {
                        message_id: message.id,
                        missing_parent_id: parent_id,
                    })?;
                    pending.push(Visit {
                        conversation_id: parent.conversation_id,
                        cutoff: Some(parent.position()),
                    });
                }
            }

            collected.entry(message.id).or_insert(message);
        }
    }

    let mut chain: Vec<Message> = collected.into_values().collect();
    chain.sort_by_key(Message::position);

    tracing::debug!(
        conversation_id,
        chain_len = chain.len(),
        ancestors = followed.len(),
        "resolved working memory chain"
    );

    Ok(chain)
}

/// The branch marker nearest to the end of a chain: the conversation's own
/// marker when it is a branch, none when the chain has no branch ancestry
pub fn branch_context(chain: &[Message]) -> Option<&Message> {
    chain.iter().rev().find(|m| m.is_branch_marker())
}
