//! Read and chain command implementations

use anyhow::Result;

use crate::chain::resolve_chain;
use crate::store::{ConversationStore, Message};

/// Print a conversation's own messages
pub fn run(store: &ConversationStore, conversation_id: i64) -> Result<()> {
    let conversation = store.get_conversation(conversation_id)?;
    let messages = store.list_messages(conversation.id)?;

    println!("\n{}", "=".repeat(80));
    println!(
        "Conversation: {} (created {})",
        conversation.id,
        conversation.created_at.to_rfc3339()
    );
    if let Some(marker) = store.branch_marker(conversation.id)? {
        println!(
            "Branched from message {} (root {})",
            marker.parent_id.unwrap_or_default(),
            marker.branch_root_id.unwrap_or_default()
        );
    }
    println!("{}", "=".repeat(80));

    if messages.is_empty() {
        println!("\nNo messages yet.");
        return Ok(());
    }

    for msg in &messages {
        print_message(msg, None);
    }

    Ok(())
}

/// Print the working-memory chain, marking messages inherited from ancestors
pub fn chain(store: &ConversationStore, conversation_id: i64) -> Result<()> {
    let chain = resolve_chain(store, conversation_id)?;

    println!("\n{}", "=".repeat(80));
    println!(
        "Working memory for conversation {} ({} messages)",
        conversation_id,
        chain.len()
    );
    println!("{}", "=".repeat(80));

    for msg in &chain {
        print_message(msg, Some(conversation_id));
    }

    Ok(())
}

fn print_message(msg: &Message, home: Option<i64>) {
    let origin = match home {
        Some(id) if id != msg.conversation_id => format!(" | from #{}", msg.conversation_id),
        _ => String::new(),
    };

    println!(
        "\n[{} #{}{}] ({})",
        msg.role.as_str().to_uppercase(),
        msg.id,
        origin,
        msg.timestamp.to_rfc3339()
    );
    println!("{}", msg.content);
    println!("{}", "-".repeat(40));
}
