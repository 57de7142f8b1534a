//! Chat and branch command implementations

use anyhow::Result;

use crate::branch::create_branch;
use crate::orchestrator::ChatService;
use crate::store::ConversationStore;

use super::truncate;

pub async fn run(service: &ChatService, message: &str, conversation_id: Option<i64>) -> Result<()> {
    let outcome = service.chat(message, conversation_id).await?;

    if outcome.is_new_branch {
        println!("Conversation {} (branch)", outcome.conversation_id);
    } else {
        println!("Conversation {}", outcome.conversation_id);
    }
    println!("\n{}", outcome.reply);
    Ok(())
}

pub fn branch(store: &ConversationStore, message_id: i64, selected_text: &str) -> Result<()> {
    let outcome = create_branch(store, message_id, selected_text)?;

    println!(
        "Branch {} created from message {}",
        outcome.conversation_id, outcome.parent_message_id
    );
    println!("Working memory ({} messages):", outcome.chain.len());
    for msg in &outcome.chain {
        println!(
            "  #{:<6} {:<10} {}",
            msg.id,
            msg.role.as_str(),
            truncate(&msg.content, 60)
        );
    }
    Ok(())
}
