//! List command implementation

use anyhow::Result;

use crate::store::ConversationStore;

use super::truncate;

pub fn run(store: &ConversationStore) -> Result<()> {
    let conversations = store.list_conversations()?;

    if conversations.is_empty() {
        println!("No conversations found. Start one with 'tangent chat'.");
        return Ok(());
    }

    println!(
        "{:<8} {:<18} {:<10} {}",
        "ID", "Created", "Title", "First message"
    );
    println!("{}", "-".repeat(80));

    for conversation in conversations {
        let created = conversation.created_at.format("%m-%d %H:%M:%S").to_string();
        let first = conversation
            .first_message
            .as_deref()
            .map(|m| truncate(m, 40))
            .unwrap_or_else(|| "-".to_string());

        println!(
            "{:<8} {:<18} {:<10} {}",
            conversation.id, created, conversation.title, first,
        );
    }

    Ok(())
}
