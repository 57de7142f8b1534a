pub mod branch;
pub mod chain;
pub mod cli;
pub mod completion;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod server;
pub mod store;

pub use completion::{CompletionService, OpenAiCompletion};
pub use config::Config;
pub use error::{Error, Result};
pub use orchestrator::ChatService;
pub use store::ConversationStore;
