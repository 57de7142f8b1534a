use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tangent::cli::{chat, list, read};
use tangent::config::Config;
use tangent::orchestrator::ChatService;
use tangent::server;
use tangent::store::ConversationStore;
use tangent::OpenAiCompletion;

#[derive(Parser)]
#[command(name = "tangent")]
#[command(about = "Branching LLM conversations with ancestry-aware working memory")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, default_value = "tangent.yaml")]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API
    Serve {
        /// Override the configured port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// List conversations, most recent first
    List,

    /// Read a conversation's own messages
    Read {
        /// Conversation ID
        conversation_id: i64,
    },

    /// Show the working-memory chain sent to the model
    Chain {
        /// Conversation ID
        conversation_id: i64,
    },

    /// Send one message and print the reply
    Chat {
        /// Message text
        message: String,

        /// Continue an existing conversation
        #[arg(short = 'C', long)]
        conversation: Option<i64>,
    },

    /// Branch a new conversation off a message
    Branch {
        /// Source message ID
        message_id: i64,

        /// Excerpt that motivates the branch
        selected_text: String,
    },
}

fn build_service(config: &Config, store: Arc<ConversationStore>) -> Result<ChatService> {
    let completion = OpenAiCompletion::from_config(&config.completion)
        .context("Failed to set up completion service")?;
    Ok(ChatService::new(
        store,
        Arc::new(completion),
        config.completion.params(),
    ))
}

#[actix_web::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    // Load config
    let config = Config::load(&cli.config).unwrap_or_else(|e| {
        tracing::warn!("Ignoring unreadable config: {:#}", e);
        Config::default()
    });

    // Initialize store
    let db_path = config.database_path();
    let store = Arc::new(
        ConversationStore::open(&db_path)
            .with_context(|| format!("Failed to open database at {}", db_path.display()))?,
    );
    tracing::debug!("Connected to SQLite database at {}", db_path.display());

    match cli.command {
        Commands::Serve { port } => {
            let service = Arc::new(build_service(&config, store.clone())?);
            let (host, configured_port) = config.bind_address();
            server::run_server(service, &host, port.unwrap_or(configured_port)).await?;
        }
        Commands::List => {
            list::run(&store)?;
        }
        Commands::Read { conversation_id } => {
            read::run(&store, conversation_id)?;
        }
        Commands::Chain { conversation_id } => {
            read::chain(&store, conversation_id)?;
        }
        Commands::Chat {
            message,
            conversation,
        } => {
            let service = build_service(&config, store.clone())?;
            chat::run(&service, &message, conversation).await?;
        }
        Commands::Branch {
            message_id,
            selected_text,
        } => {
            chat::branch(&store, message_id, &selected_text)?;
        }
    }

    match Arc::try_unwrap(store) {
        Ok(store) => store.close()?,
        Err(_) => tracing::warn!("Store still shared at shutdown; leaving it to drop"),
    }

    Ok(())
}
