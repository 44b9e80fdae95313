//! doc-chat - question answering over ingested documentation
//!
//! Routes each question by intent, retrieves and grades documentation
//! chunks for the conversation, and returns a grounded answer.

mod config;
mod db;
mod error;
mod grader;
mod llm;
mod prompts;
mod retrieval;
mod runtime;
mod state_machine;

use clap::{Parser, Subcommand};
use config::AppConfig;
use db::{Database, StoredMessage};
use llm::{LimitedService, LlmService, LoggingService, MessageRole, OpenAIService};
use retrieval::{DisabledReranker, HttpReranker, OpenAIEmbeddings, QdrantStore, Reranker, Retriever};
use runtime::{FinalResponse, Workflow};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "doc-chat", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register a conversation over an ingested documentation site
    New {
        /// URL the documentation was ingested from
        source_url: String,
    },
    /// Ask a question in a conversation
    Ask {
        conversation_id: String,
        #[arg(required = true, num_args = 1..)]
        question: Vec<String>,
    },
    /// Print a conversation's messages
    History { conversation_id: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logs go to stderr so answers stay clean on stdout
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "doc_chat=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::New { source_url } => {
            let db = open_database(&config::db_path_from_env())?;
            let id = uuid::Uuid::new_v4().to_string();
            db.create_conversation(&id, &source_url)?;
            tracing::info!(conv_id = %id, source_url = %source_url, "Created conversation");
            println!("{id}");
        }
        Command::History { conversation_id } => {
            let db = open_database(&config::db_path_from_env())?;
            let conversation = db.get_conversation(&conversation_id)?;
            println!("# {} ({})", conversation.id, conversation.source_url);
            for message in db.list_messages(&conversation_id)? {
                println!("[{}] {}", message.role.as_str(), message.content);
            }
        }
        Command::Ask {
            conversation_id,
            question,
        } => {
            let config = AppConfig::from_env()?;
            let db = open_database(&config.db_path)?;
            ask(&config, &db, &conversation_id, &question.join(" ")).await?;
        }
    }

    Ok(())
}

async fn ask(
    config: &AppConfig,
    db: &Database,
    conversation_id: &str,
    question: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let history = db
        .list_messages(conversation_id)?
        .iter()
        .map(StoredMessage::to_message)
        .collect();
    let workflow = build_workflow(config)?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, cancelling");
            on_interrupt.cancel();
        }
    });

    let response = workflow
        .answer_question(question, conversation_id, history, &cancel)
        .await;

    match response {
        FinalResponse::Answer {
            text, documents, ..
        } => {
            db.append_message(conversation_id, MessageRole::User, question)?;
            db.append_message(conversation_id, MessageRole::Assistant, &text)?;
            println!("{text}");

            let mut sources: Vec<&str> = documents.iter().map(|d| d.source_url.as_str()).collect();
            sources.sort_unstable();
            sources.dedup();
            for source in sources {
                println!("  source: {source}");
            }
        }
        unavailable @ FinalResponse::Unavailable { .. } => {
            eprintln!("{}", unavailable.text());
        }
    }
    Ok(())
}

fn open_database(path: &str) -> Result<Database, Box<dyn std::error::Error>> {
    if let Some(parent) = PathBuf::from(path).parent() {
        std::fs::create_dir_all(parent)?;
    }
    tracing::debug!(path = %path, "Opening database");
    Ok(Database::open(path)?)
}

fn build_workflow(config: &AppConfig) -> Result<Workflow, Box<dyn std::error::Error>> {
    let openai = OpenAIService::new(
        config.llm.api_key.clone(),
        config.llm.model.clone(),
        &config.llm.base_url,
        config.workflow.calls.max_tokens,
    )?;
    let llm: Arc<dyn LlmService> = Arc::new(LimitedService::new(
        Arc::new(LoggingService::new(Arc::new(openai))),
        config.llm.max_concurrent_calls,
    ));

    let embeddings = OpenAIEmbeddings::new(
        &config.embeddings.base_url,
        config.embeddings.model.clone(),
        config.embeddings.api_key.clone(),
    )?;
    let store = QdrantStore::new(
        &config.qdrant.url,
        config.qdrant.collection.clone(),
        config.qdrant.api_key.clone(),
    )?;
    let reranker: Arc<dyn Reranker> = match &config.rerank.url {
        Some(url) => Arc::new(HttpReranker::new(
            url,
            config.rerank.model.clone(),
            config.rerank.api_key.clone(),
        )?),
        None => {
            tracing::info!("No reranker configured, keeping vector order");
            Arc::new(DisabledReranker)
        }
    };

    let retriever = Arc::new(Retriever::new(
        Arc::new(embeddings),
        Arc::new(store),
        reranker,
        config.retrieval,
    ));

    tracing::info!(
        model = %config.llm.model,
        max_cycles = config.workflow.rag.max_cycles,
        max_retrieved = config.retrieval.max_retrieved,
        max_reranked = config.retrieval.max_reranked,
        "Workflow ready"
    );
    Ok(Workflow::new(llm, retriever, config.workflow))
}
