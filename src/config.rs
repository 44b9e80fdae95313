//! Runtime configuration
//!
//! Read once at startup from environment variables. Numeric settings that do
//! not parse fall back to their defaults with a warning.

use crate::prompts;
use crate::retrieval::RetrievalSettings;
use crate::runtime::{CallSettings, WorkflowSettings};
use crate::state_machine::RagContext;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_LLM_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_LLM_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_EMBEDDINGS_MODEL: &str = "text-embedding-3-small";
pub const DEFAULT_QDRANT_URL: &str = "http://localhost:6333";
pub const DEFAULT_QDRANT_COLLECTION: &str = "doc_chat";
pub const DEFAULT_RERANK_MODEL: &str = "rerank-english-v3.0";
pub const DEFAULT_MAX_CONCURRENT_LLM_CALLS: usize = 8;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("No API key configured. Set LLM_API_KEY or OPENAI_API_KEY.")]
    MissingApiKey,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LlmConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub max_concurrent_calls: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingsConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QdrantConfig {
    pub url: String,
    pub collection: String,
    pub api_key: Option<String>,
}

/// Reranking is off when no URL is configured
#[derive(Debug, Clone, PartialEq)]
pub struct RerankConfig {
    pub url: Option<String>,
    pub model: String,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub embeddings: EmbeddingsConfig,
    pub qdrant: QdrantConfig,
    pub rerank: RerankConfig,
    pub retrieval: RetrievalSettings,
    pub workflow: WorkflowSettings,
    pub db_path: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let api_key = get("LLM_API_KEY")
            .or_else(|| get("OPENAI_API_KEY"))
            .ok_or(ConfigError::MissingApiKey)?;
        let base_url = get("LLM_BASE_URL").unwrap_or_else(|| DEFAULT_LLM_BASE_URL.to_string());

        let max_retrieved = parse_or(
            get("MAX_CHUNKS_RETRIEVED"),
            "MAX_CHUNKS_RETRIEVED",
            RetrievalSettings::DEFAULT_MAX_RETRIEVED,
        );
        let max_reranked = parse_or(
            get("MAX_CHUNKS_RERANKED"),
            "MAX_CHUNKS_RERANKED",
            RetrievalSettings::DEFAULT_MAX_RERANKED,
        );
        if max_reranked > max_retrieved {
            tracing::warn!(
                max_retrieved,
                max_reranked,
                "MAX_CHUNKS_RERANKED exceeds MAX_CHUNKS_RETRIEVED, clamping"
            );
        }

        let defaults = WorkflowSettings::default();
        let workflow = WorkflowSettings {
            rag: RagContext {
                max_cycles: parse_or(get("RAG_MAX_CYCLES"), "RAG_MAX_CYCLES", defaults.rag.max_cycles),
            },
            grade_retries: parse_or(get("GRADE_RETRIES"), "GRADE_RETRIES", defaults.grade_retries),
            calls: CallSettings {
                timeout: Duration::from_secs(parse_or(
                    get("CALL_TIMEOUT_SECS"),
                    "CALL_TIMEOUT_SECS",
                    defaults.calls.timeout.as_secs(),
                )),
                temperature: parse_or(get("LLM_TEMPERATURE"), "LLM_TEMPERATURE", 0.0),
                max_tokens: parse_or(
                    get("LLM_MAX_TOKENS"),
                    "LLM_MAX_TOKENS",
                    prompts::ANSWER_MAX_TOKENS,
                ),
            },
        };

        Ok(Self {
            llm: LlmConfig {
                api_key: api_key.clone(),
                base_url: base_url.clone(),
                model: get("LLM_MODEL").unwrap_or_else(|| DEFAULT_LLM_MODEL.to_string()),
                max_concurrent_calls: parse_or(
                    get("MAX_CONCURRENT_LLM_CALLS"),
                    "MAX_CONCURRENT_LLM_CALLS",
                    DEFAULT_MAX_CONCURRENT_LLM_CALLS,
                )
                .max(1),
            },
            embeddings: EmbeddingsConfig {
                base_url: get("EMBEDDINGS_BASE_URL").unwrap_or(base_url),
                model: get("EMBEDDINGS_MODEL")
                    .unwrap_or_else(|| DEFAULT_EMBEDDINGS_MODEL.to_string()),
                api_key: get("EMBEDDINGS_API_KEY").or(Some(api_key)),
            },
            qdrant: QdrantConfig {
                url: get("QDRANT_URL").unwrap_or_else(|| DEFAULT_QDRANT_URL.to_string()),
                collection: get("QDRANT_COLLECTION")
                    .unwrap_or_else(|| DEFAULT_QDRANT_COLLECTION.to_string()),
                api_key: get("QDRANT_API_KEY"),
            },
            rerank: RerankConfig {
                url: get("RERANK_URL"),
                model: get("RERANK_MODEL").unwrap_or_else(|| DEFAULT_RERANK_MODEL.to_string()),
                api_key: get("RERANK_API_KEY"),
            },
            retrieval: RetrievalSettings::new(max_retrieved, max_reranked),
            workflow,
            db_path: db_path(&get),
        })
    }
}

/// Database location alone, for commands that never call a model
pub fn db_path_from_env() -> String {
    db_path(&|key: &str| std::env::var(key).ok().filter(|v| !v.trim().is_empty()))
}

fn db_path(get: &impl Fn(&str) -> Option<String>) -> String {
    get("DOC_CHAT_DB_PATH").unwrap_or_else(|| {
        let home = get("HOME").unwrap_or_else(|| "/tmp".to_string());
        format!("{home}/.doc-chat/doc-chat.db")
    })
}

fn parse_or<T: FromStr + Copy>(raw: Option<String>, key: &str, default: T) -> T {
    match raw {
        None => default,
        Some(value) => value.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %value, "Unparsable setting, using default");
            default
        }),
    }
}
