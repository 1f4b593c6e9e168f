use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use resume_rag_core::config::{DEFAULT_COLLECTION_NAME, DEFAULT_PERSIST_DIRECTORY, DEFAULT_REMOTE_INDEX_NAME};
use resume_rag_core::llm::{DEFAULT_COMPLETION_ENDPOINT, DEFAULT_COMPLETION_MODEL};
use resume_rag_core::{
    discover_documents, open_vector_index, ChunkingConfig, CompletionClient, CredentialState,
    LocalStoreConfig, ModelAccess, OpenAiCompatibleClient, RemoteStoreConfig, RerankOptions,
    RerankPipeline, RetrievalService, StoreConfig, SCREENING_TOP_K,
};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const SCREENING_SYSTEM_PROMPT: &str = "You are an expert technical recruiter. Assess how well the \
candidate's resume matches the job description, citing the resume parts you rely on.";

#[derive(Parser)]
#[command(name = "resume-rag", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Pinecone API key; the local index is used when unset.
    #[arg(long, env = "PINECONE_API_KEY", hide_env_values = true)]
    pinecone_api_key: Option<String>,

    /// Pinecone index name
    #[arg(long, env = "PINECONE_INDEX_NAME", default_value = DEFAULT_REMOTE_INDEX_NAME)]
    pinecone_index: String,

    /// Pinecone namespace
    #[arg(long, env = "PINECONE_NAMESPACE")]
    pinecone_namespace: Option<String>,

    /// Directory holding the local collection file
    #[arg(long, env = "CHROMA_PERSIST_DIRECTORY", default_value = DEFAULT_PERSIST_DIRECTORY)]
    persist_directory: PathBuf,

    /// Local collection name
    #[arg(long, env = "CHROMA_COLLECTION_NAME", default_value = DEFAULT_COLLECTION_NAME)]
    collection: String,

    /// API key for the chat-completions endpoint used for ranking.
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    openai_api_key: Option<String>,

    /// Chat model
    #[arg(long, env = "LLM_MODEL_NAME", default_value = DEFAULT_COMPLETION_MODEL)]
    llm_model: String,

    /// Chat-completions base URL
    #[arg(long, env = "LLM_BASE_URL", default_value = DEFAULT_COMPLETION_ENDPOINT)]
    llm_base_url: String,

    #[arg(long, env = "CHUNK_SIZE", default_value = "1000")]
    chunk_size: usize,

    #[arg(long, env = "CHUNK_OVERLAP", default_value = "200")]
    chunk_overlap: usize,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest one resume file or every supported file under a folder.
    Ingest {
        #[arg(long)]
        path: PathBuf,
    },
    /// Nearest chunks for a query.
    Search {
        #[arg(long)]
        query: String,
        #[arg(long, default_value = "4")]
        top_k: usize,
    },
    /// Rank candidates for a job description and print JSON.
    Rerank {
        #[arg(long)]
        query: String,
    },
    /// Compare the best matching resume parts against a job description.
    Screen {
        #[arg(long)]
        job_description: String,
    },
    /// Remove every chunk of one ingested document.
    Delete {
        #[arg(long)]
        document_id: String,
    },
    /// Print backend statistics.
    Stats,
}

impl Cli {
    fn store_config(&self) -> anyhow::Result<StoreConfig> {
        let chunking = ChunkingConfig::new(self.chunk_size, self.chunk_overlap)?;
        let mut remote = RemoteStoreConfig::new(CredentialState::from_env_value(
            self.pinecone_api_key.as_deref(),
        ));
        remote.index_name = self.pinecone_index.clone();
        remote.namespace = self.pinecone_namespace.clone().filter(|ns| !ns.trim().is_empty());

        Ok(StoreConfig {
            local: LocalStoreConfig {
                persist_directory: self.persist_directory.clone(),
                collection: self.collection.clone(),
            },
            remote: Some(remote),
            chunking,
        })
    }

    fn completion_access(&self) -> ModelAccess<OpenAiCompatibleClient> {
        let credential = CredentialState::from_env_value(self.openai_api_key.as_deref());
        ModelAccess::from_credential(&credential, |key| {
            OpenAiCompatibleClient::new(key, self.llm_model.clone())
                .with_endpoint(self.llm_base_url.clone())
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = cli.store_config()?;

    let index = open_vector_index(&config)
        .await
        .context("failed to open vector index")?;
    let retrieval = Arc::new(RetrievalService::new(index, config.chunking)?);
    info!(
        version = env!("CARGO_PKG_VERSION"),
        started_at = %Utc::now().to_rfc3339(),
        "resume-rag boot"
    );

    match &cli.command {
        Command::Ingest { path } => {
            let files = if path.is_dir() {
                discover_documents(path)
            } else {
                vec![path.clone()]
            };
            if files.is_empty() {
                println!("no supported documents under {}", path.display());
            }

            let mut total_chunks = 0;
            let mut skipped = 0;
            for file in &files {
                match retrieval.ingest_file(file).await {
                    Ok(report) => {
                        total_chunks += report.chunks_created;
                        println!(
                            "{} document_id={} chunks={}",
                            report.source, report.document_id, report.chunks_created
                        );
                    }
                    Err(error) => {
                        skipped += 1;
                        warn!(path = %file.display(), error = %error, "skipped document");
                    }
                }
            }

            println!(
                "{total_chunks} chunks ingested from {} file(s), {skipped} skipped",
                files.len() - skipped
            );
        }
        Command::Search { query, top_k } => {
            let results = retrieval.query(query, *top_k).await?;
            if results.is_empty() {
                println!("no results");
            }
            for result in results {
                let source = resume_rag_core::display_identifier(&result.metadata);
                let page = result
                    .page()
                    .map(|page| page.to_string())
                    .unwrap_or_else(|| "N/A".to_string());
                println!(
                    "[{source}] page={page} relevance_score={:.4} distance={:.4}",
                    result.score, result.distance
                );
                println!("  {}", result.text.replace('\n', " "));
            }
        }
        Command::Rerank { query } => {
            let pipeline = RerankPipeline::new(
                Arc::clone(&retrieval),
                cli.completion_access(),
                RerankOptions::default(),
            );
            let response = pipeline.rerank_candidates(query).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Command::Screen { job_description } => {
            let Some(context) = retrieval
                .screening_context(job_description, SCREENING_TOP_K)
                .await?
            else {
                println!("No relevant information found in the resume.");
                return Ok(());
            };

            match cli.completion_access() {
                ModelAccess::Available(client) => {
                    let answer = client
                        .complete(SCREENING_SYSTEM_PROMPT, &context)
                        .await
                        .context("screening completion failed")?;
                    println!("{answer}");
                }
                ModelAccess::Unavailable(reason) => {
                    warn!(reason = ?reason, "no completion model, printing retrieved context");
                    println!("{context}");
                }
            }
        }
        Command::Delete { document_id } => {
            let deleted = retrieval.delete_document(document_id).await?;
            println!("deleted {deleted} chunk(s) for document_id={document_id}");
        }
        Command::Stats => {
            let stats = retrieval.stats().await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
    }

    Ok(())
}
