use anyhow::Result;
use axum::Router;
use clap::Parser;
use server::{build_app, ServerConfig};
use std::net::SocketAddr;
use std::path::PathBuf;
use syllabus_core::{EmbeddingBackend, PromptOptions, RankingStrategy, RetrievalConfig};
use tokio::net::TcpListener;
use tracing_subscriber::{fmt, EnvFilter};

const DEFAULT_SYSTEM: &str = "あなたは大学の履修相談に答えるアシスタントです。参考情報に基づいて、簡潔かつ正確に日本語で回答してください。";

#[derive(Parser)]
struct Args {
    /// Corpus file (.json, .jsonl, .csv or .tsv)
    #[arg(long, default_value = "./data/syllabus.json")]
    corpus: PathBuf,
    /// Host to bind
    #[arg(long, default_value = "0.0.0.0")]
    host: String,
    /// Port to bind
    #[arg(long, default_value_t = 8080)]
    port: u16,
    /// Default number of similarity results
    #[arg(long, default_value_t = 3)]
    k: usize,
    /// Ranking strategy: lexical or dense
    #[arg(long, default_value = "lexical")]
    strategy: RankingStrategy,
    /// Embedding backend for the dense strategy: hashed or fastembed
    #[arg(long, default_value = "hashed")]
    embedding_backend: EmbeddingBackend,
    /// Model code for the fastembed backend
    #[arg(long)]
    embedding_model: Option<String>,
    /// Vector size for the hashed backend
    #[arg(long, default_value_t = 384)]
    embedding_dimension: usize,
    /// Directory holding the dense vector cache
    #[arg(long)]
    cache_dir: Option<PathBuf>,
    /// System instruction placed at the top of every prompt
    #[arg(long, default_value = DEFAULT_SYSTEM)]
    system: String,
    /// Truncate each document to this many characters in the prompt
    #[arg(long)]
    max_doc_chars: Option<usize>,
    /// Keep only the most recent N conversation turns
    #[arg(long)]
    history_limit: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let args = Args::parse();

    let config = ServerConfig {
        corpus: args.corpus,
        retrieval: RetrievalConfig {
            k: args.k,
            strategy: args.strategy,
            embedding_backend: args.embedding_backend,
            embedding_model: args.embedding_model,
            embedding_dimension: args.embedding_dimension,
            cache_dir: args.cache_dir,
            ..RetrievalConfig::default()
        },
        system_instruction: args.system,
        prompt: PromptOptions { max_doc_chars: args.max_doc_chars, history_limit: args.history_limit },
    };
    // Index construction is blocking work; keep it off the async workers.
    let app: Router = tokio::task::spawn_blocking(move || build_app(config)).await??;

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
