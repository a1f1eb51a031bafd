use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};
use syllabus_core::persist::load_meta;
use syllabus_core::prompt::{assemble, PromptOptions};
use syllabus_core::{load_corpus, EmbeddingBackend, EmbeddingService, RankingStrategy, RetrievalConfig, RetrievalEngine};
use tracing_subscriber::{fmt, EnvFilter};

use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "indexer")]
#[command(about = "Build the retrieval index for a syllabus corpus and query it", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct IndexArgs {
    /// Corpus file (.json, .jsonl, .csv or .tsv)
    #[arg(long)]
    corpus: PathBuf,
    /// Ranking strategy: lexical or dense
    #[arg(long, default_value = "lexical")]
    strategy: RankingStrategy,
    /// Embedding backend for the dense strategy: hashed or fastembed
    #[arg(long, default_value = "hashed")]
    backend: EmbeddingBackend,
    /// Model code for the fastembed backend
    #[arg(long)]
    model: Option<String>,
    /// Vector size for the hashed backend
    #[arg(long, default_value_t = 384)]
    dimension: usize,
    /// Directory holding the dense vector cache
    #[arg(long)]
    cache_dir: Option<PathBuf>,
}

impl IndexArgs {
    fn config(&self, k: usize) -> RetrievalConfig {
        RetrievalConfig {
            k,
            strategy: self.strategy,
            embedding_backend: self.backend,
            embedding_model: self.model.clone(),
            embedding_dimension: self.dimension,
            cache_dir: self.cache_dir.clone(),
            ..RetrievalConfig::default()
        }
    }

    fn service(&self) -> Option<Arc<EmbeddingService>> {
        match self.strategy {
            RankingStrategy::Dense => {
                Some(Arc::new(EmbeddingService::for_backend(self.backend, self.model.clone(), self.dimension)))
            }
            RankingStrategy::Lexical => None,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Load the corpus, build the similarity index and persist dense vectors
    Build {
        #[command(flatten)]
        index: IndexArgs,
    },
    /// Run one query and print the ranked documents
    Query {
        #[command(flatten)]
        index: IndexArgs,
        /// Query text
        #[arg(long)]
        q: String,
        /// Number of similarity results
        #[arg(long, default_value_t = 3)]
        k: usize,
        /// Print the assembled prompt instead of the hit list
        #[arg(long, default_value_t = false)]
        prompt: bool,
        /// System instruction placed at the top of the prompt
        #[arg(long, default_value = "")]
        system: String,
        /// Truncate each document to this many characters in the prompt
        #[arg(long)]
        max_doc_chars: Option<usize>,
    },
}

fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Build { index } => build_index(&index),
        Commands::Query { index, q, k, prompt, system, max_doc_chars } => {
            run_query(&index, &q, k, prompt.then_some(PromptArgs { system, max_doc_chars }))
        }
    }
}

struct PromptArgs {
    system: String,
    max_doc_chars: Option<usize>,
}

fn open_engine(args: &IndexArgs, config: &RetrievalConfig) -> Result<RetrievalEngine> {
    let corpus = load_corpus(&args.corpus)?;
    tracing::info!(num_docs = corpus.len(), instructors = corpus.instructors().len(), "corpus loaded");
    Ok(RetrievalEngine::build(corpus, config, args.service()))
}

fn build_index(args: &IndexArgs) -> Result<()> {
    if args.strategy == RankingStrategy::Dense && args.cache_dir.is_none() {
        bail!("--cache-dir is required to persist dense vectors");
    }
    let config = args.config(RetrievalConfig::default().k);
    let engine = open_engine(args, &config)?;

    if engine.index().strategy() != args.strategy {
        tracing::warn!(
            requested = args.strategy.label(),
            active = engine.index().strategy().label(),
            "index built with fallback strategy"
        );
    }
    match config.cache_paths(engine.corpus()) {
        Some(paths) if engine.index().strategy() == RankingStrategy::Dense => {
            let meta = load_meta(&paths)?;
            println!("{}", serde_json::to_string_pretty(&meta)?);
        }
        _ => println!("{} documents indexed ({})", engine.corpus().len(), engine.index().strategy().label()),
    }
    Ok(())
}

fn run_query(args: &IndexArgs, q: &str, k: usize, prompt: Option<PromptArgs>) -> Result<()> {
    let engine = open_engine(args, &args.config(k))?;
    let outcome = engine.retrieve_scored(q, k);

    if let Some(p) = prompt {
        let options = PromptOptions { max_doc_chars: p.max_doc_chars, ..PromptOptions::default() };
        println!("{}", assemble(&p.system, &[], q, &outcome.documents(), &options));
        return Ok(());
    }

    println!("path: {:?}, hits: {}", outcome.path, outcome.hits.len());
    for hit in &outcome.hits {
        let score = hit.score.map(|s| format!("{s:.4}")).unwrap_or_else(|| "-".into());
        println!(
            "{:>5}  {:>7}  {}  [{}] {}",
            hit.doc_id,
            score,
            hit.document.title(),
            hit.document.instructor(),
            hit.document.period()
        );
    }
    Ok(())
}
