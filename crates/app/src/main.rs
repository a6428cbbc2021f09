use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use kb_search_core::{
    build_user_prompt, CharacterNgramEmbedder, DirectoryCorpus, DocumentStatus, Embedder,
    HttpEmbedder, IngestionOptions, IngestionOrchestrator, QdrantStore, QueryRetriever,
    RetrievalOptions, SearchError, SynonymExpander, SynonymPaths, SynonymStore, TextAnalyzer,
    TrainingParams, VectorStore, NOT_READY_MESSAGE, SYSTEM_PROMPT,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// EX_TEMPFAIL: the knowledge base is still being built, retry later.
const NOT_READY_EXIT: u8 = 75;

#[derive(Parser)]
#[command(name = "kb-search", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Qdrant base URL
    #[arg(long, env = "QDRANT_URL", default_value = "http://localhost:6333")]
    qdrant_url: String,

    /// Text-embeddings service URL; the offline n-gram embedder is used when unset.
    #[arg(long, env = "EMBEDDING_URL")]
    embedding_url: Option<String>,

    /// Embedding dimensionality shared by every collection.
    #[arg(long, env = "EMBEDDING_DIMENSIONS", default_value = "128")]
    embedding_dimensions: usize,

    /// Synonym model file.
    #[arg(long, env = "SYNONYM_MODEL_PATH", default_value = "data/synonyms.model")]
    synonym_model_path: PathBuf,

    /// Context snapshot JSON file.
    #[arg(long, env = "CONTEXT_SNAPSHOT_PATH", default_value = "data/context.json")]
    context_snapshot_path: PathBuf,

    /// Documents ingested at the same time.
    #[arg(long, env = "MAX_CONCURRENT_DOCUMENTS", default_value = "1")]
    max_concurrent_documents: usize,

    /// Per-collection search timeout in milliseconds.
    #[arg(long, env = "SEARCH_TIMEOUT_MS")]
    search_timeout_ms: Option<u64>,
}

#[derive(Subcommand)]
enum Command {
    /// Renew the knowledge base from a folder (or a single .txt file).
    Ingest {
        #[arg(long)]
        corpus: PathBuf,
        /// Leave documents whose collection already exists untouched.
        #[arg(long, default_value_t = false)]
        keep_existing: bool,
    },
    /// Print the retrieved context for a question.
    Context {
        #[arg(long)]
        question: String,
    },
    /// Print the synonym-expanded form of a question.
    Expand {
        #[arg(long)]
        question: String,
    },
    /// Print the system and user prompts that would be sent to the LLM.
    Prompt {
        #[arg(long)]
        question: String,
    },
}

impl Cli {
    fn embedder(&self) -> Arc<dyn Embedder> {
        match &self.embedding_url {
            Some(url) => Arc::new(HttpEmbedder::new(url.as_str(), self.embedding_dimensions)),
            None => Arc::new(CharacterNgramEmbedder {
                dimensions: self.embedding_dimensions,
            }),
        }
    }

    fn synonym_paths(&self) -> SynonymPaths {
        SynonymPaths {
            model: self.synonym_model_path.clone(),
            context: self.context_snapshot_path.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        "kb-search boot"
    );

    let store: Arc<dyn VectorStore> = Arc::new(QdrantStore::new(&cli.qdrant_url)?);
    let embedder = cli.embedder();
    let analyzer = Arc::new(TextAnalyzer::russian()?);
    let synonyms = Arc::new(
        SynonymStore::open(cli.synonym_paths()).context("opening the synonym model")?,
    );

    match &cli.command {
        Command::Ingest {
            corpus,
            keep_existing,
        } => {
            let options = IngestionOptions {
                max_concurrent_documents: cli.max_concurrent_documents,
                rewrite: !keep_existing,
                ..IngestionOptions::default()
            };
            let orchestrator =
                IngestionOrchestrator::new(store, embedder, synonyms, analyzer, options)?;
            let corpus = DirectoryCorpus::discover(corpus)?;
            let report = orchestrator.ingest(Arc::new(corpus)).await?;

            for document in &report.documents {
                match &document.status {
                    DocumentStatus::Indexed {
                        large,
                        small,
                        replaced,
                    } => println!(
                        "{}: indexed large={large} small={small} replaced={replaced}",
                        document.name
                    ),
                    DocumentStatus::AlreadyPresent => println!("{}: already present", document.name),
                    DocumentStatus::Failed { reason } => {
                        warn!(document = %document.name, reason = %reason, "document failed");
                        println!("{}: failed ({reason})", document.name);
                    }
                }
            }
            println!(
                "knowledge base renewed at {}: {} documents, {} failed, model version {}",
                report.finished_at.to_rfc3339(),
                report.documents.len(),
                report.failed().count(),
                report.model_version
            );
        }
        Command::Context { question } => {
            let retriever = retriever(&cli, store, embedder, synonyms, analyzer)?;
            match retriever.prepare_context(question).await {
                Ok(context) => println!("{context}"),
                Err(err) => return not_ready_or(err),
            }
        }
        Command::Expand { question } => {
            let expander = expander(synonyms, analyzer)?;
            let normalized = expander.analyzer().preprocess(question).join(" ");
            match expander.expand(&normalized) {
                Ok(expanded) => println!("{expanded}"),
                Err(err) => return not_ready_or(err),
            }
        }
        Command::Prompt { question } => {
            let retriever = retriever(&cli, store, embedder, synonyms, analyzer)?;
            match retriever.prepare_context(question).await {
                Ok(context) => {
                    println!("{SYSTEM_PROMPT}\n");
                    println!("{}", build_user_prompt(question, &context)?);
                }
                Err(err) => return not_ready_or(err),
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// Retrains from the persisted snapshot if the model file is gone.
fn expander(
    synonyms: Arc<SynonymStore>,
    analyzer: Arc<TextAnalyzer>,
) -> anyhow::Result<SynonymExpander> {
    if synonyms.restore(&TrainingParams::default())? {
        info!(version = synonyms.version(), "synonym model restored from context snapshot");
    }
    Ok(SynonymExpander::new(synonyms, analyzer))
}

fn retriever(
    cli: &Cli,
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    synonyms: Arc<SynonymStore>,
    analyzer: Arc<TextAnalyzer>,
) -> anyhow::Result<QueryRetriever> {
    let options = RetrievalOptions {
        search_timeout: cli.search_timeout_ms.map(Duration::from_millis),
        ..RetrievalOptions::default()
    };
    Ok(QueryRetriever::new(
        store,
        embedder,
        expander(synonyms, analyzer)?,
        options,
    ))
}

fn not_ready_or(err: SearchError) -> anyhow::Result<ExitCode> {
    if err.is_not_ready() {
        warn!(reason = %err, "knowledge base not ready");
        eprintln!("{NOT_READY_MESSAGE}");
        return Ok(ExitCode::from(NOT_READY_EXIT));
    }
    Err(err.into())
}
