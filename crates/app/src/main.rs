use clap::{Parser, Subcommand, ValueEnum};
use doc_retrieval_core::{
    EmbeddedStore, EmbeddingConfig, EngineConfig, HttpEmbedder, ManagedVectorStore,
    RelationalStore, RetrievalEngine,
};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "doc-retrieval", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Directory of documents to index.
    #[arg(long, env = "RETRIEVAL_DOCS_DIR", default_value = "docs")]
    docs_dir: PathBuf,

    /// Vector store backend.
    #[arg(long, value_enum, default_value_t = Backend::Embedded)]
    backend: Backend,

    /// Database file for the embedded backend.
    #[arg(long, default_value = "retrieval.db")]
    db_path: PathBuf,

    /// Postgres connection URL for the relational backend.
    #[arg(long, env = "DATABASE_URL", default_value = "postgres://localhost/retrieval")]
    database_url: String,

    /// Embeddings endpoint base URL.
    #[arg(long, env = "EMBEDDINGS_BASE_URL", default_value = "https://api.openai.com/v1")]
    embeddings_url: String,

    /// Embeddings model name.
    #[arg(long, env = "EMBEDDINGS_MODEL", default_value = "text-embedding-3-small")]
    embeddings_model: String,

    /// Bearer token for the embeddings endpoint.
    #[arg(long, env = "EMBEDDINGS_API_KEY", hide_env_values = true)]
    api_key: Option<String>,
}

#[derive(Clone, Copy, ValueEnum)]
enum Backend {
    Embedded,
    Relational,
}

#[derive(Subcommand)]
enum Command {
    /// Build or refresh the index over the document directory.
    Index {
        /// Rebuild even when the ingest signature is unchanged.
        #[arg(long, default_value_t = false)]
        force: bool,
    },
    /// Run a semantic retrieval query.
    Search {
        /// Query text.
        query: String,
        /// Number of results to return (clamped to 1..=50).
        #[arg(long, default_value = "4")]
        top_k: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();

    let mut config = EngineConfig {
        docs_dir: cli.docs_dir.clone(),
        embedding: EmbeddingConfig {
            base_url: cli.embeddings_url.clone(),
            model: cli.embeddings_model.clone(),
            api_key: cli.api_key.clone(),
            ..EmbeddingConfig::default()
        },
        ..EngineConfig::default()
    };
    match &cli.command {
        Command::Index { force } => config.force_reindex = *force,
        Command::Search { top_k, .. } => config.top_k = *top_k,
    }

    let embedder = HttpEmbedder::new(config.embedding.clone())
        .map_err(|error| anyhow::anyhow!(error.to_string()))?;

    match cli.backend {
        Backend::Embedded => {
            let store = EmbeddedStore::open(&cli.db_path)
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;
            info!(db_path = %cli.db_path.display(), "using embedded vector store");
            let engine = RetrievalEngine::new(store, embedder, config)
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;
            run(&engine, &cli.command).await
        }
        Backend::Relational => {
            let store = RelationalStore::connect(&cli.database_url)
                .await
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;
            info!("using relational vector store");
            let engine = RetrievalEngine::new(store, embedder, config)
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;
            run(&engine, &cli.command).await
        }
    }
}

async fn run<S: ManagedVectorStore>(
    engine: &RetrievalEngine<S, HttpEmbedder>,
    command: &Command,
) -> anyhow::Result<()> {
    match command {
        Command::Index { .. } => {
            let report = engine
                .ensure_indexed()
                .await
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;
            if report.reindexed {
                println!(
                    "indexed {} chunks from {} documents",
                    report.chunks, report.documents
                );
            } else {
                println!(
                    "index already current ({} chunks from {} documents)",
                    report.chunks, report.documents
                );
            }
        }
        Command::Search { query, .. } => {
            let response = engine
                .query(query)
                .await
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;

            println!("{}", response.text);
            if let (Some(score), Some(distance)) = (response.score, response.distance) {
                println!("score={score:.4} distance={distance:.4}");
            }
            for snippet in &response.snippets {
                println!(
                    "[{}] score={:.4} distance={:.4}",
                    snippet.title, snippet.score, snippet.distance
                );
                if let Some(url) = &snippet.url {
                    println!("  source={url}");
                }
                println!("  {}", snippet.content);
            }
        }
    }

    engine
        .close()
        .await
        .map_err(|error| anyhow::anyhow!(error.to_string()))?;
    Ok(())
}
