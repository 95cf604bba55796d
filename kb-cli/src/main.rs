//! `kb` - ingest documents into a persistent knowledge base and ask it questions.
//!
//! State lives in a JSON index snapshot (`--index`) that is loaded at startup
//! and flushed after every mutating command. Logs go to stderr, results to
//! stdout (`--json` for machine-readable output).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use kb_rag::{
    DateRange, EmbeddingIndex, EmbeddingProvider, FileStatus, Generator, Grading,
    HashingEmbeddingProvider, HealthStatus, IndexOptions, IngestFile, KnowledgeBase, QueryRequest,
    RagConfig, RequestFilters, SourceRef,
};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Question answering over your own documents.
#[derive(Parser, Debug)]
#[command(name = "kb", version, about, long_about = None)]
struct Cli {
    /// JSON configuration file; `KB_*` environment variables override it
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Index snapshot file
    #[arg(short, long, global = true, default_value = "kb-index.json")]
    index: PathBuf,

    /// Embedding provider
    #[arg(long, global = true, value_enum, default_value_t = Provider::Hashing)]
    provider: Provider,

    /// Vector dimension of the hashing provider
    #[arg(long, global = true, default_value_t = 384)]
    dimensions: usize,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Provider {
    /// Offline feature-hashing embeddings
    Hashing,
    /// OpenAI-compatible `/embeddings` endpoint
    Openai,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract, chunk and index files
    Ingest {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Answer a question with citations
    Query {
        text: String,
        #[command(flatten)]
        scope: Scope,
    },
    /// Summarize the passages relevant to a topic
    Summarize {
        text: String,
        #[command(flatten)]
        scope: Scope,
    },
    /// Key terms of a query
    Keywords { text: String },
    /// Ranked passages only, no answer generation
    Search {
        text: String,
        #[command(flatten)]
        scope: Scope,
    },
    /// List stored documents
    List,
    /// Delete a document and its chunks
    Delete { id: String },
    /// Index statistics
    Stats,
    /// Check that the embedding provider responds
    Health,
}

#[derive(clap::Args, Debug)]
struct Scope {
    #[arg(short = 'n', long)]
    max_results: Option<usize>,
    #[arg(long)]
    min_similarity: Option<f32>,
    /// Extension such as `.pdf`
    #[arg(long)]
    file_type: Option<String>,
    #[arg(long)]
    language: Option<String>,
    #[arg(long)]
    source: Option<String>,
    #[arg(long)]
    topic: Option<String>,
    /// Earliest ingestion date (YYYY-MM-DD)
    #[arg(long)]
    from: Option<NaiveDate>,
    /// Latest ingestion date (YYYY-MM-DD)
    #[arg(long)]
    to: Option<NaiveDate>,
}

impl Scope {
    fn into_request(self, text: String) -> QueryRequest {
        let date_range = (self.from.is_some() || self.to.is_some())
            .then_some(DateRange { from: self.from, to: self.to });
        let filters = RequestFilters {
            file_type: self.file_type,
            language: self.language,
            source: self.source,
            topic: self.topic,
            date_range,
        };

        let mut request = QueryRequest::new(text);
        if filters != RequestFilters::default() {
            request = request.with_filters(filters);
        }
        if let Some(n) = self.max_results {
            request = request.with_max_results(n);
        }
        if let Some(threshold) = self.min_similarity {
            request = request.with_min_similarity(threshold);
        }
        request
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = load_config(cli.config.as_deref())?;
    let provider = embedding_provider(cli.provider, cli.dimensions)?;
    let index = EmbeddingIndex::open(&cli.index, provider, IndexOptions::from_config(&config))
        .await
        .with_context(|| format!("failed to open index {}", cli.index.display()))?;

    let mut builder = KnowledgeBase::builder().config(config).index(Arc::new(index));
    if let Some(generator) = generator() {
        builder = builder.generator(generator);
    }
    let kb = builder.build().context("failed to build knowledge base")?;

    run(&kb, cli.command, cli.json).await
}

async fn run(kb: &KnowledgeBase, command: Command, json: bool) -> anyhow::Result<()> {
    match command {
        Command::Ingest { files } => {
            let mut batch = Vec::with_capacity(files.len());
            for path in &files {
                let bytes = tokio::fs::read(path)
                    .await
                    .with_context(|| format!("failed to read {}", path.display()))?;
                batch.push(IngestFile::new(file_name(path), bytes));
            }
            let report = kb.ingest(batch).await.context("ingestion failed")?;
            kb.flush().await.context("failed to save index")?;

            if json {
                return print_json(&report);
            }
            for file in &report.files {
                match &file.status {
                    FileStatus::Ingested { chunks } => {
                        println!("ingested  {} ({chunks} chunks)", file.source)
                    }
                    FileStatus::Unchanged => println!("unchanged {}", file.source),
                    FileStatus::Failed { error } => println!("failed    {}: {error}", file.source),
                }
            }
            println!("{} chunks indexed", report.total_chunks);
        }
        Command::Query { text, scope } => {
            let response = kb.query(scope.into_request(text)).await?;
            if json {
                return print_json(&response);
            }
            println!("{}\n", response.answer);
            println!("confidence {:.2} ({:?})", response.confidence, response.status);
            if let Grading::Graded { score } = response.grading {
                println!("graded     {score:.2}");
            }
            print_sources(&response.sources);
        }
        Command::Summarize { text, scope } => {
            let response = kb.summarize(scope.into_request(text)).await?;
            if json {
                return print_json(&response);
            }
            println!("{}\n", response.summary);
            print_sources(&response.sources);
        }
        Command::Keywords { text } => {
            let keywords = kb.keywords(&text).await?;
            if json {
                return print_json(&keywords);
            }
            println!("{}", keywords.join(", "));
        }
        Command::Search { text, scope } => {
            let sources = kb.search(scope.into_request(text)).await?;
            if json {
                return print_json(&sources);
            }
            print_sources(&sources);
        }
        Command::List => {
            let documents = kb.list_documents().await;
            if json {
                return print_json(&documents);
            }
            for doc in &documents {
                println!(
                    "{:<40} {:<6} {:<3} {:>5} chunks  {}",
                    doc.source,
                    doc.file_type,
                    doc.language,
                    doc.chunk_count,
                    doc.ingested_at.format("%Y-%m-%d %H:%M")
                );
            }
        }
        Command::Delete { id } => {
            let removed = kb.delete_document(&id).await;
            kb.flush().await.context("failed to save index")?;
            if removed == 0 {
                warn!(document.id = %id, "no such document");
            }
            if json {
                return print_json(&serde_json::json!({ "id": id, "chunks_removed": removed }));
            }
            println!("removed {removed} chunks of {id}");
        }
        Command::Stats => {
            let stats = kb.stats().await;
            if json {
                return print_json(&stats);
            }
            println!("documents  {}", stats.documents);
            println!("chunks     {}", stats.chunks);
            println!("model      {} ({} dims)", stats.embedding_model, stats.dimensions);
        }
        Command::Health => {
            let report = kb.health().await;
            if json {
                print_json(&report)?;
            } else {
                println!(
                    "{:?}: {} documents, model {}",
                    report.status, report.documents, report.embedding_model
                );
            }
            if report.status == HealthStatus::Degraded {
                bail!(
                    report
                        .embedding_error
                        .unwrap_or_else(|| "embedding provider unreachable".into())
                );
            }
        }
    }
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("kb_rag=info,kb=info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr);
    if json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<RagConfig> {
    let config = match path {
        Some(path) => RagConfig::from_json_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?
            .with_env_overrides()?,
        None => RagConfig::from_env()?,
    };
    Ok(config)
}

fn embedding_provider(
    provider: Provider,
    dimensions: usize,
) -> anyhow::Result<Arc<dyn EmbeddingProvider>> {
    match provider {
        Provider::Hashing => Ok(Arc::new(HashingEmbeddingProvider::new(dimensions)?)),
        #[cfg(feature = "openai")]
        Provider::Openai => Ok(Arc::new(kb_rag::OpenAIEmbeddingProvider::from_env()?)),
        #[cfg(not(feature = "openai"))]
        Provider::Openai => bail!("kb was built without the `openai` feature"),
    }
}

#[cfg(feature = "openai")]
fn generator() -> Option<Arc<dyn Generator>> {
    match kb_rag::OpenAICompatibleGenerator::from_env() {
        Ok(generator) => Some(Arc::new(generator)),
        Err(e) => {
            info!(error = %e, "no chat model configured, answers will list sources only");
            None
        }
    }
}

#[cfg(not(feature = "openai"))]
fn generator() -> Option<Arc<dyn Generator>> {
    info!("built without a chat model, answers will list sources only");
    None
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map_or_else(|| path.display().to_string(), |name| name.to_string_lossy().into_owned())
}

fn print_sources(sources: &[SourceRef]) {
    for source in sources {
        println!(
            "[{}] {} (score {:.2}, similarity {:.2})\n    {}",
            source.rank, source.source, source.score, source.similarity, source.snippet
        );
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
