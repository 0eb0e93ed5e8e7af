use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use docrag::config::{
    LayoutConfig, OpenAiConfig, SearchConfig, StorageConfig, layout_endpoint, openai_endpoint,
    search_endpoint, storage_endpoint,
};
use docrag::embedding::{AzureOpenAiEmbeddings, RetryPolicy, batch_limits_for};
use docrag::extraction::{Extractor, LayoutClient};
use docrag::ingest::{IngestOptions, IngestService, Vectorizer};
use docrag::logging;
use docrag::search::SearchIndexClient;
use docrag::search::schema::DEFAULT_ANALYZER;
use docrag::splitter::{
    DEFAULT_MAX_SECTION_LENGTH, DEFAULT_SECTION_OVERLAP, DEFAULT_SENTENCE_SEARCH_LIMIT,
    SectionSplitter, SplitterConfig,
};
use docrag::storage::BlobStore;
use docrag::tokens::TokenCounter;

#[derive(Parser)]
#[command(
    name = "prepdocs",
    about = "Prepare documents by extracting text, splitting it into sections, uploading pages to blob storage, and indexing the sections in a search index.",
    after_help = "Example: prepdocs 'data/*' --storageaccount myaccount --container content --searchservice mysearch --index gptkbindex -v"
)]
struct Cli {
    /// File, directory, or wildcard pattern to process.
    files: Option<String>,
    /// Category for every section indexed in this run (defaults to the parent directory name).
    #[arg(long)]
    category: Option<String>,
    /// Skip uploading individual pages to blob storage.
    #[arg(long)]
    skipblobs: bool,
    /// Blob storage account name or URL.
    #[arg(long, env = "AZURE_STORAGE_ACCOUNT")]
    storageaccount: Option<String>,
    /// Blob container name.
    #[arg(long, env = "AZURE_STORAGE_CONTAINER", default_value = "content")]
    container: String,
    /// Shared access signature for the storage account.
    #[arg(long, env = "AZURE_STORAGE_SAS")]
    storagesas: Option<String>,
    /// Search service name or URL.
    #[arg(long, env = "AZURE_SEARCH_SERVICE")]
    searchservice: String,
    /// Search index name (created when missing).
    #[arg(long, env = "AZURE_SEARCH_INDEX")]
    index: String,
    /// Search admin key.
    #[arg(long, env = "AZURE_SEARCH_KEY")]
    searchkey: Option<String>,
    /// Analyzer for the content field when the index is created.
    #[arg(long, default_value = DEFAULT_ANALYZER)]
    analyzer: String,
    /// OpenAI resource name or URL used for embeddings.
    #[arg(long, env = "AZURE_OPENAI_SERVICE")]
    openaiservice: Option<String>,
    /// Embedding deployment name.
    #[arg(long, env = "AZURE_OPENAI_EMB_DEPLOYMENT", default_value = "embedding")]
    openaideployment: String,
    /// Embedding model name.
    #[arg(long, env = "AZURE_OPENAI_EMB_MODEL", default_value = "text-embedding-ada-002")]
    openaimodelname: String,
    /// OpenAI key.
    #[arg(long, env = "AZURE_OPENAI_KEY")]
    openaikey: Option<String>,
    /// OpenAI REST API version.
    #[arg(long, env = "AZURE_OPENAI_API_VERSION", default_value = "2024-02-01")]
    openaiapiversion: String,
    /// Do not compute embeddings for the sections.
    #[arg(long)]
    novectors: bool,
    /// Compute embeddings one section at a time.
    #[arg(long)]
    disablebatchvectors: bool,
    /// Remove the matching documents from blob storage and the index.
    #[arg(long)]
    remove: bool,
    /// Remove every blob and every indexed section.
    #[arg(long)]
    removeall: bool,
    /// Extract PDF text locally instead of with the layout service.
    #[arg(long)]
    localpdfparser: bool,
    /// Document Intelligence resource name or URL.
    #[arg(long, env = "AZURE_FORMRECOGNIZER_SERVICE")]
    formrecognizerservice: Option<String>,
    /// Document Intelligence key.
    #[arg(long, env = "AZURE_FORMRECOGNIZER_KEY")]
    formrecognizerkey: Option<String>,
    /// Target section length in characters.
    #[arg(long, env = "TEXT_SPLITTER_MAX_SECTION_LENGTH", default_value_t = DEFAULT_MAX_SECTION_LENGTH)]
    max_section_length: usize,
    /// How far to look for a sentence boundary, in characters.
    #[arg(long, env = "TEXT_SPLITTER_SENTENCE_SEARCH_LIMIT", default_value_t = DEFAULT_SENTENCE_SEARCH_LIMIT)]
    sentence_search_limit: usize,
    /// Characters shared by consecutive sections.
    #[arg(long, env = "TEXT_SPLITTER_SECTION_OVERLAP", default_value_t = DEFAULT_SECTION_OVERLAP)]
    section_overlap: usize,
    /// Verbose output.
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    logging::init_tracing_verbose(cli.verbose);
    if let Err(err) = run(cli).await {
        tracing::error!(error = %format!("{err:#}"), "prepdocs failed");
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let splitter = SectionSplitter::new(SplitterConfig {
        max_section_length: cli.max_section_length,
        sentence_search_limit: cli.sentence_search_limit,
        section_overlap: cli.section_overlap,
    })
    .context("Invalid section size settings")?;

    let search = SearchIndexClient::new(&SearchConfig {
        endpoint: search_endpoint(&cli.searchservice),
        index: cli.index.clone(),
        api_key: cli.searchkey.clone(),
    })?;

    let blobs = match &cli.storageaccount {
        Some(account) => Some(BlobStore::new(&StorageConfig {
            account_url: storage_endpoint(account),
            container: cli.container.clone(),
            sas_token: cli.storagesas.clone(),
        })?),
        None if !cli.skipblobs => bail!("--storageaccount is required unless --skipblobs is set"),
        None => None,
    };

    let extractor = if cli.localpdfparser {
        Extractor::Local
    } else {
        let Some(service) = &cli.formrecognizerservice else {
            bail!("--formrecognizerservice is required unless --localpdfparser is set");
        };
        Extractor::Layout(LayoutClient::new(&LayoutConfig {
            endpoint: layout_endpoint(service),
            api_key: cli.formrecognizerkey.clone(),
        })?)
    };

    let vectorizer = if cli.novectors {
        None
    } else {
        Some(vectorizer(&cli)?)
    };

    let options = IngestOptions {
        category: cli.category.clone(),
        skip_blobs: cli.skipblobs,
        use_vectors: !cli.novectors,
    };
    let service = IngestService::new(splitter, extractor, search, blobs, vectorizer, options);

    if cli.removeall {
        service.remove_all().await?;
        tracing::info!("Removed all blobs and indexed sections");
        return Ok(());
    }

    let Some(files) = cli.files.as_deref() else {
        bail!("a file pattern is required unless --removeall is set");
    };
    if cli.remove {
        service.remove(files).await?;
        tracing::info!(files, "Removed documents");
        return Ok(());
    }

    service.prepare_index(&cli.analyzer).await?;
    service.prepare_container().await?;

    let summary = service.ingest(files).await?;
    let metrics = service.metrics_snapshot();
    tracing::info!(
        files = summary.files,
        skipped = summary.skipped,
        sections = summary.sections,
        documents_indexed = metrics.documents_indexed,
        sections_indexed = metrics.sections_indexed,
        "Ingestion finished"
    );
    Ok(())
}

fn vectorizer(cli: &Cli) -> Result<Vectorizer> {
    let Some(service) = &cli.openaiservice else {
        bail!("--openaiservice is required unless --novectors is set");
    };
    let config = OpenAiConfig {
        endpoint: openai_endpoint(service),
        api_key: cli.openaikey.clone(),
        api_version: cli.openaiapiversion.clone(),
        chat_deployment: String::new(),
        chat_model: String::new(),
        embedding_deployment: cli.openaideployment.clone(),
        embedding_model: cli.openaimodelname.clone(),
    };
    let client = Arc::new(AzureOpenAiEmbeddings::new(&config, RetryPolicy::default())?);

    let limits = batch_limits_for(&cli.openaimodelname).filter(|_| !cli.disablebatchvectors);
    Ok(match limits {
        Some(limits) => {
            tracing::info!(model = %cli.openaimodelname, "Computing embeddings in batches");
            let counter = TokenCounter::for_model(&cli.openaimodelname)?;
            Vectorizer::batched(client, counter, limits)
        }
        None => Vectorizer::per_section(client),
    })
}
