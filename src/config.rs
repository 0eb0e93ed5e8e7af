use crate::splitter::SplitterConfig;
use std::env;
use thiserror::Error;

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable was not provided.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

/// Runtime configuration for the ask/chat server and the ingestion tooling.
///
/// Loaded once at startup and handed to each client explicitly; nothing here is process-global.
#[derive(Debug, Clone)]
pub struct Config {
    /// Search index connection settings.
    pub search: SearchConfig,
    /// OpenAI endpoint and deployment names.
    pub openai: OpenAiConfig,
    /// Blob storage settings for source documents.
    pub storage: StorageConfig,
    /// Document layout analysis service, when configured.
    pub layout: Option<LayoutConfig>,
    /// Index field names used when rendering sources.
    pub fields: KbFields,
    /// Section size policy used during ingestion.
    pub splitter: SplitterConfig,
    /// Optional override for the HTTP server port.
    pub server_port: Option<u16>,
}

/// Connection settings for the managed search index.
#[derive(Debug, Clone)]
pub struct SearchConfig {
    /// Base URL of the search service.
    pub endpoint: String,
    /// Index holding the document sections.
    pub index: String,
    /// Optional admin or query key sent as `api-key`.
    pub api_key: Option<String>,
}

/// Connection settings for the OpenAI resource.
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// Base URL of the OpenAI resource.
    pub endpoint: String,
    /// Optional key sent as `api-key`.
    pub api_key: Option<String>,
    /// REST API version query parameter.
    pub api_version: String,
    /// Deployment used for chat completions.
    pub chat_deployment: String,
    /// Underlying chat model, used for token budgeting.
    pub chat_model: String,
    /// Deployment used for embeddings.
    pub embedding_deployment: String,
    /// Underlying embedding model, used for token counting and batch limits.
    pub embedding_model: String,
}

/// Blob storage settings.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Base URL of the storage account's blob endpoint.
    pub account_url: String,
    /// Container holding the uploaded documents.
    pub container: String,
    /// Optional shared access signature appended to every request.
    pub sas_token: Option<String>,
}

/// Connection settings for the Document Intelligence layout service.
#[derive(Debug, Clone)]
pub struct LayoutConfig {
    /// Base URL of the Document Intelligence resource.
    pub endpoint: String,
    /// Optional key sent as `Ocp-Apim-Subscription-Key`.
    pub api_key: Option<String>,
}

/// Names of the index fields read back during retrieval.
#[derive(Debug, Clone)]
pub struct KbFields {
    /// Field holding section text.
    pub content: String,
    /// Field holding the document category.
    pub category: String,
    /// Field holding the citation locator.
    pub sourcepage: String,
}

impl Default for KbFields {
    fn default() -> Self {
        Self {
            content: "content".to_string(),
            category: "category".to_string(),
            sourcepage: "sourcepage".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = SplitterConfig::default();
        let splitter = SplitterConfig {
            max_section_length: load_env_parsed("TEXT_SPLITTER_MAX_SECTION_LENGTH")?
                .unwrap_or(defaults.max_section_length),
            sentence_search_limit: load_env_parsed("TEXT_SPLITTER_SENTENCE_SEARCH_LIMIT")?
                .unwrap_or(defaults.sentence_search_limit),
            section_overlap: load_env_parsed("TEXT_SPLITTER_SECTION_OVERLAP")?
                .unwrap_or(defaults.section_overlap),
        };
        splitter
            .validate()
            .map_err(|_| ConfigError::InvalidValue("TEXT_SPLITTER_*".to_string()))?;

        Ok(Self {
            search: SearchConfig {
                endpoint: search_endpoint(&load_env("AZURE_SEARCH_SERVICE")?),
                index: load_env("AZURE_SEARCH_INDEX")?,
                api_key: load_env_optional("AZURE_SEARCH_KEY"),
            },
            openai: OpenAiConfig {
                endpoint: openai_endpoint(&load_env("AZURE_OPENAI_SERVICE")?),
                api_key: load_env_optional("AZURE_OPENAI_KEY"),
                api_version: load_env_or("AZURE_OPENAI_API_VERSION", "2024-02-01"),
                chat_deployment: load_env_or("AZURE_OPENAI_CHATGPT_DEPLOYMENT", "chat16k"),
                chat_model: load_env_or("AZURE_OPENAI_CHATGPT_MODEL", "gpt-35-turbo-16k"),
                embedding_deployment: load_env_or("AZURE_OPENAI_EMB_DEPLOYMENT", "embedding"),
                embedding_model: load_env_or("AZURE_OPENAI_EMB_MODEL", "text-embedding-ada-002"),
            },
            storage: StorageConfig {
                account_url: storage_endpoint(&load_env("AZURE_STORAGE_ACCOUNT")?),
                container: load_env_or("AZURE_STORAGE_CONTAINER", "content"),
                sas_token: load_env_optional("AZURE_STORAGE_SAS"),
            },
            layout: load_env_optional("AZURE_FORMRECOGNIZER_SERVICE").map(|service| LayoutConfig {
                endpoint: layout_endpoint(&service),
                api_key: load_env_optional("AZURE_FORMRECOGNIZER_KEY"),
            }),
            fields: KbFields {
                content: load_env_or("KB_FIELDS_CONTENT", "content"),
                category: load_env_or("KB_FIELDS_CATEGORY", "category"),
                sourcepage: load_env_or("KB_FIELDS_SOURCEPAGE", "sourcepage"),
            },
            splitter,
            server_port: load_env_parsed("SERVER_PORT")?,
        })
    }

    /// Load `.env` (if present) and then the environment, logging the resolved endpoints.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let config = Self::from_env()?;
        tracing::debug!(
            search = %config.search.endpoint,
            index = %config.search.index,
            openai = %config.openai.endpoint,
            chat_deployment = %config.openai.chat_deployment,
            storage = %config.storage.account_url,
            server_port = ?config.server_port,
            "Loaded configuration"
        );
        Ok(config)
    }
}

/// Resolve a search service name (or full URL) to its endpoint.
pub fn search_endpoint(service: &str) -> String {
    service_endpoint(service, |name| format!("https://{name}.search.windows.net"))
}

/// Resolve an OpenAI resource name (or full URL) to its endpoint.
pub fn openai_endpoint(service: &str) -> String {
    service_endpoint(service, |name| format!("https://{name}.openai.azure.com"))
}

/// Resolve a storage account name (or full URL) to its blob endpoint.
pub fn storage_endpoint(account: &str) -> String {
    service_endpoint(account, |name| format!("https://{name}.blob.core.windows.net"))
}

/// Resolve a Document Intelligence resource name (or full URL) to its endpoint.
pub fn layout_endpoint(service: &str) -> String {
    service_endpoint(service, |name| {
        format!("https://{name}.cognitiveservices.azure.com")
    })
}

fn service_endpoint(value: &str, from_name: impl FnOnce(&str) -> String) -> String {
    let trimmed = value.trim();
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.trim_end_matches('/').to_string()
    } else {
        from_name(trimmed)
    }
}

fn load_env(key: &str) -> Result<String, ConfigError> {
    load_env_optional(key).ok_or_else(|| ConfigError::MissingVariable(key.to_string()))
}

fn load_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn load_env_or(key: &str, default: &str) -> String {
    load_env_optional(key).unwrap_or_else(|| default.to_string())
}

fn load_env_parsed<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    load_env_optional(key)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue(key.to_string()))
        })
        .transpose()
}
