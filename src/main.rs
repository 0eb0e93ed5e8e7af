use anyhow::Context;
use docrag::chat::{
    AzureChatClient, ChatReadRetrieveRead, RagService, RetrieveThenRead, Retriever,
};
use docrag::config::Config;
use docrag::embedding::{AzureOpenAiEmbeddings, RetryPolicy};
use docrag::search::SearchIndexClient;
use docrag::storage::BlobStore;
use docrag::tokens::TokenCounter;
use docrag::{api, logging};
use std::sync::Arc;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init_tracing();
    let config = Config::load().context("Failed to load configuration")?;

    let search = Arc::new(SearchIndexClient::new(&config.search)?);
    let embeddings = Arc::new(AzureOpenAiEmbeddings::new(
        &config.openai,
        RetryPolicy::default(),
    )?);
    let chat = Arc::new(AzureChatClient::new(&config.openai)?);
    let counter = TokenCounter::for_model(&config.openai.chat_model)?;
    let retriever = Arc::new(Retriever::new(search, embeddings, config.fields.clone()));

    let service = RagService::new(BlobStore::new(&config.storage)?)
        .with_ask(
            "rtr",
            Arc::new(RetrieveThenRead::new(
                retriever.clone(),
                chat.clone(),
                counter.clone(),
            )),
        )
        .with_chat(
            "rrr",
            Arc::new(ChatReadRetrieveRead::new(retriever, chat, counter)),
        );
    let app = api::create_router(Arc::new(service));

    let (listener, port) = bind_listener(config.server_port)
        .await
        .context("Failed to bind listener")?;
    tracing::info!("Listening on http://0.0.0.0:{}", port);
    axum::serve(listener, app).await?;
    Ok(())
}

async fn bind_listener(server_port: Option<u16>) -> Result<(TcpListener, u16), std::io::Error> {
    use std::net::Ipv4Addr;

    if let Some(port) = server_port {
        return TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))
            .await
            .map(|listener| (listener, port));
    }

    const PORT_RANGE: std::ops::RangeInclusive<u16> = 4100..=4199;
    for port in PORT_RANGE {
        match TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await {
            Ok(listener) => {
                tracing::debug!(port, "Bound server port");
                return Ok((listener, port));
            }
            Err(err) if err.kind() == std::io::ErrorKind::AddrInUse => {
                tracing::debug!(port, "Port already in use; trying next");
                continue;
            }
            Err(err) => return Err(err),
        }
    }

    Err(std::io::Error::new(
        std::io::ErrorKind::AddrNotAvailable,
        "No available port found in range 4100-4199",
    ))
}
