//! Blob storage for source documents, addressed through the Blob REST API with SAS auth.
//!
//! PDFs are stored one page per blob so citations can link to the exact page.

use crate::config::StorageConfig;
use crate::ingest::ids::{blob_name_from_file_page, file_stem, is_pdf};
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use regex::Regex;
use reqwest::{Client, Method, StatusCode, Url};
use std::path::Path;
use thiserror::Error;

mod pdf;

pub use pdf::split_pdf_pages;

/// Errors returned while interacting with blob storage.
#[derive(Debug, Error)]
pub enum BlobError {
    /// Account URL failed to parse.
    #[error("Invalid storage URL: {0}")]
    InvalidUrl(String),
    /// HTTP layer failed before receiving a response.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Storage responded with an unexpected status code.
    #[error("Unexpected storage response ({status}): {body}")]
    UnexpectedStatus {
        /// HTTP status returned from storage.
        status: StatusCode,
        /// Body payload associated with the failing response.
        body: String,
    },
    /// Requested blob does not exist.
    #[error("Blob not found: {0}")]
    NotFound(String),
    /// Local file could not be read.
    #[error("Failed to read {path}: {source}")]
    Io {
        /// File being read.
        path: String,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },
    /// PDF could not be split into pages.
    #[error("Failed to split PDF: {0}")]
    Pdf(String),
    /// Container listing was not well-formed XML.
    #[error("Invalid blob listing: {0}")]
    InvalidListing(String),
}

/// Downloaded blob contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobContent {
    /// Raw bytes.
    pub bytes: Vec<u8>,
    /// MIME type reported by storage, or guessed from the name.
    pub content_type: String,
}

/// Client for one blob container.
pub struct BlobStore {
    client: Client,
    container_url: Url,
    sas_token: Option<String>,
}

impl BlobStore {
    /// Construct a client for the configured container.
    pub fn new(config: &StorageConfig) -> Result<Self, BlobError> {
        let client = Client::builder().user_agent("docrag/0.2").build()?;
        let mut container_url = Url::parse(&config.account_url)
            .map_err(|err| BlobError::InvalidUrl(err.to_string()))?;
        container_url
            .path_segments_mut()
            .map_err(|_| BlobError::InvalidUrl(config.account_url.clone()))?
            .pop_if_empty()
            .push(&config.container);
        let sas_token = config
            .sas_token
            .as_deref()
            .map(|token| token.trim_start_matches('?').to_string())
            .filter(|token| !token.is_empty());
        tracing::debug!(
            container = %container_url,
            has_sas = sas_token.is_some(),
            "Initialized blob storage client"
        );
        Ok(Self {
            client,
            container_url,
            sas_token,
        })
    }

    /// Create the container unless it already exists.
    pub async fn ensure_container(&self) -> Result<(), BlobError> {
        let response = self
            .request(Method::PUT, None)
            .query(&[("restype", "container")])
            .header(reqwest::header::CONTENT_LENGTH, 0)
            .send()
            .await?;
        match response.status() {
            StatusCode::CONFLICT => Ok(()),
            status if status.is_success() => {
                tracing::info!(container = %self.container_url, "Created blob container");
                Ok(())
            }
            status => Err(unexpected(status, response).await),
        }
    }

    /// Upload (or overwrite) a block blob.
    pub async fn upload(
        &self,
        name: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), BlobError> {
        let response = self
            .request(Method::PUT, Some(name))
            .header("x-ms-blob-type", "BlockBlob")
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await?;
        if response.status().is_success() {
            tracing::debug!(blob = name, "Uploaded blob");
            Ok(())
        } else {
            Err(unexpected(response.status(), response).await)
        }
    }

    /// Download a blob together with its content type.
    pub async fn download(&self, name: &str) -> Result<BlobContent, BlobError> {
        let response = self.request(Method::GET, Some(name)).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Err(BlobError::NotFound(name.to_string())),
            status if status.is_success() => {
                let reported = response
                    .headers()
                    .get(reqwest::header::CONTENT_TYPE)
                    .and_then(|value| value.to_str().ok())
                    .map(str::to_string);
                let bytes = response.bytes().await?.to_vec();
                let content_type = match reported.as_deref() {
                    None | Some("application/octet-stream") => guess_mime_type(name).to_string(),
                    Some(other) => other.to_string(),
                };
                Ok(BlobContent {
                    bytes,
                    content_type,
                })
            }
            status => Err(unexpected(status, response).await),
        }
    }

    /// Names of blobs starting with `prefix`, following continuation markers.
    pub async fn list(&self, prefix: Option<&str>) -> Result<Vec<String>, BlobError> {
        let mut names = Vec::new();
        let mut marker: Option<String> = None;
        loop {
            let mut query = vec![("restype", "container"), ("comp", "list")];
            if let Some(prefix) = prefix {
                query.push(("prefix", prefix));
            }
            if let Some(marker) = marker.as_deref() {
                query.push(("marker", marker));
            }
            let response = self.request(Method::GET, None).query(&query).send().await?;
            if !response.status().is_success() {
                return Err(unexpected(response.status(), response).await);
            }
            let body = response.text().await?;
            let listing = parse_blob_listing(&body)?;
            names.extend(listing.names);
            match listing.next_marker {
                Some(next) => marker = Some(next),
                None => break,
            }
        }
        Ok(names)
    }

    /// Delete a blob; a missing blob is not an error.
    pub async fn delete(&self, name: &str) -> Result<(), BlobError> {
        let response = self.request(Method::DELETE, Some(name)).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(()),
            status if status.is_success() => Ok(()),
            status => Err(unexpected(status, response).await),
        }
    }

    /// Upload a local file: one single-page blob per PDF page, or the file as-is otherwise.
    ///
    /// Returns the uploaded blob names.
    pub async fn upload_file(&self, path: &Path) -> Result<Vec<String>, BlobError> {
        self.ensure_container().await?;
        let bytes = tokio::fs::read(path).await.map_err(|source| BlobError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let filename = path.to_string_lossy();

        if is_pdf(path) {
            let pages = split_pdf_pages(&bytes)?;
            let mut uploaded = Vec::with_capacity(pages.len());
            for (page, page_bytes) in pages.into_iter().enumerate() {
                let name = blob_name_from_file_page(&filename, page);
                tracing::debug!(page, blob = %name, "Uploading blob for page");
                self.upload(&name, page_bytes, "application/pdf").await?;
                uploaded.push(name);
            }
            Ok(uploaded)
        } else {
            let name = blob_name_from_file_page(&filename, 0);
            self.upload(&name, bytes, guess_mime_type(&name)).await?;
            Ok(vec![name])
        }
    }

    /// Delete the page blobs of `filename`, or every blob in the container when `None`.
    pub async fn remove_blobs(&self, filename: Option<&str>) -> Result<usize, BlobError> {
        let names = match filename {
            None => self.list(None).await?,
            Some(filename) => {
                let stem = file_stem(filename);
                let pattern = Regex::new(&format!(r"^{}-\d+\.pdf$", regex::escape(&stem)))
                    .map_err(|err| BlobError::InvalidUrl(err.to_string()))?;
                self.list(Some(&stem))
                    .await?
                    .into_iter()
                    .filter(|name| pattern.is_match(name))
                    .collect()
            }
        };
        for name in &names {
            tracing::debug!(blob = %name, "Removing blob");
            self.delete(name).await?;
        }
        tracing::info!(
            file = filename.unwrap_or("<all>"),
            removed = names.len(),
            "Removed blobs"
        );
        Ok(names.len())
    }

    fn request(&self, method: Method, blob: Option<&str>) -> reqwest::RequestBuilder {
        let mut url = self.container_url.clone();
        if let Some(blob) = blob
            && let Ok(mut segments) = url.path_segments_mut()
        {
            segments.push(blob);
        }
        url.set_query(self.sas_token.as_deref());
        self.client
            .request(method, url)
            .header("x-ms-version", "2023-11-03")
    }
}

async fn unexpected(status: StatusCode, response: reqwest::Response) -> BlobError {
    let body = response.text().await.unwrap_or_default();
    let error = BlobError::UnexpectedStatus { status, body };
    tracing::error!(error = %error, "Blob storage request failed");
    error
}

struct BlobListing {
    names: Vec<String>,
    next_marker: Option<String>,
}

enum ListingField {
    Name,
    NextMarker,
}

/// Read blob names and the continuation marker from a `List Blobs` response.
fn parse_blob_listing(xml: &str) -> Result<BlobListing, BlobError> {
    let invalid = |err: quick_xml::Error| BlobError::InvalidListing(err.to_string());
    let mut reader = Reader::from_str(xml);
    let mut listing = BlobListing {
        names: Vec::new(),
        next_marker: None,
    };
    let mut in_blob = false;
    let mut field: Option<ListingField> = None;
    let mut text = String::new();

    loop {
        match reader.read_event().map_err(invalid)? {
            Event::Start(e) => match e.name().as_ref() {
                b"Blob" => in_blob = true,
                b"Name" if in_blob => {
                    field = Some(ListingField::Name);
                    text.clear();
                }
                b"NextMarker" => {
                    field = Some(ListingField::NextMarker);
                    text.clear();
                }
                _ => {}
            },
            Event::Text(e) if field.is_some() => {
                text.push_str(&e.unescape().map_err(invalid)?);
            }
            Event::CData(e) if field.is_some() => {
                text.push_str(&String::from_utf8_lossy(&e));
            }
            Event::End(e) => match e.name().as_ref() {
                b"Blob" => in_blob = false,
                b"Name" | b"NextMarker" => match field.take() {
                    Some(ListingField::Name) => listing.names.push(std::mem::take(&mut text)),
                    Some(ListingField::NextMarker) if !text.is_empty() => {
                        listing.next_marker = Some(std::mem::take(&mut text));
                    }
                    _ => {}
                },
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(listing)
}

/// MIME type for a blob name, by extension.
pub fn guess_mime_type(name: &str) -> &'static str {
    let ext = Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "pdf" => "application/pdf",
        "txt" => "text/plain; charset=utf-8",
        "md" => "text/markdown; charset=utf-8",
        "html" | "htm" => "text/html; charset=utf-8",
        "json" => "application/json",
        "csv" => "text/csv; charset=utf-8",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{
        Method::{DELETE, GET, PUT},
        MockServer,
    };

    fn store_for(server: &MockServer) -> BlobStore {
        BlobStore::new(&StorageConfig {
            account_url: server.base_url(),
            container: "content".into(),
            sas_token: Some("?sv=2022&sig=abc".into()),
        })
        .expect("store")
    }

    #[test]
    fn listing_parses_names_and_marker() {
        let xml = "<?xml version=\"1.0\"?><EnumerationResults><Blobs>\
            <Blob><Name>a-0.pdf</Name></Blob><Blob><Name>R&amp;D.txt</Name></Blob>\
            </Blobs><NextMarker>token</NextMarker></EnumerationResults>";
        let listing = parse_blob_listing(xml).expect("listing");
        assert_eq!(listing.names, vec!["a-0.pdf", "R&D.txt"]);
        assert_eq!(listing.next_marker.as_deref(), Some("token"));

        let last = parse_blob_listing("<EnumerationResults><NextMarker /></EnumerationResults>")
            .expect("last page");
        assert!(last.names.is_empty());
        assert!(last.next_marker.is_none());
    }

    #[test]
    fn listing_decodes_character_references() {
        let xml = "<EnumerationResults Prefix=\"\"><Prefix>ignored</Prefix><Blobs>\
            <Blob><Name>a&#x20;b-0.pdf</Name><Properties><Content-Type>application/pdf</Content-Type></Properties></Blob>\
            <Blob><Name>&#54620;&#44397;-1.pdf</Name></Blob>\
            </Blobs><NextMarker>2!a&#43;b</NextMarker></EnumerationResults>";
        let listing = parse_blob_listing(xml).expect("listing");
        assert_eq!(listing.names, vec!["a b-0.pdf", "한국-1.pdf"]);
        assert_eq!(listing.next_marker.as_deref(), Some("2!a+b"));
    }

    #[test]
    fn malformed_listing_is_rejected() {
        let result = parse_blob_listing("<EnumerationResults><Blobs></Name></EnumerationResults>");
        assert!(matches!(result, Err(BlobError::InvalidListing(_))));
    }

    #[tokio::test]
    async fn existing_container_is_accepted() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(PUT)
                    .path("/content")
                    .query_param("restype", "container")
                    .query_param("sig", "abc");
                then.status(409);
            })
            .await;

        store_for(&server)
            .ensure_container()
            .await
            .expect("conflict is fine");
        mock.assert();
    }

    #[tokio::test]
    async fn text_files_upload_as_single_blob() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "hello").expect("write");

        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(PUT).path("/content");
                then.status(201);
            })
            .await;
        let upload = server
            .mock_async(|when, then| {
                when.method(PUT)
                    .path("/content/notes.txt")
                    .header("x-ms-blob-type", "BlockBlob")
                    .body("hello");
                then.status(201);
            })
            .await;

        let names = store_for(&server).upload_file(&path).await.expect("upload");
        upload.assert();
        assert_eq!(names, vec!["notes.txt".to_string()]);
    }

    #[tokio::test]
    async fn remove_blobs_only_deletes_page_blobs_of_the_file() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/content")
                    .query_param("comp", "list")
                    .query_param("prefix", "report");
                then.status(200).body(
                    "<EnumerationResults><Blobs>\
                     <Blob><Name>report-0.pdf</Name></Blob>\
                     <Blob><Name>report-1.pdf</Name></Blob>\
                     <Blob><Name>report-summary.pdf</Name></Blob>\
                     </Blobs><NextMarker/></EnumerationResults>",
                );
            })
            .await;
        let delete_pages = server
            .mock_async(|when, then| {
                when.method(DELETE).path_matches(
                    Regex::new(r"^/content/report-\d+\.pdf$").expect("regex"),
                );
                then.status(202);
            })
            .await;
        let delete_summary = server
            .mock_async(|when, then| {
                when.method(DELETE).path("/content/report-summary.pdf");
                then.status(202);
            })
            .await;

        let removed = store_for(&server)
            .remove_blobs(Some("data/report.pdf"))
            .await
            .expect("remove");

        assert_eq!(removed, 2);
        delete_pages.assert_hits(2);
        delete_summary.assert_hits(0);
    }

    #[test]
    fn mime_types_follow_extension() {
        assert_eq!(guess_mime_type("a-1.pdf"), "application/pdf");
        assert_eq!(guess_mime_type("NOTES.TXT"), "text/plain; charset=utf-8");
        assert_eq!(guess_mime_type("blob"), "application/octet-stream");
    }
}
