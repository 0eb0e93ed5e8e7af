//! Document Intelligence `prebuilt-layout` client and page assembly.
//!
//! Table regions are rendered as inline HTML so the splitter can keep tables whole.

use super::{ExtractionError, pages_from_texts};
use crate::config::LayoutConfig;
use crate::splitter::PageBlock;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;

const API_VERSION: &str = "2023-07-31";
const MODEL_ID: &str = "prebuilt-layout";

/// Client for the layout analysis REST API.
pub struct LayoutClient {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    poll_interval: Duration,
    max_polls: u32,
}

/// Analysis output used for page assembly.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeResult {
    /// Full document text.
    pub content: String,
    /// Pages in document order.
    #[serde(default)]
    pub pages: Vec<LayoutPage>,
    /// Tables detected anywhere in the document.
    #[serde(default)]
    pub tables: Vec<LayoutTable>,
}

/// One analyzed page.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutPage {
    /// 1-based page number.
    pub page_number: usize,
    /// Spans of `content` covered by the page.
    #[serde(default)]
    pub spans: Vec<Span>,
}

/// Character range within `content`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct Span {
    /// Start offset, in code points.
    pub offset: usize,
    /// Length, in code points.
    pub length: usize,
}

/// A detected table.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutTable {
    /// Number of rows.
    pub row_count: usize,
    /// Cells in arbitrary order.
    #[serde(default)]
    pub cells: Vec<LayoutCell>,
    /// Regions of the table; the first one names the page it starts on.
    #[serde(default)]
    pub bounding_regions: Vec<BoundingRegion>,
    /// Spans of `content` covered by the table.
    #[serde(default)]
    pub spans: Vec<Span>,
}

/// Page reference of a table region.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundingRegion {
    /// 1-based page number.
    pub page_number: usize,
}

/// A table cell.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutCell {
    /// `content`, `columnHeader`, `rowHeader`, …
    #[serde(default)]
    pub kind: Option<String>,
    /// 0-based row.
    pub row_index: usize,
    /// 0-based column.
    pub column_index: usize,
    /// Rows spanned.
    #[serde(default = "one")]
    pub row_span: usize,
    /// Columns spanned.
    #[serde(default = "one")]
    pub column_span: usize,
    /// Cell text.
    #[serde(default)]
    pub content: String,
}

fn one() -> usize {
    1
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OperationStatus {
    status: String,
    #[serde(default)]
    analyze_result: Option<AnalyzeResult>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

impl LayoutClient {
    /// Construct a client for the configured resource.
    pub fn new(config: &LayoutConfig) -> Result<Self, ExtractionError> {
        let client = Client::builder()
            .user_agent("docrag/0.2")
            .build()
            .map_err(ExtractionError::Http)?;
        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            poll_interval: Duration::from_secs(1),
            max_polls: 600,
        })
    }

    /// Override how often and how long the operation is polled.
    pub fn with_polling(mut self, interval: Duration, max_polls: u32) -> Self {
        self.poll_interval = interval;
        self.max_polls = max_polls;
        self
    }

    /// Analyze a document and assemble its pages.
    pub async fn page_blocks(&self, bytes: Vec<u8>) -> Result<Vec<PageBlock>, ExtractionError> {
        let result = self.analyze(bytes).await?;
        Ok(build_pages(&result))
    }

    /// Submit a document and wait for the analysis result.
    pub async fn analyze(&self, bytes: Vec<u8>) -> Result<AnalyzeResult, ExtractionError> {
        let url = format!(
            "{}/formrecognizer/documentModels/{MODEL_ID}:analyze",
            self.endpoint
        );
        let mut request = self
            .client
            .post(url)
            .query(&[
                ("api-version", API_VERSION),
                ("stringIndexType", "unicodeCodePoint"),
            ])
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(bytes);
        if let Some(key) = &self.api_key {
            request = request.header("Ocp-Apim-Subscription-Key", key);
        }
        let response = request.send().await.map_err(ExtractionError::Http)?;
        if response.status() != StatusCode::ACCEPTED {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ExtractionError::UnexpectedStatus { status, body });
        }
        let operation = response
            .headers()
            .get("operation-location")
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| ExtractionError::Layout("missing Operation-Location header".into()))?;

        for poll in 0..self.max_polls {
            let mut request = self.client.get(&operation);
            if let Some(key) = &self.api_key {
                request = request.header("Ocp-Apim-Subscription-Key", key);
            }
            let response = request.send().await.map_err(ExtractionError::Http)?;
            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                return Err(ExtractionError::UnexpectedStatus { status, body });
            }
            let state: OperationStatus = response.json().await.map_err(ExtractionError::Http)?;
            match state.status.as_str() {
                "succeeded" => {
                    return state.analyze_result.ok_or_else(|| {
                        ExtractionError::Layout("succeeded without analyzeResult".into())
                    });
                }
                "failed" => {
                    let detail = state.error.map(|err| err.to_string()).unwrap_or_default();
                    return Err(ExtractionError::Layout(format!("analysis failed: {detail}")));
                }
                other => {
                    tracing::trace!(poll, status = other, "Layout analysis still running");
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }
        Err(ExtractionError::Layout(format!(
            "analysis did not finish after {} polls",
            self.max_polls
        )))
    }
}

/// Assemble page texts, replacing each table's characters with its HTML rendering.
///
/// Every page gets a trailing space; offsets accumulate page lengths in characters.
pub fn build_pages(result: &AnalyzeResult) -> Vec<PageBlock> {
    let content: Vec<char> = result.content.chars().collect();
    let mut texts = Vec::with_capacity(result.pages.len());

    for (page_idx, page) in result.pages.iter().enumerate() {
        let Some(page_span) = page.spans.first() else {
            texts.push(" ".to_string());
            continue;
        };
        let tables: Vec<&LayoutTable> = result
            .tables
            .iter()
            .filter(|table| {
                table
                    .bounding_regions
                    .first()
                    .is_some_and(|region| region.page_number == page_idx + 1)
            })
            .collect();

        let mut table_chars: Vec<Option<usize>> = vec![None; page_span.length];
        for (table_id, table) in tables.iter().enumerate() {
            for span in &table.spans {
                for i in 0..span.length {
                    let idx = (span.offset + i).checked_sub(page_span.offset);
                    if let Some(idx) = idx
                        && idx < page_span.length
                    {
                        table_chars[idx] = Some(table_id);
                    }
                }
            }
        }

        let mut text = String::new();
        let mut added = HashSet::new();
        for (idx, table_id) in table_chars.iter().enumerate() {
            match table_id {
                None => {
                    if let Some(c) = content.get(page_span.offset + idx) {
                        text.push(*c);
                    }
                }
                Some(table_id) => {
                    if added.insert(*table_id) {
                        text.push_str(&table_to_html(tables[*table_id]));
                    }
                }
            }
        }
        text.push(' ');
        texts.push(text);
    }

    pages_from_texts(texts)
}

/// Render a table as HTML, with header cells as `<th>` and spans as attributes.
pub fn table_to_html(table: &LayoutTable) -> String {
    let mut html = String::from("<table>");
    for row in 0..table.row_count {
        let mut cells: Vec<&LayoutCell> = table
            .cells
            .iter()
            .filter(|cell| cell.row_index == row)
            .collect();
        cells.sort_by_key(|cell| cell.column_index);

        html.push_str("<tr>");
        for cell in cells {
            let tag = match cell.kind.as_deref() {
                Some("columnHeader") | Some("rowHeader") => "th",
                _ => "td",
            };
            let mut spans = String::new();
            if cell.column_span > 1 {
                spans.push_str(&format!(" colSpan={}", cell.column_span));
            }
            if cell.row_span > 1 {
                spans.push_str(&format!(" rowSpan={}", cell.row_span));
            }
            html.push_str(&format!(
                "<{tag}{spans}>{}</{tag}>",
                escape_html(&cell.content)
            ));
        }
        html.push_str("</tr>");
    }
    html.push_str("</table>");
    html
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{
        Method::{GET, POST},
        MockServer,
    };
    use serde_json::json;

    fn cell(kind: Option<&str>, row: usize, column: usize, content: &str) -> LayoutCell {
        LayoutCell {
            kind: kind.map(str::to_string),
            row_index: row,
            column_index: column,
            row_span: 1,
            column_span: 1,
            content: content.into(),
        }
    }

    #[test]
    fn tables_render_headers_spans_and_escapes() {
        let mut wide = cell(None, 1, 0, "a < b & c");
        wide.column_span = 2;
        let table = LayoutTable {
            row_count: 2,
            cells: vec![
                cell(Some("columnHeader"), 0, 1, "Year"),
                cell(Some("columnHeader"), 0, 0, "Name"),
                wide,
            ],
            ..LayoutTable::default()
        };
        assert_eq!(
            table_to_html(&table),
            "<table><tr><th>Name</th><th>Year</th></tr>\
             <tr><td colSpan=2>a &lt; b &amp; c</td></tr></table>"
        );
    }

    #[test]
    fn table_spans_are_replaced_once_per_page() {
        // page 1: "Intro TABLE end" with TABLE covered by a table; page 2: "Next"
        let result = AnalyzeResult {
            content: "Intro TABLE endNext".into(),
            pages: vec![
                LayoutPage {
                    page_number: 1,
                    spans: vec![Span {
                        offset: 0,
                        length: 15,
                    }],
                },
                LayoutPage {
                    page_number: 2,
                    spans: vec![Span {
                        offset: 15,
                        length: 4,
                    }],
                },
            ],
            tables: vec![LayoutTable {
                row_count: 1,
                cells: vec![cell(None, 0, 0, "T")],
                bounding_regions: vec![BoundingRegion { page_number: 1 }],
                spans: vec![Span {
                    offset: 6,
                    length: 5,
                }],
            }],
        };

        let pages = build_pages(&result);
        assert_eq!(pages.len(), 2);
        assert_eq!(
            pages[0].text,
            "Intro <table><tr><td>T</td></tr></table> end "
        );
        assert_eq!(pages[1].text, "Next ");
        assert_eq!(pages[1].start_offset, pages[0].text.chars().count());
        assert_eq!(pages[1].page_number, 1);
    }

    #[tokio::test]
    async fn analyze_polls_until_succeeded() {
        let server = MockServer::start_async().await;
        let operation = format!("{}/operations/42", server.base_url());
        let submit = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/formrecognizer/documentModels/prebuilt-layout:analyze")
                    .query_param("stringIndexType", "unicodeCodePoint")
                    .header("Ocp-Apim-Subscription-Key", "layout-key");
                then.status(202).header("Operation-Location", &operation);
            })
            .await;
        let poll = server
            .mock_async(|when, then| {
                when.method(GET).path("/operations/42");
                then.status(200).json_body(json!({
                    "status": "succeeded",
                    "analyzeResult": {
                        "content": "본문",
                        "pages": [ { "pageNumber": 1, "spans": [ { "offset": 0, "length": 2 } ] } ],
                        "tables": []
                    }
                }));
            })
            .await;

        let client = LayoutClient::new(&LayoutConfig {
            endpoint: server.base_url(),
            api_key: Some("layout-key".into()),
        })
        .expect("client")
        .with_polling(Duration::ZERO, 3);
        let pages = client.page_blocks(b"%PDF".to_vec()).await.expect("pages");

        submit.assert();
        poll.assert();
        assert_eq!(pages, vec![PageBlock::new(0, 0, "본문 ")]);
    }
}
