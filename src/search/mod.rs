//! Search index integration: schema, document upload, and queries.

pub mod client;
pub mod schema;
pub mod types;

pub use client::{SearchBackend, SearchIndexClient, escape_odata};
pub use types::{
    IndexingSummary, SearchDocument, SearchError, SearchHit, SearchQuery, SearchResults,
};
