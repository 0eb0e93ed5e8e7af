//! Index definition for document sections.

use serde_json::{Value, json};

/// Analyzer applied to the `content` field unless overridden.
pub const DEFAULT_ANALYZER: &str = "ja.lucene";
/// Dimensions of `text-embedding-ada-002` vectors.
pub const EMBEDDING_DIMENSIONS: usize = 1536;
/// Name of the semantic configuration used at query time.
pub const SEMANTIC_CONFIGURATION: &str = "default";

/// Build the index definition.
///
/// `id` is the key, `content` is searchable with `analyzer`, `embedding` is an HNSW/cosine
/// vector field, and `category`, `sourcepage`, `sourcefile` are filterable and facetable.
pub fn index_definition(name: &str, analyzer: &str, dimensions: usize) -> Value {
    json!({
        "name": name,
        "fields": [
            { "name": "id", "type": "Edm.String", "key": true },
            {
                "name": "content",
                "type": "Edm.String",
                "searchable": true,
                "analyzer": analyzer
            },
            {
                "name": "embedding",
                "type": "Collection(Edm.Single)",
                "searchable": true,
                "retrievable": true,
                "filterable": false,
                "sortable": false,
                "facetable": false,
                "dimensions": dimensions,
                "vectorSearchProfile": "embedding_config"
            },
            simple_field("category"),
            simple_field("sourcepage"),
            simple_field("sourcefile"),
        ],
        "semantic": {
            "configurations": [
                {
                    "name": SEMANTIC_CONFIGURATION,
                    "prioritizedFields": {
                        "prioritizedContentFields": [ { "fieldName": "content" } ]
                    }
                }
            ]
        },
        "vectorSearch": {
            "algorithms": [
                {
                    "name": "hnsw_config",
                    "kind": "hnsw",
                    "hnswParameters": { "metric": "cosine" }
                }
            ],
            "profiles": [
                { "name": "embedding_config", "algorithm": "hnsw_config" }
            ]
        }
    })
}

fn simple_field(name: &str) -> Value {
    json!({
        "name": name,
        "type": "Edm.String",
        "filterable": true,
        "facetable": true
    })
}
