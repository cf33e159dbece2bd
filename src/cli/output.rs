//! Output formatting for CLI commands.

use serde::{Deserialize, Serialize};

use crate::cli::args::{OutputFormat, RagStoreArgs};
use crate::error::Result;
use crate::vector::engine::SearchResponse;
use crate::vector::index::IndexDescription;
use crate::vector::schema::CollectionSchema;

/// Result structure for collection creation.
#[derive(Debug, Serialize, Deserialize)]
pub struct CollectionCreated {
    pub collection: String,
    pub dimension: usize,
    pub metric: String,
    /// False when the collection already existed.
    pub created: bool,
}

/// Result structure for index builds and drops.
#[derive(Debug, Serialize, Deserialize)]
pub struct IndexOutcome {
    pub collection: String,
    pub field: String,
    pub algorithm: Option<String>,
    pub success: bool,
    pub duration_ms: u64,
}

/// Result structure for record insertion.
#[derive(Debug, Serialize, Deserialize)]
pub struct InsertSummary {
    pub collection: String,
    pub records_inserted: usize,
    pub batches: usize,
    pub duration_ms: u64,
    pub records_per_second: f64,
}

/// Result structure for deletions.
#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteSummary {
    pub collection: String,
    pub records_deleted: usize,
}

/// Full description of one collection.
#[derive(Debug, Serialize, Deserialize)]
pub struct CollectionDescription {
    pub schema: CollectionSchema,
    pub loaded: bool,
    pub row_count: usize,
    pub pending_row_count: usize,
    pub index: Option<IndexDescription>,
    pub created_at: String,
}

/// Collection names.
#[derive(Debug, Serialize, Deserialize)]
pub struct CollectionList {
    pub collections: Vec<String>,
}

/// Output a result in the specified format.
pub fn output_result<T: Serialize>(message: &str, result: &T, args: &RagStoreArgs) -> Result<()> {
    match args.output_format {
        OutputFormat::Human => output_human(message, result, args),
        OutputFormat::Json => output_json(result, args),
    }
}

/// Output a search response in the specified format.
pub fn output_search_response(response: &SearchResponse, args: &RagStoreArgs) -> Result<()> {
    match args.output_format {
        OutputFormat::Human => {
            output_search_results_human(response, args);
            Ok(())
        }
        OutputFormat::Json => output_json(response, args),
    }
}

/// Output in human-readable format.
fn output_human<T: Serialize>(message: &str, result: &T, args: &RagStoreArgs) -> Result<()> {
    if args.verbosity() > 0 {
        println!("{message}");
        println!();
    }

    let value = serde_json::to_value(result)?;
    output_generic_human(&value, 0);
    Ok(())
}

/// Output search results in human format.
fn output_search_results_human(response: &SearchResponse, args: &RagStoreArgs) {
    println!("Search Results ({}):", response.collection);
    println!("═══════════════");

    for (i, result) in response.results.iter().enumerate() {
        println!();
        println!("Result {}: {} (Score: {:.4})", i + 1, result.id, result.score);
        println!("─────────────");
        if !result.doc_id.is_empty() {
            println!("doc_id: {}", result.doc_id);
        }
        if !result.content.is_empty() {
            println!("content: {}", result.content);
        }
        match &result.raw_metadata {
            Some(raw) => println!("metadata: {raw}"),
            None if !result.metadata.is_empty() => {
                for (key, value) in &result.metadata {
                    println!("metadata.{key}: {value}");
                }
            }
            None => {}
        }
        if let Some(vector) = &result.vector {
            println!("vector: {vector:?}");
        }
    }

    println!();
    println!("Total results: {}", response.results.len());
    if args.verbosity() > 0 {
        println!("Search time: {}ms", response.took_ms);
    }
}

/// Output generic data in human format.
fn output_generic_human(value: &serde_json::Value, indent: usize) {
    let spaces = "  ".repeat(indent);
    match value {
        serde_json::Value::Object(obj) => {
            for (key, val) in obj {
                match val {
                    serde_json::Value::Object(_) => {
                        println!("{spaces}{key}:");
                        output_generic_human(val, indent + 1);
                    }
                    _ => println!("{spaces}{key}: {}", format_value(val)),
                }
            }
        }
        _ => println!("{spaces}{}", format_value(value)),
    }
}

/// Output in JSON format.
fn output_json<T: Serialize>(result: &T, args: &RagStoreArgs) -> Result<()> {
    let json = if args.pretty {
        serde_json::to_string_pretty(result)?
    } else {
        serde_json::to_string(result)?
    };

    println!("{json}");
    Ok(())
}

/// Format a JSON value for human display.
fn format_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Null => "-".to_string(),
        serde_json::Value::Array(arr) => {
            let items: Vec<String> = arr.iter().map(format_value).collect();
            format!("[{}]", items.join(", "))
        }
        serde_json::Value::Object(_) => value.to_string(),
    }
}
