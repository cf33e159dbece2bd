//! Command line argument parsing for the ragstore CLI using clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};

use crate::vector::core::distance::Metric;

/// ragstore - a vector store for retrieval-augmented generation
#[derive(Parser, Debug, Clone)]
#[command(name = "ragstore")]
#[command(about = "A vector store engine for retrieval-augmented generation")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(long_about = None)]
pub struct RagStoreArgs {
    /// Verbosity level (0=quiet, 1=normal, 2=verbose, 3=debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (overrides verbose)
    #[arg(short, long)]
    pub quiet: bool,

    /// Output format
    #[arg(short = 'f', long = "format", default_value = "human")]
    pub output_format: OutputFormat,

    /// Pretty-print JSON output
    #[arg(long)]
    pub pretty: bool,

    /// Directory holding collection snapshots
    #[arg(short, long, env = "RAGSTORE_DATA_DIR", value_name = "DIR")]
    pub data_dir: Option<PathBuf>,

    /// Configuration file (JSON)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Collection used when a command names none
    #[arg(long, env = "RAGSTORE_DEFAULT_COLLECTION", value_name = "NAME")]
    pub default_collection: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

impl RagStoreArgs {
    /// Get the effective verbosity level
    pub fn verbosity(&self) -> u8 {
        if self.quiet {
            0
        } else {
            match self.verbose {
                0 => 1, // Default to normal
                n => n,
            }
        }
    }
}

/// Available CLI commands
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Create a collection
    #[command(name = "create-collection")]
    CreateCollection(CreateCollectionArgs),

    /// Build the vector index of a collection
    #[command(name = "create-index")]
    CreateIndex(CreateIndexArgs),

    /// Drop the vector index of a collection
    #[command(name = "drop-index")]
    DropIndex(CollectionArgs),

    /// Insert records from a JSON Lines file
    Insert(InsertArgs),

    /// Search a collection
    Search(SearchArgs),

    /// Delete records
    Delete(DeleteArgs),

    /// Drop a collection
    Drop(CollectionArgs),

    /// Show schema, index and row counts of a collection
    Describe(CollectionArgs),

    /// List collections
    List,
}

/// A command that only names a collection
#[derive(Args, Debug, Clone)]
pub struct CollectionArgs {
    /// Collection name
    #[arg(value_name = "COLLECTION")]
    pub collection: String,
}

/// Arguments for creating a collection
#[derive(Args, Debug, Clone)]
pub struct CreateCollectionArgs {
    /// Collection name
    #[arg(value_name = "NAME")]
    pub name: String,

    /// Vector dimension
    #[arg(long, allow_negative_numbers = true)]
    pub dimension: i64,

    /// Similarity metric (cosine, l2, ip)
    #[arg(short, long, default_value = "cosine")]
    pub metric: Metric,

    /// Free-form description
    #[arg(long, default_value = "")]
    pub description: String,
}

/// Arguments for building an index
#[derive(Args, Debug, Clone)]
pub struct CreateIndexArgs {
    /// Collection name
    #[arg(value_name = "COLLECTION")]
    pub collection: String,

    /// Index algorithm (FLAT, HNSW, IVF_FLAT)
    #[arg(short, long, default_value = "HNSW")]
    pub algorithm: String,

    /// Index metric (defaults to the collection metric)
    #[arg(long)]
    pub metric: Option<Metric>,

    /// HNSW graph degree
    #[arg(long)]
    pub m: Option<usize>,

    /// HNSW construction breadth
    #[arg(long)]
    pub ef_construction: Option<usize>,

    /// IVF_FLAT cluster count
    #[arg(long)]
    pub nlist: Option<usize>,

    /// IVF_FLAT clusters probed per query
    #[arg(long)]
    pub nprobe: Option<usize>,
}

/// Arguments for inserting records
#[derive(Args, Debug, Clone)]
pub struct InsertArgs {
    /// Collection name
    #[arg(value_name = "COLLECTION")]
    pub collection: String,

    /// Records file, one JSON record per line
    #[arg(value_name = "RECORDS_JSONL")]
    pub records_file: PathBuf,

    /// Records per insert batch
    #[arg(short, long, default_value = "1000")]
    pub batch_size: usize,
}

/// Arguments for searching
#[derive(Args, Debug, Clone)]
pub struct SearchArgs {
    /// Collection name (defaults to the configured collection)
    #[arg(value_name = "COLLECTION")]
    pub collection: Option<String>,

    /// Query vector as a JSON array
    #[arg(long, allow_hyphen_values = true)]
    pub vector: String,

    /// Maximum number of results to return
    #[arg(short = 'k', long, default_value = "10")]
    pub top_k: usize,

    /// Search breadth factor
    #[arg(long, default_value = "10")]
    pub candidate_multiplier: usize,

    /// Filter expression, e.g. "doc_id == 'd1'"
    #[arg(long)]
    pub filter: Option<String>,

    /// Return stored vectors and echo the query vector
    #[arg(long)]
    pub output_vector: bool,

    /// Return metadata as the stored blob
    #[arg(long)]
    pub raw_metadata: bool,
}

/// Arguments for deleting records
#[derive(Args, Debug, Clone)]
#[group(skip)]
#[command(group(clap::ArgGroup::new("target").required(true).multiple(false).args(["ids", "doc_id", "filter"])))]
pub struct DeleteArgs {
    /// Collection name
    #[arg(value_name = "COLLECTION")]
    pub collection: String,

    /// Record ids (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub ids: Vec<String>,

    /// Delete every record of this document
    #[arg(long)]
    pub doc_id: Option<String>,

    /// Delete every record matching this filter expression
    #[arg(long)]
    pub filter: Option<String>,
}

/// Output formats for CLI
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable output
    Human,
    /// JSON output
    Json,
}
