//! Command implementations for the ragstore CLI.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::time::Instant;

use log::{info, warn};

use crate::cli::args::*;
use crate::cli::output::*;
use crate::config::StoreConfig;
use crate::error::{RagStoreError, Result};
use crate::vector::engine::{SearchRequest, VectorStore};
use crate::vector::index::IndexSpec;
use crate::vector::record::VectorRecord;
use crate::vector::schema::VECTOR_FIELD;

/// Execute a CLI command.
pub fn execute_command(args: RagStoreArgs) -> Result<()> {
    let store = open_store(&args)?;
    let result = match &args.command {
        Command::CreateCollection(create_args) => create_collection(&store, create_args, &args),
        Command::CreateIndex(index_args) => create_index(&store, index_args, &args),
        Command::DropIndex(collection_args) => drop_index(&store, collection_args, &args),
        Command::Insert(insert_args) => insert_records(&store, insert_args, &args),
        Command::Search(search_args) => search_collection(&store, search_args, &args),
        Command::Delete(delete_args) => delete_records(&store, delete_args, &args),
        Command::Drop(collection_args) => drop_collection(&store, collection_args, &args),
        Command::Describe(collection_args) => describe_collection(&store, collection_args, &args),
        Command::List => list_collections(&store, &args),
    };
    let closed = store.shutdown();
    result.and(closed)
}

/// Build the store configuration from the config file and command line
/// overrides, then open the store.
fn open_store(args: &RagStoreArgs) -> Result<VectorStore> {
    let mut config = match &args.config {
        Some(path) => StoreConfig::from_file(path)?,
        None => StoreConfig::default(),
    };
    if let Some(data_dir) = &args.data_dir {
        config = config.with_data_dir(data_dir);
    }
    if let Some(name) = &args.default_collection {
        config = config.with_default_collection(name);
    }
    if config.storage.data_dir.is_none() {
        return Err(RagStoreError::invalid_config(
            "no data directory: pass --data-dir, set RAGSTORE_DATA_DIR, or configure storage.data_dir",
        ));
    }
    VectorStore::open(config)
}

/// Create a collection.
fn create_collection(
    store: &VectorStore,
    args: &CreateCollectionArgs,
    cli_args: &RagStoreArgs,
) -> Result<()> {
    let existed = store.exists(&args.name)?;
    store.create_collection(&args.name, args.dimension, args.metric, &args.description)?;
    let created = !existed;
    let info = store.describe_collection(&args.name)?;

    output_result(
        if created {
            "Collection created"
        } else {
            "Collection already exists"
        },
        &CollectionCreated {
            collection: args.name.clone(),
            dimension: info.schema.dimension,
            metric: info.schema.metric.to_string(),
            created,
        },
        cli_args,
    )
}

/// Build the vector index of a collection.
fn create_index(store: &VectorStore, args: &CreateIndexArgs, cli_args: &RagStoreArgs) -> Result<()> {
    let metric = match args.metric {
        Some(metric) => metric,
        None => store.describe_collection(&args.collection)?.schema.metric,
    };
    let mut spec = IndexSpec::new(args.algorithm.clone(), metric);
    if let Some(m) = args.m {
        spec = spec.with_m(m);
    }
    if let Some(ef_construction) = args.ef_construction {
        spec = spec.with_ef_construction(ef_construction);
    }
    if let Some(nlist) = args.nlist {
        spec = spec.with_nlist(nlist);
    }
    if let Some(nprobe) = args.nprobe {
        spec = spec.with_nprobe(nprobe);
    }

    let start_time = Instant::now();
    let success = store.create_index(&args.collection, &spec)?;
    let algorithm = store
        .describe_collection(&args.collection)?
        .index
        .map(|index| index.algorithm().to_string());

    output_result(
        if success {
            "Index built"
        } else {
            "Index build failed"
        },
        &IndexOutcome {
            collection: args.collection.clone(),
            field: spec.field.clone(),
            algorithm,
            success,
            duration_ms: start_time.elapsed().as_millis() as u64,
        },
        cli_args,
    )
}

/// Drop the vector index of a collection.
fn drop_index(store: &VectorStore, args: &CollectionArgs, cli_args: &RagStoreArgs) -> Result<()> {
    let start_time = Instant::now();
    let dropped = store.drop_index(&args.collection, VECTOR_FIELD)?;

    output_result(
        if dropped {
            "Index dropped"
        } else {
            "No index to drop"
        },
        &IndexOutcome {
            collection: args.collection.clone(),
            field: VECTOR_FIELD.to_string(),
            algorithm: None,
            success: dropped,
            duration_ms: start_time.elapsed().as_millis() as u64,
        },
        cli_args,
    )
}

/// Insert records from a JSON Lines file in batches.
fn insert_records(store: &VectorStore, args: &InsertArgs, cli_args: &RagStoreArgs) -> Result<()> {
    if args.batch_size == 0 {
        return Err(RagStoreError::validation("batch size must be positive"));
    }
    if cli_args.verbosity() > 1 {
        println!("Inserting records from: {}", args.records_file.display());
    }

    let records = read_records(&args.records_file)?;
    if records.is_empty() {
        return Err(RagStoreError::validation(format!(
            "no records in {}",
            args.records_file.display()
        )));
    }

    let start_time = Instant::now();
    let mut inserted = 0;
    let mut batches = 0;
    for batch in records.chunks(args.batch_size) {
        let result = store.batch_insert(&args.collection, batch.to_vec())?;
        inserted += result.insert_count;
        batches += 1;
        if cli_args.verbosity() > 1 {
            println!("Processed {inserted} records...");
        }
    }
    let duration = start_time.elapsed();
    info!(
        "inserted {inserted} records into {} in {batches} batches",
        args.collection
    );

    output_result(
        "Records inserted",
        &InsertSummary {
            collection: args.collection.clone(),
            records_inserted: inserted,
            batches,
            duration_ms: duration.as_millis() as u64,
            records_per_second: if duration.as_secs_f64() > 0.0 {
                inserted as f64 / duration.as_secs_f64()
            } else {
                0.0
            },
        },
        cli_args,
    )
}

/// Parse one record per non-blank line.
fn read_records(path: &Path) -> Result<Vec<VectorRecord>> {
    let reader = BufReader::new(File::open(path)?);
    let mut records = Vec::new();
    for (line_num, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: VectorRecord = serde_json::from_str(&line).map_err(|e| {
            RagStoreError::validation(format!(
                "{}:{}: invalid record: {e}",
                path.display(),
                line_num + 1
            ))
        })?;
        records.push(record);
    }
    Ok(records)
}

/// Search a collection.
fn search_collection(store: &VectorStore, args: &SearchArgs, cli_args: &RagStoreArgs) -> Result<()> {
    let vector: Vec<f32> = serde_json::from_str(&args.vector).map_err(|e| {
        RagStoreError::validation(format!("query vector must be a JSON array of numbers: {e}"))
    })?;

    let mut request = SearchRequest::new(vector)
        .with_top_k(args.top_k)
        .with_candidate_multiplier(args.candidate_multiplier)
        .with_output_vector(args.output_vector)
        .with_decode_metadata(!args.raw_metadata);
    if let Some(filter) = &args.filter {
        request = request.with_filter(filter.clone());
    }
    if let Some(collection) = &args.collection {
        request = request.in_collection(collection.clone());
    }

    let collection = request
        .collection_name
        .clone()
        .unwrap_or_else(|| store.config().collection.name.clone());
    if cli_args.verbosity() > 1 {
        println!("Searching collection: {collection}");
    }
    store.load_collection(&collection)?;

    let response = store.search_default(&request)?;
    output_search_response(&response, cli_args)
}

/// Delete records by ids, by document, or by filter.
fn delete_records(store: &VectorStore, args: &DeleteArgs, cli_args: &RagStoreArgs) -> Result<()> {
    let records_deleted = if let Some(filter) = &args.filter {
        store.delete_by_filter(&args.collection, filter)?
    } else {
        let before = store.collection_stats(&args.collection)?.row_count;
        if let Some(doc_id) = &args.doc_id {
            store.delete_by_owning_document(&args.collection, doc_id)?;
        } else {
            store.delete_by_ids(&args.collection, &args.ids)?;
        }
        let after = store.collection_stats(&args.collection)?.row_count;
        before.saturating_sub(after)
    };
    if records_deleted == 0 {
        warn!("nothing matched in {}", args.collection);
    }

    output_result(
        "Records deleted",
        &DeleteSummary {
            collection: args.collection.clone(),
            records_deleted,
        },
        cli_args,
    )
}

/// Drop a collection and its stored data.
fn drop_collection(store: &VectorStore, args: &CollectionArgs, cli_args: &RagStoreArgs) -> Result<()> {
    store.drop_collection(&args.collection)?;
    output_result(
        "Collection dropped",
        &CollectionList {
            collections: store.list_collections()?,
        },
        cli_args,
    )
}

/// Describe a collection.
fn describe_collection(
    store: &VectorStore,
    args: &CollectionArgs,
    cli_args: &RagStoreArgs,
) -> Result<()> {
    let info = store.describe_collection(&args.collection)?;
    let stats = store.collection_stats(&args.collection)?;

    output_result(
        &format!("Collection {}", args.collection),
        &CollectionDescription {
            schema: info.schema,
            loaded: info.loaded,
            row_count: stats.row_count,
            pending_row_count: stats.pending_row_count,
            index: info.index,
            created_at: info.created_at.to_rfc3339(),
        },
        cli_args,
    )
}

/// List collections.
fn list_collections(store: &VectorStore, cli_args: &RagStoreArgs) -> Result<()> {
    output_result(
        "Collections",
        &CollectionList {
            collections: store.list_collections()?,
        },
        cli_args,
    )
}
