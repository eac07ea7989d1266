use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use nanodb_core::{Store, UpdateOptions};
use serde_json::Value as Json;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "nanodb")]
#[command(about = "nanodb CLI - load, query, and export an in-memory document collection")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a JSON array of documents, run a filter query against it, and
    /// print the matches.
    Query {
        /// JSON file containing an array of documents
        file: PathBuf,
        /// Filter as a JSON object, e.g. '{"age": {"$gt": 18}}'
        #[arg(long, default_value = "{}")]
        filter: String,
        /// Sort as a JSON object mapping field to 1/-1
        #[arg(long)]
        sort: Option<String>,
        #[arg(long)]
        skip: Option<usize>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Count documents in a JSON file matching a filter.
    Count {
        file: PathBuf,
        #[arg(long, default_value = "{}")]
        filter: String,
    },
    /// Apply an update (modifiers or replacement) to every document in a
    /// JSON file matching a filter, writing the result to an output file.
    Update {
        file: PathBuf,
        out: PathBuf,
        #[arg(long, default_value = "{}")]
        filter: String,
        #[arg(long)]
        set: String,
        #[arg(long)]
        multi: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Query { file, filter, sort, skip, limit } => {
            query(&file, &filter, sort.as_deref(), skip, limit)
        }
        Commands::Count { file, filter } => count(&file, &filter),
        Commands::Update { file, out, filter, set, multi } => {
            update(&file, &out, &filter, &set, multi)
        }
    }
}

fn load_store(file: &Path) -> Result<Store> {
    let content = fs::read_to_string(file)
        .with_context(|| format!("failed to read file: {}", file.display()))?;
    let docs: Vec<Json> = serde_json::from_str(&content)
        .with_context(|| format!("expected a JSON array of documents in {}", file.display()))?;

    let store = Store::new();
    let values = docs.into_iter().map(nanodb_core::Value::from).collect();
    store
        .insert_many(values)
        .map_err(|e| anyhow::anyhow!("failed to load documents: {e}"))?;
    Ok(store)
}

fn parse_filter(filter: &str) -> Result<nanodb_core::Value> {
    let json: Json = serde_json::from_str(filter).with_context(|| "invalid filter JSON")?;
    Ok(nanodb_core::Value::from(json))
}

fn query(file: &Path, filter: &str, sort: Option<&str>, skip: Option<usize>, limit: Option<usize>) -> Result<()> {
    let store = load_store(file)?;
    let filter_value = parse_filter(filter)?;

    let results: Vec<nanodb_core::Value> = if let Some(sort) = sort {
        let sort_json: Json = serde_json::from_str(sort).with_context(|| "invalid sort JSON")?;
        let keys: Vec<(String, i32)> = sort_json
            .as_object()
            .with_context(|| "sort must be a JSON object")?
            .iter()
            .map(|(k, v)| (k.clone(), v.as_i64().unwrap_or(1) as i32))
            .collect();
        let mut cursor = store
            .find_sorted(filter_value, keys)
            .map_err(|e| anyhow::anyhow!("{e}"))?;
        if let Some(n) = skip {
            cursor = cursor.skip(n);
        }
        if let Some(n) = limit {
            cursor = cursor.limit(n);
        }
        cursor.exec().map_err(|e| anyhow::anyhow!("{e}"))?
    } else {
        let mut cursor = store.find(filter_value).map_err(|e| anyhow::anyhow!("{e}"))?;
        if let Some(n) = skip {
            cursor = cursor.skip(n);
        }
        if let Some(n) = limit {
            cursor = cursor.limit(n);
        }
        cursor.exec().map_err(|e| anyhow::anyhow!("{e}"))?
    };

    let json_results: Vec<Json> = results.iter().map(Json::from).collect();
    println!("{}", serde_json::to_string_pretty(&json_results)?);
    println!("{} document(s) matched", json_results.len());
    Ok(())
}

fn count(file: &Path, filter: &str) -> Result<()> {
    let store = load_store(file)?;
    let filter_value = parse_filter(filter)?;
    let n = store.count(filter_value).map_err(|e| anyhow::anyhow!("{e}"))?;
    println!("{n}");
    Ok(())
}

fn update(file: &Path, out: &Path, filter: &str, set: &str, multi: bool) -> Result<()> {
    let store = load_store(file)?;
    let filter_value = parse_filter(filter)?;
    let update_value = parse_filter(set)?;

    let report = store
        .update(
            filter_value,
            update_value,
            UpdateOptions {
                multi,
                upsert: false,
                return_updated_docs: false,
            },
        )
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    let all = store.find(nanodb_core::Value::from(Json::Object(Default::default())));
    let all = all.map_err(|e| anyhow::anyhow!("{e}"))?.exec().map_err(|e| anyhow::anyhow!("{e}"))?;
    let json_all: Vec<Json> = all.iter().map(Json::from).collect();
    fs::write(out, serde_json::to_string_pretty(&json_all)?)
        .with_context(|| format!("failed to write output file: {}", out.display()))?;

    println!("{} document(s) updated, written to {}", report.num_affected, out.display());
    Ok(())
}
