use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use console::style;
use core_types::config::{AppConfig, load_or_create_config};
use indexmap::IndexMap;
use protocol::{SortOption, build_filter_value, parse_distinct_value};
use query::{DistinctsCache, Query, QueryOptions, QueryResultItem, SearchOutcome};
use serde_json::json;
use service::{Dataset, MemoryDataSource, SourceMetrics};
use tracing::info;

/// Debug / scripting CLI for the Vidyano query core.
#[derive(Parser, Debug)]
#[command(
    name = "vidyano-cli",
    version,
    about = "Run Vidyano queries against a JSON dataset"
)]
struct Cli {
    /// Config file (created with defaults when missing).
    #[arg(long, global = true, env = "VIDYANO_CONFIG")]
    config: Option<PathBuf>,
    /// Simulated data source latency in milliseconds.
    #[arg(long, global = true, default_value_t = 0)]
    latency_ms: u64,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Search the dataset and print one window of rows.
    Query {
        #[command(flatten)]
        scope: Scope,
        /// Sort in service form, e.g. "Name DESC; Age".
        #[arg(long)]
        sort: Option<String>,
        /// Group by column.
        #[arg(long)]
        group: Option<String>,
        /// First row to print.
        #[arg(long, default_value_t = 0)]
        skip: usize,
        /// Rows to print (defaults to one page).
        #[arg(long)]
        top: Option<usize>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List a column's distinct values under the other filters.
    Distincts {
        #[command(flatten)]
        scope: Scope,
        /// Column to list.
        #[arg(long)]
        column: String,
        /// Only values containing this text.
        #[arg(long)]
        search: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Dataset plus the filters that shape the result.
#[derive(clap::Args, Debug)]
struct Scope {
    /// JSON dataset to query.
    #[arg(long)]
    dataset: PathBuf,
    /// Free-text search over visible columns.
    #[arg(long)]
    text: Option<String>,
    /// Keep rows where COL equals VALUE (repeatable, OR'd per column).
    #[arg(long = "filter", value_name = "COL=VALUE")]
    filters: Vec<String>,
    /// Drop rows where COL equals VALUE (repeatable, OR'd per column).
    #[arg(long = "exclude", value_name = "COL=VALUE")]
    excludes: Vec<String>,
}

type MemoryQuery = Query<Arc<MemoryDataSource>>;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = load_or_create_config(cli.config.as_deref())?;
    let _guard = service::init_tracing_with_config(&cfg.logging)?;

    let metrics = if cfg.metrics.enabled {
        Some(Arc::new(SourceMetrics::new(&cfg.metrics)?))
    } else {
        None
    };

    match cli.command {
        Commands::Query {
            scope,
            sort,
            group,
            skip,
            top,
            json,
        } => {
            let q = open_query(&cfg, &scope, cli.latency_ms, metrics.clone())?;
            if let Some(sort) = sort.as_deref() {
                for (i, option) in SortOption::parse_list(sort).into_iter().enumerate() {
                    q.sort(&option.column, option.direction, i > 0)?;
                }
            }
            q.group_by_column(group.as_deref())?;
            run_query(&q, skip, top, json).await?;
        }
        Commands::Distincts {
            scope,
            column,
            search,
            json,
        } => {
            let q = open_query(&cfg, &scope, cli.latency_ms, metrics.clone())?;
            let cache = q.refresh_distincts(&column, search.as_deref()).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&distincts_json(&cache))?);
            } else {
                print_distincts(&column, &cache);
            }
        }
    }

    if let Some(metrics) = metrics {
        eprintln!("{}", String::from_utf8_lossy(&metrics.scrape()?));
    }
    Ok(())
}

fn open_query(
    cfg: &AppConfig,
    scope: &Scope,
    latency_ms: u64,
    metrics: Option<Arc<SourceMetrics>>,
) -> Result<MemoryQuery> {
    let dataset = Dataset::load(&scope.dataset)?;
    let mut source =
        MemoryDataSource::new(dataset)?.with_latency(Duration::from_millis(latency_ms));
    if let Some(metrics) = metrics {
        source = source.with_metrics(metrics);
    }
    let source = Arc::new(source);
    let q = Query::new(
        Arc::clone(&source),
        source.definition(),
        QueryOptions::from(&cfg.query),
    );

    if let Some(text) = &scope.text {
        q.set_text_search(text.as_str());
    }
    for (column, (values, inversed)) in parse_filters(&scope.filters, &scope.excludes)? {
        q.set_filter(&column, values, inversed)?;
    }
    Ok(q)
}

/// Group `COL=VALUE` pairs per column. A column is either included or
/// excluded, never both.
fn parse_filters(
    filters: &[String],
    excludes: &[String],
) -> Result<IndexMap<String, (Vec<String>, bool)>> {
    let mut out: IndexMap<String, (Vec<String>, bool)> = IndexMap::new();
    let pairs = filters
        .iter()
        .map(|f| (f, false))
        .chain(excludes.iter().map(|f| (f, true)));
    for (raw, inversed) in pairs {
        let (column, value) = raw
            .split_once('=')
            .with_context(|| format!("expected COL=VALUE, got {raw:?}"))?;
        let column = column.trim();
        if column.is_empty() {
            bail!("missing column in {raw:?}");
        }
        let entry = out
            .entry(column.to_string())
            .or_insert_with(|| (Vec::new(), inversed));
        if entry.1 != inversed {
            bail!("column {column} cannot be both filtered and excluded");
        }
        entry.0.push(build_filter_value(value, false));
    }
    Ok(out)
}

async fn run_query(q: &MemoryQuery, skip: usize, top: Option<usize>, json: bool) -> Result<()> {
    let outcome = q.search().await?;
    if let SearchOutcome::Reported(notification) = &outcome {
        bail!("search failed: {}", notification.message);
    }
    let top = top.unwrap_or(q.page_size() as usize);
    let items = q.get_items(skip, top).await?;
    info!(
        query = %q.id(),
        total = q.total_items(),
        shown = items.len(),
        "query completed"
    );

    if json {
        println!("{}", serde_json::to_string_pretty(&query_json(q, &items))?);
    } else {
        print_items(q, skip, &items);
    }
    Ok(())
}

fn query_json(q: &MemoryQuery, items: &[QueryResultItem]) -> serde_json::Value {
    let rows: Vec<_> = items
        .iter()
        .map(|item| {
            let values: serde_json::Map<String, serde_json::Value> = item
                .values
                .iter()
                .map(|v| (v.column.clone(), json!(v.value)))
                .collect();
            json!({ "id": item.id.as_str(), "index": item.index, "values": values })
        })
        .collect();
    let groups: Vec<_> = q
        .groups()
        .iter()
        .map(|g| json!({ "name": g.name, "start": g.start, "count": g.count }))
        .collect();
    json!({
        "query": q.id(),
        "total_items": q.total_items(),
        "has_more": q.has_more(),
        "items": rows,
        "groups": groups,
    })
}

fn print_items(q: &MemoryQuery, skip: usize, items: &[QueryResultItem]) {
    let columns: Vec<_> = q.columns().into_iter().filter(|c| !c.is_hidden).collect();
    let header: Vec<String> = columns.iter().map(|c| format!("{:<16}", c.label)).collect();
    println!("{}", style(format!("  #  {}", header.join(" "))).cyan());

    let groups = q.groups();
    for item in items {
        if let Some(group) = groups.iter().find(|g| g.start == item.index && g.count > 0) {
            let name = if group.name.is_empty() {
                "(empty)"
            } else {
                group.name.as_str()
            };
            println!("{}", style(format!("-- {name} ({})", group.count)).yellow());
        }
        let cells: Vec<String> = columns
            .iter()
            .map(|c| format!("{:<16}", item.raw(&c.name).unwrap_or("")))
            .collect();
        println!("{:3}  {}", item.index, cells.join(" "));
    }

    println!(
        "{}",
        style(format!(
            "shown {}..{} / total {}",
            skip,
            skip + items.len(),
            q.total_items()
        ))
        .green()
    );
}

fn distincts_json(cache: &DistinctsCache) -> serde_json::Value {
    let decode = |values: &[String]| -> Vec<serde_json::Value> {
        values
            .iter()
            .map(|raw| {
                let parsed = parse_distinct_value(raw);
                json!({ "raw": raw, "value": parsed.value, "display": parsed.display })
            })
            .collect()
    };
    json!({
        "matching": decode(&cache.matching),
        "remaining": decode(&cache.remaining),
        "has_more": cache.has_more.unwrap_or(false),
    })
}

fn print_distincts(column: &str, cache: &DistinctsCache) {
    println!("{}", style(format!("{column}: matching")).cyan());
    for raw in &cache.matching {
        println!("  {}", parse_distinct_value(raw).display);
    }
    println!("{}", style(format!("{column}: remaining")).yellow());
    for raw in &cache.remaining {
        println!("  {}", style(parse_distinct_value(raw).display).dim());
    }
    if cache.has_more == Some(true) {
        println!("{}", style("(more values available)").green());
    }
}
