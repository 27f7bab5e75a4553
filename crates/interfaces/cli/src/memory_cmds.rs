use std::collections::BTreeMap;

use anyhow::{Context, Result, anyhow, bail};
use chrono::{DateTime, Utc};

use synaptic_memory::{CompressedRecordStore, ContextValue, MemoryRecord, MemoryType, SearchQuery};

pub(crate) struct StoreRequest {
    pub content: String,
    pub id: Option<String>,
    pub memory_type: MemoryType,
    pub importance: f32,
    pub tags: Vec<String>,
    pub context: Vec<String>,
    pub associations: Vec<String>,
}

pub(crate) async fn run_store(store: &CompressedRecordStore, request: StoreRequest) -> Result<()> {
    let mut record = MemoryRecord::new(request.content, request.memory_type)
        .with_importance(request.importance);
    if let Some(id) = request.id {
        record = record.with_id(id);
    }
    for tag in request.tags {
        record = record.with_tag(tag);
    }
    for (key, value) in parse_pairs(&request.context)? {
        record = record.with_context(key, value);
    }
    for association in request.associations {
        record = record.with_association(association);
    }

    let stored = store.store(record).await?;
    println!("stored {}", stored.id);
    Ok(())
}

pub(crate) async fn run_get(store: &CompressedRecordStore, id: &str) -> Result<()> {
    let record = store
        .retrieve(id)
        .await
        .ok_or_else(|| anyhow!("no readable record with id `{id}`"))?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

pub(crate) fn build_query(
    terms: Vec<String>,
    types: impl IntoIterator<Item = MemoryType>,
    since: Option<&str>,
    until: Option<&str>,
    min_importance: Option<f32>,
    limit: Option<usize>,
) -> Result<SearchQuery> {
    let mut query = SearchQuery::text(terms)
        .with_types(types)
        .with_range(parse_instant(since)?, parse_instant(until)?);
    if let Some(min) = min_importance {
        query = query.with_min_importance(min);
    }
    if let Some(limit) = limit {
        query = query.with_limit(limit);
    }
    Ok(query)
}

pub(crate) async fn run_search(store: &CompressedRecordStore, query: &SearchQuery) {
    print_records(&store.search(query).await);
}

pub(crate) async fn run_context(store: &CompressedRecordStore, criteria: &[String]) -> Result<()> {
    let criteria = parse_pairs(criteria)?;
    print_records(&store.search_by_context(&criteria).await);
    Ok(())
}

pub(crate) async fn run_associated(store: &CompressedRecordStore, id: &str) {
    print_records(&store.search_by_association(id).await);
}

pub(crate) async fn run_link(
    store: &CompressedRecordStore,
    id: &str,
    targets: Vec<String>,
) -> Result<()> {
    let updated = store.update_associations(id, targets).await?;
    let linked = updated.associations.iter().cloned().collect::<Vec<_>>();
    println!("{} now linked to: {}", updated.id, linked.join(", "));
    Ok(())
}

pub(crate) async fn run_delete(store: &CompressedRecordStore, id: &str) -> Result<()> {
    if store.delete(id).await? {
        println!("deleted {id}");
    } else {
        println!("no record with id `{id}`");
    }
    Ok(())
}

pub(crate) async fn run_stats(store: &CompressedRecordStore) -> Result<()> {
    let stats = store.statistics().await?;
    println!("── record storage ───────────────────────────────────");
    println!("  directory         : {}", store.directory().display());
    println!("  files             : {}", stats.file_count);
    println!("  indexed records   : {}", stats.indexed_records);
    println!("  total bytes       : {}", stats.total_bytes);
    println!("  average bytes     : {:.1}", stats.average_bytes);
    println!("  compression ratio : {:.2}", stats.compression_ratio);
    println!(
        "  last optimized    : {}",
        stats
            .last_optimized_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "(not this session)".to_string())
    );
    Ok(())
}

pub(crate) async fn run_optimize(store: &CompressedRecordStore) -> Result<()> {
    let report = store.optimize_storage().await?;
    let [day, week, month, older] = report.bucket_sizes;
    println!("optimize complete");
    println!("- files by age: <1d={day} <7d={week} <30d={month} older={older}");
    println!("- superseded copies removed: {}", report.superseded_removed);
    println!("- unindexed files adopted: {}", report.adopted);
    println!("- re-compressed for archive: {}", report.recompressed);
    println!("- corrupt files removed: {}", report.corrupt_removed);
    println!("- stale temp files removed: {}", report.stale_tmp_removed);
    Ok(())
}

pub(crate) async fn run_rebuild_index(store: &CompressedRecordStore) -> Result<()> {
    let records = store.rebuild_index().await?;
    println!("index rebuilt: {records} records");
    Ok(())
}

fn print_records(records: &[MemoryRecord]) {
    if records.is_empty() {
        println!("no matching records");
        return;
    }
    for record in records {
        let when = record
            .timestamp
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<8}  {:.2}  {:<9}  {when}  {}",
            record.id_short(),
            record.importance_score,
            record.memory_type.label(),
            preview(&record.content, 60)
        );
    }
    println!("({} records)", records.len());
}

fn preview(content: &str, max_chars: usize) -> String {
    let flat = content.split_whitespace().collect::<Vec<_>>().join(" ");
    match flat.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}…", &flat[..cut]),
        None => flat,
    }
}

fn parse_instant(raw: Option<&str>) -> Result<Option<DateTime<Utc>>> {
    raw.map(|value| {
        DateTime::parse_from_rfc3339(value)
            .map(|t| t.with_timezone(&Utc))
            .with_context(|| format!("`{value}` is not an RFC 3339 timestamp"))
    })
    .transpose()
}

fn parse_pairs(pairs: &[String]) -> Result<BTreeMap<String, ContextValue>> {
    let mut parsed = BTreeMap::new();
    for pair in pairs {
        let Some((key, value)) = pair.split_once('=') else {
            bail!("malformed context entry `{pair}` (expected key=value)");
        };
        let key = key.trim();
        if key.is_empty() {
            bail!("context entry `{pair}` has an empty key");
        }
        parsed.insert(key.to_string(), parse_context_value(value.trim()));
    }
    Ok(parsed)
}

fn parse_context_value(raw: &str) -> ContextValue {
    if let Ok(flag) = raw.parse::<bool>() {
        return ContextValue::Bool(flag);
    }
    if let Ok(number) = raw.parse::<i64>() {
        return ContextValue::Integer(number);
    }
    match raw.parse::<f64>() {
        Ok(number) if number.is_finite() => ContextValue::Float(number),
        _ => ContextValue::Text(raw.to_string()),
    }
}
