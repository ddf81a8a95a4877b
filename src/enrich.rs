//! Batch enrichment against the Semantic Scholar Graph API.
//!
//! API details:
//! - Paper batch: POST /graph/v1/paper/batch (max 500 ids per request)
//! - Author batch: POST /graph/v1/author/batch
//! - References: GET /graph/v1/paper/{id}/references
//!
//! Enrichment is all-or-nothing: if any paper or author batch fails, the
//! input dataset comes back untouched apart from `s2_enriched = FALSE`.
//! Every raw response is kept under `provenance/raw_s2/` for audit.

use crate::config::{EnrichParams, OutputLayout, S2Params};
use crate::derive::{max_cited_year, parse_citing_year, PaperEnrichment, ENRICHED_COLUMNS};
use crate::error::Result;
use crate::provenance::{append_jsonl, utc_now_iso, DecisionLog, RunSummary};
use crate::retry::{self, RetryPolicy, Sleeper};
use crate::s2::{self, AuthorDetails, PaperDetails};
use crate::table::Dataset;
use crate::transport::Transport;
use serde_json::{json, Value};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::PathBuf;
use tracing::{debug, error, info, warn};

/// Phase name recorded in `run.json`
pub const RUN_PHASE: &str = "extractor_only_csv_single_sheet";

/// Flag column set on every row once enrichment finishes or aborts
pub const ENRICHED_FLAG: &str = "s2_enriched";

/// Thin client over the three enrichment endpoints.
pub struct S2Client<'a> {
    transport: &'a dyn Transport,
    sleeper: &'a dyn Sleeper,
    params: &'a S2Params,
    policy: RetryPolicy,
    log: DecisionLog,
    raw_dir: PathBuf,
}

impl<'a> S2Client<'a> {
    /// Creates `provenance/raw_s2/` and opens `provenance/s2_client.log`.
    pub fn new(
        transport: &'a dyn Transport,
        sleeper: &'a dyn Sleeper,
        params: &'a S2Params,
        layout: &OutputLayout,
    ) -> Result<Self> {
        let raw_dir = layout.raw_s2_dir();
        std::fs::create_dir_all(&raw_dir)?;
        Ok(Self {
            transport,
            sleeper,
            params,
            policy: params.to_policy(),
            log: DecisionLog::to_file(layout.provenance_dir().join("s2_client.log")),
            raw_dir,
        })
    }

    async fn post_batch<T>(&self, path: &str, fields: &str, ids: &[String], sink: &str) -> Result<Vec<T>>
    where
        T: for<'de> serde::Deserialize<'de>,
    {
        let url = format!("{}{}", self.params.base(), path);
        let query = vec![("fields".to_string(), fields.to_string())];
        let body = json!({ "ids": ids });
        let label = format!("POST {}", url);

        let response = retry::execute(&self.policy, self.sleeper, &self.log, &label, || {
            self.transport.post_json(&url, &query, &body)
        })
        .await?;

        let entries = s2::parse_batch::<T>(&response.body).inspect_err(|e| {
            self.log.record(&format!("{} malformed response: {}", label, e));
        })?;
        let raw: Vec<&Value> = entries.iter().map(|(raw, _)| raw).collect();
        append_jsonl(&self.raw_dir.join(sink), &raw)?;
        debug!(url = %url, requested = ids.len(), returned = entries.len(), "Batch completed");
        Ok(entries.into_iter().map(|(_, typed)| typed).collect())
    }

    pub async fn paper_batch(&self, ids: &[String]) -> Result<Vec<PaperDetails>> {
        self.post_batch(
            "/graph/v1/paper/batch",
            &self.params.paper_batch_fields,
            ids,
            "papers_batch.jsonl",
        )
        .await
    }

    pub async fn author_batch(&self, ids: &[String]) -> Result<Vec<AuthorDetails>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.post_batch(
            "/graph/v1/author/batch",
            &self.params.author_batch_fields,
            ids,
            "authors_batch.jsonl",
        )
        .await
    }

    /// Integer years of the papers cited by `paper_id`. The raw response is
    /// saved to `references_<id>.json`.
    pub async fn references_years(&self, paper_id: &str) -> Result<Vec<i32>> {
        let url = format!("{}/graph/v1/paper/{}/references", self.params.base(), paper_id);
        let query = vec![("fields".to_string(), self.params.references_fields.clone())];
        let label = format!("GET {}", url);

        let response = retry::execute(&self.policy, self.sleeper, &self.log, &label, || {
            self.transport.get(&url, &query, &[])
        })
        .await?;

        let body: Value = response.json()?;
        let file = self
            .raw_dir
            .join(format!("references_{}.json", safe_file_stem(paper_id)));
        std::fs::write(&file, &response.body)?;
        Ok(s2::reference_years(&body))
    }
}

/// Keep ids usable as file names.
pub fn safe_file_stem(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' { c } else { '_' })
        .collect()
}

struct RunCounts {
    records_in: usize,
    requested: usize,
    unique: usize,
}

impl RunCounts {
    fn summary(&self, params: &EnrichParams, records_out: usize, abort_reason: Option<String>) -> RunSummary {
        RunSummary {
            phase: RUN_PHASE.to_string(),
            records_in: self.records_in,
            records_out,
            paper_ids_requested: self.requested,
            paper_ids_unique: self.unique,
            weights: params.weights.clone(),
            s2_enriched: abort_reason.is_none(),
            abort_reason,
            timestamp_utc: utc_now_iso(),
        }
    }
}

/// Enrich `dataset` from the paper-batch, author-batch and references
/// endpoints.
///
/// Returns the enriched dataset with `s2_enriched = TRUE`, or, when a batch
/// call fails, the input unchanged except for `s2_enriched = FALSE`. Local
/// I/O failures (provenance files) are returned as errors.
pub async fn enrich_extract(
    mut dataset: Dataset,
    params: &EnrichParams,
    layout: &OutputLayout,
    transport: &dyn Transport,
    sleeper: &dyn Sleeper,
) -> Result<Dataset> {
    let provenance = layout.provenance_dir();
    let client = S2Client::new(transport, sleeper, &params.s2, layout)?;

    let ids: Vec<String> = dataset
        .column_values("paperId")
        .map(|values| values.filter(|v| !v.is_empty()).map(str::to_string).collect())
        .unwrap_or_default();
    let counts = RunCounts {
        records_in: dataset.len(),
        requested: ids.len(),
        unique: ids.iter().collect::<HashSet<_>>().len(),
    };
    let batch_size = params.s2.batch_size.max(1);
    info!(papers = ids.len(), unique = counts.unique, batch_size, "Starting S2 enrichment");

    let mut papers: Vec<PaperDetails> = Vec::new();
    for (batch_idx, chunk) in ids.chunks(batch_size).enumerate() {
        match client.paper_batch(chunk).await {
            Ok(found) => papers.extend(found),
            Err(e) => {
                let reason = format!("paper batch {} failed: {}", batch_idx + 1, e);
                return Ok(abort(dataset, params, &counts, &provenance, reason));
            }
        }
    }

    let author_ids: Vec<String> = papers
        .iter()
        .flat_map(PaperDetails::author_ids)
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let mut h_index: HashMap<String, i64> = HashMap::new();
    for (batch_idx, chunk) in author_ids.chunks(batch_size).enumerate() {
        match client.author_batch(chunk).await {
            Ok(authors) => {
                for author in authors {
                    if let (Some(id), Some(h)) = (author.author_id.as_deref(), author.h_index()) {
                        h_index.insert(id.trim().to_string(), h);
                    }
                }
            }
            Err(e) => {
                let reason = format!("author batch {} failed: {}", batch_idx + 1, e);
                return Ok(abort(dataset, params, &counts, &provenance, reason));
            }
        }
    }
    info!(papers = papers.len(), authors = author_ids.len(), "Batches complete");

    let mut cited: HashMap<String, i32> = HashMap::new();
    let mut seen: HashSet<&str> = HashSet::new();
    for id in &ids {
        if !seen.insert(id.as_str()) {
            continue;
        }
        let years = match client.references_years(id).await {
            Ok(years) => years,
            Err(e) => {
                warn!(paper_id = %id, error = %e, "References lookup failed, skipping");
                continue;
            }
        };
        let citing = citing_year(&dataset, id);
        if let Some(year) = max_cited_year(&years, citing) {
            cited.insert(id.clone(), year);
        }
    }

    let by_id: HashMap<&str, &PaperDetails> = papers
        .iter()
        .filter_map(|p| p.paper_id.as_deref().map(|id| (id, p)))
        .collect();

    for column in ENRICHED_COLUMNS {
        dataset.ensure_column(column, "");
    }
    for row in 0..dataset.len() {
        let pid = dataset.get(row, "paperId").unwrap_or_default().to_string();
        if let Some(paper) = by_id.get(pid.as_str()) {
            PaperEnrichment::from_details(paper, &h_index, cited.get(&pid).copied()).apply_to(&mut dataset, row);
        }
    }
    dataset.fill_column(ENRICHED_FLAG, "TRUE");

    counts
        .summary(params, dataset.len(), None)
        .write_best_effort(&provenance);
    info!(rows = dataset.len(), matched = by_id.len(), "S2 enrichment complete");
    Ok(dataset)
}

/// Year of the first row whose `paperId` is `id`.
fn citing_year(dataset: &Dataset, id: &str) -> Option<i32> {
    let row = dataset.column_values("paperId")?.position(|v| v == id)?;
    parse_citing_year(dataset.get(row, "year")?)
}

fn abort(
    mut dataset: Dataset,
    params: &EnrichParams,
    counts: &RunCounts,
    provenance: &std::path::Path,
    reason: String,
) -> Dataset {
    error!(reason = %reason, "S2 enrichment aborted; returning input unchanged");
    dataset.fill_column(ENRICHED_FLAG, "FALSE");
    counts
        .summary(params, dataset.len(), Some(reason))
        .write_best_effort(provenance);
    dataset
}
