//! Token-paged harvesting from the bulk search endpoint.
//!
//! Each mode walks `/paper/search/bulk` by following the opaque `token` of
//! every page until a page comes back without one. Pages are persisted as
//! they arrive, so an aborted mode still leaves an audit trail of what was
//! fetched and the error page that stopped it.

use crate::config::{HarvestConfig, OutputLayout};
use crate::error::{Result, S2agError};
use crate::ledger::{ModeLedger, UnifiedLedger};
use crate::provenance::{utc_now_iso, write_checksums, write_json_pretty, DecisionLog};
use crate::retry::{self, Sleeper};
use crate::s2::{BulkPage, HarvestRecord};
use crate::table::{write_harvest_csv, HarvestRow};
use crate::transport::Transport;
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Body of `<mode>-bulk-raw.json`.
#[derive(Serialize)]
struct Merged<'a> {
    data: &'a [Value],
}

/// Body written in place of a page that could not be fetched.
#[derive(Serialize)]
struct ErrorPage<'a> {
    http_status: Option<u16>,
    error: &'a str,
}

/// A mode to harvest: its config and the tag used when the config has no `mode`.
#[derive(Debug, Clone)]
pub struct ModeSpec {
    pub config: HarvestConfig,
    pub fallback_tag: String,
}

impl ModeSpec {
    pub fn tag(&self) -> String {
        self.config.mode_tag(&self.fallback_tag)
    }
}

/// Outcome of one page request.
enum PageOutcome {
    Page { body: Vec<u8>, page: BulkPage, records: Vec<HarvestRecord> },
    Failed { status: Option<u16>, body: String, note: String },
}

pub struct Harvester<'a> {
    transport: &'a dyn Transport,
    sleeper: &'a dyn Sleeper,
    log: DecisionLog,
}

impl<'a> Harvester<'a> {
    pub fn new(transport: &'a dyn Transport, sleeper: &'a dyn Sleeper, log: DecisionLog) -> Self {
        Self {
            transport,
            sleeper,
            log,
        }
    }

    /// Harvest every mode in order, then write the unified ledger (rebuilt
    /// from the per-mode ledger files) and the checksum manifest. An aborted
    /// mode does not stop the others.
    pub async fn run_all(&self, modes: &[ModeSpec], layout: &OutputLayout) -> Result<UnifiedLedger> {
        layout.ensure()?;
        let run_time = utc_now_iso();
        let mut tags = Vec::with_capacity(modes.len());
        for mode in modes {
            let tag = mode.tag();
            self.run_mode(&mode.config, &tag, &run_time, layout).await?;
            tags.push(tag);
        }

        let unified = UnifiedLedger::from_logs(&layout.logs, &tags)?;
        unified.write(&layout.logs)?;
        write_checksums(
            &layout.base,
            &[layout.raw.as_path(), layout.intermediate.as_path(), layout.csv.as_path()],
            &layout.base.join("checksums.md"),
        )?;
        Ok(unified)
    }

    /// Fetch all pages of one mode and write its page files, merged file,
    /// CSV and ledger.
    ///
    /// HTTP-level failures end the mode with an error page and a ledger note;
    /// only local I/O problems are returned as errors.
    pub async fn run_mode(
        &self,
        cfg: &HarvestConfig,
        mode: &str,
        run_time: &str,
        layout: &OutputLayout,
    ) -> Result<ModeLedger> {
        cfg.validate()?;
        let mode = mode.to_lowercase();
        let base_params = cfg.search_params();
        let headers = cfg.headers();

        let mut ledger = ModeLedger::start(cfg, &mode, run_time);
        let mut values: Vec<Value> = Vec::new();
        let mut rows: Vec<HarvestRow> = Vec::new();
        let mut token: Option<String> = None;
        let mut page_idx: u32 = 0;

        info!(mode = %mode, query = %cfg.query, "Starting bulk harvest");

        loop {
            page_idx += 1;
            let mut params = base_params.clone();
            if let Some(t) = &token {
                params.push(("token".to_string(), t.clone()));
            }
            let page_path = layout.raw.join(format!("{}-bulk-p{:02}.json", mode, page_idx));

            match self.fetch_page(cfg, &params, &headers, page_idx).await {
                PageOutcome::Page { body, page, records } => {
                    std::fs::write(&page_path, &body)?;
                    ledger.record_page(&page_path);
                    if page_idx == 1 {
                        ledger.hits_reported = page.total;
                    }
                    info!(
                        mode = %mode,
                        page = page_idx,
                        records = page.data.len(),
                        has_token = page.next_token().is_some(),
                        "Fetched page"
                    );
                    rows.extend(records.iter().map(|r| HarvestRow::project(&mode, r)));
                    token = page.next_token().map(str::to_string);
                    values.extend(page.data);
                    if token.is_none() {
                        break;
                    }
                }
                PageOutcome::Failed { status, body, note } => {
                    write_json_pretty(
                        &page_path,
                        &ErrorPage {
                            http_status: status,
                            error: &body,
                        },
                    )?;
                    ledger.record_page(&page_path);
                    error!(mode = %mode, page = page_idx, status = ?status, "Aborting mode");
                    ledger.notes.push(note);
                    break;
                }
            }
        }

        let merged_path = layout.intermediate.join(format!("{}-bulk-raw.json", mode));
        write_merged(&merged_path, &values)?;
        ledger.merged_file = merged_path.display().to_string();

        let csv_path = layout.csv.join(format!("{}.csv", mode));
        write_harvest_csv(&csv_path, &rows)?;

        ledger.hits_retrieved = values.len();
        let ledger_path = ledger.write(&layout.logs)?;
        info!(
            mode = %mode,
            pages = page_idx,
            records = ledger.hits_retrieved,
            aborted = ledger.aborted(),
            ledger = %ledger_path.display(),
            "Mode complete"
        );
        Ok(ledger)
    }

    async fn fetch_page(
        &self,
        cfg: &HarvestConfig,
        params: &[(String, String)],
        headers: &[(String, String)],
        page_idx: u32,
    ) -> PageOutcome {
        let policy = cfg.retry.to_policy();
        let label = format!("GET {} p{:02}", cfg.endpoint_path(), page_idx);
        let result = retry::execute(&policy, self.sleeper, &self.log, &label, || {
            self.transport.get(&cfg.endpoint, params, headers)
        })
        .await;

        let response = match result {
            Ok(response) => response,
            Err(e) => return failure_outcome(&e),
        };

        let decoded = BulkPage::parse(&response.body).and_then(|page| {
            let records = page
                .data
                .iter()
                .map(HarvestRecord::from_value)
                .collect::<Result<Vec<_>>>()?;
            Ok((page, records))
        });
        match decoded {
            Ok((page, records)) => PageOutcome::Page {
                body: response.body,
                page,
                records,
            },
            Err(e) => {
                warn!(label = %label, error = %e, "Page body is not a valid bulk page");
                self.log.record(&format!("{} malformed page: {}", label, e));
                PageOutcome::Failed {
                    status: Some(response.status),
                    body: response.text(),
                    note: format!(
                        "HTTP {} with malformed body during bulk fetch; saved error page and aborted.",
                        response.status
                    ),
                }
            }
        }
    }
}

fn failure_outcome(e: &S2agError) -> PageOutcome {
    let status = e.status();
    let body = e.body().map(str::to_string).unwrap_or_else(|| e.to_string());
    let note = match status {
        Some(s) => format!("HTTP {} during bulk fetch; saved error page and aborted.", s),
        None => "Network failure during bulk fetch; saved error page and aborted.".to_string(),
    };
    PageOutcome::Failed { status, body, note }
}

fn write_merged(path: &Path, values: &[Value]) -> Result<()> {
    let content = serde_json::to_string(&Merged { data: values })?;
    std::fs::write(path, content)?;
    Ok(())
}

/// Load the mode configs named on the command line.
///
/// Each file's fallback tag is its stem with a leading `config_` removed
/// (`config_broad.json` -> `broad`).
pub fn load_modes(paths: &[PathBuf]) -> Result<Vec<ModeSpec>> {
    paths
        .iter()
        .map(|path| {
            let stem = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("mode");
            let fallback_tag = stem.strip_prefix("config_").unwrap_or(stem).to_string();
            Ok(ModeSpec {
                config: HarvestConfig::load(path)?,
                fallback_tag,
            })
        })
        .collect()
}
