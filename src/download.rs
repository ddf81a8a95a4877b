//! Open-access PDF downloader.
//!
//! Tasks run concurrently on a bounded pool, one task per paper id. Each
//! task owns its HTTP client and its output file, so nothing is shared
//! between them. A download only counts when the saved file starts with the
//! PDF signature.

use crate::enrich::safe_file_stem;
use crate::error::{Result, S2agError};
use crate::retry::Sleeper;
use crate::table::Dataset;
use crate::transport::{ReqwestTransport, Transport};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tracing::{debug, error, info, warn};

/// Attempts with the default client before the fallback request
pub const MAX_ATTEMPTS: u32 = 3;

/// Backoff before attempt `n + 1` is `BACKOFF_FACTOR^(n - 1)` seconds
pub const BACKOFF_FACTOR: f64 = 2.0;

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

pub const DEFAULT_WORKERS: usize = 4;

pub const PDF_MAGIC: &[u8] = b"%PDF-";

/// Headers of the last-resort request; some publishers refuse non-browser clients.
const BROWSER_HEADERS: &[(&str, &str)] = &[
    (
        "User-Agent",
        "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36",
    ),
    ("Accept", "application/pdf,application/octet-stream;q=0.9,*/*;q=0.8"),
    ("Accept-Language", "en-US,en;q=0.9"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTask {
    pub paper_id: String,
    pub url: String,
}

/// One row of `download_failures.csv`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadFailure {
    #[serde(rename = "paperId")]
    pub paper_id: String,
    pub url: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadStatus {
    Downloaded(PathBuf),
    /// A valid PDF was already on disk
    Skipped(PathBuf),
}

#[derive(Debug, Default)]
pub struct DownloadReport {
    pub downloaded: usize,
    pub skipped: usize,
    pub failures: Vec<DownloadFailure>,
}

/// Read `(paperId, url)` pairs from a CSV file.
///
/// The URL comes from a `url` column, else `open_access_pdf_url`. Rows
/// missing either value are skipped with a warning.
pub fn read_tasks(path: &Path) -> Result<Vec<DownloadTask>> {
    let dataset = Dataset::read_csv(path)?;
    let url_column = ["url", "open_access_pdf_url"]
        .into_iter()
        .find(|c| dataset.column_index(c).is_some())
        .ok_or_else(|| {
            S2agError::Validation(format!(
                "{} has neither a url nor an open_access_pdf_url column",
                path.display()
            ))
        })?;
    if dataset.column_index("paperId").is_none() {
        return Err(S2agError::Validation(format!(
            "{} is missing the paperId column",
            path.display()
        )));
    }

    let mut tasks = Vec::new();
    for row in 0..dataset.len() {
        let paper_id = dataset.get(row, "paperId").unwrap_or_default().trim();
        let url = dataset.get(row, url_column).unwrap_or_default().trim();
        if paper_id.is_empty() {
            warn!(row = row + 1, "Row skipped: missing paperId");
            continue;
        }
        if url.is_empty() {
            warn!(row = row + 1, paper_id, "Row skipped: missing url");
            continue;
        }
        tasks.push(DownloadTask {
            paper_id: paper_id.to_string(),
            url: url.to_string(),
        });
    }
    info!(path = %path.display(), tasks = tasks.len(), column = url_column, "Loaded download tasks");
    Ok(tasks)
}

/// True when `path` exists and starts with `%PDF-`.
pub async fn has_pdf_signature(path: &Path) -> bool {
    let Ok(mut file) = tokio::fs::File::open(path).await else {
        return false;
    };
    let mut head = [0u8; 5];
    match file.read_exact(&mut head).await {
        Ok(_) => head.as_slice() == PDF_MAGIC,
        Err(_) => false,
    }
}

/// Fresh client for one task.
pub fn reqwest_factory(_task: &DownloadTask) -> Result<Box<dyn Transport>> {
    Ok(Box::new(ReqwestTransport::new(REQUEST_TIMEOUT)?))
}

/// Output file for a paper id.
pub fn pdf_path(out_dir: &Path, paper_id: &str) -> PathBuf {
    out_dir.join(format!("{}.pdf", safe_file_stem(paper_id)))
}

/// Fetch one PDF body: `MAX_ATTEMPTS` plain requests with exponential
/// backoff, then one request with browser headers.
async fn fetch_pdf(transport: &dyn Transport, sleeper: &dyn Sleeper, task: &DownloadTask) -> Option<Vec<u8>> {
    for attempt in 1..=MAX_ATTEMPTS {
        match transport.get(&task.url, &[], &[]).await {
            Ok(resp) if resp.status == 200 && resp.body.starts_with(PDF_MAGIC) => return Some(resp.body),
            Ok(resp) => warn!(
                paper_id = %task.paper_id,
                attempt,
                status = resp.status,
                content_type = ?resp.content_type,
                "Response is not a PDF"
            ),
            Err(e) => warn!(paper_id = %task.paper_id, attempt, error = %e, "Download attempt failed"),
        }
        if attempt < MAX_ATTEMPTS {
            let wait = Duration::from_secs_f64(BACKOFF_FACTOR.powi(attempt as i32 - 1));
            debug!(paper_id = %task.paper_id, wait_secs = wait.as_secs_f64(), "Retrying download");
            sleeper.sleep(wait).await;
        }
    }

    let headers: Vec<(String, String)> = BROWSER_HEADERS
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    match transport.get(&task.url, &[], &headers).await {
        Ok(resp) if resp.status == 200 && resp.body.starts_with(PDF_MAGIC) => Some(resp.body),
        Ok(resp) => {
            warn!(paper_id = %task.paper_id, status = resp.status, "Fallback request did not return a PDF");
            None
        }
        Err(e) => {
            warn!(paper_id = %task.paper_id, error = %e, "Fallback request failed");
            None
        }
    }
}

async fn download_one<F>(
    task: &DownloadTask,
    out_dir: &Path,
    factory: &F,
    sleeper: &dyn Sleeper,
) -> std::result::Result<DownloadStatus, DownloadFailure>
where
    F: Fn(&DownloadTask) -> Result<Box<dyn Transport>>,
{
    let dest = pdf_path(out_dir, &task.paper_id);
    let fail = |reason: String| DownloadFailure {
        paper_id: task.paper_id.clone(),
        url: task.url.clone(),
        reason,
    };
    let exhausted = || fail(format!("download failed (all retries) for {}", task.url));

    if has_pdf_signature(&dest).await {
        debug!(paper_id = %task.paper_id, "Valid PDF already present");
        return Ok(DownloadStatus::Skipped(dest));
    }

    let transport = factory(task).map_err(|e| fail(format!("client setup failed: {}", e)))?;
    let body = fetch_pdf(transport.as_ref(), sleeper, task)
        .await
        .ok_or_else(exhausted)?;

    if let Err(e) = tokio::fs::write(&dest, &body).await {
        return Err(fail(format!("could not write {}: {}", dest.display(), e)));
    }
    if !has_pdf_signature(&dest).await {
        let _ = tokio::fs::remove_file(&dest).await;
        return Err(exhausted());
    }
    info!(paper_id = %task.paper_id, bytes = body.len(), path = %dest.display(), "Saved PDF");
    Ok(DownloadStatus::Downloaded(dest))
}

/// Download every task with at most `workers` in flight.
///
/// Failures are collected, never raised; they are written to
/// `download_failures.csv` and `failed_ids.txt` in `out_dir` (in input order).
pub async fn download_all<F>(
    tasks: Vec<DownloadTask>,
    out_dir: &Path,
    workers: usize,
    factory: F,
    sleeper: &dyn Sleeper,
) -> Result<DownloadReport>
where
    F: Fn(&DownloadTask) -> Result<Box<dyn Transport>>,
{
    use futures::stream::{self, StreamExt};

    tokio::fs::create_dir_all(out_dir).await?;
    let workers = workers.max(1);
    info!(tasks = tasks.len(), workers, out = %out_dir.display(), "Starting downloads");

    let factory = &factory;
    let mut outcomes: Vec<(usize, std::result::Result<DownloadStatus, DownloadFailure>)> =
        stream::iter(tasks.into_iter().enumerate())
            .map(|(idx, task)| async move { (idx, download_one(&task, out_dir, factory, sleeper).await) })
            .buffer_unordered(workers)
            .collect()
            .await;
    outcomes.sort_by_key(|(idx, _)| *idx);

    let mut report = DownloadReport::default();
    for (_, outcome) in outcomes {
        match outcome {
            Ok(DownloadStatus::Downloaded(_)) => report.downloaded += 1,
            Ok(DownloadStatus::Skipped(_)) => report.skipped += 1,
            Err(failure) => {
                error!(paper_id = %failure.paper_id, reason = %failure.reason, "Download failed");
                report.failures.push(failure);
            }
        }
    }

    write_failures(out_dir, &report.failures)?;
    info!(
        downloaded = report.downloaded,
        skipped = report.skipped,
        failed = report.failures.len(),
        "Downloads complete"
    );
    Ok(report)
}

fn write_failures(out_dir: &Path, failures: &[DownloadFailure]) -> Result<()> {
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(out_dir.join("download_failures.csv"))?;
    wtr.write_record(["paperId", "url", "reason"])?;
    for failure in failures {
        wtr.serialize(failure)?;
    }
    wtr.flush()?;

    let ids: String = failures.iter().map(|f| format!("{}\n", f.paper_id)).collect();
    std::fs::write(out_dir.join("failed_ids.txt"), ids)?;
    Ok(())
}
