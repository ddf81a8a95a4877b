//! Audit artifacts: the append-only decision log, JSON-Lines sinks, the run
//! summary and the checksum manifest.

use crate::error::{Result, S2agError};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs::OpenOptions;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// `2024-05-01T12:00:00Z`, the ledger timestamp format.
pub fn utc_now_iso() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Append-only text log of retry/abort decisions, one line per decision:
/// `<UTC RFC 3339 timestamp> | <message>`.
#[derive(Debug, Clone, Default)]
pub struct DecisionLog {
    path: Option<PathBuf>,
}

impl DecisionLog {
    pub fn to_file(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    /// Log that only goes to tracing.
    pub fn disabled() -> Self {
        Self { path: None }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Best effort: a failed write is reported through tracing only.
    pub fn record(&self, message: &str) {
        let Some(path) = &self.path else {
            return;
        };
        let line = format!(
            "{} | {}\n",
            Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false),
            message
        );
        let written = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut f| f.write_all(line.as_bytes()));
        if let Err(e) = written {
            debug!(path = %path.display(), error = %e, "Failed to append decision log");
        }
    }
}

/// Append one JSON document per line to `path`.
pub fn append_jsonl<T: Serialize>(path: &Path, records: &[T]) -> Result<()> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut writer = BufWriter::new(file);
    for record in records {
        serde_json::to_writer(&mut writer, record)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}

/// Write `value` as indented JSON.
pub fn write_json_pretty<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let content = serde_json::to_string_pretty(value)?;
    std::fs::write(path, content)?;
    Ok(())
}

/// Summary of one enrichment run (`provenance/run.json`).
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub phase: String,
    pub records_in: usize,
    pub records_out: usize,
    pub paper_ids_requested: usize,
    pub paper_ids_unique: usize,
    pub weights: serde_json::Value,
    pub s2_enriched: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abort_reason: Option<String>,
    pub timestamp_utc: String,
}

impl RunSummary {
    /// Never fails the run; problems are logged.
    pub fn write_best_effort(&self, provenance_dir: &Path) {
        let result = std::fs::create_dir_all(provenance_dir)
            .map_err(S2agError::from)
            .and_then(|_| write_json_pretty(&provenance_dir.join("run.json"), self));
        if let Err(e) = result {
            warn!(dir = %provenance_dir.display(), error = %e, "Could not write run summary");
        }
    }
}

/// Hex SHA-256 of a file.
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 65536];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    if !dir.is_dir() {
        return Ok(());
    }
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_files(&path, out)?;
        } else {
            out.push(path);
        }
    }
    Ok(())
}

/// Write a markdown table of SHA-256 digests for every file under `dirs`.
///
/// Paths are listed relative to `base` when possible and sorted.
pub fn write_checksums(base: &Path, dirs: &[&Path], out_path: &Path) -> Result<usize> {
    let mut files = Vec::new();
    for dir in dirs {
        collect_files(dir, &mut files)?;
    }
    files.sort();
    files.dedup();

    let mut content = String::from("# Checksums\n\n| file | sha256 |\n|------|--------|\n");
    for file in &files {
        let shown = file.strip_prefix(base).unwrap_or(file.as_path());
        content.push_str(&format!("| {} | {} |\n", shown.display(), sha256_file(file)?));
    }
    std::fs::write(out_path, content)?;
    info!(files = files.len(), path = %out_path.display(), "Wrote checksum manifest");
    Ok(files.len())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_decision_log_appends_timestamped_lines() {
        let tmp = TempDir::new().unwrap();
        let log = DecisionLog::to_file(tmp.path().join("s2_client.log"));
        log.record("POST /paper/batch -> 429 (attempt 1)");
        log.record("POST /paper/batch -> 200");

        let content = std::fs::read_to_string(log.path().unwrap()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let (ts, msg) = lines[0].split_once(" | ").unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(ts).is_ok());
        assert_eq!(msg, "POST /paper/batch -> 429 (attempt 1)");
    }

    #[test]
    fn test_disabled_log_writes_nothing() {
        let log = DecisionLog::disabled();
        log.record("ignored");
        assert!(log.path().is_none());
    }

    #[test]
    fn test_append_jsonl() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("papers_batch.jsonl");
        append_jsonl(&path, &[serde_json::json!({"paperId": "a"})]).unwrap();
        append_jsonl(&path, &[serde_json::json!({"paperId": "b"})]).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "{\"paperId\":\"a\"}\n{\"paperId\":\"b\"}\n");
    }

    #[test]
    fn test_sha256_and_manifest() {
        let tmp = TempDir::new().unwrap();
        let raw = tmp.path().join("raw");
        std::fs::create_dir_all(&raw).unwrap();
        std::fs::write(raw.join("a.json"), "abc").unwrap();

        assert_eq!(
            sha256_file(&raw.join("a.json")).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );

        let manifest = tmp.path().join("checksums.md");
        let missing = tmp.path().join("missing");
        let count = write_checksums(tmp.path(), &[raw.as_path(), missing.as_path()], &manifest).unwrap();
        assert_eq!(count, 1);
        let content = std::fs::read_to_string(&manifest).unwrap();
        assert!(content.contains("raw/a.json"));
        assert!(!content.contains("missing"));
    }

    #[test]
    fn test_run_summary_best_effort_write() {
        let tmp = TempDir::new().unwrap();
        let summary = RunSummary {
            phase: "extractor_only_csv_single_sheet".to_string(),
            records_in: 2,
            records_out: 2,
            paper_ids_requested: 2,
            paper_ids_unique: 1,
            weights: serde_json::json!({}),
            s2_enriched: false,
            abort_reason: Some("author batch failed".to_string()),
            timestamp_utc: utc_now_iso(),
        };
        let dir = tmp.path().join("provenance");
        summary.write_best_effort(&dir);
        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(dir.join("run.json")).unwrap()).unwrap();
        assert_eq!(value["s2_enriched"], false);
        assert_eq!(value["paper_ids_unique"], 1);
    }
}
