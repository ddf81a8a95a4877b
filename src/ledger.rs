//! Per-mode and unified harvest ledgers.

use crate::config::HarvestConfig;
use crate::error::{Result, S2agError};
use crate::provenance::{utc_now_iso, write_json_pretty};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

pub const UNIFIED_NOTE: &str =
    "Unified package; /bulk endpoint; token-based paging; limit=1000; no dedup in this phase.";

/// Search parameters echoed into the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerParams {
    pub year: String,
    #[serde(rename = "fieldsOfStudy")]
    pub fields_of_study: String,
    pub fields: String,
    pub limit: u32,
    #[serde(rename = "publicationTypes")]
    pub publication_types: Option<String>,
}

impl From<&HarvestConfig> for LedgerParams {
    fn from(cfg: &HarvestConfig) -> Self {
        Self {
            year: cfg.year.clone(),
            fields_of_study: cfg.fields_of_study.clone(),
            fields: cfg.fields.clone(),
            limit: cfg.limit,
            publication_types: cfg.publication_types.clone(),
        }
    }
}

/// Audit record for one harvest mode (`ledger_<mode>.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeLedger {
    pub mode: String,
    pub date_time_utc: String,
    pub endpoint: String,
    pub query: String,
    pub params_json: LedgerParams,
    pub raw_export_files: Vec<String>,
    pub merged_file: String,
    pub export_formats: Vec<String>,
    pub notes: Vec<String>,
    pub hits_reported: Option<u64>,
    pub hits_retrieved: usize,
}

impl ModeLedger {
    /// Ledger skeleton for `mode`, before any page is fetched.
    pub fn start(cfg: &HarvestConfig, mode: &str, run_time: &str) -> Self {
        Self {
            mode: mode.to_uppercase(),
            date_time_utc: run_time.to_string(),
            endpoint: cfg.endpoint_path(),
            query: cfg.query.clone(),
            params_json: LedgerParams::from(cfg),
            raw_export_files: Vec::new(),
            merged_file: String::new(),
            export_formats: vec!["json".to_string(), "csv".to_string()],
            notes: Vec::new(),
            hits_reported: None,
            hits_retrieved: 0,
        }
    }

    pub fn record_page(&mut self, path: &Path) {
        self.raw_export_files.push(path.display().to_string());
    }

    /// True when the mode stopped on an error page.
    pub fn aborted(&self) -> bool {
        !self.notes.is_empty()
    }

    pub fn path_in(logs: &Path, mode: &str) -> PathBuf {
        logs.join(format!("ledger_{}.json", mode.to_lowercase()))
    }

    pub fn write(&self, logs: &Path) -> Result<PathBuf> {
        let path = Self::path_in(logs, &self.mode);
        write_json_pretty(&path, self)?;
        Ok(path)
    }

    pub fn read(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            S2agError::Validation(format!("Cannot read ledger {}: {}", path.display(), e))
        })?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// All modes of one run (`harvest_ledger.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnifiedLedger {
    pub date_time_utc: String,
    pub modes: Vec<ModeLedger>,
    pub notes: Vec<String>,
}

impl UnifiedLedger {
    pub fn combine(modes: Vec<ModeLedger>) -> Self {
        Self {
            date_time_utc: utc_now_iso(),
            modes,
            notes: vec![UNIFIED_NOTE.to_string()],
        }
    }

    /// Read `ledger_<mode>.json` for each mode from `logs`, in order.
    pub fn from_logs(logs: &Path, modes: &[String]) -> Result<Self> {
        let ledgers = modes
            .iter()
            .map(|m| ModeLedger::read(&ModeLedger::path_in(logs, m)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::combine(ledgers))
    }

    pub fn write(&self, logs: &Path) -> Result<PathBuf> {
        let path = logs.join("harvest_ledger.json");
        write_json_pretty(&path, self)?;
        info!(path = %path.display(), modes = self.modes.len(), "Wrote unified ledger");
        Ok(path)
    }
}
