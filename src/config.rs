//! Typed configuration for harvest modes, enrichment and output directories.
//!
//! Configuration is loaded once per run and passed into each component; nothing
//! here is global. Directory creation is idempotent and happens in
//! [`OutputLayout::ensure`].

use crate::error::{Result, S2agError};
use crate::retry::{Bound, RetryPolicy, Rule, Wait};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Bulk search page size ceiling imposed by the API
pub const MAX_PAGE_LIMIT: u32 = 1000;

/// Maximum ids per batch POST
pub const MAX_BATCH_SIZE: usize = 500;

pub const DEFAULT_RAW_DIR: &str = "raw";
pub const DEFAULT_INTERMEDIATE_DIR: &str = "intermediate";
pub const DEFAULT_CSV_DIR: &str = "CSVs";
pub const DEFAULT_LOG_DIR: &str = "logs";

/// One harvest mode (`config_broad.json`, `config_precise.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvestConfig {
    #[serde(default)]
    pub mode: Option<String>,
    pub endpoint: String,
    pub query: String,
    pub year: String,
    #[serde(rename = "fieldsOfStudy")]
    pub fields_of_study: String,
    pub fields: String,
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(rename = "publicationTypes", default)]
    pub publication_types: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub retry: HarvestRetryConfig,
}

fn default_limit() -> u32 {
    MAX_PAGE_LIMIT
}

impl HarvestConfig {
    /// Load and validate a mode config from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            S2agError::Config(format!("Cannot read harvest config {}: {}", path.display(), e))
        })?;
        let cfg: HarvestConfig = serde_json::from_str(&content)?;
        cfg.validate()?;
        debug!(path = %path.display(), "Loaded harvest config");
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_PAGE_LIMIT).contains(&self.limit) {
            return Err(S2agError::Config(format!(
                "limit must be between 1 and {}, got {}",
                MAX_PAGE_LIMIT, self.limit
            )));
        }
        if self.query.trim().is_empty() {
            return Err(S2agError::Config("query must not be empty".to_string()));
        }
        url::Url::parse(&self.endpoint)
            .map_err(|e| S2agError::Config(format!("Invalid endpoint {}: {}", self.endpoint, e)))?;
        Ok(())
    }

    /// Lower-case mode tag used in file names. Falls back to `fallback`
    /// when the config does not name its mode.
    pub fn mode_tag(&self, fallback: &str) -> String {
        self.mode
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(fallback)
            .to_lowercase()
    }

    /// Search parameters repeated on every page request.
    pub fn search_params(&self) -> Vec<(String, String)> {
        let mut params = vec![
            ("query".to_string(), self.query.clone()),
            ("year".to_string(), self.year.clone()),
            ("fieldsOfStudy".to_string(), self.fields_of_study.clone()),
            ("fields".to_string(), self.fields.clone()),
            ("limit".to_string(), self.limit.to_string()),
        ];
        if let Some(types) = self.publication_types.as_deref().filter(|t| !t.is_empty()) {
            params.push(("publicationTypes".to_string(), types.to_string()));
        }
        params
    }

    /// Path component of the endpoint, as recorded in the ledger.
    pub fn endpoint_path(&self) -> String {
        url::Url::parse(&self.endpoint)
            .map(|u| u.path().to_string())
            .unwrap_or_else(|_| self.endpoint.clone())
    }

    pub fn headers(&self) -> Vec<(String, String)> {
        self.headers
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// Retry timings for the bulk search fetcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvestRetryConfig {
    /// Wait on 429 when no `Retry-After` header is sent
    pub rate_limit_default_secs: f64,
    pub server_error_secs: f64,
    pub gateway_secs: f64,
    pub network_secs: f64,
    /// Attempt cap for 502/503/504
    pub max_gateway_retries: u32,
    /// Optional ceiling on the otherwise unbounded classes (429, 500, network)
    pub max_unbounded_retries: Option<u32>,
}

impl Default for HarvestRetryConfig {
    fn default() -> Self {
        Self {
            rate_limit_default_secs: 2.0,
            server_error_secs: 1.0,
            gateway_secs: 1.0,
            network_secs: 1.5,
            max_gateway_retries: 5,
            max_unbounded_retries: None,
        }
    }
}

impl HarvestRetryConfig {
    pub fn to_policy(&self) -> RetryPolicy {
        let gateway = Rule {
            wait: Wait::Fixed(secs(self.gateway_secs)),
            bound: Bound::Attempts(self.max_gateway_retries),
        };
        RetryPolicy {
            rate_limited: Some(Rule {
                wait: Wait::RetryAfterOr(secs(self.rate_limit_default_secs)),
                bound: Bound::Unbounded,
            }),
            server_error: Some(Rule {
                wait: Wait::Fixed(secs(self.server_error_secs)),
                bound: Bound::Unbounded,
            }),
            gateway: vec![(502, gateway), (503, gateway), (504, gateway)],
            network: Rule {
                wait: Wait::Fixed(secs(self.network_secs)),
                bound: Bound::Unbounded,
            },
            unbounded_ceiling: self.max_unbounded_retries,
        }
    }
}

/// Enrichment parameters (`params.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichParams {
    pub s2: S2Params,
    /// Scoring weights, consumed downstream and copied into the run summary
    #[serde(default = "empty_object")]
    pub weights: serde_json::Value,
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S2Params {
    pub base_url: String,
    pub paper_batch_fields: String,
    pub author_batch_fields: String,
    pub references_fields: String,
    pub retry_sleep_seconds: f64,
    pub timeout_seconds: f64,
    pub max_retries: u32,
    pub batch_size: usize,
    #[serde(default)]
    pub max_unbounded_retries: Option<u32>,
}

impl EnrichParams {
    /// Load params from `explicit`, falling back to `./params.json`.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut candidates: Vec<PathBuf> = Vec::new();
        if let Some(p) = explicit {
            candidates.push(p.to_path_buf());
        }
        candidates.push(PathBuf::from("params.json"));

        let path = candidates
            .into_iter()
            .find(|c| c.exists())
            .ok_or_else(|| {
                S2agError::Config("params.json not found. Provide --params or place it in the working directory.".to_string())
            })?;

        let content = std::fs::read_to_string(&path)?;
        let params: EnrichParams = serde_json::from_str(&content)?;
        params.validate()?;
        debug!(path = %path.display(), "Loaded enrichment params");
        Ok(params)
    }

    pub fn validate(&self) -> Result<()> {
        if self.s2.batch_size == 0 || self.s2.batch_size > MAX_BATCH_SIZE {
            return Err(S2agError::Config(format!(
                "s2.batch_size must be between 1 and {}, got {}",
                MAX_BATCH_SIZE, self.s2.batch_size
            )));
        }
        if self.s2.retry_sleep_seconds < 0.0 || self.s2.timeout_seconds <= 0.0 {
            return Err(S2agError::Config(
                "s2.retry_sleep_seconds must be >= 0 and s2.timeout_seconds > 0".to_string(),
            ));
        }
        Ok(())
    }
}

impl S2Params {
    pub fn base(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    pub fn timeout(&self) -> Duration {
        secs(self.timeout_seconds)
    }

    /// 429/500 retry forever, 502/503 and transport errors up to `max_retries`.
    pub fn to_policy(&self) -> RetryPolicy {
        let sleep = Wait::Fixed(secs(self.retry_sleep_seconds));
        let bounded = Rule {
            wait: sleep,
            bound: Bound::Attempts(self.max_retries.max(1)),
        };
        RetryPolicy {
            rate_limited: Some(Rule {
                wait: sleep,
                bound: Bound::Unbounded,
            }),
            server_error: Some(Rule {
                wait: sleep,
                bound: Bound::Unbounded,
            }),
            gateway: vec![(502, bounded), (503, bounded)],
            network: bounded,
            unbounded_ceiling: self.max_unbounded_retries,
        }
    }
}

fn secs(value: f64) -> Duration {
    Duration::from_secs_f64(value.max(0.0))
}

/// Output directory tree for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    pub base: PathBuf,
    pub raw: PathBuf,
    pub intermediate: PathBuf,
    pub csv: PathBuf,
    pub logs: PathBuf,
}

/// Optional per-directory overrides from the command line.
#[derive(Debug, Clone, Default)]
pub struct DirOverrides {
    pub raw: Option<PathBuf>,
    pub intermediate: Option<PathBuf>,
    pub csv: Option<PathBuf>,
    pub logs: Option<PathBuf>,
}

impl OutputLayout {
    /// Default layout under `base`.
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self::resolve(base, &DirOverrides::default())
    }

    /// Relative overrides are joined onto `base`; absolute ones are kept.
    pub fn resolve(base: impl Into<PathBuf>, overrides: &DirOverrides) -> Self {
        let base = base.into();
        let pick = |over: &Option<PathBuf>, default: &str| match over {
            Some(p) if p.is_absolute() => p.clone(),
            Some(p) => base.join(p),
            None => base.join(default),
        };
        Self {
            raw: pick(&overrides.raw, DEFAULT_RAW_DIR),
            intermediate: pick(&overrides.intermediate, DEFAULT_INTERMEDIATE_DIR),
            csv: pick(&overrides.csv, DEFAULT_CSV_DIR),
            logs: pick(&overrides.logs, DEFAULT_LOG_DIR),
            base,
        }
    }

    /// Create every directory of the layout. Safe to call repeatedly.
    pub fn ensure(&self) -> Result<()> {
        for dir in [&self.raw, &self.intermediate, &self.csv, &self.logs] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    pub fn provenance_dir(&self) -> PathBuf {
        self.logs.join("provenance")
    }

    pub fn raw_s2_dir(&self) -> PathBuf {
        self.provenance_dir().join("raw_s2")
    }
}
