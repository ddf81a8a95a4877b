//! Derived bibliographic fields: DOI normalization, page counts, the latest
//! cited year and author h-index aggregates.
//!
//! All functions here are pure; [`PaperEnrichment`] collects their results
//! for one paper and writes them into a dataset row.

use crate::s2::PaperDetails;
use crate::table::{Dataset, LIST_SEP};
use regex::Regex;
use serde_json::ser::Formatter;
use serde_json::Value;
use std::collections::HashMap;
use std::io;
use std::sync::LazyLock;

/// Columns the enrichment step guarantees on a successful run.
pub const ENRICHED_COLUMNS: &[&str] = &[
    "abstract",
    "external_ids",
    "doi",
    "is_open_access",
    "open_access_pdf_url",
    "journal_pages_range",
    "pages_total",
    "references_pages",
    "references_count",
    "_max_cited_year",
    "authors_hindex_list",
    "mean_author_hindex",
    "citation_count",
];

static DOI_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^https?://(dx\.)?doi\.org/").expect("DOI prefix regex"));

static DOI_IN_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)https?://(?:dx\.)?doi\.org/(\S+)").expect("DOI link regex"));

static PAGE_RANGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(\d+)\s*-\s*(\d+)\s*$").expect("page range regex"));

/// Canonical DOI: resolver prefix stripped, trimmed, slashes trimmed,
/// lower-cased. Returns an empty string when the result contains a space or
/// no `/`.
pub fn normalize_doi(raw: &str) -> String {
    let s = raw.trim();
    if s.is_empty() {
        return String::new();
    }
    let s = DOI_PREFIX.replace(s, "");
    let s = s.trim().trim_matches('/').to_lowercase();
    if s.contains(' ') || !s.contains('/') {
        return String::new();
    }
    s
}

/// DOI embedded in a `doi.org` link, normalized.
pub fn doi_from_pdf_url(url: &str) -> Option<String> {
    let caps = DOI_IN_URL.captures(url)?;
    let doi = normalize_doi(caps.get(1)?.as_str());
    (!doi.is_empty()).then_some(doi)
}

/// Page count of a `start-end` range, inclusive. `None` when the range does
/// not parse, runs backwards or overflows.
pub fn pages_total(range: &str) -> Option<u64> {
    let caps = PAGE_RANGE.captures(range)?;
    let start: u64 = caps[1].parse().ok()?;
    let end: u64 = caps[2].parse().ok()?;
    end.checked_sub(start)?.checked_add(1)
}

/// Citing year from a dataset cell; accepts `2013` and `2013.0`.
pub fn parse_citing_year(cell: &str) -> Option<i32> {
    let cell = cell.trim();
    if cell.is_empty() {
        return None;
    }
    if let Ok(y) = cell.parse::<i32>() {
        return Some(y);
    }
    let f: f64 = cell.parse().ok()?;
    if f.is_finite() && f.abs() < f64::from(i32::MAX) {
        Some(f.trunc() as i32)
    } else {
        None
    }
}

/// Latest reference year that does not exceed the citing year.
///
/// With no citing year the latest reference year is used. When every
/// reference is newer than the citing paper the citing year itself is
/// returned. No references gives `None`.
pub fn max_cited_year(reference_years: &[i32], citing_year: Option<i32>) -> Option<i32> {
    let latest = reference_years.iter().copied().max()?;
    match citing_year {
        Some(citing) => Some(
            reference_years
                .iter()
                .copied()
                .filter(|y| *y <= citing)
                .max()
                .unwrap_or(citing),
        ),
        None => Some(latest),
    }
}

/// Author h-index list and mean for one paper.
#[derive(Debug, Clone, PartialEq)]
pub struct HIndexSummary {
    pub values: Vec<i64>,
}

impl HIndexSummary {
    pub fn from_values(values: Vec<i64>) -> Option<Self> {
        (!values.is_empty()).then_some(Self { values })
    }

    /// `"12; 7; 30"`, in author order.
    pub fn list(&self) -> String {
        self.values
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(LIST_SEP)
    }

    pub fn mean(&self) -> f64 {
        self.values.iter().sum::<i64>() as f64 / self.values.len() as f64
    }
}

/// Writes `", "` and `": "` between items, the layout of the external-ids cell.
struct SpacedFormatter;

impl Formatter for SpacedFormatter {
    fn begin_array_value<W: ?Sized + io::Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W: ?Sized + io::Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        writer.write_all(b": ")
    }
}

fn sort_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            Value::Object(entries.into_iter().map(|(k, v)| (k.clone(), sort_keys(v))).collect())
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}

/// JSON text with keys sorted at every level, so equal values always
/// serialize to the same cell.
pub fn deterministic_json(value: &Value) -> String {
    let mut out = Vec::new();
    let mut ser = serde_json::Serializer::with_formatter(&mut out, SpacedFormatter);
    match serde::Serialize::serialize(&sort_keys(value), &mut ser) {
        Ok(()) => String::from_utf8(out).unwrap_or_default(),
        Err(_) => String::new(),
    }
}

/// Everything enrichment learned about one paper. Unset fields leave the
/// row untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PaperEnrichment {
    pub abstract_text: Option<String>,
    pub external_ids: Option<String>,
    pub external_doi: Option<String>,
    pub is_open_access: Option<bool>,
    pub open_access_pdf_url: Option<String>,
    pub pdf_doi: Option<String>,
    pub journal_pages_range: Option<String>,
    pub pages_total: Option<u64>,
    pub references_count: Option<i64>,
    pub citation_count: Option<i64>,
    pub max_cited_year: Option<i32>,
    pub hindex: Option<HIndexSummary>,
}

impl PaperEnrichment {
    /// Combine the paper-batch entry, the author h-index table and the
    /// references-derived year.
    pub fn from_details(
        paper: &PaperDetails,
        h_index_by_author: &HashMap<String, i64>,
        max_cited_year: Option<i32>,
    ) -> Self {
        let external_ids = paper
            .external_ids
            .as_ref()
            .filter(|ids| !ids.is_empty());
        let external_doi = external_ids
            .and(paper.external_doi())
            .map(normalize_doi)
            .filter(|d| !d.is_empty());
        let pdf_url = paper.pdf_url();
        let journal_pages_range = paper.journal_pages().map(str::to_string);
        let hindex = HIndexSummary::from_values(
            paper
                .author_ids()
                .filter_map(|id| h_index_by_author.get(id).copied())
                .collect(),
        );

        Self {
            abstract_text: paper.abstract_text.clone().filter(|a| !a.is_empty()),
            external_ids: external_ids.map(|ids| deterministic_json(&Value::Object(ids.clone()))),
            external_doi,
            is_open_access: paper.is_open_access,
            open_access_pdf_url: pdf_url.map(str::to_string),
            pdf_doi: pdf_url.and_then(doi_from_pdf_url),
            pages_total: journal_pages_range.as_deref().and_then(pages_total),
            journal_pages_range,
            references_count: paper.reference_count,
            citation_count: paper.citation_count,
            max_cited_year,
            hindex,
        }
    }

    /// Write the set fields into `row`.
    ///
    /// DOI preference: a DOI already in the row wins, then `externalIds.DOI`,
    /// then a DOI parsed from the open-access PDF link.
    pub fn apply_to(&self, dataset: &mut Dataset, row: usize) {
        if let Some(v) = &self.abstract_text {
            dataset.set(row, "abstract", v.as_str());
        }
        if let Some(v) = &self.external_ids {
            dataset.set(row, "external_ids", v.as_str());
        }
        let has_doi = dataset
            .get(row, "doi")
            .is_some_and(|d| !d.trim().is_empty());
        if !has_doi {
            if let Some(doi) = self.external_doi.as_ref().or(self.pdf_doi.as_ref()) {
                dataset.set(row, "doi", doi.as_str());
            }
        }
        if let Some(v) = self.is_open_access {
            dataset.set(row, "is_open_access", if v { "TRUE" } else { "FALSE" });
        }
        if let Some(v) = &self.open_access_pdf_url {
            dataset.set(row, "open_access_pdf_url", v.as_str());
        }
        if let Some(v) = &self.journal_pages_range {
            dataset.set(row, "journal_pages_range", v.as_str());
        }
        if let Some(v) = self.pages_total {
            dataset.set(row, "pages_total", v.to_string());
        }
        if let Some(v) = self.references_count {
            dataset.set(row, "references_count", v.to_string());
        }
        if let Some(v) = self.citation_count {
            dataset.set(row, "citation_count", v.to_string());
        }
        if let Some(h) = &self.hindex {
            dataset.set(row, "authors_hindex_list", h.list());
            dataset.set(row, "mean_author_hindex", h.mean().to_string());
        }
        if let Some(v) = self.max_cited_year {
            dataset.set(row, "_max_cited_year", v.to_string());
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize_doi() {
        assert_eq!(normalize_doi("https://doi.org/10.1234/ABC"), "10.1234/abc");
        assert_eq!(normalize_doi("HTTP://DX.DOI.ORG/10.1/x/"), "10.1/x");
        assert_eq!(normalize_doi("  10.5555/Foo  "), "10.5555/foo");
        assert_eq!(normalize_doi("not a doi"), "");
        assert_eq!(normalize_doi("nodoi"), "");
        assert_eq!(normalize_doi(""), "");
    }

    #[test]
    fn test_doi_from_pdf_url() {
        assert_eq!(
            doi_from_pdf_url("https://dx.doi.org/10.1016/J.ENGGEO.2020.1").as_deref(),
            Some("10.1016/j.enggeo.2020.1")
        );
        assert_eq!(doi_from_pdf_url("https://arxiv.org/pdf/1234.pdf"), None);
    }

    #[test]
    fn test_pages_total() {
        assert_eq!(pages_total("100-110"), Some(11));
        assert_eq!(pages_total(" 5 - 5 "), Some(1));
        assert_eq!(pages_total("110-100"), None);
        assert_eq!(pages_total("e1234"), None);
        assert_eq!(pages_total("0-18446744073709551615"), None);
        assert_eq!(pages_total("1-18446744073709551615"), Some(u64::MAX));
        assert_eq!(pages_total("1-99999999999999999999"), None);
    }

    #[test]
    fn test_max_cited_year_never_exceeds_citing_year() {
        assert_eq!(max_cited_year(&[1999, 2005, 2021], Some(2010)), Some(2005));
        assert_eq!(max_cited_year(&[2015, 2016], Some(2010)), Some(2010));
        assert_eq!(max_cited_year(&[1999, 2005], None), Some(2005));
        assert_eq!(max_cited_year(&[], Some(2010)), None);

        for citing in 1990..2030 {
            let got = max_cited_year(&[1985, 2001, 2019, 2040], Some(citing)).unwrap();
            assert!(got <= citing);
        }
    }

    #[test]
    fn test_parse_citing_year() {
        assert_eq!(parse_citing_year("2013"), Some(2013));
        assert_eq!(parse_citing_year("2013.0"), Some(2013));
        assert_eq!(parse_citing_year(""), None);
        assert_eq!(parse_citing_year("n/a"), None);
    }

    #[test]
    fn test_hindex_summary() {
        let h = HIndexSummary::from_values(vec![12, 13]).unwrap();
        assert_eq!(h.list(), "12; 13");
        assert_eq!(h.mean().to_string(), "12.5");
        assert_eq!(HIndexSummary::from_values(vec![12]).unwrap().mean().to_string(), "12");
        assert!(HIndexSummary::from_values(vec![]).is_none());
    }

    #[test]
    fn test_deterministic_json_sorts_keys() {
        let value = json!({"MAG": "1", "DOI": "10.1/x", "CorpusId": 7});
        assert_eq!(
            deterministic_json(&value),
            r#"{"CorpusId": 7, "DOI": "10.1/x", "MAG": "1"}"#
        );
    }

    fn details(value: Value) -> PaperDetails {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_enrichment_doi_preference() {
        let mut ds = Dataset::new(vec!["paperId".into(), "doi".into()]);
        ds.push_row(vec!["p1".into(), "10.9/kept".into()]);
        ds.push_row(vec!["p2".into(), "".into()]);
        ds.push_row(vec!["p3".into(), "".into()]);

        let with_ext = details(json!({
            "externalIds": {"DOI": "https://doi.org/10.1/EXT"},
            "openAccessPdf": {"url": "https://doi.org/10.2/pdf"}
        }));
        let pdf_only = details(json!({"openAccessPdf": {"url": "https://doi.org/10.2/PDF"}}));
        let none = HashMap::new();

        PaperEnrichment::from_details(&with_ext, &none, None).apply_to(&mut ds, 0);
        PaperEnrichment::from_details(&with_ext, &none, None).apply_to(&mut ds, 1);
        PaperEnrichment::from_details(&pdf_only, &none, None).apply_to(&mut ds, 2);

        assert_eq!(ds.get(0, "doi"), Some("10.9/kept"));
        assert_eq!(ds.get(1, "doi"), Some("10.1/ext"));
        assert_eq!(ds.get(2, "doi"), Some("10.2/pdf"));
        assert_eq!(ds.get(2, "open_access_pdf_url"), Some("https://doi.org/10.2/PDF"));
    }

    #[test]
    fn test_enrichment_fields() {
        let paper = details(json!({
            "paperId": "p1",
            "abstract": "About slopes.",
            "isOpenAccess": false,
            "journal": {"pages": "110-100"},
            "referenceCount": 40,
            "citationCount": 9,
            "authors": [{"authorId": "a1"}, {"authorId": "a2"}, {"authorId": "unknown"}]
        }));
        let h: HashMap<String, i64> = [("a1".to_string(), 10), ("a2".to_string(), 15)].into();
        let enrichment = PaperEnrichment::from_details(&paper, &h, Some(2008));
        assert_eq!(enrichment.pages_total, None);

        let mut ds = Dataset::new(vec!["paperId".into()]);
        ds.push_row(vec!["p1".into()]);
        enrichment.apply_to(&mut ds, 0);

        assert_eq!(ds.get(0, "abstract"), Some("About slopes."));
        assert_eq!(ds.get(0, "is_open_access"), Some("FALSE"));
        assert_eq!(ds.get(0, "journal_pages_range"), Some("110-100"));
        assert_eq!(ds.get(0, "pages_total"), None);
        assert_eq!(ds.get(0, "references_count"), Some("40"));
        assert_eq!(ds.get(0, "authors_hindex_list"), Some("10; 15"));
        assert_eq!(ds.get(0, "mean_author_hindex"), Some("12.5"));
        assert_eq!(ds.get(0, "_max_cited_year"), Some("2008"));
        assert_eq!(ds.get(0, "external_ids"), None);
    }
}
