//! Tabular data: the flat CSV projection of harvested records and the
//! string-typed [`Dataset`] that enrichment and export operate on.

use crate::error::{Result, S2agError};
use crate::s2::HarvestRecord;
use serde::Serialize;
use std::path::Path;
use tracing::{debug, info};

/// Separator used when a list is flattened into one cell
pub const LIST_SEP: &str = "; ";

/// Column order of `<csv>/<mode>.csv`
pub const HARVEST_COLUMNS: &[&str] = &[
    "mode",
    "paperId",
    "title",
    "publicationDate",
    "year",
    "publicationTypes",
    "fieldsOfStudy",
    "influentialCitationCount",
];

/// Input files picked up when the loader is pointed at a directory, in order
pub const MODE_FILES: &[&str] = &["broad.csv", "precise.csv"];

/// One row of the per-mode CSV.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HarvestRow {
    pub mode: String,
    #[serde(rename = "paperId")]
    pub paper_id: String,
    pub title: String,
    #[serde(rename = "publicationDate")]
    pub publication_date: String,
    pub year: String,
    #[serde(rename = "publicationTypes")]
    pub publication_types: String,
    #[serde(rename = "fieldsOfStudy")]
    pub fields_of_study: String,
    #[serde(rename = "influentialCitationCount")]
    pub influential_citation_count: String,
}

impl HarvestRow {
    pub fn project(mode: &str, record: &HarvestRecord) -> Self {
        let publication_date = record.publication_date.clone().unwrap_or_default();
        Self {
            mode: mode.to_uppercase(),
            paper_id: record.paper_id.clone().unwrap_or_default(),
            title: record.title.clone().unwrap_or_default(),
            year: leading_year(&publication_date),
            publication_date,
            publication_types: record
                .publication_types
                .as_ref()
                .map(|t| t.joined())
                .unwrap_or_default(),
            fields_of_study: record
                .fields_of_study
                .as_ref()
                .map(|t| t.joined())
                .unwrap_or_default(),
            influential_citation_count: record
                .influential_citation_count
                .map(|c| c.to_string())
                .unwrap_or_default(),
        }
    }
}

/// First four characters of a date when they are all digits.
fn leading_year(date: &str) -> String {
    match date.get(..4) {
        Some(y) if y.bytes().all(|b| b.is_ascii_digit()) => y.to_string(),
        _ => String::new(),
    }
}

/// Write the per-mode CSV. The header is written even when there are no rows.
pub fn write_harvest_csv(path: &Path, rows: &[HarvestRow]) -> Result<()> {
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)?;
    wtr.write_record(HARVEST_COLUMNS)?;
    for row in rows {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    debug!(path = %path.display(), rows = rows.len(), "Wrote harvest CSV");
    Ok(())
}

/// Trim, dedupe and sort (case-insensitively, ties by original) a list given
/// as a JSON array or a `;`, `,` or `|` separated string, then join with `"; "`.
pub fn deterministic_serialize_list(raw: &str) -> String {
    let s = raw.trim();
    let mut values: Vec<String> = if s.starts_with('[') && s.ends_with(']') {
        match serde_json::from_str::<Vec<serde_json::Value>>(s) {
            Ok(items) => items
                .into_iter()
                .filter(|v| !v.is_null())
                .map(|v| match v {
                    serde_json::Value::String(text) => text,
                    other => other.to_string(),
                })
                .collect(),
            Err(_) => vec![s.to_string()],
        }
    } else {
        s.split([';', ',', '|']).map(str::to_string).collect()
    };

    values = values
        .into_iter()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect();
    values.sort_by(|a, b| (a.to_lowercase(), a).cmp(&(b.to_lowercase(), b)));
    values.dedup();
    values.join(LIST_SEP)
}

/// Ordered string columns and rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dataset {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Dataset {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Append a row, padding or truncating it to the column count.
    pub fn push_row(&mut self, mut row: Vec<String>) {
        row.resize(self.columns.len(), String::new());
        self.rows.push(row);
    }

    pub fn get(&self, row: usize, column: &str) -> Option<&str> {
        let idx = self.column_index(column)?;
        self.rows.get(row).map(|r| r[idx].as_str())
    }

    /// Index of `name`, adding it filled with `fill` when missing.
    pub fn ensure_column(&mut self, name: &str, fill: &str) -> usize {
        if let Some(idx) = self.column_index(name) {
            return idx;
        }
        self.columns.push(name.to_string());
        for row in &mut self.rows {
            row.push(fill.to_string());
        }
        self.columns.len() - 1
    }

    /// Set one cell, adding the column (empty elsewhere) when missing.
    pub fn set(&mut self, row: usize, column: &str, value: impl Into<String>) {
        let idx = self.ensure_column(column, "");
        if let Some(r) = self.rows.get_mut(row) {
            r[idx] = value.into();
        }
    }

    /// Set `column` to `value` in every row.
    pub fn fill_column(&mut self, column: &str, value: &str) {
        let idx = self.ensure_column(column, value);
        for row in &mut self.rows {
            row[idx] = value.to_string();
        }
    }

    /// All values of a column, in row order.
    pub fn column_values(&self, column: &str) -> Option<impl Iterator<Item = &str>> {
        let idx = self.column_index(column)?;
        Some(self.rows.iter().map(move |r| r[idx].as_str()))
    }

    /// Append `other`, taking the union of columns (missing cells empty).
    pub fn append(&mut self, other: Dataset) {
        let mapping: Vec<usize> = other
            .columns
            .iter()
            .map(|c| self.ensure_column(c, ""))
            .collect();
        for row in other.rows {
            let mut out = vec![String::new(); self.columns.len()];
            for (value, &idx) in row.into_iter().zip(&mapping) {
                out[idx] = value;
            }
            self.rows.push(out);
        }
    }

    /// New dataset with exactly `columns`, in that order; missing ones empty.
    pub fn project(&self, columns: &[&str]) -> Dataset {
        let indices: Vec<Option<usize>> = columns.iter().map(|c| self.column_index(c)).collect();
        let rows = self
            .rows
            .iter()
            .map(|row| {
                indices
                    .iter()
                    .map(|idx| idx.map(|i| row[i].clone()).unwrap_or_default())
                    .collect()
            })
            .collect();
        Dataset {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows,
        }
    }

    /// Read a CSV file with a header row; every cell is kept as text.
    pub fn read_csv(path: &Path) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
        let columns: Vec<String> = rdr.headers()?.iter().map(str::to_string).collect();
        let mut dataset = Dataset::new(columns);
        for record in rdr.records() {
            let record = record?;
            dataset.push_row(record.iter().map(str::to_string).collect());
        }
        debug!(path = %path.display(), rows = dataset.len(), "Read CSV");
        Ok(dataset)
    }

    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let mut wtr = csv::WriterBuilder::new().has_headers(false).from_path(path)?;
        wtr.write_record(&self.columns)?;
        for row in &self.rows {
            wtr.write_record(row)?;
        }
        wtr.flush()?;
        Ok(())
    }
}

/// Load the harvest CSVs for enrichment.
///
/// `input` is either a directory holding `broad.csv` and/or `precise.csv`
/// (read in that order) or a single CSV file. Adds `_prov_csv_row`,
/// `_mode_display` and the canonical snake_case columns.
pub fn load_input(input: &Path) -> Result<Dataset> {
    let files: Vec<std::path::PathBuf> = if input.is_dir() {
        MODE_FILES
            .iter()
            .map(|name| input.join(name))
            .filter(|p| p.exists())
            .collect()
    } else if input.exists() {
        vec![input.to_path_buf()]
    } else {
        Vec::new()
    };

    if files.is_empty() {
        return Err(S2agError::Validation(format!(
            "No CSV inputs found in {}. Provide a directory containing broad.csv/precise.csv or a single CSV file.",
            input.display()
        )));
    }

    let mut dataset = Dataset::default();
    for file in &files {
        dataset.append(Dataset::read_csv(file)?);
    }
    canonicalize(&mut dataset);
    info!(files = files.len(), rows = dataset.len(), "Loaded input dataset");
    Ok(dataset)
}

fn canonicalize(dataset: &mut Dataset) {
    let prov = dataset.ensure_column("_prov_csv_row", "");
    for (i, row) in dataset.rows.iter_mut().enumerate() {
        row[prov] = (i + 1).to_string();
    }

    if dataset
        .columns
        .first()
        .is_some_and(|c| c.eq_ignore_ascii_case("mode"))
    {
        derive_column(dataset, 0, "_mode_display", str::to_string);
    }

    let renames: [(&str, &str, fn(&str) -> String); 4] = [
        ("publicationDate", "publication_date", str::to_string),
        ("publicationTypes", "publication_types", deterministic_serialize_list),
        ("fieldsOfStudy", "fields_of_study", deterministic_serialize_list),
        ("influentialCitationCount", "influential_citation_count", str::to_string),
    ];
    for (source, target, convert) in renames {
        if dataset.column_index(target).is_some() {
            continue;
        }
        if let Some(src) = dataset.column_index(source) {
            derive_column(dataset, src, target, convert);
        }
    }
}

fn derive_column(dataset: &mut Dataset, src: usize, target: &str, convert: impl Fn(&str) -> String) {
    let dst = dataset.ensure_column(target, "");
    for row in &mut dataset.rows {
        row[dst] = convert(&row[src]);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::s2::Tags;
    use tempfile::TempDir;

    #[test]
    fn test_project_record() {
        let record = HarvestRecord {
            paper_id: Some("abc".to_string()),
            title: Some("Slope, stability".to_string()),
            publication_date: Some("2019-03-04".to_string()),
            publication_types: Some(Tags::List(vec![Some("JournalArticle".to_string()), Some("Review".to_string())])),
            fields_of_study: Some(Tags::Text("Engineering".to_string())),
            influential_citation_count: Some(4),
        };
        let row = HarvestRow::project("broad", &record);
        assert_eq!(row.mode, "BROAD");
        assert_eq!(row.year, "2019");
        assert_eq!(row.publication_types, "JournalArticle; Review");
        assert_eq!(row.fields_of_study, "Engineering");
        assert_eq!(row.influential_citation_count, "4");

        let empty = HarvestRow::project("precise", &HarvestRecord::default());
        assert_eq!(empty.year, "");
        assert_eq!(empty.influential_citation_count, "");
    }

    #[test]
    fn test_write_harvest_csv_header_only() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("broad.csv");
        write_harvest_csv(&path, &[]).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            content.trim_end(),
            "mode,paperId,title,publicationDate,year,publicationTypes,fieldsOfStudy,influentialCitationCount"
        );
    }

    #[test]
    fn test_deterministic_serialize_list() {
        assert_eq!(deterministic_serialize_list("b; A, a | b"), "A; a; b");
        assert_eq!(deterministic_serialize_list(r#"["Physics", "biology", "Physics"]"#), "biology; Physics");
        assert_eq!(deterministic_serialize_list("[not json]"), "[not json]");
        assert_eq!(deterministic_serialize_list("   "), "");
    }

    #[test]
    fn test_dataset_append_takes_column_union() {
        let mut a = Dataset::new(vec!["x".into(), "y".into()]);
        a.push_row(vec!["1".into(), "2".into()]);
        let mut b = Dataset::new(vec!["y".into(), "z".into()]);
        b.push_row(vec!["3".into(), "4".into()]);
        a.append(b);
        assert_eq!(a.columns(), ["x", "y", "z"]);
        assert_eq!(a.rows()[0], ["1", "2", ""]);
        assert_eq!(a.rows()[1], ["", "3", "4"]);

        let projected = a.project(&["z", "missing", "x"]);
        assert_eq!(projected.rows()[0], ["", "", "1"]);
    }

    #[test]
    fn test_load_input_directory() {
        let tmp = TempDir::new().unwrap();
        let broad = "mode,paperId,publicationDate,publicationTypes,fieldsOfStudy,influentialCitationCount\n\
                     BROAD,p1,2020-01-01,\"Review; JournalArticle\",Engineering,3\n";
        let precise = "mode,paperId,publicationDate,publicationTypes,fieldsOfStudy,influentialCitationCount\n\
                       PRECISE,p2,2018,,\"Geology, Engineering\",\n";
        std::fs::write(tmp.path().join("broad.csv"), broad).unwrap();
        std::fs::write(tmp.path().join("precise.csv"), precise).unwrap();

        let ds = load_input(tmp.path()).unwrap();
        assert_eq!(ds.len(), 2);
        assert_eq!(ds.get(0, "_prov_csv_row"), Some("1"));
        assert_eq!(ds.get(1, "_prov_csv_row"), Some("2"));
        assert_eq!(ds.get(1, "_mode_display"), Some("PRECISE"));
        assert_eq!(ds.get(0, "publication_types"), Some("JournalArticle; Review"));
        assert_eq!(ds.get(1, "fields_of_study"), Some("Engineering; Geology"));
        assert_eq!(ds.get(0, "influential_citation_count"), Some("3"));
        assert_eq!(ds.get(1, "publication_date"), Some("2018"));
    }

    #[test]
    fn test_load_input_missing() {
        let tmp = TempDir::new().unwrap();
        assert!(matches!(load_input(tmp.path()), Err(S2agError::Validation(_))));
        assert!(load_input(&tmp.path().join("nope.csv")).is_err());
    }
}
