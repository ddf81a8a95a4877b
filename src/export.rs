//! Fixed-schema export of the enriched dataset.

use crate::error::Result;
use crate::table::Dataset;
use rust_xlsxwriter::{Format, Workbook};
use std::path::{Path, PathBuf};
use tracing::info;

/// Output schema, in column order.
pub const DATA_COLUMNS: &[&str] = &[
    "mode",
    "paperId",
    "title",
    "publication_date",
    "year",
    "publication_types",
    "fields_of_study",
    "influential_citation_count",
    "citation_count",
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
    "_prov_csv_row",
    "_mode_display",
];

/// Columns written as numbers when the cell parses as one
const NUMERIC_COLUMNS: &[&str] = &[
    "year",
    "influential_citation_count",
    "citation_count",
    "pages_total",
    "references_count",
    "_max_cited_year",
    "mean_author_hindex",
    "_prov_csv_row",
];

pub const SHEET_NAME: &str = "Sheet1";

/// Paths written by [`export_extracted`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportPaths {
    pub xlsx: PathBuf,
    pub csv: PathBuf,
}

/// Project `dataset` onto [`DATA_COLUMNS`] and write
/// `extracted_dataset.xlsx` and `extracted_dataset.csv` into `csv_dir`.
pub fn export_extracted(dataset: &Dataset, csv_dir: &Path) -> Result<ExportPaths> {
    std::fs::create_dir_all(csv_dir)?;
    let projected = dataset.project(DATA_COLUMNS);

    let paths = ExportPaths {
        xlsx: csv_dir.join("extracted_dataset.xlsx"),
        csv: csv_dir.join("extracted_dataset.csv"),
    };
    write_xlsx(&projected, &paths.xlsx)?;
    projected.write_csv(&paths.csv)?;
    info!(
        rows = projected.len(),
        xlsx = %paths.xlsx.display(),
        csv = %paths.csv.display(),
        "Exported dataset"
    );
    Ok(paths)
}

fn numeric_cell(column: &str, value: &str) -> Option<f64> {
    if !NUMERIC_COLUMNS.contains(&column) {
        return None;
    }
    value.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

fn write_xlsx(dataset: &Dataset, path: &Path) -> Result<()> {
    let mut workbook = Workbook::new();
    let header = Format::new().set_bold();
    let worksheet = workbook.add_worksheet();
    worksheet.set_name(SHEET_NAME)?;

    for (col, name) in dataset.columns().iter().enumerate() {
        worksheet.write_string_with_format(0, col as u16, name, &header)?;
    }
    for (r, row) in dataset.rows().iter().enumerate() {
        let xl_row = (r + 1) as u32;
        for (col, value) in row.iter().enumerate() {
            if value.is_empty() {
                continue;
            }
            let column = dataset.columns()[col].as_str();
            match numeric_cell(column, value) {
                Some(n) => worksheet.write_number(xl_row, col as u16, n)?,
                None => worksheet.write_string(xl_row, col as u16, value)?,
            };
        }
    }
    workbook.save(path)?;
    Ok(())
}
