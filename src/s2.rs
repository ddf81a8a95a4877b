//! Wire records returned by the Semantic Scholar Academic Graph API.
//!
//! Every field is optional on the wire; decoding a body that does not have
//! the documented shape yields [`S2agError::MalformedResponse`] rather than
//! silently dropping data.

use crate::error::{Result, S2agError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One page of `/paper/search/bulk`.
#[derive(Debug, Clone, Deserialize)]
pub struct BulkPage {
    pub data: Vec<Value>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub total: Option<u64>,
}

impl BulkPage {
    pub fn parse(body: &[u8]) -> Result<Self> {
        serde_json::from_slice(body)
            .map_err(|e| S2agError::MalformedResponse(format!("bulk page: {}", e)))
    }

    /// Continuation token; an empty string means the walk is over.
    pub fn next_token(&self) -> Option<&str> {
        self.token.as_deref().filter(|t| !t.is_empty())
    }
}

/// `publicationTypes` / `fieldsOfStudy` come back as a list or, in older
/// dumps, a single string.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum Tags {
    List(Vec<Option<String>>),
    Text(String),
}

impl Tags {
    /// Cell form: list items joined by `"; "`, text passed through.
    pub fn joined(&self) -> String {
        match self {
            Tags::List(items) => items
                .iter()
                .flatten()
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join("; "),
            Tags::Text(s) => s.clone(),
        }
    }
}

/// Fields of a bulk search record that the CSV projection reads.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HarvestRecord {
    #[serde(rename = "paperId")]
    pub paper_id: Option<String>,
    pub title: Option<String>,
    #[serde(rename = "publicationDate")]
    pub publication_date: Option<String>,
    #[serde(rename = "publicationTypes")]
    pub publication_types: Option<Tags>,
    #[serde(rename = "fieldsOfStudy")]
    pub fields_of_study: Option<Tags>,
    #[serde(rename = "influentialCitationCount")]
    pub influential_citation_count: Option<i64>,
}

impl HarvestRecord {
    pub fn from_value(value: &Value) -> Result<Self> {
        Self::deserialize(value)
            .map_err(|e| S2agError::MalformedResponse(format!("search record: {}", e)))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OpenAccessPdf {
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Journal {
    pub pages: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthorRef {
    #[serde(rename = "authorId")]
    pub author_id: Option<String>,
}

/// Author entry on a paper; some field selections nest the id under `author`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaperAuthor {
    #[serde(rename = "authorId")]
    pub author_id: Option<String>,
    pub author: Option<AuthorRef>,
}

impl PaperAuthor {
    pub fn id(&self) -> Option<&str> {
        self.author_id
            .as_deref()
            .or_else(|| self.author.as_ref().and_then(|a| a.author_id.as_deref()))
            .filter(|id| !id.is_empty())
    }
}

/// Entry of a `/paper/batch` response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaperDetails {
    #[serde(rename = "paperId")]
    pub paper_id: Option<String>,
    #[serde(rename = "abstract")]
    pub abstract_text: Option<String>,
    #[serde(rename = "externalIds")]
    pub external_ids: Option<serde_json::Map<String, Value>>,
    #[serde(rename = "isOpenAccess")]
    pub is_open_access: Option<bool>,
    #[serde(rename = "openAccessPdf")]
    pub open_access_pdf: Option<OpenAccessPdf>,
    pub journal: Option<Journal>,
    #[serde(rename = "referenceCount")]
    pub reference_count: Option<i64>,
    #[serde(rename = "citationCount")]
    pub citation_count: Option<i64>,
    #[serde(default)]
    pub authors: Option<Vec<PaperAuthor>>,
}

impl PaperDetails {
    pub fn pdf_url(&self) -> Option<&str> {
        self.open_access_pdf
            .as_ref()
            .and_then(|p| p.url.as_deref())
            .filter(|u| !u.is_empty())
    }

    pub fn journal_pages(&self) -> Option<&str> {
        self.journal.as_ref().and_then(|j| j.pages.as_deref())
    }

    /// `externalIds.DOI`, or the lower-case key some records use.
    pub fn external_doi(&self) -> Option<&str> {
        let ids = self.external_ids.as_ref()?;
        ids.get("DOI")
            .or_else(|| ids.get("doi"))
            .and_then(Value::as_str)
    }

    pub fn author_ids(&self) -> impl Iterator<Item = &str> {
        self.authors.iter().flatten().filter_map(PaperAuthor::id)
    }
}

/// Entry of an `/author/batch` response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthorDetails {
    #[serde(rename = "authorId")]
    pub author_id: Option<String>,
    #[serde(rename = "hIndex")]
    pub h_index: Option<Value>,
}

impl AuthorDetails {
    /// h-index when the API reported an integer.
    pub fn h_index(&self) -> Option<i64> {
        self.h_index.as_ref()?.as_i64()
    }
}

/// Decode a batch response: a JSON array with one entry per requested id,
/// `null` where the id is unknown. Returns the raw non-null entries together
/// with their typed form.
pub fn parse_batch<T>(body: &[u8]) -> Result<Vec<(Value, T)>>
where
    T: for<'de> Deserialize<'de>,
{
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| S2agError::MalformedResponse(format!("batch body: {}", e)))?;
    let Value::Array(entries) = value else {
        return Err(S2agError::MalformedResponse(
            "batch body is not a JSON array".to_string(),
        ));
    };
    entries
        .into_iter()
        .filter(|entry| !entry.is_null())
        .map(|entry| {
            if !entry.is_object() {
                return Err(S2agError::MalformedResponse(format!(
                    "batch entry is not an object: {}",
                    entry
                )));
            }
            let typed = T::deserialize(&entry)
                .map_err(|e| S2agError::MalformedResponse(format!("batch entry: {}", e)))?;
            Ok((entry, typed))
        })
        .collect()
}

/// Integer years of the cited papers in a references response.
///
/// Items live under `data` (current API) or `references`; each item's year is
/// `citedPaper.year`, else its own `year`. Non-integer years are ignored.
pub fn reference_years(body: &Value) -> Vec<i32> {
    let items = body
        .get("data")
        .and_then(Value::as_array)
        .filter(|items| !items.is_empty())
        .or_else(|| body.get("references").and_then(Value::as_array));
    let Some(items) = items else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| {
            let year = item
                .get("citedPaper")
                .and_then(|p| p.get("year"))
                .filter(|y| !y.is_null())
                .or_else(|| item.get("year"))?;
            year.as_i64().and_then(|y| i32::try_from(y).ok())
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_bulk_page_empty_token_is_absent() {
        let page = BulkPage::parse(br#"{"total": 3, "token": "", "data": [{}]}"#).unwrap();
        assert_eq!(page.next_token(), None);
        assert_eq!(page.total, Some(3));

        let page = BulkPage::parse(br#"{"token": "abc", "data": []}"#).unwrap();
        assert_eq!(page.next_token(), Some("abc"));
    }

    #[test]
    fn test_bulk_page_without_data_is_malformed() {
        let err = BulkPage::parse(br#"{"token": "abc"}"#).unwrap_err();
        assert!(matches!(err, S2agError::MalformedResponse(_)));
    }

    #[test]
    fn test_tags_join() {
        let rec = HarvestRecord::from_value(&json!({
            "paperId": "p1",
            "publicationTypes": ["JournalArticle", null, "Review"],
            "fieldsOfStudy": "Engineering"
        }))
        .unwrap();
        assert_eq!(rec.publication_types.unwrap().joined(), "JournalArticle; Review");
        assert_eq!(rec.fields_of_study.unwrap().joined(), "Engineering");
        assert!(rec.influential_citation_count.is_none());
    }

    #[test]
    fn test_parse_batch_skips_nulls_and_rejects_non_arrays() {
        let parsed: Vec<(Value, PaperDetails)> = parse_batch(
            br#"[{"paperId":"a","authors":[{"authorId":"1"},{"author":{"authorId":"2"}},{}]}, null]"#,
        )
        .unwrap();
        assert_eq!(parsed.len(), 1);
        let ids: Vec<&str> = parsed[0].1.author_ids().collect();
        assert_eq!(ids, ["1", "2"]);

        let err = parse_batch::<PaperDetails>(br#"{"error":"bad"}"#).unwrap_err();
        assert!(matches!(err, S2agError::MalformedResponse(_)));
        let err = parse_batch::<PaperDetails>(br#"[1, 2]"#).unwrap_err();
        assert!(matches!(err, S2agError::MalformedResponse(_)));
    }

    #[test]
    fn test_external_doi_and_h_index() {
        let paper: PaperDetails =
            serde_json::from_value(json!({"externalIds": {"doi": "10.1/X"}})).unwrap();
        assert_eq!(paper.external_doi(), Some("10.1/X"));

        let author: AuthorDetails = serde_json::from_value(json!({"authorId": "9", "hIndex": 14})).unwrap();
        assert_eq!(author.h_index(), Some(14));
        let author: AuthorDetails = serde_json::from_value(json!({"authorId": "9", "hIndex": "n/a"})).unwrap();
        assert_eq!(author.h_index(), None);
        let author: AuthorDetails = serde_json::from_value(json!({"authorId": "9", "hIndex": 3.5})).unwrap();
        assert_eq!(author.h_index(), None);
    }

    #[test]
    fn test_reference_years() {
        let body = json!({"data": [
            {"citedPaper": {"year": 2010}},
            {"citedPaper": {"year": null}, "year": 2001},
            {"citedPaper": {"year": "2012"}},
            {"year": 1999.5}
        ]});
        assert_eq!(reference_years(&body), vec![2010, 2001]);
        assert_eq!(reference_years(&json!({"references": [{"year": 2003}]})), vec![2003]);
        assert!(reference_years(&json!({"data": null})).is_empty());
    }
}
