//! Aggregation pipelines evaluated over the documents of one collection.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::bid::{summarize_bid_rows, BidRow};
use crate::reports::{DomainUrlCount, IntentCount, LanguageCount, TaxonomyGroup};

/// A stored document: a JSON object.
pub type Document = Map<String, Value>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("document {index} has an unexpected shape for {pipeline}: {source}")]
    Shape {
        pipeline: &'static str,
        index: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode {pipeline} output: {source}")]
    Encode {
        pipeline: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pipeline {
    /// Per-domain bid summaries over rows ingested on or after `since`.
    BidSummary { since: NaiveDate, top_geos: usize },
    /// Documents per (taxonomy label, language).
    TaxonomyCount,
    /// Documents per (intent, language).
    IntentCount,
    /// Documents per domain.
    UrlsPerDomain,
}

impl Pipeline {
    pub fn name(&self) -> &'static str {
        match self {
            Pipeline::BidSummary { .. } => "bid-summary",
            Pipeline::TaxonomyCount => "taxonomy-count",
            Pipeline::IntentCount => "intent-count",
            Pipeline::UrlsPerDomain => "urls-per-domain",
        }
    }

    pub fn evaluate(&self, documents: &[Document]) -> Result<Vec<Document>, PipelineError> {
        match self {
            Pipeline::BidSummary { since, top_geos } => {
                let rows = documents
                    .iter()
                    .enumerate()
                    .map(|(index, document)| {
                        serde_json::from_value::<BidRow>(Value::Object(document.clone())).map_err(
                            |source| PipelineError::Shape {
                                pipeline: self.name(),
                                index,
                                source,
                            },
                        )
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                self.encode(summarize_bid_rows(&rows, *since, *top_geos))
            }
            Pipeline::TaxonomyCount => {
                let counts = count_by_language(documents, "taxonomy", |item| {
                    item.get("label").and_then(Value::as_str)
                });
                self.encode(
                    counts
                        .into_iter()
                        .map(|(taxonomy, total)| TaxonomyGroup { taxonomy, total })
                        .collect(),
                )
            }
            Pipeline::IntentCount => {
                let counts = count_by_language(documents, "intent", Value::as_str);
                self.encode(
                    counts
                        .into_iter()
                        .map(|(intent, total)| IntentCount { intent, total })
                        .collect(),
                )
            }
            Pipeline::UrlsPerDomain => {
                let mut counts: BTreeMap<Option<String>, u64> = BTreeMap::new();
                for document in documents {
                    *counts.entry(scalar(document.get("domain"))).or_insert(0) += 1;
                }
                self.encode(
                    counts
                        .into_iter()
                        .map(|(domain_name, urls_count)| DomainUrlCount {
                            domain_name,
                            urls_count,
                        })
                        .collect(),
                )
            }
        }
    }

    fn encode<T: Serialize>(&self, rows: Vec<T>) -> Result<Vec<Document>, PipelineError> {
        rows.iter()
            .map(|row| {
                to_document(row).map_err(|source| PipelineError::Encode {
                    pipeline: self.name(),
                    source,
                })
            })
            .collect()
    }
}

/// Serialize a value that must encode as a JSON object.
pub fn to_document<T: Serialize>(value: &T) -> Result<Document, serde_json::Error> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(<serde_json::Error as serde::ser::Error>::custom(format!(
            "expected a JSON object, got {}",
            other
        ))),
    }
}

fn scalar(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Elements of an array field; a scalar counts as a single element.
fn unwind<'a>(document: &'a Document, field: &str) -> Vec<&'a Value> {
    match document.get(field) {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items.iter().collect(),
        Some(other) => vec![other],
    }
}

/// Count documents per (label, language), labels and languages sorted.
/// A missing language counts as `""`; elements without a label are ignored.
fn count_by_language<F>(
    documents: &[Document],
    field: &str,
    label: F,
) -> BTreeMap<String, Vec<LanguageCount>>
where
    F: for<'v> Fn(&'v Value) -> Option<&'v str>,
{
    let mut counts: BTreeMap<String, BTreeMap<String, u64>> = BTreeMap::new();
    for document in documents {
        let lang = scalar(document.get("lang")).unwrap_or_default();
        for item in unwind(document, field) {
            let Some(label) = label(item) else {
                continue;
            };
            *counts
                .entry(label.to_string())
                .or_default()
                .entry(lang.clone())
                .or_insert(0) += 1;
        }
    }

    counts
        .into_iter()
        .map(|(label, langs)| {
            let total = langs
                .into_iter()
                .map(|(lang, count)| LanguageCount { lang, count })
                .collect();
            (label, total)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn docs(values: Vec<Value>) -> Vec<Document> {
        values
            .into_iter()
            .map(|value| value.as_object().cloned().unwrap())
            .collect()
    }

    #[test]
    fn test_taxonomy_count() {
        let documents = docs(vec![
            json!({"lang": "en", "taxonomy": [{"label": "travel_hotels"}, {"label": "sports"}]}),
            json!({"lang": "es", "taxonomy": [{"label": "travel_hotels"}]}),
            json!({"taxonomy": [{"label": "travel_hotels"}, {"score": 1}]}),
            json!({"lang": "en"}),
        ]);
        let output = Pipeline::TaxonomyCount.evaluate(&documents).unwrap();
        assert_eq!(
            Value::Array(output.into_iter().map(Value::Object).collect()),
            json!([
                {"taxonomy": "sports", "total": [{"lang": "en", "count": 1}]},
                {"taxonomy": "travel_hotels", "total": [
                    {"lang": "", "count": 1},
                    {"lang": "en", "count": 1},
                    {"lang": "es", "count": 1}
                ]}
            ])
        );
    }

    #[test]
    fn test_intent_count() {
        let documents = docs(vec![
            json!({"lang": "en", "intent": ["buy", "compare"]}),
            json!({"lang": "en", "intent": "buy"}),
        ]);
        let output = Pipeline::IntentCount.evaluate(&documents).unwrap();
        assert_eq!(output.len(), 2);
        assert_eq!(output[0]["intent"], json!("buy"));
        assert_eq!(output[0]["total"], json!([{"lang": "en", "count": 2}]));
    }

    #[test]
    fn test_urls_per_domain() {
        let documents = docs(vec![
            json!({"domain": "a.com"}),
            json!({"domain": "a.com"}),
            json!({"url": "x"}),
        ]);
        let output = Pipeline::UrlsPerDomain.evaluate(&documents).unwrap();
        assert_eq!(output[0]["domain_name"], Value::Null);
        assert_eq!(output[0]["urls_count"], json!(1));
        assert_eq!(output[1]["domain_name"], json!("a.com"));
        assert_eq!(output[1]["urls_count"], json!(2));
    }

    #[test]
    fn test_bid_summary_rejects_foreign_documents() {
        let documents = docs(vec![json!({"domain": 5})]);
        let pipeline = Pipeline::BidSummary {
            since: NaiveDate::from_ymd_opt(2021, 1, 1).unwrap(),
            top_geos: 5,
        };
        assert!(matches!(
            pipeline.evaluate(&documents),
            Err(PipelineError::Shape { index: 0, .. })
        ));
    }
}
