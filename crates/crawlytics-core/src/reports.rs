//! Daily reports over recommendation-engine documents.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageCount {
    pub lang: String,
    pub count: u64,
}

/// Documents per language for one taxonomy label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxonomyGroup {
    pub taxonomy: String,
    pub total: Vec<LanguageCount>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentCount {
    pub intent: String,
    pub total: Vec<LanguageCount>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainUrlCount {
    pub domain_name: Option<String>,
    pub urls_count: u64,
}

/// A parent taxonomy with per-language totals summed over its children.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxonomyCategory {
    pub taxonomy: String,
    pub total: Vec<LanguageCount>,
    pub sub_categories: Vec<TaxonomyGroup>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxonomyReport {
    pub date: NaiveDate,
    pub taxonomies: Vec<TaxonomyCategory>,
    pub languages: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentReport {
    pub date: NaiveDate,
    pub intents: Vec<IntentCount>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlsPerDomainReport {
    pub date: NaiveDate,
    pub domains: Vec<DomainUrlCount>,
}

#[derive(Default)]
struct CategoryTotals {
    total: BTreeMap<String, u64>,
    sub_categories: Vec<TaxonomyGroup>,
}

/// Fold `parent_child` labels into parent categories.
///
/// The label is split at its first `_`. A label without a child part only
/// adds to the parent's totals.
pub fn build_taxonomy_report(groups: &[TaxonomyGroup], date: NaiveDate) -> TaxonomyReport {
    let mut categories: BTreeMap<&str, CategoryTotals> = BTreeMap::new();
    let mut languages: BTreeSet<&str> = BTreeSet::new();

    for group in groups {
        let (parent, child) = group
            .taxonomy
            .split_once('_')
            .unwrap_or((group.taxonomy.as_str(), ""));
        let category = categories.entry(parent).or_default();

        for language in &group.total {
            *category.total.entry(language.lang.clone()).or_insert(0) += language.count;
            languages.insert(language.lang.as_str());
        }

        if !child.is_empty() {
            category.sub_categories.push(TaxonomyGroup {
                taxonomy: child.to_string(),
                total: group.total.clone(),
            });
        }
    }

    let taxonomies = categories
        .into_iter()
        .map(|(parent, mut totals)| {
            totals
                .sub_categories
                .sort_by(|a, b| a.taxonomy.cmp(&b.taxonomy));
            TaxonomyCategory {
                taxonomy: parent.to_string(),
                total: totals
                    .total
                    .into_iter()
                    .map(|(lang, count)| LanguageCount { lang, count })
                    .collect(),
                sub_categories: totals.sub_categories,
            }
        })
        .collect();

    TaxonomyReport {
        date,
        taxonomies,
        languages: languages
            .into_iter()
            .filter(|lang| !lang.trim().is_empty())
            .map(str::to_string)
            .collect(),
    }
}

pub fn build_intent_report(intents: Vec<IntentCount>, date: NaiveDate) -> IntentReport {
    IntentReport { date, intents }
}

pub fn build_urls_per_domain_report(
    domains: Vec<DomainUrlCount>,
    date: NaiveDate,
) -> UrlsPerDomainReport {
    UrlsPerDomainReport { date, domains }
}
