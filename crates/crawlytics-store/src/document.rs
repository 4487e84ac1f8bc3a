//! Documents and keyed upserts.
//!
//! An [`Upsert`] finds the document whose fields equal its filter and applies
//! its operators, or inserts a new document built from the filter and the
//! operators when nothing matches. Operator keys may be dotted paths into
//! nested objects (`page_load_speed_count.fast`).

use serde_json::{Map, Number, Value};

pub use crawlytics_core::{to_document, Document};

/// Counts reported back by a write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteAck {
    pub inserted: u64,
    pub updated: u64,
}

impl WriteAck {
    pub fn inserted(count: u64) -> Self {
        Self {
            inserted: count,
            updated: 0,
        }
    }

    pub fn merge(&mut self, other: WriteAck) {
        self.inserted += other.inserted;
        self.updated += other.updated;
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Upsert {
    pub filter: Document,
    /// Overwrite fields.
    pub set: Document,
    /// Fields written only when the upsert inserts.
    pub set_on_insert: Document,
    /// Add to numeric fields.
    pub inc: Document,
    /// Keep the larger of the stored and the given value.
    pub max: Document,
    /// Append every element of the given array.
    pub push: Document,
}

impl Upsert {
    pub fn new(filter: Document) -> Self {
        Self {
            filter,
            ..Default::default()
        }
    }

    /// Split a full document into a filter on `key_fields` and a `set` of
    /// every other field.
    pub fn keyed(mut document: Document, key_fields: &[&str]) -> Self {
        let mut filter = Map::new();
        for field in key_fields {
            let value = document.remove(*field).unwrap_or(Value::Null);
            filter.insert((*field).to_string(), value);
        }
        Self {
            filter,
            set: document,
            ..Default::default()
        }
    }

    pub fn set(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.set.insert(field.to_string(), value.into());
        self
    }

    pub fn set_on_insert(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.set_on_insert.insert(field.to_string(), value.into());
        self
    }

    pub fn inc(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.inc.insert(field.to_string(), value.into());
        self
    }

    pub fn max(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.max.insert(field.to_string(), value.into());
        self
    }

    pub fn push_each(mut self, field: &str, values: Vec<Value>) -> Self {
        self.push.insert(field.to_string(), Value::Array(values));
        self
    }

    pub fn matches(&self, document: &Document) -> bool {
        matches_filter(document, &self.filter)
    }

    /// Apply the operators to an existing document.
    pub fn apply(&self, document: &mut Document) {
        for (field, value) in &self.set {
            *path_mut(document, field) = value.clone();
        }
        for (field, value) in &self.inc {
            let slot = path_mut(document, field);
            *slot = add_numbers(slot, value);
        }
        for (field, value) in &self.max {
            let slot = path_mut(document, field);
            if slot.is_null() || compare_numbers(value, slot) == Some(std::cmp::Ordering::Greater)
            {
                *slot = value.clone();
            }
        }
        for (field, value) in &self.push {
            let slot = path_mut(document, field);
            if !slot.is_array() {
                *slot = Value::Array(Vec::new());
            }
            if let Value::Array(items) = slot {
                match value {
                    Value::Array(values) => items.extend(values.iter().cloned()),
                    other => items.push(other.clone()),
                }
            }
        }
    }

    /// The document inserted when nothing matches the filter.
    pub fn to_insert(&self) -> Document {
        let mut document = Map::new();
        for (field, value) in &self.filter {
            *path_mut(&mut document, field) = value.clone();
        }
        for (field, value) in &self.set_on_insert {
            *path_mut(&mut document, field) = value.clone();
        }
        self.apply(&mut document);
        document
    }
}

/// Whether every filter field equals the document's value at that path.
/// A missing field matches a `null` filter value.
pub fn matches_filter(document: &Document, filter: &Document) -> bool {
    filter.iter().all(|(field, expected)| {
        let actual = path(document, field).unwrap_or(&Value::Null);
        values_equal(actual, expected)
    })
}

/// Equality with numbers compared by value (`1` equals `1.0`).
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => {
            compare_numbers(a, b) == Some(std::cmp::Ordering::Equal)
        }
        _ => a == b,
    }
}

/// Look up a dotted path.
pub fn path<'a>(document: &'a Document, field: &str) -> Option<&'a Value> {
    let mut parts = field.split('.');
    let first = document.get(parts.next()?)?;
    parts.try_fold(first, |value, part| value.get(part))
}

/// Mutable slot at a dotted path, creating intermediate objects as needed.
fn path_mut<'a>(document: &'a mut Document, field: &str) -> &'a mut Value {
    let (head, rest) = match field.split_once('.') {
        Some((head, rest)) => (head, Some(rest)),
        None => (field, None),
    };
    let slot = document.entry(head.to_string()).or_insert(Value::Null);
    match rest {
        None => slot,
        Some(rest) => {
            if !slot.is_object() {
                *slot = Value::Object(Map::new());
            }
            match slot {
                Value::Object(map) => path_mut(map, rest),
                other => other,
            }
        }
    }
}

fn compare_numbers(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        return Some(x.cmp(&y));
    }
    if let (Some(x), Some(y)) = (a.as_u64(), b.as_u64()) {
        return Some(x.cmp(&y));
    }
    a.as_f64()?.partial_cmp(&b.as_f64()?)
}

/// Sum two JSON numbers, staying integral when both are. A missing or
/// non-numeric current value counts as zero.
fn add_numbers(current: &Value, delta: &Value) -> Value {
    if current.is_null() || !current.is_number() {
        return delta.clone();
    }
    if let (Some(x), Some(y)) = (current.as_u64(), delta.as_u64()) {
        if let Some(sum) = x.checked_add(y) {
            return Value::Number(Number::from(sum));
        }
    }
    if let (Some(x), Some(y)) = (current.as_i64(), delta.as_i64()) {
        if let Some(sum) = x.checked_add(y) {
            return Value::Number(Number::from(sum));
        }
    }
    let sum = current.as_f64().unwrap_or(0.0) + delta.as_f64().unwrap_or(0.0);
    Number::from_f64(sum).map(Value::Number).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_insert_combines_filter_and_operators() {
        let upsert = Upsert::new(doc(json!({"url": "https://a.com/", "domain": "a.com"})))
            .inc("visit_count", 2)
            .set_on_insert("first_crawled_at", "2021-03-12T10:00:00")
            .set("page_size", 10)
            .inc("page_load_speed_count.fast", 1);

        assert_eq!(
            Value::Object(upsert.to_insert()),
            json!({
                "url": "https://a.com/",
                "domain": "a.com",
                "visit_count": 2,
                "first_crawled_at": "2021-03-12T10:00:00",
                "page_size": 10,
                "page_load_speed_count": {"fast": 1}
            })
        );
    }

    #[test]
    fn test_apply_to_existing_document() {
        let mut existing = doc(json!({
            "date": "2021-03-12",
            "visit_count": 3,
            "crawl_frequency": 7.5,
            "first_crawled_at": "old",
            "page_load_speed_count": {"fast": 1, "slow": 2},
            "reasons": [{"reason": "A", "count": 1}]
        }));
        let upsert = Upsert::new(doc(json!({"date": "2021-03-12"})))
            .inc("visit_count", 2)
            .inc("page_load_speed_count.slow", 1)
            .max("crawl_frequency", 5.0)
            .set_on_insert("first_crawled_at", "new")
            .push_each("reasons", vec![json!({"reason": "B", "count": 2})]);

        assert!(upsert.matches(&existing));
        upsert.apply(&mut existing);

        assert_eq!(existing["visit_count"], json!(5));
        assert_eq!(existing["crawl_frequency"], json!(7.5));
        assert_eq!(existing["first_crawled_at"], json!("old"));
        assert_eq!(existing["page_load_speed_count"], json!({"fast": 1, "slow": 3}));
        assert_eq!(
            existing["reasons"],
            json!([{"reason": "A", "count": 1}, {"reason": "B", "count": 2}])
        );

        Upsert::new(Map::new())
            .max("crawl_frequency", 9)
            .apply(&mut existing);
        assert_eq!(existing["crawl_frequency"], json!(9));
    }

    #[test]
    fn test_inc_mixes_integers_and_floats() {
        let mut document = doc(json!({"total": 1}));
        Upsert::default().inc("total", 0.5).apply(&mut document);
        assert_eq!(document["total"], json!(1.5));
    }

    #[test]
    fn test_keyed_split() {
        let upsert = Upsert::keyed(
            doc(json!({"ingested_on": null, "domain": "a.com", "geo": "US", "bids_count": 2})),
            &["ingested_on", "domain", "geo"],
        );
        assert_eq!(
            Value::Object(upsert.filter.clone()),
            json!({"ingested_on": null, "domain": "a.com", "geo": "US"})
        );
        assert_eq!(Value::Object(upsert.set.clone()), json!({"bids_count": 2}));

        let stored = upsert.to_insert();
        assert!(matches_filter(&stored, &upsert.filter));
        assert!(!matches_filter(
            &stored,
            &doc(json!({"ingested_on": "2021-03-12", "domain": "a.com", "geo": "US"}))
        ));
    }

    #[test]
    fn test_numbers_match_by_value() {
        let stored = doc(json!({"count": 1.0}));
        assert!(matches_filter(&stored, &doc(json!({"count": 1}))));
    }
}
