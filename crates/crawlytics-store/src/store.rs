//! Document store trait and its OpenDAL-backed implementation.
//!
//! `OpendalStore` keeps each collection as one JSON array object
//! (`<prefix><collection>.json`). Writes are read-modify-write under a single
//! async lock, so concurrent writers never interleave.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use crawlytics_config::{StorageBackend, StorageConfig};
use crawlytics_core::Pipeline;
use opendal::{ErrorKind, Operator};
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::document::{matches_filter, path, Document, Upsert, WriteAck};
use crate::error::{Result, StoreError};

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Register a unique index over `fields`. Later writes that would store
    /// two documents with equal values for all of them fail with `E104`.
    async fn ensure_unique_index(&self, collection: &str, fields: &[&str]) -> Result<()>;

    async fn find_one(&self, collection: &str, filter: &Document) -> Result<Option<Document>>;

    async fn find_all(&self, collection: &str) -> Result<Vec<Document>>;

    async fn insert_one(&self, collection: &str, document: Document) -> Result<WriteAck>;

    /// Apply every upsert, or none of them.
    async fn upsert_many(&self, collection: &str, upserts: Vec<Upsert>) -> Result<WriteAck>;

    /// Replace the whole collection.
    async fn replace_all(&self, collection: &str, documents: Vec<Document>) -> Result<WriteAck>;

    async fn run_aggregation(&self, collection: &str, pipeline: &Pipeline)
        -> Result<Vec<Document>>;
}

/// Build an OpenDAL operator for the configured backend.
pub fn operator_from_config(config: &StorageConfig) -> Result<Operator> {
    let operator = match config.backend {
        StorageBackend::Memory => Operator::new(opendal::services::Memory::default())
            .map_err(|e| {
                StoreError::invalid_config(format!("Failed to create memory operator: {}", e))
            })?
            .finish(),
        StorageBackend::Fs => {
            let fs = config.fs.clone().unwrap_or_default();
            let fs_builder = opendal::services::Fs::default().root(&fs.path);
            Operator::new(fs_builder)
                .map_err(|e| {
                    StoreError::invalid_config(format!(
                        "Failed to create filesystem operator: {}",
                        e
                    ))
                })?
                .finish()
        }
        StorageBackend::S3 => {
            let s3 = config.s3.as_ref().ok_or_else(|| {
                StoreError::invalid_config("s3 config required for S3 backend")
            })?;

            let mut s3_builder = opendal::services::S3::default()
                .bucket(&s3.bucket)
                .region(&s3.region);

            if let Some(endpoint) = &s3.endpoint {
                s3_builder = s3_builder.endpoint(endpoint);
            }

            Operator::new(s3_builder)
                .map_err(|e| {
                    StoreError::invalid_config(format!("Failed to create S3 operator: {}", e))
                })?
                .finish()
        }
    };
    Ok(operator)
}

pub struct OpendalStore {
    operator: Operator,
    prefix: String,
    indexes: Mutex<HashMap<String, Vec<Vec<String>>>>,
    write_lock: tokio::sync::Mutex<()>,
}

impl OpendalStore {
    pub fn new(operator: Operator, prefix: Option<String>) -> Self {
        Self {
            operator,
            prefix: prefix.unwrap_or_default(),
            indexes: Mutex::new(HashMap::new()),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        let prefix = match config.backend {
            StorageBackend::S3 => config.s3.as_ref().and_then(|s3| s3.prefix.clone()),
            _ => None,
        };
        Ok(Self::new(operator_from_config(config)?, prefix))
    }

    /// In-memory store, for tests and dry runs.
    pub fn memory() -> Result<Self> {
        Self::from_config(&StorageConfig {
            backend: StorageBackend::Memory,
            fs: None,
            s3: None,
        })
    }

    pub fn into_shared(self) -> Arc<dyn DocumentStore> {
        Arc::new(self)
    }

    fn object_path(&self, collection: &str) -> String {
        format!("{}{}.json", self.prefix, collection)
    }

    async fn load(&self, collection: &str) -> Result<Vec<Document>> {
        let path = self.object_path(collection);
        let buffer = match self.operator.read(&path).await {
            Ok(buffer) => buffer,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(StoreError::read_failure(collection, err.to_string())),
        };
        let documents: Vec<Document> = serde_json::from_slice(&buffer.to_vec())
            .map_err(|e| StoreError::corrupt(collection, e.to_string()))?;
        debug!(collection, count = documents.len(), "loaded collection");
        Ok(documents)
    }

    async fn save(&self, collection: &str, documents: &[Document]) -> Result<()> {
        let path = self.object_path(collection);
        let bytes = serde_json::to_vec(documents)
            .map_err(|e| StoreError::write_failure(collection, e.to_string()))?;
        self.operator
            .write(&path, bytes)
            .await
            .map_err(|e| StoreError::write_failure(collection, e.to_string()))?;
        debug!(collection, count = documents.len(), "saved collection");
        Ok(())
    }

    fn unique_indexes(&self, collection: &str) -> Vec<Vec<String>> {
        self.indexes
            .lock()
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    /// Fail if `candidate` collides with any document other than the one at
    /// `skip` on a unique index.
    fn check_unique(
        collection: &str,
        indexes: &[Vec<String>],
        documents: &[Document],
        candidate: &Document,
        skip: Option<usize>,
    ) -> Result<()> {
        for index in indexes {
            let key = index_key(index, candidate);
            let collides = documents
                .iter()
                .enumerate()
                .filter(|(position, _)| Some(*position) != skip)
                .any(|(_, document)| index_key(index, document) == key);
            if collides {
                return Err(StoreError::duplicate_key(
                    collection,
                    index,
                    Value::Array(key).to_string(),
                ));
            }
        }
        Ok(())
    }
}

fn index_key(index: &[String], document: &Document) -> Vec<Value> {
    index
        .iter()
        .map(|field| path(document, field).cloned().unwrap_or(Value::Null))
        .collect()
}

#[async_trait]
impl DocumentStore for OpendalStore {
    async fn ensure_unique_index(&self, collection: &str, fields: &[&str]) -> Result<()> {
        let index: Vec<String> = fields.iter().map(|field| field.to_string()).collect();
        let mut indexes = self.indexes.lock();
        let registered = indexes.entry(collection.to_string()).or_default();
        if !registered.contains(&index) {
            debug!(collection, index = ?index, "registered unique index");
            registered.push(index);
        }
        Ok(())
    }

    async fn find_one(&self, collection: &str, filter: &Document) -> Result<Option<Document>> {
        let documents = self.load(collection).await?;
        Ok(documents
            .into_iter()
            .find(|document| matches_filter(document, filter)))
    }

    async fn find_all(&self, collection: &str) -> Result<Vec<Document>> {
        self.load(collection).await
    }

    #[instrument(skip(self, document))]
    async fn insert_one(&self, collection: &str, document: Document) -> Result<WriteAck> {
        let _guard = self.write_lock.lock().await;
        let mut documents = self.load(collection).await?;
        Self::check_unique(
            collection,
            &self.unique_indexes(collection),
            &documents,
            &document,
            None,
        )?;
        documents.push(document);
        self.save(collection, &documents).await?;
        Ok(WriteAck::inserted(1))
    }

    #[instrument(skip(self, upserts), fields(count = upserts.len()))]
    async fn upsert_many(&self, collection: &str, upserts: Vec<Upsert>) -> Result<WriteAck> {
        if upserts.is_empty() {
            return Ok(WriteAck::default());
        }

        let _guard = self.write_lock.lock().await;
        let indexes = self.unique_indexes(collection);
        let mut documents = self.load(collection).await?;
        let mut ack = WriteAck::default();

        for upsert in &upserts {
            match documents.iter().position(|document| upsert.matches(document)) {
                Some(position) => {
                    let mut updated = documents[position].clone();
                    upsert.apply(&mut updated);
                    Self::check_unique(collection, &indexes, &documents, &updated, Some(position))?;
                    documents[position] = updated;
                    ack.updated += 1;
                }
                None => {
                    let inserted = upsert.to_insert();
                    Self::check_unique(collection, &indexes, &documents, &inserted, None)?;
                    documents.push(inserted);
                    ack.inserted += 1;
                }
            }
        }

        self.save(collection, &documents).await?;
        Ok(ack)
    }

    #[instrument(skip(self, documents), fields(count = documents.len()))]
    async fn replace_all(&self, collection: &str, documents: Vec<Document>) -> Result<WriteAck> {
        let _guard = self.write_lock.lock().await;
        let indexes = self.unique_indexes(collection);
        for (position, document) in documents.iter().enumerate() {
            Self::check_unique(collection, &indexes, &documents, document, Some(position))?;
        }
        self.save(collection, &documents).await?;
        Ok(WriteAck::inserted(documents.len() as u64))
    }

    async fn run_aggregation(
        &self,
        collection: &str,
        pipeline: &Pipeline,
    ) -> Result<Vec<Document>> {
        let documents = self.load(collection).await?;
        pipeline
            .evaluate(&documents)
            .map_err(|e| StoreError::corrupt(collection, e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_missing_collection_is_empty() {
        let store = OpendalStore::memory().unwrap();
        assert!(store.find_all("overview").await.unwrap().is_empty());
        assert!(store
            .find_one("overview", &doc(json!({"date": "2021-03-12"})))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_insert_and_find() {
        let store = OpendalStore::memory().unwrap();
        store.ensure_unique_index("overview", &["date"]).await.unwrap();

        let ack = store
            .insert_one("overview", doc(json!({"date": "2021-03-12", "page_count": 3})))
            .await
            .unwrap();
        assert_eq!(ack, WriteAck::inserted(1));

        let found = store
            .find_one("overview", &doc(json!({"date": "2021-03-12"})))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found["page_count"], json!(3));

        let err = store
            .insert_one("overview", doc(json!({"date": "2021-03-12"})))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "E104");
    }

    #[tokio::test]
    async fn test_upsert_many_inserts_then_updates() {
        let store = OpendalStore::memory().unwrap();
        let upsert = || {
            Upsert::new(doc(json!({"url": "https://a.com/", "domain": "a.com"})))
                .inc("visit_count", 1)
                .set_on_insert("first_crawled_at", "t1")
        };

        let first = store
            .upsert_many("crawled_pages", vec![upsert()])
            .await
            .unwrap();
        assert_eq!(first, WriteAck { inserted: 1, updated: 0 });

        let second = store
            .upsert_many("crawled_pages", vec![upsert()])
            .await
            .unwrap();
        assert_eq!(second, WriteAck { inserted: 0, updated: 1 });

        let pages = store.find_all("crawled_pages").await.unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0]["visit_count"], json!(2));
    }

    #[tokio::test]
    async fn test_upsert_many_is_all_or_nothing() {
        let store = OpendalStore::memory().unwrap();
        store.ensure_unique_index("bidstream", &["domain"]).await.unwrap();

        // Filters differ but both inserts land on the same domain
        let result = store
            .upsert_many(
                "bidstream",
                vec![
                    Upsert::new(doc(json!({"domain": "a.com", "geo": "US"}))),
                    Upsert::new(doc(json!({"domain": "a.com", "geo": "DE"}))),
                ],
            )
            .await;
        assert!(matches!(result, Err(StoreError::DuplicateKey { .. })));
        assert!(store.find_all("bidstream").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_collection() {
        let operator = Operator::new(opendal::services::Memory::default())
            .unwrap()
            .finish();
        operator
            .write("overview.json", b"{\"not\": \"a list\"}".to_vec())
            .await
            .unwrap();
        let store = OpendalStore::new(operator, None);
        let err = store.find_all("overview").await.unwrap_err();
        assert_eq!(err.code(), "E105");
    }

    #[tokio::test]
    async fn test_fs_backend_persists_between_stores() {
        let dir = tempfile::tempdir().unwrap();
        let config = StorageConfig {
            backend: StorageBackend::Fs,
            fs: Some(crawlytics_config::FsConfig {
                path: dir.path().to_string_lossy().into_owned(),
            }),
            s3: None,
        };

        OpendalStore::from_config(&config)
            .unwrap()
            .insert_one("overview", doc(json!({"date": "2021-03-12"})))
            .await
            .unwrap();

        let reopened = OpendalStore::from_config(&config).unwrap();
        assert_eq!(reopened.find_all("overview").await.unwrap().len(), 1);
        assert!(dir.path().join("overview.json").exists());
    }
}
