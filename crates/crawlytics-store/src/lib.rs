// crawlytics-store - Document store and persistence gateway
//
// Rollups are persisted as JSON documents, one array object per collection,
// on any OpenDAL operator (memory, local filesystem, S3).

pub mod document;
pub mod error;
pub mod gateway;
pub mod store;

pub use document::{matches_filter, to_document, Document, Upsert, WriteAck};
pub use error::{ErrorCode, Result, StoreError};
pub use gateway::PersistenceGateway;
pub use store::{operator_from_config, DocumentStore, OpendalStore};
