//! Error types for document store operations.

use thiserror::Error;

/// Error codes for programmatic handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// E101: Storage configuration missing or invalid
    E101InvalidConfig,
    /// E102: Reading a collection failed
    E102ReadFailure,
    /// E103: Writing a collection failed
    E103WriteFailure,
    /// E104: A write would violate a unique index
    E104DuplicateKey,
    /// E105: A collection holds data that is not a list of documents
    E105CorruptCollection,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::E101InvalidConfig => "E101",
            Self::E102ReadFailure => "E102",
            Self::E103WriteFailure => "E103",
            Self::E104DuplicateKey => "E104",
            Self::E105CorruptCollection => "E105",
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("[{code}] Invalid storage configuration: {message}")]
    InvalidConfig { code: &'static str, message: String },

    #[error("[{code}] Failed to read collection '{collection}': {message}")]
    ReadFailure {
        code: &'static str,
        collection: String,
        message: String,
    },

    #[error("[{code}] Failed to write collection '{collection}': {message}")]
    WriteFailure {
        code: &'static str,
        collection: String,
        message: String,
    },

    #[error("[{code}] Duplicate key in collection '{collection}' on index ({index}): {key}")]
    DuplicateKey {
        code: &'static str,
        collection: String,
        index: String,
        key: String,
    },

    #[error("[{code}] Collection '{collection}' is corrupt: {message}")]
    CorruptCollection {
        code: &'static str,
        collection: String,
        message: String,
    },
}

impl StoreError {
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            code: ErrorCode::E101InvalidConfig.as_str(),
            message: message.into(),
        }
    }

    pub fn read_failure(collection: &str, message: impl Into<String>) -> Self {
        Self::ReadFailure {
            code: ErrorCode::E102ReadFailure.as_str(),
            collection: collection.to_string(),
            message: message.into(),
        }
    }

    pub fn write_failure(collection: &str, message: impl Into<String>) -> Self {
        Self::WriteFailure {
            code: ErrorCode::E103WriteFailure.as_str(),
            collection: collection.to_string(),
            message: message.into(),
        }
    }

    pub fn duplicate_key(collection: &str, index: &[String], key: String) -> Self {
        Self::DuplicateKey {
            code: ErrorCode::E104DuplicateKey.as_str(),
            collection: collection.to_string(),
            index: index.join(", "),
            key,
        }
    }

    pub fn corrupt(collection: &str, message: impl Into<String>) -> Self {
        Self::CorruptCollection {
            code: ErrorCode::E105CorruptCollection.as_str(),
            collection: collection.to_string(),
            message: message.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { code, .. }
            | Self::ReadFailure { code, .. }
            | Self::WriteFailure { code, .. }
            | Self::DuplicateKey { code, .. }
            | Self::CorruptCollection { code, .. } => *code,
        }
    }
}

/// Result type alias for StoreError
pub type Result<T> = std::result::Result<T, StoreError>;
