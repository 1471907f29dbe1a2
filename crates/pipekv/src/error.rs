use thiserror::Error;

/// Errors for store operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Keys must start with an ASCII letter or digit to map to a bucket.
    #[error("key {key:?} does not start with an ASCII letter or digit")]
    InvalidKeyPrefix {
        /// The offending key.
        key: String,
    },

    /// Empty keys have no first character to hash.
    #[error("empty key")]
    EmptyKey,
}
