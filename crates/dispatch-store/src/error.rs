use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sled error: {0}")]
    Backend(#[from] sled::Error),
    #[error("could not encode job: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("stored job record at key {0:?} is corrupt: {1}")]
    Corrupt(Vec<u8>, serde_json::Error),
}
