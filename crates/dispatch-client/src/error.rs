use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("request to dispatch server failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("could not decode server response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("server returned {kind}: {message}")]
    Api { kind: String, message: String },
}
