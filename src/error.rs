use thiserror::Error;

/// Fatal errors surfaced during startup (config load, registry build).
/// Runtime decode problems are not errors: they are logged and the
/// offending message is discarded.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("duplicate device index {0}")]
    DuplicateIndex(u32),

    #[error("duplicate device instance {0}")]
    DuplicateInstance(u32),

    #[error("duplicate serial {0}")]
    DuplicateSerial(String),

    #[error("broker error: {0}")]
    Broker(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
