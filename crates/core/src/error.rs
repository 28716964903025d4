use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("User directory error: {0}")]
    Directory(String),

    #[error("Suppression list error: {0}")]
    Suppression(String),

    #[error("Template not found: {0}")]
    Template(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Delivery provider error: {0}")]
    Provider(String),

    #[error("Campaign {0} is not in state {1}")]
    CampaignState(uuid::Uuid, String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid unsubscribe token")]
    InvalidToken,

    #[error("Invalid webhook signature")]
    InvalidSignature,

    #[error("Missing event envelope")]
    MissingEnvelope,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}
