use thiserror::Error;

mod element;
pub use element::*;
mod store;
pub use store::*;

#[derive(Debug, Error)]
pub enum BoardError {
    #[error("element already exists: {0}")]
    ElementExists(ElementId),
    #[error("element not found: {0}")]
    ElementNotFound(ElementId),
    #[error("invalid patch for {id}: {reason}")]
    InvalidPatch { id: ElementId, reason: String },
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, BoardError>;
