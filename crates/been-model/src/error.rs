use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("malformed tree address: {0}")]
    MalformedAddress(String),
    #[error("invalid tree segment: {0:?}")]
    InvalidSegment(String),
    #[error("unknown template '{template}' in context '{context}'")]
    UnknownTemplate { context: String, template: String },
}
