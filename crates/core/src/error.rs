use thiserror::Error;

#[derive(Error, Debug)]
pub enum QcError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serde json error: {0}")]
    SerdeJson(#[from] serde_json::Error),
    #[error("invalid markings: {}", .0.join("; "))]
    InvalidMarkings(Vec<String>),
    #[error("catalog unavailable: {0}")]
    CatalogUnavailable(String),
    #[error("no categories defined for project type {0}")]
    UnknownProjectType(i64),
    #[error("row {0} is not a column/value mapping")]
    MalformedRecord(usize),
    #[error("external service error: {0}")]
    ExternalService(String),
    #[error("other: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, QcError>;

impl From<anyhow::Error> for QcError {
    fn from(value: anyhow::Error) -> Self {
        Self::Other(value.to_string())
    }
}

impl QcError {
    /// Violations behind an `InvalidMarkings` error, if that is what this is.
    pub fn violations(&self) -> Option<&[String]> {
        match self {
            QcError::InvalidMarkings(list) => Some(list),
            _ => None,
        }
    }
}
