use std::fmt;

#[derive(Debug)]
pub enum TrawlError {
    Io(std::io::Error),
    Json(serde_json::Error),
    Serialization(Box<bincode::error::EncodeError>),
    Deserialization(Box<bincode::error::DecodeError>),
    Http(String),
    Auth(String),
    Config(String),
    Store(String),
    MergeConflict { id: String },
    Other(String),
}

impl fmt::Display for TrawlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrawlError::Io(e) => write!(f, "IO error: {}", e),
            TrawlError::Json(e) => write!(f, "JSON error: {}", e),
            TrawlError::Serialization(e) => write!(f, "Serialization error: {}", e),
            TrawlError::Deserialization(e) => write!(f, "Deserialization error: {}", e),
            TrawlError::Http(e) => write!(f, "HTTP error: {}", e),
            TrawlError::Auth(e) => write!(f, "Authentication error: {}", e),
            TrawlError::Config(e) => write!(f, "Configuration error: {}", e),
            TrawlError::Store(e) => write!(f, "Store error: {}", e),
            TrawlError::MergeConflict { id } => {
                write!(f, "Merge conflict: id {} appears in more than one shard", id)
            }
            TrawlError::Other(e) => write!(f, "Error: {}", e),
        }
    }
}

impl std::error::Error for TrawlError {}

impl From<std::io::Error> for TrawlError {
    fn from(err: std::io::Error) -> Self {
        TrawlError::Io(err)
    }
}

impl From<serde_json::Error> for TrawlError {
    fn from(err: serde_json::Error) -> Self {
        TrawlError::Json(err)
    }
}

impl From<Box<bincode::error::EncodeError>> for TrawlError {
    fn from(err: Box<bincode::error::EncodeError>) -> Self {
        TrawlError::Serialization(err)
    }
}

impl From<bincode::error::EncodeError> for TrawlError {
    fn from(err: bincode::error::EncodeError) -> Self {
        TrawlError::Serialization(Box::new(err))
    }
}

impl From<Box<bincode::error::DecodeError>> for TrawlError {
    fn from(err: Box<bincode::error::DecodeError>) -> Self {
        TrawlError::Deserialization(err)
    }
}

impl From<bincode::error::DecodeError> for TrawlError {
    fn from(err: bincode::error::DecodeError) -> Self {
        TrawlError::Deserialization(Box::new(err))
    }
}

impl From<String> for TrawlError {
    fn from(err: String) -> Self {
        TrawlError::Other(err)
    }
}

impl From<&str> for TrawlError {
    fn from(err: &str) -> Self {
        TrawlError::Other(err.to_string())
    }
}
