use thiserror::Error;

#[derive(Error, Debug)]
pub enum RingError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed message: {0}")]
    MalformedMessage(String),

    #[error("unknown message type: {0}")]
    UnknownType(u32),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("dns error: {0}")]
    Dns(String),

    #[error("command error: {0}")]
    Command(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, RingError>;

impl From<serde_json::Error> for RingError {
    fn from(e: serde_json::Error) -> Self {
        RingError::Serialization(e.to_string())
    }
}
