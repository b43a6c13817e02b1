use thiserror::Error;

#[derive(Debug, Error)]
pub enum NetwatchError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown time zone: {0}")]
    TimeZone(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl NetwatchError {
    /// Short error code string, used in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            NetwatchError::Config(_) => "CONFIG_ERROR",
            NetwatchError::TimeZone(_) => "TIMEZONE_ERROR",
            NetwatchError::Serialization(_) => "SERIALIZATION_ERROR",
            NetwatchError::Io(_) => "IO_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, NetwatchError>;
