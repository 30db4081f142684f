/// Shared error type used across all gateway crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("engine init: {0}")]
    EngineInit(String),

    #[error("stream decode: {0}")]
    StreamDecode(String),

    #[error("Timeout after {0}s")]
    Timeout(u64),

    #[error("{message}")]
    Validation {
        code: &'static str,
        message: String,
    },

    #[error("session is busy — a run is already active")]
    Busy,

    #[error("STT connect failed: {0}")]
    SttConnect(String),

    #[error("STT route error: {0}")]
    SttRoute(String),

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Maps to one of the client-facing error codes enumerated in the
    /// gateway's outbound `Error` event.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Validation { code, .. } => code,
            Error::Busy => "BUSY",
            Error::SttConnect(_) => "STT_CONNECT",
            Error::SttRoute(_) => "STT_ROUTE_ERROR",
            Error::EngineInit(_) => "ENGINE_INIT",
            _ => "ERROR",
        }
    }

    pub fn validation(code: &'static str, message: impl Into<String>) -> Self {
        Error::Validation {
            code,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
