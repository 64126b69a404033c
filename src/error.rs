//! Error types for fluxnova-cdc.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The engine (or another remote) was unreachable or answered non-2xx.
    #[error("transport error: {message}")]
    Transport {
        message: String,
        status: Option<u16>,
    },

    /// A response body or engine value could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    #[error("publish to {stream} failed for {key}: {message}")]
    Publish {
        stream: String,
        key: String,
        message: String,
    },

    #[error("handler error: {0}")]
    Handler(String),

    #[error("variable {variable} for topic {topic}: {message}")]
    Schema {
        topic: String,
        variable: String,
        message: String,
    },

    #[error("startup failed: {0}")]
    Startup(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            status: None,
        }
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }

    pub fn is_decode(&self) -> bool {
        matches!(self, Self::Decode(_))
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Decode(e.to_string())
        } else {
            Self::Transport {
                message: e.to_string(),
                status: e.status().map(|s| s.as_u16()),
            }
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
