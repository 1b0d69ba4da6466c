use std::fmt::Display;

use reqwest::StatusCode;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    MalformedLink { link: String, reason: String },
    Reqwest(reqwest::Error),
    RequestReturnedError(StatusCode),
    Io(std::io::Error),
    Extraction(String),
    PoolClosed(&'static str),
    Config(String),
    Internal(String),
}

impl Error {
    pub fn malformed(link: &str, reason: impl Display) -> Self {
        Self::MalformedLink {
            link: link.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn is_malformed_link(&self) -> bool {
        matches!(self, Self::MalformedLink { .. })
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MalformedLink { link, reason } => {
                write!(f, "malformed link '{}': {}", link, reason)
            }
            Self::Reqwest(err) => write!(f, "reqwest error: {}", err),
            Self::RequestReturnedError(status) => write!(f, "request returned {}", status),
            Self::Io(err) => write!(f, "io error: {}", err),
            Self::Extraction(msg) => write!(f, "link extraction failed: {}", msg),
            Self::PoolClosed(pool) => write!(f, "{} pool is closed", pool),
            Self::Config(msg) => write!(f, "configuration error: {}", msg),
            Self::Internal(msg) => write!(f, "internal error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Reqwest(err) => Some(err),
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Self::Reqwest(err)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}
