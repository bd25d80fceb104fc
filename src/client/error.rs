//! Client errors

use crate::service::ErrorKind;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Relay returned {status}: {message}")]
    Api {
        status: u16,
        /// Present when the body carried a relay error
        kind: Option<ErrorKind>,
        message: String,
    },
    #[error("Gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        last: Box<ClientError>,
    },
    #[error("Signing failed: {0}")]
    Signing(String),
}

impl ClientError {
    /// Worth retrying: the request may succeed unchanged later
    pub fn is_transient(&self) -> bool {
        match self {
            ClientError::Http(e) => e.is_connect() || e.is_timeout() || e.is_request(),
            ClientError::Api { status, .. } => *status >= 500,
            ClientError::RetriesExhausted { .. } | ClientError::Signing(_) => false,
        }
    }

    /// Classification shared with the relay
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::Api {
                kind: Some(kind), ..
            } => *kind,
            ClientError::Api { status, .. } if *status == 404 => ErrorKind::NotFound,
            ClientError::Api { status, .. } if *status < 500 => ErrorKind::MalformedInput,
            ClientError::Signing(_) => ErrorKind::MalformedInput,
            _ => ErrorKind::Unavailable,
        }
    }
}
