//! Error taxonomy for every client-side operation.
//!
//! The transport produces exactly two failure kinds: [`ClientError::Network`]
//! when the backend cannot be reached and [`ClientError::Http`] for a non-2xx
//! response. Everything else is raised by the layers that interpret a
//! response (contract decoding, trace reconciliation) or by local input
//! checks that run before any request is made.

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ClientError {
    /// The backend could not be reached (DNS, connection refused, reset).
    #[error("network error calling {url}: {message}")]
    Network { url: String, message: String },

    /// The backend answered with a non-success status.
    #[error("HTTP {status} from {url}: {body}")]
    Http {
        url: String,
        status: u16,
        body: String,
    },

    /// A trace payload lacks a mandatory field.
    #[error("malformed trace: {0}")]
    MalformedTrace(String),

    /// A 2xx body that is not the JSON shape this client accepts.
    #[error("unexpected response from {url}: {message}")]
    Decode { url: String, message: String },

    #[error("query must not be empty")]
    EmptyQuery,

    /// The external browsing context could not be opened.
    #[error("could not open {url}: {message}")]
    Launch { url: String, message: String },

    #[error("unknown provider '{0}' (expected slack, drive or github)")]
    UnknownProvider(String),
}

impl ClientError {
    /// Text shown to the user when a call fails.
    ///
    /// HTTP failures always carry the numeric status. Launch failures are
    /// worded so they cannot be mistaken for a backend problem.
    pub fn user_message(&self) -> String {
        match self {
            ClientError::Network { url, message } => {
                format!("Backend unreachable ({}): {}", url, message)
            }
            ClientError::Http { status, body, .. } => {
                let body = body.trim();
                if body.is_empty() {
                    format!("Backend returned HTTP {}", status)
                } else {
                    format!("Backend returned HTTP {}: {}", status, body)
                }
            }
            ClientError::MalformedTrace(reason) => {
                format!("Trace could not be displayed: {}", reason)
            }
            ClientError::Decode { message, .. } => {
                format!("Backend sent an unexpected response: {}", message)
            }
            ClientError::EmptyQuery => "Type a question first.".to_string(),
            ClientError::Launch { url, message } => format!(
                "Browser window could not be opened ({}). Open this link manually: {}",
                message, url
            ),
            ClientError::UnknownProvider(name) => {
                format!("Unknown provider '{}'. Use slack, drive or github.", name)
            }
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

pub type ClientResult<T> = Result<T, ClientError>;
