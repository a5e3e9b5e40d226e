//! Unified error handling for the track-scout library.
//!
//! Everything in this subsystem degrades to "some tracks may be missing"
//! rather than crashing the view: transport errors leave the last good
//! render intact, decode errors skip a single track, and rejected queries
//! never reach the server.

use thiserror::Error;

/// Unified error type for track-scout operations.
#[derive(Debug, Clone, Error)]
pub enum ScoutError {
    /// Streaming connection dropped, timed out, or could not be opened.
    /// Previously rendered results stay on screen.
    #[error("stream transport error: {message}")]
    StreamTransport { message: String },

    /// A single track's geometry payload could not be decoded.
    /// Callers skip that track and keep the others rendered.
    #[error("{}", malformed_msg(.track_id, .message))]
    MalformedGeometry {
        track_id: Option<String>,
        message: String,
    },

    /// Invalid search bounds (e.g. west > east). Surfaced immediately,
    /// no request is sent.
    #[error("query rejected: {message}")]
    QueryRejected { message: String },

    /// Non-success HTTP response from the server.
    #[error("{}", http_msg(.status, .message))]
    Http {
        status: Option<u16>,
        message: String,
    },

    /// Generic internal error.
    #[error("internal error: {message}")]
    Internal { message: String },
}

fn malformed_msg(track_id: &Option<String>, message: &str) -> String {
    match track_id {
        Some(id) => format!("malformed geometry for track '{}': {}", id, message),
        None => format!("malformed geometry: {}", message),
    }
}

fn http_msg(status: &Option<u16>, message: &str) -> String {
    match status {
        Some(code) => format!("HTTP error ({}): {}", code, message),
        None => format!("HTTP error: {}", message),
    }
}

impl ScoutError {
    /// Shorthand for a transport error from any displayable cause.
    pub fn transport(message: impl ToString) -> Self {
        ScoutError::StreamTransport {
            message: message.to_string(),
        }
    }

    /// Shorthand for a malformed-geometry error tied to a track.
    pub fn malformed(track_id: Option<&str>, message: impl ToString) -> Self {
        ScoutError::MalformedGeometry {
            track_id: track_id.map(str::to_string),
            message: message.to_string(),
        }
    }

    /// Shorthand for a rejected query.
    pub fn rejected(message: impl ToString) -> Self {
        ScoutError::QueryRejected {
            message: message.to_string(),
        }
    }
}

/// Result type alias for track-scout operations.
pub type Result<T> = std::result::Result<T, ScoutError>;
