//! Error types for the LXD provider

use thiserror::Error;

/// Result type alias using the provider Error
pub type Result<T> = std::result::Result<T, Error>;

/// Message LXD servers without a given API return in place of a typed error
pub const NOT_IMPLEMENTED_MESSAGE: &str = "not implemented";

/// Provider error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("Cannot connect to remote {remote}: {reason}")]
    Connection { remote: String, reason: String },

    #[error("{kind} {name} not found")]
    NotFound { kind: String, name: String },

    #[error("{kind} {name} was modified since it was last read")]
    Conflict { kind: String, name: String },

    #[error("Not implemented: {0}")]
    NotImplemented(String),

    #[error("This LXD server does not support the creation of networks")]
    NetworksNotImplemented,

    /// The entity exists on the remote but reading it back failed
    #[error("{kind} {name} was created but could not be read back: {source}")]
    CreatedUnreadable {
        kind: String,
        name: String,
        source: Box<Error>,
    },

    #[error("LXD API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Failed to decode value: {0}")]
    Decode(String),

    #[error("Failed to encode value: {0}")]
    Encode(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Map a failed LXD response onto the error taxonomy.
    ///
    /// `kind` and `name` describe the entity the request addressed and are
    /// only used for the entity-level variants.
    pub fn from_response(status: u16, message: &str, kind: &str, name: &str) -> Self {
        match status {
            404 => Error::NotFound {
                kind: kind.to_string(),
                name: name.to_string(),
            },
            412 => Error::Conflict {
                kind: kind.to_string(),
                name: name.to_string(),
            },
            501 => Error::NotImplemented(message.to_string()),
            _ if message == NOT_IMPLEMENTED_MESSAGE => {
                Error::NotImplemented(message.to_string())
            }
            _ => Error::Api {
                status,
                message: message.to_string(),
            },
        }
    }

    pub fn connection(remote: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Error::Connection {
            remote: remote.into(),
            reason: reason.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict { .. })
    }

    pub fn created_unreadable(kind: &str, name: &str, source: Error) -> Self {
        Error::CreatedUnreadable {
            kind: kind.to_string(),
            name: name.to_string(),
            source: Box::new(source),
        }
    }

    pub fn is_not_implemented(&self) -> bool {
        matches!(self, Error::NotImplemented(_))
    }
}

impl From<rmpv::decode::Error> for Error {
    fn from(e: rmpv::decode::Error) -> Self {
        Error::Decode(e.to_string())
    }
}

impl From<rmpv::encode::Error> for Error {
    fn from(e: rmpv::encode::Error) -> Self {
        Error::Encode(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert!(Error::from_response(404, "not found", "network", "br0").is_not_found());
        assert!(Error::from_response(412, "ETag mismatch", "network", "br0").is_conflict());
        assert!(Error::from_response(501, "whatever", "network", "br0").is_not_implemented());
    }

    #[test]
    fn test_not_implemented_message_without_status() {
        let err = Error::from_response(500, "not implemented", "network", "br0");
        assert!(err.is_not_implemented());

        let err = Error::from_response(500, "Not implemented yet", "network", "br0");
        assert!(matches!(err, Error::Api { status: 500, .. }));
    }

    #[test]
    fn test_created_unreadable_keeps_cause() {
        let cause = Error::from_response(500, "boom", "network", "lxdbr1");
        let err = Error::created_unreadable("network", "lxdbr1", cause);
        assert_eq!(
            err.to_string(),
            "network lxdbr1 was created but could not be read back: LXD API error (500): boom"
        );
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_not_found_display() {
        let err = Error::from_response(404, "not found", "storage pool", "pool1");
        assert_eq!(err.to_string(), "storage pool pool1 not found");
    }
}
