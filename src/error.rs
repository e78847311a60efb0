//! # Errors
//!
//! The error taxonomy used throughout the crate. Collaborator traits
//! ([`crate::Registry`], [`crate::Storage`]) return `anyhow` errors that are
//! mapped into [`Error::Backend`] and [`Error::Storage`] at the boundary.

use thiserror::Error;

use crate::did::Did;
use crate::url::DidUrl;

/// Log an error with tracing and return it from the enclosing function.
///
/// # Example
/// ```
/// use elastos_did::{tracerr, Error, Result};
///
/// fn with_msg() -> Result<()> {
///     tracerr!(Error::InvalidArgument(format!("bad value: {}", 42)))
/// }
/// ```
#[macro_export]
macro_rules! tracerr {
    ($err:expr) => {{
        let err: $crate::Error = $err;
        tracing::error!("{err}");
        return Err(err);
    }};
}

/// Identifier grammar failures.
///
/// Positions are absolute character offsets in the caller's original
/// (untrimmed) string.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    /// Input was empty or only whitespace.
    #[error("empty DID URL string")]
    EmptyInput,

    /// A character is not allowed at this position.
    #[error("invalid char at: {pos}")]
    InvalidChar {
        /// Offset of the offending character.
        pos: usize,
    },

    /// A percent escape is not followed by a hex digit.
    #[error("invalid hex char at: {pos}")]
    InvalidHexChar {
        /// Offset of the offending character.
        pos: usize,
    },

    /// The `did:method:id` part is malformed or uses an unsupported method.
    #[error("invalid did at: {pos}")]
    InvalidDid {
        /// Offset of the start of the DID part.
        pos: usize,
    },
}

impl ParseError {
    /// Offset of the failure, if any.
    #[must_use]
    pub const fn position(&self) -> Option<usize> {
        match self {
            Self::EmptyInput => None,
            Self::InvalidChar { pos } | Self::InvalidHexChar { pos } | Self::InvalidDid { pos } => {
                Some(*pos)
            }
        }
    }
}

/// Crate error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Grammar or parse failure.
    #[error(transparent)]
    Malformed(#[from] ParseError),

    /// A reference to a nonexistent key, credential, service or controller,
    /// or an invalid threshold.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Duplicate id on add.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// The requested entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The credential was revoked and the operation is no longer permitted.
    #[error("credential revoked: {0}")]
    CredentialRevoked(DidUrl),

    /// The credential is already declared on the registry.
    #[error("credential already declared: {0}")]
    CredentialAlreadyExists(DidUrl),

    /// Signer lacks the required controller or default-key relationship, or
    /// a document does not carry enough proofs.
    #[error("not authorized: {0}")]
    Authorization(String),

    /// The controller has already contributed a proof.
    #[error("already signed by {0}")]
    AlreadySigned(Did),

    /// The document already carries the required number of proofs.
    #[error("document already sealed")]
    AlreadySealed,

    /// The controller set changed since the last known state, the local copy
    /// is not based on the registry copy, or a ticket was already consumed.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The DID is deactivated.
    #[error("DID deactivated: {0}")]
    Deactivated(Did),

    /// Registry or network failure, including timeouts.
    #[error("backend error: {0}")]
    Backend(String),

    /// The supplied password does not unlock the store or archive.
    #[error("wrong password")]
    WrongPassword,

    /// Local storage failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// Failure to (de)serialize data.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// A stable, snake-case code for the error.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Malformed(_) => "malformed_input",
            Self::InvalidArgument(_) => "invalid_argument",
            Self::AlreadyExists(_) => "already_exists",
            Self::NotFound(_) => "not_found",
            Self::CredentialRevoked(_) => "credential_revoked",
            Self::CredentialAlreadyExists(_) => "credential_already_exists",
            Self::Authorization(_) | Self::AlreadySigned(_) | Self::AlreadySealed => {
                "authorization_error"
            }
            Self::Conflict(_) => "conflict",
            Self::Deactivated(_) => "deactivated",
            Self::Backend(_) => "backend_error",
            Self::WrongPassword => "wrong_password",
            Self::Storage(_) => "storage_error",
            Self::Serialization(_) => "serialization_error",
        }
    }

    /// Render the error as a JSON object.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "error": self.code(),
            "error_description": self.to_string(),
        })
    }

    pub(crate) fn backend(err: &anyhow::Error) -> Self {
        Self::Backend(format!("{err:#}"))
    }

    pub(crate) fn storage(err: &anyhow::Error) -> Self {
        Self::Storage(format!("{err:#}"))
    }
}

#[cfg(test)]
mod test {
    use serde_json::json;

    use super::*;
    use crate::Result;

    #[test]
    fn parse_error_json() {
        let err: Error = ParseError::InvalidChar { pos: 19 }.into();
        assert_eq!(
            err.to_json(),
            json!({"error": "malformed_input", "error_description": "invalid char at: 19"})
        );
    }

    #[test]
    fn error_bodies() {
        let did = Did::new("alice").expect("should create DID");
        let errors = [
            Error::Deactivated(did),
            Error::WrongPassword,
            Error::AlreadySealed,
            Error::Conflict("controllers changed".into()),
        ];
        let bodies: Vec<_> = errors.iter().map(Error::to_json).collect();
        insta::assert_json_snapshot!(bodies, @r#"
        [
          {
            "error": "deactivated",
            "error_description": "DID deactivated: did:elastos:alice"
          },
          {
            "error": "wrong_password",
            "error_description": "wrong password"
          },
          {
            "error": "authorization_error",
            "error_description": "document already sealed"
          },
          {
            "error": "conflict",
            "error_description": "conflict: controllers changed"
          }
        ]
        "#);
    }

    #[test]
    fn sign_errors_share_code() {
        assert_eq!(Error::AlreadySealed.code(), Error::Authorization(String::new()).code());
    }

    #[test]
    fn macro_returns_error() {
        fn run() -> Result<()> {
            tracerr!(Error::Conflict("controllers changed".into()))
        }
        let Err(e) = run() else {
            panic!("expected error");
        };
        assert_eq!(e.to_string(), "conflict: controllers changed");
    }
}
