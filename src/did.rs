//! # Decentralized Identifier
//!
//! A DID is the pair `(method, method-specific id)`, written
//! `did:elastos:<id>`. The method-specific id is a single token: it starts
//! with an alphanumeric character and continues with alphanumerics, `.`, `_`
//! or `-`.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ParseError;
use crate::url::{self, DidUrl};

/// The only DID method supported by this crate.
pub const METHOD: &str = "elastos";

/// The URI scheme prefix of every DID.
pub(crate) const SCHEME: &str = "did";

/// A decentralized identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Did {
    method: String,
    id: String,
}

impl Did {
    /// Create a DID from a method-specific id.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::InvalidDid`] if the id is not a single valid
    /// token.
    pub fn new(id: &str) -> Result<Self, ParseError> {
        if !is_valid_id(id) {
            return Err(ParseError::InvalidDid { pos: 0 });
        }
        Ok(Self {
            method: METHOD.to_string(),
            id: id.to_string(),
        })
    }

    /// Parse a DID string.
    ///
    /// Leading and trailing whitespace is ignored. The DID must not carry any
    /// path, query or fragment component.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError`] on malformed input.
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        let url = DidUrl::parse(text)?;
        let start = text.chars().take_while(|c| *c <= ' ').count();
        match url.did() {
            Some(did) if url.is_did_only() => Ok(did.clone()),
            _ => Err(ParseError::InvalidDid { pos: start }),
        }
    }

    /// The DID method.
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// The method-specific identifier.
    #[must_use]
    pub fn method_specific_id(&self) -> &str {
        &self.id
    }

    /// Build a URL referencing a fragment within this DID's document.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError`] if the fragment is not valid.
    pub fn url(&self, fragment: &str) -> Result<DidUrl, ParseError> {
        DidUrl::parse_with_context(Some(self), &format!("#{fragment}"))
    }

    // Base58 addresses are always valid ids.
    pub(crate) fn from_address(id: String) -> Self {
        Self {
            method: METHOD.to_string(),
            id,
        }
    }

    // Construct from a range of chars already scanned by the URL parser.
    pub(crate) fn from_chars(chars: &[char]) -> Option<Self> {
        let text: String = chars.iter().collect();
        let mut parts = text.split(':');
        let (Some(scheme), Some(method), Some(id), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return None;
        };
        if scheme != SCHEME || method != METHOD || !is_valid_id(id) {
            return None;
        }
        Some(Self {
            method: method.to_string(),
            id: id.to_string(),
        })
    }
}

fn is_valid_id(id: &str) -> bool {
    let mut chars = id.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphanumeric())
        && chars.all(|c| url::is_token_char(c, false))
}

impl Display for Did {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{SCHEME}:{}:{}", self.method, self.id)
    }
}

impl FromStr for Did {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Did {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Did {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_did() {
        let did = Did::parse("did:elastos:icJ4z2DULrHEzYSvjKNJpKyhqFDxvYV7pN").expect("should parse");
        assert_eq!(did.method(), "elastos");
        assert_eq!(did.method_specific_id(), "icJ4z2DULrHEzYSvjKNJpKyhqFDxvYV7pN");
        assert_eq!(did.to_string(), "did:elastos:icJ4z2DULrHEzYSvjKNJpKyhqFDxvYV7pN");
    }

    #[test]
    fn parse_trims() {
        let did = Did::parse("   did:elastos:foobar \t").expect("should parse");
        assert_eq!(did, Did::new("foobar").expect("should create"));
    }

    #[test]
    fn reject_url() {
        assert_eq!(
            Did::parse("did:elastos:foobar#key"),
            Err(ParseError::InvalidDid { pos: 0 })
        );
    }

    #[test]
    fn reject_method() {
        assert_eq!(Did::parse("did:example:foobar"), Err(ParseError::InvalidDid { pos: 0 }));
        assert_eq!(Did::parse("  did:elastos:foo:bar"), Err(ParseError::InvalidDid { pos: 2 }));
        assert_eq!(Did::parse(""), Err(ParseError::EmptyInput));
    }

    #[test]
    fn serde_as_string() {
        let did = Did::new("foobar").expect("should create");
        let json = serde_json::to_string(&did).expect("should serialize");
        assert_eq!(json, r#""did:elastos:foobar""#);
        let back: Did = serde_json::from_str(&json).expect("should deserialize");
        assert_eq!(back, did);
    }
}
