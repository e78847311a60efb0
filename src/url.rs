//! Destructure DID URLs into strongly typed components.
//!
//! A DID URL is of the form
//!
//! `did:elastos:<method-specific-id>[;<params>][/<path>][?<query>][#<fragment>]`.
//!
//! Any of the components may be omitted. A URL without the DID part is
//! relative and takes its DID from a context supplied by the caller. Text
//! that has no DID, path or query part and does not start with `#` is read as
//! a plain fragment.
//!
//! Components are stored exactly as written: equality and hashing never
//! decode percent escapes. Use the `decoded_*` accessors for human-readable
//! values.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::did::{Did, SCHEME};
use crate::error::ParseError;

/// Structure of a DID URL.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct DidUrl {
    did: Option<Did>,
    params: Option<String>,
    path: Option<String>,
    query: Option<Vec<QueryParam>>,
    fragment: Option<String>,
}

/// A single query parameter. A parameter written without `=` has no value,
/// which is distinct from an empty value (`key=`).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct QueryParam {
    /// Parameter name, as written.
    pub name: String,

    /// Parameter value, as written.
    pub value: Option<String>,
}

impl DidUrl {
    /// Parse an absolute or relative DID URL.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError`] with the offset of the failure in `text`.
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        Self::parse_with_context(None, text)
    }

    /// Parse a DID URL, taking the DID from `context` when the text omits it.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError`] with the offset of the failure in `text`.
    pub fn parse_with_context(context: Option<&Did>, text: &str) -> Result<Self, ParseError> {
        Parser::new(text).parse(context)
    }

    /// Create a URL referencing `fragment` within `did`'s document.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError`] if the fragment is not valid.
    pub fn with_fragment(did: &Did, fragment: &str) -> Result<Self, ParseError> {
        did.url(fragment)
    }

    /// The DID part, if present or supplied by the parsing context.
    #[must_use]
    pub const fn did(&self) -> Option<&Did> {
        self.did.as_ref()
    }

    /// Set the DID part when absent.
    #[must_use]
    pub fn resolve(mut self, base: &Did) -> Self {
        if self.did.is_none() {
            self.did = Some(base.clone());
        }
        self
    }

    /// Raw `;params` component, without the leading `;`.
    #[must_use]
    pub fn params(&self) -> Option<&str> {
        self.params.as_deref()
    }

    /// Raw path, including the leading `/`.
    #[must_use]
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Path with percent escapes decoded.
    #[must_use]
    pub fn decoded_path(&self) -> Option<String> {
        self.path.as_deref().map(percent_decode)
    }

    /// Query parameters in the order written.
    #[must_use]
    pub fn query(&self) -> &[QueryParam] {
        self.query.as_deref().unwrap_or_default()
    }

    /// Raw query string, without the leading `?`.
    #[must_use]
    pub fn query_string(&self) -> Option<String> {
        self.query.as_ref().map(|q| {
            q.iter()
                .map(|p| match &p.value {
                    Some(v) => format!("{}={v}", p.name),
                    None => p.name.clone(),
                })
                .collect::<Vec<_>>()
                .join("&")
        })
    }

    /// Returns `true` if the query has a parameter with the (raw) name.
    #[must_use]
    pub fn has_query_parameter(&self, name: &str) -> bool {
        self.query().iter().any(|p| p.name == name)
    }

    /// Decoded value of a query parameter. A parameter without a value yields
    /// `Some("")`. When a name repeats, the last value wins.
    #[must_use]
    pub fn query_parameter(&self, name: &str) -> Option<String> {
        self.query()
            .iter()
            .rfind(|p| p.name == name)
            .map(|p| p.value.as_deref().map(percent_decode).unwrap_or_default())
    }

    /// Raw fragment, without the leading `#`.
    #[must_use]
    pub fn fragment(&self) -> Option<&str> {
        self.fragment.as_deref()
    }

    /// Fragment with percent escapes decoded.
    #[must_use]
    pub fn decoded_fragment(&self) -> Option<String> {
        self.fragment.as_deref().map(percent_decode)
    }

    /// Returns `true` if this URL has no component beyond the DID.
    #[must_use]
    pub const fn is_did_only(&self) -> bool {
        self.did.is_some()
            && self.params.is_none()
            && self.path.is_none()
            && self.query.is_none()
            && self.fragment.is_none()
    }

    /// Serialize, omitting the DID when it equals `base`.
    #[must_use]
    pub fn to_string_relative(&self, base: Option<&Did>) -> String {
        let mut out = String::new();
        if let Some(did) = &self.did {
            if Some(did) != base {
                out.push_str(&did.to_string());
            }
        }
        if let Some(params) = &self.params {
            out.push(';');
            out.push_str(params);
        }
        if let Some(path) = &self.path {
            out.push_str(path);
        }
        if let Some(query) = self.query_string() {
            out.push('?');
            out.push_str(&query);
        }
        if let Some(fragment) = &self.fragment {
            out.push('#');
            out.push_str(fragment);
        }
        out
    }
}

impl Display for DidUrl {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_string_relative(None))
    }
}

impl FromStr for DidUrl {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl PartialOrd for DidUrl {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DidUrl {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.to_string().cmp(&other.to_string())
    }
}

impl Serialize for DidUrl {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DidUrl {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

impl From<Did> for DidUrl {
    fn from(did: Did) -> Self {
        Self {
            did: Some(did),
            ..Self::default()
        }
    }
}

// Token characters: alphanumerics anywhere, `.`, `_` and `-` after the first
// character of a token.
pub(crate) const fn is_token_char(ch: char, token_start: bool) -> bool {
    if ch.is_ascii_alphanumeric() {
        return true;
    }
    if token_start {
        return false;
    }
    matches!(ch, '.' | '_' | '-')
}

struct Parser {
    chars: Vec<char>,
}

impl Parser {
    fn new(text: &str) -> Self {
        Self {
            chars: text.chars().collect(),
        }
    }

    fn parse(&self, context: Option<&Did>) -> Result<DidUrl, ParseError> {
        let mut limit = self.chars.len();
        let mut start = 0;
        while limit > 0 && self.chars[limit - 1] <= ' ' {
            limit -= 1;
        }
        while start < limit && self.chars[start] <= ' ' {
            start += 1;
        }
        if start == limit {
            return Err(ParseError::EmptyInput);
        }

        let mut url = DidUrl::default();
        let mut pos = start;

        // did
        if self.starts_with_scheme(pos, limit) {
            let next = self.scan(pos, limit, "/?#;", ":")?;
            url.did = Some(
                Did::from_chars(&self.chars[pos..next])
                    .ok_or(ParseError::InvalidDid { pos })?,
            );
            pos = next;
        } else {
            url.did = context.cloned();
        }

        // params
        if pos < limit && self.chars[pos] == ';' {
            let next = self.scan(pos + 1, limit, "/?#", ";=")?;
            url.params = Some(self.text(pos + 1, next));
            pos = next;
        }

        // path
        if pos < limit && self.chars[pos] == '/' {
            let next = self.scan(pos + 1, limit, "?#", "/")?;
            url.path = Some(self.text(pos, next));
            pos = next;
        }

        // query
        if pos < limit && self.chars[pos] == '?' {
            let next = self.scan(pos + 1, limit, "#", "&=")?;
            url.query = Some(parse_query(&self.text(pos + 1, next)));
            pos = next;
        }

        // fragment, or the whole text as a plain fragment
        if pos < limit && self.chars[pos] == '#' {
            let next = self.scan(pos + 1, limit, "", "")?;
            url.fragment = Some(self.text(pos + 1, next));
        } else if pos == start {
            let next = self.scan(pos, limit, "", "")?;
            url.fragment = Some(self.text(pos, next));
        }

        Ok(url)
    }

    fn starts_with_scheme(&self, pos: usize, limit: usize) -> bool {
        let prefix: Vec<char> = format!("{SCHEME}:").chars().collect();
        limit - pos >= prefix.len() && self.chars[pos..pos + prefix.len()] == prefix[..]
    }

    fn text(&self, start: usize, end: usize) -> String {
        self.chars[start..end].iter().collect()
    }

    // Scan a URL component starting at `start`. Returns the offset of the
    // next part separator, or `limit`.
    fn scan(
        &self, start: usize, limit: usize, part_seps: &str, token_seps: &str,
    ) -> Result<usize, ParseError> {
        let mut token_start = true;
        let mut i = start;

        while i < limit {
            let ch = self.chars[i];
            if part_seps.contains(ch) {
                return Ok(i);
            }
            if token_seps.contains(ch) {
                if token_start {
                    return Err(ParseError::InvalidChar { pos: i });
                }
                token_start = true;
            } else if is_token_char(ch, token_start) {
                token_start = false;
            } else if ch == '%' {
                if i + 2 >= limit {
                    return Err(ParseError::InvalidChar { pos: i });
                }
                for _ in 0..2 {
                    i += 1;
                    if !self.chars[i].is_ascii_hexdigit() {
                        return Err(ParseError::InvalidHexChar { pos: i });
                    }
                }
                token_start = false;
            } else {
                return Err(ParseError::InvalidChar { pos: i });
            }
            i += 1;
        }

        Ok(limit)
    }
}

// Pairs are kept in order, repeated names included, so the query prints
// back unchanged.
fn parse_query(query: &str) -> Vec<QueryParam> {
    if query.is_empty() {
        return vec![];
    }
    query
        .split('&')
        .map(|pair| match pair.split_once('=') {
            Some((name, value)) => QueryParam {
                name: name.to_string(),
                value: Some(value.to_string()),
            },
            None => QueryParam {
                name: pair.to_string(),
                value: None,
            },
        })
        .collect()
}

/// Decode `%XX` escapes. Invalid UTF-8 sequences are replaced.
#[must_use]
pub fn percent_decode(text: &str) -> String {
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = text.get(i + 1..i + 3).and_then(|h| u8::from_str_radix(h, 16).ok());
            if let Some(b) = hex {
                out.push(b);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    use super::*;

    const TEST_DID: &str = "did:elastos:icJ4z2DULrHEzYSvjKNJpKyhqFDxvYV7pN";
    const TEST_PATH: &str = "/path/to/the/test-%E6%B5%8B%E8%AF%95-2020/resource";
    const TEST_QUERY: &str =
        "?qkey=qvalue&qkeyonly&hello=%E4%BD%A0%E5%A5%BD&test=true&a=%E5%95%8A";
    const TEST_FRAGMENT: &str = "#testfragment";

    fn hash(url: &DidUrl) -> u64 {
        let mut hasher = DefaultHasher::new();
        url.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn full_url() {
        let text = format!("{TEST_DID}{TEST_PATH}{TEST_QUERY}{TEST_FRAGMENT}");
        let url = DidUrl::parse(&text).expect("should parse");

        assert_eq!(url.did().map(ToString::to_string).as_deref(), Some(TEST_DID));
        assert_eq!(url.path(), Some(TEST_PATH));
        assert_eq!(url.decoded_path().as_deref(), Some("/path/to/the/test-测试-2020/resource"));
        assert_eq!(url.query().len(), 5);
        assert_eq!(url.query_parameter("qkey").as_deref(), Some("qvalue"));
        assert_eq!(url.query_parameter("qkeyonly").as_deref(), Some(""));
        assert_eq!(url.query_parameter("hello").as_deref(), Some("你好"));
        assert_eq!(url.query_parameter("a").as_deref(), Some("啊"));
        assert!(url.has_query_parameter("test"));
        assert!(!url.has_query_parameter("notexist"));
        assert_eq!(url.fragment(), Some("testfragment"));
        assert_eq!(url.to_string(), text);
    }

    #[test]
    fn relative_forms() {
        let context = Did::parse(TEST_DID).expect("should parse");

        let url = DidUrl::parse_with_context(Some(&context), TEST_PATH).expect("should parse");
        assert_eq!(url.did(), Some(&context));
        assert_eq!(url.path(), Some(TEST_PATH));
        assert_eq!(url.to_string_relative(Some(&context)), TEST_PATH);

        let url = DidUrl::parse_with_context(Some(&context), TEST_QUERY).expect("should parse");
        assert_eq!(url.query().len(), 5);
        assert_eq!(url.to_string(), format!("{TEST_DID}{TEST_QUERY}"));

        let url = DidUrl::parse(TEST_FRAGMENT).expect("should parse");
        assert_eq!(url.did(), None);
        let url = url.resolve(&context);
        assert_eq!(url.to_string(), format!("{TEST_DID}{TEST_FRAGMENT}"));
    }

    #[test]
    fn plain_fragment() {
        let url = DidUrl::parse("primary").expect("should parse");
        assert_eq!(url.fragment(), Some("primary"));
        assert_eq!(url.to_string(), "#primary");
    }

    #[test]
    fn empty_value_differs_from_absent() {
        let a = DidUrl::parse("did:elastos:foo?key").expect("should parse");
        let b = DidUrl::parse("did:elastos:foo?key=").expect("should parse");
        assert_ne!(a, b);
        assert_eq!(a.to_string(), "did:elastos:foo?key");
        assert_eq!(b.to_string(), "did:elastos:foo?key=");
    }

    #[test]
    fn params() {
        let url = DidUrl::parse("did:elastos:foo;service=agent/path#frag").expect("should parse");
        assert_eq!(url.params(), Some("service=agent"));
        assert_eq!(url.path(), Some("/path"));
        assert_eq!(url.to_string(), "did:elastos:foo;service=agent/path#frag");
    }

    #[test]
    fn round_trip() {
        let cases = [
            "did:elastos:foobar/path/to/resource?test=true&key=value&name=foobar#helloworld",
            "did:elastos:foobar/p.a_t-h/to-/resource_?te_st=tr_ue&ke.y=va_lue&na_me=foobar#helloworld_",
            "did:elastos:foobar/path_/to./resource_?test-=true.&ke.y_=va_lue.&name_=foobar.#helloworld_-.",
            "did:elastos:foobar/pa-th/to-/resource_?test=true&key=value&name=foobar#helloworld",
            "did:elastos:foobar/pa-th/to-/resource_?test=true&key=value&name=foobar#helloworld-",
            "did:elastos:foobar/path/to/resource?te%20st=true&ke%20y=va%20lue#hello%20world",
            "did:elastos:foobar",
            "did:elastos:foobar?",
            "/path/to/resource",
            "?key=value",
            "#fragment",
        ];
        for case in cases {
            let url = DidUrl::parse(&format!("  \t{case}\n ")).expect("should parse");
            assert_eq!(url.to_string(), case, "round trip of {case}");
        }
    }

    #[test]
    fn repeated_query_parameters() {
        let url = DidUrl::parse("did:elastos:foobar?a=1&flag&a=2").expect("should parse");
        assert_eq!(url.query().len(), 3);
        assert_eq!(url.query_parameter("a").as_deref(), Some("2"));
        assert!(url.has_query_parameter("flag"));
        assert_eq!(url.to_string(), "did:elastos:foobar?a=1&flag&a=2");
    }

    #[test]
    fn equality_matches_string_form() {
        let a = DidUrl::parse("did:elastos:foobar#key-1").expect("should parse");
        let b = DidUrl::parse("  did:elastos:foobar#key-1").expect("should parse");
        let c = DidUrl::parse("did:elastos:foobar#key-2").expect("should parse");
        let d = DidUrl::parse("did:elastos:foobar#key%2D1").expect("should parse");

        assert_eq!(a, b);
        assert_eq!(a.to_string(), b.to_string());
        assert_eq!(hash(&a), hash(&b));
        assert_ne!(a, c);
        assert_ne!(a, d);
        assert_eq!(a.decoded_fragment(), d.decoded_fragment());
    }

    #[test]
    fn serde_string() {
        let url = DidUrl::parse("did:elastos:foobar#primary").expect("should parse");
        let json = serde_json::to_string(&url).expect("should serialize");
        assert_eq!(json, r#""did:elastos:foobar#primary""#);
        let back: DidUrl = serde_json::from_str(&json).expect("should deserialize");
        assert_eq!(back, url);
    }

    #[test]
    fn decode() {
        assert_eq!(percent_decode("a%20b"), "a b");
        assert_eq!(percent_decode("%E4%BD%A0"), "你");
        assert_eq!(percent_decode("plain"), "plain");
    }
}
