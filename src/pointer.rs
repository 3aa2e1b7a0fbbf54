//! JSON Pointer (RFC 6901) parsing and evaluation.

use std::cmp::Ordering;
use std::fmt;

use serde::{Serialize, Serializer};
use serde_json::Value;

use crate::error::RefError;

/// A path from a document root, stored as unescaped tokens.
///
/// Renders in URI-fragment form: the root is `#`, `["a", "0"]` is `#/a/0`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Pointer {
    tokens: Vec<String>,
}

impl Pointer {
    /// The root pointer (`#`).
    pub fn root() -> Self {
        Self::default()
    }

    /// Build a pointer from unescaped tokens.
    pub fn from_tokens<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tokens: tokens.into_iter().map(Into::into).collect(),
        }
    }

    /// Parse a pointer from its plain (`/a/b`) or fragment (`#/a/b`) form.
    ///
    /// Fails when a non-empty pointer does not start with `/`, or when a `~`
    /// escape is not `~0` or `~1`.
    pub fn parse(s: &str) -> Result<Self, String> {
        Self::from_json_pointer(s.strip_prefix('#').unwrap_or(s))
    }

    /// Parse the plain RFC 6901 form only; a leading `#` is rejected.
    pub fn from_json_pointer(s: &str) -> Result<Self, String> {
        if s.is_empty() {
            return Ok(Self::root());
        }
        let Some(rest) = s.strip_prefix('/') else {
            return Err(format!("pointer must start with '/': {}", s));
        };
        rest.split('/')
            .map(unescape)
            .collect::<Result<Vec<_>, _>>()
            .map(|tokens| Self { tokens })
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    pub fn is_root(&self) -> bool {
        self.tokens.is_empty()
    }

    /// A new pointer with `token` appended.
    pub fn child(&self, token: impl Into<String>) -> Self {
        let mut tokens = self.tokens.clone();
        tokens.push(token.into());
        Self { tokens }
    }

    /// A new pointer with all of `other`'s tokens appended.
    pub fn join(&self, other: &Pointer) -> Self {
        let mut tokens = self.tokens.clone();
        tokens.extend(other.tokens.iter().cloned());
        Self { tokens }
    }

    /// True if `self` equals `other` or is one of its ancestors.
    pub fn is_prefix_of(&self, other: &Pointer) -> bool {
        other.tokens.starts_with(&self.tokens)
    }

    /// The RFC 6901 string form without the leading `#` (root is `""`).
    pub fn to_json_pointer(&self) -> String {
        let mut out = String::new();
        for token in &self.tokens {
            out.push('/');
            out.push_str(&escape(token));
        }
        out
    }
}

impl fmt::Display for Pointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.to_json_pointer())
    }
}

impl PartialOrd for Pointer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pointer {
    fn cmp(&self, other: &Self) -> Ordering {
        self.to_string().cmp(&other.to_string())
    }
}

impl Serialize for Pointer {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Evaluate `pointer` against `document`.
///
/// The root pointer yields the document itself. Fails with
/// `PointerNotFound` (naming the longest prefix that did resolve) when a
/// token has no matching child, and with `InvalidPointerToken` when a token
/// addressing an array is not a canonical non-negative integer.
pub fn resolve<'a>(document: &'a Value, pointer: &Pointer) -> Result<&'a Value, RefError> {
    let mut current = document;
    for (depth, token) in pointer.tokens.iter().enumerate() {
        let next = match current {
            Value::Object(map) => map.get(token),
            Value::Array(items) => {
                let index = parse_index(token).ok_or_else(|| RefError::InvalidPointerToken {
                    pointer: pointer.to_string(),
                    token: token.clone(),
                })?;
                items.get(index)
            }
            _ => None,
        };
        current = next.ok_or_else(|| RefError::PointerNotFound {
            pointer: pointer.to_string(),
            found: Pointer::from_tokens(pointer.tokens[..depth].iter().cloned()).to_string(),
        })?;
    }
    Ok(current)
}

// Array indices are digits only, no leading zeros, and `-` never resolves.
fn parse_index(token: &str) -> Option<usize> {
    let canonical = token == "0" || (!token.starts_with('0') && !token.is_empty());
    if !canonical || !token.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    token.parse().ok()
}

fn escape(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}

fn unescape(token: &str) -> Result<String, String> {
    let mut out = String::with_capacity(token.len());
    let mut chars = token.chars();
    while let Some(c) = chars.next() {
        if c != '~' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('0') => out.push('~'),
            Some('1') => out.push('/'),
            _ => return Err(format!("invalid escape in pointer token: {}", token)),
        }
    }
    Ok(out)
}
