//! Reference classification.
//!
//! Turns a raw `$ref` string into a typed [`Reference`]. Classification is
//! pure: errors are attached to the returned value, never raised.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::RefError;
use crate::pointer::Pointer;
use crate::walker::RefNode;

/// Kind of a reference, decided from its `$ref` string alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefKind {
    /// `#/...`: a pointer into the document containing the reference.
    Local,
    /// No scheme: resolved against the containing document's location.
    Relative,
    /// Has a scheme and a hierarchical part: fetched directly.
    Remote,
    /// Not a valid URI reference, or a fragment that is not a JSON pointer.
    Invalid,
    /// A URI with no hierarchical part (e.g. `urn:`), left untouched.
    Unknown,
}

/// Kinds that can be selected in a filter.
pub const ALL_KINDS: &[RefKind] = &[
    RefKind::Local,
    RefKind::Relative,
    RefKind::Remote,
    RefKind::Invalid,
    RefKind::Unknown,
];

impl RefKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefKind::Local => "local",
            RefKind::Relative => "relative",
            RefKind::Remote => "remote",
            RefKind::Invalid => "invalid",
            RefKind::Unknown => "unknown",
        }
    }

    /// True for kinds whose target lives in another document.
    pub fn is_remote(&self) -> bool {
        matches!(self, RefKind::Relative | RefKind::Remote)
    }
}

impl fmt::Display for RefKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RefKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ALL_KINDS
            .iter()
            .copied()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                format!(
                    "unknown reference type \"{}\": expected local, relative, remote, invalid, or unknown",
                    s
                )
            })
    }
}

/// A `$ref` found in a document, classified.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reference {
    /// Where the reference object sits in its document.
    pub location: Pointer,
    /// The raw `$ref` string.
    pub uri: String,
    #[serde(rename = "type")]
    pub kind: RefKind,
    /// Absolute URL of the target document (fragment removed) for
    /// relative and remote references.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document: Option<Url>,
    /// Pointer into the target document; the root when there is no fragment.
    pub pointer: Pointer,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RefError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl Reference {
    /// Classify a reference node found by the walker.
    ///
    /// Adds a warning when the node carries keys other than `$ref`.
    pub fn from_node(location: Pointer, node: &RefNode<'_>, base: Option<&Url>) -> Self {
        let mut reference = classify(location, node.uri, base);
        let extra = node.extra_keys();
        if !extra.is_empty() && reference.warning.is_none() {
            reference.warning = Some(format!(
                "extra properties are ignored: {}",
                extra.join(", ")
            ));
        }
        reference
    }

    fn invalid(mut self, message: impl Into<String>) -> Self {
        self.kind = RefKind::Invalid;
        self.document = None;
        self.error = Some(RefError::InvalidReference {
            uri: self.uri.clone(),
            message: message.into(),
        });
        self
    }
}

/// Classify the raw `$ref` string found at `location`.
///
/// `base` is the location of the document containing the reference; it is
/// only needed for relative references.
pub fn classify(location: Pointer, raw: &str, base: Option<&Url>) -> Reference {
    let reference = Reference {
        location,
        uri: raw.to_string(),
        kind: RefKind::Invalid,
        document: None,
        pointer: Pointer::root(),
        error: None,
        warning: None,
    };

    if let Some(fragment) = raw.strip_prefix('#') {
        return match parse_fragment(fragment) {
            Ok(pointer) => Reference {
                kind: RefKind::Local,
                pointer,
                ..reference
            },
            Err(message) => reference.invalid(message),
        };
    }

    match Url::parse(raw) {
        Ok(url) if url.cannot_be_a_base() => Reference {
            kind: RefKind::Unknown,
            warning: Some(format!("unsupported reference \"{}\" left unresolved", raw)),
            ..reference
        },
        Ok(url) => with_target(
            Reference {
                kind: RefKind::Remote,
                ..reference
            },
            url,
        ),
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            let reference = Reference {
                kind: RefKind::Relative,
                ..reference
            };
            match base {
                Some(base) => match base.join(raw) {
                    Ok(url) => with_target(reference, url),
                    Err(e) => reference.invalid(e.to_string()),
                },
                None => Reference {
                    error: Some(RefError::MissingBase {
                        uri: raw.to_string(),
                    }),
                    ..reference
                },
            }
        }
        Err(e) => reference.invalid(e.to_string()),
    }
}

/// Split an absolute target URL into document and fragment pointer.
fn with_target(mut reference: Reference, mut url: Url) -> Reference {
    let fragment = url.fragment().map(str::to_string);
    url.set_fragment(None);
    match fragment.as_deref().map(parse_fragment).transpose() {
        Ok(pointer) => {
            reference.pointer = pointer.unwrap_or_default();
            reference.document = Some(url);
            reference
        }
        Err(message) => reference.invalid(message),
    }
}

/// Decode a URI fragment (percent-encoded) into a JSON pointer.
///
/// The fragment is everything after the first `#`, so a second `#` makes
/// it invalid rather than being skipped.
fn parse_fragment(fragment: &str) -> Result<Pointer, String> {
    let decoded = percent_decode(fragment)?;
    Pointer::from_json_pointer(&decoded)
        .map_err(|e| format!("fragment is not a JSON pointer: {}", e))
}

// Every `%` must start a two-hex-digit escape.
fn percent_decode(s: &str) -> Result<String, String> {
    let bytes = s.as_bytes();
    let malformed = bytes.iter().enumerate().any(|(i, &b)| {
        b == b'%'
            && !bytes
                .get(i + 1..i + 3)
                .is_some_and(|hex| hex.iter().all(u8::is_ascii_hexdigit))
    });
    if malformed {
        return Err(format!("invalid percent-encoding in \"{}\"", s));
    }
    urlencoding::decode(s)
        .map(|decoded| decoded.into_owned())
        .map_err(|_| format!("fragment is not valid UTF-8: \"{}\"", s))
}
