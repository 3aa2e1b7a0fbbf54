//! Core types for reference resolution: options and the resolution report.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::Value;
use url::Url;

use crate::error::RefError;
use crate::loader::RequestHook;
use crate::pointer::Pointer;
use crate::reference::{RefKind, ALL_KINDS};

/// A position in a specific document.
///
/// `document` is `None` for the root document when it has no base location.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Location {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document: Option<Url>,
    pub pointer: Pointer,
}

impl Location {
    pub fn new(document: Option<Url>, pointer: Pointer) -> Self {
        Self { document, pointer }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.document {
            Some(url) => write!(f, "{}{}", url, self.pointer),
            None => write!(f, "{}", self.pointer),
        }
    }
}

/// Set of reference kinds to resolve. Defaults to all kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefFilter {
    kinds: BTreeSet<RefKind>,
}

impl RefFilter {
    pub fn all() -> Self {
        Self::only(ALL_KINDS.iter().copied())
    }

    pub fn only(kinds: impl IntoIterator<Item = RefKind>) -> Self {
        Self {
            kinds: kinds.into_iter().collect(),
        }
    }

    pub fn contains(&self, kind: RefKind) -> bool {
        self.kinds.contains(&kind)
    }
}

impl Default for RefFilter {
    fn default() -> Self {
        Self::all()
    }
}

impl FromStr for RefFilter {
    type Err = String;

    /// Parse a comma-separated list such as `local,relative`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.split(',')
            .filter(|part| !part.trim().is_empty())
            .map(str::parse)
            .collect::<Result<BTreeSet<_>, _>>()
            .map(|kinds| Self { kinds })
    }
}

/// What to put in place of a reference whose resolution would loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CircularPolicy {
    /// Keep `{"$ref": <uri>}` as an opaque token.
    #[default]
    Reference,
    /// Substitute `{"$circular": <target location>}`.
    Marker,
}

impl FromStr for CircularPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reference" => Ok(CircularPolicy::Reference),
            "marker" => Ok(CircularPolicy::Marker),
            _ => Err(format!(
                "unknown circular policy \"{}\": expected reference or marker",
                s
            )),
        }
    }
}

/// Options for reference resolution.
#[derive(Clone, Default)]
pub struct ResolveOptions {
    /// Location of the root document; relative references resolve from here.
    pub base: Option<Url>,
    /// Reference kinds to resolve. Others stay in the output untouched.
    pub filter: RefFilter,
    /// When false, any invalid reference fails the run once the walk is done.
    pub include_invalid: bool,
    /// When true, any reference error fails the run once the walk is done.
    pub strict: bool,
    pub circular: CircularPolicy,
    /// Customizes outgoing fetch requests (headers, auth).
    pub request_hook: Option<Arc<dyn RequestHook>>,
    /// Limit on the whole run, remote fetches included.
    pub timeout: Option<Duration>,
}

impl ResolveOptions {
    /// Best-effort options: resolve every kind, keep invalid references,
    /// never fail on reference errors.
    pub fn new() -> Self {
        Self {
            include_invalid: true,
            ..Self::default()
        }
    }

    pub fn base(mut self, base: Url) -> Self {
        self.base = Some(base);
        self
    }

    pub fn filter(mut self, filter: RefFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn include_invalid(mut self, include_invalid: bool) -> Self {
        self.include_invalid = include_invalid;
        self
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn circular(mut self, circular: CircularPolicy) -> Self {
        self.circular = circular;
        self
    }

    pub fn request_hook(mut self, hook: Arc<dyn RequestHook>) -> Self {
        self.request_hook = Some(hook);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl fmt::Debug for ResolveOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolveOptions")
            .field("base", &self.base)
            .field("filter", &self.filter)
            .field("include_invalid", &self.include_invalid)
            .field("strict", &self.strict)
            .field("circular", &self.circular)
            .field("request_hook", &self.request_hook.is_some())
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Outcome for one reference.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolutionResult {
    #[serde(rename = "type")]
    pub kind: RefKind,
    /// The raw `$ref` string.
    pub uri: String,
    /// The value spliced into the output (or the circular placeholder).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RefError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub circular: bool,
    /// The kind was excluded by the filter; nothing was resolved.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub filtered: bool,
    /// Document and pointer where the `$ref` itself was found.
    pub parent: Location,
}

impl ResolutionResult {
    /// True if this entry counts against strict mode.
    pub fn is_failure(&self) -> bool {
        self.error.is_some() && !self.filtered && !self.circular
    }
}

/// Resolution outcomes keyed by output location, in discovery order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReferenceSet {
    entries: Vec<(Pointer, ResolutionResult)>,
}

impl ReferenceSet {
    pub(crate) fn push(&mut self, location: Pointer, result: ResolutionResult) {
        self.entries.push((location, result));
    }

    /// Look up an entry by its stringified location (e.g. `#/a/0`).
    pub fn get(&self, location: &str) -> Option<&ResolutionResult> {
        self.entries
            .iter()
            .find(|(ptr, _)| ptr.to_string() == location)
            .map(|(_, result)| result)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Pointer, &ResolutionResult)> {
        self.entries.iter().map(|(ptr, result)| (ptr, result))
    }

    /// Stringified locations in discovery order.
    pub fn keys(&self) -> Vec<String> {
        self.entries.iter().map(|(ptr, _)| ptr.to_string()).collect()
    }
}

impl Serialize for ReferenceSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (ptr, result) in &self.entries {
            map.serialize_entry(&ptr.to_string(), result)?;
        }
        map.end()
    }
}

/// Remote cache counters for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Fetches actually issued (one per distinct URL).
    pub fetches: usize,
    /// Loads answered from the cache or by joining an in-flight fetch.
    pub hits: usize,
}

/// Result of a resolution run.
#[derive(Debug, Clone, Serialize)]
pub struct Resolution {
    /// The document with references replaced.
    pub resolved: Value,
    pub refs: ReferenceSet,
    #[serde(skip)]
    pub stats: CacheStats,
}
