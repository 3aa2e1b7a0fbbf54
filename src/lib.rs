//! JSON Reference Resolver
//!
//! Resolves JSON References (`{"$ref": "..."}`) found anywhere in a JSON or
//! YAML document, producing a dereferenced copy of the document and a report
//! describing every reference found.
//!
//! # Example
//!
//! ```
//! use json_refs::{resolve_refs, ResolveOptions};
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let doc = json!({
//!     "a": [ { "$ref": "#/b" }, { "$ref": "#/c" } ],
//!     "b": 1,
//!     "c": 2
//! });
//!
//! let resolution = resolve_refs(&doc, &ResolveOptions::new()).await.unwrap();
//!
//! assert_eq!(resolution.resolved, json!({ "a": [1, 2], "b": 1, "c": 2 }));
//! assert_eq!(resolution.refs.keys(), ["#/a/0", "#/a/1"]);
//! # }
//! ```
//!
//! # Reference Kinds
//!
//! | `$ref`                         | Kind       | Resolved against               |
//! |--------------------------------|------------|--------------------------------|
//! | `#/definitions/Pet`            | `local`    | the containing document        |
//! | `./pet.yaml#/name`             | `relative` | the containing document's URL  |
//! | `https://host/pet.json`        | `remote`   | the fetched document           |
//! | `http://:8080`                 | `invalid`  | nothing, an error is recorded  |
//! | `urn:example:pet`              | `unknown`  | nothing, a warning is recorded |
//!
//! Keys next to `$ref` in a reference object are ignored, and references
//! that would loop are cut short with a placeholder and marked circular.

mod cache;
mod circular;
mod error;
mod loader;
mod pointer;
mod reference;
mod resolver;
mod types;
mod walker;

pub use cache::RemoteCache;
pub use circular::InFlight;
pub use error::{LoadError, RefError, ResolveError};
pub use loader::{
    is_url, load_document_str, parse_document, to_location, DefaultFetcher, FetchRequest,
    Fetcher, HeaderHook, RequestHook,
};
pub use pointer::{resolve as resolve_pointer, Pointer};
pub use reference::{classify, RefKind, Reference};
pub use resolver::{find_refs, resolve_refs, resolve_refs_at, resolve_refs_with};
pub use types::{
    CacheStats, CircularPolicy, Location, RefFilter, ReferenceSet, Resolution, ResolutionResult,
    ResolveOptions,
};
pub use walker::{is_reference, walk, Node, RefNode, Visit, Walk};
