//! Integration tests for reference resolution.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use json_refs::{
    find_refs, resolve_refs, resolve_refs_at, resolve_refs_with, walk, CircularPolicy,
    FetchRequest, Fetcher, LoadError, Location, Pointer, RefError, RefFilter, RefKind,
    ResolveError, ResolveOptions,
};
use serde_json::{json, Value};
use url::Url;

const ROOT: &str = "file:///specs/root.yaml";

/// Serves documents from memory and records every fetch.
struct MemoryFetcher {
    documents: HashMap<String, String>,
    calls: Mutex<Vec<String>>,
    delays: HashMap<String, Duration>,
}

impl MemoryFetcher {
    fn new(documents: &[(&str, &str)]) -> Self {
        Self {
            documents: documents
                .iter()
                .map(|(url, body)| (url.to_string(), body.to_string()))
                .collect(),
            calls: Mutex::new(Vec::new()),
            delays: HashMap::new(),
        }
    }

    /// Hold responses for `url` back by `delay`.
    fn with_delay(mut self, url: &str, delay: Duration) -> Self {
        self.delays.insert(url.to_string(), delay);
        self
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn count(&self, url: &str) -> usize {
        self.calls().iter().filter(|called| *called == url).count()
    }
}

#[async_trait]
impl Fetcher for MemoryFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<String, LoadError> {
        self.calls.lock().unwrap().push(request.url.to_string());
        if let Some(delay) = self.delays.get(request.url.as_str()) {
            tokio::time::sleep(*delay).await;
        }
        self.documents
            .get(request.url.as_str())
            .cloned()
            .ok_or_else(|| LoadError::Status {
                url: request.url.to_string(),
                status: 404,
            })
    }
}

fn rooted() -> ResolveOptions {
    ResolveOptions::new().base(Url::parse(ROOT).unwrap())
}

fn assert_no_refs(value: &Value) {
    let remaining: Vec<String> = walk(value)
        .references()
        .map(|(ptr, _)| ptr.to_string())
        .collect();
    assert!(remaining.is_empty(), "unresolved references at {:?}", remaining);
}

// === Local References ===

mod local {
    use super::*;

    #[tokio::test]
    async fn no_references_is_identity() {
        let doc = json!({ "type": "object", "list": [1, "two", null, { "k": true }] });
        let resolution = resolve_refs(&doc, &ResolveOptions::new()).await.unwrap();
        assert_eq!(resolution.resolved, doc);
        assert!(resolution.refs.is_empty());
    }

    #[tokio::test]
    async fn array_scenario() {
        let doc = json!({ "a": [ { "$ref": "#/b" }, { "$ref": "#/c" } ], "b": 1, "c": 2 });
        let resolution = resolve_refs(&doc, &ResolveOptions::new()).await.unwrap();

        assert_eq!(resolution.resolved, json!({ "a": [1, 2], "b": 1, "c": 2 }));
        assert_eq!(resolution.refs.keys(), ["#/a/0", "#/a/1"]);
        let first = resolution.refs.get("#/a/0").unwrap();
        assert_eq!(first.kind, RefKind::Local);
        assert_eq!(first.resolved, Some(json!(1)));
        assert_eq!(first.parent, Location::new(None, Pointer::parse("/a/0").unwrap()));
    }

    #[tokio::test]
    async fn missing_path_keeps_original_node() {
        let doc = json!({ "x": { "$ref": "#/no/such/path" } });
        let resolution = resolve_refs(&doc, &ResolveOptions::new()).await.unwrap();

        let x = resolution.refs.get("#/x").unwrap();
        assert_eq!(x.kind, RefKind::Local);
        assert!(x.resolved.is_none());
        assert!(matches!(
            &x.error,
            Some(RefError::PointerNotFound { found, .. }) if found == "#"
        ));
        assert_eq!(resolution.resolved["x"], json!({ "$ref": "#/no/such/path" }));

        let report = serde_json::to_value(&resolution.refs).unwrap();
        assert_eq!(report["#/x"]["type"], "local");
    }

    #[tokio::test]
    async fn escaped_pointer_tokens() {
        let doc = json!({
            "defs": { "a/b": { "c~d": "found" } },
            "x": { "$ref": "#/defs/a~1b/c~0d" }
        });
        let resolution = resolve_refs(&doc, &ResolveOptions::new()).await.unwrap();
        assert_eq!(resolution.resolved["x"], json!("found"));
    }

    #[tokio::test]
    async fn non_index_token_on_array() {
        let doc = json!({ "list": [1, 2], "x": { "$ref": "#/list/first" } });
        let resolution = resolve_refs(&doc, &ResolveOptions::new()).await.unwrap();
        assert!(matches!(
            resolution.refs.get("#/x").unwrap().error,
            Some(RefError::InvalidPointerToken { .. })
        ));
    }

    #[tokio::test]
    async fn nested_references_in_target_are_resolved() {
        let doc = json!({
            "pet": { "owner": { "$ref": "#/defs/person" } },
            "copy": { "$ref": "#/pet" },
            "defs": { "person": { "name": "sam" } }
        });
        let resolution = resolve_refs(&doc, &ResolveOptions::new()).await.unwrap();

        assert_eq!(
            resolution.resolved["copy"],
            json!({ "owner": { "name": "sam" } })
        );
        assert_eq!(
            resolution.refs.keys(),
            ["#/pet/owner", "#/copy", "#/copy/owner"]
        );
        assert_no_refs(&resolution.resolved);
    }

    #[tokio::test]
    async fn sibling_keys_are_ignored() {
        let doc = json!({
            "a": { "$ref": "#/b", "description": "ignored", "extra": { "$ref": "#/missing" } },
            "b": 1
        });
        let resolution = resolve_refs(&doc, &ResolveOptions::new()).await.unwrap();

        assert_eq!(resolution.resolved["a"], json!(1));
        assert_eq!(resolution.refs.keys(), ["#/a"]);
        let warning = resolution.refs.get("#/a").unwrap().warning.clone().unwrap();
        assert!(warning.contains("description"));
        assert!(warning.contains("extra"));
    }

    #[tokio::test]
    async fn input_is_not_modified() {
        let doc = json!({ "a": { "$ref": "#/b" }, "b": { "c": 1 } });
        let before = doc.clone();
        let mut resolution = resolve_refs(&doc, &ResolveOptions::new()).await.unwrap();

        resolution.resolved["a"]["c"] = json!(2);
        assert_eq!(doc, before);
    }

    #[tokio::test]
    async fn unknown_scheme_is_left_alone() {
        let doc = json!({ "a": { "$ref": "urn:example:pet" } });
        let resolution = resolve_refs(&doc, &ResolveOptions::new()).await.unwrap();

        let a = resolution.refs.get("#/a").unwrap();
        assert_eq!(a.kind, RefKind::Unknown);
        assert!(a.warning.is_some());
        assert!(a.error.is_none());
        assert_eq!(resolution.resolved, doc);
    }
}

// === Invalid References ===

mod invalid {
    use super::*;

    #[tokio::test]
    async fn malformed_authority_is_never_fetched() {
        let fetcher = MemoryFetcher::new(&[]);
        let doc = json!({ "bad": { "$ref": "http://:8080" } });
        let resolution = resolve_refs_with(&doc, &rooted(), &fetcher).await.unwrap();

        let bad = resolution.refs.get("#/bad").unwrap();
        assert_eq!(bad.kind, RefKind::Invalid);
        assert!(matches!(bad.error, Some(RefError::InvalidReference { .. })));
        assert_eq!(resolution.resolved, doc);
        assert!(fetcher.calls().is_empty());
    }

    #[tokio::test]
    async fn malformed_fragments_are_not_resolved() {
        let fetcher = MemoryFetcher::new(&[("https://example.com/x.json", r#"{"a": 1}"#)]);
        let doc = json!({
            "escape": { "$ref": "#/a%+1" },
            "hash": { "$ref": "##/a" },
            "remote": { "$ref": "https://example.com/x.json##/a" },
            "a": 1
        });
        let resolution = resolve_refs_with(&doc, &ResolveOptions::new(), &fetcher)
            .await
            .unwrap();

        for key in ["#/escape", "#/hash", "#/remote"] {
            assert_eq!(resolution.refs.get(key).unwrap().kind, RefKind::Invalid, "{key}");
        }
        assert_eq!(resolution.resolved, doc);
        assert!(fetcher.calls().is_empty());
    }

    #[tokio::test]
    async fn invalid_fragment() {
        let doc = json!({ "bad": { "$ref": "#no-slash" } });
        let resolution = resolve_refs(&doc, &ResolveOptions::new()).await.unwrap();
        assert_eq!(resolution.refs.get("#/bad").unwrap().kind, RefKind::Invalid);
    }

    #[tokio::test]
    async fn excluded_invalid_fails_the_run() {
        let doc = json!({ "ok": { "$ref": "#/v" }, "bad": { "$ref": "http://:8080" }, "v": 1 });
        let options = ResolveOptions::new().include_invalid(false);
        let err = resolve_refs(&doc, &options).await.unwrap_err();

        assert_eq!(err.exit_code(), 1);
        match &err {
            ResolveError::ReferencesFailed { failed, .. } => assert_eq!(failed, &["#/bad"]),
            other => panic!("unexpected error: {other}"),
        }
        let resolution = err.resolution().unwrap();
        assert_eq!(resolution.resolved["ok"], json!(1));
    }

    #[tokio::test]
    async fn invalid_is_reported_even_when_filtered_out() {
        let doc = json!({ "bad": { "$ref": "http://:8080" } });
        let options = ResolveOptions::new().filter(RefFilter::only([RefKind::Local]));
        let resolution = resolve_refs(&doc, &options).await.unwrap();

        let bad = resolution.refs.get("#/bad").unwrap();
        assert!(!bad.filtered);
        assert!(bad.error.is_some());
    }
}

// === Circular References ===

mod circular {
    use super::*;

    #[tokio::test]
    async fn root_reference() {
        let doc = json!({ "root": { "$ref": "#" }, "name": "doc" });
        let resolution = resolve_refs(&doc, &ResolveOptions::new()).await.unwrap();

        let root = resolution.refs.get("#/root").unwrap();
        assert!(root.circular);
        assert!(root.error.is_none());
        assert_eq!(resolution.resolved["root"], json!({ "$ref": "#" }));
    }

    #[tokio::test]
    async fn self_reference() {
        let doc = json!({ "a": { "$ref": "#/a" } });
        let resolution = resolve_refs(&doc, &ResolveOptions::new()).await.unwrap();
        assert!(resolution.refs.get("#/a").unwrap().circular);
    }

    #[tokio::test]
    async fn ancestor_reference_with_marker() {
        let doc = json!({ "tree": { "children": [ { "$ref": "#/tree" } ] } });
        let options = ResolveOptions::new().circular(CircularPolicy::Marker);
        let resolution = resolve_refs(&doc, &options).await.unwrap();

        assert_eq!(
            resolution.resolved["tree"]["children"][0],
            json!({ "$circular": "#/tree" })
        );
        assert!(resolution.refs.get("#/tree/children/0").unwrap().circular);
    }

    #[tokio::test]
    async fn recursion_is_expanded_one_level() {
        let doc = json!({
            "defs": { "node": { "next": { "$ref": "#/defs/node" } } },
            "head": { "$ref": "#/defs/node" }
        });
        let resolution = resolve_refs(&doc, &ResolveOptions::new()).await.unwrap();

        assert_eq!(
            resolution.resolved["head"],
            json!({ "next": { "$ref": "#/defs/node" } })
        );
        assert!(!resolution.refs.get("#/head").unwrap().circular);
        assert!(resolution.refs.get("#/head/next").unwrap().circular);
    }

    #[tokio::test]
    async fn strict_mode_accepts_circular() {
        let doc = json!({ "root": { "$ref": "#" } });
        let options = ResolveOptions::new().strict(true);
        assert!(resolve_refs(&doc, &options).await.is_ok());
    }

    #[tokio::test]
    async fn cycle_across_documents() {
        let fetcher = MemoryFetcher::new(&[
            ("file:///specs/a.json", r#"{ "next": { "$ref": "b.json" } }"#),
            ("file:///specs/b.json", r#"{ "back": { "$ref": "a.json" } }"#),
        ]);
        let doc = json!({ "x": { "$ref": "a.json" } });
        let resolution = resolve_refs_with(&doc, &rooted(), &fetcher).await.unwrap();

        assert_eq!(
            resolution.resolved["x"],
            json!({ "next": { "back": { "$ref": "a.json" } } })
        );
        assert_eq!(resolution.refs.keys(), ["#/x", "#/x/next", "#/x/next/back"]);
        assert!(resolution.refs.get("#/x/next/back").unwrap().circular);
        assert_eq!(fetcher.count("file:///specs/a.json"), 1);
        assert_eq!(fetcher.count("file:///specs/b.json"), 1);
    }
}

// === Remote and Relative References ===

mod remote {
    use super::*;

    const NESTED: &str = "name: pet\nage: 3\n";

    #[tokio::test]
    async fn relative_fragment_fetches_once() {
        let fetcher = MemoryFetcher::new(&[("file:///specs/nested.yaml", NESTED)]);
        let doc = json!({
            "name": { "$ref": "./nested.yaml#/name" },
            "age": { "$ref": "./nested.yaml#/age" },
            "whole": { "$ref": "nested.yaml" }
        });
        let resolution = resolve_refs_with(&doc, &rooted(), &fetcher).await.unwrap();

        assert_eq!(
            resolution.resolved,
            json!({ "name": "pet", "age": 3, "whole": { "name": "pet", "age": 3 } })
        );
        assert_eq!(fetcher.calls(), ["file:///specs/nested.yaml"]);
        assert_eq!(resolution.stats.fetches, 1);
        assert_eq!(resolution.stats.hits, 2);

        let name = resolution.refs.get("#/name").unwrap();
        assert_eq!(name.kind, RefKind::Relative);
        assert_eq!(name.uri, "./nested.yaml#/name");
    }

    #[tokio::test]
    async fn concurrent_references_share_one_fetch() {
        let fetcher = MemoryFetcher::new(&[("https://example.com/pet.json", r#"{"id": 1}"#)])
            .with_delay("https://example.com/pet.json", Duration::from_millis(20));
        let doc = json!({
            "a": { "$ref": "https://example.com/pet.json" },
            "b": { "$ref": "https://example.com/pet.json#/id" },
            "c": [ { "$ref": "https://example.com/pet.json" } ]
        });
        let resolution = resolve_refs_with(&doc, &ResolveOptions::new(), &fetcher)
            .await
            .unwrap();

        assert_eq!(fetcher.count("https://example.com/pet.json"), 1);
        assert_eq!(resolution.resolved["b"], json!(1));
        assert_eq!(resolution.refs.get("#/a").unwrap().kind, RefKind::Remote);
    }

    #[tokio::test]
    async fn report_order_ignores_fetch_completion_order() {
        let fetcher = MemoryFetcher::new(&[
            ("https://example.com/slow.json", r#"{"v": "slow"}"#),
            ("https://example.com/fast.json", r#"{"v": "fast"}"#),
        ])
        .with_delay("https://example.com/slow.json", Duration::from_millis(100));
        let doc = json!({
            "a": { "$ref": "https://example.com/slow.json#/v" },
            "b": { "$ref": "https://example.com/fast.json#/v" },
            "c": { "$ref": "#/d" },
            "d": "local"
        });
        let resolution = resolve_refs_with(&doc, &ResolveOptions::new(), &fetcher)
            .await
            .unwrap();

        assert_eq!(resolution.refs.keys(), ["#/a", "#/b", "#/c"]);
        assert_eq!(
            resolution.resolved,
            json!({ "a": "slow", "b": "fast", "c": "local", "d": "local" })
        );
        assert_eq!(
            serde_json::to_value(&resolution.refs)
                .unwrap()
                .as_object()
                .unwrap()
                .keys()
                .collect::<Vec<_>>(),
            ["#/a", "#/b", "#/c"]
        );
    }

    #[tokio::test]
    async fn nested_references_keep_their_document() {
        let fetcher = MemoryFetcher::new(&[(
            "file:///specs/nested.yaml",
            "wrapper:\n  inner:\n    $ref: '#/defs/pet'\ndefs:\n  pet:\n    name: rex\n",
        )]);
        let doc = json!({ "w": { "$ref": "./nested.yaml#/wrapper" } });
        let resolution = resolve_refs_with(&doc, &rooted(), &fetcher).await.unwrap();

        assert_eq!(
            resolution.resolved["w"],
            json!({ "inner": { "name": "rex" } })
        );
        assert_eq!(resolution.refs.keys(), ["#/w", "#/w/inner"]);

        let inner = resolution.refs.get("#/w/inner").unwrap();
        assert_eq!(inner.kind, RefKind::Local);
        assert_eq!(
            inner.parent,
            Location::new(
                Some(Url::parse("file:///specs/nested.yaml").unwrap()),
                Pointer::parse("/wrapper/inner").unwrap()
            )
        );
    }

    #[tokio::test]
    async fn relative_reference_from_fetched_document() {
        let fetcher = MemoryFetcher::new(&[
            ("file:///specs/sub/a.json", r#"{ "b": { "$ref": "./b.json#/v" } }"#),
            ("file:///specs/sub/b.json", r#"{ "v": "deep" }"#),
        ]);
        let doc = json!({ "x": { "$ref": "sub/a.json" } });
        let resolution = resolve_refs_with(&doc, &rooted(), &fetcher).await.unwrap();

        assert_eq!(resolution.resolved["x"], json!({ "b": "deep" }));
        assert_eq!(fetcher.count("file:///specs/sub/b.json"), 1);
    }

    #[tokio::test]
    async fn load_failure_is_attached_to_every_dependent() {
        let fetcher = MemoryFetcher::new(&[]);
        let doc = json!({
            "a": { "$ref": "./missing.json#/a" },
            "b": { "$ref": "./missing.json#/b" },
            "c": { "$ref": "#/d" },
            "d": "ok"
        });
        let resolution = resolve_refs_with(&doc, &rooted(), &fetcher).await.unwrap();

        for key in ["#/a", "#/b"] {
            assert!(matches!(
                resolution.refs.get(key).unwrap().error,
                Some(RefError::RemoteLoadFailure { .. })
            ));
        }
        assert_eq!(resolution.resolved["c"], json!("ok"));
        assert_eq!(fetcher.count("file:///specs/missing.json"), 1);
    }

    #[tokio::test]
    async fn relative_without_base() {
        let fetcher = MemoryFetcher::new(&[]);
        let doc = json!({ "a": { "$ref": "./other.json" } });
        let resolution = resolve_refs_with(&doc, &ResolveOptions::new(), &fetcher)
            .await
            .unwrap();

        assert!(matches!(
            resolution.refs.get("#/a").unwrap().error,
            Some(RefError::MissingBase { .. })
        ));
        assert!(fetcher.calls().is_empty());
    }

    #[tokio::test]
    async fn reference_back_into_root_uses_seeded_document() {
        let fetcher = MemoryFetcher::new(&[]);
        let doc = json!({ "a": { "$ref": "root.yaml#/b" }, "b": 5 });
        let resolution = resolve_refs_with(&doc, &rooted(), &fetcher).await.unwrap();

        assert_eq!(resolution.resolved["a"], json!(5));
        assert!(fetcher.calls().is_empty());
    }

    #[tokio::test]
    async fn resolve_at_location() {
        let fetcher = MemoryFetcher::new(&[
            (ROOT, "pet:\n  $ref: 'root.yaml#/defs/pet'\ndefs:\n  pet: cat\n"),
        ]);
        let resolution = resolve_refs_at(&Url::parse(ROOT).unwrap(), &ResolveOptions::new(), &fetcher)
            .await
            .unwrap();

        assert_eq!(resolution.resolved["pet"], json!("cat"));
        assert_eq!(resolution.stats.fetches, 1);
        assert_eq!(resolution.stats.hits, 1);
    }

    #[tokio::test]
    async fn resolve_at_missing_location() {
        let fetcher = MemoryFetcher::new(&[]);
        let err = resolve_refs_at(&Url::parse(ROOT).unwrap(), &ResolveOptions::new(), &fetcher)
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::Load(LoadError::Status { status: 404, .. })));
        assert_eq!(err.exit_code(), 3);
    }

    #[tokio::test]
    async fn each_run_starts_with_an_empty_cache() {
        let fetcher = MemoryFetcher::new(&[("file:///specs/nested.yaml", NESTED)]);
        let doc = json!({ "name": { "$ref": "./nested.yaml#/name" } });

        resolve_refs_with(&doc, &rooted(), &fetcher).await.unwrap();
        resolve_refs_with(&doc, &rooted(), &fetcher).await.unwrap();

        assert_eq!(fetcher.count("file:///specs/nested.yaml"), 2);
    }

    #[tokio::test]
    async fn timeout_fails_the_run() {
        let fetcher = MemoryFetcher::new(&[("https://example.com/slow.json", "{}")])
            .with_delay("https://example.com/slow.json", Duration::from_secs(5));
        let doc = json!({ "a": { "$ref": "https://example.com/slow.json" } });
        let options = ResolveOptions::new().timeout(Duration::from_millis(50));

        let err = resolve_refs_with(&doc, &options, &fetcher).await.unwrap_err();
        assert!(matches!(err, ResolveError::Timeout { .. }));
    }
}

// === Filtering and Strict Mode ===

mod options {
    use super::*;

    #[tokio::test]
    async fn filter_leaves_other_kinds_untouched() {
        let fetcher = MemoryFetcher::new(&[("file:///specs/nested.yaml", "name: pet\n")]);
        let doc = json!({
            "local": { "$ref": "#/v" },
            "rel": { "$ref": "./nested.yaml#/name" },
            "v": 1
        });
        let options = rooted().filter(RefFilter::only([RefKind::Local]));
        let resolution = resolve_refs_with(&doc, &options, &fetcher).await.unwrap();

        assert_eq!(resolution.resolved["local"], json!(1));
        assert_eq!(resolution.resolved["rel"], json!({ "$ref": "./nested.yaml#/name" }));
        let rel = resolution.refs.get("#/rel").unwrap();
        assert!(rel.filtered);
        assert!(rel.resolved.is_none());
        assert!(fetcher.calls().is_empty());
    }

    #[tokio::test]
    async fn filtered_in_kinds_leave_no_references() {
        let doc = json!({
            "a": { "$ref": "#/b" },
            "b": { "c": { "$ref": "#/d" } },
            "d": [1, 2]
        });
        let options = ResolveOptions::new().filter(RefFilter::only([RefKind::Local]));
        let resolution = resolve_refs(&doc, &options).await.unwrap();
        assert_no_refs(&resolution.resolved);
    }

    #[tokio::test]
    async fn strict_mode_fails_with_report() {
        let doc = json!({ "x": { "$ref": "#/missing" }, "y": { "$ref": "#/z" }, "z": 1 });
        let options = ResolveOptions::new().strict(true);
        let err = resolve_refs(&doc, &options).await.unwrap_err();

        match &err {
            ResolveError::ReferencesFailed { failed, resolution } => {
                assert_eq!(failed, &["#/x"]);
                assert_eq!(resolution.resolved["y"], json!(1));
                assert_eq!(resolution.refs.len(), 2);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(err.exit_code(), 1);
    }

    #[tokio::test]
    async fn strict_mode_ignores_filtered() {
        let doc = json!({ "x": { "$ref": "./nowhere.json" } });
        let options = ResolveOptions::new()
            .strict(true)
            .filter(RefFilter::only([RefKind::Local]));
        assert!(resolve_refs(&doc, &options).await.is_ok());
    }

    #[test]
    fn find_refs_lists_without_fetching() {
        let doc = json!({
            "a": { "$ref": "#/b" },
            "list": [ { "$ref": "./pet.yaml#/name" } ],
            "remote": { "$ref": "https://example.com/pet.json" }
        });
        let refs = find_refs(&doc, &rooted());

        let summary: Vec<(String, RefKind)> = refs
            .iter()
            .map(|r| (r.location.to_string(), r.kind))
            .collect();
        assert_eq!(
            summary,
            [
                ("#/a".to_string(), RefKind::Local),
                ("#/list/0".to_string(), RefKind::Relative),
                ("#/remote".to_string(), RefKind::Remote),
            ]
        );
        assert_eq!(
            refs[1].document.as_ref().map(Url::as_str),
            Some("file:///specs/pet.yaml")
        );
        assert_eq!(refs[1].pointer, Pointer::from_tokens(["name"]));
    }
}
