//! Reference resolution - replaces JSON References with the values they point to.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{join_all, BoxFuture, FutureExt};
use serde_json::{json, Value};
use tracing::debug;
use url::Url;

use crate::cache::{normalize, RemoteCache};
use crate::circular::InFlight;
use crate::error::{RefError, ResolveError};
use crate::loader::{DefaultFetcher, Fetcher};
use crate::pointer::{self, Pointer};
use crate::reference::{RefKind, Reference};
use crate::types::{
    CircularPolicy, Location, ReferenceSet, Resolution, ResolutionResult, ResolveOptions,
};
use crate::walker::{walk, RefNode};

/// Resolve every reference in `document`.
///
/// Remote and relative references are loaded with [`DefaultFetcher`].
/// See [`resolve_refs_with`].
pub async fn resolve_refs(
    document: &Value,
    options: &ResolveOptions,
) -> Result<Resolution, ResolveError> {
    resolve_refs_with(document, options, &DefaultFetcher::new()).await
}

/// Resolve every reference in `document`, loading other documents through
/// `fetcher`.
///
/// The input is never modified. Per-reference failures are recorded in the
/// returned report.
///
/// # Errors
///
/// Returns `ResolveError::Timeout` if `options.timeout` elapses, and
/// `ResolveError::ReferencesFailed` (carrying the full report) when strict
/// mode is on and a reference failed, or when invalid references are
/// excluded and one was found.
pub async fn resolve_refs_with(
    document: &Value,
    options: &ResolveOptions,
    fetcher: &dyn Fetcher,
) -> Result<Resolution, ResolveError> {
    let engine = Engine::new(options, fetcher);
    let resolution = with_timeout(options.timeout, async {
        if let Some(base) = &options.base {
            engine.cache.seed(base, Arc::new(document.clone())).await;
        }
        let root = Doc {
            url: options.base.as_ref().map(normalize),
            value: document,
        };
        Ok::<_, ResolveError>(engine.run(&root).await)
    })
    .await?;
    check_failures(resolution, options)
}

/// Load the document at `location` and resolve it, using `location` as the
/// base for relative references.
///
/// # Errors
///
/// Fails with `ResolveError::Load` if the document itself cannot be loaded
/// or parsed, otherwise as [`resolve_refs_with`].
pub async fn resolve_refs_at(
    location: &Url,
    options: &ResolveOptions,
    fetcher: &dyn Fetcher,
) -> Result<Resolution, ResolveError> {
    let options = options.clone().base(normalize(location));
    let engine = Engine::new(&options, fetcher);
    let resolution = with_timeout(options.timeout, async {
        let document = engine.cache.load(location).await?;
        let root = Doc {
            url: Some(normalize(location)),
            value: &document,
        };
        Ok::<_, ResolveError>(engine.run(&root).await)
    })
    .await?;
    check_failures(resolution, &options)
}

/// List the references in `document` without resolving them.
///
/// Kinds excluded by `options.filter` are skipped; invalid references are
/// always listed.
pub fn find_refs(document: &Value, options: &ResolveOptions) -> Vec<Reference> {
    walk(document)
        .references()
        .map(|(location, node)| Reference::from_node(location, &node, options.base.as_ref()))
        .filter(|r| r.kind == RefKind::Invalid || options.filter.contains(r.kind))
        .collect()
}

/// A document being resolved against.
struct Doc<'d> {
    /// `None` only for a root document without a base location.
    url: Option<Url>,
    value: &'d Value,
}

/// How following one reference ended.
enum Outcome {
    Resolved(Value),
    Circular(Value),
    Failed(RefError),
}

type Entry = (Pointer, ResolutionResult);

struct Engine<'a> {
    options: &'a ResolveOptions,
    cache: RemoteCache<'a>,
}

impl<'a> Engine<'a> {
    fn new(options: &'a ResolveOptions, fetcher: &'a dyn Fetcher) -> Self {
        let hook = options.request_hook.as_deref();
        Self {
            options,
            cache: RemoteCache::new(fetcher, hook),
        }
    }

    /// Resolve all references of the root document.
    ///
    /// Each top-level reference resolves as its own future with its own
    /// in-flight stack, so fetches for distinct URLs overlap. Results are
    /// collected in walk order regardless of completion order.
    async fn run(&self, root: &Doc<'_>) -> Resolution {
        let chains = walk(root.value).references().map(move |(location, node)| async move {
            let mut stack = InFlight::new();
            let mut entries = Vec::new();
            let value = self
                .resolve_node(
                    root,
                    location.clone(),
                    node,
                    location.clone(),
                    &mut stack,
                    &mut entries,
                )
                .await;
            (location, value, entries)
        });
        let settled = join_all(chains).await;

        let mut resolved = root.value.clone();
        let mut refs = ReferenceSet::default();
        for (location, value, entries) in settled {
            splice(&mut resolved, &location, value);
            for (ptr, result) in entries {
                refs.push(ptr, result);
            }
        }

        let stats = self.cache.stats();
        debug!(
            refs = refs.len(),
            fetches = stats.fetches,
            hits = stats.hits,
            "resolution finished"
        );
        Resolution {
            resolved,
            refs,
            stats,
        }
    }

    /// Resolve the reference object `node`, found at `location` in `doc`.
    ///
    /// `out` is where the result lands in the output document. Pushes this
    /// reference's report entry, followed by entries for references nested
    /// in its target, and returns the value to splice at `out`.
    fn resolve_node<'f>(
        &'f self,
        doc: &'f Doc<'f>,
        location: Pointer,
        node: RefNode<'f>,
        out: Pointer,
        stack: &'f mut InFlight,
        report: &'f mut Vec<Entry>,
    ) -> BoxFuture<'f, Value> {
        async move {
            let original = Value::Object(node.object.clone());
            let reference = Reference::from_node(location, &node, doc.url.as_ref());
            let mut result = ResolutionResult {
                kind: reference.kind,
                uri: reference.uri.clone(),
                resolved: None,
                error: reference.error.clone(),
                warning: reference.warning.clone(),
                circular: false,
                filtered: false,
                parent: Location::new(doc.url.clone(), reference.location.clone()),
            };

            if reference.kind != RefKind::Invalid && !self.options.filter.contains(reference.kind)
            {
                result.filtered = true;
            }
            let skip = reference.kind == RefKind::Invalid
                || reference.kind == RefKind::Unknown
                || result.filtered
                || result.error.is_some();
            if skip {
                report.push((out, result));
                return original;
            }

            let mut nested = Vec::new();
            let value = match self.follow(doc, &reference, &out, stack, &mut nested).await {
                Outcome::Resolved(value) => {
                    result.resolved = Some(value.clone());
                    value
                }
                Outcome::Circular(placeholder) => {
                    result.circular = true;
                    result.resolved = Some(placeholder.clone());
                    placeholder
                }
                Outcome::Failed(error) => {
                    result.error = Some(error);
                    original
                }
            };

            report.push((out, result));
            report.extend(nested);
            value
        }
        .boxed()
    }

    /// Follow `reference` (found in `doc`) to its target value.
    ///
    /// A target that is itself a reference is followed in turn; a target
    /// containing references has them resolved before it is returned.
    fn follow<'f>(
        &'f self,
        doc: &'f Doc<'f>,
        reference: &'f Reference,
        out: &'f Pointer,
        stack: &'f mut InFlight,
        nested: &'f mut Vec<Entry>,
    ) -> BoxFuture<'f, Outcome> {
        async move {
            let mut frame = stack.enter(Location::new(doc.url.clone(), reference.location.clone()));

            let target_url = if reference.kind.is_remote() {
                reference.document.clone()
            } else {
                doc.url.clone()
            };
            let target = Location::new(target_url.clone(), reference.pointer.clone());
            if frame.is_circular(&target) {
                debug!(location = %out, target = %target, "circular reference");
                return Outcome::Circular(self.placeholder(reference, &target));
            }

            let loaded: Arc<Value>;
            let target_root = if !reference.kind.is_remote() {
                doc.value
            } else if let Some(url) = &reference.document {
                match self.cache.load(url).await {
                    Ok(document) => {
                        loaded = document;
                        &*loaded
                    }
                    Err(e) => return Outcome::Failed(e.into()),
                }
            } else {
                return Outcome::Failed(RefError::MissingBase {
                    uri: reference.uri.clone(),
                });
            };
            let target_doc = Doc {
                url: target_url,
                value: target_root,
            };

            let value = match pointer::resolve(target_doc.value, &reference.pointer) {
                Ok(value) => value,
                Err(e) => return Outcome::Failed(e),
            };

            let Some(next) = RefNode::new(value) else {
                let expanded = self
                    .expand(&target_doc, value, &reference.pointer, out, &mut frame, nested)
                    .await;
                return Outcome::Resolved(expanded);
            };

            // The target is itself a reference: follow it without a separate
            // report entry, since it would land at the same output location.
            let chained =
                Reference::from_node(reference.pointer.clone(), &next, target_doc.url.as_ref());
            if let Some(error) = &chained.error {
                return Outcome::Failed(error.clone());
            }
            if chained.kind == RefKind::Unknown || !self.options.filter.contains(chained.kind) {
                return Outcome::Resolved(value.clone());
            }
            self.follow(&target_doc, &chained, out, &mut frame, nested)
                .await
        }
        .boxed()
    }

    /// Copy `value` (found at `source` in `doc`) with every reference inside
    /// it resolved. `out` is where `value` lands in the output document.
    async fn expand(
        &self,
        doc: &Doc<'_>,
        value: &Value,
        source: &Pointer,
        out: &Pointer,
        stack: &mut InFlight,
        report: &mut Vec<Entry>,
    ) -> Value {
        let mut expanded = value.clone();
        for (relative, node) in walk(value).references() {
            let resolved = self
                .resolve_node(
                    doc,
                    source.join(&relative),
                    node,
                    out.join(&relative),
                    stack,
                    report,
                )
                .await;
            splice(&mut expanded, &relative, resolved);
        }
        expanded
    }

    fn placeholder(&self, reference: &Reference, target: &Location) -> Value {
        match self.options.circular {
            CircularPolicy::Reference => json!({ "$ref": reference.uri }),
            CircularPolicy::Marker => json!({ "$circular": target.to_string() }),
        }
    }
}

/// Replace the value at `location` in `document`.
fn splice(document: &mut Value, location: &Pointer, value: Value) {
    if location.is_root() {
        *document = value;
    } else if let Some(slot) = document.pointer_mut(&location.to_json_pointer()) {
        *slot = value;
    }
}

async fn with_timeout<T>(
    timeout: Option<Duration>,
    run: impl Future<Output = Result<T, ResolveError>>,
) -> Result<T, ResolveError> {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, run)
            .await
            .map_err(|_| ResolveError::Timeout { timeout: limit })?,
        None => run.await,
    }
}

/// Apply strict mode and invalid-reference exclusion to a finished run.
fn check_failures(
    resolution: Resolution,
    options: &ResolveOptions,
) -> Result<Resolution, ResolveError> {
    let failed: Vec<String> = resolution
        .refs
        .iter()
        .filter(|(_, result)| {
            (options.strict && result.is_failure())
                || (!options.include_invalid && result.kind == RefKind::Invalid)
        })
        .map(|(location, _)| location.to_string())
        .collect();

    if failed.is_empty() {
        Ok(resolution)
    } else {
        Err(ResolveError::ReferencesFailed {
            failed,
            resolution: Box::new(resolution),
        })
    }
}
