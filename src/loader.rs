//! Document loading.
//!
//! The [`Fetcher`] trait is the capability boundary for retrieving raw
//! document text. [`DefaultFetcher`] handles `file://` URLs and, with the
//! `remote` feature, `http://` and `https://`. Parsing, caching and deciding
//! when to fetch stay in this crate.

use std::path::Path;

use async_trait::async_trait;
use serde_json::Value;
use url::Url;

use crate::error::{LoadError, ResolveError};

#[cfg(feature = "remote")]
use std::time::Duration;

/// Default timeout for HTTP requests (10 seconds).
#[cfg(feature = "remote")]
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// An outgoing fetch, after the request hook has run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub url: Url,
    pub headers: Vec<(String, String)>,
}

impl FetchRequest {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            headers: Vec::new(),
        }
    }

    pub fn header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.push((name.into(), value.into()));
    }
}

/// Customizes a request before it is handed to the fetcher.
pub trait RequestHook: Send + Sync {
    fn prepare(&self, request: &mut FetchRequest);
}

impl<F> RequestHook for F
where
    F: Fn(&mut FetchRequest) + Send + Sync,
{
    fn prepare(&self, request: &mut FetchRequest) {
        self(request)
    }
}

/// Adds a fixed set of headers to every request.
#[derive(Debug, Clone, Default)]
pub struct HeaderHook {
    headers: Vec<(String, String)>,
}

impl HeaderHook {
    pub fn new(headers: Vec<(String, String)>) -> Self {
        Self { headers }
    }

    /// Parse a `Name: value` header line.
    pub fn parse_header(line: &str) -> Result<(String, String), String> {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| format!("invalid header \"{}\": expected 'Name: value'", line))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(format!("invalid header \"{}\": empty name", line));
        }
        Ok((name.to_string(), value.trim().to_string()))
    }
}

impl RequestHook for HeaderHook {
    fn prepare(&self, request: &mut FetchRequest) {
        for (name, value) in &self.headers {
            request.header(name.clone(), value.clone());
        }
    }
}

/// Retrieves raw document text for a URL.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> Result<String, LoadError>;
}

/// Fetches `file://` URLs from disk and `http(s)://` URLs over the network.
///
/// The HTTP client is built on first use and shared by every fetch made
/// through this value, so connections are pooled across URLs.
#[derive(Debug, Clone, Default)]
pub struct DefaultFetcher {
    #[cfg(feature = "remote")]
    client: tokio::sync::OnceCell<reqwest::Client>,
}

impl DefaultFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(feature = "remote")]
    async fn client(&self, url: &Url) -> Result<&reqwest::Client, LoadError> {
        self.client
            .get_or_try_init(|| async move {
                reqwest::Client::builder()
                    .timeout(HTTP_TIMEOUT)
                    .build()
                    .map_err(|source| network_error(url, source))
            })
            .await
    }
}

#[async_trait]
impl Fetcher for DefaultFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<String, LoadError> {
        match request.url.scheme() {
            "file" => fetch_file(&request.url).await,
            #[cfg(feature = "remote")]
            "http" | "https" => fetch_http(self.client(&request.url).await?, request).await,
            scheme => Err(LoadError::UnsupportedScheme {
                url: request.url.to_string(),
                scheme: scheme.to_string(),
            }),
        }
    }
}

async fn fetch_file(url: &Url) -> Result<String, LoadError> {
    let path = url.to_file_path().map_err(|()| LoadError::Io {
        url: url.to_string(),
        message: "not a local file path".to_string(),
    })?;
    tokio::fs::read_to_string(&path)
        .await
        .map_err(|source| LoadError::Io {
            url: url.to_string(),
            message: source.to_string(),
        })
}

#[cfg(feature = "remote")]
async fn fetch_http(
    client: &reqwest::Client,
    request: &FetchRequest,
) -> Result<String, LoadError> {
    let mut builder = client.get(request.url.clone());
    for (name, value) in &request.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }

    let response = builder
        .send()
        .await
        .map_err(|source| network_error(&request.url, source))?;

    // Check for HTTP errors before reading the body
    let status = response.status();
    if !status.is_success() {
        return Err(LoadError::Status {
            url: request.url.to_string(),
            status: status.as_u16(),
        });
    }

    response
        .text()
        .await
        .map_err(|source| network_error(&request.url, source))
}

#[cfg(feature = "remote")]
fn network_error(url: &Url, source: reqwest::Error) -> LoadError {
    LoadError::Network {
        url: url.to_string(),
        message: source.to_string(),
    }
}

/// Parse document text as JSON, falling back to YAML.
pub fn parse_document(content: &str) -> Result<Value, String> {
    match serde_json::from_str(content) {
        Ok(value) => Ok(value),
        Err(json_err) => serde_yaml::from_str(content).map_err(|yaml_err| {
            format!("not valid JSON ({}) or YAML ({})", json_err, yaml_err)
        }),
    }
}

/// Load a document from a JSON or YAML string.
///
/// # Errors
///
/// Returns `ResolveError::InvalidDocument` if the text is neither.
pub fn load_document_str(content: &str) -> Result<Value, ResolveError> {
    parse_document(content).map_err(|message| ResolveError::InvalidDocument { message })
}

/// Check if a string looks like a URL (starts with http:// or https://).
pub fn is_url(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://")
}

/// Turn a file path or http(s) URL into an absolute document location.
pub fn to_location(source: &str) -> Result<Url, LoadError> {
    if is_url(source) || source.starts_with("file://") {
        return Url::parse(source).map_err(|e| LoadError::Io {
            url: source.to_string(),
            message: e.to_string(),
        });
    }

    let path = Path::new(source)
        .canonicalize()
        .map_err(|e| LoadError::Io {
            url: source.to_string(),
            message: e.to_string(),
        })?;
    Url::from_file_path(&path).map_err(|()| LoadError::Io {
        url: source.to_string(),
        message: "not an absolute path".to_string(),
    })
}
