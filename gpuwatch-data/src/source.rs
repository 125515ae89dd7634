//! Source loader for the externally produced JSON documents.
//!
//! Each [`Document`] is fetched exactly once per load with no retry. Failures are
//! never raised: every outcome is a `Result<serde_json::Value, FetchError>` that
//! the caller feeds into fallback selection. [`Classification`] names the five
//! possible outcomes.

use crate::error::FetchError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

/// Logical source documents, resolved as `<name>.json` beneath the base url.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Hash, Deserialize, Serialize, derive_more::Display,
)]
pub enum Document {
    #[display("compute-prices")]
    ComputePrices,
    #[display("token-prices")]
    TokenPrices,
    #[display("grid-state")]
    GridState,
    #[display("annual-energy-history")]
    AnnualEnergyHistory,
}

impl Document {
    pub const ALL: [Document; 4] = [
        Document::ComputePrices,
        Document::TokenPrices,
        Document::GridState,
        Document::AnnualEnergyHistory,
    ];

    pub fn file_name(&self) -> String {
        format!("{self}.json")
    }
}

/// Outcome class of a single document fetch.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Hash, Deserialize, Serialize, derive_more::Display,
)]
pub enum Classification {
    #[display("ok-nonempty")]
    OkNonEmpty,
    #[display("ok-empty")]
    OkEmpty,
    #[display("http-error")]
    HttpError,
    #[display("parse-error")]
    ParseError,
    #[display("network-error")]
    NetworkError,
}

impl Classification {
    pub fn of<T>(result: &Result<T, FetchError>) -> Self {
        match result {
            Ok(_) => Classification::OkNonEmpty,
            Err(FetchError::Empty) => Classification::OkEmpty,
            Err(FetchError::Http { .. }) => Classification::HttpError,
            Err(FetchError::Parse(_)) => Classification::ParseError,
            Err(FetchError::Network(_)) => Classification::NetworkError,
        }
    }
}

/// Raw transport response prior to status and JSON interpretation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

/// Byte transport beneath the [`SourceLoader`].
///
/// `Err` is reserved for failures where no response was obtained at all.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &Url) -> Result<RawResponse, String>;
}

/// HTTP(S) transport using the transport default timeout.
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, url: &Url) -> Result<RawResponse, String> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|error| format!("HTTP request failed: {error}"))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|error| format!("failed to read response body: {error}"))?;

        Ok(RawResponse { status, body })
    }
}

/// Local directory transport for `file://` base urls.
///
/// A missing file answers 404 so it classifies the same way as an absent
/// document on a web server.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileTransport;

#[async_trait]
impl Transport for FileTransport {
    async fn get(&self, url: &Url) -> Result<RawResponse, String> {
        let path = url
            .to_file_path()
            .map_err(|()| format!("not a local file url: {url}"))?;

        match tokio::fs::read_to_string(&path).await {
            Ok(body) => Ok(RawResponse { status: 200, body }),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(RawResponse {
                status: 404,
                body: String::new(),
            }),
            Err(error) => Err(format!("failed to read {}: {error}", path.display())),
        }
    }
}

/// Pick the transport that serves a base url's scheme.
pub fn transport_for(base_url: &Url) -> Box<dyn Transport> {
    match base_url.scheme() {
        "file" => Box::new(FileTransport),
        _ => Box::new(HttpTransport::default()),
    }
}

/// Fetches and classifies [`Document`]s beneath a base url.
pub struct SourceLoader {
    base_url: Url,
    transport: Box<dyn Transport>,
}

impl std::fmt::Debug for SourceLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceLoader")
            .field("base_url", &self.base_url.as_str())
            .finish_non_exhaustive()
    }
}

impl SourceLoader {
    pub fn new(base_url: Url, transport: Box<dyn Transport>) -> Self {
        Self {
            base_url,
            transport,
        }
    }

    /// Construct with the transport matching the base url scheme.
    pub fn for_base_url(base_url: Url) -> Self {
        let transport = transport_for(&base_url);
        Self::new(base_url, transport)
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn document_url(&self, document: Document) -> Result<Url, FetchError> {
        self.base_url
            .join(&document.file_name())
            .map_err(|error| FetchError::Network(format!("invalid document url: {error}")))
    }

    /// Fetch a document once and interpret it as JSON.
    pub async fn load(&self, document: Document) -> Result<Value, FetchError> {
        let url = self.document_url(document)?;

        let result = match self.transport.get(&url).await {
            Ok(response) => interpret(response),
            Err(error) => Err(FetchError::Network(error)),
        };

        match &result {
            Ok(_) => debug!(%document, %url, "loaded source document"),
            Err(error) => warn!(
                %document,
                %url,
                classification = %Classification::of(&result),
                %error,
                "source document unusable"
            ),
        }

        result
    }
}

/// Turn a raw response into JSON, classifying status, parse and emptiness failures.
pub fn interpret(response: RawResponse) -> Result<Value, FetchError> {
    if !(200..300).contains(&response.status) {
        return Err(FetchError::Http {
            status: response.status,
        });
    }

    let value: Value = serde_json::from_str(&response.body)
        .map_err(|error| FetchError::Parse(error.to_string()))?;

    if is_empty(&value) {
        Err(FetchError::Empty)
    } else {
        Ok(value)
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Array(items) => items.is_empty(),
        Value::Object(fields) => fields.is_empty(),
        _ => false,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;

    /// In-memory transport keyed by document file name.
    #[derive(Debug, Clone, Default)]
    pub(crate) struct MockTransport {
        pub responses: HashMap<String, Result<RawResponse, String>>,
    }

    impl MockTransport {
        pub fn with_json(mut self, document: Document, body: &str) -> Self {
            self.responses.insert(
                document.file_name(),
                Ok(RawResponse {
                    status: 200,
                    body: body.to_string(),
                }),
            );
            self
        }

        pub fn with_status(mut self, document: Document, status: u16) -> Self {
            self.responses.insert(
                document.file_name(),
                Ok(RawResponse {
                    status,
                    body: String::new(),
                }),
            );
            self
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn get(&self, url: &Url) -> Result<RawResponse, String> {
            let name = url
                .path_segments()
                .and_then(|mut segments| segments.next_back())
                .unwrap_or_default();
            self.responses
                .get(name)
                .cloned()
                .unwrap_or_else(|| Err("connection refused".to_string()))
        }
    }

    fn loader(transport: MockTransport) -> SourceLoader {
        SourceLoader::new(
            Url::parse("http://localhost/data/").unwrap(),
            Box::new(transport),
        )
    }

    #[test]
    fn test_document_file_names() {
        let names: Vec<_> = Document::ALL.iter().map(Document::file_name).collect();
        assert_eq!(
            names,
            vec![
                "compute-prices.json",
                "token-prices.json",
                "grid-state.json",
                "annual-energy-history.json",
            ]
        );
    }

    #[tokio::test]
    async fn test_load_classification() {
        struct TestCase {
            document: Document,
            expected: Classification,
        }

        let transport = MockTransport::default()
            .with_json(Document::ComputePrices, r#"[{"provider": "a", "price": 2.5}]"#)
            .with_json(Document::TokenPrices, "[]")
            .with_status(Document::GridState, 500)
            .with_json(Document::AnnualEnergyHistory, "[{year: 2024}");
        let loader = loader(transport);

        let tests = vec![
            TestCase {
                // TC0: populated array
                document: Document::ComputePrices,
                expected: Classification::OkNonEmpty,
            },
            TestCase {
                // TC1: empty array
                document: Document::TokenPrices,
                expected: Classification::OkEmpty,
            },
            TestCase {
                // TC2: server error
                document: Document::GridState,
                expected: Classification::HttpError,
            },
            TestCase {
                // TC3: invalid JSON
                document: Document::AnnualEnergyHistory,
                expected: Classification::ParseError,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = Classification::of(&loader.load(test.document).await);
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }

    #[tokio::test]
    async fn test_load_network_error() {
        let loader = loader(MockTransport::default());
        let result = loader.load(Document::ComputePrices).await;
        assert_eq!(
            result,
            Err(FetchError::Network("connection refused".to_string()))
        );
        assert_eq!(Classification::of(&result), Classification::NetworkError);
    }

    #[test]
    fn test_interpret_empty_shapes() {
        struct TestCase {
            body: &'static str,
            expected: Classification,
        }

        let tests = vec![
            TestCase {
                // TC0: JSON null
                body: "null",
                expected: Classification::OkEmpty,
            },
            TestCase {
                // TC1: empty object
                body: "{}",
                expected: Classification::OkEmpty,
            },
            TestCase {
                // TC2: empty array
                body: "[]",
                expected: Classification::OkEmpty,
            },
            TestCase {
                // TC3: blank body is not JSON
                body: "",
                expected: Classification::ParseError,
            },
            TestCase {
                // TC4: whitespace body is not JSON
                body: "   ",
                expected: Classification::ParseError,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = Classification::of(&interpret(RawResponse {
                status: 200,
                body: test.body.to_string(),
            }));
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }

        let actual = interpret(RawResponse {
            status: 404,
            body: "[1]".to_string(),
        });
        assert_eq!(actual, Err(FetchError::Http { status: 404 }));
    }

    #[tokio::test]
    async fn test_file_transport_missing_file_is_404() {
        let dir = std::env::temp_dir().join(format!("gpuwatch-missing-{}", std::process::id()));
        let url = Url::from_directory_path(&dir)
            .unwrap()
            .join("compute-prices.json")
            .unwrap();

        let response = FileTransport.get(&url).await.unwrap();
        assert_eq!(response.status, 404);
    }
}
