//! Search backend client.
//!
//! The engine talks to the search proxy through the [`SearchClient`]
//! trait; the HTTP implementation POSTs compiled request bodies to the
//! proxy's search endpoint. Tests substitute a scripted client.

use async_trait::async_trait;
use thiserror::Error;

use bv_core::protocol::{SearchRequest, SearchResponse};

/// Errors from issuing a search request.
#[derive(Error, Debug)]
pub enum FetchError {
    /// The transport died before completing, typically because the
    /// page navigated away. Suppressed rather than surfaced.
    #[error("request interrupted: {0}")]
    Interrupted(String),

    #[error("backend returned HTTP {status}")]
    Http { status: u16 },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("undecodable response: {0}")]
    Decode(String),
}

/// Executes compiled search requests against the backend.
#[async_trait]
pub trait SearchClient: Send + Sync {
    /// POSTs a request body, optionally limiting response content via
    /// a filter path passed through to the proxy.
    async fn search(
        &self,
        request: &SearchRequest,
        filter_path: Option<&str>,
    ) -> Result<SearchResponse, FetchError>;
}

/// HTTP client for the search proxy.
pub struct HttpSearchClient {
    http: reqwest::Client,
    base_url: String,
    node_id: String,
}

impl HttpSearchClient {
    /// `base_url` is the proxy root; `node_id` identifies the page
    /// configuration the proxy applies.
    pub fn new(base_url: impl Into<String>, node_id: impl Into<String>) -> Self {
        HttpSearchClient {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            node_id: node_id.into(),
        }
    }

    fn search_url(&self, filter_path: Option<&str>) -> String {
        let mut url = format!(
            "{}/searchbyparams/{}",
            self.base_url.trim_end_matches('/'),
            self.node_id
        );
        if let Some(filter_path) = filter_path {
            url.push(if url.contains('?') { '&' } else { '?' });
            url.push_str("filter_path=");
            url.push_str(filter_path);
        }
        url
    }
}

#[async_trait]
impl SearchClient for HttpSearchClient {
    async fn search(
        &self,
        request: &SearchRequest,
        filter_path: Option<&str>,
    ) -> Result<SearchResponse, FetchError> {
        let response = self
            .http
            .post(self.search_url(filter_path))
            .json(request)
            .send()
            .await
            .map_err(map_transport_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Http {
                status: status.as_u16(),
            });
        }
        response
            .json()
            .await
            .map_err(|e| FetchError::Decode(e.to_string()))
    }
}

fn map_transport_error(error: reqwest::Error) -> FetchError {
    if error.is_connect() {
        FetchError::Interrupted(error.to_string())
    } else {
        FetchError::Transport(error.to_string())
    }
}
