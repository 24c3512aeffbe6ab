//! Kubernetes-style API server client
//!
//! Lists a collection page by page and opens chunked watch streams of
//! newline-delimited JSON frames.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt, TryStreamExt};
use informer_core::prelude::*;
use informer_core::{ApiServerConfig, ResourceConfig};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde_json::Value;
use std::io;
use std::time::Duration;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tokio_util::io::StreamReader;
use tracing::{debug, trace};

/// API server client for one resource collection
pub struct ApiClient {
    client: Client,
    base_url: String,
    api_path: String,
    kind: String,
    bearer_token: Option<String>,
    request_timeout: Duration,
}

impl ApiClient {
    /// Create new API client
    ///
    /// No overall timeout is set on the client; list requests get
    /// `request_timeout` individually so watches can stay open.
    pub fn new(api: &ApiServerConfig, resource: &ResourceConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(api.connect_timeout)
            .build()
            .map_err(|e| InformerError::transport_with_source("Failed to create client", e))?;

        Ok(Self {
            client,
            base_url: api.url.trim_end_matches('/').to_string(),
            api_path: resource.api_path.clone(),
            kind: resource.kind.clone(),
            bearer_token: api.bearer_token.clone(),
            request_timeout: api.request_timeout,
        })
    }

    /// Build request with authentication
    fn build_request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let req = self.client.request(method, url);

        match self.bearer_token {
            Some(ref token) => req.bearer_auth(token),
            None => req,
        }
    }

    fn list_query(limit: Option<u32>, cursor: Option<&PageCursor>) -> Vec<(&'static str, String)> {
        let mut query = Vec::new();
        if let Some(limit) = limit {
            query.push(("limit", limit.to_string()));
        }
        if let Some(cursor) = cursor {
            query.push(("continue", cursor.as_str().to_string()));
        }
        query
    }

    fn watch_query(from: Option<&ResumeToken>) -> Vec<(&'static str, String)> {
        let mut query = vec![("watch", "true".to_string())];
        if let Some(token) = from {
            query.push(("resourceVersion", token.as_str().to_string()));
        }
        query
    }

    async fn check_status(resp: Response, what: &str) -> Result<Response> {
        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        Err(InformerError::transport(format!("{} failed: {} - {}", what, status, body)))
    }
}

#[async_trait]
impl HealthCheck for ApiClient {
    async fn health_check(&self) -> Result<()> {
        let resp = self
            .build_request(Method::GET, "/healthz")
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| InformerError::transport_with_source("Health check failed", e))?;

        Self::check_status(resp, "Health check").await.map(|_| ())
    }

    fn component_name(&self) -> &'static str {
        "api_server"
    }
}

#[async_trait]
impl ListWatchSource for ApiClient {
    async fn list(&self, limit: Option<u32>, cursor: Option<&PageCursor>) -> Result<Option<ListPage>> {
        let resp = self
            .build_request(Method::GET, &self.api_path)
            .query(&Self::list_query(limit, cursor))
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| InformerError::transport_with_source("List request failed", e))?;
        let resp = Self::check_status(resp, "List").await?;

        let body = resp
            .bytes()
            .await
            .map_err(|e| InformerError::transport_with_source("Failed to read list response", e))?;
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }

        let page = ListPage::from_json(serde_json::from_slice::<Value>(&body)?)?;

        trace!(
            kind = %self.kind,
            items = page.as_ref().map_or(0, |p| p.items.len()),
            has_more = page.as_ref().is_some_and(|p| p.next_cursor.is_some()),
            "Fetched list page"
        );
        Ok(page)
    }

    async fn watch(&self, from: Option<&ResumeToken>) -> Result<EventStream> {
        let resp = self
            .build_request(Method::GET, &self.api_path)
            .query(&Self::watch_query(from))
            .send()
            .await
            .map_err(|e| InformerError::transport_with_source("Watch request failed", e))?;
        let resp = Self::check_status(resp, "Watch").await?;

        debug!(kind = %self.kind, resume_token = ?from.map(ResumeToken::as_str), "Watch connection established");
        Ok(decode_frames(resp.bytes_stream(), MAX_FRAME_BYTES))
    }

    fn resource(&self) -> &str {
        &self.kind
    }
}

/// Longest watch frame accepted before the stream is failed
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Split a chunked body into newline-delimited watch frames
///
/// Blank lines are skipped. A read failure or a frame longer than
/// `max_frame_bytes` ends the stream after one error item.
pub fn decode_frames<St, E>(body: St, max_frame_bytes: usize) -> EventStream
where
    St: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    let reader = StreamReader::new(body.map_err(io::Error::other));

    FramedRead::new(reader, LinesCodec::new_with_max_length(max_frame_bytes))
        .filter_map(move |line| async move {
            match line {
                Ok(line) if line.trim().is_empty() => None,
                Ok(line) => Some(StreamEvent::from_json_line(line.trim().as_bytes())),
                Err(LinesCodecError::MaxLineLengthExceeded) => Some(Err(InformerError::Serialization {
                    message: format!("watch frame exceeds {} bytes", max_frame_bytes),
                    source: None,
                })),
                Err(LinesCodecError::Io(e)) => {
                    Some(Err(InformerError::transport_with_source("Watch stream read failed", e)))
                }
            }
        })
        .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn chunks(parts: &[&'static str]) -> impl Stream<Item = std::result::Result<Bytes, io::Error>> + Send + 'static {
        let parts: Vec<_> = parts.iter().map(|p| Ok(Bytes::from_static(p.as_bytes()))).collect();
        stream::iter(parts)
    }

    #[test]
    fn test_query_building() {
        assert!(ApiClient::list_query(None, None).is_empty());
        assert_eq!(
            ApiClient::list_query(Some(500), Some(&PageCursor::new("abc"))),
            vec![("limit", "500".to_string()), ("continue", "abc".to_string())]
        );
        assert_eq!(
            ApiClient::watch_query(Some(&ResumeToken::new("42"))),
            vec![("watch", "true".to_string()), ("resourceVersion", "42".to_string())]
        );
        assert_eq!(ApiClient::watch_query(None), vec![("watch", "true".to_string())]);
    }

    #[test]
    fn test_client_strips_trailing_slash() {
        let api = ApiServerConfig {
            url: "http://localhost:8001/".to_string(),
            ..Default::default()
        };
        let client = ApiClient::new(&api, &ResourceConfig::default()).unwrap();
        assert_eq!(client.base_url, "http://localhost:8001");
        assert_eq!(client.resource(), "pods");
    }

    #[tokio::test]
    async fn test_frames_split_across_chunks() {
        let body = chunks(&[
            "{\"type\":\"ADDED\",\"object\":{\"metadata\":{\"uid\":\"a\"}}}\n{\"type\":\"MOD",
            "IFIED\",\"object\":{\"metadata\":{\"uid\":\"a\"}}}\r\n\n",
            "{\"type\":\"DELETED\",\"object\":{\"metadata\":{\"uid\":\"a\"}}}",
        ]);

        let kinds: Vec<_> = decode_frames(body, MAX_FRAME_BYTES)
            .map(|event| event.unwrap().kind)
            .collect()
            .await;
        assert_eq!(kinds, vec![EventKind::Added, EventKind::Modified, EventKind::Deleted]);
    }

    #[tokio::test]
    async fn test_invalid_frame_is_an_error() {
        let mut frames = decode_frames(chunks(&["{oops}\n"]), MAX_FRAME_BYTES);
        assert!(matches!(
            frames.next().await,
            Some(Err(InformerError::Serialization { .. }))
        ));
        assert!(frames.next().await.is_none());
    }

    #[tokio::test]
    async fn test_read_failure_ends_stream() {
        let body = stream::iter(vec![
            Ok(Bytes::from_static(b"{\"type\":\"ADDED\",\"object\":{}}\n{\"type\"")),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")),
        ]);
        let mut frames = decode_frames(body, MAX_FRAME_BYTES);

        assert!(frames.next().await.unwrap().is_ok());
        assert!(matches!(
            frames.next().await,
            Some(Err(InformerError::Transport { .. }))
        ));
        assert!(frames.next().await.is_none());
    }

    #[tokio::test]
    async fn test_oversized_frame_fails_stream() {
        let body = chunks(&[
            "{\"type\":\"ADDED\",\"object\":{}}\n",
            "{\"type\":\"ADDED\",\"object\":{\"metadata\":",
            "{\"uid\":\"a-very-long-identifier\"}}}\n",
        ]);
        let mut frames = decode_frames(body, 40);

        assert!(frames.next().await.unwrap().is_ok());
        assert!(matches!(
            frames.next().await,
            Some(Err(InformerError::Serialization { .. }))
        ));
        assert!(frames.next().await.is_none());
    }
}
