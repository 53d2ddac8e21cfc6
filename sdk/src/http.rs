//! HTTP hosting and transport. Every operation is a `POST /{rpc}/{operation}`
//! with a JSON body. Procedures answer HTTP 200 with the response envelope;
//! streams answer with `text/event-stream`, one envelope per `data:` event.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use futures::StreamExt;
use tracing::debug;
use urpc_schema::operation_path;

use crate::headers::Headers;
use crate::server::Server;
use crate::sse::SseDecoder;
use crate::transport::{EventStream, Transport, TransportError, TransportRequest, DEFAULT_MAX_MESSAGE_SIZE};

// ── Server side ─────────────────────────────────────────────────────

struct HttpState<P> {
    server: Arc<Server<P>>,
    props:  Arc<dyn Fn(&Headers) -> P + Send + Sync>,
}

impl<P> Clone for HttpState<P> {
    fn clone(&self) -> Self {
        Self {
            server: Arc::clone(&self.server),
            props:  Arc::clone(&self.props),
        }
    }
}

/// Builds an axum router serving every operation registered on `server`.
/// `props` turns the request headers into the handler props.
pub fn router<P>(server: Arc<Server<P>>, props: impl Fn(&Headers) -> P + Send + Sync + 'static) -> Router
where
    P: Send + 'static,
{
    let state = HttpState {
        server,
        props: Arc::new(props),
    };
    Router::new()
        .route("/:rpc/:operation", post(handle_http::<P>))
        .with_state(state)
}

async fn handle_http<P: Send + 'static>(
    State(state): State<HttpState<P>>,
    Path((rpc_name, operation)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> axum::response::Response {
    let headers = Headers::from(headers);
    let props = (state.props)(&headers);

    if state.server.has_stream(&rpc_name, &operation) {
        debug!("opening event stream for {}.{}", rpc_name, operation);
        let events = state
            .server
            .handle_stream(props, &rpc_name, &operation, &body)
            .map(|response| Event::default().json_data(response));
        let keep_alive = KeepAlive::new()
            .interval(state.server.get_ping_interval())
            .text("ping");
        return Sse::new(events).keep_alive(keep_alive).into_response();
    }

    Json(state.server.handle(props, &rpc_name, &operation, &body).await).into_response()
}

// ── Client side ─────────────────────────────────────────────────────

/// Sends calls to a server mounted at `base_url`.
pub struct HttpTransport {
    http:             reqwest::Client,
    base_url:         String,
    max_message_size: usize,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }

    /// Largest stream event accepted before the stream fails with
    /// `MESSAGE_TOO_LARGE`.
    pub fn with_max_message_size(mut self, max_message_size: usize) -> Self {
        self.max_message_size = max_message_size;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post(&self, request: TransportRequest, accept: &'static str) -> Result<reqwest::Response, TransportError> {
        let url = format!("{}{}", self.base_url, operation_path(&request.rpc_name, &request.operation));
        debug!("POST {}", url);

        let response = self
            .http
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(reqwest::header::ACCEPT, accept)
            .headers(request.headers.into_map())
            .body(request.body)
            .send()
            .await
            .map_err(|e| TransportError::Failed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }
        Ok(response)
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: TransportRequest) -> Result<Vec<u8>, TransportError> {
        let response = self.post(request, "application/json").await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| TransportError::Failed(e.to_string()))?;
        Ok(bytes.to_vec())
    }

    async fn open_stream(&self, request: TransportRequest) -> Result<EventStream, TransportError> {
        let response = self.post(request, "text/event-stream").await?;

        let mut decoder = SseDecoder::new(self.max_message_size);
        let events = response
            .bytes_stream()
            .map(move |chunk| match chunk {
                Ok(chunk) => decoder.feed(&chunk),
                Err(e) => vec![Err(TransportError::Failed(e.to_string()))],
            })
            .flat_map(futures::stream::iter);
        Ok(events.boxed())
    }
}
