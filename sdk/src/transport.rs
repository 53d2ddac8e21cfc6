use std::sync::Arc;

use futures::stream::BoxStream;
use futures::StreamExt;

use crate::error::RpcError;
use crate::headers::Headers;
use crate::server::Server;

/// Largest stream event a client accepts unless configured otherwise.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

// ── Request ─────────────────────────────────────────────────────────

/// One encoded call on its way to a server.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub rpc_name:  String,
    pub operation: String,
    pub headers:   Headers,
    pub body:      Vec<u8>,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("unexpected HTTP status {0}")]
    Status(u16),

    #[error("transport failed: {0}")]
    Failed(String),

    #[error("stream message exceeds {0} bytes")]
    MessageTooLarge(usize),

    #[error("transport does not support {0}")]
    Unsupported(String),
}

impl TransportError {
    /// Server-side failures and broken connections are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Status(status) => *status >= 500,
            TransportError::Failed(_) => true,
            TransportError::MessageTooLarge(_) | TransportError::Unsupported(_) => false,
        }
    }

    pub fn into_rpc_error(self) -> RpcError {
        match self {
            TransportError::MessageTooLarge(limit) => RpcError::message_too_large(limit),
            other => RpcError::internal(other.to_string()),
        }
    }
}

/// Encoded response envelopes of one open stream, in arrival order.
pub type EventStream = BoxStream<'static, Result<Vec<u8>, TransportError>>;

// ── Transport ───────────────────────────────────────────────────────

/// Moves an encoded request to a server and returns the raw envelope bytes.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn send(&self, request: TransportRequest) -> Result<Vec<u8>, TransportError>;

    /// Opens a stream operation. The stream ends when the server closes it;
    /// an `Err` item means the connection broke.
    async fn open_stream(&self, request: TransportRequest) -> Result<EventStream, TransportError> {
        Err(TransportError::Unsupported(format!(
            "streams ({}.{})",
            request.rpc_name, request.operation
        )))
    }
}

type PropsFn<P> = dyn Fn(&Headers) -> P + Send + Sync;

/// Calls a [`Server`] in the same process. The request still goes through
/// the JSON envelope so both ends see exactly what they would over HTTP.
pub struct LocalTransport<P> {
    server: Arc<Server<P>>,
    props:  Arc<PropsFn<P>>,
}

impl<P: Send + 'static> LocalTransport<P> {
    /// `props` builds the per-request server props from the request headers.
    pub fn new(server: Arc<Server<P>>, props: impl Fn(&Headers) -> P + Send + Sync + 'static) -> Self {
        Self {
            server,
            props: Arc::new(props),
        }
    }
}

#[async_trait::async_trait]
impl<P: Send + 'static> Transport for LocalTransport<P> {
    async fn send(&self, request: TransportRequest) -> Result<Vec<u8>, TransportError> {
        let props = (self.props)(&request.headers);
        let response = self
            .server
            .handle(props, &request.rpc_name, &request.operation, &request.body)
            .await;
        serde_json::to_vec(&response).map_err(|e| TransportError::Failed(e.to_string()))
    }

    async fn open_stream(&self, request: TransportRequest) -> Result<EventStream, TransportError> {
        let props = (self.props)(&request.headers);
        let events = self
            .server
            .handle_stream(props, &request.rpc_name, &request.operation, &request.body)
            .map(|response| serde_json::to_vec(&response).map_err(|e| TransportError::Failed(e.to_string())));
        Ok(events.boxed())
    }
}
