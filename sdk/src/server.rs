use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::{self, BoxStream, Stream};
use futures::{FutureExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use urpc_schema::{operation_path, Catalog};

use crate::envelope::Response;
use crate::error::RpcError;

/// Everything a handler gets for one call.
pub struct HandlerContext<P, I> {
    pub props:     P,
    pub input:     I,
    pub rpc_name:  String,
    pub operation: String,
    /// Cancelled once the call is abandoned, e.g. when the client times out
    /// or the connection goes away.
    pub cancel:    CancellationToken,
}

type ErasedHandler<P> =
    Arc<dyn Fn(P, Value, String, String, CancellationToken) -> BoxFuture<'static, Result<Value, RpcError>> + Send + Sync>;

type OutputStream = BoxStream<'static, Result<Value, RpcError>>;

type ErasedStream<P> =
    Arc<dyn Fn(P, Value, String, String, CancellationToken) -> Result<OutputStream, RpcError> + Send + Sync>;

type ErrorHandler = Arc<dyn Fn(&str, &str, RpcError) -> RpcError + Send + Sync>;

/// Interval between keep-alive comments on an idle stream.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(30);

/// Dispatches decoded calls to typed handlers.
///
/// `P` is the per-request props value the host builds (usually from the
/// request headers) and hands to every handler.
pub struct Server<P> {
    handlers:      HashMap<String, ErasedHandler<P>>,
    streams:       HashMap<String, ErasedStream<P>>,
    error_handler: Option<ErrorHandler>,
    ping_interval: Duration,
}

impl<P: Send + 'static> Default for Server<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Send + 'static> Server<P> {
    pub fn new() -> Self {
        Server {
            handlers:      HashMap::new(),
            streams:       HashMap::new(),
            error_handler: None,
            ping_interval: DEFAULT_PING_INTERVAL,
        }
    }

    /// Registers the handler for `rpc_name.operation`, replacing any earlier one.
    pub fn proc<I, O, F, Fut>(mut self, rpc_name: &str, operation: &str, handler: F) -> Self
    where
        I: DeserializeOwned + Send + 'static,
        O: Serialize + 'static,
        F: Fn(HandlerContext<P, I>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, RpcError>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let erased: ErasedHandler<P> = Arc::new(
            move |props: P, input: Value, rpc_name: String, operation: String, cancel: CancellationToken| {
                let handler = Arc::clone(&handler);
                async move {
                    let input: I = serde_json::from_value(input).map_err(|e| {
                        RpcError::validation(format!("invalid input for {}.{}: {}", rpc_name, operation, e))
                    })?;
                    let output = handler(HandlerContext {
                        props,
                        input,
                        rpc_name,
                        operation,
                        cancel,
                    })
                    .await?;
                    let output = serde_json::to_value(output)
                        .map_err(|e| RpcError::internal(format!("failed to encode output: {}", e)))?;
                    Ok::<Value, RpcError>(output)
                }
                .boxed()
            },
        );
        self.handlers.insert(operation_path(rpc_name, operation), erased);
        self
    }

    /// Registers the stream handler for `rpc_name.operation`. Every item the
    /// returned stream yields is sent as one event; the first error is sent
    /// and ends the stream.
    pub fn stream<I, O, F, S>(mut self, rpc_name: &str, operation: &str, handler: F) -> Self
    where
        I: DeserializeOwned + Send + 'static,
        O: Serialize + 'static,
        F: Fn(HandlerContext<P, I>) -> S + Send + Sync + 'static,
        S: Stream<Item = Result<O, RpcError>> + Send + 'static,
    {
        let erased: ErasedStream<P> = Arc::new(
            move |props: P, input: Value, rpc_name: String, operation: String, cancel: CancellationToken| {
                let input: I = serde_json::from_value(input).map_err(|e| {
                    RpcError::validation(format!("invalid input for {}.{}: {}", rpc_name, operation, e))
                })?;
                let events = handler(HandlerContext {
                    props,
                    input,
                    rpc_name,
                    operation,
                    cancel,
                });
                let events = events.map(|item| {
                    item.and_then(|output| {
                        serde_json::to_value(output)
                            .map_err(|e| RpcError::internal(format!("failed to encode output: {}", e)))
                    })
                });
                Ok::<OutputStream, RpcError>(events.boxed())
            },
        );
        self.streams.insert(operation_path(rpc_name, operation), erased);
        self
    }

    /// How often an idle stream gets a keep-alive comment.
    pub fn ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    pub fn get_ping_interval(&self) -> Duration {
        self.ping_interval
    }

    /// Maps every handler error before it reaches the wire.
    pub fn error_handler(mut self, f: impl Fn(&str, &str, RpcError) -> RpcError + Send + Sync + 'static) -> Self {
        self.error_handler = Some(Arc::new(f));
        self
    }

    pub fn has_operation(&self, rpc_name: &str, operation: &str) -> bool {
        let path = operation_path(rpc_name, operation);
        self.handlers.contains_key(&path) || self.streams.contains_key(&path)
    }

    pub fn has_stream(&self, rpc_name: &str, operation: &str) -> bool {
        self.streams.contains_key(&operation_path(rpc_name, operation))
    }

    /// Paths of procedures and streams declared in `catalog` that have no
    /// handler of the matching kind.
    pub fn missing_handlers(&self, catalog: &Catalog) -> Vec<String> {
        let procs = catalog
            .procedures
            .iter()
            .filter(|op| !self.handlers.contains_key(&op.path));
        let streams = catalog
            .streams
            .iter()
            .filter(|op| !self.streams.contains_key(&op.path));
        procs.chain(streams).map(|op| op.path.clone()).collect()
    }

    fn map_error(&self, rpc_name: &str, operation: &str, error: RpcError) -> RpcError {
        match &self.error_handler {
            Some(map) => map(rpc_name, operation, error),
            None => error,
        }
    }

    /// Decodes `body`, runs the handler and wraps the outcome in an envelope.
    /// Never fails: every problem ends up in the envelope's `error`.
    pub async fn handle(&self, props: P, rpc_name: &str, operation: &str, body: &[u8]) -> Response<Value> {
        let Some(handler) = self.handlers.get(&operation_path(rpc_name, operation)) else {
            warn!("unknown operation {}.{}", rpc_name, operation);
            return Response::failure(RpcError::unknown_operation(rpc_name, operation));
        };

        let input = match decode_body(body) {
            Ok(input) => input,
            Err(error) => return Response::failure(error),
        };

        debug!("handling {}.{}", rpc_name, operation);
        let cancel = CancellationToken::new();
        let _guard = cancel.clone().drop_guard();
        let call = handler(props, input, rpc_name.to_string(), operation.to_string(), cancel);

        let result = match AssertUnwindSafe(call).catch_unwind().await {
            Ok(result) => result,
            Err(_) => Err(RpcError::internal(format!("handler for {}.{} panicked", rpc_name, operation))),
        };

        match result {
            Ok(output) => Response::success(output),
            Err(error) => {
                let error = self.map_error(rpc_name, operation, error);
                debug!("{}.{} failed: {}", rpc_name, operation, error);
                Response::failure(error)
            }
        }
    }

    /// Starts a stream handler and returns its events as envelopes. Setup
    /// failures come back as a single failed envelope. Dropping the stream
    /// cancels the handler.
    pub fn handle_stream(&self, props: P, rpc_name: &str, operation: &str, body: &[u8]) -> BoxStream<'static, Response<Value>> {
        let failed = |error: RpcError| stream::once(async move { Response::<Value>::failure(error) }).boxed();

        let Some(handler) = self.streams.get(&operation_path(rpc_name, operation)) else {
            warn!("unknown stream {}.{}", rpc_name, operation);
            return failed(RpcError::unknown_operation(rpc_name, operation));
        };
        let input = match decode_body(body) {
            Ok(input) => input,
            Err(error) => return failed(error),
        };

        debug!("streaming {}.{}", rpc_name, operation);
        let cancel = CancellationToken::new();
        let guard = cancel.clone().drop_guard();
        let (rpc, op) = (rpc_name.to_string(), operation.to_string());
        let started = std::panic::catch_unwind(AssertUnwindSafe(|| handler(props, input, rpc.clone(), op.clone(), cancel)));
        let events = match started {
            Ok(Ok(events)) => events,
            Ok(Err(error)) => return failed(self.map_error(rpc_name, operation, error)),
            Err(_) => return failed(RpcError::internal(format!("stream handler for {}.{} panicked", rpc_name, operation))),
        };

        let panicked = format!("stream handler for {}.{} panicked", rpc_name, operation);
        let events = AssertUnwindSafe(events)
            .catch_unwind()
            .map(move |item| item.unwrap_or_else(|_| Err(RpcError::internal(panicked.clone()))))
            .boxed();

        let error_handler = self.error_handler.clone();
        stream::unfold(Some((events, guard)), move |state| {
            let error_handler = error_handler.clone();
            let (rpc, op) = (rpc.clone(), op.clone());
            async move {
                let (mut events, guard) = state?;
                match events.next().await? {
                    Ok(output) => Some((Response::success(output), Some((events, guard)))),
                    Err(error) => {
                        let error = match &error_handler {
                            Some(map) => map(&rpc, &op, error),
                            None => error,
                        };
                        debug!("{}.{} stream failed: {}", rpc, op, error);
                        Some((Response::failure(error), None))
                    }
                }
            }
        })
        .boxed()
    }
}

/// An empty body decodes as `{}`.
fn decode_body(body: &[u8]) -> Result<Value, RpcError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Object(Default::default()));
    }
    serde_json::from_slice::<Value>(body).map_err(|e| RpcError::validation(format!("invalid JSON body: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::codes;
    use serde::Deserialize;
    use std::sync::atomic::{AtomicBool, Ordering};
    use urpc_schema::{Operation, OperationKind};

    #[derive(Deserialize)]
    struct EchoInput {
        text: String,
    }

    fn echo_server() -> Server<String> {
        Server::new()
            .proc("Echo", "Say", |ctx: HandlerContext<String, EchoInput>| async move {
                Ok::<_, RpcError>(format!("{}: {}", ctx.props, ctx.input.text))
            })
            .proc("Echo", "Fail", |_ctx: HandlerContext<String, Value>| async move {
                Err::<Value, _>(RpcError::new("NOPE", "refused"))
            })
            .proc("Echo", "Panic", |_ctx: HandlerContext<String, Value>| async move {
                if true {
                    panic!("boom");
                }
                Ok::<_, RpcError>(Value::Null)
            })
    }

    #[tokio::test]
    async fn test_dispatch() {
        let server = echo_server();
        let response = server.handle("alice".into(), "Echo", "Say", br#"{"text":"hi","extra":true}"#).await;
        assert_eq!(response.into_result(), Ok(Value::String("alice: hi".into())));

        let response = server.handle("alice".into(), "Echo", "Missing", b"{}").await;
        assert!(response.into_result().unwrap_err().is(codes::UNKNOWN_OPERATION));
    }

    #[tokio::test]
    async fn test_errors_are_enveloped() {
        let server = echo_server().error_handler(|_, op, mut err| {
            err.category = Some(format!("{}Error", op));
            err
        });

        let err = server.handle(String::new(), "Echo", "Fail", b"").await.into_result().unwrap_err();
        assert_eq!((err.code.as_str(), err.category.as_deref()), ("NOPE", Some("FailError")));

        let err = server.handle(String::new(), "Echo", "Say", b"{}").await.into_result().unwrap_err();
        assert!(err.is(codes::VALIDATION_ERROR));

        let err = server.handle(String::new(), "Echo", "Say", b"{not json").await.into_result().unwrap_err();
        assert!(err.is(codes::VALIDATION_ERROR));

        let err = server.handle(String::new(), "Echo", "Panic", b"{}").await.into_result().unwrap_err();
        assert!(err.is(codes::INTERNAL));
    }

    #[derive(Deserialize)]
    struct CountInput {
        to: u32,
    }

    fn counting_server(cancelled: Arc<AtomicBool>) -> Server<String> {
        Server::new()
            .stream("Echo", "Count", |ctx: HandlerContext<String, CountInput>| {
                stream::iter((1..=ctx.input.to).map(|n| match n {
                    3 => Err(RpcError::new("STOP", "three")),
                    n => Ok(n),
                }))
            })
            .stream("Echo", "Forever", move |ctx: HandlerContext<String, Value>| {
                let cancelled = Arc::clone(&cancelled);
                tokio::spawn(async move {
                    ctx.cancel.cancelled().await;
                    cancelled.store(true, Ordering::SeqCst);
                });
                stream::pending::<Result<Value, RpcError>>()
            })
    }

    #[tokio::test]
    async fn test_stream_stops_after_first_error() {
        let server = counting_server(Arc::default());
        let events: Vec<Response<Value>> = server
            .handle_stream(String::new(), "Echo", "Count", br#"{"to":5}"#)
            .collect()
            .await;
        assert_eq!(events.len(), 3, "{:?}", events);
        assert_eq!(events[0].output, Some(Value::from(1)));
        assert_eq!(events[1].output, Some(Value::from(2)));
        assert!(events[2].clone().into_result().unwrap_err().is("STOP"));

        let events: Vec<_> = server.handle_stream(String::new(), "Echo", "Count", b"{}").collect().await;
        assert_eq!(events.len(), 1);
        assert!(events[0].clone().into_result().unwrap_err().is(codes::VALIDATION_ERROR));

        let events: Vec<_> = server.handle_stream(String::new(), "Echo", "Nope", b"{}").collect().await;
        assert!(events[0].clone().into_result().unwrap_err().is(codes::UNKNOWN_OPERATION));
    }

    #[tokio::test]
    async fn test_dropping_a_stream_cancels_the_handler() {
        let cancelled = Arc::new(AtomicBool::new(false));
        let server = counting_server(Arc::clone(&cancelled));
        let events = server.handle_stream(String::new(), "Echo", "Forever", b"");
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert!(!cancelled.load(Ordering::SeqCst));

        drop(events);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(cancelled.load(Ordering::SeqCst));
    }

    #[test]
    fn test_missing_handlers_covers_streams() {
        let mut catalog = Catalog::default();
        catalog.procedures.push(Operation::new("Echo", "Say", OperationKind::Proc, "In", "Out"));
        catalog.procedures.push(Operation::new("Echo", "Shout", OperationKind::Proc, "In", "Out"));
        catalog.streams.push(Operation::new("Echo", "Count", OperationKind::Stream, "In", "Out"));
        catalog.streams.push(Operation::new("Echo", "Say", OperationKind::Stream, "In", "Out"));
        catalog.streams.push(Operation::new("Echo", "Tail", OperationKind::Stream, "In", "Out"));

        let server = echo_server().stream("Echo", "Count", |_ctx: HandlerContext<String, Value>| {
            stream::empty::<Result<Value, RpcError>>()
        });
        assert_eq!(server.missing_handlers(&catalog), vec!["/Echo/Shout", "/Echo/Say", "/Echo/Tail"]);
        assert!(server.has_stream("Echo", "Count"));
        assert!(!server.has_stream("Echo", "Say"));
        assert!(server.has_operation("Echo", "Count"));
    }
}
