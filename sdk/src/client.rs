use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, BoxStream};
use futures::StreamExt;
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use crate::envelope::Response;
use crate::error::RpcError;
use crate::headers::Headers;
use crate::transport::{Transport, TransportRequest};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Events buffered between a stream's connection task and its consumer.
const STREAM_BUFFER: usize = 32;

// ── Call context ────────────────────────────────────────────────────

/// Per-call state shared by interceptors and header providers.
#[derive(Debug, Clone)]
pub struct CallContext {
    pub rpc_name:  String,
    pub operation: String,
    values:        HashMap<String, String>,
}

impl CallContext {
    pub fn new(rpc_name: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            rpc_name:  rpc_name.into(),
            operation: operation.into(),
            values:    HashMap::new(),
        }
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }
}

/// The request as interceptors see it, before it is encoded.
#[derive(Debug, Clone)]
pub struct Request {
    pub rpc_name:  String,
    pub operation: String,
    pub input:     Value,
    pub headers:   Headers,
}

// ── Hooks ───────────────────────────────────────────────────────────

pub type HeaderProvider = Arc<dyn Fn(&CallContext, &mut Headers) -> Result<(), RpcError> + Send + Sync>;

type BeforeFn = Arc<dyn Fn(CallContext, Request) -> (CallContext, Request) + Send + Sync>;
type AfterFn = Arc<dyn Fn(&CallContext, Response<Value>) -> Response<Value> + Send + Sync>;

/// A step wrapped around every call. `before` steps run in registration
/// order ahead of the header providers; `after` steps run in reverse order
/// on the final response.
#[derive(Clone, Default)]
pub struct Interceptor {
    before: Option<BeforeFn>,
    after:  Option<AfterFn>,
}

impl Interceptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn before(mut self, f: impl Fn(CallContext, Request) -> (CallContext, Request) + Send + Sync + 'static) -> Self {
        self.before = Some(Arc::new(f));
        self
    }

    pub fn after(mut self, f: impl Fn(&CallContext, Response<Value>) -> Response<Value> + Send + Sync + 'static) -> Self {
        self.after = Some(Arc::new(f));
        self
    }
}

// ── Retry ───────────────────────────────────────────────────────────

/// Retry policy for timeouts and transport failures. Error envelopes and
/// undecodable responses are never retried.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    pub max_attempts:     u32,
    pub initial_delay:    Duration,
    pub max_delay:        Duration,
    pub delay_multiplier: f64,
    /// Each delay is scaled by a random factor in `[1 - jitter, 1 + jitter]`.
    pub jitter:           f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts:     1,
            initial_delay:    Duration::ZERO,
            max_delay:        Duration::ZERO,
            delay_multiplier: 1.0,
            jitter:           0.2,
        }
    }
}

impl RetryConfig {
    pub fn attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    /// Delay to wait after the given (1-based) failed attempt, before
    /// jitter. A zero `max_delay` means uncapped.
    pub fn delay(&self, attempt: u32) -> Duration {
        backoff_delay(self.initial_delay, self.delay_multiplier, self.max_delay, attempt)
    }

    /// `delay` with jitter applied.
    pub fn backoff(&self, attempt: u32) -> Duration {
        apply_jitter(self.delay(attempt), self.jitter)
    }
}

/// Reconnect policy for streams. The attempt counter starts over after
/// every successful connect.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    pub max_attempts:     u32,
    pub initial_delay:    Duration,
    pub max_delay:        Duration,
    pub delay_multiplier: f64,
    pub jitter:           f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts:     30,
            initial_delay:    Duration::from_secs(1),
            max_delay:        Duration::from_secs(30),
            delay_multiplier: 1.5,
            jitter:           0.2,
        }
    }
}

impl ReconnectConfig {
    /// Never reconnect: the first failure ends the stream.
    pub fn disabled() -> Self {
        Self {
            max_attempts: 0,
            ..Self::default()
        }
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        backoff_delay(self.initial_delay, self.delay_multiplier, self.max_delay, attempt)
    }

    pub fn backoff(&self, attempt: u32) -> Duration {
        apply_jitter(self.delay(attempt), self.jitter)
    }
}

/// `initial * multiplier^(attempt - 1)`, capped at `max` unless it is zero.
fn backoff_delay(initial: Duration, multiplier: f64, max: Duration, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1) as i32;
    let nanos = initial.as_nanos() as f64 * multiplier.max(0.0).powi(exponent);
    let delay = Duration::from_nanos(nanos.round().min(u64::MAX as f64) as u64);
    if max > Duration::ZERO && delay > max {
        max
    } else {
        delay
    }
}

/// Scales `delay` by a random factor in `[1 - jitter, 1 + jitter]`, with
/// `jitter` clamped to at most 1.
pub fn apply_jitter(delay: Duration, jitter: f64) -> Duration {
    if jitter <= 0.0 || delay.is_zero() {
        return delay;
    }
    let jitter = jitter.min(1.0);
    let factor = rand::thread_rng().gen_range((1.0 - jitter)..=(1.0 + jitter));
    delay.mul_f64(factor)
}

// ── Client ──────────────────────────────────────────────────────────

struct ClientInner {
    transport:    Arc<dyn Transport>,
    headers:      Vec<(String, String)>,
    providers:    Vec<HeaderProvider>,
    interceptors: Vec<Interceptor>,
    timeout:      Option<Duration>,
    retry:        RetryConfig,
    reconnect:    ReconnectConfig,
}

/// Calls operations through a [`Transport`]. Cheap to clone.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

pub struct ClientBuilder {
    transport:    Arc<dyn Transport>,
    headers:      Vec<(String, String)>,
    providers:    Vec<HeaderProvider>,
    interceptors: Vec<Interceptor>,
    timeout:      Option<Duration>,
    retry:        RetryConfig,
    reconnect:    ReconnectConfig,
}

impl ClientBuilder {
    pub fn new(transport: impl Transport) -> Self {
        Self::with_transport(Arc::new(transport))
    }

    pub fn with_transport(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            headers: Vec::new(),
            providers: Vec::new(),
            interceptors: Vec::new(),
            timeout: Some(DEFAULT_TIMEOUT),
            retry: RetryConfig::default(),
            reconnect: ReconnectConfig::default(),
        }
    }

    /// A header sent with every call. Invalid names or values fail each
    /// call with a validation error.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn header_provider(
        mut self,
        f: impl Fn(&CallContext, &mut Headers) -> Result<(), RpcError> + Send + Sync + 'static,
    ) -> Self {
        self.providers.push(Arc::new(f));
        self
    }

    pub fn interceptor(mut self, interceptor: Interceptor) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    /// Per-attempt timeout. `None` waits forever.
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn build(self) -> Client {
        Client {
            inner: Arc::new(ClientInner {
                transport:    self.transport,
                headers:      self.headers,
                providers:    self.providers,
                interceptors: self.interceptors,
                timeout:      self.timeout,
                retry:        self.retry,
                reconnect:    self.reconnect,
            }),
        }
    }
}

impl Client {
    pub fn builder(transport: impl Transport) -> ClientBuilder {
        ClientBuilder::new(transport)
    }

    pub fn call(&self, rpc_name: impl Into<String>, operation: impl Into<String>) -> CallBuilder<'_> {
        CallBuilder {
            client:    self,
            rpc_name:  rpc_name.into(),
            operation: operation.into(),
            headers:   Vec::new(),
            providers: Vec::new(),
            timeout:   None,
            retry:     None,
        }
    }

    /// Starts building a subscription to a stream operation.
    pub fn stream(&self, rpc_name: impl Into<String>, operation: impl Into<String>) -> StreamCall {
        StreamCall {
            client:    self.clone(),
            rpc_name:  rpc_name.into(),
            operation: operation.into(),
            headers:   Vec::new(),
            providers: Vec::new(),
            reconnect: None,
        }
    }

    /// Shorthand for `call(..).send(input)` with the client defaults.
    pub async fn proc<I, O>(&self, rpc_name: &str, operation: &str, input: &I) -> Result<O, RpcError>
    where
        I: Serialize + ?Sized,
        O: DeserializeOwned,
    {
        self.call(rpc_name, operation).send(input).await
    }
}

// ── Call ────────────────────────────────────────────────────────────

/// One call with its own headers, timeout and retry overrides.
pub struct CallBuilder<'c> {
    client:    &'c Client,
    rpc_name:  String,
    operation: String,
    headers:   Vec<(String, String)>,
    providers: Vec<HeaderProvider>,
    timeout:   Option<Option<Duration>>,
    retry:     Option<RetryConfig>,
}

enum Attempt {
    Done(Response<Value>),
    Retryable(RpcError),
}

impl<'c> CallBuilder<'c> {
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn header_provider(
        mut self,
        f: impl Fn(&CallContext, &mut Headers) -> Result<(), RpcError> + Send + Sync + 'static,
    ) -> Self {
        self.providers.push(Arc::new(f));
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    pub async fn send<I, O>(self, input: &I) -> Result<O, RpcError>
    where
        I: Serialize + ?Sized,
        O: DeserializeOwned,
    {
        self.execute(input).await.into_result()
    }

    /// Runs the call and returns the decoded envelope. Transport problems,
    /// timeouts and decode failures all come back as failed envelopes.
    pub async fn execute<I, O>(self, input: &I) -> Response<O>
    where
        I: Serialize + ?Sized,
        O: DeserializeOwned,
    {
        let inner = &self.client.inner;
        let (ctx, request) = match prepare(&self.client, &self.rpc_name, &self.operation, input) {
            Ok(prepared) => prepared,
            Err(error) => return Response::failure(error),
        };

        let response = self.attempt_all(&ctx, &request).await;

        let response = inner
            .interceptors
            .iter()
            .rev()
            .filter_map(|i| i.after.as_ref())
            .fold(response, |response, after| after(&ctx, response));

        decode_output(response)
    }

    async fn attempt_all(&self, ctx: &CallContext, request: &Request) -> Response<Value> {
        let inner = &self.client.inner;
        let retry = self.retry.as_ref().unwrap_or(&inner.retry);
        let timeout = self.timeout.unwrap_or(inner.timeout);
        let max_attempts = retry.max_attempts.max(1);

        let body = match serde_json::to_vec(&request.input) {
            Ok(body) => body,
            Err(e) => return Response::failure(RpcError::validation(format!("failed to encode input: {}", e))),
        };

        let mut attempt = 1;
        loop {
            let mut headers = request.headers.clone();
            if let Err(error) = resolve_headers(&self.client, &self.headers, &self.providers, ctx, &mut headers) {
                return Response::failure(error);
            }

            debug!("calling {}.{} (attempt {})", request.rpc_name, request.operation, attempt);
            let transport_request = TransportRequest {
                rpc_name:  request.rpc_name.clone(),
                operation: request.operation.clone(),
                headers,
                body:      body.clone(),
            };

            let error = match self.attempt(transport_request, timeout, attempt).await {
                Attempt::Done(response) => return response,
                Attempt::Retryable(error) => error,
            };

            if attempt >= max_attempts {
                return Response::failure(error);
            }
            let delay = retry.backoff(attempt);
            warn!(
                "{}.{} attempt {} failed ({}), retrying in {:?}",
                request.rpc_name, request.operation, attempt, error, delay
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    async fn attempt(&self, request: TransportRequest, timeout: Option<Duration>, attempt: u32) -> Attempt {
        let transport = &self.client.inner.transport;
        let sent = match timeout {
            Some(timeout) => match tokio::time::timeout(timeout, transport.send(request)).await {
                Ok(sent) => sent,
                Err(_) => {
                    warn!("{}.{} timed out after {:?}", self.rpc_name, self.operation, timeout);
                    return Attempt::Retryable(RpcError::timeout(attempt));
                }
            },
            None => transport.send(request).await,
        };

        match sent {
            Ok(bytes) => match serde_json::from_slice::<Response<Value>>(&bytes) {
                Ok(response) => Attempt::Done(response),
                Err(e) => Attempt::Done(Response::failure(RpcError::internal(format!(
                    "failed to decode response: {}",
                    e
                )))),
            },
            Err(e) if e.is_retryable() => Attempt::Retryable(e.into_rpc_error()),
            Err(e) => Attempt::Done(Response::failure(e.into_rpc_error())),
        }
    }
}

// ── Stream ──────────────────────────────────────────────────────────

/// A subscription to a stream operation with its own headers and
/// reconnect policy.
pub struct StreamCall {
    client:    Client,
    rpc_name:  String,
    operation: String,
    headers:   Vec<(String, String)>,
    providers: Vec<HeaderProvider>,
    reconnect: Option<ReconnectConfig>,
}

impl StreamCall {
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn header_provider(
        mut self,
        f: impl Fn(&CallContext, &mut Headers) -> Result<(), RpcError> + Send + Sync + 'static,
    ) -> Self {
        self.providers.push(Arc::new(f));
        self
    }

    pub fn reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = Some(reconnect);
        self
    }

    /// Connects and returns the decoded events. Header providers run again
    /// on every reconnect. Broken connections and 5xx answers reconnect with
    /// backoff; the stream ends when the server closes it, when reconnects
    /// run out (with a failed event), or on an oversized event. Before
    /// interceptors run once; after interceptors do not see stream events.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn subscribe<I, O>(self, input: &I) -> BoxStream<'static, Response<O>>
    where
        I: Serialize + ?Sized,
        O: DeserializeOwned + Send + 'static,
    {
        let prepared = prepare(&self.client, &self.rpc_name, &self.operation, input).and_then(|(ctx, request)| {
            let body = serde_json::to_vec(&request.input)
                .map_err(|e| RpcError::validation(format!("failed to encode input: {}", e)))?;
            Ok((ctx, request, body))
        });
        let (ctx, request, body) = match prepared {
            Ok(prepared) => prepared,
            Err(error) => return stream::once(async move { Response::failure(error) }).boxed(),
        };

        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        tokio::spawn(self.run(ctx, request, body, tx));
        ReceiverStream::new(rx).map(decode_output::<O>).boxed()
    }

    async fn run(self, ctx: CallContext, request: Request, body: Vec<u8>, tx: mpsc::Sender<Response<Value>>) {
        let inner = &self.client.inner;
        let reconnect = self.reconnect.clone().unwrap_or_else(|| inner.reconnect.clone());
        let mut attempt = 0;

        loop {
            let mut headers = request.headers.clone();
            if let Err(error) = resolve_headers(&self.client, &self.headers, &self.providers, &ctx, &mut headers) {
                let _ = tx.send(Response::failure(error)).await;
                return;
            }

            debug!("opening stream {}.{} (reconnect {})", self.rpc_name, self.operation, attempt);
            let transport_request = TransportRequest {
                rpc_name:  request.rpc_name.clone(),
                operation: request.operation.clone(),
                headers,
                body:      body.clone(),
            };

            let error = match inner.transport.open_stream(transport_request).await {
                Ok(mut events) => {
                    attempt = 0;
                    loop {
                        let event = tokio::select! {
                            event = events.next() => event,
                            _ = tx.closed() => return,
                        };
                        match event {
                            Some(Ok(bytes)) => {
                                if tx.send(decode_event(&bytes)).await.is_err() {
                                    return;
                                }
                            }
                            Some(Err(error)) => break error,
                            None => {
                                debug!("stream {}.{} closed by the server", self.rpc_name, self.operation);
                                return;
                            }
                        }
                    }
                }
                Err(error) => error,
            };

            if !error.is_retryable() || attempt >= reconnect.max_attempts {
                let error = if error.is_retryable() {
                    RpcError::internal(format!("stream interrupted: {}", error))
                } else {
                    error.into_rpc_error()
                };
                let _ = tx.send(Response::failure(error)).await;
                return;
            }

            attempt += 1;
            let delay = reconnect.backoff(attempt);
            warn!(
                "stream {}.{} failed ({}), reconnecting in {:?} (attempt {})",
                self.rpc_name, self.operation, error, delay, attempt
            );
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = tx.closed() => return,
            }
        }
    }
}

// ── Shared ──────────────────────────────────────────────────────────

/// Encodes the input and runs the before interceptors.
fn prepare<I>(client: &Client, rpc_name: &str, operation: &str, input: &I) -> Result<(CallContext, Request), RpcError>
where
    I: Serialize + ?Sized,
{
    let input = match serde_json::to_value(input) {
        Ok(Value::Null) => Value::Object(Default::default()),
        Ok(input) => input,
        Err(e) => return Err(RpcError::validation(format!("failed to encode input: {}", e))),
    };

    let inner = &client.inner;
    let mut ctx = CallContext::new(rpc_name, operation);
    let mut request = Request {
        rpc_name: rpc_name.to_string(),
        operation: operation.to_string(),
        input,
        headers: Headers::new(),
    };
    for (name, value) in &inner.headers {
        request.headers.insert(name, value)?;
    }
    for before in inner.interceptors.iter().filter_map(|i| i.before.as_ref()) {
        (ctx, request) = before(ctx, request);
    }
    Ok((ctx, request))
}

// client static -> client providers -> call headers -> call providers
fn resolve_headers(
    client: &Client,
    call_headers: &[(String, String)],
    call_providers: &[HeaderProvider],
    ctx: &CallContext,
    headers: &mut Headers,
) -> Result<(), RpcError> {
    for provider in &client.inner.providers {
        provider(ctx, headers)?;
    }
    for (name, value) in call_headers {
        headers.insert(name, value)?;
    }
    for provider in call_providers {
        provider(ctx, headers)?;
    }
    Ok(())
}

fn decode_event(bytes: &[u8]) -> Response<Value> {
    serde_json::from_slice(bytes).unwrap_or_else(|e| {
        Response::failure(RpcError::internal(format!("received invalid stream event: {}", e)))
    })
}

fn decode_output<O: DeserializeOwned>(response: Response<Value>) -> Response<O> {
    if !response.ok {
        return Response {
            ok:     false,
            output: None,
            error:  response.error,
        };
    }
    match serde_json::from_value(response.output.unwrap_or(Value::Null)) {
        Ok(output) => Response::success(output),
        Err(e) => Response::failure(RpcError::validation(format!("invalid output: {}", e))),
    }
}
