//! urpc
//!
//! Runtime support for generated uRPC clients and servers:
//!
//! - the JSON response envelope and `RpcError`,
//! - `Client` with header providers, interceptors, per-attempt timeouts, jittered
//!   retries and reconnecting stream subscriptions,
//! - `Server` dispatching to typed async procedure and stream handlers,
//! - the `Transport` seam, with an in-process `LocalTransport` and (feature `http`)
//!   an axum router serving streams as server-sent events plus a reqwest-based
//!   `HttpTransport`,
//! - `string_enum!` / `int_enum!` for schema enums.

pub mod client;
pub mod envelope;
pub mod enums;
pub mod error;
pub mod headers;
pub mod server;
pub mod transport;

#[cfg(feature = "http-transport")]
pub mod http;
#[cfg(feature = "http-transport")]
pub mod sse;

pub use client::{
    CallBuilder, CallContext, Client, ClientBuilder, Interceptor, ReconnectConfig, Request, RetryConfig, StreamCall,
};
pub use envelope::Response;
pub use error::{codes, RpcError};
pub use headers::Headers;
pub use server::{HandlerContext, Server};
pub use transport::{EventStream, LocalTransport, Transport, TransportError, TransportRequest};

#[cfg(feature = "http-transport")]
pub use self::http::{router, HttpTransport};

pub use serde;
pub use serde_json;
pub use urpc_schema as schema;
