// Bindings for example/schema/greeter.urpc, in the shape a code generator
// would emit them from the compiled IR.

use std::future::Future;

use futures::stream::{BoxStream, Stream};
use serde::{Deserialize, Serialize};
use urpc::{Client, HandlerContext, Response, RpcError, Server};

pub const DEFAULT_LANGUAGE: &str = "en";
pub const MAX_NAME_LENGTH: i64 = 64;

urpc::string_enum! {
    pub enum Language {
        En = "en",
        Es = "es",
    }
}

urpc::int_enum! {
    pub enum Tone {
        Plain = 1,
        Excited = 2,
    }
}

/// Who to greet and how.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GreetInput {
    pub name:     String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<Language>,
    pub tone:     Tone,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Greeting {
    pub message:  String,
    pub language: Language,
    /// Times this name has been greeted so far.
    pub count:    i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CountdownInput {
    pub from: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tick {
    pub remaining: i64,
}

/// `events.greeter.{language}.{name}`
pub fn greeted_events(language: &str, name: &str) -> String {
    format!("events.greeter.{}.{}", language, name)
}

// Greeter

pub struct GreeterClient {
    client: Client,
}

impl GreeterClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Builds a greeting for one person.
    pub async fn greet(&self, input: &GreetInput) -> Result<Greeting, RpcError> {
        self.client.proc("Greeter", "Greet", input).await
    }

    /// Counts down to zero, one tick per event.
    pub fn countdown(&self, input: &CountdownInput) -> BoxStream<'static, Response<Tick>> {
        self.client.stream("Greeter", "Countdown").subscribe(input)
    }
}

pub fn serve_greeter<P, F, Fut, C, S>(server: Server<P>, greet: F, countdown: C) -> Server<P>
where
    P: Send + 'static,
    F: Fn(HandlerContext<P, GreetInput>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Greeting, RpcError>> + Send + 'static,
    C: Fn(HandlerContext<P, CountdownInput>) -> S + Send + Sync + 'static,
    S: Stream<Item = Result<Tick, RpcError>> + Send + 'static,
{
    server.proc("Greeter", "Greet", greet).stream("Greeter", "Countdown", countdown)
}
