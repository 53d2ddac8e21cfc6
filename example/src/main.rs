// example/src/main.rs

mod generated;

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{bail, ensure, Context};
use futures::StreamExt;
use tracing::info;
use tracing_subscriber::EnvFilter;
use urpc::schema::{ConstValue, Schema};
use urpc::{Client, HandlerContext, Headers, LocalTransport, RpcError, Server};
use urpc_compiler::{compile_file, FileSystem};

use generated::{CountdownInput, GreetInput, Greeting, GreeterClient, Language, Tick, Tone};

/// What the host hands every handler, built from the request headers.
struct Props {
    caller: Option<String>,
}

fn props_from_headers(headers: &Headers) -> Props {
    Props {
        caller: headers.get("x-caller").map(str::to_string),
    }
}

/// Fails when the compiled schema and the hand-written bindings drift apart.
fn check_bindings(schema: &Schema, server: &Server<Props>) -> anyhow::Result<()> {
    let missing = server.missing_handlers(&schema.catalog);
    if !missing.is_empty() {
        bail!("no handler for {}", missing.join(", "));
    }

    let Some(constant) = schema.constants.iter().find(|c| c.name == "DEFAULT_LANGUAGE") else {
        bail!("schema has no DEFAULT_LANGUAGE constant");
    };
    ensure!(
        matches!(&constant.value, ConstValue::String(value) if value == generated::DEFAULT_LANGUAGE),
        "bindings disagree with the schema: DEFAULT_LANGUAGE is {:?}, bindings say {:?}",
        constant.value,
        generated::DEFAULT_LANGUAGE
    );
    Ok(())
}

fn greeter_server() -> Server<Props> {
    let counts: Arc<Mutex<HashMap<String, i64>>> = Arc::default();
    let greet = move |ctx: HandlerContext<Props, GreetInput>| {
        let counts = Arc::clone(&counts);
        async move {
            let input = ctx.input;
            if input.name.is_empty() || input.name.chars().count() as i64 > generated::MAX_NAME_LENGTH {
                return Err(RpcError::validation(format!(
                    "name must be 1..={} characters",
                    generated::MAX_NAME_LENGTH
                )));
            }

            let count = {
                let mut counts = counts.lock().map_err(|_| RpcError::internal("greeting counter poisoned"))?;
                let count = counts.entry(input.name.clone()).or_insert(0);
                *count += 1;
                *count
            };

            let language = input.language.unwrap_or(Language::En);
            let hello = match language {
                Language::En => "Hello",
                Language::Es => "Hola",
            };
            let mark = match input.tone {
                Tone::Plain => ".",
                Tone::Excited => "!",
            };
            let from = ctx.props.caller.map(|c| format!(" (from {})", c)).unwrap_or_default();

            info!("greeting {} -> {}", input.name, generated::greeted_events(language.as_str(), &input.name));
            Ok::<_, RpcError>(Greeting {
                message: format!("{}, {}{}{}", hello, input.name, mark, from),
                language,
                count,
            })
        }
    };
    let countdown = |ctx: HandlerContext<Props, CountdownInput>| {
        let from = ctx.input.from.max(0);
        futures::stream::iter((0..=from).rev().map(|remaining| Ok::<_, RpcError>(Tick { remaining })))
    };
    generated::serve_greeter(Server::<Props>::new(), greet, countdown)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Compile the schema the bindings were written against.
    let fs = FileSystem::new();
    let entry = Path::new(env!("CARGO_MANIFEST_DIR")).join("schema/greeter.urpc");
    let schema = compile_file(&fs, &entry).with_context(|| format!("compiling {}", entry.display()))?;
    for op in schema.catalog.operations() {
        info!("operation {} ({} -> {})", op.path, op.input, op.output);
    }

    let server = greeter_server();
    check_bindings(&schema, &server)?;

    let transport = LocalTransport::new(Arc::new(server), props_from_headers);
    let greeter = GreeterClient::new(Client::builder(transport).header("X-Caller", "example-app").build());

    let inputs = [
        GreetInput { name: "Ada".into(), language: None, tone: Tone::Plain },
        GreetInput { name: "Ada".into(), language: Some(Language::Es), tone: Tone::Excited },
        GreetInput { name: String::new(), language: None, tone: Tone::Plain },
    ];
    for input in &inputs {
        match greeter.greet(input).await {
            Ok(greeting) => println!("{}", serde_json::to_string(&greeting)?),
            Err(err) => println!("error: {}", err),
        }
    }

    let mut ticks = greeter.countdown(&CountdownInput { from: 3 });
    while let Some(event) = ticks.next().await {
        let tick = event.into_result()?;
        println!("countdown {}", tick.remaining);
    }
    Ok(())
}
