use std::time::Duration;

use jrpc::{
    call, exposed, name,
    net::{client::Client, server::Server},
    params, Dispatcher, HandlerError, Params, PeerHandle, RpcFunction, SessionFactory, Value,
};
use tokio::task;

pub struct Hello;

impl RpcFunction for Hello {
    name!("hello");
    call! {
        async fn call(&self, (name,): (String,)) -> String {
            Ok(format!("Hello, {name}!"))
        }
    }
}

/// Server side object. Every `do_` method is callable by clients.
struct Pinger {
    client: PeerHandle,
}

impl Pinger {
    async fn do_ping(&self, _params: Params) -> Result<&'static str, HandlerError> {
        Ok("pong")
    }

    async fn do_greet(&self, _params: Params) -> Result<String, HandlerError> {
        let name = self
            .client
            .request("whoami", Params::default())
            .await
            .map_err(|e| HandlerError::failure(e.to_string()))?;
        Ok(format!("Hello, {}!", name.as_str().unwrap_or("stranger")))
    }
}

exposed!(Pinger { do_ping, do_greet });

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let server = Server::new(SessionFactory::with_object(|client| Pinger { client }));
    task::spawn(server.serve_tcp("127.0.0.1:8888"));
    tokio::time::sleep(Duration::from_secs_f32(0.01)).await;

    let mut dispatcher = Dispatcher::new();
    dispatcher
        .add(Hello)
        .register("whoami", |_| async { Ok(Value::from("ping demo")) })
        .register("log", |params: Params| async move {
            println!("server says {:?}", params.args);
            Ok(Value::Null)
        });
    let client = Client::connect("127.0.0.1:8888", &SessionFactory::with_dispatcher(dispatcher)).await?;

    println!("ping -> {}", client.handle().request("ping", Params::default()).await?);
    println!("greet -> {}", client.handle().request("greet", Params::default()).await?);
    client.handle().invoke("ping", params![])?;

    match client.handle().request("shutdown", params![; now = true]).await {
        Ok(value) => println!("shutdown -> {value}"),
        Err(e) => println!("shutdown failed: {e}"),
    }

    client.close();
    println!("session ended: {}", client.closed().await);
    Ok(())
}
