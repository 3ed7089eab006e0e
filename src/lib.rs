//! Bidirectional JSON RPC between two peers.
//!
//! Either side of a connection can [`request`](PeerHandle::request) a method
//! on the other and await the correlated reply, or
//! [`invoke`](PeerHandle::invoke) one without expecting an answer. Incoming
//! requests are resolved against a [`Dispatcher`] of local handlers.
//!
//! ```no_run
//! use jrpc::{net::client::Client, params, Dispatcher, Params, SessionFactory};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let mut dispatcher = Dispatcher::new();
//! dispatcher.register("log", |params: Params| async move {
//!     println!("{:?}", params.args);
//!     Ok(jrpc::Value::Null)
//! });
//!
//! let factory = SessionFactory::with_dispatcher(dispatcher);
//! let client = Client::connect("127.0.0.1:9000", &factory).await?;
//! let sum = client.handle().request("add", params![2, 3]).await?;
//! # Ok(())
//! # }
//! ```

pub mod calling;
pub mod codec;
pub mod config;
pub mod dispatcher;
pub mod factory;
mod macros;
pub mod net;
pub mod session;
pub mod types;

pub use calling::{CallError, CallManager, CallResult, PendingCall};
pub use codec::{DecodeError, Message, Request, Response};
pub use config::Config;
pub use dispatcher::{
    Attribute, DispatchError, Dispatcher, Exposed, HandlerError, HandlerResult,
};
pub use factory::SessionFactory;
pub use futures::future::BoxFuture;
pub use serde_json::{json, Map, Value};
pub use session::{CloseReason, PeerHandle, PeerSession};
pub use types::{ArgumentError, FromParams, Params};

/// A named, typed handler.
///
/// `Domain` is decoded from the call's [`Params`] before [`call`](RpcFunction::call)
/// runs and the returned `Range` is serialized into the response.
pub trait RpcFunction {
    type Domain: FromParams;
    type Range: serde::Serialize;

    fn name(&self) -> &str;

    fn call(&self, args: Self::Domain) -> BoxFuture<'_, Result<Self::Range, HandlerError>>;
}
