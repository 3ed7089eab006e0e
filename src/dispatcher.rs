use crate::{
    types::{FromParams, Params},
    RpcFunction,
};
use futures::future::{BoxFuture, FutureExt};
use serde::Serialize;
use serde_json::Value;
use std::{collections::BTreeMap, fmt, future::Future, sync::Arc};
use thiserror::Error;

pub type HandlerResult = Result<Value, HandlerError>;

/// Maps method names to local handlers.
#[derive(Default)]
pub struct Dispatcher {
    handlers: BTreeMap<String, Arc<dyn DynamicHandler>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `name`, replacing any previous handler.
    pub fn register<F, Fut>(&mut self, name: impl Into<String>, handler: F) -> &mut Self
    where
        F: Fn(Params) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.handlers.insert(name.into(), Arc::new(FnHandler(handler)));
        self
    }

    /// Register a typed [`RpcFunction`] under its own name.
    pub fn add<RFn>(&mut self, rpc_function: RFn) -> &mut Self
    where
        RFn: RpcFunction + Send + Sync + 'static,
    {
        let name = rpc_function.name().to_owned();
        self.handlers
            .insert(name, Arc::new(TypedRpcFunction { rpc_function }));
        self
    }

    /// Collect every attribute of `object` whose name starts with `prefix`,
    /// registered under the remainder of its name.
    pub fn from_object<T: Exposed>(object: Arc<T>, prefix: &str) -> Self {
        let mut dispatcher = Self::new();
        for Attribute { name, method } in T::attributes() {
            let Some(suffix) = name.strip_prefix(prefix).filter(|s| !s.is_empty()) else {
                continue;
            };
            let object = object.clone();
            dispatcher.handlers.insert(
                suffix.to_owned(),
                Arc::new(FnHandler(move |params| method(object.clone(), params))),
            );
        }
        dispatcher
    }

    pub fn lookup(&self, name: &str) -> Result<Arc<dyn DynamicHandler>, DispatchError> {
        self.handlers
            .get(name)
            .cloned()
            .ok_or_else(|| DispatchError::MethodNotFound(name.to_owned()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn method_names(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_set().entries(self.method_names()).finish()
    }
}

/// A type-erased handler as stored in the [`Dispatcher`].
pub trait DynamicHandler: Send + Sync {
    fn call(self: Arc<Self>, params: Params) -> BoxFuture<'static, HandlerResult>;
}

struct FnHandler<F>(F);

impl<F, Fut> DynamicHandler for FnHandler<F>
where
    F: Fn(Params) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(self: Arc<Self>, params: Params) -> BoxFuture<'static, HandlerResult> {
        (self.0)(params).boxed()
    }
}

struct TypedRpcFunction<RFn> {
    rpc_function: RFn,
}

impl<RFn> DynamicHandler for TypedRpcFunction<RFn>
where
    RFn: RpcFunction + Send + Sync + 'static,
{
    fn call(self: Arc<Self>, params: Params) -> BoxFuture<'static, HandlerResult> {
        async move {
            let domain = RFn::Domain::from_params(params)?;
            encode_result(self.rpc_function.call(domain).await)
        }
        .boxed()
    }
}

/// Serialize the successful value of a handler into its wire form.
pub fn encode_result<R: Serialize>(result: Result<R, HandlerError>) -> HandlerResult {
    let range = result?;
    serde_json::to_value(range)
        .map_err(|e| HandlerError::new(HandlerError::ENCODE, e.to_string()))
}

/// An object whose methods can be invoked by the remote peer.
///
/// Implementations list their callable attributes; the [`exposed!`](crate::exposed)
/// macro writes the table from a list of method names.
pub trait Exposed: Send + Sync + Sized + 'static {
    fn attributes() -> Vec<Attribute<Self>>;
}

pub struct Attribute<T> {
    pub name: &'static str,
    pub method: fn(Arc<T>, Params) -> BoxFuture<'static, HandlerResult>,
}

impl<T> Attribute<T> {
    pub fn new(
        name: &'static str,
        method: fn(Arc<T>, Params) -> BoxFuture<'static, HandlerResult>,
    ) -> Self {
        Self { name, method }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("`{0}` is not an available method.")]
    MethodNotFound(String),
}

impl DispatchError {
    pub fn kind(&self) -> &'static str {
        match self {
            DispatchError::MethodNotFound(_) => "MethodNotFound",
        }
    }
}

/// Failure of a local handler, reported to the caller as `error = kind`,
/// `result = message`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct HandlerError {
    pub kind: String,
    pub message: String,
}

impl HandlerError {
    pub const FAILURE: &'static str = "HandlerFailure";
    pub const INVALID_PARAMS: &'static str = "InvalidParams";
    pub const ENCODE: &'static str = "EncodeError";
    pub const PANIC: &'static str = "Panic";

    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self::new(Self::FAILURE, message)
    }
}

impl From<crate::types::ArgumentError> for HandlerError {
    fn from(e: crate::types::ArgumentError) -> Self {
        Self::new(Self::INVALID_PARAMS, e.to_string())
    }
}
