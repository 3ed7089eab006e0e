use crate::{
    codec::{Message, Request, Response},
    dispatcher::{Dispatcher, DynamicHandler, HandlerError, HandlerResult},
    types::Params,
};
use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;
use std::{
    any::Any,
    collections::HashMap,
    future::Future,
    panic::AssertUnwindSafe,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

pub type CallResult = Result<Value, CallError>;

/// Execution of one incoming request. It sends its own response when done.
pub type InFlight = BoxFuture<'static, ()>;

/// Why a call did not produce a result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    /// The peer ran the call and reported a failure.
    #[error("{kind}: {message}")]
    Remote { kind: String, message: String },

    #[error("connection closed: {0}")]
    ConnectionClosed(String),
}

enum Link {
    Open(mpsc::UnboundedSender<String>),
    Closed(String),
}

/// The calls awaiting a reply and the next call id. Ids start at 0 and are
/// never reused.
pub struct CallManager {
    dispatcher: Arc<Dispatcher>,
    pending: HashMap<u64, oneshot::Sender<CallResult>>,
    next_id: u64,
    link: Link,
}

impl CallManager {
    pub fn new(dispatcher: Arc<Dispatcher>, outbound: mpsc::UnboundedSender<String>) -> Self {
        Self {
            dispatcher,
            pending: HashMap::new(),
            next_id: 0,
            link: Link::Open(outbound),
        }
    }

    /// Send a request and return the future of its reply.
    pub fn call(&mut self, method: impl Into<String>, params: Params) -> PendingCall {
        let (slot, rx) = oneshot::channel();
        self.start_call(method, params, slot);
        PendingCall::new(rx)
    }

    /// Send a request whose reply will be delivered to `slot`.
    ///
    /// Returns the assigned id, or `None` when the session is already closed
    /// and `slot` has been failed instead.
    pub fn start_call(
        &mut self,
        method: impl Into<String>,
        params: Params,
        slot: oneshot::Sender<CallResult>,
    ) -> Option<u64> {
        if let Link::Closed(reason) = &self.link {
            let _ = slot.send(Err(CallError::ConnectionClosed(reason.clone())));
            return None;
        }

        // callers that gave up waiting leave a closed slot behind
        self.pending.retain(|_, slot| !slot.is_closed());

        let id = self.next_id;
        self.next_id += 1;

        let request = Request::new(method, params, Some(id));
        debug!(id, method = %request.method, "calling");
        self.pending.insert(id, slot);

        if !self.send(request.into()) {
            if let Some(slot) = self.pending.remove(&id) {
                let _ = slot.send(Err(CallError::ConnectionClosed(
                    "outbound channel closed".to_owned(),
                )));
            }
        }
        Some(id)
    }

    /// Send a request that expects no reply.
    pub fn invoke(&self, method: impl Into<String>, params: Params) -> Result<(), CallError> {
        if let Link::Closed(reason) = &self.link {
            return Err(CallError::ConnectionClosed(reason.clone()));
        }

        let request = Request::new(method, params, None);
        debug!(method = %request.method, "invoking");
        if self.send(request.into()) {
            Ok(())
        } else {
            Err(CallError::ConnectionClosed(
                "outbound channel closed".to_owned(),
            ))
        }
    }

    /// Process one frame received from the peer.
    ///
    /// A request for a known method yields the future running its handler.
    pub fn handle_incoming(&mut self, raw: &str) -> Option<InFlight> {
        match Message::decode(raw) {
            Ok(Message::Request(request)) => self.handle_request(request),
            Ok(Message::Response(response)) => {
                self.handle_response(response);
                None
            }
            Err(e) => {
                warn!(error = %e, "dropping undecodable frame");
                None
            }
        }
    }

    pub fn handle_request(&self, request: Request) -> Option<InFlight> {
        let (method, params, id) = request.into_parts();

        let handler = match self.dispatcher.lookup(&method) {
            Ok(handler) => handler,
            Err(e) => {
                match id {
                    Some(id) => {
                        debug!(id, %method, "method not found");
                        self.send(Response::failure(id, e.kind(), e.to_string()).into());
                    }
                    None => warn!(%method, "notification for unknown method"),
                }
                return None;
            }
        };

        let outbound = match &self.link {
            Link::Open(outbound) => outbound.clone(),
            Link::Closed(_) => return None,
        };

        let execution = async move {
            let outcome = run_handler(handler, params).await;
            match (id, outcome) {
                (Some(id), Ok(result)) => {
                    transmit(&outbound, &Response::success(id, result).into());
                }
                (Some(id), Err(e)) => {
                    debug!(id, %method, kind = %e.kind, "handler failed");
                    transmit(&outbound, &Response::failure(id, e.kind, e.message).into());
                }
                (None, Ok(_)) => {}
                (None, Err(e)) => warn!(%method, error = %e, "notification handler failed"),
            }
        };
        Some(execution.boxed())
    }

    pub fn handle_response(&mut self, response: Response) {
        let Some(slot) = response.id.and_then(|id| self.pending.remove(&id)) else {
            warn!(id = ?response.id, "response does not match any pending call");
            return;
        };

        let outcome = match response.error {
            Some(kind) => Err(CallError::Remote {
                kind,
                message: render(response.result),
            }),
            None => Ok(response.result),
        };
        if slot.send(outcome).is_err() {
            debug!(id = ?response.id, "caller stopped waiting for the reply");
        }
    }

    /// Fail every pending call with [`CallError::ConnectionClosed`] and stop
    /// sending. Returns how many calls were failed.
    pub fn close(&mut self, reason: impl Into<String>) -> usize {
        if let Link::Closed(_) = self.link {
            return 0;
        }
        let reason = reason.into();
        self.link = Link::Closed(reason.clone());

        let failed = self.pending.len();
        for (_, slot) in self.pending.drain() {
            let _ = slot.send(Err(CallError::ConnectionClosed(reason.clone())));
        }
        failed
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.link, Link::Closed(_))
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, id: u64) -> bool {
        self.pending.contains_key(&id)
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    fn send(&self, message: Message) -> bool {
        match &self.link {
            Link::Open(outbound) => transmit(outbound, &message),
            Link::Closed(_) => false,
        }
    }
}

impl Drop for CallManager {
    fn drop(&mut self) {
        if !self.pending.is_empty() {
            self.close("session dropped");
        }
    }
}

fn transmit(outbound: &mpsc::UnboundedSender<String>, message: &Message) -> bool {
    match message.encode() {
        Ok(text) => outbound.send(text).is_ok(),
        Err(e) => {
            error!(error = %e, "failed to encode outgoing message");
            false
        }
    }
}

async fn run_handler(handler: Arc<dyn DynamicHandler>, params: Params) -> HandlerResult {
    let invocation = async move { handler.call(params).await };
    match AssertUnwindSafe(invocation).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(panic) => Err(HandlerError::new(
            HandlerError::PANIC,
            panic_message(&*panic),
        )),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked".to_owned()
    }
}

fn render(result: Value) -> String {
    match result {
        Value::String(message) => message,
        other => other.to_string(),
    }
}

/// Reply to a call made with [`CallManager::call`] or
/// [`PeerHandle::request`](crate::PeerHandle::request).
///
/// Resolves exactly once: with the peer's result, with the peer's reported
/// error, or with [`CallError::ConnectionClosed`] when the session ends first.
#[must_use = "the reply is lost unless the call is awaited"]
pub struct PendingCall {
    rx: oneshot::Receiver<CallResult>,
}

impl PendingCall {
    pub(crate) fn new(rx: oneshot::Receiver<CallResult>) -> Self {
        Self { rx }
    }
}

impl Future for PendingCall {
    type Output = CallResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|received| {
            received
                .unwrap_or_else(|_| Err(CallError::ConnectionClosed("session dropped".to_owned())))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params;
    use serde_json::json;
    use std::sync::Mutex;

    fn manager(dispatcher: Dispatcher) -> (CallManager, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (CallManager::new(Arc::new(dispatcher), tx), rx)
    }

    fn arithmetic() -> Dispatcher {
        let mut dispatcher = Dispatcher::new();
        dispatcher
            .register("add", |params: Params| async move {
                Ok(json!(params.arg::<i64>(0)? + params.arg::<i64>(1)?))
            })
            .register("fail", |_| async {
                Err(HandlerError::new("ValueError", "bad value"))
            })
            .register("explode", |_| async { panic!("kaboom") });
        dispatcher
    }

    #[test]
    fn call_ids_strictly_increase() {
        let (mut manager, mut outbound) = manager(Dispatcher::new());

        let calls: Vec<_> = (0..3).map(|_| manager.call("tick", Params::default())).collect();
        assert!((0..3).all(|id| manager.is_pending(id)));
        assert_eq!(manager.pending_len(), calls.len());

        let (slot, _rx) = oneshot::channel();
        assert_eq!(manager.start_call("tick", Params::default(), slot), Some(3));

        let first = outbound.try_recv().unwrap();
        assert_eq!(first, r#"{"method":"tick","args":[],"kwargs":{},"id":0}"#);
    }

    #[test]
    fn invoke_never_creates_a_pending_entry() {
        let (manager, mut outbound) = manager(Dispatcher::new());

        manager.invoke("log", params!["hello"]).unwrap();
        assert_eq!(manager.pending_len(), 0);
        assert_eq!(
            outbound.try_recv().unwrap(),
            r#"{"method":"log","args":["hello"],"kwargs":{},"id":null}"#
        );
    }

    #[tokio::test]
    async fn response_resolves_its_call_once() {
        let (mut manager, _outbound) = manager(Dispatcher::new());
        let call = manager.call("add", params![2, 3]);

        assert!(manager
            .handle_incoming(r#"{"id":0,"result":5,"error":null}"#)
            .is_none());
        assert!(!manager.is_pending(0));
        assert_eq!(call.await, Ok(json!(5)));

        // a duplicate reply finds nothing to resolve
        manager.handle_incoming(r#"{"id":0,"result":6,"error":null}"#);
        assert_eq!(manager.pending_len(), 0);
    }

    #[tokio::test]
    async fn replies_may_arrive_out_of_order() {
        let (mut manager, _outbound) = manager(Dispatcher::new());
        let first = manager.call("slow", Params::default());
        let second = manager.call("fast", Params::default());

        manager.handle_incoming(r#"{"id":1,"result":"fast","error":null}"#);
        manager.handle_incoming(r#"{"id":0,"result":"slow","error":null}"#);

        assert_eq!(second.await, Ok(json!("fast")));
        assert_eq!(first.await, Ok(json!("slow")));
    }

    #[tokio::test]
    async fn error_reply_fails_the_call() {
        let (mut manager, _outbound) = manager(Dispatcher::new());
        let call = manager.call("missing", Params::default());

        manager.handle_incoming(
            r#"{"id":0,"result":"`missing` is not an available method.","error":"MethodNotFound"}"#,
        );
        assert_eq!(
            call.await,
            Err(CallError::Remote {
                kind: "MethodNotFound".into(),
                message: "`missing` is not an available method.".into(),
            })
        );
    }

    #[tokio::test]
    async fn unmatched_reply_is_ignored() {
        let (mut manager, _outbound) = manager(Dispatcher::new());
        let call = manager.call("add", params![1, 1]);

        manager.handle_incoming(r#"{"id":99,"result":1,"error":null}"#);
        manager.handle_incoming(r#"{"id":null,"result":1,"error":null}"#);
        assert!(manager.is_pending(0));

        manager.handle_incoming(r#"{"id":0,"result":2,"error":null}"#);
        assert_eq!(call.await, Ok(json!(2)));
    }

    #[test]
    fn undecodable_frames_are_not_fatal() {
        let (mut manager, mut outbound) = manager(Dispatcher::new());
        assert!(manager.handle_incoming("{{{").is_none());
        assert!(manager.handle_incoming(r#"{"hello":"world"}"#).is_none());
        assert!(outbound.try_recv().is_err());
        assert!(!manager.is_closed());
    }

    #[tokio::test]
    async fn close_fails_every_pending_call() {
        let (mut manager, mut outbound) = manager(Dispatcher::new());
        let mut calls: Vec<_> = (0..5).map(|_| manager.call("work", Params::default())).collect();
        for id in 0..3 {
            manager.handle_incoming(&format!(r#"{{"id":{id},"result":null,"error":null}}"#));
        }
        let open: Vec<_> = calls.drain(3..).collect();
        assert!(manager.is_pending(3) && manager.is_pending(4));

        assert_eq!(manager.close("peer went away"), 2);
        assert_eq!(manager.pending_len(), 0);
        for call in open {
            assert_eq!(
                call.await,
                Err(CallError::ConnectionClosed("peer went away".into()))
            );
        }

        while outbound.try_recv().is_ok() {}
        let (slot, late) = oneshot::channel();
        assert_eq!(manager.start_call("work", Params::default(), slot), None);
        let late = PendingCall::new(late);
        assert!(outbound.try_recv().is_err());
        assert_eq!(
            late.await,
            Err(CallError::ConnectionClosed("peer went away".into()))
        );
        assert!(manager.invoke("log", Params::default()).is_err());
    }

    #[tokio::test]
    async fn abandoned_calls_are_reaped_on_the_next_call() {
        let (mut manager, _outbound) = manager(Dispatcher::new());
        drop(manager.call("slow", Params::default()));
        assert!(manager.is_pending(0));

        let call = manager.call("fast", Params::default());
        assert!(!manager.is_pending(0));
        assert_eq!(manager.pending_len(), 1);

        // a late reply for the abandoned call is ignored
        manager.handle_incoming(r#"{"id":0,"result":"slow","error":null}"#);
        manager.handle_incoming(r#"{"id":1,"result":"fast","error":null}"#);
        assert_eq!(call.await, Ok(json!("fast")));
    }

    #[tokio::test]
    async fn dropping_the_manager_fails_pending_calls() {
        let (mut manager, _outbound) = manager(Dispatcher::new());
        let call = manager.call("work", Params::default());
        drop(manager);
        assert!(matches!(call.await, Err(CallError::ConnectionClosed(_))));
    }

    #[tokio::test]
    async fn request_is_answered_with_the_handler_result() {
        let (mut manager, mut outbound) = manager(arithmetic());

        let execution = manager
            .handle_incoming(r#"{"method":"add","args":[2,3],"kwargs":{},"id":0}"#)
            .unwrap();
        execution.await;
        assert_eq!(outbound.recv().await.unwrap(), r#"{"id":0,"result":5,"error":null}"#);
    }

    #[test]
    fn unknown_method_is_reported_to_the_caller() {
        let (mut manager, mut outbound) = manager(arithmetic());

        let execution =
            manager.handle_incoming(r#"{"method":"missing","args":[],"kwargs":{},"id":4}"#);
        assert!(execution.is_none());
        assert_eq!(
            outbound.try_recv().unwrap(),
            r#"{"id":4,"result":"`missing` is not an available method.","error":"MethodNotFound"}"#
        );

        // without an id nothing is sent back
        manager.handle_incoming(r#"{"method":"missing","args":[],"kwargs":{},"id":null}"#);
        assert!(outbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn handler_failures_become_error_replies() {
        let (mut manager, mut outbound) = manager(arithmetic());

        manager
            .handle_incoming(r#"{"method":"fail","id":1}"#)
            .unwrap()
            .await;
        assert_eq!(
            outbound.recv().await.unwrap(),
            r#"{"id":1,"result":"bad value","error":"ValueError"}"#
        );

        manager
            .handle_incoming(r#"{"method":"add","args":["two",3],"id":2}"#)
            .unwrap()
            .await;
        let reply: Response = serde_json::from_str(&outbound.recv().await.unwrap()).unwrap();
        assert_eq!(reply.error.as_deref(), Some(HandlerError::INVALID_PARAMS));

        manager
            .handle_incoming(r#"{"method":"explode","id":3}"#)
            .unwrap()
            .await;
        assert_eq!(
            outbound.recv().await.unwrap(),
            r#"{"id":3,"result":"kaboom","error":"Panic"}"#
        );
    }

    #[tokio::test]
    async fn notifications_never_produce_replies() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut dispatcher = arithmetic();
        let log = seen.clone();
        dispatcher.register("log", move |params: Params| {
            let log = log.clone();
            async move {
                log.lock().unwrap().push(params.arg::<String>(0)?);
                Ok(Value::Null)
            }
        });
        let (mut manager, mut outbound) = manager(dispatcher);

        manager
            .handle_incoming(r#"{"method":"log","args":["hello"],"kwargs":{},"id":null}"#)
            .unwrap()
            .await;
        manager
            .handle_incoming(r#"{"method":"fail","id":null}"#)
            .unwrap()
            .await;

        assert_eq!(*seen.lock().unwrap(), ["hello"]);
        assert!(outbound.try_recv().is_err());
        assert_eq!(manager.pending_len(), 0);
    }
}
