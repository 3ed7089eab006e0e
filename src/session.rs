//! One peer session bound to one connection.

use crate::{
    calling::{CallError, CallManager, CallResult, InFlight, PendingCall},
    dispatcher::Dispatcher,
    types::Params,
};
use futures::{future::poll_fn, ready, stream::FuturesUnordered, Sink, SinkExt, Stream, StreamExt};
use std::{
    fmt,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info_span, warn, Instrument};

#[derive(Debug)]
pub(crate) enum Command {
    Call {
        method: String,
        params: Params,
        reply: oneshot::Sender<CallResult>,
    },
    Invoke {
        method: String,
        params: Params,
    },
    Close,
}

/// Cloneable access to a running session from any task.
#[derive(Debug, Clone)]
pub struct PeerHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl PeerHandle {
    pub(crate) fn channel() -> (Self, mpsc::UnboundedReceiver<Command>) {
        let (commands, rx) = mpsc::unbounded_channel();
        (Self { commands }, rx)
    }

    /// Call `method` on the peer. Returns immediately; the returned future
    /// resolves with the reply.
    pub fn request(&self, method: impl Into<String>, params: Params) -> PendingCall {
        let (reply, rx) = oneshot::channel();
        let command = Command::Call {
            method: method.into(),
            params,
            reply,
        };
        if let Err(mpsc::error::SendError(Command::Call { reply, .. })) = self.commands.send(command)
        {
            let _ = reply.send(Err(session_ended()));
        }
        PendingCall::new(rx)
    }

    /// Call `method` on the peer without expecting a reply.
    pub fn invoke(&self, method: impl Into<String>, params: Params) -> Result<(), CallError> {
        self.commands
            .send(Command::Invoke {
                method: method.into(),
                params,
            })
            .map_err(|_| session_ended())
    }

    /// Ask the session to shut down. Pending calls fail with
    /// [`CallError::ConnectionClosed`].
    pub fn close(&self) {
        let _ = self.commands.send(Command::Close);
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    /// Wait until the session has ended.
    pub async fn closed(&self) {
        self.commands.closed().await
    }
}

fn session_ended() -> CallError {
    CallError::ConnectionClosed("session ended".to_owned())
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer closed the connection.
    PeerClosed,
    /// [`PeerHandle::close`] was called.
    Requested,
    /// Reading from or writing to the connection failed.
    Transport(String),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CloseReason::PeerClosed => f.write_str("peer closed the connection"),
            CloseReason::Requested => f.write_str("closed locally"),
            CloseReason::Transport(e) => write!(f, "transport error: {e}"),
        }
    }
}

pub struct PeerSession {
    name: String,
    manager: CallManager,
    commands: mpsc::UnboundedReceiver<Command>,
    outbound: mpsc::UnboundedReceiver<String>,
    in_flight: FuturesUnordered<InFlight>,
}

impl PeerSession {
    pub fn new(dispatcher: Arc<Dispatcher>) -> (Self, PeerHandle) {
        let (handle, commands) = PeerHandle::channel();
        (Self::attach(dispatcher, commands, "peer"), handle)
    }

    pub(crate) fn attach(
        dispatcher: Arc<Dispatcher>,
        commands: mpsc::UnboundedReceiver<Command>,
        name: impl Into<String>,
    ) -> Self {
        let (outbound_tx, outbound) = mpsc::unbounded_channel();
        Self {
            name: name.into(),
            manager: CallManager::new(dispatcher, outbound_tx),
            commands,
            outbound,
            in_flight: FuturesUnordered::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn manager(&self) -> &CallManager {
        &self.manager
    }

    pub fn on_open(&self) {
        debug!(
            methods = ?self.manager.dispatcher(),
            "session open"
        );
    }

    pub fn on_message(&mut self, frame: &str) {
        if let Some(execution) = self.manager.handle_incoming(frame) {
            self.in_flight.push(execution);
        }
    }

    /// Fail every pending call and drop running handlers.
    pub fn on_close(&mut self, reason: &CloseReason) {
        let failed = self.manager.close(reason.to_string());
        let abandoned = self.in_flight.len();
        self.in_flight = FuturesUnordered::new();
        debug!(%reason, failed, abandoned, "session closed");
    }

    /// Serve the session over `transport` until either side closes it.
    ///
    /// `transport` must deliver whole frames in the order the peer sent them.
    pub async fn run<T, E>(self, transport: T) -> CloseReason
    where
        T: Stream<Item = Result<String, E>> + Sink<String>,
        E: fmt::Display,
        <T as Sink<String>>::Error: fmt::Display,
    {
        let span = info_span!("session", name = %self.name);
        self.drive(transport).instrument(span).await
    }

    async fn drive<T, E>(mut self, transport: T) -> CloseReason
    where
        T: Stream<Item = Result<String, E>> + Sink<String>,
        E: fmt::Display,
        <T as Sink<String>>::Error: fmt::Display,
    {
        let (mut sink, mut stream) = transport.split();
        let mut accepting_commands = true;
        self.on_open();

        let reason = loop {
            tokio::select! {
                frame = stream.next() => match frame {
                    Some(Ok(frame)) => self.on_message(&frame),
                    Some(Err(e)) => break CloseReason::Transport(e.to_string()),
                    None => break CloseReason::PeerClosed,
                },
                Err(e) = poll_fn(|cx| pump(cx, &mut sink, &mut self.outbound)) => {
                    break CloseReason::Transport(e.to_string());
                }
                command = self.commands.recv(), if accepting_commands => match command {
                    Some(Command::Call { method, params, reply }) => {
                        self.manager.start_call(method, params, reply);
                    }
                    Some(Command::Invoke { method, params }) => {
                        if let Err(e) = self.manager.invoke(method, params) {
                            warn!(error = %e, "invoke dropped");
                        }
                    }
                    Some(Command::Close) => break CloseReason::Requested,
                    None => accepting_commands = false,
                },
                Some(()) = self.in_flight.next(), if !self.in_flight.is_empty() => {}
            }
        };

        self.on_close(&reason);
        if reason == CloseReason::Requested {
            if let Err(e) = sink.close().await {
                debug!(error = %e, "failed to close transport");
            }
        }
        reason
    }
}

/// Move queued frames into `sink` and flush them. Only completes on a write
/// error; otherwise stays pending so the loop keeps reading meanwhile.
fn pump<S>(
    cx: &mut Context<'_>,
    sink: &mut S,
    outbound: &mut mpsc::UnboundedReceiver<String>,
) -> Poll<Result<(), S::Error>>
where
    S: Sink<String> + Unpin,
{
    loop {
        ready!(Pin::new(&mut *sink).poll_ready(cx))?;
        match outbound.poll_recv(cx) {
            Poll::Ready(Some(frame)) => Pin::new(&mut *sink).start_send(frame)?,
            Poll::Ready(None) | Poll::Pending => {
                ready!(Pin::new(&mut *sink).poll_flush(cx))?;
                return Poll::Pending;
            }
        }
    }
}
