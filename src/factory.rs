use crate::{
    config::Config,
    dispatcher::{Dispatcher, Exposed},
    session::{CloseReason, PeerHandle, PeerSession},
};
use futures::{Sink, Stream};
use std::{fmt, sync::Arc};
use tokio::task::JoinHandle;

type BuildDispatcher = dyn Fn(PeerHandle, &str) -> Dispatcher + Send + Sync;

enum Source {
    Shared(Arc<Dispatcher>),
    PerSession(Box<BuildDispatcher>),
}

/// Builds a fresh [`PeerSession`] for every connection.
///
/// The methods a session exposes either come from one dispatcher shared by
/// all sessions, or from an [`Exposed`] object created for each session.
pub struct SessionFactory {
    source: Source,
    config: Config,
}

impl SessionFactory {
    pub fn with_dispatcher(dispatcher: impl Into<Arc<Dispatcher>>) -> Self {
        Self {
            source: Source::Shared(dispatcher.into()),
            config: Config::default(),
        }
    }

    /// Expose the prefixed methods of an object built by `make` for each
    /// session. `make` receives the session's handle so the object can call
    /// back into the peer.
    pub fn with_object<T, F>(make: F) -> Self
    where
        T: Exposed,
        F: Fn(PeerHandle) -> T + Send + Sync + 'static,
    {
        let build = move |handle: PeerHandle, prefix: &str| {
            Dispatcher::from_object(Arc::new(make(handle)), prefix)
        };
        Self {
            source: Source::PerSession(Box::new(build)),
            config: Config::default(),
        }
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn build(&self) -> (PeerSession, PeerHandle) {
        let (handle, commands) = PeerHandle::channel();
        let dispatcher = match &self.source {
            Source::Shared(dispatcher) => dispatcher.clone(),
            Source::PerSession(build) => {
                Arc::new(build(handle.clone(), &self.config.method_prefix))
            }
        };
        let session = PeerSession::attach(dispatcher, commands, self.config.name.clone());
        (session, handle)
    }

    /// Build a session and run it over `transport` on a new task.
    pub fn spawn<T, E>(&self, transport: T) -> (PeerHandle, JoinHandle<CloseReason>)
    where
        T: Stream<Item = Result<String, E>> + Sink<String> + Send + 'static,
        E: fmt::Display + Send + 'static,
        <T as Sink<String>>::Error: fmt::Display + Send,
    {
        let (session, handle) = self.build();
        (handle, tokio::spawn(session.run(transport)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{exposed, HandlerError, Params};

    struct Echo {
        _peer: PeerHandle,
    }

    impl Echo {
        async fn do_echo(&self, params: Params) -> Result<Vec<crate::Value>, HandlerError> {
            Ok(params.args)
        }

        async fn rpc_echo(&self, params: Params) -> Result<Vec<crate::Value>, HandlerError> {
            Ok(params.args)
        }
    }

    exposed!(Echo { do_echo, rpc_echo });

    #[test]
    fn shared_dispatcher_is_reused() {
        let mut dispatcher = Dispatcher::new();
        dispatcher.register("ping", |_| async { Ok(crate::Value::Null) });
        let factory = SessionFactory::with_dispatcher(dispatcher);

        let (first, _) = factory.build();
        let (second, _) = factory.build();
        assert!(std::ptr::eq(
            first.manager().dispatcher(),
            second.manager().dispatcher()
        ));
    }

    #[test]
    fn object_is_introspected_with_the_configured_prefix() {
        let factory = SessionFactory::with_object(|peer| Echo { _peer: peer });
        let (session, _) = factory.build();
        let names: Vec<_> = session.manager().dispatcher().method_names().collect();
        assert_eq!(names, ["echo"]);

        let factory = SessionFactory::with_object(|peer| Echo { _peer: peer })
            .config(Config::named("other").method_prefix("rpc_"));
        let (session, _) = factory.build();
        assert_eq!(session.name(), "other");
        assert!(session.manager().dispatcher().contains("echo"));
        assert!(!session.manager().dispatcher().contains("do_echo"));
    }
}
