//! Transaction handler registry and per-connection dispatch
// (c) 2025 Ross Younger

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, RwLock};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::protocol::wire::TransactionId;
use crate::stream::Stream;

/// The reserved name under which the fallback handler lives.
pub const DEFAULT_HANDLER_NAME: &str = "default";

type HandlerFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

/// A registered transaction handler, type-erased.
pub(crate) type BoxedHandler =
    Arc<dyn Fn(Connection, Stream, String, TransactionId) -> HandlerFuture + Send + Sync>;

/// Boxes a plain async closure into storable form.
pub(crate) fn boxed<F, Fut>(f: F) -> BoxedHandler
where
    F: Fn(Connection, Stream, String, TransactionId) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(move |conn, stream, name, id| Box::pin(f(conn, stream, name, id)))
}

/// Maps transaction names to handlers, with a distinguished fallback.
pub(crate) struct HandlerMap {
    handlers: HashMap<String, BoxedHandler>,
    default: BoxedHandler,
}

impl HandlerMap {
    pub(crate) fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            default: boxed(|_conn, _stream, name, _id| async move {
                info!("no handler registered for transaction '{name}'");
                Ok(())
            }),
        }
    }

    /// Registers a handler. The name "default" is reserved; use
    /// [`set_default`](Self::set_default) for the fallback.
    pub(crate) fn register(&mut self, name: &str, handler: BoxedHandler) -> Result<()> {
        if name == DEFAULT_HANDLER_NAME {
            return Err(Error::ReservedName);
        }
        let _ = self.handlers.insert(name.to_string(), handler);
        Ok(())
    }

    /// Replaces the fallback handler.
    pub(crate) fn set_default(&mut self, handler: BoxedHandler) {
        self.default = handler;
    }

    /// Finds the handler for a transaction name, falling back to the default.
    pub(crate) fn lookup(&self, name: &str) -> BoxedHandler {
        self.handlers.get(name).unwrap_or(&self.default).clone()
    }
}

/// Hands handler errors to whoever subscribed via
/// [`Peer::error_channel`](crate::Peer::error_channel).
/// Errors raised before anyone subscribes are dropped (they are still logged).
#[derive(Clone, Default)]
pub(crate) struct ErrorSink(Arc<Mutex<Option<mpsc::UnboundedSender<Error>>>>);

impl ErrorSink {
    pub(crate) fn subscribe(&self) -> mpsc::UnboundedReceiver<Error> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.0.lock().expect("error sink lock poisoned") = Some(tx);
        rx
    }

    pub(crate) fn forward(&self, e: Error) {
        let guard = self.0.lock().expect("error sink lock poisoned");
        if let Some(tx) = guard.as_ref() {
            let _ = tx.send(e);
        }
    }
}

/// Per-connection dispatcher.
///
/// Accepts streams from the QUIC connection until it closes (or the peer's
/// cancellation token fires), performs the server-side handshake on each,
/// and runs the matching handler in its own task. Handler failures go to
/// the error sink; they never take down the accept loop or any other
/// transaction.
pub(crate) async fn dispatch(
    conn: Connection,
    handlers: Arc<RwLock<HandlerMap>>,
    errors: ErrorSink,
    token: CancellationToken,
) {
    loop {
        let accepted = tokio::select! {
            () = token.cancelled() => {
                debug!("dispatcher cancelled");
                return;
            }
            r = conn.quic().accept_bi() => r,
        };
        let pair = match accepted {
            Ok(pair) => pair,
            Err(quinn::ConnectionError::ApplicationClosed(close)) => {
                info!(
                    "connection closed by peer: {}",
                    String::from_utf8_lossy(&close.reason)
                );
                return;
            }
            Err(quinn::ConnectionError::ConnectionClosed(_)) => {
                info!("connection closed");
                return;
            }
            Err(quinn::ConnectionError::LocallyClosed) => {
                debug!("connection closed locally");
                return;
            }
            Err(quinn::ConnectionError::TimedOut) => {
                info!("connection timed out: no recent network activity");
                return;
            }
            Err(e) => {
                error!("accepting stream: {e}");
                return;
            }
        };
        debug!("stream accepted from {}", conn.remote_address());

        let conn = conn.clone();
        let handlers = handlers.clone();
        let errors = errors.clone();
        drop(tokio::spawn(async move {
            let mut stream = Stream::new(pair);
            let transaction = match stream.handshake_server().await {
                Ok(t) => t,
                Err(e) => {
                    debug!("transaction handshake failed: {e}");
                    stream.close();
                    return;
                }
            };
            let handler = handlers
                .read()
                .expect("handler registry lock poisoned")
                .lookup(&transaction.name);
            if let Err(e) = handler(conn, stream, transaction.name.clone(), transaction.id).await {
                error!("transaction '{}' handler failed: {e}", transaction.name);
                errors.forward(e);
            }
            // The handler owned the stream; dropping it closed the transaction.
        }));
    }
}
