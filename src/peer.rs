//! Peer façade: initialisation, dial, listen and handler registration
// (c) 2025 Ross Younger

use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use quinn::VarInt;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::connection::{CLOSE_REASON, Connection};
use crate::error::{Error, Result};
use crate::handler::{self, ErrorSink, HandlerMap};
use crate::protocol::wire::TransactionId;
use crate::stream::Stream;
use crate::transport;
use crate::util::{AddressFamily, LogLevel, lookup_host_by_family};

/// Hard deadline for establishing an outbound connection.
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// The top-level protocol instance.
///
/// A peer is symmetric: the same instance can dial out, listen, or both, and
/// every connection it holds runs a dispatcher routing incoming transactions
/// to the registered handlers. Register handlers before calling
/// [`dial`](Self::dial) or [`listen`](Self::listen); registration remains
/// possible afterwards but transactions already in flight keep the handler
/// they resolved.
pub struct Peer {
    log_level: LogLevel,
    address_family: AddressFamily,
    handlers: Arc<RwLock<HandlerMap>>,
    errors: ErrorSink,
    token: CancellationToken,
}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer")
            .field("log_level", &self.log_level)
            .field("address_family", &self.address_family)
            .finish_non_exhaustive()
    }
}

impl Default for Peer {
    fn default() -> Self {
        Self::new(LogLevel::default())
    }
}

impl Peer {
    /// Creates a peer and installs logging at the given level.
    ///
    /// (Logging setup is process-global and idempotent; `RUST_LOG` wins if
    /// set. See [`util::setup_tracing`](crate::util::setup_tracing).)
    #[must_use]
    pub fn new(log_level: LogLevel) -> Self {
        crate::util::tracing::setup(log_level);
        Self {
            log_level,
            address_family: AddressFamily::Any,
            handlers: Arc::new(RwLock::new(HandlerMap::new())),
            errors: ErrorSink::default(),
            token: CancellationToken::new(),
        }
    }

    /// The level this peer was created with.
    #[must_use]
    pub fn log_level(&self) -> LogLevel {
        self.log_level
    }

    /// Restricts hostname resolution in [`dial`](Self::dial) to one address
    /// family. The default accepts either.
    pub fn set_address_family(&mut self, family: AddressFamily) {
        self.address_family = family;
    }

    /// Registers a handler for transactions named `name`.
    ///
    /// The handler gets the connection, the transaction's stream (which it
    /// owns; returning ends the transaction), and the agreed name and ID.
    /// Fails with [`Error::ReservedName`] for the name "default"; use
    /// [`set_default_transaction_handler`](Self::set_default_transaction_handler)
    /// for the fallback.
    pub fn register_transaction_handler<F, Fut>(&self, name: &str, handler: F) -> Result<()>
    where
        F: Fn(Connection, Stream, String, TransactionId) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.handlers
            .write()
            .expect("handler registry lock poisoned")
            .register(name, handler::boxed(handler))
    }

    /// Replaces the fallback handler, which runs for any transaction whose
    /// name has no registered handler. The built-in fallback just logs.
    pub fn set_default_transaction_handler<F, Fut>(&self, handler: F)
    where
        F: Fn(Connection, Stream, String, TransactionId) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.handlers
            .write()
            .expect("handler registry lock poisoned")
            .set_default(handler::boxed(handler));
    }

    /// Subscribes to errors returned by transaction handlers.
    ///
    /// Only the most recent subscriber receives anything. Handler errors are
    /// logged regardless.
    pub fn error_channel(&self) -> mpsc::UnboundedReceiver<Error> {
        self.errors.subscribe()
    }

    /// Dials `host:port` and returns the established connection.
    ///
    /// `host` may be an IP address or a hostname; hostnames resolve subject
    /// to [`set_address_family`](Self::set_address_family). The whole
    /// operation is bounded by [`DIAL_TIMEOUT`]. A dispatcher is started on
    /// the new connection, so the remote peer can open transactions towards
    /// us over it too.
    pub async fn dial(
        &self,
        host: &str,
        port: u16,
        tls: rustls::ClientConfig,
    ) -> Result<Connection> {
        let ip = match host.parse::<IpAddr>() {
            Ok(ip) => ip,
            Err(_) => lookup_host_by_family(host, self.address_family)?,
        };
        let remote = SocketAddr::new(ip, port);
        let local: SocketAddr = match remote {
            SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
        };

        let endpoint = transport::client_endpoint(local, tls)?;
        debug!("dialling {remote}");
        let connecting = endpoint.connect(remote, host)?;
        let quic = timeout(DIAL_TIMEOUT, connecting)
            .await
            .map_err(|_| Error::DialTimeout)??;
        info!("connected to {}", quic.remote_address());

        let connection = Connection::new(quic, Some(endpoint))?;
        self.start_dispatcher(&connection);
        Ok(connection)
    }

    /// Listens on `addr`, accepting connections until the peer is closed.
    ///
    /// For every accepted connection a dispatcher task is started, then
    /// `on_new_connection` is invoked for caller-side setup (spawn tasks
    /// there if you want to open transactions towards the new arrival).
    pub async fn listen<F>(
        &self,
        addr: SocketAddr,
        tls: rustls::ServerConfig,
        mut on_new_connection: F,
    ) -> Result<()>
    where
        F: FnMut(&Connection),
    {
        let endpoint = transport::server_endpoint(addr, tls)?;
        info!("listening on {}", endpoint.local_addr()?);

        loop {
            let incoming = tokio::select! {
                () = self.token.cancelled() => break,
                accepted = endpoint.accept() => match accepted {
                    Some(i) => i,
                    None => break, // endpoint closed
                },
            };
            let quic = match incoming.await {
                Ok(c) => c,
                Err(e) => {
                    debug!("inbound connection failed: {e}");
                    continue;
                }
            };
            debug!("connection accepted from {}", quic.remote_address());
            let connection = match Connection::new(quic, None) {
                Ok(c) => c,
                Err(e) => {
                    debug!("rejecting connection: {e}");
                    continue;
                }
            };
            self.start_dispatcher(&connection);
            on_new_connection(&connection);
        }
        endpoint.close(VarInt::from_u32(0), CLOSE_REASON.as_bytes());
        Ok(())
    }

    /// Shuts this peer down: the listen loop and all per-connection
    /// dispatchers exit. In-flight handlers are not interrupted; they finish
    /// or observe stream errors.
    pub fn close(&self) {
        self.token.cancel();
    }

    fn start_dispatcher(&self, connection: &Connection) {
        drop(tokio::spawn(handler::dispatch(
            connection.clone(),
            self.handlers.clone(),
            self.errors.clone(),
            self.token.child_token(),
        )));
    }
}
