//! Connection wrapper and outbound transactions
// (c) 2025 Ross Younger

use quinn::VarInt;
use tracing::debug;

use crate::error::{Error, Result};
use crate::protocol::wire::{self, TransactionId};
use crate::stream::Stream;

/// Reason string sent with a plain close.
pub(crate) const CLOSE_REASON: &str = "Connection closed by peer";

/// One established QUIC connection between two peers.
///
/// This is a cheap cloneable handle; clones refer to the same connection.
/// Any number of transactions may run on it concurrently, each on its own
/// stream. Obtained from [`Peer::dial`](crate::Peer::dial) or handed to the
/// `on_new_connection` callback of [`Peer::listen`](crate::Peer::listen).
#[derive(Clone, Debug)]
pub struct Connection {
    quic: quinn::Connection,
    // A dialled connection owns its endpoint; keep it alive alongside.
    _endpoint: Option<quinn::Endpoint>,
}

impl Connection {
    /// Wraps an established QUIC connection.
    ///
    /// Fails with [`Error::HandshakeIncomplete`] if the TLS handshake has
    /// not finished.
    pub(crate) fn new(quic: quinn::Connection, endpoint: Option<quinn::Endpoint>) -> Result<Self> {
        if quic.handshake_data().is_none() {
            return Err(Error::HandshakeIncomplete);
        }
        Ok(Self {
            quic,
            _endpoint: endpoint,
        })
    }

    /// Opens a transaction named `name` and runs `f` inside it.
    ///
    /// A fresh bidirectional stream is opened and the transaction handshake
    /// performed on it; `f` then gets the stream together with the agreed
    /// name and transaction ID. When `f` returns `Ok` the stream is closed,
    /// ending the transaction. If the handshake or `f` fails, the error
    /// message is sent to the peer (best effort) before the stream closes,
    /// and the error is returned.
    ///
    /// Runs on the caller's task. Concurrent transactions want one call per
    /// task; each gets an independent stream.
    pub async fn open_transaction<F>(&self, name: &str, f: F) -> Result<()>
    where
        F: AsyncFnOnce(&mut Stream, &str, &TransactionId) -> Result<()>,
    {
        if self.quic.close_reason().is_some() {
            return Err(Error::ConnectionNotOpen);
        }
        let pair = self.quic.open_bi().await?;
        let mut stream = Stream::new(pair);
        let id = wire::new_id();

        let result = async {
            stream.handshake_client(name, &id).await?;
            f(&mut stream, name, &id).await
        }
        .await;

        if let Err(e) = result {
            debug!("transaction '{name}' failed: {e}");
            let _ = stream.send_error(&e.to_string()).await;
            stream.close();
            return Err(e);
        }
        stream.close();
        Ok(())
    }

    /// Closes the connection with the standard reason string.
    ///
    /// In-flight transactions are torn down. Fails with
    /// [`Error::ConnectionNotOpen`] if already closed.
    pub fn close(&self) -> Result<()> {
        self.close_with_error(CLOSE_REASON)
    }

    /// Closes the connection, telling the peer why.
    pub fn close_with_error(&self, reason: &str) -> Result<()> {
        if self.quic.close_reason().is_some() {
            return Err(Error::ConnectionNotOpen);
        }
        self.quic.close(VarInt::from_u32(0), reason.as_bytes());
        Ok(())
    }

    /// The peer's address.
    #[must_use]
    pub fn remote_address(&self) -> std::net::SocketAddr {
        self.quic.remote_address()
    }

    /// Access to the underlying QUIC connection, for statistics and the like.
    #[must_use]
    pub fn quic(&self) -> &quinn::Connection {
        &self.quic
    }
}
