// (c) 2025 Ross Younger

//! Transaction-oriented messaging and file transfer over [QUIC].
//!
//! `qtx` gives two peers a symmetric exchange primitive: the **transaction**,
//! a named bidirectional conversation carried on its own QUIC stream and
//! bounded by a handshake. Within a transaction either side can send byte
//! messages, files (directories included), or both together, any number of
//! times. Many transactions run concurrently over a single connection
//! without interfering with each other.
//!
//! ## Overview
//!
//! * A [`Peer`] dials out and/or listens, and holds the table of transaction
//!   handlers.
//! * A [`Connection`] is one established QUIC connection. Either side opens
//!   transactions on it with [`Connection::open_transaction`].
//! * A [`Stream`] is the channel scoped to one transaction, with typed
//!   send/receive operations that always travel in matched pairs.
//! * [`FileInfo`] carries file metadata ahead of content, and restores
//!   received files to disk with their mode and modification time.
//!
//! File sends are guarded against in-flight modification: if the file
//! changes on disk while it is being copied out, the sender aborts the
//! stream rather than let the receiver save content that does not match the
//! metadata it was promised.
//!
//! ## Example
//!
//! ```no_run
//! use qtx::{LogLevel, Peer};
//!
//! # async fn server() -> qtx::Result<()> {
//! let peer = Peer::new(LogLevel::Info);
//! peer.register_transaction_handler("echo", |_conn, mut stream, _name, _id| async move {
//!     let message = stream.recv_bmessage().await?;
//!     stream.send_bmessage(&message).await
//! })?;
//!
//! let credentials = qtx::tls::certificate(None, None)?;
//! peer.listen(
//!     "[::]:18080".parse().unwrap(),
//!     qtx::tls::server_config(credentials)?,
//!     |conn| tracing::info!("new connection from {}", conn.remote_address()),
//! )
//! .await
//! # }
//! # async fn client() -> qtx::Result<()> {
//! // ... and from the other side:
//! let peer = Peer::new(LogLevel::Info);
//! let conn = peer
//!     .dial("server.example.com", 18080, qtx::tls::client_config_insecure()?)
//!     .await?;
//! conn.open_transaction("echo", async |stream, _name, _id| {
//!     stream.send_bmessage(b"hello").await?;
//!     let reply = stream.recv_bmessage().await?;
//!     assert_eq!(reply, b"hello");
//!     Ok(())
//! })
//! .await?;
//! conn.close()
//! # }
//! ```
//!
//! [QUIC]: https://quicwg.github.io/

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

mod connection;
pub use connection::Connection;

mod error;
pub use error::{Error, Result};

mod fileinfo;
pub use fileinfo::FileInfo;

mod handler;
pub use handler::DEFAULT_HANDLER_NAME;

mod peer;
pub use peer::{DIAL_TIMEOUT, Peer};

pub mod protocol;
pub use protocol::wire::TransactionId;

pub mod stream;
pub use stream::{FileReader, Stream};

pub mod tls;
pub mod transport;

pub mod util;
pub use util::{AddressFamily, LogLevel};
