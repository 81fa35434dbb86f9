//! Transaction streams and their typed send/receive primitives
// (c) 2025 Ross Younger

use std::path::Path;
use std::pin::Pin;
use std::task::{Context, Poll};

use quinn::VarInt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadBuf, Take};
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::fileinfo::FileInfo;
use crate::protocol::frame::WireRecord;
use crate::protocol::wire::{Header, Message, RequestType, Transaction, TransactionId};

/// Application error code sent with `cancel_write` when the file being
/// transferred changed on disk part-way through.
pub const FILE_MODIFIED_CODE: u32 = 0x1;

/// A bidirectional channel scoped to exactly one transaction.
///
/// Created by [`Connection::open_transaction`](crate::Connection::open_transaction)
/// on the initiating side, or handed to a registered handler on the accepting
/// side. Both peers may send and receive on it, multiple times, until the
/// transaction ends.
///
/// Two concurrent send operations on the same stream are not possible
/// (sending takes `&mut self`); multiple producers must serialize access
/// themselves. Reads mirror the remote's write order.
#[derive(Debug)]
pub struct Stream {
    send: quinn::SendStream,
    recv: quinn::RecvStream,
    closed: bool,
}

impl Stream {
    pub(crate) fn new((send, recv): (quinn::SendStream, quinn::RecvStream)) -> Self {
        Self {
            send,
            recv,
            closed: false,
        }
    }

    /// Sends a byte message. Pairs with [`recv_bmessage`](Self::recv_bmessage)
    /// on the remote side.
    pub async fn send_bmessage(&mut self, data: &[u8]) -> Result<()> {
        Header::new(RequestType::BMessage)
            .write_framed(&mut self.send)
            .await?;
        Message {
            data: data.to_vec(),
        }
        .write_framed(&mut self.send)
        .await
    }

    /// Receives a byte message. Pairs with [`send_bmessage`](Self::send_bmessage).
    pub async fn recv_bmessage(&mut self) -> Result<Vec<u8>> {
        self.read_expected_header(RequestType::BMessage).await?;
        Ok(Message::read_framed(&mut self.recv).await?.data)
    }

    /// Sends the file (or directory) at `path`, metadata first.
    ///
    /// If the file changes on disk while it is being copied out, the
    /// transfer is aborted with [`FILE_MODIFIED_CODE`] and
    /// [`Error::FileModifiedDuringTransfer`] is returned; the receiver sees
    /// a stream reset rather than a truncated file it would believe in.
    ///
    /// The stream stays open afterwards for follow-up sends; close it (or
    /// return from the handler) to end the transaction.
    pub async fn send_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        Header::new(RequestType::File)
            .write_framed(&mut self.send)
            .await?;
        self.write_file(path.as_ref()).await
    }

    /// Receives a file. Pairs with [`send_file`](Self::send_file).
    ///
    /// The returned reader yields exactly `FileInfo.size` content bytes and
    /// then reports end of stream. It borrows this stream: consume it (for
    /// example via [`FileInfo::write_with_info`]) before the next operation
    /// on this transaction.
    pub async fn recv_file(&mut self) -> Result<(FileInfo, FileReader<'_>)> {
        self.read_expected_header(RequestType::File).await?;
        read_file_info(&mut self.recv).await
    }

    /// Sends a byte message, then the file at `path`.
    /// Pairs with [`recv_file_bmessage`](Self::recv_file_bmessage).
    pub async fn send_file_bmessage(
        &mut self,
        data: &[u8],
        path: impl AsRef<Path>,
    ) -> Result<()> {
        Header::new(RequestType::FileBMessage)
            .write_framed(&mut self.send)
            .await?;
        Message {
            data: data.to_vec(),
        }
        .write_framed(&mut self.send)
        .await?;
        self.write_file(path.as_ref()).await
    }

    /// Receives a byte message and a file.
    /// Pairs with [`send_file_bmessage`](Self::send_file_bmessage).
    pub async fn recv_file_bmessage(&mut self) -> Result<(Vec<u8>, FileInfo, FileReader<'_>)> {
        self.read_expected_header(RequestType::FileBMessage).await?;
        let data = Message::read_framed(&mut self.recv).await?.data;
        let (info, reader) = read_file_info(&mut self.recv).await?;
        Ok((data, info, reader))
    }

    /// Sends an error message in-band.
    ///
    /// Whatever receive operation is pending on the remote side fails with
    /// [`Error::Peer`] carrying this message. This also runs internally when
    /// an outbound transaction's handler returns an error.
    pub async fn send_error(&mut self, message: &str) -> Result<()> {
        let result = Header::for_error(message)
            .write_framed(&mut self.send)
            .await;
        if result.is_err() {
            let _ = self.send.reset(VarInt::from_u32(0));
        }
        result
    }

    /// Ends the transaction: finishes the write side cleanly and releases
    /// the read side with `cancel_read(0)`.
    ///
    /// Idempotent, and also runs on drop, so a handler that simply returns
    /// (or fails) never leaks the stream.
    pub fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            let _ = self.send.finish();
            let _ = self.recv.stop(VarInt::from_u32(0));
        }
    }

    /// Reads a header and insists on the given request type.
    async fn read_expected_header(&mut self, expected: RequestType) -> Result<()> {
        let header = read_header(&mut self.recv).await?;
        if header.request_type != expected {
            return Err(Error::WrongRequestType {
                expected,
                actual: header.request_type,
            });
        }
        Ok(())
    }

    /// File send path, mapping a detected modification onto a stream abort.
    async fn write_file(&mut self, path: &Path) -> Result<()> {
        match write_file_to(&mut self.send, path).await {
            Err(e @ Error::FileModifiedDuringTransfer) => {
                let _ = self.send.reset(VarInt::from_u32(FILE_MODIFIED_CODE));
                debug!("file {} modified during transfer", path.display());
                Err(e)
            }
            other => other,
        }
    }

    pub(crate) async fn handshake_client(
        &mut self,
        name: &str,
        id: &TransactionId,
    ) -> Result<()> {
        client_handshake(&mut self.send, &mut self.recv, name, id).await
    }

    pub(crate) async fn handshake_server(&mut self) -> Result<Transaction> {
        server_handshake(&mut self.send, &mut self.recv).await
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        self.close();
    }
}

/// Reader for the content bytes of an incoming file.
///
/// Yields exactly the declared number of bytes, then end of stream; the
/// content is not framed, so this limit is the only thing separating it from
/// whatever the transaction carries next.
#[derive(Debug)]
pub struct FileReader<'a> {
    inner: Take<&'a mut quinn::RecvStream>,
}

impl FileReader<'_> {
    /// Number of content bytes not yet read.
    #[must_use]
    pub fn remaining(&self) -> u64 {
        self.inner.limit()
    }
}

impl AsyncRead for FileReader<'_> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

/// Reads a header; a non-empty error field fails the pending operation
/// immediately, and no payload follows it.
async fn read_header<R>(recv: &mut R) -> Result<Header>
where
    R: AsyncRead + Unpin + Send,
{
    let header = Header::read_framed(recv).await?;
    if !header.error.is_empty() {
        return Err(Error::Peer(header.error));
    }
    Ok(header)
}

/// Reads a FileInfo record and wraps the stream in a reader limited to its
/// declared content size.
async fn read_file_info(recv: &mut quinn::RecvStream) -> Result<(FileInfo, FileReader<'_>)> {
    let info = FileInfo::read_framed(recv).await?;
    if info.size < 0 {
        return Err(Error::InvalidFileSize(info.size));
    }
    trace!("incoming file {} ({} bytes)", info.name, info.size);
    #[allow(clippy::cast_sign_loss)] // checked non-negative above
    let reader = FileReader {
        inner: recv.take(info.size as u64),
    };
    Ok((info, reader))
}

/// Streams the FileInfo record and content bytes of `path`, then re-checks
/// the on-disk metadata against the pre-copy snapshot.
async fn write_file_to<W>(send: &mut W, path: &Path) -> Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    let (info, file) = FileInfo::capture(path).await?;
    info.write_framed(send).await?;

    let Some(mut file) = file else {
        // Directory: no content bytes follow.
        let meta = tokio::fs::metadata(path).await?;
        return info.verify_unchanged(&meta);
    };

    #[allow(clippy::cast_sign_loss)] // capture never yields a negative size
    let size = info.size as u64;
    let copied = tokio::io::copy(&mut (&mut file).take(size), send)
        .await
        .map_err(Error::from_stream_io)?;

    // Stat the open fd again before trusting what we just sent.
    let meta = file.metadata().await?;
    info.verify_unchanged(&meta)?;
    if copied != size {
        #[allow(clippy::cast_possible_wrap)]
        return Err(Error::SizeMismatch {
            expected: info.size,
            actual: copied as i64,
        });
    }
    Ok(())
}

/// Initiator's half of the transaction handshake: send our identity, then
/// insist the peer echoes it back unchanged.
pub(crate) async fn client_handshake<W, R>(
    send: &mut W,
    recv: &mut R,
    name: &str,
    id: &TransactionId,
) -> Result<()>
where
    W: AsyncWrite + Unpin + Send,
    R: AsyncRead + Unpin + Send,
{
    Header::new(RequestType::Transaction)
        .write_framed(send)
        .await?;
    Transaction {
        name: name.to_string(),
        id: *id,
    }
    .write_framed(send)
    .await?;

    let header = read_header(recv).await?;
    if header.request_type != RequestType::Transaction {
        return Err(Error::NotTransaction(header.request_type));
    }
    let echo = Transaction::read_framed(recv).await?;
    if echo.name != name || echo.id != *id {
        return Err(Error::HandshakeMismatch);
    }
    trace!("transaction '{name}' handshake complete");
    Ok(())
}

/// Acceptor's half of the handshake: read the identity and echo it back,
/// confirming routing before any handler runs.
pub(crate) async fn server_handshake<W, R>(send: &mut W, recv: &mut R) -> Result<Transaction>
where
    W: AsyncWrite + Unpin + Send,
    R: AsyncRead + Unpin + Send,
{
    let header = read_header(recv).await?;
    if header.request_type != RequestType::Transaction {
        return Err(Error::NotTransaction(header.request_type));
    }
    let transaction = Transaction::read_framed(recv).await?;

    Header::echo(RequestType::Transaction, transaction.id)
        .write_framed(send)
        .await?;
    transaction.write_framed(send).await?;
    trace!("transaction '{}' accepted", transaction.name);
    Ok(transaction)
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::{client_handshake, read_header, server_handshake, write_file_to};
    use crate::error::Error;
    use crate::fileinfo::FileInfo;
    use crate::protocol::frame::WireRecord as _;
    use crate::protocol::wire::{Header, RequestType, Transaction};

    use littertray::LitterTray;
    use pretty_assertions::assert_eq;
    use std::io::Cursor;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::{AsyncReadExt as _, AsyncWrite, duplex, split};

    const ID: [u8; 16] = [0x42; 16];

    #[tokio::test]
    async fn handshake_round_trip() {
        let (client, server) = duplex(1024);
        let (mut c_read, mut c_write) = split(client);
        let (mut s_read, mut s_write) = split(server);

        let server_task = tokio::spawn(async move {
            server_handshake(&mut s_write, &mut s_read).await.unwrap()
        });
        client_handshake(&mut c_write, &mut c_read, "sync", &ID)
            .await
            .unwrap();
        let seen = server_task.await.unwrap();
        assert_eq!(seen.name, "sync");
        assert_eq!(seen.id, ID);
    }

    #[tokio::test]
    async fn handshake_detects_renamed_echo() {
        let (client, server) = duplex(1024);
        let (mut c_read, mut c_write) = split(client);
        let (mut s_read, mut s_write) = split(server);

        // A rogue acceptor echoing a different transaction name.
        let rogue = tokio::spawn(async move {
            let _ = Header::read_framed(&mut s_read).await.unwrap();
            let t = Transaction::read_framed(&mut s_read).await.unwrap();
            Header::echo(RequestType::Transaction, t.id)
                .write_framed(&mut s_write)
                .await
                .unwrap();
            Transaction {
                name: format!("{}2", t.name),
                id: t.id,
            }
            .write_framed(&mut s_write)
            .await
            .unwrap();
        });

        let err = client_handshake(&mut c_write, &mut c_read, "echo", &ID)
            .await
            .expect_err("an error was expected");
        assert!(matches!(err, Error::HandshakeMismatch));
        rogue.await.unwrap();
    }

    #[tokio::test]
    async fn handshake_detects_mangled_id() {
        let (client, server) = duplex(1024);
        let (mut c_read, mut c_write) = split(client);
        let (mut s_read, mut s_write) = split(server);

        let rogue = tokio::spawn(async move {
            let _ = Header::read_framed(&mut s_read).await.unwrap();
            let t = Transaction::read_framed(&mut s_read).await.unwrap();
            Header::echo(RequestType::Transaction, t.id)
                .write_framed(&mut s_write)
                .await
                .unwrap();
            Transaction {
                name: t.name,
                id: [0; 16],
            }
            .write_framed(&mut s_write)
            .await
            .unwrap();
        });

        let err = client_handshake(&mut c_write, &mut c_read, "echo", &ID)
            .await
            .expect_err("an error was expected");
        assert!(matches!(err, Error::HandshakeMismatch));
        rogue.await.unwrap();
    }

    #[tokio::test]
    async fn server_side_rejects_non_transaction_opening() {
        let (client, server) = duplex(1024);
        let (_c_read, mut c_write) = split(client);
        let (mut s_read, mut s_write) = split(server);

        Header::new(RequestType::BMessage)
            .write_framed(&mut c_write)
            .await
            .unwrap();
        let err = server_handshake(&mut s_write, &mut s_read)
            .await
            .expect_err("an error was expected");
        assert!(matches!(err, Error::NotTransaction(RequestType::BMessage)));
    }

    #[tokio::test]
    async fn error_header_fails_pending_read() {
        let mut buf = Vec::new();
        Header::for_error("boom").write_framed(&mut buf).await.unwrap();
        let err = read_header(&mut Cursor::new(buf))
            .await
            .expect_err("an error was expected");
        let Error::Peer(msg) = err else {
            panic!("unexpected error: {err}");
        };
        assert_eq!(msg, "boom");
    }

    #[tokio::test]
    async fn file_send_sequence_on_the_wire() {
        LitterTray::try_with_async(async |tray| {
            let _ = tray.create_text("payload.txt", "file content here")?;
            let mut wire = Vec::new();
            write_file_to(&mut wire, std::path::Path::new("payload.txt")).await?;

            let mut cursor = Cursor::new(wire);
            let info = FileInfo::read_framed(&mut cursor).await?;
            assert_eq!(info.name, "payload.txt");
            assert_eq!(info.size, 17);
            assert!(!info.is_dir);
            let mut content = Vec::new();
            let _ = cursor.read_to_end(&mut content).await?;
            assert_eq!(content, b"file content here");
            Ok(())
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn directory_sends_no_content_bytes() {
        LitterTray::try_with_async(async |tray| {
            let _ = tray.make_dir("outbound_dir")?;
            let mut wire = Vec::new();
            write_file_to(&mut wire, std::path::Path::new("outbound_dir")).await?;

            let mut cursor = Cursor::new(wire);
            let info = FileInfo::read_framed(&mut cursor).await?;
            assert!(info.is_dir);
            assert_eq!(info.size, 0);
            let mut rest = Vec::new();
            let _ = cursor.read_to_end(&mut rest).await?;
            assert!(rest.is_empty());
            Ok(())
        })
        .await
        .unwrap();
    }

    /// Sink that appends to a file on disk the first time it is written to,
    /// simulating an external writer racing the transfer.
    struct MutatingSink {
        target: &'static str,
        fired: bool,
    }

    impl AsyncWrite for MutatingSink {
        fn poll_write(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            if !self.fired {
                self.fired = true;
                let mut existing = std::fs::read(self.target)?;
                existing.extend_from_slice(b" - and more");
                std::fs::write(self.target, existing)?;
            }
            Poll::Ready(Ok(buf.len()))
        }
        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
        fn poll_shutdown(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
        ) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn mutation_during_copy_is_detected() {
        LitterTray::try_with_async(async |tray| {
            let _ = tray.create_text("racy.txt", "original content")?;
            let mut sink = MutatingSink {
                target: "racy.txt",
                fired: false,
            };
            let err = write_file_to(&mut sink, std::path::Path::new("racy.txt"))
                .await
                .expect_err("an error was expected");
            assert!(matches!(err, Error::FileModifiedDuringTransfer));
            Ok(())
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn missing_file_is_an_io_error() {
        let mut wire = Vec::new();
        let err = write_file_to(&mut wire, std::path::Path::new("no-such-file.bin"))
            .await
            .expect_err("an error was expected");
        assert!(matches!(err, Error::Io(_)));
        assert!(wire.is_empty(), "nothing may reach the wire");
    }
}
