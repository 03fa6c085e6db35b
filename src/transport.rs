//! Pluggable byte-stream transport.
//!
//! The protocol engine treats its transport as an opaque byte stream: a
//! read half that fills a buffer and a write half that takes contiguous
//! buffers. [`TcpTransport`] is the stock implementation over
//! `tokio::net::TcpStream`; a TLS transport plugs in by implementing the
//! same pair of traits.

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::Duration;

use crate::error::{AmqpError, AmqpResult};

/// Read half of a transport.
#[async_trait]
pub trait TransportRead: Send {
    /// Read some bytes into `buf`, returning how many arrived. Zero means
    /// the peer closed the stream. Implementations must perform a single
    /// read so the call stays cancel-safe inside `select!`.
    async fn read_some(&mut self, buf: &mut BytesMut) -> AmqpResult<usize>;
}

/// Write half of a transport.
#[async_trait]
pub trait TransportWrite: Send {
    /// Write the whole buffer.
    async fn write_all(&mut self, data: &[u8]) -> AmqpResult<()>;

    /// Shut down the outgoing direction.
    async fn shutdown(&mut self) -> AmqpResult<()>;
}

/// A connected transport that can be split into independent halves.
pub trait Transport: Send {
    fn split(self: Box<Self>) -> (Box<dyn TransportRead>, Box<dyn TransportWrite>);
}

/// TCP transport over a tokio stream.
pub struct TcpTransport {
    stream: TcpStream,
}

impl TcpTransport {
    pub fn new(stream: TcpStream) -> Self {
        TcpTransport { stream }
    }

    /// Connect to `host:port` within `timeout`.
    pub async fn connect(host: &str, port: u16, timeout: Duration) -> AmqpResult<Self> {
        let addr = format!("{}:{}", host, port);
        let stream = tokio::time::timeout(timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| AmqpError::timeout(format!("connecting to {}", addr)))?
            .map_err(|e| AmqpError::connection_failed(format!("connect to {}: {}", addr, e)))?;
        // heartbeats and closes should not sit in Nagle buffers
        stream
            .set_nodelay(true)
            .map_err(|e| AmqpError::connection_failed(format!("set_nodelay: {}", e)))?;
        Ok(TcpTransport { stream })
    }
}

impl Transport for TcpTransport {
    fn split(self: Box<Self>) -> (Box<dyn TransportRead>, Box<dyn TransportWrite>) {
        let (read, write) = self.stream.into_split();
        (Box::new(TcpRead { inner: read }), Box::new(TcpWrite { inner: write }))
    }
}

struct TcpRead {
    inner: OwnedReadHalf,
}

#[async_trait]
impl TransportRead for TcpRead {
    async fn read_some(&mut self, buf: &mut BytesMut) -> AmqpResult<usize> {
        let n = self
            .inner
            .read_buf(buf)
            .await
            .map_err(|e| AmqpError::connection_failed(format!("read: {}", e)))?;
        Ok(n)
    }
}

struct TcpWrite {
    inner: OwnedWriteHalf,
}

#[async_trait]
impl TransportWrite for TcpWrite {
    async fn write_all(&mut self, data: &[u8]) -> AmqpResult<()> {
        self.inner
            .write_all(data)
            .await
            .map_err(|e| AmqpError::connection_failed(format!("write: {}", e)))?;
        Ok(())
    }

    async fn shutdown(&mut self) -> AmqpResult<()> {
        self.inner
            .shutdown()
            .await
            .map_err(|e| AmqpError::connection_failed(format!("shutdown: {}", e)))?;
        Ok(())
    }
}

/// In-memory transport over a tokio duplex pipe. The broker side of tests
/// holds the other end.
pub struct DuplexTransport {
    stream: tokio::io::DuplexStream,
}

impl DuplexTransport {
    pub fn new(stream: tokio::io::DuplexStream) -> Self {
        DuplexTransport { stream }
    }
}

impl Transport for DuplexTransport {
    fn split(self: Box<Self>) -> (Box<dyn TransportRead>, Box<dyn TransportWrite>) {
        let (read, write) = tokio::io::split(self.stream);
        (
            Box::new(DuplexRead { inner: read }),
            Box::new(DuplexWrite { inner: write }),
        )
    }
}

struct DuplexRead {
    inner: tokio::io::ReadHalf<tokio::io::DuplexStream>,
}

#[async_trait]
impl TransportRead for DuplexRead {
    async fn read_some(&mut self, buf: &mut BytesMut) -> AmqpResult<usize> {
        let n = self
            .inner
            .read_buf(buf)
            .await
            .map_err(|e| AmqpError::connection_failed(format!("read: {}", e)))?;
        Ok(n)
    }
}

struct DuplexWrite {
    inner: tokio::io::WriteHalf<tokio::io::DuplexStream>,
}

#[async_trait]
impl TransportWrite for DuplexWrite {
    async fn write_all(&mut self, data: &[u8]) -> AmqpResult<()> {
        self.inner
            .write_all(data)
            .await
            .map_err(|e| AmqpError::connection_failed(format!("write: {}", e)))?;
        Ok(())
    }

    async fn shutdown(&mut self) -> AmqpResult<()> {
        self.inner
            .shutdown()
            .await
            .map_err(|e| AmqpError::connection_failed(format!("shutdown: {}", e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_timeout() {
        // a non-routable address forces the timeout path
        let result =
            TcpTransport::connect("10.255.255.1", 5672, Duration::from_millis(50)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_duplex_roundtrip() {
        let (client, server) = tokio::io::duplex(1024);
        let (mut read, mut write) = Box::new(DuplexTransport::new(client)).split();
        let (mut srv_read, mut srv_write) = Box::new(DuplexTransport::new(server)).split();

        write.write_all(b"hello").await.unwrap();
        let mut buf = BytesMut::new();
        let n = srv_read.read_some(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello");

        srv_write.write_all(b"world").await.unwrap();
        let mut buf = BytesMut::new();
        let n = read.read_some(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"world");
    }

    #[tokio::test]
    async fn test_duplex_eof_reads_zero() {
        let (client, server) = tokio::io::duplex(64);
        let (mut read, _write) = Box::new(DuplexTransport::new(client)).split();
        drop(server);
        let mut buf = BytesMut::new();
        assert_eq!(read.read_some(&mut buf).await.unwrap(), 0);
    }
}
