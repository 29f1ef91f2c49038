//! QUIC transport: the server accept loop and the sending client.

use anyhow::{Context, Result};
use std::net::SocketAddr;

async fn resolve(addr: &str) -> Result<SocketAddr> {
    tokio::net::lookup_host(addr)
        .await
        .with_context(|| format!("resolve {}", addr))?
        .next()
        .with_context(|| format!("no address for {}", addr))
}

pub mod server {
    use super::*;
    use crate::logger::Logger;
    use crate::protocol::close_code;
    use crate::protocol_core::decode_header;
    use crate::sink::FileSink;
    use crate::tls;
    use quinn::{Endpoint, Incoming, VarInt};
    use std::path::{Path, PathBuf};
    use std::pin::Pin;
    use std::sync::Arc;
    use std::task::{Context as TaskContext, Poll};
    use std::time::Instant;
    use tokio::io::{AsyncRead, ReadBuf};
    use uuid::Uuid;

    /// Outcome of one successfully received stream.
    #[derive(Debug)]
    pub struct Received {
        pub path: PathBuf,
        pub bytes: u64,
    }

    /// Bind the listening endpoint. Fails if the address is taken.
    pub async fn bind_endpoint(bind: &str, config: quinn::ServerConfig) -> Result<Endpoint> {
        let addr = resolve(bind).await?;
        Endpoint::server(config, addr).with_context(|| format!("bind {}", bind))
    }

    /// Provision a fresh identity, bind `bind`, and accept transfers into `root`
    /// until the endpoint closes. Credential and bind failures are returned
    /// before any connection is accepted.
    pub async fn serve(bind: &str, root: &Path, logger: Arc<dyn Logger>) -> Result<()> {
        let identity = tls::generate_server_config().context("provision server identity")?;
        let endpoint = bind_endpoint(bind, identity.config).await?;
        logger.listening(endpoint.local_addr()?, &identity.fingerprint);
        run(endpoint, Arc::new(FileSink::new(root)), logger).await
    }

    /// Accept loop. One task per connection, no cap. A failed handshake only
    /// affects its own connection.
    pub async fn run(endpoint: Endpoint, sink: Arc<FileSink>, logger: Arc<dyn Logger>) -> Result<()> {
        while let Some(incoming) = endpoint.accept().await {
            let sink = sink.clone();
            let logger = logger.clone();
            tokio::spawn(async move {
                handle_connection(incoming, &sink, logger.as_ref()).await;
            });
        }
        Ok(())
    }

    async fn handle_connection(incoming: Incoming, sink: &FileSink, logger: &dyn Logger) {
        let peer = incoming.remote_address();
        let conn = match incoming.await {
            Ok(conn) => conn,
            Err(e) => {
                logger.accept_failed(Some(peer), &e.to_string());
                return;
            }
        };

        let id = Uuid::new_v4();
        // Exactly one stream per connection
        let (mut send, mut recv) = match conn.accept_bi().await {
            Ok(streams) => streams,
            Err(e) => {
                logger.failed(id, peer, None, 0, &format!("accept stream: {}", e));
                return;
            }
        };
        // Nothing flows back to the sender
        let _ = send.finish();

        match receive(&mut recv, sink, logger, id, peer).await {
            Ok(_) => conn.close(VarInt::from_u32(close_code::DONE), b"done"),
            Err(_) => {
                let _ = recv.stop(VarInt::from_u32(close_code::FAILED));
                conn.close(VarInt::from_u32(close_code::FAILED), b"transfer failed");
            }
        }
    }

    /// Payload reader that tallies every byte handed to the file.
    struct Tally<'a, R: ?Sized> {
        inner: &'a mut R,
        bytes: &'a mut u64,
    }

    impl<R: AsyncRead + Unpin + ?Sized> AsyncRead for Tally<'_, R> {
        fn poll_read(
            self: Pin<&mut Self>,
            cx: &mut TaskContext<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            let this = self.get_mut();
            let before = buf.filled().len();
            let res = Pin::new(&mut *this.inner).poll_read(cx, buf);
            if let Poll::Ready(Ok(())) = res {
                *this.bytes += (buf.filled().len() - before) as u64;
            }
            res
        }
    }

    /// Decode the header from `reader`, create the destination file and copy
    /// the rest of the stream into it. Success and failure are both reported
    /// to `logger`; a failure after creation leaves the partial file in place
    /// and reports how many payload bytes reached it.
    pub async fn receive<R>(
        reader: &mut R,
        sink: &FileSink,
        logger: &dyn Logger,
        id: Uuid,
        peer: SocketAddr,
    ) -> Result<Received>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let started = Instant::now();
        let mut dest: Option<PathBuf> = None;
        let mut copied = 0u64;
        let res = async {
            let name = decode_header(reader).await.context("decode frame header")?;
            let (path, file) = sink.create(&name).await?;
            logger.receiving(id, peer, &name, &path);
            dest = Some(path.clone());
            let mut payload = Tally {
                inner: &mut *reader,
                bytes: &mut copied,
            };
            let bytes = sink
                .write(file, &mut payload)
                .await
                .context("receive file content")?;
            Ok::<_, anyhow::Error>(Received { path, bytes })
        }
        .await;

        match res {
            Ok(done) => {
                logger.received(id, peer, &done.path, done.bytes, started.elapsed().as_secs_f64());
                Ok(done)
            }
            Err(e) => {
                logger.failed(id, peer, dest.as_deref(), copied, &format!("{:#}", e));
                Err(e)
            }
        }
    }

}

pub mod client {
    use super::*;
    use crate::protocol::{close_code, ALPN};
    use crate::protocol_core::encode_header;
    use crate::tls;
    use anyhow::bail;
    use quinn::{Connection, ConnectionError, Endpoint};
    use tokio::io::{AsyncRead, AsyncWriteExt};

    /// Open a QUIC connection to `addr` offering `alpn`.
    pub async fn connect(addr: SocketAddr, alpn: &[u8]) -> Result<(Endpoint, Connection)> {
        let local: SocketAddr = if addr.is_ipv6() {
            "[::]:0".parse()?
        } else {
            "0.0.0.0:0".parse()?
        };
        let endpoint = Endpoint::client(local).context("bind client endpoint")?;
        let conn = endpoint
            .connect_with(tls::build_client_config(alpn)?, addr, "localhost")
            .context("start quic connection")?
            .await
            .with_context(|| format!("quic handshake with {}", addr))?;
        Ok((endpoint, conn))
    }

    /// Send one file: header, then `reader` until EOF, on a single stream.
    /// Returns the payload byte count once the server has closed the
    /// connection cleanly.
    pub async fn send_file<R>(addr: &str, name: &[u8], reader: &mut R) -> Result<u64>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let header = encode_header(name)?;
        let addr = resolve(addr).await?;
        let (endpoint, conn) = connect(addr, ALPN).await?;

        let (mut send, _recv) = conn.open_bi().await.context("open stream")?;
        send.write_all(&header).await.context("write header")?;
        let bytes = tokio::io::copy(reader, &mut send)
            .await
            .context("write file content")?;
        send.flush().await.context("flush stream")?;
        send.finish().context("finish stream")?;

        // The server closes the connection once the file is on disk
        let closed = conn.closed().await;
        endpoint.wait_idle().await;
        match closed {
            ConnectionError::ApplicationClosed(close)
                if close.error_code.into_inner() == u64::from(close_code::DONE) =>
            {
                Ok(bytes)
            }
            ConnectionError::ApplicationClosed(close) => bail!(
                "server rejected transfer (code {})",
                close.error_code.into_inner()
            ),
            other => bail!("connection lost before completion: {}", other),
        }
    }
}
