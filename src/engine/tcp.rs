//! TCP forwarder: accepts inbound connections, wakes the container group if
//! needed, then shuttles bytes to and from the upstream address.

use std::sync::Arc;
use std::time::Duration;

use socket2::SockRef;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use super::Application;
use crate::error::{EngineError, EngineResult};

const COPY_BUFFER_SIZE: usize = 8 * 1024;
const SOCKET_BUFFER_SIZE: usize = 256 * 1024;

pub fn spawn(app: Arc<Application>) -> EngineResult<JoinHandle<()>> {
    let listen_port = app.config.listen_port;
    let std_listener = std::net::TcpListener::bind(("0.0.0.0", listen_port))
        .map_err(|source| EngineError::Bind {
            port: listen_port,
            source,
        })?;
    std_listener
        .set_nonblocking(true)
        .map_err(|source| EngineError::Bind {
            port: listen_port,
            source,
        })?;
    let listener = TcpListener::from_std(std_listener).map_err(|source| EngineError::Bind {
        port: listen_port,
        source,
    })?;

    Ok(tokio::spawn(async move {
        accept_loop(app, listener).await;
    }))
}

async fn accept_loop(app: Arc<Application>, listener: TcpListener) {
    loop {
        tokio::select! {
            _ = app.cancel.cancelled() => {
                debug!(engine = %app.label(), "tcp accept loop stopping");
                return;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((socket, peer)) => {
                        let app = app.clone();
                        tokio::spawn(async move {
                            handle_connection(app, socket, peer).await;
                        });
                    }
                    Err(e) => {
                        warn!(engine = %app.label(), error = %e, "tcp accept failed");
                    }
                }
            }
        }
    }
}

async fn handle_connection(
    app: Arc<Application>,
    mut inbound: TcpStream,
    peer: std::net::SocketAddr,
) {
    app.activity_clock.mark();

    let live = app
        .lifecycle
        .clone()
        .ensure_running(app.cancel.clone())
        .await;
    if !live || app.cancel.is_cancelled() {
        debug!(engine = %app.label(), %peer, "dropping connection, container not live");
        let _ = inbound.shutdown().await;
        return;
    }

    let target = (app.config.target_address.as_str(), app.config.target_port);
    let mut upstream = match TcpStream::connect(target).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!(engine = %app.label(), %peer, error = %e, "failed to dial upstream");
            let _ = inbound.shutdown().await;
            return;
        }
    };

    let _ = inbound.set_nodelay(true);
    let _ = upstream.set_nodelay(true);
    configure_buffers(&inbound);
    configure_buffers(&upstream);

    let (inbound_read, inbound_write) = inbound.split();
    let (upstream_read, upstream_write) = upstream.split();

    let timeout = app.config.inactive_after;
    let app_a = app.clone();
    let app_b = app.clone();

    tokio::select! {
        _ = copy_with_activity(inbound_read, upstream_write, app_a, timeout) => {}
        _ = copy_with_activity(upstream_read, inbound_write, app_b, timeout) => {}
        _ = app.cancel.cancelled() => {}
    }

    app.activity_clock.mark();
    debug!(engine = %app.label(), %peer, "connection closed");
}

async fn copy_with_activity<R, W>(
    mut reader: R,
    mut writer: W,
    app: Arc<Application>,
    idle_timeout: Duration,
) where
    R: AsyncReadExt + Unpin,
    W: AsyncWriteExt + Unpin,
{
    let mut buf = [0u8; COPY_BUFFER_SIZE];
    loop {
        let read = tokio::time::timeout(idle_timeout, reader.read(&mut buf)).await;
        let n = match read {
            Ok(Ok(0)) => return,
            Ok(Ok(n)) => n,
            Ok(Err(e)) => {
                if !is_ignorable(&e) {
                    error!(engine = %app.label(), error = %e, "tcp copy read error");
                }
                return;
            }
            Err(_) => return, // idle timeout
        };

        if let Err(e) = writer.write_all(&buf[..n]).await {
            if !is_ignorable(&e) {
                error!(engine = %app.label(), error = %e, "tcp copy write error");
            }
            return;
        }
        if let Err(e) = writer.flush().await {
            if !is_ignorable(&e) {
                error!(engine = %app.label(), error = %e, "tcp copy flush error");
            }
            return;
        }
        app.activity_clock.mark();
    }
}

/// Widens the send/receive buffers beyond the OS default so a burst doesn't
/// stall on a full kernel buffer; tokio's `TcpStream` has no setter for
/// these, so we reach into the raw socket via `socket2`.
fn configure_buffers(stream: &TcpStream) {
    let sock_ref = SockRef::from(stream);
    let _ = sock_ref.set_send_buffer_size(SOCKET_BUFFER_SIZE);
    let _ = sock_ref.set_recv_buffer_size(SOCKET_BUFFER_SIZE);
}

fn is_ignorable(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::NotConnected
            | std::io::ErrorKind::BrokenPipe
    )
}
