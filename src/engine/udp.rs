//! UDP forwarder: one upstream flow per remote peer, torn down after the
//! configured idle window.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::Application;
use crate::error::{EngineError, EngineResult};

const DATAGRAM_BUFFER_SIZE: usize = 64 * 1024;

struct UdpFlow {
    upstream: UdpSocket,
    last_seen: Mutex<Instant>,
    cancel: CancellationToken,
}

pub fn spawn(app: Arc<Application>) -> EngineResult<JoinHandle<()>> {
    let listen_port = app.config.listen_port;
    let std_socket = std::net::UdpSocket::bind(("0.0.0.0", listen_port)).map_err(|source| {
        EngineError::Bind {
            port: listen_port,
            source,
        }
    })?;
    std_socket
        .set_nonblocking(true)
        .map_err(|source| EngineError::Bind {
            port: listen_port,
            source,
        })?;
    let socket = UdpSocket::from_std(std_socket).map_err(|source| EngineError::Bind {
        port: listen_port,
        source,
    })?;
    let _ = socket.set_broadcast(true);
    let _ = socket.set_ttl(255);
    let socket = Arc::new(socket);

    let flows: Arc<DashMap<SocketAddr, Arc<UdpFlow>>> = Arc::new(DashMap::new());

    let recv_app = app.clone();
    let recv_socket = socket.clone();
    let recv_flows = flows.clone();
    let gc_app = app.clone();
    let gc_flows = flows;

    tokio::spawn(async move {
        gc_loop(gc_app, gc_flows).await;
    });

    Ok(tokio::spawn(async move {
        recv_loop(recv_app, recv_socket, recv_flows).await;
    }))
}

async fn recv_loop(
    app: Arc<Application>,
    listener: Arc<UdpSocket>,
    flows: Arc<DashMap<SocketAddr, Arc<UdpFlow>>>,
) {
    let mut buf = [0u8; DATAGRAM_BUFFER_SIZE];
    loop {
        let (n, peer) = tokio::select! {
            _ = app.cancel.cancelled() => {
                debug!(engine = %app.label(), "udp recv loop stopping");
                return;
            }
            result = listener.recv_from(&mut buf) => {
                match result {
                    Ok(v) => v,
                    Err(e) => {
                        warn!(engine = %app.label(), error = %e, "udp recv failed");
                        continue;
                    }
                }
            }
        };

        app.activity_clock.mark();

        let live = app
            .lifecycle
            .clone()
            .ensure_running(app.cancel.clone())
            .await;
        if !live {
            continue;
        }

        let flow = match flows.get(&peer) {
            Some(existing) => existing.clone(),
            None => match create_flow(&app, listener.clone(), &flows, peer).await {
                Some(flow) => flow,
                None => continue,
            },
        };

        *flow.last_seen.lock() = Instant::now();

        if let Err(e) = flow.upstream.send(&buf[..n]).await {
            warn!(engine = %app.label(), %peer, error = %e, "udp send to upstream failed");
            flows.remove(&peer);
            flow.cancel.cancel();
        }
    }
}

async fn create_flow(
    app: &Arc<Application>,
    listener: Arc<UdpSocket>,
    flows: &Arc<DashMap<SocketAddr, Arc<UdpFlow>>>,
    peer: SocketAddr,
) -> Option<Arc<UdpFlow>> {
    let upstream = match UdpSocket::bind(("0.0.0.0", 0)).await {
        Ok(socket) => socket,
        Err(e) => {
            warn!(engine = %app.label(), %peer, error = %e, "udp flow: failed to bind upstream socket");
            return None;
        }
    };
    let target = (app.config.target_address.as_str(), app.config.target_port);
    if let Err(e) = upstream.connect(target).await {
        warn!(engine = %app.label(), %peer, error = %e, "udp flow: failed to connect upstream socket");
        return None;
    }
    let _ = upstream.set_broadcast(true);
    let _ = upstream.set_ttl(255);

    let flow = Arc::new(UdpFlow {
        upstream,
        last_seen: Mutex::new(Instant::now()),
        cancel: app.cancel.child_token(),
    });

    flows.insert(peer, flow.clone());

    let pump_app = app.clone();
    let pump_flow = flow.clone();
    tokio::spawn(async move {
        response_pump(pump_app, listener, peer, pump_flow).await;
    });

    Some(flow)
}

async fn response_pump(
    app: Arc<Application>,
    listener: Arc<UdpSocket>,
    peer: SocketAddr,
    flow: Arc<UdpFlow>,
) {
    let mut buf = [0u8; DATAGRAM_BUFFER_SIZE];
    loop {
        tokio::select! {
            _ = flow.cancel.cancelled() => {
                trace!(engine = %app.label(), %peer, "udp response pump stopping");
                return;
            }
            result = flow.upstream.recv(&mut buf) => {
                match result {
                    Ok(n) => {
                        *flow.last_seen.lock() = Instant::now();
                        app.activity_clock.mark();
                        if let Err(e) = listener.send_to(&buf[..n], peer).await {
                            warn!(engine = %app.label(), %peer, error = %e, "udp response pump send failed");
                            return;
                        }
                    }
                    Err(e) => {
                        trace!(engine = %app.label(), %peer, error = %e, "udp response pump ended");
                        return;
                    }
                }
            }
        }
    }
}

async fn gc_loop(app: Arc<Application>, flows: Arc<DashMap<SocketAddr, Arc<UdpFlow>>>) {
    let mut ticker = tokio::time::interval(app.config.check_interval);
    loop {
        tokio::select! {
            _ = app.cancel.cancelled() => {
                for entry in flows.iter() {
                    entry.value().cancel.cancel();
                }
                return;
            }
            _ = ticker.tick() => {
                let inactive_after = app.config.inactive_after;
                let stale: Vec<SocketAddr> = flows
                    .iter()
                    .filter(|entry| entry.value().last_seen.lock().elapsed() > inactive_after)
                    .map(|entry| *entry.key())
                    .collect();
                for peer in stale {
                    if let Some((_, flow)) = flows.remove(&peer) {
                        flow.cancel.cancel();
                        trace!(engine = %app.label(), %peer, "udp flow garbage collected");
                    }
                }
            }
        }
    }
}
