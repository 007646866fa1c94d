use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::{ConnectionMap, PortContext, PortError, SessionId};
use crate::model::{Port, Transport};
use crate::trace::CAT_PACKET_RCV;

const RECV_BUFFER: usize = 1024;

#[derive(Debug)]
enum ServerSocket {
    Tcp(TcpListener),
    Udp(UdpSocket),
}

/// A server port whose socket is bound and ready to [`serve`](Self::serve).
#[derive(Debug)]
pub struct BoundServer {
    port: Arc<Port>,
    socket: ServerSocket,
    local_addr: SocketAddr,
    connections: Arc<ConnectionMap>,
}

impl BoundServer {
    /// Bind (and for TCP, listen on) the port's local address.
    pub async fn bind(port: Arc<Port>) -> Result<Self, PortError> {
        let bind_error = |source| PortError::Bind {
            port: port.name().to_string(),
            transport: port.transport(),
            address: port.local(),
            source,
        };

        let socket = match port.transport() {
            Transport::Tcp => ServerSocket::Tcp(TcpListener::bind(port.local()).await.map_err(bind_error)?),
            Transport::Udp => ServerSocket::Udp(UdpSocket::bind(port.local()).await.map_err(bind_error)?),
        };
        let local_addr = match &socket {
            ServerSocket::Tcp(listener) => listener.local_addr(),
            ServerSocket::Udp(socket) => socket.local_addr(),
        }
        .map_err(bind_error)?;

        Ok(Self {
            port,
            socket,
            local_addr,
            connections: Arc::new(ConnectionMap::new()),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn connections(&self) -> Arc<ConnectionMap> {
        Arc::clone(&self.connections)
    }

    /// Receive until termination, then join every connection task and close the socket.
    pub async fn serve(self, ctx: PortContext) {
        info!(
            component = %ctx.component,
            port = %self.port.name(),
            transport = %self.port.transport(),
            address = %self.local_addr,
            "Server port listening"
        );

        match self.socket {
            ServerSocket::Tcp(listener) => {
                serve_tcp(&self.port, listener, &self.connections, &ctx).await;
            }
            ServerSocket::Udp(socket) => serve_udp(&self.port, socket, &ctx).await,
        }

        info!(component = %ctx.component, port = %self.port.name(), "Server port closed");
    }
}

async fn serve_tcp(
    port: &Arc<Port>,
    listener: TcpListener,
    connections: &Arc<ConnectionMap>,
    ctx: &PortContext,
) {
    let mut sessions = JoinSet::new();

    loop {
        tokio::select! {
            _ = ctx.termination.cancelled() => break,
            Some(_) = sessions.join_next(), if !sessions.is_empty() => {}
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let session_id = match connections.open(peer) {
                        Ok(session_id) => session_id,
                        Err(e) => {
                            warn!(port = %port.name(), error = %e, "Rejecting connection");
                            continue;
                        }
                    };
                    info!(port = %port.name(), %peer, %session_id, "Accepted connection");
                    sessions.spawn(read_session(
                        Arc::clone(port),
                        stream,
                        peer,
                        session_id,
                        Arc::clone(connections),
                        ctx.clone(),
                    ));
                }
                Err(e) => warn!(port = %port.name(), error = %e, "Accept failed"),
            },
        }
    }

    debug!(port = %port.name(), sessions = sessions.len(), "Joining connections");
    while sessions.join_next().await.is_some() {}
    drop(listener);
}

async fn read_session(
    port: Arc<Port>,
    mut stream: TcpStream,
    peer: SocketAddr,
    session_id: SessionId,
    connections: Arc<ConnectionMap>,
    ctx: PortContext,
) {
    let mut buf = vec![0u8; RECV_BUFFER];

    loop {
        let read = tokio::select! {
            _ = ctx.termination.cancelled() => {
                debug!(port = %port.name(), %session_id, "Connection stopped by termination");
                break;
            }
            read = stream.read(&mut buf) => read,
        };

        match read {
            Ok(0) => {
                info!(port = %port.name(), %peer, %session_id, "Peer closed connection");
                break;
            }
            Ok(n) => record_packet(&port, &buf[..n], &ctx),
            Err(e) => {
                warn!(port = %port.name(), %peer, error = %e, "Receive failed");
                break;
            }
        }
    }

    if let Err(e) = connections.close(&peer) {
        warn!(port = %port.name(), error = %e, "Connection was not tracked");
    }
}

async fn serve_udp(port: &Port, socket: UdpSocket, ctx: &PortContext) {
    let mut buf = vec![0u8; RECV_BUFFER];

    loop {
        let received = tokio::select! {
            _ = ctx.termination.cancelled() => break,
            received = socket.recv_from(&mut buf) => received,
        };

        match received {
            Ok((n, _from)) => record_packet(port, &buf[..n], ctx),
            Err(e) => warn!(port = %port.name(), error = %e, "Receive failed"),
        }
    }
}

fn record_packet(port: &Port, payload: &[u8], ctx: &PortContext) {
    ctx.trace.instant(
        port.name(),
        ctx.pid,
        CAT_PACKET_RCV,
        vec![
            port.transport().to_string(),
            String::from_utf8_lossy(payload).into_owned(),
        ],
    );
}
