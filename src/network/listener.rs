//! Listening socket setup

use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener};

use crate::constants::LISTEN_BACKLOG;
use crate::error::NetworkError;

/// Create a non-blocking TCP listener on `addr`.
///
/// IPv6 listeners accept IPv4-mapped clients as well.
pub fn bind_listener(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    if addr.is_ipv6() {
        socket.set_only_v6(false)?;
    }
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;
    socket.set_nonblocking(true)?;
    Ok(socket.into())
}

/// Bind the dual-stack IPv6 listener and the IPv4 listener on `port`.
///
/// Either may fail; only losing both is an error.
pub fn bind_listeners(port: u16) -> Result<Vec<TcpListener>, NetworkError> {
    let mut listeners = Vec::with_capacity(2);
    let mut failures = Vec::new();

    let addrs = [
        SocketAddr::from((Ipv6Addr::UNSPECIFIED, port)),
        SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)),
    ];
    for addr in addrs {
        match bind_listener(addr) {
            Ok(listener) => {
                tracing::info!("Listening on {}", listener.local_addr().unwrap_or(addr));
                listeners.push(listener);
            }
            Err(e) if !listeners.is_empty() => {
                // Usually the dual-stack socket already covers this family
                tracing::debug!("Skipping listener on {}: {}", addr, e);
            }
            Err(e) => {
                tracing::warn!("Failed to listen on {}: {}", addr, e);
                failures.push(format!("{}: {}", addr, e));
            }
        }
    }

    if listeners.is_empty() {
        return Err(NetworkError::BindFailed(failures.join("; ")));
    }
    Ok(listeners)
}
