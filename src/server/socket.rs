//! SO_REUSEPORT socket binding.
//!
//! Every receive worker binds its own kernel socket to the same local
//! address; the kernel load-balances inbound datagrams across them. This
//! is the same trick `SO_REUSEPORT` is used for in any high-throughput
//! UDP server -- it avoids a single shared socket (and its single
//! receive queue and lock) becoming the bottleneck under load.

use std::net::{SocketAddr, UdpSocket};

use socket2::{Domain, Protocol, Socket, Type};

pub fn bind_reuseport(addr: SocketAddr) -> std::io::Result<UdpSocket> {
    let domain = if addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;

    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;

    socket.set_nonblocking(false)?;
    socket.bind(&addr.into())?;

    Ok(socket.into())
}
