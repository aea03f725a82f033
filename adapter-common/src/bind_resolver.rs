// weops-kafka-adapter - prometheus remote write to kafka adapter
// Copyright WeOps authors. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use anyhow::anyhow;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpSocket, lookup_host};

//
// BoundTcpSocket
//

// A TCP socket that has been bound but is not yet listening. Splitting bind from listen lets the
// caller learn the real port (tests bind to port 0) before the server is spawned.
pub struct BoundTcpSocket {
  socket: TcpSocket,
  local_addr: SocketAddr,
}

impl BoundTcpSocket {
  pub fn listen(self) -> anyhow::Result<TcpListener> {
    Ok(self.socket.listen(1024)?)
  }

  #[must_use]
  pub const fn local_addr(&self) -> SocketAddr {
    self.local_addr
  }
}

//
// BindResolver
//

// Resolves a "host:port" listen string into a bound socket. Used for test injection of sockets
// bound to port 0.
#[mockall::automock]
#[async_trait::async_trait]
pub trait BindResolver: Send + Sync {
  async fn resolve_tcp(&self, name: &str) -> anyhow::Result<BoundTcpSocket>;
}

pub struct RealBindResolver {}

#[async_trait::async_trait]
impl BindResolver for RealBindResolver {
  async fn resolve_tcp(&self, name: &str) -> anyhow::Result<BoundTcpSocket> {
    bind_tcp_socket(name).await
  }
}

// Try every address the name resolves to and return the first one that binds.
pub async fn bind_tcp_socket(name: &str) -> anyhow::Result<BoundTcpSocket> {
  let mut last_err = None;
  for addr in lookup_host(name).await? {
    let socket = match addr {
      SocketAddr::V4(_) => TcpSocket::new_v4()?,
      SocketAddr::V6(_) => TcpSocket::new_v6()?,
    };
    socket.set_reuseaddr(true)?;
    match socket.bind(addr) {
      Ok(()) => {
        let local_addr = socket.local_addr()?;
        return Ok(BoundTcpSocket { socket, local_addr });
      },
      Err(e) => last_err = Some(e.into()),
    }
  }

  Err(last_err.unwrap_or_else(|| anyhow!("could not resolve {name} to any address")))
}
