//! Accepts TCP connections and wraps them in server [`Connection`]s.

use crate::{
    config::Config,
    connection::Connection,
    engine::EngineOptions,
    error::{Error, Result},
    transport::{IoMode, TcpTransport, PROPERTY_HOST, PROPERTY_PORT},
};

use std::net::{SocketAddr, TcpListener, ToSocketAddrs};

/// Produces server connections from a listening socket.
#[derive(Debug)]
pub struct ConnectionProvider {
    config: Config,
    listener: Option<TcpListener>,
    mode: IoMode,
}

impl ConnectionProvider {
    /// Binds and listens on `addr`.
    ///
    /// With `non_blocking`, [`Self::get_connection`] never waits and
    /// accepted connections are non-blocking too.
    pub fn bind(config: Config, addr: impl ToSocketAddrs, non_blocking: bool) -> Result<Self> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(non_blocking)?;
        log::debug!("Listening on {}", listener.local_addr()?);

        Ok(Self {
            config,
            listener: Some(listener),
            mode: if non_blocking {
                IoMode::NonBlocking
            } else {
                IoMode::Blocking
            },
        })
    }

    fn listener(&self) -> Result<&TcpListener> {
        self.listener.as_ref().ok_or(Error::Closed)
    }

    /// The address the provider listens on.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener()?.local_addr()?)
    }

    /// Accepts one connection.
    ///
    /// Returns `Ok(None)` when the provider is non-blocking and no
    /// connection is pending. The returned connection has not
    /// handshaken yet.
    pub fn get_connection(&self) -> Result<Option<Connection<TcpTransport>>> {
        let (stream, peer) = match self.listener()?.accept() {
            Ok(accepted) => accepted,
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(None),
            Err(e) => {
                log::warn!("Accept failed: {e}");
                return Err(e.into());
            }
        };
        log::debug!("Accepted connection from {peer}");

        let transport = TcpTransport::new(stream, self.mode)?
            .with_property(PROPERTY_HOST, peer.ip().to_string())
            .with_property(PROPERTY_PORT, peer.port().to_string());
        let engine = self.config.new_engine(EngineOptions::new())?;
        Ok(Some(Connection::new(engine, transport)))
    }

    /// Stops listening. Connections already accepted are unaffected.
    pub fn close(&mut self) {
        if let Some(listener) = self.listener.take() {
            log::debug!("Closing listener on {:?}", listener.local_addr());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{test_helpers::server_config, Protocol, Transport};

    use std::net::TcpStream;

    #[test]
    fn non_blocking_accept_without_peer() {
        let provider =
            ConnectionProvider::bind(server_config(Protocol::TlsServer), "127.0.0.1:0", true)
                .unwrap();
        assert!(provider.get_connection().unwrap().is_none());
    }

    #[test]
    fn accepted_connection_carries_peer() {
        let provider =
            ConnectionProvider::bind(server_config(Protocol::TlsServer), "127.0.0.1:0", false)
                .unwrap();
        let peer = TcpStream::connect(provider.local_addr().unwrap()).unwrap();

        let conn = provider.get_connection().unwrap().unwrap();
        assert_eq!(conn.io_mode(), IoMode::Blocking);
        assert!(!conn.is_established());

        let port = peer.local_addr().unwrap().port().to_string();
        let context = conn.contexts().input();
        assert_eq!(context.property(PROPERTY_HOST), Some("127.0.0.1"));
        assert_eq!(context.property(PROPERTY_PORT), Some(port.as_str()));
    }

    #[test]
    fn closed_provider_refuses() {
        let mut provider =
            ConnectionProvider::bind(server_config(Protocol::TlsServer), "127.0.0.1:0", true)
                .unwrap();
        provider.close();
        provider.close();
        assert!(matches!(provider.local_addr(), Err(Error::Closed)));
        assert!(matches!(provider.get_connection(), Err(Error::Closed)));
    }
}
