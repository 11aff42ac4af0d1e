//! Connects to a remote host and wraps the socket in a client
//! [`Connection`].

use crate::{
    config::Config,
    connection::Connection,
    engine::{Engine, EngineOptions},
    error::Result,
    transport::{IoMode, TcpTransport, PROPERTY_HOST, PROPERTY_PORT},
};

use std::net::{IpAddr, TcpStream, ToSocketAddrs};

/// Produces client connections to one `host:port`.
#[derive(Debug, Clone)]
pub struct ConnectionProvider {
    config: Config,
    host: String,
    port: u16,
    mode: IoMode,
}

impl ConnectionProvider {
    /// Connections will go to `host:port`, verified against `config`.
    pub fn new(config: Config, host: impl Into<String>, port: u16) -> Self {
        Self {
            config,
            host: host.into(),
            port,
            mode: IoMode::Blocking,
        }
    }

    /// Sets the I/O mode of the sockets this provider connects.
    pub fn with_io_mode(mut self, mode: IoMode) -> Self {
        self.mode = mode;
        self
    }

    /// The remote host.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The remote port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// A client engine for [`Self::host`]: SNI is sent for host names
    /// and the peer certificate must match the host.
    fn new_engine(&self) -> Result<Engine> {
        let is_name = self.host.parse::<IpAddr>().is_err();
        let options = EngineOptions::new()
            .when(is_name, |o| o.with_sni(&self.host))
            .with_checked_domain_name(&self.host);
        Ok(self.config.new_engine(options)?)
    }

    /// Resolves the host and connects to the first address which
    /// accepts.
    ///
    /// The returned connection has not handshaken yet.
    pub fn get_connection(&self) -> Result<Connection<TcpTransport>> {
        let mut last_error = None;
        for addr in (self.host.as_str(), self.port).to_socket_addrs()? {
            match TcpStream::connect(addr) {
                Ok(stream) => {
                    log::debug!("Connected to {}:{} ({addr})", self.host, self.port);
                    let transport = TcpTransport::new(stream, self.mode)?
                        .with_property(PROPERTY_HOST, &self.host)
                        .with_property(PROPERTY_PORT, self.port.to_string());
                    return Ok(Connection::new(self.new_engine()?, transport));
                }
                Err(e) => {
                    log::debug!("Connecting to {addr} failed: {e}");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("{}: no addresses", self.host),
                )
            })
            .into())
    }

    /// Connects and handshakes without blocking the runtime.
    ///
    /// Dropping the future cancels the attempt and releases the socket
    /// and the engine.
    #[cfg(feature = "runtime-tokio")]
    pub async fn get_connection_async(
        &self,
    ) -> Result<Connection<crate::runtime::TokioStream<tokio::net::TcpStream>>> {
        let stream = tokio::net::TcpStream::connect((self.host.as_str(), self.port)).await?;
        log::debug!("Connected to {}:{}", self.host, self.port);

        let transport = crate::runtime::TokioStream::new(stream)
            .with_property(PROPERTY_HOST, &self.host)
            .with_property(PROPERTY_PORT, self.port.to_string());
        let mut conn = Connection::new(self.new_engine()?, transport);
        crate::runtime::handshake(&mut conn).await?;
        Ok(conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{test_helpers::client_config, Protocol, Transport};

    use std::net::TcpListener;

    #[test]
    fn connection_carries_host_and_port() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let provider = ConnectionProvider::new(client_config(Protocol::TlsClient), "localhost", port)
            .with_io_mode(IoMode::NonBlocking);
        assert_eq!(provider.host(), "localhost");
        assert_eq!(provider.port(), port);

        let conn = provider.get_connection().unwrap();
        assert!(!conn.is_established());
        assert_eq!(conn.io_mode(), IoMode::NonBlocking);

        let port = port.to_string();
        let context = conn.contexts().input();
        assert_eq!(context.property(PROPERTY_HOST), Some("localhost"));
        assert_eq!(context.property(PROPERTY_PORT), Some(port.as_str()));
    }

    #[test]
    fn refused_connection_is_a_transport_error() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let provider = ConnectionProvider::new(client_config(Protocol::TlsClient), "127.0.0.1", port);
        assert!(matches!(
            provider.get_connection(),
            Err(crate::Error::Transport(_))
        ));
    }
}
