//! Drives [`Connection`]s from a tokio runtime.
//!
//! Tokio sockets are wrapped in a [`TokioStream`], which is a
//! non-blocking [`Transport`]. The functions in this module follow the
//! [`Action`] suggested for every retry: [`Action::Repeat`] yields to
//! the runtime, [`Action::Wait`] awaits the socket's readiness.

use crate::{
    action::{Action, Interest},
    connection::Connection,
    error::{Error, Poll, PollResult, Result, Retry},
    handshake::Step,
    transport::{poll_io, Contexts, IoMode, StreamContext, StreamType, Transport},
};

use async_trait::async_trait;

/// The non-blocking socket operations [`TokioStream`] needs.
#[async_trait]
pub trait Socket: Send + Sync {
    /// Waits for any of `interest`.
    async fn ready(&self, interest: tokio::io::Interest) -> std::io::Result<tokio::io::Ready>;

    /// Reads without waiting.
    fn try_read(&self, buf: &mut [u8]) -> std::io::Result<usize>;

    /// Writes without waiting.
    fn try_write(&self, buf: &[u8]) -> std::io::Result<usize>;
}

#[async_trait]
impl Socket for tokio::net::TcpStream {
    async fn ready(&self, interest: tokio::io::Interest) -> std::io::Result<tokio::io::Ready> {
        Self::ready(self, interest).await
    }

    fn try_read(&self, buf: &mut [u8]) -> std::io::Result<usize> {
        Self::try_read(self, buf)
    }

    fn try_write(&self, buf: &[u8]) -> std::io::Result<usize> {
        Self::try_write(self, buf)
    }
}

#[cfg(unix)]
#[async_trait]
impl Socket for tokio::net::UnixStream {
    async fn ready(&self, interest: tokio::io::Interest) -> std::io::Result<tokio::io::Ready> {
        Self::ready(self, interest).await
    }

    fn try_read(&self, buf: &mut [u8]) -> std::io::Result<usize> {
        Self::try_read(self, buf)
    }

    fn try_write(&self, buf: &[u8]) -> std::io::Result<usize> {
        Self::try_write(self, buf)
    }
}

/// Something a task can wait on until it is readable or writable.
#[async_trait]
pub trait Readiness {
    /// Waits until `interest` holds.
    async fn ready(&self, interest: Interest) -> Result<()>;
}

/// A [`Transport`] over a tokio socket. Always non-blocking.
///
/// [`Transport::shutdown_output`] does nothing: the socket is only
/// closed when the stream is dropped.
#[derive(Debug)]
pub struct TokioStream<S> {
    socket: S,
    contexts: Contexts,
}

impl<S: Socket> TokioStream<S> {
    /// Wraps `socket`, which serves both directions.
    pub fn new(socket: S) -> Self {
        Self {
            socket,
            contexts: Contexts::Shared(StreamContext::new(StreamType::Plain)),
        }
    }

    /// Attach a property to the (shared) context.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let (key, value) = (key.into(), value.into());
        self.contexts
            .for_each_mut(|ctx| ctx.set_property(key.clone(), value.clone()));
        self
    }

    /// The wrapped socket.
    pub fn get_ref(&self) -> &S {
        &self.socket
    }
}

impl<S: Socket> Transport for TokioStream<S> {
    fn read(&mut self, buf: &mut [u8]) -> PollResult<usize> {
        poll_io(self.socket.try_read(buf), Retry::InputNow, Retry::InputLater)
    }

    fn write(&mut self, buf: &[u8]) -> PollResult<usize> {
        poll_io(self.socket.try_write(buf), Retry::OutputNow, Retry::OutputLater)
    }

    fn contexts(&self) -> &Contexts {
        &self.contexts
    }

    fn io_mode(&self) -> IoMode {
        IoMode::NonBlocking
    }

    fn set_io_mode(&mut self, mode: IoMode) -> Result<()> {
        match mode {
            IoMode::NonBlocking => Ok(()),
            IoMode::Blocking => Err(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "tokio sockets are always non-blocking",
            )
            .into()),
        }
    }
}

#[async_trait]
impl<S: Socket> Readiness for TokioStream<S> {
    async fn ready(&self, interest: Interest) -> Result<()> {
        let interest = match interest {
            Interest::Readable => tokio::io::Interest::READABLE,
            Interest::Writable => tokio::io::Interest::WRITABLE,
        };
        self.socket.ready(interest).await?;
        Ok(())
    }
}

async fn follow<T: Readiness + ?Sized>(io: &T, action: Action) -> Result<()> {
    match action {
        Action::Repeat(_) => {
            tokio::task::yield_now().await;
            Ok(())
        }
        Action::Wait(interest) => io.ready(interest).await,
    }
}

/// Drives the handshake of `conn` to completion.
///
/// Does nothing once the handshake completed.
pub async fn handshake<T: Transport + Readiness>(conn: &mut Connection<T>) -> Result<()> {
    let Some(mut task) = conn.init_async() else {
        return Ok(());
    };

    loop {
        match task.resume(conn)? {
            Step::Complete => {
                log::trace!("Handshake complete after {} suspensions", task.suspensions());
                return Ok(());
            }
            Step::Yield(action) => follow(conn.transport(), action).await?,
        }
    }
}

/// Reads into `buf`, handshaking first if needed. Returns `0` at end
/// of stream.
pub async fn read<T: Transport + Readiness>(
    conn: &mut Connection<T>,
    buf: &mut [u8],
) -> Result<usize> {
    handshake(conn).await?;

    loop {
        let result = conn.read(buf)?;
        match result {
            Poll::Ready(n) => return Ok(n),
            Poll::Pending(_) => {
                let action = conn.suggest_input_action(&result)?;
                follow(conn.transport(), action).await?
            }
        }
    }
}

/// Writes all of `buf`, handshaking first if needed.
pub async fn write_all<T: Transport + Readiness>(
    conn: &mut Connection<T>,
    mut buf: &[u8],
) -> Result<()> {
    handshake(conn).await?;

    while !buf.is_empty() {
        let result = conn.write(buf)?;
        match result {
            Poll::Ready(0) => {
                return Err(Error::from(std::io::Error::from(
                    std::io::ErrorKind::WriteZero,
                )))
            }
            Poll::Ready(n) => buf = &buf[n..],
            Poll::Pending(_) => {
                let action = conn.suggest_output_action(&result)?;
                follow(conn.transport(), action).await?
            }
        }
    }

    Ok(())
}
