use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};

use crate::action::{self, Action};
use crate::error::{Poll, PollResult, Result, Retry};

/// Property key under which providers record the remote host.
pub const PROPERTY_HOST: &str = "host";
/// Property key under which providers record the remote port.
pub const PROPERTY_PORT: &str = "port";
/// Property key holding the negotiated TLS version, once known.
pub const PROPERTY_TLS_VERSION: &str = "tls.version";
/// Property key holding the negotiated cipher suite, once known.
pub const PROPERTY_TLS_CIPHER: &str = "tls.cipher";

/// Whether transport calls wait for readiness or report a [`Retry`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum IoMode {
    /// Calls wait until they can make progress
    #[default]
    Blocking,
    /// Calls return `Poll::Pending` instead of waiting
    NonBlocking,
}

/// How a stream relates to the operating system.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StreamType {
    /// Backed by a real file descriptor
    Plain,
    /// Implemented in user space (pipes, layered streams)
    Virtual,
}

/// Per-direction bookkeeping of a stream.
#[derive(Debug, Clone)]
pub struct StreamContext {
    stream_type: StreamType,
    properties: BTreeMap<String, String>,
    initialized: bool,
}

impl StreamContext {
    /// Create an uninitialized context with no properties.
    pub fn new(stream_type: StreamType) -> Self {
        Self {
            stream_type,
            properties: BTreeMap::new(),
            initialized: false,
        }
    }

    /// The declared stream type.
    pub fn stream_type(&self) -> StreamType {
        self.stream_type
    }

    /// Whether the stream has finished its one-time initialization.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// All metadata attached to the stream.
    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    /// Look up a single property.
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// Attach a property, replacing any previous value.
    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.properties.insert(key.into(), value.into());
    }

    /// Sets the initialized flag. Returns `false` when it was already
    /// set; the flag is never cleared.
    pub(crate) fn mark_initialized(&mut self) -> bool {
        !std::mem::replace(&mut self.initialized, true)
    }

    /// A fresh, uninitialized context carrying the same type and
    /// properties.
    fn derive(&self) -> Self {
        Self {
            stream_type: self.stream_type,
            properties: self.properties.clone(),
            initialized: false,
        }
    }
}

/// The input and output contexts of a stream: one object serving both
/// directions, or two distinct objects.
#[derive(Debug, Clone)]
pub enum Contexts {
    /// A single handle serves both directions
    Shared(StreamContext),
    /// Input and output are separate handles
    Split {
        /// Context of the input direction
        input: StreamContext,
        /// Context of the output direction
        output: StreamContext,
    },
}

impl Contexts {
    /// Context of the input direction.
    pub fn input(&self) -> &StreamContext {
        match self {
            Contexts::Shared(ctx) => ctx,
            Contexts::Split { input, .. } => input,
        }
    }

    /// Context of the output direction.
    pub fn output(&self) -> &StreamContext {
        match self {
            Contexts::Shared(ctx) => ctx,
            Contexts::Split { output, .. } => output,
        }
    }

    /// `true` when both directions share one context.
    pub fn is_shared(&self) -> bool {
        matches!(self, Contexts::Shared(_))
    }

    /// Apply `f` once to every distinct context.
    pub fn for_each_mut<F: FnMut(&mut StreamContext)>(&mut self, mut f: F) {
        match self {
            Contexts::Shared(ctx) => f(ctx),
            Contexts::Split { input, output } => {
                f(input);
                f(output);
            }
        }
    }

    /// Same shape, types and properties, with every context
    /// uninitialized.
    pub(crate) fn derive(&self) -> Self {
        match self {
            Contexts::Shared(ctx) => Contexts::Shared(ctx.derive()),
            Contexts::Split { input, output } => Contexts::Split {
                input: input.derive(),
                output: output.derive(),
            },
        }
    }

    /// Marks every distinct context initialized. Returns the number of
    /// contexts whose flag actually changed.
    pub(crate) fn mark_initialized(&mut self) -> usize {
        let mut changed = 0;
        self.for_each_mut(|ctx| {
            if ctx.mark_initialized() {
                changed += 1;
            }
        });
        changed
    }
}

/// A byte stream which can be read and written without blocking the
/// caller, and which can tell a scheduler how to wait on it.
///
/// Every fallible call reports either a byte count, a [`Retry`], or a
/// hard failure. A read of `Poll::Ready(0)` is end-of-stream.
pub trait Transport {
    /// Read into `buf`.
    fn read(&mut self, buf: &mut [u8]) -> PollResult<usize>;

    /// Write from `buf`.
    fn write(&mut self, buf: &[u8]) -> PollResult<usize>;

    /// Scheduling instruction for the outcome of a read.
    fn suggest_input_action(&self, result: &Poll<usize>) -> Result<Action> {
        action::suggest_input_action(result)
    }

    /// Scheduling instruction for the outcome of a write.
    fn suggest_output_action(&self, result: &Poll<usize>) -> Result<Action> {
        action::suggest_output_action(result)
    }

    /// The stream's input/output contexts.
    fn contexts(&self) -> &Contexts;

    /// Current I/O mode.
    fn io_mode(&self) -> IoMode;

    /// Switch the I/O mode.
    fn set_io_mode(&mut self, mode: IoMode) -> Result<()>;

    /// Stop writing: the peer reads end-of-stream once it has consumed
    /// what was already written. Reading remains possible.
    ///
    /// Does nothing unless the transport can half-close.
    fn shutdown_output(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn read(&mut self, buf: &mut [u8]) -> PollResult<usize> {
        (**self).read(buf)
    }

    fn write(&mut self, buf: &[u8]) -> PollResult<usize> {
        (**self).write(buf)
    }

    fn suggest_input_action(&self, result: &Poll<usize>) -> Result<Action> {
        (**self).suggest_input_action(result)
    }

    fn suggest_output_action(&self, result: &Poll<usize>) -> Result<Action> {
        (**self).suggest_output_action(result)
    }

    fn contexts(&self) -> &Contexts {
        (**self).contexts()
    }

    fn io_mode(&self) -> IoMode {
        (**self).io_mode()
    }

    fn set_io_mode(&mut self, mode: IoMode) -> Result<()> {
        (**self).set_io_mode(mode)
    }

    fn shutdown_output(&mut self) -> Result<()> {
        (**self).shutdown_output()
    }
}

/// Maps the outcome of a `std::io` call onto a [`PollResult`], using
/// `retry_later` for would-block and `retry_now` for interruptions.
pub(crate) fn poll_io(
    result: std::io::Result<usize>,
    retry_now: Retry,
    retry_later: Retry,
) -> PollResult<usize> {
    match result {
        Ok(n) => Ok(Poll::Ready(n)),
        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(Poll::Pending(retry_later)),
        Err(e) if e.kind() == std::io::ErrorKind::Interrupted => Ok(Poll::Pending(retry_now)),
        Err(e) => Err(e.into()),
    }
}

/// A [`Transport`] over a connected [`std::net::TcpStream`].
///
/// A socket serves both directions, so its contexts are shared.
#[derive(Debug)]
pub struct TcpTransport {
    stream: TcpStream,
    contexts: Contexts,
    mode: IoMode,
}

impl TcpTransport {
    /// Wrap `stream`, switching it to `mode`.
    pub fn new(stream: TcpStream, mode: IoMode) -> Result<Self> {
        stream.set_nonblocking(mode == IoMode::NonBlocking)?;
        Ok(Self {
            stream,
            contexts: Contexts::Shared(StreamContext::new(StreamType::Plain)),
            mode,
        })
    }

    /// Attach a property to the (shared) context.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let (key, value) = (key.into(), value.into());
        self.contexts
            .for_each_mut(|ctx| ctx.set_property(key.clone(), value.clone()));
        self
    }

    /// The wrapped socket.
    pub fn get_ref(&self) -> &TcpStream {
        &self.stream
    }
}

impl Transport for TcpTransport {
    fn read(&mut self, buf: &mut [u8]) -> PollResult<usize> {
        poll_io(self.stream.read(buf), Retry::InputNow, Retry::InputLater)
    }

    fn write(&mut self, buf: &[u8]) -> PollResult<usize> {
        poll_io(self.stream.write(buf), Retry::OutputNow, Retry::OutputLater)
    }

    fn contexts(&self) -> &Contexts {
        &self.contexts
    }

    fn io_mode(&self) -> IoMode {
        self.mode
    }

    fn set_io_mode(&mut self, mode: IoMode) -> Result<()> {
        self.stream.set_nonblocking(mode == IoMode::NonBlocking)?;
        self.mode = mode;
        Ok(())
    }

    fn shutdown_output(&mut self) -> Result<()> {
        match self.stream.shutdown(Shutdown::Write) {
            // The peer went away first
            Err(e) if e.kind() == std::io::ErrorKind::NotConnected => Ok(()),
            other => Ok(other?),
        }
    }
}
