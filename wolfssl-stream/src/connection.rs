use crate::{
    action::{self, Action, Direction},
    engine::{Engine, Session},
    error::{Error, Poll, PollResult, Result, Retry},
    handshake::{Handshake, HandshakeState},
    transport::{Contexts, IoMode, Transport, PROPERTY_TLS_CIPHER, PROPERTY_TLS_VERSION},
    ProtocolVersion, Role,
};

/// A TLS session layered over a [`Transport`].
///
/// A `Connection` is itself a [`Transport`]: reading and writing go
/// through the engine's record layer, whose I/O callbacks read and
/// write the wrapped transport.
///
/// The handshake runs exactly once. It is driven either synchronously
/// with [`Self::init`] or step-wise with [`Self::init_async`]. In
/// [`IoMode::Blocking`] mode a read or write issued before the
/// handshake runs [`Self::init`] first; in [`IoMode::NonBlocking`] mode
/// it fails with [`Error::HandshakeIncomplete`].
pub struct Connection<T: Transport> {
    session: Session<T>,
    state: HandshakeState,
    contexts: Contexts,
    handshake_calls: usize,
    closed: bool,
}

impl<T: Transport> std::fmt::Debug for Connection<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("role", &self.session.role())
            .field("state", &self.state)
            .field("contexts", &self.contexts)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl<T: Transport> Connection<T> {
    /// Wraps `transport` with `engine`, which must not have handshaken
    /// yet.
    ///
    /// The connection's contexts have the same shape (shared or split)
    /// and properties as the transport's.
    pub fn new(engine: Engine, transport: T) -> Self {
        let contexts = transport.contexts().derive();
        log::debug!(
            "New {} connection ({} context)",
            engine.role(),
            if contexts.is_shared() { "shared" } else { "split" }
        );

        Self {
            session: engine.bind(transport),
            state: HandshakeState::Uninitialized,
            contexts,
            handshake_calls: 0,
            closed: false,
        }
    }

    /// The role this end plays in the handshake.
    pub fn role(&self) -> Role {
        self.session.role()
    }

    /// Progress of the handshake.
    pub fn state(&self) -> &HandshakeState {
        &self.state
    }

    /// Whether the handshake completed.
    pub fn is_established(&self) -> bool {
        self.state.is_complete()
    }

    /// Whether [`Self::close`] was called.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Number of handshake calls made on the engine so far.
    pub fn handshake_calls(&self) -> usize {
        self.handshake_calls
    }

    /// The wrapped transport.
    pub fn transport(&self) -> &T {
        self.session.transport()
    }

    /// Mutable access to the wrapped transport.
    ///
    /// Reading or writing it directly corrupts the TLS stream.
    pub fn transport_mut(&mut self) -> &mut T {
        self.session.transport_mut()
    }

    /// The negotiated TLS version, once the handshake completed.
    pub fn negotiated_version(&mut self) -> Option<ProtocolVersion> {
        self.state
            .is_complete()
            .then(|| self.session.version())
    }

    /// The negotiated cipher suite, once the handshake completed.
    pub fn cipher_name(&mut self) -> Option<String> {
        if self.state.is_complete() {
            self.session.current_cipher_name()
        } else {
            None
        }
    }

    /// Makes exactly one handshake call, unless the outcome is already
    /// known.
    pub(crate) fn handshake_step(&mut self) -> PollResult<()> {
        if self.closed {
            return Err(Error::Closed);
        }

        match &self.state {
            HandshakeState::Complete => return Ok(Poll::Ready(())),
            HandshakeState::Failed(kind) => return Err(Error::Handshake(kind.clone())),
            HandshakeState::Uninitialized => {
                log::debug!("Starting {} handshake", self.role())
            }
            HandshakeState::Handshaking(_) => {}
        }

        self.handshake_calls += 1;
        // A transport fault here means the session never came up
        let outcome = self
            .session
            .try_handshake()
            .map_err(|e| Error::Handshake(e.kind()));

        let role = self.role();
        let state = std::mem::replace(&mut self.state, HandshakeState::Uninitialized);
        self.state = state.advance(role, &outcome);

        match &outcome {
            Ok(Poll::Ready(())) => self.established(),
            Err(e) => log::debug!("{role} handshake failed: {e}"),
            Ok(Poll::Pending(_)) => {}
        }

        outcome
    }

    fn established(&mut self) {
        let version = self.session.version();
        let cipher = self.session.current_cipher_name();

        let changed = self.contexts.mark_initialized();
        debug_assert!(changed > 0, "handshake completed twice");

        self.contexts.for_each_mut(|ctx| {
            ctx.set_property(PROPERTY_TLS_VERSION, version.as_str());
            if let Some(cipher) = &cipher {
                ctx.set_property(PROPERTY_TLS_CIPHER, cipher.as_str());
            }
        });

        log::debug!(
            "{} handshake complete after {} calls: {} {}",
            self.role(),
            self.handshake_calls,
            version.as_str(),
            cipher.as_deref().unwrap_or("(no cipher)")
        );
    }

    /// Drives the handshake to completion on the calling thread.
    ///
    /// Does nothing once the handshake completed. Every retry is
    /// answered by calling the engine again straight away, so with a
    /// non-blocking transport this polls until the peer answers.
    pub fn init(&mut self) -> Result<()> {
        loop {
            match self.handshake_step()? {
                Poll::Ready(()) => return Ok(()),
                Poll::Pending(_) => std::thread::yield_now(),
            }
        }
    }

    /// Starts a step-wise handshake for an external scheduler, see
    /// [`Handshake::resume`].
    ///
    /// Returns `None` when the handshake already completed.
    pub fn init_async(&self) -> Option<Handshake> {
        if self.state.is_complete() {
            None
        } else {
            Some(Handshake::new())
        }
    }

    /// Scheduling instruction for an operation which reported `retry`.
    ///
    /// The underlying transport answers for the direction named by the
    /// retry, whichever direction the operation itself was issued in.
    pub fn suggest_retry_action(&self, retry: Retry) -> Result<Action> {
        let result = Poll::Pending(retry);
        match retry.direction() {
            Direction::Input => self.transport().suggest_input_action(&result),
            Direction::Output => self.transport().suggest_output_action(&result),
        }
    }

    fn suggest(&self, direction: Direction, result: &Poll<usize>) -> Result<Action> {
        match result {
            Poll::Pending(retry) => self.suggest_retry_action(*retry),
            Poll::Ready(_) => action::suggest_action(direction, result),
        }
    }

    fn ensure_established(&mut self) -> Result<()> {
        if self.closed {
            return Err(Error::Closed);
        }
        if self.state.is_complete() {
            return Ok(());
        }

        match self.io_mode() {
            IoMode::Blocking => self.init(),
            IoMode::NonBlocking => Err(Error::HandshakeIncomplete),
        }
    }

    /// Ends the session.
    ///
    /// Sends a close notify if the handshake completed, then detaches
    /// the engine from the transport: any later engine I/O fails
    /// without touching it. Finally the transport's output is shut
    /// down, so the peer reads end-of-stream even while this
    /// connection is kept alive. Calling this again does nothing. The
    /// engine and the transport are released when the connection is
    /// dropped.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        if self.state.is_complete() {
            match self.session.try_shutdown() {
                Ok(Poll::Ready(true)) => log::debug!("{} session shut down", self.role()),
                Ok(Poll::Ready(false)) => log::debug!("{} close notify sent", self.role()),
                Ok(Poll::Pending(retry)) => {
                    log::debug!("{} close notify not sent ({retry:?})", self.role())
                }
                Err(e) => log::debug!("{} shutdown failed: {e}", self.role()),
            }
        }

        self.session.close_io();

        if let Err(e) = self.session.transport_mut().shutdown_output() {
            log::debug!("{} transport shutdown failed: {e}", self.role());
        }
    }
}

impl<T: Transport> Transport for Connection<T> {
    fn read(&mut self, buf: &mut [u8]) -> PollResult<usize> {
        self.ensure_established()?;
        self.session.try_read(buf).inspect_err(|e| {
            log::debug!("{} read failed: {e}", self.session.role());
        })
    }

    fn write(&mut self, buf: &[u8]) -> PollResult<usize> {
        self.ensure_established()?;
        self.session.try_write(buf).inspect_err(|e| {
            log::debug!("{} write failed: {e}", self.session.role());
        })
    }

    fn suggest_input_action(&self, result: &Poll<usize>) -> Result<Action> {
        self.suggest(Direction::Input, result)
    }

    fn suggest_output_action(&self, result: &Poll<usize>) -> Result<Action> {
        self.suggest(Direction::Output, result)
    }

    fn contexts(&self) -> &Contexts {
        &self.contexts
    }

    fn io_mode(&self) -> IoMode {
        self.transport().io_mode()
    }

    fn set_io_mode(&mut self, mode: IoMode) -> Result<()> {
        self.transport_mut().set_io_mode(mode)
    }

    fn shutdown_output(&mut self) -> Result<()> {
        self.close();
        Ok(())
    }
}

impl<T: Transport> Drop for Connection<T> {
    fn drop(&mut self) {
        self.close();
    }
}
