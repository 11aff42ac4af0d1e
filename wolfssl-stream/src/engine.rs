use crate::{
    callback::{io_recv_shim, io_send_shim, Bridge},
    config::Config,
    error::{Error, ErrorKind, Poll, PollResult, Result, Retry},
    transport::Transport,
    Direction, ProtocolVersion, Role, SslVerifyMode,
};

use thiserror::Error;

use std::{
    ffi::{c_int, c_uchar, c_ushort, c_void},
    ptr::NonNull,
};

/// Per-engine options applied when an [`Engine`] is created.
#[derive(Debug, Default, Clone)]
pub struct EngineOptions {
    /// If set, configures SNI (Server Name Indication) for the session with the
    /// given hostname.
    pub server_name_indicator: Option<String>,
    /// If set, configures the session to check the given domain against the
    /// peer certificate during connection.
    pub checked_domain_name: Option<String>,
    /// If set, overrides the verification mode of the [`Config`].
    pub ssl_verify_mode: Option<SslVerifyMode>,
}

impl EngineOptions {
    /// Creates default options.
    pub fn new() -> Self {
        Default::default()
    }

    /// When `cond` is True call `func` on `Self`
    pub fn when<F>(self, cond: bool, func: F) -> Self
    where
        F: FnOnce(Self) -> Self,
    {
        if cond {
            func(self)
        } else {
            self
        }
    }

    /// When `maybe` is Some(_) call `func` on `Self` and the contained value
    pub fn when_some<F, T>(self, maybe: Option<T>, func: F) -> Self
    where
        F: FnOnce(Self, T) -> Self,
    {
        if let Some(t) = maybe {
            func(self, t)
        } else {
            self
        }
    }

    /// Sets [`Self::server_name_indicator`]
    pub fn with_sni(mut self, hostname: &str) -> Self {
        self.server_name_indicator = Some(hostname.to_string());
        self
    }

    /// Sets [`Self::checked_domain_name`]
    pub fn with_checked_domain_name(mut self, domain: &str) -> Self {
        self.checked_domain_name = Some(domain.to_string());
        self
    }

    /// Sets [`Self::ssl_verify_mode`]
    pub fn with_ssl_verify_mode(mut self, mode: SslVerifyMode) -> Self {
        self.ssl_verify_mode = Some(mode);
        self
    }
}

/// Error creating an [`Engine`] object.
#[derive(Error, Debug)]
pub enum NewEngineError {
    /// `wolfSSL_new` failed
    #[error("Failed to allocate WolfSSL Session")]
    CreateFailed,

    /// A setup operation on the WolfSSL Session
    #[error("Failed to setup SSL session context: {0}: {1}")]
    SetupFailed(&'static str, Error),
}

impl From<NewEngineError> for Error {
    fn from(e: NewEngineError) -> Self {
        match e {
            NewEngineError::SetupFailed(_, e) => e,
            e @ NewEngineError::CreateFailed => Error::Config(ErrorKind::Protocol {
                what: e.to_string(),
            }),
        }
    }
}

// Wrap a valid pointer to a [`wolfssl_sys::WOLFSSL`] such that we can
// add traits such as `Send`.
struct WolfsslPointer(NonNull<wolfssl_sys::WOLFSSL>);

impl WolfsslPointer {
    fn as_ptr(&mut self) -> *mut wolfssl_sys::WOLFSSL {
        self.0.as_ptr()
    }
}

// SAFETY: Per [Library Design][] under "Thread Safety"
//
// > A client may share an WOLFSSL object across multiple threads but
// > access must be synchronized, i.e., trying to read/write at the same
// > time from two different threads with the same SSL pointer is not
// > supported.
//
// This is consistent with the requirements for `Send`. The required
// syncronization is handled by requiring `&mut self` in all relevant
// methods.
//
// [Library Design]: https://www.wolfssl.com/documentation/manuals/wolfssl/chapter09.html
unsafe impl Send for WolfsslPointer {}

/// A configured, role-assigned native session which has not been
/// bound to a transport yet.
///
/// Whoever holds the `Engine` is its only owner; binding it moves it
/// into a [`Session`] and nothing else can reach (or free) it
/// afterwards.
pub struct Engine {
    ssl: WolfsslPointer,
    role: Role,
    // Keeps the `WOLFSSL_CTX` alive for as long as `ssl` is.
    _config: Config,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}

impl Engine {
    pub(crate) fn new(
        ssl: NonNull<wolfssl_sys::WOLFSSL>,
        config: Config,
        options: EngineOptions,
    ) -> std::result::Result<Self, NewEngineError> {
        let mut engine = Self {
            ssl: WolfsslPointer(ssl),
            role: config.role(),
            _config: config,
        };

        if let Some(sni) = options.server_name_indicator {
            engine
                .set_server_name_indication(&sni)
                .map_err(|e| NewEngineError::SetupFailed("set_server_name_indication", e))?;
        }

        if let Some(name) = options.checked_domain_name {
            engine
                .set_domain_name_to_check(&name)
                .map_err(|e| NewEngineError::SetupFailed("set_domain_name_to_check", e))?;
        }

        if let Some(mode) = options.ssl_verify_mode {
            engine.set_verify(mode);
        }

        Ok(engine)
    }

    /// The role this engine plays in the handshake.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Binds the engine to `transport`: from now on the engine's
    /// record layer reads and writes through it.
    pub fn bind<T: Transport>(self, transport: T) -> Session<T> {
        let mut session = Session {
            engine: self,
            io: Box::new(Bridge::new(transport)),
        };
        session.register_io_context();
        session
    }

    /// Sets verification method for remote peers
    pub fn set_verify(&mut self, mode: SslVerifyMode) {
        // SAFETY: [`wolfSSL_set_verify`][0] ([also][1]) expects a valid pointer to `WOLFSSL`. Per the
        // [Library design][2] access is synchronized via the requirement for `&mut self` in `WolfsslPointer::as_ptr()`
        // Third parameter `verify_callback` if valid, will be called when verification fails.
        // But we send `None` since we do not use this additional functionality
        //
        // [0]: https://www.wolfssl.com/documentation/manuals/wolfssl/group__Setup.html#function-wolfssl_set_verify
        // [1]: https://www.wolfssl.com/doxygen/group__Setup.html#gaf9198658e31dd291088be18262ef2354
        // [2]: https://www.wolfssl.com/documentation/manuals/wolfssl/chapter09.html#thread-safety
        unsafe { wolfssl_sys::wolfSSL_set_verify(self.ssl.as_ptr(), mode.into(), None) };
    }

    /// Invokes [`wolfSSL_UseSNI`][0]
    ///
    /// [0]: https://www.wolfssl.com/documentation/manuals/wolfssl/ssl_8h.html#function-wolfssl_usesni
    fn set_server_name_indication(&mut self, sni: &str) -> Result<()> {
        let bytes = sni.as_bytes();
        // SAFETY: [`wolfSSL_UseSNI`][0] ([also][1]) expects a valid pointer to `WOLFSSL`. Per the
        // [Library design][2] access is synchronized via the requirement for `&mut self` in `WolfsslPointer::as_ptr()`.
        // Api also takes `data` and `size` to get the SNI name, so null terminated string is not required
        //
        // [0]: https://www.wolfssl.com/documentation/manuals/wolfssl/ssl_8h.html#function-wolfssl_usesni
        // [1]: https://www.wolfssl.com/doxygen/ssl_8h.html#a871070b101b579dc4663217b1c3fbcd4
        // [2]: https://www.wolfssl.com/documentation/manuals/wolfssl/chapter09.html#thread-safety
        match unsafe {
            wolfssl_sys::wolfSSL_UseSNI(
                self.ssl.as_ptr(),
                wolfssl_sys::WOLFSSL_SNI_HOST_NAME as c_uchar,
                bytes.as_ptr() as *const c_void,
                bytes.len() as c_ushort,
            )
        } {
            wolfssl_sys::WOLFSSL_SUCCESS_c_int => Ok(()),
            e => Err(Error::config(e)),
        }
    }

    /// Invokes [`wolfSSL_check_domain_name`][0]
    ///
    /// [0]: https://www.wolfssl.com/documentation/manuals/wolfssl/group__Setup.html#function-wolfssl_check_domain_name
    fn set_domain_name_to_check(&mut self, domain_name: &str) -> Result<()> {
        let domain_name = std::ffi::CString::new(domain_name)
            .map_err(|_| Error::config(wolfssl_sys::wolfCrypt_ErrorCodes_BAD_FUNC_ARG))?;

        // SAFETY: [`wolfSSL_check_domain_name`][0] ([also][1]) expects a valid pointer to `WOLFSSL`. Per the
        // [Library design][2] access is synchronized via the requirement for `&mut self` in `WolfsslPointer::as_ptr()`.
        // Documentation does not state explicitly that `dn` (domain name) should be a null terminated string
        // Based on example (and of course no `size` arg), we are constructing Cstring
        //
        // [0]: https://www.wolfssl.com/documentation/manuals/wolfssl/group__Setup.html#function-wolfssl_check_domain_name
        // [1]: https://www.wolfssl.com/doxygen/group__Setup.html#gab9b75f5fb10ce88f0026c57716858074
        // [2]: https://www.wolfssl.com/documentation/manuals/wolfssl/chapter09.html#thread-safety
        match unsafe {
            wolfssl_sys::wolfSSL_check_domain_name(
                self.ssl.as_ptr(),
                domain_name.as_c_str().as_ptr(),
            )
        } {
            wolfssl_sys::WOLFSSL_SUCCESS_c_int => Ok(()),
            e => Err(Error::config(e)),
        }
    }

    /// Extracts a given error code from this session, by invoking
    /// [`wolfSSL_get_error`][0].
    ///
    /// This is stateful, and collects the error of the previous invoked method.
    ///
    /// [0]: https://www.wolfssl.com/documentation/manuals/wolfssl/group__Debug.html#function_wolfssl_get_error
    fn get_error(&mut self, ret: c_int) -> c_int {
        // SAFETY: [`wolfSSL_get_error`][0] ([also][1]) expects a valid pointer to `WOLFSSL`. Per the
        // [Library design][2] access is synchronized via the requirement for `&mut self` in `WolfsslPointer::as_ptr()`.
        //
        // [0]: https://www.wolfssl.com/documentation/manuals/wolfssl/ssl_8h.html#function-wolfssl_get_error
        // [1]: https://www.wolfssl.com/doxygen/group__Debug.html#gaafd5671d443fa684913ba5955a4eb591
        // [2]: https://www.wolfssl.com/documentation/manuals/wolfssl/chapter09.html#thread-safety
        unsafe { wolfssl_sys::wolfSSL_get_error(self.ssl.as_ptr(), ret) }
    }
}

impl Drop for Engine {
    /// Invokes [`wolfSSL_free`][0]
    ///
    /// [0]: https://www.wolfssl.com/documentation/manuals/wolfssl/group__Setup.html#function-wolfssl_free
    fn drop(&mut self) {
        // SAFETY: [`wolfSSL_free`][0] ([also][1]) expects a valid pointer to `WOLFSSL`. Per the
        // [Library design][2] access is synchronized via the requirement for `&mut self` in `WolfsslPointer::as_ptr()`.
        // `Engine` is the only owner of `ssl` and `drop` runs once, so it is freed exactly once.
        //
        // [0]: https://www.wolfssl.com/documentation/manuals/wolfssl/group__Setup.html#function-wolfssl_free
        // [1]: https://www.wolfssl.com/doxygen/group__Setup.html#ga640f0a9e17f4727e996fc8bab4eee3c6
        // [2]: https://www.wolfssl.com/documentation/manuals/wolfssl/chapter09.html#thread-safety
        unsafe { wolfssl_sys::wolfSSL_free(self.ssl.as_ptr()) }
    }
}

/// An [`Engine`] bound to a transport.
///
/// Every `try_*` method invokes the engine *once*. The engine's I/O
/// callbacks go straight to the transport; when the transport asks for
/// a retry, the method returns `Poll::Pending` with the transport's own
/// [`Retry`], and when the transport fails, the transport's error is
/// returned instead of the engine's generic socket error.
pub struct Session<T: Transport> {
    // Declared before `io`: the `WOLFSSL` (and with it every use of the
    // callbacks) must be released before the bridge is dropped.
    engine: Engine,

    /// Box so we have a stable address to pass to FFI.
    io: Box<Bridge<T>>,
}

impl<T: Transport> Session<T> {
    /// The role this session plays in the handshake.
    pub fn role(&self) -> Role {
        self.engine.role
    }

    /// The transport this session is bound to.
    pub fn transport(&self) -> &T {
        self.io.transport()
    }

    /// Mutable access to the transport this session is bound to.
    pub fn transport_mut(&mut self) -> &mut T {
        self.io.transport_mut()
    }

    /// Makes every later I/O callback fail without touching the
    /// transport. Does not free anything.
    pub fn close_io(&mut self) {
        self.io.close();
    }

    /// Whether [`Self::close_io`] was called.
    pub fn is_io_closed(&self) -> bool {
        self.io.is_closed()
    }

    /// Registers a context that will be visible within the custom IO callbacks
    /// tied to this `WOLFSSL` session.
    ///
    /// This is done via `wolfSSL_SSLSetIORecv` and
    /// `wolfSSL_SSLSetIOSend` (see [`wolfSSL_CTX_SetIORecv`][0] for
    /// related docs) [`wolfSSL_SetIOReadCtx`][1] and
    /// [`wolfSSL_SetIOWriteCtx`][2].
    ///
    /// [0]: https://www.wolfssl.com/documentation/manuals/wolfssl/wolfio_8h.html#function-wolfssl_ctx_setiorecv
    /// [1]: https://www.wolfssl.com/documentation/manuals/wolfssl/wolfio_8h.html#function-wolfssl_setioreadctx
    /// [2]: https://www.wolfssl.com/documentation/manuals/wolfssl/wolfio_8h.html#function-wolfssl_setiowritectx
    fn register_io_context(&mut self) {
        // SAFETY: `io_recv_shim::<T>` is 'static so must live longer than `self.engine.ssl`.
        unsafe {
            wolfssl_sys::wolfSSL_SSLSetIORecv(self.engine.ssl.as_ptr(), Some(io_recv_shim::<T>));
        }
        // SAFETY: `io_send_shim::<T>` is 'static so must live longer than `self.engine.ssl`.
        unsafe {
            wolfssl_sys::wolfSSL_SSLSetIOSend(self.engine.ssl.as_ptr(), Some(io_send_shim::<T>));
        }

        let io = &mut *self.io as *mut Bridge<T> as *mut c_void;

        // SAFETY:
        // `io` here is behind a `Box<>` (`self.io`) so the address is stable.
        //
        // `self.engine` is declared before `self.io`, so the `WOLFSSL` is
        // freed (and thus any use of the io callbacks quiesced) before
        // `io` can be dropped.
        //
        // Therefore `io` here is valid for as long as it needs to be.
        unsafe {
            wolfssl_sys::wolfSSL_SetIOReadCtx(self.engine.ssl.as_ptr(), io);
        }
        // SAFETY: As above
        unsafe {
            wolfssl_sys::wolfSSL_SetIOWriteCtx(self.engine.ssl.as_ptr(), io);
        }
    }

    /// Converts a `WANT_READ`/`WANT_WRITE` into the retry the
    /// transport actually reported.
    fn pending<R>(&mut self, want: Direction) -> PollResult<R> {
        let retry = self.io.take_retry().unwrap_or(Retry::later(want));
        Ok(Poll::Pending(retry))
    }

    /// Converts a failed engine call into an error, preferring the
    /// transport's error if a callback saw one.
    fn failure(&mut self, code: c_int, construct: fn(c_int) -> Error) -> Error {
        match self.io.take_error() {
            Some(err) => err,
            None => construct(code),
        }
    }

    /// Classifies the `wolfSSL_get_error` code of a failed call.
    fn classify<R>(&mut self, ret: c_int, construct: fn(c_int) -> Error) -> PollResult<R> {
        match self.engine.get_error(ret) {
            wolfssl_sys::WOLFSSL_ERROR_WANT_READ_c_int => self.pending(Direction::Input),
            wolfssl_sys::WOLFSSL_ERROR_WANT_WRITE_c_int => self.pending(Direction::Output),
            e => Err(self.failure(e, construct)),
        }
    }

    /// Invokes [`wolfSSL_accept`][0] (servers) or
    /// [`wolfSSL_connect`][1] (clients) *once*.
    ///
    /// The distinction is important because it takes more than one invocation
    /// to successfully form a secure session. The engine tracks partial
    /// progress, so repeating the call after a retry is always valid.
    ///
    /// [0]: https://www.wolfssl.com/documentation/manuals/wolfssl/group__IO.html#function-wolfssl_accept
    /// [1]: https://www.wolfssl.com/documentation/manuals/wolfssl/group__IO.html#function-wolfssl_connect
    pub fn try_handshake(&mut self) -> PollResult<()> {
        self.io.reset();

        let ssl = self.engine.ssl.as_ptr();
        let ret = match self.engine.role {
            // SAFETY: [`wolfSSL_accept`][0] expects a valid pointer to `WOLFSSL`. Per the
            // [Library design][1] access is synchronized via the requirement for `&mut self`.
            // The I/O callbacks registered in `register_io_context` may run during the call.
            //
            // [0]: https://www.wolfssl.com/documentation/manuals/wolfssl/group__IO.html#function-wolfssl_accept
            // [1]: https://www.wolfssl.com/documentation/manuals/wolfssl/chapter09.html#thread-safety
            Role::Server => unsafe { wolfssl_sys::wolfSSL_accept(ssl) },
            // SAFETY: as above for [`wolfSSL_connect`][0].
            //
            // [0]: https://www.wolfssl.com/documentation/manuals/wolfssl/group__IO.html#function-wolfssl_connect
            Role::Client => unsafe { wolfssl_sys::wolfSSL_connect(ssl) },
        };

        match ret {
            wolfssl_sys::WOLFSSL_SUCCESS_c_int => Ok(Poll::Ready(())),
            x => self.classify(x, Error::handshake),
        }
    }

    /// Invokes [`wolfSSL_shutdown`][0] *once*.
    ///
    /// Returns `Poll::Ready(true)` if the connection has been fully
    /// (bidirectionally) shutdown, including having seen the "closing
    /// notify" message from the peer, and `Poll::Ready(false)` if the
    /// close notify has only been sent from this end.
    ///
    /// [0]: https://www.wolfssl.com/documentation/manuals/wolfssl/ssl_8h.html#function-wolfssl_shutdown
    pub fn try_shutdown(&mut self) -> PollResult<bool> {
        self.io.reset();

        // SAFETY: [`wolfSSL_shutdown`][0] ([also][1]) expects a valid pointer to `WOLFSSL`. Per the
        // [Library design][2] access is synchronized via the requirement for `&mut self` in `WolfsslPointer::as_ptr()`.
        //
        // [0]: https://www.wolfssl.com/documentation/manuals/wolfssl/ssl_8h.html#function-wolfssl_shutdown
        // [1]: https://www.wolfssl.com/doxygen/group__TLS.html#ga51f54ec99e4d87f4b25a92fe031439ae
        // [2]: https://www.wolfssl.com/documentation/manuals/wolfssl/chapter09.html#thread-safety
        match unsafe { wolfssl_sys::wolfSSL_shutdown(self.engine.ssl.as_ptr()) } {
            wolfssl_sys::WOLFSSL_SUCCESS_c_int => Ok(Poll::Ready(true)),
            wolfssl_sys::WOLFSSL_SHUTDOWN_NOT_DONE_c_int => Ok(Poll::Ready(false)),
            x => self.classify(x, Error::fatal),
        }
    }

    /// Invokes [`wolfSSL_write`][0] *once*.
    ///
    /// Returns the number of bytes of `data_in` consumed by the engine,
    /// which may be fewer than `data_in.len()`. An empty `data_in`
    /// returns `Poll::Ready(0)` without calling the engine.
    ///
    /// [0]: https://www.wolfssl.com/documentation/manuals/wolfssl/group__IO.html#function-wolfssl_write
    pub fn try_write(&mut self, data_in: &[u8]) -> PollResult<usize> {
        if data_in.is_empty() {
            return Ok(Poll::Ready(0));
        }
        self.io.reset();

        // SAFETY: [`wolfSSL_write`][0] ([also][1]) expects a valid pointer to `WOLFSSL`. Per the
        // [Library design][2] access is synchronized via the requirement for `&mut self` in `WolfsslPointer::as_ptr()`.
        // `data_in` is valid for reads of `data_in.len()` bytes.
        //
        // [0]: https://www.wolfssl.com/documentation/manuals/wolfssl/ssl_8h.html#function-wolfssl_write
        // [1]: https://www.wolfssl.com/doxygen/group__IO.html#gad6cbb3cb90e4d606e9507e4ec06197df
        // [2]: https://www.wolfssl.com/documentation/manuals/wolfssl/chapter09.html#thread-safety
        match unsafe {
            wolfssl_sys::wolfSSL_write(
                self.engine.ssl.as_ptr(),
                data_in.as_ptr() as *const c_void,
                data_in.len() as c_int,
            )
        } {
            x if x > 0 => Ok(Poll::Ready(x as usize)),
            x => match self.engine.get_error(x) {
                wolfssl_sys::WOLFSSL_ERROR_NONE_c_int => Ok(Poll::Ready(0)),
                wolfssl_sys::WOLFSSL_ERROR_WANT_READ_c_int => self.pending(Direction::Input),
                wolfssl_sys::WOLFSSL_ERROR_WANT_WRITE_c_int => self.pending(Direction::Output),
                e => Err(self.failure(e, Error::fatal)),
            },
        }
    }

    /// Invokes [`wolfSSL_read`][0] *once*.
    ///
    /// Returns `Poll::Ready(0)` once the peer has closed the session.
    /// An empty `data_out` also returns `Poll::Ready(0)`, like
    /// [`std::io::Read::read`], but without calling the engine, so
    /// nothing is consumed and the result says nothing about the peer.
    ///
    /// [0]: https://www.wolfssl.com/documentation/manuals/wolfssl/group__IO.html#function-wolfssl_read
    pub fn try_read(&mut self, data_out: &mut [u8]) -> PollResult<usize> {
        if data_out.is_empty() {
            return Ok(Poll::Ready(0));
        }
        self.io.reset();

        // SAFETY: [`wolfSSL_read`][0] ([also][1]) expects a valid pointer to `WOLFSSL`. Per the
        // [Library design][2] access is synchronized via the requirement for `&mut self` in `WolfsslPointer::as_ptr()`.
        // `data_out` is a valid mutable buffer of `data_out.len()` bytes.
        //
        // [0]: https://www.wolfssl.com/documentation/manuals/wolfssl/ssl_8h.html#function-wolfssl_read
        // [1]: https://www.wolfssl.com/doxygen/group__IO.html#ga80c3ccd3c0441c77307df3afe88a5c35
        // [2]: https://www.wolfssl.com/documentation/manuals/wolfssl/chapter09.html#thread-safety
        match unsafe {
            wolfssl_sys::wolfSSL_read(
                self.engine.ssl.as_ptr(),
                data_out.as_mut_ptr() as *mut c_void,
                data_out.len() as c_int,
            )
        } {
            x if x > 0 => Ok(Poll::Ready(x as usize)),
            x => match self.engine.get_error(x) {
                wolfssl_sys::WOLFSSL_ERROR_NONE_c_int => Ok(Poll::Ready(0)),
                e if e == wolfssl_sys::WOLFSSL_ERROR_ZERO_RETURN as c_int => Ok(Poll::Ready(0)),
                wolfssl_sys::WOLFSSL_ERROR_WANT_READ_c_int => self.pending(Direction::Input),
                wolfssl_sys::WOLFSSL_ERROR_WANT_WRITE_c_int => self.pending(Direction::Output),
                e => Err(self.failure(e, Error::fatal)),
            },
        }
    }

    /// Invokes [`wolfSSL_is_init_finished`][0]
    ///
    /// "Init" in this case is the formation of the TLS connection.
    ///
    /// [0]: https://www.wolfssl.com/documentation/manuals/wolfssl/group__TLS.html#function-wolfssl_is_init_finished
    pub fn is_init_finished(&mut self) -> bool {
        // SAFETY: [`wolfSSL_is_init_finished`][0] ([also][1]) expects a valid pointer to `WOLFSSL`. Per the
        // [Library design][2] access is synchronized via the requirement for `&mut self` in `WolfsslPointer::as_ptr()`.
        //
        // [0]: https://www.wolfssl.com/documentation/manuals/wolfssl/group__TLS.html#function-wolfssl_is_init_finished
        // [1]: https://www.wolfssl.com/doxygen/group__TLS.html#gaa0bd0ae911e350d1e64b0cc9d3c8292b
        // [2]: https://www.wolfssl.com/documentation/manuals/wolfssl/chapter09.html#thread-safety
        match unsafe { wolfssl_sys::wolfSSL_is_init_finished(self.engine.ssl.as_ptr()) } {
            0 => false,
            1 => true,
            e => unreachable!("wolfSSL_is_init_finished: {e:?}"),
        }
    }

    /// Gets the protocol version used for the session.
    /// Invokes [`wolfssl_sys::wolfSSL_version`]
    ///
    /// No online documentation available for `wolfSSL_version`
    pub fn version(&mut self) -> ProtocolVersion {
        // SAFETY: No documentation found for [`wolfSSL_version`][] api,
        // From implementation, the api expects valid pointer to `WOLFSSL`
        let version = unsafe { wolfssl_sys::wolfSSL_version(self.engine.ssl.as_ptr()) };
        match version as u32 {
            wolfssl_sys::TLS1_VERSION => ProtocolVersion::TlsV1_0,
            wolfssl_sys::TLS1_1_VERSION => ProtocolVersion::TlsV1_1,
            wolfssl_sys::TLS1_2_VERSION => ProtocolVersion::TlsV1_2,
            wolfssl_sys::TLS1_3_VERSION => ProtocolVersion::TlsV1_3,
            _ => ProtocolVersion::Unknown,
        }
    }

    /// Gets the current cipher of the session.
    /// If the cipher name is "None", return None.
    pub fn current_cipher_name(&mut self) -> Option<String> {
        // SAFETY: [`wolfSSL_get_current_cipher`][0] ([also][1]) expects a valid pointer to `WOLFSSL`. Per the
        // [Library design][2] access is synchronized via the requirement for `&mut self` in `WolfsslPointer::as_ptr()`.
        // Return value is the pointer inside the ssl session. Caller can read it safely
        //
        // [0]: https://www.wolfssl.com/documentation/manuals/wolfssl/group__IO.html#function-wolfssl_get_current_cipher
        // [1]: https://www.wolfssl.com/doxygen/group__IO.html#ga0a2985d2088f0b331a4949860fda400d
        // [2]: https://www.wolfssl.com/documentation/manuals/wolfssl/chapter09.html#thread-safety
        let cipher = unsafe { wolfssl_sys::wolfSSL_get_current_cipher(self.engine.ssl.as_ptr()) };
        if cipher.is_null() {
            return None;
        }

        // SAFETY: Documentation for [`wolfSSL_CIPHER_get_name`][0] ([also][1]) is not clear about the memory usage
        // From implementation, return value is the pointer to static buffer. Caller can read it safely
        //
        // [0]: https://www.wolfssl.com/documentation/manuals/wolfssl/group__IO.html#function-wolfssl_cipher_get_name
        // [1]: https://www.wolfssl.com/doxygen/group__IO.html#ga1d77df578e8cebd9d75d2211b927d868
        let c_name = unsafe { wolfssl_sys::wolfSSL_CIPHER_get_name(cipher) };
        if c_name.is_null() {
            return None;
        }

        // SAFETY: If `wolfSSL_CIPHER_get_name` returns non-NULL then it
        // returns a valid C string in a static buffer, which outlives
        // this call.
        let name = unsafe { std::ffi::CStr::from_ptr(c_name) }
            .to_str()
            .ok()?
            .to_string();

        match name.as_str() {
            "None" => None,
            _ => Some(name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        test_helpers::{client_config, server_config, INIT_ENV_LOGGER},
        transport::{Contexts, IoMode, StreamContext, StreamType},
        Protocol,
    };

    use std::rc::Rc;
    use std::sync::Mutex;

    use bytes::{Buf, BytesMut};
    use test_case::test_case;

    // TCP stream semantics: allows partial reads from a continuous buffer
    struct Loopback {
        r: Rc<Mutex<BytesMut>>,
        w: Rc<Mutex<BytesMut>>,
        broken: bool,
        contexts: Contexts,
    }

    impl Loopback {
        fn pair() -> (Self, Self) {
            let left_to_right = Rc::new(Mutex::new(BytesMut::new()));
            let right_to_left = Rc::new(Mutex::new(BytesMut::new()));

            let left = Loopback {
                r: right_to_left.clone(),
                w: left_to_right.clone(),
                broken: false,
                contexts: Contexts::Shared(StreamContext::new(StreamType::Virtual)),
            };

            let right = Loopback {
                r: left_to_right,
                w: right_to_left,
                broken: false,
                contexts: Contexts::Shared(StreamContext::new(StreamType::Virtual)),
            };

            (left, right)
        }
    }

    impl Transport for Loopback {
        fn read(&mut self, buf: &mut [u8]) -> PollResult<usize> {
            let mut r = self.r.lock().unwrap();
            if r.is_empty() {
                return Ok(Poll::Pending(Retry::InputLater));
            }

            let n = std::cmp::min(buf.len(), r.len());
            buf[..n].copy_from_slice(&r[..n]);
            r.advance(n);
            Ok(Poll::Ready(n))
        }

        fn write(&mut self, buf: &[u8]) -> PollResult<usize> {
            if self.broken {
                return Err(std::io::Error::from(std::io::ErrorKind::ConnectionReset).into());
            }
            let mut w = self.w.lock().unwrap();
            w.extend_from_slice(buf);
            Ok(Poll::Ready(buf.len())) // extend_from_slice expands w if needed
        }

        fn contexts(&self) -> &Contexts {
            &self.contexts
        }

        fn io_mode(&self) -> IoMode {
            IoMode::NonBlocking
        }

        fn set_io_mode(&mut self, _mode: IoMode) -> crate::Result<()> {
            Ok(())
        }
    }

    fn make_sessions_with_protocol(
        client_protocol: Protocol,
        server_protocol: Protocol,
    ) -> (Session<Loopback>, Session<Loopback>) {
        let client_config = client_config(client_protocol);
        let server_config = server_config(server_protocol);

        let (client_io, server_io) = Loopback::pair();

        let client = client_config
            .new_engine(EngineOptions::new().with_checked_domain_name("localhost"))
            .unwrap()
            .bind(client_io);
        let server = server_config
            .new_engine(EngineOptions::new())
            .unwrap()
            .bind(server_io);

        (client, server)
    }

    fn make_connected_sessions(
        client_protocol: Protocol,
        server_protocol: Protocol,
    ) -> (Session<Loopback>, Session<Loopback>) {
        let (mut client, mut server) = make_sessions_with_protocol(client_protocol, server_protocol);

        for _ in 0..7 {
            let _ = client.try_handshake().unwrap();
            let _ = server.try_handshake().unwrap();
            // Progress is made because one of the above will have
            // written and the other will have been pending on input...
        }

        assert!(client.is_init_finished());
        assert!(server.is_init_finished());

        (client, server)
    }

    #[test_case(Protocol::TlsClientV1_2, Protocol::TlsServerV1_2 => ProtocolVersion::TlsV1_2)]
    #[test_case(Protocol::TlsClientV1_3, Protocol::TlsServerV1_3 => ProtocolVersion::TlsV1_3)]
    #[test_case(Protocol::TlsClient, Protocol::TlsServer => ProtocolVersion::TlsV1_3)]
    fn try_handshake(client_protocol: Protocol, server_protocol: Protocol) -> ProtocolVersion {
        INIT_ENV_LOGGER.get_or_init(env_logger::init);

        let (mut client, mut server) = make_connected_sessions(client_protocol, server_protocol);
        assert_eq!(client.version(), server.version());
        assert!(client.current_cipher_name().is_some());
        client.version()
    }

    #[test]
    fn role_dispatch() {
        let (client, server) = make_sessions_with_protocol(Protocol::TlsClient, Protocol::TlsServer);
        assert_eq!(client.role(), Role::Client);
        assert_eq!(server.role(), Role::Server);
    }

    #[test]
    fn pending_reports_transport_retry() {
        INIT_ENV_LOGGER.get_or_init(env_logger::init);

        let (mut client, mut server) =
            make_sessions_with_protocol(Protocol::TlsClientV1_3, Protocol::TlsServerV1_3);

        // Nothing has been sent yet, so the server can't make progress
        assert_eq!(
            server.try_handshake().unwrap(),
            Poll::Pending(Retry::InputLater)
        );
        // The client hello goes out, then the client waits for the reply
        assert_eq!(
            client.try_handshake().unwrap(),
            Poll::Pending(Retry::InputLater)
        );
    }

    #[test_case(1)]
    #[test_case(1024)]
    #[test_case(16384)]
    fn try_read_and_write_roundtrip(len: usize) {
        INIT_ENV_LOGGER.get_or_init(env_logger::init);

        let (mut client, mut server) =
            make_connected_sessions(Protocol::TlsClientV1_3, Protocol::TlsServerV1_3);

        let data = vec![0xa5u8; len];
        assert_eq!(client.try_write(&data).unwrap(), Poll::Ready(len));

        let mut received = Vec::new();
        let mut buf = vec![0u8; crate::TLS_MAX_RECORD_SIZE];
        while received.len() < len {
            match server.try_read(&mut buf).unwrap() {
                Poll::Ready(n) => received.extend_from_slice(&buf[..n]),
                Poll::Pending(retry) => panic!("Unexpected retry {retry:?}"),
            }
        }
        assert_eq!(received, data);
    }

    #[test]
    fn empty_buffers_skip_the_engine() {
        INIT_ENV_LOGGER.get_or_init(env_logger::init);

        let (mut client, mut server) =
            make_connected_sessions(Protocol::TlsClientV1_3, Protocol::TlsServerV1_3);

        // Broken transport: any engine I/O would fail
        client.transport_mut().broken = true;
        assert_eq!(client.try_write(&[]).unwrap(), Poll::Ready(0));
        client.transport_mut().broken = false;

        assert_eq!(client.try_write(b"ping").unwrap(), Poll::Ready(4));
        assert_eq!(server.try_read(&mut []).unwrap(), Poll::Ready(0));

        // The pending record is still there
        let mut buf = [0u8; 16];
        assert_eq!(server.try_read(&mut buf).unwrap(), Poll::Ready(4));
        assert_eq!(&buf[..4], b"ping");
    }

    #[test]
    fn transport_failure_is_not_a_retry() {
        INIT_ENV_LOGGER.get_or_init(env_logger::init);

        let (mut client, _server) =
            make_connected_sessions(Protocol::TlsClientV1_3, Protocol::TlsServerV1_3);

        client.transport_mut().broken = true;
        match client.try_write(b"ping") {
            Err(Error::Transport(e)) => assert_eq!(e.kind(), std::io::ErrorKind::ConnectionReset),
            other => panic!("Unexpected {other:?}"),
        }
    }

    #[test]
    fn closed_io_fails_handshake() {
        INIT_ENV_LOGGER.get_or_init(env_logger::init);

        let (mut client, _server) =
            make_sessions_with_protocol(Protocol::TlsClientV1_3, Protocol::TlsServerV1_3);

        client.close_io();
        assert!(client.is_io_closed());
        assert!(matches!(client.try_handshake(), Err(Error::Handshake(_))));
    }

    #[test]
    fn wrong_domain_name_fails_handshake() {
        INIT_ENV_LOGGER.get_or_init(env_logger::init);

        let client_config = client_config(Protocol::TlsClientV1_3);
        let server_config = server_config(Protocol::TlsServerV1_3);

        let (client_io, server_io) = Loopback::pair();
        let mut client = client_config
            .new_engine(EngineOptions::new().with_checked_domain_name("example.com"))
            .unwrap()
            .bind(client_io);
        let mut server = server_config
            .new_engine(EngineOptions::new())
            .unwrap()
            .bind(server_io);

        let mut failure = None;
        for _ in 0..7 {
            if let Err(e) = client.try_handshake() {
                failure = Some(e);
                break;
            }
            let _ = server.try_handshake();
        }

        match failure {
            Some(Error::Handshake(kind)) => assert_eq!(kind, crate::ErrorKind::DomainNameMismatch),
            other => panic!("Unexpected {other:?}"),
        }
    }
}
