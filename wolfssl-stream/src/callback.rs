use std::ffi::{c_char, c_int, c_void};

use crate::error::{Error, Poll, Retry};
use crate::transport::Transport;

/// Convert a [`std::io::ErrorKind`] into WOLFSSL_CBIO error as descibed in [`EmbedReceive`][0].
///
/// `would_block` is returned if the variant is
/// [`std::io::ErrorKind::WouldBlock`], since wolfssl has different
/// error names (although under the hood the value is the same). Note
/// that transports are expected to report `Poll::Pending` in this
/// case so we shouldn't be here in the first place, but be tolerant.
///
/// [0]: https://www.wolfssl.com/documentation/manuals/wolfssl/wolfio_8h.html#function-embedreceive
fn io_errorkind_into_wolfssl_cbio_error(kind: std::io::ErrorKind, would_block: c_int) -> c_int {
    use std::io::ErrorKind::*;
    match kind {
        // Note that WouldBlock also covers EAGAIN errors under the hood.
        WouldBlock => would_block,
        TimedOut => wolfssl_sys::IOerrors_WOLFSSL_CBIO_ERR_TIMEOUT,
        ConnectionReset => wolfssl_sys::IOerrors_WOLFSSL_CBIO_ERR_CONN_RST,
        Interrupted => wolfssl_sys::IOerrors_WOLFSSL_CBIO_ERR_ISR,
        ConnectionAborted => wolfssl_sys::IOerrors_WOLFSSL_CBIO_ERR_CONN_CLOSE,
        _ => wolfssl_sys::IOerrors_WOLFSSL_CBIO_ERR_GENERAL,
    }
}

/// The state the engine's I/O callbacks operate on: the transport the
/// session is bound to, plus what the last engine call observed on
/// it.
///
/// WolfSSL only understands "want read" and "want write". The bridge
/// keeps the transport's own [`Retry`] and any hard transport error so
/// the session can report them precisely once the engine returns.
pub(crate) struct Bridge<T> {
    transport: T,
    last_retry: Option<Retry>,
    last_error: Option<Error>,
    closed: bool,
}

impl<T: Transport> Bridge<T> {
    pub(crate) fn new(transport: T) -> Self {
        Self {
            transport,
            last_retry: None,
            last_error: None,
            closed: false,
        }
    }

    pub(crate) fn transport(&self) -> &T {
        &self.transport
    }

    pub(crate) fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Forget what the previous engine call observed. Called before
    /// every engine call.
    pub(crate) fn reset(&mut self) {
        self.last_retry = None;
        self.last_error = None;
    }

    pub(crate) fn take_retry(&mut self) -> Option<Retry> {
        self.last_retry.take()
    }

    pub(crate) fn take_error(&mut self) -> Option<Error> {
        self.last_error.take()
    }

    /// After this, every callback fails with "connection closed"
    /// without touching the transport.
    pub(crate) fn close(&mut self) {
        self.closed = true;
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }

    fn fail(&mut self, err: Error, would_block: c_int) -> c_int {
        let code = match &err {
            Error::Transport(e) => io_errorkind_into_wolfssl_cbio_error(e.kind(), would_block),
            Error::Closed => wolfssl_sys::IOerrors_WOLFSSL_CBIO_ERR_CONN_CLOSE,
            _ => wolfssl_sys::IOerrors_WOLFSSL_CBIO_ERR_GENERAL,
        };
        log::debug!("Transport failed: {err}");
        self.last_error = Some(err);
        code
    }

    fn recv(&mut self, buf: &mut [u8]) -> c_int {
        if self.closed {
            return wolfssl_sys::IOerrors_WOLFSSL_CBIO_ERR_CONN_CLOSE;
        }

        match self.transport.read(buf) {
            // End of stream
            Ok(Poll::Ready(0)) => wolfssl_sys::IOerrors_WOLFSSL_CBIO_ERR_CONN_CLOSE,
            Ok(Poll::Ready(nr)) => {
                debug_assert!(nr <= buf.len());
                nr as c_int
            }
            Ok(Poll::Pending(retry)) => {
                self.last_retry = Some(retry);
                wolfssl_sys::IOerrors_WOLFSSL_CBIO_ERR_WANT_READ
            }
            Err(err) => self.fail(err, wolfssl_sys::IOerrors_WOLFSSL_CBIO_ERR_WANT_READ),
        }
    }

    fn send(&mut self, buf: &[u8]) -> c_int {
        if self.closed {
            return wolfssl_sys::IOerrors_WOLFSSL_CBIO_ERR_CONN_CLOSE;
        }

        match self.transport.write(buf) {
            Ok(Poll::Ready(0)) => self.fail(
                std::io::Error::from(std::io::ErrorKind::WriteZero).into(),
                wolfssl_sys::IOerrors_WOLFSSL_CBIO_ERR_WANT_WRITE,
            ),
            Ok(Poll::Ready(nw)) => {
                debug_assert!(nw <= buf.len());
                nw as c_int
            }
            Ok(Poll::Pending(retry)) => {
                self.last_retry = Some(retry);
                wolfssl_sys::IOerrors_WOLFSSL_CBIO_ERR_WANT_WRITE
            }
            Err(err) => self.fail(err, wolfssl_sys::IOerrors_WOLFSSL_CBIO_ERR_WANT_WRITE),
        }
    }
}

/// Registered with `wolfSSL_SSLSetIORecv`, `ctx` is the session's
/// boxed [`Bridge<T>`].
///
/// # Safety
///
/// `ctx` must point to a live `Bridge<T>` which nothing else accesses
/// for the duration of the call, and `buf` must be valid for writes of
/// `sz` bytes.
pub(crate) unsafe extern "C" fn io_recv_shim<T: Transport>(
    _ssl: *mut wolfssl_sys::WOLFSSL,
    buf: *mut c_char,
    sz: c_int,
    ctx: *mut c_void,
) -> c_int {
    debug_assert!(!_ssl.is_null());
    debug_assert!(!buf.is_null());
    debug_assert!(!ctx.is_null());

    // SAFETY:
    // We know that this pointer is to the contents of a `Box`
    // owned by the `Session`. See `Session::register_io_context` for
    // an argument as to why IO will be stopped (by releasing
    // `WOLFSSL`) before that box is dropped.
    //
    // The `Session` method which invoked the engine holds an exclusive
    // (`&mut`) reference further up the callchain. Therefore we can
    // recover this exclusive reference to the bridge.
    let bridge = unsafe { &mut *(ctx as *mut Bridge<T>) };

    // SAFETY: Per the callback rules for `wolfSSL_SSLSetIORecv`
    // (see [`wolfSSL_CTX_SetIORecv`][0] for related docs) `buf`
    // is valid for `sz` bytes.
    //
    // [0]: https://www.wolfssl.com/documentation/manuals/wolfssl/wolfio_8h.html#function-wolfssl_ctx_setiorecv
    let buf = unsafe { std::slice::from_raw_parts_mut(buf as *mut u8, sz as usize) };

    bridge.recv(buf)
}

/// Registered with `wolfSSL_SSLSetIOSend`, `ctx` is the session's
/// boxed [`Bridge<T>`].
///
/// # Safety
///
/// `ctx` must point to a live `Bridge<T>` which nothing else accesses
/// for the duration of the call, and `buf` must be valid for reads of
/// `sz` bytes.
pub(crate) unsafe extern "C" fn io_send_shim<T: Transport>(
    _ssl: *mut wolfssl_sys::WOLFSSL,
    buf: *mut c_char,
    sz: c_int,
    ctx: *mut c_void,
) -> c_int {
    debug_assert!(!_ssl.is_null());
    debug_assert!(!buf.is_null());
    debug_assert!(!ctx.is_null());

    // SAFETY: As for `io_recv_shim`, this is the `Session`'s boxed
    // bridge and the caller further up the callchain holds it
    // exclusively.
    let bridge = unsafe { &mut *(ctx as *mut Bridge<T>) };

    // SAFETY: Per the callback rules for `wolfSSL_SSLSetIOSend` (see [`wolfSSL_CTX_SetIORecv`][0] for
    // related docs) `buf` is valid for `sz` bytes.
    //
    // [0]: https://www.wolfssl.com/documentation/manuals/wolfssl/wolfio_8h.html#function-wolfssl_ctx_setiorecv
    let buf = unsafe { std::slice::from_raw_parts(buf as *const u8, sz as usize) };

    bridge.send(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{PollResult, Result};
    use crate::transport::{Contexts, IoMode, StreamContext, StreamType};

    use std::collections::VecDeque;

    use test_case::test_case;

    // Replays scripted outcomes, one per call
    struct Scripted {
        reads: VecDeque<PollResult<usize>>,
        writes: VecDeque<PollResult<usize>>,
        contexts: Contexts,
    }

    impl Scripted {
        fn new(reads: Vec<PollResult<usize>>, writes: Vec<PollResult<usize>>) -> Self {
            Self {
                reads: reads.into(),
                writes: writes.into(),
                contexts: Contexts::Shared(StreamContext::new(StreamType::Virtual)),
            }
        }
    }

    impl Transport for Scripted {
        fn read(&mut self, _buf: &mut [u8]) -> PollResult<usize> {
            self.reads.pop_front().expect("unexpected read")
        }

        fn write(&mut self, _buf: &[u8]) -> PollResult<usize> {
            self.writes.pop_front().expect("unexpected write")
        }

        fn contexts(&self) -> &Contexts {
            &self.contexts
        }

        fn io_mode(&self) -> IoMode {
            IoMode::NonBlocking
        }

        fn set_io_mode(&mut self, _mode: IoMode) -> Result<()> {
            Ok(())
        }
    }

    fn io_err(kind: std::io::ErrorKind) -> PollResult<usize> {
        Err(std::io::Error::from(kind).into())
    }

    #[test_case(std::io::ErrorKind::WouldBlock => wolfssl_sys::IOerrors_WOLFSSL_CBIO_ERR_WANT_READ)]
    #[test_case(std::io::ErrorKind::TimedOut => wolfssl_sys::IOerrors_WOLFSSL_CBIO_ERR_TIMEOUT)]
    #[test_case(std::io::ErrorKind::ConnectionReset => wolfssl_sys::IOerrors_WOLFSSL_CBIO_ERR_CONN_RST)]
    #[test_case(std::io::ErrorKind::Interrupted => wolfssl_sys::IOerrors_WOLFSSL_CBIO_ERR_ISR)]
    #[test_case(std::io::ErrorKind::ConnectionAborted => wolfssl_sys::IOerrors_WOLFSSL_CBIO_ERR_CONN_CLOSE)]
    #[test_case(std::io::ErrorKind::BrokenPipe => wolfssl_sys::IOerrors_WOLFSSL_CBIO_ERR_GENERAL)]
    fn errorkind_mapping(kind: std::io::ErrorKind) -> c_int {
        io_errorkind_into_wolfssl_cbio_error(kind, wolfssl_sys::IOerrors_WOLFSSL_CBIO_ERR_WANT_READ)
    }

    #[test_case(Retry::InputNow)]
    #[test_case(Retry::InputLater)]
    #[test_case(Retry::OutputNow)]
    #[test_case(Retry::OutputLater)]
    fn recv_records_exact_retry(retry: Retry) {
        let mut bridge = Bridge::new(Scripted::new(vec![Ok(Poll::Pending(retry))], vec![]));
        let mut buf = [0u8; 4];
        assert_eq!(
            bridge.recv(&mut buf),
            wolfssl_sys::IOerrors_WOLFSSL_CBIO_ERR_WANT_READ
        );
        assert_eq!(bridge.take_retry(), Some(retry));
        assert_eq!(bridge.take_retry(), None);
    }

    #[test]
    fn send_records_exact_retry() {
        let mut bridge = Bridge::new(Scripted::new(
            vec![],
            vec![Ok(Poll::Pending(Retry::InputLater))],
        ));
        assert_eq!(
            bridge.send(b"data"),
            wolfssl_sys::IOerrors_WOLFSSL_CBIO_ERR_WANT_WRITE
        );
        assert_eq!(bridge.take_retry(), Some(Retry::InputLater));
    }

    #[test]
    fn byte_counts_pass_through() {
        let mut bridge = Bridge::new(Scripted::new(
            vec![Ok(Poll::Ready(3))],
            vec![Ok(Poll::Ready(2))],
        ));
        let mut buf = [0u8; 4];
        assert_eq!(bridge.recv(&mut buf), 3);
        assert_eq!(bridge.send(b"data"), 2);
        assert!(bridge.take_retry().is_none());
        assert!(bridge.take_error().is_none());
    }

    #[test]
    fn end_of_stream_is_connection_close() {
        let mut bridge = Bridge::new(Scripted::new(vec![Ok(Poll::Ready(0))], vec![]));
        let mut buf = [0u8; 4];
        assert_eq!(
            bridge.recv(&mut buf),
            wolfssl_sys::IOerrors_WOLFSSL_CBIO_ERR_CONN_CLOSE
        );
    }

    #[test]
    fn hard_failures_are_kept() {
        let mut bridge = Bridge::new(Scripted::new(
            vec![],
            vec![io_err(std::io::ErrorKind::BrokenPipe)],
        ));
        assert_eq!(
            bridge.send(b"data"),
            wolfssl_sys::IOerrors_WOLFSSL_CBIO_ERR_GENERAL
        );
        assert!(matches!(
            bridge.take_error(),
            Some(Error::Transport(e)) if e.kind() == std::io::ErrorKind::BrokenPipe
        ));
    }

    #[test]
    fn closed_bridge_never_touches_transport() {
        // `Scripted` panics on any call it was not scripted for
        let mut bridge = Bridge::new(Scripted::new(vec![], vec![]));
        bridge.close();
        assert!(bridge.is_closed());

        let mut buf = [0u8; 4];
        assert_eq!(
            bridge.recv(&mut buf),
            wolfssl_sys::IOerrors_WOLFSSL_CBIO_ERR_CONN_CLOSE
        );
        assert_eq!(
            bridge.send(b"data"),
            wolfssl_sys::IOerrors_WOLFSSL_CBIO_ERR_CONN_CLOSE
        );
    }

    #[test]
    fn reset_forgets_previous_call() {
        let mut bridge = Bridge::new(Scripted::new(
            vec![Ok(Poll::Pending(Retry::InputLater))],
            vec![io_err(std::io::ErrorKind::ConnectionReset)],
        ));
        let mut buf = [0u8; 4];
        bridge.recv(&mut buf);
        bridge.send(b"data");
        bridge.reset();
        assert!(bridge.take_retry().is_none());
        assert!(bridge.take_error().is_none());
    }
}
