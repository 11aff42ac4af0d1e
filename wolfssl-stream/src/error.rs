use std::ffi::c_int;

use thiserror::Error;
use wolfssl_sys::wolfSSL_ErrorCodes_DOMAIN_NAME_MISMATCH as WOLFSSL_ERROR_DOMAIN_NAME_MISMATCH;

use crate::action::Direction;

/// Why an operation could not make progress right now.
///
/// A retry is not an error: repeating the exact same call once the
/// condition holds is always valid.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Retry {
    /// More input is needed and may already be available; repeat
    /// immediately (e.g. the read was interrupted).
    InputNow,
    /// More input is needed; wait until the transport is readable.
    InputLater,
    /// Pending output must be flushed and the transport can take it
    /// now; repeat immediately.
    OutputNow,
    /// Pending output must be flushed; wait until the transport is
    /// writable.
    OutputLater,
}

impl Retry {
    /// The transport direction this retry is waiting on.
    pub fn direction(&self) -> Direction {
        match self {
            Retry::InputNow | Retry::InputLater => Direction::Input,
            Retry::OutputNow | Retry::OutputLater => Direction::Output,
        }
    }

    /// `true` for the `…Later` variants, which require waiting for
    /// readiness rather than repeating immediately.
    pub fn is_later(&self) -> bool {
        matches!(self, Retry::InputLater | Retry::OutputLater)
    }

    /// The "later" sentinel of the given direction, used when the
    /// engine reports a want without the transport having said why.
    pub(crate) fn later(direction: Direction) -> Self {
        match direction {
            Direction::Input => Retry::InputLater,
            Direction::Output => Retry::OutputLater,
        }
    }
}

/// The `Result::Ok` for a non-blocking operation.
#[derive(Debug, PartialEq, Eq)]
pub enum Poll<T> {
    /// An output has been generated.
    Ready(T),
    /// Underlying IO operations are still ongoing. No output has been
    /// generated yet.
    Pending(Retry),
}

impl<T> Poll<T> {
    /// Maps the `Ready` value, leaving `Pending` untouched.
    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Poll<U> {
        match self {
            Poll::Ready(t) => Poll::Ready(f(t)),
            Poll::Pending(retry) => Poll::Pending(retry),
        }
    }

    /// Returns `true` if this is `Poll::Pending`.
    pub fn is_pending(&self) -> bool {
        matches!(self, Poll::Pending(_))
    }
}

/// The failure result of an operation.
#[derive(Error, Debug)]
pub enum Error {
    /// The engine rejected a configuration step. No connection is
    /// produced.
    #[error("Configuration: {0}")]
    Config(ErrorKind),
    /// The underlying transport failed for a reason other than
    /// would-block.
    #[error("Transport: {0}")]
    Transport(#[from] std::io::Error),
    /// The engine failed while the handshake was in flight; the
    /// connection was never established.
    #[error("Handshake: {0}")]
    Handshake(ErrorKind),
    /// The engine failed after the handshake completed.
    #[error("Fatal: {0}")]
    Fatal(ErrorKind),
    /// The connection was already closed.
    #[error("Connection is closed")]
    Closed,
    /// Application data was requested in non-blocking mode before the
    /// handshake completed.
    #[error("Handshake has not completed")]
    HandshakeIncomplete,
    /// A result was handed to the scheduling translator that carries
    /// no scheduling meaning.
    #[error("Result cannot be scheduled: {0}")]
    Unschedulable(&'static str),
}

impl Error {
    /// Construct a configuration error
    pub(crate) fn config(code: c_int) -> Self {
        Self::Config(ErrorKind::from(code))
    }

    /// Construct a handshake error
    pub(crate) fn handshake(code: c_int) -> Self {
        Self::Handshake(ErrorKind::from(code))
    }

    /// Construct a fatal error
    pub(crate) fn fatal(code: c_int) -> Self {
        Self::Fatal(ErrorKind::from(code))
    }

    /// Get error kind
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Config(e) | Error::Handshake(e) | Error::Fatal(e) => e.clone(),
            Error::Transport(e) => ErrorKind::Io {
                kind: e.kind(),
                what: e.to_string(),
            },
            other => ErrorKind::Protocol {
                what: other.to_string(),
            },
        }
    }

    /// Returns `true` when the failure happened during (or prevented)
    /// the handshake rather than on an established session.
    pub fn is_handshake(&self) -> bool {
        matches!(self, Error::Handshake(_))
    }
}

/// Abstraction over WolfSSL errors
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ErrorKind {
    /// Domain name mismatch error
    #[error("Domain name mismatch")]
    DomainNameMismatch,
    /// All other wolfssl fatal errors
    #[error("code: {code}, what: {what}")]
    Other {
        /// Textual representation of error code
        what: String,
        /// Error code
        code: c_int,
    },
    /// A transport failure observed by the engine's I/O callbacks
    #[error("io: {kind:?}, what: {what}")]
    Io {
        /// Kind of the underlying error
        kind: std::io::ErrorKind,
        /// Textual representation of the underlying error
        what: String,
    },
    /// A violated usage precondition
    #[error("{what}")]
    Protocol {
        /// Description of the violation
        what: String,
    },
}

impl std::convert::From<c_int> for ErrorKind {
    // Not all errors are fatal. Since the errors are fundamentally C-style
    // enums, the most we can do is to just check that only fatal errors get
    // constructed.
    fn from(code: c_int) -> Self {
        let this = match code {
            WOLFSSL_ERROR_DOMAIN_NAME_MISMATCH => Self::DomainNameMismatch,
            _other => Self::Other {
                what: wolf_error_string(code as std::ffi::c_ulong),
                code,
            },
        };

        debug_assert!(
            !matches!(
                this,
                Self::Other {
                    code: wolfssl_sys::WOLFSSL_ERROR_WANT_READ_c_int
                        | wolfssl_sys::WOLFSSL_ERROR_WANT_WRITE_c_int
                        | wolfssl_sys::WOLFSSL_SUCCESS_c_int,
                    ..
                }
            ),
            "Attempting to construct a `ErrorKind` from a non-error code {code}",
            code = code,
        );

        this
    }
}

/// Describes an outcome that is asynchronous. Engine and transport
/// operations can report a [`Retry`], which is not fatal, and
/// indicates that the caller should retry the same call again once
/// the condition it names holds.
pub type PollResult<T> = std::result::Result<Poll<T>, Error>;

/// Describes an outcome that is synchronous.
pub type Result<T> = std::result::Result<T, Error>;

/// Converts a WolfSSL error code to a string
// Note that this accepts an `unsigned long` instead of an `int`.
//
// Which is odd, because we're supposed to pass this the result of
// `wolfSSL_get_error`, which returns a `c_int`
pub(crate) fn wolf_error_string(raw_err: std::ffi::c_ulong) -> String {
    let mut buffer = vec![0u8; wolfssl_sys::WOLFSSL_MAX_ERROR_SZ as usize];

    // SAFETY:
    // [`wolfSSL_ERR_error_string()`][0] ([also][1]) is documented to store at most `WOLFSSL_MAX_ERROR_SZ` bytes,
    // so `buffer` is appropriately sized.
    // `wolfSSL_ERR_error_string()` only falls back to its static (non-reentrant) buffer when no
    // buffer is provided as an argument, which never happens here.
    //
    // [0]: https://www.wolfssl.com/doxygen/group__Debug.html#ga91d8474ba8abcf3fe594928056834993
    // [1]: https://www.wolfssl.com/documentation/manuals/wolfssl/group__Debug.html#function-wolfssl_err_error_string
    unsafe {
        wolfssl_sys::wolfSSL_ERR_error_string(
            raw_err,
            buffer.as_mut_slice().as_mut_ptr() as *mut std::os::raw::c_char,
        );
    }
    String::from_utf8_lossy(&buffer)
        .trim_end_matches(char::from(0))
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn wolf_error_string_check_string() {
        let s = wolf_error_string(wolfssl_sys::WOLFSSL_ERROR_WANT_READ as std::ffi::c_ulong);
        assert_eq!(s, "non-blocking socket wants data to be read");
    }

    #[test]
    fn domain_name_mismatch_has_its_own_kind() {
        assert_eq!(
            ErrorKind::from(WOLFSSL_ERROR_DOMAIN_NAME_MISMATCH),
            ErrorKind::DomainNameMismatch
        );
    }

    #[test_case(Retry::InputNow => (Direction::Input, false))]
    #[test_case(Retry::InputLater => (Direction::Input, true))]
    #[test_case(Retry::OutputNow => (Direction::Output, false))]
    #[test_case(Retry::OutputLater => (Direction::Output, true))]
    fn retry_direction(retry: Retry) -> (Direction, bool) {
        (retry.direction(), retry.is_later())
    }

    #[test]
    fn transport_error_kind_keeps_io_kind() {
        let err = Error::from(std::io::Error::from(std::io::ErrorKind::BrokenPipe));
        assert!(matches!(
            err.kind(),
            ErrorKind::Io {
                kind: std::io::ErrorKind::BrokenPipe,
                ..
            }
        ));
        assert!(!err.is_handshake());
    }
}
