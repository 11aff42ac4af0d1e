//! The `wolfssl-stream` crate layers TLS over an arbitrary byte
//! transport, using WolfSSL (via the `wolfssl-sys` crate) as the
//! record layer.
//!
//! A [`Connection`] wraps any [`Transport`] and is itself a
//! [`Transport`], so it can be used anywhere a plain stream is
//! accepted. The handshake can be driven to completion synchronously
//! ([`Connection::init`]) or one step at a time by an external
//! scheduler ([`Connection::init_async`] and [`Handshake::resume`]).
//!
//! [`init`] must be called once per process before any [`Config`] is
//! built.

mod action;
mod callback;
pub mod client;
mod config;
mod connection;
mod engine;
mod error;
mod handshake;
pub mod pipe;
#[cfg(feature = "runtime-tokio")]
pub mod runtime;
pub mod server;
mod transport;

#[cfg(test)]
mod test_helpers;

pub use action::*;
pub use config::*;
pub use connection::*;
pub use engine::*;
pub use error::{Error, ErrorKind, Poll, PollResult, Result, Retry};
pub use handshake::*;
pub use transport::*;

use std::ptr::NonNull;

/// Record size is defined as `2^14 + 1`.
///
/// > ...the full encoded TLSInnerPlaintext MUST NOT exceed 2^14 + 1
/// > octets
/// - [source][0]
///
/// [0]: https://www.rfc-editor.org/rfc/rfc8446#section-5.4
pub const TLS_MAX_RECORD_SIZE: usize = 2usize.pow(14) + 1;

static INITIALIZED: std::sync::OnceLock<std::result::Result<(), ErrorKind>> =
    std::sync::OnceLock::new();

/// Wraps [`wolfSSL_Init`][0]
///
/// Performs the one-time, process-wide initialization of the
/// engine. It must be called before any [`ConfigBuilder`] is
/// created; later calls return the outcome of the first one.
///
/// [0]: https://www.wolfssl.com/documentation/manuals/wolfssl/group__TLS.html#function-wolfssl_init
pub fn init() -> Result<()> {
    INITIALIZED
        .get_or_init(|| {
            // SAFETY: [`wolfSSL_Init`][0] ([also][1]) must be called once
            // per application, this is enforced using the `INITIALIZED:
            // OnceLock`.
            //
            // [0]: https://www.wolfssl.com/documentation/manuals/wolfssl/group__TLS.html#function-wolfssl_init
            // [1]: https://www.wolfssl.com/doxygen/group__TLS.html#ga789ef74e34df659a62f06da2ea709737
            match unsafe { wolfssl_sys::wolfSSL_Init() } {
                wolfssl_sys::WOLFSSL_SUCCESS_c_int => {
                    log::debug!("wolfSSL initialized");
                    Ok(())
                }
                e => Err(ErrorKind::from(e)),
            }
        })
        .clone()
        .map_err(Error::Config)
}

/// Returns whether [`init`] completed successfully.
pub fn is_initialized() -> bool {
    matches!(INITIALIZED.get(), Some(Ok(())))
}

/// Wraps [`wolfSSL_Debugging_ON`][0] and [`wolfSSL_Debugging_OFF`][1]
///
/// [0]: https://www.wolfssl.com/documentation/manuals/wolfssl/group__Debug.html#function-wolfssl_debugging_on
/// [1]: https://www.wolfssl.com/documentation/manuals/wolfssl/group__Debug.html#function-wolfssl_debugging_off
#[cfg(feature = "debug")]
pub fn enable_debugging(on: bool) -> Result<()> {
    init()?;

    if on {
        // SAFETY: [`wolfSSL_Debugging_ON`][0] ([also][1]) requires `DEBUG_WOLFSSL` to be compiled in to succeed
        // This function will be compiled only on enabling feature `debug`
        //
        // [0]: https://www.wolfssl.com/documentation/manuals/wolfssl/group__Debug.html#function-wolfssl_debugging_on
        // [1]: https://www.wolfssl.com/doxygen/group__Debug.html#ga192a2501d23697c2b56ce26b1af0eb2c
        match unsafe { wolfssl_sys::wolfSSL_Debugging_ON() } {
            0 => Ok(()),
            e => Err(Error::config(e)),
        }
    } else {
        // SAFETY: [`wolfSSL_Debugging_OFF`][0] ([also][1]) has no safety concerns as per documentation
        //
        // [0]: https://www.wolfssl.com/documentation/manuals/wolfssl/group__Debug.html#function-wolfssl_debugging_off
        // [1]: https://www.wolfssl.com/doxygen/group__Debug.html#gafa8dab742182b891d80300fb195399ce
        unsafe { wolfssl_sys::wolfSSL_Debugging_OFF() };
        Ok(())
    }
}

/// Which end of the TLS session an engine plays.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Role {
    /// Accepts handshakes (`wolfSSL_accept`)
    Server,
    /// Initiates handshakes (`wolfSSL_connect`)
    Client,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Server => f.write_str("server"),
            Role::Client => f.write_str("client"),
        }
    }
}

/// Corresponds to the various `wolf*_{client,server}_method()` APIs
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Protocol {
    /// `wolfTLS_client_method`
    TlsClient,
    /// `wolfTLSv1_2_client_method`
    TlsClientV1_2,
    /// `wolfTLSv1_3_client_method`
    TlsClientV1_3,
    /// `wolfTLS_server_method`
    TlsServer,
    /// `wolfTLSv1_2_server_method`
    TlsServerV1_2,
    /// `wolfTLSv1_3_server_method`
    TlsServerV1_3,
}

impl Protocol {
    /// Converts a [`Self`] into a [`wolfssl_sys::WOLFSSL_METHOD`]
    /// compatible with [`wolfssl_sys::wolfSSL_CTX_new`]
    fn into_method_ptr(self) -> Option<NonNull<wolfssl_sys::WOLFSSL_METHOD>> {
        let ptr = match self {
            // SAFETY: Per documentation [`wolfTLS_client_method][0] and its sibling methods allocate memory for `WOLFSSL_METHOD` and initialize with proper values.
            // Based on implementation[2], the api [`wolfSSL_CTX_new`][1] will consume this memory and thus take care of freeing it
            //
            // [0]: https://www.wolfssl.com/documentation/manuals/wolfssl/group__Setup.html#function-wolfsslv3_client_method
            // [1]: https://www.wolfssl.com/documentation/manuals/wolfssl/group__Setup.html#function-wolfssl_ctx_new
            // [2]: https://github.com/wolfSSL/wolfssl/blob/v5.6.3-stable/src/internal.c#L2156
            Self::TlsClient => unsafe { wolfssl_sys::wolfTLS_client_method() },
            // SAFETY: as above
            Self::TlsClientV1_2 => unsafe { wolfssl_sys::wolfTLSv1_2_client_method() },
            // SAFETY: as above
            Self::TlsClientV1_3 => unsafe { wolfssl_sys::wolfTLSv1_3_client_method() },
            // SAFETY: as above
            Self::TlsServer => unsafe { wolfssl_sys::wolfTLS_server_method() },
            // SAFETY: as above
            Self::TlsServerV1_2 => unsafe { wolfssl_sys::wolfTLSv1_2_server_method() },
            // SAFETY: as above
            Self::TlsServerV1_3 => unsafe { wolfssl_sys::wolfTLSv1_3_server_method() },
        };

        NonNull::new(ptr)
    }

    /// The role every engine built from this protocol plays.
    pub fn role(&self) -> Role {
        match self {
            Self::TlsClient | Self::TlsClientV1_2 | Self::TlsClientV1_3 => Role::Client,
            Self::TlsServer | Self::TlsServerV1_2 | Self::TlsServerV1_3 => Role::Server,
        }
    }
}

/// The TLS version negotiated for a session.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ProtocolVersion {
    /// TLS 1.0
    TlsV1_0,
    /// TLS 1.1
    TlsV1_1,
    /// TLS 1.2
    TlsV1_2,
    /// TLS 1.3
    TlsV1_3,
    /// Anything else, including "not negotiated yet"
    Unknown,
}

impl ProtocolVersion {
    /// Stable textual tag, as stored in stream context properties.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TlsV1_0 => "TLSv1.0",
            Self::TlsV1_1 => "TLSv1.1",
            Self::TlsV1_2 => "TLSv1.2",
            Self::TlsV1_3 => "TLSv1.3",
            Self::Unknown => "unknown",
        }
    }
}

/// Defines a CA certificate
pub enum RootCertificate<'a> {
    /// In-memory PEM buffer
    PemBuffer(&'a [u8]),
    /// In-memory ASN1 buffer
    Asn1Buffer(&'a [u8]),
    /// Path to a PEM file, or a directory of PEM files
    PemFileOrDirectory(&'a std::path::Path),
}

/// Defines either a public or private key
pub enum Secret<'a> {
    /// In-memory ASN1 buffer
    Asn1Buffer(&'a [u8]),
    /// Path to ASN1 file
    Asn1File(&'a std::path::Path),
    /// In-memory PEM buffer
    PemBuffer(&'a [u8]),
    /// Path to PEM file
    PemFile(&'a std::path::Path),
}

/// SSL Verification method
/// Ref: `https://www.wolfssl.com/doxygen/group__Setup.html#gaf9198658e31dd291088be18262ef2354`
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum SslVerifyMode {
    /// No verification done
    SslVerifyNone,
    /// Verify peers certificate
    #[default]
    SslVerifyPeer,
    /// Verify client certificate (applicable only for server)
    SslVerifyFailIfNoPeerCert,
    /// Verify client certificate except PSK connection (applicable only for server)
    SslVerifyFailExceptPsk,
}

impl From<SslVerifyMode> for std::ffi::c_int {
    fn from(value: SslVerifyMode) -> Self {
        match value {
            SslVerifyMode::SslVerifyNone => wolfssl_sys::WOLFSSL_VERIFY_NONE_c_int,
            SslVerifyMode::SslVerifyPeer => wolfssl_sys::WOLFSSL_VERIFY_PEER_c_int,
            SslVerifyMode::SslVerifyFailIfNoPeerCert => {
                wolfssl_sys::WOLFSSL_VERIFY_FAIL_IF_NO_PEER_CERT_c_int
            }
            SslVerifyMode::SslVerifyFailExceptPsk => {
                wolfssl_sys::WOLFSSL_VERIFY_FAIL_EXCEPT_PSK_c_int
            }
        }
    }
}
