use crate::{
    engine::{Engine, EngineOptions, NewEngineError},
    error::{Error, ErrorKind, Result},
    Protocol, Role, RootCertificate, Secret, SslVerifyMode,
};
use std::{
    ffi::{c_char, c_int, c_long, c_uchar, CString},
    ptr::NonNull,
    sync::Arc,
};
use thiserror::Error;

/// Produces a [`Config`] once built.
pub struct ConfigBuilder {
    ctx: ContextPointer,
    protocol: Protocol,
}

/// Error creating a [`ConfigBuilder`] object.
#[derive(Error, Debug)]
pub enum NewConfigError {
    /// [`crate::init`] has not been called (or failed)
    #[error("WolfSSL has not been initialized")]
    NotInitialized,

    /// Failed to turn `Protocol` into a `wolfssl_sys::WOLFSSL_METHOD`
    #[error("Failed to obtain WOLFSSL_METHOD")]
    MethodFailed,

    /// `wolfSSL_CTX_new` failed
    #[error("Failed to allocate WolfSSL Context")]
    CreateFailed,
}

impl From<NewConfigError> for Error {
    fn from(e: NewConfigError) -> Self {
        Error::Config(ErrorKind::Protocol {
            what: e.to_string(),
        })
    }
}

/// `wolfSSL_CTX_use_certificate_buffer` and friends.
type BufferLoader =
    unsafe extern "C" fn(*mut wolfssl_sys::WOLFSSL_CTX, *const c_uchar, c_long, c_int) -> c_int;

/// `wolfSSL_CTX_use_certificate_file` and friends.
type FileLoader =
    unsafe extern "C" fn(*mut wolfssl_sys::WOLFSSL_CTX, *const c_char, c_int) -> c_int;

fn check(result: c_int) -> Result<()> {
    if result == wolfssl_sys::WOLFSSL_SUCCESS_c_int {
        Ok(())
    } else {
        Err(Error::config(result))
    }
}

fn path_to_cstring(path: &std::path::Path) -> Result<CString> {
    let path = path
        .to_str()
        .ok_or_else(|| Error::config(wolfssl_sys::wolfCrypt_ErrorCodes_BAD_PATH_ERROR))?;
    CString::new(path)
        .map_err(|_| Error::config(wolfssl_sys::wolfCrypt_ErrorCodes_BAD_PATH_ERROR))
}

impl ConfigBuilder {
    /// Invokes [`wolfSSL_CTX_new`][0]
    ///
    /// [`crate::init`] must have been called first.
    ///
    /// [0]: https://www.wolfssl.com/documentation/manuals/wolfssl/group__Setup.html#function-wolfssl_ctx_new
    pub fn new(protocol: Protocol) -> std::result::Result<Self, NewConfigError> {
        if !crate::is_initialized() {
            return Err(NewConfigError::NotInitialized);
        }

        let method_fn = protocol
            .into_method_ptr()
            .ok_or(NewConfigError::MethodFailed)?;

        // SAFETY: [`wolfSSL_CTX_new`][0] is documented to get pointer to a valid `WOLFSSL_METHOD` structure which is created using one of the `wolfSSLvXX_XXXX_method()`.
        // `Protocol::into_method_ptr` function returns a pointer `wolfSSLvXX_XXXX_method()`
        //
        // [0]: https://www.wolfssl.com/documentation/manuals/wolfssl/group__Setup.html#function-wolfssl_ctx_new
        let ctx = unsafe { wolfssl_sys::wolfSSL_CTX_new(method_fn.as_ptr()) };
        let ctx = NonNull::new(ctx).ok_or(NewConfigError::CreateFailed)?;

        Ok(Self {
            ctx: ContextPointer(ctx),
            protocol,
        })
    }

    /// When `cond` is True call fallible `func` on `Self`
    pub fn try_when<F>(self, cond: bool, func: F) -> Result<Self>
    where
        F: FnOnce(Self) -> Result<Self>,
    {
        if cond {
            func(self)
        } else {
            Ok(self)
        }
    }

    /// When `maybe` is Some(_) call fallible `func` on `Self` and the contained value
    pub fn try_when_some<F, T>(self, maybe: Option<T>, func: F) -> Result<Self>
    where
        F: FnOnce(Self, T) -> Result<Self>,
    {
        if let Some(t) = maybe {
            func(self, t)
        } else {
            Ok(self)
        }
    }

    fn load_secret(
        self,
        secret: Secret,
        from_buffer: BufferLoader,
        from_file: FileLoader,
    ) -> Result<Self> {
        use wolfssl_sys::{WOLFSSL_FILETYPE_ASN1, WOLFSSL_FILETYPE_PEM};

        match secret {
            Secret::Asn1Buffer(buf) => {
                self.load_buffer(buf, WOLFSSL_FILETYPE_ASN1 as c_int, from_buffer)?
            }
            Secret::PemBuffer(buf) => {
                self.load_buffer(buf, WOLFSSL_FILETYPE_PEM as c_int, from_buffer)?
            }
            Secret::Asn1File(path) => {
                self.load_file(path, WOLFSSL_FILETYPE_ASN1 as c_int, from_file)?
            }
            Secret::PemFile(path) => {
                self.load_file(path, WOLFSSL_FILETYPE_PEM as c_int, from_file)?
            }
        };

        Ok(self)
    }

    fn load_buffer(&self, buf: &[u8], format: c_int, from_buffer: BufferLoader) -> Result<()> {
        // SAFETY: every `BufferLoader` ([`wolfSSL_CTX_use_certificate_buffer`][0],
        // [`wolfSSL_CTX_use_PrivateKey_buffer`][1], [`wolfSSL_CTX_load_verify_buffer`][2])
        // requires a valid `ctx` pointer from `wolfSSL_CTX_new()`.
        // The pointer given as the `in` argument must point to a region of `sz` bytes.
        // The values passed here are valid since they are derived from the same byte slice.
        //
        // [0]: https://www.wolfssl.com/documentation/manuals/wolfssl/group__CertsKeys.html#function-wolfssl_ctx_use_certificate_buffer
        // [1]: https://www.wolfssl.com/documentation/manuals/wolfssl/group__CertsKeys.html#function-wolfssl_ctx_use_privatekey_buffer
        // [2]: https://www.wolfssl.com/documentation/manuals/wolfssl/group__CertsKeys.html#function-wolfssl_ctx_load_verify_buffer
        let result =
            unsafe { from_buffer(self.ctx.as_ptr(), buf.as_ptr(), buf.len() as c_long, format) };
        check(result)
    }

    fn load_file(
        &self,
        path: &std::path::Path,
        format: c_int,
        from_file: FileLoader,
    ) -> Result<()> {
        let file = path_to_cstring(path)?;
        // SAFETY: every `FileLoader` ([`wolfSSL_CTX_use_certificate_file`][0],
        // [`wolfSSL_CTX_use_PrivateKey_file`][1]) requires a valid `ctx` pointer from `wolfSSL_CTX_new()`.
        // The pointer passed as the path argument must be a valid NULL-terminated C-style string,
        // which is guaranteed by the use of `std::ffi::CString::as_c_str()` here.
        //
        // [0]: https://www.wolfssl.com/documentation/manuals/wolfssl/group__CertsKeys.html#function-wolfssl_ctx_use_certificate_file
        // [1]: https://www.wolfssl.com/documentation/manuals/wolfssl/group__CertsKeys.html#function-wolfssl_ctx_use_privatekey_file
        let result = unsafe { from_file(self.ctx.as_ptr(), file.as_c_str().as_ptr(), format) };
        if result != wolfssl_sys::WOLFSSL_SUCCESS_c_int {
            log::warn!("Failed to load {}: {}", path.display(), result);
        }
        check(result)
    }

    /// Wraps [`wolfSSL_CTX_load_verify_buffer`][0] and [`wolfSSL_CTX_load_verify_locations`][1]
    ///
    /// [0]: https://www.wolfssl.com/documentation/manuals/wolfssl/group__CertsKeys.html#function-wolfssl_ctx_load_verify_buffer
    /// [1]: https://www.wolfssl.com/documentation/manuals/wolfssl/group__CertsKeys.html#function-wolfssl_ctx_load_verify_locations
    pub fn with_root_certificate(self, root: RootCertificate) -> Result<Self> {
        use wolfssl_sys::{
            wolfSSL_CTX_load_verify_buffer, wolfSSL_CTX_load_verify_locations,
            WOLFSSL_FILETYPE_ASN1, WOLFSSL_FILETYPE_PEM,
        };

        match root {
            RootCertificate::Asn1Buffer(buf) => self.load_buffer(
                buf,
                WOLFSSL_FILETYPE_ASN1 as c_int,
                wolfSSL_CTX_load_verify_buffer,
            )?,
            RootCertificate::PemBuffer(buf) => self.load_buffer(
                buf,
                WOLFSSL_FILETYPE_PEM as c_int,
                wolfSSL_CTX_load_verify_buffer,
            )?,
            RootCertificate::PemFileOrDirectory(path) => {
                let is_dir = path.is_dir();
                let path = path_to_cstring(path)?;
                let (file, dir) = if is_dir {
                    (std::ptr::null(), path.as_c_str().as_ptr())
                } else {
                    (path.as_c_str().as_ptr(), std::ptr::null())
                };
                // SAFETY: [`wolfSSL_CTX_load_verify_locations`][0] ([also][1]) requires a valid `ctx` pointer from `wolfSSL_CTX_new()`.
                // Exactly one of `file`/`dir` is non-NULL and it points at a valid NULL-terminated C-style string,
                // which is guaranteed by the use of `std::ffi::CString::as_c_str()` here. `path` outlives the call.
                //
                // [0]: https://www.wolfssl.com/documentation/manuals/wolfssl/group__CertsKeys.html#function-wolfssl_ctx_load_verify_locations
                // [1]: https://www.wolfssl.com/doxygen/group__CertsKeys.html#gaf592c652b5d7a599ee511a394dfc488e
                let result =
                    unsafe { wolfSSL_CTX_load_verify_locations(self.ctx.as_ptr(), file, dir) };
                check(result)?
            }
        };

        Ok(self)
    }

    /// Wraps [`wolfSSL_CTX_set_cipher_list`][0]
    ///
    /// [0]: https://www.wolfssl.com/documentation/manuals/wolfssl/ssl_8h.html#function-wolfssl_ctx_set_cipher_list
    pub fn with_cipher_list(self, cipher_list: &str) -> Result<Self> {
        let cipher_list = CString::new(cipher_list)
            .map_err(|_| Error::config(wolfssl_sys::WOLFSSL_FAILURE_c_int))?;

        // SAFETY: [`wolfSSL_CTX_set_cipher_list`][0] ([also][1]) requires a valid `ctx` pointer from `wolfSSL_CTX_new()` and
        // `list` parameter which should be a null terminated C string pointer which is guaranteed by
        // the use of `std::ffi::CString::as_c_str()` here.
        //
        // [0]: https://www.wolfssl.com/documentation/manuals/wolfssl/ssl_8h.html#function-wolfssl_ctx_set_cipher_list
        // [1]: https://www.wolfssl.com/doxygen/group__Setup.html#gafa55814f56bd7a36f4035d71b2b31832
        let result = unsafe {
            wolfssl_sys::wolfSSL_CTX_set_cipher_list(
                self.ctx.as_ptr(),
                cipher_list.as_c_str().as_ptr(),
            )
        };

        check(result).map(|()| self)
    }

    /// Wraps [`wolfSSL_CTX_use_certificate_file`][0] and [`wolfSSL_CTX_use_certificate_buffer`][1]
    ///
    /// [0]: https://www.wolfssl.com/documentation/manuals/wolfssl/group__CertsKeys.html#function-wolfssl_ctx_use_certificate_file
    /// [1]: https://www.wolfssl.com/documentation/manuals/wolfssl/group__CertsKeys.html#function-wolfssl_ctx_use_certificate_buffer
    pub fn with_certificate(self, secret: Secret) -> Result<Self> {
        self.load_secret(
            secret,
            wolfssl_sys::wolfSSL_CTX_use_certificate_buffer,
            wolfssl_sys::wolfSSL_CTX_use_certificate_file,
        )
    }

    /// Wraps [`wolfSSL_CTX_use_PrivateKey_file`][0] and [`wolfSSL_CTX_use_PrivateKey_buffer`][1]
    ///
    /// [0]: https://www.wolfssl.com/documentation/manuals/wolfssl/group__CertsKeys.html#function-wolfssl_ctx_use_privatekey_file
    /// [1]: https://www.wolfssl.com/documentation/manuals/wolfssl/group__CertsKeys.html#function-wolfssl_ctx_use_privatekey_buffer
    pub fn with_private_key(self, secret: Secret) -> Result<Self> {
        self.load_secret(
            secret,
            wolfssl_sys::wolfSSL_CTX_use_PrivateKey_buffer,
            wolfssl_sys::wolfSSL_CTX_use_PrivateKey_file,
        )
    }

    /// Wraps `wolfSSL_CTX_set_verify`[0]([also][1])
    // [0]: https://www.wolfssl.com/documentation/manuals/wolfssl/group__Setup.html#function-wolfssl_ctx_set_verify
    // [1]: https://www.wolfssl.com/doxygen/group__Setup.html#ga26c623e093cf15f81cdfc3bb26682089
    pub fn with_verify_method(self, mode: SslVerifyMode) -> Self {
        // SAFETY: [`wolfSSL_CTX_set_verify`][0] ([also][1]) requires a valid `ctx` pointer
        // from `wolfSSL_CTX_new()`.
        // Third parameter `verify_callback` if valid, will be called when verification fails.
        // But we send `None` since we do not use this additional functionality
        //
        // [0]: https://www.wolfssl.com/documentation/manuals/wolfssl/group__Setup.html#function-wolfssl_ctx_set_verify
        // [1]: https://www.wolfssl.com/doxygen/group__Setup.html#ga26c623e093cf15f81cdfc3bb26682089
        unsafe { wolfssl_sys::wolfSSL_CTX_set_verify(self.ctx.as_ptr(), mode.into(), None) };
        self
    }

    /// Finalizes a [`Config`].
    pub fn build(self) -> Config {
        Config {
            inner: Arc::new(ConfigInner {
                protocol: self.protocol,
                ctx: self.ctx,
            }),
        }
    }
}

// Wrap a valid pointer to a [`wolfssl_sys::WOLFSSL_CTX`] such that we can
// add traits such as `Send`. Owns the context: dropping it frees it.
struct ContextPointer(NonNull<wolfssl_sys::WOLFSSL_CTX>);

impl ContextPointer {
    fn as_ptr(&self) -> *mut wolfssl_sys::WOLFSSL_CTX {
        self.0.as_ptr()
    }
}

// SAFETY: Per [Library Design][] under "Thread Safety"
//
// > Besides sharing WOLFSSL pointers, users must also take care to
// > completely initialize an WOLFSSL_CTX before passing the structure to
// > wolfSSL_new(). The same WOLFSSL_CTX can create multiple WOLFSSL
// > structs but the WOLFSSL_CTX is only read during wolfSSL_new()
// > creation and any future (or simultaneous changes) to the WOLFSSL_CTX
// > will not be reflected once the WOLFSSL object is created.
//
// This is consistent with the requirements for `Send`. Setup happens
// through the by-value [`ConfigBuilder`] methods, before the pointer
// can be shared, and [`Config`] offers no writeable access.
//
// [Library Design]: https://www.wolfssl.com/documentation/manuals/wolfssl/chapter09.html
unsafe impl Send for ContextPointer {}

// SAFETY: Per documentation quoted for `Send` above: once built the
// underlying `WOLFSSL_CTX` is considered read-only. `ConfigBuilder`
// enforces that the `Config` is completely built before it can be
// obtained and there are no mutable APIs on `Config` once it is built.
unsafe impl Sync for ContextPointer {}

impl Drop for ContextPointer {
    /// Invokes [`wolfSSL_CTX_free`][0]
    ///
    /// [0]: https://www.wolfssl.com/documentation/manuals/wolfssl/group__Setup.html#function-wolfssl_ctx_free
    fn drop(&mut self) {
        // SAFETY: [`wolfSSL_CTX_free`][0] ([also][1]) takes pointer to `WOLFSSL_CTX` and frees it if the reference count becomes 0.
        // Every `Engine` created from this context holds a `Config` clone, so this only runs once no
        // `WOLFSSL` object built from it remains.
        //
        // [0]: https://www.wolfssl.com/doxygen/group__Setup.html#gabe86939065276c9271a17d799860535d
        // [1]: https://www.wolfssl.com/documentation/manuals/wolfssl/group__Setup.html#function-wolfssl_ctx_free
        unsafe { wolfssl_sys::wolfSSL_CTX_free(self.as_ptr()) }
    }
}

struct ConfigInner {
    protocol: Protocol,
    ctx: ContextPointer,
}

/// An immutable, shareable TLS configuration (a `WOLFSSL_CTX`).
///
/// Cloning is cheap. The context is freed once the last clone, and
/// the last [`Engine`] built from it, are gone.
#[derive(Clone)]
pub struct Config {
    inner: Arc<ConfigInner>,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("protocol", &self.inner.protocol)
            .finish_non_exhaustive()
    }
}

impl Config {
    /// A server configuration presenting `cert` and proving it with
    /// `key`.
    pub fn default_server(key: Secret, cert: Secret) -> Result<Self> {
        Ok(ConfigBuilder::new(Protocol::TlsServer)?
            .with_certificate(cert)?
            .with_private_key(key)?
            .build())
    }

    /// A client configuration trusting `root`.
    pub fn default_client(root: RootCertificate) -> Result<Self> {
        Ok(ConfigBuilder::new(Protocol::TlsClient)?
            .with_root_certificate(root)?
            .build())
    }

    /// Returns the config's [`Protocol`].
    pub fn protocol(&self) -> Protocol {
        self.inner.protocol
    }

    /// Returns the role of every engine built from this config.
    pub fn role(&self) -> Role {
        self.inner.protocol.role()
    }

    /// Creates a new, not yet handshaken engine using this config.
    pub fn new_engine(
        &self,
        options: EngineOptions,
    ) -> std::result::Result<Engine, NewEngineError> {
        // SAFETY: [`wolfSSL_new`][0] ([also][1]) needs a valid `wolfssl_sys::WOLFSSL_CTX` pointer as per documentation
        //
        // [0]: https://www.wolfssl.com/documentation/manuals/wolfssl/group__Setup.html#function-wolfssl_new
        // [1]: https://www.wolfssl.com/doxygen/group__Setup.html#gaa37dc22775da8f6a3b5c149d5dfd6e1c
        let ptr = unsafe { wolfssl_sys::wolfSSL_new(self.inner.ctx.as_ptr()) };
        let ptr = NonNull::new(ptr).ok_or(NewEngineError::CreateFailed)?;

        Engine::new(ptr, self.clone(), options)
    }

    /// Number of live handles (clones and engines) on this config.
    pub fn handle_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }
}
