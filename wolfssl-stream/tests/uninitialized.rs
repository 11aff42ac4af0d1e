#![deny(unsafe_code)] // unsafety should all be in the library.

// Runs in its own process: nothing may call `init` before this test does.

use wolfssl_stream::{ConfigBuilder, Error, NewConfigError, Protocol};

#[test]
fn config_requires_init() {
    assert!(!wolfssl_stream::is_initialized());

    let err = match ConfigBuilder::new(Protocol::TlsClient) {
        Err(err) => err,
        Ok(_) => panic!("ConfigBuilder created before init"),
    };
    assert!(matches!(err, NewConfigError::NotInitialized), "{err:?}");
    assert!(matches!(Error::from(err), Error::Config(_)));

    wolfssl_stream::init().expect("init");
    assert!(wolfssl_stream::is_initialized());
    ConfigBuilder::new(Protocol::TlsClient).expect("ConfigBuilder after init");
}
