use crate::{Config, ConfigBuilder, Protocol, RootCertificate, Secret};

use std::sync::OnceLock;

pub static INIT_ENV_LOGGER: OnceLock<()> = OnceLock::new();

pub const SERVER_CERT: &[u8] = &include!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/tests/data/server_cert_der_2048"
));

pub const SERVER_KEY: &[u8] = &include!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/tests/data/server_key_der_2048"
));

pub const CA_CERT: &[u8] = &include!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/tests/data/ca_cert_der_2048"
));

pub fn server_config(protocol: Protocol) -> Config {
    crate::init().unwrap();
    ConfigBuilder::new(protocol)
        .unwrap_or_else(|e| panic!("new({protocol:?}): {e}"))
        .with_certificate(Secret::Asn1Buffer(SERVER_CERT))
        .unwrap()
        .with_private_key(Secret::Asn1Buffer(SERVER_KEY))
        .unwrap()
        .build()
}

pub fn client_config(protocol: Protocol) -> Config {
    crate::init().unwrap();
    ConfigBuilder::new(protocol)
        .unwrap_or_else(|e| panic!("new({protocol:?}): {e}"))
        .with_root_certificate(RootCertificate::Asn1Buffer(CA_CERT))
        .unwrap()
        .build()
}
