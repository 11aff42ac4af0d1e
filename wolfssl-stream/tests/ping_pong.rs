#![deny(unsafe_code)] // unsafety should all be in the library.

use wolfssl_stream::{
    runtime::{self, TokioStream},
    Config, ConfigBuilder, Connection, EngineOptions, Protocol, RootCertificate, Secret,
    Transport, PROPERTY_TLS_VERSION,
};

use test_case::test_case;
use tokio::net::UnixStream;

const CA_CERT: &[u8] = &include!("data/ca_cert_der_2048");
const SERVER_CERT: &[u8] = &include!("data/server_cert_der_2048");
const SERVER_KEY: &[u8] = &include!("data/server_key_der_2048");

fn client_config(protocol: Protocol) -> Config {
    wolfssl_stream::init().expect("init");

    let ca_cert = RootCertificate::Asn1Buffer(CA_CERT);

    ConfigBuilder::new(protocol)
        .expect("[Client] new ConfigBuilder")
        .with_root_certificate(ca_cert)
        .expect("[Client] add root certificate")
        .build()
}

fn server_config(protocol: Protocol) -> Config {
    wolfssl_stream::init().expect("init");

    let cert = Secret::Asn1Buffer(SERVER_CERT);
    let key = Secret::Asn1Buffer(SERVER_KEY);

    ConfigBuilder::new(protocol)
        .expect("[Server] new ConfigBuilder")
        .with_certificate(cert)
        .expect("[Server] add certificate")
        .with_private_key(key)
        .expect("[Server] add private key")
        .build()
}

async fn client(sock: UnixStream, protocol: Protocol) -> String {
    let engine = client_config(protocol)
        .new_engine(EngineOptions::new().with_checked_domain_name("localhost"))
        .expect("[Client] Create Client engine");
    let mut conn = Connection::new(engine, TokioStream::new(sock));

    println!("[Client] Connecting...");
    runtime::handshake(&mut conn)
        .await
        .expect("[Client] handshake");

    assert!(conn.is_established());

    println!("[Client] Starting ping/pong loop");

    let mut buf = vec![0u8; 1900];

    for ping in ["Hello", "Goodbye", "QUIT"] {
        println!("[Client] Send {ping}");
        runtime::write_all(&mut conn, ping.as_bytes())
            .await
            .expect("[Client] write_all");

        let nr = runtime::read(&mut conn, &mut buf)
            .await
            .expect("[Client] read");
        let pong = String::from_utf8_lossy(&buf[..nr]);
        println!("[Client] Got pong: {pong}");
        assert_eq!(pong, ping);
    }

    println!("[Client] Finished");

    conn.contexts()
        .input()
        .property(PROPERTY_TLS_VERSION)
        .expect("[Client] tls.version")
        .to_string()
}

async fn server(sock: UnixStream, protocol: Protocol) -> String {
    let engine = server_config(protocol)
        .new_engine(EngineOptions::new())
        .expect("[Server] Create Server engine");
    let mut conn = Connection::new(engine, TokioStream::new(sock));

    println!("[Server] Connecting...");
    runtime::handshake(&mut conn)
        .await
        .expect("[Server] handshake");

    assert!(conn.is_established());

    let mut buf = vec![0u8; 1900];

    println!("[Server] Starting ping/pong loop");

    loop {
        let nr = runtime::read(&mut conn, &mut buf)
            .await
            .expect("[Server] read");
        let ping = String::from_utf8_lossy(&buf[..nr]).to_string();
        println!("[Server] Got ping: {ping}");

        runtime::write_all(&mut conn, ping.as_bytes())
            .await
            .expect("[Server] write_all");

        if ping == "QUIT" {
            break;
        }
    }

    println!("[Server] Finished");

    conn.contexts()
        .output()
        .property(PROPERTY_TLS_VERSION)
        .expect("[Server] tls.version")
        .to_string()
}

#[test_case(Protocol::TlsClientV1_2, Protocol::TlsServerV1_3 => panics; "client_1.2_server_1.3")]
#[test_case(Protocol::TlsClientV1_2, Protocol::TlsServerV1_2 => "TLSv1.2"; "client_1.2_server_1.2")]
#[test_case(Protocol::TlsClientV1_2, Protocol::TlsServer => "TLSv1.2"; "client_1.2_server_any")]
#[test_case(Protocol::TlsClientV1_3, Protocol::TlsServerV1_3 => "TLSv1.3"; "client_1.3_server_1.3")]
#[test_case(Protocol::TlsClientV1_3, Protocol::TlsServerV1_2 => panics; "client_1.3_server_1.2")]
#[test_case(Protocol::TlsClientV1_3, Protocol::TlsServer => "TLSv1.3"; "client_1.3_server_any")]
#[test_case(Protocol::TlsClient, Protocol::TlsServerV1_3 => "TLSv1.3"; "client_any_server_1.3")]
#[test_case(Protocol::TlsClient, Protocol::TlsServer => "TLSv1.3"; "client_any_server_any")]
#[tokio::test]
async fn tls(client_protocol: Protocol, server_protocol: Protocol) -> String {
    #[cfg(feature = "debug")]
    wolfssl_stream::enable_debugging(true).expect("enable_debugging");

    // Communicate over a local stream socket for simplicity
    let (client_sock, server_sock) = UnixStream::pair().expect("UnixStream");

    let client = client(client_sock, client_protocol);
    let server = server(server_sock, server_protocol);

    // Note that this runs concurrently but not in parallel
    let (client_version, server_version) = tokio::join!(client, server);
    assert_eq!(client_version, server_version);
    client_version
}
