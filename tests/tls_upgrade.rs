//! Integration tests for encryption
//!
//! Covers the in-band `Upgrade: TLS` exchange, the automatic upgrade after
//! `426 Upgrade Required`, and trust-on-first-use of server credentials.

use ipphttp::http::tls::{TlsConfig, TlsError, TofuTrustStore};
use ipphttp::http::{
    Connection, ConnectionConfig, Encryption, Error, Field, Method, State, Status,
    UPGRADE_PROTOCOLS,
};
use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::PKey;
use openssl::rsa::Rsa;
use openssl::x509::{X509Builder, X509NameBuilder};
use std::net::TcpListener;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn listener() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

fn server_config(encryption: Encryption, pem: Option<&[u8]>) -> ConnectionConfig {
    let tls = match pem {
        Some(pem) => TlsConfig::server().cert_pem(pem).build().unwrap(),
        None => TlsConfig::server().build().unwrap(),
    };

    ConnectionConfig::builder()
        .encryption(encryption)
        .tls_backend(Arc::new(tls))
        .build()
}

fn client_config(encryption: Encryption) -> ConnectionConfig {
    ConnectionConfig::builder()
        .encryption(encryption)
        .tls_backend(Arc::new(TlsConfig::client().build().unwrap()))
        .timeout(Some(Duration::from_secs(10)))
        .build()
}

/// Self-signed credentials as one PEM blob
fn self_signed_pem(common_name: &str) -> Vec<u8> {
    let key = PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap();

    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_nid(Nid::COMMONNAME, common_name).unwrap();
    let name = name.build();

    let mut builder = X509Builder::new().unwrap();
    builder.set_version(2).unwrap();
    let serial = BigNum::from_u32(1).unwrap().to_asn1_integer().unwrap();
    builder.set_serial_number(&serial).unwrap();
    builder.set_subject_name(&name).unwrap();
    builder.set_issuer_name(&name).unwrap();
    builder.set_pubkey(&key).unwrap();
    builder
        .set_not_before(&Asn1Time::days_from_now(0).unwrap())
        .unwrap();
    builder
        .set_not_after(&Asn1Time::days_from_now(365).unwrap())
        .unwrap();
    builder.sign(&key, MessageDigest::sha256()).unwrap();

    let mut pem = builder.build().to_pem().unwrap();
    pem.extend(key.private_key_to_pem_pkcs8().unwrap());
    pem
}

/// Answer an `OPTIONS *` upgrade probe with 101 and switch to TLS
fn accept_upgrade(conn: &mut Connection) {
    let request = conn.read_request().unwrap();
    assert_eq!(request.method, Some(Method::Options));
    assert_eq!(request.target, "*");

    assert_eq!(conn.update().unwrap(), Status::OK);
    assert!(conn.field(Field::Connection).eq_ignore_ascii_case("upgrade"));
    assert_eq!(conn.field(Field::Upgrade), UPGRADE_PROTOCOLS);

    conn.clear_fields();
    conn.write_response(Status::SWITCHING_PROTOCOLS).unwrap();
    conn.set_encryption(Encryption::Required).unwrap();
    assert!(conn.is_encrypted());

    conn.clear_fields();
    conn.set_field(Field::ContentLength, "0").unwrap();
    conn.write_response(Status::OK).unwrap();
    assert_eq!(conn.state(), State::Waiting);
}

/// Serve one GET with a short fixed-length body
fn serve_get(conn: &mut Connection, body: &[u8]) {
    let request = conn.read_request().unwrap();
    assert_eq!(request.method, Some(Method::Get));
    assert_eq!(conn.update().unwrap(), Status::OK);

    conn.clear_fields();
    conn.set_field(Field::ContentLength, &body.len().to_string()).unwrap();
    conn.write_response(Status::OK).unwrap();
    conn.write(body).unwrap();
}

#[test]
fn test_upgrade_with_101() {
    let (listener, port) = listener();

    let server = thread::spawn(move || {
        let config = server_config(Encryption::IfRequested, None);
        let mut conn = Connection::accept(&listener, config).unwrap();
        accept_upgrade(&mut conn);
        serve_get(&mut conn, b"secure");
    });

    let mut conn = Connection::open("127.0.0.1", port, client_config(Encryption::Required)).unwrap();
    assert!(conn.is_encrypted());
    assert!(conn.tls_version().is_some());
    assert!(conn.peer_identity().is_some());

    conn.get("/status").unwrap();
    assert_eq!(conn.read_response_status().unwrap(), Status::OK);
    assert_eq!(conn.read_to_end().unwrap(), b"secure");

    server.join().unwrap();
}

#[test]
fn test_required_without_server_support() {
    let (listener, port) = listener();

    let server = thread::spawn(move || {
        let mut conn = Connection::accept(&listener, ConnectionConfig::default()).unwrap();
        let request = conn.read_request().unwrap();
        assert_eq!(request.method, Some(Method::Options));
        conn.update().unwrap();

        conn.clear_fields();
        conn.set_field(Field::ContentLength, "0").unwrap();
        conn.write_response(Status::OK).unwrap();

        // The client hangs up instead of sending its real request
        assert!(conn.read_request().is_err());
    });

    let mut conn =
        Connection::new("127.0.0.1", port, client_config(Encryption::Required)).unwrap();
    let result = conn.connect(Some(Duration::from_secs(5)), None);

    assert!(matches!(result, Err(Error::EncryptionNotSupported)));
    assert!(!conn.is_connected());
    assert!(!conn.is_encrypted());

    server.join().unwrap();
}

#[test]
fn test_upgrade_after_426() {
    let (listener, port) = listener();

    let server = thread::spawn(move || {
        let config = server_config(Encryption::IfRequested, None);

        let mut first = Connection::accept(&listener, config.clone()).unwrap();
        let request = first.read_request().unwrap();
        assert_eq!(request.method, Some(Method::Get));
        first.update().unwrap();
        first.clear_fields();
        first.write_response(Status::UPGRADE_REQUIRED).unwrap();
        assert_eq!(first.state(), State::Waiting);

        // The client reconnects for the upgrade probe
        let mut second = Connection::accept(&listener, config).unwrap();
        accept_upgrade(&mut second);
        serve_get(&mut second, b"now encrypted");
    });

    let mut conn = Connection::open(
        "127.0.0.1",
        port,
        client_config(Encryption::IfRequested),
    )
    .unwrap();
    assert!(!conn.is_encrypted());

    conn.get("/jobs").unwrap();
    assert_eq!(
        conn.read_response_status().unwrap(),
        Status::UPGRADE_REQUIRED
    );
    assert!(conn.is_encrypted());
    assert_eq!(conn.encryption(), Encryption::Required);

    conn.get("/jobs").unwrap();
    assert_eq!(conn.read_response_status().unwrap(), Status::OK);
    assert_eq!(conn.read_to_end().unwrap(), b"now encrypted");

    server.join().unwrap();
}

#[test]
fn test_trust_on_first_use() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("known_printers");

    // First contact: the built-in credentials are learned
    let (listener, port) = listener();
    let server = thread::spawn(move || {
        let mut conn = Connection::accept(&listener, server_config(Encryption::Always, None)).unwrap();
        assert!(conn.is_encrypted());
        serve_get(&mut conn, b"hello");
    });

    let store = Arc::new(TofuTrustStore::load(&path).unwrap());
    let config = ConnectionConfig::builder()
        .encryption(Encryption::Always)
        .tls_backend(Arc::new(TlsConfig::client().build().unwrap()))
        .trust_store(store.clone())
        .build();

    let mut conn = Connection::open("127.0.0.1", port, config).unwrap();
    assert!(conn.is_encrypted());
    assert_eq!(store.len(), 1);

    conn.get("/").unwrap();
    assert_eq!(conn.read_response_status().unwrap(), Status::OK);
    assert_eq!(conn.read_to_end().unwrap(), b"hello");
    conn.close();
    server.join().unwrap();

    // Same address, different credentials
    let (listener, port) = self::listener();
    let pem = self_signed_pem("impostor.test");
    let server = thread::spawn(move || {
        let config = server_config(Encryption::Always, Some(pem.as_slice()));
        if let Ok(mut conn) = Connection::accept(&listener, config) {
            let _ = conn.read_request();
        }
    });

    let store = Arc::new(TofuTrustStore::load(&path).unwrap());
    assert_eq!(store.len(), 1);

    let config = ConnectionConfig::builder()
        .encryption(Encryption::Always)
        .tls_backend(Arc::new(TlsConfig::client().build().unwrap()))
        .trust_store(store.clone())
        .build();

    let mut conn = Connection::new("127.0.0.1", port, config).unwrap();
    let result = conn.connect(Some(Duration::from_secs(5)), None);

    assert!(matches!(result, Err(Error::Tls(TlsError::Untrusted { .. }))));
    assert_eq!(conn.status(), Status::PKI_ERROR);
    assert!(!conn.is_connected());

    server.join().unwrap();
}

#[test]
fn test_reconnect_with_changed_credentials() {
    let (listener, port) = listener();
    let pem = self_signed_pem("localhost");

    let server = thread::spawn(move || {
        let mut conn = Connection::accept(&listener, server_config(Encryption::Always, None)).unwrap();
        serve_get(&mut conn, b"first");
        drop(conn);

        let config = server_config(Encryption::Always, Some(pem.as_slice()));
        if let Ok(mut conn) = Connection::accept(&listener, config) {
            let _ = conn.read_request();
        }
    });

    let mut conn = Connection::open("127.0.0.1", port, client_config(Encryption::Always)).unwrap();
    let first = conn.peer_identity().cloned().unwrap();

    conn.get("/").unwrap();
    assert_eq!(conn.read_response_status().unwrap(), Status::OK);
    assert_eq!(conn.read_to_end().unwrap(), b"first");

    let result = conn.reconnect();
    assert!(matches!(result, Err(Error::PeerIdentityChanged(ref host)) if host == "127.0.0.1"));
    assert_eq!(conn.status(), Status::PKI_ERROR);
    assert!(!conn.is_connected());
    assert_eq!(conn.peer_identity().map(|p| p.fingerprint.as_str()), Some(first.fingerprint.as_str()));

    server.join().unwrap();
}
