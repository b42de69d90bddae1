use axum::http::StatusCode;

use super::*;
use crate::test_support::{MockConfig, MockServer, TEST_TOKEN, TLS_SID, TlsMockServer};

#[test]
fn parse_handshake_keeps_sid_from_first_field() {
    let handshake = parse_handshake("abc123:60:60:websocket").expect("parse");
    assert_eq!(handshake.sid, "abc123");
    assert_eq!(handshake.heartbeat_timeout, Some(60));
    assert_eq!(handshake.close_timeout, Some(60));
    assert_eq!(handshake.transports, vec!["websocket".to_owned()]);
}

#[test]
fn parse_handshake_splits_transport_list() {
    let handshake = parse_handshake("sid:25:60:websocket,xhr-polling, jsonp-polling\n").expect("parse");
    assert_eq!(handshake.transports, vec!["websocket", "xhr-polling", "jsonp-polling"]);
}

#[test]
fn parse_handshake_tolerates_missing_trailing_fields() {
    let handshake = parse_handshake("sid:").expect("parse");
    assert_eq!(handshake.sid, "sid");
    assert_eq!(handshake.heartbeat_timeout, None);
    assert!(handshake.transports.is_empty());
}

#[test]
fn parse_handshake_rejects_body_without_fields() {
    let err = parse_handshake("nocolons").expect_err("should fail");
    assert!(matches!(err, NegotiationError::MalformedBody(body) if body == "nocolons"));
}

#[test]
fn parse_handshake_rejects_empty_sid() {
    assert!(matches!(parse_handshake(":25:60:websocket"), Err(NegotiationError::MalformedBody(_))));
    assert!(matches!(parse_handshake(""), Err(NegotiationError::MalformedBody(_))));
}

#[tokio::test]
async fn negotiate_returns_session_for_mock_server() {
    let server = MockServer::spawn(MockConfig::default()).await;
    let options = server.options();
    let origin = options.resolve_origin("http://unused").expect("origin");

    let negotiator = Negotiator::new(&options).expect("negotiator");
    let session = negotiator.negotiate(&origin, TEST_TOKEN).await.expect("negotiate");

    assert_eq!(session.sid, "deadbeef");
    assert_eq!(session.origin, format!("http://127.0.0.1:{}", server.addr.port()));
    assert!(!session.secure);
    assert_eq!(session.token, TEST_TOKEN);

    let handshakes = server.handshakes();
    assert_eq!(handshakes.len(), 1);
    assert_eq!(handshakes[0].get("Token").map(String::as_str), Some(TEST_TOKEN));
}

#[tokio::test]
async fn one_negotiator_runs_repeated_handshakes() {
    let server = MockServer::spawn(MockConfig::default()).await;
    let options = server.options();
    let origin = options.resolve_origin("http://unused").expect("origin");
    let negotiator = Negotiator::new(&options).expect("negotiator");

    let first = negotiator.negotiate(&origin, TEST_TOKEN).await.expect("first handshake");
    let second = negotiator.negotiate(&origin, TEST_TOKEN).await.expect("second handshake");

    assert_eq!(first.sid, "deadbeef");
    assert_eq!(second.sid, "deadbeef");
    assert_eq!(server.handshakes().len(), 2);
}

#[tokio::test]
async fn negotiate_fails_on_error_status() {
    let server = MockServer::spawn(MockConfig {
        handshake_status: StatusCode::FORBIDDEN,
        handshake_body: "handshake unauthorized".to_owned(),
        ..MockConfig::default()
    })
    .await;
    let options = server.options();
    let origin = options.resolve_origin("http://unused").expect("origin");

    let err = Negotiator::new(&options)
        .expect("negotiator")
        .negotiate(&origin, TEST_TOKEN)
        .await
        .expect_err("should fail");
    assert!(matches!(err, NegotiationError::Status { status: 403, .. }));
}

#[tokio::test]
async fn negotiate_fails_on_malformed_body() {
    let server = MockServer::spawn(MockConfig {
        handshake_body: "not-a-handshake".to_owned(),
        ..MockConfig::default()
    })
    .await;
    let options = server.options();
    let origin = options.resolve_origin("http://unused").expect("origin");

    let err = Negotiator::new(&options)
        .expect("negotiator")
        .negotiate(&origin, TEST_TOKEN)
        .await
        .expect_err("should fail");
    assert!(matches!(err, NegotiationError::MalformedBody(_)));
}

#[tokio::test]
async fn negotiate_fails_when_server_is_unreachable() {
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await.expect("bind");
    let port = listener.local_addr().expect("addr").port();
    drop(listener);

    let options = ClientOptions::new(TEST_TOKEN)
        .with_hostname("127.0.0.1")
        .with_port(port)
        .with_secure(false);
    let origin = options.resolve_origin("http://unused").expect("origin");

    let err = Negotiator::new(&options)
        .expect("negotiator")
        .negotiate(&origin, TEST_TOKEN)
        .await
        .expect_err("should fail");
    assert!(matches!(err, NegotiationError::Http(_)));
}

#[tokio::test]
async fn negotiate_accepts_self_signed_certificate_when_verification_is_off() {
    let server = TlsMockServer::spawn();
    let options = server.options();
    let origin = options.resolve_origin("https://unused").expect("origin");

    let session = Negotiator::new(&options)
        .expect("negotiator")
        .negotiate(&origin, TEST_TOKEN)
        .await
        .expect("negotiate over https");

    assert_eq!(session.sid, TLS_SID);
    assert!(session.secure);
    assert_eq!(session.origin, format!("https://127.0.0.1:{}", server.addr.port()));
}

#[tokio::test]
async fn negotiate_rejects_self_signed_certificate_when_verifying() {
    let server = TlsMockServer::spawn();
    let options = server.options().with_tls_verify(true);
    let origin = options.resolve_origin("https://unused").expect("origin");

    let err = Negotiator::new(&options)
        .expect("negotiator")
        .negotiate(&origin, TEST_TOKEN)
        .await
        .expect_err("untrusted certificate should fail");
    assert!(matches!(err, NegotiationError::Http(_)));
}
