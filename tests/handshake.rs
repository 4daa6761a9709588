//! Full handshakes, in order: flight structure, CID attachment,
//! application data, capacity accounting.

mod common;

use common::*;
use fefd::{CidGenerator, Event};

#[cfg(feature = "rcgen")]
use fefd::ClientAuth;

#[test]
fn psk_full_handshake_in_order() {
    let mut pair = Pair::new_psk(|c| c, |s| s);
    let capacity_before = pair.server.remaining_capacity();

    pair.run_handshake();

    // Cookie exchange happened: ClientHello appears twice (without and
    // with cookie), HelloVerifyRequest once.
    let c2s = handshake_types(&pair.c2s_log, 0);
    assert_eq!(
        c2s.iter().filter(|t| **t == CLIENT_HELLO).count(),
        2,
        "one cookie-less and one cookie-bearing ClientHello: {:?}",
        c2s
    );
    let s2c = handshake_types(&pair.s2c_log, 0);
    assert_eq!(
        s2c.iter().filter(|t| **t == HELLO_VERIFY_REQUEST).count(),
        1
    );
    // PSK handshake never carries certificates.
    assert!(!c2s.contains(&CERTIFICATE));
    assert!(!s2c.contains(&CERTIFICATE));
    assert!(c2s.contains(&CLIENT_KEY_EXCHANGE));

    // One established session on each side; server capacity down by one.
    assert!(has_established(&pair.client_events));
    assert!(has_established(&pair.server_events));
    assert_eq!(pair.server.remaining_capacity(), capacity_before - 1);

    // Application data flows both ways.
    let caddr = pair.caddr;
    let saddr = pair.saddr;
    pair.client.send(pair.now, saddr, b"ping").unwrap();
    pair.settle();
    assert!(pair
        .server_events
        .iter()
        .any(|e| matches!(e, Event::ApplicationData { data, .. } if data == b"ping")));

    pair.server.send(pair.now, caddr, b"pong").unwrap();
    pair.settle();
    assert!(pair
        .client_events
        .iter()
        .any(|e| matches!(e, Event::ApplicationData { data, .. } if data == b"pong")));
}

#[test]
fn psk_handshake_with_connection_id() {
    // Server hands out 6-byte CIDs; the client advertises support with an
    // empty CID of its own.
    let mut pair = Pair::new_psk(
        |c| c.connection_id_generator(CidGenerator::SupportedButEmpty),
        |s| s.connection_id_generator(CidGenerator::Length(6)),
    );
    pair.run_handshake();

    // Handshake records stay un-CID'd.
    for d in &pair.c2s_log {
        for r in parse_records(d, 6) {
            assert_ne!(r.ctype, CT_CID, "handshake record carried a CID");
        }
    }

    // Post-handshake client records carry the server's 6-byte CID.
    let saddr = pair.saddr;
    let before = pair.c2s_log.len();
    pair.client.send(pair.now, saddr, b"with cid").unwrap();
    pair.settle();

    let post: Vec<_> = pair.c2s_log[before..]
        .iter()
        .flat_map(|d| parse_records(d, 6))
        .collect();
    assert!(!post.is_empty());
    assert!(
        post.iter().all(|r| r.ctype == CT_CID),
        "client application records must carry the CID: {:?}",
        post
    );
    assert!(pair
        .server_events
        .iter()
        .any(|e| matches!(e, Event::ApplicationData { data, .. } if data == b"with cid")));

    // The server towards the client stays plain (the client's CID is empty).
    let caddr = pair.caddr;
    let before = pair.s2c_log.len();
    pair.server.send(pair.now, caddr, b"no cid back").unwrap();
    pair.settle();
    let post: Vec<_> = pair.s2c_log[before..]
        .iter()
        .flat_map(|d| parse_records(d, 0))
        .collect();
    assert!(post.iter().all(|r| r.ctype == CT_APPDATA));
}

#[cfg(feature = "rcgen")]
#[test]
fn ecdsa_full_handshake_with_client_auth() {
    let mut pair = Pair::new_ecdsa(|c| c, |s| s.client_authentication(ClientAuth::Required));
    pair.run_handshake();

    let s2c = handshake_types(&pair.s2c_log, 0);
    assert!(s2c.contains(&CERTIFICATE));
    assert!(s2c.contains(&SERVER_KEY_EXCHANGE));
    assert!(s2c.contains(&SERVER_HELLO_DONE));
    // CertificateRequest (13) went out, and the client answered with its
    // own Certificate and a CertificateVerify (15).
    assert!(s2c.contains(&13));
    let c2s = handshake_types(&pair.c2s_log, 0);
    assert!(c2s.contains(&CERTIFICATE));
    assert!(c2s.contains(&15));

    // The server saw a certificate identity.
    assert!(pair.server_events.iter().any(|e| matches!(
        e,
        Event::SessionEstablished {
            peer_identity: fefd::PeerIdentity::Certificate { chain },
            ..
        } if !chain.is_empty()
    )));
}

#[cfg(feature = "rcgen")]
#[test]
fn ecdsa_handshake_without_client_auth_sends_no_certificate_request() {
    let mut pair = Pair::new_ecdsa(|c| c, |s| s);
    pair.run_handshake();

    let s2c = handshake_types(&pair.s2c_log, 0);
    assert!(!s2c.contains(&13), "no CertificateRequest expected");
    let c2s = handshake_types(&pair.c2s_log, 0);
    assert!(!c2s.contains(&CERTIFICATE));
}

#[test]
fn ecdhe_psk_suite_negotiates_and_establishes() {
    use fefd::CipherSuite;
    let mut pair = Pair::new_psk(
        |c| c.cipher_suites(&[CipherSuite::ECDHE_PSK_AES128_GCM_SHA256]),
        |s| s,
    );
    pair.run_handshake();

    // ECDHE_PSK carries ServerKeyExchange with the curve parameters.
    let s2c = handshake_types(&pair.s2c_log, 0);
    assert!(s2c.contains(&SERVER_KEY_EXCHANGE));
}

#[test]
fn no_common_cipher_suite_fails_with_alert() {
    use fefd::CipherSuite;
    let mut pair = Pair::new_psk(
        |c| c.cipher_suites(&[CipherSuite::PSK_AES128_GCM_SHA256]),
        |s| s.cipher_suites(&[CipherSuite::PSK_AES256_GCM_SHA384]),
    );
    let capacity_before = pair.server.remaining_capacity();

    pair.connect();
    pair.settle();

    assert!(!pair.both_established());
    // The failed handshake released its slot.
    assert_eq!(pair.server.remaining_capacity(), capacity_before);
    assert!(!failure_reasons(&pair.server_events).is_empty());
    // The client learns through the fatal alert.
    assert!(failure_reasons(&pair.client_events)
        .iter()
        .any(|r| r.contains("alert")));
}

#[test]
fn unknown_psk_identity_is_a_fatal_alert() {
    use fefd::SingleKeyPskStore;
    use std::sync::Arc;

    let mut pair = Pair::new_psk(|c| c, |s| s);
    // The server only knows a different identity.
    pair.server
        .set_psk_store(Arc::new(SingleKeyPskStore::new(b"somebody-else", PSK_KEY)));

    pair.connect();
    pair.settle();

    assert!(!pair.both_established());
    assert!(failure_reasons(&pair.server_events)
        .iter()
        .any(|r| r.contains("unknown psk identity")));
}

#[test]
fn sni_scopes_the_psk_lookup() {
    let mut pair = Pair::new_psk(|c| c, |s| s.sni_enabled(true));
    pair.client
        .connect(pair.now, pair.saddr, Some("sensor.example"))
        .unwrap();
    pair.settle();
    assert!(pair.both_established());

    assert!(pair.server_events.iter().any(|e| matches!(
        e,
        Event::SessionEstablished {
            peer_identity: fefd::PeerIdentity::PskIdentity { virtual_host, .. },
            ..
        } if virtual_host.as_deref() == Some("sensor.example")
    )));
}

#[test]
fn handshake_completes_within_the_flight_budget() {
    // In-order lockstep: six flights, no retransmissions, so the whole
    // handshake fits well inside 6·T0 of virtual time (it uses none).
    let mut pair = Pair::new_psk(|c| c, |s| s);
    pair.connect();
    for _ in 0..6 {
        if pair.flush() == 0 {
            break;
        }
    }
    assert!(pair.both_established());
}
