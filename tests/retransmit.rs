//! Loss recovery: retransmitted flights, the terminal-flight rule, and
//! retransmission exhaustion.

mod common;

use std::time::Duration;

use common::*;

/// Retransmitted records keep epoch/type/message_seq and get fresh record
/// sequence numbers.
fn assert_retransmission(initial: &[RecHdr], resent: &[RecHdr]) {
    assert_eq!(
        initial.len(),
        resent.len(),
        "retransmission must repeat the whole flight"
    );
    for (a, b) in initial.iter().zip(resent.iter()) {
        assert_eq!(a.ctype, b.ctype, "content type must not change");
        assert_eq!(a.epoch, b.epoch, "epoch must not change");
        assert_eq!(a.hs_type, b.hs_type);
        assert_eq!(a.msg_seq, b.msg_seq, "handshake message_seq must not change");
        assert!(
            b.seq > a.seq,
            "record sequence must increase on resend: {:?} -> {:?}",
            a,
            b
        );
    }
}

#[test]
fn lost_server_flight_is_retransmitted_with_fresh_sequences() {
    let mut pair = Pair::new_psk(|c| c, |s| s);
    pair.connect();

    // Cookie exchange.
    for d in pair.drain_client() {
        pair.deliver_to_server(&d);
    }
    for d in pair.drain_server() {
        pair.deliver_to_client(&d);
    }
    for d in pair.drain_client() {
        pair.deliver_to_server(&d);
    }

    // Capture flight 4 and drop it.
    let initial = pair.drain_server();
    let initial_hdrs: Vec<RecHdr> = initial.iter().flat_map(|d| parse_records(d, 0)).collect();
    assert!(!initial_hdrs.is_empty());

    // Timer fires on the server; the resend must carry the same handshake
    // payload under fresh record sequence numbers.
    pair.advance(Duration::from_millis(600));
    let resent = pair.drain_server();
    let resent_hdrs: Vec<RecHdr> = resent.iter().flat_map(|d| parse_records(d, 0)).collect();
    assert_retransmission(&initial_hdrs, &resent_hdrs);

    // Deliver the resend; the handshake completes normally.
    for d in resent {
        pair.deliver_to_client(&d);
    }
    pair.settle();
    assert!(pair.both_established());
}

#[test]
fn terminal_flight_answers_peer_retransmissions() {
    // The server's flight 6 has no successor, so nothing ever acknowledges
    // it. When the client repeats flight 5, the server must repeat flight 6
    // from its retained copy.
    let mut pair = Pair::new_psk(|c| c, |s| s);
    pair.connect();

    for d in pair.drain_client() {
        pair.deliver_to_server(&d);
    }
    for d in pair.drain_server() {
        pair.deliver_to_client(&d);
    }
    for d in pair.drain_client() {
        pair.deliver_to_server(&d);
    }
    for d in pair.drain_server() {
        pair.deliver_to_client(&d);
    }
    for d in pair.drain_client() {
        pair.deliver_to_server(&d);
    }

    // The server is established and emitted flight 6; drop it.
    assert!(pair.server.is_established(&pair.caddr));
    let f6_initial = pair.drain_server();
    let f6_hdrs: Vec<RecHdr> = f6_initial.iter().flat_map(|d| parse_records(d, 0)).collect();
    assert!(
        f6_hdrs.iter().any(|r| r.ctype == CT_CCS),
        "flight 6 starts with ChangeCipherSpec: {:?}",
        f6_hdrs
    );
    assert!(!pair.client.is_established(&pair.saddr));

    // The client never saw flight 6 and retransmits flight 5.
    pair.advance(Duration::from_millis(600));
    let f5_again = pair.drain_client();
    assert!(
        handshake_types(&f5_again, 0).contains(&CLIENT_KEY_EXCHANGE),
        "client must retransmit flight 5"
    );
    for d in f5_again {
        pair.deliver_to_server(&d);
    }

    // The server answers from its retained terminal flight: identical
    // epoch/type/message_seq triples, strictly higher record sequences.
    let f6_resent = pair.drain_server();
    let f6_resent_hdrs: Vec<RecHdr> =
        f6_resent.iter().flat_map(|d| parse_records(d, 0)).collect();
    assert_retransmission(&f6_hdrs, &f6_resent_hdrs);

    for d in f6_resent {
        pair.deliver_to_client(&d);
    }
    pair.settle();
    assert!(pair.both_established());
}

#[test]
fn dropped_finished_exhausts_server_retransmissions() {
    // The client's Finished (the only epoch-1 record of flight 5) never
    // arrives. The server keeps retransmitting flight 4 with exponential
    // backoff and gives up after max_retransmissions+1 expiries:
    // 400 + 800 + 1600 ms ≈ T0·2^(max+1). The slot is released and no
    // alert is sent.
    let mut pair = Pair::new_psk(|c| c, |s| s);
    let capacity_before = pair.server.remaining_capacity();
    pair.connect();

    for d in pair.drain_client() {
        pair.deliver_to_server(&d);
    }
    for d in pair.drain_server() {
        pair.deliver_to_client(&d);
    }
    for d in pair.drain_client() {
        pair.deliver_to_server(&d);
    }
    for d in pair.drain_server() {
        pair.deliver_to_client(&d);
    }

    // Flight 5 minus every epoch-1 record (the Finished).
    let flight5 = pair.drain_client();
    for d in &flight5 {
        for record in split_records(d, 0) {
            let hdr = parse_records(&record, 0)[0];
            if hdr.epoch == 0 {
                pair.deliver_to_server(&record);
            }
        }
    }

    // Walk virtual time forward; the server must fail between 2.8 s
    // (sum of backoffs, minus jitter) and its overall deadline.
    let mut failed_at = None;
    for step in 0..60 {
        pair.now += Duration::from_millis(100);
        let now = pair.now;
        pair.server.handle_timeout(now).unwrap();
        let _ = drain(&mut pair.server, now, &mut pair.server_events);
        if !failure_reasons(&pair.server_events).is_empty() {
            failed_at = Some(step * 100 + 100);
            break;
        }
    }

    let failed_at = failed_at.expect("server must give up");
    assert!(
        (2_000..=4_200).contains(&failed_at),
        "retransmission exhaustion expected around 2.8s, got {} ms",
        failed_at
    );
    assert!(failure_reasons(&pair.server_events)
        .iter()
        .any(|r| r.contains("timeout")));
    assert_eq!(pair.server.remaining_capacity(), capacity_before);

    // Timeouts are local: the server must not have sent an alert.
    let alerts: Vec<RecHdr> = pair
        .s2c_log
        .iter()
        .flat_map(|d| parse_records(d, 0))
        .filter(|r| r.ctype == CT_ALERT)
        .collect();
    assert!(alerts.is_empty(), "no alert on retransmission exhaustion");
}

#[test]
fn duplicate_flight_triggers_a_single_resend_per_datagram() {
    let mut pair = Pair::new_psk(|c| c, |s| s);
    pair.connect();

    for d in pair.drain_client() {
        pair.deliver_to_server(&d);
    }
    for d in pair.drain_server() {
        pair.deliver_to_client(&d);
    }
    let cookie_hello = pair.drain_client();
    for d in &cookie_hello {
        pair.deliver_to_server(d);
    }
    let f4_first = pair.drain_server();

    // The same cookie-bearing ClientHello again (e.g. our flight was lost):
    // the server must answer with a resend of flight 4, once.
    for d in &cookie_hello {
        pair.deliver_to_server(d);
    }
    let f4_again = pair.drain_server();

    let first: Vec<RecHdr> = f4_first.iter().flat_map(|d| parse_records(d, 0)).collect();
    let again: Vec<RecHdr> = f4_again.iter().flat_map(|d| parse_records(d, 0)).collect();
    assert_retransmission(&first, &again);
}
