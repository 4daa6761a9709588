//! Shared helpers for the endpoint integration tests.
//!
//! No `#[test]` functions here; other test files pull this in via
//! `mod common;`.

#![allow(unused)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use fefd::{
    CidGenerator, ClientAuth, Config, ConfigBuilder, Endpoint, Event, InMemorySessionCache,
    InsecureAcceptAll, Output, SingleKeyPskStore,
};

pub const PSK_IDENTITY: &[u8] = b"device-1";
pub const PSK_KEY: &[u8] = b"sesame-sesame";

/// Handshake message types (RFC 5246 / 6347).
pub const CLIENT_HELLO: u8 = 1;
pub const SERVER_HELLO: u8 = 2;
pub const HELLO_VERIFY_REQUEST: u8 = 3;
pub const CERTIFICATE: u8 = 11;
pub const SERVER_KEY_EXCHANGE: u8 = 12;
pub const SERVER_HELLO_DONE: u8 = 14;
pub const CLIENT_KEY_EXCHANGE: u8 = 16;
pub const FINISHED: u8 = 20;

/// Record content types.
pub const CT_CCS: u8 = 20;
pub const CT_ALERT: u8 = 21;
pub const CT_HANDSHAKE: u8 = 22;
pub const CT_APPDATA: u8 = 23;
pub const CT_CID: u8 = 25;

/// Parsed DTLS record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecHdr {
    pub ctype: u8,
    pub epoch: u16,
    pub seq: u64,
    /// Handshake message type, when the record is plaintext handshake.
    pub hs_type: Option<u8>,
    /// Handshake message_seq, when the record is plaintext handshake.
    pub msg_seq: Option<u16>,
}

/// Header length of a record at `i`, given the CID length in use.
fn header_len(datagram: &[u8], i: usize, cid_len: usize) -> usize {
    if datagram[i] == CT_CID {
        13 + cid_len
    } else {
        13
    }
}

fn record_payload_len(datagram: &[u8], i: usize, cid_len: usize) -> usize {
    let at = if datagram[i] == CT_CID { 11 + cid_len } else { 11 };
    u16::from_be_bytes([datagram[i + at], datagram[i + at + 1]]) as usize
}

/// Parse record headers from a datagram.
pub fn parse_records(datagram: &[u8], cid_len: usize) -> Vec<RecHdr> {
    let mut out = Vec::new();
    let mut i = 0usize;
    while i + 13 <= datagram.len() {
        let ctype = datagram[i];
        let epoch = u16::from_be_bytes([datagram[i + 3], datagram[i + 4]]);
        let seq = u64::from_be_bytes([
            0,
            0,
            datagram[i + 5],
            datagram[i + 6],
            datagram[i + 7],
            datagram[i + 8],
            datagram[i + 9],
            datagram[i + 10],
        ]);
        let hdr = header_len(datagram, i, cid_len);
        let len = record_payload_len(datagram, i, cid_len);

        let (hs_type, msg_seq) = if ctype == CT_HANDSHAKE && epoch == 0 && len >= 12 {
            let body = &datagram[i + hdr..];
            (
                Some(body[0]),
                Some(u16::from_be_bytes([body[4], body[5]])),
            )
        } else {
            (None, None)
        };

        out.push(RecHdr {
            ctype,
            epoch,
            seq,
            hs_type,
            msg_seq,
        });
        i += hdr + len;
    }
    out
}

/// Split a datagram into its raw records.
pub fn split_records(datagram: &[u8], cid_len: usize) -> Vec<Vec<u8>> {
    let mut out = Vec::new();
    let mut i = 0usize;
    while i + 13 <= datagram.len() {
        let total = header_len(datagram, i, cid_len) + record_payload_len(datagram, i, cid_len);
        out.push(datagram[i..i + total].to_vec());
        i += total;
    }
    out
}

/// All plaintext handshake message types seen in a set of datagrams.
pub fn handshake_types(datagrams: &[Vec<u8>], cid_len: usize) -> Vec<u8> {
    datagrams
        .iter()
        .flat_map(|d| parse_records(d, cid_len))
        .filter_map(|r| r.hs_type)
        .collect()
}

/// Drain one endpoint: collect datagrams and events until it asks for a
/// future timeout. Arms timers on demand.
pub fn drain(
    endpoint: &mut Endpoint,
    now: Instant,
    events: &mut Vec<Event>,
) -> Vec<(SocketAddr, Vec<u8>)> {
    let mut out = Vec::new();
    for _ in 0..200 {
        match endpoint.poll_output(now) {
            Output::Transmit(t) => out.push((t.destination, t.datagram.to_vec())),
            Output::Event(e) => events.push(e),
            Output::Timeout(t) => {
                if t <= now {
                    endpoint.handle_timeout(now).unwrap();
                } else {
                    return out;
                }
            }
        }
    }
    panic!("endpoint did not settle");
}

/// A client and a server endpoint driven in lockstep over a virtual wire.
pub struct Pair {
    pub client: Endpoint,
    pub server: Endpoint,
    pub caddr: SocketAddr,
    pub saddr: SocketAddr,
    pub now: Instant,
    pub client_events: Vec<Event>,
    pub server_events: Vec<Event>,
    /// Wire log of delivered datagrams.
    pub c2s_log: Vec<Vec<u8>>,
    pub s2c_log: Vec<Vec<u8>>,
}

pub fn base_config() -> ConfigBuilder {
    Config::builder()
        .retransmission_timeout(Duration::from_millis(400))
        .max_retransmissions(2)
        .handshake_timeout(Duration::from_secs(20))
}

impl Pair {
    /// PSK-only endpoints. `tune_client`/`tune_server` adjust the configs.
    pub fn new_psk(
        tune_client: impl FnOnce(ConfigBuilder) -> ConfigBuilder,
        tune_server: impl FnOnce(ConfigBuilder) -> ConfigBuilder,
    ) -> Pair {
        let client_config = Arc::new(tune_client(base_config().rng_seed(11)).build().unwrap());
        let server_config = Arc::new(tune_server(base_config().rng_seed(22)).build().unwrap());

        let mut client = Endpoint::new(client_config);
        client.set_psk_store(Arc::new(SingleKeyPskStore::new(PSK_IDENTITY, PSK_KEY)));

        let mut server = Endpoint::new(server_config);
        server.set_psk_store(Arc::new(SingleKeyPskStore::new(PSK_IDENTITY, PSK_KEY)));
        server.set_session_cache(Arc::new(InMemorySessionCache::new()));

        Pair {
            client,
            server,
            caddr: "127.0.0.1:4444".parse().unwrap(),
            saddr: "127.0.0.1:5684".parse().unwrap(),
            now: Instant::now(),
            client_events: Vec::new(),
            server_events: Vec::new(),
            c2s_log: Vec::new(),
            s2c_log: Vec::new(),
        }
    }

    /// Certificate endpoints (self-signed, accept-all verifier).
    #[cfg(feature = "rcgen")]
    pub fn new_ecdsa(
        tune_client: impl FnOnce(ConfigBuilder) -> ConfigBuilder,
        tune_server: impl FnOnce(ConfigBuilder) -> ConfigBuilder,
    ) -> Pair {
        use fefd::certificate::generate_self_signed_certificate;
        use fefd::Credentials;

        let client_config = Arc::new(tune_client(base_config().rng_seed(11)).build().unwrap());
        let server_config = Arc::new(tune_server(base_config().rng_seed(22)).build().unwrap());

        let client_cert = generate_self_signed_certificate("client").unwrap();
        let server_cert = generate_self_signed_certificate("server").unwrap();

        let mut client = Endpoint::new(client_config);
        client.set_certificate_verifier(Arc::new(InsecureAcceptAll));
        client.set_credentials(Arc::new(
            Credentials::new(vec![client_cert.certificate.clone()], &client_cert.private_key)
                .unwrap(),
        ));

        let mut server = Endpoint::new(server_config);
        server.set_certificate_verifier(Arc::new(InsecureAcceptAll));
        server.set_session_cache(Arc::new(InMemorySessionCache::new()));
        server.set_credentials(Arc::new(
            Credentials::new(vec![server_cert.certificate.clone()], &server_cert.private_key)
                .unwrap(),
        ));

        Pair {
            client,
            server,
            caddr: "127.0.0.1:4444".parse().unwrap(),
            saddr: "127.0.0.1:5684".parse().unwrap(),
            now: Instant::now(),
            client_events: Vec::new(),
            server_events: Vec::new(),
            c2s_log: Vec::new(),
            s2c_log: Vec::new(),
        }
    }

    pub fn connect(&mut self) {
        self.client
            .connect(self.now, self.saddr, None)
            .expect("connect");
    }

    pub fn drain_client(&mut self) -> Vec<Vec<u8>> {
        drain(&mut self.client, self.now, &mut self.client_events)
            .into_iter()
            .map(|(_, d)| d)
            .collect()
    }

    pub fn drain_server(&mut self) -> Vec<Vec<u8>> {
        drain(&mut self.server, self.now, &mut self.server_events)
            .into_iter()
            .map(|(_, d)| d)
            .collect()
    }

    pub fn deliver_to_server(&mut self, datagram: &[u8]) {
        self.c2s_log.push(datagram.to_vec());
        self.server
            .handle_datagram(self.now, self.caddr, datagram)
            .expect("server handle_datagram");
    }

    pub fn deliver_to_client(&mut self, datagram: &[u8]) {
        self.s2c_log.push(datagram.to_vec());
        self.client
            .handle_datagram(self.now, self.saddr, datagram)
            .expect("client handle_datagram");
    }

    /// One lockstep round; returns how many datagrams moved.
    pub fn flush(&mut self) -> usize {
        let mut moved = 0;
        for d in self.drain_client() {
            self.deliver_to_server(&d);
            moved += 1;
        }
        for d in self.drain_server() {
            self.deliver_to_client(&d);
            moved += 1;
        }
        moved
    }

    /// Run the wire until quiescent.
    pub fn settle(&mut self) {
        for _ in 0..50 {
            if self.flush() == 0 {
                return;
            }
        }
        panic!("wire did not settle");
    }

    /// Advance the virtual clock and fire timers.
    pub fn advance(&mut self, by: Duration) {
        self.now += by;
        self.client.handle_timeout(self.now).unwrap();
        self.server.handle_timeout(self.now).unwrap();
    }

    pub fn both_established(&self) -> bool {
        self.client.is_established(&self.saddr) && self.server.is_established(&self.caddr)
    }

    /// connect + settle, asserting both sides establish.
    pub fn run_handshake(&mut self) {
        self.connect();
        self.settle();
        assert!(
            self.both_established(),
            "handshake did not establish: client events {:?}, server events {:?}",
            self.client_events,
            self.server_events
        );
    }
}

pub fn count_events(events: &[Event], f: impl Fn(&Event) -> bool) -> usize {
    events.iter().filter(|e| f(e)).count()
}

pub fn has_established(events: &[Event]) -> bool {
    events
        .iter()
        .any(|e| matches!(e, Event::SessionEstablished { .. }))
}

pub fn failure_reasons(events: &[Event]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::SessionFailed { reason, .. } => Some(reason.to_string()),
            _ => None,
        })
        .collect()
}
