//! The endpoint: datagram demultiplexer, cookie exchange, timers, events.
//!
//! Sans-IO: the embedding drives it with `handle_datagram`, `poll_output`
//! and `handle_timeout`. Records are routed to connections by CID when the
//! record type says so, otherwise by source address. The first ClientHello
//! from an unknown peer is answered statelessly with a HelloVerifyRequest;
//! only a valid cookie allocates a connection slot.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::Rng;

use crate::config::Config;
use crate::crypto::CookieGenerator;
use crate::engine::Engine;
use crate::error::Error;
use crate::handshake::{ClientHandshaker, Handshaker, ServerHandshaker, Services};
use crate::message::{
    Alert, ClientHello, ConnectionId, ContentType, DtlsRecord, HandshakeHeader,
    HelloVerifyRequest, MessageType, ProtocolVersion, Sequence,
};
use crate::service::{CertificateVerifier, PskStore, RawKeyVerifier, SessionCache};
use crate::session::{PeerIdentity, SessionTicket};
use crate::store::{Connection, ConnectionStore};

/// A datagram to put on the wire.
#[derive(Debug)]
pub struct Transmit<'a> {
    pub destination: SocketAddr,
    pub datagram: &'a [u8],
}

/// Events the endpoint emits towards the application.
#[derive(Debug)]
pub enum Event {
    HandshakeStarted {
        peer: SocketAddr,
    },
    SessionEstablished {
        peer: SocketAddr,
        peer_identity: PeerIdentity,
    },
    SessionFailed {
        peer: SocketAddr,
        reason: Error,
    },
    ApplicationData {
        peer: SocketAddr,
        data: Vec<u8>,
    },
}

/// Output of one `poll_output` call.
#[derive(Debug)]
pub enum Output<'a> {
    /// Send this datagram.
    Transmit(Transmit<'a>),
    /// Nothing to send; call `handle_timeout` at (or after) this instant.
    Timeout(Instant),
    /// An application-visible event.
    Event(Event),
}

pub struct Endpoint {
    config: Arc<Config>,
    services: Services,
    store: ConnectionStore,
    cookie: CookieGenerator,
    rng: StdRng,
    events: VecDeque<Event>,
    /// Datagrams not tied to a live connection (HVRs, parting alerts).
    stateless_tx: VecDeque<(SocketAddr, Vec<u8>)>,
    /// Scratch handed out by poll_output.
    hold: Vec<u8>,
}

impl Endpoint {
    pub fn new(config: Arc<Config>) -> Self {
        let mut rng = config.new_rng();
        let cookie = CookieGenerator::new(&mut rng);
        let store = ConnectionStore::new(config.max_connections(), config.stale_session_timeout());

        Endpoint {
            config,
            services: Services::default(),
            store,
            cookie,
            rng,
            events: VecDeque::new(),
            stateless_tx: VecDeque::new(),
            hold: Vec::new(),
        }
    }

    pub fn set_credentials(&mut self, credentials: Arc<crate::handshake::Credentials>) {
        self.services.credentials = Some(credentials);
    }

    pub fn set_psk_store(&mut self, store: Arc<dyn PskStore>) {
        self.services.psk_store = Some(store);
    }

    pub fn set_certificate_verifier(&mut self, verifier: Arc<dyn CertificateVerifier>) {
        self.services.certificate_verifier = Some(verifier);
    }

    pub fn set_raw_key_verifier(&mut self, verifier: Arc<dyn RawKeyVerifier>) {
        self.services.raw_key_verifier = Some(verifier);
    }

    pub fn set_session_cache(&mut self, cache: Arc<dyn SessionCache>) {
        self.services.session_cache = Some(cache);
    }

    /// Remaining connection-store capacity.
    pub fn remaining_capacity(&self) -> usize {
        self.store.remaining_capacity()
    }

    /// Whether an established session exists with `peer`.
    pub fn is_established(&self, peer: &SocketAddr) -> bool {
        self.store
            .get_by_address(peer)
            .and_then(|i| self.store.get(i))
            .map(|c| c.is_established())
            .unwrap_or(false)
    }

    /// Resumption snapshot of the established session with `peer`.
    pub fn session_ticket(&self, peer: &SocketAddr) -> Option<SessionTicket> {
        let index = self.store.get_by_address(peer)?;
        let session = self.store.get(index)?.session.as_ref()?;
        session.is_resumable().then(|| session.ticket())
    }

    // --- client entry points ---------------------------------------------

    /// Start a full handshake towards `remote`.
    pub fn connect(
        &mut self,
        now: Instant,
        remote: SocketAddr,
        server_name: Option<&str>,
    ) -> Result<(), Error> {
        self.start_client(now, remote, server_name, None)
    }

    /// Start an abbreviated handshake resuming `ticket`.
    pub fn resume(
        &mut self,
        now: Instant,
        remote: SocketAddr,
        ticket: SessionTicket,
    ) -> Result<(), Error> {
        let server_name = ticket.server_name.clone();
        self.start_client(now, remote, server_name.as_deref(), Some(ticket))
    }

    fn start_client(
        &mut self,
        now: Instant,
        remote: SocketAddr,
        server_name: Option<&str>,
        ticket: Option<SessionTicket>,
    ) -> Result<(), Error> {
        if self.store.get_by_address(&remote).is_some() {
            return Err(Error::ConfigError(format!(
                "connection to {} already exists",
                remote
            )));
        }

        let local_cid = self.generate_local_cid();
        let mut engine = Engine::new(Arc::clone(&self.config), true, local_cid);
        let handshaker = Handshaker::Client(Box::new(ClientHandshaker::new(
            self.services.clone(),
            server_name.map(|s| s.to_string()),
            ticket,
            &mut engine,
        )));

        let connection = Connection::new(remote, engine, handshaker, now);
        let index = self.store.insert(connection, now)?;

        self.events.push_back(Event::HandshakeStarted { peer: remote });
        self.drive_connection(index, now, None);
        Ok(())
    }

    /// Send application data over the established session with `remote`.
    pub fn send(&mut self, now: Instant, remote: SocketAddr, data: &[u8]) -> Result<(), Error> {
        let index = self
            .store
            .get_by_address(&remote)
            .ok_or(Error::NotConnected)?;
        let conn = self.store.get_mut(index).ok_or(Error::NotConnected)?;
        if !conn.is_established() {
            return Err(Error::NotConnected);
        }
        conn.engine.send_application_data(data)?;
        self.store.touch(index, now);
        Ok(())
    }

    /// Close the connection with `remote`, sending close_notify best effort.
    pub fn close(&mut self, _now: Instant, remote: SocketAddr) {
        let Some(index) = self.store.get_by_address(&remote) else {
            return;
        };
        let Some(mut conn) = self.store.remove(index) else {
            return;
        };
        let _ = conn.engine.send_alert(Alert::close_notify());
        self.flush_connection_tx(&mut conn);
        self.forget_cached_session(&conn);
    }

    // --- inbound ---------------------------------------------------------

    pub fn handle_datagram(
        &mut self,
        now: Instant,
        from: SocketAddr,
        datagram: &[u8],
    ) -> Result<(), Error> {
        if datagram.is_empty() {
            return Ok(());
        }

        // CID routing first: the record carries the connection identity and
        // survives a NAT rebinding.
        if let Some(cid) = self.peek_cid(datagram) {
            if let Some(index) = self.store.get_by_cid(&cid) {
                self.store.rebind(index, from);
                self.store.touch(index, now);
                self.drive_connection(index, now, Some(datagram));
                return Ok(());
            }
            trace!("CID record for unknown connection; dropping");
            return Ok(());
        }

        if let Some(index) = self.store.get_by_address(&from) {
            // A cookie-verified ClientHello from a known address preempts
            // the existing connection — established or still mid-handshake
            // (a rebooted peer that starts over). Only the cookie-verified
            // path may preempt; a retransmission of the hello the current
            // handshaker was created from (same random) is not a new
            // attempt and takes the normal path, where it triggers a
            // flight resend.
            if self.should_preempt(index, &from, datagram) {
                debug!(
                    "Verified ClientHello preempts existing connection {}",
                    from
                );
                self.store.remove(index);
                self.accept_new_peer(now, from, datagram);
                return Ok(());
            }

            self.store.touch(index, now);
            self.drive_connection(index, now, Some(datagram));
            return Ok(());
        }

        self.accept_new_peer(now, from, datagram);
        Ok(())
    }

    fn should_preempt(&self, index: usize, from: &SocketAddr, datagram: &[u8]) -> bool {
        let Some(conn) = self.store.get(index) else {
            return false;
        };
        let Some((hello, _)) = parse_leading_client_hello(datagram) else {
            return false;
        };
        if !self.cookie.verify(from, &hello) {
            return false;
        }

        match conn.hello_random {
            // In-progress or established server connection: a different
            // hello random means a fresh handshake attempt.
            Some(random) => random != hello.random,
            // Client-role connection: a ClientHello cannot replace it.
            None => false,
        }
    }

    /// Extract the CID from a leading tls12_cid record, if routing by CID
    /// is in use.
    fn peek_cid(&self, datagram: &[u8]) -> Option<ConnectionId> {
        let cid_len = self.config.connection_id_generator().cid_length();
        if cid_len == 0 {
            return None;
        }
        if ContentType::from_u8(datagram[0]) != ContentType::Tls12Cid {
            return None;
        }
        let bytes = datagram.get(11..11 + cid_len)?;
        ConnectionId::try_new(bytes).ok()
    }

    /// A datagram from an unknown peer: run the stateless cookie exchange.
    /// No connection state is allocated until the cookie verifies.
    fn accept_new_peer(&mut self, now: Instant, from: SocketAddr, datagram: &[u8]) {
        let Some((hello, message_seq)) = parse_leading_client_hello(datagram) else {
            trace!("Unknown peer {} did not lead with a ClientHello", from);
            return;
        };

        if !self.cookie.verify(&from, &hello) {
            // Cookie-less (or stale-cookie) hello: answer statelessly.
            let cookie = self.cookie.generate(&from, &hello);
            let hvr = build_hello_verify_datagram(cookie, message_seq);
            debug!("Sending HelloVerifyRequest to {}", from);
            self.stateless_tx.push_back((from, hvr));
            return;
        }

        // Cookie verified: allocate the connection and replay the datagram
        // into it. Allocation failure is silent (DoS resilience).
        let local_cid = self.generate_local_cid();
        let mut engine = Engine::new(Arc::clone(&self.config), false, local_cid);
        let handshaker = Handshaker::Server(Box::new(ServerHandshaker::new(
            self.services.clone(),
            message_seq,
            &mut engine,
        )));
        let mut connection = Connection::new(from, engine, handshaker, now);
        // Remember which hello this connection answers, so a later verified
        // hello with a fresh random can preempt it.
        connection.hello_random = Some(hello.random);

        match self.store.insert(connection, now) {
            Ok(index) => {
                self.events.push_back(Event::HandshakeStarted { peer: from });
                self.drive_connection(index, now, Some(datagram));
            }
            Err(e) => {
                debug!("Refusing handshake from {}: {}", from, e);
            }
        }
    }

    fn generate_local_cid(&mut self) -> ConnectionId {
        let len = self.config.connection_id_generator().cid_length();
        if len == 0 {
            return ConnectionId::empty();
        }
        // Local CIDs are unique within the store at any time.
        loop {
            let mut bytes = vec![0u8; len];
            self.rng.fill(bytes.as_mut_slice());
            let cid = ConnectionId::try_new(&bytes).expect("generator length validated");
            if self.store.get_by_cid(&cid).is_none() {
                return cid;
            }
        }
    }

    // --- connection driving ----------------------------------------------

    fn drive_connection(&mut self, index: usize, now: Instant, datagram: Option<&[u8]>) {
        let result = self.drive_connection_inner(index, now, datagram);
        if let Err(reason) = result {
            self.fail_connection(index, reason);
        }
    }

    fn drive_connection_inner(
        &mut self,
        index: usize,
        now: Instant,
        datagram: Option<&[u8]>,
    ) -> Result<(), Error> {
        let Some(conn) = self.store.get_mut(index) else {
            return Ok(());
        };

        if let Some(datagram) = datagram {
            conn.engine.parse_datagram(datagram)?;
        }

        if let Some(handshaker) = conn.handshaker.as_mut() {
            if let Some(session) = handshaker.process(&mut conn.engine)? {
                let peer_identity = session.peer_identity.clone();
                conn.session = Some(session);
                // The handshaker is discarded on success.
                conn.handshaker = None;
                let peer = conn.peer;
                self.events
                    .push_back(Event::SessionEstablished { peer, peer_identity });
            }
        } else if conn.engine.peek_message_type().is_some() {
            // Renegotiation is out of scope.
            return Err(Error::UnexpectedMessage(
                "handshake message on established session".to_string(),
            ));
        }

        let Some(conn) = self.store.get_mut(index) else {
            return Ok(());
        };
        let peer = conn.peer;
        while let Some(data) = conn.engine.pop_app_data() {
            self.events.push_back(Event::ApplicationData { peer, data });
        }

        // Arm (and service) the timers.
        let Some(conn) = self.store.get_mut(index) else {
            return Ok(());
        };
        conn.engine.handle_timeout(now)?;

        Ok(())
    }

    fn fail_connection(&mut self, index: usize, reason: Error) {
        let Some(mut conn) = self.store.remove(index) else {
            return;
        };
        let peer = conn.peer;

        // Best effort fatal alert; never for local timeouts or resource
        // exhaustion, and not in response to the peer's own alert.
        if let Some(description) = reason.alert() {
            let _ = conn.engine.send_alert(Alert::fatal(description));
        }
        self.flush_connection_tx(&mut conn);
        self.forget_cached_session(&conn);

        warn!("Connection with {} failed: {}", peer, reason);
        self.events.push_back(Event::SessionFailed { peer, reason });
    }

    fn flush_connection_tx(&mut self, conn: &mut Connection) {
        while let Some(datagram) = conn.engine.pop_datagram() {
            self.stateless_tx.push_back((conn.peer, datagram));
        }
    }

    /// A fatal failure invalidates the cached session.
    fn forget_cached_session(&self, conn: &Connection) {
        if let (Some(session), Some(cache)) = (&conn.session, &self.services.session_cache) {
            if session.is_resumable() {
                cache.remove(&session.session_id);
            }
        }
    }

    // --- timers ----------------------------------------------------------

    pub fn handle_timeout(&mut self, now: Instant) -> Result<(), Error> {
        for index in self.store.indices() {
            let Some(conn) = self.store.get_mut(index) else {
                continue;
            };
            match conn.engine.handle_timeout(now) {
                Ok(()) => {}
                Err(reason) => self.fail_connection(index, reason),
            }
        }

        for conn in self.store.sweep_stale(now) {
            self.events.push_back(Event::SessionFailed {
                peer: conn.peer,
                reason: Error::Timeout("stale session evicted"),
            });
        }

        Ok(())
    }

    // --- output ----------------------------------------------------------

    pub fn poll_output(&mut self, now: Instant) -> Output<'_> {
        if let Some(event) = self.events.pop_front() {
            return Output::Event(event);
        }

        if let Some((destination, datagram)) = self.stateless_tx.pop_front() {
            self.hold = datagram;
            return Output::Transmit(Transmit {
                destination,
                datagram: &self.hold,
            });
        }

        for index in self.store.indices() {
            let Some(conn) = self.store.get_mut(index) else {
                continue;
            };
            if let Some(datagram) = conn.engine.pop_datagram() {
                let destination = conn.peer;
                self.hold = datagram;
                return Output::Transmit(Transmit {
                    destination,
                    datagram: &self.hold,
                });
            }
        }

        // Ask the driver to arm timers that are not armed yet.
        let mut wants_arm = false;
        let mut next: Option<Instant> = None;
        for index in self.store.indices() {
            let Some(conn) = self.store.get(index) else {
                continue;
            };
            if conn.engine.wants_timeout_arm() {
                wants_arm = true;
            }
            if let Some(t) = conn.engine.next_timeout() {
                next = Some(match next {
                    Some(n) => n.min(t),
                    None => t,
                });
            }
        }

        if wants_arm {
            return Output::Timeout(now);
        }

        const IDLE_WAKEUP: Duration = Duration::from_secs(60);
        Output::Timeout(next.unwrap_or(now + IDLE_WAKEUP))
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("connections", &self.store.len())
            .field("events", &self.events.len())
            .finish_non_exhaustive()
    }
}

/// Parse a whole ClientHello out of the leading record of a datagram,
/// without touching any connection state.
fn parse_leading_client_hello(datagram: &[u8]) -> Option<(ClientHello, u16)> {
    let (_, record) = DtlsRecord::parse(datagram, 0, 0).ok()?;
    if record.content_type != ContentType::Handshake || record.sequence.epoch != 0 {
        return None;
    }

    let fragment = record.fragment(datagram);
    let (rest, header) = HandshakeHeader::parse(fragment).ok()?;
    if header.msg_type != MessageType::ClientHello || !header.is_whole_message() {
        return None;
    }
    let body = rest.get(..header.fragment_length as usize)?;
    let (_, hello) = ClientHello::parse(body).ok()?;
    Some((hello, header.message_seq))
}

/// Serialize a stateless HelloVerifyRequest answering a cookie-less
/// ClientHello. The record uses epoch 0, sequence 0; the handshake message
/// echoes the hello's message_seq (RFC 6347 §4.2.2).
fn build_hello_verify_datagram(cookie: crate::message::Cookie, message_seq: u16) -> Vec<u8> {
    let hvr = HelloVerifyRequest::new(ProtocolVersion::DTLS1_2, cookie);
    let mut body = Vec::new();
    hvr.serialize(&mut body);

    let header = HandshakeHeader {
        msg_type: MessageType::HelloVerifyRequest,
        length: body.len() as u32,
        message_seq,
        fragment_offset: 0,
        fragment_length: body.len() as u32,
    };
    let mut fragment = Vec::new();
    header.serialize(&mut fragment);
    fragment.extend_from_slice(&body);

    let record = DtlsRecord {
        content_type: ContentType::Handshake,
        version: ProtocolVersion::DTLS1_2,
        sequence: Sequence::new(0),
        cid: ConnectionId::empty(),
        length: fragment.len() as u16,
        fragment_range: 0..fragment.len(),
    };
    let mut out = Vec::new();
    record.serialize(&fragment, &mut out);
    out
}
