//! Client handshake state machine (full and abbreviated).

use arrayvec::ArrayVec;
use rand::Rng;
use zeroize::Zeroizing;

use super::Services;
use crate::crypto::{
    calculate_master_secret, psk_premaster_secret, spki_from_certificate, verify_with_spki,
    EcdheKeyExchange, SessionKeys, MASTER_SECRET_LEN,
};
use crate::engine::Engine;
use crate::error::Error;
use crate::message::{
    ec_point_formats_extension, find_extension, Body, CertTypeListExtension, CertificateMessage,
    CertificateType, CertificateVerify, CipherSuite, ClientHello, ClientKeyExchange, ConnectionId,
    ConnectionIdExtension, Cookie, DigitallySigned, EcdheParams, ExtensionType, Finished,
    HelloVerifyRequest, MaxFragmentLengthExtension, MessageType, ParseContext, ProtocolVersion,
    PskIdentity, Random, ServerHello, ServerKeyExchange, ServerNameExtension, SessionId,
    SignatureAlgorithmsExtension, SupportedGroupsExtension,
};
use crate::reassembly::CompleteMessage;
use crate::session::{PeerIdentity, Session, SessionTicket};

/// Receive progress through the server's hello flight (strictly ordered).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum ServerFlightRank {
    Start,
    Certificate,
    KeyExchange,
    CertificateRequest,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClientState {
    /// Compose and send ClientHello (flight 1, or 3 after a cookie).
    SendClientHello,
    /// Waiting for ServerHello; an initial HelloVerifyRequest is legal once.
    AwaitServerHello { can_hello_verify: bool },
    /// Full handshake: collect Certificate/SKE/CertificateRequest until
    /// ServerHelloDone.
    AwaitServerFlight,
    /// Waiting for the server's CHANGE_CIPHER_SPEC + Finished.
    AwaitServerFinished { resumed: bool },
    Established,
}

pub struct ClientHandshaker {
    state: ClientState,
    services: Services,

    random: Random,
    server_random: Option<Random>,
    /// Session id we offered (resumption) or received from the server.
    session_id: SessionId,
    resume_ticket: Option<SessionTicket>,
    cookie: Cookie,
    server_name: Option<String>,

    offered_suites: Vec<CipherSuite>,

    /// Server certificate representation in use.
    trust_cert_type: CertificateType,
    /// Own certificate representation in use.
    identity_cert_type: CertificateType,

    /// Server identity material collected from its Certificate.
    peer_chain: Vec<Vec<u8>>,
    peer_spki: Vec<u8>,

    kx_params: Option<EcdheParams>,
    certificate_requested: bool,
    sent_client_certificate: bool,
    /// Set when the server accepted our offered session id.
    resumed_session: bool,

    server_flight_rank: ServerFlightRank,

    negotiated_max_fragment: Option<usize>,
    /// CID the server asked us to write (RFC 9146).
    peer_cid: ConnectionId,

    master_secret: Option<Zeroizing<[u8; MASTER_SECRET_LEN]>>,
}

impl ClientHandshaker {
    pub fn new(
        services: Services,
        server_name: Option<String>,
        resume: Option<SessionTicket>,
        engine: &mut Engine,
    ) -> Self {
        let mut random_bytes = [0u8; 32];
        engine.rng.fill(&mut random_bytes);

        let (session_id, offered_suites) = match &resume {
            Some(ticket) => {
                // The resumed suite goes first so the server can pick it.
                let mut suites = vec![ticket.cipher_suite];
                for s in engine.config().cipher_suites() {
                    if *s != ticket.cipher_suite {
                        suites.push(*s);
                    }
                }
                (ticket.session_id, suites)
            }
            None => (
                SessionId::empty(),
                engine.config().cipher_suites().to_vec(),
            ),
        };

        ClientHandshaker {
            state: ClientState::SendClientHello,
            services,
            random: Random::new(random_bytes),
            server_random: None,
            session_id,
            resume_ticket: resume,
            cookie: Cookie::empty(),
            server_name,
            offered_suites,
            trust_cert_type: CertificateType::X509,
            identity_cert_type: CertificateType::X509,
            peer_chain: Vec::new(),
            peer_spki: Vec::new(),
            kx_params: None,
            certificate_requested: false,
            sent_client_certificate: false,
            resumed_session: false,
            server_flight_rank: ServerFlightRank::Start,
            negotiated_max_fragment: None,
            peer_cid: ConnectionId::empty(),
            master_secret: None,
        }
    }

    pub fn process(&mut self, engine: &mut Engine) -> Result<Option<Session>, Error> {
        loop {
            let progressed = match self.state {
                ClientState::SendClientHello => {
                    self.send_client_hello(engine)?;
                    self.state = ClientState::AwaitServerHello {
                        can_hello_verify: true,
                    };
                    true
                }
                ClientState::AwaitServerHello { can_hello_verify } => {
                    self.await_server_hello(engine, can_hello_verify)?
                }
                ClientState::AwaitServerFlight => self.await_server_flight(engine)?,
                ClientState::AwaitServerFinished { resumed } => {
                    if self.await_server_finished(engine, resumed)? {
                        return Ok(Some(self.build_session(engine)?));
                    }
                    false
                }
                ClientState::Established => false,
            };

            if !progressed {
                return Ok(None);
            }
        }
    }

    fn parse_ctx(&self, engine: &Engine) -> ParseContext {
        ParseContext {
            cipher_suite: engine.cipher_suite(),
            peer_cert_type: self.trust_cert_type,
        }
    }

    fn offered_suites_vec(&self) -> ArrayVec<CipherSuite, 16> {
        let mut suites = ArrayVec::new();
        for s in self.offered_suites.iter().take(suites.capacity()) {
            let usable = self.services.supports_suite(*s, true);
            if usable {
                suites.push(*s);
            }
        }
        suites
    }

    fn send_client_hello(&mut self, engine: &mut Engine) -> Result<(), Error> {
        let flight_number = if self.cookie.is_empty() { 1 } else { 3 };
        engine.flight_begin(flight_number);

        let suites = self.offered_suites_vec();
        if suites.is_empty() {
            return Err(Error::HandshakeFailure(
                "no usable cipher suites for the configured services".to_string(),
            ));
        }
        // The ServerHello is checked against what actually went on the wire.
        self.offered_suites = suites.to_vec();

        let mut hello = ClientHello::new(
            ProtocolVersion::DTLS1_2,
            self.random,
            self.session_id,
            self.cookie,
            suites,
        );

        let config = engine.config();
        let any_ecc = hello.cipher_suites.iter().any(|s| s.is_ecc());
        let any_cert = hello
            .cipher_suites
            .iter()
            .any(|s| s.requires_server_certificate());

        if any_ecc {
            hello.extensions.push(
                SupportedGroupsExtension::new(config.supported_groups()).to_extension(),
            );
            hello.extensions.push(ec_point_formats_extension());
        }
        if any_cert {
            hello
                .extensions
                .push(SignatureAlgorithmsExtension::supported().to_extension());

            let trust = config.trust_certificate_types();
            if trust != [CertificateType::X509] {
                hello.extensions.push(
                    CertTypeListExtension::new(trust)
                        .to_list_extension(ExtensionType::ServerCertificateType),
                );
            }
            let identity = config.identity_certificate_types();
            if identity != [CertificateType::X509] {
                hello.extensions.push(
                    CertTypeListExtension::new(identity)
                        .to_list_extension(ExtensionType::ClientCertificateType),
                );
            }
        }
        if let Some(len) = config.max_fragment_length() {
            if let Some(mfl) = MaxFragmentLengthExtension::from_length(len) {
                hello.extensions.push(mfl.to_extension());
            }
        }
        if config.connection_id_generator().is_enabled() {
            hello
                .extensions
                .push(ConnectionIdExtension::new(*engine.local_cid()).to_extension());
        }
        if let Some(name) = &self.server_name {
            hello
                .extensions
                .push(ServerNameExtension::new(name).to_extension());
        }

        engine.create_handshake(MessageType::ClientHello, |body, _| {
            hello.serialize(body);
            Ok(())
        })
    }

    fn await_server_hello(
        &mut self,
        engine: &mut Engine,
        can_hello_verify: bool,
    ) -> Result<bool, Error> {
        let Some(msg_type) = engine.peek_message_type() else {
            return Ok(false);
        };

        match msg_type {
            MessageType::HelloVerifyRequest if can_hello_verify => {
                let msg = engine.next_message().expect("peeked");
                let (_, hvr) = HelloVerifyRequest::parse(&msg.body)
                    .map_err(Error::from)?;
                self.process_hello_verify(engine, hvr)?;
                Ok(true)
            }
            MessageType::ServerHello => {
                let msg = engine.next_message().expect("peeked");
                engine.transcript_append_incoming(&msg);
                let (_, sh) = ServerHello::parse(&msg.body).map_err(Error::from)?;
                self.process_server_hello(engine, sh)?;
                Ok(true)
            }
            other => Err(Error::UnexpectedMessage(format!(
                "{:?} while waiting for ServerHello",
                other
            ))),
        }
    }

    fn process_hello_verify(
        &mut self,
        engine: &mut Engine,
        hvr: HelloVerifyRequest,
    ) -> Result<(), Error> {
        debug!("HelloVerifyRequest received; repeating ClientHello with cookie");
        self.cookie = hvr.cookie;

        // Neither the first ClientHello nor the HVR enter the transcript.
        // The next ClientHello and ServerHello both carry message_seq 1,
        // which is where the send and receive counters already are.
        engine.reset_for_hello_verify(1);

        self.state = ClientState::SendClientHello;
        Ok(())
    }

    fn process_server_hello(&mut self, engine: &mut Engine, sh: ServerHello) -> Result<(), Error> {
        if !sh.server_version.is_at_least_dtls12() {
            return Err(Error::ProtocolVersion(format!(
                "server selected {:?}",
                sh.server_version
            )));
        }
        if !self.offered_suites.contains(&sh.cipher_suite) {
            return Err(Error::HandshakeFailure(format!(
                "server selected unoffered suite {:?}",
                sh.cipher_suite
            )));
        }
        if sh.compression_method != crate::message::CompressionMethod::Null {
            return Err(Error::HandshakeFailure(
                "server selected non-null compression".to_string(),
            ));
        }

        engine.set_cipher_suite(sh.cipher_suite);
        self.server_random = Some(sh.random);

        // Extension echoes.
        if let Some(ext) = find_extension(&sh.extensions, ExtensionType::MaxFragmentLength) {
            let (_, mfl) = MaxFragmentLengthExtension::parse(&ext.data).map_err(Error::from)?;
            let len = mfl
                .fragment_length()
                .ok_or_else(|| Error::DecodeError("bad max_fragment_length echo".to_string()))?;
            self.negotiated_max_fragment = Some(len);
            engine.set_negotiated_max_fragment(len);
        }
        if let Some(ext) = find_extension(&sh.extensions, ExtensionType::ConnectionId) {
            let (_, cid) = ConnectionIdExtension::parse(&ext.data).map_err(Error::from)?;
            self.peer_cid = cid.cid;
        }
        if let Some(ext) = find_extension(&sh.extensions, ExtensionType::ServerCertificateType) {
            let (_, selected) = CertTypeListExtension::parse_single(&ext.data).map_err(Error::from)?;
            self.trust_cert_type = selected;
        }
        if let Some(ext) = find_extension(&sh.extensions, ExtensionType::ClientCertificateType) {
            let (_, selected) = CertTypeListExtension::parse_single(&ext.data).map_err(Error::from)?;
            self.identity_cert_type = selected;
        }

        // Resumption is accepted iff the server echoes our offered id.
        let resumed = match &self.resume_ticket {
            Some(ticket) => !sh.session_id.is_empty() && sh.session_id == ticket.session_id,
            None => false,
        };

        if resumed {
            let ticket = self.resume_ticket.as_ref().expect("resumed implies ticket");
            if sh.cipher_suite != ticket.cipher_suite {
                return Err(Error::HandshakeFailure(
                    "resumed session with a different cipher suite".to_string(),
                ));
            }
            debug!("Server accepted resumption of {:?}", ticket.session_id);

            self.master_secret = Some(ticket.master_secret.clone());
            self.resumed_session = true;
            self.install_keys(engine)?;
            self.state = ClientState::AwaitServerFinished { resumed: true };
        } else {
            self.session_id = sh.session_id;
            self.state = ClientState::AwaitServerFlight;
        }

        Ok(())
    }

    fn await_server_flight(&mut self, engine: &mut Engine) -> Result<bool, Error> {
        let Some(msg_type) = engine.peek_message_type() else {
            return Ok(false);
        };

        let rank = match msg_type {
            MessageType::Certificate => ServerFlightRank::Certificate,
            MessageType::ServerKeyExchange => ServerFlightRank::KeyExchange,
            MessageType::CertificateRequest => ServerFlightRank::CertificateRequest,
            MessageType::ServerHelloDone => ServerFlightRank::Done,
            other => {
                return Err(Error::UnexpectedMessage(format!(
                    "{:?} inside the server hello flight",
                    other
                )));
            }
        };
        if rank <= self.server_flight_rank {
            return Err(Error::UnexpectedMessage(format!(
                "{:?} out of order in the server hello flight",
                msg_type
            )));
        }
        self.server_flight_rank = rank;

        let msg = engine.next_message().expect("peeked");
        engine.transcript_append_incoming(&msg);
        let ctx = self.parse_ctx(engine);
        let (_, body) = Body::parse(&msg.body, msg.msg_type, &ctx).map_err(Error::from)?;

        match body {
            Body::Certificate(cert) => self.process_server_certificate(engine, cert)?,
            Body::ServerKeyExchange(ske) => self.process_server_key_exchange(engine, ske)?,
            Body::CertificateRequest(_) => {
                let cert_suite = engine
                    .cipher_suite()
                    .map(|s| s.requires_server_certificate())
                    .unwrap_or(false);
                if !cert_suite {
                    return Err(Error::UnexpectedMessage(
                        "CertificateRequest under a PSK key exchange".to_string(),
                    ));
                }
                self.certificate_requested = true;
            }
            Body::ServerHelloDone => {
                self.send_client_flight(engine)?;
                self.state = ClientState::AwaitServerFinished { resumed: false };
            }
            _ => unreachable!("matched message type above"),
        }

        Ok(true)
    }

    fn process_server_certificate(
        &mut self,
        engine: &mut Engine,
        cert: CertificateMessage,
    ) -> Result<(), Error> {
        let suite = engine
            .cipher_suite()
            .ok_or_else(|| Error::UnexpectedMessage("Certificate before ServerHello".to_string()))?;
        if !suite.requires_server_certificate() {
            return Err(Error::UnexpectedMessage(
                "Certificate under a PSK key exchange".to_string(),
            ));
        }
        if cert.is_empty() {
            return Err(Error::CertificateError("empty server certificate".to_string()));
        }

        match &cert {
            CertificateMessage::X509 { chain } => {
                self.peer_chain = chain.clone();
                self.peer_spki = spki_from_certificate(&chain[0])?;
            }
            CertificateMessage::RawPublicKey { spki } => {
                self.peer_spki = spki.clone();
            }
        }

        self.services
            .verify_peer_certificate(self.trust_cert_type, &self.peer_chain, &self.peer_spki)
    }

    fn process_server_key_exchange(
        &mut self,
        engine: &mut Engine,
        ske: ServerKeyExchange,
    ) -> Result<(), Error> {
        match ske {
            ServerKeyExchange::Ecdhe { params, signed } => {
                // The signature covers both randoms and the ECDH parameters.
                let server_random = self
                    .server_random
                    .ok_or_else(|| Error::UnexpectedMessage("no server random".to_string()))?;
                let mut signed_data = Vec::new();
                signed_data.extend_from_slice(&self.random);
                signed_data.extend_from_slice(&server_random);
                params.serialize(&mut signed_data);

                verify_with_spki(
                    &self.peer_spki,
                    &signed_data,
                    &signed.signature,
                    signed.algorithm,
                )?;

                if !engine
                    .config()
                    .supported_groups()
                    .contains(&params.group)
                {
                    return Err(Error::HandshakeFailure(format!(
                        "server picked unsupported group {:?}",
                        params.group
                    )));
                }
                self.kx_params = Some(params);
            }
            ServerKeyExchange::Psk { identity_hint } => {
                // The hint is advisory; identity selection is the store's.
                if !identity_hint.is_empty() {
                    debug!("Ignoring PSK identity hint ({} bytes)", identity_hint.len());
                }
            }
            ServerKeyExchange::EcdhePsk {
                identity_hint,
                params,
            } => {
                if !engine
                    .config()
                    .supported_groups()
                    .contains(&params.group)
                {
                    return Err(Error::HandshakeFailure(format!(
                        "server picked unsupported group {:?}",
                        params.group
                    )));
                }
                if !identity_hint.is_empty() {
                    debug!("Ignoring PSK identity hint ({} bytes)", identity_hint.len());
                }
                self.kx_params = Some(params);
            }
        }
        Ok(())
    }

    /// Flight 5: [Certificate], ClientKeyExchange, [CertificateVerify],
    /// CHANGE_CIPHER_SPEC, Finished.
    fn send_client_flight(&mut self, engine: &mut Engine) -> Result<(), Error> {
        let suite = engine
            .cipher_suite()
            .ok_or_else(|| Error::UnexpectedMessage("no cipher suite".to_string()))?;

        if suite.requires_server_certificate() && self.peer_spki.is_empty() {
            return Err(Error::UnexpectedMessage(
                "server omitted its Certificate".to_string(),
            ));
        }

        engine.flight_begin(5);

        if self.certificate_requested {
            let message = self.own_certificate_message();
            self.sent_client_certificate = !message.is_empty();
            engine.create_handshake(MessageType::Certificate, |body, _| {
                message.serialize(body);
                Ok(())
            })?;
        }

        // ClientKeyExchange and the premaster secret.
        let premaster = self.client_key_exchange(engine, suite)?;

        let server_random = self
            .server_random
            .ok_or_else(|| Error::UnexpectedMessage("no server random".to_string()))?;
        let master = calculate_master_secret(
            &premaster,
            &self.random,
            &server_random,
            suite.hash_algorithm(),
        )?;
        let mut secret = [0u8; MASTER_SECRET_LEN];
        secret.copy_from_slice(&master);
        self.master_secret = Some(Zeroizing::new(secret));

        if self.sent_client_certificate {
            let credentials = self
                .services
                .credentials
                .clone()
                .ok_or_else(|| Error::CertificateError("no client credentials".to_string()))?;
            let signature = credentials.key.sign(engine.transcript())?;
            let verify = CertificateVerify::new(DigitallySigned::new(
                credentials.key.algorithm(),
                signature,
            ));
            engine.create_handshake(MessageType::CertificateVerify, |body, _| {
                verify.serialize(body);
                Ok(())
            })?;
        }

        self.install_keys(engine)?;
        engine.send_ccs()?;
        self.send_finished(engine)?;

        Ok(())
    }

    fn own_certificate_message(&self) -> CertificateMessage {
        match self.services.credentials.as_ref() {
            Some(credentials) => match self.identity_cert_type {
                CertificateType::RawPublicKey => {
                    CertificateMessage::raw_public_key(credentials.spki.clone())
                }
                _ => CertificateMessage::x509(credentials.certificate_chain.clone()),
            },
            // No identity available: an empty list, allowed under `wanted`.
            None => CertificateMessage::empty(),
        }
    }

    fn client_key_exchange(
        &mut self,
        engine: &mut Engine,
        suite: CipherSuite,
    ) -> Result<Zeroizing<Vec<u8>>, Error> {
        use crate::message::KeyExchangeAlgorithm::*;

        match suite.key_exchange_algorithm() {
            EcdheEcdsa => {
                let params = self.kx_params.take().ok_or_else(|| {
                    Error::UnexpectedMessage("server omitted ServerKeyExchange".to_string())
                })?;
                let kx = EcdheKeyExchange::new(params.group)?;
                let cke = ClientKeyExchange::Ecdhe {
                    public_key: kx.public_key().to_vec(),
                };
                engine.create_handshake(MessageType::ClientKeyExchange, |body, _| {
                    cke.serialize(body);
                    Ok(())
                })?;
                kx.complete(&params.public_key)
            }
            Psk => {
                let (identity, key) = self.psk_credentials()?;
                let cke = ClientKeyExchange::Psk { identity };
                engine.create_handshake(MessageType::ClientKeyExchange, |body, _| {
                    cke.serialize(body);
                    Ok(())
                })?;
                Ok(psk_premaster_secret(None, &key))
            }
            EcdhePsk => {
                let params = self.kx_params.take().ok_or_else(|| {
                    Error::UnexpectedMessage("server omitted ServerKeyExchange".to_string())
                })?;
                let (identity, key) = self.psk_credentials()?;
                let kx = EcdheKeyExchange::new(params.group)?;
                let cke = ClientKeyExchange::EcdhePsk {
                    identity,
                    public_key: kx.public_key().to_vec(),
                };
                engine.create_handshake(MessageType::ClientKeyExchange, |body, _| {
                    cke.serialize(body);
                    Ok(())
                })?;
                let other = kx.complete(&params.public_key)?;
                Ok(psk_premaster_secret(Some(&other), &key))
            }
            Unknown => Err(Error::HandshakeFailure("unknown key exchange".to_string())),
        }
    }

    fn psk_credentials(&self) -> Result<(PskIdentity, Zeroizing<Vec<u8>>), Error> {
        let store = self
            .services
            .psk_store
            .as_ref()
            .ok_or_else(|| Error::UnknownPskIdentity("no PSK store".to_string()))?;
        let server_name = self.server_name.as_deref();
        let identity_bytes = store
            .identity(server_name)
            .ok_or_else(|| Error::UnknownPskIdentity("no PSK identity for peer".to_string()))?;
        let key = store
            .key(server_name, &identity_bytes)
            .ok_or_else(|| Error::UnknownPskIdentity("identity has no key".to_string()))?;
        let identity = PskIdentity::try_new(&identity_bytes)
            .map_err(|e| Error::UnknownPskIdentity(e.to_string()))?;
        Ok((identity, key))
    }

    fn install_keys(&mut self, engine: &mut Engine) -> Result<(), Error> {
        let suite = engine
            .cipher_suite()
            .ok_or_else(|| Error::UnexpectedMessage("no cipher suite".to_string()))?;
        let master = self
            .master_secret
            .as_ref()
            .ok_or_else(|| Error::CryptoError("master secret not derived".to_string()))?;
        let server_random = self
            .server_random
            .ok_or_else(|| Error::UnexpectedMessage("no server random".to_string()))?;

        let keys = SessionKeys::derive(suite, &master[..], &self.random, &server_random)?;
        engine.install_keys(keys)
    }

    fn send_finished(&mut self, engine: &mut Engine) -> Result<(), Error> {
        let master = self
            .master_secret
            .as_ref()
            .ok_or_else(|| Error::CryptoError("master secret not derived".to_string()))?
            .clone();
        engine.create_handshake(MessageType::Finished, move |body, engine| {
            let verify_data = engine.verify_data(true, &master[..])?;
            Finished::new(verify_data).serialize(body);
            Ok(())
        })
    }

    /// Returns true when the handshake just completed.
    fn await_server_finished(&mut self, engine: &mut Engine, resumed: bool) -> Result<bool, Error> {
        let Some(msg_type) = engine.peek_message_type() else {
            return Ok(false);
        };
        if msg_type != MessageType::Finished {
            return Err(Error::UnexpectedMessage(format!(
                "{:?} while waiting for the server Finished",
                msg_type
            )));
        }

        // The peer's Finished is checked against the transcript *without*
        // itself, then mixed in.
        let master = self
            .master_secret
            .as_ref()
            .ok_or_else(|| Error::CryptoError("master secret not derived".to_string()))?
            .clone();
        let expected = engine.verify_data(false, &master[..])?;

        let msg = engine.next_message().expect("peeked");
        self.check_finished(&msg, &expected)?;
        engine.transcript_append_incoming(&msg);

        if resumed {
            // Abbreviated handshake: our CCS + Finished is the terminal
            // flight (R3).
            engine.flight_begin(3);
            engine.send_ccs()?;
            self.send_finished(engine)?;
            engine.flight_mark_terminal();
        }

        engine.set_peer_cid(self.peer_cid);
        engine.handshake_complete();
        self.state = ClientState::Established;
        debug!("Client handshake established (resumed: {})", resumed);
        Ok(true)
    }

    fn check_finished(&self, msg: &CompleteMessage, expected: &[u8; 12]) -> Result<(), Error> {
        if msg.epoch != 1 {
            return Err(Error::UnexpectedMessage(
                "Finished outside epoch 1".to_string(),
            ));
        }
        let (_, finished) = Finished::parse(&msg.body).map_err(Error::from)?;
        if finished.verify_data != *expected {
            return Err(Error::DecryptError(
                "server Finished verify_data mismatch".to_string(),
            ));
        }
        Ok(())
    }

    fn build_session(&mut self, engine: &Engine) -> Result<Session, Error> {
        let suite = engine
            .cipher_suite()
            .ok_or_else(|| Error::UnexpectedMessage("no cipher suite".to_string()))?;
        let master = self
            .master_secret
            .as_ref()
            .ok_or_else(|| Error::CryptoError("master secret not derived".to_string()))?;

        let peer_identity = if self.resumed_session {
            let ticket = self.resume_ticket.as_ref().expect("resumed implies ticket");
            ticket.peer_identity.clone()
        } else if suite.is_psk() {
            PeerIdentity::PskIdentity {
                identity: self
                    .services
                    .psk_store
                    .as_ref()
                    .and_then(|s| s.identity(self.server_name.as_deref()))
                    .unwrap_or_default(),
                virtual_host: self.server_name.clone(),
            }
        } else if self.trust_cert_type == CertificateType::RawPublicKey {
            PeerIdentity::RawPublicKey {
                spki: self.peer_spki.clone(),
            }
        } else {
            PeerIdentity::Certificate {
                chain: self.peer_chain.clone(),
            }
        };

        Ok(Session {
            session_id: self.session_id,
            master_secret: master.clone(),
            cipher_suite: suite,
            peer_identity,
            server_name: self.server_name.clone(),
            max_fragment_length: self.negotiated_max_fragment,
            peer_cid: self.peer_cid,
        })
    }
}

impl std::fmt::Debug for ClientHandshaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientHandshaker")
            .field("state", &self.state)
            .field("resuming", &self.resume_ticket.is_some())
            .finish_non_exhaustive()
    }
}
